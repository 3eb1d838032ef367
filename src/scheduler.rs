// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The scheduler: a pure function from `(Data, live demands, now)` to a
//! desired task list plus the next wakeup time. See SPEC §4.1.
//!
//! Nothing in this module touches a clock, a subprocess, or the network —
//! that's what makes it straightforward to drive with [`data`]'s fixtures in
//! tests and with [`base::clock::SimulatedClocks`] in the supervisor's own
//! tests.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use data::{rule_matching_event, Catalog, Data, StreamId, System};
use jiff::Timestamp;

use crate::live::LiveRequest;

/// How long a stream's EPG is considered fresh after a successful scan.
pub const SCAN_REFRESH_INTERVAL: StdDuration = StdDuration::from_secs(3 * 3600);

/// Upper bound on the wakeup horizon when nothing else constrains it.
pub const IDLE_HORIZON: StdDuration = StdDuration::from_secs(24 * 3600);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordDesired {
    pub stream_id: StreamId,
    pub system: System,
    pub frequency_hz: u64,
    pub transport_stream_id: Option<u16>,
    pub program_number: u32,
    pub event_name: String,
    pub event_end: Timestamp,
}

#[derive(Clone, Debug)]
pub struct PlayDesired {
    pub program_number: u32,
    pub system: System,
    pub frequency_hz: u64,
    pub transport_stream_id: Option<u16>,
    pub request: LiveRequest,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanDesired {
    pub stream_id: StreamId,
    pub system: System,
    pub frequency_hz: u64,
    pub transport_stream_id: Option<u16>,
    pub scheduled_time: Timestamp,
}

#[derive(Clone, Debug)]
pub enum Desired {
    Record(RecordDesired),
    Play(PlayDesired),
    Scan(ScanDesired),
}

impl Desired {
    pub fn system(&self) -> System {
        match self {
            Desired::Record(r) => r.system,
            Desired::Play(p) => p.system,
            Desired::Scan(s) => s.system,
        }
    }
}

pub struct SchedulerOutput {
    pub desired: Vec<Desired>,
    pub wakeup: Timestamp,
}

/// Computes the desired task set and the next wakeup time.
///
/// `pool_sizes` gives the total (not currently-available) tuner count per
/// system: admission is budgeted against total capacity, independent of
/// what the supervisor currently has running, since cancel-drift and
/// start-gap reconciliation happen separately (§4.3).
pub fn schedule(
    catalog: &Catalog,
    data: &Data,
    live_requests: &[LiveRequest],
    now: Timestamp,
    tz: &jiff::tz::TimeZone,
    pool_sizes: HashMap<System, usize>,
) -> SchedulerOutput {
    let mut remaining = pool_sizes;
    let mut desired = Vec::new();
    let mut wakeup_candidates: Vec<Timestamp> = vec![now + jiff::SignedDuration::try_from(IDLE_HORIZON).unwrap()];

    // 1. Recording: every event with a matching rule, admitted in event-start order.
    let mut current_and_future: Vec<_> = catalog
        .events(data)
        .filter(|e| now < e.end() || e.is_current(now))
        .filter(|e| rule_matching_event(data, tz, e).is_some())
        .collect();
    current_and_future.sort_by_key(|e| e.info.start);

    for event in &current_and_future {
        let stream = catalog
            .stream(data, event.program.stream_id)
            .expect("event's owning stream must be in the catalog");
        if event.is_current(now) {
            let budget = remaining.entry(stream.config.system).or_insert(0);
            if *budget == 0 {
                continue;
            }
            *budget -= 1;
            desired.push(Desired::Record(RecordDesired {
                stream_id: stream.id.to_string(),
                system: stream.config.system,
                frequency_hz: stream.config.frequency_hz,
                transport_stream_id: stream.config.transport_stream_id,
                program_number: event.program.info.number,
                event_name: event.info.name.clone(),
                event_end: event.end(),
            }));
            wakeup_candidates.push(event.end());
        } else {
            wakeup_candidates.push(event.info.start);
        }
    }

    // 2. Playback: one PlayTask per connected client whose program resolves,
    // admitted ahead of scanning but behind any currently-airing recording.
    for request in live_requests {
        let Some(stream) = catalog.streams(data).find(|s| {
            s.info
                .into_iter()
                .flat_map(|info| info.programs.iter())
                .any(|p| p.number == request.program_number)
        }) else {
            continue;
        };
        let budget = remaining.entry(stream.config.system).or_insert(0);
        if *budget == 0 {
            continue;
        }
        *budget -= 1;
        desired.push(Desired::Play(PlayDesired {
            program_number: request.program_number,
            system: stream.config.system,
            frequency_hz: stream.config.frequency_hz,
            transport_stream_id: stream.config.transport_stream_id,
            request: request.clone(),
        }));
    }

    // 3. Scanning: streams with stale (or absent) info, oldest first.
    let mut scan_candidates: Vec<_> = catalog
        .streams(data)
        .map(|s| {
            let age = match s.state {
                None => None,
                Some(state) => Some(now.duration_since(state.last_scan_time)),
            };
            (s, age)
        })
        .collect();
    scan_candidates.sort_by_key(|(_, age)| match age {
        None => (0u8, jiff::SignedDuration::ZERO),
        Some(age) => (1u8, -*age),
    });

    for (stream, age) in scan_candidates {
        let due = match age {
            None => true,
            Some(age) => age >= jiff::SignedDuration::try_from(SCAN_REFRESH_INTERVAL).unwrap(),
        };
        if !due {
            if let Some(state) = stream.state {
                wakeup_candidates.push(
                    state.last_scan_time + jiff::SignedDuration::try_from(SCAN_REFRESH_INTERVAL).unwrap(),
                );
            }
            continue;
        }
        let budget = remaining.entry(stream.config.system).or_insert(0);
        if *budget == 0 {
            continue;
        }
        *budget -= 1;
        desired.push(Desired::Scan(ScanDesired {
            stream_id: stream.id.to_string(),
            system: stream.config.system,
            frequency_hz: stream.config.frequency_hz,
            transport_stream_id: stream.config.transport_stream_id,
            scheduled_time: now,
        }));
    }

    let wakeup = wakeup_candidates.into_iter().min().unwrap();
    SchedulerOutput { desired, wakeup }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data::{EventInfo, ProgramInfo, RuleConfig, StreamConfig, StreamInfo, StreamState};

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn one_stream_catalog() -> Catalog {
        let mut streams = std::collections::BTreeMap::new();
        streams.insert(
            "s1".to_string(),
            StreamConfig {
                system: System::Terrestrial,
                frequency_hz: 557142857,
                transport_stream_id: None,
            },
        );
        Catalog { streams }
    }

    fn pool(terrestrial: usize, satellite: usize) -> HashMap<System, usize> {
        [(System::Terrestrial, terrestrial), (System::Satellite, satellite)]
            .into_iter()
            .collect()
    }

    /// S1: immediate recording.
    #[test]
    fn s1_immediate_recording() {
        let catalog = one_stream_catalog();
        let now = ts("2026-07-28T12:00:00Z");
        let mut data = Data::default();
        data.stream_info_map.insert(
            "s1".into(),
            StreamInfo {
                scan_time: now,
                programs: vec![ProgramInfo {
                    number: 101,
                    title: "NHK".into(),
                    events: vec![EventInfo {
                        start: now - jiff::SignedDuration::from_secs(60),
                        duration_secs: 1800,
                        name: "N".into(),
                        description: "".into(),
                    }],
                }],
            },
        );
        data.rule_config_map.insert(
            "r1".into(),
            RuleConfig {
                program_number: 101,
                start: now - jiff::SignedDuration::from_secs(60),
                duration_secs: None,
                name: None,
                weekly: false,
                deleted: false,
            },
        );
        // Already scanned just now: not also due for a ScanTask this tick.
        data.stream_state_map.insert("s1".into(), StreamState { last_scan_time: now });
        let tz = jiff::tz::TimeZone::UTC;
        let out = schedule(&catalog, &data, &[], now, &tz, pool(2, 2));
        assert_eq!(out.desired.len(), 1);
        let Desired::Record(r) = &out.desired[0] else {
            panic!("expected a RecordTask, got {:?}", out.desired[0]);
        };
        assert_eq!(r.program_number, 101);
        assert_eq!(out.wakeup, now + jiff::SignedDuration::from_secs(1740));
    }

    /// S2: preempting scan. A recording and a stale scan compete for the same pool.
    #[test]
    fn s2_preempting_scan() {
        let mut streams = std::collections::BTreeMap::new();
        streams.insert(
            "s1".to_string(),
            StreamConfig {
                system: System::Terrestrial,
                frequency_hz: 557142857,
                transport_stream_id: None,
            },
        );
        streams.insert(
            "s2".to_string(),
            StreamConfig {
                system: System::Terrestrial,
                frequency_hz: 551142857,
                transport_stream_id: None,
            },
        );
        let catalog = Catalog { streams };
        let now = ts("2026-07-28T12:00:00Z");
        let mut data = Data::default();
        data.stream_info_map.insert(
            "s1".into(),
            StreamInfo {
                scan_time: now,
                programs: vec![ProgramInfo {
                    number: 101,
                    title: "NHK".into(),
                    events: vec![EventInfo {
                        start: now - jiff::SignedDuration::from_secs(60),
                        duration_secs: 1800,
                        name: "N".into(),
                        description: "".into(),
                    }],
                }],
            },
        );
        data.rule_config_map.insert(
            "r1".into(),
            RuleConfig {
                program_number: 101,
                start: now - jiff::SignedDuration::from_secs(60),
                duration_secs: None,
                name: None,
                weekly: false,
                deleted: false,
            },
        );
        // s1 was just scanned: not itself due. s2 has no state at all: always due for scan.
        data.stream_state_map.insert("s1".into(), StreamState { last_scan_time: now });
        let tz = jiff::tz::TimeZone::UTC;

        let out = schedule(&catalog, &data, &[], now, &tz, pool(2, 0));
        assert_eq!(out.desired.len(), 2);

        let out = schedule(&catalog, &data, &[], now, &tz, pool(1, 0));
        assert_eq!(out.desired.len(), 1);
        assert!(matches!(out.desired[0], Desired::Record(_)));
    }

    #[test]
    fn idle_has_no_desired_tasks_and_24h_horizon() {
        let catalog = one_stream_catalog();
        let now = ts("2026-07-28T12:00:00Z");
        let mut data = Data::default();
        // Stream already fresh: no scan due; no programs: no record.
        data.stream_state_map.insert("s1".into(), StreamState { last_scan_time: now });
        let tz = jiff::tz::TimeZone::UTC;
        let out = schedule(&catalog, &data, &[], now, &tz, pool(1, 1));
        assert!(out.desired.is_empty());
        assert_eq!(out.wakeup, now + jiff::SignedDuration::try_from(SCAN_REFRESH_INTERVAL).unwrap());
    }
}
