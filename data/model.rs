// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The shared data model: stream catalog, EPG info, and recording rules.
//!
//! `Data` is the single record replicated between the control service and its
//! readers (worker, waker). Streams, programs and events form a read-only
//! tree rebuilt from the three maps on every access; nothing here is mutated
//! in place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type StreamId = String;
pub type RuleId = String;

/// Which tuner hardware a stream is received on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum System {
    Terrestrial,
    Satellite,
}

impl System {
    pub const ALL: [System; 2] = [System::Terrestrial, System::Satellite];
}

impl std::fmt::Display for System {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            System::Terrestrial => "terrestrial",
            System::Satellite => "satellite",
        })
    }
}

/// Fixed tuning parameters for a stream. Part of the worker's configuration,
/// not replicated state.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    pub system: System,
    pub frequency_hz: u64,

    /// Required for `System::Satellite`; selects a service among those
    /// multiplexed onto the transponder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_stream_id: Option<u16>,
}

impl StreamConfig {
    /// The URL the player binary is given to bind a tuner. `assignment` is
    /// the adapter integer borrowed from the resource pool for this system;
    /// it determines which physical tuner device is opened.
    pub fn tuner_url(&self, assignment: u32) -> String {
        match self.system {
            System::Terrestrial => {
                format!(
                    "isdb-t://adapter={}:frequency={}",
                    2 * assignment + 1,
                    self.frequency_hz
                )
            }
            System::Satellite => {
                format!(
                    "isdb-s://adapter={}:frequency={}:ts-id={}",
                    2 * assignment,
                    self.frequency_hz,
                    self.transport_stream_id.unwrap_or(0),
                )
            }
        }
    }
}

/// Freshness marker for a stream's EPG, updated on every scan attempt
/// (whether or not it yielded usable info).
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    pub last_scan_time: jiff::Timestamp,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    pub start: jiff::Timestamp,
    pub duration_secs: i64,
    pub name: String,
    pub description: String,
}

impl EventInfo {
    pub fn end(&self) -> jiff::Timestamp {
        self.start + jiff::SignedDuration::from_secs(self.duration_secs)
    }

    pub fn is_current(&self, now: jiff::Timestamp) -> bool {
        self.start <= now && now < self.end()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramInfo {
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub events: Vec<EventInfo>,
}

/// The result of one successful scan of a stream's EPG tables.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub scan_time: jiff::Timestamp,
    #[serde(default)]
    pub programs: Vec<ProgramInfo>,
}

/// A user's intent to record events matching a predicate.
///
/// One-shot rules (`weekly: false`) match a single event by exact start time.
/// Weekly rules match any event recurring at the same weekday/hour/minute,
/// evaluated in `tz`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    pub program_number: u32,
    pub start: jiff::Timestamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub weekly: bool,

    /// Tombstone: present only in deltas passed to `merge_data`, never in a
    /// value actually stored in `Data::rule_config_map`.
    #[serde(default)]
    pub deleted: bool,
}

impl RuleConfig {
    pub fn matches(&self, tz: &jiff::tz::TimeZone, program_number: u32, event: &EventInfo) -> bool {
        if program_number != self.program_number {
            return false;
        }
        if self.weekly {
            let rule_zdt = self.start.to_zoned(tz.clone());
            let event_zdt = event.start.to_zoned(tz.clone());
            rule_zdt.weekday() == event_zdt.weekday()
                && rule_zdt.hour() == event_zdt.hour()
                && rule_zdt.minute() == event_zdt.minute()
                && rule_zdt.second() == event_zdt.second()
        } else {
            self.start == event.start
        }
    }
}

/// The single record replicated between the control service and its readers.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(default)]
    pub rule_config_map: BTreeMap<RuleId, RuleConfig>,
    #[serde(default)]
    pub stream_state_map: BTreeMap<StreamId, StreamState>,
    #[serde(default)]
    pub stream_info_map: BTreeMap<StreamId, StreamInfo>,
}

/// A stream as seen by a reader holding both the fixed catalog and the
/// replicated `Data`.
pub struct Stream<'a> {
    pub id: &'a str,
    pub config: &'a StreamConfig,
    pub state: Option<&'a StreamState>,
    pub info: Option<&'a StreamInfo>,
}

/// A `(stream, program)` pair with its index in the stream's program list,
/// which is part of the program's derived identity.
pub struct Program<'a> {
    pub stream_id: &'a str,
    pub scan_time: jiff::Timestamp,
    pub index_in_stream: usize,
    pub info: &'a ProgramInfo,
}

impl Program<'_> {
    /// Derived identity: invalidated by every scan of the owning stream.
    pub fn id(&self) -> String {
        format!("{:05}@{}@{}", self.index_in_stream, self.scan_time, self.stream_id)
    }
}

/// A `(program, event)` pair with its index in the program's event list.
pub struct Event<'a> {
    pub program: Program<'a>,
    pub index_in_program: usize,
    pub info: &'a EventInfo,
}

impl Event<'_> {
    pub fn id(&self) -> String {
        format!("{:05}@{}", self.index_in_program, self.program.id())
    }

    pub fn end(&self) -> jiff::Timestamp {
        self.info.end()
    }

    pub fn is_current(&self, now: jiff::Timestamp) -> bool {
        self.info.is_current(now)
    }
}

/// A catalog of streams and their fixed tuning config: worker configuration,
/// not replicated state.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Catalog {
    pub streams: BTreeMap<StreamId, StreamConfig>,
}

impl Catalog {
    pub fn stream<'a>(&'a self, data: &'a Data, id: &str) -> Option<Stream<'a>> {
        let config = self.streams.get(id)?;
        Some(Stream {
            id,
            config,
            state: data.stream_state_map.get(id),
            info: data.stream_info_map.get(id),
        })
    }

    pub fn streams<'a>(&'a self, data: &'a Data) -> impl Iterator<Item = Stream<'a>> {
        self.streams.iter().map(move |(id, config)| Stream {
            id,
            config,
            state: data.stream_state_map.get(id),
            info: data.stream_info_map.get(id),
        })
    }

    /// All events across all streams with known info, in no particular order.
    pub fn events<'a>(&'a self, data: &'a Data) -> impl Iterator<Item = Event<'a>> {
        self.streams(data).flat_map(move |stream| {
            let stream_id = stream.id;
            let info = stream.info;
            info.into_iter().flat_map(move |info| {
                info.programs
                    .iter()
                    .enumerate()
                    .flat_map(move |(index_in_stream, program_info)| {
                        let program = Program {
                            stream_id,
                            scan_time: info.scan_time,
                            index_in_stream,
                            info: program_info,
                        };
                        program_info
                            .events
                            .iter()
                            .enumerate()
                            .map(move |(index_in_program, event_info)| Event {
                                program: Program {
                                    stream_id: program.stream_id,
                                    scan_time: program.scan_time,
                                    index_in_stream: program.index_in_stream,
                                    info: program.info,
                                },
                                index_in_program,
                                info: event_info,
                            })
                    })
            })
        })
    }

    /// The stream with no recorded state, or else the one with the oldest
    /// `last_scan_time`. `None` only if the catalog itself is empty.
    pub fn stream_due_for_scan<'a>(&'a self, data: &'a Data) -> Option<Stream<'a>> {
        let mut without_state = None;
        let mut oldest: Option<Stream<'a>> = None;
        for stream in self.streams(data) {
            match stream.state {
                None => {
                    if without_state.is_none() {
                        without_state = Some(stream);
                    }
                }
                Some(state) => {
                    let replace = match &oldest {
                        None => true,
                        Some(o) => state.last_scan_time < o.state.unwrap().last_scan_time,
                    };
                    if replace {
                        oldest = Some(stream);
                    }
                }
            }
        }
        without_state.or(oldest)
    }
}

/// The rule (if any) matching `event`, given the timezone used for weekly
/// matching.
pub fn rule_matching_event<'a>(
    data: &'a Data,
    tz: &jiff::tz::TimeZone,
    event: &Event<'_>,
) -> Option<(&'a RuleId, &'a RuleConfig)> {
    data.rule_config_map
        .iter()
        .find(|(_, rule)| rule.matches(tz, event.program.info.number, event.info))
}

/// The currently-airing event with a matching rule, if any.
pub fn current_matched_event<'a>(
    catalog: &'a Catalog,
    data: &'a Data,
    tz: &jiff::tz::TimeZone,
    now: jiff::Timestamp,
) -> Option<Event<'a>> {
    catalog
        .events(data)
        .find(|event| event.is_current(now) && rule_matching_event(data, tz, event).is_some())
}

/// The earliest future event with a matching rule, if any.
pub fn next_matched_event<'a>(
    catalog: &'a Catalog,
    data: &'a Data,
    tz: &jiff::tz::TimeZone,
    now: jiff::Timestamp,
) -> Option<Event<'a>> {
    catalog
        .events(data)
        .filter(|event| now < event.info.start && rule_matching_event(data, tz, event).is_some())
        .min_by_key(|event| event.info.start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> jiff::Timestamp {
        s.parse().unwrap()
    }

    #[test]
    fn tuner_url_terrestrial() {
        let c = StreamConfig {
            system: System::Terrestrial,
            frequency_hz: 557142857,
            transport_stream_id: None,
        };
        assert_eq!(c.tuner_url(1), "isdb-t://adapter=3:frequency=557142857");
    }

    #[test]
    fn tuner_url_satellite() {
        let c = StreamConfig {
            system: System::Satellite,
            frequency_hz: 1318000000,
            transport_stream_id: Some(0x40f1),
        };
        assert_eq!(
            c.tuner_url(1),
            "isdb-s://adapter=2:frequency=1318000000:ts-id=16625"
        );
    }

    #[test]
    fn one_shot_rule_matches_exact_start() {
        let rule = RuleConfig {
            program_number: 101,
            start: ts("2026-07-28T10:00:00Z"),
            duration_secs: None,
            name: None,
            weekly: false,
            deleted: false,
        };
        let event = EventInfo {
            start: ts("2026-07-28T10:00:00Z"),
            duration_secs: 1800,
            name: "N".into(),
            description: "".into(),
        };
        let tz = jiff::tz::TimeZone::UTC;
        assert!(rule.matches(&tz, 101, &event));
        assert!(!rule.matches(&tz, 102, &event));

        let mut other = event.clone();
        other.start = ts("2026-07-28T10:00:01Z");
        assert!(!rule.matches(&tz, 101, &other));
    }

    #[test]
    fn weekly_rule_matches_same_weekday_hour_minute() {
        let tz = jiff::tz::TimeZone::UTC;
        // 2026-07-27 is a Monday.
        let rule = RuleConfig {
            program_number: 101,
            start: ts("2026-07-27T10:00:00Z"),
            duration_secs: None,
            name: None,
            weekly: true,
            deleted: false,
        };
        let next_monday = EventInfo {
            start: ts("2026-08-03T10:00:00Z"),
            duration_secs: 1800,
            name: "N".into(),
            description: "".into(),
        };
        assert!(rule.matches(&tz, 101, &next_monday));

        let off_by_a_minute = EventInfo {
            start: ts("2026-08-03T10:01:00Z"),
            ..next_monday.clone()
        };
        assert!(!rule.matches(&tz, 101, &off_by_a_minute));

        let tuesday = EventInfo {
            start: ts("2026-08-04T10:00:00Z"),
            ..next_monday
        };
        assert!(!rule.matches(&tz, 101, &tuesday));
    }

    #[test]
    fn stream_due_for_scan_prefers_no_state_then_oldest() {
        let mut catalog = Catalog::default();
        catalog.streams.insert(
            "a".into(),
            StreamConfig {
                system: System::Terrestrial,
                frequency_hz: 1,
                transport_stream_id: None,
            },
        );
        catalog.streams.insert(
            "b".into(),
            StreamConfig {
                system: System::Terrestrial,
                frequency_hz: 2,
                transport_stream_id: None,
            },
        );
        let mut data = Data::default();
        data.stream_state_map.insert(
            "a".into(),
            StreamState {
                last_scan_time: ts("2026-07-28T00:00:00Z"),
            },
        );
        // "b" has no state: it wins even though "a" is present.
        let due = catalog.stream_due_for_scan(&data).unwrap();
        assert_eq!(due.id, "b");

        data.stream_state_map.insert(
            "b".into(),
            StreamState {
                last_scan_time: ts("2026-07-28T12:00:00Z"),
            },
        );
        // now "a" has the older state.
        let due = catalog.stream_due_for_scan(&data).unwrap();
        assert_eq!(due.id, "a");
    }
}
