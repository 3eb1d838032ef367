// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The waker: turns the TV on shortly before a matched recording starts, so
//! a human arrives to a warmed-up set rather than one that missed the
//! opening minutes. See SPEC §4.7.
//!
//! There's no resource pool or subprocess lifecycle here, just a single
//! derived boolean (`alive`) re-evaluated on every control-service change
//! and every timeout; a wake command fires on its rising edge.

use std::time::Duration as StdDuration;

use data::{current_matched_event, next_matched_event, Catalog, Data};
use jiff::{SignedDuration, Timestamp};
use tokio::process::Command;
use tracing::{info, warn};

use base::clock::Clocks;

/// How far ahead of a matched event's start the TV should already be on.
const PRE_ROLL: StdDuration = StdDuration::from_secs(5 * 60);

/// How far out to sleep when nothing is scheduled.
const IDLE_HORIZON: StdDuration = StdDuration::from_secs(24 * 3600);

pub struct WakerConfig {
    pub catalog: Catalog,
    pub tz: jiff::tz::TimeZone,
    /// MAC address passed to `wakeonlan`, e.g. `"d8:cb:8a:e7:bc:ab"`.
    pub mac_address: String,
}

#[derive(Clone, Copy)]
struct State {
    alive: bool,
    until: Timestamp,
}

fn evaluate(config: &WakerConfig, data: &Data, now: Timestamp) -> State {
    let pre_rolled = now + SignedDuration::try_from(PRE_ROLL).unwrap();
    if let Some(event) = current_matched_event(&config.catalog, data, &config.tz, pre_rolled) {
        return State { alive: true, until: event.end() };
    }
    if let Some(event) = next_matched_event(&config.catalog, data, &config.tz, pre_rolled) {
        return State { alive: false, until: event.info.start };
    }
    State { alive: false, until: now + SignedDuration::try_from(IDLE_HORIZON).unwrap() }
}

/// Runs `wakeonlan <mac_address>` as a detached child, logging (but not
/// failing on) a nonzero exit or a missing binary -- a TV that's already on
/// is the common case, not an error.
async fn send_wake(mac_address: &str) {
    match Command::new("wakeonlan").arg(mac_address).status().await {
        Ok(status) if status.success() => info!(%mac_address, "woke TV"),
        Ok(status) => warn!(%mac_address, %status, "wakeonlan exited non-zero"),
        Err(e) => warn!(%mac_address, err = %e, "failed to run wakeonlan"),
    }
}

/// Runs the waker loop until `shutdown` fires.
pub async fn run<C: Clocks>(
    config: WakerConfig,
    clocks: std::sync::Arc<C>,
    control: crate::control_client::ControlClient,
    shutdown: base::shutdown::Receiver,
) -> Result<(), base::shutdown::ShutdownError> {
    let mut data = control.fetch(&shutdown).await?;
    let mut state: Option<State> = None;

    loop {
        let now = clocks.realtime();
        let new_state = evaluate(&config, &data, now);
        if !state.is_some_and(|s| s.alive) && new_state.alive {
            send_wake(&config.mac_address).await;
        }
        state = Some(new_state);

        let sleep_for = new_state.until.duration_since(now).max(SignedDuration::ZERO);
        let sleep_dur = StdDuration::try_from(sleep_for).unwrap_or(StdDuration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(sleep_dur) => {
                state = None;
            }
            fresh = control.watch(&shutdown) => {
                data = fresh?;
            }
            _ = shutdown.as_future() => {
                info!("waker shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data::{EventInfo, ProgramInfo, RuleConfig, StreamConfig, StreamInfo, System};

    fn config() -> WakerConfig {
        let mut streams = std::collections::BTreeMap::new();
        streams.insert(
            "s1".to_string(),
            StreamConfig { system: System::Terrestrial, frequency_hz: 557142857, transport_stream_id: None },
        );
        let catalog = Catalog { streams };
        WakerConfig { catalog, tz: jiff::tz::TimeZone::UTC, mac_address: "00:11:22:33:44:55".into() }
    }

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn data_with_event(start: Timestamp, duration_secs: i64, program_number: u32) -> Data {
        let mut data = Data::default();
        data.stream_info_map.insert(
            "s1".into(),
            StreamInfo {
                scan_time: start,
                programs: vec![ProgramInfo {
                    number: program_number,
                    title: "T".into(),
                    events: vec![EventInfo {
                        start,
                        duration_secs,
                        name: "N".into(),
                        description: "".into(),
                    }],
                }],
            },
        );
        data.rule_config_map.insert(
            "r1".into(),
            RuleConfig {
                program_number,
                start,
                duration_secs: None,
                name: None,
                weekly: false,
                deleted: false,
            },
        );
        data
    }

    #[test]
    fn s6_pre_roll_wakes_tv_ahead_of_event() {
        let config = config();
        let now = ts("2026-07-28T10:00:00Z");
        let data = data_with_event(now + SignedDuration::from_secs(3 * 60), 1800, 101);
        let state = evaluate(&config, &data, now);
        assert!(state.alive, "5-minute pre-roll should cover a 3-minute-out event");
    }

    #[test]
    fn no_upcoming_event_falls_back_to_idle_horizon() {
        let config = config();
        let now = ts("2026-07-28T10:00:00Z");
        let state = evaluate(&config, &Data::default(), now);
        assert!(!state.alive);
        assert_eq!(state.until, now + SignedDuration::try_from(IDLE_HORIZON).unwrap());
    }

    #[test]
    fn far_future_event_does_not_wake_yet() {
        let config = config();
        let now = ts("2026-07-28T10:00:00Z");
        let data = data_with_event(now + SignedDuration::from_secs(3600), 1800, 101);
        let state = evaluate(&config, &data, now);
        assert!(!state.alive);
        assert_eq!(state.until, now + SignedDuration::from_secs(3600));
    }
}
