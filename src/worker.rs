// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The worker's main event loop: scheduler + pools + supervisor + live
//! stream front, wired together. See SPEC §4.1 and §5.
//!
//! Everything that owns mutable state here -- `Pools`, `LiveRequests`, the
//! local cache of the control service's `Data`, and the `Supervisor` --
//! is touched only from this single loop, on this single task. Other
//! tasks (the HTTP listener, the control-service watcher) only ever send
//! messages in; they never reach back into this state directly.

use std::collections::HashMap;
use std::sync::Arc;

use base::clock::Clocks;
use data::Catalog;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::control_client::ControlClient;
use crate::live::{LiveEvent, LiveRequests};
use crate::pool::Pools;
use crate::scheduler::{schedule, Desired};
use crate::supervisor::Supervisor;

pub struct WorkerConfig {
    pub catalog: Catalog,
    pub tz: jiff::tz::TimeZone,
    pub terrestrial_pool_size: usize,
    pub satellite_pool_size: usize,
}

/// Runs the worker loop until `shutdown` fires.
///
/// `live_events` is fed by the live-stream HTTP front as clients connect
/// and disconnect; `control` is used both to pull the initial/ongoing
/// `Data` snapshot and to post `ScanTask` results back.
pub async fn run<C: Clocks>(
    config: WorkerConfig,
    clocks: Arc<C>,
    control: ControlClient,
    mut live_events: mpsc::Receiver<LiveEvent>,
    shutdown: base::shutdown::Receiver,
) -> Result<(), base::shutdown::ShutdownError> {
    let mut live_requests = LiveRequests::new();
    let mut pools = Pools::new(config.terrestrial_pool_size, config.satellite_pool_size);
    let mut supervisor = Supervisor::new();

    let pool_sizes: HashMap<_, _> = data::System::ALL
        .into_iter()
        .map(|s| (s, pools.size(s)))
        .collect();

    let mut data = control.fetch(&shutdown).await?;

    loop {
        let now = clocks.realtime();
        let SchedulerTick { desired, wakeup } = tick(&config, &data, &live_requests, now, &pool_sizes);

        let deltas = supervisor.reconcile(&desired, &mut pools, &config.tz, now).await;
        for delta in deltas {
            if !delta.0.stream_state_map.is_empty() || !delta.0.stream_info_map.is_empty() {
                control.post(&delta.0, &shutdown).await?;
            }
        }

        let sleep_for = wakeup.duration_since(clocks.realtime()).max(jiff::SignedDuration::ZERO);
        let sleep_dur = std::time::Duration::try_from(sleep_for).unwrap_or(std::time::Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(sleep_dur) => {}
            event = live_events.recv() => {
                match event {
                    Some(LiveEvent::Connected(req)) => {
                        info!(id = req.id, program = req.program_number, "live client connected");
                        live_requests.insert(req);
                    }
                    Some(LiveEvent::Disconnected(id)) => {
                        info!(id, "live client disconnected");
                        live_requests.remove(id);
                    }
                    None => {
                        warn!("live event channel closed, continuing on scheduler timer only");
                    }
                }
            }
            fresh = control.watch(&shutdown) => {
                data = fresh?;
            }
            _ = shutdown.as_future() => {
                info!("worker shutting down");
                return Ok(());
            }
        }
    }
}

struct SchedulerTick {
    desired: Vec<Desired>,
    wakeup: jiff::Timestamp,
}

fn tick(
    config: &WorkerConfig,
    data: &data::Data,
    live_requests: &LiveRequests,
    now: jiff::Timestamp,
    pool_sizes: &HashMap<data::System, usize>,
) -> SchedulerTick {
    let requests: Vec<_> = live_requests.iter().cloned().collect();
    let out = schedule(&config.catalog, data, &requests, now, &config.tz, pool_sizes.clone());
    SchedulerTick { desired: out.desired, wakeup: out.wakeup }
}
