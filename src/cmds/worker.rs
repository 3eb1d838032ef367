// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `tv worker`: runs the scheduler/supervisor core and the live-stream
//! HTTP front.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bpaf::{Bpaf, Parser};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use base::clock::RealClocks;
use base::Error;

use crate::config::{self, CatalogEntry};
use crate::control_client::ControlClient;
use crate::live::IdAllocator;
use crate::{live_http, worker};

fn default_pool_size() -> usize {
    1
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_live_bind_addr() -> SocketAddr {
    "0.0.0.0:8081".parse().unwrap()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    control_url: String,
    catalog: Vec<CatalogEntry>,

    #[serde(default = "default_pool_size")]
    terrestrial_pool_size: usize,

    #[serde(default = "default_pool_size")]
    satellite_pool_size: usize,

    #[serde(default = "default_timezone")]
    timezone: String,

    #[serde(default = "default_live_bind_addr")]
    live_bind_addr: SocketAddr,
}

fn config_path() -> impl Parser<PathBuf> {
    bpaf::long("config")
        .help("Path to the worker's JSON config file.")
        .argument::<PathBuf>("PATH")
        .fallback("/etc/tv-worker.json".into())
        .debug_fallback()
}

/// Runs the worker: schedules and drives recording/playback/scan tasks.
#[derive(Bpaf, Debug)]
#[bpaf(command("worker"))]
pub struct Args {
    #[bpaf(external(config_path))]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config: ConfigFile = config::read(&args.config)?;
    super::block_on(super::run_with_shutdown(|shutdown| async_run(config, shutdown)))
}

async fn async_run(config: ConfigFile, shutdown: base::shutdown::Receiver) -> Result<i32, Error> {
    let clocks = Arc::new(RealClocks {});
    let catalog = config::build_catalog(config.catalog);
    let tz = config::parse_timezone(&config.timezone)?;
    let control_url: http::Uri = config.control_url.parse().map_err(|e| {
        base::err!(InvalidArgument, msg("invalid controlUrl {:?}", config.control_url), source(e))
    })?;
    let control = ControlClient::new(control_url);

    let (live_tx, live_rx) = mpsc::channel(64);
    let ids = IdAllocator::default();

    let live_fut = live_http::serve(config.live_bind_addr, live_tx, ids, shutdown.clone());
    let worker_fut = worker::run(
        worker::WorkerConfig {
            catalog,
            tz,
            terrestrial_pool_size: config.terrestrial_pool_size,
            satellite_pool_size: config.satellite_pool_size,
        },
        clocks,
        control,
        live_rx,
        shutdown,
    );

    let (live_result, worker_result) = tokio::join!(live_fut, worker_fut);
    live_result?;
    if let Err(e) = worker_result {
        warn!(err = %e, "worker loop ended via shutdown mid-retry");
    }
    Ok(0)
}
