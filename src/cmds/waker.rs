// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `tv waker`: turns the TV on ahead of a matched recording.

use std::path::PathBuf;
use std::sync::Arc;

use bpaf::{Bpaf, Parser};
use serde::Deserialize;

use base::clock::RealClocks;
use base::Error;

use crate::config::{self, CatalogEntry};
use crate::control_client::ControlClient;
use crate::waker;

fn default_timezone() -> String {
    "UTC".into()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    control_url: String,
    catalog: Vec<CatalogEntry>,
    mac_address: String,

    #[serde(default = "default_timezone")]
    timezone: String,
}

fn config_path() -> impl Parser<PathBuf> {
    bpaf::long("config")
        .help("Path to the waker's JSON config file.")
        .argument::<PathBuf>("PATH")
        .fallback("/etc/tv-waker.json".into())
        .debug_fallback()
}

/// Runs the waker: watches the schedule and turns the TV on ahead of time.
#[derive(Bpaf, Debug)]
#[bpaf(command("waker"))]
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

    // `ShutdownError` here only ever means shutdown was requested mid-retry
    // of a control-service call; that's a clean exit, not a failure.
    let _ = waker::run(
        waker::WakerConfig { catalog, tz, mac_address: config.mac_address },
        clocks,
        control,
        shutdown,
    )
    .await;
    Ok(0)
}
