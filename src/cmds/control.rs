// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `tv control`: runs the HTTP-served shared-state store.

use std::net::SocketAddr;
use std::path::PathBuf;

use bpaf::{Bpaf, Parser};
use serde::Deserialize;

use base::Error;

use crate::config;
use crate::control::{self, store::Store};

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    bind_addr: Option<SocketAddr>,
    data_path: PathBuf,
}

fn config_path() -> impl Parser<PathBuf> {
    bpaf::long("config")
        .help("Path to the control service's JSON config file.")
        .argument::<PathBuf>("PATH")
        .fallback("/etc/tv-control.json".into())
        .debug_fallback()
}

/// Runs the control service: the shared-state store the worker and waker
/// read from and the worker writes back to.
#[derive(Bpaf, Debug)]
#[bpaf(command("control"))]
pub struct Args {
    #[bpaf(external(config_path))]
    config: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let config: ConfigFile = config::read(&args.config)?;
    super::block_on(super::run_with_shutdown(|shutdown| async_run(config, shutdown)))
}

async fn async_run(config: ConfigFile, shutdown: base::shutdown::Receiver) -> Result<i32, Error> {
    let store = Store::open(&config.data_path)?;
    let bind_addr = config.bind_addr.unwrap_or_else(default_bind_addr);
    control::serve(bind_addr, store, shutdown).await?;
    Ok(0)
}
