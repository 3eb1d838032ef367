// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `tv init`: creates an empty control-service data store.

use std::path::PathBuf;

use bpaf::{Bpaf, Parser};
use tracing::info;

use base::Error;

use crate::control::store::Store;

fn data_path() -> impl Parser<PathBuf> {
    bpaf::long("data-path")
        .help("Path to the control service's data file.")
        .argument::<PathBuf>("PATH")
        .fallback("/var/lib/tv/data.json".into())
        .debug_fallback()
}

/// Creates an empty data store, so `tv control` has somewhere to write.
#[derive(Bpaf, Debug)]
#[bpaf(command("init"))]
pub struct Args {
    #[bpaf(external(data_path))]
    data_path: PathBuf,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let store = Store::open(&args.data_path)?;
    if args.data_path.exists() {
        info!(path = %args.data_path.display(), "data store already initialized");
        return Ok(0);
    }
    store.merge_and_save(Default::default())?;
    info!(path = %args.data_path.display(), "data store initialized");
    Ok(0)
}
