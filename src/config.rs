// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2022 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Runtime configuration files, one `serde`-derived struct per subcommand.
//! See SPEC §7 "Configuration".

use std::path::Path;

use serde::Deserialize;

use base::{err, Error};
use data::{Catalog, StreamConfig, StreamId};

pub fn read<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let body = std::fs::read(path).map_err(|e| {
        err!(Unavailable, msg("reading config file {}", path.display()), source(e))
    })?;
    serde_json::from_slice(&body).map_err(|e| {
        err!(InvalidArgument, msg("parsing config file {}", path.display()), source(e))
    })
}

/// One entry of the `catalog` array in a config file: a stream's fixed
/// tuning parameters plus the id it's addressed by.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: StreamId,
    #[serde(flatten)]
    pub config: StreamConfig,
}

pub fn build_catalog(entries: Vec<CatalogEntry>) -> Catalog {
    Catalog { streams: entries.into_iter().map(|e| (e.id, e.config)).collect() }
}

pub fn parse_timezone(name: &str) -> Result<jiff::tz::TimeZone, Error> {
    jiff::tz::TimeZone::get(name)
        .map_err(|e| err!(InvalidArgument, msg("unknown timezone {:?}", name), source(e)))
}
