// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Durable storage for the control service's `Data`. See SPEC §4.6.
//!
//! One JSON file, guarded by an advisory `flock` so a second `control`
//! process started against the same directory fails fast instead of
//! silently racing the first. Writes go to a temp file in the same
//! directory and are renamed into place, so a crash mid-write never leaves
//! a torn file behind.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use data::{merge_data, Data};
use nix::fcntl::{flock, FlockArg};
use std::os::unix::io::AsRawFd;
use tracing::info;

use base::{err, Error, ErrorKind, ResultExt};

pub struct Store {
    path: PathBuf,
    _lock: File,
}

impl Store {
    /// Opens (creating if absent) the data file at `path`'s directory,
    /// taking an exclusive advisory lock that's released when `Store`
    /// drops.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let dir = path.parent().ok_or_else(|| err!(InvalidArgument, msg("data path has no parent directory")))?;
        let lock_path = dir.join(".tv-control.lock");
        let lock = File::create(&lock_path).err_kind(ErrorKind::Unavailable)?;
        flock(lock.as_raw_fd(), FlockArg::LockExclusiveNonblock).map_err(|e| {
            err!(
                Unavailable,
                msg("another control process is already running against {}", dir.display()),
                source(e)
            )
        })?;
        info!(path = %path.display(), "control data store locked");
        Ok(Store { path: path.to_path_buf(), _lock: lock })
    }

    pub fn load(&self) -> Result<Data, Error> {
        let mut f = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Data::default()),
            Err(e) => return Err(err!(Unavailable, msg("opening {}", self.path.display()), source(e))),
        };
        let mut buf = String::new();
        f.read_to_string(&mut buf).err_kind(ErrorKind::Unavailable)?;
        serde_json::from_str(&buf).map_err(|e| {
            err!(Internal, msg("{} is corrupt", self.path.display()), source(e))
        })
    }

    /// Reads the current file, merges `delta` onto it, and atomically
    /// writes the result back. Returns the merged `Data` so the caller can
    /// notify subscribers without a second read.
    pub fn merge_and_save(&self, delta: Data) -> Result<Data, Error> {
        let mut data = self.load()?;
        merge_data(&mut data, delta);
        self.save(&data)?;
        Ok(data)
    }

    fn save(&self, data: &Data) -> Result<(), Error> {
        let tmp_path = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(data).err_kind(ErrorKind::Internal)?;
        {
            let mut tmp = File::create(&tmp_path).err_kind(ErrorKind::Unavailable)?;
            tmp.write_all(&body).err_kind(ErrorKind::Unavailable)?;
            tmp.sync_all().err_kind(ErrorKind::Unavailable)?;
        }
        std::fs::rename(&tmp_path, &self.path).err_kind(ErrorKind::Unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data::{RuleConfig, StreamState};

    #[test]
    fn round_trips_through_merge_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let store = Store::open(&path).unwrap();

        let mut delta = Data::default();
        delta.rule_config_map.insert(
            "r1".into(),
            RuleConfig {
                program_number: 101,
                start: "2026-07-28T10:00:00Z".parse().unwrap(),
                duration_secs: None,
                name: None,
                weekly: false,
                deleted: false,
            },
        );
        let merged = store.merge_and_save(delta).unwrap();
        assert_eq!(merged.rule_config_map.len(), 1);

        let store2_path = path.clone();
        drop(store);
        let store2 = Store::open(&store2_path).unwrap();
        let reloaded = store2.load().unwrap();
        assert_eq!(reloaded.rule_config_map.len(), 1);
    }

    #[test]
    fn a_second_open_on_the_same_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let _store = Store::open(&path).unwrap();
        assert!(Store::open(&path).is_err());
    }

    #[test]
    fn merge_overwrites_stream_state_unconditionally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        let store = Store::open(&path).unwrap();

        let mut delta = Data::default();
        delta.stream_state_map.insert(
            "s1".into(),
            StreamState { last_scan_time: "2026-07-28T00:00:00Z".parse().unwrap() },
        );
        store.merge_and_save(delta).unwrap();

        let mut delta2 = Data::default();
        delta2.stream_state_map.insert(
            "s1".into(),
            StreamState { last_scan_time: "2026-07-28T03:00:00Z".parse().unwrap() },
        );
        let merged = store.merge_and_save(delta2).unwrap();
        assert_eq!(
            merged.stream_state_map["s1"].last_scan_time,
            "2026-07-28T03:00:00Z".parse().unwrap()
        );
    }
}
