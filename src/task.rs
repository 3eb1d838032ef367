// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2016 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Task contracts: the player subprocess lifecycle each `Desired*` entry
//! from [`crate::scheduler`] turns into once the supervisor has borrowed
//! tuner assignments for it. See SPEC §4.4.
//!
//! Every task wraps a player subprocess, driven over its
//! stdin/stdout with a tiny line protocol: `info\n` asks it to dump what it
//! currently knows about the stream's EPG; `quit\n` asks it to exit cleanly.
//! A task that doesn't exit within [`KILL_GRACE`] of being asked is killed
//! outright.

use std::process::Stdio;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use data::{scan::parse_stream_info, Data, StreamConfig, StreamId, StreamInfo, StreamState};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use base::{err, Error, ErrorKind, ResultExt};

use crate::live::WriterSlot;
use crate::pool::Assignment;

/// Grace period after `quit` (or after the last `info` reply, for a
/// cancelled task) before a subprocess is killed outright.
pub const KILL_GRACE: StdDuration = StdDuration::from_secs(1);

/// How long `ScanTask` waits for the player to finish tuning and start
/// populating EPG tables before it asks for a dump.
pub const SCAN_WARMUP: StdDuration = StdDuration::from_secs(300);

/// Path to the player binary; a thin wrapper the reference deployment
/// expects on `$PATH`, taking a tuner URL as its sole argument and
/// answering `info`/`quit` lines on stdin.
pub const PLAYER_BIN: &str = "tv-player";

/// A delta this task wants merged into the control service's `Data`, once it
/// finishes (successfully or not).
#[derive(Debug, Default, Clone)]
pub struct DataDelta(pub Data);

/// What a task needs from the resource pool to run: one tuner on a specific
/// system. All of today's tasks need exactly one.
pub struct Requirements {
    pub system: data::System,
    pub count: usize,
}

#[async_trait]
pub trait Task: Send + Sync {
    /// True if `self` and `other` represent the same logical unit of work
    /// (same recording, same playback client, same scan), regardless of
    /// which tuner assignment either currently holds. Used by the
    /// supervisor to tell "still wanted" from "no longer wanted" (§4.3).
    fn equals(&self, other: &dyn Task) -> bool;

    fn requirements(&self) -> Requirements;

    /// Runs to completion (or until `cancel` fires), using `assignments`
    /// (already borrowed from the pool by the supervisor; returned to it
    /// when this call returns). Returns whatever delta should be merged
    /// into the control service's data, if any.
    async fn run(&self, assignments: &[Assignment], cancel: CancellationToken) -> Option<DataDelta>;

    fn label(&self) -> String;
}

/// Spawns the player subprocess for `url`, returning it with stdin/stdout
/// piped.
fn spawn_player(url: &str) -> Result<Child, Error> {
    Command::new(PLAYER_BIN)
        .arg(url)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| err!(Unavailable, msg("spawning {}", PLAYER_BIN), source(e)))
}

/// Sends `quit\n`, waits up to [`KILL_GRACE`], then kills if still running.
async fn stop_player(mut child: Child, mut stdin: tokio::process::ChildStdin) {
    let _ = stdin.write_all(b"quit\n").await;
    let _ = stdin.flush().await;
    drop(stdin);
    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(?status, "player exited after quit"),
        Ok(Err(e)) => warn!(err = %e, "waiting for player to exit"),
        Err(_) => {
            warn!("player did not exit within grace period, killing");
            let _ = child.kill().await;
        }
    }
}

/// Asks a running player for an `info` dump and reads its reply lines up to
/// the `end of stream info` terminator (or EOF).
async fn request_info_dump(
    stdin: &mut tokio::process::ChildStdin,
    stdout: &mut BufReader<tokio::process::ChildStdout>,
) -> Result<Vec<String>, Error> {
    stdin
        .write_all(b"info\n")
        .await
        .err_kind(ErrorKind::Unavailable)?;
    stdin.flush().await.err_kind(ErrorKind::Unavailable)?;

    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        let n = stdout
            .read_line(&mut line)
            .await
            .err_kind(ErrorKind::Unavailable)?;
        if n == 0 {
            break;
        }
        let done = line.trim_end() == "+----[ end of stream info ]";
        lines.push(line.trim_end().to_string());
        if done {
            break;
        }
    }
    Ok(lines)
}

pub struct RecordTask {
    pub stream_config: StreamConfig,
    pub program_number: u32,
    pub event_name: String,
}

#[async_trait]
impl Task for RecordTask {
    fn equals(&self, other: &dyn Task) -> bool {
        other.label() == self.label()
    }

    fn requirements(&self) -> Requirements {
        Requirements { system: self.stream_config.system, count: 1 }
    }

    async fn run(&self, assignments: &[Assignment], cancel: CancellationToken) -> Option<DataDelta> {
        let url = self.stream_config.tuner_url(assignments[0]);
        let mut child = match spawn_player(&url) {
            Ok(c) => c,
            Err(e) => {
                warn!(err = %e, program = self.program_number, "failed to start recording");
                return None;
            }
        };
        let stdin = child.stdin.take().expect("piped stdin");
        info!(program = self.program_number, event = %self.event_name, "recording started");
        cancel.cancelled().await;
        stop_player(child, stdin).await;
        info!(program = self.program_number, event = %self.event_name, "recording stopped");
        None
    }

    fn label(&self) -> String {
        format!("record:{}:{}", self.program_number, self.event_name)
    }
}

pub struct PlayTask {
    pub stream_config: StreamConfig,
    pub program_number: u32,
    pub writer: std::sync::Arc<WriterSlot>,
}

#[async_trait]
impl Task for PlayTask {
    fn equals(&self, other: &dyn Task) -> bool {
        other.label() == self.label()
    }

    fn requirements(&self) -> Requirements {
        Requirements { system: self.stream_config.system, count: 1 }
    }

    async fn run(&self, assignments: &[Assignment], cancel: CancellationToken) -> Option<DataDelta> {
        let url = self.stream_config.tuner_url(assignments[0]);
        let child = spawn_player(&url);
        let Ok(mut child) = child else {
            self.writer.release();
            return None;
        };
        let stdin = child.stdin.take().expect("piped stdin");
        let mut stdout = child.stdout.take().expect("piped stdout");

        let writer = self.writer.take();
        let Some(writer) = writer else {
            stop_player(child, stdin).await;
            return None;
        };

        let (tx, mut rx) = mpsc::channel::<bytes::Bytes>(4);
        let pump = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if tx.send(bytes::Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = rx.recv() => {
                    match chunk {
                        Some(bytes) if writer.send(bytes).await.is_ok() => continue,
                        _ => break,
                    }
                }
            }
        }

        pump.abort();
        stop_player(child, stdin).await;
        self.writer.release();
        None
    }

    fn label(&self) -> String {
        format!("play:{}", self.program_number)
    }
}

pub struct ScanTask {
    pub stream_id: StreamId,
    pub stream_config: StreamConfig,
    pub tz: jiff::tz::TimeZone,
    pub now: jiff::Timestamp,
}

#[async_trait]
impl Task for ScanTask {
    fn equals(&self, other: &dyn Task) -> bool {
        other.label() == self.label()
    }

    fn requirements(&self) -> Requirements {
        Requirements { system: self.stream_config.system, count: 1 }
    }

    async fn run(&self, assignments: &[Assignment], cancel: CancellationToken) -> Option<DataDelta> {
        let url = self.stream_config.tuner_url(assignments[0]);
        let mut child = match spawn_player(&url) {
            Ok(c) => c,
            Err(e) => {
                warn!(err = %e, stream = %self.stream_id, "failed to start scan");
                return None;
            }
        };
        let mut stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let mut reader = BufReader::new(stdout);

        let warmed_up = tokio::select! {
            _ = tokio::time::sleep(SCAN_WARMUP) => true,
            _ = cancel.cancelled() => false,
        };

        if !warmed_up {
            stop_player(child, stdin).await;
            return None;
        }

        let dump = request_info_dump(&mut stdin, &mut reader).await;
        stop_player(child, stdin).await;

        let mut delta = Data::default();
        match dump {
            Ok(lines) => match parse_stream_info(lines.iter().map(String::as_str), &self.tz, self.now) {
                Ok(info) => {
                    info!(stream = %self.stream_id, programs = info.programs.len(), "scan succeeded");
                    delta
                        .stream_state_map
                        .insert(self.stream_id.clone(), StreamState { last_scan_time: self.now });
                    delta.stream_info_map.insert(self.stream_id.clone(), info);
                }
                Err(e) => {
                    warn!(err = %e, stream = %self.stream_id, "scan dump did not parse");
                    delta
                        .stream_state_map
                        .insert(self.stream_id.clone(), StreamState { last_scan_time: self.now });
                }
            },
            Err(e) => {
                warn!(err = %e, stream = %self.stream_id, "scan failed to read info dump");
                delta
                    .stream_state_map
                    .insert(self.stream_id.clone(), StreamState { last_scan_time: self.now });
            }
        }
        Some(DataDelta(delta))
    }

    fn label(&self) -> String {
        format!("scan:{}", self.stream_id)
    }
}
