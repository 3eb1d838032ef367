// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2021 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! CLI subcommands, one per process role. See SPEC §6 "Exit codes & CLI".

pub mod control;
pub mod init;
pub mod waker;
pub mod worker;

use std::future::Future;

use base::Error;

/// Builds a multi-threaded runtime and blocks on `f`, following the
/// teacher's `cmds::run` bootstrap: the CLI entry points themselves stay
/// synchronous so `main` doesn't need to be `#[tokio::main]`.
fn block_on<F>(f: F) -> Result<i32, Error>
where
    F: Future<Output = Result<i32, Error>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| base::err!(Internal, msg("building tokio runtime"), source(e)))?
        .block_on(f)
}

/// Runs `inner` until it completes or a second SIGINT/SIGTERM arrives,
/// requesting graceful shutdown on the first signal.
async fn run_with_shutdown<F>(
    inner: impl FnOnce(base::shutdown::Receiver) -> F,
) -> Result<i32, Error>
where
    F: Future<Output = Result<i32, Error>>,
{
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::info;

    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    let mut shutdown_tx = Some(shutdown_tx);

    let mut int = signal(SignalKind::interrupt())
        .map_err(|e| base::err!(Internal, msg("installing SIGINT handler"), source(e)))?;
    let mut term = signal(SignalKind::terminate())
        .map_err(|e| base::err!(Internal, msg("installing SIGTERM handler"), source(e)))?;

    let mut inner = Box::pin(inner(shutdown_rx));

    tokio::select! {
        _ = int.recv() => {
            info!("received SIGINT; shutting down gracefully (send again to force)");
            shutdown_tx.take();
        }
        _ = term.recv() => {
            info!("received SIGTERM; shutting down gracefully (send again to force)");
            shutdown_tx.take();
        }
        result = &mut inner => return result,
    }

    tokio::select! {
        _ = int.recv() => base::bail!(Cancelled, msg("immediate shutdown due to second SIGINT")),
        _ = term.recv() => base::bail!(Cancelled, msg("immediate shutdown due to second SIGTERM")),
        result = &mut inner => result,
    }
}
