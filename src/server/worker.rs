// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
};
use tracing::{debug, info, warn};

use crate::{cfg::config::Config, session::Session};

/// Runs the accept loop until SIGINT/SIGTERM.
///
/// The current-thread runtime is built here, after any fork, so neither
/// reactor state nor tokio's signal plumbing is ever shared with the
/// master or with sibling workers; only the listening descriptor is
/// inherited. When the loop ends the runtime drops and every session task
/// dies with it.
pub fn accept_loop(listener: std::net::TcpListener, cfg: Arc<Config>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build worker runtime")?;

    rt.block_on(async move {
        listener
            .set_nonblocking(true)
            .context("failed to make listener non-blocking")?;
        let listener =
            TcpListener::from_std(listener).context("failed to adopt listener")?;

        let mut sigint =
            signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;

        loop {
            tokio::select! {
                _ = sigint.recv() => break,
                _ = sigterm.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(client = %peer, "accepted connection");
                        Session::spawn(stream, Arc::clone(&cfg));
                    },
                    Err(e) => warn!(error = %e, "failed to accept"),
                },
            }
        }

        info!("accept loop stopped");
        Ok(())
    })
}
