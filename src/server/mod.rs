// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Prefork supervisor: one master process owning the listening socket and
//! a fixed pool of worker processes accepting from it. The master runs no
//! reactor of its own; it parks in `sigwait` and reacts to
//! SIGINT/SIGTERM (fan out SIGTERM, stop) and SIGCHLD (reap, respawn).

/// Listening socket setup.
pub mod listener;
/// fork/wait/kill/signal-mask wrappers and the worker slot table.
pub mod process;
/// Process retitling for `ps`.
pub mod proctitle;
/// Per-worker accept loop.
pub mod worker;

use std::{net::TcpListener, sync::Arc};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::{
    cfg::{config::Config, logger},
    server::process::{Fork, WorkerTable},
};

pub struct Server {
    cfg: Arc<Config>,
    workers: WorkerTable,
    terminate: bool,
}

impl Server {
    pub fn new(cfg: Config) -> Self {
        let workers = WorkerTable::new(cfg.worker_count() as usize);
        Self {
            cfg: Arc::new(cfg),
            workers,
            terminate: false,
        }
    }

    /// Binds the shared listener and runs until shutdown. With a single
    /// configured worker the accept loop runs right here; otherwise the
    /// pool is forked and this process becomes the signal-driven master.
    pub fn run(mut self) -> Result<()> {
        if self.cfg.server.daemon {
            process::daemonize().context("failed to daemonize")?;
        }

        proctitle::set_title("master process");
        logger::init_master()?;

        let listener =
            listener::bind(&self.cfg).context("failed to set up listening socket")?;
        let endpoint = listener
            .local_addr()
            .context("listener has no local address")?;
        info!(%endpoint, workers = self.workers.len(), "server starting");

        if self.workers.len() == 1 {
            return worker::accept_loop(listener, Arc::clone(&self.cfg));
        }

        // Block the control signals before the first fork; anything
        // delivered before the wait loop stays pending.
        process::block_signals().context("failed to block control signals")?;

        self.spawn_workers(&listener);
        self.master_loop(&listener)
    }

    fn master_loop(mut self, listener: &TcpListener) -> Result<()> {
        loop {
            let sig = process::wait_signal().context("sigwait failed")?;
            match sig {
                libc::SIGINT | libc::SIGTERM => {
                    info!(signal = sig, "shutting down worker pool");
                    self.terminate = true;
                    self.stop_workers();
                    break;
                },
                libc::SIGCHLD => {
                    self.update_status();
                    if !self.terminate {
                        self.respawn_exited(listener);
                    }
                },
                _ => {},
            }
        }

        info!("master stopped");
        Ok(())
    }

    /// Fills every free slot with a fresh worker.
    fn spawn_workers(&mut self, listener: &TcpListener) {
        for _ in 0..self.workers.len() {
            let Some(idx) = self.workers.free_slot() else {
                break;
            };
            self.spawn_worker(idx, listener);
        }
    }

    /// Forks one worker into the given slot. The child never returns from
    /// here: it runs the accept loop on its own fresh runtime and exits
    /// the process.
    fn spawn_worker(&mut self, idx: usize, listener: &TcpListener) {
        let forked = match process::fork() {
            Ok(forked) => forked,
            Err(e) => {
                warn!(error = %e, "failed to fork worker");
                return;
            },
        };

        match forked {
            Fork::Child => {
                if let Err(e) = process::unblock_signals() {
                    error!(error = %e, "worker failed to unblock signals");
                    std::process::exit(1);
                }

                proctitle::set_title("worker process");
                let log_guard = match logger::reinit_worker() {
                    Ok(guard) => guard,
                    Err(_) => None,
                };

                let code = match listener.try_clone() {
                    Ok(listener) => {
                        match worker::accept_loop(listener, Arc::clone(&self.cfg)) {
                            Ok(()) => 0,
                            Err(e) => {
                                error!(error = %e, "worker failed");
                                1
                            },
                        }
                    },
                    Err(e) => {
                        error!(error = %e, "worker could not clone listener");
                        1
                    },
                };

                // Flush the async sink; process::exit runs no destructors.
                drop(log_guard);
                std::process::exit(code);
            },
            Fork::Parent(pid) => {
                info!(pid, slot = idx, "spawned worker");
                self.workers.occupy(idx, pid);
            },
        }
    }

    /// SIGTERM to every occupied slot.
    fn stop_workers(&self) {
        for pid in self.workers.occupied() {
            if let Err(e) = process::kill(pid, libc::SIGTERM) {
                warn!(pid, error = %e, "failed to signal worker");
            }
        }
    }

    /// Drains every terminated child and marks its slot.
    fn update_status(&mut self) {
        for pid in process::reap_exited() {
            info!(pid, "worker exited");
            self.workers.mark_exited(pid);
        }
    }

    /// Reforks a replacement into each slot whose worker died.
    fn respawn_exited(&mut self, listener: &TcpListener) {
        for idx in self.workers.take_exited() {
            warn!(slot = idx, "respawning worker");
            self.spawn_worker(idx, listener);
        }
    }
}
