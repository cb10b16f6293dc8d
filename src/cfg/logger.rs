// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use once_cell::sync::{Lazy, OnceCell};
use tracing_appender::{
    non_blocking::{NonBlockingBuilder, WorkerGuard},
    rolling,
};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{
        self,
        format::{DefaultFields, Format, Full},
        time::SystemTime,
        writer::BoxMakeWriter,
    },
    layer::SubscriberExt,
    reload,
};

/// Log directory for this server run. Resolved once in the master before
/// any fork so every worker writes into the same timestamped directory.
pub static LOG_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    PathBuf::from("logs").join(Local::now().format("%Y-%m-%d_%H-%M-%S").to_string())
});

type SinkLayer = fmt::Layer<Registry, DefaultFields, Format<Full, SystemTime>, BoxMakeWriter>;

/// The global subscriber can be installed only once per process image, and
/// forked workers inherit it already set. The file sink therefore sits
/// behind a reload handle that the worker swaps after fork.
static RELOAD_HANDLE: OnceCell<reload::Handle<SinkLayer, Registry>> = OnceCell::new();

#[derive(Debug, Clone, Copy)]
enum Role {
    Master,
    Worker,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Worker => "worker",
        }
    }
}

fn log_file_name(role: Role) -> String {
    format!("asiomp_{}-{}.log", role.as_str(), std::process::id())
}

fn sink_layer(writer: BoxMakeWriter) -> SinkLayer {
    fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(writer)
}

/// Installs the master's synchronous file sink and the global subscriber.
pub fn init_master() -> Result<()> {
    fs::create_dir_all(&*LOG_ROOT)
        .with_context(|| format!("failed to create log dir {:?}", &*LOG_ROOT))?;

    let appender = rolling::never(&*LOG_ROOT, log_file_name(Role::Master));
    let (layer, handle) = reload::Layer::new(sink_layer(BoxMakeWriter::new(appender)));

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = Registry::default().with(layer).with(env_filter);
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global default subscriber")?;

    let _ = RELOAD_HANDLE.set(handle);
    Ok(())
}

/// Swaps the inherited sink for a worker-private asynchronous one. The
/// returned guard must stay alive for the worker lifetime; dropping it
/// flushes buffered records. The writer blocks when its buffer is full so
/// records are never discarded.
pub fn reinit_worker() -> Result<Option<WorkerGuard>> {
    let Some(handle) = RELOAD_HANDLE.get() else {
        return Ok(None);
    };

    let appender = rolling::never(&*LOG_ROOT, log_file_name(Role::Worker));
    let (non_blocking, guard) =
        NonBlockingBuilder::default().lossy(false).finish(appender);

    handle
        .reload(sink_layer(BoxMakeWriter::new(non_blocking)))
        .context("failed to swap worker log sink")?;

    Ok(Some(guard))
}
