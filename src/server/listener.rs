// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io,
    net::{IpAddr, SocketAddr, TcpListener},
    os::fd::{FromRawFd, IntoRawFd},
};

use anyhow::{Context, Result};
use tokio::net::TcpSocket;

use crate::cfg::config::Config;

/// Opens, configures, binds, and listens on the configured endpoint.
///
/// This runs in the master before any fork and before any reactor exists,
/// so the listener is produced as a plain `std` handle; each worker adopts
/// the inherited descriptor into its own runtime after fork.
pub fn bind(cfg: &Config) -> Result<TcpListener> {
    let ip: IpAddr = cfg
        .server
        .address
        .parse()
        .with_context(|| format!("invalid listen address {:?}", cfg.server.address))?;
    let endpoint = SocketAddr::new(ip, cfg.server.port);

    let socket = if endpoint.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .context("failed to open listening socket")?;

    socket
        .set_reuseaddr(true)
        .context("failed to set SO_REUSEADDR")?;
    socket
        .bind(endpoint)
        .with_context(|| format!("failed to bind {endpoint}"))?;

    let fd = socket.into_raw_fd();
    if unsafe { libc::listen(fd, libc::SOMAXCONN) } == -1 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err).with_context(|| format!("failed to listen on {endpoint}"));
    }

    Ok(unsafe { TcpListener::from_raw_fd(fd) })
}
