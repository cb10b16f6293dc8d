// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! One [`Session`] per accepted client connection. The session is the
//! shared owner of the per-connection state; its cooperating tasks (the
//! protocol driver and the idle watchdog) hold it through an `Arc` and
//! coordinate teardown through a single idempotent [`Session::stop`].

/// Session-fatal error kinds and their reply mapping.
pub mod error;
/// Greeting, authentication, and request parsing.
pub mod handshake;
mod udp;

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, UdpSocket},
    sync::Mutex,
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    cfg::config::Config,
    proto::{RELAY_BUF_SIZE, cmd, method, rep},
    session::{error::SessionError, handshake::SocksRequest},
};

/// What the request phase established; the driver relays on it until the
/// session dies.
enum Established {
    Tcp(TcpStream),
    Udp {
        socket: UdpSocket,
        whitelist: Vec<SocketAddr>,
    },
}

pub struct Session {
    cfg: Arc<Config>,
    client_endpoint: SocketAddr,
    proxy_endpoint: SocketAddr,
    keep_alive_time: Duration,
    check_duration: Duration,
    /// Idle deadline. Written only at the relay-phase refresh points,
    /// read only by the watchdog.
    deadline: Mutex<Instant>,
    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl Session {
    /// Creates the session for an accepted stream and spawns its driver
    /// and watchdog tasks. Returns the shared handle.
    pub fn spawn(stream: TcpStream, cfg: Arc<Config>) -> Option<Arc<Self>> {
        let client_endpoint = stream.peer_addr().ok()?;
        let proxy_endpoint = stream.local_addr().ok()?;

        let keep_alive_time = cfg.server.protocol.keep_alive_time;
        let check_duration = cfg.server.protocol.check_duration;

        let session = Arc::new(Self {
            cfg,
            client_endpoint,
            proxy_endpoint,
            keep_alive_time,
            check_duration,
            deadline: Mutex::new(Instant::now() + keep_alive_time),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        });

        debug!(
            client = %session.client_endpoint,
            proxy = %session.proxy_endpoint,
            "session started"
        );

        tokio::spawn(Arc::clone(&session).watchdog());
        tokio::spawn(Arc::clone(&session).driver(stream));

        Some(session)
    }

    /// Idempotent teardown: trips the cancellation token once. Every task
    /// races its I/O against the token, so the peers' next operation
    /// completes, the tasks return, and the sockets drop with them.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(client = %self.client_endpoint, "session stopped");
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Pushes the idle deadline out by the configured keep-alive time.
    async fn flush_deadline(&self) {
        *self.deadline.lock().await = Instant::now() + self.keep_alive_time;
    }

    /// Idle watchdog: wakes every `check_duration` and tears the session
    /// down once the deadline has passed.
    async fn watchdog(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(self.check_duration) => {},
            }

            if Instant::now() >= *self.deadline.lock().await {
                debug!(client = %self.client_endpoint, "idle deadline reached");
                self.stop();
                return;
            }
        }
    }

    async fn driver(self: Arc<Self>, mut stream: TcpStream) {
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => return,
            res = self.establish(&mut stream) => res,
        };

        match outcome {
            Ok(Established::Tcp(mut destination)) => {
                self.relay_streams(&mut stream, &mut destination).await;
            },
            Ok(Established::Udp { socket, whitelist }) => {
                // The client stream stays owned here: dropping it would
                // close the TCP side of the association early.
                self.relay_udp(&socket, &whitelist).await;
            },
            Err(e) => {
                debug!(client = %self.client_endpoint, error = %e, "session setup failed");
                if let Some(rep_code) = e.reply_rep() {
                    let _ = handshake::reply_error(&mut stream, rep_code).await;
                }
            },
        }

        self.stop();
    }

    /// Greeting through request dispatch; returns the relay configuration
    /// with the success reply already written.
    async fn establish(
        &self,
        stream: &mut TcpStream,
    ) -> Result<Established, SessionError> {
        let chosen = handshake::negotiate_method(stream, &self.cfg).await?;
        if chosen == method::USER_PASS {
            handshake::authenticate(stream, &self.cfg).await?;
        }

        let request = handshake::read_request(stream).await?;

        match request.cmd {
            cmd::CONNECT => {
                let destination = self.connect_destination(&request).await?;
                let bnd = destination.local_addr()?;
                handshake::reply(stream, rep::SUCCEEDED, &bnd).await?;
                debug!(
                    client = %self.client_endpoint,
                    bnd = %bnd,
                    "connect established"
                );
                Ok(Established::Tcp(destination))
            },
            cmd::UDP_ASSOCIATE => {
                let whitelist = request
                    .target
                    .resolve(request.port)
                    .await
                    .map_err(|_| SessionError::Unresolvable)?;
                if whitelist.is_empty() {
                    return Err(SessionError::Unresolvable);
                }

                let bind_addr = if whitelist[0].is_ipv4() {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                };
                let socket = UdpSocket::bind(bind_addr).await?;
                let bnd = socket.local_addr()?;
                handshake::reply(stream, rep::SUCCEEDED, &bnd).await?;
                debug!(
                    client = %self.client_endpoint,
                    bnd = %bnd,
                    "udp associate established"
                );
                Ok(Established::Udp { socket, whitelist })
            },
            other => Err(SessionError::UnsupportedCommand(other)),
        }
    }

    /// Tries the resolved endpoints in order; the first successful connect
    /// wins. The outbound stream is established at most once.
    async fn connect_destination(
        &self,
        request: &SocksRequest,
    ) -> Result<TcpStream, SessionError> {
        let endpoints = request
            .target
            .resolve(request.port)
            .await
            .map_err(|_| SessionError::ConnectFailed)?;

        for endpoint in endpoints {
            match TcpStream::connect(endpoint).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "destination connect failed");
                },
            }
        }

        Err(SessionError::ConnectFailed)
    }

    /// Runs both half-duplex relays concurrently on this task. Either one
    /// failing stops the session, which makes the sibling's next I/O
    /// complete.
    async fn relay_streams(&self, client: &mut TcpStream, destination: &mut TcpStream) {
        let (mut client_rd, mut client_wr) = client.split();
        let (mut dst_rd, mut dst_wr) = destination.split();

        tokio::join!(
            self.relay(&mut client_rd, &mut dst_wr),
            self.relay(&mut dst_rd, &mut client_wr),
        );
    }

    /// One relay direction: read up to the buffer size, write it all out.
    /// The idle deadline is refreshed before every read.
    async fn relay<R, W>(&self, from: &mut R, to: &mut W)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = [0u8; RELAY_BUF_SIZE];

        loop {
            self.flush_deadline().await;

            let n = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = from.read(&mut buf) => match res {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                },
            };

            let written = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = to.write_all(&buf[..n]) => res,
            };
            if written.is_err() {
                break;
            }
        }

        self.stop();
    }
}
