// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! UDP relay loop for a session in the ASSOCIATE state.
//!
//! The relay tells its peers apart by address. A datagram from the last
//! destination we successfully sent to is wrapped in a relay header and
//! forwarded to the client's learned endpoint. Anything else is treated as
//! a client datagram: filtered against the endpoints declared in the
//! request (unless the first declared endpoint is the unspecified
//! address, which disables filtering), validated, resolved, and forwarded.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::debug;

use crate::{
    proto::{MAX_UDP_PACKET, udp},
    session::Session,
};

impl Session {
    pub(super) async fn relay_udp(&self, socket: &UdpSocket, whitelist: &[SocketAddr]) {
        let mut buf = vec![0u8; MAX_UDP_PACKET];
        let mut cli_endpoint: Option<SocketAddr> = None;
        let mut dst_endpoint: Option<SocketAddr> = None;

        'relay: loop {
            self.flush_deadline().await;

            let (len, sender) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = socket.recv_from(&mut buf) => match res {
                    Ok(received) => received,
                    Err(e) => {
                        debug!(error = %e, "udp receive failed");
                        break;
                    },
                },
            };

            // Destination-to-client leg.
            if dst_endpoint == Some(sender) {
                if let Some(client) = cli_endpoint {
                    let reply = udp::encode_reply(&sender, &buf[..len]);
                    let sent = tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        res = socket.send_to(&reply, client) => res,
                    };
                    match sent {
                        Ok(_) => debug!(
                            from = %sender,
                            to = %client,
                            len = len,
                            "udp destination to client"
                        ),
                        Err(e) => debug!(error = %e, "failed to relay udp reply"),
                    }
                }
                continue;
            }

            if !whitelist.is_empty()
                && !whitelist[0].ip().is_unspecified()
                && !whitelist.contains(&sender)
            {
                continue;
            }

            // Client-to-destination leg. The client's source is learned,
            // not declared.
            cli_endpoint = Some(sender);

            let Some(datagram) = udp::parse_client_datagram(&buf[..len]) else {
                continue;
            };

            let endpoints = match datagram.target.resolve(datagram.port).await {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    debug!(error = %e, "udp destination resolve failed");
                    continue;
                },
            };

            for endpoint in endpoints {
                let sent = tokio::select! {
                    _ = self.cancel.cancelled() => break 'relay,
                    res = socket.send_to(datagram.payload, endpoint) => res,
                };
                match sent {
                    Ok(_) => {
                        debug!(
                            from = %sender,
                            to = %endpoint,
                            len = datagram.payload.len(),
                            "udp client to destination"
                        );
                        dst_endpoint = Some(endpoint);
                        break;
                    },
                    Err(e) => debug!(endpoint = %endpoint, error = %e, "failed to send udp"),
                }
            }
        }

        self.stop();
    }
}
