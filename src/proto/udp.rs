// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SOCKS5 UDP relay framing:
//!
//! ```text
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```

use std::net::SocketAddr;

use bytes::BufMut;

use crate::proto::{addr, addr::TargetAddr, atyp};

/// A parsed client-origin datagram: destination, port, and the payload
/// slice within the original buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct ClientDatagram<'a> {
    pub target: TargetAddr,
    pub port: u16,
    pub payload: &'a [u8],
}

/// Validates and splits a client-origin datagram. Anything malformed,
/// fragmented, or carrying an empty payload yields `None`; the relay
/// drops such datagrams silently.
pub fn parse_client_datagram(buf: &[u8]) -> Option<ClientDatagram<'_>> {
    if buf.len() <= 4 {
        return None;
    }

    let rsv = u16::from_be_bytes([buf[0], buf[1]]);
    if rsv != 0x0000 {
        return None;
    }

    let frag = buf[2];
    if frag != 0x00 {
        return None;
    }

    let (raw_addr, rest) = match buf[3] {
        atyp::IPV4 => {
            if buf.len() <= 4 + 4 + 2 {
                return None;
            }
            (&buf[4..8], &buf[8..])
        },
        atyp::IPV6 => {
            if buf.len() <= 4 + 16 + 2 {
                return None;
            }
            (&buf[4..20], &buf[20..])
        },
        atyp::DOMAIN_NAME => {
            let dlen = buf[4] as usize;
            if buf.len() <= 4 + 1 + dlen + 2 {
                return None;
            }
            (&buf[5..5 + dlen], &buf[5 + dlen..])
        },
        _ => return None,
    };

    let target = TargetAddr::from_bytes(buf[3], raw_addr)?;
    let port = u16::from_be_bytes([rest[0], rest[1]]);

    Some(ClientDatagram {
        target,
        port,
        payload: &rest[2..],
    })
}

/// Builds a destination-to-client datagram: the relay header naming the
/// sender, followed by the payload.
pub fn encode_reply(from: &SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + 16 + 2 + payload.len());
    buf.put_u16(0x0000);
    buf.put_u8(0x00);
    addr::encode_endpoint(&mut buf, from);
    buf.put_slice(payload);
    buf
}
