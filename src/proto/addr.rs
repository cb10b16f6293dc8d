// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use bytes::BufMut;
use tokio::net::lookup_host;

use crate::proto::atyp;

/// A destination as carried in a SOCKS request or UDP relay header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(IpAddr),
    Domain(String),
}

impl TargetAddr {
    /// Decodes the raw address bytes for a given ATYP. Returns `None` for
    /// unknown ATYP values or byte counts that do not match the type.
    ///
    /// Domain names are taken as-is; a name the resolver cannot handle
    /// fails at resolution, not here.
    pub fn from_bytes(atyp_byte: u8, raw: &[u8]) -> Option<Self> {
        match atyp_byte {
            atyp::IPV4 => {
                let octets: [u8; 4] = raw.try_into().ok()?;
                Some(TargetAddr::Ip(IpAddr::V4(Ipv4Addr::from(octets))))
            },
            atyp::IPV6 => {
                let octets: [u8; 16] = raw.try_into().ok()?;
                Some(TargetAddr::Ip(IpAddr::V6(Ipv6Addr::from(octets))))
            },
            atyp::DOMAIN_NAME => {
                Some(TargetAddr::Domain(String::from_utf8_lossy(raw).into_owned()))
            },
            _ => None,
        }
    }

    /// Resolves the target into an ordered endpoint list. IP targets
    /// construct a single endpoint directly; domains go through the system
    /// resolver.
    pub async fn resolve(&self, port: u16) -> io::Result<Vec<SocketAddr>> {
        match self {
            TargetAddr::Ip(ip) => Ok(vec![SocketAddr::new(*ip, port)]),
            TargetAddr::Domain(name) => {
                Ok(lookup_host((name.as_str(), port)).await?.collect())
            },
        }
    }
}

/// Appends `ATYP | ADDR | PORT` for an endpoint, port in network order.
pub fn encode_endpoint<B: BufMut>(buf: &mut B, endpoint: &SocketAddr) {
    match endpoint {
        SocketAddr::V4(v4) => {
            buf.put_u8(atyp::IPV4);
            buf.put_slice(&v4.ip().octets());
        },
        SocketAddr::V6(v6) => {
            buf.put_u8(atyp::IPV6);
            buf.put_slice(&v6.ip().octets());
        },
    }
    buf.put_u16(endpoint.port());
}
