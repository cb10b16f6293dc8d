// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The negotiation phases of a SOCKS5 session: greeting, RFC 1929
//! username/password subnegotiation, and request parsing. Each phase
//! consumes exactly the bytes the protocol declares; a short read aborts
//! the session with no reply.

use std::net::SocketAddr;

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    cfg::config::Config,
    proto::{self, addr, addr::TargetAddr, atyp, auth_status, method, wire},
    session::error::SessionError,
};

/// A parsed client request.
#[derive(Debug)]
pub struct SocksRequest {
    pub cmd: u8,
    pub target: TargetAddr,
    pub port: u16,
}

/// Greeting phase. Reads the method list, picks a method compatible with
/// the configuration, and writes the selection reply. When several offered
/// methods are acceptable the last one wins.
pub async fn negotiate_method<S>(
    stream: &mut S,
    cfg: &Config,
) -> Result<u8, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ver = wire::read_byte(stream).await?;
    if ver != proto::VERSION {
        return Err(SessionError::Protocol("bad greeting version"));
    }

    let nmethods = wire::read_byte(stream).await?;
    let methods = wire::read_exact(stream, nmethods as usize).await?;

    let auth = cfg.server.protocol.auth;
    let mut chosen = method::NO_ACCEPTABLE;
    for &m in &methods {
        if m == method::NO_AUTH && !auth {
            chosen = m;
        } else if m == method::USER_PASS && auth {
            chosen = m;
        }
    }

    stream.write_all(&[proto::VERSION, chosen]).await?;

    if chosen == method::NO_ACCEPTABLE {
        return Err(SessionError::NoAcceptableMethod);
    }
    Ok(chosen)
}

/// RFC 1929 subnegotiation. Zero-length fields are protocol violations;
/// a credentials mismatch gets the failure status before the session
/// closes.
pub async fn authenticate<S>(stream: &mut S, cfg: &Config) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ver = wire::read_byte(stream).await?;
    if ver != proto::SUBNEG_VERSION {
        return Err(SessionError::Protocol("bad subnegotiation version"));
    }

    let ulen = wire::read_byte(stream).await?;
    if ulen == 0 {
        return Err(SessionError::Protocol("empty username"));
    }
    let uname = wire::read_exact(stream, ulen as usize).await?;

    let plen = wire::read_byte(stream).await?;
    if plen == 0 {
        return Err(SessionError::Protocol("empty password"));
    }
    let passwd = wire::read_exact(stream, plen as usize).await?;

    let username = String::from_utf8_lossy(&uname);
    let password = String::from_utf8_lossy(&passwd);
    let accepted = cfg.check_auth(&username, &password);

    let status = if accepted {
        auth_status::SUCCESS
    } else {
        auth_status::FAILURE
    };
    stream.write_all(&[proto::SUBNEG_VERSION, status]).await?;

    if !accepted {
        return Err(SessionError::AuthFailure);
    }
    Ok(())
}

/// Request phase. Consumes `VER CMD RSV ATYP DST.ADDR DST.PORT` and hands
/// the command back for dispatch; command validity is the caller's
/// business, address validity is ours.
pub async fn read_request<S>(stream: &mut S) -> Result<SocksRequest, SessionError>
where
    S: AsyncRead + Unpin,
{
    let ver = wire::read_byte(stream).await?;
    if ver != proto::VERSION {
        return Err(SessionError::Protocol("bad request version"));
    }

    let cmd = wire::read_byte(stream).await?;

    let rsv = wire::read_byte(stream).await?;
    if rsv != 0x00 {
        return Err(SessionError::Protocol("nonzero reserved byte"));
    }

    let atyp_byte = wire::read_byte(stream).await?;
    let raw_addr = match atyp_byte {
        atyp::IPV4 => wire::read_exact(stream, 4).await?,
        atyp::IPV6 => wire::read_exact(stream, 16).await?,
        atyp::DOMAIN_NAME => {
            let dlen = wire::read_byte(stream).await?;
            if dlen == 0 {
                return Err(SessionError::Protocol("empty domain name"));
            }
            wire::read_exact(stream, dlen as usize).await?
        },
        _ => return Err(SessionError::Protocol("unknown address type")),
    };

    let target = TargetAddr::from_bytes(atyp_byte, &raw_addr)
        .ok_or(SessionError::Protocol("undecodable address"))?;
    let port = wire::read_port(stream).await?;

    Ok(SocksRequest { cmd, target, port })
}

/// Writes `VER REP RSV ATYP BND.ADDR BND.PORT`.
pub async fn reply<S>(
    stream: &mut S,
    rep_code: u8,
    bnd: &SocketAddr,
) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(4 + 16 + 2);
    buf.put_u8(proto::VERSION);
    buf.put_u8(rep_code);
    buf.put_u8(0x00);
    addr::encode_endpoint(&mut buf, bnd);
    stream.write_all(&buf).await
}

/// Failure replies carry the all-zero IPv4 endpoint.
pub async fn reply_error<S>(stream: &mut S, rep_code: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    reply(stream, rep_code, &SocketAddr::from(([0, 0, 0, 0], 0))).await
}
