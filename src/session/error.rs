// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::io;

use thiserror::Error;

use crate::proto::rep;

/// Everything that can end a session early. Variants that owe the client a
/// reply map to a REP code through [`SessionError::reply_rep`]; the rest
/// close the connection silently.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed greeting/auth/request bytes. No reply is ever sent.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// The client offered nothing we can use; the 0xFF method reply has
    /// already been written.
    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    /// Credentials rejected; the failure status has already been written.
    #[error("credentials rejected")]
    AuthFailure,

    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    /// No resolved endpoint accepted a TCP connection.
    #[error("destination connect failed")]
    ConnectFailed,

    /// UDP associate destination did not resolve to any endpoint.
    #[error("destination did not resolve")]
    Unresolvable,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SessionError {
    /// REP code owed to the client, if any.
    pub fn reply_rep(&self) -> Option<u8> {
        match self {
            SessionError::UnsupportedCommand(_) => Some(rep::COMMAND_NOT_SUPPORTED),
            SessionError::ConnectFailed => Some(rep::CONN_REFUSED),
            SessionError::Unresolvable => Some(rep::HOST_UNREACHABLE),
            _ => None,
        }
    }
}
