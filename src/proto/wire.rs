// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Reads exactly one byte.
pub async fn read_byte<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<u8> {
    r.read_u8().await
}

/// Reads a 16-bit big-endian port.
pub async fn read_port<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<u16> {
    r.read_u16().await
}

/// Reads exactly `n` bytes. `n == 0` succeeds without touching the stream.
pub async fn read_exact<R: AsyncRead + Unpin>(
    r: &mut R,
    n: usize,
) -> io::Result<Vec<u8>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}
