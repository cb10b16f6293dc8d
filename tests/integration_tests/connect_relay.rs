// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::integration_tests::common::{
    auth_config, greet_no_auth, plain_config, request_v4, spawn_proxy, spawn_tcp_echo,
};

#[tokio::test]
async fn connect_relays_both_directions() -> Result<()> {
    let echo = spawn_tcp_echo().await?;
    let proxy = spawn_proxy(plain_config()).await?;

    let mut stream = greet_no_auth(proxy).await?;
    let reply = request_v4(&mut stream, 0x01, echo).await?;
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);

    stream.write_all(b"hello").await?;
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"hello");

    // Larger than one relay buffer, so the copy loop has to iterate.
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    stream.write_all(&payload).await?;
    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).await?;
    assert_eq!(echoed, payload);

    Ok(())
}

#[tokio::test]
async fn connect_to_dead_port_is_refused() -> Result<()> {
    // Grab a loopback port and free it again.
    let dead = TcpListener::bind("127.0.0.1:0").await?.local_addr()?;

    let proxy = spawn_proxy(plain_config()).await?;
    let mut stream = greet_no_auth(proxy).await?;

    let reply = request_v4(&mut stream, 0x01, dead).await?;
    assert_eq!(reply, [0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    Ok(())
}

#[tokio::test]
async fn bind_command_is_not_supported() -> Result<()> {
    let echo = spawn_tcp_echo().await?;
    let proxy = spawn_proxy(plain_config()).await?;

    let mut stream = greet_no_auth(proxy).await?;
    let reply = request_v4(&mut stream, 0x02, echo).await?;
    assert_eq!(reply, [0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    // The session closes after the reply.
    let mut buf = [0u8; 1];
    assert!(matches!(stream.read(&mut buf).await, Ok(0) | Err(_)));

    Ok(())
}

#[tokio::test]
async fn wrong_version_is_closed_without_reply() -> Result<()> {
    let proxy = spawn_proxy(plain_config()).await?;

    let mut stream = TcpStream::connect(proxy).await?;
    stream.write_all(&[0x04, 0x01, 0x00]).await?;

    let mut buf = [0u8; 16];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(_) => 0,
    };
    assert_eq!(n, 0);

    Ok(())
}

#[tokio::test]
async fn bad_credentials_are_rejected() -> Result<()> {
    let proxy = spawn_proxy(auth_config()).await?;

    let mut stream = TcpStream::connect(proxy).await?;
    stream.write_all(&[0x05, 0x01, 0x02]).await?;
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    assert_eq!(reply, [0x05, 0x02]);

    // User "x", password "y".
    stream.write_all(&[0x01, 0x01, 0x78, 0x01, 0x79]).await?;
    stream.read_exact(&mut reply).await?;
    assert_eq!(reply, [0x01, 0xFF]);

    let mut buf = [0u8; 1];
    assert!(matches!(stream.read(&mut buf).await, Ok(0) | Err(_)));

    Ok(())
}

#[tokio::test]
async fn authenticated_connect_works() -> Result<()> {
    let echo = spawn_tcp_echo().await?;
    let proxy = spawn_proxy(auth_config()).await?;

    let mut stream = TcpStream::connect(proxy).await?;
    stream.write_all(&[0x05, 0x01, 0x02]).await?;
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    assert_eq!(reply, [0x05, 0x02]);

    stream.write_all(&[0x01, 0x01, b'u', 0x01, b'p']).await?;
    stream.read_exact(&mut reply).await?;
    assert_eq!(reply, [0x01, 0x00]);

    let reply = request_v4(&mut stream, 0x01, echo).await?;
    assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);

    stream.write_all(b"ping").await?;
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"ping");

    Ok(())
}
