// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use mpsocks::{
    cfg::config::Config,
    proto::{addr::TargetAddr, cmd},
    session::{
        error::SessionError,
        handshake::{authenticate, negotiate_method, read_request},
    },
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

fn plain_config() -> Config {
    Config::parse_str("{}").expect("config")
}

fn auth_config() -> Config {
    Config::parse_str(
        r#"
server:
  protocol:
    auth: true
    credentials:
      - username: "u"
        password: "p"
"#,
    )
    .expect("config")
}

#[tokio::test]
async fn greeting_selects_no_auth() {
    let (mut client, mut server) = duplex(1024);
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();

    let res = negotiate_method(&mut server, &plain_config()).await;
    assert!(matches!(res, Ok(0x00)));

    drop(server);
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);
}

#[tokio::test]
async fn greeting_selects_user_pass_when_auth_enabled() {
    let (mut client, mut server) = duplex(1024);
    client.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();

    let res = negotiate_method(&mut server, &auth_config()).await;
    assert!(matches!(res, Ok(0x02)));

    drop(server);
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x02]);
}

#[tokio::test]
async fn greeting_rejects_unusable_methods() {
    // Auth is off, but the client only offers username/password.
    let (mut client, mut server) = duplex(1024);
    client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();

    let res = negotiate_method(&mut server, &plain_config()).await;
    assert!(matches!(res, Err(SessionError::NoAcceptableMethod)));

    drop(server);
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0xFF]);
}

#[tokio::test]
async fn greeting_wrong_version_gets_no_reply() {
    let (mut client, mut server) = duplex(1024);
    client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

    let res = negotiate_method(&mut server, &plain_config()).await;
    assert!(matches!(res, Err(SessionError::Protocol(_))));

    drop(server);
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty());
}

#[tokio::test]
async fn greeting_consumes_exactly_the_declared_bytes() {
    let (mut client, mut server) = duplex(1024);
    client
        .write_all(&[0x05, 0x02, 0x00, 0x01, 0xAA])
        .await
        .unwrap();

    negotiate_method(&mut server, &plain_config())
        .await
        .expect("greeting");

    // The sentinel byte after `2 + NMETHODS` must still be unread.
    let mut rest = [0u8; 1];
    server.read_exact(&mut rest).await.unwrap();
    assert_eq!(rest, [0xAA]);
}

#[tokio::test]
async fn auth_accepts_configured_credentials() {
    let (mut client, mut server) = duplex(1024);
    client
        .write_all(&[0x01, 0x01, b'u', 0x01, b'p', 0xAA])
        .await
        .unwrap();

    authenticate(&mut server, &auth_config()).await.expect("auth");

    // Consumption is exactly `1 + 1 + ULEN + 1 + PLEN`.
    let mut rest = [0u8; 1];
    server.read_exact(&mut rest).await.unwrap();
    assert_eq!(rest, [0xAA]);

    drop(server);
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, [0x01, 0x00]);
}

#[tokio::test]
async fn auth_rejects_bad_credentials_with_failure_status() {
    let (mut client, mut server) = duplex(1024);
    client
        .write_all(&[0x01, 0x01, b'x', 0x01, b'y'])
        .await
        .unwrap();

    let res = authenticate(&mut server, &auth_config()).await;
    assert!(matches!(res, Err(SessionError::AuthFailure)));

    drop(server);
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, [0x01, 0xFF]);
}

#[tokio::test]
async fn auth_rejects_empty_username_silently() {
    let (mut client, mut server) = duplex(1024);
    client.write_all(&[0x01, 0x00]).await.unwrap();

    let res = authenticate(&mut server, &auth_config()).await;
    assert!(matches!(res, Err(SessionError::Protocol(_))));

    drop(server);
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty());
}

#[tokio::test]
async fn request_parses_ipv4_connect() {
    let mut data: &[u8] = &[0x05, 0x01, 0x00, 0x01, 1, 2, 3, 4, 0x00, 0x50];
    let req = read_request(&mut data).await.expect("request");

    assert_eq!(req.cmd, cmd::CONNECT);
    assert_eq!(req.target, TargetAddr::Ip(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))));
    assert_eq!(req.port, 80);
    assert!(data.is_empty());
}

#[tokio::test]
async fn request_parses_domain() {
    let mut bytes = vec![0x05, 0x03, 0x00, 0x03, 0x0B];
    bytes.extend_from_slice(b"example.com");
    bytes.extend_from_slice(&[0x00, 0x35]);

    let mut data: &[u8] = &bytes;
    let req = read_request(&mut data).await.expect("request");

    assert_eq!(req.cmd, cmd::UDP_ASSOCIATE);
    assert_eq!(req.target, TargetAddr::Domain("example.com".to_string()));
    assert_eq!(req.port, 53);
    assert!(data.is_empty());
}

#[tokio::test]
async fn request_parses_ipv6() {
    let mut bytes = vec![0x05, 0x01, 0x00, 0x04];
    bytes.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
    bytes.extend_from_slice(&[0x1F, 0x90]);

    let mut data: &[u8] = &bytes;
    let req = read_request(&mut data).await.expect("request");

    assert_eq!(req.target, TargetAddr::Ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    assert_eq!(req.port, 8080);
}

#[tokio::test]
async fn request_rejects_nonzero_rsv() {
    let mut data: &[u8] = &[0x05, 0x01, 0x01, 0x01, 1, 2, 3, 4, 0x00, 0x50];
    let res = read_request(&mut data).await;
    assert!(matches!(res, Err(SessionError::Protocol(_))));
}

#[tokio::test]
async fn request_rejects_unknown_atyp() {
    let mut data: &[u8] = &[0x05, 0x01, 0x00, 0x02, 1, 2, 3, 4, 0x00, 0x50];
    let res = read_request(&mut data).await;
    assert!(matches!(res, Err(SessionError::Protocol(_))));
}

#[tokio::test]
async fn request_rejects_empty_domain() {
    let mut data: &[u8] = &[0x05, 0x01, 0x00, 0x03, 0x00, 0x00, 0x50];
    let res = read_request(&mut data).await;
    assert!(matches!(res, Err(SessionError::Protocol(_))));
}

#[tokio::test]
async fn request_fails_on_short_read() {
    let mut data: &[u8] = &[0x05, 0x01, 0x00, 0x01, 1, 2];
    let res = read_request(&mut data).await;
    assert!(matches!(res, Err(SessionError::Io(_))));
}
