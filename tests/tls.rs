//! TLS provisioning and secure socket traffic.

mod common;

use common::{started_harness, Step};
use quectel_cellular::{Error, Protocol, TlsAuth};

/// Scenario: provision only a CA certificate (13 bytes plus the host
/// buffer's trailing NUL), seclevel 1, open an HTTPS endpoint, push some
/// bytes, read the answer back through the ring, close.
#[test]
fn tls_handshake_round_trip() {
    let script = vec![
        // context configuration
        Step::Expect("AT+QSSLCFG=\"sslversion\",0,3"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+QSSLCFG=\"ciphersuite\",0,0xFFFF"),
        Step::Send(b"OK\r\n"),
        // credential upload: delete may fail, upload streams after CONNECT
        Step::Expect("AT+QFDEL=\"cacert0.pem\""),
        Step::Send(b"ERROR\r\n"),
        Step::Expect("AT+QFUPL=\"cacert0.pem\",13,5,0"),
        Step::Send(b"CONNECT\r\n"),
        Step::ExpectRaw(b"CA CERT DATA\n"),
        Step::Send(b"+QFUPL: 13,61A0\r\nOK\r\n"),
        Step::Expect("AT+QSSLCFG=\"cacert\",0,\"cacert0.pem\""),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+QSSLCFG=\"seclevel\",0,1"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+QSSLCFG=\"ignorelocaltime\",0,1"),
        Step::Send(b"OK\r\n"),
        // secure open + handshake URC
        Step::Expect("AT+QSSLOPEN=1,0,0,\"203.0.113.5\",443"),
        Step::Send(b"OK\r\n"),
        Step::Send(b"+QSSLOPEN: 0,0\r\n"),
        // send through the prompt
        Step::Expect("AT+QSSLSEND=0,8"),
        Step::Send(b"> "),
        Step::ExpectRaw(b"GET /\r\n\0"),
        Step::Send(b"SEND OK\r\n"),
        // secure receive peeks via the ring
        Step::Expect("AT+QSSLRECV=0,512"),
        Step::Send(b"+QSSLRECV: 6\r\n"),
        Step::Send(b"secure"),
        Step::Send(b"\r\nOK\r\n"),
        Step::Expect("AT+QSSLCLOSE=0,10"),
        Step::Send(b"OK\r\n"),
    ];
    let mut harness = started_harness(script);
    let device = harness.device.clone();

    let result = harness.spawn_client(async move {
        let id = device.socket(Protocol::Tcp, true).await?;
        device
            .socket_tls(id, Some(b"CA CERT DATA\n\0"), None, None, TlsAuth::Server)
            .await?;
        device.connect(id, "203.0.113.5", 443).await?;

        let sent = device.send(id, b"GET /\r\n\0").await?;

        let mut buf = [0u8; 32];
        let n = device.recv(id, &mut buf).await?;
        device.close(id).await?;
        Ok::<_, Error>((id, sent, n, buf))
    });

    let (id, sent, n, buf) = harness.drive(&result, 400, 100).unwrap();
    assert_eq!(id, 0);
    assert_eq!(sent, 8);
    assert_eq!(n, 6);
    assert_eq!(&buf[..n], b"secure");
}

/// Secure sockets refuse UDP.
#[test]
fn secure_udp_is_unsupported() {
    let mut harness = started_harness(vec![]);
    let device = harness.device.clone();
    let result = harness.spawn_client(async move { device.socket(Protocol::Udp, true).await });
    assert_eq!(harness.drive(&result, 50, 100), Err(Error::Unsupported));
}

/// A failed QSSLCFG step surfaces as an IO error and aborts provisioning.
#[test]
fn failed_ssl_config_step_aborts() {
    let script = vec![
        Step::Expect("AT+QSSLCFG=\"sslversion\",0,3"),
        Step::Send(b"ERROR\r\n"),
    ];
    let mut harness = started_harness(script);
    let device = harness.device.clone();

    let result = harness.spawn_client(async move {
        let id = device.socket(Protocol::Tcp, true).await?;
        device
            .socket_tls(id, Some(b"CA\0"), None, None, TlsAuth::None)
            .await
    });
    assert_eq!(harness.drive(&result, 100, 100), Err(Error::Io));
}
