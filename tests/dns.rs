//! DNS resolution through the `"dnsgip"` URC sequence.

mod common;

use common::{started_harness, Step};
use quectel_cellular::Error;

/// Scenario: a three-address answer; `resolve` returns the first one.
#[test]
fn multi_ip_resolution_returns_the_first_address() {
    let script = vec![
        Step::Expect("AT+QIDNSGIP=1,\"example.com\""),
        Step::Send(b"OK\r\n"),
        Step::WaitMs(200),
        Step::Send(b"+QIURC: \"dnsgip\",0,3,600\r\n"),
        Step::Send(b"+QIURC: \"dnsgip\",\"1.2.3.4\"\r\n"),
        Step::Send(b"+QIURC: \"dnsgip\",\"5.6.7.8\"\r\n"),
        Step::Send(b"+QIURC: \"dnsgip\",\"9.10.11.12\"\r\n"),
        // A second resolve is serialised behind the dns mutex.
        Step::Expect("AT+QIDNSGIP=1,\"other.example\""),
        Step::Send(b"OK\r\n"),
        Step::Send(b"+QIURC: \"dnsgip\",0,1,600\r\n"),
        Step::Send(b"+QIURC: \"dnsgip\",\"9.9.9.9\"\r\n"),
    ];
    let mut harness = started_harness(script);
    let device = harness.device.clone();

    let result = harness.spawn_client(async move {
        let first = device.resolve("example.com").await?;
        let second = device.resolve("other.example").await?;
        Ok::<_, Error>((first, second))
    });

    let (first, second) = harness.drive(&result, 400, 100).unwrap();
    assert_eq!(first.as_str(), "1.2.3.4");
    assert_eq!(second.as_str(), "9.9.9.9");
}

/// A resolver error code in the first URC fails the resolve promptly.
#[test]
fn resolver_error_code_fails_the_lookup() {
    let script = vec![
        Step::Expect("AT+QIDNSGIP=1,\"no.such.host\""),
        Step::Send(b"OK\r\n"),
        Step::WaitMs(200),
        Step::Send(b"+QIURC: \"dnsgip\",565,0,0\r\n"),
    ];
    let mut harness = started_harness(script);
    let device = harness.device.clone();

    let result = harness.spawn_client(async move { device.resolve("no.such.host").await });
    assert_eq!(harness.drive(&result, 300, 100), Err(Error::Io));
}

/// No URCs at all: the 15-second resolution window expires.
#[test]
fn silent_resolver_times_out() {
    let script = vec![
        Step::Expect("AT+QIDNSGIP=1,\"slow.example\""),
        Step::Send(b"OK\r\n"),
    ];
    let mut harness = started_harness(script);
    let device = harness.device.clone();

    let result = harness.spawn_client(async move { device.resolve("slow.example").await });
    assert_eq!(harness.drive(&result, 100, 1000), Err(Error::Timeout));
}
