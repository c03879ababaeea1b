//! SMS: prompt-mode submission and the +CMGL listing iterator.

mod common;

use common::{started_harness, Step};
use quectel_cellular::Error;

/// Send a message: `+CMGS` prompt, text, ^Z, message reference back.
#[test]
fn sms_send_returns_message_reference() {
    let script = vec![
        Step::Expect("AT+CMGS=\"+393351234567\""),
        Step::Send(b"> "),
        Step::ExpectRaw(b"Hello from the field\x1a"),
        Step::Send(b"+CMGS: 44\r\nOK\r\n"),
    ];
    let mut harness = started_harness(script);
    let device = harness.device.clone();

    let result = harness
        .spawn_client(async move { device.sms_send("+393351234567", "Hello from the field").await });
    assert_eq!(harness.drive(&result, 200, 100), Ok(44));
}

/// The listing accumulates header+body pairs until OK, keeping only
/// received messages and honouring offset/max.
#[test]
fn sms_list_iterates_headers_and_bodies() {
    let script = vec![
        Step::Expect("AT+CMGL=\"ALL\""),
        Step::Send(b"+CMGL: 1,\"REC UNREAD\",\"+3912345\",,\"24/07/30,10:41:21+08\"\r\n"),
        Step::Send(b"Hello world\r\n"),
        Step::Send(b"+CMGL: 2,\"STO SENT\",\"+39000\",,\"24/07/30,10:50:00+08\"\r\n"),
        Step::Send(b"draft to skip\r\n"),
        Step::Send(b"+CMGL: 3,\"REC READ\",\"+39999\",,\"24/07/30,11:00:00+08\"\r\n"),
        Step::Send(b"Second one\r\n"),
        Step::Send(b"OK\r\n"),
    ];
    let mut harness = started_harness(script);
    let device = harness.device.clone();

    let result = harness.spawn_client(async move { device.sms_list(false, 8, 0).await });
    let list = harness.drive(&result, 200, 100).unwrap();

    assert_eq!(list.len(), 2);
    assert_eq!(list[0].index, 1);
    assert!(list[0].unread);
    assert_eq!(list[0].oa.as_str(), "+3912345");
    assert_eq!(list[0].scts.as_str(), "24/07/30,10:41:21+08");
    assert_eq!(&list[0].body[..], b"Hello world");
    assert_eq!(list[1].index, 3);
    assert!(!list[1].unread);
    assert_eq!(&list[1].body[..], b"Second one");
}

/// `offset` skips matched entries; `max` caps the result.
#[test]
fn sms_list_offset_and_max() {
    let script = vec![
        Step::Expect("AT+CMGL=\"REC UNREAD\""),
        Step::Send(b"+CMGL: 1,\"REC UNREAD\",\"+391\",,\"24/01/01,00:00:01+00\"\r\n"),
        Step::Send(b"one\r\n"),
        Step::Send(b"+CMGL: 2,\"REC UNREAD\",\"+392\",,\"24/01/01,00:00:02+00\"\r\n"),
        Step::Send(b"two\r\n"),
        Step::Send(b"+CMGL: 3,\"REC UNREAD\",\"+393\",,\"24/01/01,00:00:03+00\"\r\n"),
        Step::Send(b"three\r\n"),
        Step::Send(b"OK\r\n"),
    ];
    let mut harness = started_harness(script);
    let device = harness.device.clone();

    let result = harness.spawn_client(async move { device.sms_list(true, 1, 1).await });
    let list = harness.drive(&result, 200, 100).unwrap();

    assert_eq!(list.len(), 1);
    assert_eq!(list[0].index, 2);
    assert_eq!(&list[0].body[..], b"two");
}

/// +CMTI URCs bump the pending counter; a listing services it.
#[test]
fn cmti_increments_pending_counter() {
    let script = vec![
        Step::Send(b"+CMTI: \"SM\",7\r\n"),
        Step::Send(b"+CMTI: \"SM\",8\r\n"),
        Step::WaitMs(300),
        Step::Expect("AT+CMGL=\"ALL\""),
        Step::Send(b"OK\r\n"),
    ];
    let mut harness = started_harness(script);
    let device = harness.device.clone();

    harness.settle(10, 100);
    assert_eq!(harness.device.sms_pending(), 2);

    let result = harness.spawn_client(async move { device.sms_list(false, 8, 0).await });
    harness.drive(&result, 200, 100).unwrap();
    assert_eq!(harness.device.sms_pending(), 0);
}

/// Delete and service-centre address round out the surface.
#[test]
fn sms_delete_and_scsa() {
    let script = vec![
        Step::Expect("AT+CMGD=3"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+CSCA?"),
        Step::Send(b"+CSCA: \"+39335990000\",145\r\nOK\r\n"),
        Step::Expect("AT+CSCA=\"+39335990001\""),
        Step::Send(b"OK\r\n"),
    ];
    let mut harness = started_harness(script);
    let device = harness.device.clone();

    let result = harness.spawn_client(async move {
        device.sms_delete(3).await?;
        let scsa = device.sms_get_scsa().await?;
        device.sms_set_scsa("+39335990001").await?;
        Ok::<_, Error>(scsa)
    });
    let scsa = harness.drive(&result, 200, 100).unwrap();
    assert_eq!(scsa.as_str(), "+39335990000");
}
