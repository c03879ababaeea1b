//! Unsolicited result code handling.
//!
//! Runs on the reader loop: every handler is idempotent, constant-time,
//! and never touches the slot mutex.

use embassy_time::Instant;
use heapless::String;

use super::Mux;
use crate::command::{CmdId, Command};
use crate::parser::{response_args, unquote, Args};
use crate::registration::{RegDomain, RegistrationReport, RegStatus};
use crate::socket::ConnectState;

pub(crate) fn dispatch<R, W>(mux: &Mux<'_, R, W>, cmd: &'static Command, line: &[u8]) {
    let Some(args) = response_args(line, cmd.body.as_bytes()) else {
        return;
    };

    match cmd.id {
        CmdId::Cmti => {
            // +CMTI: "SM",3 announces a received message.
            mux.with_shared(|s| s.sms_pending += 1);
        }
        CmdId::Qiopen | CmdId::Qsslopen => socket_opened(mux, args),
        CmdId::Qiurc | CmdId::Qsslurc => socket_event(mux, args),
        CmdId::Creg => registration(mux, RegDomain::Cs, args),
        CmdId::Cgreg => registration(mux, RegDomain::Ps, args),
        CmdId::Cereg => registration(mux, RegDomain::Eps, args),
        CmdId::Cgev => {
            // Any detach/deactivation event means the modem already tore
            // the sockets down remotely.
            if contains(args, b"DETACH") || contains(args, b"DEACT") {
                info!("PDP context lost (+CGEV)");
                mux.sockets.close_all();
                mux.select_event.signal(());
            }
        }
        // +QIND and anything else URC-flagged is recognised so it can
        // never be mistaken for slot data, then discarded.
        _ => trace!("ignored URC"),
    }
}

/// `+QIOPEN: <id>,<err>`, the asynchronous result of a connect/bind.
fn socket_opened<R, W>(mux: &Mux<'_, R, W>, args: &[u8]) {
    let mut a = Args::new(args);
    let (Some(id), Some(err)) = (a.int(), a.int()) else {
        return;
    };
    let Some(entry) = mux.sockets.get(id.max(0) as usize) else {
        return;
    };
    entry.with(|s| {
        s.connected = if err == 0 {
            ConnectState::Connected
        } else {
            ConnectState::Failed
        };
    });
}

/// `+QIURC`/`+QSSLURC` event multiplexer.
fn socket_event<R, W>(mux: &Mux<'_, R, W>, args: &[u8]) {
    let mut a = Args::new(args);
    let Some(kind) = a.str() else {
        return;
    };
    match unquote(kind) {
        b"closed" => {
            if let Some(id) = a.int() {
                debug!("socket {} closed by peer", id);
                if let Some(entry) = mux.sockets.get(id.max(0) as usize) {
                    entry.with(|s| s.to_be_closed = true);
                    entry.rx_event.signal(());
                    mux.select_event.signal(());
                }
            }
        }
        b"recv" => {
            if let Some(id) = a.int() {
                if let Some(entry) = mux.sockets.get(id.max(0) as usize) {
                    entry.with(|s| s.urc_pending = true);
                    entry.rx_event.signal(());
                    mux.select_event.signal(());
                }
            }
        }
        b"dnsgip" => {
            if let Some(first) = a.str() {
                mux.with_shared(|s| {
                    s.dns.feed(first, &mut a);
                    s.dns_waker.wake();
                });
            }
        }
        b"pdpdeact" => {
            info!("PDP context deactivated");
            mux.sockets.close_all();
            mux.select_event.signal(());
        }
        _ => trace!("unhandled socket URC"),
    }
}

/// `+CxREG: <stat>[,"<lac>","<ci>"[,<act>]]` (URC form, no leading mode
/// field).
fn registration<R, W>(mux: &Mux<'_, R, W>, domain: RegDomain, args: &[u8]) {
    let mut a = Args::new(args);
    let Some(stat) = a.int() else {
        return;
    };
    let rep = RegistrationReport {
        status: RegStatus::from_stat(stat),
        lac: a.quoted().and_then(|s| hex_field(s)),
        ci: a.quoted().and_then(|s| hex_field(s)),
        act: a.int(),
    };
    report(mux, domain, rep);
}

pub(crate) fn report<R, W>(mux: &Mux<'_, R, W>, domain: RegDomain, rep: RegistrationReport) {
    mux.with_shared(|s| {
        let was = s.reg.is_registered();
        s.reg.report(domain, rep, Instant::now());
        if s.reg.is_registered() != was {
            info!("network registration changed: {}", s.reg.is_registered());
        }
    });
}

fn hex_field(s: &[u8]) -> Option<String<8>> {
    if s.is_empty() || s.len() > 8 {
        return None;
    }
    let text = core::str::from_utf8(s).ok()?;
    String::try_from(text).ok()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w == needle)
}
