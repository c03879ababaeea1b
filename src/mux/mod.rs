//! The AT-command multiplexer.
//!
//! One reader task owns the serial input; every outgoing command goes
//! through the single slot, serialised by the slot mutex. The reader
//! classifies each incoming line as the active slot's response, a URC, or
//! a terminator, and switches between the three operating modes:
//!
//! * NORMAL: line-oriented command/response traffic;
//! * PROMPT: the modem printed `>` and expects a raw payload (sends, SMS);
//! * BUFFER: a binary payload follows on the wire (reads, file uploads);
//!   the slot holder takes the serial input over until it has drained it.

pub(crate) mod runner;
pub(crate) mod slot;
pub(crate) mod urc;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_sync::waitqueue::WakerRegistration;
use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::command::Command;
use crate::parser::{response_args, unquote, Args};
use crate::registration::RegistrationState;
use crate::services::sms::{SmsEntry, SMS_BODY_LEN, SMS_LIST_MAX};
use crate::socket::SocketTable;

/// Longest AT line the driver emits.
pub(crate) const MAX_CMD_LEN: usize = 256;

/// Slot response buffer; sized for the `+COPS=?` operator listing.
pub(crate) const SLOT_RESP_LEN: usize = 1024;

/// Last `+CME ERROR` message scratch.
pub(crate) const ERR_MSG_LEN: usize = 32;

/// DNS scratch for one resolved address.
pub(crate) const DNS_ADDR_LEN: usize = 64;

/// Payloads are pushed to the modem in chunks this big while in prompt
/// mode.
pub(crate) const PROMPT_CHUNK: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Mode {
    #[default]
    Normal,
    Prompt,
    Buffer,
}

/// Slot completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum SlotOutcome {
    Ok,
    /// `ERROR` / `+CME ERROR` terminated the command.
    Invalid,
    Timeout,
}

/// Accumulates `+CMGL`/`+CMGR` entries while such a slot is active. Each
/// matched header line is followed by one payload line; `offset`/`max`
/// and the status filter are applied as entries stream by.
#[derive(Debug, Default)]
pub(crate) struct SmsSink {
    pub entries: Vec<SmsEntry, SMS_LIST_MAX>,
    /// Index to assign when the command itself carries none (`+CMGR`).
    pub fixed_index: i32,
    pub offset: usize,
    pub max: usize,
    /// Matching headers seen so far (for offset accounting).
    matched: usize,
    /// The next line is a message body.
    body_pending: bool,
    /// The pending body belongs to the last stored entry.
    store_body: bool,
}

pub(crate) struct SlotRecord {
    pub cmd: &'static Command,
    pub started: Instant,
    pub timeout: Duration,
    pub expected_params: u8,
    pub params: u8,
    pub resp: Vec<u8, SLOT_RESP_LEN>,
    pub outcome: Option<SlotOutcome>,
    pub sms: Option<SmsSink>,
}

impl SlotRecord {
    pub fn new(cmd: &'static Command, timeout: Duration, expected_params: u8) -> Self {
        Self {
            cmd,
            started: Instant::now(),
            timeout,
            expected_params,
            params: 0,
            resp: Vec::new(),
            outcome: None,
            sms: None,
        }
    }

    pub fn active(&self) -> bool {
        self.outcome.is_none()
    }

    /// OK may only terminate the slot once the expected parameter lines
    /// have arrived; message listings terminate on OK unconditionally.
    pub fn params_satisfied(&self) -> bool {
        self.params >= self.expected_params || self.cmd.id.lists_messages()
    }

    /// Copy a matched parameter line into the response buffer.
    pub fn fill_params(&mut self, line: &[u8]) {
        let Some(args) = response_args(line, self.cmd.body.as_bytes()) else {
            return;
        };
        self.resp.clear();
        let n = args.len().min(self.resp.capacity());
        let _ = self.resp.extend_from_slice(&args[..n]);
        self.params += 1;
    }

    /// Raw-string responses copy the whole line.
    pub fn fill_raw(&mut self, line: &[u8]) {
        self.resp.clear();
        let n = line.len().min(self.resp.capacity());
        let _ = self.resp.extend_from_slice(&line[..n]);
        self.params += 1;
    }

    pub fn feed_sms_header(&mut self, line: &[u8]) {
        let body = self.cmd.body.as_bytes();
        let is_cmgl = self.cmd.id == crate::command::CmdId::Cmgl;
        let Some(sink) = self.sms.as_mut() else {
            return;
        };
        let Some(args) = response_args(line, body) else {
            return;
        };
        let mut a = Args::new(args);
        let index = if is_cmgl {
            a.int().unwrap_or(-1)
        } else {
            sink.fixed_index
        };
        let stat = a.quoted().unwrap_or(b"");
        let oa = a.quoted().unwrap_or(b"");
        let _alpha = a.str();
        let scts = a.quoted().unwrap_or(b"");

        sink.body_pending = true;
        sink.store_body = false;

        // Only received messages are reported.
        let unread = stat == b"REC UNREAD";
        if !unread && stat != b"REC READ" {
            return;
        }
        sink.matched += 1;
        if sink.matched <= sink.offset || sink.entries.len() >= sink.max {
            return;
        }
        let entry = SmsEntry::from_header(index, oa, scts, unread);
        if sink.entries.push(entry).is_ok() {
            sink.store_body = true;
        }
    }

    pub fn feed_sms_body(&mut self, line: &[u8]) {
        let Some(sink) = self.sms.as_mut() else {
            return;
        };
        sink.body_pending = false;
        if !sink.store_body {
            return;
        }
        sink.store_body = false;
        if let Some(entry) = sink.entries.last_mut() {
            let body = line.strip_suffix(b"\r\n").unwrap_or(line);
            let n = body.len().min(SMS_BODY_LEN);
            entry.body.clear();
            let _ = entry.body.extend_from_slice(&body[..n]);
        }
    }

    pub fn sms_body_pending(&self) -> bool {
        self.sms.as_ref().map(|s| s.body_pending).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub(crate) struct DnsScratch {
    pub addr: Vec<u8, DNS_ADDR_LEN>,
    pub ready: bool,
    pub count: u8,
}

impl DnsScratch {
    pub fn reset(&mut self) {
        self.addr.clear();
        self.ready = false;
        self.count = 0;
    }

    /// One `"dnsgip"` URC element. The first element of a resolution is
    /// `<err>,<count>,<ttl>`; every following one is a quoted address.
    pub fn feed(&mut self, first: &[u8], rest: &mut Args) {
        if first.first() == Some(&b'"') {
            if self.addr.is_empty() {
                let ip = unquote(first);
                let n = ip.len().min(self.addr.capacity());
                let _ = self.addr.extend_from_slice(&ip[..n]);
            }
            self.count = self.count.saturating_sub(1);
            if self.count == 0 {
                self.ready = true;
            }
        } else {
            match crate::parser::parse_decimal(first) {
                Some(0) => {
                    self.count = rest.int().unwrap_or(0).clamp(0, u8::MAX as i32) as u8;
                    if self.count == 0 {
                        // Resolution with no addresses.
                        self.ready = true;
                    }
                }
                _ => {
                    // Resolver error code; finish empty-handed.
                    self.addr.clear();
                    self.count = 0;
                    self.ready = true;
                }
            }
        }
    }
}

/// The single-reader/many-writer shared driver record.
///
/// Mutated by the reader loop, and by the slot holder for the small
/// subfields that belong to its current phase; all access goes through the
/// short blocking lock.
pub(crate) struct Shared {
    pub talking: bool,
    pub running: bool,
    pub mode: Mode,
    pub slot: Option<SlotRecord>,
    pub last_error: Vec<u8, ERR_MSG_LEN>,
    pub reg: RegistrationState,
    pub dns: DnsScratch,
    pub sms_pending: u32,
    pub mode_waker: WakerRegistration,
    pub run_waker: WakerRegistration,
    pub dns_waker: WakerRegistration,
}

impl Shared {
    pub const fn new() -> Self {
        Self {
            talking: false,
            running: false,
            mode: Mode::Normal,
            slot: None,
            last_error: Vec::new(),
            reg: RegistrationState::new(Instant::MIN),
            dns: DnsScratch {
                addr: Vec::new(),
                ready: false,
                count: 0,
            },
            sms_pending: 0,
            mode_waker: WakerRegistration::new(),
            run_waker: WakerRegistration::new(),
            dns_waker: WakerRegistration::new(),
        }
    }
}

/// Borrow bundle handed to the reader loop, the device handle and the
/// service impls. Copyable so guards can carry it by value.
pub(crate) struct Mux<'a, R, W> {
    pub shared: &'a BlockingMutex<NoopRawMutex, RefCell<Shared>>,
    pub slot_lock: &'a Mutex<NoopRawMutex, ()>,
    pub slot_done: &'a Signal<NoopRawMutex, ()>,
    pub buffer_done: &'a Signal<NoopRawMutex, ()>,
    pub select_event: &'a Signal<NoopRawMutex, ()>,
    pub dns_lock: &'a Mutex<NoopRawMutex, ()>,
    pub rx: &'a Mutex<NoopRawMutex, R>,
    pub tx: &'a Mutex<NoopRawMutex, W>,
    pub sockets: &'a SocketTable,
}

impl<'a, R, W> Clone for Mux<'a, R, W> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, R, W> Copy for Mux<'a, R, W> {}

impl<'a, R, W> Mux<'a, R, W> {
    pub fn with_shared<T>(&self, f: impl FnOnce(&mut Shared) -> T) -> T {
        self.shared.lock(|s| f(&mut s.borrow_mut()))
    }

    pub fn mode(&self, cx: Option<&mut core::task::Context>) -> Mode {
        self.with_shared(|s| {
            if let Some(cx) = cx {
                s.mode_waker.register(cx.waker());
            }
            s.mode
        })
    }

    pub fn set_mode(&self, mode: Mode) {
        self.with_shared(|s| {
            s.mode = mode;
            s.mode_waker.wake();
        });
    }
}
