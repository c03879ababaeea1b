//! Per-socket state.
//!
//! Sockets are identified by their index into a fixed table; the modem's
//! own connect-id is the same number. Each entry is logically owned by the
//! task that acquired it but physically shared with the reader loop, which
//! may fill the ring buffer during buffer mode and set the to-be-closed
//! flag from URCs. The entry's async lock covers client RPCs; the ring and
//! flags live behind a short blocking lock both sides take.

mod ring_buffer;

pub use ring_buffer::RingBuffer;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::Duration;

/// Number of socket slots; the modem allocates connect-ids 0..4.
pub const MAX_SOCKETS: usize = 4;

/// Ring-buffer capacity per socket.
pub const SOCKET_RX_BUF: usize = 1500;

/// Per-AT-transfer ceiling for socket payloads.
pub const SOCKET_CHUNK: usize = 512;

/// IP protocol numbers, as passed through the BSD facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Tcp = 6,
    Udp = 17,
}

/// Socket connection progress, driven by the `+QIOPEN`/`+QSSLOPEN` URC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectState {
    #[default]
    Idle = 0,
    Connected = 1,
    Failed = 2,
}

#[derive(Debug)]
pub(crate) struct SocketState {
    pub acquired: bool,
    pub proto: Protocol,
    pub secure: bool,
    pub connected: ConnectState,
    pub bound: bool,
    /// Set asynchronously by the reader loop; sends fail and drained
    /// receives report closure while this holds.
    pub to_be_closed: bool,
    /// A "recv" URC arrived and the modem-side queue has not been checked
    /// since; lets `select` report readiness before any `+QIRD`.
    pub urc_pending: bool,
    /// Receive timeout (SO_RCVTIMEO); `None` blocks indefinitely, zero is
    /// the non-blocking mode set through `fcntl`.
    pub timeout: Option<Duration>,
    pub rx_buf: RingBuffer<SOCKET_RX_BUF>,
}

impl SocketState {
    const fn new() -> Self {
        Self {
            acquired: false,
            proto: Protocol::Tcp,
            secure: false,
            connected: ConnectState::Idle,
            bound: false,
            to_be_closed: false,
            urc_pending: false,
            timeout: None,
            rx_buf: RingBuffer::new(),
        }
    }

    /// Readable as far as `select` is concerned.
    pub fn readable(&self) -> bool {
        self.acquired && (!self.rx_buf.is_empty() || self.to_be_closed || self.urc_pending)
    }
}

pub(crate) struct SocketEntry {
    /// Client-side exclusive lock, held for the duration of one RPC.
    pub lock: Mutex<NoopRawMutex, ()>,
    /// Data-arrived / closed event, signalled by the reader loop.
    pub rx_event: Signal<NoopRawMutex, ()>,
    pub state: BlockingMutex<NoopRawMutex, RefCell<SocketState>>,
}

impl SocketEntry {
    const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            rx_event: Signal::new(),
            state: BlockingMutex::new(RefCell::new(SocketState::new())),
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut SocketState) -> T) -> T {
        self.state.lock(|s| f(&mut s.borrow_mut()))
    }
}

pub(crate) struct SocketTable {
    entries: [SocketEntry; MAX_SOCKETS],
}

impl SocketTable {
    pub const fn new() -> Self {
        Self {
            entries: [
                SocketEntry::new(),
                SocketEntry::new(),
                SocketEntry::new(),
                SocketEntry::new(),
            ],
        }
    }

    pub fn get(&self, id: usize) -> Option<&SocketEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &SocketEntry)> {
        self.entries.iter().enumerate()
    }

    /// Wake a receiver blocked on this socket.
    pub fn signal_rx(&self, id: usize) {
        if let Some(entry) = self.get(id) {
            entry.rx_event.signal(());
        }
    }

    /// Mark every acquired socket to-be-closed without touching the modem
    /// (used when a PDP-deactivation URC reports they are already gone).
    pub fn close_all(&self) {
        for (_, entry) in self.iter() {
            entry.with(|s| {
                if s.acquired {
                    s.to_be_closed = true;
                }
            });
            entry.rx_event.signal(());
        }
    }
}
