//! Host driver for Quectel BG-series (LTE-M / NB-IoT / GSM) cellular
//! modules, speaking the extended AT protocol over a single UART.
//!
//! The driver is a single-reader / many-writer multiplexer: one
//! [`Runner`] task owns the serial input and dispatches response lines
//! and URCs, while any number of client tasks issue commands through the
//! cloneable [`Device`] handle. Socket, DNS, TLS, SMS, GNSS and RTC
//! operations are layered on top of that discipline.
//!
//! ```ignore
//! let mut resources = Resources::new(uart_rx, uart_tx);
//! let (mut runner, device) = quectel_cellular::new(&mut resources, Config::default());
//! spawner.spawn(cell_task(runner)); // keeps runner.run() polled
//! device.startup().await?;
//! device.attach(&ApnInfo::new("internet"), Duration::from_secs(180)).await?;
//! let sock = device.socket(Protocol::Tcp, false).await?;
//! device.connect(sock, "93.184.216.34", 80).await?;
//! ```

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod command;
pub mod config;
mod device;
pub mod error;
pub(crate) mod mux;
pub mod parser;
pub mod registration;
pub mod services;
pub mod socket;
pub mod timing;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_io_async::{Read, Write};

pub use config::{ApnInfo, AuthMethod, Config};
pub use device::Device;
pub use error::Error;
pub use mux::runner::Runner;
pub use services::clock::DateTime;
pub use services::data::tls::TlsAuth;
pub use services::data::ResolvedAddr;
pub use services::gnss::GnssFix;
pub use services::network::{
    Functionality, LinkInfo, MobileInfo, NetworkInfo, OperatorEntry, Rat,
};
pub use services::sms::SmsEntry;
pub use socket::{Protocol, MAX_SOCKETS};

use mux::{Mux, Shared};
use socket::SocketTable;

/// All long-lived driver state, allocated by the caller (typically in a
/// `static`). The serial halves live here so the reader loop and a
/// buffer-mode client can hand the input back and forth.
pub struct Resources<R, W> {
    shared: BlockingMutex<NoopRawMutex, RefCell<Shared>>,
    slot_lock: Mutex<NoopRawMutex, ()>,
    slot_done: Signal<NoopRawMutex, ()>,
    buffer_done: Signal<NoopRawMutex, ()>,
    select_event: Signal<NoopRawMutex, ()>,
    dns_lock: Mutex<NoopRawMutex, ()>,
    rx: Mutex<NoopRawMutex, R>,
    tx: Mutex<NoopRawMutex, W>,
    sockets: SocketTable,
}

impl<R, W> Resources<R, W> {
    pub fn new(rx: R, tx: W) -> Self {
        Self {
            shared: BlockingMutex::new(RefCell::new(Shared::new())),
            slot_lock: Mutex::new(()),
            slot_done: Signal::new(),
            buffer_done: Signal::new(),
            select_event: Signal::new(),
            dns_lock: Mutex::new(()),
            rx: Mutex::new(rx),
            tx: Mutex::new(tx),
            sockets: SocketTable::new(),
        }
    }
}

/// Split the resources into the background [`Runner`] and the client
/// [`Device`] handle.
pub fn new<'a, R: Read, W: Write>(
    resources: &'a mut Resources<R, W>,
    config: Config,
) -> (Runner<'a, R, W>, Device<'a, R, W>) {
    let mux = Mux {
        shared: &resources.shared,
        slot_lock: &resources.slot_lock,
        slot_done: &resources.slot_done,
        buffer_done: &resources.buffer_done,
        select_event: &resources.select_event,
        dns_lock: &resources.dns_lock,
        rx: &resources.rx,
        tx: &resources.tx,
        sockets: &resources.sockets,
    };
    (Runner::new(mux), Device::new(mux, config))
}
