//! Test harness: a scripted fake modem on the far end of two in-memory
//! pipes, a single-threaded executor and mock time.
//!
//! Each test spawns the driver's reader loop, one or more client tasks
//! and a modem script, then alternates `run_until_stalled` with mock-time
//! advances until the client publishes its result.

#![allow(dead_code)]

use std::boxed::Box;
use std::cell::RefCell;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::pipe::{Pipe, Reader, Writer};
use embassy_time::{Duration, MockDriver, Timer};
use futures_executor::LocalPool;
use futures_task::LocalSpawn;

use quectel_cellular::{Config, Device, Resources, Runner};

pub const PIPE_SIZE: usize = 4096;

pub type HostRx = Reader<'static, NoopRawMutex, PIPE_SIZE>;
pub type HostTx = Writer<'static, NoopRawMutex, PIPE_SIZE>;
pub type ModemRx = Reader<'static, NoopRawMutex, PIPE_SIZE>;
pub type ModemTx = Writer<'static, NoopRawMutex, PIPE_SIZE>;

pub type TestDevice = Device<'static, HostRx, HostTx>;
pub type TestRunner = Runner<'static, HostRx, HostTx>;

/// One step of a modem script.
pub enum Step {
    /// Expect one AT command line from the host, `\r`-terminated (the
    /// terminator and any stray line feeds are consumed, not compared).
    Expect(&'static str),
    /// Expect exactly these raw bytes (prompt payloads, file uploads).
    ExpectRaw(&'static [u8]),
    /// Emit bytes towards the host.
    Send(&'static [u8]),
    /// Let mock time pass before the next step.
    WaitMs(u64),
}

pub struct Harness {
    pub pool: LocalPool,
    pub device: TestDevice,
}

impl Harness {
    /// Build the full rig: pipes, driver resources, reader-loop task and
    /// the scripted modem on the far end.
    pub fn with_script(script: Vec<Step>) -> Self {
        let host_to_modem: &'static mut Pipe<NoopRawMutex, PIPE_SIZE> =
            Box::leak(Box::new(Pipe::new()));
        let modem_to_host: &'static mut Pipe<NoopRawMutex, PIPE_SIZE> =
            Box::leak(Box::new(Pipe::new()));

        let (host_rx, modem_tx) = modem_to_host.split();
        let (modem_rx, host_tx) = host_to_modem.split();

        let resources: &'static mut Resources<HostRx, HostTx> =
            Box::leak(Box::new(Resources::new(host_rx, host_tx)));
        let (mut runner, device) = quectel_cellular::new(resources, Config::default());

        let pool = LocalPool::new();
        pool.spawner()
            .spawn_local_obj(Box::new(async move { runner.run().await }).into())
            .unwrap();

        let harness = Self { pool, device };
        harness.spawn_modem_raw(modem_rx, modem_tx, script);
        harness
    }

    fn spawn_modem_raw(&self, rx: ModemRx, tx: ModemTx, script: Vec<Step>) {
        self.pool
            .spawner()
            .spawn_local_obj(Box::new(run_script(rx, tx, script)).into())
            .unwrap();
    }

    /// Spawn a client task that eventually publishes into the returned
    /// cell.
    pub fn spawn_client<T, F>(&self, fut: F) -> Rc<RefCell<Option<T>>>
    where
        T: 'static,
        F: core::future::Future<Output = T> + 'static,
    {
        let cell: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let out = cell.clone();
        self.pool
            .spawner()
            .spawn_local_obj(
                Box::new(async move {
                    let value = fut.await;
                    *out.borrow_mut() = Some(value);
                })
                .into(),
            )
            .unwrap();
        cell
    }

    /// Alternate executor turns and mock-time steps until the cell fills.
    pub fn drive<T>(&mut self, cell: &Rc<RefCell<Option<T>>>, max_steps: usize, step_ms: u64) -> T {
        for _ in 0..max_steps {
            self.pool.run_until_stalled();
            if let Some(v) = cell.borrow_mut().take() {
                return v;
            }
            MockDriver::get().advance(Duration::from_millis(step_ms));
        }
        self.pool.run_until_stalled();
        cell.borrow_mut()
            .take()
            .expect("client task did not complete within the step budget")
    }

    /// Run the executor without expecting a result (URC-only traffic).
    pub fn settle(&mut self, steps: usize, step_ms: u64) {
        for _ in 0..steps {
            self.pool.run_until_stalled();
            MockDriver::get().advance(Duration::from_millis(step_ms));
        }
        self.pool.run_until_stalled();
    }
}

/// The modem side of the conversation.
async fn run_script(mut rx: ModemRx, mut tx: ModemTx, script: Vec<Step>) {
    for step in script {
        match step {
            Step::Expect(expected) => {
                let line = read_cmd_line(&mut rx).await;
                assert_eq!(
                    String::from_utf8_lossy(&line),
                    expected,
                    "modem script: unexpected AT command"
                );
            }
            Step::ExpectRaw(expected) => {
                let mut buf = vec![0u8; expected.len()];
                read_exact(&mut rx, &mut buf).await;
                assert_eq!(buf, expected, "modem script: unexpected raw payload");
            }
            Step::Send(bytes) => {
                use embedded_io_async::Write;
                tx.write_all(bytes).await.unwrap();
            }
            Step::WaitMs(ms) => {
                Timer::after(Duration::from_millis(ms)).await;
            }
        }
    }
}

/// Read one host command line: bytes up to `\r`, skipping leading line
/// feeds left over from the previous terminator.
async fn read_cmd_line(rx: &mut ModemRx) -> Vec<u8> {
    use embedded_io_async::Read;
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        rx.read(&mut byte).await.unwrap();
        match byte[0] {
            b'\n' if line.is_empty() => continue,
            b'\r' => return line,
            b => line.push(b),
        }
    }
}

async fn read_exact(rx: &mut ModemRx, buf: &mut [u8]) {
    use embedded_io_async::Read;
    let mut filled = 0;
    while filled < buf.len() {
        let n = rx.read(&mut buf[filled..]).await.unwrap();
        assert!(n > 0, "modem pipe closed early");
        filled += n;
    }
}

/// The canonical startup script (auto-baud, configuration, SIM ready).
pub fn startup_script() -> Vec<Step> {
    vec![
        Step::Expect("AT"),
        Step::Send(b"OK\r\n"),
        Step::Expect("ATE0"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+CMEE=2"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+CTZU=1"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+CREG=2"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+CGREG=2"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+CEREG=2"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+CGEREP=2,0"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+CPIN?"),
        Step::Send(b"+CPIN: READY\r\nOK\r\n"),
        Step::Expect("AT+QINISTAT"),
        Step::Send(b"+QINISTAT: 3\r\nOK\r\n"),
        Step::Expect("AT+CMGF=1"),
        Step::Send(b"OK\r\n"),
        Step::Expect("AT+CPMS=\"SM\",\"SM\",\"SM\""),
        Step::Send(b"OK\r\n"),
    ]
}

/// Startup plus a registration URC so sockets are allowed.
pub fn started_harness(mut extra: Vec<Step>) -> Harness {
    let mut script = startup_script();
    // Registered on LTE-M1 right after startup.
    script.push(Step::Send(b"+CEREG: 1,\"12AB\",\"001C345\",8\r\n"));
    script.append(&mut extra);

    let mut harness = Harness::with_script(script);
    let device = harness.device.clone();
    let started = harness.spawn_client(async move { device.startup().await });
    harness
        .drive(&started, 200, 100)
        .expect("startup must succeed");
    harness
}
