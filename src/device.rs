//! The client-side handle.
//!
//! `Device` is what application tasks hold; it is cheap to clone and every
//! method serialises through the command slot. The startup/shutdown pair
//! drives the modem over raw serial while the reader loop is quiesced,
//! mirroring the bring-up sequence the module's manual prescribes.

use core::future::poll_fn;
use core::task::Poll;

use embassy_time::{with_timeout, Duration, Instant, Timer};
use embedded_io_async::{Read, Write};

use crate::config::Config;
use crate::error::Error;
use crate::mux::Mux;
use crate::parser::{is_ok, is_rdy, read_line, LineBuf};
use crate::timing;

pub struct Device<'a, R, W> {
    pub(crate) mux: Mux<'a, R, W>,
    pub(crate) config: Config,
}

impl<'a, R, W> Clone for Device<'a, R, W> {
    fn clone(&self) -> Self {
        Self {
            mux: self.mux,
            config: self.config.clone(),
        }
    }
}

impl<'a, R: Read, W: Write> Device<'a, R, W> {
    pub(crate) fn new(mux: Mux<'a, R, W>, config: Config) -> Self {
        Self { mux, config }
    }

    /// Quiesce the reader loop. Returns once the loop has parked; the
    /// serial port is then free for direct access (`startup`, bypass).
    pub async fn stop(&self) -> Result<(), Error> {
        self.mux.with_shared(|s| s.talking = false);
        with_timeout(
            timing::QUIESCENT_POLL * 4,
            poll_fn(|cx| {
                self.mux.with_shared(|s| {
                    s.run_waker.register(cx.waker());
                    if s.running {
                        Poll::Pending
                    } else {
                        Poll::Ready(())
                    }
                })
            }),
        )
        .await
        .map_err(|_| Error::Timeout)
    }

    /// Resume the reader loop after a `stop`.
    pub fn start(&self) {
        self.mux.with_shared(|s| {
            s.talking = true;
            s.run_waker.wake();
        });
    }

    /// Bring the modem's AT interface to a known state and start the
    /// reader loop: auto-baud probe, echo off, verbose errors, URC
    /// enables, SIM readiness and SMS text mode.
    ///
    /// The slot mutex is held throughout so no client can slip a command
    /// into the raw phase.
    pub async fn startup(&self) -> Result<(), Error> {
        let _slot = self.mux.slot_lock.lock().await;
        self.stop().await?;

        {
            let mut rx = self.mux.rx.lock().await;
            let mut line = LineBuf::new();

            // A freshly powered module announces itself; drain the boot
            // banner if one is queued.
            while let Ok(Ok(())) = with_timeout(timing::STARTUP_LINE, read_line(&mut *rx, &mut line)).await
            {
                if is_rdy(&line) {
                    debug!("module ready banner seen");
                    break;
                }
            }

            // Auto-baud: poke until the module answers.
            let mut alive = false;
            for _ in 0..10 {
                self.mux.write_raw(b"AT\r\n").await?;
                if wait_for_ok(&mut *rx, &mut line, timing::STARTUP_LINE).await {
                    alive = true;
                    break;
                }
            }
            if !alive {
                return Err(Error::HardwareInit);
            }

            for cmd in [
                &b"ATE0\r\n"[..],
                b"AT+CMEE=2\r\n",
                b"AT+CTZU=1\r\n",
                b"AT+CREG=2\r\n",
                b"AT+CGREG=2\r\n",
                b"AT+CEREG=2\r\n",
                b"AT+CGEREP=2,0\r\n",
            ] {
                self.mux.write_raw(cmd).await?;
                if !wait_for_ok(&mut *rx, &mut line, timing::STARTUP_LINE).await {
                    return Err(Error::HardwareInit);
                }
            }

            // SIM must come up before anything network-side is attempted.
            if !self
                .poll_startup_flag(&mut *rx, &mut line, b"AT+CPIN?\r\n", |l| {
                    l.starts_with(b"+CPIN: READY")
                })
                .await
            {
                return Err(Error::HardwareInit);
            }

            // +QINISTAT reports SIM init progress; 2 means SMS ready.
            if !self
                .poll_startup_flag(&mut *rx, &mut line, b"AT+QINISTAT\r\n", |l| {
                    l.strip_prefix(b"+QINISTAT: ")
                        .and_then(crate::parser::parse_decimal)
                        .map(|v| v >= 2)
                        .unwrap_or(false)
                })
                .await
            {
                return Err(Error::HardwareInit);
            }

            // SMS text mode and preferred storage.
            self.mux.write_raw(b"AT+CMGF=1\r\n").await?;
            if !wait_for_ok(&mut *rx, &mut line, timing::STARTUP_LINE).await {
                return Err(Error::HardwareInit);
            }
            let mut cpms: heapless::String<64> = heapless::String::new();
            let st = self.config.sms_storage;
            let _ = core::fmt::write(
                &mut cpms,
                format_args!("AT+CPMS=\"{}\",\"{}\",\"{}\"\r\n", st, st, st),
            );
            self.mux.write_raw(cpms.as_bytes()).await?;
            if !wait_for_ok(&mut *rx, &mut line, timing::STARTUP_LINE).await {
                return Err(Error::HardwareInit);
            }
        }

        // The modem is (re)started: forget any stale driver state. The
        // unregistered clock restarts now.
        self.mux.with_shared(|s| {
            s.reg.reset(Instant::now());
            s.sms_pending = 0;
            s.dns.reset();
            s.last_error.clear();
        });

        self.start();
        Ok(())
    }

    /// Orderly power-down: radio off (`+CFUN=0`), then `+QPOWD`. The
    /// reader loop stays quiesced afterwards.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let _slot = self.mux.slot_lock.lock().await;
        self.stop().await?;

        let mut rx = self.mux.rx.lock().await;
        let mut line = LineBuf::new();

        self.mux.write_raw(b"ATE0\r\n").await?;
        if wait_for_ok(&mut *rx, &mut line, timing::STARTUP_LINE).await {
            self.mux.write_raw(b"AT+CFUN=0\r\n").await?;
            wait_for_ok(&mut *rx, &mut line, Duration::from_secs(15)).await;
            self.mux.write_raw(b"AT+QPOWD\r\n").await?;
        }
        Ok(())
    }

    /// Last `+CME ERROR` message captured by the reader loop.
    pub fn last_error(&self) -> heapless::Vec<u8, { crate::mux::ERR_MSG_LEN }> {
        self.mux.with_shared(|s| s.last_error.clone())
    }

    /// Issue `query` periodically until a response line satisfies `seen`,
    /// within the startup SIM budget.
    async fn poll_startup_flag(
        &self,
        rx: &mut R,
        line: &mut LineBuf,
        query: &[u8],
        seen: impl Fn(&[u8]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timing::STARTUP_SIM;
        loop {
            if self.mux.write_raw(query).await.is_err() {
                return false;
            }
            let mut hit = false;
            // Consume the full response (lines until OK/timeout).
            loop {
                match with_timeout(timing::STARTUP_LINE, read_line(rx, line)).await {
                    Ok(Ok(())) => {
                        if seen(line) {
                            hit = true;
                        }
                        if is_ok(line) {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            if hit {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            Timer::after(timing::STARTUP_LINE).await;
        }
    }
}

/// Read lines until `OK` or the per-line timeout lapses.
async fn wait_for_ok<R: Read>(rx: &mut R, line: &mut LineBuf, per_line: Duration) -> bool {
    loop {
        match with_timeout(per_line, read_line(rx, line)).await {
            Ok(Ok(())) => {
                if is_ok(line) {
                    return true;
                }
            }
            _ => return false,
        }
    }
}
