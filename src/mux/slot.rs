//! Command-slot arbitration.
//!
//! `acquire` blocks on the slot mutex, so AT commands from distinct tasks
//! are totally serialised. The returned guard is the caller's proof of
//! ownership: it writes the command, waits for the reader loop to signal
//! completion, parses the response out of the slot buffer and releases the
//! slot by dropping the guard.

use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::mutex::MutexGuard;
use embassy_time::with_timeout;
use embedded_io_async::Write;
use heapless::String;

use super::{Mode, Mux, SlotOutcome, SlotRecord, SmsSink, MAX_CMD_LEN, PROMPT_CHUNK};
use crate::command::CmdId;
use crate::error::Error;
use crate::services::sms::SmsEntry;
use crate::timing;

pub(crate) struct SlotGuard<'a, R, W> {
    mux: Mux<'a, R, W>,
    _lock: MutexGuard<'a, NoopRawMutex, ()>,
}

impl<'a, R, W> Mux<'a, R, W> {
    /// Wait for the slot to be free and claim it for `id`.
    pub async fn acquire(
        &self,
        id: CmdId,
        timeout: embassy_time::Duration,
        expected_params: u8,
    ) -> SlotGuard<'a, R, W> {
        let lock = self.slot_lock.lock().await;
        self.slot_done.reset();
        self.with_shared(|s| {
            s.slot = Some(SlotRecord::new(id.command(), timeout, expected_params));
        });
        SlotGuard {
            mux: *self,
            _lock: lock,
        }
    }

    /// Claim the slot for a `+CMGL`/`+CMGR` listing; entries stream into
    /// the slot's sink as the reader iterates the response.
    pub async fn acquire_sms(
        &self,
        id: CmdId,
        timeout: embassy_time::Duration,
        fixed_index: i32,
        offset: usize,
        max: usize,
    ) -> SlotGuard<'a, R, W> {
        let guard = self.acquire(id, timeout, 0).await;
        self.with_shared(|s| {
            if let Some(slot) = s.slot.as_mut() {
                slot.sms = Some(SmsSink {
                    fixed_index,
                    offset,
                    max,
                    ..Default::default()
                });
            }
        });
        guard
    }
}

impl<'a, R, W: Write> Mux<'a, R, W> {
    /// Format and emit one AT command line.
    ///
    /// The send mutex guards the serial output; in practice the slot
    /// holder is the only writer while a command is in flight.
    pub async fn send_at(&self, id: CmdId, args: core::fmt::Arguments<'_>) -> Result<(), Error> {
        let cmd = id.command();
        let mut line: String<MAX_CMD_LEN> = String::new();
        line.push_str("AT").map_err(|_| Error::InvalidParam)?;
        line.push_str(cmd.body).map_err(|_| Error::InvalidParam)?;
        core::fmt::Write::write_fmt(&mut line, args)?;
        line.push('\r').map_err(|_| Error::InvalidParam)?;

        let mut tx = self.tx.lock().await;
        tx.write_all(line.as_bytes())
            .await
            .map_err(|_| Error::Io)
    }

    /// Write raw bytes to the modem under the send mutex (startup phase,
    /// prompt payloads).
    pub async fn write_raw(&self, bytes: &[u8]) -> Result<(), Error> {
        let mut tx = self.tx.lock().await;
        tx.write_all(bytes).await.map_err(|_| Error::Io)
    }

    /// Wait for the reader to flip into prompt mode, then push the payload
    /// (chunked) plus the optional trailer (`^Z` for SMS) and hand the
    /// line protocol back.
    pub async fn wait_for_prompt_mode(
        &self,
        payload: &[u8],
        trailer: Option<u8>,
    ) -> Result<(), Error> {
        with_timeout(
            timing::MODE_ENTRY,
            poll_fn(|cx| match self.mode(Some(cx)) {
                Mode::Prompt => Poll::Ready(()),
                _ => Poll::Pending,
            }),
        )
        .await
        .map_err(|_| Error::Timeout)?;

        {
            let mut tx = self.tx.lock().await;
            for chunk in payload.chunks(PROMPT_CHUNK) {
                tx.write_all(chunk).await.map_err(|_| Error::Io)?;
            }
            if let Some(b) = trailer {
                tx.write_all(&[b]).await.map_err(|_| Error::Io)?;
            }
        }

        self.set_mode(Mode::Normal);
        Ok(())
    }
}

impl<'a, R: embedded_io_async::Read, W> Mux<'a, R, W> {
    /// Wait for the reader to enter buffer mode; on return the caller owns
    /// the serial input until it calls one of the `exit_buffer_mode_*`
    /// functions.
    pub async fn wait_for_buffer_mode(&self) -> Result<(), Error> {
        with_timeout(
            timing::MODE_ENTRY,
            poll_fn(|cx| match self.mode(Some(cx)) {
                Mode::Buffer => Poll::Ready(()),
                _ => Poll::Pending,
            }),
        )
        .await
        .map_err(|_| Error::Timeout)
    }

    /// Drain exactly `expected` payload bytes from the serial input. The
    /// first `min(dest.len(), expected)` land in `dest`; the remainder
    /// goes to `sink`'s ring buffer (or is discarded without a sink).
    /// Returns the number of bytes placed in `dest`.
    pub async fn exit_buffer_mode_read(
        &self,
        dest: &mut [u8],
        expected: usize,
        sink: Option<usize>,
    ) -> Result<usize, Error> {
        let n = dest.len().min(expected);
        let mut overflowed = false;

        let res = async {
            let mut rx = self.rx.lock().await;
            rx.read_exact(&mut dest[..n]).await.map_err(|_| Error::Io)?;
            let mut remaining = expected - n;
            let mut scratch = [0u8; 64];
            while remaining > 0 {
                let take = remaining.min(scratch.len());
                rx.read_exact(&mut scratch[..take])
                    .await
                    .map_err(|_| Error::Io)?;
                if let Some(id) = sink {
                    if let Some(entry) = self.sockets.get(id) {
                        entry.with(|st| st.rx_buf.enqueue_slice(&scratch[..take]));
                        overflowed = true;
                    }
                }
                remaining -= take;
            }
            Ok(n)
        }
        .await;

        // The loop must regain the line whatever happened above.
        self.set_mode(Mode::Normal);
        self.buffer_done.signal(());

        if overflowed {
            if let Some(id) = sink {
                self.sockets.signal_rx(id);
                self.select_event.signal(());
            }
        }
        res
    }

    /// Buffer-mode transfers in the other direction (`+QFUPL` after
    /// `CONNECT`): push the payload, then hand the line back to the loop.
    pub async fn exit_buffer_mode_write(&self, payload: &[u8]) -> Result<(), Error>
    where
        W: Write,
    {
        let res = self.write_raw(payload).await;
        self.set_mode(Mode::Normal);
        self.buffer_done.signal(());
        res
    }
}

impl<'a, R, W> SlotGuard<'a, R, W> {
    /// Suspend until the reader signals completion (OK, error line, or
    /// slot timeout). The extra grace on top of the slot's own budget
    /// covers a reader that is quiesced mid-command.
    pub async fn wait(&self) -> SlotOutcome {
        let budget = self
            .mux
            .with_shared(|s| s.slot.as_ref().map(|sl| sl.timeout))
            .unwrap_or(timing::BASE);
        match with_timeout(budget + timing::LINE_POLL * 5, self.mux.slot_done.wait()).await {
            Ok(()) => self
                .mux
                .with_shared(|s| s.slot.as_ref().and_then(|sl| sl.outcome))
                .unwrap_or(SlotOutcome::Invalid),
            Err(_) => {
                self.mux.with_shared(|s| {
                    if let Some(slot) = s.slot.as_mut() {
                        slot.outcome = Some(SlotOutcome::Timeout);
                    }
                });
                SlotOutcome::Timeout
            }
        }
    }

    /// Same as [`wait`](Self::wait) but folded into a `Result`.
    pub async fn wait_ok(&self) -> Result<(), Error> {
        match self.wait().await {
            SlotOutcome::Ok => Ok(()),
            SlotOutcome::Invalid => Err(Error::Io),
            SlotOutcome::Timeout => Err(Error::Timeout),
        }
    }

    /// Parse the response buffer. Only valid while the guard is held.
    pub fn with_response<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        self.mux.with_shared(|s| {
            let bytes = s
                .slot
                .as_ref()
                .map(|sl| sl.resp.as_slice())
                .unwrap_or(&[]);
            f(bytes)
        })
    }

    /// Drain the accumulated SMS entries out of the slot sink.
    pub fn take_sms(&self) -> heapless::Vec<SmsEntry, { crate::services::sms::SMS_LIST_MAX }> {
        self.mux.with_shared(|s| {
            s.slot
                .as_mut()
                .and_then(|sl| sl.sms.as_mut())
                .map(|sink| core::mem::take(&mut sink.entries))
                .unwrap_or_default()
        })
    }
}

impl<'a, R, W> Drop for SlotGuard<'a, R, W> {
    fn drop(&mut self) {
        self.mux.with_shared(|s| s.slot = None);
    }
}
