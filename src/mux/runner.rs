//! The reader loop.
//!
//! A single task owns the serial input. It frames lines, feeds the active
//! slot, hands URCs to the dispatcher and drives the NORMAL / PROMPT /
//! BUFFER mode machine. A slot can never stall it for longer than the
//! slot's own timeout; the loop marks the slot timed out and keeps going.

use core::future::poll_fn;
use core::task::Poll;

use embassy_time::{with_timeout, Instant, Timer};
use embedded_io_async::{Read, Write};

use super::{urc, Mode, Mux, SlotOutcome};
use crate::command::{self, ResponseKind};
use crate::parser::{check_error, is_ok, read_line, LineBuf};
use crate::timing;

/// Background task for the driver; obtain one from [`crate::new`] and keep
/// `run()` polled for as long as the driver lives.
pub struct Runner<'a, R: Read, W: Write> {
    pub(crate) mux: Mux<'a, R, W>,
    pub(crate) line: LineBuf,
}

enum Step {
    /// Line consumed, nothing further to do.
    Done,
    /// Signal the slot waiter.
    SlotDone,
    /// Dispatch the line as a URC for `cmd`.
    Urc(&'static command::Command),
}

impl<'a, R: Read, W: Write> Runner<'a, R, W> {
    pub(crate) fn new(mux: Mux<'a, R, W>) -> Self {
        Self {
            mux,
            line: LineBuf::new(),
        }
    }

    pub async fn run(&mut self) -> ! {
        loop {
            if !self.mux.with_shared(|s| s.talking) {
                self.mux.with_shared(|s| {
                    if s.running {
                        s.running = false;
                        s.run_waker.wake();
                    }
                });
                Timer::after(timing::QUIESCENT_POLL).await;
                continue;
            }
            self.mux.with_shared(|s| {
                if !s.running {
                    s.running = true;
                    s.run_waker.wake();
                }
            });

            match self.mux.mode(None) {
                Mode::Normal => self.normal_step().await,
                Mode::Prompt => self.prompt_step().await,
                Mode::Buffer => {
                    // The slot holder owns the serial input; stand by
                    // until it hands the line protocol back.
                    self.mux.buffer_done.wait().await;
                }
            }
        }
    }

    /// One NORMAL-mode iteration: read a line with the short poll budget
    /// and act on it.
    async fn normal_step(&mut self) {
        let read = {
            let mut rx = self.mux.rx.lock().await;
            with_timeout(timing::LINE_POLL, read_line(&mut *rx, &mut self.line)).await
        };

        if let Ok(Err(_)) = read {
            // Serial fault; back off for one poll period instead of
            // spinning.
            Timer::after(timing::LINE_POLL).await;
            return;
        }

        if read.is_err() || self.line.len() <= 3 {
            // No complete line. A lone `>` is the payload prompt, honoured
            // only when the active command expects one.
            let prompt = self.line.first() == Some(&b'>')
                && self.mux.with_shared(|s| {
                    s.slot
                        .as_ref()
                        .map(|slot| slot.active() && slot.cmd.id.takes_prompt())
                        .unwrap_or(false)
                });
            if prompt {
                debug!("prompt received");
                self.mux.set_mode(Mode::Prompt);
                return;
            }

            let timed_out = self.mux.with_shared(|s| {
                let now = Instant::now();
                match s.slot.as_mut() {
                    Some(slot)
                        if slot.active() && now.duration_since(slot.started) > slot.timeout =>
                    {
                        slot.outcome = Some(SlotOutcome::Timeout);
                        true
                    }
                    _ => false,
                }
            });
            if timed_out {
                warn!("slot timed out");
                self.mux.slot_done.signal(());
            }
            return;
        }

        self.process_line();
    }

    /// PROMPT mode: the slot holder drives the payload write; give it the
    /// mode-entry budget, then recover the line protocol.
    async fn prompt_step(&self) {
        let left = with_timeout(
            timing::MODE_ENTRY,
            poll_fn(|cx| match self.mux.mode(Some(cx)) {
                Mode::Prompt => Poll::Pending,
                _ => Poll::Ready(()),
            }),
        )
        .await;
        if left.is_err() {
            warn!("prompt mode abandoned");
            self.mux.set_mode(Mode::Normal);
        }
    }

    fn process_line(&mut self) {
        let line: &[u8] = &self.line;
        let mux = self.mux;
        let cmd = command::lookup(line);

        let step = mux.with_shared(|s| {
            let slot_active = s.slot.as_ref().map(|sl| sl.active()).unwrap_or(false);
            if slot_active {
                let slot = s.slot.as_mut().unwrap();

                // A matched +CMGL/+CMGR header announces one payload line;
                // it is consumed before any other interpretation.
                if slot.sms_body_pending() {
                    slot.feed_sms_body(line);
                    return Step::Done;
                }

                match cmd {
                    Some(c) if core::ptr::eq(c, slot.cmd) => {
                        if c.id.lists_messages() {
                            slot.feed_sms_header(line);
                        } else if slot.params < slot.expected_params {
                            slot.fill_params(line);
                            if c.id.reads_buffer() {
                                // Binary payload follows on the wire.
                                s.mode = Mode::Buffer;
                                s.mode_waker.wake();
                            }
                        } else {
                            trace!("unexpected parameter line for active slot");
                        }
                        Step::Done
                    }
                    Some(c) if c.urc => Step::Urc(c),
                    Some(_) => Step::Done,
                    None => {
                        if is_ok(line) {
                            if slot.params_satisfied() {
                                slot.outcome = Some(SlotOutcome::Ok);
                                Step::SlotDone
                            } else {
                                trace!("OK before expected parameters; ignored");
                                Step::Done
                            }
                        } else if let Some(msg) = check_error(line) {
                            slot.outcome = Some(SlotOutcome::Invalid);
                            s.last_error.clear();
                            let n = msg.len().min(s.last_error.capacity());
                            let _ = s.last_error.extend_from_slice(&msg[..n]);
                            Step::SlotDone
                        } else if slot.cmd.kind == ResponseKind::Str {
                            // The raw line is the whole response.
                            slot.fill_raw(line);
                            slot.outcome = Some(SlotOutcome::Ok);
                            Step::SlotDone
                        } else if slot.cmd.kind == ResponseKind::StrOk {
                            slot.fill_raw(line);
                            Step::Done
                        } else if slot.cmd.id == command::CmdId::Qfupl
                            && line.starts_with(b"CONNECT")
                        {
                            // File upload switches to a binary stream.
                            s.mode = Mode::Buffer;
                            s.mode_waker.wake();
                            Step::Done
                        } else {
                            trace!("unmatched line while slot active");
                            Step::Done
                        }
                    }
                }
            } else {
                match cmd {
                    Some(c) if c.urc => Step::Urc(c),
                    _ => Step::Done,
                }
            }
        });

        match step {
            Step::Done => {}
            Step::SlotDone => mux.slot_done.signal(()),
            Step::Urc(c) => urc::dispatch(&mux, c, line),
        }
    }
}
