//! SMS operations.
//!
//! Sending drives prompt mode (`+CMGS` … `>` … text … `^Z`); listing is
//! the `+CMGL` iterator, where the reader loop accumulates entries while
//! the slot is active.

use embedded_io_async::{Read, Write};
use heapless::{String, Vec};

use crate::command::CmdId;
use crate::error::Error;
use crate::parser::Args;
use crate::timing;
use crate::Device;

/// Maximum SMS text payload (GSM 7-bit single message).
pub const SMS_BODY_LEN: usize = 160;

/// Upper bound on entries one `sms_list` call returns.
pub const SMS_LIST_MAX: usize = 8;

pub const SMS_ADDR_LEN: usize = 20;
pub const SMS_SCTS_LEN: usize = 24;

/// One stored message, as reported by `+CMGL`/`+CMGR`.
#[derive(Debug, Clone, Default)]
pub struct SmsEntry {
    /// Message-storage index, used for `sms_delete`.
    pub index: i32,
    /// Originating address.
    pub oa: String<SMS_ADDR_LEN>,
    /// Service-centre timestamp, verbatim.
    pub scts: String<SMS_SCTS_LEN>,
    pub body: Vec<u8, SMS_BODY_LEN>,
    pub unread: bool,
}

impl SmsEntry {
    pub(crate) fn from_header(index: i32, oa: &[u8], scts: &[u8], unread: bool) -> Self {
        let mut entry = Self {
            index,
            unread,
            ..Default::default()
        };
        if let Ok(s) = core::str::from_utf8(oa) {
            entry.oa = String::try_from(s).unwrap_or_default();
        }
        if let Ok(s) = core::str::from_utf8(scts) {
            entry.scts = String::try_from(s).unwrap_or_default();
        }
        entry
    }
}

impl<'a, R: Read, W: Write> Device<'a, R, W> {
    /// Submit one text-mode message; returns the message reference the
    /// network assigned.
    pub async fn sms_send(&self, number: &str, text: &str) -> Result<i32, Error> {
        if text.len() > SMS_BODY_LEN {
            return Err(Error::InvalidParam);
        }
        let guard = self.mux.acquire(CmdId::Cmgs, timing::SMS_OP, 1).await;
        self.mux
            .send_at(CmdId::Cmgs, format_args!("=\"{}\"", number))
            .await?;
        // The text goes out after the `>` prompt, terminated by ^Z.
        self.mux
            .wait_for_prompt_mode(text.as_bytes(), Some(0x1A))
            .await?;
        guard.wait_ok().await?;
        guard
            .with_response(|resp| Args::new(resp).int())
            .ok_or(Error::Io)
    }

    /// List received messages. `offset` skips that many matching entries,
    /// `max` caps the result (at most [`SMS_LIST_MAX`]). Only
    /// received-read/received-unread messages are reported.
    pub async fn sms_list(
        &self,
        unread_only: bool,
        max: usize,
        offset: usize,
    ) -> Result<Vec<SmsEntry, SMS_LIST_MAX>, Error> {
        let guard = self
            .mux
            .acquire_sms(CmdId::Cmgl, timing::SMS_OP, -1, offset, max.min(SMS_LIST_MAX))
            .await;
        let stat = if unread_only { "REC UNREAD" } else { "ALL" };
        self.mux
            .send_at(CmdId::Cmgl, format_args!("=\"{}\"", stat))
            .await?;
        guard.wait_ok().await?;
        // The pending counter is considered serviced by a listing.
        self.mux.with_shared(|s| s.sms_pending = 0);
        Ok(guard.take_sms())
    }

    /// Read a single message by storage index.
    pub async fn sms_get(&self, index: u16) -> Result<SmsEntry, Error> {
        let guard = self
            .mux
            .acquire_sms(CmdId::Cmgr, timing::SMS_OP, index as i32, 0, 1)
            .await;
        self.mux
            .send_at(CmdId::Cmgr, format_args!("={}", index))
            .await?;
        guard.wait_ok().await?;
        guard.take_sms().into_iter().next().ok_or(Error::Io)
    }

    pub async fn sms_delete(&self, index: u16) -> Result<(), Error> {
        let guard = self.mux.acquire(CmdId::Cmgd, timing::BASE, 0).await;
        self.mux
            .send_at(CmdId::Cmgd, format_args!("={}", index))
            .await?;
        guard.wait_ok().await
    }

    /// Messages announced by `+CMTI` since the last listing.
    pub fn sms_pending(&self) -> u32 {
        self.mux.with_shared(|s| s.sms_pending)
    }

    /// Service centre address (`+CSCA?`).
    pub async fn sms_get_scsa(&self) -> Result<String<SMS_ADDR_LEN>, Error> {
        let guard = self.mux.acquire(CmdId::Csca, timing::BASE, 1).await;
        self.mux.send_at(CmdId::Csca, format_args!("?")).await?;
        guard.wait_ok().await?;
        guard.with_response(|resp| {
            let mut a = Args::new(resp);
            let sc = a.quoted().ok_or(Error::Io)?;
            let text = core::str::from_utf8(sc).map_err(|_| Error::Io)?;
            String::try_from(text).map_err(|_| Error::Io)
        })
    }

    pub async fn sms_set_scsa(&self, scsa: &str) -> Result<(), Error> {
        let guard = self.mux.acquire(CmdId::Csca, timing::BASE, 0).await;
        self.mux
            .send_at(CmdId::Csca, format_args!("=\"{}\"", scsa))
            .await?;
        guard.wait_ok().await
    }
}
