//! TLS provisioning for secure sockets.
//!
//! Each secure socket owns the SSL context with its own number; the
//! credential files on the modem are named after the socket index
//! (`cacertN.pem`, `clicrtN.pem`, `prvkeyN.pem`).

use core::fmt::Write as _;

use embedded_io_async::{Read, Write};
use heapless::String;

use crate::command::CmdId;
use crate::error::Error;
use crate::timing;
use crate::Device;

/// Peer authentication for a secure socket, mapped onto `seclevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TlsAuth {
    /// No certificate verification.
    None = 0,
    /// Verify the server against the CA certificate.
    Server = 1,
    /// Mutual authentication (server + client certificate).
    ServerAndClient = 2,
}

impl<'a, R: Read, W: Write> Device<'a, R, W> {
    /// Provision TLS material for socket `id` and apply the SSL context
    /// configuration.
    ///
    /// Credentials are uploaded as files on the modem. A trailing NUL in a
    /// credential buffer is not part of the payload and is stripped (the
    /// host convention is NUL-terminated PEM buffers).
    pub async fn socket_tls(
        &self,
        id: usize,
        cacert: Option<&[u8]>,
        clicert: Option<&[u8]>,
        prvkey: Option<&[u8]>,
        auth: TlsAuth,
    ) -> Result<(), Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let _lock = entry.lock.lock().await;

        // SSL context number = socket index.
        let ctx = id;

        self.ssl_cfg_int(ctx, "sslversion", 3).await?; // TLS 1.2
        self.ssl_cfg_hex(ctx, "ciphersuite", 0xFFFF).await?; // all secure suites

        if let Some(cred) = nonempty(cacert) {
            let name = cert_name("cacert", id)?;
            self.upload_credential(&name, cred).await?;
            self.ssl_cfg_file(ctx, "cacert", &name).await?;
        }
        if let Some(cred) = nonempty(clicert) {
            let name = cert_name("clicrt", id)?;
            self.upload_credential(&name, cred).await?;
            self.ssl_cfg_file(ctx, "clientcert", &name).await?;
        }
        if let Some(cred) = nonempty(prvkey) {
            let name = cert_name("prvkey", id)?;
            self.upload_credential(&name, cred).await?;
            self.ssl_cfg_file(ctx, "clientkey", &name).await?;
        }

        self.ssl_cfg_int(ctx, "seclevel", auth as i32).await?;
        self.ssl_cfg_int(ctx, "ignorelocaltime", 1).await?;
        Ok(())
    }

    /// Replace one credential file: delete any previous copy, then
    /// `+QFUPL` the new content through buffer mode.
    async fn upload_credential(&self, name: &str, content: &[u8]) -> Result<(), Error> {
        // The delete may fail when the file does not exist yet.
        let guard = self.mux.acquire(CmdId::Qfdel, timing::BASE, 0).await;
        self.mux
            .send_at(CmdId::Qfdel, format_args!("=\"{}\"", name))
            .await?;
        guard.wait().await;
        drop(guard);

        let guard = self.mux.acquire(CmdId::Qfupl, timing::FILE_UPLOAD, 1).await;
        self.mux
            .send_at(
                CmdId::Qfupl,
                format_args!("=\"{}\",{},5,0", name, content.len()),
            )
            .await?;
        // `CONNECT` switches the wire to a binary stream.
        self.mux.wait_for_buffer_mode().await?;
        self.mux.exit_buffer_mode_write(content).await?;
        guard.wait_ok().await.map_err(|_| Error::Io)
    }

    async fn ssl_cfg_int(&self, ctx: usize, item: &str, value: i32) -> Result<(), Error> {
        let guard = self.mux.acquire(CmdId::Qsslcfg, timing::NETWORK_QUERY, 0).await;
        self.mux
            .send_at(
                CmdId::Qsslcfg,
                format_args!("=\"{}\",{},{}", item, ctx, value),
            )
            .await?;
        guard.wait_ok().await.map_err(|_| Error::Io)
    }

    async fn ssl_cfg_hex(&self, ctx: usize, item: &str, value: u32) -> Result<(), Error> {
        let guard = self.mux.acquire(CmdId::Qsslcfg, timing::NETWORK_QUERY, 0).await;
        self.mux
            .send_at(
                CmdId::Qsslcfg,
                format_args!("=\"{}\",{},0x{:X}", item, ctx, value),
            )
            .await?;
        guard.wait_ok().await.map_err(|_| Error::Io)
    }

    async fn ssl_cfg_file(&self, ctx: usize, item: &str, name: &str) -> Result<(), Error> {
        let guard = self.mux.acquire(CmdId::Qsslcfg, timing::NETWORK_QUERY, 0).await;
        self.mux
            .send_at(
                CmdId::Qsslcfg,
                format_args!("=\"{}\",{},\"{}\"", item, ctx, name),
            )
            .await?;
        guard.wait_ok().await.map_err(|_| Error::Io)
    }
}

fn nonempty(cred: Option<&[u8]>) -> Option<&[u8]> {
    let cred = cred?;
    let cred = cred.strip_suffix(&[0]).unwrap_or(cred);
    if cred.is_empty() {
        None
    } else {
        Some(cred)
    }
}

fn cert_name(stem: &str, id: usize) -> Result<String<12>, Error> {
    let mut name = String::new();
    write!(&mut name, "{}{}.pem", stem, id).map_err(|_| Error::InvalidParam)?;
    Ok(name)
}
