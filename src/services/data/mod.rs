//! BSD-style socket operations over `+QIOPEN`/`+QIRD`/`+QISEND` and their
//! SSL siblings.

pub mod tls;

use core::future::poll_fn;
use core::task::Poll;

use embassy_time::{with_timeout, Duration, Instant, Timer};
use embedded_io_async::{Read, Write};
use heapless::String;

use crate::command::CmdId;
use crate::error::Error;
use crate::mux::DNS_ADDR_LEN;
use crate::parser::Args;
use crate::socket::{ConnectState, Protocol, MAX_SOCKETS, SOCKET_CHUNK};
use crate::timing;
use crate::Device;

/// A resolved address, dotted-quad text as the modem reports it.
pub type ResolvedAddr = String<DNS_ADDR_LEN>;

impl<'a, R: Read, W: Write> Device<'a, R, W> {
    /// Claim a socket slot. The modem's connect-id equals the returned
    /// index. Secure sockets are TCP only.
    pub async fn socket(&self, proto: Protocol, secure: bool) -> Result<usize, Error> {
        if secure && proto != Protocol::Tcp {
            return Err(Error::Unsupported);
        }
        if self.network_lost() {
            return Err(Error::Io);
        }
        for id in 0..MAX_SOCKETS {
            let entry = self.mux.sockets.get(id).ok_or(Error::Io)?;
            let (acquired, stale) = entry.with(|s| (s.acquired, s.to_be_closed));
            if acquired {
                continue;
            }
            if stale {
                // The peer closed it while unused; tell the modem so the
                // connect-id is really free again.
                self.close_on_modem(id).await.ok();
            }
            entry.with(|s| {
                s.acquired = true;
                s.proto = proto;
                s.secure = secure;
                s.connected = ConnectState::Idle;
                s.bound = false;
                s.to_be_closed = false;
                s.urc_pending = false;
                s.timeout = None;
                s.rx_buf.clear();
            });
            entry.rx_event.reset();
            return Ok(id);
        }
        Err(Error::Io)
    }

    /// Open a connection. The `+QIOPEN`/`+QSSLOPEN` result is a URC; the
    /// connected flag is polled at 100 ms for up to the 150 s URC window.
    pub async fn connect(&self, id: usize, host: &str, port: u16) -> Result<(), Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let _lock = entry.lock.lock().await;

        let (proto, secure) = entry.with(|s| (s.proto, s.secure));
        let profile = self.config.profile;

        let issued = async {
            if secure {
                let guard = self
                    .mux
                    .acquire(CmdId::Qsslopen, timing::NETWORK_OP, 0)
                    .await;
                self.mux
                    .send_at(
                        CmdId::Qsslopen,
                        format_args!("={},{},{},\"{}\",{}", profile, id, id, host, port),
                    )
                    .await?;
                guard.wait_ok().await
            } else {
                let service = match proto {
                    Protocol::Tcp => "TCP",
                    Protocol::Udp => "UDP",
                };
                let guard = self.mux.acquire(CmdId::Qiopen, timing::NETWORK_OP, 0).await;
                self.mux
                    .send_at(
                        CmdId::Qiopen,
                        format_args!("={},{},\"{}\",\"{}\",{},0,0", profile, id, service, host, port),
                    )
                    .await?;
                guard.wait_ok().await
            }
        }
        .await;

        if issued.is_err() {
            entry.with(|s| s.acquired = false);
            return Err(Error::Io);
        }

        self.await_open_urc(id).await
    }

    /// Bind a UDP socket to a local port (`"UDP SERVICE"` open).
    pub async fn bind(&self, id: usize, port: u16) -> Result<(), Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let _lock = entry.lock.lock().await;

        if entry.with(|s| s.proto) != Protocol::Udp {
            return Err(Error::Unsupported);
        }
        let profile = self.config.profile;

        let guard = self.mux.acquire(CmdId::Qiopen, timing::NETWORK_OP, 0).await;
        let issued = async {
            self.mux
                .send_at(
                    CmdId::Qiopen,
                    format_args!(
                        "={},{},\"UDP SERVICE\",\"127.0.0.1\",0,{},0",
                        profile, id, port
                    ),
                )
                .await?;
            guard.wait_ok().await
        }
        .await;
        drop(guard);

        if issued.is_err() {
            entry.with(|s| s.acquired = false);
            return Err(Error::Io);
        }

        self.await_open_urc(id).await?;
        entry.with(|s| s.bound = true);
        Ok(())
    }

    /// Poll the connected flag while the open URC window runs.
    async fn await_open_urc(&self, id: usize) -> Result<(), Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let deadline = Instant::now() + timing::CONNECT_WINDOW;
        loop {
            match entry.with(|s| s.connected) {
                ConnectState::Connected => return Ok(()),
                ConnectState::Failed => {
                    entry.with(|s| s.acquired = false);
                    return Err(Error::ConnectionRefused);
                }
                ConnectState::Idle => {}
            }
            if Instant::now() >= deadline {
                entry.with(|s| s.acquired = false);
                return Err(Error::Timeout);
            }
            Timer::after(timing::CONNECT_POLL).await;
        }
    }

    /// Send on a connected socket. May send fewer bytes than offered
    /// (one AT transfer's worth); returns 0 when the modem's send buffer
    /// is full and the caller should retry.
    pub async fn send(&self, id: usize, buf: &[u8]) -> Result<usize, Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let _lock = entry.lock.lock().await;

        if entry.with(|s| s.to_be_closed) {
            return Err(Error::SocketClosed);
        }
        if self.network_lost() {
            entry.with(|s| s.to_be_closed = true);
            return Err(Error::Io);
        }

        let len = buf.len().min(SOCKET_CHUNK);
        let secure = entry.with(|s| s.secure);
        let cmd = if secure {
            CmdId::Qsslsend
        } else {
            CmdId::Qisend
        };

        let guard = self.mux.acquire(cmd, timing::SOCKET_OP, 0).await;
        self.mux
            .send_at(cmd, format_args!("={},{}", id, len))
            .await?;
        let prompted = self.mux.wait_for_prompt_mode(&buf[..len], None).await;

        let outcome = guard.wait_ok().await;
        match (prompted, outcome) {
            (Ok(()), Ok(())) => {
                if guard.with_response(|r| r.starts_with(b"SEND FAIL")) {
                    // Modem-side buffer full; not fatal.
                    Ok(0)
                } else {
                    Ok(len)
                }
            }
            _ => {
                entry.with(|s| s.to_be_closed = true);
                entry.rx_event.signal(());
                Err(outcome.err().unwrap_or(Error::Timeout))
            }
        }
    }

    /// UDP sendto with an explicit destination.
    pub async fn sendto(&self, id: usize, buf: &[u8], host: &str, port: u16) -> Result<usize, Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let _lock = entry.lock.lock().await;

        if entry.with(|s| s.to_be_closed) {
            return Err(Error::SocketClosed);
        }
        if entry.with(|s| s.proto) != Protocol::Udp {
            return Err(Error::Unsupported);
        }
        if self.network_lost() {
            entry.with(|s| s.to_be_closed = true);
            return Err(Error::Io);
        }

        let len = buf.len().min(SOCKET_CHUNK);
        let guard = self.mux.acquire(CmdId::Qisend, timing::SOCKET_OP, 0).await;
        self.mux
            .send_at(
                CmdId::Qisend,
                format_args!("={},{},\"{}\",{}", id, len, host, port),
            )
            .await?;
        let prompted = self.mux.wait_for_prompt_mode(&buf[..len], None).await;

        let outcome = guard.wait_ok().await;
        match (prompted, outcome) {
            (Ok(()), Ok(())) => {
                if guard.with_response(|r| r.starts_with(b"SEND FAIL")) {
                    Ok(0)
                } else {
                    Ok(len)
                }
            }
            _ => {
                entry.with(|s| s.to_be_closed = true);
                entry.rx_event.signal(());
                Err(outcome.err().unwrap_or(Error::Timeout))
            }
        }
    }

    /// Per-socket receive timeout (the `SO_RCVTIMEO` socket option).
    /// `None` blocks indefinitely; `Some(0)` makes receives non-blocking.
    pub fn set_recv_timeout(&self, id: usize, timeout: Option<Duration>) -> Result<(), Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        entry.with(|s| s.timeout = timeout);
        Ok(())
    }

    pub fn recv_timeout(&self, id: usize) -> Result<Option<Duration>, Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        Ok(entry.with(|s| s.timeout))
    }

    /// Blocking receive: ring buffer first, then the modem; waits on the
    /// rx event (30 s slices with keepalive probing) while no data is
    /// queued anywhere, up to the socket's receive timeout if one is set.
    pub async fn recv(&self, id: usize, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let deadline = entry
            .with(|s| s.timeout)
            .map(|t| Instant::now() + t);
        loop {
            {
                let _lock = entry.lock.lock().await;

                let drained = entry.with(|s| s.rx_buf.dequeue_slice(buf));
                if drained > 0 {
                    if entry.with(|s| !s.rx_buf.is_empty()) {
                        // Leftovers for the next receiver.
                        entry.rx_event.signal(());
                        self.mux.select_event.signal(());
                    }
                    return Ok(drained);
                }

                if entry.with(|s| s.to_be_closed) {
                    return Err(Error::SocketClosed);
                }

                let avail = self.available_locked(id).await?;
                entry.with(|s| s.urc_pending = false);
                if avail > 0 {
                    let secure = entry.with(|s| s.secure);
                    if secure {
                        // The availability peek already routed the bytes
                        // through the ring.
                        let n = entry.with(|s| s.rx_buf.dequeue_slice(buf));
                        if n > 0 {
                            return Ok(n);
                        }
                    } else {
                        let n = self.read_from_modem(id, buf, avail).await?;
                        if n > 0 {
                            return Ok(n);
                        }
                    }
                }
            }

            // Nothing queued; wait for the data-arrived event, probing the
            // connection each time the wait ceiling expires.
            let mut slice = timing::RX_WAIT;
            if let Some(d) = deadline {
                let now = Instant::now();
                if now >= d {
                    return Err(Error::Timeout);
                }
                slice = slice.min(d - now);
            }
            if with_timeout(slice, entry.rx_event.wait()).await.is_err() {
                if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                    return Err(Error::Timeout);
                }
                if !self.is_alive(id).await || self.network_lost() {
                    entry.with(|s| s.to_be_closed = true);
                }
            }
        }
    }

    /// One `+QIRD`/`+QSSLRECV` transfer while the socket lock is held.
    /// Overflow beyond `buf` lands in the ring buffer (TCP) or is
    /// discarded (UDP datagram tail).
    async fn read_from_modem(&self, id: usize, buf: &mut [u8], avail: usize) -> Result<usize, Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let (secure, proto) = entry.with(|s| (s.secure, s.proto));
        let trec = buf.len().min(SOCKET_CHUNK).min(avail);
        let cmd = if secure {
            CmdId::Qsslrecv
        } else {
            CmdId::Qird
        };

        let guard = self.mux.acquire(cmd, timing::SOCKET_OP, 1).await;
        self.mux
            .send_at(cmd, format_args!("={},{}", id, trec))
            .await?;
        if self.mux.wait_for_buffer_mode().await.is_err() {
            guard.wait().await;
            return Err(Error::Timeout);
        }

        let advertised = guard.with_response(|r| Args::new(r).int());
        let n = match advertised {
            Some(rd) if rd >= 0 => {
                let rd = rd as usize;
                let take = rd.min(buf.len());
                let sink = match proto {
                    Protocol::Tcp => Some(id),
                    Protocol::Udp => None,
                };
                self.mux
                    .exit_buffer_mode_read(&mut buf[..take], rd, sink)
                    .await?
            }
            _ => {
                self.mux.exit_buffer_mode_read(&mut [0u8; 0][..], 0, None).await?;
                return Err(Error::Io);
            }
        };
        guard.wait_ok().await?;
        drop(guard);

        if proto == Protocol::Udp {
            // Datagram reads are atomic; drop any tail.
            entry.with(|s| s.rx_buf.clear());
        } else if n == trec && trec > 0 {
            // More may be advertised; let another receiver look.
            entry.rx_event.signal(());
            self.mux.select_event.signal(());
        }
        Ok(n)
    }

    /// UDP receive with source address, one datagram per call.
    pub async fn recvfrom(
        &self,
        id: usize,
        buf: &mut [u8],
    ) -> Result<(usize, ResolvedAddr, u16), Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        if entry.with(|s| s.proto) != Protocol::Udp {
            return Err(Error::Unsupported);
        }
        let deadline = entry
            .with(|s| s.timeout)
            .map(|t| Instant::now() + t);
        loop {
            {
                let _lock = entry.lock.lock().await;

                if entry.with(|s| s.to_be_closed) {
                    return Err(Error::SocketClosed);
                }

                let guard = self.mux.acquire(CmdId::Qird, timing::SOCKET_OP, 1).await;
                self.mux.send_at(CmdId::Qird, format_args!("={}", id)).await?;
                if self.mux.wait_for_buffer_mode().await.is_err() {
                    guard.wait().await;
                    return Err(Error::Timeout);
                }

                let header = guard.with_response(|r| {
                    let mut a = Args::new(r);
                    let rd = a.int()?;
                    let addr = a.quoted().and_then(|ip| {
                        core::str::from_utf8(ip)
                            .ok()
                            .and_then(|s| ResolvedAddr::try_from(s).ok())
                    });
                    let port = a.int();
                    Some((rd, addr, port))
                });

                let result = match header {
                    Some((rd, Some(addr), Some(port))) if rd > 0 => {
                        let rd = rd as usize;
                        let take = rd.min(buf.len());
                        let n = self
                            .mux
                            .exit_buffer_mode_read(&mut buf[..take], rd, None)
                            .await?;
                        entry.with(|s| s.urc_pending = false);
                        Some((n, addr, port as u16))
                    }
                    Some((0, _, _)) => {
                        self.mux.exit_buffer_mode_read(&mut [0u8; 0][..], 0, None).await?;
                        entry.with(|s| s.urc_pending = false);
                        None
                    }
                    _ => {
                        self.mux.exit_buffer_mode_read(&mut [0u8; 0][..], 0, None).await?;
                        guard.wait().await;
                        return Err(Error::Io);
                    }
                };
                guard.wait_ok().await?;

                if let Some(tuple) = result {
                    return Ok(tuple);
                }
            }

            let mut slice = timing::RX_WAIT;
            if let Some(d) = deadline {
                let now = Instant::now();
                if now >= d {
                    return Err(Error::Timeout);
                }
                slice = slice.min(d - now);
            }
            if with_timeout(slice, entry.rx_event.wait()).await.is_err() {
                if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                    return Err(Error::Timeout);
                }
                if self.network_lost() {
                    entry.with(|s| s.to_be_closed = true);
                }
            }
        }
    }

    /// Bytes readable right now (ring buffer plus modem-side queue).
    pub async fn available(&self, id: usize) -> Result<usize, Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let _lock = entry.lock.lock().await;
        self.available_locked(id).await
    }

    /// Availability query with the socket lock already held.
    ///
    /// TCP non-secure asks with the zero-length `+QIRD` form. The secure
    /// path has no such form; it peeks with a full-size `+QSSLRECV`,
    /// parks the bytes in the ring and reports the ring length.
    async fn available_locked(&self, id: usize) -> Result<usize, Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let buffered = entry.with(|s| s.rx_buf.len());
        if buffered > 0 {
            return Ok(buffered);
        }
        if entry.with(|s| s.to_be_closed) {
            return Ok(0);
        }
        let secure = entry.with(|s| s.secure);

        if secure {
            let guard = self
                .mux
                .acquire(CmdId::Qsslrecv, timing::SOCKET_OP, 1)
                .await;
            self.mux
                .send_at(CmdId::Qsslrecv, format_args!("={},{}", id, SOCKET_CHUNK))
                .await?;
            if self.mux.wait_for_buffer_mode().await.is_err() {
                guard.wait().await;
                return Err(Error::Timeout);
            }
            let rd = guard
                .with_response(|r| Args::new(r).int())
                .unwrap_or(0)
                .max(0) as usize;
            self.mux
                .exit_buffer_mode_read(&mut [0u8; 0][..], rd, Some(id))
                .await?;
            guard.wait_ok().await?;
            Ok(entry.with(|s| s.rx_buf.len()))
        } else {
            let guard = self.mux.acquire(CmdId::Qird, timing::SOCKET_OP, 1).await;
            self.mux
                .send_at(CmdId::Qird, format_args!("={},0", id))
                .await?;
            if self.mux.wait_for_buffer_mode().await.is_err() {
                guard.wait().await;
                return Err(Error::Timeout);
            }
            let unread = guard.with_response(|r| {
                let mut a = Args::new(r);
                let _total = a.int()?;
                let _read = a.int()?;
                a.int()
            });
            self.mux.exit_buffer_mode_read(&mut [0u8; 0][..], 0, None).await?;
            guard.wait_ok().await?;
            unread.map(|n| n.max(0) as usize).ok_or(Error::Io)
        }
    }

    /// Close a socket. Idempotent: closing an unacquired index succeeds.
    pub async fn close(&self, id: usize) -> Result<(), Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let _lock = entry.lock.lock().await;
        if !entry.with(|s| s.acquired) {
            return Ok(());
        }
        self.close_on_modem(id).await.ok();
        entry.with(|s| {
            s.acquired = false;
            s.to_be_closed = false;
            s.rx_buf.clear();
        });
        // Blocked receivers wake and observe the closure.
        entry.rx_event.signal(());
        self.mux.select_event.signal(());
        Ok(())
    }

    /// `shutdown` carries no half-close on this modem; it is a close.
    pub async fn shutdown(&self, id: usize) -> Result<(), Error> {
        self.close(id).await
    }

    /// Issue `+QICLOSE`/`+QSSLCLOSE` with the 10-second graceful deadline.
    async fn close_on_modem(&self, id: usize) -> Result<(), Error> {
        let entry = self.mux.sockets.get(id).ok_or(Error::InvalidParam)?;
        let secure = entry.with(|s| s.secure);
        let cmd = if secure {
            CmdId::Qsslclose
        } else {
            CmdId::Qiclose
        };
        let guard = self.mux.acquire(cmd, timing::SOCKET_OP, 0).await;
        self.mux.send_at(cmd, format_args!("={},10", id)).await?;
        guard.wait_ok().await
    }

    /// TCP keepalive probe: `+QISEND=<id>,0` reports
    /// `(total, acked, unacked)`; more than 1500 unacknowledged bytes
    /// declares the peer dead. Secure sockets cannot be probed and are
    /// assumed alive.
    pub(crate) async fn is_alive(&self, id: usize) -> bool {
        let Some(entry) = self.mux.sockets.get(id) else {
            return false;
        };
        let (secure, proto) = entry.with(|s| (s.secure, s.proto));
        if secure || proto == Protocol::Udp {
            return true;
        }
        let guard = self.mux.acquire(CmdId::Qisend, timing::SOCKET_OP, 1).await;
        if self
            .mux
            .send_at(CmdId::Qisend, format_args!("={},0", id))
            .await
            .is_err()
        {
            return false;
        }
        if guard.wait_ok().await.is_err() {
            return false;
        }
        let unacked = guard.with_response(|r| {
            let mut a = Args::new(r);
            let _total = a.int()?;
            let _acked = a.int()?;
            a.int()
        });
        match unacked {
            Some(u) => u <= timing::KEEPALIVE_MAX_UNACKED,
            None => false,
        }
    }

    /// Wait until any socket in `read_mask` is readable (queued bytes,
    /// pending data URC, or remote closure). Returns the ready mask; an
    /// expired timeout returns 0.
    pub async fn select(&self, read_mask: u8, timeout: Option<Duration>) -> Result<u8, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let mut ready = 0u8;
            for (id, entry) in self.mux.sockets.iter() {
                if read_mask & (1 << id) != 0 && entry.with(|s| s.readable()) {
                    ready |= 1 << id;
                }
            }
            if ready != 0 {
                return Ok(ready);
            }
            match deadline {
                None => self.mux.select_event.wait().await,
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(0);
                    }
                    if with_timeout(d - now, self.mux.select_event.wait())
                        .await
                        .is_err()
                    {
                        return Ok(0);
                    }
                }
            }
        }
    }

    /// Resolve a host name (`+QIDNSGIP`). One resolution in flight at a
    /// time; the answer is the first address the URC sequence carries.
    pub async fn resolve(&self, host: &str) -> Result<ResolvedAddr, Error> {
        let _dns = self.mux.dns_lock.lock().await;
        self.mux.with_shared(|s| s.dns.reset());

        let guard = self.mux.acquire(CmdId::Qidnsgip, timing::DNS_SLOT, 0).await;
        self.mux
            .send_at(
                CmdId::Qidnsgip,
                format_args!("={},\"{}\"", self.config.profile, host),
            )
            .await?;
        guard.wait_ok().await?;
        drop(guard);

        with_timeout(
            timing::DNS_WAIT,
            poll_fn(|cx| {
                self.mux.with_shared(|s| {
                    s.dns_waker.register(cx.waker());
                    if s.dns.ready {
                        Poll::Ready(())
                    } else {
                        Poll::Pending
                    }
                })
            }),
        )
        .await
        .map_err(|_| Error::Timeout)?;

        self.mux.with_shared(|s| {
            if s.dns.addr.is_empty() {
                return Err(Error::Io);
            }
            let text = core::str::from_utf8(&s.dns.addr).map_err(|_| Error::Io)?;
            ResolvedAddr::try_from(text).map_err(|_| Error::Io)
        })
    }

    /// The unregistered-too-long predicate: after 60 s without network,
    /// new sockets and sends are refused.
    pub(crate) fn network_lost(&self) -> bool {
        self.mux
            .with_shared(|s| s.reg.unregistered_too_long(Instant::now()))
    }
}
