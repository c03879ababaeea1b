/// Driver error, returned as a value to the calling task.
///
/// The reader loop never raises; failures it observes are recorded in the
/// command slot or on the affected socket and surface here on the next
/// client call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// An argument did not parse or does not fit the wire format. Returned
    /// before any modem interaction.
    InvalidParam,
    /// Argument outside the supported enumeration (only AF_INET, TCP or
    /// UDP).
    Unsupported,
    /// The modem failed to answer during the startup phase (auto-baud,
    /// SIM readiness, `+QINISTAT`).
    HardwareInit,
    /// A slot exceeded its timeout, prompt/buffer mode was never entered,
    /// a connect/bind URC was not seen within its window, or DNS did not
    /// resolve in time.
    Timeout,
    /// The command returned `ERROR`/`+CME ERROR`, a TLS configuration step
    /// failed, or the serial link misbehaved.
    Io,
    /// The socket-open URC reported a non-zero status.
    ConnectionRefused,
    /// Receive on a socket whose to-be-closed flag is set and whose ring
    /// buffer is drained.
    SocketClosed,
    /// A subsystem is not in a usable state (GNSS not running, RTC not
    /// synchronised).
    Runtime,
}

impl From<core::fmt::Error> for Error {
    fn from(_: core::fmt::Error) -> Self {
        Self::InvalidParam
    }
}

impl<E> From<embedded_io_async::ReadExactError<E>> for Error {
    fn from(_: embedded_io_async::ReadExactError<E>) -> Self {
        Self::Io
    }
}

impl From<embassy_time::TimeoutError> for Error {
    fn from(_: embassy_time::TimeoutError) -> Self {
        Self::Timeout
    }
}
