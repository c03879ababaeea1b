//! Timeout budgets, from the module's AT command manual plus field-proven
//! margins.

use embassy_time::Duration;

/// Reader-loop line poll in NORMAL mode.
pub const LINE_POLL: Duration = Duration::from_millis(100);

/// Reader-loop sleep while quiesced (`talking == false`).
pub const QUIESCENT_POLL: Duration = Duration::from_millis(500);

/// Default slot budget for quick commands.
pub const BASE: Duration = Duration::from_secs(1);

/// Registration queries (`+CREG?` family).
pub const NETWORK_QUERY: Duration = Duration::from_secs(5);

/// Socket data transfers and closes (`+QISEND`, `+QIRD`, `+QICLOSE`, ...).
pub const SOCKET_OP: Duration = Duration::from_secs(10);

/// Credential file upload (`+QFUPL`).
pub const FILE_UPLOAD: Duration = Duration::from_secs(60);

/// SMS submission (`+CMGS`) and listing (`+CMGL`).
pub const SMS_OP: Duration = Duration::from_secs(60);

/// DNS query slot (`+QIDNSGIP`); the URCs come later.
pub const DNS_SLOT: Duration = Duration::from_secs(60);

/// Network-changing commands: `+COPS`, `+CGATT`, `+QIACT`, `+QIDEACT`,
/// `+QIOPEN`, `+QSSLOPEN`.
pub const NETWORK_OP: Duration = Duration::from_secs(180);

/// Window for the asynchronous `+QIOPEN`/`+QSSLOPEN` result URC.
pub const CONNECT_WINDOW: Duration = Duration::from_secs(150);

/// Poll interval while waiting for the connect/bind URC.
pub const CONNECT_POLL: Duration = Duration::from_millis(100);

/// Prompt/buffer mode must be entered within this long.
pub const MODE_ENTRY: Duration = Duration::from_secs(10);

/// Ceiling on one blocking wait for socket data; keepalive probing runs
/// when it expires.
pub const RX_WAIT: Duration = Duration::from_secs(30);

/// The DNS URC sequence must complete within this long.
pub const DNS_WAIT: Duration = Duration::from_secs(15);

/// Outstanding unacknowledged bytes beyond which a TCP peer is declared
/// dead by the keepalive probe.
pub const KEEPALIVE_MAX_UNACKED: i32 = 1500;

/// Startup: per-line wait while polling for `OK`.
pub const STARTUP_LINE: Duration = Duration::from_millis(500);

/// Startup: overall budget for SIM readiness and `+QINISTAT`.
pub const STARTUP_SIM: Duration = Duration::from_secs(10);
