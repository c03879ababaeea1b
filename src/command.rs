//! Static AT command descriptor table.
//!
//! Every command the driver emits (and every unsolicited line it must
//! recognise) has one row here. The table is sorted by command body so the
//! reader can classify an incoming line with a binary search; a candidate
//! only matches when the byte right after the body is `:`, which keeps a
//! short body (`+QIRD`) from matching a longer command (`+QIDNSGIP` vs
//! `+QIDNSCFG` style collisions).

/// How the modem answers a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseKind {
    /// Zero or more `+CMD: ...` parameter lines, then `OK`.
    Ok,
    /// A single raw line (no `+CMD:` prefix) terminates the command on its
    /// own, e.g. `SEND OK` after `+QISEND`.
    Str,
    /// A raw line (no prefix) followed by `OK`, e.g. the bare IMEI digits
    /// returned by `+GSN`.
    StrOk,
}

/// Numeric command identifier.
///
/// Discriminants are the row indices of [`COMMANDS`]; the variants are
/// declared in the table's sort order so `COMMANDS[id as usize]` is the
/// descriptor lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CmdId {
    Cclk = 0,
    Cereg,
    Cfun,
    Cgatt,
    Cgdcont,
    Cgerep,
    Cgev,
    Cgreg,
    Cmee,
    Cmgd,
    Cmgf,
    Cmgl,
    Cmgr,
    Cmgs,
    Cmti,
    Cops,
    Cpms,
    Creg,
    Csca,
    Csq,
    Gsn,
    Qccid,
    Qcfg,
    Qeng,
    Qfdel,
    Qfupl,
    Qgps,
    Qgpscfg,
    Qgpsend,
    Qgpsloc,
    Qiact,
    Qiclose,
    Qicsgp,
    Qideact,
    Qidnscfg,
    Qidnsgip,
    Qind,
    Qiopen,
    Qird,
    Qisend,
    Qiurc,
    Qsslcfg,
    Qsslclose,
    Qsslopen,
    Qsslrecv,
    Qsslsend,
    Qsslurc,
}

/// One row of the descriptor table.
#[derive(Debug)]
pub struct Command {
    pub body: &'static str,
    pub kind: ResponseKind,
    pub urc: bool,
    pub id: CmdId,
}

const fn cmd(body: &'static str, kind: ResponseKind, urc: bool, id: CmdId) -> Command {
    Command {
        body,
        kind,
        urc,
        id,
    }
}

/// The descriptor table, sorted by `body` bytes.
pub static COMMANDS: &[Command] = &[
    cmd("+CCLK", ResponseKind::Ok, false, CmdId::Cclk),
    cmd("+CEREG", ResponseKind::Ok, true, CmdId::Cereg),
    cmd("+CFUN", ResponseKind::Ok, false, CmdId::Cfun),
    cmd("+CGATT", ResponseKind::Ok, false, CmdId::Cgatt),
    cmd("+CGDCONT", ResponseKind::Ok, false, CmdId::Cgdcont),
    cmd("+CGEREP", ResponseKind::Ok, false, CmdId::Cgerep),
    cmd("+CGEV", ResponseKind::Ok, true, CmdId::Cgev),
    cmd("+CGREG", ResponseKind::Ok, true, CmdId::Cgreg),
    cmd("+CMEE", ResponseKind::Ok, false, CmdId::Cmee),
    cmd("+CMGD", ResponseKind::Ok, false, CmdId::Cmgd),
    cmd("+CMGF", ResponseKind::Ok, false, CmdId::Cmgf),
    cmd("+CMGL", ResponseKind::Ok, false, CmdId::Cmgl),
    cmd("+CMGR", ResponseKind::Ok, false, CmdId::Cmgr),
    cmd("+CMGS", ResponseKind::Ok, false, CmdId::Cmgs),
    cmd("+CMTI", ResponseKind::Ok, true, CmdId::Cmti),
    cmd("+COPS", ResponseKind::Ok, false, CmdId::Cops),
    cmd("+CPMS", ResponseKind::Ok, false, CmdId::Cpms),
    cmd("+CREG", ResponseKind::Ok, true, CmdId::Creg),
    cmd("+CSCA", ResponseKind::Ok, false, CmdId::Csca),
    cmd("+CSQ", ResponseKind::Ok, false, CmdId::Csq),
    cmd("+GSN", ResponseKind::StrOk, false, CmdId::Gsn),
    cmd("+QCCID", ResponseKind::Ok, false, CmdId::Qccid),
    cmd("+QCFG", ResponseKind::Ok, false, CmdId::Qcfg),
    cmd("+QENG", ResponseKind::Ok, false, CmdId::Qeng),
    cmd("+QFDEL", ResponseKind::Ok, false, CmdId::Qfdel),
    cmd("+QFUPL", ResponseKind::Ok, false, CmdId::Qfupl),
    cmd("+QGPS", ResponseKind::Ok, false, CmdId::Qgps),
    cmd("+QGPSCFG", ResponseKind::Ok, false, CmdId::Qgpscfg),
    cmd("+QGPSEND", ResponseKind::Ok, false, CmdId::Qgpsend),
    cmd("+QGPSLOC", ResponseKind::Ok, false, CmdId::Qgpsloc),
    cmd("+QIACT", ResponseKind::Ok, false, CmdId::Qiact),
    cmd("+QICLOSE", ResponseKind::Ok, false, CmdId::Qiclose),
    cmd("+QICSGP", ResponseKind::Ok, false, CmdId::Qicsgp),
    cmd("+QIDEACT", ResponseKind::Ok, false, CmdId::Qideact),
    cmd("+QIDNSCFG", ResponseKind::Ok, false, CmdId::Qidnscfg),
    cmd("+QIDNSGIP", ResponseKind::Ok, false, CmdId::Qidnsgip),
    cmd("+QIND", ResponseKind::Ok, true, CmdId::Qind),
    cmd("+QIOPEN", ResponseKind::Ok, true, CmdId::Qiopen),
    cmd("+QIRD", ResponseKind::Ok, false, CmdId::Qird),
    cmd("+QISEND", ResponseKind::Str, false, CmdId::Qisend),
    cmd("+QIURC", ResponseKind::Ok, true, CmdId::Qiurc),
    cmd("+QSSLCFG", ResponseKind::Ok, false, CmdId::Qsslcfg),
    cmd("+QSSLCLOSE", ResponseKind::Ok, false, CmdId::Qsslclose),
    cmd("+QSSLOPEN", ResponseKind::Ok, true, CmdId::Qsslopen),
    cmd("+QSSLRECV", ResponseKind::Ok, false, CmdId::Qsslrecv),
    cmd("+QSSLSEND", ResponseKind::Str, false, CmdId::Qsslsend),
    cmd("+QSSLURC", ResponseKind::Ok, true, CmdId::Qsslurc),
];

impl CmdId {
    #[inline]
    pub fn command(self) -> &'static Command {
        &COMMANDS[self as usize]
    }

    /// Commands whose `>` prompt the reader may honour (send-payload set).
    pub fn takes_prompt(self) -> bool {
        matches!(self, CmdId::Qisend | CmdId::Qsslsend | CmdId::Cmgs)
    }

    /// Commands whose parameter line announces a binary payload that must
    /// be drained in buffer mode.
    pub fn reads_buffer(self) -> bool {
        matches!(self, CmdId::Qird | CmdId::Qsslrecv)
    }

    /// Commands answered by a header line plus a payload line per entry,
    /// iterated until `OK`.
    pub fn lists_messages(self) -> bool {
        matches!(self, CmdId::Cmgl | CmdId::Cmgr)
    }
}

/// Classify `line` against the descriptor table.
///
/// Binary search over the sorted bodies. A row whose body is a strict
/// prefix of the line only matches when the following byte is `:`;
/// otherwise the row is ordered *before* the line so the search keeps
/// moving towards the longer command.
pub fn lookup(line: &[u8]) -> Option<&'static Command> {
    let mut lo = 0usize;
    let mut hi = COMMANDS.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        let c = &COMMANDS[mid];
        let n = c.body.len();
        let body = c.body.as_bytes();
        let prefix = if line.len() >= n { &line[..n] } else { line };
        match prefix.cmp(body) {
            core::cmp::Ordering::Equal if line.len() > n && line[n] == b':' => return Some(c),
            // The body matched but is not followed by `:`; it is a prefix
            // of a longer command, so it sorts before the line.
            core::cmp::Ordering::Equal => lo = mid + 1,
            core::cmp::Ordering::Greater => lo = mid + 1,
            core::cmp::Ordering::Less => hi = mid,
        }
    }
    None
}
