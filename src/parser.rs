//! Serial line framing and response-line parsing.
//!
//! The reader loop frames CR/LF lines into an accumulator and classifies
//! them; the argument extractor yields typed values as slices into that
//! accumulator, so a line must be fully parsed before the next read.

use embedded_io_async::Read;
use heapless::Vec;

use crate::error::Error;

/// Line accumulator capacity. Must hold the longest response line the
/// modem produces (the `+COPS=?` operator listing).
pub const MAX_LINE: usize = 1024;

pub type LineBuf = Vec<u8, MAX_LINE>;

/// Read one CR/LF-terminated line into `buf`.
///
/// `buf` is cleared first; whatever has accumulated when the caller's
/// timeout cancels this future stays in `buf` (that is how the `>` prompt,
/// which never gets a line terminator, is detected).
pub async fn read_line<R: Read>(rx: &mut R, buf: &mut LineBuf) -> Result<(), Error> {
    buf.clear();
    let mut byte = [0u8; 1];
    loop {
        match rx.read(&mut byte).await {
            Ok(1..) => {}
            _ => return Err(Error::Io),
        }
        // A full accumulator is handed over as-is rather than silently
        // dropping bytes.
        if buf.push(byte[0]).is_err() {
            return Ok(());
        }
        if byte[0] == b'\n' {
            return Ok(());
        }
    }
}

/// Exactly `OK\r\n`; `OKAY...` does not qualify.
pub fn is_ok(line: &[u8]) -> bool {
    line.len() >= 4 && &line[..4] == b"OK\r\n"
}

pub fn is_rdy(line: &[u8]) -> bool {
    line.len() >= 5 && &line[..5] == b"RDY\r\n"
}

/// `ERROR` or `+CME ERROR: <msg>`. For the latter the message (up to the
/// scratch capacity) is returned for the last-error record.
pub fn check_error(line: &[u8]) -> Option<&[u8]> {
    if line.len() >= 12 && &line[..12] == b"+CME ERROR: " {
        let msg = &line[12..];
        let msg = msg.strip_suffix(b"\r\n").unwrap_or(msg);
        Some(msg)
    } else if line.len() >= 5 && &line[..5] == b"ERROR" {
        Some(&[])
    } else {
        None
    }
}

/// Strip one layer of double quotes, if present.
pub fn unquote(s: &[u8]) -> &[u8] {
    if s.len() >= 2 && s[0] == b'"' && s[s.len() - 1] == b'"' {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Parse a decimal integer. Spaces and CR/LF between digits are skipped,
/// a single leading `-` is honoured, anything else fails.
pub fn parse_decimal(s: &[u8]) -> Option<i32> {
    let mut val: i32 = 0;
    let mut seen = false;
    let mut neg = false;
    for (i, &b) in s.iter().enumerate() {
        match b {
            b'-' if i == 0 => neg = true,
            b'0'..=b'9' => {
                val = val.checked_mul(10)?.checked_add((b - b'0') as i32)?;
                seen = true;
            }
            b' ' | b'\r' | b'\n' => {}
            _ => return None,
        }
    }
    if !seen {
        return None;
    }
    Some(if neg { -val } else { val })
}

/// Typed extractor over a comma/CRLF-delimited argument sequence.
///
/// Two element kinds: decimal integers and strings. Strings are not
/// copied; [`Args::str`] yields a subslice of the underlying line. Commas
/// inside double quotes do *not* delimit (`+CCLK`/`+CMGL` timestamps carry
/// one), mirroring how the rest of the line is laid out on the wire.
pub struct Args<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Args<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn next_raw(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let start = self.pos;
        let mut quoted = false;
        let mut end = self.buf.len();
        for i in start..self.buf.len() {
            match self.buf[i] {
                b'"' => quoted = !quoted,
                b',' | b'\r' | b'\n' if !quoted => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }
        // Consume the delimiter; a CR/LF run ends the sequence.
        self.pos = if end < self.buf.len() && self.buf[end] == b',' {
            end + 1
        } else {
            self.buf.len()
        };
        if end == start && self.pos >= self.buf.len() {
            return None;
        }
        Some(&self.buf[start..end])
    }

    /// Next element as a decimal integer.
    pub fn int(&mut self) -> Option<i32> {
        parse_decimal(self.next_raw()?)
    }

    /// Next element as a raw string slice (quotes included, if any).
    pub fn str(&mut self) -> Option<&'a [u8]> {
        self.next_raw()
    }

    /// Next element with quotes stripped.
    pub fn quoted(&mut self) -> Option<&'a [u8]> {
        self.next_raw().map(unquote)
    }

    /// Skip one element.
    pub fn skip(&mut self) -> &mut Self {
        let _ = self.next_raw();
        self
    }
}

/// Locate the argument bytes of a `+CMD: args...` line: the command body
/// must be followed by `: `.
pub fn response_args<'a>(line: &'a [u8], body: &[u8]) -> Option<&'a [u8]> {
    let n = body.len();
    if line.len() >= n + 2 && line[n] == b':' && line[n + 1] == b' ' {
        Some(&line[n + 2..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_is_exact() {
        assert!(is_ok(b"OK\r\n"));
        assert!(!is_ok(b"OKAY\r\n"));
        assert!(!is_ok(b"OK"));
        assert!(!is_ok(b"ok\r\n"));
    }

    #[test]
    fn error_lines() {
        assert_eq!(check_error(b"ERROR\r\n"), Some(&b""[..]));
        assert_eq!(
            check_error(b"+CME ERROR: SIM not inserted\r\n"),
            Some(&b"SIM not inserted"[..])
        );
        assert_eq!(check_error(b"+CMS ERROR: 321\r\n"), None);
        assert_eq!(check_error(b"OK\r\n"), None);
    }

    #[test]
    fn decimal_allows_spaces_between_digits() {
        assert_eq!(parse_decimal(b"33 44"), Some(3344));
        assert_eq!(parse_decimal(b"0003"), Some(3));
        assert_eq!(parse_decimal(b"-12"), Some(-12));
        assert_eq!(parse_decimal(b"12x"), None);
        assert_eq!(parse_decimal(b""), None);
    }

    #[test]
    fn extractor_ints_and_strings() {
        let line = b"1,0,\"TCP\",\"1.2.3.4\",80\r\n";
        let mut args = Args::new(line);
        assert_eq!(args.int(), Some(1));
        assert_eq!(args.int(), Some(0));
        assert_eq!(args.str(), Some(&b"\"TCP\""[..]));
        assert_eq!(args.quoted(), Some(&b"1.2.3.4"[..]));
        assert_eq!(args.int(), Some(80));
        assert_eq!(args.int(), None);
    }

    #[test]
    fn extractor_keeps_quoted_commas_whole() {
        let line = b"2,\"REC UNREAD\",\"+391234\",,\"24/07/30,10:41:21+08\"\r\n";
        let mut args = Args::new(line);
        assert_eq!(args.int(), Some(2));
        assert_eq!(args.quoted(), Some(&b"REC UNREAD"[..]));
        assert_eq!(args.quoted(), Some(&b"+391234"[..]));
        assert_eq!(args.str(), Some(&b""[..]));
        assert_eq!(args.quoted(), Some(&b"24/07/30,10:41:21+08"[..]));
    }

    #[test]
    fn response_args_requires_colon_space() {
        assert_eq!(
            response_args(b"+QIRD: 10,2,8\r\n", b"+QIRD"),
            Some(&b"10,2,8\r\n"[..])
        );
        assert_eq!(response_args(b"+QIRD:10\r\n", b"+QIRD"), None);
        assert_eq!(response_args(b"+QIRD\r\n", b"+QIRD"), None);
    }

    /// `parse(format, serialize(format, ...))` is the identity for the
    /// integer/string element kinds used on the wire.
    #[test]
    fn argument_round_trip() {
        let mut line: heapless::String<64> = heapless::String::new();
        core::fmt::write(
            &mut line,
            format_args!("{},{},\"{}\",{}", 1, -7, "example.com", 8080),
        )
        .unwrap();
        let mut args = Args::new(line.as_bytes());
        assert_eq!(args.int(), Some(1));
        assert_eq!(args.int(), Some(-7));
        assert_eq!(args.quoted(), Some(&b"example.com"[..]));
        assert_eq!(args.int(), Some(8080));
    }
}
