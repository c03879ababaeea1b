//! Real-time clock, network-synchronised.

use embedded_io_async::{Read, Write};

use crate::command::CmdId;
use crate::error::Error;
use crate::timing;
use crate::Device;

/// Wall-clock time as reported by `+CCLK?`. Always UTC-referenced local
/// time with the zone offset alongside.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Offset from GMT in minutes. The modem encodes quarter-hours;
    /// the driver multiplies by 15.
    pub tz_minutes: i16,
}

impl<'a, R: Read, W: Write> Device<'a, R, W> {
    /// Read the module RTC.
    pub async fn rtc(&self) -> Result<DateTime, Error> {
        let guard = self.mux.acquire(CmdId::Cclk, timing::BASE, 1).await;
        self.mux.send_at(CmdId::Cclk, format_args!("?")).await?;
        guard.wait_ok().await.map_err(|_| Error::Runtime)?;
        guard
            .with_response(parse_cclk)
            .ok_or(Error::Runtime)
    }
}

/// `"yy/MM/dd,hh:mm:ss+zz"`, twenty bytes between the quotes, zone
/// sign included.
fn parse_cclk(resp: &[u8]) -> Option<DateTime> {
    let open = resp.iter().position(|&b| b == b'"')?;
    let s = resp.get(open + 1..open + 21)?;

    let digits = |i: usize| -> Option<u8> {
        match (s[i], s[i + 1]) {
            (a @ b'0'..=b'9', b @ b'0'..=b'9') => Some((a - b'0') * 10 + (b - b'0')),
            _ => None,
        }
    };

    if s[2] != b'/' || s[5] != b'/' || s[8] != b',' || s[11] != b':' || s[14] != b':' {
        return None;
    }
    let sign = match s[17] {
        b'+' => 1i16,
        b'-' => -1i16,
        _ => return None,
    };
    let quarters = digits(18)? as i16;

    Some(DateTime {
        year: 2000 + digits(0)? as u16,
        month: digits(3)?,
        day: digits(6)?,
        hour: digits(9)?,
        minute: digits(12)?,
        second: digits(15)?,
        tz_minutes: sign * quarters * 15,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cclk_parses_into_the_seven_tuple() {
        let dt = parse_cclk(b"\"24/07/30,11:22:33+08\"\r\n").unwrap();
        assert_eq!(dt.year, 2024);
        assert_eq!(dt.month, 7);
        assert_eq!(dt.day, 30);
        assert_eq!((dt.hour, dt.minute, dt.second), (11, 22, 33));
        // +08 quarter-hours = +120 minutes.
        assert_eq!(dt.tz_minutes, 120);
    }

    #[test]
    fn negative_zones_keep_their_sign() {
        let dt = parse_cclk(b"\"24/01/02,03:04:05-20\"\r\n").unwrap();
        assert_eq!(dt.tz_minutes, -300);
    }

    #[test]
    fn malformed_clock_strings_are_rejected() {
        assert!(parse_cclk(b"24/07/30,11:22:33+08\r\n").is_none());
        assert!(parse_cclk(b"\"24-07-30,11:22:33+08\"\r\n").is_none());
        assert!(parse_cclk(b"\"short\"\r\n").is_none());
    }
}
