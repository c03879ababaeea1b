//! GNSS subsystem: power control and position fixes.

use embedded_io_async::{Read, Write};

use crate::command::CmdId;
use crate::error::Error;
use crate::parser::Args;
use crate::timing;
use crate::Device;

/// One position fix from `+QGPSLOC=2`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GnssFix {
    pub yy: u8,
    pub month: u8,
    pub dd: u8,
    pub hh: u8,
    pub mm: u8,
    pub ss: u8,
    /// Decimal degrees, south/west negative.
    pub lat: f64,
    pub lon: f64,
    /// Horizontal dilution of precision.
    pub hdop: f64,
    /// Metres above sea level.
    pub alt: f64,
    /// 2 = 2D fix, 3 = 3D fix.
    pub fix: u8,
    /// Course over ground, decimal degrees from true north.
    pub cog: f64,
    /// Km/h.
    pub speed: f64,
    pub nsat: u8,
}

impl<'a, R: Read, W: Write> Device<'a, R, W> {
    /// Power the GNSS engine up.
    ///
    /// `fix_rate` is the fix/NMEA output interval in seconds. With
    /// `use_uart3` the NMEA stream goes out the module's dedicated serial
    /// port instead of being readable over AT.
    pub async fn gnss_init(&self, fix_rate: u16, use_uart3: bool) -> Result<(), Error> {
        self.gnss_cfg_int("nmeasrc", if use_uart3 { 0 } else { 1 })
            .await?;
        self.gnss_cfg_int("gnssconfig", 1).await?;

        // A previous session may have left the engine on.
        self.gnss_done().await.ok();

        let guard = self.mux.acquire(CmdId::Qgps, timing::BASE, 0).await;
        self.mux
            .send_at(CmdId::Qgps, format_args!("=1,30,50,0,{}", fix_rate))
            .await?;
        guard.wait_ok().await.map_err(|_| Error::Runtime)?;

        if use_uart3 {
            self.gnss_cfg_str("outport", "uartnmea").await?;
        }
        Ok(())
    }

    /// Power the GNSS engine down.
    pub async fn gnss_done(&self) -> Result<(), Error> {
        let guard = self.mux.acquire(CmdId::Qgpsend, timing::BASE, 0).await;
        self.mux.send_at(CmdId::Qgpsend, format_args!("")).await?;
        guard.wait_ok().await.map_err(|_| Error::Runtime)
    }

    /// Request one fix. Fails with [`Error::Runtime`] while the engine is
    /// off or has not acquired a position yet.
    pub async fn gnss_fix(&self) -> Result<GnssFix, Error> {
        let guard = self.mux.acquire(CmdId::Qgpsloc, timing::BASE, 1).await;
        self.mux
            .send_at(CmdId::Qgpsloc, format_args!("=2"))
            .await?;
        guard.wait().await;
        let fix = guard.with_response(parse_fix);
        fix.ok_or(Error::Runtime)
    }

    async fn gnss_cfg_int(&self, item: &str, value: i32) -> Result<(), Error> {
        let guard = self.mux.acquire(CmdId::Qgpscfg, timing::BASE, 0).await;
        self.mux
            .send_at(CmdId::Qgpscfg, format_args!("=\"{}\",{}", item, value))
            .await?;
        guard.wait_ok().await.map_err(|_| Error::Runtime)
    }

    async fn gnss_cfg_str(&self, item: &str, value: &str) -> Result<(), Error> {
        let guard = self.mux.acquire(CmdId::Qgpscfg, timing::BASE, 0).await;
        self.mux
            .send_at(CmdId::Qgpscfg, format_args!("=\"{}\",\"{}\"", item, value))
            .await?;
        guard.wait_ok().await.map_err(|_| Error::Runtime)
    }
}

/// `+QGPSLOC: <UTC>,<lat>,<lon>,<hdop>,<alt>,<fix>,<cog>,<spkm>,<spkn>,
/// <date>,<nsat>`: eleven comma-separated fields in mode-2 (decimal
/// degrees) format.
fn parse_fix(resp: &[u8]) -> Option<GnssFix> {
    let mut a = Args::new(resp);
    let utc = a.str()?;
    let lat = float(a.str()?)?;
    let lon = float(a.str()?)?;
    let hdop = float(a.str()?)?;
    let alt = float(a.str()?)?;
    let fixkind = float(a.str()?)? as u8;
    let cog_raw = float(a.str()?)?;
    let speed = float(a.str()?)?;
    let _spkn = a.str()?;
    let date = a.str()?;
    let nsat = a.str()?;

    let mut fix = GnssFix {
        lat,
        lon,
        hdop,
        alt,
        fix: fixkind,
        speed,
        // The modem reports course as degrees.minutes; convert the
        // fractional minutes to decimal degrees.
        cog: cog_to_degrees(cog_raw),
        ..Default::default()
    };

    // hhmmss.sss
    if utc.len() >= 6 {
        fix.hh = two_digits(&utc[0..2])?;
        fix.mm = two_digits(&utc[2..4])?;
        fix.ss = two_digits(&utc[4..6])?;
    }
    // ddMMyy
    if date.len() >= 6 {
        fix.dd = two_digits(&date[0..2])?;
        fix.month = two_digits(&date[2..4])?;
        fix.yy = two_digits(&date[4..6])?;
    }
    if nsat.len() >= 2 {
        fix.nsat = two_digits(&nsat[0..2])?;
    }
    Some(fix)
}

fn cog_to_degrees(cog: f64) -> f64 {
    let whole = cog as i64 as f64;
    whole + (cog - whole) * 10.0 / 6.0
}

fn float(s: &[u8]) -> Option<f64> {
    let s = core::str::from_utf8(s).ok()?;
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok()
}

fn two_digits(s: &[u8]) -> Option<u8> {
    match s {
        [a @ b'0'..=b'9', b @ b'0'..=b'9'] => Some((a - b'0') * 10 + (b - b'0')),
        _ => None,
    }
}
