//! Network registration, PSD context control, operators, signal quality,
//! RAT selection and module identity.

use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{Read, Write};
use heapless::{String, Vec};

use crate::command::CmdId;
use crate::config::ApnInfo;
use crate::error::Error;
use crate::parser::{unquote, Args};
use crate::registration::{RatSet, RegDomain, RegStatus, RegistrationReport};
use crate::timing;
use crate::Device;

/// Operator table size (`+COPS=?` listing).
pub const MAX_OPERATORS: usize = 6;

/// One network operator as listed by `+COPS=?`.
#[derive(Debug, Clone, Default)]
pub struct OperatorEntry {
    /// Availability code (0 unknown, 1 available, 2 current, 3 forbidden).
    pub status: u8,
    pub long_name: String<24>,
    pub short_name: String<10>,
    pub numeric: String<6>,
}

/// Registration snapshot merged from queries and URCs.
#[derive(Debug, Clone, Default)]
pub struct NetworkInfo {
    pub registered: RegStatus,
    pub tech: RatSet,
    pub lac: String<8>,
    pub ci: String<8>,
}

/// Module identity.
#[derive(Debug, Clone, Default)]
pub struct MobileInfo {
    pub imei: String<16>,
    pub iccid: String<22>,
}

/// Active PDP context parameters.
#[derive(Debug, Clone, Default)]
pub struct LinkInfo {
    pub ip: String<40>,
    pub dns: String<40>,
}

/// Module functionality level (`+CFUN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Functionality {
    Minimum = 0,
    Full = 1,
    Airplane = 4,
}

/// Radio access technology selection for `set_rat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rat {
    Gsm = 0,
    LteM1 = 1,
    LteNb1 = 2,
}

impl<'a, R: Read, W: Write> Device<'a, R, W> {
    /// Query all three registration domains and merge into the shared
    /// state; returns the merged snapshot.
    pub async fn check_network(&self) -> Result<NetworkInfo, Error> {
        for (cmd, domain) in [
            (CmdId::Creg, RegDomain::Cs),
            (CmdId::Cgreg, RegDomain::Ps),
            (CmdId::Cereg, RegDomain::Eps),
        ] {
            let guard = self.mux.acquire(cmd, timing::NETWORK_QUERY, 1).await;
            self.mux.send_at(cmd, format_args!("?")).await?;
            guard.wait_ok().await?;
            let rep = guard.with_response(|resp| {
                // +CxREG: <n>,<stat>[,"<lac>","<ci>"[,<act>]]
                let mut a = Args::new(resp);
                let _mode = a.int()?;
                let stat = a.int()?;
                Some(RegistrationReport {
                    status: RegStatus::from_stat(stat),
                    lac: a.quoted().and_then(reg_field),
                    ci: a.quoted().and_then(reg_field),
                    act: a.int(),
                })
            });
            if let Some(rep) = rep {
                crate::mux::urc::report(&self.mux, domain, rep);
            }
        }
        Ok(self.network_info())
    }

    /// The cached registration snapshot (URC-driven; `check_network`
    /// refreshes it).
    pub fn network_info(&self) -> NetworkInfo {
        self.mux.with_shared(|s| NetworkInfo {
            registered: s.reg.registered(),
            tech: s.reg.tech(),
            lac: String::try_from(s.reg.lac()).unwrap_or_default(),
            ci: String::try_from(s.reg.ci()).unwrap_or_default(),
        })
    }

    /// Configure the PSD profile, wait for registration, then activate
    /// the context. Blocks for up to `timeout` waiting for the network.
    pub async fn attach(&self, apn: &ApnInfo, timeout: Duration) -> Result<(), Error> {
        self.configure_psd(apn).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let info = self.check_network().await?;
            if info.registered.is_registered() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            Timer::after(Duration::from_secs(1)).await;
        }

        self.attach_gprs(true).await?;
        self.control_psd(true).await
    }

    /// Deactivate the PDP context, keeping network registration.
    pub async fn detach(&self) -> Result<(), Error> {
        self.control_psd(false).await
    }

    /// Write the PSD profile: reset the context definition, then
    /// `+QICSGP` with APN and credentials.
    pub async fn configure_psd(&self, apn: &ApnInfo) -> Result<(), Error> {
        let profile = self.config.profile;

        let guard = self.mux.acquire(CmdId::Cgdcont, timing::BASE, 0).await;
        self.mux
            .send_at(CmdId::Cgdcont, format_args!("={}", profile))
            .await?;
        guard.wait_ok().await?;
        drop(guard);

        let guard = self.mux.acquire(CmdId::Qicsgp, timing::BASE, 0).await;
        self.mux
            .send_at(
                CmdId::Qicsgp,
                format_args!(
                    "={},1,\"{}\",\"{}\",\"{}\",{}",
                    profile,
                    apn.apn,
                    apn.user,
                    apn.password,
                    apn.auth as u8
                ),
            )
            .await?;
        guard.wait_ok().await
    }

    /// Activate (`+QIACT`) or deactivate (`+QIDEACT`) the PDP context.
    /// Budgeted at three minutes; the modem really takes that long on a
    /// congested cell.
    pub async fn control_psd(&self, activate: bool) -> Result<(), Error> {
        let cmd = if activate {
            CmdId::Qiact
        } else {
            CmdId::Qideact
        };
        let guard = self.mux.acquire(cmd, timing::NETWORK_OP, 0).await;
        self.mux
            .send_at(cmd, format_args!("={}", self.config.profile))
            .await?;
        guard.wait_ok().await
    }

    /// `+CGATT` attach/detach.
    pub async fn attach_gprs(&self, attach: bool) -> Result<(), Error> {
        let guard = self.mux.acquire(CmdId::Cgatt, timing::NETWORK_OP, 0).await;
        self.mux
            .send_at(CmdId::Cgatt, format_args!("={}", attach as u8))
            .await?;
        guard.wait_ok().await
    }

    pub async fn is_attached(&self) -> Result<bool, Error> {
        let guard = self.mux.acquire(CmdId::Cgatt, timing::NETWORK_OP, 1).await;
        self.mux.send_at(CmdId::Cgatt, format_args!("?")).await?;
        guard.wait_ok().await?;
        Ok(guard.with_response(|r| Args::new(r).int()) == Some(1))
    }

    /// List visible operators (`+COPS=?`); rewrites the returned table on
    /// each call.
    pub async fn list_operators(&self) -> Result<Vec<OperatorEntry, MAX_OPERATORS>, Error> {
        let guard = self.mux.acquire(CmdId::Cops, timing::NETWORK_OP, 1).await;
        self.mux.send_at(CmdId::Cops, format_args!("=?")).await?;
        guard.wait_ok().await?;
        Ok(guard.with_response(parse_operators))
    }

    /// Manual operator selection by long name.
    pub async fn set_operator(&self, name: &str) -> Result<(), Error> {
        let guard = self.mux.acquire(CmdId::Cops, timing::NETWORK_OP, 0).await;
        self.mux
            .send_at(CmdId::Cops, format_args!("=1,1,\"{}\"", name))
            .await?;
        guard.wait_ok().await
    }

    /// Received signal strength in dBm; 0 means unknown.
    pub async fn rssi(&self) -> Result<i32, Error> {
        let guard = self.mux.acquire(CmdId::Csq, timing::BASE, 1).await;
        self.mux.send_at(CmdId::Csq, format_args!("")).await?;
        guard.wait_ok().await?;
        let raw = guard
            .with_response(|r| Args::new(r).int())
            .unwrap_or(99);
        Ok(match raw {
            0..=31 => -113 + 2 * raw,
            _ => 0,
        })
    }

    /// IMEI and ICCID.
    pub async fn mobile_info(&self) -> Result<MobileInfo, Error> {
        let mut info = MobileInfo::default();

        let guard = self.mux.acquire(CmdId::Gsn, timing::BASE, 1).await;
        self.mux.send_at(CmdId::Gsn, format_args!("")).await?;
        guard.wait_ok().await?;
        guard.with_response(|r| {
            info.imei = trimmed_field(r);
        });
        drop(guard);

        let guard = self.mux.acquire(CmdId::Qccid, timing::BASE, 1).await;
        self.mux.send_at(CmdId::Qccid, format_args!("")).await?;
        guard.wait_ok().await?;
        guard.with_response(|r| {
            info.iccid = trimmed_field(r);
        });
        Ok(info)
    }

    /// Context address (`+QIACT?`) and primary DNS (`+QIDNSCFG`).
    pub async fn link_info(&self) -> Result<LinkInfo, Error> {
        let mut info = LinkInfo::default();

        let guard = self.mux.acquire(CmdId::Qiact, timing::NETWORK_QUERY, 1).await;
        self.mux.send_at(CmdId::Qiact, format_args!("?")).await?;
        guard.wait_ok().await?;
        guard.with_response(|r| {
            // +QIACT: <ctx>,<state>,<type>,"<ip>"
            let mut a = Args::new(r);
            let _ctx = a.int();
            let _state = a.int();
            let _kind = a.int();
            if let Some(ip) = a.quoted() {
                info.ip = trimmed_field(ip);
            }
        });
        drop(guard);

        let guard = self
            .mux
            .acquire(CmdId::Qidnscfg, timing::NETWORK_QUERY, 1)
            .await;
        self.mux
            .send_at(CmdId::Qidnscfg, format_args!("={}", self.config.profile))
            .await?;
        guard.wait_ok().await?;
        guard.with_response(|r| {
            // +QIDNSCFG: <ctx>,"<primary>","<secondary>"
            let mut a = Args::new(r);
            let _ctx = a.int();
            if let Some(dns) = a.quoted() {
                info.dns = trimmed_field(dns);
            }
        });
        Ok(info)
    }

    /// Serving-cell diagnostics, passed through unparsed (the layout
    /// varies with the RAT in use).
    pub async fn serving_cell(&self) -> Result<String<256>, Error> {
        let guard = self.mux.acquire(CmdId::Qeng, timing::NETWORK_QUERY, 1).await;
        self.mux
            .send_at(CmdId::Qeng, format_args!("=\"servingcell\""))
            .await?;
        guard.wait_ok().await?;
        Ok(guard.with_response(trimmed_field))
    }

    /// Select the radio technology and band set (`+QCFG` scan mode, band
    /// mask, IoT operation mode).
    pub async fn set_rat(&self, rat: Rat, band: u32) -> Result<(), Error> {
        let scan_mode = match rat {
            Rat::Gsm => 1,
            _ => 3,
        };
        let guard = self.mux.acquire(CmdId::Qcfg, timing::BASE, 0).await;
        self.mux
            .send_at(
                CmdId::Qcfg,
                format_args!("=\"nwscanmode\",{},1", scan_mode),
            )
            .await?;
        guard.wait_ok().await?;
        drop(guard);

        let (gsm_band, m1_band, nb1_band) = match rat {
            Rat::Gsm => (band, 0, 0),
            Rat::LteM1 => (0, band, 0),
            Rat::LteNb1 => (0, 0, band),
        };
        let guard = self.mux.acquire(CmdId::Qcfg, timing::BASE, 0).await;
        self.mux
            .send_at(
                CmdId::Qcfg,
                format_args!("=\"band\",{},{},{},1", gsm_band, m1_band, nb1_band),
            )
            .await?;
        guard.wait_ok().await?;
        drop(guard);

        if rat != Rat::Gsm {
            let iot_mode = match rat {
                Rat::LteNb1 => 1,
                _ => 0,
            };
            let guard = self.mux.acquire(CmdId::Qcfg, timing::BASE, 0).await;
            self.mux
                .send_at(CmdId::Qcfg, format_args!("=\"iotopmode\",{},1", iot_mode))
                .await?;
            guard.wait_ok().await?;
        }
        Ok(())
    }

    /// `+CFUN` functionality switch.
    pub async fn set_functionality(&self, fun: Functionality) -> Result<(), Error> {
        let guard = self
            .mux
            .acquire(CmdId::Cfun, timing::NETWORK_QUERY * 3, 0)
            .await;
        self.mux
            .send_at(CmdId::Cfun, format_args!("={}", fun as u8))
            .await?;
        guard.wait_ok().await
    }
}

fn reg_field(s: &[u8]) -> Option<String<8>> {
    if s.is_empty() {
        return None;
    }
    core::str::from_utf8(s).ok().and_then(|t| String::try_from(t).ok())
}

fn trimmed_field<const N: usize>(raw: &[u8]) -> String<N> {
    let raw = raw.strip_suffix(b"\r\n").unwrap_or(raw);
    let raw = unquote(raw);
    match core::str::from_utf8(raw) {
        Ok(s) => String::try_from(s).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// `+COPS=?` listing: `(2,"long","short","00101",7),(...)`, terminated by
/// the parameter-range groups.
fn parse_operators(resp: &[u8]) -> Vec<OperatorEntry, MAX_OPERATORS> {
    let mut ops = Vec::new();
    let mut rest = resp;
    while let Some(open) = rest.iter().position(|&b| b == b'(') {
        let body = &rest[open + 1..];
        let Some(close) = body.iter().position(|&b| b == b')') else {
            break;
        };
        let record = &body[..close];
        rest = &body[close + 1..];

        // The trailing range groups ("(0-4)" etc.) carry no quoted names.
        let mut a = Args::new(record);
        let Some(status) = a.int() else {
            break;
        };
        let Some(long) = a.str() else {
            break;
        };
        if long.first() != Some(&b'"') {
            break;
        }
        let short = a.str().unwrap_or(b"");
        let numeric = a.str().unwrap_or(b"");

        let entry = OperatorEntry {
            status: status.clamp(0, u8::MAX as i32) as u8,
            long_name: trimmed_field(unquote(long)),
            short_name: trimmed_field(unquote(short)),
            numeric: trimmed_field(unquote(numeric)),
        };
        if ops.push(entry).is_err() {
            break;
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_listing_parses_records_and_stops_at_ranges() {
        let resp = b"(2,\"Vodafone IT\",\"voda IT\",\"22210\",0),(1,\"I TIM\",\"TIM\",\"22201\",7),,(0-4),(0-2)\r\n";
        let ops = parse_operators(resp);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].status, 2);
        assert_eq!(ops[0].long_name.as_str(), "Vodafone IT");
        assert_eq!(ops[0].short_name.as_str(), "voda IT");
        assert_eq!(ops[0].numeric.as_str(), "22210");
        assert_eq!(ops[1].long_name.as_str(), "I TIM");
    }

    #[test]
    fn operator_listing_caps_at_table_size() {
        let mut resp: std::vec::Vec<u8> = std::vec::Vec::new();
        for i in 0..10 {
            let rec = std::format!("({},\"OP{}\",\"O{}\",\"0010{}\",0),", 1, i, i, i);
            resp.extend_from_slice(rec.as_bytes());
        }
        let ops = parse_operators(&resp);
        assert_eq!(ops.len(), MAX_OPERATORS);
    }

    #[test]
    fn rssi_mapping_covers_the_3gpp_table() {
        // 99 -> unknown (0); n in 0..=31 -> -113 + 2n.
        // The mapping itself is applied in `rssi`; spot-check the formula.
        let map = |raw: i32| match raw {
            0..=31 => -113 + 2 * raw,
            _ => 0,
        };
        assert_eq!(map(99), 0);
        assert_eq!(map(0), -113);
        assert_eq!(map(31), -51);
        assert_eq!(map(16), -81);
    }
}
