//! Network-registration bookkeeping.
//!
//! Registration is tracked per domain (CS via `+CREG`, PS via `+CGREG`,
//! EPS via `+CEREG`) and merged into one aggregate: EPS wins over GPRS,
//! GPRS over nothing. The radio-technology set and the LAC/CI pair are
//! only meaningful while the aggregate says registered.

use embassy_time::{Duration, Instant};
use heapless::String;

/// How long the aggregate may stay unregistered before sockets are
/// refused and force-closed.
pub const NETWORK_LOSS_GRACE: Duration = Duration::from_secs(60);

/// Per-domain registration status. Only home and roaming registration
/// make a domain usable; a denied registration is reported but carries
/// no service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegStatus {
    #[default]
    NotRegistered = 0,
    Registered = 1,
    Denied = 2,
    Roaming = 3,
}

impl RegStatus {
    /// Decode the 3GPP `<stat>` field.
    pub fn from_stat(stat: i32) -> Self {
        match stat {
            1 => Self::Registered,
            3 => Self::Denied,
            5 => Self::Roaming,
            _ => Self::NotRegistered,
        }
    }

    pub fn is_registered(self) -> bool {
        matches!(self, Self::Registered | Self::Roaming)
    }
}

/// Radio access technology bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RatSet(pub u8);

impl RatSet {
    pub const GSM: u8 = 1 << 0;
    pub const GPRS: u8 = 1 << 1;
    pub const LTE: u8 = 1 << 2;
    pub const LTE_M1: u8 = 1 << 3;
    pub const LTE_NB1: u8 = 1 << 4;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// Which `+CxREG` family a report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegDomain {
    /// `+CREG`, circuit switched.
    Cs,
    /// `+CGREG`, packet switched.
    Ps,
    /// `+CEREG`, EPS.
    Eps,
}

/// One parsed registration report (URC or query response).
#[derive(Debug, Default, Clone)]
pub struct RegistrationReport {
    pub status: RegStatus,
    pub lac: Option<String<8>>,
    pub ci: Option<String<8>>,
    pub act: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct RegistrationState {
    cs: RegStatus,
    ps: RegStatus,
    eps: RegStatus,
    eps_act: Option<i32>,
    lac: String<8>,
    ci: String<8>,
    tech: RatSet,
    /// When the aggregate last crossed the registered threshold, either
    /// way ("registered-since" / "unregistered-since").
    since: Instant,
}

impl Default for RegistrationState {
    fn default() -> Self {
        Self::new(Instant::MIN)
    }
}

impl RegistrationState {
    pub const fn new(now: Instant) -> Self {
        Self {
            cs: RegStatus::NotRegistered,
            ps: RegStatus::NotRegistered,
            eps: RegStatus::NotRegistered,
            eps_act: None,
            lac: String::new(),
            ci: String::new(),
            tech: RatSet::empty(),
            since: now,
        }
    }

    /// Forget everything; the clock restarts in the unregistered state.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    /// Aggregate registration: EPS if EPS is usable, else GPRS if usable,
    /// else not registered.
    pub fn registered(&self) -> RegStatus {
        if self.eps.is_registered() {
            self.eps
        } else if self.ps.is_registered() {
            self.ps
        } else {
            RegStatus::NotRegistered
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered().is_registered()
    }

    /// True when the aggregate has been unregistered longer than the
    /// grace period. New sockets and sends are refused while this holds.
    pub fn unregistered_too_long(&self, now: Instant) -> bool {
        !self.is_registered()
            && now.checked_duration_since(self.since).unwrap_or(Duration::from_ticks(0))
                >= NETWORK_LOSS_GRACE
    }

    pub fn tech(&self) -> RatSet {
        self.tech
    }

    pub fn lac(&self) -> &str {
        &self.lac
    }

    pub fn ci(&self) -> &str {
        &self.ci
    }

    /// Merge one report and recompute the aggregate, the technology set
    /// and the since-timestamp.
    pub fn report(&mut self, domain: RegDomain, rep: RegistrationReport, now: Instant) {
        let was = self.is_registered();
        match domain {
            RegDomain::Cs => self.cs = rep.status,
            RegDomain::Ps => self.ps = rep.status,
            RegDomain::Eps => {
                self.eps = rep.status;
                self.eps_act = rep.act.or(self.eps_act);
            }
        }
        if let Some(lac) = rep.lac {
            self.lac = lac;
        }
        if let Some(ci) = rep.ci {
            self.ci = ci;
        }

        self.recompute();

        if self.is_registered() != was {
            self.since = now;
        }
    }

    fn recompute(&mut self) {
        let mut tech = 0u8;
        if self.is_registered() {
            if self.cs.is_registered() {
                tech |= RatSet::GSM;
            }
            if self.ps.is_registered() {
                tech |= RatSet::GPRS;
            }
            if self.eps.is_registered() {
                tech |= match self.eps_act {
                    Some(8) => RatSet::LTE_M1,
                    Some(9) => RatSet::LTE_NB1,
                    _ => RatSet::LTE,
                };
            }
        } else {
            self.lac.clear();
            self.ci.clear();
        }
        self.tech = RatSet(tech);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(status: RegStatus) -> RegistrationReport {
        RegistrationReport {
            status,
            ..Default::default()
        }
    }

    #[test]
    fn aggregate_prefers_eps_over_gprs() {
        let mut state = RegistrationState::new(Instant::from_secs(0));
        state.report(RegDomain::Ps, rep(RegStatus::Registered), Instant::from_secs(1));
        assert_eq!(state.registered(), RegStatus::Registered);

        state.report(RegDomain::Eps, rep(RegStatus::Roaming), Instant::from_secs(2));
        assert_eq!(state.registered(), RegStatus::Roaming);

        state.report(RegDomain::Eps, rep(RegStatus::NotRegistered), Instant::from_secs(3));
        assert_eq!(state.registered(), RegStatus::Registered);
    }

    #[test]
    fn cs_registration_alone_does_not_register() {
        let mut state = RegistrationState::new(Instant::from_secs(0));
        state.report(RegDomain::Cs, rep(RegStatus::Registered), Instant::from_secs(1));
        assert!(!state.is_registered());
        assert!(state.tech().is_empty());
    }

    #[test]
    fn tech_mask_empty_iff_unregistered() {
        let mut state = RegistrationState::new(Instant::from_secs(0));
        let mut eps = rep(RegStatus::Registered);
        eps.act = Some(8);
        eps.lac = Some(String::try_from("12AB").unwrap());
        eps.ci = Some(String::try_from("00C3").unwrap());
        state.report(RegDomain::Eps, eps, Instant::from_secs(1));
        assert!(state.tech().contains(RatSet::LTE_M1));
        assert_eq!(state.lac(), "12AB");

        state.report(RegDomain::Eps, rep(RegStatus::NotRegistered), Instant::from_secs(2));
        assert!(state.tech().is_empty());
        assert_eq!(state.lac(), "");
        assert_eq!(state.ci(), "");
    }

    #[test]
    fn eps_act_values_map_to_lte_flavours() {
        for (act, bit) in [(8, RatSet::LTE_M1), (9, RatSet::LTE_NB1), (7, RatSet::LTE)] {
            let mut state = RegistrationState::new(Instant::from_secs(0));
            let mut r = rep(RegStatus::Registered);
            r.act = Some(act);
            state.report(RegDomain::Eps, r, Instant::from_secs(1));
            assert!(state.tech().contains(bit), "act {} -> {:#b}", act, state.tech().0);
        }
    }

    #[test]
    fn loss_grace_runs_from_the_transition() {
        let mut state = RegistrationState::new(Instant::from_secs(0));
        state.report(RegDomain::Eps, rep(RegStatus::Registered), Instant::from_secs(5));
        assert!(!state.unregistered_too_long(Instant::from_secs(100)));

        state.report(RegDomain::Eps, rep(RegStatus::NotRegistered), Instant::from_secs(100));
        assert!(!state.unregistered_too_long(Instant::from_secs(159)));
        assert!(state.unregistered_too_long(Instant::from_secs(160)));
    }

    #[test]
    fn denied_does_not_register() {
        let mut state = RegistrationState::new(Instant::from_secs(0));
        state.report(RegDomain::Ps, rep(RegStatus::Denied), Instant::from_secs(1));
        assert_eq!(state.registered(), RegStatus::NotRegistered);
        assert!(!state.is_registered());
        assert!(state.tech().is_empty());
    }
}
