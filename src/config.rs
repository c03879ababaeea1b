use heapless::String;

/// PDP context authentication method, as understood by `+QICSGP`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthMethod {
    #[default]
    None = 0,
    Pap = 1,
    Chap = 2,
    PapOrChap = 3,
}

/// Packet-switched-data (APN) settings for the driver's PDP profile.
///
/// The modem persists the profile across resets; `Device::attach` writes
/// it each time anyway so the driver never depends on stale state.
#[derive(Debug, Clone, Default)]
pub struct ApnInfo {
    pub apn: String<64>,
    pub user: String<64>,
    pub password: String<64>,
    pub auth: AuthMethod,
}

impl ApnInfo {
    pub fn new(apn: &str) -> Self {
        Self {
            apn: String::try_from(apn).unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PDP context / SSL context profile the driver claims for itself.
    pub profile: u8,
    /// SMS storage selected during startup (`+CPMS`).
    pub sms_storage: &'static str,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: 1,
            sms_storage: "SM",
        }
    }
}
