use crate::error::ShareError;
use std::env;

/// Dexcom Share server region. Each region is bound to a fixed base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Us,
    /// Outside-US servers. Default for unrecognized region strings.
    Ous,
}

impl Region {
    /// Normalizes a free-form region string ("US", "usa", "Outside US",
    /// "non_us", ...) into one of the two server regions. Matching is
    /// case-insensitive and ignores surrounding whitespace; anything
    /// unrecognized falls back to `Ous`.
    pub fn parse(input: &str) -> Region {
        match input.trim().to_ascii_lowercase().as_str() {
            "us" | "usa" | "united states" => Region::Us,
            _ => Region::Ous,
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Region::Us => "https://share2.dexcom.com",
            Region::Ous => "https://shareous1.dexcom.com",
        }
    }
}

/// Glucose concentration unit for display. Vendor values are always mg/dL;
/// conversion to mmol/L divides by 18.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    MgDl,
    MmolL,
}

impl Unit {
    pub fn parse(input: &str) -> Unit {
        match input.trim().to_ascii_lowercase().as_str() {
            "mmol/l" | "mmol" | "mmoll" => Unit::MmolL,
            _ => Unit::MgDl,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Unit::MgDl => "mg/dL",
            Unit::MmolL => "mmol/L",
        }
    }
}

/// Display thresholds, always configured in mg/dL. They affect only the
/// colored level classification, never the client's computation.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub urgent_low: i32,
    pub low: i32,
    pub high: i32,
    pub urgent_high: i32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            urgent_low: 55,
            low: 70,
            high: 180,
            urgent_high: 250,
        }
    }
}

/// Full client configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub region: Region,
    pub unit: Unit,
    pub poll_interval_secs: u64,
    pub thresholds: Thresholds,
}

impl Config {
    /// Reads configuration from `DEXCOM_*` environment variables.
    /// Username and password are required; everything else has a default.
    pub fn from_env() -> Result<Config, ShareError> {
        let username = env::var("DEXCOM_USERNAME").unwrap_or_default();
        let password = env::var("DEXCOM_PASSWORD").unwrap_or_default();
        if username.is_empty() || password.is_empty() {
            return Err(ShareError::Config(
                "DEXCOM_USERNAME and DEXCOM_PASSWORD are required".to_string(),
            ));
        }

        let region = Region::parse(&env::var("DEXCOM_REGION").unwrap_or_default());
        let unit = Unit::parse(&env::var("DEXCOM_UNIT").unwrap_or_default());
        let poll_interval_secs = parse_int_or(env::var("DEXCOM_POLL_INTERVAL").ok(), 180);

        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            urgent_low: parse_int_or(env::var("DEXCOM_URGENT_LOW").ok(), defaults.urgent_low),
            low: parse_int_or(env::var("DEXCOM_LOW").ok(), defaults.low),
            high: parse_int_or(env::var("DEXCOM_HIGH").ok(), defaults.high),
            urgent_high: parse_int_or(env::var("DEXCOM_URGENT_HIGH").ok(), defaults.urgent_high),
        };

        Ok(Config {
            username,
            password,
            region,
            unit,
            poll_interval_secs,
            thresholds,
        })
    }
}

/// Safely parses an integer from an optional string, falling back to the
/// provided default on absence or garbage.
fn parse_int_or<T: std::str::FromStr + Copy>(val: Option<String>, default: T) -> T {
    val.unwrap_or_default().trim().parse().unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_parse_us_variants() {
        assert_eq!(Region::parse("US"), Region::Us);
        assert_eq!(Region::parse("us"), Region::Us);
        assert_eq!(Region::parse("usa"), Region::Us);
        assert_eq!(Region::parse("United States"), Region::Us);
        assert_eq!(Region::parse("  us  "), Region::Us);
    }

    #[test]
    fn test_region_parse_ous_variants() {
        assert_eq!(Region::parse("OUS"), Region::Ous);
        assert_eq!(Region::parse("ous"), Region::Ous);
        assert_eq!(Region::parse("non-us"), Region::Ous);
        assert_eq!(Region::parse("non_us"), Region::Ous);
        assert_eq!(Region::parse("Outside US"), Region::Ous);
    }

    #[test]
    fn test_region_parse_unknown_defaults_to_ous() {
        assert_eq!(Region::parse(""), Region::Ous);
        assert_eq!(Region::parse("europe"), Region::Ous);
        assert_eq!(Region::parse("random text"), Region::Ous);
    }

    #[test]
    fn test_region_base_urls() {
        assert_eq!(Region::Us.base_url(), "https://share2.dexcom.com");
        assert_eq!(Region::Ous.base_url(), "https://shareous1.dexcom.com");
        // Every region input resolves to one of exactly two URLs
        for input in ["US", "usa", "non-us", "OUS", "Outside US", "???"] {
            let url = Region::parse(input).base_url();
            assert!(
                url == "https://share2.dexcom.com" || url == "https://shareous1.dexcom.com",
                "unexpected base URL {url} for input {input}"
            );
        }
    }

    #[test]
    fn test_unit_parse() {
        assert_eq!(Unit::parse("mg/dL"), Unit::MgDl);
        assert_eq!(Unit::parse("mmol/L"), Unit::MmolL);
        assert_eq!(Unit::parse("MMOL/L"), Unit::MmolL);
        assert_eq!(Unit::parse(""), Unit::MgDl);
        assert_eq!(Unit::parse("unknown"), Unit::MgDl);
    }

    #[test]
    fn test_parse_int_or() {
        assert_eq!(parse_int_or(None, 180u64), 180);
        assert_eq!(parse_int_or(Some("".to_string()), 180u64), 180);
        assert_eq!(parse_int_or(Some("60".to_string()), 180u64), 60);
        assert_eq!(parse_int_or(Some("garbage".to_string()), 180u64), 180);
        assert_eq!(parse_int_or(Some(" 90 ".to_string()), 180u64), 90);
    }

    #[test]
    fn test_config_from_env_requires_credentials() {
        env::remove_var("DEXCOM_USERNAME");
        env::remove_var("DEXCOM_PASSWORD");
        let result = Config::from_env();
        assert!(matches!(result, Err(ShareError::Config(_))));
    }
}
