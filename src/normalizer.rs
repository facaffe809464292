use crate::config::Unit;
use crate::error::ShareError;
use crate::share_api::{RawReading, TrendToken};
use chrono::{DateTime, TimeZone, Utc};

/// mg/dL per mmol/L.
pub const MGDL_PER_MMOLL: f64 = 18.0;

/// Maximum age gap between two readings for a direct value delta (15 min).
pub const DIRECT_DELTA_WINDOW_MS: i64 = 900_000;

/// A previous delta is only carried forward over a zero delta when its
/// magnitude is at most this (smooths noisy zeros without carrying jumps).
pub const CARRIED_DELTA_LIMIT: f64 = 2.0;

/// Delta magnitude past which a FLAT trend is corrected to a 45-degree one.
pub const SMALL_DELTA_THRESHOLD: f64 = 1.0;

/// Delta magnitude past which the trend is corrected to a full up/down.
pub const LARGE_DELTA_THRESHOLD: f64 = 3.0;

/// Normalized glucose trend. The closed set every vendor trend token maps
/// into; unknown or absent tokens become `Flat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    DoubleUp,
    SingleUp,
    FortyFiveUp,
    Flat,
    FortyFiveDown,
    SingleDown,
    DoubleDown,
    NotComputable,
    RateOutOfRange,
}

impl Trend {
    /// Maps a vendor trend token (string name or numeric code) onto the
    /// normalized set. String matching is case-insensitive and ignores
    /// whitespace, hyphens and underscores, so already-normalized tags like
    /// "FORTY_FIVE_UP" round-trip. The vendor's "NONE" maps to `Flat`.
    pub fn from_token(token: Option<&TrendToken>) -> Trend {
        match token {
            None => Trend::Flat,
            Some(TrendToken::Code(code)) => Trend::from_code(*code),
            Some(TrendToken::Name(name)) => Trend::from_name(name),
        }
    }

    fn from_code(code: u8) -> Trend {
        match code {
            1 => Trend::DoubleUp,
            2 => Trend::SingleUp,
            3 => Trend::FortyFiveUp,
            5 => Trend::FortyFiveDown,
            6 => Trend::SingleDown,
            7 => Trend::DoubleDown,
            8 => Trend::NotComputable,
            9 => Trend::RateOutOfRange,
            // 0 is the vendor's "None", 4 is Flat; anything else is unknown
            _ => Trend::Flat,
        }
    }

    fn from_name(name: &str) -> Trend {
        let folded: String = name
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match folded.as_str() {
            "DOUBLEUP" => Trend::DoubleUp,
            "SINGLEUP" => Trend::SingleUp,
            "FORTYFIVEUP" => Trend::FortyFiveUp,
            "FLAT" | "NONE" => Trend::Flat,
            "FORTYFIVEDOWN" => Trend::FortyFiveDown,
            "SINGLEDOWN" => Trend::SingleDown,
            "DOUBLEDOWN" => Trend::DoubleDown,
            "NOTCOMPUTABLE" => Trend::NotComputable,
            "RATEOUTOFRANGE" => Trend::RateOutOfRange,
            _ => Trend::Flat,
        }
    }

    /// Canonical tag name.
    pub fn tag(&self) -> &'static str {
        match self {
            Trend::DoubleUp => "DOUBLE_UP",
            Trend::SingleUp => "SINGLE_UP",
            Trend::FortyFiveUp => "FORTY_FIVE_UP",
            Trend::Flat => "FLAT",
            Trend::FortyFiveDown => "FORTY_FIVE_DOWN",
            Trend::SingleDown => "SINGLE_DOWN",
            Trend::DoubleDown => "DOUBLE_DOWN",
            Trend::NotComputable => "NOT_COMPUTABLE",
            Trend::RateOutOfRange => "RATE_OUT_OF_RANGE",
        }
    }

    /// Arrow glyph for panel display.
    pub fn arrow(&self) -> &'static str {
        match self {
            Trend::DoubleUp => "↑↑",
            Trend::SingleUp => "↑",
            Trend::FortyFiveUp => "↗",
            Trend::Flat => "→",
            Trend::FortyFiveDown => "↘",
            Trend::SingleDown => "↓",
            Trend::DoubleDown => "↓↓",
            Trend::NotComputable => "?",
            Trend::RateOutOfRange => "⚠",
        }
    }

    /// Fixed per-trend delta estimate, used when no usable prior reading
    /// exists. Unit-aware; the uncomputable trends estimate zero.
    pub fn estimated_delta(&self, unit: Unit) -> f64 {
        let mgdl = match self {
            Trend::DoubleUp => 3.0,
            Trend::SingleUp => 2.0,
            Trend::FortyFiveUp => 1.0,
            Trend::Flat => 0.0,
            Trend::FortyFiveDown => -1.0,
            Trend::SingleDown => -2.0,
            Trend::DoubleDown => -3.0,
            Trend::NotComputable | Trend::RateOutOfRange => 0.0,
        };
        match unit {
            Unit::MgDl => mgdl,
            // Table values from the source, not mgdl/18 (0.17 vs 0.1666..)
            Unit::MmolL => match self {
                Trend::DoubleUp => 0.17,
                Trend::SingleUp => 0.11,
                Trend::FortyFiveUp => 0.06,
                Trend::FortyFiveDown => -0.06,
                Trend::SingleDown => -0.11,
                Trend::DoubleDown => -0.17,
                _ => 0.0,
            },
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Display-ready glucose reading.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    /// Value formatted in the configured unit: integer text for mg/dL,
    /// one decimal for mmol/L.
    pub value: String,
    /// Raw vendor value in mg/dL, kept for threshold classification.
    pub value_mgdl: i32,
    pub unit: Unit,
    pub trend: Trend,
    pub timestamp: DateTime<Utc>,
    /// Signed change since the previous reading, one decimal place.
    pub delta: String,
}

/// Converts raw vendor readings into normalized ones, carrying the previous
/// reading and delta as context for the next call. One normalizer per
/// client instance; state resets whenever the client is rebuilt.
#[derive(Debug, Default)]
pub struct ReadingNormalizer {
    previous_reading: Option<RawReading>,
    previous_delta: Option<f64>,
}

impl ReadingNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes one raw reading. Delta resolution tries, in order:
    /// direct difference against a previous reading at most 15 minutes old,
    /// the carried previous delta (small magnitudes only), then a fixed
    /// per-trend estimate. The trend tag is corrected afterwards when the
    /// final delta contradicts it.
    pub fn normalize(
        &mut self,
        reading: &RawReading,
        unit: Unit,
    ) -> Result<NormalizedReading, ShareError> {
        let millis = parse_wt_millis(&reading.wt).ok_or_else(|| {
            ShareError::Payload(format!("unparseable WT timestamp: {:?}", reading.wt))
        })?;
        let timestamp = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| ShareError::Payload(format!("WT out of range: {millis}")))?;

        let value = match unit {
            Unit::MgDl => reading.value.to_string(),
            Unit::MmolL => format!("{:.1}", reading.value as f64 / MGDL_PER_MMOLL),
        };

        let trend = Trend::from_token(reading.trend.as_ref());

        let mut delta = 0.0_f64;
        if let Some(prev) = &self.previous_reading {
            if let Some(prev_millis) = parse_wt_millis(&prev.wt) {
                if millis - prev_millis <= DIRECT_DELTA_WINDOW_MS {
                    delta = f64::from(reading.value - prev.value);
                    if unit == Unit::MmolL {
                        delta /= MGDL_PER_MMOLL;
                    }
                }
            }
        }
        if delta == 0.0 {
            if let Some(prev_delta) = self.previous_delta {
                if prev_delta != 0.0 && prev_delta.abs() <= CARRIED_DELTA_LIMIT {
                    delta = prev_delta;
                }
            }
        }
        if delta == 0.0 {
            delta = trend.estimated_delta(unit);
        }

        let trend = reconcile_trend(trend, delta);

        self.previous_reading = Some(reading.clone());
        self.previous_delta = Some(delta);

        Ok(NormalizedReading {
            value,
            value_mgdl: reading.value,
            unit,
            trend,
            timestamp,
            delta: format!("{delta:.1}"),
        })
    }
}

/// Corrects a stale trend tag that contradicts the finalized delta. Only
/// reclassifies the listed stale tags; a trend that already agrees with the
/// delta's direction is left alone.
fn reconcile_trend(trend: Trend, delta: f64) -> Trend {
    use Trend::*;
    if delta < -LARGE_DELTA_THRESHOLD && matches!(trend, Flat | FortyFiveUp | SingleUp) {
        SingleDown
    } else if delta < -SMALL_DELTA_THRESHOLD && trend == Flat {
        FortyFiveDown
    } else if delta > SMALL_DELTA_THRESHOLD && delta < LARGE_DELTA_THRESHOLD && trend == Flat {
        FortyFiveUp
    } else if delta > LARGE_DELTA_THRESHOLD && matches!(trend, Flat | FortyFiveDown | SingleDown) {
        SingleUp
    } else {
        trend
    }
}

/// Extracts the embedded epoch-millisecond integer from a vendor WT string
/// such as `"Date(1699999999000)"`. Returns the first contiguous digit run.
pub fn parse_wt_millis(wt: &str) -> Option<i64> {
    let start = wt.find(|c: char| c.is_ascii_digit())?;
    let digits: &str = &wt[start..];
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().ok()
}
