// Numeric adapters - decode numbers that arrive as decorated text
//
// The SABnzbd API returns most of its numbers as JSON strings: plain
// quoted integers and floats, human-readable sizes with a unit suffix
// ("1.2 GB") and remaining time as clock text ("1:02:03"). The wrapper
// types in this module are used as the deserialization step for those
// fields so the rest of the code only ever sees canonical numbers.

use regex::Regex;
use serde::{de, Deserialize, Deserializer};
use std::num::{ParseFloatError, ParseIntError};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

/// Byte multipliers applied by [`parse_size`].
///
/// M/G/T/P are the exact factors the SABnzbd dashboards were built
/// against and must not be "corrected" to powers of 1024.
const KILO: f64 = 1.024e+3;
pub const MEGA: f64 = 1.049e+6;
const GIGA: f64 = 1.074e+9;
const TERA: f64 = 1.1e+12;
const PETA: f64 = 1.126e+15;

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+):([0-9]+):([0-9]+)$").expect("clock pattern is valid")
});

/// Errors produced when decorated text does not hold a usable number
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("invalid integer {input:?}: {source}")]
    Integer {
        input: String,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid number {input:?}: {source}")]
    Float {
        input: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("invalid clock duration {0:?}, expected H:MM:SS")]
    Duration(String),
}

/// Removes one pair of surrounding double quotes, if present.
fn strip_quotes(text: &str) -> &str {
    let text = text.strip_prefix('"').unwrap_or(text);
    text.strip_suffix('"').unwrap_or(text)
}

/// Parses a (possibly quoted) base-10 unsigned integer.
pub fn parse_uint(text: &str) -> Result<u64, DecodeError> {
    let body = strip_quotes(text);
    body.parse::<u64>().map_err(|source| DecodeError::Integer {
        input: body.to_string(),
        source,
    })
}

/// Parses a (possibly quoted) floating point number.
pub fn parse_float(text: &str) -> Result<f64, DecodeError> {
    let body = strip_quotes(text);
    body.parse::<f64>().map_err(|source| DecodeError::Float {
        input: body.to_string(),
        source,
    })
}

/// Parses a human-readable size such as `"10 GB"` or `"512.3 M"` into bytes.
///
/// The numeral is made of the characters `[0-9+e.]` and the unit of the
/// ASCII letters, wherever they appear in the text. An unknown or missing
/// unit leaves the numeral unscaled.
///
/// # Examples
/// ```text
/// "10 GB" -> 10 * 1.074e9
/// "500"   -> 500
/// "0 B"   -> 0
/// ```
pub fn parse_size(text: &str) -> Result<f64, DecodeError> {
    let body = strip_quotes(text);

    let numeral: String = body
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | 'e' | '.'))
        .collect();
    let unit: String = body.chars().filter(|c| c.is_ascii_alphabetic()).collect();

    let value = numeral.parse::<f64>().map_err(|source| DecodeError::Float {
        input: body.to_string(),
        source,
    })?;

    let factor = match unit.as_str() {
        "K" | "KB" => KILO,
        "M" | "MB" => MEGA,
        "G" | "GB" => GIGA,
        "T" | "TB" => TERA,
        "P" | "PB" => PETA,
        _ => 1.0,
    };

    Ok(value * factor)
}

/// Parses `"H:MM:SS"` / `"HH:MM:SS"` clock text into a duration.
///
/// Only the three-field form is understood. A leading days field
/// (`"1:07:04:09"`) is rejected. Minutes and seconds are accepted as given,
/// so `"0:75:00"` is one hour and fifteen minutes.
pub fn parse_clock(text: &str) -> Result<Duration, DecodeError> {
    let body = strip_quotes(text);
    let invalid = || DecodeError::Duration(body.to_string());

    let caps = CLOCK_RE.captures(body).ok_or_else(invalid)?;
    let field = |idx: usize| -> Result<u64, DecodeError> {
        caps[idx].parse::<u64>().map_err(|_| invalid())
    };

    let secs = field(1)?
        .checked_mul(3600)
        .and_then(|h| field(2).ok()?.checked_mul(60)?.checked_add(h))
        .and_then(|hm| field(3).ok()?.checked_add(hm))
        .ok_or_else(invalid)?;

    Ok(Duration::from_secs(secs))
}

/// Raw JSON scalar accepted by the adapter types.
///
/// The API is inconsistent between versions, so native numbers are
/// accepted alongside the quoted forms.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Unsigned(u64),
    Float(f64),
}

/// Unsigned integer transported as a JSON string
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotedUint(pub u64);

impl QuotedUint {
    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }
}

impl<'de> Deserialize<'de> for QuotedUint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Scalar::deserialize(deserializer)? {
            Scalar::Text(text) => parse_uint(&text).map(QuotedUint).map_err(de::Error::custom),
            Scalar::Unsigned(value) => Ok(QuotedUint(value)),
            Scalar::Float(value) => Err(de::Error::custom(format!(
                "expected an unsigned integer, got {value}"
            ))),
        }
    }
}

/// Float transported as a JSON string
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuotedFloat(pub f64);

impl QuotedFloat {
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for QuotedFloat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Scalar::deserialize(deserializer)? {
            Scalar::Text(text) => parse_float(&text).map(QuotedFloat).map_err(de::Error::custom),
            Scalar::Unsigned(value) => Ok(QuotedFloat(value as f64)),
            Scalar::Float(value) => Ok(QuotedFloat(value)),
        }
    }
}

/// Size in bytes, transported as text with a unit suffix
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HumanSize(pub f64);

impl HumanSize {
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for HumanSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Scalar::deserialize(deserializer)? {
            Scalar::Text(text) => parse_size(&text).map(HumanSize).map_err(de::Error::custom),
            Scalar::Unsigned(value) => Ok(HumanSize(value as f64)),
            Scalar::Float(value) => Ok(HumanSize(value)),
        }
    }
}

/// Duration transported as `"H:MM:SS"` clock text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockDuration(pub Duration);

impl ClockDuration {
    pub fn as_secs_f64(self) -> f64 {
        self.0.as_secs_f64()
    }
}

impl<'de> Deserialize<'de> for ClockDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_clock(&text).map(ClockDuration).map_err(de::Error::custom)
    }
}
