// ChatPay — Field validators
//
// Pure functions turning one raw chat answer into a typed value.

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Minor units per major unit (USDC carries 6 decimals).
pub const MINOR_UNITS_PER_MAJOR: u64 = 1_000_000;
const MINOR_SCALE: u32 = 6;

// ---------------------------------------------------------------------------
// Minor units
// ---------------------------------------------------------------------------

/// Integer amount in minor units. Serialized as a decimal string so large
/// sums survive JSON consumers that parse numbers as doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MinorUnits(u64);

impl MinorUnits {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Whole major units, saturating at `u64::MAX` minor units.
    pub const fn from_major(major: u64) -> Self {
        Self(major.saturating_mul(MINOR_UNITS_PER_MAJOR))
    }

    /// Whole major units, or `None` when the minor-unit value overflows.
    pub const fn checked_from_major(major: u64) -> Option<Self> {
        match major.checked_mul(MINOR_UNITS_PER_MAJOR) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: MinorUnits) -> Option<MinorUnits> {
        self.0.checked_add(other.0).map(MinorUnits)
    }

    /// Render in major units without trailing zeros, e.g. `150` or `0.5`.
    pub fn to_major_string(self) -> String {
        Decimal::from_i128_with_scale(self.0 as i128, MINOR_SCALE)
            .normalize()
            .to_string()
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for MinorUnits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

/// Inclusive amount bounds supplied by a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountBounds {
    pub min: MinorUnits,
    pub max: MinorUnits,
}

impl AmountBounds {
    /// Bounds observed for standard transfers: 100 to 5,000,000 USDC.
    pub const STANDARD: AmountBounds = AmountBounds {
        min: MinorUnits::from_major(100),
        max: MinorUnits::from_major(5_000_000),
    };

    pub fn contains(&self, amount: MinorUnits) -> bool {
        self.min <= amount && amount <= self.max
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid amount! Please enter a valid positive number.")]
    NotANumber,
    #[error("Amount must be between {} and {}.", .min.to_major_string(), .max.to_major_string())]
    OutOfRange { min: MinorUnits, max: MinorUnits },
    #[error("Invalid option! Please type one of: {}.", .options.join(", "))]
    NotAllowed { options: Vec<String> },
    #[error("This field is required.")]
    Required,
    #[error("Invalid format! Please enter a valid email address.")]
    InvalidFormat,
    #[error("Invalid number! Please enter a whole number greater than zero.")]
    InvalidCount,
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

/// True when the answer is the cancel keyword (case-insensitive).
pub fn is_cancel(raw: &str, keyword: &str) -> bool {
    raw.trim().eq_ignore_ascii_case(keyword)
}

/// Parse a decimal major-unit amount into minor units, rounding half up.
pub fn validate_amount(raw: &str, bounds: AmountBounds) -> Result<MinorUnits, ValidationError> {
    let out_of_range = ValidationError::OutOfRange {
        min: bounds.min,
        max: bounds.max,
    };

    let value = Decimal::from_str(raw.trim()).map_err(|_| ValidationError::NotANumber)?;
    if value <= Decimal::ZERO {
        return Err(ValidationError::NotANumber);
    }

    let scaled = value
        .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))
        .ok_or_else(|| out_of_range.clone())?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let minor = scaled
        .to_u64()
        .map(MinorUnits)
        .ok_or_else(|| out_of_range.clone())?;

    if !bounds.contains(minor) {
        return Err(out_of_range);
    }
    Ok(minor)
}

/// Exact, case-sensitive match against a fixed option set.
pub fn validate_choice(raw: &str, options: &[&str]) -> Result<String, ValidationError> {
    let answer = raw.trim();
    if options.contains(&answer) {
        Ok(answer.to_string())
    } else {
        Err(ValidationError::NotAllowed {
            options: options.iter().map(|o| o.to_string()).collect(),
        })
    }
}

pub fn validate_text(raw: &str) -> Result<String, ValidationError> {
    let answer = raw.trim();
    if answer.is_empty() {
        Err(ValidationError::Required)
    } else {
        Ok(answer.to_string())
    }
}

/// Free text that may be skipped: an empty answer or the skip keyword yields `None`.
pub fn validate_optional_text(raw: &str, skip_keyword: &str) -> Option<String> {
    let answer = raw.trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case(skip_keyword) {
        None
    } else {
        Some(answer.to_string())
    }
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@.]+(\.[^\s@.]+)+$").expect("email pattern compiles")
    })
}

/// Structural `local@domain.tld` check.
pub fn validate_email(raw: &str) -> Result<String, ValidationError> {
    let answer = raw.trim();
    if answer.is_empty() {
        return Err(ValidationError::Required);
    }
    if email_pattern().is_match(answer) {
        Ok(answer.to_string())
    } else {
        Err(ValidationError::InvalidFormat)
    }
}

pub fn validate_count(raw: &str) -> Result<u32, ValidationError> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ValidationError::InvalidCount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_scales_to_minor_units() {
        let amount = validate_amount("150", AmountBounds::STANDARD).unwrap();
        assert_eq!(amount, MinorUnits::new(150_000_000));
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"150000000\"");
    }

    #[test]
    fn test_major_units_overflow() {
        assert_eq!(
            MinorUnits::checked_from_major(5_000_000),
            Some(MinorUnits::new(5_000_000_000_000))
        );
        assert_eq!(MinorUnits::checked_from_major(u64::MAX / 1000), None);
        assert_eq!(MinorUnits::from_major(u64::MAX).value(), u64::MAX);
    }

    #[test]
    fn test_amount_rounds_half_up() {
        let bounds = AmountBounds::STANDARD;
        assert_eq!(
            validate_amount("100.0000005", bounds).unwrap(),
            MinorUnits::new(100_000_001)
        );
        assert_eq!(
            validate_amount("100.0000004", bounds).unwrap(),
            MinorUnits::new(100_000_000)
        );
    }

    #[test]
    fn test_amount_bounds_are_inclusive() {
        let bounds = AmountBounds::STANDARD;
        assert!(validate_amount("100", bounds).is_ok());
        assert!(validate_amount("5000000", bounds).is_ok());
        assert!(validate_amount(" 2500.75 ", bounds).is_ok());
    }

    #[test]
    fn test_amount_out_of_range() {
        let bounds = AmountBounds::STANDARD;
        let expected = ValidationError::OutOfRange {
            min: bounds.min,
            max: bounds.max,
        };
        assert_eq!(validate_amount("50", bounds), Err(expected.clone()));
        assert_eq!(validate_amount("99.9999994", bounds), Err(expected.clone()));
        assert_eq!(validate_amount("5000000.000001", bounds), Err(expected));
    }

    #[test]
    fn test_amount_not_a_number() {
        let bounds = AmountBounds::STANDARD;
        for raw in ["abc", "", "0", "-5", "12abc"] {
            assert_eq!(validate_amount(raw, bounds), Err(ValidationError::NotANumber), "{raw}");
        }
    }

    #[test]
    fn test_out_of_range_message_uses_major_units() {
        let err = validate_amount("1", AmountBounds::STANDARD).unwrap_err();
        assert_eq!(err.to_string(), "Amount must be between 100 and 5000000.");
    }

    #[test]
    fn test_major_string_trims_zeros() {
        assert_eq!(MinorUnits::new(150_000_000).to_major_string(), "150");
        assert_eq!(MinorUnits::new(500_000).to_major_string(), "0.5");
        assert_eq!(MinorUnits::new(1).to_major_string(), "0.000001");
    }

    #[test]
    fn test_choice_is_exact() {
        let options = ["salary", "gift"];
        assert_eq!(validate_choice(" salary ", &options).unwrap(), "salary");
        assert!(matches!(
            validate_choice("Salary", &options),
            Err(ValidationError::NotAllowed { .. })
        ));
        assert!(validate_choice("sal", &options).is_err());
    }

    #[test]
    fn test_text_required() {
        assert_eq!(validate_text("  note "), Ok("note".to_string()));
        assert_eq!(validate_text("   "), Err(ValidationError::Required));
    }

    #[test]
    fn test_optional_text_skip() {
        assert_eq!(validate_optional_text("SKIP", "skip"), None);
        assert_eq!(validate_optional_text("", "skip"), None);
        assert_eq!(validate_optional_text(" 0xabc ", "skip"), Some("0xabc".into()));
    }

    #[test]
    fn test_email_shape() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("a.b+c@mail.example.org").is_ok());
        assert_eq!(validate_email("alice@example"), Err(ValidationError::InvalidFormat));
        assert_eq!(validate_email("alice.example.com"), Err(ValidationError::InvalidFormat));
        assert_eq!(validate_email("@example.com"), Err(ValidationError::InvalidFormat));
        assert_eq!(validate_email("a b@example.com"), Err(ValidationError::InvalidFormat));
    }

    #[test]
    fn test_count() {
        assert_eq!(validate_count("3"), Ok(3));
        assert_eq!(validate_count("0"), Err(ValidationError::InvalidCount));
        assert_eq!(validate_count("-2"), Err(ValidationError::InvalidCount));
        assert_eq!(validate_count("two"), Err(ValidationError::InvalidCount));
    }

    #[test]
    fn test_cancel_keyword_case_insensitive() {
        assert!(is_cancel("CANCEL", "cancel"));
        assert!(is_cancel(" Cancel ", "cancel"));
        assert!(!is_cancel("cancelled", "cancel"));
    }
}
