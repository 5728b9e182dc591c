//! Earnings calculation
//!
//! `amount = base_rate_per_second * duration_seconds * complexity`, rounded
//! half-to-even to the token's minimum denomination.

use crate::types::ExecutionRecord;
use crate::{Error, Result};
use mint_ledger::EarningsQuote;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Largest supported token precision
pub const MAX_TOKEN_DECIMALS: u32 = 12;

/// Compute the token amount for a metered duration
pub fn compute_earnings(
    duration_seconds: Decimal,
    base_rate_per_second: Decimal,
    complexity: Decimal,
    decimals: u32,
) -> Result<Decimal> {
    if base_rate_per_second <= Decimal::ZERO {
        return Err(Error::Configuration(format!(
            "base rate must be positive, got {}",
            base_rate_per_second
        )));
    }
    if duration_seconds < Decimal::ZERO {
        return Err(Error::InvalidDuration(format!(
            "duration cannot be negative, got {}",
            duration_seconds
        )));
    }
    if complexity <= Decimal::ZERO {
        return Err(Error::InvalidComplexity(format!(
            "complexity must be positive, got {}",
            complexity
        )));
    }
    if duration_seconds.is_zero() {
        return Ok(Decimal::ZERO);
    }

    let amount = base_rate_per_second
        .checked_mul(duration_seconds)
        .and_then(|a| a.checked_mul(complexity))
        .ok_or_else(|| {
            Error::InvalidDuration(format!("duration {} overflows amount", duration_seconds))
        })?;

    Ok(amount.round_dp_with_strategy(decimals, RoundingStrategy::MidpointNearestEven))
}

/// Convert a token amount to the smallest transferable unit
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u64> {
    let scale = Decimal::from(10u64.pow(decimals.min(MAX_TOKEN_DECIMALS)));
    amount
        .checked_mul(scale)
        .and_then(|units| units.trunc().to_u64())
        .ok_or_else(|| Error::InvalidDuration(format!("amount {} exceeds base unit range", amount)))
}

/// Derives quotes from sealed execution records
#[derive(Debug, Clone)]
pub struct EarningsCalculator {
    base_rate_per_second: Decimal,
    token_decimals: u32,
}

impl EarningsCalculator {
    /// Create a calculator; rejects a non-positive rate or unsupported precision
    pub fn new(base_rate_per_second: Decimal, token_decimals: u32) -> Result<Self> {
        if base_rate_per_second <= Decimal::ZERO {
            return Err(Error::Configuration(format!(
                "base rate must be positive, got {}",
                base_rate_per_second
            )));
        }
        if token_decimals > MAX_TOKEN_DECIMALS {
            return Err(Error::Configuration(format!(
                "token_decimals {} exceeds {}",
                token_decimals, MAX_TOKEN_DECIMALS
            )));
        }

        Ok(Self {
            base_rate_per_second,
            token_decimals,
        })
    }

    /// Base rate in tokens per second
    pub fn base_rate_per_second(&self) -> Decimal {
        self.base_rate_per_second
    }

    /// Token precision
    pub fn token_decimals(&self) -> u32 {
        self.token_decimals
    }

    /// Quote a sealed execution. Duration is truncated to whole seconds.
    pub fn quote(&self, record: &ExecutionRecord) -> Result<EarningsQuote> {
        let duration_secs = record.duration_secs();
        let complexity = record.complexity.as_decimal();

        let amount = compute_earnings(
            Decimal::from(duration_secs),
            self.base_rate_per_second,
            complexity,
            self.token_decimals,
        )?;

        Ok(EarningsQuote {
            execution_id: record.execution_id.clone(),
            job_name: record.job_name.clone(),
            duration_secs,
            complexity,
            base_rate_per_second: self.base_rate_per_second,
            amount,
            base_units: to_base_units(amount, self.token_decimals)?,
        })
    }

    /// Zero-amount quote for an execution that could not be priced, so the
    /// failure still lands in the ledger
    pub fn unpriced(&self, record: &ExecutionRecord) -> EarningsQuote {
        EarningsQuote {
            execution_id: record.execution_id.clone(),
            job_name: record.job_name.clone(),
            duration_secs: record.duration_secs(),
            complexity: record.complexity.as_decimal(),
            base_rate_per_second: self.base_rate_per_second,
            amount: Decimal::ZERO,
            base_units: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Complexity;
    use mint_ledger::ExecutionId;
    use std::time::Duration;
    use tokio::time::Instant;

    fn rate() -> Decimal {
        Decimal::new(5, 3)
    }

    #[test]
    fn test_documented_examples() {
        assert_eq!(
            compute_earnings(Decimal::from(30), rate(), Decimal::ONE, 9).unwrap(),
            Decimal::new(15, 2)
        );
        assert_eq!(
            compute_earnings(Decimal::from(300), rate(), Decimal::ONE, 9).unwrap(),
            Decimal::new(15, 1)
        );
        assert_eq!(
            compute_earnings(Decimal::from(3600), rate(), Decimal::new(15, 1), 9).unwrap(),
            Decimal::from(27)
        );
    }

    #[test]
    fn test_zero_duration_is_zero() {
        assert_eq!(
            compute_earnings(Decimal::ZERO, rate(), Decimal::ONE, 9).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            compute_earnings(Decimal::from(-1), rate(), Decimal::ONE, 9),
            Err(Error::InvalidDuration(_))
        ));
        assert!(matches!(
            compute_earnings(Decimal::from(10), rate(), Decimal::ZERO, 9),
            Err(Error::InvalidComplexity(_))
        ));
        assert!(matches!(
            compute_earnings(Decimal::from(10), Decimal::ZERO, Decimal::ONE, 9),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_rounds_half_to_even() {
        // 1 * 0.005 * 1.0 = 0.005 -> 0.00 at two places (midpoint, even)
        assert_eq!(
            compute_earnings(Decimal::ONE, rate(), Decimal::ONE, 2).unwrap(),
            Decimal::new(0, 2)
        );
        // 3 * 0.005 = 0.015 -> 0.02
        assert_eq!(
            compute_earnings(Decimal::from(3), rate(), Decimal::ONE, 2).unwrap(),
            Decimal::new(2, 2)
        );
    }

    #[test]
    fn test_base_units() {
        assert_eq!(to_base_units(Decimal::new(15, 2), 9).unwrap(), 150_000_000);
        assert_eq!(to_base_units(Decimal::from(27), 6).unwrap(), 27_000_000);
        assert_eq!(to_base_units(Decimal::ZERO, 9).unwrap(), 0);
    }

    #[test]
    fn test_calculator_rejects_bad_config() {
        assert!(EarningsCalculator::new(Decimal::ZERO, 9).is_err());
        assert!(EarningsCalculator::new(rate(), 13).is_err());
    }

    #[test]
    fn test_quote_truncates_duration() {
        let calculator = EarningsCalculator::new(rate(), 9).unwrap();
        let now = Instant::now();
        let record = ExecutionRecord {
            execution_id: ExecutionId::new("exec-1"),
            job_name: None,
            complexity: Complexity::from_millis(1500).unwrap(),
            started_at: now,
            ended_at: now + Duration::from_millis(3600_900),
        };

        let quote = calculator.quote(&record).unwrap();
        assert_eq!(quote.duration_secs, 3600);
        assert_eq!(quote.amount, Decimal::from(27));
        assert_eq!(quote.base_units, 27_000_000_000);
        assert_eq!(quote.complexity, Decimal::new(15, 1));
    }

    #[test]
    fn test_unpriced_keeps_metering_details() {
        // Large enough that the amount no longer fits in base units
        let calculator = EarningsCalculator::new(Decimal::from(100_000_000_000u64), 9).unwrap();
        let now = Instant::now();
        let record = ExecutionRecord {
            execution_id: ExecutionId::new("exec-2"),
            job_name: Some("crawl".to_string()),
            complexity: Complexity::ONE,
            started_at: now,
            ended_at: now + Duration::from_secs(1),
        };

        assert!(calculator.quote(&record).is_err());

        let quote = calculator.unpriced(&record);
        assert_eq!(quote.duration_secs, 1);
        assert_eq!(quote.job_name.as_deref(), Some("crawl"));
        assert!(quote.amount.is_zero());
        assert_eq!(quote.base_units, 0);
    }
}
