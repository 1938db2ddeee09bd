// crates/quanta-core/src/money.rs
//
// Satoshi-exact payout arithmetic.
//
// A survey's quantum (the per-vote payout rate) is the rational
// `inputs / votes` where `inputs = total satoshis - total fee`. It is kept as
// two integers so that every payout is computed without float drift:
//
//   gross  = floor(inputs * counts / votes)
//   payout = floor(inputs * counts * bps / (votes * 10_000))
//   fee    = gross - payout
//
// All intermediate products are u128.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::QuantaError;

/// Smallest indivisible unit of the settled currency.
pub type Satoshis = u64;

/// Basis points in a whole (100%).
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Default share of gross units paid to recipients: 95%.
pub const DEFAULT_PAYOUT_BPS: u32 = 9_500;

/// Per-vote payout rate of a survey, held as an exact rational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantum {
    /// Net contributed satoshis (`total satoshis - total fee`).
    pub inputs: Satoshis,
    /// Total votes attributed to the survey by its contributions. Never zero.
    pub votes: u64,
}

impl Quantum {
    /// Build a quantum, or `None` when the survey has no votes.
    pub fn new(inputs: Satoshis, votes: u64) -> Option<Self> {
        if votes == 0 {
            None
        } else {
            Some(Self { inputs, votes })
        }
    }

    /// `floor(quantum * counts)` in satoshis.
    pub fn gross(&self, counts: u64) -> u128 {
        u128::from(self.inputs) * u128::from(counts) / u128::from(self.votes)
    }

    /// Split the gross units for `counts` votes into `(payout, fee)`.
    ///
    /// The payout is floored first and the fee is whatever remains of the
    /// floored gross, so `payout + fee == floor(gross)`.
    pub fn split(&self, counts: u64, fraction: PayoutFraction) -> Result<(Satoshis, Satoshis), QuantaError> {
        let gross = self.gross(counts);
        let payout = u128::from(self.inputs)
            .checked_mul(u128::from(counts))
            .and_then(|units| units.checked_mul(u128::from(fraction.bps())))
            .ok_or_else(|| {
                QuantaError::InvalidState(format!(
                    "Payout for {} votes at {} overflows u128",
                    counts, self
                ))
            })?
            / (u128::from(self.votes) * u128::from(BPS_DENOMINATOR));
        let fee = gross - payout;

        let payout = Satoshis::try_from(payout).map_err(|_| {
            QuantaError::InvalidState(format!("Payout {} sat overflows u64", payout))
        })?;
        let fee = Satoshis::try_from(fee)
            .map_err(|_| QuantaError::InvalidState(format!("Fee {} sat overflows u64", fee)))?;
        Ok((payout, fee))
    }

    /// Approximate rate for reporting only. Never feed this back into payout math.
    pub fn as_f64(&self) -> f64 {
        self.inputs as f64 / self.votes as f64
    }
}

impl fmt::Display for Quantum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.4} sat/vote)", self.inputs, self.votes, self.as_f64())
    }
}

/// Fraction of gross units paid to recipients, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PayoutFraction(u32);

impl PayoutFraction {
    /// Build a fraction from basis points; must be in `1..=10_000`.
    pub fn from_bps(bps: u32) -> Result<Self, QuantaError> {
        if bps == 0 || bps > BPS_DENOMINATOR {
            return Err(QuantaError::InvalidState(format!(
                "Payout fraction must be within 1..={} bps, got {}",
                BPS_DENOMINATOR, bps
            )));
        }
        Ok(Self(bps))
    }

    pub fn bps(&self) -> u32 {
        self.0
    }
}

impl Default for PayoutFraction {
    fn default() -> Self {
        Self(DEFAULT_PAYOUT_BPS)
    }
}

impl TryFrom<u32> for PayoutFraction {
    type Error = QuantaError;

    fn try_from(bps: u32) -> Result<Self, Self::Error> {
        Self::from_bps(bps)
    }
}

impl From<PayoutFraction> for u32 {
    fn from(fraction: PayoutFraction) -> Self {
        fraction.0
    }
}
