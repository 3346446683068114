//! Shared value types for the newsgate domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. confidences are in `[0.0, 1.0]`,
//! rank scores are in `1..=5`, costs are non-negative) and participate in
//! domain computations.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Token and cost types
// ---------------------------------------------------------------------------

/// Number of tokens consumed in an inference call.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TokenCount(u64);

impl TokenCount {
    /// Creates a [`TokenCount`] from a raw integer.
    pub fn new(count: u64) -> Self {
        Self(count)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` if this count is zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for TokenCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for TokenCount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::AddAssign for TokenCount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl std::iter::Sum for TokenCount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, c| acc + c)
    }
}

// ---------------------------------------------------------------------------

/// Monetary cost of token usage, expressed in US dollars.
///
/// Backed by a decimal so that ledger totals are the exact sum of their
/// entries regardless of summation order. Callers round only for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenCost(Decimal);

impl TokenCost {
    /// Creates a [`TokenCost`] from a decimal USD amount.
    ///
    /// Returns `None` if `value` is negative.
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Creates a [`TokenCost`] of exactly zero.
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Returns the underlying decimal value (USD).
    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    /// Returns `true` if this cost is zero.
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Divides the cost evenly across `parts`, returning zero for zero parts.
    pub fn average_over(self, parts: usize) -> Self {
        if parts == 0 {
            Self::zero()
        } else {
            Self(self.0 / Decimal::from(parts))
        }
    }
}

impl std::fmt::Display for TokenCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.6}", self.0.round_dp(6))
    }
}

impl std::ops::Add for TokenCost {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for TokenCost {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for TokenCost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, c| acc + c)
    }
}

// ---------------------------------------------------------------------------

/// Per-token pricing of an inference provider, quoted per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPrice {
    /// USD per one million prompt (input) tokens.
    pub prompt_per_million: Decimal,
    /// USD per one million completion (output) tokens.
    pub completion_per_million: Decimal,
}

impl TokenPrice {
    /// Creates a price pair. Returns `None` if either price is negative.
    pub fn new(prompt_per_million: Decimal, completion_per_million: Decimal) -> Option<Self> {
        if prompt_per_million.is_sign_negative() && !prompt_per_million.is_zero() {
            return None;
        }
        if completion_per_million.is_sign_negative() && !completion_per_million.is_zero() {
            return None;
        }
        Some(Self {
            prompt_per_million,
            completion_per_million,
        })
    }

    /// A price pair under which every call is free (used with the mock provider).
    pub fn free() -> Self {
        Self {
            prompt_per_million: Decimal::ZERO,
            completion_per_million: Decimal::ZERO,
        }
    }

    /// Computes `prompt * price_in + completion * price_out`.
    pub fn cost_of(&self, prompt: TokenCount, completion: TokenCount) -> TokenCost {
        let million = Decimal::from(1_000_000u64);
        let input = Decimal::from(prompt.as_u64()) * self.prompt_per_million / million;
        let output = Decimal::from(completion.as_u64()) * self.completion_per_million / million;
        TokenCost(input + output)
    }
}

// ---------------------------------------------------------------------------

/// Daily spending ceiling for inference calls.
///
/// Crossing the ceiling is advisory: it is reported, never enforced mid-run.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct CostCeiling(Decimal);

impl CostCeiling {
    /// Creates a [`CostCeiling`] (USD).
    ///
    /// Returns `None` if `limit` is not strictly positive.
    #[must_use]
    pub fn new(limit: Decimal) -> Option<Self> {
        if limit > Decimal::ZERO {
            Some(Self(limit))
        } else {
            None
        }
    }

    /// Returns the ceiling as a decimal (USD).
    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    /// Returns `true` if `accumulated` is strictly greater than this ceiling.
    pub fn is_exceeded_by(self, accumulated: TokenCost) -> bool {
        accumulated.as_decimal() > self.0
    }
}

impl std::fmt::Display for CostCeiling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Score types
// ---------------------------------------------------------------------------

/// A model-reported confidence in the range `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Confidence(f64);

impl Confidence {
    /// Creates a [`Confidence`], returning `None` if `value` is outside
    /// the valid range `[0.0, 1.0]`.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the confidence as an `f64` in `[0.0, 1.0]`.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// Relevance rank of an analysed article, always in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RankScore(u8);

impl RankScore {
    /// Lowest valid score.
    pub const MIN: u8 = 1;
    /// Highest valid score.
    pub const MAX: u8 = 5;

    /// Creates a [`RankScore`], returning `None` when `value` is outside `1..=5`.
    ///
    /// Out-of-range values are never clamped: a provider reporting them is
    /// drifting and the caller must surface that.
    #[must_use]
    pub fn new(value: i64) -> Option<Self> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    /// Returns the score as a `u8` in `1..=5`.
    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for RankScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/5", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Returns the UTC calendar day of this timestamp.
    pub fn date(self) -> NaiveDate {
        self.0.date_naive()
    }

    /// Hours elapsed from `self` until `later` (negative if `later` is earlier).
    pub fn hours_until(self, later: Timestamp) -> f64 {
        (later.0 - self.0).num_seconds() as f64 / 3600.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
