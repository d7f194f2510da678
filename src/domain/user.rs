use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A subscriber phone number.
///
/// Numbers are normalized to a single international format before they enter
/// the system: a leading `0` or `+` is rewritten to the configured country
/// dial prefix, so `"0712345678"` and `"+254712345678"` both index the same
/// user as `"254712345678"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn normalized(&self, country_prefix: &str) -> PhoneNumber {
        let digits = self.0.trim();
        if let Some(rest) = digits.strip_prefix('0') {
            PhoneNumber(format!("{country_prefix}{rest}"))
        } else if let Some(rest) = digits.strip_prefix('+') {
            PhoneNumber(rest.to_string())
        } else {
            PhoneNumber(digits.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounded reputation score gating loan eligibility.
///
/// The domain is `[300, 850]`; adjustments saturate at the bounds and only
/// happen through repayment outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CreditScore(i32);

impl CreditScore {
    pub const MIN: i32 = 300;
    pub const MAX: i32 = 850;

    pub fn new(value: i32) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn starting() -> Self {
        Self(Self::MIN)
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    pub fn adjust(&mut self, delta: i32) {
        self.0 = (self.0 + delta).clamp(Self::MIN, Self::MAX);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub phone_number: PhoneNumber,
    pub national_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub credit_score: CreditScore,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Creates a user record. The phone number must already be normalized;
    /// wallet creation is the store's responsibility (one atomic unit).
    pub fn new(phone_number: PhoneNumber, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            phone_number,
            national_id: None,
            first_name: None,
            last_name: None,
            credit_score: CreditScore::starting(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
