//! Billing configuration

use crate::error::{BillingError, BillingResult};

pub const DEFAULT_TRIAL_DAYS: i64 = 14;
pub const DEFAULT_INVOICE_DUE_DAYS: i64 = 30;
pub const DEFAULT_CURRENCY: &str = "usd";

/// Configuration for the subscription engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingConfig {
    /// Trial length for non-free plans
    pub trial_days: i64,
    /// Days between invoice issue and due date
    pub invoice_due_days: i64,
    /// ISO 4217 currency code, lowercase
    pub currency: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            trial_days: DEFAULT_TRIAL_DAYS,
            invoice_due_days: DEFAULT_INVOICE_DUE_DAYS,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl BillingConfig {
    /// Create config from environment variables, falling back to defaults
    pub fn from_env() -> BillingResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            trial_days: parse_days("BILLING_TRIAL_DAYS", defaults.trial_days)?,
            invoice_due_days: parse_days("BILLING_INVOICE_DUE_DAYS", defaults.invoice_due_days)?,
            currency: match std::env::var("BILLING_CURRENCY") {
                Ok(c) if c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()) => {
                    c.to_ascii_lowercase()
                }
                Ok(c) => {
                    return Err(BillingError::Config(format!(
                        "BILLING_CURRENCY must be a 3-letter code, got '{}'",
                        c
                    )))
                }
                Err(_) => defaults.currency,
            },
        })
    }
}

fn parse_days(var: &str, default: i64) -> BillingResult<i64> {
    match std::env::var(var) {
        Ok(raw) => match raw.parse::<i64>() {
            Ok(days) if days > 0 => Ok(days),
            _ => Err(BillingError::Config(format!(
                "{} must be a positive integer, got '{}'",
                var, raw
            ))),
        },
        Err(_) => Ok(default),
    }
}
