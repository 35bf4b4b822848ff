//! Input-boundary checks for identifiers and monetary amounts
//!
//! Monetary values are exact decimals with at most [`MAX_FRACTIONAL_DIGITS`]
//! significant fractional digits. Excess precision is rejected, never rounded.

use rust_decimal::Decimal;

use super::account::AccountId;
use super::error::LedgerError;

/// Maximum number of significant fractional digits accepted for amounts
pub const MAX_FRACTIONAL_DIGITS: u32 = 6;

/// Collector for validation messages
///
/// Each violation is recorded independently so the caller sees all of them at
/// once, joined with `", "`.
#[derive(Debug, Default)]
pub struct ValidationErrors {
    messages: Vec<String>,
}

impl ValidationErrors {
    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_result(self) -> Result<(), LedgerError> {
        if self.messages.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::validation(self.messages.join(", ")))
        }
    }
}

/// Number of significant fractional digits (trailing zeros ignored)
pub fn fractional_digits(amount: Decimal) -> u32 {
    amount.normalize().scale()
}

pub fn validate_account_id(errors: &mut ValidationErrors, field: &str, id: AccountId) {
    if id == 0 {
        errors.push(format!("{} is required", field));
    }
}

/// Amount must be strictly positive with bounded precision
pub fn validate_amount(errors: &mut ValidationErrors, field: &str, amount: Decimal) {
    if amount.is_zero() {
        errors.push(format!("{} is required", field));
    } else if amount.is_sign_negative() {
        errors.push(format!("{} must be greater than 0", field));
    }
    if fractional_digits(amount) > MAX_FRACTIONAL_DIGITS {
        errors.push(format!(
            "{} has too many decimal places (max {})",
            field, MAX_FRACTIONAL_DIGITS
        ));
    }
}
