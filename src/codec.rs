//! Result codec for the packed transfer outcome
//!
//! The server-side transfer routine returns its result as one textual record:
//!
//! ```text
//! (transfer_id,success,message)
//! (16007,t,"Transfer completed successfully")
//! (,f,"insufficient funds")
//! ```
//!
//! This module turns that record into a [`TransferOutcome`] and back, and maps
//! the diagnostic text of a failed outcome onto the [`LedgerError`] taxonomy.
//!
//! Inside a quoted message a quote may be written `\"` or `""`, and a backslash
//! `\\`. Postgres writes composite values with the doubled forms.

use crate::types::{LedgerError, TransferId, TransferOutcome, TransferRequest};

const FIELD_COUNT: usize = 3;
const TRUE_TOKEN: &str = "t";
const FALSE_TOKEN: &str = "f";
const NULL_SENTINEL: &str = "<NULL>";
const QUOTE: &str = "\"";
const ESCAPED_QUOTE: &str = "\\\"";
const BACKSLASH: &str = "\\";
const ESCAPED_BACKSLASH: &str = "\\\\";

/// Decode a packed `(transfer_id,success,message)` record
///
/// # Errors
///
/// Returns `LedgerError::Internal` when the parentheses are missing, the record
/// does not hold three fields, or the transfer id is not an integer.
pub fn decode(packed: &str) -> Result<TransferOutcome, LedgerError> {
    let content = packed
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| {
            LedgerError::internal(format!(
                "invalid transfer result format, expected parentheses: {}",
                packed
            ))
        })?;

    // The message is last, so commas inside it stay part of the message
    let fields: Vec<&str> = content.splitn(FIELD_COUNT, ',').collect();
    if fields.len() != FIELD_COUNT {
        return Err(LedgerError::internal(format!(
            "invalid transfer result content, expected {} fields got {}: {}",
            FIELD_COUNT,
            fields.len(),
            content
        )));
    }

    Ok(TransferOutcome {
        transfer_id: decode_transfer_id(fields[0])?,
        success: fields[1].trim() == TRUE_TOKEN,
        message: decode_message(fields[2]),
    })
}

fn decode_transfer_id(field: &str) -> Result<TransferId, LedgerError> {
    let field = field.trim();
    if field.is_empty() || field == NULL_SENTINEL {
        return Ok(0);
    }
    field
        .parse::<TransferId>()
        .map_err(|_| LedgerError::internal(format!("invalid transfer_id: {}", field)))
}

fn decode_message(field: &str) -> String {
    let field = field.trim();
    match field
        .strip_prefix(QUOTE)
        .and_then(|rest| rest.strip_suffix(QUOTE))
    {
        Some(inner) => unescape(inner),
        None => field.to_string(),
    }
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            '"' if chars.peek() == Some(&'"') => {
                chars.next();
                out.push('"');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Encode an outcome in the packed record format
///
/// A zero transfer id is written as an empty field.
pub fn encode(outcome: &TransferOutcome) -> String {
    let transfer_id = if outcome.transfer_id == 0 {
        String::new()
    } else {
        outcome.transfer_id.to_string()
    };
    let success = if outcome.success { TRUE_TOKEN } else { FALSE_TOKEN };
    format!(
        "({},{},\"{}\")",
        transfer_id,
        success,
        outcome
            .message
            .replace(BACKSLASH, ESCAPED_BACKSLASH)
            .replace(QUOTE, ESCAPED_QUOTE)
    )
}

/// Turn an outcome into the executor's result
///
/// Success must carry a transfer id. Failures are classified by their
/// lower-cased diagnostic text; unknown text becomes `TransferFailed` with the
/// original message preserved.
pub fn classify(
    outcome: TransferOutcome,
    request: &TransferRequest,
) -> Result<TransferOutcome, LedgerError> {
    if outcome.success {
        if outcome.transfer_id == 0 {
            return Err(LedgerError::internal(
                "transfer reported success without a transfer id",
            ));
        }
        return Ok(outcome);
    }

    let normalized = outcome.message.to_lowercase();
    let error = if normalized.contains("insufficient funds") {
        LedgerError::insufficient_funds(request.source, request.amount, None)
    } else if normalized.contains("account does not exist") {
        LedgerError::not_found(outcome.message)
    } else if normalized.contains("transfer amount must be positive")
        || normalized.contains("cannot transfer to the same account")
        || normalized.contains("too many decimal places")
    {
        LedgerError::validation(outcome.message)
    } else {
        LedgerError::transfer_failed(outcome.message)
    };
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case::success(
        "(16007,t,\"Transfer completed successfully\")",
        16007,
        true,
        "Transfer completed successfully"
    )]
    #[case::empty_id("(,f,\"insufficient funds\")", 0, false, "insufficient funds")]
    #[case::null_sentinel("(<NULL>,f,\"insufficient funds\")", 0, false, "insufficient funds")]
    #[case::unquoted_message("(,f,boom)", 0, false, "boom")]
    #[case::escaped_quotes("(,f,\"account \\\"999\\\" gone\")", 0, false, "account \"999\" gone")]
    #[case::doubled_quotes("(,f,\"account \"\"999\"\" gone\")", 0, false, "account \"999\" gone")]
    #[case::escaped_backslash("(,f,\"path C:\\\\ledger\")", 0, false, "path C:\\ledger")]
    #[case::comma_in_message("(,f,\"source account does not exist, id 999\")", 0, false, "source account does not exist, id 999")]
    #[case::whitespace(" ( 12 , t , \"ok\" ) ", 12, true, "ok")]
    #[case::other_truth_token("(5,true,\"ok\")", 5, false, "ok")]
    fn test_decode(
        #[case] packed: &str,
        #[case] transfer_id: TransferId,
        #[case] success: bool,
        #[case] message: &str,
    ) {
        let outcome = decode(packed).unwrap();
        assert_eq!(outcome.transfer_id, transfer_id);
        assert_eq!(outcome.success, success);
        assert_eq!(outcome.message, message);
    }

    #[rstest]
    #[case::no_parentheses("16007,t,ok")]
    #[case::missing_close("(16007,t,ok")]
    #[case::too_few_fields("(16007,t)")]
    #[case::bad_id("(abc,t,\"ok\")")]
    #[case::negative_id("(-1,t,\"ok\")")]
    fn test_decode_errors(#[case] packed: &str) {
        let err = decode(packed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_encode_escapes_quotes() {
        let outcome = TransferOutcome::rejected("say \"no\"");
        let packed = encode(&outcome);
        assert_eq!(packed, "(,f,\"say \\\"no\\\"\")");
        assert_eq!(decode(&packed).unwrap(), outcome);
    }

    #[rstest]
    #[case::insufficient("insufficient funds", ErrorKind::InsufficientFunds)]
    #[case::insufficient_upper("Insufficient Funds for account 100", ErrorKind::InsufficientFunds)]
    #[case::missing_source("source account does not exist", ErrorKind::NotFound)]
    #[case::missing_destination("Destination account does not exist", ErrorKind::NotFound)]
    #[case::non_positive("transfer amount must be positive", ErrorKind::Validation)]
    #[case::same_account("Cannot transfer to the same account", ErrorKind::Validation)]
    #[case::unknown("daily limit exceeded", ErrorKind::TransferFailed)]
    fn test_classify_failures(#[case] message: &str, #[case] expected: ErrorKind) {
        let request = TransferRequest::new(100, 200, dec!(10));
        let err = classify(TransferOutcome::rejected(message), &request).unwrap_err();
        assert_eq!(err.kind(), expected);
    }

    #[test]
    fn test_classify_preserves_unknown_text() {
        let request = TransferRequest::new(100, 200, dec!(10));
        let err = classify(TransferOutcome::rejected("daily limit exceeded"), &request).unwrap_err();
        assert_eq!(err, LedgerError::transfer_failed("daily limit exceeded"));
    }

    #[test]
    fn test_classify_success() {
        let request = TransferRequest::new(100, 200, dec!(10));
        let outcome = classify(TransferOutcome::completed(9), &request).unwrap();
        assert_eq!(outcome.transfer_id, 9);
    }

    #[test]
    fn test_classify_success_without_id_is_internal() {
        let request = TransferRequest::new(100, 200, dec!(10));
        let outcome = TransferOutcome {
            transfer_id: 0,
            success: true,
            message: "ok".to_string(),
        };
        let err = classify(outcome, &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
