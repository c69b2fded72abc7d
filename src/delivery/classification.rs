//! Provider response vocabularies mapped onto [`DeliveryOutcome`].
//!
//! Every code or status word a provider is known to send has one row here.
//! Anything missing from a table is `Unknown`, which the executor treats the
//! same as `Pending`: requery once, then park.

use super::types::DeliveryOutcome;

/// VTpass response codes. `000` is absent: it only means the
/// request was accepted and defers to `content.transactions.status`.
const VTPASS_CODES: &[(&str, DeliveryOutcome)] = &[
    ("099", DeliveryOutcome::Pending),  // transaction is processing
    ("089", DeliveryOutcome::Pending),  // request is being processed
    ("014", DeliveryOutcome::Duplicate), // request id already exists
    ("019", DeliveryOutcome::Duplicate), // likely duplicate transaction
    ("010", DeliveryOutcome::Failed),   // variation code does not exist
    ("011", DeliveryOutcome::Failed),   // invalid arguments
    ("012", DeliveryOutcome::Failed),   // product does not exist
    ("013", DeliveryOutcome::Failed),   // amount below minimum
    ("015", DeliveryOutcome::Failed),   // invalid request id
    ("016", DeliveryOutcome::Failed),   // transaction failed
    ("017", DeliveryOutcome::Failed),   // amount above maximum
    ("018", DeliveryOutcome::Failed),   // low wallet balance upstream
    ("030", DeliveryOutcome::Failed),   // biller not reachable
    ("031", DeliveryOutcome::Failed),   // below minimum quantity
    ("032", DeliveryOutcome::Failed),   // above maximum quantity
    ("033", DeliveryOutcome::Failed),   // invalid quantity
    ("034", DeliveryOutcome::Failed),   // service suspended
    ("035", DeliveryOutcome::Failed),   // service inactive
    ("040", DeliveryOutcome::Failed),   // transaction reversal
    ("085", DeliveryOutcome::Failed),   // improper request id
    ("091", DeliveryOutcome::Failed),   // transaction not processed
    ("087", DeliveryOutcome::AuthError), // invalid credentials
    ("021", DeliveryOutcome::AuthError), // account locked
    ("022", DeliveryOutcome::AuthError), // account suspended
    ("023", DeliveryOutcome::AuthError), // api access not enabled
    ("024", DeliveryOutcome::AuthError), // account inactive
    ("027", DeliveryOutcome::AuthError), // ip not whitelisted
];

/// `content.transactions.status` values seen alongside code `000`
const VTPASS_TRANSACTION_STATUSES: &[(&str, DeliveryOutcome)] = &[
    ("delivered", DeliveryOutcome::Delivered),
    ("successful", DeliveryOutcome::Delivered),
    ("pending", DeliveryOutcome::Pending),
    ("initiated", DeliveryOutcome::Pending),
    ("failed", DeliveryOutcome::Failed),
    ("reversed", DeliveryOutcome::Failed),
];

/// Legacy SME provider `Status` words
const LEGACY_STATUSES: &[(&str, DeliveryOutcome)] = &[
    ("successful", DeliveryOutcome::Delivered),
    ("success", DeliveryOutcome::Delivered),
    ("delivered", DeliveryOutcome::Delivered),
    ("pending", DeliveryOutcome::Pending),
    ("processing", DeliveryOutcome::Pending),
    ("initiated", DeliveryOutcome::Pending),
    ("failed", DeliveryOutcome::Failed),
    ("fail", DeliveryOutcome::Failed),
    ("insufficient_balance", DeliveryOutcome::Failed),
    ("invalid_plan", DeliveryOutcome::Failed),
    ("invalid_number", DeliveryOutcome::Failed),
    ("duplicate", DeliveryOutcome::Duplicate),
    ("already_processed", DeliveryOutcome::Duplicate),
    ("unauthorized", DeliveryOutcome::AuthError),
    ("invalid_token", DeliveryOutcome::AuthError),
];

fn lookup(table: &[(&str, DeliveryOutcome)], key: &str) -> DeliveryOutcome {
    let key = key.trim().to_ascii_lowercase();
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, outcome)| *outcome)
        .unwrap_or(DeliveryOutcome::Unknown)
}

/// Classify a VTpass reply from its response code and, for `000`, the
/// transaction status inside `content`.
pub fn classify_vtpass(code: Option<&str>, transaction_status: Option<&str>) -> DeliveryOutcome {
    match code.map(str::trim) {
        Some("000") => transaction_status
            .map(|s| lookup(VTPASS_TRANSACTION_STATUSES, s))
            .unwrap_or(DeliveryOutcome::Unknown),
        Some(code) => lookup(VTPASS_CODES, code),
        None => DeliveryOutcome::Unknown,
    }
}

pub fn classify_legacy(status: Option<&str>) -> DeliveryOutcome {
    status
        .map(|s| lookup(LEGACY_STATUSES, &s.replace([' ', '-'], "_")))
        .unwrap_or(DeliveryOutcome::Unknown)
}

/// Settlement a delivery webhook asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDeliveryStatus {
    Success,
    Pending,
    Failed,
}

/// Map a delivery webhook status word from either provider
pub fn map_webhook_status(status: &str) -> Option<WebhookDeliveryStatus> {
    let from_vtpass = lookup(VTPASS_TRANSACTION_STATUSES, status);
    let outcome = if from_vtpass == DeliveryOutcome::Unknown {
        lookup(LEGACY_STATUSES, status)
    } else {
        from_vtpass
    };

    match outcome {
        DeliveryOutcome::Delivered => Some(WebhookDeliveryStatus::Success),
        DeliveryOutcome::Pending => Some(WebhookDeliveryStatus::Pending),
        DeliveryOutcome::Failed => Some(WebhookDeliveryStatus::Failed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vtpass_000_defers_to_transaction_status() {
        assert_eq!(
            classify_vtpass(Some("000"), Some("delivered")),
            DeliveryOutcome::Delivered
        );
        assert_eq!(
            classify_vtpass(Some("000"), Some("initiated")),
            DeliveryOutcome::Pending
        );
        assert_eq!(
            classify_vtpass(Some("000"), Some("reversed")),
            DeliveryOutcome::Failed
        );
        assert_eq!(classify_vtpass(Some("000"), None), DeliveryOutcome::Unknown);
    }

    #[test]
    fn test_vtpass_code_table() {
        assert_eq!(classify_vtpass(Some("099"), None), DeliveryOutcome::Pending);
        assert_eq!(classify_vtpass(Some("089"), None), DeliveryOutcome::Pending);
        assert_eq!(classify_vtpass(Some("014"), None), DeliveryOutcome::Duplicate);
        assert_eq!(classify_vtpass(Some("019"), None), DeliveryOutcome::Duplicate);
        assert_eq!(classify_vtpass(Some("016"), None), DeliveryOutcome::Failed);
        assert_eq!(classify_vtpass(Some("018"), None), DeliveryOutcome::Failed);
        assert_eq!(classify_vtpass(Some("091"), None), DeliveryOutcome::Failed);
        assert_eq!(classify_vtpass(Some("087"), None), DeliveryOutcome::AuthError);
        assert_eq!(classify_vtpass(Some("027"), None), DeliveryOutcome::AuthError);
    }

    #[test]
    fn test_vtpass_failed_ranges_are_complete() {
        for code in ["010", "011", "012", "013", "015", "017"] {
            assert_eq!(classify_vtpass(Some(code), None), DeliveryOutcome::Failed, "{}", code);
        }
        for code in 30..=35 {
            let code = format!("{:03}", code);
            assert_eq!(classify_vtpass(Some(&code), None), DeliveryOutcome::Failed, "{}", code);
        }
        for code in ["021", "022", "023", "024"] {
            assert_eq!(
                classify_vtpass(Some(code), None),
                DeliveryOutcome::AuthError,
                "{}",
                code
            );
        }
    }

    #[test]
    fn test_unlisted_codes_are_unknown() {
        assert_eq!(classify_vtpass(Some("020"), None), DeliveryOutcome::Unknown);
        assert_eq!(classify_vtpass(Some("999"), None), DeliveryOutcome::Unknown);
        assert_eq!(classify_vtpass(None, Some("delivered")), DeliveryOutcome::Unknown);
    }

    #[test]
    fn test_legacy_status_words() {
        assert_eq!(classify_legacy(Some("successful")), DeliveryOutcome::Delivered);
        assert_eq!(classify_legacy(Some("Processing")), DeliveryOutcome::Pending);
        assert_eq!(
            classify_legacy(Some("insufficient balance")),
            DeliveryOutcome::Failed
        );
        assert_eq!(
            classify_legacy(Some("already_processed")),
            DeliveryOutcome::Duplicate
        );
        assert_eq!(classify_legacy(Some("invalid_token")), DeliveryOutcome::AuthError);
        assert_eq!(classify_legacy(Some("queued")), DeliveryOutcome::Unknown);
        assert_eq!(classify_legacy(None), DeliveryOutcome::Unknown);
    }

    #[test]
    fn test_webhook_vocabulary() {
        assert_eq!(
            map_webhook_status("delivered"),
            Some(WebhookDeliveryStatus::Success)
        );
        assert_eq!(
            map_webhook_status("successful"),
            Some(WebhookDeliveryStatus::Success)
        );
        assert_eq!(
            map_webhook_status("reversed"),
            Some(WebhookDeliveryStatus::Failed)
        );
        assert_eq!(
            map_webhook_status("processing"),
            Some(WebhookDeliveryStatus::Pending)
        );
        assert_eq!(map_webhook_status("duplicate"), None);
    }
}
