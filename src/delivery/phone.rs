use regex::Regex;
use std::sync::OnceLock;

fn local_msisdn() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // 0 + 7/8/9 + 0/1 + 8 digits
    RE.get_or_init(|| Regex::new(r"^0[789][01]\d{8}$").expect("static regex"))
}

/// Normalize a Nigerian mobile number to the 11-digit local form.
///
/// Accepts `08031234567`, `2348031234567`, `+234 803 123 4567` and
/// `8031234567`. Returns `None` for anything else.
pub fn normalize_msisdn(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = digits.strip_prefix('+').unwrap_or(&digits);

    let local = if let Some(rest) = digits.strip_prefix("234") {
        format!("0{}", rest)
    } else if digits.len() == 10 && !digits.starts_with('0') {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };

    local_msisdn().is_match(&local).then_some(local)
}

pub fn is_valid_nigerian_phone(raw: &str) -> bool {
    normalize_msisdn(raw).is_some()
}

/// Best-effort network guess from the number prefix. Ported numbers make this
/// unreliable, so it is only used for logging.
pub fn detect_network(phone: &str) -> &'static str {
    let Some(local) = normalize_msisdn(phone) else {
        return "unknown";
    };
    match &local[..4] {
        "0803" | "0806" | "0703" | "0706" | "0813" | "0816" | "0810" | "0814" | "0903"
        | "0906" | "0913" | "0916" | "0704" | "0707" => "mtn",
        "0805" | "0807" | "0705" | "0815" | "0811" | "0905" | "0915" => "glo",
        "0802" | "0808" | "0708" | "0812" | "0701" | "0902" | "0901" | "0904" | "0907"
        | "0912" => "airtel",
        "0809" | "0818" | "0817" | "0909" | "0908" => "9mobile",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_nigerian_phone() {
        assert!(is_valid_nigerian_phone("08031234567"));
        assert!(is_valid_nigerian_phone("09012345678"));
        assert!(is_valid_nigerian_phone("2348012345678"));
        assert!(is_valid_nigerian_phone("+234 803 123 4567"));
        assert!(is_valid_nigerian_phone("8031234567"));
        assert!(!is_valid_nigerian_phone("12345678"));
        assert!(!is_valid_nigerian_phone("abc12345678"));
        assert!(!is_valid_nigerian_phone("06031234567"));
        assert!(!is_valid_nigerian_phone("080312345678"));
    }

    #[test]
    fn test_normalizes_to_local_form() {
        assert_eq!(
            normalize_msisdn("+2348031234567").as_deref(),
            Some("08031234567")
        );
        assert_eq!(
            normalize_msisdn("0803-123-4567").as_deref(),
            Some("08031234567")
        );
    }

    #[test]
    fn test_detect_network() {
        assert_eq!(detect_network("08031234567"), "mtn");
        assert_eq!(detect_network("08051234567"), "glo");
        assert_eq!(detect_network("08021234567"), "airtel");
        assert_eq!(detect_network("08091234567"), "9mobile");
        assert_eq!(detect_network("nope"), "unknown");
    }
}
