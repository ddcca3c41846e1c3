//! US phone number display formatting.
//!
//! Leads store digits only; the UI shows them progressively formatted as the
//! user types.

/// Maximum digits in a US number without country code.
pub const US_PHONE_DIGITS: usize = 10;

/// Format up to ten digits of `input` as `(555) 123-4567`, producing the
/// partial form for shorter input (`"(555"`, `"(555) 12"`, ...).
pub fn format_phone_us(input: &str) -> String {
    let digits: String = input
        .chars()
        .filter(char::is_ascii_digit)
        .take(US_PHONE_DIGITS)
        .collect();
    match digits.len() {
        0 => String::new(),
        1..=3 => format!("({digits}"),
        4..=6 => format!("({}) {}", &digits[..3], &digits[3..]),
        _ => format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..]),
    }
}

/// Strip everything but digits.
pub fn unformat_phone(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}
