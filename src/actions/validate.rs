use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::ActionError;
use crate::db::LineItem;
use crate::ops::phone::{US_PHONE_DIGITS, unformat_phone};

static EMAIL_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$"));

/// Ordered validation rules. Only the first failure is reported.
#[derive(Debug, Default)]
pub(crate) struct Check {
    failure: Option<String>,
}

impl Check {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, ok: bool, message: &str) -> Self {
        if self.failure.is_none() && !ok {
            self.failure = Some(message.to_string());
        }
        self
    }

    /// Run `f` only while every earlier rule has passed.
    pub fn then(self, f: impl FnOnce(Self) -> Self) -> Self {
        if self.failure.is_some() { self } else { f(self) }
    }

    pub fn finish(self) -> Result<(), ActionError> {
        match self.failure {
            Some(message) => Err(ActionError::Validation(message)),
            None => Ok(()),
        }
    }
}

pub(crate) fn is_email(value: &str) -> bool {
    matches!(&*EMAIL_PATTERN, Ok(re) if re.is_match(value))
}

/// Empty or whitespace-only strings count as absent.
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn owned(value: &Option<String>) -> Option<String> {
    present(value).map(str::to_string)
}

pub(crate) fn optional_email_ok(value: &Option<String>) -> bool {
    present(value).is_none_or(is_email)
}

/// Phones are stored as bare digits; when given they must be a full US number.
pub(crate) fn optional_phone_ok(value: &Option<String>) -> bool {
    present(value).is_none_or(|raw| unformat_phone(raw).len() == US_PHONE_DIGITS)
}

pub(crate) fn optional_phone(value: &Option<String>) -> Option<String> {
    present(value).map(unformat_phone)
}

pub(crate) fn parse_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw.trim()).ok()
}

/// Parse an id whose absence means the record cannot exist.
pub(crate) fn existing_id(raw: &str, what: &str) -> Result<Uuid, ActionError> {
    parse_id(raw).ok_or_else(|| ActionError::not_found(what))
}

/// Parse an optional reference, reporting a malformed one as not found.
pub(crate) fn optional_ref(raw: &Option<String>, what: &str) -> Result<Option<Uuid>, ActionError> {
    present(raw).map(|id| existing_id(id, what)).transpose()
}

pub(crate) fn line_items_ok(items: &[LineItem]) -> bool {
    items.iter().all(|item| {
        !item.description.trim().is_empty()
            && item.quantity > Decimal::ZERO
            && item.unit_price >= Decimal::ZERO
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn first_failing_rule_wins() {
        let err = Check::new()
            .rule(true, "never")
            .rule(false, "Name is required.")
            .rule(false, "Email is invalid.")
            .finish()
            .expect_err("must fail");
        assert_eq!(err.to_string(), "Name is required.");
        assert!(Check::new().rule(true, "ok").finish().is_ok());
    }

    #[test]
    fn then_is_skipped_after_a_failure() {
        let mut ran = false;
        let _ = Check::new().rule(false, "first").then(|c| {
            ran = true;
            c
        });
        assert!(!ran);
    }

    #[test]
    fn email_and_phone_rules() {
        assert!(is_email("dana@northwind.test"));
        assert!(!is_email("dana@northwind"));
        assert!(!is_email("dana northwind.test"));
        assert!(optional_email_ok(&None));
        assert!(optional_email_ok(&Some("  ".to_string())));
        assert!(optional_phone_ok(&Some("(555) 123-4567".to_string())));
        assert!(!optional_phone_ok(&Some("555-1234".to_string())));
        assert_eq!(
            optional_phone(&Some("(555) 123-4567".to_string())),
            Some("5551234567".to_string())
        );
    }

    #[test]
    fn line_items_need_positive_quantities() {
        let item = |quantity, unit_price| LineItem {
            description: "Work".to_string(),
            quantity,
            unit_price,
        };
        assert!(line_items_ok(&[item(dec!(1), dec!(0))]));
        assert!(!line_items_ok(&[item(dec!(0), dec!(10))]));
        assert!(!line_items_ok(&[item(dec!(1), dec!(-1))]));
    }

    #[test]
    fn malformed_references_are_not_found() {
        let err = optional_ref(&Some("nope".to_string()), "Client").expect_err("must fail");
        assert_eq!(err.to_string(), "Client not found.");
        assert_eq!(optional_ref(&None, "Client").expect("none"), None);
    }
}
