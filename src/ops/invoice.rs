//! Invoice numbering and totals.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{
    BillingSettingsRecord, CreateInvoiceParams, InvoiceStore, LineItem, line_items_total,
};

/// `{prefix}-{year}-{seq:05}`.
pub fn sequence_invoice_number(prefix: &str, year: i32, seq: i64) -> String {
    format!("{prefix}-{year}-{seq:05}")
}

/// `{prefix}-{yyyymmddHHMMSS}-{4 hex}`, used when the sequence is
/// unavailable.
pub fn fallback_invoice_number(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().r#gen();
    format!("{prefix}-{}-{suffix:04x}", now.format("%Y%m%d%H%M%S"))
}

/// Allocate the next invoice number from the store's sequence, falling back
/// to a timestamp-based number when the sequence call fails.
pub async fn next_invoice_number(store: &dyn InvoiceStore, prefix: &str) -> String {
    let now = Utc::now();
    match store.next_invoice_sequence().await {
        Ok(seq) => sequence_invoice_number(prefix, now.year(), seq),
        Err(e) => {
            tracing::warn!(error = %e, "Invoice sequence unavailable, using timestamp number");
            fallback_invoice_number(prefix, now)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// `tax_rate` is a fraction (`0.0825` for 8.25%).
pub fn compute_totals(items: &[LineItem], tax_rate: Decimal) -> InvoiceTotals {
    let subtotal = line_items_total(items).round_dp(2);
    let tax = (subtotal * tax_rate).round_dp(2);
    InvoiceTotals {
        subtotal,
        tax,
        total: (subtotal + tax).round_dp(2),
    }
}

#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub client_id: Option<Uuid>,
    pub proposal_id: Option<Uuid>,
    pub line_items: Vec<LineItem>,
    pub tax_rate: Option<Decimal>,
    pub issued_on: NaiveDate,
    pub due_on: Option<NaiveDate>,
}

/// Fill in totals, due date and tax rate from billing settings.
pub fn build_invoice(
    draft: InvoiceDraft,
    settings: &BillingSettingsRecord,
    invoice_number: String,
    share_token: String,
) -> CreateInvoiceParams {
    let tax_rate = draft.tax_rate.unwrap_or(settings.default_tax_rate);
    let totals = compute_totals(&draft.line_items, tax_rate);
    let due_on = draft.due_on.unwrap_or_else(|| {
        draft.issued_on + Duration::days(i64::from(settings.payment_terms_days.max(0)))
    });
    CreateInvoiceParams {
        invoice_number,
        client_id: draft.client_id,
        proposal_id: draft.proposal_id,
        line_items: draft.line_items,
        subtotal: totals.subtotal,
        tax_rate,
        tax: totals.tax,
        total: totals.total,
        issued_on: draft.issued_on,
        due_on,
        share_token,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::db::{InvoiceRecord, InvoiceStore};
    use crate::error::DatabaseError;
    use crate::testing::test_db;

    #[test]
    fn sequence_numbers_are_zero_padded() {
        assert_eq!(sequence_invoice_number("INV", 2025, 7), "INV-2025-00007");
        assert_eq!(
            sequence_invoice_number("ACME", 2025, 123_456),
            "ACME-2025-123456"
        );
    }

    #[test]
    fn fallback_numbers_use_timestamp_and_hex_suffix() {
        let now = Utc
            .with_ymd_and_hms(2025, 3, 9, 14, 5, 7)
            .single()
            .expect("valid time");
        let number = fallback_invoice_number("INV", now);
        let (head, suffix) = number.rsplit_once('-').expect("suffix");
        assert_eq!(head, "INV-20250309140507");
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    struct BrokenSequence;

    #[async_trait]
    impl InvoiceStore for BrokenSequence {
        async fn next_invoice_sequence(&self) -> Result<i64, DatabaseError> {
            Err(DatabaseError::Query("sequence missing".to_string()))
        }
        async fn create_invoice(
            &self,
            _input: &CreateInvoiceParams,
        ) -> Result<InvoiceRecord, DatabaseError> {
            unimplemented!()
        }
        async fn get_invoice(&self, _id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError> {
            Ok(None)
        }
        async fn get_invoice_by_share_token(
            &self,
            _token: &str,
        ) -> Result<Option<InvoiceRecord>, DatabaseError> {
            Ok(None)
        }
        async fn list_invoices(
            &self,
            _client_id: Option<Uuid>,
        ) -> Result<Vec<InvoiceRecord>, DatabaseError> {
            Ok(Vec::new())
        }
        async fn mark_invoice_paid(
            &self,
            _id: Uuid,
        ) -> Result<Option<InvoiceRecord>, DatabaseError> {
            Ok(None)
        }
        async fn archive_invoice(&self, _id: Uuid) -> Result<bool, DatabaseError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn failing_sequence_falls_back_to_timestamp_number() {
        let number = next_invoice_number(&BrokenSequence, "INV").await;
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3, "{number}");
        assert_eq!(parts[1].len(), 14, "{number}");
    }

    #[tokio::test]
    async fn concurrent_numbers_strictly_increase() {
        let fixture = test_db().await;
        let store: Arc<dyn InvoiceStore> = Arc::new(fixture.db.clone());
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { next_invoice_number(store.as_ref(), "INV").await })
            })
            .collect();
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.expect("join"));
        }
        let unique: HashSet<&String> = numbers.iter().collect();
        assert_eq!(unique.len(), numbers.len());

        let year = Utc::now().year();
        let mut seqs: Vec<i64> = numbers
            .iter()
            .map(|n| {
                let prefix = format!("INV-{year}-");
                n.strip_prefix(&prefix)
                    .and_then(|s| s.parse().ok())
                    .expect("sequence number")
            })
            .collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=12).collect::<Vec<i64>>());

        let later = next_invoice_number(store.as_ref(), "INV").await;
        assert_eq!(later, sequence_invoice_number("INV", year, 13));
    }

    #[test]
    fn build_invoice_applies_settings() {
        let settings = BillingSettingsRecord {
            default_tax_rate: dec!(0.1),
            payment_terms_days: 14,
            ..BillingSettingsRecord::default()
        };
        let issued_on = NaiveDate::from_ymd_opt(2025, 1, 10).expect("date");
        let params = build_invoice(
            InvoiceDraft {
                client_id: None,
                proposal_id: None,
                line_items: vec![LineItem {
                    description: "Retainer".to_string(),
                    quantity: dec!(2),
                    unit_price: dec!(49.995),
                }],
                tax_rate: None,
                issued_on,
                due_on: None,
            },
            &settings,
            "INV-2025-00001".to_string(),
            "token".to_string(),
        );
        assert_eq!(params.subtotal, dec!(99.99));
        assert_eq!(params.tax, dec!(10.00));
        assert_eq!(params.total, dec!(109.99));
        assert_eq!(params.tax_rate, dec!(0.1));
        assert_eq!(params.due_on, NaiveDate::from_ymd_opt(2025, 1, 24).expect("date"));
    }
}
