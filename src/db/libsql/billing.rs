use libsql::{Value, params, params_from_iter};
use uuid::Uuid;

use crate::db::{
    BILLING_SETTINGS_ID, BillingSettingsRecord, BillingSettingsStore, CreateInvoiceParams,
    CreateProposalParams, InvoiceRecord, InvoiceStatus, InvoiceStore, ProposalRecord,
    ProposalStatus, ProposalStore, UpsertBillingSettingsParams, parse_db_enum,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_date, get_i64, get_opt_i64, get_opt_text, get_text, now_text, opt_text,
    opt_uuid, parse_date, parse_decimal, parse_line_items, parse_opt_timestamp, parse_opt_uuid,
    parse_timestamp, parse_uuid, query_all, query_one, query_opt,
};

const PROPOSAL_COLUMNS: &str = "id, lead_id, client_id, title, status, line_items, total, \
     share_token, password_hash, sent_at, accepted_at, deleted_at, created_at, updated_at";
const INVOICE_COLUMNS: &str = "id, invoice_number, client_id, proposal_id, status, line_items, \
     subtotal, tax_rate, tax, total, issued_on, due_on, paid_at, share_token, deleted_at, \
     created_at, updated_at";
const BILLING_COLUMNS: &str = "business_name, business_email, business_address, invoice_prefix, \
     payment_terms_days, default_tax_rate, default_hourly_rate, updated_at";

fn row_to_proposal_record(row: &libsql::Row) -> Result<ProposalRecord, DatabaseError> {
    Ok(ProposalRecord {
        id: parse_uuid(&get_text(row, 0), "proposal.id")?,
        lead_id: parse_opt_uuid(get_opt_text(row, 1), "proposal.lead_id")?,
        client_id: parse_opt_uuid(get_opt_text(row, 2), "proposal.client_id")?,
        title: get_text(row, 3),
        status: parse_db_enum(&get_text(row, 4))?,
        line_items: parse_line_items(&get_text(row, 5))?,
        total: parse_decimal(&get_text(row, 6), "total")?,
        share_token: get_text(row, 7),
        password_hash: get_opt_text(row, 8),
        sent_at: parse_opt_timestamp(get_opt_text(row, 9))?,
        accepted_at: parse_opt_timestamp(get_opt_text(row, 10))?,
        deleted_at: parse_opt_timestamp(get_opt_text(row, 11))?,
        created_at: parse_timestamp(&get_text(row, 12))?,
        updated_at: parse_timestamp(&get_text(row, 13))?,
    })
}

fn row_to_invoice_record(row: &libsql::Row) -> Result<InvoiceRecord, DatabaseError> {
    Ok(InvoiceRecord {
        id: parse_uuid(&get_text(row, 0), "invoice.id")?,
        invoice_number: get_text(row, 1),
        client_id: parse_opt_uuid(get_opt_text(row, 2), "invoice.client_id")?,
        proposal_id: parse_opt_uuid(get_opt_text(row, 3), "invoice.proposal_id")?,
        status: parse_db_enum(&get_text(row, 4))?,
        line_items: parse_line_items(&get_text(row, 5))?,
        subtotal: parse_decimal(&get_text(row, 6), "subtotal")?,
        tax_rate: parse_decimal(&get_text(row, 7), "tax_rate")?,
        tax: parse_decimal(&get_text(row, 8), "tax")?,
        total: parse_decimal(&get_text(row, 9), "total")?,
        issued_on: parse_date(&get_text(row, 10), "issued_on")?,
        due_on: parse_date(&get_text(row, 11), "due_on")?,
        paid_at: parse_opt_timestamp(get_opt_text(row, 12))?,
        share_token: get_text(row, 13),
        deleted_at: parse_opt_timestamp(get_opt_text(row, 14))?,
        created_at: parse_timestamp(&get_text(row, 15))?,
        updated_at: parse_timestamp(&get_text(row, 16))?,
    })
}

fn row_to_billing_settings(row: &libsql::Row) -> Result<BillingSettingsRecord, DatabaseError> {
    let terms = get_opt_i64(row, 4).unwrap_or(30);
    Ok(BillingSettingsRecord {
        business_name: get_text(row, 0),
        business_email: get_opt_text(row, 1),
        business_address: get_opt_text(row, 2),
        invoice_prefix: get_text(row, 3),
        payment_terms_days: i32::try_from(terms).map_err(|_| {
            DatabaseError::Serialization(format!("invalid payment_terms_days {terms}"))
        })?,
        default_tax_rate: parse_decimal(&get_text(row, 5), "default_tax_rate")?,
        default_hourly_rate: parse_decimal(&get_text(row, 6), "default_hourly_rate")?,
        updated_at: parse_opt_timestamp(get_opt_text(row, 7))?,
    })
}

#[async_trait::async_trait]
impl ProposalStore for LibSqlBackend {
    async fn create_proposal(
        &self,
        input: &CreateProposalParams,
    ) -> Result<ProposalRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        let line_items = serde_json::to_string(&input.line_items)?;
        conn.execute(
            "INSERT INTO proposals (id, lead_id, client_id, title, status, line_items, total, share_token, password_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.as_str(),
                opt_uuid(input.lead_id),
                opt_uuid(input.client_id),
                input.title.trim(),
                ProposalStatus::Draft.as_str(),
                line_items,
                input.total.to_string(),
                input.share_token.as_str(),
                opt_text(input.password_hash.as_deref()),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = ?1"),
            params![id.as_str()],
            row_to_proposal_record,
            "created proposal",
        )
        .await
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<ProposalRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE id = ?1 AND deleted_at IS NULL"
            ),
            params![id.to_string()],
            row_to_proposal_record,
        )
        .await
    }

    async fn get_proposal_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<ProposalRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "SELECT {PROPOSAL_COLUMNS} FROM proposals \
                 WHERE share_token = ?1 AND deleted_at IS NULL"
            ),
            params![token],
            row_to_proposal_record,
        )
        .await
    }

    async fn list_proposals(&self) -> Result<Vec<ProposalRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {PROPOSAL_COLUMNS} FROM proposals WHERE deleted_at IS NULL \
                 ORDER BY created_at DESC, id ASC"
            ),
            (),
            row_to_proposal_record,
        )
        .await
    }

    async fn transition_proposal(
        &self,
        id: Uuid,
        from: &[ProposalStatus],
        to: ProposalStatus,
    ) -> Result<Option<ProposalRecord>, DatabaseError> {
        if from.is_empty() {
            return Ok(None);
        }
        let now = now_text();
        let mut sql = String::from("UPDATE proposals SET status = ?1, updated_at = ?2");
        match to {
            ProposalStatus::Sent => sql.push_str(", sent_at = ?2"),
            ProposalStatus::Accepted => sql.push_str(", accepted_at = ?2"),
            _ => {}
        }
        sql.push_str(" WHERE id = ?3 AND deleted_at IS NULL AND status IN (");
        let placeholders: Vec<String> = (0..from.len()).map(|i| format!("?{}", i + 4)).collect();
        sql.push_str(&placeholders.join(", "));
        sql.push(')');

        let mut values = vec![
            Value::Text(to.as_str().to_string()),
            Value::Text(now),
            Value::Text(id.to_string()),
        ];
        values.extend(from.iter().map(|s| Value::Text(s.as_str().to_string())));

        let conn = self.connect().await?;
        let updated = conn.execute(&sql, params_from_iter(values)).await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_proposal(id).await
    }

    async fn archive_proposal(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let archived = conn
            .execute(
                "UPDATE proposals SET deleted_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), now_text()],
            )
            .await?;
        Ok(archived > 0)
    }
}

#[async_trait::async_trait]
impl InvoiceStore for LibSqlBackend {
    async fn next_invoice_sequence(&self) -> Result<i64, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "UPDATE counters SET value = value + 1 WHERE name = 'invoice_number' \
                 RETURNING value",
                (),
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("invoice_number counter missing".to_string()))?;
        Ok(get_i64(&row, 0))
    }

    async fn create_invoice(
        &self,
        input: &CreateInvoiceParams,
    ) -> Result<InvoiceRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        let line_items = serde_json::to_string(&input.line_items)?;
        conn.execute(
            "INSERT INTO invoices \
             (id, invoice_number, client_id, proposal_id, status, line_items, subtotal, tax_rate, tax, total, issued_on, due_on, share_token) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id.as_str(),
                input.invoice_number.as_str(),
                opt_uuid(input.client_id),
                opt_uuid(input.proposal_id),
                InvoiceStatus::Draft.as_str(),
                line_items,
                input.subtotal.to_string(),
                input.tax_rate.to_string(),
                input.tax.to_string(),
                input.total.to_string(),
                fmt_date(input.issued_on),
                fmt_date(input.due_on),
                input.share_token.as_str(),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1"),
            params![id.as_str()],
            row_to_invoice_record,
            "created invoice",
        )
        .await
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?1 AND deleted_at IS NULL"
            ),
            params![id.to_string()],
            row_to_invoice_record,
        )
        .await
    }

    async fn get_invoice_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices \
                 WHERE share_token = ?1 AND deleted_at IS NULL"
            ),
            params![token],
            row_to_invoice_record,
        )
        .await
    }

    async fn list_invoices(
        &self,
        client_id: Option<Uuid>,
    ) -> Result<Vec<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_all(
            &conn,
            &format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices \
                 WHERE deleted_at IS NULL AND (?1 IS NULL OR client_id = ?1) \
                 ORDER BY created_at DESC, id ASC"
            ),
            params![opt_uuid(client_id)],
            row_to_invoice_record,
        )
        .await
    }

    async fn mark_invoice_paid(&self, id: Uuid) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let now = now_text();
        let updated = conn
            .execute(
                "UPDATE invoices SET status = 'paid', paid_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND deleted_at IS NULL AND status IN ('draft', 'sent')",
                params![id.to_string(), now],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_invoice(id).await
    }

    async fn archive_invoice(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let archived = conn
            .execute(
                "UPDATE invoices SET deleted_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), now_text()],
            )
            .await?;
        Ok(archived > 0)
    }
}

#[async_trait::async_trait]
impl BillingSettingsStore for LibSqlBackend {
    async fn get_billing_settings(&self) -> Result<Option<BillingSettingsRecord>, DatabaseError> {
        let conn = self.connect().await?;
        query_opt(
            &conn,
            &format!("SELECT {BILLING_COLUMNS} FROM billing_settings WHERE id = ?1"),
            params![BILLING_SETTINGS_ID],
            row_to_billing_settings,
        )
        .await
    }

    async fn upsert_billing_settings(
        &self,
        input: &UpsertBillingSettingsParams,
    ) -> Result<BillingSettingsRecord, DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO billing_settings \
             (id, business_name, business_email, business_address, invoice_prefix, payment_terms_days, default_tax_rate, default_hourly_rate, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT (id) DO UPDATE SET \
               business_name = excluded.business_name, \
               business_email = excluded.business_email, \
               business_address = excluded.business_address, \
               invoice_prefix = excluded.invoice_prefix, \
               payment_terms_days = excluded.payment_terms_days, \
               default_tax_rate = excluded.default_tax_rate, \
               default_hourly_rate = excluded.default_hourly_rate, \
               updated_at = excluded.updated_at",
            params![
                BILLING_SETTINGS_ID,
                input.business_name.trim(),
                opt_text(input.business_email.as_deref()),
                opt_text(input.business_address.as_deref()),
                input.invoice_prefix.trim(),
                i64::from(input.payment_terms_days),
                input.default_tax_rate.to_string(),
                input.default_hourly_rate.to_string(),
                now_text(),
            ],
        )
        .await?;
        query_one(
            &conn,
            &format!("SELECT {BILLING_COLUMNS} FROM billing_settings WHERE id = ?1"),
            params![BILLING_SETTINGS_ID],
            row_to_billing_settings,
            "billing settings",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::db::LineItem;
    use crate::testing::test_db;

    fn proposal_params(token: &str) -> CreateProposalParams {
        CreateProposalParams {
            lead_id: None,
            client_id: None,
            title: "Website rebuild".to_string(),
            line_items: vec![LineItem {
                description: "Design".to_string(),
                quantity: dec!(10),
                unit_price: dec!(150),
            }],
            total: dec!(1500.00),
            share_token: token.to_string(),
            password_hash: None,
        }
    }

    fn invoice_params(number: &str, token: &str) -> CreateInvoiceParams {
        CreateInvoiceParams {
            invoice_number: number.to_string(),
            client_id: None,
            proposal_id: None,
            line_items: Vec::new(),
            subtotal: dec!(100),
            tax_rate: dec!(0.08),
            tax: dec!(8.00),
            total: dec!(108.00),
            issued_on: NaiveDate::from_ymd_opt(2026, 4, 1).expect("date"),
            due_on: NaiveDate::from_ymd_opt(2026, 5, 1).expect("date"),
            share_token: token.to_string(),
        }
    }

    #[tokio::test]
    async fn proposal_transitions_are_guarded() {
        let fixture = test_db().await;
        let proposal = fixture
            .db
            .create_proposal(&proposal_params("tok-1"))
            .await
            .expect("create");
        assert_eq!(proposal.status, ProposalStatus::Draft);
        assert_eq!(proposal.line_items.len(), 1);

        assert!(
            fixture
                .db
                .transition_proposal(proposal.id, &[ProposalStatus::Sent], ProposalStatus::Accepted)
                .await
                .expect("guard")
                .is_none(),
            "draft cannot be accepted"
        );

        let sent = fixture
            .db
            .transition_proposal(proposal.id, &[ProposalStatus::Draft], ProposalStatus::Sent)
            .await
            .expect("send")
            .expect("was draft");
        assert_eq!(sent.status, ProposalStatus::Sent);
        assert!(sent.sent_at.is_some());

        let accepted = fixture
            .db
            .transition_proposal(
                proposal.id,
                &[ProposalStatus::Sent, ProposalStatus::Viewed],
                ProposalStatus::Accepted,
            )
            .await
            .expect("accept")
            .expect("was sent");
        assert!(accepted.accepted_at.is_some());
    }

    #[tokio::test]
    async fn share_token_lookup_respects_soft_delete() {
        let fixture = test_db().await;
        let proposal = fixture
            .db
            .create_proposal(&proposal_params("tok-share"))
            .await
            .expect("create");
        assert!(
            fixture
                .db
                .get_proposal_by_share_token("tok-share")
                .await
                .expect("lookup")
                .is_some()
        );
        fixture
            .db
            .archive_proposal(proposal.id)
            .await
            .expect("archive");
        assert!(
            fixture
                .db
                .get_proposal_by_share_token("tok-share")
                .await
                .expect("lookup")
                .is_none()
        );
    }

    #[tokio::test]
    async fn invoice_sequence_strictly_increases_under_concurrency() {
        let fixture = test_db().await;
        let calls = (0..16).map(|_| fixture.db.next_invoice_sequence());
        let results = futures::future::join_all(calls).await;
        let values: Vec<i64> = results
            .into_iter()
            .map(|r| r.expect("sequence"))
            .collect();
        let distinct: BTreeSet<i64> = values.iter().copied().collect();
        assert_eq!(distinct.len(), values.len(), "duplicates in {values:?}");
        assert_eq!(distinct.first(), Some(&1));
        assert_eq!(distinct.last(), Some(&16));

        let next = fixture.db.next_invoice_sequence().await.expect("next");
        assert_eq!(next, 17);
    }

    #[tokio::test]
    async fn invoices_mark_paid_once() {
        let fixture = test_db().await;
        let invoice = fixture
            .db
            .create_invoice(&invoice_params("INV-2026-00001", "inv-tok"))
            .await
            .expect("create");
        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.tax, dec!(8.00));

        let paid = fixture
            .db
            .mark_invoice_paid(invoice.id)
            .await
            .expect("pay")
            .expect("was payable");
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert!(paid.paid_at.is_some());
        assert!(
            fixture
                .db
                .mark_invoice_paid(invoice.id)
                .await
                .expect("pay again")
                .is_none()
        );

        let dup = fixture
            .db
            .create_invoice(&invoice_params("INV-2026-00001", "inv-tok-2"))
            .await
            .expect_err("invoice number is unique");
        assert!(matches!(dup, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn billing_settings_upsert_keeps_one_row() {
        let fixture = test_db().await;
        assert!(
            fixture
                .db
                .get_billing_settings()
                .await
                .expect("get")
                .is_none()
        );
        let mut params = UpsertBillingSettingsParams {
            business_name: "Studio".to_string(),
            business_email: None,
            business_address: None,
            invoice_prefix: "STU".to_string(),
            payment_terms_days: 14,
            default_tax_rate: dec!(0.07),
            default_hourly_rate: dec!(125),
        };
        fixture
            .db
            .upsert_billing_settings(&params)
            .await
            .expect("insert");
        params.payment_terms_days = 30;
        let updated = fixture
            .db
            .upsert_billing_settings(&params)
            .await
            .expect("update");
        assert_eq!(updated.payment_terms_days, 30);
        assert_eq!(updated.invoice_prefix, "STU");

        let conn = fixture.db.connect().await.expect("connect");
        let mut rows = conn
            .query("SELECT COUNT(*) FROM billing_settings", ())
            .await
            .expect("count");
        let row = rows.next().await.expect("row").expect("count row");
        assert_eq!(get_i64(&row, 0), 1);
    }
}
