//! Proposal, invoice and billing settings actions.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};

use super::validate::{Check, existing_id, line_items_ok, optional_email_ok, optional_ref, owned, present};
use super::{ActionError, IdInput, to_data};
use crate::app::AppContext;
use crate::auth::hash_password;
use crate::cache::paths;
use crate::db::{
    BillingSettingsRecord, BillingSettingsStore, ClientStore, CreateProposalParams, InvoiceStore,
    LeadStore, LineItem, ProposalStatus, ProposalStore, UpsertBillingSettingsParams,
    line_items_total,
};
use crate::ops::invoice::{InvoiceDraft, build_invoice, next_invoice_number};
use crate::ops::share::new_share_token;

const MIN_SHARE_PASSWORD_LEN: usize = 6;
const MAX_PREFIX_LEN: usize = 10;
const MAX_PAYMENT_TERMS_DAYS: i32 = 365;

fn rate_ok(rate: Decimal) -> bool {
    rate >= Decimal::ZERO && rate <= Decimal::ONE
}

async fn ensure_refs(
    ctx: &AppContext,
    lead_id: Option<uuid::Uuid>,
    client_id: Option<uuid::Uuid>,
) -> Result<(), ActionError> {
    if let Some(id) = lead_id
        && ctx.db.get_lead(id).await?.is_none()
    {
        return Err(ActionError::not_found("Lead"));
    }
    if let Some(id) = client_id
        && ctx.db.get_client(id).await?.is_none()
    {
        return Err(ActionError::not_found("Client"));
    }
    Ok(())
}

// ==================== Proposals ====================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CreateProposalInput {
    pub lead_id: Option<String>,
    pub client_id: Option<String>,
    pub title: String,
    pub line_items: Vec<LineItem>,
    pub password: Option<String>,
}

pub(crate) async fn create_proposal(
    ctx: &AppContext,
    input: CreateProposalInput,
) -> Result<Value, ActionError> {
    let title = input.title.trim();
    Check::new()
        .rule(!title.is_empty(), "Proposal title is required.")
        .rule(!input.line_items.is_empty(), "Add at least one line item.")
        .rule(
            line_items_ok(&input.line_items),
            "Line items need a description, a positive quantity and a price.",
        )
        .rule(
            input
                .password
                .as_deref()
                .is_none_or(|p| p.chars().count() >= MIN_SHARE_PASSWORD_LEN),
            "Share password must be at least 6 characters.",
        )
        .finish()?;
    let lead_id = optional_ref(&input.lead_id, "Lead")?;
    let client_id = optional_ref(&input.client_id, "Client")?;
    ensure_refs(ctx, lead_id, client_id).await?;

    let password_hash = match input.password.as_deref() {
        Some(password) => Some(
            hash_password(password)
                .await
                .map_err(|e| ActionError::Internal(e.to_string()))?,
        ),
        None => None,
    };
    let proposal = ctx
        .db
        .create_proposal(&CreateProposalParams {
            lead_id,
            client_id,
            title: title.to_string(),
            total: line_items_total(&input.line_items).round_dp(2),
            line_items: input.line_items,
            share_token: new_share_token(),
            password_hash,
        })
        .await?;
    ctx.cache.revalidate_path(paths::PROPOSALS);
    to_data(&proposal)
}

pub(crate) async fn send_proposal(ctx: &AppContext, input: IdInput) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Proposal id is required.")
        .finish()?;
    let id = existing_id(&input.id, "Proposal")?;
    if ctx.db.get_proposal(id).await?.is_none() {
        return Err(ActionError::not_found("Proposal"));
    }
    let proposal = ctx
        .db
        .transition_proposal(id, &[ProposalStatus::Draft], ProposalStatus::Sent)
        .await?
        .ok_or_else(|| ActionError::Validation("Only draft proposals can be sent.".to_string()))?;
    ctx.cache.revalidate_path(paths::PROPOSALS);
    to_data(&proposal)
}

pub(crate) async fn archive_proposal(
    ctx: &AppContext,
    input: IdInput,
) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Proposal id is required.")
        .finish()?;
    let id = existing_id(&input.id, "Proposal")?;
    if !ctx.db.archive_proposal(id).await? {
        return Err(ActionError::not_found("Proposal"));
    }
    ctx.cache.revalidate_path(paths::PROPOSALS);
    Ok(json!({ "id": id }))
}

// ==================== Invoices ====================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CreateInvoiceInput {
    pub client_id: Option<String>,
    pub proposal_id: Option<String>,
    /// Empty means "copy the proposal's line items".
    pub line_items: Vec<LineItem>,
    /// Fraction, `0.0825` for 8.25%. Defaults to the billing settings.
    pub tax_rate: Option<Decimal>,
    pub issued_on: Option<NaiveDate>,
    pub due_on: Option<NaiveDate>,
}

pub(crate) async fn create_invoice(
    ctx: &AppContext,
    input: CreateInvoiceInput,
) -> Result<Value, ActionError> {
    let issued_on = input.issued_on.unwrap_or_else(|| Utc::now().date_naive());
    Check::new()
        .rule(
            !input.line_items.is_empty() || present(&input.proposal_id).is_some(),
            "Add at least one line item.",
        )
        .rule(
            line_items_ok(&input.line_items),
            "Line items need a description, a positive quantity and a price.",
        )
        .rule(
            input.tax_rate.is_none_or(rate_ok),
            "Tax rate must be between 0 and 1.",
        )
        .rule(
            input.due_on.is_none_or(|due| due >= issued_on),
            "Due date cannot be before the issue date.",
        )
        .finish()?;
    let mut client_id = optional_ref(&input.client_id, "Client")?;
    let proposal_id = optional_ref(&input.proposal_id, "Proposal")?;

    let mut line_items = input.line_items;
    if let Some(id) = proposal_id {
        let proposal = ctx
            .db
            .get_proposal(id)
            .await?
            .ok_or_else(|| ActionError::not_found("Proposal"))?;
        if line_items.is_empty() {
            line_items = proposal.line_items;
        }
        client_id = client_id.or(proposal.client_id);
    }
    Check::new()
        .rule(!line_items.is_empty(), "Add at least one line item.")
        .finish()?;
    ensure_refs(ctx, None, client_id).await?;

    let settings = ctx
        .db
        .get_billing_settings()
        .await?
        .unwrap_or_default();
    let number = next_invoice_number(ctx.db.as_ref(), &settings.invoice_prefix).await;
    let params = build_invoice(
        InvoiceDraft {
            client_id,
            proposal_id,
            line_items,
            tax_rate: input.tax_rate,
            issued_on,
            due_on: input.due_on,
        },
        &settings,
        number,
        new_share_token(),
    );
    let invoice = ctx.db.create_invoice(&params).await?;
    ctx.cache.revalidate_path(paths::INVOICES);
    to_data(&invoice)
}

pub(crate) async fn mark_invoice_paid(
    ctx: &AppContext,
    input: IdInput,
) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Invoice id is required.")
        .finish()?;
    let id = existing_id(&input.id, "Invoice")?;
    if ctx.db.get_invoice(id).await?.is_none() {
        return Err(ActionError::not_found("Invoice"));
    }
    let invoice = ctx.db.mark_invoice_paid(id).await?.ok_or_else(|| {
        ActionError::Validation("Only draft or sent invoices can be marked paid.".to_string())
    })?;
    ctx.cache.revalidate_path(paths::INVOICES);
    to_data(&invoice)
}

pub(crate) async fn archive_invoice(
    ctx: &AppContext,
    input: IdInput,
) -> Result<Value, ActionError> {
    Check::new()
        .rule(!input.id.trim().is_empty(), "Invoice id is required.")
        .finish()?;
    let id = existing_id(&input.id, "Invoice")?;
    if !ctx.db.archive_invoice(id).await? {
        return Err(ActionError::not_found("Invoice"));
    }
    ctx.cache.revalidate_path(paths::INVOICES);
    Ok(json!({ "id": id }))
}

// ==================== Billing settings ====================

#[derive(Debug, Deserialize)]
#[serde(default)]
pub(crate) struct BillingSettingsInput {
    pub business_name: String,
    pub business_email: Option<String>,
    pub business_address: Option<String>,
    pub invoice_prefix: String,
    pub payment_terms_days: i32,
    pub default_tax_rate: Decimal,
    pub default_hourly_rate: Decimal,
}

impl Default for BillingSettingsInput {
    fn default() -> Self {
        let defaults = BillingSettingsRecord::default();
        Self {
            business_name: defaults.business_name,
            business_email: defaults.business_email,
            business_address: defaults.business_address,
            invoice_prefix: defaults.invoice_prefix,
            payment_terms_days: defaults.payment_terms_days,
            default_tax_rate: defaults.default_tax_rate,
            default_hourly_rate: defaults.default_hourly_rate,
        }
    }
}

pub(crate) async fn update_billing_settings(
    ctx: &AppContext,
    input: BillingSettingsInput,
) -> Result<Value, ActionError> {
    let prefix = input.invoice_prefix.trim().to_ascii_uppercase();
    Check::new()
        .rule(!input.business_name.trim().is_empty(), "Business name is required.")
        .rule(optional_email_ok(&input.business_email), "Business email is invalid.")
        .rule(!prefix.is_empty(), "Invoice prefix is required.")
        .rule(
            prefix.len() <= MAX_PREFIX_LEN && prefix.chars().all(|c| c.is_ascii_alphanumeric()),
            "Invoice prefix must be up to 10 letters or digits.",
        )
        .rule(
            (0..=MAX_PAYMENT_TERMS_DAYS).contains(&input.payment_terms_days),
            "Payment terms must be between 0 and 365 days.",
        )
        .rule(
            rate_ok(input.default_tax_rate),
            "Tax rate must be between 0 and 1.",
        )
        .rule(
            input.default_hourly_rate >= Decimal::ZERO,
            "Hourly rate cannot be negative.",
        )
        .finish()?;

    let settings = ctx
        .db
        .upsert_billing_settings(&UpsertBillingSettingsParams {
            business_name: input.business_name.trim().to_string(),
            business_email: owned(&input.business_email),
            business_address: owned(&input.business_address),
            invoice_prefix: prefix,
            payment_terms_days: input.payment_terms_days,
            default_tax_rate: input.default_tax_rate,
            default_hourly_rate: input.default_hourly_rate,
        })
        .await?;
    ctx.cache.revalidate_path(paths::BILLING);
    ctx.cache.revalidate_path(paths::INVOICES);
    to_data(&settings)
}

#[cfg(test)]
mod tests {
    use chrono::Datelike;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::super::test_support::harness;
    use super::super::{ActionResult, run_action};

    fn decimal(value: &serde_json::Value) -> Decimal {
        match value {
            serde_json::Value::String(s) => s.parse().expect("decimal"),
            other => other.to_string().parse().expect("decimal"),
        }
    }

    #[tokio::test]
    async fn proposals_total_line_items_and_send_once() {
        let h = harness().await;
        let (_, created) = run_action(
            &h.ctx,
            "create_proposal",
            Some(&h.member_token),
            json!({
                "title": "Website rebuild",
                "line_items": [
                    {"description": "Design", "quantity": 10, "unit_price": "95.50"},
                    {"description": "Build", "quantity": "1", "unit_price": 1200},
                ],
            }),
        )
        .await;
        let proposal = created.data.expect("data");
        assert_eq!(decimal(&proposal["total"]), dec!(2155.00));
        assert_eq!(proposal["status"], "draft");
        assert!(proposal.get("password_hash").is_none());

        let id = proposal["id"].clone();
        let (_, sent) =
            run_action(&h.ctx, "send_proposal", Some(&h.member_token), json!({ "id": id })).await;
        assert_eq!(sent.data.expect("data")["status"], "sent");
        let (_, again) =
            run_action(&h.ctx, "send_proposal", Some(&h.member_token), json!({ "id": id })).await;
        assert_eq!(
            again,
            ActionResult::failure("Only draft proposals can be sent.")
        );
    }

    #[tokio::test]
    async fn proposal_validation_reports_first_rule() {
        let h = harness().await;
        let (_, result) = run_action(
            &h.ctx,
            "create_proposal",
            Some(&h.member_token),
            json!({"title": "X", "line_items": [], "password": "abc"}),
        )
        .await;
        assert_eq!(result, ActionResult::failure("Add at least one line item."));

        let (_, result) = run_action(
            &h.ctx,
            "create_proposal",
            Some(&h.member_token),
            json!({
                "title": "X",
                "lead_id": uuid::Uuid::new_v4().to_string(),
                "line_items": [{"description": "A", "quantity": 1, "unit_price": 1}],
            }),
        )
        .await;
        assert_eq!(result, ActionResult::failure("Lead not found."));
    }

    #[tokio::test]
    async fn invoices_copy_proposal_items_and_use_settings() {
        let h = harness().await;
        let (_, settings) = run_action(
            &h.ctx,
            "update_billing_settings",
            Some(&h.admin_token),
            json!({
                "business_name": "Studio",
                "invoice_prefix": "stu",
                "payment_terms_days": 15,
                "default_tax_rate": "0.1",
                "default_hourly_rate": 120,
            }),
        )
        .await;
        assert!(settings.success, "{settings:?}");

        let (_, proposal) = run_action(
            &h.ctx,
            "create_proposal",
            Some(&h.member_token),
            json!({
                "title": "Retainer",
                "line_items": [{"description": "Support", "quantity": 2, "unit_price": 50}],
            }),
        )
        .await;
        let proposal_id = proposal.data.expect("data")["id"].clone();

        let (_, invoice) = run_action(
            &h.ctx,
            "create_invoice",
            Some(&h.member_token),
            json!({"proposal_id": proposal_id, "issued_on": "2025-02-01"}),
        )
        .await;
        let invoice = invoice.data.expect("data");
        let year = chrono::Utc::now().year();
        assert_eq!(invoice["invoice_number"], format!("STU-{year}-00001"));
        assert_eq!(decimal(&invoice["subtotal"]), dec!(100));
        assert_eq!(decimal(&invoice["tax"]), dec!(10));
        assert_eq!(decimal(&invoice["total"]), dec!(110));
        assert_eq!(invoice["due_on"], "2025-02-16");

        let id = invoice["id"].clone();
        let (_, paid) =
            run_action(&h.ctx, "mark_invoice_paid", Some(&h.member_token), json!({ "id": id }))
                .await;
        assert_eq!(paid.data.expect("data")["status"], "paid");
        let (_, again) =
            run_action(&h.ctx, "mark_invoice_paid", Some(&h.member_token), json!({ "id": id }))
                .await;
        assert_eq!(
            again,
            ActionResult::failure("Only draft or sent invoices can be marked paid.")
        );
    }

    #[tokio::test]
    async fn billing_settings_are_admin_validated() {
        let h = harness().await;
        let (_, result) = run_action(
            &h.ctx,
            "update_billing_settings",
            Some(&h.admin_token),
            json!({"business_name": "Studio", "invoice_prefix": "IN-V", "default_tax_rate": 2}),
        )
        .await;
        assert_eq!(
            result,
            ActionResult::failure("Invoice prefix must be up to 10 letters or digits.")
        );
    }
}
