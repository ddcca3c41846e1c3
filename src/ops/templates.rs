//! Email template rendering.
//!
//! Subjects and bodies are tera templates evaluated against a lead context.

use chrono::Utc;
use serde::Serialize;
use tera::Context;

use super::phone::format_phone_us;
use crate::db::{EmailTemplateRecord, LeadRecord};

pub fn build_context(
    lead: &LeadRecord,
    sender: &str,
    extra: Option<&serde_json::Value>,
) -> serde_json::Value {
    let extra = extra.cloned().unwrap_or_else(|| serde_json::json!({}));
    let first_name = lead.name.split_whitespace().next().unwrap_or_default();
    serde_json::json!({
        "today": Utc::now().date_naive().to_string(),
        "sender": sender,
        "lead": {
            "id": lead.id.to_string(),
            "name": lead.name,
            "first_name": first_name,
            "email": lead.email,
            "phone": lead.phone.as_deref().map(format_phone_us),
            "company": lead.company,
            "source": lead.source,
            "status": lead.status.as_str(),
            "score": lead.score,
        },
        "extra": extra,
    })
}

pub fn render_template(body: &str, context: &serde_json::Value) -> Result<String, String> {
    let map = context
        .as_object()
        .ok_or_else(|| "template context must be a JSON object at the root".to_string())?;
    let mut tera_context = Context::new();
    for (key, value) in map {
        tera_context.insert(key, value);
    }

    tera::Tera::one_off(body, &tera_context, false)
        .map_err(|err| format!("failed to render template: {}", err))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

pub fn render_email(
    template: &EmailTemplateRecord,
    context: &serde_json::Value,
) -> Result<RenderedEmail, String> {
    Ok(RenderedEmail {
        subject: render_template(&template.subject, context)?,
        body: render_template(&template.body, context)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::db::LeadStatus;

    fn sample_lead() -> LeadRecord {
        LeadRecord {
            id: Uuid::new_v4(),
            name: "Dana Whitfield".to_string(),
            email: Some("dana@northwind.test".to_string()),
            phone: Some("5551234567".to_string()),
            company: Some("Northwind".to_string()),
            source: Some("referral".to_string()),
            status: LeadStatus::Qualified,
            score: Some(72),
            score_reasoning: None,
            scored_at: None,
            notes: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn render_email_fills_subject_and_body() {
        let template = EmailTemplateRecord {
            id: Uuid::new_v4(),
            name: "Intro".to_string(),
            subject: "Hello {{ lead.company }}".to_string(),
            body: "Hi {{ lead.first_name }}, call me at {{ extra.callback }}. Yours, {{ sender }}"
                .to_string(),
            category: None,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let context = build_context(
            &sample_lead(),
            "Sam",
            Some(&serde_json::json!({"callback": "noon"})),
        );
        let rendered = render_email(&template, &context).expect("render");
        assert_eq!(rendered.subject, "Hello Northwind");
        assert_eq!(rendered.body, "Hi Dana, call me at noon. Yours, Sam");
    }

    #[test]
    fn phone_is_formatted_in_context() {
        let context = build_context(&sample_lead(), "Sam", None);
        let rendered = render_template("{{ lead.phone }}", &context).expect("render");
        assert_eq!(rendered, "(555) 123-4567");
    }

    #[test]
    fn syntax_errors_are_reported() {
        let context = build_context(&sample_lead(), "Sam", None);
        let err = render_template("{{ lead.name", &context).expect_err("must fail");
        assert!(err.starts_with("failed to render template"), "{err}");
    }
}
