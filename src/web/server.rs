//! Axum HTTP server for the agency API.
//!
//! Public routes: health, login, share links, disabled endpoints and the
//! action dispatcher (which authenticates inside each action). Everything
//! else sits behind the session middleware.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get, post},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::error::ApiError;
use super::types::*;
use crate::actions::{self, ActionResult};
use crate::app::AppContext;
use crate::auth::{self, bearer_token, resolve_session};
use crate::cache::paths;
use crate::config::Domain;
use crate::data::{AppUser, ClientRepository, ProjectRepository, TaskRepository};
use crate::db::{
    CreateMeetingParams, CreateMessageParams, CreateThreadParams, EmailTemplateStore,
    InvoiceStore, LeadStatus, LeadStore, MeetingStatus, MeetingStore, MessageDirection,
    ProposalStatus, ProposalStore, SuggestionStatus, SuggestionStore, ThreadStore,
};
use crate::ops::share::{SHARE_PASSWORD_HEADER, ShareAccess, check_proposal_access};
use crate::ops::templates::{build_context, render_email};

pub type AppState = Arc<AppContext>;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the full router. `allowed_origins` feeds the CORS layer; an empty
/// list allows same-origin requests only.
pub fn router(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    let public = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/share/proposals/{token}", get(shared_proposal_handler))
        .route(
            "/api/share/proposals/{token}/accept",
            post(accept_shared_proposal_handler),
        )
        .route("/api/share/invoices/{token}", get(shared_invoice_handler))
        .route("/api/pr-suggestions/{id}/approve", any(disabled_handler))
        .route("/api/emails/{id}/generate-pr", any(disabled_handler))
        .route("/api/actions/{name}", post(action_handler));

    let protected = Router::new()
        .route("/api/me", get(me_handler))
        .route("/api/flags", get(flags_handler))
        // CRM
        .route(
            "/api/leads",
            get(leads_list_handler).post(leads_create_handler),
        )
        .route("/api/leads/{id}", get(lead_detail_handler))
        .route("/api/clients", get(clients_list_handler))
        .route("/api/clients/{id}", get(client_detail_handler))
        // Work
        .route("/api/projects", get(projects_list_handler))
        .route("/api/tasks", get(tasks_list_handler))
        // Templates
        .route(
            "/api/email-templates",
            get(templates_list_handler).post(templates_create_handler),
        )
        .route(
            "/api/email-templates/{id}",
            get(template_detail_handler)
                .put(template_update_handler)
                .delete(template_delete_handler),
        )
        .route(
            "/api/email-templates/{id}/render",
            post(template_render_handler),
        )
        // Meetings
        .route(
            "/api/meetings",
            get(meetings_list_handler).post(meetings_create_handler),
        )
        .route("/api/meetings/{id}", get(meeting_detail_handler))
        .route("/api/meetings/{id}/cancel", post(meeting_cancel_handler))
        // Proposals
        .route(
            "/api/proposals",
            get(proposals_list_handler).post(proposals_create_handler),
        )
        .route("/api/proposals/{id}", get(proposal_detail_handler))
        // Suggestions
        .route("/api/suggestions", get(suggestions_list_handler))
        .route(
            "/api/suggestions/generate",
            post(suggestions_generate_handler),
        )
        .route(
            "/api/suggestions/{id}/accept",
            post(suggestion_accept_handler),
        )
        .route(
            "/api/suggestions/{id}/dismiss",
            post(suggestion_dismiss_handler),
        )
        // Threads
        .route(
            "/api/threads",
            get(threads_list_handler).post(threads_create_handler),
        )
        .route("/api/threads/{id}", get(thread_detail_handler))
        .route("/api/threads/{id}/messages", post(thread_message_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_session,
        ));

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
        ])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(SHARE_PASSWORD_HEADER),
        ]));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    allowed_origins: Vec<HeaderValue>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    tracing::info!(%bound, "HTTP API listening");
    axum::serve(listener, router(state, allowed_origins))
        .with_graceful_shutdown(shutdown)
        .await
}

// --- Session middleware ---

async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .map(str::to_string)
        .ok_or(ApiError::Unauthorized)?;
    let user = resolve_session(state.data.users.as_ref(), &state.sessions, &token)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

// --- Helpers ---

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::not_found(what))
}

fn parse_optional_uuid(raw: Option<&str>, field: &str) -> Result<Option<Uuid>, ApiError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Uuid::parse_str(v)
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("{field} must be a UUID."))),
        None => Ok(None),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.to_string()))
}

/// Serve `key` from the view cache, computing it on a miss. The result is
/// stored unless the view was revalidated while it loaded.
async fn cached_view<T, F>(state: &AppContext, key: String, load: F) -> Result<Json<Value>, ApiError>
where
    T: Serialize,
    F: Future<Output = Result<T, ApiError>>,
{
    if let Some(hit) = state.cache.get(&key) {
        return Ok(Json(hit));
    }
    let generation = state.cache.generation(&key);
    let value = to_json(&load.await?)?;
    if !state.cache.insert_if_current(key.as_str(), value.clone(), generation) {
        tracing::debug!(key = %key, "View changed while loading; not cached");
    }
    Ok(Json(value))
}

fn with_query(path: &str, name: &str, value: Option<&str>) -> String {
    match value {
        Some(v) => format!("{path}?{name}={v}"),
        None => path.to_string(),
    }
}

/// Run a server action on behalf of a REST endpoint.
async fn via_action(
    state: &AppContext,
    name: &str,
    headers: &HeaderMap,
    input: Value,
    created: bool,
) -> Result<Response, ApiError> {
    let data = actions::execute(state, name, bearer_token(headers), input).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(data)).into_response())
}

fn require_admin(user: &AppUser) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ApiError::admin_only())
    }
}

// --- Public ---

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "agencyops",
    })
}

async fn login_handler(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Email and password are required.".to_string(),
        ));
    }
    let user = auth::login(state.data.users.as_ref(), req.email.trim(), &req.password)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;
    let now = Utc::now();
    let token = state.sessions.issue_at(&user.id, now);
    tracing::info!(user_id = %user.id, "User signed in");
    Ok(Json(LoginResponse {
        token,
        expires_at: now + state.sessions.ttl(),
        user,
    }))
}

async fn disabled_handler() -> ApiError {
    ApiError::Disabled
}

async fn action_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<ActionResult>) {
    let input = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ActionResult::failure("Invalid input.")),
                );
            }
        }
    };
    let (status, result) =
        actions::run_action(&state, &name, bearer_token(&headers), input).await;
    (status, Json(result))
}

/// Look up a live proposal by share token and check its password. Drafts
/// are not shared until they are sent.
async fn shared_proposal_access(
    state: &AppContext,
    token: &str,
    headers: &HeaderMap,
) -> Result<crate::db::ProposalRecord, ApiError> {
    let proposal = state
        .db
        .get_proposal_by_share_token(token)
        .await?
        .filter(|p| p.status != ProposalStatus::Draft)
        .ok_or_else(|| ApiError::not_found("Proposal"))?;
    let supplied = headers
        .get(SHARE_PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok());
    match check_proposal_access(&proposal, supplied).await {
        ShareAccess::Granted => Ok(proposal),
        ShareAccess::PasswordRequired => Err(ApiError::PasswordRequired),
        ShareAccess::WrongPassword => Err(ApiError::Forbidden("Incorrect password.".to_string())),
    }
}

async fn shared_proposal_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SharedProposal>, ApiError> {
    let mut proposal = shared_proposal_access(&state, &token, &headers).await?;
    if proposal.status == ProposalStatus::Sent
        && let Some(viewed) = state
            .db
            .transition_proposal(proposal.id, &[ProposalStatus::Sent], ProposalStatus::Viewed)
            .await?
    {
        state.cache.revalidate_path(paths::PROPOSALS);
        proposal = viewed;
    }
    let password_protected = proposal.is_password_protected();
    Ok(Json(SharedProposal {
        proposal,
        password_protected,
    }))
}

async fn accept_shared_proposal_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SharedProposal>, ApiError> {
    let proposal = shared_proposal_access(&state, &token, &headers).await?;
    let accepted = state
        .db
        .transition_proposal(
            proposal.id,
            &[ProposalStatus::Sent, ProposalStatus::Viewed],
            ProposalStatus::Accepted,
        )
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest("This proposal can no longer be accepted.".to_string())
        })?;
    tracing::info!(proposal_id = %accepted.id, "Proposal accepted via share link");
    state.cache.revalidate_path(paths::PROPOSALS);
    let password_protected = accepted.is_password_protected();
    Ok(Json(SharedProposal {
        proposal: accepted,
        password_protected,
    }))
}

async fn shared_invoice_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<SharedInvoice>, ApiError> {
    let invoice = state
        .db
        .get_invoice_by_share_token(&token)
        .await?
        .ok_or_else(|| ApiError::not_found("Invoice"))?;
    Ok(Json(SharedInvoice { invoice }))
}

// --- Session & flags ---

async fn me_handler(Extension(user): Extension<AppUser>) -> Json<AppUser> {
    Json(user)
}

async fn flags_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AppUser>,
) -> Result<Json<FlagsResponse>, ApiError> {
    require_admin(&user)?;
    let backend = |domain: Domain| match domain {
        Domain::Clients => state.data.clients.backend(),
        Domain::Projects => state.data.projects.backend(),
        Domain::Tasks => state.data.tasks.backend(),
        Domain::Auth => state.data.users.backend(),
    };
    Ok(Json(FlagsResponse {
        status: state.flags.status(),
        backends: DomainBackends {
            clients: backend(Domain::Clients),
            projects: backend(Domain::Projects),
            tasks: backend(Domain::Tasks),
            auth: backend(Domain::Auth),
        },
    }))
}

// --- Leads ---

async fn leads_list_handler(
    State(state): State<AppState>,
    Query(query): Query<LeadsQuery>,
) -> Result<Json<Value>, ApiError> {
    let raw = query.status.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let status = raw
        .map(|s| {
            LeadStatus::from_db_value(s)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown lead status '{s}'.")))
        })
        .transpose()?;
    let key = with_query(paths::LEADS, "status", status.map(LeadStatus::as_str));
    cached_view(&state, key, async {
        state.db.list_leads(status).await.map_err(ApiError::from)
    })
    .await
}

async fn leads_create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    via_action(&state, "create_lead", &headers, body, true).await
}

async fn lead_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::db::LeadRecord>, ApiError> {
    let id = parse_uuid(&id, "Lead")?;
    let lead = state
        .db
        .get_lead(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Lead"))?;
    Ok(Json(lead))
}

// --- Clients, projects, tasks (flag-routed) ---

async fn clients_list_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    cached_view(&state, paths::CLIENTS.to_string(), async {
        state.data.clients.list_clients().await.map_err(ApiError::from)
    })
    .await
}

async fn client_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::data::ClientDetail>, ApiError> {
    let detail = state
        .data
        .clients
        .get_client_detail(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Client"))?;
    Ok(Json(detail))
}

async fn projects_list_handler(
    State(state): State<AppState>,
    Query(query): Query<ProjectsQuery>,
) -> Result<Json<Value>, ApiError> {
    let client_id = query.client_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let key = with_query(paths::PROJECTS, "client_id", client_id);
    cached_view(&state, key, async {
        state.data.projects.list_projects(client_id).await.map_err(ApiError::from)
    })
    .await
}

async fn tasks_list_handler(
    State(state): State<AppState>,
    Query(query): Query<TasksQuery>,
) -> Result<Json<Value>, ApiError> {
    let project_id = query.project_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let key = with_query(paths::TASKS, "project_id", project_id);
    cached_view(&state, key, async {
        state.data.tasks.list_tasks(project_id).await.map_err(ApiError::from)
    })
    .await
}

// --- Email templates ---

async fn templates_list_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    cached_view(&state, paths::TEMPLATES.to_string(), async {
        state.db.list_templates().await.map_err(ApiError::from)
    })
    .await
}

async fn templates_create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    via_action(&state, "create_template", &headers, body, true).await
}

async fn template_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::db::EmailTemplateRecord>, ApiError> {
    let id = parse_uuid(&id, "Template")?;
    let template = state
        .db
        .get_template(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Template"))?;
    Ok(Json(template))
}

async fn template_update_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let mut input = match body {
        Value::Object(map) => map,
        _ => return Err(ApiError::BadRequest("Expected a JSON object.".to_string())),
    };
    input.insert("id".to_string(), Value::String(id));
    via_action(&state, "update_template", &headers, Value::Object(input), false).await
}

async fn template_delete_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let input = serde_json::json!({ "id": id });
    via_action(&state, "delete_template", &headers, input, false).await
}

async fn template_render_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(user): Extension<AppUser>,
    Json(req): Json<RenderTemplateRequest>,
) -> Result<Json<crate::ops::templates::RenderedEmail>, ApiError> {
    let template_id = parse_uuid(&id, "Template")?;
    let template = state
        .db
        .get_template(template_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Template"))?;
    let lead_id = parse_uuid(&req.lead_id, "Lead")?;
    let lead = state
        .db
        .get_lead(lead_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Lead"))?;

    let sender = req.sender.as_deref().unwrap_or(&user.full_name);
    let context = build_context(&lead, sender, req.extra.as_ref());
    let rendered = render_email(&template, &context).map_err(ApiError::BadRequest)?;
    Ok(Json(rendered))
}

// --- Meetings ---

async fn meetings_list_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    cached_view(&state, paths::MEETINGS.to_string(), async {
        state.db.list_meetings().await.map_err(ApiError::from)
    })
    .await
}

async fn meetings_create_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateMeetingRequest>,
) -> Result<(StatusCode, Json<crate::db::MeetingRecord>), ApiError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Meeting title is required.".to_string()));
    }
    if req.ends_at < req.starts_at {
        return Err(ApiError::BadRequest(
            "Meeting cannot end before it starts.".to_string(),
        ));
    }
    let meeting = state
        .db
        .create_meeting(&CreateMeetingParams {
            lead_id: parse_optional_uuid(req.lead_id.as_deref(), "lead_id")?,
            client_id: parse_optional_uuid(req.client_id.as_deref(), "client_id")?,
            title: title.to_string(),
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            location: req.location.filter(|v| !v.trim().is_empty()),
            notes: req.notes.filter(|v| !v.trim().is_empty()),
        })
        .await?;
    state.cache.revalidate_path(paths::MEETINGS);
    Ok((StatusCode::CREATED, Json(meeting)))
}

async fn meeting_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::db::MeetingRecord>, ApiError> {
    let id = parse_uuid(&id, "Meeting")?;
    let meeting = state
        .db
        .get_meeting(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Meeting"))?;
    Ok(Json(meeting))
}

async fn meeting_cancel_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::db::MeetingRecord>, ApiError> {
    let id = parse_uuid(&id, "Meeting")?;
    let existing = state
        .db
        .get_meeting(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Meeting"))?;
    if existing.status != MeetingStatus::Scheduled {
        return Err(ApiError::BadRequest(
            "Only scheduled meetings can be cancelled.".to_string(),
        ));
    }
    let meeting = state
        .db
        .cancel_meeting(id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Only scheduled meetings can be cancelled.".to_string()))?;
    state.cache.revalidate_path(paths::MEETINGS);
    Ok(Json(meeting))
}

// --- Proposals ---

async fn proposals_list_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    cached_view(&state, paths::PROPOSALS.to_string(), async {
        state.db.list_proposals().await.map_err(ApiError::from)
    })
    .await
}

async fn proposals_create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    via_action(&state, "create_proposal", &headers, body, true).await
}

async fn proposal_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::db::ProposalRecord>, ApiError> {
    let id = parse_uuid(&id, "Proposal")?;
    let proposal = state
        .db
        .get_proposal(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Proposal"))?;
    Ok(Json(proposal))
}

// --- Suggestions ---

async fn suggestions_list_handler(
    State(state): State<AppState>,
    Query(query): Query<LeadFilterQuery>,
) -> Result<Json<Vec<crate::db::SuggestionRecord>>, ApiError> {
    let raw = query
        .lead_id
        .ok_or_else(|| ApiError::BadRequest("lead_id is required.".to_string()))?;
    let lead_id = parse_uuid(&raw, "Lead")?;
    Ok(Json(state.db.list_suggestions(lead_id).await?))
}

async fn suggestions_generate_handler(
    State(state): State<AppState>,
    Json(req): Json<GenerateSuggestionsRequest>,
) -> Result<(StatusCode, Json<Vec<crate::db::SuggestionRecord>>), ApiError> {
    let lead_id = parse_uuid(&req.lead_id, "Lead")?;
    let lead = state
        .db
        .get_lead(lead_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Lead"))?;
    let drafts = state.scorer.suggest_actions(&lead).await?;
    let mut created = Vec::with_capacity(drafts.len());
    for draft in drafts {
        created.push(
            state
                .db
                .create_suggestion(lead_id, draft.kind, &draft.content)
                .await?,
        );
    }
    tracing::info!(%lead_id, count = created.len(), "Generated lead suggestions");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn resolve_suggestion(
    state: &AppContext,
    id: &str,
    status: SuggestionStatus,
) -> Result<Json<crate::db::SuggestionRecord>, ApiError> {
    let id = parse_uuid(id, "Suggestion")?;
    let suggestion = state
        .db
        .resolve_suggestion(id, status)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound("Suggestion not found or already resolved.".to_string())
        })?;
    Ok(Json(suggestion))
}

async fn suggestion_accept_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::db::SuggestionRecord>, ApiError> {
    resolve_suggestion(&state, &id, SuggestionStatus::Accepted).await
}

async fn suggestion_dismiss_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::db::SuggestionRecord>, ApiError> {
    resolve_suggestion(&state, &id, SuggestionStatus::Dismissed).await
}

// --- Threads ---

async fn threads_list_handler(
    State(state): State<AppState>,
    Query(query): Query<LeadFilterQuery>,
) -> Result<Json<Vec<crate::db::EmailThreadRecord>>, ApiError> {
    let lead_id = parse_optional_uuid(query.lead_id.as_deref(), "lead_id")?;
    Ok(Json(state.db.list_threads(lead_id).await?))
}

async fn threads_create_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateThreadRequest>,
) -> Result<(StatusCode, Json<crate::db::EmailThreadRecord>), ApiError> {
    let subject = req.subject.trim();
    if subject.is_empty() {
        return Err(ApiError::BadRequest("Subject is required.".to_string()));
    }
    let thread = state
        .db
        .create_thread(&CreateThreadParams {
            lead_id: parse_optional_uuid(req.lead_id.as_deref(), "lead_id")?,
            contact_id: parse_optional_uuid(req.contact_id.as_deref(), "contact_id")?,
            subject: subject.to_string(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(thread)))
}

async fn thread_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadDetail>, ApiError> {
    let id = parse_uuid(&id, "Thread")?;
    let thread = state
        .db
        .get_thread(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Thread"))?;
    let messages = state.db.list_messages(id).await?;
    Ok(Json(ThreadDetail { thread, messages }))
}

async fn thread_message_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<crate::db::EmailMessageRecord>), ApiError> {
    let id = parse_uuid(&id, "Thread")?;
    let direction = MessageDirection::from_db_value(req.direction.trim()).ok_or_else(|| {
        ApiError::BadRequest("Direction must be 'inbound' or 'outbound'.".to_string())
    })?;
    if req.body.trim().is_empty() {
        return Err(ApiError::BadRequest("Message body is required.".to_string()));
    }
    let message = state
        .db
        .add_message(
            id,
            &CreateMessageParams {
                direction,
                sender: req.sender.trim().to_string(),
                body: req.body,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}
