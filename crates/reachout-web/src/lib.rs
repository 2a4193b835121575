//! Axum HTTP surface: JSON endpoints for every outreach operation plus the
//! form page that drives them.

use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reachout_core::{known_titles, FirstContactStyle, OutreachError, OutreachRecord, TemplateChoice};
use reachout_sync::{SearchRequest, Services};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const CRATE_NAME: &str = "reachout-web";

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    /// Root token; every request works under a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(services: Arc<Services>, shutdown: CancellationToken) -> Self {
        Self { services, shutdown }
    }

    fn fail(&self, message: &str, err: OutreachError) -> ApiError {
        let status = match err {
            OutreachError::Validation(_) => StatusCode::BAD_REQUEST,
            OutreachError::Lookup(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::Operation {
            message: message.to_string(),
            status,
            detail: self.services.redact(&err.to_string()),
        }
    }

    /// Serializes a batch report with every configured secret scrubbed.
    fn redacted<T: Serialize>(&self, report: &T) -> Value {
        let mut value = serde_json::to_value(report).unwrap_or(Value::Null);
        self.scrub(&mut value);
        value
    }

    fn scrub(&self, value: &mut Value) {
        match value {
            Value::String(text) => *text = self.services.redact(text),
            Value::Array(items) => items.iter_mut().for_each(|v| self.scrub(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.scrub(v)),
            _ => {}
        }
    }

    /// 200 with the report when the batch succeeded, 500 with an added
    /// `error` otherwise.
    fn report_response<T: Serialize>(
        &self,
        key: &str,
        report: &T,
        message: String,
        failure: Option<String>,
    ) -> Response {
        let mut body = json!({ "message": message });
        body[key] = self.redacted(report);
        match failure {
            None => (StatusCode::OK, Json(body)).into_response(),
            Some(failure) => {
                body["error"] = Value::String(self.services.redact(&failure));
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}: {detail}")]
    Operation {
        message: String,
        status: StatusCode,
        detail: String,
    },
    #[error(transparent)]
    Body(#[from] JsonRejection),
    #[error(transparent)]
    Query(#[from] QueryRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, detail) = match self {
            ApiError::Operation {
                message,
                status,
                detail,
            } => (status, message, detail),
            ApiError::Body(rejection) => (
                StatusCode::BAD_REQUEST,
                "Invalid request body".to_string(),
                rejection.body_text(),
            ),
            ApiError::Query(rejection) => (
                StatusCode::BAD_REQUEST,
                "Invalid query string".to_string(),
                rejection.body_text(),
            ),
        };
        if status.is_server_error() {
            error!(%status, %message, error = %detail, "request failed");
        }
        (status, Json(json!({ "message": message, "error": detail }))).into_response()
    }
}

type Shared = State<Arc<AppState>>;

#[derive(Debug, Deserialize)]
struct SendEmailsBody {
    #[serde(rename = "emailConfigs", default)]
    email_configs: Vec<OutreachRecord>,
    #[serde(default)]
    index: usize,
    #[serde(rename = "isReferral", default)]
    is_referral: bool,
}

#[derive(Debug, Deserialize)]
struct ScanJobsBody {
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct UpdateStatusBody {
    #[serde(rename = "jobUrl")]
    job_url: String,
    status: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    sources: Vec<String>,
    titles: Vec<&'static str>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/send-emails", post(send_emails_handler))
        .route("/api/scan-jobs", post(scan_jobs_handler))
        .route("/api/check-replies", get(check_replies_handler))
        .route("/api/bounced-mails", get(bounced_mails_handler))
        .route("/api/search-jobs", get(search_jobs_handler))
        .route("/api/update-status", post(update_status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Serves until the state's shutdown token fires, then drains in-flight
/// requests.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("serving http")?;
    Ok(())
}

async fn index_handler(State(state): Shared) -> Response {
    render_html(IndexTemplate {
        sources: state.services.jobs.source_ids().map(str::to_string).collect(),
        titles: known_titles().collect(),
    })
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "message": "ok", "service": CRATE_NAME }))
}

async fn send_emails_handler(
    State(state): Shared,
    body: Result<Json<SendEmailsBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let choice = TemplateChoice::from_request(body.index, body.is_referral)
        .map_err(|err| state.fail("Invalid template selection", err))?;
    let cancel = state.shutdown.child_token();
    let report = state
        .services
        .dispatcher
        .dispatch(body.email_configs, choice, &cancel)
        .await
        .map_err(|err| state.fail("Failed to send emails", err))?;
    let failure = (!report.success).then(|| format!("{} email(s) failed", report.failed));
    Ok(state.report_response("report", &report, report.message(), failure))
}

async fn scan_jobs_handler(
    State(state): Shared,
    body: Result<Json<ScanJobsBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let style =
        first_contact_style(body.index).map_err(|err| state.fail("Invalid template selection", err))?;
    let cancel = state.shutdown.child_token();
    let report = state
        .services
        .dispatcher
        .dispatch_leads(style, &cancel)
        .await
        .map_err(|err| state.fail("Failed to scan leads", err))?;
    let failure = (!report.success).then(|| format!("{} email(s) failed", report.failed));
    Ok(state.report_response("report", &report, report.message(), failure))
}

fn first_contact_style(index: usize) -> Result<FirstContactStyle, OutreachError> {
    match TemplateChoice::from_request(index, false)? {
        TemplateChoice::FirstContact(style) => Ok(style),
        TemplateChoice::ReferralRequest => Err(OutreachError::Validation(
            "lead scans only send first-contact messages".into(),
        )),
    }
}

async fn check_replies_handler(State(state): Shared) -> Response {
    let cancel = state.shutdown.child_token();
    let report = state.services.reconciler.run(&cancel).await;
    let failure = if report.cancelled {
        Some("reply pass was cancelled".to_string())
    } else if !report.success {
        Some(format!(
            "{} conversation(s) could not be checked",
            report.failures.len()
        ))
    } else {
        None
    };
    state.report_response("report", &report, report.message(), failure)
}

async fn bounced_mails_handler(State(state): Shared) -> Result<Response, ApiError> {
    let cancel = state.shutdown.child_token();
    let report = state
        .services
        .bounces
        .run(&cancel)
        .await
        .map_err(|err| state.fail("Failed to scan for bounces", err))?;
    let failure = if report.cancelled {
        Some("bounce scan was cancelled".to_string())
    } else if !report.success {
        Some(format!("{} lead(s) could not be marked", report.failures.len()))
    } else {
        None
    };
    Ok(state.report_response("report", &report, report.message(), failure))
}

async fn search_jobs_handler(
    State(state): Shared,
    query: Result<Query<SearchRequest>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(request) = query?;
    let result = state
        .services
        .jobs
        .search(request)
        .await
        .map_err(|err| state.fail("Failed to search jobs", err))?;
    let message = format!("Found {} job(s) on {}", result.jobs.len(), result.source);
    Ok(state.report_response("result", &result, message, None))
}

async fn update_status_handler(
    State(state): Shared,
    body: Result<Json<UpdateStatusBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let update = state
        .services
        .jobs
        .update_status(&body.job_url, &body.status)
        .await
        .map_err(|err| state.fail("Failed to update status", err))?;
    Ok(Json(json!({
        "message": "Status updated",
        "cell": update.cell,
        "previous": update.previous,
    })))
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(%err, "page render failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {err}")),
    )
        .into_response()
}
