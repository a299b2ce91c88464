//! JSON API for driving negotiations.
//!
//! Endpoints:
//! - `POST /api/v1/negotiations`: start a negotiation
//! - `GET  /api/v1/negotiations`: list negotiations, newest first
//! - `GET  /api/v1/negotiations/{id}`: status with per-supplier conversations
//! - `GET  /api/v1/negotiations/{id}/conversations/{supplier_id}`: ordered transcript
//! - `POST /api/v1/negotiations/{id}/openings`: retry openings that never went out
//! - `POST /api/v1/negotiations/{id}/cancel`: conclude with a terminal outcome
//! - `POST /api/v1/inbound`: mail-gateway webhook feeding the event router

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use haggler_core::{
    EngineError, InterfaceError, NegotiationId, NegotiationRequest, NegotiationStatus, SupplierId,
    SupplierSpec,
};
use haggler_engine::router::RoutingDisposition;
use haggler_engine::service::{NegotiationEngine, StatusReport};
use haggler_mail::envelope::InboundEmail;

#[derive(Clone)]
pub struct ApiState {
    engine: Arc<NegotiationEngine>,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartNegotiationRequest {
    pub product: String,
    pub strategy: String,
    pub tactics: String,
    pub suppliers: Vec<SupplierInput>,
}

#[derive(Debug, Deserialize)]
pub struct SupplierInput {
    pub id: String,
    pub address: String,
    pub insights: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartNegotiationResponse {
    pub negotiation_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct NegotiationSummary {
    pub negotiation_id: String,
    pub product: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub negotiation_id: String,
    pub product: String,
    pub strategy: String,
    pub tactics: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub conversations: Vec<ConversationView>,
}

/// `phase` is absent when the negotiation row is live but this process holds
/// no session for it, which happens after a restart.
#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub supplier_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub message_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub negotiation_id: String,
    pub supplier_id: String,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub sequence: i64,
    pub direction: String,
    pub body: String,
    pub sent_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub outcome: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InboundEventRequest {
    #[serde(rename = "from")]
    pub from_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub thread_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InboundEventResponse {
    pub disposition: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negotiation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ambiguous: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(engine: Arc<NegotiationEngine>) -> Router {
    Router::new()
        .route("/api/v1/negotiations", post(start_negotiation).get(list_negotiations))
        .route("/api/v1/negotiations/{id}", get(negotiation_status))
        .route(
            "/api/v1/negotiations/{id}/conversations/{supplier_id}",
            get(conversation_transcript),
        )
        .route("/api/v1/negotiations/{id}/openings", post(retry_openings))
        .route("/api/v1/negotiations/{id}/cancel", post(cancel_negotiation))
        .route("/api/v1/inbound", post(inbound_event))
        .with_state(ApiState { engine })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn start_negotiation(
    State(state): State<ApiState>,
    Json(body): Json<StartNegotiationRequest>,
) -> Result<(StatusCode, Json<StartNegotiationResponse>), (StatusCode, Json<ApiError>)> {
    let correlation_id = new_correlation_id();

    let request = NegotiationRequest {
        product: body.product,
        strategy: body.strategy,
        tactics: body.tactics,
        suppliers: body
            .suppliers
            .into_iter()
            .map(|supplier| SupplierSpec {
                id: SupplierId(supplier.id),
                address: supplier.address,
                insights: supplier.insights,
            })
            .collect(),
    };

    let receipt = state
        .engine
        .start(request)
        .await
        .map_err(|error| engine_error(error, correlation_id.clone()))?;

    info!(
        event_name = "api.negotiation_started",
        correlation_id = %correlation_id,
        negotiation_id = %receipt.negotiation_id,
        "negotiation started via api"
    );

    Ok((
        StatusCode::CREATED,
        Json(StartNegotiationResponse {
            negotiation_id: receipt.negotiation_id.to_string(),
            status: receipt.status.as_str().to_string(),
        }),
    ))
}

async fn list_negotiations(
    State(state): State<ApiState>,
) -> Result<Json<Vec<NegotiationSummary>>, (StatusCode, Json<ApiError>)> {
    let correlation_id = new_correlation_id();

    let negotiations =
        state.engine.list().await.map_err(|error| engine_error(error, correlation_id))?;

    Ok(Json(
        negotiations
            .into_iter()
            .map(|negotiation| NegotiationSummary {
                negotiation_id: negotiation.id.to_string(),
                product: negotiation.product,
                status: negotiation.status.as_str().to_string(),
                created_at: negotiation.created_at.to_rfc3339(),
                updated_at: negotiation.updated_at.to_rfc3339(),
            })
            .collect(),
    ))
}

async fn negotiation_status(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ApiError>)> {
    let correlation_id = new_correlation_id();

    let report = state
        .engine
        .status(&NegotiationId(id))
        .await
        .map_err(|error| engine_error(error, correlation_id))?;

    Ok(Json(status_response(report)))
}

async fn conversation_transcript(
    Path((id, supplier_id)): Path<(String, String)>,
    State(state): State<ApiState>,
) -> Result<Json<TranscriptResponse>, (StatusCode, Json<ApiError>)> {
    let correlation_id = new_correlation_id();

    let negotiation_id = NegotiationId(id);
    let supplier_id = SupplierId(supplier_id);
    let messages = state
        .engine
        .conversation(&negotiation_id, &supplier_id)
        .await
        .map_err(|error| engine_error(error, correlation_id))?;

    Ok(Json(TranscriptResponse {
        negotiation_id: negotiation_id.to_string(),
        supplier_id: supplier_id.0,
        messages: messages
            .into_iter()
            .map(|message| MessageView {
                sequence: message.sequence,
                direction: message.direction.as_str().to_string(),
                body: message.body,
                sent_at: message.sent_at.to_rfc3339(),
            })
            .collect(),
    }))
}

async fn retry_openings(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ApiError>)> {
    let correlation_id = new_correlation_id();

    let report = state
        .engine
        .retry_openings(&NegotiationId(id))
        .await
        .map_err(|error| engine_error(error, correlation_id.clone()))?;

    info!(
        event_name = "api.openings_retried",
        correlation_id = %correlation_id,
        negotiation_id = %report.negotiation.id,
        "opening retry requested via api"
    );

    Ok(Json(status_response(report)))
}

async fn cancel_negotiation(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ApiError>)> {
    let correlation_id = new_correlation_id();

    let outcome = match body.outcome.as_deref() {
        None | Some("failed") => NegotiationStatus::Failed,
        Some("completed") => NegotiationStatus::Completed,
        Some(other) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: format!(
                        "unsupported cancel outcome `{other}` (expected completed|failed)"
                    ),
                    correlation_id,
                }),
            ));
        }
    };

    let report = state
        .engine
        .cancel(&NegotiationId(id), outcome)
        .await
        .map_err(|error| engine_error(error, correlation_id.clone()))?;

    info!(
        event_name = "api.negotiation_cancelled",
        correlation_id = %correlation_id,
        negotiation_id = %report.negotiation.id,
        outcome = outcome.as_str(),
        "negotiation cancelled via api"
    );

    Ok(Json(status_response(report)))
}

async fn inbound_event(
    State(state): State<ApiState>,
    Json(body): Json<InboundEventRequest>,
) -> Result<Json<InboundEventResponse>, (StatusCode, Json<ApiError>)> {
    let correlation_id = new_correlation_id();

    if body.from_address.trim().is_empty() || body.body.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: "from and body are required".to_string(),
                correlation_id,
            }),
        ));
    }

    let email = InboundEmail {
        message_id: format!("web-{}", Uuid::new_v4().simple()),
        thread_key: body.thread_key,
        from_address: body.from_address,
        subject: body.subject,
        body: body.body,
        received_at: Utc::now(),
    };

    info!(
        event_name = "api.inbound_received",
        correlation_id = %correlation_id,
        from_address = %email.from_address,
        thread_key = email.thread_key.as_deref().unwrap_or("none"),
        "inbound event received via webhook"
    );

    let disposition = state
        .engine
        .route_inbound(email, &correlation_id)
        .await
        .map_err(|error| engine_error(error, correlation_id))?;

    Ok(Json(match disposition {
        RoutingDisposition::Dispatched { negotiation_id, supplier_id, ambiguous } => {
            InboundEventResponse {
                disposition: "dispatched",
                negotiation_id: Some(negotiation_id.to_string()),
                supplier_id: Some(supplier_id.0),
                ambiguous: Some(ambiguous),
                reason: None,
            }
        }
        RoutingDisposition::Orphaned { reason } => InboundEventResponse {
            disposition: "orphaned",
            negotiation_id: None,
            supplier_id: None,
            ambiguous: None,
            reason: Some(reason),
        },
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_correlation_id() -> String {
    format!("api-{}", Uuid::new_v4().simple())
}

fn status_response(report: StatusReport) -> StatusResponse {
    StatusResponse {
        negotiation_id: report.negotiation.id.to_string(),
        product: report.negotiation.product,
        strategy: report.negotiation.strategy,
        tactics: report.negotiation.tactics,
        status: report.negotiation.status.as_str().to_string(),
        created_at: report.negotiation.created_at.to_rfc3339(),
        updated_at: report.negotiation.updated_at.to_rfc3339(),
        conversations: report
            .conversations
            .into_iter()
            .map(|conversation| ConversationView {
                supplier_id: conversation.supplier_id.0,
                phase: conversation.phase.map(|phase| phase.as_str().to_string()),
                message_count: conversation.message_count,
                last_error: conversation.last_error.map(|error| error.to_string()),
            })
            .collect(),
    }
}

fn engine_error(error: EngineError, correlation_id: String) -> (StatusCode, Json<ApiError>) {
    warn!(
        event_name = "api.request_failed",
        correlation_id = %correlation_id,
        error = %error,
        "engine call failed"
    );

    // Domain failures keep their detail; the caller needs to know which
    // field or transition was rejected.
    let detail = match &error {
        EngineError::Domain(domain) => Some(domain.to_string()),
        _ => None,
    };

    match error.into_interface(correlation_id) {
        InterfaceError::BadRequest { message, correlation_id } => (
            StatusCode::BAD_REQUEST,
            Json(ApiError { error: detail.unwrap_or(message), correlation_id }),
        ),
        InterfaceError::NotFound { message, correlation_id } => {
            (StatusCode::NOT_FOUND, Json(ApiError { error: message, correlation_id }))
        }
        InterfaceError::ServiceUnavailable { message, correlation_id } => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(ApiError { error: message, correlation_id }))
        }
        InterfaceError::Internal { message, correlation_id } => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { error: message, correlation_id }))
        }
    }
}
