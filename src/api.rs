//! REST API server for StarNotary
//!
//! Maps the ledger and notary operations one-to-one onto HTTP endpoints.
//! Star payload shaping (word cap, hex story) happens here, before the
//! notary sees the body.

use axum::{
    extract::{Path, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::blockchain::{Block, ChainDefect, Ledger};
use crate::error::ChainError;
use crate::node::NodeState;
use crate::notary::NotaryWorkflow;
use crate::star::{self, StarRegistration, STORY_WORD_LIMIT};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct Node {
    pub ledger: Arc<Ledger>,
    pub notary: Arc<NotaryWorkflow>,
    // Optional shared orchestrator state (NodeState) for health checks and logging
    pub state: Option<Arc<RwLock<NodeState>>>,
    story_word_limit: usize,
    api_stats: Arc<RwLock<ApiStats>>,
}

/// API statistics and monitoring
#[derive(Debug, Default)]
struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    blocks_appended: u64,
    stars_registered: u64,
    start_time: Option<Instant>,
}

impl ApiStats {
    fn new() -> Self {
        ApiStats {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }
}

impl Node {
    pub fn new(notary: Arc<NotaryWorkflow>) -> Self {
        Self {
            ledger: notary.ledger().clone(),
            notary,
            state: None,
            story_word_limit: STORY_WORD_LIMIT,
            api_stats: Arc::new(RwLock::new(ApiStats::new())),
        }
    }

    /// Create an API node that reports the orchestrator's `NodeState` on
    /// `/health`.
    pub fn new_shared(
        notary: Arc<NotaryWorkflow>,
        state: Option<Arc<RwLock<NodeState>>>,
        story_word_limit: usize,
    ) -> Self {
        Self {
            state,
            story_word_limit,
            ..Self::new(notary)
        }
    }

    pub async fn get_stats(&self) -> ApiStatsResponse {
        let stats = self.api_stats.read().await;
        let uptime = stats.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0);

        ApiStatsResponse {
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            blocks_appended: stats.blocks_appended,
            stars_registered: stats.stars_registered,
            uptime_seconds: uptime,
            chain_height: self.ledger.get_height(),
        }
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Chain(ChainError),
    InvalidInput(String),
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Chain(e) => {
                let status = match &e {
                    ChainError::BlockNotFound(_) => StatusCode::NOT_FOUND,
                    ChainError::NoChallenge(_)
                    | ChainError::ChallengeExpired(_)
                    | ChainError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
                    ChainError::NotAuthorized(_) => StatusCode::UNAUTHORIZED,
                    ChainError::AlreadyConsumed(_) => StatusCode::CONFLICT,
                    ChainError::IntegrityError(_)
                    | ChainError::StorageError(_)
                    | ChainError::SerializationError(_)
                    | ChainError::CryptoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Chain(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiStatsResponse {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub blocks_appended: u64,
    pub stars_registered: u64,
    pub uptime_seconds: u64,
    pub chain_height: i64,
}

#[derive(Deserialize)]
pub struct AppendRequest {
    pub body: String,
}

#[derive(Deserialize)]
pub struct ValidationRequest {
    pub address: String,
}

#[derive(Deserialize)]
pub struct SignatureRequest {
    pub address: String,
    pub signature: String,
}

#[derive(Serialize)]
struct BlockResponse {
    block: Block,
}

#[derive(Serialize)]
struct ChainValidationResponse {
    valid: bool,
    height: i64,
    defects: Vec<ChainDefect>,
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Heights arrive as raw path segments; anything that is not a non-negative
/// integer cannot name a block.
fn parse_height(raw: &str) -> Result<u64, ApiError> {
    raw.parse::<u64>()
        .map_err(|_| ApiError::NotFound(format!("Block at height {} not found", raw)))
}

fn require_address(address: &str) -> Result<&str, ApiError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ApiError::InvalidInput("address is required".to_string()));
    }
    Ok(address)
}

// ============================================================================
// Middleware
// ============================================================================

/// Request statistics middleware
async fn stats_middleware(State(node): State<Arc<Node>>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    let success = response.status().is_success();
    let mut stats = node.api_stats.write().await;
    stats.record_request(success);

    response
}

/// Logs method, path, status, duration and current `NodeState` (when available).
async fn logging_middleware(
    State(node): State<Arc<Node>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    let node_state = if let Some(s) = &node.state {
        format!("{:?}", s.read().await.clone())
    } else {
        "unknown".to_string()
    };

    tracing::info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        node_state = %node_state,
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true);

    let api_routes = Router::new()
        // Ledger endpoints
        .route("/height", get(get_height))
        .route("/block", post(append_block))
        .route("/block/:height", get(get_block_by_height))
        .route("/validate", get(validate_chain))
        .route("/validate/:height", get(validate_block))
        // Notary endpoints
        .route("/requestValidation", post(request_validation))
        .route("/message-signature/validate", post(validate_signature))
        .route("/star", post(register_star))
        .route("/stars/address/:address", get(get_stars_by_address))
        .route("/stars/hash/:hash", get(get_star_by_hash))
        // System endpoints
        .route("/health", get(health_check))
        .route("/stats", get(get_api_stats))
        // logging before stats so we always record timing and node-state
        .layer(middleware::from_fn_with_state(node.clone(), logging_middleware))
        .layer(middleware::from_fn_with_state(node.clone(), stats_middleware))
        .with_state(node);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn run_api_server(node: Arc<Node>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_api_router(node);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "api.listening");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let state = match &node.state {
        Some(s) => Some(s.read().await.clone()),
        None => None,
    };

    let (status, label) = match &state {
        Some(NodeState::Ready) | None => (StatusCode::OK, "healthy"),
        Some(_) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        status,
        Json(json!({
            "status": label,
            "node_state": state.map(|s| format!("{:?}", s)),
            "height": node.ledger.get_height(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn get_height(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.ledger.get_height())
}

async fn get_block_by_height(
    State(node): State<Arc<Node>>,
    Path(raw_height): Path<String>,
) -> Result<Json<BlockResponse>, ApiError> {
    let height = parse_height(&raw_height)?;
    let mut block = node.ledger.get_block(height)?;
    star::decode_story(&mut block);
    Ok(Json(BlockResponse { block }))
}

async fn append_block(
    State(node): State<Arc<Node>>,
    Json(req): Json<AppendRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.body.trim().is_empty() {
        return Err(ApiError::InvalidInput(
            "New block rejected, please add some body content in string format".to_string(),
        ));
    }

    let block = node.ledger.append(serde_json::Value::String(req.body))?;
    node.api_stats.write().await.blocks_appended += 1;

    Ok(Json(json!({
        "note": "New block added successfully",
        "block": block
    })))
}

async fn validate_block(
    State(node): State<Arc<Node>>,
    Path(raw_height): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let height = parse_height(&raw_height)?;
    let valid = node.ledger.validate_block(height)?;
    Ok(Json(json!({ "height": height, "valid": valid })))
}

async fn validate_chain(
    State(node): State<Arc<Node>>,
) -> Result<Json<ChainValidationResponse>, ApiError> {
    let defects = node.ledger.validate_chain()?;
    Ok(Json(ChainValidationResponse {
        valid: defects.is_empty(),
        height: node.ledger.get_height(),
        defects,
    }))
}

async fn request_validation(
    State(node): State<Arc<Node>>,
    Json(req): Json<ValidationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let address = require_address(&req.address)?;
    let challenge = node.notary.request_challenge(address, now_secs());
    Ok(Json(challenge))
}

async fn validate_signature(
    State(node): State<Arc<Node>>,
    Json(req): Json<SignatureRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let address = require_address(&req.address)?;
    let outcome = node
        .notary
        .verify_challenge(address, req.signature.trim(), now_secs())?;
    let challenge = node.notary.challenge(address);

    Ok(Json(json!({
        "registerStar": outcome.valid,
        "status": {
            "address": address,
            "requestTimeStamp": challenge.as_ref().map(|c| c.issued_at),
            "message": challenge.as_ref().map(|c| c.message()),
            "validationWindow": outcome.remaining_seconds,
            "messageSignature": if outcome.valid { "valid" } else { "invalid" }
        }
    })))
}

async fn register_star(
    State(node): State<Arc<Node>>,
    Json(req): Json<StarRegistration>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let address = require_address(&req.address)?.to_string();
    let body = req.into_block_body(node.story_word_limit)?;

    let mut block = node.notary.commit_claim(&address, body, now_secs())?;
    node.api_stats.write().await.stars_registered += 1;

    star::decode_story(&mut block);
    Ok(Json(json!({
        "note": "New star block added successfully",
        "block": block
    })))
}

async fn get_stars_by_address(
    State(node): State<Arc<Node>>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stars = star::stars_by_address(&node.ledger, &address)?;
    Ok(Json(json!({
        "address": address,
        "count": stars.len(),
        "stars": stars
    })))
}

async fn get_star_by_hash(
    State(node): State<Arc<Node>>,
    Path(hash): Path<String>,
) -> Result<Json<BlockResponse>, ApiError> {
    star::star_by_hash(&node.ledger, &hash)?
        .map(|block| Json(BlockResponse { block }))
        .ok_or_else(|| ApiError::NotFound(format!("No block with hash {}", hash)))
}

async fn get_api_stats(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.get_stats().await)
}
