//! HTTP surface: JSON endpoints under `/api`, CORS for a single origin.

use std::sync::LazyLock;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::map_response;
use axum::response::Response;
use axum::routing::{MethodRouter, get, post};
use axum::{Json, Router};
use regex::Regex;
use serde::Serialize;
use tracing::{error, info};
use url::Url;

use crate::assistant::{Assistant, QueryResultRecord};
use crate::config::ServerConfig;
use crate::db::ConnectionStatus;
use crate::error::MarketAiError;
use crate::tools::{
    AskRequest, ConnectRequest, ConnectResponse, HistoryResponse, QueryRequest, QueryResponse,
    SchemaOverviewResponse, SchemaResponse,
};

static DNS_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)failed to lookup address|name or service not known|nodename nor servname|no such host|temporary failure in name resolution|ENOTFOUND",
    )
    .expect("dns pattern is valid")
});

#[derive(Debug, Clone)]
pub struct AppState {
    pub assistant: Assistant,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    /// Set when `details` shows the database host could not be resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

type ApiFailure = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, ApiFailure>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiFailure {
    (
        status,
        Json(ApiError {
            error: msg.into(),
            details: None,
            hint: None,
        }),
    )
}

fn internal_error(label: &str, details: String, hint: Option<String>) -> ApiFailure {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            error: label.to_string(),
            details: Some(details),
            hint,
        }),
    )
}

pub fn dns_hint(details: &str, host: Option<&str>) -> Option<String> {
    if !DNS_FAILURE.is_match(details) {
        return None;
    }
    Some(match host {
        Some(host) => format!(
            "Failed to resolve database hostname {host}. Check the connection string and that the database server is reachable."
        ),
        None => "Failed to resolve database hostname. Check the connection string and that the database server is reachable.".to_string(),
    })
}

impl AppState {
    pub fn new(assistant: Assistant) -> Self {
        Self { assistant }
    }

    /// Map a backend error to the endpoint's envelope.
    async fn failure(&self, label: &str, err: MarketAiError) -> ApiFailure {
        if let MarketAiError::InvalidInput(msg) = err {
            return api_error(StatusCode::BAD_REQUEST, msg);
        }

        error!("{}: {}", label, err);
        let details = err.to_string();
        let host = self
            .assistant
            .status()
            .await
            .target
            .and_then(|target| Url::parse(&target).ok())
            .and_then(|url| url.host_str().map(str::to_string));
        let hint = dns_hint(&details, host.as_deref());
        internal_error(label, details, hint)
    }
}

/// Unwrap a JSON body. A request without a JSON content type counts as an
/// empty object, so the required-field check answers it.
fn parse_body<T: Default>(body: Result<Json<T>, JsonRejection>, label: &str) -> Result<T, ApiFailure> {
    match body {
        Ok(Json(request)) => Ok(request),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => {
            error!("{}: {}", label, rejection.body_text());
            Err(internal_error(label, rejection.body_text(), None))
        }
    }
}

async fn connect(
    State(state): State<AppState>,
    body: Result<Json<ConnectRequest>, JsonRejection>,
) -> ApiResult<ConnectResponse> {
    const LABEL: &str = "Failed to connect to database";
    let request = parse_body(body, LABEL)?;
    let Some(connection_string) = request.connection_string() else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Connection string is required"));
    };

    match state.assistant.database().connect(connection_string).await {
        Ok(_) => Ok(Json(ConnectResponse::established())),
        Err(e) => Err(state.failure(LABEL, e).await),
    }
}

async fn query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<QueryResponse> {
    const LABEL: &str = "Failed to execute query";
    let request = parse_body(body, LABEL)?;
    let Some(sql) = request.query() else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Query is required"));
    };

    match state.assistant.database().execute(sql).await {
        Ok(data) => Ok(Json(QueryResponse { data })),
        Err(e) => Err(state.failure(LABEL, e).await),
    }
}

async fn schema(State(state): State<AppState>) -> ApiResult<SchemaResponse> {
    match state.assistant.database().schema().await {
        Ok(data) => Ok(Json(SchemaResponse { data })),
        Err(e) => Err(state.failure("Failed to fetch schema info", e).await),
    }
}

async fn schema_overview(State(state): State<AppState>) -> ApiResult<SchemaOverviewResponse> {
    match state.assistant.schema_overview().await {
        Ok(data) => Ok(Json(SchemaOverviewResponse { data })),
        Err(e) => Err(state.failure("Failed to fetch schema info", e).await),
    }
}

async fn ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> ApiResult<QueryResultRecord> {
    const LABEL: &str = "Failed to answer question";
    let request = parse_body(body, LABEL)?;
    let Some(question) = request.question() else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Question is required"));
    };

    match state.assistant.ask(question).await {
        Ok(record) => Ok(Json(record)),
        Err(e) => Err(state.failure(LABEL, e).await),
    }
}

async fn history(State(state): State<AppState>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        data: state.assistant.history().await,
    })
}

async fn health(State(state): State<AppState>) -> Json<ConnectionStatus> {
    Json(state.assistant.status().await)
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Answer `OPTIONS` on the route and stamp every response with the CORS headers.
fn with_cors(
    route: MethodRouter<AppState>,
    origin: &HeaderValue,
    methods: &'static str,
) -> MethodRouter<AppState> {
    let origin = origin.clone();
    route
        .options(preflight)
        .layer(map_response(move |mut response: Response| {
            let origin = origin.clone();
            async move {
                let headers = response.headers_mut();
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(methods));
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
                response
            }
        }))
}

pub fn router(state: AppState, allowed_origin: HeaderValue) -> Router {
    const POST: &str = "POST, OPTIONS";
    const GET: &str = "GET, OPTIONS";

    Router::new()
        .route("/api/db/connect", with_cors(post(connect), &allowed_origin, POST))
        .route("/api/db/query", with_cors(post(query), &allowed_origin, POST))
        .route("/api/db/schema", with_cors(get(schema), &allowed_origin, GET))
        .route(
            "/api/db/schema/overview",
            with_cors(get(schema_overview), &allowed_origin, GET),
        )
        .route("/api/ask", with_cors(post(ask), &allowed_origin, POST))
        .route("/api/history", with_cors(get(history), &allowed_origin, GET))
        .route("/api/health", with_cors(get(health), &allowed_origin, GET))
        .with_state(state)
}

pub async fn run(config: &ServerConfig, assistant: Assistant) -> anyhow::Result<()> {
    let origin = HeaderValue::from_str(&config.allowed_origin)?;
    let app = router(AppState::new(assistant), origin);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running on port {}", config.port);
    info!(origin = %config.allowed_origin, "CORS origin configured");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
