// Engine HTTP API implementation
// This file provides HTTP endpoints for quoting, order lifecycle, and
// delivery reconciliation
//
// Numan Thabit 2025 Nov

use crate::amm::{from_wei, to_wei, AmmQuoteRequest, QuoteSimulator};
use crate::endpoint::EndpointResolver;
use crate::errors::BridgeError;
use crate::escrow::dispatch::{log_progress, DispatchRequest};
use crate::escrow::order::{CreateOrderRequest, EngineStats, EscrowEngine};
use crate::reconcile::{DeliveryProbe, DeliveryQuery, Reconciler, SourceStatus};
use crate::router::{Planner, QuoteSequencer, RouteQuery, SwapQuote, WiringHealth};
use crate::transport::wallet::RpcWallet;
use alloy_primitives::{Address, B256, U256};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router as AxumRouter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state behind the API: the resolver plus the four engines built
/// on top of it.
pub struct EngineState {
    pub resolver: EndpointResolver,
    pub planner: Planner,
    pub simulator: QuoteSimulator,
    pub engine: EscrowEngine<RpcWallet>,
    pub reconciler: Reconciler,
    pub sequencer: QuoteSequencer,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_status(err: &BridgeError) -> StatusCode {
    match err {
        BridgeError::Unsupported(_) => StatusCode::BAD_REQUEST,
        BridgeError::Rpc(_) | BridgeError::Timeout(_) => StatusCode::BAD_GATEWAY,
        BridgeError::Wiring(_) | BridgeError::Liquidity(_) => StatusCode::CONFLICT,
        BridgeError::Create(_) | BridgeError::Dispatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn fail(err: BridgeError) -> ApiError {
    (
        error_status(&err),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn parse_address(raw: &str, field: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|_| bad_request(format!("{field}: bad address {raw:?}")))
}

/// Accepts `0x` hex or decimal.
fn parse_u256(raw: &str, field: &str) -> Result<U256, ApiError> {
    raw.parse()
        .map_err(|_| bad_request(format!("{field}: bad integer {raw:?}")))
}

fn parse_b256(raw: &str, field: &str) -> Result<B256, ApiError> {
    raw.parse()
        .map_err(|_| bad_request(format!("{field}: bad hash {raw:?}")))
}

/// Create the HTTP router with API endpoints
pub fn create_api_router(state: Arc<EngineState>) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        .route("/api/v1/quote", post(quote_swap))
        .route("/api/v1/order", post(create_order))
        .route("/api/v1/dispatch", post(dispatch_order))
        .route("/api/v1/order/cancel", post(cancel_order))
        .route("/api/v1/status", post(source_status))
        .route("/api/v1/delivery", post(find_delivery))
        .route("/api/v1/wiring", post(wiring_health))
        .route("/api/v1/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn metrics_text() -> Result<String, ApiError> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: format!("metrics encode: {e}"),
                }),
            )
        })?;
    String::from_utf8(buffer).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("metrics utf8: {e}"),
            }),
        )
    })
}

#[derive(Debug, Deserialize)]
pub struct QuoteApiRequest {
    pub from_chain: u64,
    pub to_chain: u64,
    pub token_in: String,
    pub token_out: String,
    /// Human units of the input token.
    pub amount_in: f64,
    pub user: Option<String>,
}

/// Quote endpoint: message-fee route plan plus the destination swap
/// estimate. Stale responses superseded by a newer request are rejected
/// so clients never render an outdated quote.
async fn quote_swap(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<QuoteApiRequest>,
) -> Result<Json<SwapQuote>, ApiError> {
    let token = state.sequencer.begin();

    let token_in = parse_address(&req.token_in, "token_in")?;
    let token_out = parse_address(&req.token_out, "token_out")?;
    let user = match &req.user {
        Some(raw) => parse_address(raw, "user")?,
        None => state.engine.maker(),
    };
    let amount_wei = to_wei(req.amount_in, 18).map_err(fail)?;

    let query = RouteQuery {
        from_chain: req.from_chain,
        to_chain: req.to_chain,
        token_in,
        token_out,
        amount_wei,
        user,
    };
    let route = state.planner.plan_route(&query).await.map_err(fail)?;

    let dst_rpc = state.resolver.resolve(req.to_chain).await.map_err(fail)?;
    let amm_quote = state
        .simulator
        .quote(
            &dst_rpc,
            &AmmQuoteRequest {
                chain_id: req.to_chain,
                token_in,
                token_out,
                amount_in: req.amount_in,
                pre_subtract_fee_bps: None,
            },
        )
        .await
        .map_err(fail)?;

    // USD framing of the message fee is decoration; a failed oracle read
    // never blocks the quote.
    let fee_usd_estimate = match state.resolver.resolve(req.from_chain).await {
        Ok(src_rpc) => state
            .simulator
            .native_price_usd(&src_rpc, req.from_chain)
            .await
            .ok()
            .map(|price| from_wei(route.total_native_fee, 18) * price),
        Err(_) => None,
    };

    if !state.sequencer.is_current(token) {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "superseded by a newer quote request".into(),
            }),
        ));
    }

    Ok(Json(SwapQuote {
        amount_in: req.amount_in,
        amount_out_estimate: amm_quote.amount_out,
        price_impact_pct: amm_quote.price_impact_pct,
        fee_usd_estimate,
        route,
    }))
}

#[derive(Debug, Deserialize)]
pub struct OrderApiRequest {
    pub from_chain: u64,
    pub to_chain: u64,
    pub token_in: String,
    pub token_out: String,
    /// Wei, decimal or 0x hex.
    pub amount_in_wei: String,
    pub min_amount_out_wei: String,
}

#[derive(Debug, Serialize)]
pub struct OrderApiResponse {
    pub order_id: String,
    pub tx_hash: String,
}

async fn create_order(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<OrderApiRequest>,
) -> Result<Json<OrderApiResponse>, ApiError> {
    let request = CreateOrderRequest {
        from_chain: req.from_chain,
        to_chain: req.to_chain,
        token_in: parse_address(&req.token_in, "token_in")?,
        token_out: parse_address(&req.token_out, "token_out")?,
        amount_in: parse_u256(&req.amount_in_wei, "amount_in_wei")?,
        min_amount_out: parse_u256(&req.min_amount_out_wei, "min_amount_out_wei")?,
    };
    let handle = state.engine.create_order(&request).await.map_err(fail)?;
    Ok(Json(OrderApiResponse {
        order_id: handle.order_id.to_string(),
        tx_hash: handle.tx_hash.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DispatchApiRequest {
    pub from_chain: u64,
    pub to_chain: u64,
    pub order_id: String,
    pub recipient: String,
    pub min_amount_out_wei: String,
    pub native_to_native: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct DispatchApiResponse {
    pub tx_hash: String,
}

async fn dispatch_order(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<DispatchApiRequest>,
) -> Result<Json<DispatchApiResponse>, ApiError> {
    let request = DispatchRequest {
        from_chain: req.from_chain,
        to_chain: req.to_chain,
        order_id: parse_u256(&req.order_id, "order_id")?,
        recipient: parse_address(&req.recipient, "recipient")?,
        min_amount_out: parse_u256(&req.min_amount_out_wei, "min_amount_out_wei")?,
        native_to_native: req.native_to_native.unwrap_or(false),
    };
    let tx_hash = state
        .engine
        .dispatch_order(&request, &log_progress)
        .await
        .map_err(fail)?;
    // A dispatch moves the destination pool; stale estimates go with it.
    state.simulator.clear(Some(req.to_chain)).await;
    Ok(Json(DispatchApiResponse {
        tx_hash: tx_hash.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CancelApiRequest {
    pub chain_id: u64,
    pub order_id: String,
}

async fn cancel_order(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<CancelApiRequest>,
) -> Result<Json<DispatchApiResponse>, ApiError> {
    let order_id = parse_u256(&req.order_id, "order_id")?;
    let tx_hash = state
        .engine
        .cancel_order(req.chain_id, order_id)
        .await
        .map_err(fail)?;
    Ok(Json(DispatchApiResponse {
        tx_hash: tx_hash.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusApiRequest {
    pub chain_id: u64,
    pub tx_hash: String,
}

async fn source_status(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<StatusApiRequest>,
) -> Result<Json<SourceStatus>, ApiError> {
    let tx_hash = parse_b256(&req.tx_hash, "tx_hash")?;
    let status = state
        .reconciler
        .source_status(req.chain_id, tx_hash)
        .await
        .map_err(fail)?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct DeliveryApiRequest {
    pub to_chain: u64,
    pub recipient: String,
    pub order_id: Option<String>,
    pub min_block: Option<u64>,
    pub max_lookback: Option<u64>,
}

async fn find_delivery(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<DeliveryApiRequest>,
) -> Result<Json<DeliveryProbe>, ApiError> {
    let order_id = req
        .order_id
        .as_deref()
        .map(|raw| parse_u256(raw, "order_id"))
        .transpose()?;
    let query = DeliveryQuery {
        to_chain: req.to_chain,
        recipient: parse_address(&req.recipient, "recipient")?,
        order_id,
        min_block: req.min_block.unwrap_or(0),
        max_lookback: req.max_lookback.unwrap_or(5_000),
    };
    let probe = state.reconciler.find_delivery(&query).await.map_err(fail)?;
    Ok(Json(probe))
}

#[derive(Debug, Deserialize)]
pub struct WiringApiRequest {
    pub from_chain: u64,
    pub to_chain: u64,
}

async fn wiring_health(
    State(state): State<Arc<EngineState>>,
    Json(req): Json<WiringApiRequest>,
) -> Result<Json<WiringHealth>, ApiError> {
    let health = state
        .planner
        .wiring_health(req.from_chain, req.to_chain)
        .await
        .map_err(fail)?;
    Ok(Json(health))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub engine: EngineStats,
    pub cached_endpoints: usize,
}

async fn get_stats(State(state): State<Arc<EngineState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        engine: state.engine.stats(),
        cached_endpoints: state.resolver.cached_chains().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainRegistry;
    use crate::transport::jsonrpc::EvmRpc;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> Arc<EngineState> {
        let registry = ChainRegistry::builtin(None);
        let resolver = EndpointResolver::new(registry.clone());
        let wallet = RpcWallet::new(EvmRpc::new("http://127.0.0.1:1"));
        Arc::new(EngineState {
            resolver: resolver.clone(),
            planner: Planner::new(resolver.clone()),
            simulator: QuoteSimulator::new(registry),
            engine: EscrowEngine::new(resolver.clone(), wallet, Address::ZERO),
            reconciler: Reconciler::new(resolver),
            sequencer: QuoteSequencer::default(),
        })
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let app = create_api_router(state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bad_address_is_rejected_before_any_network_call() {
        let app = create_api_router(state());
        let body = serde_json::json!({
            "from_chain": 11155111u64,
            "to_chain": 421614u64,
            "token_in": "not-an-address",
            "token_out": "0x0000000000000000000000000000000000000000",
            "amount_in": 1.0,
        });
        let response = app
            .oneshot(
                Request::post("/api/v1/quote")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn taxonomy_maps_to_http_statuses() {
        assert_eq!(
            error_status(&BridgeError::Unsupported("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&BridgeError::Rpc("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&BridgeError::Wiring("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&BridgeError::Dispatch("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn integer_parsing_accepts_decimal_and_hex() {
        assert_eq!(parse_u256("42", "f").unwrap(), U256::from(42));
        assert_eq!(parse_u256("0x2a", "f").unwrap(), U256::from(42));
        assert!(parse_u256("nope", "f").is_err());
    }
}
