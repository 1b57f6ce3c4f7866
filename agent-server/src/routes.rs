//! Routes every role serves: health, descriptor, agent card and JSON-RPC.

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use harness::io::transport::{
    AGENT_CARD_PATH, AgentCard, CODE_INVALID_PARAMS, CODE_METHOD_NOT_FOUND, LEGACY_AGENT_CARD_PATH,
    METHOD_CANCEL, METHOD_SEND, Message, RpcRequest, RpcResponse, SendParams,
};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use crate::error::{blocking, rpc_code};
use crate::sessions;
use crate::state::AppState;

/// Build the full router for the state's role.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/", get(descriptor).post(rpc))
        .route("/health", get(health))
        .route(AGENT_CARD_PATH, get(card))
        .route(LEGACY_AGENT_CARD_PATH, get(card));
    if state.services.is_some() {
        router = router.nest("/a2a", sessions::router());
    }
    router.layer(cors).with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// GET / - service descriptor.
async fn descriptor(State(state): State<AppState>) -> Json<Value> {
    let mut body = json!({
        "status": "online",
        "service": state.card.name,
        "role": state.role.as_str(),
        "version": state.card.version,
    });
    if let Some(services) = &state.services {
        body["evaluation_metrics"] = json!(services.metrics);
    }
    Json(body)
}

async fn card(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

/// POST / - JSON-RPC 2.0 entry point.
async fn rpc(State(state): State<AppState>, Json(request): Json<RpcRequest>) -> Json<RpcResponse> {
    let id = request.id;
    debug!(method = %request.method, "rpc request");
    let response = match request.method.as_str() {
        METHOD_SEND => match serde_json::from_value::<SendParams>(request.params) {
            Ok(params) => {
                let text = params.message.text_parts().join("\n");
                let agent = state.agent.clone();
                match blocking(move || agent.handle(&text)).await {
                    Ok(reply) => {
                        info!(role = state.role.as_str(), bytes = reply.len(), "message handled");
                        RpcResponse::success(id, Message::agent_text(&reply))
                    }
                    Err(err) => RpcResponse::failure(id, rpc_code(&err), format!("{err:#}")),
                }
            }
            Err(err) => RpcResponse::failure(id, CODE_INVALID_PARAMS, format!("invalid params: {err}")),
        },
        METHOD_CANCEL => match state.agent.cancel() {
            Ok(()) => RpcResponse::success(id, Message::agent_text("cancelled")),
            Err(err) => RpcResponse::failure(id, rpc_code(&err), format!("{err:#}")),
        },
        other => RpcResponse::failure(id, CODE_METHOD_NOT_FOUND, format!("unknown method {other}")),
    };
    Json(response)
}
