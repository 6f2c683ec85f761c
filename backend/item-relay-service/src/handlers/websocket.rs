/// WebSocket upgrade and connection diagnostics
///
/// Clients connect to /ws?requestId=R and receive the outcome notification
/// for R on that socket.
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::websocket::WsSession;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}

/// Upgrade to a WebSocket session
///
/// Endpoint: GET /ws?requestId=R
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> ActixResult<HttpResponse> {
    let connection_id = Uuid::new_v4().to_string();
    let request_id = query.into_inner().request_id;

    // Attach first so a notification racing the registration still finds a session.
    let outbound = state.hub.attach(&connection_id).await;

    if let Err(e) = state
        .events
        .connect(&connection_id, request_id.as_deref())
        .await
    {
        state.hub.detach(&connection_id).await;
        tracing::error!(connection_id = %connection_id, error = %e, "Error storing connection");
        return Err(AppError::Internal(format!("Failed to connect: {}", e)).into());
    }

    let session = WsSession::new(
        connection_id.clone(),
        state.events.clone(),
        state.hub.clone(),
        outbound,
        state.heartbeat_interval,
        state.client_timeout,
    );

    match ws::start(session, &req, stream) {
        Ok(response) => Ok(response),
        Err(e) => {
            state.hub.detach(&connection_id).await;
            if let Err(err) = state.events.disconnect(&connection_id).await {
                tracing::error!(connection_id = %connection_id, error = %err, "Error removing connection");
            }
            Err(e)
        }
    }
}

/// Live sessions hosted by this process
///
/// Endpoint: GET /api/v1/ws/metrics
pub async fn ws_metrics(state: web::Data<AppState>) -> Result<HttpResponse> {
    let total_connections = state.hub.session_count().await;

    Ok(HttpResponse::Ok().json(json!({
        "instance_id": state.hub.instance_id(),
        "total_connections": total_connections
    })))
}

/// Connections registered for a request id
///
/// Endpoint: GET /api/v1/ws/requests/{request_id}
pub async fn request_connections(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let request_id = path.into_inner();
    let connections = state.registry.find_by_request_id(&request_id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "requestId": request_id,
        "count": connections.len(),
        "connections": connections
    })))
}

/// Register WebSocket routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_connect)).service(
        web::scope("/api/v1/ws")
            .route("/metrics", web::get().to(ws_metrics))
            .route("/requests/{request_id}", web::get().to(request_connections)),
    );
}
