use crate::hub::HubHandle;
use crate::model::Role;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{debug, info, warn};

/// Set by the authenticating proxy in front of this service
pub const ROLE_HEADER: &str = "x-user-role";

pub fn create_router(hub: HubHandle) -> Router {
    Router::new()
        .route("/api/v1/ws", get(ws_handler))
        .with_state(hub)
}

/// Only the proxy-set header can grant a role; without it the subscriber is `user`
fn resolve_role(headers: &HeaderMap) -> Result<Role, String> {
    match headers.get(ROLE_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| "role header is not valid ASCII".to_string())?
            .parse(),
        None => Ok(Role::User),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<HubHandle>,
    headers: HeaderMap,
) -> Response {
    let role = match resolve_role(&headers) {
        Ok(role) => role,
        Err(e) => {
            warn!("Rejected WebSocket subscription: {}", e);
            return (StatusCode::BAD_REQUEST, e).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, hub, role))
}

async fn handle_socket(mut socket: WebSocket, hub: HubHandle, role: Role) {
    let mut subscription = hub.subscribe(role);
    info!("WebSocket subscriber {} connected as {}", subscription.id, role);

    loop {
        tokio::select! {
            outbound = subscription.receiver.recv() => match outbound {
                Some(message) => {
                    if socket.send(WsMessage::Text(message.to_string())).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Queue closed by the hub: evicted as a slow consumer
                    warn!("WebSocket subscriber {} evicted", subscription.id);
                    break;
                }
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub.unregister(subscription.id);
    debug!("WebSocket subscriber {} disconnected", subscription.id);
}
