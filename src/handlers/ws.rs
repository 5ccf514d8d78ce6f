//! Dashboard WebSocket endpoint

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
};
use serde::Deserialize;

use crate::hub::connection::{self, MAX_MESSAGE_SIZE};
use crate::hub::ConnectionScope;
use crate::AppState;

/// `GET /ws?fleet_id=3&user_type=fleet_manager`
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub fleet_id: Option<String>,
    pub user_type: Option<String>,
}

impl From<ConnectParams> for ConnectionScope {
    fn from(params: ConnectParams) -> Self {
        // Empty values mean unscoped
        let present = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            fleet_id: present(params.fleet_id),
            user_type: present(params.user_type),
        }
    }
}

pub async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Response {
    let scope = ConnectionScope::from(params);
    let hub = state.hub.clone();
    let connections = state.connections.clone();

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| connections.track_future(connection::serve(socket, hub, scope)))
}
