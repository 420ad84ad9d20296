//! WebSocket connection acceptor
//!
//! Upgrades `/chat?room=..&user=..&name=..` to a WebSocket and hands it to
//! the gateway. Everything else is refused during the handshake.

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, ConnectError};
use crate::gateway::Gateway;
use crate::session::ConnectParams;
use crate::types::RoomId;

/// WebSocket endpoint path
pub const CHAT_PATH: &str = "/chat";

/// Display name used when the client does not send one
const DEFAULT_DISPLAY_NAME: &str = "unknown";

/// Handle a new TCP connection
///
/// Once the upgrade succeeds the session owns the connection; this function
/// returns as soon as the session's pumps are running.
pub async fn handle_connection(stream: TcpStream, gateway: Gateway) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake, capturing routing parameters from the request
    let mut params = None;
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let path = req.uri().path();
        if path != CHAT_PATH {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                &ConnectError::NotFound(path.to_string()),
            ));
        }

        match parse_connect_params(req.uri().query()) {
            Ok(parsed) => {
                params = Some(parsed);
                Ok(response)
            }
            Err(e) => Err(error_response(StatusCode::BAD_REQUEST, &e)),
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(WsError::Http(response)) => {
            warn!(
                "Rejected handshake from {} with {}",
                peer_addr,
                response.status()
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let Some(params) = params else {
        return Ok(());
    };

    let session = gateway.attach(ws_stream, params).await?;
    info!("Session {} connected from {}", session.id(), peer_addr);

    Ok(())
}

/// Extract room, user and display name from the request query
pub fn parse_connect_params(query: Option<&str>) -> Result<ConnectParams, ConnectError> {
    let mut room = None;
    let mut user = None;
    let mut name = None;

    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "room" => room = Some(value.into_owned()),
            "user" => user = Some(value.into_owned()),
            "name" => name = Some(value.into_owned()),
            _ => {}
        }
    }

    let room_id = room
        .filter(|room| !room.is_empty())
        .map(RoomId::new)
        .ok_or(ConnectError::MissingRoom)?;

    let user_id = match user.filter(|user| !user.is_empty()) {
        Some(user) => Some(
            Uuid::parse_str(&user).map_err(|_| ConnectError::InvalidUserId(user.clone()))?,
        ),
        None => None,
    };

    let display_name = match name.filter(|name| !name.is_empty()) {
        Some(name) => name,
        None => {
            warn!("No display name for connection to room {}", room_id);
            DEFAULT_DISPLAY_NAME.to_string()
        }
    };

    Ok(ConnectParams {
        room_id,
        user_id,
        display_name,
    })
}

fn error_response(status: StatusCode, err: &ConnectError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(err.to_string()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_query() {
        let user = Uuid::new_v4();
        let query = format!("room=lobby&user={}&name=Alice%20B", user);
        let params = parse_connect_params(Some(&query)).unwrap();

        assert_eq!(params.room_id, RoomId::from("lobby"));
        assert_eq!(params.user_id, Some(user));
        assert_eq!(params.display_name, "Alice B");
    }

    #[test]
    fn test_missing_name_defaults() {
        let params = parse_connect_params(Some("room=lobby")).unwrap();
        assert_eq!(params.display_name, DEFAULT_DISPLAY_NAME);
        assert!(params.user_id.is_none());
    }

    #[test]
    fn test_missing_room_rejected() {
        assert_eq!(
            parse_connect_params(Some("name=Alice")),
            Err(ConnectError::MissingRoom)
        );
        assert_eq!(parse_connect_params(None), Err(ConnectError::MissingRoom));
        assert_eq!(
            parse_connect_params(Some("room=&name=Alice")),
            Err(ConnectError::MissingRoom)
        );
    }

    #[test]
    fn test_invalid_user_rejected() {
        assert_eq!(
            parse_connect_params(Some("room=lobby&user=not-a-uuid")),
            Err(ConnectError::InvalidUserId("not-a-uuid".to_string()))
        );
    }
}
