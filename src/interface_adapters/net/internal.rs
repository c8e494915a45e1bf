use crate::domain::Zone;
use crate::interface_adapters::http::ErrorResponse;
use crate::interface_adapters::net::client::spawn_lobby_serializer;
use crate::interface_adapters::state::AppState;
use crate::use_cases::LobbyError;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, serde::Deserialize)]
pub struct ZoneDto {
    id: u8,
    // Single ASCII team letter; absent for neutral zones.
    #[serde(default)]
    owner: Option<char>,
    #[serde(default)]
    frozen: bool,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
}

impl TryFrom<ZoneDto> for Zone {
    type Error = String;

    fn try_from(dto: ZoneDto) -> Result<Self, Self::Error> {
        let owner = match dto.owner {
            None => None,
            Some(c) if c.is_ascii_alphabetic() => Some(c as u8),
            Some(c) => return Err(format!("zone {} has invalid owner {c:?}", dto.id)),
        };
        if !dto.x.is_finite() || !dto.y.is_finite() {
            return Err(format!("zone {} has a non-finite position", dto.id));
        }
        Ok(Zone {
            id: dto.id,
            owner,
            frozen: dto.frozen,
            x: dto.x,
            y: dto.y,
        })
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct LobbyInitRequest {
    // Lobby id chosen by the caller.
    lobby_id: String,
    // Map layout; empty uses the default map.
    #[serde(default)]
    zones: Vec<ZoneDto>,
}

#[derive(Debug, serde::Serialize)]
struct LobbyInitResponse {
    // The lobby id that was created.
    lobby_id: String,
}

fn bad_request(error: String) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
}

pub async fn create_lobby_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LobbyInitRequest>,
) -> impl IntoResponse {
    // Ensure we have a lobby id to create.
    let lobby_id = payload.lobby_id.trim().to_string();
    if lobby_id.is_empty() {
        return bad_request("lobby_id is required".to_string());
    }

    let zones = match payload
        .zones
        .into_iter()
        .map(Zone::try_from)
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(zones) => zones,
        Err(error) => return bad_request(error),
    };
    let mut seen = HashSet::new();
    if let Some(dup) = zones.iter().find(|z| !seen.insert(z.id)) {
        return bad_request(format!("duplicate zone id {}", dup.id));
    }

    match state
        .lobby_registry
        .create_lobby(lobby_id.clone(), zones)
        .await
    {
        Ok(lobby) => {
            // Create the serializer so clients can subscribe immediately.
            spawn_lobby_serializer(&lobby, state.codec.clone());
            (StatusCode::CREATED, Json(LobbyInitResponse { lobby_id })).into_response()
        }
        Err(LobbyError::AlreadyExists) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "lobby already exists".to_string(),
            }),
        )
            .into_response(),
        Err(err @ LobbyError::NoTeams) => bad_request(err.to_string()),
    }
}
