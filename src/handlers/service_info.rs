use super::AppState;
use crate::types::ServiceInfo;
use axum::{Json, extract::State};

pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        id: "org.example.pileup".to_string(),
        name: "pileup".to_string(),
        description: Some("Random-access genome track server".to_string()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tracks: state.tracks.clone(),
    })
}
