use super::AppState;
use crate::Result;
use crate::types::{FeaturesResponse, RangeQuery};
use axum::{
    Json,
    extract::{Query, State},
};
use tracing::debug;

pub async fn get_features(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<FeaturesResponse>> {
    let range = query.to_range()?;
    let genes = state.features()?.fetch_features(&range).await?;
    debug!(range = %range, features = genes.len(), "serving features");

    let features = genes.iter().map(|g| g.as_ref().clone()).collect();
    Ok(Json(FeaturesResponse { range, features }))
}
