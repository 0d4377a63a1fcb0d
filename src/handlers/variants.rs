use super::AppState;
use crate::Result;
use crate::types::{RangeQuery, VariantsResponse};
use axum::{
    Json,
    extract::{Query, State},
};

pub async fn get_variants(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<VariantsResponse>> {
    let range = query.to_range()?;
    let variants = state
        .variants()?
        .fetch_variants(&range)
        .await?
        .iter()
        .map(|v| v.as_ref().clone())
        .collect();
    Ok(Json(VariantsResponse { range, variants }))
}
