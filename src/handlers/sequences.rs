use super::AppState;
use crate::Result;
use crate::types::{ContigsResponse, RangeQuery, SequenceResponse};
use axum::{
    Json,
    extract::{Query, State},
};

pub async fn get_contigs(State(state): State<AppState>) -> Result<Json<ContigsResponse>> {
    let contigs = state.reference()?.contig_list().await?;
    Ok(Json(ContigsResponse { contigs }))
}

pub async fn get_sequence(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<SequenceResponse>> {
    let source = state.reference()?;
    let range = source.normalize_range(&query.to_range()?).await?;
    let sequence = source.fetch_range_as_string(&range).await?;
    Ok(Json(SequenceResponse { range, sequence }))
}
