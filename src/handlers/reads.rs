use super::AppState;
use crate::Result;
use crate::types::{Alignment, RangeQuery, ReadsResponse};
use axum::{
    Json,
    extract::{Query, State},
};
use tracing::debug;

pub async fn get_reads(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<ReadsResponse>> {
    let source = state.alignments()?;
    let range = query.to_range()?;
    let reads = source.fetch_alignments(&range).await?;
    debug!(range = %range, reads = reads.len(), "serving alignments");

    let alignments = reads
        .iter()
        .map(|read| Alignment::from_read(read))
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(ReadsResponse { range, alignments }))
}
