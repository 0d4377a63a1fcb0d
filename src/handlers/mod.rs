mod features;
mod reads;
mod sequences;
mod service_info;
mod variants;

pub use features::get_features;
pub use reads::get_reads;
pub use sequences::{get_contigs, get_sequence};
pub use service_info::service_info;
pub use variants::get_variants;

use crate::config::Config;
use crate::formats::{BaiFile, BamFile, BigBed, TwoBit, VcfFile};
use crate::sources::{
    AlignmentDataSource, FeatureDataSource, TwoBitDataSource, VariantDataSource,
};
use crate::storage::{self, RangeFile};
use crate::types::Tracks;
use crate::{Error, Result};
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state
#[derive(Clone, Default)]
pub struct AppState {
    pub reference: Option<Arc<TwoBitDataSource>>,
    pub alignments: Option<Arc<AlignmentDataSource>>,
    pub variants: Option<Arc<VariantDataSource>>,
    pub features: Option<Arc<FeatureDataSource>>,
    pub tracks: Tracks,
}

fn open_file(location: &str) -> Result<Arc<RangeFile>> {
    Ok(Arc::new(RangeFile::new(storage::open(location)?)))
}

impl AppState {
    /// Open every track named in `config`. Nothing is fetched yet.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut state = AppState::default();
        if let Some(location) = &config.reference {
            state = state.with_reference(
                TwoBitDataSource::new(TwoBit::new(open_file(location)?))
                    .with_granularity(config.sequence_granularity),
                location,
            );
        }
        if let (Some(location), Some(index)) = (&config.bam, config.effective_bai()) {
            let bam = BamFile::new(open_file(location)?, Some(BaiFile::new(open_file(&index)?)));
            state = state.with_alignments(
                AlignmentDataSource::new(bam).with_granularity(config.alignment_granularity),
                location,
            );
        }
        if let Some(location) = &config.vcf {
            state = state.with_variants(
                VariantDataSource::new(VcfFile::new(open_file(location)?))
                    .with_granularity(config.variant_granularity),
                location,
            );
        }
        if let Some(location) = &config.bigbed {
            state = state.with_features(
                FeatureDataSource::new(BigBed::new(open_file(location)?))
                    .with_granularity(config.feature_granularity),
                location,
            );
        }
        Ok(state)
    }

    pub fn with_reference(mut self, source: TwoBitDataSource, location: &str) -> Self {
        self.reference = Some(Arc::new(source));
        self.tracks.reference = Some(location.to_string());
        self
    }

    pub fn with_alignments(mut self, source: AlignmentDataSource, location: &str) -> Self {
        self.alignments = Some(Arc::new(source));
        self.tracks.alignments = Some(location.to_string());
        self
    }

    pub fn with_variants(mut self, source: VariantDataSource, location: &str) -> Self {
        self.variants = Some(Arc::new(source));
        self.tracks.variants = Some(location.to_string());
        self
    }

    pub fn with_features(mut self, source: FeatureDataSource, location: &str) -> Self {
        self.features = Some(Arc::new(source));
        self.tracks.features = Some(location.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_none()
            && self.alignments.is_none()
            && self.variants.is_none()
            && self.features.is_none()
    }

    fn reference(&self) -> Result<&TwoBitDataSource> {
        self.reference
            .as_deref()
            .ok_or_else(|| Error::NotFound("no reference sequence is configured".to_string()))
    }

    fn alignments(&self) -> Result<&AlignmentDataSource> {
        self.alignments
            .as_deref()
            .ok_or_else(|| Error::NotFound("no alignment track is configured".to_string()))
    }

    fn variants(&self) -> Result<&VariantDataSource> {
        self.variants
            .as_deref()
            .ok_or_else(|| Error::NotFound("no variant track is configured".to_string()))
    }

    fn features(&self) -> Result<&FeatureDataSource> {
        self.features
            .as_deref()
            .ok_or_else(|| Error::NotFound("no feature track is configured".to_string()))
    }
}

pub fn create_router(state: AppState, cors: bool) -> Router {
    let app = Router::new()
        .route("/", get(service_info))
        .route("/service-info", get(service_info))
        .route("/contigs", get(get_contigs))
        .route("/sequence", get(get_sequence))
        .route("/reads", get(get_reads))
        .route("/variants", get(get_variants))
        .route("/features", get(get_features))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
