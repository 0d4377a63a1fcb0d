use crate::sources::alignments::ALIGNMENT_GRANULARITY;
use crate::sources::features::FEATURE_GRANULARITY;
use crate::sources::sequence::SEQUENCE_GRANULARITY;
use crate::sources::variants::VARIANT_GRANULARITY;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "pileup-server")]
#[command(about = "Random-access genome track server (2bit, BAM, VCF, bigBed)")]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "PILEUP_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PILEUP_PORT", default_value = "8080")]
    pub port: u16,

    /// Reference sequence (.2bit), as a path or URL
    #[arg(long, env = "PILEUP_REFERENCE")]
    pub reference: Option<String>,

    /// Alignments (.bam), as a path or URL
    #[arg(long, env = "PILEUP_BAM")]
    pub bam: Option<String>,

    /// BAM index; defaults to the BAM location with `.bai` appended
    #[arg(long, env = "PILEUP_BAI")]
    pub bai: Option<String>,

    /// Variants (.vcf), as a path or URL
    #[arg(long, env = "PILEUP_VCF")]
    pub vcf: Option<String>,

    /// Gene annotations (.bb), as a path or URL
    #[arg(long, env = "PILEUP_BIGBED")]
    pub bigbed: Option<String>,

    /// Enable CORS for all origins
    #[arg(long, env = "PILEUP_CORS", default_value = "true")]
    pub cors: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Alignments are fetched in multiples of this many bases
    #[arg(long, env = "PILEUP_ALIGNMENT_GRANULARITY", default_value_t = ALIGNMENT_GRANULARITY)]
    pub alignment_granularity: i64,

    /// Reference sequence is fetched in multiples of this many bases
    #[arg(long, env = "PILEUP_SEQUENCE_GRANULARITY", default_value_t = SEQUENCE_GRANULARITY)]
    pub sequence_granularity: i64,

    /// Variants are fetched in multiples of this many bases
    #[arg(long, env = "PILEUP_VARIANT_GRANULARITY", default_value_t = VARIANT_GRANULARITY)]
    pub variant_granularity: i64,

    /// Features are fetched in multiples of this many bases
    #[arg(long, env = "PILEUP_FEATURE_GRANULARITY", default_value_t = FEATURE_GRANULARITY)]
    pub feature_granularity: i64,
}

impl Config {
    pub fn effective_bai(&self) -> Option<String> {
        self.bai
            .clone()
            .or_else(|| self.bam.as_ref().map(|bam| format!("{}.bai", bam)))
    }
}
