//! Random-access decoding of genomic file formats over byte-range storage.
//!
//! The crate is layered leaf to root:
//!
//! - [`interval`], [`contig_interval`], [`virtual_offset`] - coordinate types
//! - [`storage`] - byte sources and the caching [`storage::RangeFile`]
//! - [`formats`] - BGZF, BAM/BAI, 2bit, VCF and bigBed decoding
//! - [`sources`] - range-cache data sources built on the codecs
//! - [`handlers`] - a JSON-over-HTTP service around the data sources

pub mod config;
pub mod contig_interval;
pub mod error;
pub mod formats;
pub mod handlers;
pub mod interval;
pub mod sources;
pub mod storage;
pub mod types;
pub mod virtual_offset;

pub use config::Config;
pub use contig_interval::ContigInterval;
pub use error::{Error, Result};
pub use interval::Interval;
pub use virtual_offset::VirtualOffset;
