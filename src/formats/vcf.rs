//! Minimal VCF reader.
//!
//! Only CHROM, POS, ID, REF, ALT and the `AF` INFO key are parsed; the raw
//! line is kept for anything else. The whole file is read once, sorted by
//! locus, and then searched in memory. Positions are converted to 0-based on
//! parse, like every other coordinate in the crate.

use crate::contig_interval::{ContigInterval, alt_contig_name};
use crate::storage::RangeFile;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    pub contig: String,
    /// 0-based; one less than POS in the file
    pub position: i64,
    pub id: String,
    pub reference: String,
    pub alternate: String,
    /// Largest and smallest `AF` value, when present
    pub major_frequency: Option<f64>,
    pub minor_frequency: Option<f64>,
    pub line: String,
}

impl Variant {
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 5 {
            let columns = fields.len();
            return Err(Error::Format(format!("VCF line has {} columns: {}", columns, line)));
        }
        let pos: i64 = fields[1]
            .parse()
            .map_err(|_| Error::Format(format!("bad VCF position {:?}", fields[1])))?;

        let frequencies: Vec<f64> = fields
            .get(7)
            .into_iter()
            .flat_map(|info| info.split(';'))
            .filter_map(|kv| kv.strip_prefix("AF="))
            .flat_map(|af| af.split(','))
            .filter_map(|f| f.parse().ok())
            .collect();

        Ok(Self {
            contig: fields[0].to_string(),
            position: pos - 1,
            id: fields[2].to_string(),
            reference: fields[3].to_string(),
            alternate: fields[4].to_string(),
            major_frequency: frequencies.iter().copied().reduce(f64::max),
            minor_frequency: frequencies.iter().copied().reduce(f64::min),
            line: line.to_string(),
        })
    }

    pub fn key(&self) -> (String, i64) {
        (self.contig.clone(), self.position)
    }
}

#[derive(Debug, Default)]
struct ParsedVcf {
    samples: Vec<String>,
    /// Sorted by (contig, position)
    variants: Vec<Variant>,
    /// Every accepted spelling of a contig to the one used in the file
    contigs: HashMap<String, String>,
}

fn parse_vcf(text: &str) -> Result<ParsedVcf> {
    let mut samples = Vec::new();
    let mut variants = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        if let Some(columns) = line.strip_prefix("#CHROM") {
            samples = columns.split('\t').skip(9).map(str::to_string).collect();
        } else if !line.starts_with('#') {
            variants.push(Variant::parse(line)?);
        }
    }
    variants.sort_by(|a, b| a.contig.cmp(&b.contig).then(a.position.cmp(&b.position)));

    let mut contigs = HashMap::new();
    for v in &variants {
        contigs.entry(alt_contig_name(&v.contig)).or_insert_with(|| v.contig.clone());
    }
    for v in &variants {
        contigs.insert(v.contig.clone(), v.contig.clone());
    }
    Ok(ParsedVcf {
        samples,
        variants,
        contigs,
    })
}

pub struct VcfFile {
    file: Arc<RangeFile>,
    parsed: OnceCell<ParsedVcf>,
}

impl VcfFile {
    pub fn new(file: Arc<RangeFile>) -> Self {
        Self {
            file,
            parsed: OnceCell::new(),
        }
    }

    async fn parsed(&self) -> Result<&ParsedVcf> {
        self.parsed
            .get_or_try_init(|| async {
                let bytes = self.file.get_all().await?;
                let parsed = parse_vcf(&String::from_utf8_lossy(&bytes))?;
                info!(
                    location = self.file.location(),
                    variants = parsed.variants.len(),
                    "loaded VCF"
                );
                Ok::<_, Error>(parsed)
            })
            .await
    }

    pub async fn sample_names(&self) -> Result<Vec<String>> {
        Ok(self.parsed().await?.samples.clone())
    }

    /// The contig name used in the file for `name`, if any variant is on it.
    pub async fn canonical_contig(&self, name: &str) -> Result<Option<String>> {
        Ok(self.parsed().await?.contigs.get(name).cloned())
    }

    pub async fn get_all(&self) -> Result<Vec<Variant>> {
        Ok(self.parsed().await?.variants.clone())
    }

    /// Variants whose position lies in `range`. An unknown contig yields
    /// nothing rather than an error.
    pub async fn get_features_in_range(
        &self,
        range: &ContigInterval<String>,
    ) -> Result<Vec<Variant>> {
        let parsed = self.parsed().await?;
        let Some(contig) = parsed.contigs.get(&range.contig) else {
            return Ok(Vec::new());
        };
        let variants = &parsed.variants;
        let start = (contig.as_str(), range.start());
        let first = variants.partition_point(|v| (v.contig.as_str(), v.position) < start);
        Ok(variants[first..]
            .iter()
            .take_while(|v| v.contig == *contig && v.position <= range.stop())
            .cloned()
            .collect())
    }
}
