//! Core data types shared across the profiling pipeline.
//!
//! Alignment records are read directly through `rust_htslib`'s BAM/SAM
//! types rather than through a bespoke record type: `rust_htslib::bam::record::Cigar`
//! already models exactly the operation set this crate cares about
//! (Match/Ins/Del/RefSkip/SoftClip/HardClip/Equal/Diff), and reusing it keeps
//! C1-C3 working over the same representation the alignment file itself uses.

use std::sync::Arc;

use indexmap::IndexMap;
use rust_htslib::bam::record::Cigar;
use serde::Deserialize;

/// A single alignment record reduced to the fields the core consumes (section 3).
#[derive(Debug, Clone)]
pub struct RawAlignment {
    pub read_id: Arc<str>,
    pub reference_name: Arc<str>,
    pub aln_score: i64,
    pub cigar: Vec<Cigar>,
    pub is_primary: bool,
}

/// A row of `taxonomy.tsv`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaxonRecord {
    pub tax_id: u32,
    pub species: String,
    pub genus: String,
    pub family: String,
    pub order: String,
    pub class: String,
    pub phylum: String,
    pub clade: String,
    pub superkingdom: String,
}

impl TaxonRecord {
    /// Look up a rank column by name, used by the rank-collapse output stage.
    pub fn rank(&self, rank: &str) -> Option<&str> {
        match rank {
            "species" => Some(&self.species),
            "genus" => Some(&self.genus),
            "family" => Some(&self.family),
            "order" => Some(&self.order),
            "class" => Some(&self.class),
            "phylum" => Some(&self.phylum),
            "clade" => Some(&self.clade),
            "superkingdom" => Some(&self.superkingdom),
            _ => None,
        }
    }

    pub const RANKS: [&'static str; 8] = [
        "species",
        "genus",
        "family",
        "order",
        "class",
        "phylum",
        "clade",
        "superkingdom",
    ];
}

/// A row of `gene2len.tsv`, keyed externally by reference id (`"#id"` column).
#[derive(Debug, Clone, Deserialize)]
pub struct GeneLenRecord {
    #[serde(rename = "#id")]
    pub id: String,
    pub length: u32,
}

/// `target_id -> lineage` loaded from `taxonomy.tsv`.
pub type TaxonomyTable = IndexMap<u32, TaxonRecord>;

/// `reference_id -> (target_id, gene_tag, length_in_bp)` loaded from `gene2len.tsv`.
pub type GeneLengthTable = IndexMap<Arc<str>, (u32, Arc<str>, u32)>;

/// `reference_id -> genome label` loaded from `reference2genome.tsv`.
pub type RefToGenomeTable = IndexMap<Arc<str>, String>;

/// The relative-abundance estimate, `target_id -> probability`.
pub type Frequencies = IndexMap<u32, f64>;

/// The seven scorable CIGAR operation kinds used by C1/C2, in a fixed order
/// that indexes small per-op arrays and the 8x8 Markov transition matrix
/// (the eighth row/column is the terminal symbol appended by C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Match,
    Ins,
    Del,
    Equal,
    Diff,
    SoftClip,
    HardClip,
}

pub const OP_KINDS: [OpKind; 7] = [
    OpKind::Match,
    OpKind::Ins,
    OpKind::Del,
    OpKind::Equal,
    OpKind::Diff,
    OpKind::SoftClip,
    OpKind::HardClip,
];

/// Index of `op` within `OP_KINDS` / the Markov matrix; the eighth index (7)
/// is reserved for the terminal symbol.
pub const TERMINAL_INDEX: usize = 7;

impl OpKind {
    pub fn index(self) -> usize {
        match self {
            OpKind::Match => 0,
            OpKind::Ins => 1,
            OpKind::Del => 2,
            OpKind::Equal => 3,
            OpKind::Diff => 4,
            OpKind::SoftClip => 5,
            OpKind::HardClip => 6,
        }
    }

    pub fn from_cigar(c: &Cigar) -> Option<OpKind> {
        match c {
            Cigar::Match(_) => Some(OpKind::Match),
            Cigar::Ins(_) => Some(OpKind::Ins),
            Cigar::Del(_) => Some(OpKind::Del),
            Cigar::Equal(_) => Some(OpKind::Equal),
            Cigar::Diff(_) => Some(OpKind::Diff),
            Cigar::SoftClip(_) => Some(OpKind::SoftClip),
            Cigar::HardClip(_) => Some(OpKind::HardClip),
            Cigar::RefSkip(_) | Cigar::Pad(_) => None,
        }
    }
}

/// A `reference_name` (or `gene2len.tsv` row id) decoded into its target id
/// and gene tag, per the naming schema selected by `--gid-name` (section 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub target_id: u32,
    pub gene_tag: Arc<str>,
}

/// Decode a reference id under either naming schema:
/// - `gid_name = true`: `<target_id>_<gene_tag>`.
/// - `gid_name = false`: `<target_id>:<gene_tag>` or `<target_id>:.../<gene_tag>`.
pub fn parse_reference(reference_name: &str, gid_name: bool) -> Option<ParsedReference> {
    if gid_name {
        let (target_str, suffix) = reference_name.rsplit_once('_')?;
        let target_id = target_str.parse().ok()?;
        Some(ParsedReference {
            target_id,
            gene_tag: Arc::from(suffix),
        })
    } else {
        let (target_str, rest) = reference_name.split_once(':')?;
        let target_id = target_str.parse().ok()?;
        let gene_tag = rest.rsplit('/').next().unwrap_or(rest);
        Some(ParsedReference {
            target_id,
            gene_tag: Arc::from(gene_tag),
        })
    }
}

/// The scoring model selected for C2/C3 (`--aln-score`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreModel {
    /// Passthrough of the aligner-reported score (C1 is a no-op).
    As,
    /// Multinomial edit-type model (section 4.1).
    Edit,
    /// First-order Markov model over CIGAR operations (section 4.1).
    Markov,
}
