//! C3: likelihood table builder.
//!
//! Streams alignment records into the P(r|t) table: per-alignment scoring,
//! per-read length normalization, length-ratio reweighting against the
//! gene-length table, quality filtering, and deduplication to at most one row
//! per `(read_id, target_id)`.
//!
//! The table is kept as a `Vec` of row structs sorted by `read_id` (the
//! `StrainAbundanceCalculator`-style "plain struct, plain `Vec`" shape this
//! crate's code otherwise follows) rather than as separate per-field arrays;
//! what C4 actually needs — contiguous ranges of rows sharing a `read_id` —
//! is produced once by [`PrtTable::read_groups`] and reused across EM
//! iterations, which is the part of "columnar with an offset index" that
//! matters for the parallel reduction.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use log::debug;
use serde::Serialize;

use crate::cigar::{score_cigar, StratifiedModel};
use crate::config::Config;
use crate::error::ProfilerError;
use crate::types::{parse_reference, GeneLengthTable, OpKind, RawAlignment, ScoreModel};

/// One row of the likelihood table after filtering and deduplication: the
/// schema written to `P_rgs_df.tsv`.
#[derive(Debug, Clone, Serialize)]
pub struct PrtRow {
    pub read_id: Arc<str>,
    pub target_id: u32,
    pub gene_tag: Arc<str>,
    pub reference_id: Arc<str>,
    pub aln_len: u32,
    pub log_p: f64,
}

/// A row carrying the gene-length join and derived columns used for
/// filtering and for the `gene_P_rgs_df_raw.tsv` diagnostic output.
#[derive(Debug, Clone, Serialize)]
pub struct GeneJoinedRow {
    pub read_id: Arc<str>,
    pub target_id: u32,
    pub gene_tag: Arc<str>,
    pub reference_id: Arc<str>,
    pub aln_len: u32,
    pub log_p: f64,
    pub gene_length: u32,
    pub aln_len_ratio: f64,
    pub fidelity: f64,
}

impl GeneJoinedRow {
    fn into_prt_row(self) -> PrtRow {
        PrtRow {
            read_id: self.read_id,
            target_id: self.target_id,
            gene_tag: self.gene_tag,
            reference_id: self.reference_id,
            aln_len: self.aln_len,
            log_p: self.log_p,
        }
    }
}

/// The P(r|t) table, sorted by `read_id` so that same-read rows are
/// contiguous for C4.
#[derive(Debug, Clone, Default)]
pub struct PrtTable {
    pub rows: Vec<PrtRow>,
}

impl PrtTable {
    pub fn from_rows(mut rows: Vec<PrtRow>) -> Self {
        rows.sort_by(|a, b| a.read_id.cmp(&b.read_id));
        PrtTable { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn log_p_column(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.log_p).collect()
    }

    /// Contiguous `[start, end)` ranges of rows sharing a `read_id`. Requires
    /// `self.rows` to already be sorted by `read_id` (true on construction
    /// and preserved by [`PrtTable::retain_targets`]).
    pub fn read_groups(&self) -> Vec<(usize, usize)> {
        self.rows
            .iter()
            .enumerate()
            .group_by(|(_, row)| row.read_id.clone())
            .into_iter()
            .map(|(_, group)| {
                let idxs: Vec<usize> = group.map(|(i, _)| i).collect();
                (idxs[0], idxs[idxs.len() - 1] + 1)
            })
            .collect()
    }

    pub fn n_reads(&self) -> usize {
        self.read_groups().len()
    }

    /// Row indices grouped by `target_id`, built once and reused across EM
    /// iterations (the row set does not change once EM starts).
    pub fn target_groups(&self) -> HashMap<u32, Vec<usize>> {
        let mut groups: HashMap<u32, Vec<usize>> = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            groups.entry(row.target_id).or_default().push(i);
        }
        groups
    }

    /// Drop every row whose target is not in `keep`, preserving read-id
    /// sort order. Used by the width filter (C6).
    pub fn retain_targets(&mut self, keep: &HashMap<u32, bool>) {
        self.rows.retain(|r| *keep.get(&r.target_id).unwrap_or(&false));
    }
}

fn alignment_length(cigar: &[rust_htslib::bam::record::Cigar]) -> u32 {
    cigar
        .iter()
        .filter_map(|c| OpKind::from_cigar(c).map(|op| (op, c.len())))
        .filter(|(op, _)| matches!(op, OpKind::Ins | OpKind::Equal | OpKind::Diff))
        .map(|(_, len)| len)
        .sum()
}

/// Per-alignment scoring, before any cross-read normalization (section 4.3).
/// Returns the raw rows in alignment-stream order (this is the table written
/// to `P_rgs_df_raw.tsv`).
pub fn score_alignments(
    alignments: &[RawAlignment],
    config: &Config,
    model: &StratifiedModel,
) -> Vec<PrtRow> {
    let mut rows = Vec::with_capacity(alignments.len());
    for aln in alignments {
        if !aln.is_primary || aln.aln_score <= 0 {
            continue;
        }
        let Some(parsed) = parse_reference(&aln.reference_name, config.gid_name) else {
            debug!("skipping alignment with unparseable reference_name: {}", aln.reference_name);
            continue;
        };
        let aln_len = alignment_length(&aln.cigar);
        if aln_len == 0 {
            continue;
        }

        let log_p = match config.score_model {
            ScoreModel::As => (aln.aln_score as f64 / (2.0 * aln_len as f64)).ln(),
            ScoreModel::Edit | ScoreModel::Markov => {
                score_cigar(&aln.cigar, model.model_for(&parsed.gene_tag))
            }
        };

        rows.push(PrtRow {
            read_id: aln.read_id.clone(),
            target_id: parsed.target_id,
            gene_tag: parsed.gene_tag,
            reference_id: aln.reference_name.clone(),
            aln_len,
            log_p,
        });
    }
    rows
}

/// Rescale `log_p` by `max_aln_len[read] / aln_len` so that alignments of
/// differently-covered portions of the same read are put on a comparable
/// footing (section 4.3, "Length normalization").
pub fn length_normalize(rows: &mut [PrtRow]) {
    let mut max_aln_len: HashMap<Arc<str>, u32> = HashMap::new();
    for row in rows.iter() {
        let entry = max_aln_len.entry(row.read_id.clone()).or_insert(0);
        *entry = (*entry).max(row.aln_len);
    }
    for row in rows.iter_mut() {
        let max_len = max_aln_len[&row.read_id];
        row.log_p *= max_len as f64 / row.aln_len as f64;
    }
}

/// Join with the gene-length table and apply the length-ratio reweighting
/// term (section 4.3). Rows whose `reference_id` is absent from the
/// gene-length table are dropped (there is nothing to normalize against).
pub fn join_gene_lengths(
    rows: Vec<PrtRow>,
    gene_lengths: &GeneLengthTable,
    ref_weight: f64,
) -> Vec<GeneJoinedRow> {
    rows.into_iter()
        .filter_map(|row| {
            let (_, _, gene_length) = gene_lengths.get(row.reference_id.as_ref())?;
            let gene_length = *gene_length;
            let aln_len_ratio = row.aln_len as f64 / gene_length as f64;
            let fidelity = row.log_p / row.aln_len as f64;
            let mut log_p = row.log_p;
            if ref_weight != 0.0 {
                log_p += ref_weight * aln_len_ratio.ln();
            }
            Some(GeneJoinedRow {
                read_id: row.read_id,
                target_id: row.target_id,
                gene_tag: row.gene_tag,
                reference_id: row.reference_id,
                aln_len: row.aln_len,
                log_p,
                gene_length,
                aln_len_ratio,
                fidelity,
            })
        })
        .collect()
}

/// Apply the quality filters of section 4.3.
pub fn filter_rows(rows: Vec<GeneJoinedRow>, config: &Config) -> Vec<GeneJoinedRow> {
    let mut max_log_p: HashMap<Arc<str>, f64> = HashMap::new();
    for row in rows.iter() {
        let entry = max_log_p.entry(row.read_id.clone()).or_insert(f64::NEG_INFINITY);
        if row.log_p > *entry {
            *entry = row.log_p;
        }
    }

    rows.into_iter()
        .filter(|row| {
            if row.aln_len_ratio < config.min_aln_len_ratio {
                return false;
            }
            match config.score_model {
                ScoreModel::As => {
                    let max_for_read = max_log_p[&row.read_id];
                    if row.log_p < 1.1 * max_for_read {
                        return false;
                    }
                    if row.log_p < config.min_fidelity.ln() {
                        return false;
                    }
                    true
                }
                ScoreModel::Edit | ScoreModel::Markov => row.fidelity >= config.min_fidelity,
            }
        })
        .collect()
}

/// Reduce to at most one row per `(read_id, target_id)`, keeping the maximum
/// `log_p` (section 4.3, "Deduplication"), then sort by `read_id` for C4.
pub fn dedup(rows: Vec<GeneJoinedRow>) -> PrtTable {
    let mut best: HashMap<(Arc<str>, u32), GeneJoinedRow> = HashMap::new();
    for row in rows {
        let key = (row.read_id.clone(), row.target_id);
        match best.get(&key) {
            Some(existing) if existing.log_p >= row.log_p => {}
            _ => {
                best.insert(key, row);
            }
        }
    }
    let rows: Vec<PrtRow> = best.into_values().map(GeneJoinedRow::into_prt_row).collect();
    PrtTable::from_rows(rows)
}

/// Run the full C3 pipeline. Returns `(raw_rows, gene_joined_raw_rows, final_table)`
/// corresponding to `P_rgs_df_raw.tsv`, `gene_P_rgs_df_raw.tsv`, and `P_rgs_df.tsv`.
pub fn build_likelihood_table(
    alignments: &[RawAlignment],
    config: &Config,
    model: &StratifiedModel,
    gene_lengths: &GeneLengthTable,
) -> Result<(Vec<PrtRow>, Vec<GeneJoinedRow>, PrtTable), ProfilerError> {
    let mut raw_rows = score_alignments(alignments, config, model);
    length_normalize(&mut raw_rows);

    let gene_joined = join_gene_lengths(raw_rows.clone(), gene_lengths, config.ref_weight);
    let filtered = filter_rows(gene_joined.clone(), config);

    if filtered.is_empty() {
        return Err(ProfilerError::NoAlignments);
    }

    let table = dedup(filtered);
    Ok((raw_rows, gene_joined, table))
}
