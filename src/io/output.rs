//! Writers for every table on the "Outputs on disk" list (section 3):
//! the three likelihood-table stages, the final and rank-collapsed
//! abundance tables, and the optional per-iteration EM snapshots.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::error::ProfilerError;
use crate::likelihood::{GeneJoinedRow, PrtRow, PrtTable};
use crate::types::{Frequencies, TaxonomyTable};

fn write_tsv<T: Serialize>(rows: impl IntoIterator<Item = T>, path: &Path) -> Result<(), ProfilerError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(|e| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: e.to_string(),
        })?;
    for row in rows {
        writer.serialize(row).map_err(|e| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: e.to_string(),
        })?;
    }
    writer.flush().map_err(|e| ProfilerError::SchemaMismatch {
        table: path.display().to_string(),
        detail: e.to_string(),
    })?;
    Ok(())
}

pub fn write_prt_raw(rows: &[PrtRow], path: &Path) -> Result<(), ProfilerError> {
    write_tsv(rows.iter().cloned(), path)
}

pub fn write_gene_joined(rows: &[GeneJoinedRow], path: &Path) -> Result<(), ProfilerError> {
    write_tsv(rows.iter().cloned(), path)
}

pub fn write_prt_table(table: &PrtTable, path: &Path) -> Result<(), ProfilerError> {
    write_tsv(table.rows.iter().cloned(), path)
}

/// One row of `relative_abundance.tsv`: `F` joined with the full taxonomy row.
#[derive(Debug, Serialize)]
struct AbundanceRow<'a> {
    target_id: u32,
    frequency: f64,
    species: &'a str,
    genus: &'a str,
    family: &'a str,
    order: &'a str,
    class: &'a str,
    phylum: &'a str,
    clade: &'a str,
    superkingdom: &'a str,
}

/// Build and write `relative_abundance.tsv` (or a `relative_abundance-EM-<i>.tsv`
/// snapshot, at the same schema) in descending-frequency, then-`target_id` order
/// so repeat runs produce byte-identical output (section 8, determinism property).
pub fn write_abundance(freq: &Frequencies, taxonomy: &TaxonomyTable, path: &Path) -> Result<(), ProfilerError> {
    let mut targets: Vec<u32> = freq.keys().copied().collect();
    targets.sort_by_key(|&t| (Reverse(OrderedFloat(freq[&t])), t));

    let rows = targets.into_iter().map(|target_id| {
        let taxon = taxonomy.get(&target_id);
        AbundanceRow {
            target_id,
            frequency: freq[&target_id],
            species: taxon.map(|t| t.species.as_str()).unwrap_or(""),
            genus: taxon.map(|t| t.genus.as_str()).unwrap_or(""),
            family: taxon.map(|t| t.family.as_str()).unwrap_or(""),
            order: taxon.map(|t| t.order.as_str()).unwrap_or(""),
            class: taxon.map(|t| t.class.as_str()).unwrap_or(""),
            phylum: taxon.map(|t| t.phylum.as_str()).unwrap_or(""),
            clade: taxon.map(|t| t.clade.as_str()).unwrap_or(""),
            superkingdom: taxon.map(|t| t.superkingdom.as_str()).unwrap_or(""),
        }
    });
    write_tsv(rows, path)
}

pub fn em_snapshot_path(output_dir: &Path, iteration: usize) -> PathBuf {
    output_dir.join(format!("relative_abundance-EM-{iteration}.tsv"))
}

#[derive(Debug, Serialize)]
struct RankRow<'a> {
    #[serde(rename = "rank_value")]
    value: &'a str,
    frequency: f64,
}

/// Group `F` by the requested rank column and sum, producing
/// `relative_abundance-<rank>.tsv` (section 4.9).
pub fn write_rank_collapsed(
    freq: &Frequencies,
    taxonomy: &TaxonomyTable,
    rank: &str,
    path: &Path,
) -> Result<(), ProfilerError> {
    let mut by_rank: HashMap<&str, f64> = HashMap::new();
    for (target_id, f) in freq {
        let value = taxonomy
            .get(target_id)
            .and_then(|t| t.rank(rank))
            .unwrap_or("unknown");
        *by_rank.entry(value).or_insert(0.0) += f;
    }

    let mut entries: Vec<(&str, f64)> = by_rank.into_iter().collect();
    entries.sort_by_key(|&(value, f)| (Reverse(OrderedFloat(f)), value));

    write_tsv(entries.into_iter().map(|(value, frequency)| RankRow { value, frequency }), path)
}
