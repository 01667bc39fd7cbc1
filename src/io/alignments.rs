//! Alignment record ingestion. Reads a SAM/BAM/CRAM file (htslib detects the
//! format from content, not extension) through `rust_htslib` directly into
//! [`RawAlignment`] rather than through a bespoke parser.

use std::path::Path;
use std::sync::Arc;

use log::debug;
use rust_htslib::bam::record::Aux;
use rust_htslib::bam::{self, Read as BamRead};

use crate::error::ProfilerError;
use crate::types::RawAlignment;

fn aux_as_i64(aux: Aux<'_>) -> Option<i64> {
    match aux {
        Aux::I8(v) => Some(v as i64),
        Aux::U8(v) => Some(v as i64),
        Aux::I16(v) => Some(v as i64),
        Aux::U16(v) => Some(v as i64),
        Aux::I32(v) => Some(v as i64),
        Aux::U32(v) => Some(v as i64),
        Aux::Float(v) => Some(v as i64),
        _ => None,
    }
}

/// Read every alignment record from `path` into [`RawAlignment`]s. Unmapped
/// records are skipped outright; secondary/supplementary records are kept
/// (with `is_primary = false`) since C3 needs to see them to reject them
/// explicitly rather than silently losing multi-mapping evidence.
pub fn read_alignments(path: &Path) -> Result<Vec<RawAlignment>, ProfilerError> {
    if !path.exists() {
        return Err(ProfilerError::MissingInputFile { path: path.to_path_buf() });
    }

    let mut reader = bam::Reader::from_path(path).map_err(|e| ProfilerError::SchemaMismatch {
        table: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let header = reader.header().clone();

    let mut alignments = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: e.to_string(),
        })?;
        if record.is_unmapped() || record.tid() < 0 {
            continue;
        }

        let reference_name = std::str::from_utf8(header.tid2name(record.tid() as u32))
            .map_err(|e| ProfilerError::SchemaMismatch {
                table: path.display().to_string(),
                detail: e.to_string(),
            })?;
        let read_id = std::str::from_utf8(record.qname()).map_err(|e| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: e.to_string(),
        })?;

        let aln_score = match record.aux(b"AS") {
            Ok(aux) => aux_as_i64(aux).unwrap_or(1),
            Err(_) => {
                debug!("record {read_id} has no AS tag, defaulting aln_score to 1");
                1
            }
        };

        alignments.push(RawAlignment {
            read_id: Arc::from(read_id),
            reference_name: Arc::from(reference_name),
            aln_score,
            cigar: record.cigar().to_vec(),
            is_primary: !record.is_secondary() && !record.is_supplementary(),
        });
    }

    Ok(alignments)
}
