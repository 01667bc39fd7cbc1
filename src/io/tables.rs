//! Ambient table I/O (section 4.7): flat delimiter-separated reference
//! tables are parsed with `csv` + `serde` rather than hand-rolled string
//! splitting.

use std::path::Path;
use std::sync::Arc;

use crate::error::ProfilerError;
use crate::types::{parse_reference, GeneLenRecord, GeneLengthTable, RefToGenomeTable, TaxonRecord, TaxonomyTable};

fn missing(path: &Path) -> ProfilerError {
    ProfilerError::MissingInputFile { path: path.to_path_buf() }
}

fn open_tsv(path: &Path) -> Result<csv::Reader<std::fs::File>, ProfilerError> {
    if !path.exists() {
        return Err(missing(path));
    }
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(|e| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: e.to_string(),
        })
}

/// Load `taxonomy.tsv`, keyed by `tax_id`.
pub fn load_taxonomy(path: &Path) -> Result<TaxonomyTable, ProfilerError> {
    let mut reader = open_tsv(path)?;
    let mut table = TaxonomyTable::new();
    for record in reader.deserialize::<TaxonRecord>() {
        let record = record.map_err(|e| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: e.to_string(),
        })?;
        table.insert(record.tax_id, record);
    }
    Ok(table)
}

/// Load `gene2len.tsv`, joining each row's id against [`parse_reference`] to
/// recover `(target_id, gene_tag)` (section 4.7: header-driven `#id`/`length`
/// columns, the leading `#` stripped by `csv`'s header parsing).
pub fn load_gene_lengths(path: &Path, gid_name: bool) -> Result<GeneLengthTable, ProfilerError> {
    let mut reader = open_tsv(path)?;
    let mut table = GeneLengthTable::new();
    for record in reader.deserialize::<GeneLenRecord>() {
        let record = record.map_err(|e| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let Some(parsed) = parse_reference(&record.id, gid_name) else {
            return Err(ProfilerError::SchemaMismatch {
                table: path.display().to_string(),
                detail: format!("unparseable reference id '{}'", record.id),
            });
        };
        table.insert(
            Arc::from(record.id.as_str()),
            (parsed.target_id, parsed.gene_tag, record.length),
        );
    }
    Ok(table)
}

/// Load `reference2genome.tsv`: headerless, two columns read positionally.
pub fn load_reference2genome(path: &Path) -> Result<RefToGenomeTable, ProfilerError> {
    if !path.exists() {
        return Err(missing(path));
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)
        .map_err(|e| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: e.to_string(),
        })?;

    let mut table = RefToGenomeTable::new();
    for record in reader.records() {
        let record = record.map_err(|e| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let reference_id = record.get(0).ok_or_else(|| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: "missing reference id column".to_string(),
        })?;
        let genome = record.get(1).ok_or_else(|| ProfilerError::SchemaMismatch {
            table: path.display().to_string(),
            detail: "missing genome column".to_string(),
        })?;
        table.insert(Arc::from(reference_id), genome.to_string());
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_taxonomy_by_header_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tax_id\tspecies\tgenus\tfamily\torder\tclass\tphylum\tclade\tsuperkingdom").unwrap();
        writeln!(file, "1\tE. coli\tEscherichia\tEnterobacteriaceae\tEnterobacterales\tGammaproteobacteria\tProteobacteria\tNA\tBacteria").unwrap();
        let table = load_taxonomy(file.path()).unwrap();
        assert_eq!(table[&1].species, "E. coli");
    }

    #[test]
    fn loads_gene_lengths_and_parses_reference_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#id\tlength").unwrap();
        writeln!(file, "1:geneA\t500").unwrap();
        let table = load_gene_lengths(file.path(), false).unwrap();
        let (target_id, gene_tag, length) = &table[&Arc::from("1:geneA")];
        assert_eq!(*target_id, 1);
        assert_eq!(gene_tag.as_ref(), "geneA");
        assert_eq!(*length, 500);
    }

    #[test]
    fn missing_table_surfaces_missing_input_file() {
        let result = load_taxonomy(Path::new("/nonexistent/taxonomy.tsv"));
        assert!(matches!(result, Err(ProfilerError::MissingInputFile { .. })));
    }
}
