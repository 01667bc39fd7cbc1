use std::path::PathBuf;

use thiserror::Error;

/// The error taxonomy for the profiling engine. Every failure mode that the
/// core components can produce is a named variant here; ad hoc I/O errors at
/// the outermost CLI boundary are instead wrapped with `anyhow::Context`.
#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("external aligner exited with status {status}\n--- stderr ---\n{stderr_tail}")]
    AlignerFailed { status: i32, stderr_tail: String },

    #[error("missing input file: {path}")]
    MissingInputFile { path: PathBuf },

    #[error("schema mismatch in {table}: {detail}")]
    SchemaMismatch { table: String, detail: String },

    #[error(
        "no alignments survived filtering (min-aln-len-ratio/min-fidelity too strict); \
         try relaxing --min-aln-len-ratio or --min-fidelity"
    )]
    NoAlignments,

    #[error("unknown taxonomic rank '{rank}'")]
    InvalidRank { rank: String },
}
