//! Command-line surface. Parsed once by `clap` into a [`Cli`], then converted
//! into the immutable [`crate::config::Config`] the rest of the crate depends on.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlnScoreArg {
    #[value(name = "AS")]
    As,
    #[value(name = "edit")]
    Edit,
    #[value(name = "markov")]
    Markov,
}

/// Taxonomic profiling of long-read metagenomic alignments against a
/// marker-gene reference panel.
#[derive(Debug, Parser)]
#[command(name = "lemur", version, about, arg_required_else_help = true)]
pub struct Cli {
    /// Path to the read file handed to the aligner (ignored if --sam-input is given).
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Output directory; recreated if it already exists.
    #[arg(long)]
    pub output: PathBuf,

    /// Directory containing reference sequences and the auxiliary marker-gene tables.
    #[arg(long = "db-prefix")]
    pub db_prefix: PathBuf,

    /// Taxonomy table path (defaults to `<db-prefix>/taxonomy.tsv` if unset).
    #[arg(long = "tax-path")]
    pub tax_path: Option<PathBuf>,

    /// Worker pool size.
    #[arg(long = "num-threads", default_value_t = 1)]
    pub num_threads: usize,

    /// Scoring model used by C2/C3.
    #[arg(long = "aln-score", value_enum, default_value = "markov")]
    pub aln_score: AlnScoreArg,

    /// Stratify the CIGAR model per marker gene (C1).
    #[arg(long = "aln-score-gene", default_value_t = false)]
    pub aln_score_gene: bool,

    /// Taxonomic rank for the collapsed abundance output.
    #[arg(long, default_value = "species")]
    pub rank: String,

    /// Lower bound on aln_len / gene_length.
    #[arg(long = "min-aln-len-ratio", default_value_t = 0.75)]
    pub min_aln_len_ratio: f64,

    /// Lower bound on fidelity (semantics depend on --aln-score; see docs).
    #[arg(long = "min-fidelity", default_value_t = 0.50)]
    pub min_fidelity: f64,

    /// Weight applied to the length-ratio reweighting term.
    #[arg(long = "ref-weight", default_value_t = 1.0)]
    pub ref_weight: f64,

    /// Absolute EM log-likelihood convergence threshold.
    #[arg(long = "em-epsilon", default_value_t = 0.01)]
    pub em_epsilon: f64,

    /// Skip aligner invocation and read alignments from this SAM/BAM file instead.
    #[arg(long = "sam-input")]
    pub sam_input: Option<PathBuf>,

    /// Emit a `relative_abundance-EM-<i>.tsv` snapshot after every EM iteration.
    #[arg(long = "save-intermediate-profile", default_value_t = false)]
    pub save_intermediate_profile: bool,

    /// Enable the width filter (C6).
    #[arg(long = "width-filter", default_value_t = false)]
    pub width_filter: bool,

    /// Use the `<target>_<suffix>` reference-name schema instead of `<target>:<gene_tag>/...`.
    #[arg(long = "gid-name", default_value_t = false)]
    pub gid_name: bool,

    /// Retain the alignment file after the run instead of cleaning it up.
    #[arg(long = "keep-alignments", default_value_t = false)]
    pub keep_alignments: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
