//! The immutable run configuration, derived once from [`crate::cli::Cli`] and
//! shared by reference throughout the pipeline. Never mutated after
//! construction (section 3, "Run configuration").

use std::path::PathBuf;

use crate::cli::{AlnScoreArg, Cli};
use crate::error::ProfilerError;
use crate::types::{ScoreModel, TaxonRecord};

#[derive(Debug, Clone)]
pub struct Config {
    pub input: Option<PathBuf>,
    pub output: PathBuf,
    pub db_prefix: PathBuf,
    pub tax_path: PathBuf,
    pub num_threads: usize,
    pub score_model: ScoreModel,
    pub per_gene: bool,
    pub rank: String,
    pub min_aln_len_ratio: f64,
    pub min_fidelity: f64,
    pub ref_weight: f64,
    pub em_epsilon: f64,
    pub sam_input: Option<PathBuf>,
    pub save_intermediate_profile: bool,
    pub width_filter: bool,
    pub gid_name: bool,
    pub keep_alignments: bool,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, ProfilerError> {
        if !TaxonRecord::RANKS.contains(&cli.rank.as_str()) {
            return Err(ProfilerError::InvalidRank { rank: cli.rank });
        }

        let tax_path = cli
            .tax_path
            .unwrap_or_else(|| cli.db_prefix.join("taxonomy.tsv"));

        let score_model = match cli.aln_score {
            AlnScoreArg::As => ScoreModel::As,
            AlnScoreArg::Edit => ScoreModel::Edit,
            AlnScoreArg::Markov => ScoreModel::Markov,
        };

        Ok(Config {
            input: cli.input,
            output: cli.output,
            db_prefix: cli.db_prefix,
            tax_path,
            num_threads: cli.num_threads.max(1),
            score_model,
            per_gene: cli.aln_score_gene,
            rank: cli.rank,
            min_aln_len_ratio: cli.min_aln_len_ratio,
            min_fidelity: cli.min_fidelity,
            ref_weight: cli.ref_weight,
            em_epsilon: cli.em_epsilon,
            sam_input: cli.sam_input,
            save_intermediate_profile: cli.save_intermediate_profile,
            width_filter: cli.width_filter,
            gid_name: cli.gid_name,
            keep_alignments: cli.keep_alignments,
        })
    }

    pub fn gene2len_path(&self) -> PathBuf {
        self.db_prefix.join("gene2len.tsv")
    }

    pub fn reference2genome_path(&self) -> PathBuf {
        self.db_prefix.join("reference2genome.tsv")
    }
}
