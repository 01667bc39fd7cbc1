//! The run driver: owns every in-memory table for the duration of one
//! profiling run and sequences C1 through C6 (section 3, "Entity lifetimes").
//! Ambient I/O (directory setup, table/alignment loading, writing results)
//! lives here rather than in the statistical core, so the core stays a set
//! of pure `Result<_, ProfilerError>` functions while this layer is the one
//! that reaches for `anyhow::Context`.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use crate::cigar::{self, ModelKind, TrainingRecord};
use crate::config::Config;
use crate::em;
use crate::io::{alignments, aligner, output, tables};
use crate::likelihood;
use crate::types::{parse_reference, Frequencies, RawAlignment, ScoreModel, TaxonomyTable};
use crate::width_filter;

/// Run one end-to-end profiling pass and write every table on the "Outputs
/// on disk" list (section 3) under `config.output`.
pub fn run(config: &Config) -> Result<()> {
    fs::create_dir_all(&config.output)
        .with_context(|| format!("creating output directory {}", config.output.display()))?;

    let taxonomy = tables::load_taxonomy(&config.tax_path)
        .with_context(|| format!("loading taxonomy table {}", config.tax_path.display()))?;
    let gene_lengths = tables::load_gene_lengths(&config.gene2len_path(), config.gid_name)
        .with_context(|| format!("loading gene-length table {}", config.gene2len_path().display()))?;
    let _ref2genome = tables::load_reference2genome(&config.reference2genome_path())
        .with_context(|| format!("loading reference2genome table {}", config.reference2genome_path().display()))?;

    let (raw_alignments, generated_sam_path) = load_alignments(config)?;
    info!("loaded {} alignment records", raw_alignments.len());

    let marker_genes: HashSet<Arc<str>> = gene_lengths.values().map(|(_, gene_tag, _)| gene_tag.clone()).collect();
    let model = build_cigar_model(config, &raw_alignments, &marker_genes);

    let (raw_rows, gene_joined, mut table) =
        likelihood::build_likelihood_table(&raw_alignments, config, &model, &gene_lengths)
            .context("building likelihood table")?;

    output::write_prt_raw(&raw_rows, &config.output.join("P_rgs_df_raw.tsv")).context("writing P_rgs_df_raw.tsv")?;
    output::write_gene_joined(&gene_joined, &config.output.join("gene_P_rgs_df_raw.tsv"))
        .context("writing gene_P_rgs_df_raw.tsv")?;

    if config.width_filter {
        let keep = width_filter::width_filter_keep(&table, &gene_lengths);
        let before = table.target_groups().len();
        table.retain_targets(&keep);
        info!("width filter: {} -> {} targets", before, table.target_groups().len());
    }

    output::write_prt_table(&table, &config.output.join("P_rgs_df.tsv")).context("writing P_rgs_df.tsv")?;

    let taxonomy_targets: Vec<u32> = taxonomy.keys().copied().collect();
    let initial = em::initial_frequencies(&table, &taxonomy_targets);

    let snapshot_dir = config.output.clone();
    let save_snapshots = config.save_intermediate_profile;
    let taxonomy_for_snapshots = taxonomy.clone();

    let em_progress = ProgressBar::new_spinner();
    em_progress.set_style(ProgressStyle::default_spinner().template("{spinner} EM: {msg}").expect("valid template"));
    let result = em::run(&table, initial, config.em_epsilon, |iteration, f| {
        em_progress.set_message(format!("iteration {iteration}"));
        em_progress.tick();
        if save_snapshots {
            let path = output::em_snapshot_path(&snapshot_dir, iteration);
            if let Err(e) = output::write_abundance(f, &taxonomy_for_snapshots, &path) {
                log::warn!("failed to write EM snapshot {}: {e}", path.display());
            }
        }
    });
    em_progress.finish_and_clear();
    info!(
        "EM converged after {} iterations, final log-likelihood {:.3}",
        result.iterations, result.log_likelihood
    );

    write_final_outputs(config, &result.frequencies, &taxonomy)?;

    if let Some(sam_path) = generated_sam_path {
        if !config.keep_alignments {
            let _ = fs::remove_file(sam_path);
        }
    }

    Ok(())
}

/// Source the alignment record stream: either from a prebuilt file
/// (`--sam-input`) or by invoking the external aligner. Returns the path of
/// any aligner-generated file so the caller can clean it up afterward.
fn load_alignments(config: &Config) -> Result<(Vec<RawAlignment>, Option<std::path::PathBuf>)> {
    if let Some(sam_input) = &config.sam_input {
        let alignments = alignments::read_alignments(sam_input)
            .with_context(|| format!("reading alignments from {}", sam_input.display()))?;
        Ok((alignments, None))
    } else {
        let sam_path = aligner::align(config, &config.output).context("invoking external aligner")?;
        let alignments = alignments::read_alignments(&sam_path)
            .with_context(|| format!("reading aligner output {}", sam_path.display()))?;
        Ok((alignments, Some(sam_path)))
    }
}

/// Train C1, restricting training data to primary alignments whose gene tag
/// is in the curated marker-gene panel (section 3: "Only alignments whose
/// gene tag is in this set are relevant"; section 4.1: unlisted genes are
/// ignored for training).
fn build_cigar_model(
    config: &Config,
    raw_alignments: &[RawAlignment],
    marker_genes: &HashSet<Arc<str>>,
) -> cigar::StratifiedModel {
    let kind = match config.score_model {
        ScoreModel::As => return cigar::build_model(ModelKind::Edit, &[], false),
        ScoreModel::Edit => ModelKind::Edit,
        ScoreModel::Markov => ModelKind::Markov,
    };

    let parsed: Vec<(&[rust_htslib::bam::record::Cigar], Arc<str>)> = raw_alignments
        .iter()
        .filter(|a| a.is_primary)
        .filter_map(|a| {
            let parsed = parse_reference(&a.reference_name, config.gid_name)?;
            marker_genes.contains(&parsed.gene_tag).then_some((a.cigar.as_slice(), parsed.gene_tag))
        })
        .collect();

    let records: Vec<TrainingRecord<'_>> = parsed
        .iter()
        .map(|(cigar, gene_tag)| TrainingRecord { cigar, gene_tag: gene_tag.clone() })
        .collect();

    cigar::build_model(kind, &records, config.per_gene)
}

fn write_final_outputs(config: &Config, frequencies: &Frequencies, taxonomy: &TaxonomyTable) -> Result<()> {
    let abundance_path = config.output.join("relative_abundance.tsv");
    output::write_abundance(frequencies, taxonomy, &abundance_path).context("writing relative_abundance.tsv")?;

    let rank_path = config.output.join(format!("relative_abundance-{}.tsv", config.rank));
    output::write_rank_collapsed(frequencies, taxonomy, &config.rank, &rank_path)
        .with_context(|| format!("writing {}", rank_path.display()))?;

    Ok(())
}
