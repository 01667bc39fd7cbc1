//! End-to-end exercises of the public pipeline surface: EM convergence over
//! a synthetic likelihood table, width filtering ahead of it, and the output
//! writers that turn a converged `F` into on-disk tables.

use std::sync::Arc;

use clap::Parser;
use lemur_profile::cli::Cli;
use lemur_profile::config::Config;
use lemur_profile::em;
use lemur_profile::error::ProfilerError;
use lemur_profile::io::output;
use lemur_profile::likelihood::{build_likelihood_table, PrtRow, PrtTable};
use lemur_profile::types::{GeneLengthTable, RawAlignment, ScoreModel, TaxonRecord, TaxonomyTable};
use lemur_profile::width_filter;
use rust_htslib::bam::record::Cigar;

fn row(read: &str, target: u32, log_p: f64) -> PrtRow {
    PrtRow {
        read_id: Arc::from(read),
        target_id: target,
        gene_tag: Arc::from("geneA"),
        reference_id: Arc::from(format!("{target}:geneA")),
        aln_len: 100,
        log_p,
    }
}

fn config(score_model: ScoreModel) -> Config {
    Config {
        input: None,
        output: "out".into(),
        db_prefix: "db".into(),
        tax_path: "db/taxonomy.tsv".into(),
        num_threads: 1,
        score_model,
        per_gene: false,
        rank: "species".into(),
        min_aln_len_ratio: 0.75,
        min_fidelity: 0.5,
        ref_weight: 1.0,
        em_epsilon: 0.01,
        sam_input: None,
        save_intermediate_profile: false,
        width_filter: false,
        gid_name: false,
        keep_alignments: false,
    }
}

#[test]
fn synthetic_two_targets_converges_and_writes_abundance_table() {
    let rows = vec![
        row("R1", 1, -10.0),
        row("R1", 2, -20.0),
        row("R2", 1, -11.0),
        row("R2", 2, -10.0),
        row("R3", 2, -15.0),
        row("R3", 1, -30.0),
    ];
    let table = PrtTable::from_rows(rows);
    let initial = em::initial_frequencies(&table, &[1, 2]);
    let result = em::run(&table, initial, 0.01, |_, _| {});

    assert!((result.frequencies[&1] - 1.0 / 3.0).abs() < 1e-3);
    assert!((result.frequencies[&2] - 2.0 / 3.0).abs() < 1e-3);

    let mut taxonomy = TaxonomyTable::new();
    taxonomy.insert(
        1,
        TaxonRecord {
            tax_id: 1,
            species: "Species A".into(),
            genus: "Genus A".into(),
            family: "F".into(),
            order: "O".into(),
            class: "C".into(),
            phylum: "P".into(),
            clade: "Cl".into(),
            superkingdom: "Bacteria".into(),
        },
    );
    taxonomy.insert(
        2,
        TaxonRecord {
            tax_id: 2,
            species: "Species B".into(),
            genus: "Genus A".into(),
            family: "F".into(),
            order: "O".into(),
            class: "C".into(),
            phylum: "P".into(),
            clade: "Cl".into(),
            superkingdom: "Bacteria".into(),
        },
    );

    let dir = tempfile::tempdir().unwrap();
    let abundance_path = dir.path().join("relative_abundance.tsv");
    output::write_abundance(&result.frequencies, &taxonomy, &abundance_path).unwrap();

    let contents = std::fs::read_to_string(&abundance_path).unwrap();
    assert!(contents.contains("Species B"));
    assert!(contents.contains("Species A"));
    // Target 2 carries the larger share and must sort first.
    let species_b_line = contents.lines().position(|l| l.contains("Species B")).unwrap();
    let species_a_line = contents.lines().position(|l| l.contains("Species A")).unwrap();
    assert!(species_b_line < species_a_line);

    let rank_path = dir.path().join("relative_abundance-genus.tsv");
    output::write_rank_collapsed(&result.frequencies, &taxonomy, "genus", &rank_path).unwrap();
    let rank_contents = std::fs::read_to_string(&rank_path).unwrap();
    assert!(rank_contents.contains("Genus A"));
    // Both targets share one genus, so the collapsed frequency is ~1.0.
    let data_line = rank_contents.lines().nth(1).unwrap();
    let freq: f64 = data_line.split('\t').nth(1).unwrap().parse().unwrap();
    assert!((freq - 1.0).abs() < 1e-6);
}

#[test]
fn width_filter_rejects_narrow_support_then_em_sees_fewer_targets() {
    let mut gene_lengths = GeneLengthTable::new();
    for i in 0..20 {
        gene_lengths.insert(
            Arc::from(format!("1:gene{i}")),
            (1, Arc::from(format!("gene{i}")), 100),
        );
    }
    gene_lengths.insert(Arc::from("2:geneA"), (2, Arc::from("geneA"), 100));

    let mut rows = Vec::new();
    for i in 0..40 {
        let gene = if i % 2 == 0 { "gene0" } else { "gene1" };
        rows.push(PrtRow {
            read_id: Arc::from(format!("r{i}")),
            target_id: 1,
            gene_tag: Arc::from(gene),
            reference_id: Arc::from(format!("1:{gene}")),
            aln_len: 100,
            log_p: -1.0,
        });
    }
    rows.push(row("r_other", 2, -1.0));
    let mut table = PrtTable::from_rows(rows);

    let keep = width_filter::width_filter_keep(&table, &gene_lengths);
    assert_eq!(keep[&1], false);
    assert_eq!(keep[&2], true);

    table.retain_targets(&keep);
    let groups = table.target_groups();
    assert!(!groups.contains_key(&1));
    assert!(groups.contains_key(&2));
}

#[test]
fn zero_alignments_is_no_alignments_error() {
    let cfg = config(ScoreModel::Markov);
    let model = lemur_profile::cigar::build_model(lemur_profile::cigar::ModelKind::Markov, &[], false);
    let gene_lengths = GeneLengthTable::new();
    let alignments: Vec<RawAlignment> = Vec::new();
    let result = build_likelihood_table(&alignments, &cfg, &model, &gene_lengths);
    assert!(matches!(result, Err(ProfilerError::NoAlignments)));
}

#[test]
fn invalid_rank_is_rejected_at_config_construction() {
    let cli = Cli::try_parse_from([
        "lemur",
        "--output",
        "out",
        "--db-prefix",
        "db",
        "--rank",
        "not-a-real-rank",
    ]);
    let cli = cli.expect("clap parses the args themselves");
    let result = Config::from_cli(cli);
    assert!(matches!(result, Err(ProfilerError::InvalidRank { .. })));
}

#[test]
fn markov_hardclip_alignment_survives_to_table_with_lenient_fidelity() {
    // Under the fixed fallback model (no training data), an all-Equal
    // alignment scores log_p = 0, so fidelity = 0 / aln_len = 0: it only
    // survives filtering when min_fidelity is lenient. This exercises the
    // open-question resolution that the edit/markov fidelity threshold is
    // compared directly against log_p / aln_len, not log(min_fidelity)
    // (unlike AS mode).
    let mut cfg = config(ScoreModel::Markov);
    cfg.min_fidelity = 0.0;
    let model = lemur_profile::cigar::build_model(lemur_profile::cigar::ModelKind::Markov, &[], false);
    let mut gene_lengths = GeneLengthTable::new();
    gene_lengths.insert(Arc::from("1:geneA"), (1, Arc::from("geneA"), 100));

    let aln = RawAlignment {
        read_id: Arc::from("r1"),
        reference_name: Arc::from("1:geneA"),
        aln_score: 50,
        cigar: vec![Cigar::Equal(90), Cigar::HardClip(10)],
        is_primary: true,
    };
    let result = build_likelihood_table(&[aln], &cfg, &model, &gene_lengths).unwrap();
    assert_eq!(result.2.len(), 1);
    assert!((result.2.rows[0].log_p - 0.0).abs() < 1e-9);
}
