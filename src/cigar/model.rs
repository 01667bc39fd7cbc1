//! C1: CIGAR model builder.
//!
//! Trains either a multinomial edit-cost model or a first-order Markov model
//! over CIGAR operations from the primary, non-supplementary alignments in a
//! run. Both may be stratified per marker gene tag (`--aln-score-gene`).

use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::Array2;
use rust_htslib::bam::record::Cigar;

use crate::types::{OpKind, TERMINAL_INDEX};

/// Fixed fallback multinomial costs, used both when training data is absent
/// (`N = 0`) and as the per-operation fallback inside the Markov scorer when
/// a transition row has zero mass (section 4.1, 4.2).
pub const FALLBACK_COST: [f64; 7] = fallback_cost_table();

const fn fallback_cost_table() -> [f64; 7] {
    // indexed by OpKind::index(): Match, Ins, Del, Equal, Diff, SoftClip, HardClip
    [1.0, 0.005, 0.005, 1.0, 0.01, 0.05, 0.001]
}

/// The multinomial edit-cost model: `op -> cost_prob`, indexed by [`OpKind::index`].
#[derive(Debug, Clone, PartialEq)]
pub struct EditModel {
    pub cost: [f64; 7],
}

impl EditModel {
    pub fn fallback() -> Self {
        EditModel {
            cost: FALLBACK_COST,
        }
    }

    pub fn cost_of(&self, op: OpKind) -> f64 {
        self.cost[op.index()]
    }
}

/// The first-order Markov model: an 8x8 row-stochastic transition matrix over
/// the seven CIGAR operation kinds plus a terminal symbol (index
/// [`TERMINAL_INDEX`], unused as a source row but present for matrix shape).
#[derive(Debug, Clone, PartialEq)]
pub struct MarkovModel {
    pub transition: Array2<f64>,
}

impl MarkovModel {
    pub fn transition_prob(&self, from: OpKind, to: OpKind) -> f64 {
        self.transition[[from.index(), to.index()]]
    }

    pub fn self_transition_prob(&self, op: OpKind) -> f64 {
        self.transition[[op.index(), op.index()]]
    }
}

/// Either trained model, chosen by `--aln-score`.
#[derive(Debug, Clone)]
pub enum CigarModel {
    Edit(EditModel),
    Markov(MarkovModel),
}

/// The result of C1: a global model, plus an optional per-gene stratification.
#[derive(Debug, Clone)]
pub struct StratifiedModel {
    pub global: CigarModel,
    pub per_gene: Option<IndexMap<Arc<str>, CigarModel>>,
}

impl StratifiedModel {
    /// The model to use for a given gene tag: the per-gene model if one was
    /// trained and covers this gene, otherwise the global model (an unseen
    /// gene tag in per-gene mode falls back to the global model rather than
    /// failing the run).
    pub fn model_for(&self, gene_tag: &str) -> &CigarModel {
        if let Some(per_gene) = &self.per_gene {
            if let Some(m) = per_gene.get(gene_tag) {
                return m;
            }
        }
        &self.global
    }
}

/// One training alignment: its CIGAR and the gene tag it mapped to (already
/// restricted to the fixed marker-gene set by the caller).
pub struct TrainingRecord<'a> {
    pub cigar: &'a [Cigar],
    pub gene_tag: Arc<str>,
}

/// C1 entry point. `kind` selects which family of model to train; callers in
/// `ScoreModel::As` mode never call this (C1 is a no-op for passthrough scoring).
pub enum ModelKind {
    Edit,
    Markov,
}

pub fn build_model(
    kind: ModelKind,
    records: &[TrainingRecord<'_>],
    per_gene: bool,
) -> StratifiedModel {
    let global = train_one(kind_ref(&kind), records.iter().map(|r| r.cigar));

    let per_gene = if per_gene {
        let mut by_gene: IndexMap<Arc<str>, Vec<&[Cigar]>> = IndexMap::new();
        for r in records {
            by_gene.entry(r.gene_tag.clone()).or_default().push(r.cigar);
        }
        let mut models = IndexMap::new();
        for (gene, cigars) in by_gene {
            let model = train_one(kind_ref(&kind), cigars.into_iter());
            models.insert(gene, model);
        }
        Some(models)
    } else {
        None
    };

    StratifiedModel { global, per_gene }
}

fn kind_ref(kind: &ModelKind) -> &ModelKind {
    kind
}

fn train_one<'a>(kind: &ModelKind, cigars: impl Iterator<Item = &'a [Cigar]>) -> CigarModel {
    match kind {
        ModelKind::Edit => CigarModel::Edit(train_edit_model(cigars)),
        ModelKind::Markov => CigarModel::Markov(train_markov_model(cigars)),
    }
}

/// Train the multinomial edit-cost model (section 4.1).
fn train_edit_model<'a>(cigars: impl Iterator<Item = &'a [Cigar]>) -> EditModel {
    let cost_bearing = [
        OpKind::Ins,
        OpKind::Del,
        OpKind::Diff,
        OpKind::HardClip,
        OpKind::SoftClip,
    ];
    let mut counts = [0u64; 7];
    for cigar in cigars {
        for elem in cigar {
            if let Some(op) = OpKind::from_cigar(elem) {
                if cost_bearing.contains(&op) {
                    counts[op.index()] += elem.len() as u64;
                }
            }
        }
    }
    let total: u64 = cost_bearing.iter().map(|op| counts[op.index()]).sum();

    if total == 0 {
        return EditModel::fallback();
    }

    let mut cost = [0.0; 7];
    cost[OpKind::Match.index()] = 1.0;
    cost[OpKind::Equal.index()] = 1.0;
    for op in cost_bearing {
        cost[op.index()] = counts[op.index()] as f64 / total as f64;
    }
    EditModel { cost }
}

/// Train the first-order Markov model (section 4.1).
///
/// The 8th matrix index is a terminal symbol: after the last scorable op of
/// each CIGAR, a transition into the terminal is recorded. Without it, the
/// row for the last op in a CIGAR would not account for the probability mass
/// "spent" on ending there, and rows would not normalize to the denominators
/// the source tool's worked examples assume.
fn train_markov_model<'a>(cigars: impl Iterator<Item = &'a [Cigar]>) -> MarkovModel {
    let mut counts = Array2::<f64>::zeros((8, 8));

    for cigar in cigars {
        let trimmed = trim_hard_clips(cigar);
        let mut prev: Option<OpKind> = None;
        for elem in trimmed {
            let Some(op) = OpKind::from_cigar(elem) else {
                continue;
            };
            let len = elem.len() as f64;
            counts[[op.index(), op.index()]] += (len - 1.0).max(0.0);
            if let Some(p) = prev {
                counts[[p.index(), op.index()]] += 1.0;
            }
            prev = Some(op);
        }
        if let Some(last) = prev {
            counts[[last.index(), TERMINAL_INDEX]] += 1.0;
        }
    }

    let mut transition = Array2::<f64>::zeros((8, 8));
    for row in 0..8 {
        let row_sum: f64 = counts.row(row).sum();
        if row_sum > 0.0 {
            for col in 0..8 {
                transition[[row, col]] = counts[[row, col]] / row_sum;
            }
        }
        // row_sum == 0 -> all-zero row, already the default.
    }

    MarkovModel { transition }
}

/// Skip any leading or trailing HardClip entries (section 4.1: "skipping any
/// leading or trailing HardClip"). Interior HardClip entries (unusual, but
/// not disallowed by the CIGAR grammar) are kept.
pub fn trim_hard_clips(cigar: &[Cigar]) -> &[Cigar] {
    let mut start = 0;
    let mut end = cigar.len();
    while start < end && matches!(cigar[start], Cigar::HardClip(_)) {
        start += 1;
    }
    while end > start && matches!(cigar[end - 1], Cigar::HardClip(_)) {
        end -= 1;
    }
    &cigar[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cig(ops: &[(u32, char)]) -> Vec<Cigar> {
        ops.iter()
            .map(|(len, c)| match c {
                'M' => Cigar::Match(*len),
                'I' => Cigar::Ins(*len),
                'D' => Cigar::Del(*len),
                '=' => Cigar::Equal(*len),
                'X' => Cigar::Diff(*len),
                'S' => Cigar::SoftClip(*len),
                'H' => Cigar::HardClip(*len),
                _ => panic!("bad op"),
            })
            .collect()
    }

    #[test]
    fn edit_model_training_matches_scenario_4() {
        let c1 = cig(&[(10, 'I'), (5, 'D')]);
        let c2 = cig(&[(5, 'X')]);
        let records = [
            TrainingRecord {
                cigar: &c1,
                gene_tag: Arc::from("geneA"),
            },
            TrainingRecord {
                cigar: &c2,
                gene_tag: Arc::from("geneA"),
            },
        ];
        let model = build_model(ModelKind::Edit, &records, false);
        let CigarModel::Edit(edit) = &model.global else {
            panic!("expected edit model")
        };
        assert!((edit.cost_of(OpKind::Ins) - 0.5).abs() < 1e-9);
        assert!((edit.cost_of(OpKind::Del) - 0.25).abs() < 1e-9);
        assert!((edit.cost_of(OpKind::Diff) - 0.25).abs() < 1e-9);
        assert_eq!(edit.cost_of(OpKind::Match), 1.0);
        assert_eq!(edit.cost_of(OpKind::Equal), 1.0);
    }

    #[test]
    fn edit_model_falls_back_when_no_cost_bearing_ops() {
        let c1 = cig(&[(10, 'M')]);
        let records = [TrainingRecord {
            cigar: &c1,
            gene_tag: Arc::from("geneA"),
        }];
        let model = build_model(ModelKind::Edit, &records, false);
        let CigarModel::Edit(edit) = &model.global else {
            panic!("expected edit model")
        };
        assert_eq!(edit.cost, FALLBACK_COST);
    }

    #[test]
    fn markov_model_training_matches_scenario_3() {
        let c1 = cig(&[(5, '='), (1, 'X'), (5, '=')]);
        let records = [TrainingRecord {
            cigar: &c1,
            gene_tag: Arc::from("geneA"),
        }];
        let model = build_model(ModelKind::Markov, &records, false);
        let CigarModel::Markov(markov) = &model.global else {
            panic!("expected markov model")
        };
        assert!((markov.transition_prob(OpKind::Equal, OpKind::Equal) - 0.8).abs() < 1e-9);
        assert!((markov.transition_prob(OpKind::Equal, OpKind::Diff) - 0.1).abs() < 1e-9);
        assert!((markov.transition_prob(OpKind::Diff, OpKind::Equal) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn per_gene_stratification_falls_back_to_global_for_unseen_gene() {
        let c1 = cig(&[(10, 'I')]);
        let records = [TrainingRecord {
            cigar: &c1,
            gene_tag: Arc::from("geneA"),
        }];
        let model = build_model(ModelKind::Edit, &records, true);
        assert!(model.per_gene.as_ref().unwrap().contains_key("geneA"));
        // Unseen gene falls back to the global model.
        match model.model_for("geneB") {
            CigarModel::Edit(edit) => assert!((edit.cost_of(OpKind::Ins) - 1.0).abs() < 1e-9),
            _ => panic!("expected edit model"),
        }
    }

    #[test]
    fn trim_hard_clips_strips_only_leading_and_trailing() {
        let c = cig(&[(3, 'H'), (5, 'M'), (2, 'H'), (5, 'M'), (3, 'H')]);
        let trimmed = trim_hard_clips(&c);
        assert_eq!(trimmed.len(), 3);
        assert!(matches!(trimmed[0], Cigar::Match(5)));
        assert!(matches!(trimmed[1], Cigar::HardClip(2)));
        assert!(matches!(trimmed[2], Cigar::Match(5)));
    }
}
