//! C2: CIGAR scorer. Pure functions mapping `(cigar, model) -> log_p`
//! (natural log throughout, matching the rest of the engine's log-space
//! arithmetic).

use rust_htslib::bam::record::Cigar;

use super::model::{trim_hard_clips, CigarModel, EditModel, MarkovModel, FALLBACK_COST};
use crate::types::OpKind;

pub fn score_cigar(cigar: &[Cigar], model: &CigarModel) -> f64 {
    match model {
        CigarModel::Edit(edit) => score_multinomial(cigar, edit),
        CigarModel::Markov(markov) => score_markov(cigar, markov),
    }
}

/// `log_p = sum_op length_op * log(cost[op_kind])`, over every CIGAR entry
/// including leading/trailing HardClip (section 4.2: "included here by design").
pub fn score_multinomial(cigar: &[Cigar], model: &EditModel) -> f64 {
    cigar
        .iter()
        .filter_map(|elem| OpKind::from_cigar(elem).map(|op| (op, elem.len() as f64)))
        .map(|(op, len)| len * model.cost_of(op).ln())
        .sum()
}

/// Markov scoring, section 4.2. Leading/trailing HardClip is stripped first;
/// the Match op is intentionally excluded from both the cost sum and the
/// transition chase (it never breaks the adjacency tracked by `prev`).
pub fn score_markov(cigar: &[Cigar], model: &MarkovModel) -> f64 {
    let trimmed = trim_hard_clips(cigar);
    let mut log_p = 0.0;
    let mut prev: Option<OpKind> = None;

    for elem in trimmed {
        let Some(op) = OpKind::from_cigar(elem) else {
            continue;
        };
        if matches!(op, OpKind::Match) {
            continue;
        }
        let len = elem.len() as f64;

        let self_prob = model.self_transition_prob(op);
        if self_prob > 0.0 {
            log_p += (len - 1.0) * self_prob.ln();
        } else {
            log_p += (len - 1.0) * FALLBACK_COST[op.index()].ln();
        }

        if let Some(p) = prev {
            let trans_prob = model.transition_prob(p, op);
            if trans_prob > 0.0 {
                log_p += trans_prob.ln();
            }
        }
        prev = Some(op);
    }

    log_p
}
