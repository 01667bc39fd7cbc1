//! C5: EM driver. Alternates a parallel E-step (posterior `P(t|r)` via C4)
//! and an M-step (target-grouped log-sum-exp) in log space until the total
//! log-likelihood stops improving, then performs one low-abundance prune and
//! a final refit (section 4.5).

use std::collections::HashMap;

use log::warn;

use crate::likelihood::PrtTable;
use crate::logsumexp::{lse_grouped_parallel, lse_indexed_parallel};
use crate::types::Frequencies;

/// `F[t] = 1 / |targets|` for every target present both in the taxonomy key
/// set and in at least one surviving P(r|t) row.
///
/// The literal reading of section 4.5 ("every `t` in the taxonomy key set")
/// would also seed targets with zero rows; their M-step group is then empty,
/// `lse([]) = 0`, and `F_new[t] = exp(0 - log N) = 1/N` — nonzero mass
/// conjured for a target with no alignment evidence at all. We restrict
/// initialization to targets that actually appear in the table, which keeps
/// the M-step's empty-group convention (section 4.4) from leaking spurious
/// abundance into the output.
pub fn initial_frequencies(table: &PrtTable, taxonomy_targets: &[u32]) -> Frequencies {
    let taxonomy_targets: std::collections::HashSet<u32> = taxonomy_targets.iter().copied().collect();
    let mut targets: Vec<u32> = table
        .target_groups()
        .into_keys()
        .filter(|t| taxonomy_targets.contains(t))
        .collect();
    targets.sort_unstable();

    let n = targets.len() as f64;
    let mut f = Frequencies::new();
    for t in targets {
        f.insert(t, 1.0 / n);
    }
    f
}

/// One E-step + M-step, returning the updated frequencies and
/// `LL = Σ_r S(r)` for this iteration (section 4.5).
fn em_step(
    table: &PrtTable,
    read_groups: &[(usize, usize)],
    target_groups: &HashMap<u32, Vec<usize>>,
    f: &Frequencies,
) -> (Frequencies, f64) {
    let u: Vec<f64> = table
        .rows
        .iter()
        .map(|row| match f.get(&row.target_id) {
            Some(&freq) => row.log_p + freq.ln(),
            None => f64::NEG_INFINITY,
        })
        .collect();

    let s_by_group = lse_grouped_parallel(&u, read_groups);
    let mut s_for_row = vec![0.0; u.len()];
    for (&(start, end), &s) in read_groups.iter().zip(s_by_group.iter()) {
        for slot in s_for_row.iter_mut().take(end).skip(start) {
            *slot = s;
        }
    }

    let log_post: Vec<f64> = u.iter().zip(s_for_row.iter()).map(|(&ui, &si)| ui - si).collect();

    let n_reads = read_groups.len() as f64;
    let log_n = n_reads.ln();

    let targets: Vec<u32> = f.keys().copied().collect();
    let groups: Vec<Vec<usize>> = targets
        .iter()
        .map(|t| target_groups.get(t).cloned().unwrap_or_default())
        .collect();
    let lse_by_target = lse_indexed_parallel(&log_post, &groups);

    let mut f_new = Frequencies::new();
    for (t, lse_val) in targets.into_iter().zip(lse_by_target.into_iter()) {
        let freq = (lse_val - log_n).exp();
        if freq > 0.0 {
            f_new.insert(t, freq);
        }
    }

    let ll = s_by_group.iter().sum();
    (f_new, ll)
}

/// Result of a full EM run: the refit frequencies, the refit's
/// log-likelihood, and the number of main-loop iterations run before
/// convergence (not counting the final refit).
pub struct EmResult {
    pub frequencies: Frequencies,
    pub log_likelihood: f64,
    pub iterations: usize,
}

/// Run EM to convergence and perform the final low-abundance refit.
/// `on_snapshot(iteration, f)` is called after every main-loop iteration
/// (before the refit), so the caller can write `relative_abundance-EM-<i>.tsv`
/// when intermediate snapshots are requested.
pub fn run(
    table: &PrtTable,
    initial: Frequencies,
    epsilon: f64,
    mut on_snapshot: impl FnMut(usize, &Frequencies),
) -> EmResult {
    let read_groups = table.read_groups();
    let target_groups = table.target_groups();
    let n_reads = read_groups.len();

    let mut f = initial;
    let mut prev_ll: Option<f64> = None;
    let mut iteration = 0;

    loop {
        let (f_new, ll) = em_step(table, &read_groups, &target_groups, &f);
        iteration += 1;
        f = f_new;
        on_snapshot(iteration, &f);

        if let Some(prev) = prev_ll {
            if ll < prev - 1e-9 {
                warn!("EM log-likelihood decreased from {prev} to {ll}; continuing");
            }
            if ll - prev < epsilon {
                prev_ll = Some(ll);
                break;
            }
        }
        prev_ll = Some(ll);
    }

    let low_threshold = 1.0 / n_reads.max(1) as f64;
    let restricted: Frequencies = f.into_iter().filter(|(_, v)| *v >= low_threshold).collect();
    let (f_final, ll_final) = em_step(table, &read_groups, &target_groups, &restricted);

    EmResult {
        frequencies: f_final,
        log_likelihood: ll_final,
        iterations: iteration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::likelihood::PrtRow;
    use std::sync::Arc;

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

    #[test]
    fn single_read_one_alignment_converges_immediately() {
        let table = PrtTable::from_rows(vec![row("r1", 1, -5.0)]);
        let f0 = initial_frequencies(&table, &[1]);
        let result = run(&table, f0, 0.01, |_, _| {});
        assert_eq!(result.frequencies.len(), 1);
        assert!((result.frequencies[&1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn synthetic_two_targets_matches_scenario_1() {
        let rows = vec![
            row("R1", 1, -10.0),
            row("R1", 2, -20.0),
            row("R2", 1, -11.0),
            row("R2", 2, -10.0),
            row("R3", 2, -15.0),
            row("R3", 1, -30.0),
        ];
        let table = PrtTable::from_rows(rows);
        let f0 = initial_frequencies(&table, &[1, 2]);
        assert!((f0[&1] - 0.5).abs() < 1e-9);
        assert!((f0[&2] - 0.5).abs() < 1e-9);

        let result = run(&table, f0, 0.01, |_, _| {});
        assert!((result.frequencies[&1] - 1.0 / 3.0).abs() < 1e-3);
        assert!((result.frequencies[&2] - 2.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn frequencies_sum_to_one_after_every_m_step() {
        let rows = vec![row("R1", 1, -1.0), row("R1", 2, -2.0), row("R2", 1, -3.0), row("R2", 2, -0.5)];
        let table = PrtTable::from_rows(rows);
        let read_groups = table.read_groups();
        let target_groups = table.target_groups();
        let f0 = initial_frequencies(&table, &[1, 2]);
        let (f1, _) = em_step(&table, &read_groups, &target_groups, &f0);
        let sum: f64 = f1.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
