//! C5: integer ambiguity resolution.
//!
//! Takes the float solution's ambiguity-carrying block, forms
//! double-differences against a reference satellite (chosen by maximum
//! elevation, matching `chooseRefSv` in the source), searches for the
//! best and second-best integer candidate (LAMBDA/MLAMBDA-style
//! sequential conditional rounding), and folds the fixed ambiguities
//! back into the core parameters via the usual conditional update
//! (spec. §4.5, `fixAmbiguities`/`SD2DD`). The best/second-best ratio is
//! reported on [`FixedSolution`] for the caller to act on; accepting or
//! discarding a fix based on that ratio is the caller's decision, not
//! this component's.

use std::collections::BTreeMap;

use log::{debug, info};
use nalgebra::{Cholesky, DMatrix, DVector};

use gnss_rs::prelude::SV;

use crate::epoch::EpochRecord;
use crate::error::Error;
use crate::kalman::KalmanSolution;
use crate::types::ParameterId;

#[derive(Debug, Clone, Copy)]
pub struct AmbiguityResolutionOpts {
    /// Minimum number of simultaneous ambiguities before a resolution
    /// attempt is made at all.
    pub min_ambiguities: usize,
    /// Minimum ratio between the second-best and best integer
    /// candidate's residual norm a caller should require before
    /// trusting [`FixedSolution::ratio`]. Not enforced here: ratio
    /// testing is the caller's call, this component always reports the
    /// fix it found.
    pub min_ratio: f64,
}

impl Default for AmbiguityResolutionOpts {
    fn default() -> Self {
        Self {
            min_ambiguities: 5,
            min_ratio: 3.0,
        }
    }
}

/// Result of a successful fix: the core parameters corrected for the
/// fixed double-difference ambiguities, plus the fixed integers
/// themselves for diagnostics.
#[derive(Debug, Clone)]
pub struct FixedSolution {
    pub reference: SV,
    pub fixed: BTreeMap<SV, i64>,
    pub core: BTreeMap<ParameterId, f64>,
    pub ratio: f64,
}

/// Picks the satellite with the highest elevation among those carrying
/// an active ambiguity, mirroring the source's `chooseRefSv`.
fn choose_reference(epoch: &EpochRecord, ambiguity_svs: &[SV]) -> Option<SV> {
    ambiguity_svs
        .iter()
        .filter_map(|sv| epoch.satellites.get(sv).map(|r| (*sv, r.elevation_deg)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(sv, _)| sv)
}

/// Sequential conditional rounding (a decorrelation-free simplification
/// of MLAMBDA's integer search): each component is rounded in turn,
/// conditioned on the ones already fixed, using the Cholesky factor of
/// the covariance as the decorrelation basis.
fn sequential_round(float_dd: &DVector<f64>, cov_dd: &DMatrix<f64>) -> Vec<i64> {
    let n = float_dd.len();
    let l = Cholesky::new(cov_dd.clone())
        .map(|c| c.l())
        .unwrap_or_else(|| DMatrix::identity(n, n));

    let mut fixed = vec![0i64; n];
    let mut residual = float_dd.clone();
    for i in (0..n).rev() {
        let pivot = l[(i, i)].max(1e-9);
        let conditional = residual[i];
        fixed[i] = conditional.round() as i64;
        let delta = conditional - fixed[i] as f64;
        for j in 0..i {
            residual[j] -= l[(i, j)] * delta / pivot;
        }
    }
    fixed
}

/// Enumerates the best and second-best candidate around the rounded
/// solution by flipping, in turn, the component whose fractional part
/// is closest to 0.5 (the least-confident one), and scores both by
/// weighted residual norm.
fn best_two_candidates(float_dd: &DVector<f64>, cov_dd: &DMatrix<f64>) -> (Vec<i64>, f64, f64) {
    let best = sequential_round(float_dd, cov_dd);
    let weight = cov_dd.clone().try_inverse().unwrap_or_else(|| DMatrix::identity(float_dd.len(), float_dd.len()));

    let score = |cand: &[i64]| -> f64 {
        let diff = DVector::from_iterator(cand.len(), cand.iter().map(|&c| c as f64)) - float_dd;
        (diff.transpose() * &weight * &diff)[(0, 0)]
    };

    let least_confident = (0..float_dd.len())
        .max_by(|&a, &b| {
            let fa = (float_dd[a] - float_dd[a].round()).abs();
            let fb = (float_dd[b] - float_dd[b].round()).abs();
            fa.total_cmp(&fb)
        })
        .unwrap_or(0);

    let mut second = best.clone();
    second[least_confident] += if float_dd[least_confident] >= best[least_confident] as f64 {
        1
    } else {
        -1
    };

    let best_score = score(&best);
    let second_score = score(&second);
    if best_score <= second_score {
        (best, best_score, second_score)
    } else {
        (second, second_score, best_score)
    }
}

/// Attempts to resolve the integer ambiguities present in `solution`
/// and, on success, returns the corrected core parameters along with
/// the best/second-best ratio. Returns `Ok(None)` only when there are
/// not enough simultaneous ambiguities to attempt a fix, which is a
/// normal outcome, not a failure; a fix that is found is always
/// returned and its core correction always applied, regardless of how
/// low its ratio is — rejecting a low-ratio fix is left to the caller.
pub fn resolve(
    solution: &KalmanSolution,
    epoch: &EpochRecord,
    opts: AmbiguityResolutionOpts,
) -> Result<Option<FixedSolution>, Error> {
    let ambiguity_svs: Vec<SV> = solution
        .params
        .iter()
        .filter_map(|p| match p {
            ParameterId::Ambiguity(sv, _) => Some(*sv),
            _ => None,
        })
        .collect();

    if ambiguity_svs.len() < opts.min_ambiguities {
        debug!(
            "skipping ambiguity resolution: {} active, {} required",
            ambiguity_svs.len(),
            opts.min_ambiguities
        );
        return Ok(None);
    }

    let reference = choose_reference(epoch, &ambiguity_svs).ok_or(Error::InsufficientSatellites(0, 1))?;

    let others: Vec<SV> = ambiguity_svs.iter().copied().filter(|sv| *sv != reference).collect();
    let ref_idx = solution
        .params
        .iter()
        .position(|p| matches!(p, ParameterId::Ambiguity(sv, _) if *sv == reference))
        .expect("reference satellite carries an ambiguity");

    // single-to-double-difference: subtract the reference ambiguity
    // from every other satellite's (spec. `SD2DD`).
    let n_core = solution.params.len() - ambiguity_svs.len();
    let n_dd = others.len();
    let mut t = DMatrix::zeros(n_core + n_dd, solution.params.len());
    for i in 0..n_core {
        t[(i, i)] = 1.0;
    }
    for (row, sv) in others.iter().enumerate() {
        let idx = solution
            .params
            .iter()
            .position(|p| matches!(p, ParameterId::Ambiguity(s, _) if s == sv))
            .expect("tracked ambiguity satellite must be in params");
        t[(n_core + row, idx)] = 1.0;
        t[(n_core + row, ref_idx)] = -1.0;
    }

    let x_dd = &t * &solution.state;
    let p_dd = &t * &solution.cov * t.transpose();

    let float_dd = x_dd.rows(n_core, n_dd).into_owned();
    let cov_dd = p_dd.view((n_core, n_core), (n_dd, n_dd)).into_owned();

    let (fixed_ints, best_score, second_score) = best_two_candidates(&float_dd, &cov_dd);
    let ratio = if best_score > 1e-9 { second_score / best_score } else { f64::INFINITY };

    let fixed_dd = DVector::from_iterator(n_dd, fixed_ints.iter().map(|&v| v as f64));
    let delta = &float_dd - &fixed_dd;

    let q_aa = cov_dd.clone().try_inverse().ok_or(Error::SingularMatrix)?;
    let q_ca = p_dd.view((0, n_core), (n_core, n_dd));
    let correction = q_ca * &q_aa * &delta;

    let mut core = BTreeMap::new();
    for (i, p) in solution.params.iter().take(n_core).enumerate() {
        core.insert(*p, solution.state[i] - correction[i]);
    }

    let mut fixed = BTreeMap::new();
    for (sv, value) in others.iter().zip(fixed_ints.iter()) {
        fixed.insert(*sv, *value);
    }

    info!("ambiguities fixed against reference {reference} (ratio {ratio:.2})");

    Ok(Some(FixedSolution {
        reference,
        fixed,
        core,
        ratio,
    }))
}
