//! C4: Extended Kalman Filter driver.
//!
//! Runs the predict/information-form-update cycle for one epoch on top
//! of the objects [`crate::composer::EquationComposer`] composes, with
//! an outlier-rejection loop around the update (spec. §4.4, grounded in
//! the source's `Compute`/`check`/`reject` sequence): the global
//! weighted residual norm is compared against the position solution's
//! own uncertainty, and if it stands out, the single worst satellite is
//! dropped and the epoch is resolved once more.

use itertools::Itertools;
use log::{debug, warn};
use nalgebra::{Cholesky, DMatrix, DVector};

use gnss_rs::prelude::SV;

use crate::ambiguity::{self, AmbiguityResolutionOpts, FixedSolution};
use crate::composer::{ComposedEquations, EquationComposer, FilterState, RowMeta};
use crate::epoch::{EpochRecord, UsageStatus};
use crate::error::Error;
use crate::types::ParameterId;

/// Tunables for the outlier-rejection loop (spec. §6).
#[derive(Debug, Clone, Copy)]
pub struct KalmanOpts {
    /// Threshold on `sigma / sigma_pos` (the global weighted residual
    /// norm over the position solution's own standard deviation) above
    /// which the epoch's worst satellite is rejected.
    pub reject_sigma: f64,
    /// Minimum number of satellites left after rejection; falling
    /// below this reinitializes the filter for the epoch.
    pub min_required: usize,
}

impl Default for KalmanOpts {
    fn default() -> Self {
        Self {
            reject_sigma: 3.0,
            min_required: 4,
        }
    }
}

/// Snapshot of the filter's most recent valid solution.
#[derive(Debug, Clone)]
pub struct KalmanSolution {
    pub params: Vec<ParameterId>,
    pub state: DVector<f64>,
    pub cov: DMatrix<f64>,
    pub postfit_sigma: f64,
}

impl KalmanSolution {
    fn index_of(&self, p: ParameterId) -> Result<usize, Error> {
        self.params
            .iter()
            .position(|&q| q == p)
            .ok_or(Error::UnknownParameter(p))
    }

    pub fn value(&self, p: ParameterId) -> Result<f64, Error> {
        Ok(self.state[self.index_of(p)?])
    }

    pub fn variance(&self, p: ParameterId) -> Result<f64, Error> {
        let i = self.index_of(p)?;
        Ok(self.cov[(i, i)])
    }
}

/// Drives one [`EquationComposer`] through repeated epochs, keeping the
/// persistent sparse state between calls.
#[derive(Debug)]
pub struct KalmanDriver {
    composer: EquationComposer,
    persistent: FilterState,
    opts: KalmanOpts,
    ambiguity_opts: AmbiguityResolutionOpts,
    solution: Option<KalmanSolution>,
    last_fix: Option<FixedSolution>,
}

impl KalmanDriver {
    pub fn new(composer: EquationComposer, opts: KalmanOpts) -> Self {
        Self {
            composer,
            persistent: FilterState::new(),
            opts,
            ambiguity_opts: AmbiguityResolutionOpts::default(),
            solution: None,
            last_fix: None,
        }
    }

    /// Overrides the ambiguity-resolution tunables (C5), invoked
    /// automatically after every successful epoch.
    pub fn with_ambiguity_opts(mut self, opts: AmbiguityResolutionOpts) -> Self {
        self.ambiguity_opts = opts;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.solution.is_some()
    }

    pub fn solution(&self) -> Option<&KalmanSolution> {
        self.solution.as_ref()
    }

    /// The ambiguity fix produced by the most recent successful `step`,
    /// if enough simultaneous ambiguities were active to attempt one.
    pub fn last_fix(&self) -> Option<&FixedSolution> {
        self.last_fix.as_ref()
    }

    /// Runs one epoch through prepare/compose/predict/update, rejecting
    /// outliers one at a time, attempts an integer ambiguity fix (C5)
    /// on the resulting float solution, and writes postfit residuals
    /// and the usage status back into `epoch`.
    pub fn step(&mut self, epoch: &mut EpochRecord) -> Result<(), Error> {
        self.composer.prepare(epoch);
        let composed = self.composer.compose(epoch)?;

        let (x_prior, p_prior) = if self.persistent.is_empty() {
            self.composer.init_kalman()
        } else {
            self.composer.load_kalman(&self.persistent)
        };

        let x_minus = &composed.phi * &x_prior;
        let p_minus = &composed.phi * &p_prior * composed.phi.transpose() + &composed.q;

        match self.update_with_rejection(&composed, &x_minus, &p_minus) {
            Ok((mut state, cov, used_rows, postfit, sigma)) => {
                mark_usage(epoch, &composed.rows, &used_rows, true);
                self.composer.save_residuals(epoch, &used_rows, &postfit);

                let mut solution = KalmanSolution {
                    params: composed.params.clone(),
                    state: state.clone(),
                    cov: cov.clone(),
                    postfit_sigma: sigma,
                };
                self.last_fix = ambiguity::resolve(&solution, epoch, self.ambiguity_opts)?;
                if let Some(fix) = &self.last_fix {
                    for (param, value) in fix.core.iter() {
                        if let Some(i) = solution.params.iter().position(|p| p == param) {
                            state[i] = *value;
                        }
                    }
                    solution.state = state.clone();
                }

                self.composer.store_kalman(&state, &cov, &mut self.persistent);
                self.solution = Some(solution);
                Ok(())
            },
            Err(err) => {
                warn!("epoch rejected: {err}");
                mark_usage(epoch, &composed.rows, &[], false);
                self.solution = None;
                self.last_fix = None;
                Err(err)
            },
        }
    }

    fn update_with_rejection(
        &self,
        composed: &ComposedEquations,
        x_minus: &DVector<f64>,
        p_minus: &DMatrix<f64>,
    ) -> Result<(DVector<f64>, DMatrix<f64>, Vec<RowMeta>, DVector<f64>, f64), Error> {
        let mut h = composed.h.clone();
        let mut z = composed.z.clone();
        let mut w = composed.w.clone();
        let mut rows = composed.rows.clone();

        let n_sats = satellite_count(&rows);
        if n_sats < self.opts.min_required {
            return Err(Error::InsufficientSatellites(n_sats, self.opts.min_required));
        }

        let (state, cov) = information_update(&h, &z, &w, x_minus, p_minus)?;
        let postfit = &z - &h * &state;

        let sigma = global_sigma(&w, &postfit);
        let sigma_pos = position_sigma(&cov, &composed.params);

        // A single rejection pass: if the global weighted residual norm
        // stands out against the position solution's own uncertainty,
        // the single worst satellite is dropped and the epoch is
        // resolved once more, whatever that second pass yields even if
        // another satellite still looks suspicious. The source this is
        // grounded on has an unconditional `break` right after its
        // first rejection, never iterating to convergence; that
        // single-rejection semantics is preserved deliberately here
        // rather than generalized into a loop (see DESIGN.md).
        if sigma_pos > 0.0 && sigma / sigma_pos > self.opts.reject_sigma {
            if let Some(worst_sv) = worst_offending_satellite(&rows, &postfit) {
                debug!(
                    "rejecting satellite {worst_sv} (sigma/sigma_pos {:.2} > {})",
                    sigma / sigma_pos,
                    self.opts.reject_sigma
                );
                let (new_h, new_z, new_w, new_rows) = drop_satellite(&h, &z, &w, &rows, worst_sv);
                h = new_h;
                z = new_z;
                w = new_w;
                rows = new_rows;

                let n_sats = satellite_count(&rows);
                if n_sats < self.opts.min_required {
                    return Err(Error::InsufficientSatellites(n_sats, self.opts.min_required));
                }

                let (state, cov) = information_update(&h, &z, &w, x_minus, p_minus)?;
                let postfit = &z - &h * &state;
                let sigma = weighted_sigma(&w, &postfit, rows.len(), composed.params.len());
                return Ok((state, cov, rows, postfit, sigma));
            }
        }

        let sigma = weighted_sigma(&w, &postfit, rows.len(), composed.params.len());
        Ok((state, cov, rows, postfit, sigma))
    }
}

/// Number of distinct satellites carrying at least one row.
fn satellite_count(rows: &[RowMeta]) -> usize {
    rows.iter().map(|r| r.sv).collect::<std::collections::BTreeSet<_>>().len()
}

/// Global weighted residual norm, `sqrt(r^T W r)`, unnormalized by
/// degrees of freedom (spec. `sigma`).
fn global_sigma(w: &DMatrix<f64>, postfit: &DVector<f64>) -> f64 {
    let weighted_sq: f64 = (0..postfit.len()).map(|i| w[(i, i)] * postfit[i] * postfit[i]).sum();
    weighted_sq.sqrt()
}

/// Position solution's own standard deviation, `sqrt(var(dx) + var(dy)
/// + var(dz))` (spec. `sigma_pos`).
fn position_sigma(cov: &DMatrix<f64>, params: &[ParameterId]) -> f64 {
    [ParameterId::Dx, ParameterId::Dy, ParameterId::Dz]
        .iter()
        .filter_map(|p| params.iter().position(|q| q == p))
        .map(|i| cov[(i, i)])
        .sum::<f64>()
        .sqrt()
}

/// Picks the satellite whose worst row (the last measurement type in
/// `meas_order` present for it, i.e. phase when both code and phase are
/// configured, since dense rows are laid out type-major) has the
/// largest absolute postfit residual.
fn worst_offending_satellite(rows: &[RowMeta], postfit: &DVector<f64>) -> Option<SV> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| (row.sv, i))
        .into_group_map()
        .into_iter()
        .map(|(sv, idxs)| {
            let representative = idxs.into_iter().max().expect("group is non-empty");
            (sv, postfit[representative].abs())
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(sv, _)| sv)
}

/// Removes every row belonging to `sv`.
fn drop_satellite(
    h: &DMatrix<f64>,
    z: &DVector<f64>,
    w: &DMatrix<f64>,
    rows: &[RowMeta],
    sv: SV,
) -> (DMatrix<f64>, DVector<f64>, DMatrix<f64>, Vec<RowMeta>) {
    let keep: Vec<usize> = rows.iter().enumerate().filter(|(_, r)| r.sv != sv).map(|(i, _)| i).collect();
    let new_h = DMatrix::from_fn(keep.len(), h.ncols(), |i, j| h[(keep[i], j)]);
    let new_z = DVector::from_fn(keep.len(), |i, _| z[keep[i]]);
    let new_w = DMatrix::from_fn(keep.len(), keep.len(), |i, j| w[(keep[i], keep[j])]);
    let new_rows = keep.iter().map(|&i| rows[i]).collect();
    (new_h, new_z, new_w, new_rows)
}

fn weighted_sigma(w: &DMatrix<f64>, postfit: &DVector<f64>, n_rows: usize, n_params: usize) -> f64 {
    let dof = n_rows.saturating_sub(n_params).max(1);
    let weighted_sq: f64 = (0..n_rows).map(|i| w[(i, i)] * postfit[i] * postfit[i]).sum();
    (weighted_sq / dof as f64).sqrt()
}

fn information_update(
    h: &DMatrix<f64>,
    z: &DVector<f64>,
    w: &DMatrix<f64>,
    x_minus: &DVector<f64>,
    p_minus: &DMatrix<f64>,
) -> Result<(DVector<f64>, DMatrix<f64>), Error> {
    let p_minus_inv = p_minus.clone().try_inverse().ok_or(Error::SingularMatrix)?;
    let ht_w = h.transpose() * w;
    let info = &ht_w * h + &p_minus_inv;

    let chol = Cholesky::new(info.clone()).ok_or(Error::SingularMatrix)?;
    let cov = chol.inverse();

    let rhs = &ht_w * z + &p_minus_inv * x_minus;
    let state = &cov * rhs;

    Ok((state, cov))
}

fn mark_usage(epoch: &mut EpochRecord, all_rows: &[RowMeta], used_rows: &[RowMeta], epoch_is_valid: bool) {
    let used_svs: std::collections::BTreeSet<_> = used_rows.iter().map(|r| r.sv).collect();
    let touched_svs: std::collections::BTreeSet<_> = all_rows.iter().map(|r| r.sv).collect();
    for sv in touched_svs {
        if let Some(record) = epoch.satellites.get_mut(&sv) {
            record.usage = if !epoch_is_valid {
                UsageStatus::NotEnoughData
            } else if used_svs.contains(&sv) {
                UsageStatus::UsedInPVT
            } else {
                UsageStatus::RejectedByCsDetector
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::EquationComposer;
    use crate::contributors::{PositionContributor, PositionDynamics};
    use crate::epoch::SatelliteRecord;
    use crate::types::MeasurementType;
    use gnss_rs::prelude::{Constellation, SV};
    use hifitime::Epoch;
    use nalgebra::Vector3;

    fn epoch_with_four_satellites() -> EpochRecord {
        let mut e = EpochRecord::new(Epoch::from_gpst_seconds(0.0), Vector3::new(6378137.0, 0.0, 0.0));
        for (prn, elev, az) in [(1, 80.0, 0.0), (2, 60.0, 90.0), (3, 45.0, 180.0), (4, 30.0, 270.0)] {
            let record = SatelliteRecord::new(elev, az, 1).with_prefit(MeasurementType::PrefitCodeIonoFree, 1.0);
            e.insert(SV::new(Constellation::GPS, prn), record);
        }
        e
    }

    #[test]
    fn step_with_enough_satellites_produces_a_solution() {
        let composer = EquationComposer::new(
            vec![Box::new(PositionContributor::new(PositionDynamics::Static, 100.0))],
            vec![MeasurementType::PrefitCodeIonoFree],
        );
        let mut driver = KalmanDriver::new(composer, KalmanOpts::default());
        let mut epoch = epoch_with_four_satellites();

        driver.step(&mut epoch).expect("should solve");
        assert!(driver.is_valid());
        let solution = driver.solution().unwrap();
        assert!(solution.value(ParameterId::Dx).is_ok());
    }

    #[test]
    fn step_with_too_few_satellites_is_rejected() {
        let composer = EquationComposer::new(
            vec![Box::new(PositionContributor::new(PositionDynamics::Static, 100.0))],
            vec![MeasurementType::PrefitCodeIonoFree],
        );
        let mut driver = KalmanDriver::new(composer, KalmanOpts::default());
        let mut epoch = EpochRecord::new(Epoch::from_gpst_seconds(0.0), Vector3::new(6378137.0, 0.0, 0.0));
        let record = SatelliteRecord::new(80.0, 0.0, 1).with_prefit(MeasurementType::PrefitCodeIonoFree, 1.0);
        epoch.insert(SV::new(Constellation::GPS, 1), record);

        let err = driver.step(&mut epoch).unwrap_err();
        assert!(matches!(err, Error::InsufficientSatellites(1, 4)));
        assert!(!driver.is_valid());
    }

    fn epoch_with_n_satellites(n: u8) -> EpochRecord {
        let mut e = EpochRecord::new(Epoch::from_gpst_seconds(0.0), Vector3::new(6378137.0, 0.0, 0.0));
        for prn in 1..=n {
            let az = (prn as f64) * (360.0 / n as f64);
            let record = SatelliteRecord::new(45.0, az, 1).with_prefit(MeasurementType::PrefitCodeIonoFree, 1.0);
            e.insert(SV::new(Constellation::GPS, prn as u8), record);
        }
        e
    }

    #[rstest::rstest]
    #[case(4, true)]
    #[case(5, true)]
    #[case(6, true)]
    #[case(3, false)]
    fn step_accepts_or_rejects_by_satellite_count(#[case] n: u8, #[case] should_solve: bool) {
        let composer = EquationComposer::new(
            vec![Box::new(PositionContributor::new(PositionDynamics::Static, 100.0))],
            vec![MeasurementType::PrefitCodeIonoFree],
        );
        let mut driver = KalmanDriver::new(composer, KalmanOpts::default());
        let mut epoch = epoch_with_n_satellites(n);

        assert_eq!(driver.step(&mut epoch).is_ok(), should_solve);
        assert_eq!(driver.is_valid(), should_solve);
    }
}
