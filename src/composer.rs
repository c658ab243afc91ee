//! C3: equation composer.
//!
//! Turns one [`EpochRecord`] plus the active contributor list into the
//! dense linear-algebra objects the Kalman driver needs (`H`, `z`, `W`,
//! `Phi`, `Q`), and owns the persistent-state bridge (`init_kalman`,
//! `load_kalman`, `store_kalman`) that lets the sparse parameter set
//! grow and shrink from one epoch to the next (spec. §4.2-§4.4).

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};

use gnss_rs::prelude::SV;

use crate::contributors::Contributor;
use crate::epoch::EpochRecord;
use crate::error::Error;
use crate::types::{MeasurementType, ParameterId};

/// Persistent, sparse Kalman state carried across epochs. Keyed by
/// [`ParameterId`] rather than a fixed index so parameters can appear
/// and disappear as satellites/arcs come and go (spec. §3).
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    values: BTreeMap<ParameterId, f64>,
    variances: BTreeMap<ParameterId, f64>,
    covariances: BTreeMap<(ParameterId, ParameterId), f64>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    fn pair_key(a: ParameterId, b: ParameterId) -> (ParameterId, ParameterId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    pub fn value(&self, p: &ParameterId) -> Option<f64> {
        self.values.get(p).copied()
    }

    pub fn variance(&self, p: &ParameterId) -> Option<f64> {
        self.variances.get(p).copied()
    }

    pub fn covariance(&self, a: ParameterId, b: ParameterId) -> Option<f64> {
        self.covariances.get(&Self::pair_key(a, b)).copied()
    }

    pub fn contains(&self, p: &ParameterId) -> bool {
        self.values.contains_key(p)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.variances.clear();
        self.covariances.clear();
    }
}

/// One row of a composed equation set: which measurement type and
/// satellite it came from, needed by [`EquationComposer::save_residuals`]
/// to write postfit values back.
#[derive(Debug, Clone, Copy)]
pub struct RowMeta {
    pub ty: MeasurementType,
    pub sv: SV,
}

/// Dense linear-algebra objects composed for one epoch, already
/// restricted to rows with an actual measurement and columns with an
/// active parameter.
#[derive(Debug)]
pub struct ComposedEquations {
    pub h: DMatrix<f64>,
    pub z: DVector<f64>,
    pub w: DMatrix<f64>,
    pub phi: DMatrix<f64>,
    pub q: DMatrix<f64>,
    pub rows: Vec<RowMeta>,
    pub params: Vec<ParameterId>,
}

/// Drives the contributor list through the per-epoch composition
/// contract.
#[derive(Debug)]
pub struct EquationComposer {
    contributors: Vec<Box<dyn Contributor>>,
    meas_order: Vec<MeasurementType>,
}

impl EquationComposer {
    pub fn new(contributors: Vec<Box<dyn Contributor>>, meas_order: Vec<MeasurementType>) -> Self {
        Self {
            contributors,
            meas_order,
        }
    }

    /// Lets every contributor observe the epoch before any of the other
    /// methods below are called.
    pub fn prepare(&mut self, epoch: &EpochRecord) {
        for c in self.contributors.iter_mut() {
            c.prepare(epoch);
        }
    }

    /// Active parameter set for the just-`prepare`d epoch, in the fixed
    /// order contributors are registered (deterministic: each
    /// contributor's own `parameters()` is itself deterministically
    /// ordered).
    pub fn active_parameters(&self) -> Vec<ParameterId> {
        self.contributors.iter().flat_map(|c| c.parameters()).collect()
    }

    fn contributor_offsets(&self) -> Vec<(usize, usize)> {
        let mut offsets = Vec::with_capacity(self.contributors.len());
        let mut cursor = 0;
        for c in self.contributors.iter() {
            let len = c.parameters().len();
            offsets.push((cursor, len));
            cursor += len;
        }
        offsets
    }

    fn dense_row_count(&self, sv_order: &[SV]) -> usize {
        self.meas_order.len() * sv_order.len()
    }

    fn row_meta(&self, sv_order: &[SV]) -> Vec<RowMeta> {
        let mut rows = Vec::with_capacity(self.dense_row_count(sv_order));
        for ty in self.meas_order.iter() {
            for sv in sv_order.iter() {
                rows.push(RowMeta { ty: *ty, sv: *sv });
            }
        }
        rows
    }

    fn dense_h(&self, epoch: &EpochRecord, sv_order: &[SV], dim: usize) -> DMatrix<f64> {
        let mut h = DMatrix::zeros(self.dense_row_count(sv_order), dim);
        for (c, (offset, _len)) in self.contributors.iter().zip(self.contributor_offsets()) {
            c.update_h(epoch, &self.meas_order, sv_order, &mut h, offset);
        }
        h
    }

    fn dense_z(&self, epoch: &EpochRecord, rows: &[RowMeta]) -> DVector<f64> {
        DVector::from_iterator(
            rows.len(),
            rows.iter().map(|row| {
                epoch
                    .satellites
                    .get(&row.sv)
                    .and_then(|record| record.prefit.get(&row.ty))
                    .copied()
                    .unwrap_or(0.0)
            }),
        )
    }

    fn dense_weight(&self, epoch: &EpochRecord, rows: &[RowMeta]) -> Result<DMatrix<f64>, Error> {
        let mut w = DMatrix::zeros(rows.len(), rows.len());
        for (i, row) in rows.iter().enumerate() {
            let record = epoch.satellites.get(&row.sv);
            let weight = match record.and_then(|r| r.weight) {
                Some(custom) => custom,
                None => row
                    .ty
                    .default_weight_factor()
                    .ok_or(Error::UnknownMeasurementType(row.ty))?,
            };
            w[(i, i)] = weight;
        }
        Ok(w)
    }

    /// Composes `H`, `z`, `W` and `Phi`, `Q` for the current,
    /// already-`prepare`d epoch.
    ///
    /// Rows are always laid out densely, `#satellites * #measurement
    /// types`, one block per measurement type in `meas_order`: a
    /// satellite missing a given measurement type still occupies its
    /// row, with a zero prefit and a zero line-of-sight (the weight
    /// for that row is still a real weight, not zero, so the solver
    /// never divides a zero row by a zero weight).
    pub fn compose(&self, epoch: &EpochRecord) -> Result<ComposedEquations, Error> {
        let sv_order = epoch.sv_list();
        let params = self.active_parameters();
        let dim = params.len();

        let rows = self.row_meta(&sv_order);
        let h = self.dense_h(epoch, &sv_order, dim);
        let z = self.dense_z(epoch, &rows);
        let w = self.dense_weight(epoch, &rows)?;

        let mut phi = DMatrix::identity(dim, dim);
        let mut q = DMatrix::zeros(dim, dim);
        for (c, (offset, _len)) in self.contributors.iter().zip(self.contributor_offsets()) {
            c.update_phi(&mut phi, offset);
            c.update_q(&mut q, offset);
        }

        Ok(ComposedEquations {
            h,
            z,
            w,
            phi,
            q,
            rows,
            params,
        })
    }

    /// Cold-start state/covariance: every active parameter initialized
    /// by its owning contributor, no cross-covariance.
    pub fn init_kalman(&self) -> (DVector<f64>, DMatrix<f64>) {
        let dim = self.active_parameters().len();
        let mut state = DVector::zeros(dim);
        let mut cov = DMatrix::zeros(dim, dim);
        for (c, (offset, _len)) in self.contributors.iter().zip(self.contributor_offsets()) {
            c.init_state(&mut state, &mut cov, offset);
        }
        (state, cov)
    }

    /// Restores whatever of the active parameter set the persistent
    /// store already knows about (value, variance, cross-covariance),
    /// and lets each contributor initialize the remainder (spec. §3
    /// "reappearing restores persistent state").
    pub fn load_kalman(&self, persistent: &FilterState) -> (DVector<f64>, DMatrix<f64>) {
        let (mut state, mut cov) = self.init_kalman();
        let params = self.active_parameters();

        for (i, p) in params.iter().enumerate() {
            if let Some(v) = persistent.value(p) {
                state[i] = v;
            }
            if let Some(var) = persistent.variance(p) {
                cov[(i, i)] = var;
            }
        }
        for (i, pi) in params.iter().enumerate() {
            for (j, pj) in params.iter().enumerate().skip(i + 1) {
                if let Some(c) = persistent.covariance(*pi, *pj) {
                    cov[(i, j)] = c;
                    cov[(j, i)] = c;
                }
            }
        }

        (state, cov)
    }

    /// Writes the updated state/covariance back into the persistent
    /// store, keyed by parameter identity so next epoch's (possibly
    /// different) active set can restore from it.
    pub fn store_kalman(&self, state: &DVector<f64>, cov: &DMatrix<f64>, persistent: &mut FilterState) {
        persistent.clear();
        let params = self.active_parameters();
        for (i, p) in params.iter().enumerate() {
            persistent.values.insert(*p, state[i]);
            persistent.variances.insert(*p, cov[(i, i)]);
        }
        for (i, pi) in params.iter().enumerate() {
            for (j, pj) in params.iter().enumerate().skip(i + 1) {
                persistent
                    .covariances
                    .insert(FilterState::pair_key(*pi, *pj), cov[(i, j)]);
            }
        }
    }

    /// Writes postfit residuals back into the epoch's per-satellite
    /// records (spec. §4.4 `saveResiduals`).
    pub fn save_residuals(&self, epoch: &mut EpochRecord, rows: &[RowMeta], postfit: &DVector<f64>) {
        for (i, row) in rows.iter().enumerate() {
            if let Some(record) = epoch.satellites.get_mut(&row.sv) {
                record.postfit.insert(row.ty.as_postfit(), postfit[i]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contributors::{PositionContributor, PositionDynamics};
    use crate::epoch::SatelliteRecord;
    use gnss_rs::prelude::Constellation;
    use hifitime::Epoch;
    use nalgebra::Vector3;

    fn single_sv_epoch() -> EpochRecord {
        let mut e = EpochRecord::new(Epoch::from_gpst_seconds(0.0), Vector3::new(6378137.0, 0.0, 0.0));
        let record = SatelliteRecord::new(45.0, 90.0, 1).with_prefit(MeasurementType::PrefitCodeIonoFree, 12.3);
        e.insert(SV::new(Constellation::GPS, 1), record);
        e
    }

    #[test]
    fn compose_fills_dense_rows_for_every_sat_and_measurement_type() {
        let mut composer = EquationComposer::new(
            vec![Box::new(PositionContributor::new(PositionDynamics::Static, 100.0))],
            vec![MeasurementType::PrefitCodeIonoFree, MeasurementType::PrefitPhaseIonoFree],
        );
        let epoch = single_sv_epoch();
        composer.prepare(&epoch);
        let composed = composer.compose(&epoch).unwrap();

        // one satellite times two measurement types: the row count never
        // shrinks just because the phase prefit was never filled in.
        assert_eq!(composed.rows.len(), 2);
        assert_eq!(composed.h.nrows(), 2);
        assert_eq!(composed.z[0], 12.3);
        assert_eq!(composed.z[1], 0.0);
        assert_eq!(composed.params.len(), 3);
    }

    #[test]
    fn store_then_load_round_trips_state() {
        let mut composer = EquationComposer::new(
            vec![Box::new(PositionContributor::new(PositionDynamics::Static, 100.0))],
            vec![MeasurementType::PrefitCodeIonoFree],
        );
        let epoch = single_sv_epoch();
        composer.prepare(&epoch);

        let mut persistent = FilterState::new();
        let (state, cov) = composer.init_kalman();
        composer.store_kalman(&state, &cov, &mut persistent);

        assert_eq!(persistent.value(&ParameterId::Dx), Some(0.0));
        let (restored, _restored_cov) = composer.load_kalman(&persistent);
        assert_eq!(restored, state);
    }
}
