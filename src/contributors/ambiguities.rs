use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};

use gnss_rs::prelude::SV;

use crate::epoch::EpochRecord;
use crate::stochastic::{PhaseAmbiguity, StochasticModel};
use crate::types::{ArcId, MeasurementType, ParameterId};

use super::Contributor;

/// GPS L1/L2 iono-free carrier wavelength (meters), the combination this
/// estimator carries ambiguities for (spec. §4.3: a single generic
/// ambiguity per arc rather than one per raw frequency).
pub const LAMBDA_IONO_FREE: f64 = 0.0147376279;

/// C2 contributor owning one carrier-phase ambiguity per active
/// `(satellite, arc)` pair. Column pattern: `lambda` in the matching
/// satellite's phase-block row, zero elsewhere (spec. §4.2 table).
///
/// Lifecycle (spec. §3): a new `(sv, arc)` entry is created the first
/// time this contributor observes it in an epoch; an entry is dropped
/// from the active set once its satellite no longer appears in the
/// epoch; a reappearing `(sv, arc)` with the same arc id restores the
/// existing model rather than reinitializing it.
#[derive(Debug)]
pub struct AmbiguitiesContributor {
    lambda: f64,
    initial_variance: f64,
    active: BTreeMap<(SV, ArcId), PhaseAmbiguity>,
}

impl AmbiguitiesContributor {
    pub fn new(lambda: f64, initial_variance: f64) -> Self {
        Self {
            lambda,
            initial_variance,
            active: BTreeMap::new(),
        }
    }
}

impl Contributor for AmbiguitiesContributor {
    fn prepare(&mut self, epoch: &EpochRecord) {
        let mut next = BTreeMap::new();
        for (sv, record) in epoch.satellites.iter() {
            let key = (*sv, record.arc_id);
            let mut model = self
                .active
                .remove(&key)
                .unwrap_or_else(|| PhaseAmbiguity::new(self.initial_variance));
            model.mark_slip(record.cycle_slip);
            next.insert(key, model);
        }
        self.active = next;
    }

    fn parameters(&self) -> Vec<ParameterId> {
        self.active
            .keys()
            .map(|(sv, arc)| ParameterId::Ambiguity(*sv, *arc))
            .collect()
    }

    fn ambiguity_set(&self) -> Vec<(SV, ArcId)> {
        self.active.keys().copied().collect()
    }

    fn update_h(
        &self,
        epoch: &EpochRecord,
        meas_order: &[MeasurementType],
        sv_order: &[SV],
        h: &mut DMatrix<f64>,
        col_start: usize,
    ) {
        for (col, (sv, _arc)) in self.active.keys().enumerate() {
            let Some(i) = sv_order.iter().position(|s| s == sv) else {
                continue;
            };
            if !epoch.satellites.contains_key(sv) {
                continue;
            }
            for (block, ty) in meas_order.iter().enumerate() {
                if ty.is_phase() {
                    h[(block * sv_order.len() + i, col_start + col)] = self.lambda;
                }
            }
        }
    }

    fn update_phi(&self, phi: &mut DMatrix<f64>, offset: usize) {
        for (i, model) in self.active.values().enumerate() {
            phi[(offset + i, offset + i)] = model.phi_q().phi;
        }
    }

    fn update_q(&self, q: &mut DMatrix<f64>, offset: usize) {
        for (i, model) in self.active.values().enumerate() {
            q[(offset + i, offset + i)] = model.phi_q().q;
        }
    }

    fn init_state(&self, state: &mut DVector<f64>, cov: &mut DMatrix<f64>, offset: usize) {
        for (i, model) in self.active.values().enumerate() {
            state[offset + i] = 0.0;
            cov[(offset + i, offset + i)] = model.initial_variance();
        }
    }
}
