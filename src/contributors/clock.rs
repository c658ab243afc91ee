use nalgebra::{DMatrix, DVector};

use gnss_rs::prelude::{Constellation, SV};

use crate::epoch::EpochRecord;
use crate::stochastic::{StochasticModel, WhiteNoise};
use crate::types::{MeasurementType, ParameterId};

use super::Contributor;

/// C2 contributor owning the receiver clock bias against `reference`
/// (the time-scale every other system's inter-system bias is
/// differenced against), reset to white noise each epoch (spec. §3
/// lifecycles). Column pattern: `1` for code rows and `1` for phase
/// rows alike — the receiver clock affects every measurement of this
/// receiver identically.
#[derive(Debug)]
pub struct ReceiverClockContributor {
    reference: Constellation,
    model: WhiteNoise,
}

impl ReceiverClockContributor {
    pub fn new(reference: Constellation, sigma: f64) -> Self {
        Self {
            reference,
            model: WhiteNoise::new(sigma),
        }
    }
}

impl Contributor for ReceiverClockContributor {
    fn prepare(&mut self, _epoch: &EpochRecord) {}

    fn parameters(&self) -> Vec<ParameterId> {
        vec![ParameterId::ClockBias(self.reference)]
    }

    fn update_h(
        &self,
        epoch: &EpochRecord,
        meas_order: &[MeasurementType],
        sv_order: &[SV],
        h: &mut DMatrix<f64>,
        col_start: usize,
    ) {
        for (block, _ty) in meas_order.iter().enumerate() {
            for (i, sv) in sv_order.iter().enumerate() {
                if epoch.satellites.contains_key(sv) {
                    h[(block * sv_order.len() + i, col_start)] = 1.0;
                }
            }
        }
    }

    fn update_phi(&self, phi: &mut DMatrix<f64>, offset: usize) {
        phi[(offset, offset)] = self.model.phi_q().phi;
    }

    fn update_q(&self, q: &mut DMatrix<f64>, offset: usize) {
        q[(offset, offset)] = self.model.phi_q().q;
    }

    fn init_state(&self, state: &mut DVector<f64>, cov: &mut DMatrix<f64>, offset: usize) {
        state[offset] = 0.0;
        cov[(offset, offset)] = self.model.initial_variance();
    }
}

/// C2 contributor owning one inter-system clock bias per non-reference
/// constellation (e.g. `cdt_GLO` when GPS is the time reference). Column
/// pattern: `1` only in rows whose satellite belongs to that
/// constellation.
#[derive(Debug)]
pub struct InterSystemBiasContributor {
    constellation: Constellation,
    model: WhiteNoise,
}

impl InterSystemBiasContributor {
    pub fn new(constellation: Constellation, sigma: f64) -> Self {
        Self {
            constellation,
            model: WhiteNoise::new(sigma),
        }
    }
}

impl Contributor for InterSystemBiasContributor {
    fn prepare(&mut self, _epoch: &EpochRecord) {}

    fn parameters(&self) -> Vec<ParameterId> {
        vec![ParameterId::ClockBias(self.constellation)]
    }

    fn update_h(
        &self,
        epoch: &EpochRecord,
        meas_order: &[MeasurementType],
        sv_order: &[SV],
        h: &mut DMatrix<f64>,
        col_start: usize,
    ) {
        for (block, _ty) in meas_order.iter().enumerate() {
            for (i, sv) in sv_order.iter().enumerate() {
                if sv.constellation == self.constellation && epoch.satellites.contains_key(sv) {
                    h[(block * sv_order.len() + i, col_start)] = 1.0;
                }
            }
        }
    }

    fn update_phi(&self, phi: &mut DMatrix<f64>, offset: usize) {
        phi[(offset, offset)] = self.model.phi_q().phi;
    }

    fn update_q(&self, q: &mut DMatrix<f64>, offset: usize) {
        q[(offset, offset)] = self.model.phi_q().q;
    }

    fn init_state(&self, state: &mut DVector<f64>, cov: &mut DMatrix<f64>, offset: usize) {
        state[offset] = 0.0;
        cov[(offset, offset)] = self.model.initial_variance();
    }
}

/// C2 contributor owning one inter-frequency bias per GLONASS FDMA
/// frequency channel. Column pattern: `1` in rows whose satellite
/// matches the configured channel.
#[derive(Debug)]
pub struct InterFrequencyBiasContributor {
    channel: i8,
    matching: Vec<SV>,
    model: WhiteNoise,
}

impl InterFrequencyBiasContributor {
    pub fn new(channel: i8, sigma: f64) -> Self {
        Self {
            channel,
            matching: Vec::new(),
            model: WhiteNoise::new(sigma),
        }
    }

    /// Satellites known to operate on this channel, refreshed from the
    /// epoch's GLONASS satellites each `prepare` call by the caller
    /// supplying the channel map (upstream collaborator concern, out of
    /// scope here: tests and callers pre-populate via `set_matching`).
    pub fn set_matching(&mut self, svs: Vec<SV>) {
        self.matching = svs;
    }
}

impl Contributor for InterFrequencyBiasContributor {
    fn prepare(&mut self, _epoch: &EpochRecord) {}

    fn parameters(&self) -> Vec<ParameterId> {
        vec![ParameterId::InterFrequencyBias(self.channel)]
    }

    fn update_h(
        &self,
        epoch: &EpochRecord,
        meas_order: &[MeasurementType],
        sv_order: &[SV],
        h: &mut DMatrix<f64>,
        col_start: usize,
    ) {
        for (block, _ty) in meas_order.iter().enumerate() {
            for (i, sv) in sv_order.iter().enumerate() {
                if self.matching.contains(sv) && epoch.satellites.contains_key(sv) {
                    h[(block * sv_order.len() + i, col_start)] = 1.0;
                }
            }
        }
    }

    fn update_phi(&self, phi: &mut DMatrix<f64>, offset: usize) {
        phi[(offset, offset)] = self.model.phi_q().phi;
    }

    fn update_q(&self, q: &mut DMatrix<f64>, offset: usize) {
        q[(offset, offset)] = self.model.phi_q().q;
    }

    fn init_state(&self, state: &mut DVector<f64>, cov: &mut DMatrix<f64>, offset: usize) {
        state[offset] = 0.0;
        cov[(offset, offset)] = self.model.initial_variance();
    }
}
