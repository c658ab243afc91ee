use nalgebra::{DMatrix, DVector};

use gnss_rs::prelude::SV;

use crate::epoch::EpochRecord;
use crate::geodesy::line_of_sight_ecef;
use crate::stochastic::{Constant, PhiQ, RandomWalk, StochasticModel, WhiteNoise};
use crate::types::{MeasurementType, ParameterId};

use super::Contributor;

/// Stochastic model selection for the three position components, as
/// configured by `dynamics` (spec. §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PositionDynamics {
    Static,
    Kinematic,
    RandomWalk,
}

#[derive(Debug)]
enum AxisModel {
    Static(Constant),
    Kinematic(WhiteNoise),
    RandomWalk(RandomWalk),
}

impl AxisModel {
    fn new(dynamics: PositionDynamics, sigma: f64) -> Self {
        match dynamics {
            PositionDynamics::Static => Self::Static(Constant {
                initial_variance: sigma.powi(2),
            }),
            PositionDynamics::Kinematic => Self::Kinematic(WhiteNoise::new(sigma)),
            PositionDynamics::RandomWalk => {
                Self::RandomWalk(RandomWalk::new(sigma.powi(2), sigma.powi(2)))
            },
        }
    }

    fn model(&self) -> &dyn StochasticModel {
        match self {
            Self::Static(m) => m,
            Self::Kinematic(m) => m,
            Self::RandomWalk(m) => m,
        }
    }

    fn prepare(&mut self, t: hifitime::Epoch) {
        match self {
            Self::Static(m) => m.prepare(None, t),
            Self::Kinematic(m) => m.prepare(None, t),
            Self::RandomWalk(m) => m.prepare(None, t),
        }
    }
}

/// C2 contributor owning the three receiver position components
/// (dx, dy, dz). Column pattern: the line-of-sight unit vector,
/// replicated identically across every measurement-type block (spec.
/// §4.2 table).
#[derive(Debug)]
pub struct PositionContributor {
    axes: [AxisModel; 3],
}

impl PositionContributor {
    pub fn new(dynamics: PositionDynamics, sigma: f64) -> Self {
        Self {
            axes: [
                AxisModel::new(dynamics, sigma),
                AxisModel::new(dynamics, sigma),
                AxisModel::new(dynamics, sigma),
            ],
        }
    }
}

impl Contributor for PositionContributor {
    fn prepare(&mut self, epoch: &EpochRecord) {
        for axis in self.axes.iter_mut() {
            axis.prepare(epoch.t);
        }
    }

    fn parameters(&self) -> Vec<ParameterId> {
        vec![ParameterId::Dx, ParameterId::Dy, ParameterId::Dz]
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
                let row = block * sv_order.len() + i;
                if let Some(record) = epoch.satellites.get(sv) {
                    let los = line_of_sight_ecef(
                        epoch.nominal_position,
                        record.elevation_deg,
                        record.azimuth_deg,
                    );
                    h[(row, col_start)] = los.x;
                    h[(row, col_start + 1)] = los.y;
                    h[(row, col_start + 2)] = los.z;
                }
            }
        }
    }

    fn update_phi(&self, phi: &mut DMatrix<f64>, offset: usize) {
        for (i, axis) in self.axes.iter().enumerate() {
            phi[(offset + i, offset + i)] = axis.model().phi_q().phi;
        }
    }

    fn update_q(&self, q: &mut DMatrix<f64>, offset: usize) {
        for (i, axis) in self.axes.iter().enumerate() {
            q[(offset + i, offset + i)] = axis.model().phi_q().q;
        }
    }

    fn init_state(&self, state: &mut DVector<f64>, cov: &mut DMatrix<f64>, offset: usize) {
        for (i, axis) in self.axes.iter().enumerate() {
            state[offset + i] = 0.0;
            cov[(offset + i, offset + i)] = axis.model().initial_variance();
        }
    }
}
