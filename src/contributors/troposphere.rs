use nalgebra::{DMatrix, DVector};

use gnss_rs::prelude::SV;

use crate::epoch::EpochRecord;
use crate::stochastic::{StochasticModel, TropoRandomWalk};
use crate::types::{MeasurementType, ParameterId};

use super::Contributor;

/// Cosecant-style elevation mapping function,
/// `m(elev) = 1 / sin(elev)`, converting zenith wet delay to slant
/// delay (spec. GLOSSARY "Mapping function"). A dedicated mapping-
/// function implementation lives upstream in the real pipeline; this
/// simple form is used here since mapping functions are explicitly out
/// of scope (spec. §1).
fn mapping_function(elevation_deg: f64) -> f64 {
    let el = elevation_deg.to_radians().max(1.0_f64.to_radians());
    1.0 / el.sin()
}

/// C2 contributor owning the zenith wet tropospheric delay for one
/// receiver/source. Column pattern: the mapping function value,
/// replicated across every measurement-type block.
#[derive(Debug)]
pub struct TroposphereContributor {
    model: TropoRandomWalk,
}

impl TroposphereContributor {
    pub fn new(source: u16, spectral_density: f64, initial_variance: f64) -> Self {
        Self {
            model: TropoRandomWalk::new(source, spectral_density, initial_variance),
        }
    }
}

impl Contributor for TroposphereContributor {
    fn prepare(&mut self, epoch: &EpochRecord) {
        self.model.prepare(None, epoch.t);
    }

    fn parameters(&self) -> Vec<ParameterId> {
        vec![ParameterId::WetZtd(self.model.source())]
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
                    h[(row, col_start)] = mapping_function(record.elevation_deg);
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
