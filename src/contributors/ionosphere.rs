use nalgebra::{DMatrix, DVector};

use gnss_rs::prelude::SV;

use crate::epoch::EpochRecord;
use crate::stochastic::{RandomWalk, StochasticModel};
use crate::types::{MeasurementType, ParameterId};

use super::Contributor;

/// Klobuchar-style L1/L2 frequency ratio, `gamma = (f1/f2)^2`, used to
/// scale the L2 column relative to L1 (spec. §4.2 table).
const GAMMA_GPS_L1_L2: f64 = (1575.42 / 1227.60) * (1575.42 / 1227.60);

/// C2 contributor owning the per-satellite slant ionospheric delay,
/// needed only when raw (non iono-free) L1/L2 measurement types are in
/// use: the combination otherwise cancels first-order ionosphere by
/// construction and this contributor is omitted. Column pattern:
/// `+1` on L1 phase/code rows, `-gamma` on L2 rows, in the matching
/// satellite's row only.
#[derive(Debug)]
pub struct IonosphereContributor {
    sv: SV,
    model: RandomWalk,
}

impl IonosphereContributor {
    pub fn new(sv: SV, spectral_density: f64, initial_variance: f64) -> Self {
        Self {
            sv,
            model: RandomWalk::new(spectral_density, initial_variance),
        }
    }
}

impl Contributor for IonosphereContributor {
    fn prepare(&mut self, epoch: &EpochRecord) {
        self.model.prepare(Some(self.sv), epoch.t);
    }

    fn parameters(&self) -> Vec<ParameterId> {
        vec![ParameterId::Ionosphere(self.sv)]
    }

    fn update_h(
        &self,
        epoch: &EpochRecord,
        meas_order: &[MeasurementType],
        sv_order: &[SV],
        h: &mut DMatrix<f64>,
        col_start: usize,
    ) {
        let Some(i) = sv_order.iter().position(|sv| *sv == self.sv) else {
            return;
        };
        if !epoch.satellites.contains_key(&self.sv) {
            return;
        }
        for (block, ty) in meas_order.iter().enumerate() {
            let row = block * sv_order.len() + i;
            match ty {
                MeasurementType::PrefitCodeL1 | MeasurementType::PrefitPhaseL1 => {
                    h[(row, col_start)] = 1.0;
                },
                MeasurementType::PrefitCodeL2 | MeasurementType::PrefitPhaseL2 => {
                    h[(row, col_start)] = -GAMMA_GPS_L1_L2;
                },
                _ => {},
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
