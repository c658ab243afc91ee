//! C2: equation contributors.
//!
//! Each contributor owns a subset of the state vector's parameters and
//! contributes rows/columns to `H`, diagonal blocks of `Phi`/`Q`, and the
//! initial value/variance of any parameter it introduces (spec. §4.2).
//! The composer ([`crate::composer::EquationComposer`]) drives every
//! contributor through the same five-method contract so the contributor
//! list can be heterogeneous (trait objects) without the composer caring
//! about concrete types.

mod ambiguities;
mod clock;
mod ionosphere;
mod position;
mod troposphere;

pub use ambiguities::{AmbiguitiesContributor, LAMBDA_IONO_FREE};
pub use clock::{InterFrequencyBiasContributor, InterSystemBiasContributor, ReceiverClockContributor};
pub use ionosphere::IonosphereContributor;
pub use position::{PositionContributor, PositionDynamics};
pub use troposphere::TroposphereContributor;

use nalgebra::{DMatrix, DVector};

use gnss_rs::prelude::SV;

use crate::epoch::EpochRecord;
use crate::types::{ArcId, MeasurementType, ParameterId};

/// Shared contract every equation contributor implements.
pub trait Contributor: std::fmt::Debug {
    /// Lets the contributor observe the epoch: update internal time
    /// differences, detect arc changes, refresh its ambiguity set.
    fn prepare(&mut self, epoch: &EpochRecord);

    /// Measurement-type blocks this contributor has content for. May be
    /// empty (e.g. the ambiguity contributor only matters in phase
    /// blocks the phase contributors already declared).
    fn measurement_types(&self) -> Vec<MeasurementType> {
        Vec::new()
    }

    /// Parameters active for the current (already-`prepare`d) epoch.
    fn parameters(&self) -> Vec<ParameterId>;

    /// `(sv, arc)` pairs this contributor currently tracks. Only the
    /// ambiguity contributor returns a non-empty set.
    fn ambiguity_set(&self) -> Vec<(SV, ArcId)> {
        Vec::new()
    }

    /// Writes this contributor's columns into `h`, starting at
    /// `col_start` (one column per entry of `parameters()`, in that
    /// order). `meas_order` is the composer's fixed measurement-type
    /// block order and `sv_order` the per-block satellite order; row
    /// `i` of block `b` lives at `b * sv_order.len() + i`.
    fn update_h(
        &self,
        epoch: &EpochRecord,
        meas_order: &[MeasurementType],
        sv_order: &[SV],
        h: &mut DMatrix<f64>,
        col_start: usize,
    );

    /// Writes this contributor's diagonal block of `Phi`, starting at
    /// `offset`.
    fn update_phi(&self, phi: &mut DMatrix<f64>, offset: usize);

    /// Writes this contributor's diagonal block of `Q`, starting at
    /// `offset`.
    fn update_q(&self, q: &mut DMatrix<f64>, offset: usize);

    /// Writes the initial value/variance for any brand-new parameter
    /// this contributor owns, starting at `offset`. Parameters already
    /// present in the persistent store are restored by the composer
    /// instead (`load_kalman`) and this is not called for them.
    fn init_state(&self, state: &mut DVector<f64>, cov: &mut DMatrix<f64>, offset: usize);
}
