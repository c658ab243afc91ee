#![doc = include_str!("../README.md")]
#![cfg_attr(docrs, feature(doc_cfg))]

extern crate gnss_rs as gnss;

mod ambiguity;
mod cfg;
mod composer;
mod contributors;
mod epoch;
mod error;
mod geodesy;
mod kalman;
mod smoother;
mod stochastic;
mod types;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use crate::ambiguity::{resolve, AmbiguityResolutionOpts, FixedSolution};
    pub use crate::cfg::{Config, SolverOpts};
    pub use crate::composer::{ComposedEquations, EquationComposer, FilterState, RowMeta};
    pub use crate::contributors::{
        AmbiguitiesContributor, Contributor, InterFrequencyBiasContributor, InterSystemBiasContributor,
        IonosphereContributor, PositionContributor, PositionDynamics, ReceiverClockContributor,
        TroposphereContributor,
    };
    pub use crate::epoch::{EpochRecord, SatelliteRecord, UsageStatus};
    pub use crate::error::Error;
    pub use crate::kalman::{KalmanDriver, KalmanOpts, KalmanSolution};
    pub use crate::smoother::{CycleLimits, ForwardBackwardSmoother};
    pub use crate::stochastic::{Constant, PhaseAmbiguity, PhiQ, RandomWalk, StochasticModel, TropoRandomWalk, WhiteNoise};
    pub use crate::types::{ArcId, MeasurementType, ParameterId};

    pub use gnss::prelude::{Constellation, SV};
    pub use hifitime::{Duration, Epoch};
    pub use nalgebra::Vector3;
}
