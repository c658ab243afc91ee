//! Configuration consumed by the composer/driver/smoother (spec. §6).

use gnss_rs::prelude::Constellation;

use crate::ambiguity::AmbiguityResolutionOpts;
use crate::composer::EquationComposer;
use crate::contributors::{
    AmbiguitiesContributor, Contributor, InterSystemBiasContributor, PositionContributor, PositionDynamics,
    ReceiverClockContributor, TroposphereContributor, LAMBDA_IONO_FREE,
};
use crate::error::Error;
use crate::kalman::{KalmanDriver, KalmanOpts};
use crate::smoother::{CycleLimits, ForwardBackwardSmoother};
use crate::types::MeasurementType;

const DEFAULT_CLOCK_SIGMA: f64 = 100.0;
const DEFAULT_AMBIGUITY_INITIAL_VARIANCE: f64 = 400.0;
const DEFAULT_TROPO_INITIAL_VARIANCE: f64 = 0.1;

fn default_dynamics() -> PositionDynamics {
    PositionDynamics::Static
}

fn default_pos_sigma() -> f64 {
    100.0
}

fn default_tropo_q() -> f64 {
    1.0e-8
}

fn default_forward_backward_cycles() -> u8 {
    0
}

fn default_code_lim_list() -> Vec<f64> {
    vec![30.0, 20.0, 10.0]
}

fn default_phase_lim_list() -> Vec<f64> {
    vec![0.5, 0.3, 0.15]
}

fn default_systems() -> Vec<Constellation> {
    vec![Constellation::GPS]
}

/// Tunables for the Kalman driver's outlier-rejection loop and minimum
/// satellite count, mirroring the split the teacher carries between
/// `cfg.rs` and `cfg/solver.rs`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverOpts {
    #[cfg_attr(feature = "serde", serde(default = "default_reject_sigma"))]
    pub reject_sigma: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_min_required"))]
    pub min_required: usize,
    #[cfg_attr(feature = "serde", serde(default = "default_min_ambiguities"))]
    pub min_ambiguities: usize,
    #[cfg_attr(feature = "serde", serde(default = "default_min_ratio"))]
    pub min_ratio: f64,
}

fn default_reject_sigma() -> f64 {
    3.0
}

fn default_min_required() -> usize {
    4
}

fn default_min_ambiguities() -> usize {
    5
}

fn default_min_ratio() -> f64 {
    3.0
}

impl Default for SolverOpts {
    fn default() -> Self {
        Self {
            reject_sigma: default_reject_sigma(),
            min_required: default_min_required(),
            min_ambiguities: default_min_ambiguities(),
            min_ratio: default_min_ratio(),
        }
    }
}

/// Top-level estimation configuration (spec. §6 table).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    #[cfg_attr(feature = "serde", serde(default = "default_dynamics"))]
    pub dynamics: PositionDynamics,

    #[cfg_attr(feature = "serde", serde(default = "default_pos_sigma"))]
    pub pos_sigma: f64,

    #[cfg_attr(feature = "serde", serde(default = "default_tropo_q"))]
    pub tropo_q: f64,

    #[cfg_attr(feature = "serde", serde(default = "default_forward_backward_cycles"))]
    pub forward_backward_cycles: u8,

    #[cfg_attr(feature = "serde", serde(default = "default_code_lim_list"))]
    pub code_lim_list: Vec<f64>,

    #[cfg_attr(feature = "serde", serde(default = "default_phase_lim_list"))]
    pub phase_lim_list: Vec<f64>,

    /// GNSS systems contributing inter-system bias parameters, beyond
    /// the (implicit) GPS time reference.
    #[cfg_attr(feature = "serde", serde(default = "default_systems"))]
    pub systems: Vec<Constellation>,

    /// Selects C1 (`true`) vs P1 (`false`) for the ionosphere-free code
    /// combination feeding the composer's prefit residuals.
    #[cfg_attr(feature = "serde", serde(default))]
    pub use_c1: bool,

    #[cfg_attr(feature = "serde", serde(default))]
    pub solver: SolverOpts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dynamics: default_dynamics(),
            pos_sigma: default_pos_sigma(),
            tropo_q: default_tropo_q(),
            forward_backward_cycles: default_forward_backward_cycles(),
            code_lim_list: default_code_lim_list(),
            phase_lim_list: default_phase_lim_list(),
            systems: default_systems(),
            use_c1: false,
            solver: SolverOpts::default(),
        }
    }
}

impl Config {
    /// Validates cross-field invariants the deserializer cannot express,
    /// failing fast at startup (spec. §7 "configuration errors are
    /// fatal").
    pub fn validate(&self) -> Result<(), Error> {
        if self.pos_sigma <= 0.0 {
            return Err(Error::Config("posSigma must be strictly positive".to_string()));
        }
        if self.tropo_q <= 0.0 {
            return Err(Error::Config("tropoQ must be strictly positive".to_string()));
        }
        if self.code_lim_list.is_empty() || self.phase_lim_list.is_empty() {
            return Err(Error::Config(
                "codeLimList and phaseLimList must have at least one cycle threshold".to_string(),
            ));
        }
        if self.solver.min_required < 4 {
            return Err(Error::Config(
                "solver.min_required must be at least 4 (position + clock)".to_string(),
            ));
        }
        Ok(())
    }

    /// Outlier-rejection tunables for the Kalman driver (C4), derived
    /// from `solver`.
    pub fn kalman_opts(&self) -> KalmanOpts {
        KalmanOpts {
            reject_sigma: self.solver.reject_sigma,
            min_required: self.solver.min_required,
        }
    }

    /// Ambiguity-resolution tunables (C5), derived from `solver`.
    pub fn ambiguity_opts(&self) -> AmbiguityResolutionOpts {
        AmbiguityResolutionOpts {
            min_ambiguities: self.solver.min_ambiguities,
            min_ratio: self.solver.min_ratio,
        }
    }

    /// Per-cycle postfit thresholds for the forward-backward smoother
    /// (C6), derived from `code_lim_list`/`phase_lim_list`.
    pub fn cycle_limits(&self) -> CycleLimits {
        CycleLimits {
            code: self.code_lim_list.clone(),
            phase: self.phase_lim_list.clone(),
        }
    }

    /// Builds the contributor set (C2) this configuration describes: a
    /// position contributor under `dynamics`, a receiver clock bias
    /// against the first entry of `systems` (GPS if empty), one
    /// inter-system bias per remaining system, a troposphere
    /// contributor, and an ambiguity contributor.
    pub fn build_contributors(&self) -> Vec<Box<dyn Contributor>> {
        let reference = self.systems.first().copied().unwrap_or(Constellation::GPS);

        let mut contributors: Vec<Box<dyn Contributor>> = vec![
            Box::new(PositionContributor::new(self.dynamics, self.pos_sigma)),
            Box::new(ReceiverClockContributor::new(reference, DEFAULT_CLOCK_SIGMA)),
            Box::new(TroposphereContributor::new(0, self.tropo_q, DEFAULT_TROPO_INITIAL_VARIANCE)),
            Box::new(AmbiguitiesContributor::new(LAMBDA_IONO_FREE, DEFAULT_AMBIGUITY_INITIAL_VARIANCE)),
        ];

        for system in self.systems.iter().skip(1) {
            contributors.push(Box::new(InterSystemBiasContributor::new(*system, DEFAULT_CLOCK_SIGMA)));
        }

        contributors
    }

    /// Builds the equation composer (C3) over this configuration's
    /// contributors and `meas_order`.
    pub fn build_composer(&self, meas_order: Vec<MeasurementType>) -> EquationComposer {
        EquationComposer::new(self.build_contributors(), meas_order)
    }

    /// Builds the Kalman driver (C4), wired with this configuration's
    /// outlier-rejection and ambiguity-resolution tunables.
    pub fn build_driver(&self, meas_order: Vec<MeasurementType>) -> KalmanDriver {
        KalmanDriver::new(self.build_composer(meas_order), self.kalman_opts()).with_ambiguity_opts(self.ambiguity_opts())
    }

    /// Builds the forward-backward smoother (C6) around a driver built
    /// from this configuration.
    pub fn build_smoother(&self, meas_order: Vec<MeasurementType>) -> ForwardBackwardSmoother {
        ForwardBackwardSmoother::new(self.build_driver(meas_order), self.cycle_limits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_pos_sigma_is_rejected() {
        let mut cfg = Config::default();
        cfg.pos_sigma = 0.0;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn build_driver_wires_one_contributor_per_configured_system() {
        let mut cfg = Config::default();
        cfg.systems = vec![Constellation::GPS, Constellation::Galileo];
        let driver = cfg.build_driver(vec![MeasurementType::PrefitCodeIonoFree]);
        assert!(!driver.is_valid());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_round_trips_through_json() {
        let mut cfg = Config::default();
        cfg.systems = vec![Constellation::GPS, Constellation::Galileo];
        cfg.solver.min_ratio = 2.5;

        let json = serde_json::to_string(&cfg).expect("config must serialize");
        let restored: Config = serde_json::from_str(&json).expect("config must deserialize");
        assert_eq!(restored, cfg);
    }
}
