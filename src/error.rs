use thiserror::Error;

use crate::types::{MeasurementType, ParameterId};

/// Estimation core errors.
///
/// Epoch-local errors (everything except [Error::Config]) never abort a
/// stream: the driver reports an invalid epoch and the caller is expected
/// to keep feeding the next one (spec. §7 recovery policy).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// No weight factor is registered for this measurement type and the
    /// epoch did not supply a per-satellite weight either. Fatal for the
    /// epoch: the persistent filter state is left untouched.
    #[error("no weight factor for measurement type {0:?}")]
    UnknownMeasurementType(MeasurementType),

    /// Caller queried a parameter that is not part of the current state.
    /// Non-fatal: reported back to the caller only.
    #[error("parameter {0:?} is not part of the current state")]
    UnknownParameter(ParameterId),

    /// Cholesky factorization failed during predict/update or during the
    /// double-difference ambiguity covariance inversion. The epoch is
    /// marked invalid and the persistent state is not updated.
    #[error("singular matrix (cholesky factorization failed)")]
    SingularMatrix,

    /// Fewer satellites remain than `min_required` after outlier
    /// rejection. The filter state is reinitialized for this epoch.
    #[error("insufficient satellites: {0} < {1} required")]
    InsufficientSatellites(usize, usize),

    /// Upstream pre-processing could not supply ephemeris for a
    /// satellite; it has been excluded and marked `NotEnoughData`.
    #[error("ephemeris missing for this satellite")]
    EphemerisMissing,

    /// Upstream pre-processing flagged the observation as unusable; the
    /// satellite has been excluded and marked `NotEnoughData`.
    #[error("bad observation")]
    BadObservation,

    /// Malformed configuration. Fatal at startup, unlike every other
    /// variant here.
    #[error("invalid configuration: {0}")]
    Config(String),
}
