//! Per-epoch input record produced by upstream pre-processing.

use std::collections::BTreeMap;

use hifitime::Epoch;
use nalgebra::Vector3;

use gnss_rs::prelude::SV;

use crate::types::{ArcId, MeasurementType};

/// Per-satellite usage status, reported back alongside the solution
/// (spec. §6 "Outputs").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UsageStatus {
    UsedInPVT,
    NotUsedInPVT,
    RejectedByCsDetector,
    RejectedByMWDetector,
    RejectedByLIDetector,
    NotEnoughData,
    #[default]
    Unknown,
}

/// One satellite's contribution to an epoch.
#[derive(Debug, Clone, Default)]
pub struct SatelliteRecord {
    /// Elevation angle, in degrees.
    pub elevation_deg: f64,
    /// Azimuth angle, in degrees.
    pub azimuth_deg: f64,
    /// Prefit residuals, keyed by measurement type.
    pub prefit: BTreeMap<MeasurementType, f64>,
    /// Postfit residuals, filled in by the composer after each Kalman
    /// update (`save_residuals`).
    pub postfit: BTreeMap<MeasurementType, f64>,
    /// Optional per-satellite weight (typically elevation-dependent).
    /// When absent, the composer falls back to the static weight-factor
    /// table for every measurement type on this satellite.
    pub weight: Option<f64>,
    /// True when a cycle slip has been detected on this satellite for
    /// the current epoch.
    pub cycle_slip: bool,
    /// Identifier of the continuous tracking arc this satellite is
    /// currently on. Changes (together with `cycle_slip = true`) when a
    /// slip is detected, or when the satellite reappears after a gap.
    pub arc_id: ArcId,
    /// Usage status, written back by the driver after the epoch step.
    pub usage: UsageStatus,
}

impl SatelliteRecord {
    pub fn new(elevation_deg: f64, azimuth_deg: f64, arc_id: ArcId) -> Self {
        Self {
            elevation_deg,
            azimuth_deg,
            arc_id,
            ..Default::default()
        }
    }

    pub fn with_prefit(mut self, ty: MeasurementType, value: f64) -> Self {
        self.prefit.insert(ty, value);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_slip(mut self, slip: bool) -> Self {
        self.cycle_slip = slip;
        self
    }
}

/// One epoch of input data consumed by the estimator.
#[derive(Debug, Clone, Default)]
pub struct EpochRecord {
    pub t: Epoch,
    /// Nominal (a priori) receiver position, ECEF meters.
    pub nominal_position: Vector3<f64>,
    /// Satellites in view this epoch, in a deterministic iteration
    /// order (`BTreeMap` orders by `SV`'s derived `Ord`).
    pub satellites: BTreeMap<SV, SatelliteRecord>,
}

impl EpochRecord {
    pub fn new(t: Epoch, nominal_position: Vector3<f64>) -> Self {
        Self {
            t,
            nominal_position,
            satellites: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, sv: SV, record: SatelliteRecord) -> &mut Self {
        self.satellites.insert(sv, record);
        self
    }

    pub fn sv_list(&self) -> Vec<SV> {
        self.satellites.keys().copied().collect()
    }

    /// Clears per-pass bookkeeping before the smoother re-runs this
    /// snapshot: resets usage flags and the cycle-slip marker so the
    /// pass sees a consistent input (spec. §4.6).
    pub(crate) fn reset_for_reprocess(&mut self) {
        for record in self.satellites.values_mut() {
            record.usage = UsageStatus::Unknown;
            record.cycle_slip = false;
            record.postfit.clear();
        }
    }

    /// Drops satellites not marked `UsedInPVT` on the previous pass,
    /// mirroring `usedSvMarker.keepOnlyUsed` in the source.
    pub(crate) fn keep_only_used(&mut self) {
        self.satellites
            .retain(|_, record| record.usage == UsageStatus::UsedInPVT);
    }
}
