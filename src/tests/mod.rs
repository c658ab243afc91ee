//! End-to-end scenario tests for the estimation core (spec. §8).
//!
//! Hosts small epoch builders shared by [`scenarios`], mirroring the
//! teacher's `src/tests/pvt/` split between a harness module and the
//! scenario functions themselves. The teacher's own `Tester` type wasn't
//! part of the retrieved sources, so the harness here is a from-scratch
//! equivalent scaled to this crate's data model rather than a copy.

mod scenarios;

use gnss_rs::prelude::{Constellation, SV};
use hifitime::Epoch;
use nalgebra::Vector3;

use crate::epoch::{EpochRecord, SatelliteRecord};
use crate::types::MeasurementType;

/// A receiver sitting on the equator at the prime meridian, WGS84 ECEF.
pub(crate) fn equatorial_receiver() -> Vector3<f64> {
    Vector3::new(6378137.0, 0.0, 0.0)
}

/// `n` GPS satellites evenly spread in azimuth, at a fixed elevation,
/// each carrying a zero-residual ionosphere-free code+phase observation
/// on the given arc id. A convenient all-clear baseline epoch; callers
/// mutate individual satellites afterwards for the scenario at hand.
pub(crate) fn clean_gps_epoch(t: Epoch, n: u8, elevation_deg: f64, arc_id: u64) -> EpochRecord {
    let mut epoch = EpochRecord::new(t, equatorial_receiver());
    for prn in 1..=n {
        let az = 360.0 * (prn as f64 - 1.0) / n as f64;
        let record = SatelliteRecord::new(elevation_deg, az, arc_id)
            .with_prefit(MeasurementType::PrefitCodeIonoFree, 0.0)
            .with_prefit(MeasurementType::PrefitPhaseIonoFree, 0.0);
        epoch.insert(SV::new(Constellation::GPS, prn), record);
    }
    epoch
}

pub(crate) fn gps(prn: u8) -> SV {
    SV::new(Constellation::GPS, prn)
}
