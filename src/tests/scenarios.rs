//! Seed end-to-end scenarios (spec. §8 "End-to-end scenarios").

use gnss_rs::prelude::Constellation;
use hifitime::{Epoch, Unit};
use nalgebra::{DMatrix, DVector};

use crate::ambiguity::{self, AmbiguityResolutionOpts};
use crate::composer::EquationComposer;
use crate::contributors::{AmbiguitiesContributor, PositionContributor, PositionDynamics, ReceiverClockContributor};
use crate::epoch::{EpochRecord, SatelliteRecord, UsageStatus};
use crate::error::Error;
use crate::kalman::{KalmanDriver, KalmanOpts, KalmanSolution};
use crate::smoother::{CycleLimits, ForwardBackwardSmoother};
use crate::types::{MeasurementType, ParameterId};

use super::{clean_gps_epoch, equatorial_receiver, gps};

/// Scenario 1: static receiver, 6 GPS satellites, two epochs,
/// dual-frequency IF code combination, `dynamics=static`. Position
/// should barely move between epochs and its variance should shrink as
/// the second epoch's measurements fold in on top of the first.
#[test]
fn static_receiver_two_epochs_converges_and_tightens() {
    let composer = EquationComposer::new(
        vec![
            Box::new(PositionContributor::new(PositionDynamics::Static, 100.0)),
            Box::new(ReceiverClockContributor::new(Constellation::GPS, 100.0)),
        ],
        vec![MeasurementType::PrefitCodeIonoFree],
    );
    let mut driver = KalmanDriver::new(composer, KalmanOpts::default());

    let t0 = Epoch::from_gpst_seconds(0.0);
    let mut epoch1 = clean_gps_epoch(t0, 6, 45.0, 1);
    driver.step(&mut epoch1).expect("first epoch should solve");
    let sol1 = driver.solution().unwrap().clone();

    let t1 = t0 + 30.0 * Unit::Second;
    let mut epoch2 = clean_gps_epoch(t1, 6, 45.0, 1);
    driver.step(&mut epoch2).expect("second epoch should solve");
    let sol2 = driver.solution().unwrap();

    for p in [ParameterId::Dx, ParameterId::Dy, ParameterId::Dz] {
        let moved = (sol2.value(p).unwrap() - sol1.value(p).unwrap()).abs();
        assert!(moved <= 0.01, "{p} moved {moved}m between epochs, expected <= 1cm");

        let var1 = sol1.variance(p).unwrap();
        let var2 = sol2.variance(p).unwrap();
        assert!(
            var2 < var1,
            "{p} variance should shrink monotonically: {var2} is not < {var1}"
        );
    }
}

/// Scenario 2 (boundary behavior, spec. §8): a cycle slip on one
/// tracked satellite resets that ambiguity's row/column in the
/// predicted covariance to the model's initial variance with zeroed
/// off-diagonals, while every other satellite's entry (and the
/// cross-covariance between them) is carried through untouched — the
/// predict step is where this reset actually happens, ahead of that
/// epoch's information update.
#[test]
fn cycle_slip_resets_only_the_slipped_ambiguitys_row_and_column() {
    let initial_variance = 400.0;
    let mut composer = EquationComposer::new(
        vec![Box::new(AmbiguitiesContributor::new(0.0147376279, initial_variance))],
        vec![MeasurementType::PrefitPhaseIonoFree],
    );

    let t = Epoch::from_gpst_seconds(0.0);
    let mut epoch = EpochRecord::new(t, equatorial_receiver());
    epoch.insert(gps(1), SatelliteRecord::new(40.0, 0.0, 1).with_slip(true));
    epoch.insert(gps(2), SatelliteRecord::new(50.0, 120.0, 1).with_slip(false));
    epoch.insert(gps(3), SatelliteRecord::new(60.0, 240.0, 1).with_slip(false));

    composer.prepare(&epoch);
    let composed = composer.compose(&epoch).unwrap();
    assert_eq!(composed.params.len(), 3);

    let slip_idx = composed.params.iter().position(|p| *p == ParameterId::Ambiguity(gps(1), 1)).unwrap();
    let other_a = composed.params.iter().position(|p| *p == ParameterId::Ambiguity(gps(2), 1)).unwrap();
    let other_b = composed.params.iter().position(|p| *p == ParameterId::Ambiguity(gps(3), 1)).unwrap();

    let mut p_prior = DMatrix::zeros(3, 3);
    p_prior[(slip_idx, slip_idx)] = 50.0;
    p_prior[(other_a, other_a)] = 60.0;
    p_prior[(other_b, other_b)] = 70.0;
    p_prior[(slip_idx, other_a)] = 5.0;
    p_prior[(other_a, slip_idx)] = 5.0;
    p_prior[(slip_idx, other_b)] = 3.0;
    p_prior[(other_b, slip_idx)] = 3.0;
    p_prior[(other_a, other_b)] = 2.0;
    p_prior[(other_b, other_a)] = 2.0;

    let p_minus = &composed.phi * &p_prior * composed.phi.transpose() + &composed.q;

    assert!((p_minus[(slip_idx, slip_idx)] - initial_variance).abs() < 1e-9);
    assert!(p_minus[(slip_idx, other_a)].abs() < 1e-9);
    assert!(p_minus[(slip_idx, other_b)].abs() < 1e-9);

    assert!((p_minus[(other_a, other_a)] - 60.0).abs() < 1e-9);
    assert!((p_minus[(other_b, other_b)] - 70.0).abs() < 1e-9);
    assert!((p_minus[(other_a, other_b)] - 2.0).abs() < 1e-9);
}

/// Scenario 3: a satellite with a prefit residual 50 sigma above the
/// others must be rejected exactly once, and the second pass should
/// produce a small postfit sigma with every surviving satellite marked
/// used.
#[test]
fn outlier_is_rejected_once_and_solution_recovers() {
    let composer = EquationComposer::new(
        vec![
            Box::new(PositionContributor::new(PositionDynamics::Static, 100.0)),
            Box::new(ReceiverClockContributor::new(Constellation::GPS, 100.0)),
        ],
        vec![MeasurementType::PrefitCodeIonoFree],
    );
    let mut driver = KalmanDriver::new(composer, KalmanOpts::default());

    let t0 = Epoch::from_gpst_seconds(0.0);
    let mut epoch = clean_gps_epoch(t0, 6, 45.0, 1);
    epoch
        .satellites
        .get_mut(&gps(6))
        .unwrap()
        .prefit
        .insert(MeasurementType::PrefitCodeIonoFree, 50.0);

    driver.step(&mut epoch).expect("should recover after rejecting the outlier");

    assert_eq!(epoch.satellites[&gps(6)].usage, UsageStatus::RejectedByCsDetector);
    for prn in 1..=5 {
        assert_eq!(epoch.satellites[&gps(prn)].usage, UsageStatus::UsedInPVT);
    }
    assert!(driver.solution().unwrap().postfit_sigma < 3.0);
}

/// Scenario 4: forward-backward smoothing over 10 noise-free epochs with
/// `n=2` cycles. With no injected noise the solution fits every epoch
/// exactly in either direction, so postfit residuals should collapse to
/// (numerical) zero and nothing should ever cross the cycle thresholds.
#[test]
fn forward_backward_smoother_converges_noise_free_epochs() {
    let composer = EquationComposer::new(
        vec![
            Box::new(PositionContributor::new(PositionDynamics::Static, 100.0)),
            Box::new(ReceiverClockContributor::new(Constellation::GPS, 100.0)),
        ],
        vec![MeasurementType::PrefitCodeIonoFree],
    );
    let driver = KalmanDriver::new(composer, KalmanOpts::default());
    let mut smoother = ForwardBackwardSmoother::new(
        driver,
        CycleLimits {
            code: vec![30.0, 20.0],
            phase: vec![0.5, 0.3],
        },
    );

    let t0 = Epoch::from_gpst_seconds(0.0);
    for i in 0..10 {
        let t = t0 + (i as f64) * 30.0 * Unit::Second;
        smoother.process(clean_gps_epoch(t, 6, 45.0, 1)).expect("noise-free epoch should solve");
    }
    smoother.reprocess(2).expect("reprocess should not error on noise-free data");

    assert_eq!(smoother.rejected_measurements(), 0);
    assert!(smoother.processed_measurements() > 0);

    for epoch in smoother.buffered() {
        for record in epoch.satellites.values() {
            for residual in record.postfit.values() {
                assert!(residual.abs() < 1e-6, "postfit residual {residual} did not collapse to zero");
            }
        }
    }
}

/// Scenario 5: 6 satellites with known double-difference integer truth,
/// float ambiguities injected within +/-0.3 cycles of truth. The
/// resolver must recover the exact truth vector, and the core position
/// shift it applies must match `-Q_ca Q_aa^-1 (a' - a_hat)` computed
/// independently from the same transformed covariance, to 1e-9.
#[test]
fn ambiguity_resolution_recovers_truth_and_applies_the_documented_correction() {
    let reference = gps(6);
    let others = [gps(1), gps(2), gps(3), gps(4), gps(5)];
    let true_dd = [10i64, -5, 3, 7, -2];
    let offsets = [0.1_f64, -0.2, 0.05, -0.1, 0.2];

    let t = Epoch::from_gpst_seconds(0.0);
    let mut epoch = EpochRecord::new(t, equatorial_receiver());
    for (sv, elev) in others.iter().zip([40.0, 35.0, 50.0, 45.0, 30.0]) {
        epoch.insert(*sv, SatelliteRecord::new(elev, 0.0, 1));
    }
    epoch.insert(reference, SatelliteRecord::new(80.0, 0.0, 1));

    let params = vec![
        ParameterId::Dx,
        ParameterId::ClockBias(Constellation::GPS),
        ParameterId::Ambiguity(others[0], 1),
        ParameterId::Ambiguity(others[1], 1),
        ParameterId::Ambiguity(others[2], 1),
        ParameterId::Ambiguity(others[3], 1),
        ParameterId::Ambiguity(others[4], 1),
        ParameterId::Ambiguity(reference, 1),
    ];

    let n_core = 2;
    let ref_value = 50.0;
    let mut state = DVector::zeros(8);
    state[0] = 5.0; // Dx
    state[1] = 2.0; // cdt
    for (i, (dd, off)) in true_dd.iter().zip(offsets.iter()).enumerate() {
        state[n_core + i] = ref_value + *dd as f64 + off;
    }
    state[7] = ref_value;

    let mut cov = DMatrix::<f64>::zeros(8, 8);
    cov[(0, 0)] = 1.0; // Dx
    cov[(1, 1)] = 1.0; // cdt
    for i in 0..5 {
        cov[(n_core + i, n_core + i)] = 4.0e-4;
    }
    cov[(7, 7)] = 1.0e-6; // reference ambiguity, deliberately tight
    cov[(0, n_core)] = 1.0e-3; // Dx <-> N(g01) cross-covariance
    cov[(n_core, 0)] = 1.0e-3;

    let solution = KalmanSolution {
        params: params.clone(),
        state: state.clone(),
        cov: cov.clone(),
        postfit_sigma: 1.0,
    };

    let fixed = ambiguity::resolve(&solution, &epoch, AmbiguityResolutionOpts::default())
        .unwrap()
        .expect("enough ambiguities to attempt a fix");

    assert_eq!(fixed.reference, reference);
    for (sv, truth) in others.iter().zip(true_dd.iter()) {
        assert_eq!(fixed.fixed.get(sv).copied(), Some(*truth));
    }
    assert!(fixed.ratio > AmbiguityResolutionOpts::default().min_ratio);

    // Independently re-derive the expected correction straight from the
    // spec's SD->DD transform (§4.5) to cross-check the resolver's output.
    let n_dd = 5;
    let mut t_matrix = DMatrix::<f64>::zeros(n_core + n_dd, 8);
    for i in 0..n_core {
        t_matrix[(i, i)] = 1.0;
    }
    for (row, _) in others.iter().enumerate() {
        t_matrix[(n_core + row, n_core + row)] = 1.0;
        t_matrix[(n_core + row, 7)] = -1.0;
    }
    let x_dd = &t_matrix * &state;
    let p_dd = &t_matrix * &cov * t_matrix.transpose();
    let a_prime = x_dd.rows(n_core, n_dd).into_owned();
    let q_aa = p_dd.view((n_core, n_core), (n_dd, n_dd)).into_owned();
    let q_ca = p_dd.view((0, n_core), (n_core, n_dd)).into_owned();

    let fixed_dd = DVector::from_iterator(n_dd, true_dd.iter().map(|&v| v as f64));
    let delta = &a_prime - &fixed_dd;
    let q_aa_inv = q_aa.try_inverse().unwrap();
    let correction = &q_ca * &q_aa_inv * &delta;

    let expected_dx = state[0] - correction[0];
    let expected_cdt = state[1] - correction[1];

    assert!((fixed.core[&ParameterId::Dx] - expected_dx).abs() < 1e-9);
    assert!((fixed.core[&ParameterId::ClockBias(Constellation::GPS)] - expected_cdt).abs() < 1e-9);
}

/// Scenario 6: a composer configured with a measurement type that has no
/// entry in the weight-factor table must signal
/// `Error::UnknownMeasurementType` and leave the driver without a
/// solution, repeatably (the misconfiguration is structural, not a
/// one-off glitch).
#[test]
fn missing_weight_factor_signals_unknown_measurement_type() {
    let composer = EquationComposer::new(
        vec![Box::new(PositionContributor::new(PositionDynamics::Static, 100.0))],
        vec![MeasurementType::PostfitPhaseIonoFree],
    );
    let mut driver = KalmanDriver::new(composer, KalmanOpts::default());
    let t0 = Epoch::from_gpst_seconds(0.0);
    let mut epoch = clean_gps_epoch(t0, 6, 45.0, 1);

    let err = driver.step(&mut epoch).unwrap_err();
    assert!(matches!(err, Error::UnknownMeasurementType(MeasurementType::PostfitPhaseIonoFree)));
    assert!(!driver.is_valid());
    assert!(driver.solution().is_none());

    let err_again = driver.step(&mut epoch).unwrap_err();
    assert!(matches!(err_again, Error::UnknownMeasurementType(MeasurementType::PostfitPhaseIonoFree)));
    assert!(driver.solution().is_none());
}
