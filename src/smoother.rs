//! C6: forward-backward smoother.
//!
//! Re-runs the Kalman driver over a buffered window of epochs: one
//! unconditional backward pass first, then `forwardBackwardCycles - 1`
//! forward/backward pairs, each forward pass preceded by a threshold
//! check against the previous pass's postfit residuals (spec. §4.6,
//! grounded in the source's `KalmanSolverFB::reProcess`/`checkLimits`).
//! The backward pass of a cycle never checks: only the forward pass
//! does, reading whatever the prior backward pass left behind.

use log::info;

use crate::epoch::EpochRecord;
use crate::error::Error;
use crate::kalman::KalmanDriver;
use crate::types::MeasurementType;

/// Per-cycle postfit thresholds (spec. §6 `codeLimList`/`phaseLimList`).
#[derive(Debug, Clone)]
pub struct CycleLimits {
    pub code: Vec<f64>,
    pub phase: Vec<f64>,
}

impl CycleLimits {
    fn limit_for(list: &[f64], cycle: usize) -> f64 {
        list.get(cycle).copied().unwrap_or_else(|| *list.last().expect("non-empty limit list"))
    }

    fn code_limit(&self, cycle: usize) -> f64 {
        Self::limit_for(&self.code, cycle)
    }

    fn phase_limit(&self, cycle: usize) -> f64 {
        Self::limit_for(&self.phase, cycle)
    }
}

/// Buffers epochs as they stream in and, on request, re-solves the
/// whole window forward/backward to smooth the solution.
#[derive(Debug)]
pub struct ForwardBackwardSmoother {
    driver: KalmanDriver,
    limits: CycleLimits,
    buffer: Vec<EpochRecord>,
    processed_measurements: usize,
    rejected_measurements: usize,
}

impl ForwardBackwardSmoother {
    pub fn new(driver: KalmanDriver, limits: CycleLimits) -> Self {
        Self {
            driver,
            limits,
            buffer: Vec::new(),
            processed_measurements: 0,
            rejected_measurements: 0,
        }
    }

    pub fn processed_measurements(&self) -> usize {
        self.processed_measurements
    }

    pub fn rejected_measurements(&self) -> usize {
        self.rejected_measurements
    }

    pub fn driver(&self) -> &KalmanDriver {
        &self.driver
    }

    /// Runs the filter forward on one new epoch and buffers it for a
    /// later `reprocess`.
    pub fn process(&mut self, mut epoch: EpochRecord) -> Result<(), Error> {
        let result = self.driver.step(&mut epoch);
        self.processed_measurements += epoch.satellites.len();
        self.buffer.push(epoch);
        result
    }

    /// Returns the buffered, most recently solved epochs without
    /// discarding them, mirroring `lastProcess` draining the live
    /// stream's tail.
    pub fn buffered(&self) -> &[EpochRecord] {
        &self.buffer
    }

    fn run_pass(&mut self, forward: bool, check_cycle: Option<usize>) -> Result<(), Error> {
        let n = self.buffer.len();
        for k in 0..n {
            let idx = if forward { k } else { n - 1 - k };

            if let Some(cycle) = check_cycle {
                self.rejected_measurements += apply_cycle_limits(&self.limits, &mut self.buffer[idx], cycle);
            }

            self.buffer[idx].keep_only_used();
            self.buffer[idx].reset_for_reprocess();

            let mut epoch = self.buffer[idx].clone();
            self.driver.step(&mut epoch)?;
            self.buffer[idx] = epoch;
        }
        Ok(())
    }

    /// Runs `n` forward/backward cycles over the buffered window: one
    /// unconditional backward pass with no threshold check at all, then
    /// `n - 1` forward/backward pairs, each one's forward pass preceded
    /// by a threshold check (against the prior pass's postfit) and its
    /// paired backward pass left unchecked (spec. §4.6). `n == 0` is a
    /// no-op.
    pub fn reprocess(&mut self, cycles: u8) -> Result<(), Error> {
        if cycles == 0 || self.buffer.is_empty() {
            return Ok(());
        }

        info!("reprocessing {} epochs for {} cycle(s)", self.buffer.len(), cycles);
        self.run_pass(false, None)?;
        for cycle in 0..(cycles as usize).saturating_sub(1) {
            self.run_pass(true, Some(cycle))?;
            self.run_pass(false, None)?;
        }
        Ok(())
    }

    /// Clears the buffer, returning its final, smoothed contents.
    pub fn drain(&mut self) -> Vec<EpochRecord> {
        std::mem::take(&mut self.buffer)
    }
}

/// Removes every satellite whose postfit residual exceeds this cycle's
/// threshold for its measurement type, returning the number of
/// satellites rejected (each counted once, even if both its code and
/// phase residuals exceed their limit).
fn apply_cycle_limits(limits: &CycleLimits, epoch: &mut EpochRecord, cycle: usize) -> usize {
    let code_limit = limits.code_limit(cycle);
    let phase_limit = limits.phase_limit(cycle);

    let mut rejected = std::collections::BTreeSet::new();
    for (sv, record) in epoch.satellites.iter() {
        for (ty, value) in record.postfit.iter() {
            let limit = if matches!(
                ty,
                MeasurementType::PostfitPhaseSingleFreq
                    | MeasurementType::PostfitPhaseIonoFree
                    | MeasurementType::PostfitPhaseL1
                    | MeasurementType::PostfitPhaseL2
            ) {
                phase_limit
            } else {
                code_limit
            };
            if value.abs() > limit {
                rejected.insert(*sv);
            }
        }
    }
    let count = rejected.len();
    for sv in rejected {
        epoch.satellites.remove(&sv);
    }
    count
}
