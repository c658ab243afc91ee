//! C1: per-parameter stochastic (process noise) models.
//!
//! Each model contributes a scalar transition coefficient (`phi`) and a
//! scalar process variance (`q`) to the diagonal block a contributor
//! owns for one parameter (spec. §4.1).

use hifitime::Epoch;

use gnss_rs::prelude::SV;

/// Output of a stochastic model for the current epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhiQ {
    pub phi: f64,
    pub q: f64,
}

/// A per-parameter process-noise model.
pub trait StochasticModel: std::fmt::Debug {
    /// Lets the model observe elapsed time / slip status before
    /// `phi_q` is queried for this epoch.
    fn prepare(&mut self, sv: Option<SV>, t: Epoch);

    /// Transition coefficient and process variance for the current
    /// epoch, as primed by the last `prepare` call.
    fn phi_q(&self) -> PhiQ;

    /// Variance used to (re)initialize the parameter when it is first
    /// created, or reinitialized after a reset.
    fn initial_variance(&self) -> f64;
}

/// Never moves, never resets: `phi=1`, `q=0`.
#[derive(Debug, Clone, Copy)]
pub struct Constant {
    pub initial_variance: f64,
}

impl Default for Constant {
    fn default() -> Self {
        Self {
            initial_variance: 100.0,
        }
    }
}

impl StochasticModel for Constant {
    fn prepare(&mut self, _sv: Option<SV>, _t: Epoch) {}
    fn phi_q(&self) -> PhiQ {
        PhiQ { phi: 1.0, q: 0.0 }
    }
    fn initial_variance(&self) -> f64 {
        self.initial_variance
    }
}

/// Reinitialized every epoch with a large process variance: `phi=0`.
#[derive(Debug, Clone, Copy)]
pub struct WhiteNoise {
    pub sigma: f64,
}

impl WhiteNoise {
    pub fn new(sigma: f64) -> Self {
        Self { sigma }
    }
}

impl StochasticModel for WhiteNoise {
    fn prepare(&mut self, _sv: Option<SV>, _t: Epoch) {}
    fn phi_q(&self) -> PhiQ {
        PhiQ {
            phi: 0.0,
            q: self.sigma.powi(2),
        }
    }
    fn initial_variance(&self) -> f64 {
        self.sigma.powi(2)
    }
}

/// `phi=1`, `q = q' * dt` where `q'` is a spectral density in
/// variance/second and `dt` is the elapsed time since the previous
/// epoch this model was `prepare`d for.
#[derive(Debug, Clone, Copy)]
pub struct RandomWalk {
    pub spectral_density: f64,
    pub initial_variance: f64,
    last_t: Option<Epoch>,
    dt_seconds: f64,
}

impl RandomWalk {
    pub fn new(spectral_density: f64, initial_variance: f64) -> Self {
        Self {
            spectral_density,
            initial_variance,
            last_t: None,
            dt_seconds: 0.0,
        }
    }
}

impl StochasticModel for RandomWalk {
    fn prepare(&mut self, _sv: Option<SV>, t: Epoch) {
        self.dt_seconds = match self.last_t {
            Some(prev) => (t - prev).to_seconds().max(0.0),
            None => 0.0,
        };
        self.last_t = Some(t);
    }
    fn phi_q(&self) -> PhiQ {
        PhiQ {
            phi: 1.0,
            q: self.spectral_density * self.dt_seconds,
        }
    }
    fn initial_variance(&self) -> f64 {
        self.initial_variance
    }
}

/// As [RandomWalk], but `prepare` is keyed per receiver/source so a
/// multi-station composition can hold independent time bases (spec.
/// §4.1 "Tropo random walk").
#[derive(Debug, Clone)]
pub struct TropoRandomWalk {
    inner: RandomWalk,
    source: u16,
}

impl TropoRandomWalk {
    pub fn new(source: u16, spectral_density: f64, initial_variance: f64) -> Self {
        Self {
            inner: RandomWalk::new(spectral_density, initial_variance),
            source,
        }
    }

    pub fn source(&self) -> u16 {
        self.source
    }
}

impl StochasticModel for TropoRandomWalk {
    fn prepare(&mut self, sv: Option<SV>, t: Epoch) {
        self.inner.prepare(sv, t);
    }
    fn phi_q(&self) -> PhiQ {
        self.inner.phi_q()
    }
    fn initial_variance(&self) -> f64 {
        self.inner.initial_variance()
    }
}

/// `phi=1`, `q=0`, unless a cycle slip is flagged for `sv` on the
/// current epoch, in which case the parameter is treated as
/// reinitialized (effectively white noise for that one epoch).
#[derive(Debug, Clone, Copy)]
pub struct PhaseAmbiguity {
    pub initial_variance: f64,
    slipped: bool,
}

impl PhaseAmbiguity {
    pub fn new(initial_variance: f64) -> Self {
        Self {
            initial_variance,
            slipped: false,
        }
    }

    /// Call once per epoch with the satellite's cycle-slip flag before
    /// querying `phi_q`.
    pub fn mark_slip(&mut self, slipped: bool) {
        self.slipped = slipped;
    }
}

impl StochasticModel for PhaseAmbiguity {
    fn prepare(&mut self, _sv: Option<SV>, _t: Epoch) {}
    fn phi_q(&self) -> PhiQ {
        if self.slipped {
            PhiQ {
                phi: 0.0,
                q: self.initial_variance,
            }
        } else {
            PhiQ { phi: 1.0, q: 0.0 }
        }
    }
    fn initial_variance(&self) -> f64 {
        self.initial_variance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hifitime::Unit;

    #[test]
    fn random_walk_scales_with_elapsed_time() {
        let mut model = RandomWalk::new(1.0e-8, 1.0);
        let t0 = Epoch::from_gpst_seconds(0.0);
        model.prepare(None, t0);
        assert_eq!(model.phi_q().q, 0.0);

        let t1 = t0 + 30.0 * Unit::Second;
        model.prepare(None, t1);
        let pq = model.phi_q();
        assert_eq!(pq.phi, 1.0);
        assert!((pq.q - 3.0e-7).abs() < 1e-12);
    }

    #[test]
    fn phase_ambiguity_resets_only_on_slip() {
        let mut model = PhaseAmbiguity::new(400.0);
        assert_eq!(model.phi_q(), PhiQ { phi: 1.0, q: 0.0 });
        model.mark_slip(true);
        assert_eq!(
            model.phi_q(),
            PhiQ {
                phi: 0.0,
                q: 400.0
            }
        );
        model.mark_slip(false);
        assert_eq!(model.phi_q(), PhiQ { phi: 1.0, q: 0.0 });
    }

    #[test]
    fn white_noise_always_resets() {
        let model = WhiteNoise::new(100.0);
        assert_eq!(model.phi_q().phi, 0.0);
        assert_eq!(model.phi_q().q, 100.0 * 100.0);
    }
}
