//! Measurement type tags and state-vector parameter identifiers.

use std::cmp::Ordering;

use gnss_rs::prelude::{Constellation, SV};

/// Monotonic identifier for a carrier-phase tracking arc. A new arc is
/// born whenever a satellite is newly seen or a cycle slip breaks the
/// previous one; it never changes meaning afterwards.
pub type ArcId = u64;

/// Closed tag set of observable types the estimator understands.
///
/// Each tag carries a default weight factor used by
/// [`crate::composer::EquationComposer::update_weight`] when the epoch
/// does not supply a per-satellite weight: code-like tags default to
/// `1.0`, phase-like tags default to `1.0e4` (phase is ~100x more
/// precise in sigma than code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MeasurementType {
    PrefitCodeSingleFreq,
    PrefitCodeIonoFree,
    PrefitCodeL1,
    PrefitCodeL2,
    PrefitPhaseSingleFreq,
    PrefitPhaseIonoFree,
    PrefitPhaseL1,
    PrefitPhaseL2,
    PostfitCodeSingleFreq,
    PostfitCodeIonoFree,
    PostfitCodeL1,
    PostfitCodeL2,
    PostfitPhaseSingleFreq,
    PostfitPhaseIonoFree,
    PostfitPhaseL1,
    PostfitPhaseL2,
}

impl MeasurementType {
    /// Default weight factor used when the epoch does not supply its
    /// own, for the prefit tags the weight matrix is actually built
    /// from. `None` for postfit tags: they only ever hold residuals
    /// (`save_residuals`) and are never part of `W`, so a postfit tag
    /// reaching the weight lookup means the composer's block list is
    /// malformed.
    pub fn default_weight_factor(&self) -> Option<f64> {
        match self {
            Self::PrefitCodeSingleFreq | Self::PrefitCodeIonoFree | Self::PrefitCodeL1 | Self::PrefitCodeL2 => {
                Some(1.0)
            },
            Self::PrefitPhaseSingleFreq
            | Self::PrefitPhaseIonoFree
            | Self::PrefitPhaseL1
            | Self::PrefitPhaseL2 => Some(1.0e4),
            Self::PostfitCodeSingleFreq
            | Self::PostfitCodeIonoFree
            | Self::PostfitCodeL1
            | Self::PostfitCodeL2
            | Self::PostfitPhaseSingleFreq
            | Self::PostfitPhaseIonoFree
            | Self::PostfitPhaseL1
            | Self::PostfitPhaseL2 => None,
        }
    }

    /// True for any phase-carrying variant (pre- or postfit).
    pub fn is_phase(&self) -> bool {
        matches!(
            self,
            Self::PrefitPhaseSingleFreq
                | Self::PrefitPhaseIonoFree
                | Self::PrefitPhaseL1
                | Self::PrefitPhaseL2
                | Self::PostfitPhaseSingleFreq
                | Self::PostfitPhaseIonoFree
                | Self::PostfitPhaseL1
                | Self::PostfitPhaseL2
        )
    }

    /// Postfit counterpart of a prefit tag (identity if already postfit).
    pub fn as_postfit(&self) -> Self {
        match self {
            Self::PrefitCodeSingleFreq => Self::PostfitCodeSingleFreq,
            Self::PrefitCodeIonoFree => Self::PostfitCodeIonoFree,
            Self::PrefitCodeL1 => Self::PostfitCodeL1,
            Self::PrefitCodeL2 => Self::PostfitCodeL2,
            Self::PrefitPhaseSingleFreq => Self::PostfitPhaseSingleFreq,
            Self::PrefitPhaseIonoFree => Self::PostfitPhaseIonoFree,
            Self::PrefitPhaseL1 => Self::PostfitPhaseL1,
            Self::PrefitPhaseL2 => Self::PostfitPhaseL2,
            postfit => *postfit,
        }
    }
}

/// Ranks a [Constellation] for deterministic [ParameterId] ordering.
/// `Constellation` itself is not `Ord` in `gnss-rs`, so identifiers that
/// embed one (inter-system/inter-frequency bias, ambiguities) compare by
/// this rank first.
fn constellation_rank(c: &Constellation) -> u16 {
    match c {
        Constellation::GPS => 0,
        Constellation::Glonass => 1,
        Constellation::Galileo => 2,
        Constellation::BeiDou => 3,
        Constellation::QZSS => 4,
        Constellation::SBAS => 5,
        other => 100 + (format!("{:?}", other).len() as u16),
    }
}

fn sv_key(sv: &SV) -> (u16, u8) {
    (constellation_rank(&sv.constellation), sv.prn)
}

/// Tagged-union identifier naming one element of the persistent state
/// vector (spec. §3 "Parameter identifiers"). Implements a total order
/// so the composer can place parameters deterministically in the state
/// vector and so the persistent store can use it as a sorted map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterId {
    Dx,
    Dy,
    Dz,
    /// Receiver clock bias for a constellation. The reference
    /// constellation (first one configured) is carried as `cdt`.
    ClockBias(Constellation),
    ClockDrift,
    /// Zenith wet tropospheric delay, keyed by receiver/source so a
    /// multi-station composition can carry more than one.
    WetZtd(u16),
    /// GLONASS inter-frequency bias, keyed by frequency channel number.
    InterFrequencyBias(i8),
    /// Slant ionospheric delay for one satellite, only present when raw
    /// (non iono-free) L1/L2 measurement types are in use.
    Ionosphere(SV),
    /// Carrier-phase ambiguity for one (satellite, arc).
    Ambiguity(SV, ArcId),
}

impl PartialOrd for ParameterId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParameterId {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(p: &ParameterId) -> u8 {
            match p {
                ParameterId::Dx => 0,
                ParameterId::Dy => 1,
                ParameterId::Dz => 2,
                ParameterId::ClockBias(_) => 3,
                ParameterId::ClockDrift => 4,
                ParameterId::WetZtd(_) => 5,
                ParameterId::InterFrequencyBias(_) => 6,
                ParameterId::Ionosphere(_) => 7,
                ParameterId::Ambiguity(_, _) => 8,
            }
        }
        match rank(self).cmp(&rank(other)) {
            Ordering::Equal => match (self, other) {
                (ParameterId::ClockBias(a), ParameterId::ClockBias(b)) => {
                    constellation_rank(a).cmp(&constellation_rank(b))
                },
                (ParameterId::WetZtd(a), ParameterId::WetZtd(b)) => a.cmp(b),
                (ParameterId::InterFrequencyBias(a), ParameterId::InterFrequencyBias(b)) => {
                    a.cmp(b)
                },
                (ParameterId::Ionosphere(a), ParameterId::Ionosphere(b)) => {
                    sv_key(a).cmp(&sv_key(b))
                },
                (ParameterId::Ambiguity(sv_a, arc_a), ParameterId::Ambiguity(sv_b, arc_b)) => {
                    sv_key(sv_a).cmp(&sv_key(sv_b)).then(arc_a.cmp(arc_b))
                },
                _ => Ordering::Equal,
            },
            other => other,
        }
    }
}

impl std::fmt::Display for ParameterId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Dx => write!(f, "dx"),
            Self::Dy => write!(f, "dy"),
            Self::Dz => write!(f, "dz"),
            Self::ClockBias(c) => write!(f, "cdt({:?})", c),
            Self::ClockDrift => write!(f, "d_cdt"),
            Self::WetZtd(src) => write!(f, "wetMap[{}]", src),
            Self::InterFrequencyBias(chan) => write!(f, "ifb[{}]", chan),
            Self::Ionosphere(sv) => write!(f, "iono({})", sv),
            Self::Ambiguity(sv, arc) => write!(f, "N({},{})", sv, arc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order_is_transitive_and_deterministic() {
        let mut ids = vec![
            ParameterId::Ambiguity(SV::new(Constellation::GPS, 5), 2),
            ParameterId::Dz,
            ParameterId::ClockBias(Constellation::Glonass),
            ParameterId::Dx,
            ParameterId::WetZtd(0),
            ParameterId::Ambiguity(SV::new(Constellation::GPS, 1), 9),
        ];
        ids.sort();
        assert_eq!(ids[0], ParameterId::Dx);
        assert_eq!(ids[1], ParameterId::Dz);
        assert!(matches!(ids[2], ParameterId::ClockBias(_)));
        assert!(matches!(ids[3], ParameterId::WetZtd(_)));
        // ambiguities sort by (constellation, prn) before arc id
        assert_eq!(
            ids[4],
            ParameterId::Ambiguity(SV::new(Constellation::GPS, 1), 9)
        );
        assert_eq!(
            ids[5],
            ParameterId::Ambiguity(SV::new(Constellation::GPS, 5), 2)
        );
    }

    #[test]
    fn weight_factors_match_default_table() {
        assert_eq!(
            MeasurementType::PrefitCodeIonoFree.default_weight_factor(),
            Some(1.0)
        );
        assert_eq!(
            MeasurementType::PrefitPhaseIonoFree.default_weight_factor(),
            Some(1.0e4)
        );
        assert_eq!(MeasurementType::PostfitCodeIonoFree.default_weight_factor(), None);
    }
}
