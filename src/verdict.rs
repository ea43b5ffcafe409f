//! Threshold ladders and confidence verdicts
//!
//! Every model ships a ladder of four descending cut points that splits the
//! cosine score range into five confidence bands. Comparisons are strict:
//! a score sitting exactly on a cut point belongs to the lower band.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Four strictly decreasing similarity cut points `[t0 > t1 > t2 > t3]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "[f32; 4]")]
pub struct ThresholdLadder([f32; 4]);

impl ThresholdLadder {
    /// Build a ladder, rejecting cut points that are not strictly decreasing
    pub fn new(cuts: [f32; 4]) -> Result<Self, String> {
        if cuts.iter().any(|c| !c.is_finite()) {
            return Err(format!("threshold ladder contains non-finite values: {:?}", cuts));
        }
        if cuts.windows(2).any(|w| w[0] <= w[1]) {
            return Err(format!(
                "threshold ladder must be strictly decreasing, got {:?}",
                cuts
            ));
        }
        Ok(Self(cuts))
    }

    pub fn cuts(&self) -> [f32; 4] {
        self.0
    }

    /// Second cut point, used for "likely same speaker" pairs and live acceptance
    pub fn acceptance(&self) -> f32 {
        self.0[1]
    }
}

impl From<ThresholdLadder> for [f32; 4] {
    fn from(ladder: ThresholdLadder) -> Self {
        ladder.0
    }
}

impl TryFrom<[f32; 4]> for ThresholdLadder {
    type Error = String;

    fn try_from(cuts: [f32; 4]) -> Result<Self, Self::Error> {
        Self::new(cuts)
    }
}

impl<'de> Deserialize<'de> for ThresholdLadder {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let cuts = <[f32; 4]>::deserialize(deserializer)?;
        Self::new(cuts).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ThresholdLadder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [t0, t1, t2, t3] = self.0;
        write!(f, "[{:.2}, {:.2}, {:.2}, {:.2}]", t0, t1, t2, t3)
    }
}

/// Confidence verdict for a similarity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    SameVeryHigh,
    SameHigh,
    PossiblySameMedium,
    LikelyDifferentLow,
    DifferentVeryLow,
    /// Weights could not be loaded; the score carries no meaning
    Unreliable,
}

impl Verdict {
    /// Machine-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::SameVeryHigh => "SAME_VERY_HIGH",
            Verdict::SameHigh => "SAME_HIGH",
            Verdict::PossiblySameMedium => "POSSIBLY_SAME_MEDIUM",
            Verdict::LikelyDifferentLow => "LIKELY_DIFFERENT_LOW",
            Verdict::DifferentVeryLow => "DIFFERENT_VERY_LOW",
            Verdict::Unreliable => "UNRELIABLE",
        }
    }

    /// Human-readable interpretation for console output
    pub fn description(&self) -> &'static str {
        match self {
            Verdict::SameVeryHigh => "same speaker (very high confidence)",
            Verdict::SameHigh => "probably the same speaker (high confidence)",
            Verdict::PossiblySameMedium => "possibly the same speaker (medium confidence)",
            Verdict::LikelyDifferentLow => "probably different speakers (low similarity)",
            Verdict::DifferentVeryLow => "different speakers (very low similarity)",
            Verdict::Unreliable => "unreliable result: model weights not loaded",
        }
    }

    /// Whether the verdict claims the two recordings share a speaker
    pub fn is_same_speaker(&self) -> bool {
        matches!(self, Verdict::SameVeryHigh | Verdict::SameHigh)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a score onto the ladder's confidence bands
///
/// An unreliable model never yields a same/different verdict.
pub fn classify(score: f32, ladder: &ThresholdLadder, reliable: bool) -> Verdict {
    if !reliable {
        return Verdict::Unreliable;
    }

    let [t0, t1, t2, t3] = ladder.cuts();
    if score > t0 {
        Verdict::SameVeryHigh
    } else if score > t1 {
        Verdict::SameHigh
    } else if score > t2 {
        Verdict::PossiblySameMedium
    } else if score > t3 {
        Verdict::LikelyDifferentLow
    } else {
        Verdict::DifferentVeryLow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campplus_ladder() -> ThresholdLadder {
        ThresholdLadder::new([0.75, 0.65, 0.50, 0.35]).unwrap()
    }

    #[test]
    fn test_classify_bands() {
        let ladder = campplus_ladder();
        assert_eq!(classify(0.80, &ladder, true), Verdict::SameVeryHigh);
        assert_eq!(classify(0.70, &ladder, true), Verdict::SameHigh);
        assert_eq!(classify(0.55, &ladder, true), Verdict::PossiblySameMedium);
        assert_eq!(classify(0.40, &ladder, true), Verdict::LikelyDifferentLow);
        assert_eq!(classify(0.10, &ladder, true), Verdict::DifferentVeryLow);
        assert_eq!(classify(-0.9, &ladder, true), Verdict::DifferentVeryLow);
    }

    #[test]
    fn test_classify_unreliable() {
        let ladder = campplus_ladder();
        for score in [0.99, 0.70, 0.40, 0.0, -1.0] {
            assert_eq!(classify(score, &ladder, false), Verdict::Unreliable);
        }
    }

    #[test]
    fn test_cut_point_falls_to_lower_band() {
        let ladder = campplus_ladder();
        assert_eq!(classify(0.75, &ladder, true), Verdict::SameHigh);
        assert_eq!(classify(0.35, &ladder, true), Verdict::DifferentVeryLow);
    }

    #[test]
    fn test_ladder_must_decrease() {
        assert!(ThresholdLadder::new([0.7, 0.6, 0.45, 0.3]).is_ok());
        assert!(ThresholdLadder::new([0.7, 0.7, 0.45, 0.3]).is_err());
        assert!(ThresholdLadder::new([0.3, 0.45, 0.6, 0.7]).is_err());
        assert!(ThresholdLadder::new([f32::NAN, 0.6, 0.45, 0.3]).is_err());
    }

    #[test]
    fn test_ladder_deserialize_validates() {
        #[derive(Deserialize)]
        struct Wrapper {
            thresholds: ThresholdLadder,
        }

        let ok: Wrapper = toml::from_str("thresholds = [0.8, 0.6, 0.4, 0.2]").unwrap();
        assert_eq!(ok.thresholds.acceptance(), 0.6);

        let bad = toml::from_str::<Wrapper>("thresholds = [0.2, 0.4, 0.6, 0.8]");
        assert!(bad.is_err());
    }

    #[test]
    fn test_verdict_labels() {
        assert_eq!(Verdict::SameVeryHigh.to_string(), "SAME_VERY_HIGH");
        assert_eq!(Verdict::Unreliable.to_string(), "UNRELIABLE");
        assert!(Verdict::SameHigh.is_same_speaker());
        assert!(!Verdict::PossiblySameMedium.is_same_speaker());
    }
}
