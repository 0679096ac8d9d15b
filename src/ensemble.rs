//! Ensemble combiner.
//!
//! Weighted statistical fusion of labelled observations and model outputs
//! into one distribution summary, with a circular-statistics variant for
//! directions.
//!
//! ## Pipeline
//! 1. Drop non-finite members, require `min_members`
//! 2. Weight = base weight (source kind) × quality multiplier × distance factor
//!    (observations only: `min(1, (10 / max(d, 1))²)`)
//! 3. Outlier rejection when 3+ members (z-score, or > 90° for directions)
//! 4. Re-check `min_members`, normalize weights to sum to 1
//! 5. Weighted mean/variance; median and p10/p90 from the unweighted values
//! 6. Confidence from the standard deviation, fused quality from weight shares

use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};
use crate::geo_utils::{angular_difference, normalize_degrees};
use crate::{Observation, QualityFlag, SourceKind};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Circular standard deviation thresholds (degrees) for direction confidence.
const CIRCULAR_HIGH_DEG: f64 = 30.0;
const CIRCULAR_MEDIUM_DEG: f64 = 60.0;
/// Direction members further than this from the circular mean are outliers.
const CIRCULAR_OUTLIER_DEG: f64 = 90.0;

/// Base trust weight per source kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseWeights {
    pub observation: f64,
    pub model: f64,
    pub interpolated: f64,
}

impl BaseWeights {
    pub fn get(&self, kind: SourceKind) -> f64 {
        match kind {
            SourceKind::Observation => self.observation,
            SourceKind::Model => self.model,
            SourceKind::Interpolated => self.interpolated,
        }
    }
}

impl Default for BaseWeights {
    fn default() -> Self {
        Self {
            observation: 0.5,
            model: 0.3,
            interpolated: 0.2,
        }
    }
}

/// Weight multiplier per quality label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityMultipliers {
    pub primary: f64,
    pub interpolated: f64,
    pub modeled: f64,
    pub stale: f64,
    pub historical: f64,
    pub missing: f64,
}

impl QualityMultipliers {
    pub fn get(&self, quality: QualityFlag) -> f64 {
        match quality {
            QualityFlag::Primary => self.primary,
            QualityFlag::Interpolated => self.interpolated,
            QualityFlag::Modeled => self.modeled,
            QualityFlag::Stale => self.stale,
            QualityFlag::Historical => self.historical,
            QualityFlag::Missing => self.missing,
        }
    }
}

impl Default for QualityMultipliers {
    fn default() -> Self {
        Self {
            primary: 1.0,
            interpolated: 0.8,
            modeled: 0.6,
            stale: 0.4,
            historical: 0.2,
            missing: 0.0,
        }
    }
}

/// Standard deviation cut-offs for the linear confidence label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high: 0.3,
            medium: 0.6,
        }
    }
}

/// Configuration for ensemble fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Minimum members required before and after outlier rejection.
    /// Default: 2
    pub min_members: usize,
    /// z-score above which a member is rejected. Default: 3.0
    pub outlier_threshold: f64,
    pub base_weights: BaseWeights,
    pub quality_multipliers: QualityMultipliers,
    pub confidence_thresholds: ConfidenceThresholds,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            min_members: 2,
            outlier_threshold: 3.0,
            base_weights: BaseWeights::default(),
            quality_multipliers: QualityMultipliers::default(),
            confidence_thresholds: ConfidenceThresholds::default(),
        }
    }
}

impl EnsembleConfig {
    /// Reject configurations that can only come from a programming error.
    pub fn validate(&self) -> Result<()> {
        if self.min_members < 1 {
            return Err(FusionError::config("min_members must be at least 1"));
        }
        if !(self.outlier_threshold.is_finite() && self.outlier_threshold > 0.0) {
            return Err(FusionError::config("outlier_threshold must be positive"));
        }
        let b = &self.base_weights;
        let q = &self.quality_multipliers;
        let weights = [
            b.observation,
            b.model,
            b.interpolated,
            q.primary,
            q.interpolated,
            q.modeled,
            q.stale,
            q.historical,
            q.missing,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(FusionError::config(
                "weights and multipliers must be finite and non-negative",
            ));
        }
        let c = &self.confidence_thresholds;
        if !(c.high.is_finite() && c.medium.is_finite() && c.high <= c.medium) {
            return Err(FusionError::config(
                "confidence thresholds must be finite with high <= medium",
            ));
        }
        Ok(())
    }

    /// Load a configuration from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| FusionError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn member_weight(&self, member: &Observation) -> f64 {
        let distance_factor = if member.source_kind == SourceKind::Observation {
            (10.0 / member.distance.max(1.0)).powi(2).min(1.0)
        } else {
            1.0
        };
        self.base_weights.get(member.source_kind)
            * self.quality_multipliers.get(member.quality)
            * distance_factor
    }
}

/// Confidence label derived from the spread of the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Distribution summary of a fused ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p10: f64,
    pub p90: f64,
    pub confidence: Confidence,
    pub quality: QualityFlag,
    /// Source labels of the members that survived outlier rejection
    pub sources: Vec<String>,
    pub member_count: usize,
}

/// A member with its effective (later normalized) weight.
#[derive(Debug, Clone, Copy)]
struct Weighted<'a> {
    member: &'a Observation,
    weight: f64,
}

/// Combine linear quantities (heights, periods, speeds, temperatures).
///
/// Returns `None` when fewer than `min_members` usable members remain before
/// or after outlier rejection, or when every remaining weight is zero.
pub fn combine_ensemble(members: &[Observation], config: &EnsembleConfig) -> Option<EnsembleResult> {
    let weighted = weigh_members(members, config)?;
    let kept = reject_linear_outliers(weighted, config.outlier_threshold);
    let kept = normalize(kept, config.min_members.max(1))?;

    // Percentiles are taken over the unweighted values
    let mut values: Vec<f64> = kept.iter().map(|w| w.member.value).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let min = values[0];
    let max = values[values.len() - 1];

    // Rounding in the normalized weights can push the mean a hair outside the sample range
    let mean = kept
        .iter()
        .map(|w| w.weight * w.member.value)
        .sum::<f64>()
        .clamp(min, max);
    let variance: f64 = kept
        .iter()
        .map(|w| w.weight * (w.member.value - mean).powi(2))
        .sum();
    let std_dev = variance.sqrt();

    let thresholds = &config.confidence_thresholds;
    let confidence = if std_dev < thresholds.high {
        Confidence::High
    } else if std_dev < thresholds.medium {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    Some(EnsembleResult {
        mean,
        median: percentile(&values, 0.5),
        std_dev,
        min,
        max,
        p10: percentile(&values, 0.1),
        p90: percentile(&values, 0.9),
        confidence,
        quality: fused_quality(&kept),
        sources: kept.iter().map(|w| w.member.source.clone()).collect(),
        member_count: kept.len(),
    })
}

/// Combine angular quantities (degrees) with circular statistics.
///
/// The mean is the weighted circular mean in `[0, 360)`; the spread is the
/// circular standard deviation `sqrt(-2·ln R)` in degrees. `median` equals
/// the mean and `p10`/`p90` are `mean ∓ std_dev`, not true percentiles.
/// `min`/`max` are the member extremes unwrapped around the mean, so they
/// may fall outside `[0, 360)` (members 0° and 350° give 350..360).
pub fn combine_directions(members: &[Observation], config: &EnsembleConfig) -> Option<EnsembleResult> {
    let weighted = weigh_members(members, config)?;
    let kept = reject_circular_outliers(weighted);
    let kept = normalize(kept, config.min_members.max(1))?;

    let (sum_cos, sum_sin) = kept.iter().fold((0.0, 0.0), |(c, s), w| {
        let rad = w.member.value.to_radians();
        (c + w.weight * rad.cos(), s + w.weight * rad.sin())
    });
    let mean = normalize_degrees(sum_sin.atan2(sum_cos).to_degrees());

    // Mean resultant length, kept inside (0, 1] against rounding
    let resultant = (sum_cos * sum_cos + sum_sin * sum_sin)
        .sqrt()
        .clamp(1e-12, 1.0);
    let std_dev = (-2.0 * resultant.ln()).sqrt().to_degrees();

    let confidence = if std_dev < CIRCULAR_HIGH_DEG {
        Confidence::High
    } else if std_dev < CIRCULAR_MEDIUM_DEG {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    // Extremes are measured on the arc centred on the mean, in [mean-180, mean+180)
    let unwrapped: Vec<f64> = kept
        .iter()
        .map(|w| mean + (w.member.value - mean + 180.0).rem_euclid(360.0) - 180.0)
        .collect();
    let min = unwrapped.iter().copied().fold(f64::INFINITY, f64::min);
    let max = unwrapped.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Some(EnsembleResult {
        mean,
        median: mean,
        std_dev,
        min,
        max,
        p10: mean - std_dev,
        p90: mean + std_dev,
        confidence,
        quality: fused_quality(&kept),
        sources: kept.iter().map(|w| w.member.source.clone()).collect(),
        member_count: kept.len(),
    })
}

/// Combine many independent member sets.
pub fn combine_ensemble_batch(
    member_sets: &[Vec<Observation>],
    config: &EnsembleConfig,
) -> Vec<Option<EnsembleResult>> {
    member_sets
        .iter()
        .map(|members| combine_ensemble(members, config))
        .collect()
}

/// Parallel version of [`combine_ensemble_batch`].
/// Falls back to sequential for small batches.
#[cfg(feature = "parallel")]
pub fn combine_ensemble_batch_parallel(
    member_sets: &[Vec<Observation>],
    config: &EnsembleConfig,
) -> Vec<Option<EnsembleResult>> {
    if member_sets.len() < 256 {
        return combine_ensemble_batch(member_sets, config);
    }
    member_sets
        .par_iter()
        .map(|members| combine_ensemble(members, config))
        .collect()
}

/// Linear-interpolated percentile over an ascending slice, `p` in `[0, 1]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

fn weigh_members<'a>(members: &'a [Observation], config: &EnsembleConfig) -> Option<Vec<Weighted<'a>>> {
    let weighted: Vec<Weighted> = members
        .iter()
        .filter(|m| m.is_usable())
        .map(|member| Weighted {
            member,
            weight: config.member_weight(member),
        })
        .collect();

    if weighted.len() < config.min_members.max(1) {
        return None;
    }
    Some(weighted)
}

fn reject_linear_outliers(weighted: Vec<Weighted>, threshold: f64) -> Vec<Weighted> {
    if weighted.len() < 3 {
        return weighted;
    }
    let n = weighted.len() as f64;
    let mean = weighted.iter().map(|w| w.member.value).sum::<f64>() / n;
    let variance = weighted
        .iter()
        .map(|w| (w.member.value - mean).powi(2))
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();

    // Identical values: nothing to reject
    if std_dev == 0.0 || !std_dev.is_finite() {
        return weighted;
    }

    weighted
        .into_iter()
        .filter(|w| ((w.member.value - mean) / std_dev).abs() <= threshold)
        .collect()
}

fn reject_circular_outliers(weighted: Vec<Weighted>) -> Vec<Weighted> {
    if weighted.len() < 3 {
        return weighted;
    }
    let (sum_cos, sum_sin) = weighted.iter().fold((0.0, 0.0), |(c, s), w| {
        let rad = w.member.value.to_radians();
        (c + rad.cos(), s + rad.sin())
    });
    let mean = normalize_degrees(sum_sin.atan2(sum_cos).to_degrees());

    weighted
        .into_iter()
        .filter(|w| angular_difference(w.member.value, mean) <= CIRCULAR_OUTLIER_DEG)
        .collect()
}

fn normalize(mut kept: Vec<Weighted>, min_members: usize) -> Option<Vec<Weighted>> {
    if kept.len() < min_members {
        return None;
    }
    let total: f64 = kept.iter().map(|w| w.weight).sum();
    if !(total > 0.0 && total.is_finite()) {
        return None;
    }
    for w in &mut kept {
        w.weight /= total;
    }
    Some(kept)
}

fn fused_quality(kept: &[Weighted]) -> QualityFlag {
    let share = |flags: &[QualityFlag]| -> f64 {
        kept.iter()
            .filter(|w| flags.contains(&w.member.quality))
            .map(|w| w.weight)
            .sum()
    };

    if share(&[QualityFlag::Primary]) > 0.6 {
        QualityFlag::Primary
    } else if share(&[QualityFlag::Primary, QualityFlag::Interpolated]) > 0.6 {
        QualityFlag::Interpolated
    } else if share(&[QualityFlag::Modeled]) > 0.5 {
        QualityFlag::Modeled
    } else {
        QualityFlag::Interpolated
    }
}
