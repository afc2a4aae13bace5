//! Confidence scoring
//!
//! Combines the classification, the number of viable candidates and any
//! stored pattern confidence into one score in [0, 1]. Scoring is pure and
//! deterministic.

use locheal_common::{Error, FailureClassification, FailureKind, Result};
use serde::{Deserialize, Serialize};

/// Tunable scoring constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub base: f64,
    pub selector_boost: f64,
    pub dom_change_boost: f64,
    pub timing_boost: f64,
    pub application_bug_penalty: f64,
    /// Upper bound of the candidate contribution
    pub candidate_budget: f64,
    /// Contribution of the first candidate; each further one adds half the previous
    pub first_candidate_share: f64,
    pub refinement_boost: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base: 0.3,
            selector_boost: 0.3,
            dom_change_boost: 0.25,
            timing_boost: 0.2,
            application_bug_penalty: 0.1,
            candidate_budget: 0.3,
            first_candidate_share: 0.15,
            refinement_boost: 0.05,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<()> {
        let all = [
            self.base,
            self.selector_boost,
            self.dom_change_boost,
            self.timing_boost,
            self.application_bug_penalty,
            self.candidate_budget,
            self.first_candidate_share,
            self.refinement_boost,
        ];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::InvalidConfig(
                "scoring weights must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }

    fn classification_adjustment(&self, kind: FailureKind) -> f64 {
        match kind {
            FailureKind::SelectorNotFound => self.selector_boost,
            FailureKind::DomChange => self.dom_change_boost,
            FailureKind::Timing => self.timing_boost,
            FailureKind::ApplicationBug => -self.application_bug_penalty,
            FailureKind::Network | FailureKind::Auth | FailureKind::Unknown => 0.0,
        }
    }

    fn candidate_contribution(&self, candidate_count: usize) -> f64 {
        let mut total = 0.0;
        let mut share = self.first_candidate_share;
        for _ in 0..candidate_count {
            total += share;
            share /= 2.0;
            if total >= self.candidate_budget || share < f64::EPSILON {
                break;
            }
        }
        total.min(self.candidate_budget)
    }
}

/// Confidence scorer
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    weights: ScoringWeights,
}

impl ConfidenceScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(
        &self,
        classification: &FailureClassification,
        candidate_count: usize,
        existing_pattern_confidence: Option<f64>,
    ) -> f64 {
        let w = &self.weights;
        let mut score = w.base
            + w.classification_adjustment(classification.kind)
            + w.candidate_contribution(candidate_count);

        if let Some(stored) = existing_pattern_confidence.filter(|c| c.is_finite()) {
            score = score.max(stored);
        }
        if classification.refinement.is_some() {
            score += w.refinement_boost;
        }

        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Score with the default weights
pub fn score(
    classification: &FailureClassification,
    candidate_count: usize,
    existing_pattern_confidence: Option<f64>,
) -> f64 {
    ConfidenceScorer::default().score(classification, candidate_count, existing_pattern_confidence)
}
