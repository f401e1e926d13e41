//! Reference channel selection.
//!
//! For each filtered batch the eligible rate-tested channels are scored by
//! every configured method. The highest-priority method that produces a pick
//! wins; the others are kept as diagnostics so disagreements are visible.

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ReferenceConfig;
use crate::types::{BatchKey, BatchRateStatus, ChannelSummary, RateStatus, ReferenceMethod, TestMode};

pub mod curve;
pub mod pca;
pub mod traditional;

/// One scoring method's pick: a position into the candidate list and the
/// method's score for it (lower is better).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MethodPick {
    pub method: ReferenceMethod,
    pub index: usize,
    pub score: f64,
}

/// Candidate pool for a batch after the rate-status cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct Eligibility<'c> {
    pub candidates: Vec<&'c ChannelSummary>,
    pub status: Option<BatchRateStatus>,
}

/// Decide which surviving channels may serve as the reference.
///
/// Only rate-tested channels take part. Normal channels are preferred, then
/// low-efficiency ones; a batch with only severe channels has no reference.
pub fn eligible<'c>(survivors: &[&'c ChannelSummary]) -> Eligibility<'c> {
    let rate: Vec<&'c ChannelSummary> = survivors
        .iter()
        .copied()
        .filter(|c| c.test_mode == TestMode::Rate1C)
        .collect();

    let with_status = |status: RateStatus| -> Vec<&'c ChannelSummary> {
        rate.iter().copied().filter(|c| c.rate.status == status).collect()
    };

    let normal = with_status(RateStatus::Normal);
    if !normal.is_empty() {
        return Eligibility {
            candidates: normal,
            status: Some(BatchRateStatus::Normal),
        };
    }

    let low = with_status(RateStatus::LowEfficiency);
    if !low.is_empty() {
        return Eligibility {
            candidates: low,
            status: Some(BatchRateStatus::LowEfficiency),
        };
    }

    let status = rate
        .iter()
        .any(|c| c.rate.status.is_severe())
        .then_some(BatchRateStatus::VeryLowEfficiencyNoReference);
    Eligibility {
        candidates: Vec::new(),
        status,
    }
}

/// The chosen reference channel and how it was chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceChoice<'c> {
    pub channel: &'c ChannelSummary,
    pub method: ReferenceMethod,
}

/// What one scoring method picked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodOutcome {
    pub method: ReferenceMethod,
    pub channel: Option<String>,
    pub score: Option<f64>,
}

/// Record of one batch's reference decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceDiagnostics {
    pub batch: BatchKey,
    pub candidate_count: usize,
    pub batch_rate_status: Option<BatchRateStatus>,
    pub method_used: Option<ReferenceMethod>,
    pub chosen: Option<String>,
    pub outcomes: Vec<MethodOutcome>,
    /// Methods whose pick differs from the chosen channel
    pub disagreements: Vec<ReferenceMethod>,
}

/// Full reference result for one batch.
#[derive(Debug, Clone)]
pub struct BatchReference<'c> {
    pub status: Option<BatchRateStatus>,
    pub rate_valid_count: usize,
    pub choice: Option<ReferenceChoice<'c>>,
    pub diagnostics: ReferenceDiagnostics,
}

/// Chooses a reference channel per batch.
pub struct ReferenceChannelSelector<'a> {
    config: &'a ReferenceConfig,
}

impl<'a> ReferenceChannelSelector<'a> {
    pub fn new(config: &'a ReferenceConfig) -> Self {
        Self { config }
    }

    /// Run one scoring method.
    pub fn score(
        &self,
        method: ReferenceMethod,
        candidates: &[&ChannelSummary],
    ) -> Option<MethodPick> {
        match method {
            ReferenceMethod::Traditional => {
                traditional::nearest_to_mean(candidates, &self.config.traditional)
            }
            ReferenceMethod::Pca => pca::nearest_to_centroid(candidates, &self.config.pca),
            ReferenceMethod::CurveRetentionMse => {
                curve::lowest_curve_mse(candidates, &self.config.curve)
            }
            ReferenceMethod::SoleCandidate | ReferenceMethod::FirstCandidate => None,
        }
    }

    /// Select among eligible candidates.
    pub fn select<'c>(
        &self,
        batch: &BatchKey,
        candidates: &[&'c ChannelSummary],
    ) -> (Option<ReferenceChoice<'c>>, ReferenceDiagnostics) {
        let mut diagnostics = ReferenceDiagnostics {
            batch: batch.clone(),
            candidate_count: candidates.len(),
            batch_rate_status: None,
            method_used: None,
            chosen: None,
            outcomes: Vec::new(),
            disagreements: Vec::new(),
        };

        let choice = match candidates {
            [] => None,
            [only] => Some(ReferenceChoice {
                channel: *only,
                method: ReferenceMethod::SoleCandidate,
            }),
            _ => {
                let picks: Vec<(ReferenceMethod, Option<MethodPick>)> = self
                    .config
                    .method_priority
                    .iter()
                    .map(|&method| (method, self.score(method, candidates)))
                    .collect();

                diagnostics.outcomes = picks
                    .iter()
                    .map(|(method, pick)| MethodOutcome {
                        method: *method,
                        channel: pick.map(|p| candidates[p.index].channel.to_string()),
                        score: pick.map(|p| p.score),
                    })
                    .collect();

                match picks.iter().find_map(|(_, pick)| *pick) {
                    Some(winner) => {
                        diagnostics.disagreements = picks
                            .iter()
                            .filter_map(|(method, pick)| {
                                pick.filter(|p| p.index != winner.index).map(|_| *method)
                            })
                            .collect();
                        Some(ReferenceChoice {
                            channel: candidates[winner.index],
                            method: winner.method,
                        })
                    }
                    None => {
                        debug!(batch = %batch, "No scoring method produced a pick, using first candidate");
                        Some(ReferenceChoice {
                            channel: candidates[0],
                            method: ReferenceMethod::FirstCandidate,
                        })
                    }
                }
            }
        };

        if let Some(choice) = &choice {
            diagnostics.method_used = Some(choice.method);
            diagnostics.chosen = Some(choice.channel.channel.to_string());
        }

        if self.config.warn_on_disagreement && !diagnostics.disagreements.is_empty() {
            warn!(
                batch = %batch,
                chosen = ?diagnostics.chosen,
                method = ?diagnostics.method_used,
                disagreeing = ?diagnostics.disagreements,
                "Reference methods disagree"
            );
        }

        (choice, diagnostics)
    }

    /// Eligibility plus selection for one filtered batch.
    pub fn resolve<'c>(&self, batch: &BatchKey, survivors: &[&'c ChannelSummary]) -> BatchReference<'c> {
        let Eligibility { candidates, status } = eligible(survivors);
        let (choice, mut diagnostics) = self.select(batch, &candidates);
        diagnostics.batch_rate_status = status;

        debug!(
            batch = %batch,
            candidates = candidates.len(),
            status = ?status,
            reference = ?diagnostics.chosen,
            method = ?diagnostics.method_used,
            "Reference resolved"
        );

        BatchReference {
            status,
            rate_valid_count: candidates.len(),
            choice,
            diagnostics,
        }
    }
}
