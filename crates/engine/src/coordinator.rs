//! Healing coordinator
//!
//! Owns the per-failure state machine:
//!
//! ```text
//! pending -> analyzing -> healed | failed | bug_confirmed
//!               ^                    |
//!               +---- resubmit ------+   (while attempts < max_attempts)
//! ```
//!
//! Analysis of one item runs behind `catch_unwind`, so a panic while
//! looking at a bad report fails that item instead of the caller. Record
//! store failures are returned to the caller as `StoreUnavailable`; the
//! item stays in `analyzing` until it is resubmitted.

use locheal_common::store::{get_as, list_as, put_as};
use locheal_common::{
    Error, FailureClassification, FailureKind, FailureReport, HealSource, HealingPattern,
    HealingQueueItem, HealingStatus, LocatorCandidate, QueueSummary, RecordStore, Result,
};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::classifier::classify_report;
use crate::config::HealingConfig;
use crate::finder::CandidateFinder;
use crate::patterns::{page_context, PatternStore};
use crate::scorer::ConfidenceScorer;

/// Record-store namespace of submitted reports
pub const REPORT_NAMESPACE: &str = "failure_reports";

/// Record-store namespace of queue items
pub const QUEUE_NAMESPACE: &str = "healing_queue";

/// Extra input for another analysis pass of a failed item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResubmitRequest {
    /// Fresher snapshot replacing the one captured at failure time
    #[serde(default)]
    pub dom_snapshot: Option<String>,
    /// Locator chosen by a reviewer
    #[serde(default)]
    pub manual_locator: Option<String>,
}

enum Verdict {
    BugConfirmed,
    Heal { locator: String, source: HealSource },
    Fail { reason: String },
}

struct Analysis {
    classification: FailureClassification,
    failing_locator: Option<String>,
    candidates: Vec<LocatorCandidate>,
    confidence: f64,
    reused: Option<HealingPattern>,
    verdict: Verdict,
}

pub struct HealingCoordinator {
    store: Arc<dyn RecordStore>,
    patterns: PatternStore,
    finder: CandidateFinder,
    scorer: ConfidenceScorer,
    config: HealingConfig,
}

impl HealingCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, config: HealingConfig) -> Self {
        Self {
            patterns: PatternStore::new(store.clone()),
            finder: CandidateFinder::from_config(&config),
            scorer: ConfidenceScorer::new(config.scoring.clone()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    pub fn patterns(&self) -> &PatternStore {
        &self.patterns
    }

    /// Process a failure until its item reaches a terminal state
    pub fn submit_failure(&self, report: FailureReport) -> Result<HealingQueueItem> {
        self.submit(report, None)
    }

    /// Process a failure with a reviewer-chosen replacement locator
    pub fn submit_with_override(
        &self,
        report: FailureReport,
        locator: &str,
    ) -> Result<HealingQueueItem> {
        self.submit(report, Some(locator))
    }

    fn submit(&self, report: FailureReport, manual: Option<&str>) -> Result<HealingQueueItem> {
        let mut item = HealingQueueItem::new(&report, page_context(&report.page_url));
        put_as(
            self.store.as_ref(),
            REPORT_NAMESPACE,
            &item.id,
            &report,
            item.created_at,
        )?;
        self.save(&item)?;

        info!(
            "Queued healing item {} for test {} ({})",
            item.id, item.test_id, item.test_name
        );
        self.process(&mut item, &report, manual)?;
        Ok(item)
    }

    /// Send a failed item through analysis again.
    ///
    /// Items left in `analyzing` by a record store failure are accepted too
    /// and resume without spending an attempt.
    pub fn resubmit(&self, item_id: &str, request: ResubmitRequest) -> Result<HealingQueueItem> {
        let mut item = self.get_item(item_id)?;
        let max_attempts = self.config.max_attempts;

        if !matches!(item.status, HealingStatus::Failed | HealingStatus::Analyzing) {
            return Err(Error::InvalidStateTransition {
                from: item.status.to_string(),
                to: HealingStatus::Pending.to_string(),
            });
        }
        if item.attempts >= max_attempts {
            return Err(Error::RetryBudgetExhausted {
                id: item.id,
                attempts: item.attempts,
            });
        }

        let mut report: FailureReport = get_as(self.store.as_ref(), REPORT_NAMESPACE, item_id)?
            .ok_or_else(|| Error::not_found("failure report", item_id))?;
        if let Some(dom) = request.dom_snapshot {
            report.dom_snapshot = dom;
            put_as(
                self.store.as_ref(),
                REPORT_NAMESPACE,
                item_id,
                &report,
                item.created_at,
            )?;
        }

        item.transition(HealingStatus::Pending, max_attempts)?;
        item.last_error = None;
        self.save(&item)?;
        info!(
            "Resubmitted healing item {} ({} of {} attempts used)",
            item.id, item.attempts, max_attempts
        );

        self.process(&mut item, &report, request.manual_locator.as_deref())?;
        Ok(item)
    }

    /// Feed a re-run result for a healed item back into its pattern.
    ///
    /// A reuse of a stored pattern already counted as a success when the
    /// item was healed, so only a failed re-run changes such a pattern.
    pub fn confirm_outcome(&self, item_id: &str, succeeded: bool) -> Result<Option<HealingPattern>> {
        let item = self.get_item(item_id)?;
        if item.status != HealingStatus::Healed {
            return Err(Error::InvalidStateTransition {
                from: item.status.to_string(),
                to: "confirmed".to_string(),
            });
        }

        let (Some(original), Some(chosen)) = (&item.failing_locator, &item.chosen_locator) else {
            return Ok(None);
        };
        let Some(pattern) = self.patterns.find(&item.test_kind, original, &item.page_context)?
        else {
            debug!("Pattern for item {} no longer exists", item.id);
            return Ok(None);
        };
        if &pattern.healed_locator != chosen {
            debug!("Pattern for item {} now points elsewhere", item.id);
            return Ok(None);
        }
        if succeeded && item.heal_source == Some(HealSource::Pattern) {
            return Ok(Some(pattern));
        }

        let updated = self.patterns.record_outcome(&pattern, succeeded)?;
        info!(
            "Confirmed item {} as {}; pattern confidence now {:.2}",
            item.id,
            if succeeded { "working" } else { "broken" },
            updated.confidence
        );
        Ok(Some(updated))
    }

    pub fn get_item(&self, item_id: &str) -> Result<HealingQueueItem> {
        get_as(self.store.as_ref(), QUEUE_NAMESPACE, item_id)?
            .ok_or_else(|| Error::not_found("healing item", item_id))
    }

    /// Retained items, most recently updated first
    pub fn list_items(&self, status: Option<HealingStatus>) -> Result<Vec<HealingQueueItem>> {
        let items: Vec<HealingQueueItem> = list_as(self.store.as_ref(), QUEUE_NAMESPACE)?;
        Ok(items
            .into_iter()
            .filter(|item| status.map_or(true, |s| item.status == s))
            .collect())
    }

    pub fn queue_summary(&self) -> Result<QueueSummary> {
        Ok(QueueSummary::from_items(&self.list_items(None)?))
    }

    /// Purge patterns outside the configured retention window
    pub fn run_cleanup(&self) -> Result<usize> {
        self.patterns.cleanup(self.config.retention_days)
    }

    fn save(&self, item: &HealingQueueItem) -> Result<()> {
        put_as(
            self.store.as_ref(),
            QUEUE_NAMESPACE,
            &item.id,
            item,
            item.updated_at,
        )
    }

    fn process(
        &self,
        item: &mut HealingQueueItem,
        report: &FailureReport,
        manual: Option<&str>,
    ) -> Result<()> {
        let max_attempts = self.config.max_attempts;
        item.transition(HealingStatus::Analyzing, max_attempts)?;
        self.save(item)?;

        let analysis = catch_unwind(AssertUnwindSafe(|| self.analyze(item, report, manual)));
        let analysis = match analysis {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) if e.is_store_unavailable() => {
                error!("Record store failed while analyzing {}: {}", item.id, e);
                return Err(e);
            }
            Ok(Err(e)) => {
                warn!("Analysis of {} failed: {}", item.id, e);
                return self.fail(item, e.to_string());
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Analysis of {} panicked: {}", item.id, message);
                return self.fail(item, format!("analysis panicked: {}", message));
            }
        };

        self.apply(item, analysis)
    }

    fn analyze(
        &self,
        item: &HealingQueueItem,
        report: &FailureReport,
        manual: Option<&str>,
    ) -> Result<Analysis> {
        let classification = classify_report(report);
        debug!("Item {} classified as {}", item.id, classification.label());

        let failing_locator = report
            .target_locator
            .clone()
            .filter(|l| !l.trim().is_empty())
            .or_else(|| classification.extracted_locator.clone());

        let mut analysis = Analysis {
            classification,
            failing_locator,
            candidates: Vec::new(),
            confidence: 0.0,
            reused: None,
            verdict: Verdict::Fail {
                reason: String::new(),
            },
        };

        if analysis.classification.kind == FailureKind::ApplicationBug {
            if manual.is_some() {
                warn!("Ignoring manual locator for {}: failure is an application bug", item.id);
            }
            analysis.confidence = self.scorer.score(&analysis.classification, 0, None);
            analysis.verdict = Verdict::BugConfirmed;
            return Ok(analysis);
        }

        let Some(locator) = analysis.failing_locator.clone() else {
            analysis.confidence = self.scorer.score(&analysis.classification, 0, None);
            analysis.verdict = match manual {
                Some(m) => self.manual_verdict(&mut analysis, m),
                None => Verdict::Fail {
                    reason: "no failing locator in report or error message".to_string(),
                },
            };
            return Ok(analysis);
        };

        let pattern = self
            .patterns
            .find(&item.test_kind, &locator, &item.page_context)?;
        let locator_class = analysis.classification.kind.is_locator_class();

        // Reuse is decided on the pattern's own confidence.
        if let (Some(pattern), true, None) = (&pattern, locator_class, manual) {
            if pattern.confidence >= self.config.auto_apply_threshold {
                debug!("Item {} reuses stored pattern -> {}", item.id, pattern.healed_locator);
                analysis.confidence =
                    self.scorer
                        .score(&analysis.classification, 0, Some(pattern.confidence));
                analysis.verdict = Verdict::Heal {
                    locator: pattern.healed_locator.clone(),
                    source: HealSource::Pattern,
                };
                analysis.reused = Some(pattern.clone());
                return Ok(analysis);
            }
            debug!(
                "Stored pattern for {} at {:.2} is below the auto-apply threshold",
                item.id, pattern.confidence
            );
        }

        analysis.candidates = self.finder.find(&locator, &report.dom_snapshot);
        let viable = analysis
            .candidates
            .iter()
            .filter(|c| c.confidence >= self.config.viable_candidate_floor)
            .count();
        analysis.confidence = self.scorer.score(
            &analysis.classification,
            viable,
            pattern.as_ref().map(|p| p.confidence),
        );

        analysis.verdict = if let Some(m) = manual {
            self.manual_verdict(&mut analysis, m)
        } else if !locator_class {
            Verdict::Fail {
                reason: format!(
                    "{} failures are not repaired by replacing the locator",
                    analysis.classification.kind
                ),
            }
        } else if viable == 0 {
            Verdict::Fail {
                reason: "no viable candidate locators found".to_string(),
            }
        } else if analysis.confidence < self.config.auto_apply_threshold {
            Verdict::Fail {
                reason: format!(
                    "confidence {:.2} below auto-apply threshold {:.2}",
                    analysis.confidence, self.config.auto_apply_threshold
                ),
            }
        } else {
            match analysis.candidates.first() {
                Some(best) => Verdict::Heal {
                    locator: best.locator.clone(),
                    source: HealSource::Candidate,
                },
                None => Verdict::Fail {
                    reason: "no viable candidate locators found".to_string(),
                },
            }
        };
        Ok(analysis)
    }

    fn manual_verdict(&self, analysis: &mut Analysis, locator: &str) -> Verdict {
        analysis.confidence = analysis
            .confidence
            .max(self.config.manual_override_confidence);
        Verdict::Heal {
            locator: locator.trim().to_string(),
            source: HealSource::ManualOverride,
        }
    }

    fn apply(&self, item: &mut HealingQueueItem, analysis: Analysis) -> Result<()> {
        let max_attempts = self.config.max_attempts;
        let label = analysis.classification.label();

        item.classification = Some(analysis.classification);
        item.failing_locator = analysis.failing_locator;
        item.candidates = analysis.candidates;
        item.confidence = analysis.confidence;

        match analysis.verdict {
            Verdict::BugConfirmed => {
                item.transition(HealingStatus::BugConfirmed, max_attempts)?;
                info!("Item {} confirmed as application bug", item.id);
            }
            Verdict::Heal { locator, source } => {
                match (&analysis.reused, &item.failing_locator) {
                    (Some(reused), _) => match self.patterns.record_outcome(reused, true) {
                        Err(Error::NotFound { .. }) => {
                            debug!("Pattern reused by {} was cleaned up, storing again", item.id);
                            self.patterns.store(
                                &reused.test_kind,
                                &reused.original_locator,
                                &locator,
                                item.confidence,
                                &reused.page_context,
                            )?;
                        }
                        outcome => {
                            outcome?;
                        }
                    },
                    (None, Some(original)) => {
                        self.patterns.store(
                            &item.test_kind,
                            original,
                            &locator,
                            item.confidence,
                            &item.page_context,
                        )?;
                    }
                    (None, None) => {}
                }

                item.chosen_locator = Some(locator);
                item.heal_source = Some(source);
                item.transition(HealingStatus::Healed, max_attempts)?;
                info!(
                    "Healed item {} ({}): {} -> {} at {:.2}",
                    item.id,
                    label,
                    item.failing_locator.as_deref().unwrap_or("<none>"),
                    item.chosen_locator.as_deref().unwrap_or_default(),
                    item.confidence
                );
            }
            Verdict::Fail { reason } => {
                return self.fail(item, reason);
            }
        }

        self.save(item)
    }

    fn fail(&self, item: &mut HealingQueueItem, reason: String) -> Result<()> {
        item.record_failed_attempt();
        item.last_error = Some(reason);
        item.transition(HealingStatus::Failed, self.config.max_attempts)?;

        warn!(
            "Healing item {} failed (attempt {} of {}): {}; best candidate {}",
            item.id,
            item.attempts,
            self.config.max_attempts,
            item.last_error.as_deref().unwrap_or_default(),
            item.best_candidate()
                .map(|c| format!("{} ({:.2})", c.locator, c.confidence))
                .unwrap_or_else(|| "none".to_string())
        );
        self.save(item)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locheal_common::{MemoryStore, StoredRecord};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SUBMIT_DOM: &str = r#"<html><body><form><button data-testid="submit-btn">Submit</button></form></body></html>"#;

    fn coordinator() -> HealingCoordinator {
        HealingCoordinator::new(Arc::new(MemoryStore::new()), HealingConfig::default())
    }

    fn selector_report() -> FailureReport {
        FailureReport::new(
            "checkout-1",
            "checkout submits order",
            "Timeout 30000ms exceeded waiting for selector #submit-btn",
        )
        .with_locator("#submit-btn")
        .with_page_url("https://shop.test/checkout/991")
        .with_dom(SUBMIT_DOM)
    }

    fn hopeless_report() -> FailureReport {
        FailureReport::new("t-2", "missing", "Timeout 30000ms exceeded waiting for selector #gone")
            .with_locator("#gone")
            .with_dom("<div><p>Nothing to see</p></div>")
    }

    #[test]
    fn test_heals_from_candidates_and_stores_pattern() {
        let c = coordinator();
        let item = c.submit_failure(selector_report()).unwrap();

        assert_eq!(item.status, HealingStatus::Healed);
        assert_eq!(item.chosen_locator.as_deref(), Some(r#"[data-testid="submit-btn"]"#));
        assert_eq!(item.heal_source, Some(HealSource::Candidate));
        assert_eq!(item.attempts, 0);
        assert!(item.healed_at.is_some());
        assert_eq!(item.page_context, "shop.test/checkout/:id");

        let pattern = c
            .patterns()
            .find("ui", "#submit-btn", "shop.test/checkout/:id")
            .unwrap()
            .unwrap();
        assert_eq!(pattern.healed_locator, r#"[data-testid="submit-btn"]"#);

        let stored = c.get_item(&item.id).unwrap();
        assert_eq!(stored.status, HealingStatus::Healed);
    }

    #[test]
    fn test_pattern_reuse_skips_search() {
        let c = coordinator();
        let first = c.submit_failure(selector_report()).unwrap();
        let stored = c
            .patterns()
            .find("ui", "#submit-btn", &first.page_context)
            .unwrap()
            .unwrap();

        // Same failure on another order page, with no usable snapshot.
        let report = selector_report()
            .with_page_url("https://shop.test/checkout/1234")
            .with_dom("");
        let second = c.submit_failure(report).unwrap();

        assert_eq!(second.status, HealingStatus::Healed);
        assert_eq!(second.heal_source, Some(HealSource::Pattern));
        assert!(second.candidates.is_empty());
        assert!(second.confidence >= stored.confidence);

        let after = c
            .patterns()
            .find("ui", "#submit-btn", &first.page_context)
            .unwrap()
            .unwrap();
        assert_eq!(after.success_count, 1);
        assert!((after.confidence - (stored.confidence + (1.0 - stored.confidence) * 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_demoted_pattern_is_not_reused() {
        let c = coordinator();
        let first = c.submit_failure(selector_report()).unwrap();
        let demoted = c.confirm_outcome(&first.id, false).unwrap().unwrap();
        assert!(demoted.confidence < c.config().auto_apply_threshold);

        let blank = selector_report()
            .with_page_url("https://shop.test/checkout/1234")
            .with_dom("");
        let item = c.submit_failure(blank).unwrap();
        assert_eq!(item.status, HealingStatus::Failed);
        assert_eq!(item.heal_source, None);

        let after = c
            .patterns()
            .find("ui", "#submit-btn", &first.page_context)
            .unwrap()
            .unwrap();
        assert!((after.confidence - demoted.confidence).abs() < 1e-9);
        assert_eq!(after.success_count, 0);

        // The page itself still carries the element
        let item = c.submit_failure(selector_report()).unwrap();
        assert_eq!(item.status, HealingStatus::Healed);
        assert_eq!(item.heal_source, Some(HealSource::Candidate));
    }

    #[test]
    fn test_repeated_failures_stop_reuse() {
        let c = coordinator();
        let first = c.submit_failure(selector_report()).unwrap();
        let blank = || {
            selector_report()
                .with_page_url("https://shop.test/checkout/77")
                .with_dom("")
        };

        let reused = c.submit_failure(blank()).unwrap();
        assert_eq!(reused.heal_source, Some(HealSource::Pattern));

        let mut pattern = c.confirm_outcome(&reused.id, false).unwrap().unwrap();
        while pattern.confidence >= c.config().auto_apply_threshold {
            pattern = c.confirm_outcome(&first.id, false).unwrap().unwrap();
        }

        let item = c.submit_failure(blank()).unwrap();
        assert_eq!(item.status, HealingStatus::Failed);
        let after = c
            .patterns()
            .find("ui", "#submit-btn", &first.page_context)
            .unwrap()
            .unwrap();
        assert!((after.confidence - pattern.confidence).abs() < 1e-9);
    }

    #[test]
    fn test_application_bug_is_confirmed() {
        let c = coordinator();
        let report = selector_report().with_console_error("POST /api/orders 500 Internal Server Error");
        let item = c.submit_failure(report).unwrap();

        assert_eq!(item.status, HealingStatus::BugConfirmed);
        assert!(item.candidates.is_empty());
        assert!(item.chosen_locator.is_none());
        assert!(c.patterns().list().unwrap().is_empty());
    }

    #[test]
    fn test_no_candidates_fails_with_attempt() {
        let c = coordinator();
        let item = c.submit_failure(hopeless_report()).unwrap();

        assert_eq!(item.status, HealingStatus::Failed);
        assert_eq!(item.attempts, 1);
        assert!(item.candidates.is_empty());
        assert!(item.last_error.is_some());
        assert_eq!(
            item.classification.as_ref().map(|c| c.kind),
            Some(FailureKind::SelectorNotFound)
        );
    }

    #[test]
    fn test_non_locator_failure_surfaces_candidates() {
        let c = coordinator();
        let report = FailureReport::new("t-3", "slow", "Navigation timeout of 30000 ms exceeded")
            .with_locator("#submit-btn")
            .with_dom(SUBMIT_DOM);
        let item = c.submit_failure(report).unwrap();

        assert_eq!(item.status, HealingStatus::Failed);
        assert!(!item.candidates.is_empty());
        assert!(item.chosen_locator.is_none());
    }

    #[test]
    fn test_manual_override_heals() {
        let c = coordinator();
        let item = c
            .submit_with_override(hopeless_report(), "text=Nothing to see")
            .unwrap();

        assert_eq!(item.status, HealingStatus::Healed);
        assert_eq!(item.heal_source, Some(HealSource::ManualOverride));
        assert!(item.confidence >= 0.95);
        assert!(c.patterns().find("ui", "#gone", "").unwrap().is_some());
    }

    #[test]
    fn test_resubmit_until_budget_exhausted() {
        let c = coordinator();
        let item = c.submit_failure(hopeless_report()).unwrap();

        let item = c.resubmit(&item.id, ResubmitRequest::default()).unwrap();
        assert_eq!(item.status, HealingStatus::Failed);
        assert_eq!(item.attempts, 2);

        let item = c.resubmit(&item.id, ResubmitRequest::default()).unwrap();
        assert_eq!(item.attempts, 3);

        let err = c.resubmit(&item.id, ResubmitRequest::default()).unwrap_err();
        assert!(matches!(err, Error::RetryBudgetExhausted { attempts: 3, .. }));
        assert_eq!(c.get_item(&item.id).unwrap().status, HealingStatus::Failed);
    }

    #[test]
    fn test_resubmit_with_fresh_snapshot_heals() {
        let c = coordinator();
        let report = selector_report().with_dom("<div>loading</div>");
        let item = c.submit_failure(report).unwrap();
        assert_eq!(item.status, HealingStatus::Failed);

        let item = c
            .resubmit(
                &item.id,
                ResubmitRequest {
                    dom_snapshot: Some(SUBMIT_DOM.to_string()),
                    manual_locator: None,
                },
            )
            .unwrap();
        assert_eq!(item.status, HealingStatus::Healed);
        assert_eq!(item.attempts, 1);
    }

    #[test]
    fn test_resubmit_terminal_items_refused() {
        let c = coordinator();
        let healed = c.submit_failure(selector_report()).unwrap();
        assert!(matches!(
            c.resubmit(&healed.id, ResubmitRequest::default()),
            Err(Error::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            c.resubmit("missing", ResubmitRequest::default()),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_confirm_outcome_updates_pattern() {
        let c = coordinator();
        let item = c.submit_failure(selector_report()).unwrap();

        let up = c.confirm_outcome(&item.id, true).unwrap().unwrap();
        assert_eq!(up.success_count, 1);

        let down = c.confirm_outcome(&item.id, false).unwrap().unwrap();
        assert!(down.confidence < up.confidence);
        assert_eq!(down.success_count, 1);

        let failed = c.submit_failure(hopeless_report()).unwrap();
        assert!(c.confirm_outcome(&failed.id, true).is_err());
    }

    #[test]
    fn test_queue_listing_and_summary() {
        let c = coordinator();
        c.submit_failure(selector_report()).unwrap();
        c.submit_failure(hopeless_report()).unwrap();

        assert_eq!(c.list_items(None).unwrap().len(), 2);
        assert_eq!(c.list_items(Some(HealingStatus::Failed)).unwrap().len(), 1);

        let summary = c.queue_summary().unwrap();
        assert_eq!(summary.healed, 1);
        assert_eq!(summary.failed, 1);
    }

    /// Store whose pattern reads blow up, to exercise the analysis guard
    struct PanickingPatterns(MemoryStore);

    impl RecordStore for PanickingPatterns {
        fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>> {
            if namespace == crate::patterns::PATTERN_NAMESPACE {
                panic!("pattern index corrupted");
            }
            self.0.get(namespace, key)
        }
        fn put(&self, namespace: &str, key: &str, value: &Value, touched_at: i64) -> Result<()> {
            self.0.put(namespace, key, value, touched_at)
        }
        fn increment(&self, namespace: &str, key: &str, field: &str) -> Result<i64> {
            self.0.increment(namespace, key, field)
        }
        fn delete_older_than(&self, namespace: &str, cutoff: i64) -> Result<usize> {
            self.0.delete_older_than(namespace, cutoff)
        }
        fn list(&self, namespace: &str) -> Result<Vec<StoredRecord>> {
            self.0.list(namespace)
        }
    }

    #[test]
    fn test_panic_during_analysis_fails_item() {
        let c = HealingCoordinator::new(
            Arc::new(PanickingPatterns(MemoryStore::new())),
            HealingConfig::default(),
        );
        let item = c.submit_failure(selector_report()).unwrap();

        assert_eq!(item.status, HealingStatus::Failed);
        assert_eq!(item.attempts, 1);
        assert!(item.last_error.unwrap().contains("pattern index corrupted"));
    }

    /// Store that has gone away for pattern reads
    struct UnavailablePatterns(MemoryStore);

    impl RecordStore for UnavailablePatterns {
        fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>> {
            if namespace == crate::patterns::PATTERN_NAMESPACE {
                return Err(Error::StoreUnavailable("connection lost".into()));
            }
            self.0.get(namespace, key)
        }
        fn put(&self, namespace: &str, key: &str, value: &Value, touched_at: i64) -> Result<()> {
            self.0.put(namespace, key, value, touched_at)
        }
        fn increment(&self, namespace: &str, key: &str, field: &str) -> Result<i64> {
            self.0.increment(namespace, key, field)
        }
        fn delete_older_than(&self, namespace: &str, cutoff: i64) -> Result<usize> {
            self.0.delete_older_than(namespace, cutoff)
        }
        fn list(&self, namespace: &str) -> Result<Vec<StoredRecord>> {
            self.0.list(namespace)
        }
    }

    /// Store that drops the first few pattern reads, then recovers
    struct FlakyPatterns {
        inner: MemoryStore,
        outages: AtomicUsize,
    }

    impl RecordStore for FlakyPatterns {
        fn get(&self, namespace: &str, key: &str) -> Result<Option<StoredRecord>> {
            if namespace == crate::patterns::PATTERN_NAMESPACE
                && self
                    .outages
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(Error::StoreUnavailable("database is locked".into()));
            }
            self.inner.get(namespace, key)
        }
        fn put(&self, namespace: &str, key: &str, value: &Value, touched_at: i64) -> Result<()> {
            self.inner.put(namespace, key, value, touched_at)
        }
        fn increment(&self, namespace: &str, key: &str, field: &str) -> Result<i64> {
            self.inner.increment(namespace, key, field)
        }
        fn delete_older_than(&self, namespace: &str, cutoff: i64) -> Result<usize> {
            self.inner.delete_older_than(namespace, cutoff)
        }
        fn list(&self, namespace: &str) -> Result<Vec<StoredRecord>> {
            self.inner.list(namespace)
        }
    }

    #[test]
    fn test_item_left_analyzing_resumes_on_resubmit() {
        let c = HealingCoordinator::new(
            Arc::new(FlakyPatterns {
                inner: MemoryStore::new(),
                outages: AtomicUsize::new(1),
            }),
            HealingConfig::default(),
        );
        let err = c.submit_failure(selector_report()).unwrap_err();
        assert!(err.is_store_unavailable());

        let stranded = c.list_items(Some(HealingStatus::Analyzing)).unwrap();
        assert_eq!(stranded.len(), 1);
        assert_eq!(stranded[0].attempts, 0);

        let item = c
            .resubmit(&stranded[0].id, ResubmitRequest::default())
            .unwrap();
        assert_eq!(item.status, HealingStatus::Healed);
        assert_eq!(item.attempts, 0);
        assert!(c
            .list_items(Some(HealingStatus::Analyzing))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_store_unavailable_propagates() {
        let c = HealingCoordinator::new(
            Arc::new(UnavailablePatterns(MemoryStore::new())),
            HealingConfig::default(),
        );
        let err = c.submit_failure(selector_report()).unwrap_err();
        assert!(err.is_store_unavailable());
    }
}
