//! Core types for locheal

use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::{Error, Result};

/// Current unix timestamp in seconds
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn default_test_kind() -> String {
    "ui".to_string()
}

// ============================================================================
// Failure input
// ============================================================================

/// One request captured in the browser network log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkLogEntry {
    pub url: String,
    #[serde(default)]
    pub method: String,
    /// HTTP status, absent when the request never completed
    #[serde(default)]
    pub status: Option<u16>,
    /// Browser-reported failure text (e.g. `net::ERR_CONNECTION_REFUSED`)
    #[serde(default)]
    pub failure: Option<String>,
}

/// A UI test failure as captured by the test runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub test_id: String,
    pub test_name: String,

    /// Test family; first element of the pattern key
    #[serde(default = "default_test_kind")]
    pub test_kind: String,

    pub error_message: String,

    /// Locator the failing step used, when the runner knows it
    #[serde(default)]
    pub target_locator: Option<String>,

    #[serde(default)]
    pub page_url: String,

    /// Serialized markup of the page at failure time
    #[serde(default)]
    pub dom_snapshot: String,

    #[serde(default)]
    pub console_errors: Vec<String>,

    #[serde(default)]
    pub network_log: Vec<NetworkLogEntry>,

    #[serde(default = "now")]
    pub timestamp: i64,
}

impl FailureReport {
    pub fn new(
        test_id: impl Into<String>,
        test_name: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            test_name: test_name.into(),
            test_kind: default_test_kind(),
            error_message: error_message.into(),
            target_locator: None,
            page_url: String::new(),
            dom_snapshot: String::new(),
            console_errors: Vec::new(),
            network_log: Vec::new(),
            timestamp: now(),
        }
    }

    pub fn with_test_kind(mut self, kind: impl Into<String>) -> Self {
        self.test_kind = kind.into();
        self
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.target_locator = Some(locator.into());
        self
    }

    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = url.into();
        self
    }

    pub fn with_dom(mut self, dom: impl Into<String>) -> Self {
        self.dom_snapshot = dom.into();
        self
    }

    pub fn with_console_error(mut self, line: impl Into<String>) -> Self {
        self.console_errors.push(line.into());
        self
    }

    pub fn with_network_entry(mut self, entry: NetworkLogEntry) -> Self {
        self.network_log.push(entry);
        self
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Closed failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    SelectorNotFound,
    Timing,
    ApplicationBug,
    DomChange,
    Network,
    Auth,
    Unknown,
}

impl FailureKind {
    /// Failures that a replacement locator can fix
    pub fn is_locator_class(&self) -> bool {
        matches!(self, FailureKind::SelectorNotFound | FailureKind::DomChange)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::SelectorNotFound => "selector-not-found",
            FailureKind::Timing => "timing",
            FailureKind::ApplicationBug => "application-bug",
            FailureKind::DomChange => "dom-change",
            FailureKind::Network => "network",
            FailureKind::Auth => "auth",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product-specific refinement of a selector or timing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Refinement {
    RtlLayout,
    CanvasDrawing,
    UploadProgress,
}

impl Refinement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Refinement::RtlLayout => "rtl-layout",
            Refinement::CanvasDrawing => "canvas-drawing",
            Refinement::UploadProgress => "upload-progress",
        }
    }
}

impl std::fmt::Display for Refinement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureClassification {
    pub kind: FailureKind,
    #[serde(default)]
    pub refinement: Option<Refinement>,
    pub description: String,
    /// Locator recovered from the error text when the report had none
    #[serde(default)]
    pub extracted_locator: Option<String>,
}

impl FailureClassification {
    /// Taxonomy label, e.g. `selector-not-found` or `timing/upload-progress`
    pub fn label(&self) -> String {
        match self.refinement {
            Some(r) => format!("{}/{}", self.kind, r),
            None => self.kind.to_string(),
        }
    }
}

// ============================================================================
// Candidates and patterns
// ============================================================================

/// Heuristic that proposed a locator candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heuristic {
    Attribute,
    Accessibility,
    Text,
    Structural,
}

impl Heuristic {
    /// Merge tie-break order, lower wins
    pub fn priority(&self) -> u8 {
        match self {
            Heuristic::Attribute => 0,
            Heuristic::Accessibility => 1,
            Heuristic::Text => 2,
            Heuristic::Structural => 3,
        }
    }
}

impl std::fmt::Display for Heuristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Heuristic::Attribute => write!(f, "attribute"),
            Heuristic::Accessibility => write!(f, "accessibility"),
            Heuristic::Text => write!(f, "text"),
            Heuristic::Structural => write!(f, "structural"),
        }
    }
}

/// A proposed replacement locator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorCandidate {
    pub locator: String,
    pub confidence: f64,
    pub heuristic: Heuristic,
}

impl LocatorCandidate {
    pub fn new(locator: impl Into<String>, confidence: f64, heuristic: Heuristic) -> Self {
        Self {
            locator: locator.into(),
            confidence: confidence.clamp(0.0, 1.0),
            heuristic,
        }
    }
}

/// Lookup key of a healing pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternKey {
    pub test_kind: String,
    pub original_locator: String,
    pub page_context: String,
}

impl PatternKey {
    pub fn new(
        test_kind: impl Into<String>,
        original_locator: impl Into<String>,
        page_context: impl Into<String>,
    ) -> Self {
        Self {
            test_kind: test_kind.into(),
            original_locator: original_locator.into(),
            page_context: page_context.into(),
        }
    }
}

/// A remembered locator repair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingPattern {
    pub test_kind: String,
    pub original_locator: String,
    pub page_context: String,
    pub healed_locator: String,
    /// Running estimate in [0, 1]
    pub confidence: f64,
    /// Confirmed successful reuses
    #[serde(default)]
    pub success_count: i64,
    pub last_used: i64,
    pub created_at: i64,
}

impl HealingPattern {
    pub fn key(&self) -> PatternKey {
        PatternKey::new(&self.test_kind, &self.original_locator, &self.page_context)
    }
}

// ============================================================================
// Healing queue
// ============================================================================

/// Status of a healing queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingStatus {
    Pending,
    Analyzing,
    Healed,
    Failed,
    BugConfirmed,
}

impl Default for HealingStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl HealingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HealingStatus::Healed | HealingStatus::Failed | HealingStatus::BugConfirmed
        )
    }

    /// Transition table. `failed -> pending` is the resubmission edge and
    /// only exists while the item still has retry budget.
    pub fn can_transition_to(&self, next: HealingStatus, attempts: u32, max_attempts: u32) -> bool {
        use HealingStatus::*;
        match (self, next) {
            (Pending, Analyzing) => true,
            (Analyzing, Healed) | (Analyzing, Failed) | (Analyzing, BugConfirmed) => true,
            // Analysis cut short by the record store; no attempt was spent
            (Analyzing, Pending) => true,
            (Failed, Pending) => attempts < max_attempts,
            _ => false,
        }
    }
}

impl std::fmt::Display for HealingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealingStatus::Pending => write!(f, "pending"),
            HealingStatus::Analyzing => write!(f, "analyzing"),
            HealingStatus::Healed => write!(f, "healed"),
            HealingStatus::Failed => write!(f, "failed"),
            HealingStatus::BugConfirmed => write!(f, "bug_confirmed"),
        }
    }
}

impl std::str::FromStr for HealingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(HealingStatus::Pending),
            "analyzing" => Ok(HealingStatus::Analyzing),
            "healed" => Ok(HealingStatus::Healed),
            "failed" => Ok(HealingStatus::Failed),
            "bug_confirmed" => Ok(HealingStatus::BugConfirmed),
            other => Err(Error::InvalidConfig(format!("unknown healing status: {}", other))),
        }
    }
}

/// Where the applied locator came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealSource {
    Candidate,
    Pattern,
    ManualOverride,
}

/// One failure's trip through the healing state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingQueueItem {
    pub id: String,
    pub test_id: String,
    pub test_name: String,
    pub test_kind: String,
    pub page_context: String,
    pub failing_locator: Option<String>,
    pub classification: Option<FailureClassification>,
    pub chosen_locator: Option<String>,
    pub confidence: f64,
    /// Ranked suggestions, kept even when nothing was applied
    #[serde(default)]
    pub candidates: Vec<LocatorCandidate>,
    #[serde(default)]
    pub heal_source: Option<HealSource>,
    pub status: HealingStatus,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub healed_at: Option<i64>,
}

impl HealingQueueItem {
    pub fn new(report: &FailureReport, page_context: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: Uuid::new_v4().to_string(),
            test_id: report.test_id.clone(),
            test_name: report.test_name.clone(),
            test_kind: report.test_kind.clone(),
            page_context: page_context.into(),
            failing_locator: report.target_locator.clone(),
            classification: None,
            chosen_locator: None,
            confidence: 0.0,
            candidates: Vec::new(),
            heal_source: None,
            status: HealingStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            healed_at: None,
        }
    }

    /// Move to `next`, refusing anything the transition table forbids.
    ///
    /// A refused transition is a programming error: it panics in debug
    /// builds and is logged and ignored in release builds.
    pub fn transition(&mut self, next: HealingStatus, max_attempts: u32) -> Result<()> {
        if !self.status.can_transition_to(next, self.attempts, max_attempts) {
            error!(
                "Refusing transition {} -> {} for healing item {}",
                self.status, next, self.id
            );
            debug_assert!(false, "invalid healing transition {} -> {}", self.status, next);
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        self.status = next;
        self.updated_at = now();
        if next == HealingStatus::Healed {
            self.healed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Count a failed analysis pass
    pub fn record_failed_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn best_candidate(&self) -> Option<&LocatorCandidate> {
        self.candidates.first()
    }

    pub fn retries_left(&self, max_attempts: u32) -> u32 {
        max_attempts.saturating_sub(self.attempts)
    }
}

/// Aggregate view over retained queue items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub total: usize,
    pub pending: usize,
    pub analyzing: usize,
    pub healed: usize,
    pub failed: usize,
    pub bug_confirmed: usize,
    pub mean_healed_confidence: Option<f64>,
}

impl QueueSummary {
    pub fn from_items(items: &[HealingQueueItem]) -> Self {
        let mut summary = QueueSummary {
            total: items.len(),
            ..Default::default()
        };
        let mut healed_confidence = 0.0;

        for item in items {
            match item.status {
                HealingStatus::Pending => summary.pending += 1,
                HealingStatus::Analyzing => summary.analyzing += 1,
                HealingStatus::Healed => {
                    summary.healed += 1;
                    healed_confidence += item.confidence;
                }
                HealingStatus::Failed => summary.failed += 1,
                HealingStatus::BugConfirmed => summary.bug_confirmed += 1,
            }
        }

        if summary.healed > 0 {
            summary.mean_healed_confidence = Some(healed_confidence / summary.healed as f64);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> HealingQueueItem {
        let report = FailureReport::new("t-1", "login", "boom").with_locator("#submit");
        HealingQueueItem::new(&report, "example.com/login")
    }

    #[test]
    fn test_report_deserializes_with_defaults() {
        let json = r#"{"test_id":"t-1","test_name":"login","error_message":"boom"}"#;
        let report: FailureReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.test_kind, "ui");
        assert!(report.target_locator.is_none());
        assert!(report.network_log.is_empty());
    }

    #[test]
    fn test_classification_label() {
        let mut c = FailureClassification {
            kind: FailureKind::Timing,
            refinement: None,
            description: String::new(),
            extracted_locator: None,
        };
        assert_eq!(c.label(), "timing");
        c.refinement = Some(Refinement::UploadProgress);
        assert_eq!(c.label(), "timing/upload-progress");
    }

    #[test]
    fn test_status_transition_table() {
        use HealingStatus::*;
        assert!(Pending.can_transition_to(Analyzing, 0, 3));
        assert!(Analyzing.can_transition_to(Healed, 0, 3));
        assert!(Analyzing.can_transition_to(BugConfirmed, 0, 3));
        assert!(Failed.can_transition_to(Pending, 2, 3));
        assert!(!Failed.can_transition_to(Pending, 3, 3));
        assert!(!Healed.can_transition_to(Pending, 0, 3));
        assert!(!BugConfirmed.can_transition_to(Analyzing, 0, 3));
        assert!(!Pending.can_transition_to(Healed, 0, 3));
        assert!(Analyzing.can_transition_to(Pending, 0, 3));
        assert!(!Healed.can_transition_to(Analyzing, 0, 3));
    }

    #[test]
    fn test_transition_sets_healed_at() {
        let mut item = item();
        item.transition(HealingStatus::Analyzing, 3).unwrap();
        assert!(item.healed_at.is_none());
        item.transition(HealingStatus::Healed, 3).unwrap();
        assert!(item.healed_at.is_some());
        assert!(item.status.is_terminal());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid healing transition")]
    fn test_transition_out_of_terminal_panics_in_debug() {
        let mut item = item();
        item.transition(HealingStatus::Analyzing, 3).unwrap();
        item.transition(HealingStatus::BugConfirmed, 3).unwrap();
        let _ = item.transition(HealingStatus::Pending, 3);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            HealingStatus::Pending,
            HealingStatus::Analyzing,
            HealingStatus::Healed,
            HealingStatus::Failed,
            HealingStatus::BugConfirmed,
        ] {
            assert_eq!(status.to_string().parse::<HealingStatus>().unwrap(), status);
        }
        assert!("done".parse::<HealingStatus>().is_err());
    }

    #[test]
    fn test_queue_summary() {
        let mut healed = item();
        healed.status = HealingStatus::Healed;
        healed.confidence = 0.8;
        let mut failed = item();
        failed.status = HealingStatus::Failed;

        let summary = QueueSummary::from_items(&[healed, failed, item()]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.healed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.mean_healed_confidence, Some(0.8));
    }
}
