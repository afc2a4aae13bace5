//! locheal engine
//!
//! Self-healing locator recovery for UI test failures: classify the
//! failure, search the captured DOM for replacement locators, score the
//! repair, and remember what worked.

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod dom;
pub mod finder;
pub mod locator;
pub mod patterns;
pub mod scorer;

pub use classifier::{classify, classify_report, FailureContext};
pub use config::HealingConfig;
pub use coordinator::{HealingCoordinator, ResubmitRequest, QUEUE_NAMESPACE, REPORT_NAMESPACE};
pub use finder::{find_candidates, CandidateFinder};
pub use locator::{extract_locator_from_message, ParsedLocator};
pub use patterns::{page_context, PatternStats, PatternStore, PATTERN_NAMESPACE};
pub use scorer::{score, ConfidenceScorer, ScoringWeights};
