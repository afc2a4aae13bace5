//! Failure classification
//!
//! Rules run in a fixed priority order and the first match wins:
//!
//! 1. auth
//! 2. application bug
//! 3. network
//! 4. DOM change
//! 5. selector not found
//! 6. timing
//! 7. unknown
//!
//! Selector and timing labels then get a second pass for product-specific
//! refinements (upload progress, canvas drawing, right-to-left layout).
//! Classification is total and deterministic.

use locheal_common::{
    FailureClassification, FailureKind, FailureReport, NetworkLogEntry, Refinement,
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::locator::extract_locator_from_message;

/// Execution context accompanying an error message
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureContext<'a> {
    pub target_locator: Option<&'a str>,
    pub page_url: &'a str,
    pub dom_snapshot: &'a str,
    pub console_errors: &'a [String],
    pub network_log: &'a [NetworkLogEntry],
}

impl<'a> FailureContext<'a> {
    pub fn from_report(report: &'a FailureReport) -> Self {
        Self {
            target_locator: report
                .target_locator
                .as_deref()
                .filter(|l| !l.trim().is_empty()),
            page_url: &report.page_url,
            dom_snapshot: &report.dom_snapshot,
            console_errors: &report.console_errors,
            network_log: &report.network_log,
        }
    }
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: Lazy<Regex> = Lazy::new(|| Regex::new($re).expect("valid regex"));
    };
}

pattern!(
    AUTH,
    r"(?i)\bunauthori[sz]ed\b|\bforbidden\b|\b(?:status|code|http)[\s:=]*40[13]\b|\b40[13] (?:unauthori[sz]ed|forbidden)|session (?:has )?(?:expired|timed out|is invalid)|invalid (?:session|token|credentials)|(?:jwt|token|session) expired|not authenticated|authentication (?:failed|required)|login required|access denied"
);
pattern!(
    HTTP_5XX,
    r"(?i)\b5\d\d (?:internal server error|bad gateway|service unavailable|gateway time-?out)|internal server error|\b(?:status|code|http)[\s:=]*5\d\d\b"
);
pattern!(
    UNCAUGHT,
    r"(?i)uncaught (?:exception|\w*error)|unhandled (?:promise )?rejection|\b(?:TypeError|ReferenceError|SyntaxError|RangeError): "
);
pattern!(
    NETWORK,
    r"(?i)econnrefused|connection refused|econnreset|connection reset|enotfound|getaddrinfo|\bdns\b|net::err_|network (?:error|timeout|request failed)|socket hang up|etimedout|failed to fetch"
);
pattern!(
    STALE,
    r"(?i)stale element|not attached to (?:the )?(?:dom|page|document)|detached from (?:the )?(?:dom|document)|element (?:was |is )?detached|node is detached|no longer attached"
);
pattern!(
    MUTATION,
    r"(?i)mutation|dom (?:changed|updated|mutated)|re-?render(?:ed|ing)?|hydration"
);
pattern!(
    NOT_FOUND,
    r"(?i)not found|no (?:such )?element|no node|unable to locate|not visible|could not find|cannot find|failed to find|resolved to 0 elements|waiting for (?:selector|locator)|\btimeout \d+ ?ms exceeded"
);
pattern!(
    TIMING,
    r"(?i)timeout|timed out|exceeded|waiting for|still waiting|took too long|deadline"
);
pattern!(
    UPLOAD,
    r"(?i)upload|setinputfiles|file ?chooser|type=.?file|progress ?bar|\bprogress\b"
);
pattern!(CANVAS, r"(?i)\bcanvas\b|signature|sign(?:ing)?[-_ ]?pad|drawing");
pattern!(
    RTL_MARKUP,
    r#"(?i)\bdir\s*=\s*["']?rtl\b|\blang\s*=\s*["']?(?:he|ar|fa|ur)(?:-[a-z]+)?\b"#
);
pattern!(
    RTL_URL,
    r"(?i)[?&](?:lang|locale|hl)=(?:he|ar|fa|ur)\b|/(?:he|ar|fa|ur)(?:-[a-z]{2})?(?:/|$)"
);

/// Classify an error message in its context
pub fn classify(error: &str, context: &FailureContext<'_>) -> FailureClassification {
    let extracted = match context.target_locator {
        Some(_) => None,
        None => extract_locator_from_message(error),
    };
    let locator = context.target_locator.or(extracted.as_deref());

    let (kind, description) = base_rule(error, locator, context);
    let refinement = match kind {
        FailureKind::SelectorNotFound | FailureKind::Timing => refine(error, locator, context),
        _ => None,
    };

    FailureClassification {
        kind,
        refinement,
        description,
        extracted_locator: extracted,
    }
}

/// Classify a captured report
pub fn classify_report(report: &FailureReport) -> FailureClassification {
    classify(&report.error_message, &FailureContext::from_report(report))
}

fn base_rule(
    error: &str,
    locator: Option<&str>,
    context: &FailureContext<'_>,
) -> (FailureKind, String) {
    let summary = first_line(error);

    if let Some(entry) = context
        .network_log
        .iter()
        .find(|e| matches!(e.status, Some(401) | Some(403)))
    {
        return (
            FailureKind::Auth,
            format!("Request to {} was rejected with {}", entry.url, status_text(entry)),
        );
    }
    if let Some(line) = first_match(&AUTH, error, context.console_errors) {
        return (FailureKind::Auth, format!("Authentication problem: {}", line));
    }

    if let Some(entry) = context
        .network_log
        .iter()
        .find(|e| e.status.is_some_and(|s| (500..600).contains(&s)))
    {
        return (
            FailureKind::ApplicationBug,
            format!("Server error {} from {}", status_text(entry), entry.url),
        );
    }
    if let Some(line) = first_match(&HTTP_5XX, error, context.console_errors)
        .or_else(|| first_match(&UNCAUGHT, error, context.console_errors))
    {
        return (FailureKind::ApplicationBug, format!("Application error: {}", line));
    }

    if let Some(line) = first_match(&NETWORK, error, context.console_errors) {
        return (FailureKind::Network, format!("Network failure: {}", line));
    }
    if let Some(entry) = context
        .network_log
        .iter()
        .find(|e| e.status.is_none() && e.failure.is_some())
    {
        return (
            FailureKind::Network,
            format!(
                "Request to {} failed: {}",
                entry.url,
                entry.failure.as_deref().unwrap_or_default()
            ),
        );
    }

    if STALE.is_match(error) {
        return (
            FailureKind::DomChange,
            format!("Element detached while the page changed: {}", summary),
        );
    }
    let mutations = MUTATION.find_iter(error).count()
        + context
            .console_errors
            .iter()
            .map(|l| MUTATION.find_iter(l).count())
            .sum::<usize>();
    if mutations >= 2 {
        return (
            FailureKind::DomChange,
            format!("Page re-rendered during the step ({} mutation markers)", mutations),
        );
    }

    if let Some(locator) = locator {
        if NOT_FOUND.is_match(error) {
            return (
                FailureKind::SelectorNotFound,
                format!("Locator {} did not resolve: {}", locator, summary),
            );
        }
    }

    if TIMING.is_match(error) {
        return (FailureKind::Timing, format!("Wait elapsed: {}", summary));
    }

    (FailureKind::Unknown, format!("Unrecognized failure: {}", summary))
}

fn refine(error: &str, locator: Option<&str>, context: &FailureContext<'_>) -> Option<Refinement> {
    let locator = locator.unwrap_or_default();
    let mentions = |re: &Regex| {
        re.is_match(error)
            || re.is_match(locator)
            || context.console_errors.iter().any(|l| re.is_match(l))
    };

    if mentions(&UPLOAD) {
        return Some(Refinement::UploadProgress);
    }
    if mentions(&CANVAS) {
        return Some(Refinement::CanvasDrawing);
    }
    if RTL_MARKUP.is_match(context.dom_snapshot)
        || RTL_MARKUP.is_match(locator)
        || RTL_URL.is_match(context.page_url)
    {
        return Some(Refinement::RtlLayout);
    }
    None
}

fn first_match<'t>(re: &Regex, error: &'t str, console: &'t [String]) -> Option<&'t str> {
    if re.is_match(error) {
        return Some(first_line(error));
    }
    console
        .iter()
        .find(|l| re.is_match(l))
        .map(|l| first_line(l))
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

fn status_text(entry: &NetworkLogEntry) -> String {
    entry
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no status".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn console(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test_case("Timeout 30000ms exceeded waiting for selector #submit-btn", FailureKind::SelectorNotFound ; "playwright selector timeout")]
    #[test_case("Error: No element found for selector: .cart-item", FailureKind::SelectorNotFound ; "no element found")]
    #[test_case("Navigation timeout of 30000 ms exceeded", FailureKind::Timing ; "navigation timeout")]
    #[test_case("stale element reference: element is not attached to the page document", FailureKind::DomChange ; "stale element")]
    #[test_case("page.goto: net::ERR_CONNECTION_REFUSED at http://localhost:3000", FailureKind::Network ; "connection refused")]
    #[test_case("Request failed with status code 401", FailureKind::Auth ; "status 401")]
    #[test_case("Your session has expired, please log in again", FailureKind::Auth ; "session expired")]
    #[test_case("expect(received).toBe(expected)", FailureKind::Unknown ; "assertion")]
    #[test_case("", FailureKind::Unknown ; "empty message")]
    fn test_error_message_rules(error: &str, expected: FailureKind) {
        let c = classify(error, &FailureContext::default());
        assert_eq!(c.kind, expected, "{}", c.description);
    }

    #[test]
    fn test_console_500_is_application_bug() {
        let lines = console(&["GET /api/cart 500 Internal Server Error"]);
        let ctx = FailureContext {
            target_locator: Some("#checkout"),
            console_errors: &lines,
            ..Default::default()
        };
        let c = classify("Timeout 5000ms exceeded waiting for selector #checkout", &ctx);
        assert_eq!(c.kind, FailureKind::ApplicationBug);
        assert!(c.refinement.is_none());
    }

    #[test]
    fn test_uncaught_exception_is_application_bug() {
        let lines = console(&["Uncaught TypeError: Cannot read properties of undefined"]);
        let ctx = FailureContext {
            console_errors: &lines,
            ..Default::default()
        };
        assert_eq!(classify("timed out", &ctx).kind, FailureKind::ApplicationBug);
    }

    #[test]
    fn test_network_log_statuses() {
        let log = vec![NetworkLogEntry {
            url: "/api/me".into(),
            method: "GET".into(),
            status: Some(403),
            failure: None,
        }];
        let ctx = FailureContext {
            network_log: &log,
            ..Default::default()
        };
        assert_eq!(classify("timed out", &ctx).kind, FailureKind::Auth);

        let log = vec![NetworkLogEntry {
            url: "/api/cart".into(),
            status: Some(502),
            ..Default::default()
        }];
        let ctx = FailureContext {
            network_log: &log,
            ..Default::default()
        };
        assert_eq!(classify("timed out", &ctx).kind, FailureKind::ApplicationBug);

        let log = vec![NetworkLogEntry {
            url: "/api/cart".into(),
            failure: Some("net::ERR_ABORTED".into()),
            ..Default::default()
        }];
        let ctx = FailureContext {
            network_log: &log,
            ..Default::default()
        };
        assert_eq!(classify("timed out", &ctx).kind, FailureKind::Network);
    }

    #[test]
    fn test_auth_outranks_application_bug() {
        let lines = console(&["401 Unauthorized", "500 Internal Server Error"]);
        let ctx = FailureContext {
            console_errors: &lines,
            ..Default::default()
        };
        assert_eq!(classify("boom", &ctx).kind, FailureKind::Auth);
    }

    #[test]
    fn test_locator_digits_are_not_status_codes() {
        let c = classify(
            "Timeout 5000ms exceeded waiting for selector #row-401",
            &FailureContext::default(),
        );
        assert_eq!(c.kind, FailureKind::SelectorNotFound);
    }

    #[test]
    fn test_repeated_mutations_are_dom_change() {
        let lines = console(&["MutationObserver fired", "component re-rendered"]);
        let ctx = FailureContext {
            target_locator: Some("#list"),
            console_errors: &lines,
            ..Default::default()
        };
        assert_eq!(classify("element not visible", &ctx).kind, FailureKind::DomChange);
    }

    #[test]
    fn test_not_found_without_locator_is_timing() {
        let c = classify("Timeout 1000ms exceeded while waiting for event", &FailureContext::default());
        assert_eq!(c.kind, FailureKind::Timing);
        assert!(c.extracted_locator.is_none());
    }

    #[test]
    fn test_extracts_locator_when_report_has_none() {
        let c = classify(
            "Timeout 30000ms exceeded waiting for selector #submit-btn",
            &FailureContext::default(),
        );
        assert_eq!(c.extracted_locator.as_deref(), Some("#submit-btn"));

        let ctx = FailureContext {
            target_locator: Some("#submit-btn"),
            ..Default::default()
        };
        let c = classify("Timeout 30000ms exceeded waiting for selector #submit-btn", &ctx);
        assert!(c.extracted_locator.is_none());
    }

    #[test_case("waiting for selector input[type=file]", None, "", Some(Refinement::UploadProgress) ; "file input")]
    #[test_case("waiting for selector #signature-pad canvas", None, "", Some(Refinement::CanvasDrawing) ; "signature canvas")]
    #[test_case("waiting for selector #submit", Some(r#"<html dir="rtl"><body><p>שלום</p></body></html>"#), "", Some(Refinement::RtlLayout) ; "rtl markup")]
    #[test_case("waiting for selector #submit", None, "https://app.example.com/he/documents", Some(Refinement::RtlLayout) ; "hebrew url")]
    #[test_case("waiting for selector #submit", None, "https://app.example.com/help", None ; "plain url")]
    fn test_refinements(error: &str, dom: Option<&str>, url: &str, expected: Option<Refinement>) {
        let ctx = FailureContext {
            page_url: url,
            dom_snapshot: dom.unwrap_or(""),
            ..Default::default()
        };
        assert_eq!(classify(error, &ctx).refinement, expected);
    }

    #[test]
    fn test_refinement_only_for_selector_and_timing() {
        let ctx = FailureContext {
            page_url: "https://app.example.com/he/",
            ..Default::default()
        };
        let c = classify("net::ERR_CONNECTION_RESET during upload", &ctx);
        assert_eq!(c.kind, FailureKind::Network);
        assert!(c.refinement.is_none());
    }

    #[test]
    fn test_deterministic() {
        let lines = console(&["warning: slow frame"]);
        let ctx = FailureContext {
            target_locator: Some("role=button[name=\"Save\"]"),
            console_errors: &lines,
            page_url: "https://x.test/ar/",
            ..Default::default()
        };
        let error = "locator.click: Timeout 30000ms exceeded.";
        let first = classify(error, &ctx);
        for _ in 0..5 {
            assert_eq!(classify(error, &ctx), first);
        }
        assert_eq!(first.label(), "selector-not-found/rtl-layout");
    }
}
