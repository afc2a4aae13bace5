//! Locator candidate search
//!
//! Each heuristic independently proposes replacement locators for a
//! failing locator against a DOM snapshot; the proposals are then merged,
//! deduplicated and ranked. Unusable input yields no candidates.

use locheal_common::{Heuristic, LocatorCandidate};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::config::HealingConfig;
use crate::dom::{
    css_string, fold_text, normalize_text, DomElement, DomSnapshot, IDENTIFYING_ATTRIBUTES,
};
use crate::locator::{Constraint, LocatorStep, ParsedLocator, TextConstraint};

type HeuristicFn = fn(&ParsedLocator, &DomSnapshot, &mut Shortlist);

/// Closed heuristic list in tie-break priority order
const HEURISTICS: &[(Heuristic, HeuristicFn)] = &[
    (Heuristic::Attribute, attribute_match),
    (Heuristic::Accessibility, accessibility_match),
    (Heuristic::Text, text_match),
    (Heuristic::Structural, structural_match),
];

/// Proposals under this score are discarded
const MIN_SCORE: f64 = 0.3;

/// Applied when an attribute match can only be addressed by position
const POSITIONAL_PENALTY: f64 = 0.7;

/// Tags whose text reads well as a `:has-text` locator
const TEXT_TAGS: &[&str] = &[
    "a", "button", "label", "option", "li", "td", "th", "summary", "h1", "h2", "h3", "h4", "h5",
    "h6",
];

/// Candidate finder bounded by the engine configuration
#[derive(Debug, Clone)]
pub struct CandidateFinder {
    max_candidates: usize,
    max_snapshot_bytes: usize,
}

impl Default for CandidateFinder {
    fn default() -> Self {
        Self::from_config(&HealingConfig::default())
    }
}

impl CandidateFinder {
    pub fn from_config(config: &HealingConfig) -> Self {
        Self {
            max_candidates: config.max_candidates,
            max_snapshot_bytes: config.max_snapshot_bytes,
        }
    }

    /// Ranked replacement candidates, at most `max_candidates`
    pub fn find(&self, failing_locator: &str, dom_snapshot: &str) -> Vec<LocatorCandidate> {
        let parsed = ParsedLocator::parse(failing_locator);
        if parsed.is_empty() {
            debug!("Locator {:?} carries no usable constraints", failing_locator);
            return Vec::new();
        }

        let Some(dom) = DomSnapshot::parse(dom_snapshot, self.max_snapshot_bytes) else {
            return Vec::new();
        };

        // One extra slot per heuristic: merge may still drop the failing locator.
        let mut proposals = Vec::new();
        for (heuristic, run) in HEURISTICS {
            let mut shortlist = Shortlist::new(*heuristic, self.max_candidates + 1);
            run(&parsed, &dom, &mut shortlist);
            debug!(
                "{} heuristic proposed {} candidate(s)",
                heuristic,
                shortlist.kept.len()
            );
            proposals.extend(shortlist.kept);
        }

        merge(proposals, &parsed.raw, self.max_candidates)
    }
}

/// Find candidates with the default limits
pub fn find_candidates(
    failing_locator: &str,
    dom_snapshot: &str,
    max_candidates: usize,
) -> Vec<LocatorCandidate> {
    CandidateFinder {
        max_candidates,
        ..Default::default()
    }
    .find(failing_locator, dom_snapshot)
}

/// Deduplicate by locator keeping the best score, rank, drop the failing
/// locator itself and truncate
pub fn merge(
    proposals: Vec<LocatorCandidate>,
    failing_locator: &str,
    max_candidates: usize,
) -> Vec<LocatorCandidate> {
    let failing = failing_locator.trim();
    let mut best: HashMap<String, LocatorCandidate> = HashMap::new();

    for candidate in proposals {
        if candidate.locator.is_empty() || candidate.locator == failing {
            continue;
        }
        match best.get_mut(&candidate.locator) {
            Some(existing) => {
                let better = candidate.confidence > existing.confidence
                    || (candidate.confidence == existing.confidence
                        && candidate.heuristic.priority() < existing.heuristic.priority());
                if better {
                    *existing = candidate;
                }
            }
            None => {
                best.insert(candidate.locator.clone(), candidate);
            }
        }
    }

    let mut merged: Vec<LocatorCandidate> = best.into_values().collect();
    merged.sort_by(rank);
    merged.truncate(max_candidates);
    merged
}

/// Confidence descending, then heuristic priority, then locator
fn rank(a: &LocatorCandidate, b: &LocatorCandidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.heuristic.priority().cmp(&b.heuristic.priority()))
        .then_with(|| a.locator.cmp(&b.locator))
}

/// Best proposals of one heuristic, bounded before locators are built
struct Shortlist {
    heuristic: Heuristic,
    limit: usize,
    kept: Vec<LocatorCandidate>,
}

impl Shortlist {
    fn new(heuristic: Heuristic, limit: usize) -> Self {
        Self {
            heuristic,
            limit,
            kept: Vec::with_capacity(limit + 1),
        }
    }

    /// Lowest score that can still enter
    fn floor(&self) -> f64 {
        if self.kept.len() < self.limit {
            return MIN_SCORE;
        }
        self.kept
            .last()
            .map_or(f64::INFINITY, |c| c.confidence.max(MIN_SCORE))
    }

    fn offer(&mut self, locator: String, score: f64) {
        if score < MIN_SCORE || self.limit == 0 {
            return;
        }
        let candidate = LocatorCandidate::new(locator, score, self.heuristic);
        match self.kept.iter_mut().find(|c| c.locator == candidate.locator) {
            Some(existing) if existing.confidence >= candidate.confidence => return,
            Some(existing) => *existing = candidate,
            None => self.kept.push(candidate),
        }
        self.kept.sort_by(rank);
        self.kept.truncate(self.limit);
    }
}

/// Scored element indices, best first, ties in document order
fn best_first(mut scored: Vec<(usize, f64)>) -> Vec<(usize, f64)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored
}

// ============================================================================
// Attribute match
// ============================================================================

fn attribute_match(parsed: &ParsedLocator, dom: &DomSnapshot, shortlist: &mut Shortlist) {
    let constraints = parsed.attribute_constraints();
    if constraints.is_empty() {
        return;
    }
    let wanted_tag = parsed.target_tag();

    let scored = dom
        .targets()
        .filter_map(|element| {
            let total = constraints
                .iter()
                .map(|c| constraint_score(c, element))
                .sum::<f64>()
                / constraints.len() as f64;
            if total <= 0.0 {
                return None;
            }
            let mut score = total;
            if wanted_tag.is_some_and(|t| t != element.tag) {
                score *= 0.85;
            }
            Some((element.index, score))
        })
        .collect();

    for (index, score) in best_first(scored) {
        if score < shortlist.floor() {
            break;
        }
        match dom.unique_locator(index) {
            Some(locator) => shortlist.offer(locator, score),
            None => shortlist.offer(dom.css_path(index), score * POSITIONAL_PENALTY),
        }
    }
}

/// How well one constraint survives on an element: exact 1.0, value moved
/// to another identifying attribute 0.9, fuzzy value 0.6
fn constraint_score(constraint: &Constraint, element: &DomElement) -> f64 {
    match constraint {
        Constraint::Id(id) => {
            if element.id() == Some(id.as_str()) {
                1.0
            } else {
                moved_or_fuzzy(id, "id", element)
            }
        }
        Constraint::Class(class) => {
            if element.has_class(class) {
                1.0
            } else if element.classes.iter().any(|c| fuzzy_eq(c, class)) {
                0.6
            } else {
                0.0
            }
        }
        Constraint::Attribute {
            name,
            value: None,
            ..
        } => {
            if element.attr(name).is_some() {
                1.0
            } else {
                0.0
            }
        }
        Constraint::Attribute {
            name,
            value: Some(value),
            partial: true,
        } => match element.attr(name) {
            Some(actual) if actual.contains(value.as_str()) => 1.0,
            Some(actual) if fuzzy_eq(actual, value) => 0.6,
            _ => 0.0,
        },
        Constraint::Attribute {
            name,
            value: Some(value),
            partial: false,
        } => {
            if element.attr(name) == Some(value.as_str()) {
                1.0
            } else {
                moved_or_fuzzy(value, name, element)
            }
        }
    }
}

fn moved_or_fuzzy(value: &str, from: &str, element: &DomElement) -> f64 {
    let identifying = || {
        IDENTIFYING_ATTRIBUTES
            .iter()
            .filter_map(|attr| element.attr(attr).map(|v| (*attr, v)))
    };

    if identifying().any(|(attr, v)| attr != from && v == value) {
        return 0.9;
    }
    if identifying().any(|(_, v)| fuzzy_eq(v, value))
        || element.classes.iter().any(|c| fuzzy_eq(c, value))
    {
        return 0.6;
    }
    0.0
}

/// Loose identifier similarity: shared word tokens, containment or a long
/// common prefix once separators are stripped
fn fuzzy_eq(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() || a == b {
        return false;
    }

    let ta = tokens(a);
    let tb = tokens(b);
    if !ta.is_empty() && !tb.is_empty() {
        let shared = ta.intersection(&tb).count();
        let union = ta.union(&tb).count();
        if shared * 2 >= union {
            return true;
        }
    }

    let ca = compact(a);
    let cb = compact(b);
    let (short, long) = if ca.len() <= cb.len() { (&ca, &cb) } else { (&cb, &ca) };
    if short.len() >= 4 && long.contains(short.as_str()) {
        return true;
    }
    let prefix = ca.chars().zip(cb.chars()).take_while(|(x, y)| x == y).count();
    prefix >= 5 && prefix * 2 >= long.len()
}

fn tokens(value: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let mut current = String::new();
    let mut previous_lower = false;

    for c in value.chars() {
        if !c.is_alphanumeric() {
            previous_lower = false;
            if !current.is_empty() {
                out.insert(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && previous_lower && !current.is_empty() {
            out.insert(std::mem::take(&mut current));
        }
        previous_lower = c.is_lowercase();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        out.insert(current);
    }
    out
}

fn compact(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

// ============================================================================
// Text match
// ============================================================================

fn text_match(parsed: &ParsedLocator, dom: &DomSnapshot, shortlist: &mut Shortlist) {
    let Some(constraint) = parsed.text_constraint() else {
        return;
    };
    let needle = constraint.text.trim();
    let folded = fold_text(needle);
    if folded.is_empty() {
        return;
    }
    let wanted_tag = parsed.target_tag();

    let mut matches: Vec<(usize, f64)> = dom
        .targets()
        .filter_map(|e| text_score(constraint, needle, &folded, e).map(|s| (e.index, s)))
        .collect();

    // Ancestors repeat their descendants' text; keep the innermost match
    // unless the ancestor has the tag the locator asked for.
    let mut covered: HashSet<usize> = HashSet::new();
    for &(index, _) in &matches {
        let mut current = dom.elements()[index].parent;
        while let Some(parent) = current {
            if !covered.insert(parent) {
                break;
            }
            current = dom.elements()[parent].parent;
        }
    }
    matches.retain(|(i, _)| {
        !covered.contains(i) || wanted_tag == Some(dom.elements()[*i].tag.as_str())
    });

    let scored = matches
        .into_iter()
        .map(|(index, score)| {
            if wanted_tag.is_some_and(|t| t != dom.elements()[index].tag) {
                (index, score * 0.9)
            } else {
                (index, score)
            }
        })
        .collect();

    for (index, score) in best_first(scored) {
        if score < shortlist.floor() {
            break;
        }
        let element = &dom.elements()[index];
        let text = if element.text.chars().count() <= 80 {
            element.text.as_str()
        } else {
            needle
        };
        let locator = if TEXT_TAGS.contains(&element.tag.as_str()) {
            format!("{}:has-text(\"{}\")", element.tag, css_string(text))
        } else {
            format!("text=\"{}\"", css_string(text))
        };
        shortlist.offer(locator, score);
    }
}

/// Exact 0.85, case/whitespace-insensitive 0.75, substring 0.55
fn text_score(
    constraint: &TextConstraint,
    needle: &str,
    folded: &str,
    element: &DomElement,
) -> Option<f64> {
    if element.text.is_empty() {
        return None;
    }
    if element.text == needle {
        return Some(0.85);
    }
    let text = element.text.to_lowercase();
    if text == folded {
        return Some(if constraint.exact { 0.7 } else { 0.75 });
    }
    if folded.chars().count() >= 2 && text.contains(folded) {
        return Some(0.55);
    }
    None
}

// ============================================================================
// Structural match
// ============================================================================

fn structural_match(parsed: &ParsedLocator, dom: &DomSnapshot, shortlist: &mut Shortlist) {
    let Some(target) = parsed.target() else {
        return;
    };
    let Some(tag) = target.tag.as_deref() else {
        return;
    };

    let (anchor, base) = resolve_anchor(&parsed.steps[..parsed.steps.len() - 1], dom);

    let pool: Vec<usize> = dom
        .descendants(anchor)
        .into_iter()
        .filter(|&i| dom.elements()[i].tag == tag)
        .collect();
    let ordinal = target.nth.unwrap_or(1);
    let (index, score) = match pool
        .iter()
        .find(|&&i| dom.elements()[i].nth_of_type == ordinal)
    {
        Some(&i) if anchor != dom.body().index => (i, base),
        Some(&i) => (i, base.min(0.35)),
        None => match pool.last() {
            Some(&i) => (i, 0.35),
            None => return,
        },
    };

    shortlist.offer(dom.stable_locator(index), score);
}

/// Innermost earlier step that still resolves, and the base score it earns
fn resolve_anchor(steps: &[LocatorStep], dom: &DomSnapshot) -> (usize, f64) {
    for step in steps.iter().rev() {
        let hits: Vec<usize> = dom
            .targets()
            .filter(|e| step_matches(step, e))
            .map(|e| e.index)
            .collect();
        match hits.as_slice() {
            [only] => return (*only, 0.55),
            [first, ..] => return (*first, 0.4),
            [] => continue,
        }
    }
    (dom.body().index, 0.35)
}

fn step_matches(step: &LocatorStep, element: &DomElement) -> bool {
    if step.is_empty() {
        return false;
    }
    if step.tag.as_deref().is_some_and(|t| t != element.tag) {
        return false;
    }
    if step.id.as_deref().is_some_and(|id| element.id() != Some(id)) {
        return false;
    }
    if !step.classes.iter().all(|c| element.has_class(c)) {
        return false;
    }
    step.attributes.iter().all(|a| match (&a.value, element.attr(&a.name)) {
        (None, actual) => actual.is_some(),
        (Some(v), Some(actual)) if a.partial => actual.contains(v.as_str()),
        (Some(v), Some(actual)) => actual == v,
        (Some(_), None) => false,
    })
}

// ============================================================================
// Accessibility match
// ============================================================================

fn accessibility_match(parsed: &ParsedLocator, dom: &DomSnapshot, shortlist: &mut Shortlist) {
    let Some(constraint) = parsed.role_constraint() else {
        return;
    };
    let wanted_role = constraint.role.as_deref().map(str::to_lowercase);
    let wanted_name = constraint.name.as_deref().map(normalize_text);

    let described: Vec<Described> = dom
        .targets()
        .map(|e| Described {
            index: e.index,
            role: dom.role(e.index),
            name: dom.accessible_name(e.index),
        })
        .collect();

    let mut role_counts: HashMap<&str, usize> = HashMap::new();
    for role in described.iter().filter_map(|d| d.role.as_deref()) {
        *role_counts.entry(role).or_default() += 1;
    }
    let unique_role =
        |role: &Option<String>| role.as_deref().and_then(|r| role_counts.get(r)) == Some(&1);

    let mut scored = Vec::new();
    for (position, item) in described.iter().enumerate() {
        let role_ok = wanted_role.is_some() && item.role == wanted_role;
        let level = match (&wanted_name, &item.name) {
            (Some(wanted), Some(actual)) => name_level(wanted, actual),
            _ => NameMatch::None,
        };

        let score = match (wanted_role.is_some(), wanted_name.is_some()) {
            (true, true) => match (role_ok, level) {
                (true, NameMatch::Exact) => 0.85,
                (true, NameMatch::Folded) => 0.75,
                (true, NameMatch::Partial) => 0.55,
                (false, NameMatch::Exact | NameMatch::Folded) => 0.5,
                (true, NameMatch::None) if unique_role(&item.role) => 0.5,
                _ => continue,
            },
            (true, false) if role_ok && unique_role(&item.role) => 0.6,
            (false, true) => match level {
                NameMatch::Exact => 0.7,
                NameMatch::Folded => 0.6,
                NameMatch::Partial => 0.45,
                NameMatch::None => continue,
            },
            _ => continue,
        };
        scored.push((position, score));
    }

    for (position, score) in best_first(scored) {
        if score < shortlist.floor() {
            break;
        }
        let item = &described[position];
        let locator = match (&item.role, &item.name) {
            (Some(role), Some(name)) => format!("role={}[name=\"{}\"]", role, css_string(name)),
            (Some(role), None) => format!("role={}", role),
            (None, _) => dom.stable_locator(item.index),
        };
        shortlist.offer(locator, score);
    }
}

struct Described {
    index: usize,
    role: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameMatch {
    Exact,
    Folded,
    Partial,
    None,
}

fn name_level(wanted: &str, actual: &str) -> NameMatch {
    if wanted.is_empty() {
        return NameMatch::None;
    }
    if actual == wanted {
        return NameMatch::Exact;
    }
    let folded = fold_text(actual);
    let wanted = wanted.to_lowercase();
    if folded == wanted {
        return NameMatch::Folded;
    }
    if wanted.chars().count() >= 2 && folded.contains(&wanted) {
        return NameMatch::Partial;
    }
    NameMatch::None
}
