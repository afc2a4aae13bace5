//! DOM snapshot model
//!
//! Flattens a captured page into an indexed element list (pre-order, so a
//! parent always precedes its children) and answers the questions the
//! candidate heuristics ask: text, ARIA role, accessible name and a stable
//! locator for any element.

use scraper::{ElementRef, Html};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Nesting beyond this is not descended into
const MAX_DEPTH: usize = 256;

/// Text kept per element; container text past this is dropped
const MAX_TEXT_BYTES: usize = 4096;

/// Attributes that identify an element on their own, in locator preference order
pub const TEST_ID_ATTRIBUTES: &[&str] = &["data-testid", "data-test-id", "data-test", "data-qa", "data-cy"];

/// Attributes whose values may move between each other across releases
pub const IDENTIFYING_ATTRIBUTES: &[&str] = &[
    "id",
    "data-testid",
    "data-test-id",
    "data-test",
    "data-qa",
    "data-cy",
    "name",
    "aria-label",
];

/// Attributes used as `tag[attr="value"]` locators
const TAGGED_ATTRIBUTES: &[&str] = &["name", "aria-label"];

const SKIPPED_TAGS: &[&str] = &["head", "script", "style", "noscript", "template"];

#[derive(Debug, Clone)]
pub struct DomElement {
    pub index: usize,
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub classes: Vec<String>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// 1-based position among siblings with the same tag
    pub nth_of_type: usize,
    /// Siblings sharing the tag, this element included
    pub same_type_siblings: usize,
    /// Whitespace-collapsed text content
    pub text: String,
}

impl DomElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|v| !v.is_empty())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    /// Document scaffolding that never makes a useful locator target
    pub fn is_structural_root(&self) -> bool {
        matches!(self.tag.as_str(), "html" | "body")
    }
}

enum Segment {
    Text(String),
    Child(usize),
}

/// Parsed, indexed page snapshot
///
/// Uniqueness questions are answered from counts taken once at parse time,
/// so locator synthesis never re-scans the document.
pub struct DomSnapshot {
    elements: Vec<DomElement>,
    body: usize,
    ids: HashMap<String, usize>,
    labels: HashMap<String, usize>,
    attribute_counts: HashMap<(String, String), usize>,
    tagged_counts: HashMap<(String, String, String), usize>,
    class_counts: HashMap<(String, String), usize>,
}

impl std::fmt::Debug for DomSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomSnapshot")
            .field("elements", &self.elements.len())
            .finish()
    }
}

impl DomSnapshot {
    /// Parse a snapshot. `None` when it is empty, larger than `max_bytes`
    /// or has nothing inside `<body>`.
    pub fn parse(markup: &str, max_bytes: usize) -> Option<Self> {
        if markup.trim().is_empty() {
            debug!("Empty DOM snapshot");
            return None;
        }
        if markup.len() > max_bytes {
            warn!(
                "DOM snapshot of {} bytes exceeds limit of {} bytes",
                markup.len(),
                max_bytes
            );
            return None;
        }

        let html = Html::parse_document(markup);
        let mut builder = Builder::default();
        builder.walk(html.root_element(), None, 0);

        let elements = builder.finish();
        let body = elements.iter().position(|e| e.tag == "body")?;
        if elements[body].children.is_empty() {
            debug!("DOM snapshot has no elements in body");
            return None;
        }

        let mut snapshot = Self {
            elements: Vec::new(),
            body,
            ids: HashMap::new(),
            labels: HashMap::new(),
            attribute_counts: HashMap::new(),
            tagged_counts: HashMap::new(),
            class_counts: HashMap::new(),
        };
        snapshot.index(&elements);
        snapshot.elements = elements;
        debug!("Indexed DOM snapshot with {} elements", snapshot.elements.len());
        Some(snapshot)
    }

    fn index(&mut self, elements: &[DomElement]) {
        for element in elements {
            if let Some(id) = element.id() {
                self.ids.entry(id.to_string()).or_insert(element.index);
            }
            if element.tag == "label" {
                if let Some(target) = element.attr("for") {
                    self.labels.entry(target.to_string()).or_insert(element.index);
                }
            }
            for (name, value) in &element.attributes {
                if value.is_empty() {
                    continue;
                }
                if IDENTIFYING_ATTRIBUTES.contains(&name.as_str()) {
                    *self
                        .attribute_counts
                        .entry((name.clone(), value.clone()))
                        .or_default() += 1;
                }
                if TAGGED_ATTRIBUTES.contains(&name.as_str()) {
                    *self
                        .tagged_counts
                        .entry((element.tag.clone(), name.clone(), value.clone()))
                        .or_default() += 1;
                }
            }
            for class in &element.classes {
                *self
                    .class_counts
                    .entry((element.tag.clone(), class.clone()))
                    .or_default() += 1;
            }
        }
    }

    pub fn elements(&self) -> &[DomElement] {
        &self.elements
    }

    /// Elements a locator may target
    pub fn targets(&self) -> impl Iterator<Item = &DomElement> {
        self.elements.iter().filter(|e| !e.is_structural_root())
    }

    pub fn body(&self) -> &DomElement {
        &self.elements[self.body]
    }

    pub fn by_id(&self, id: &str) -> Option<&DomElement> {
        self.ids.get(id).map(|&i| &self.elements[i])
    }

    /// Elements below `index`, in document order
    pub fn descendants(&self, index: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.elements[index].children.iter().rev().copied().collect();
        while let Some(i) = stack.pop() {
            out.push(i);
            stack.extend(self.elements[i].children.iter().rev());
        }
        out
    }

    /// Elements carrying an identifying attribute with this value
    pub fn attribute_count(&self, name: &str, value: &str) -> usize {
        self.attribute_counts
            .get(&(name.to_string(), value.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn tagged_count(&self, tag: &str, name: &str, value: &str) -> usize {
        self.tagged_counts
            .get(&(tag.to_string(), name.to_string(), value.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn class_count(&self, tag: &str, class: &str) -> usize {
        self.class_counts
            .get(&(tag.to_string(), class.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Explicit `role` attribute or the implicit role of the tag
    pub fn role(&self, index: usize) -> Option<String> {
        let element = &self.elements[index];
        if let Some(role) = element.attr("role") {
            return role.split_whitespace().next().map(str::to_lowercase);
        }

        let role = match element.tag.as_str() {
            "button" | "summary" => "button",
            "a" | "area" if element.attr("href").is_some() => "link",
            "input" => match element.attr("type").map(str::to_lowercase).as_deref() {
                Some("button") | Some("submit") | Some("reset") | Some("image") => "button",
                Some("checkbox") => "checkbox",
                Some("radio") => "radio",
                Some("range") => "slider",
                Some("number") => "spinbutton",
                Some("search") => "searchbox",
                Some("hidden") | Some("file") | Some("color") | Some("date") => return None,
                _ => "textbox",
            },
            "textarea" => "textbox",
            "select" if element.attr("multiple").is_some() => "listbox",
            "select" => "combobox",
            "option" => "option",
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
            "img" if element.attr("alt").map_or(true, |a| !a.is_empty()) => "img",
            "nav" => "navigation",
            "main" => "main",
            "header" => "banner",
            "footer" => "contentinfo",
            "aside" => "complementary",
            "form" => "form",
            "dialog" => "dialog",
            "ul" | "ol" => "list",
            "li" => "listitem",
            "table" => "table",
            "tr" => "row",
            "td" => "cell",
            "th" => "columnheader",
            "progress" => "progressbar",
            "section" if element.attr("aria-label").is_some() => "region",
            _ => return None,
        };
        Some(role.to_string())
    }

    /// Accessible name, approximating the browser computation
    pub fn accessible_name(&self, index: usize) -> Option<String> {
        let element = &self.elements[index];

        if let Some(label) = element.attr("aria-label").map(normalize_text) {
            if !label.is_empty() {
                return Some(label);
            }
        }

        if let Some(ids) = element.attr("aria-labelledby") {
            let name = ids
                .split_whitespace()
                .filter_map(|id| self.by_id(id))
                .map(|e| e.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            if !name.trim().is_empty() {
                return Some(normalize_text(&name));
            }
        }

        let is_button = self.role(index).as_deref() == Some("button");
        let name = match element.tag.as_str() {
            "input" | "select" | "textarea" => self
                .label_text(index)
                .or_else(|| element.attr("value").filter(|_| is_button).map(str::to_string))
                .or_else(|| element.attr("placeholder").map(str::to_string)),
            "img" | "area" => element.attr("alt").map(str::to_string),
            _ => Some(element.text.clone()),
        };

        name.map(|n| normalize_text(&n))
            .filter(|n| !n.is_empty())
            .or_else(|| element.attr("title").map(normalize_text))
            .filter(|n| !n.is_empty())
    }

    fn label_text(&self, index: usize) -> Option<String> {
        let element = &self.elements[index];
        if let Some(&label) = element.id().and_then(|id| self.labels.get(id)) {
            return Some(self.elements[label].text.clone()).filter(|t| !t.is_empty());
        }

        let mut current = element.parent;
        while let Some(i) = current {
            if self.elements[i].tag == "label" {
                return Some(self.elements[i].text.clone()).filter(|t| !t.is_empty());
            }
            current = self.elements[i].parent;
        }
        None
    }

    /// Most robust unique locator for an element: a test id, then id,
    /// name, aria-label, a unique class, then the CSS path
    pub fn stable_locator(&self, index: usize) -> String {
        self.unique_locator(index)
            .unwrap_or_else(|| self.css_path(index))
    }

    /// Attribute or class locator matching only this element, if any
    pub fn unique_locator(&self, index: usize) -> Option<String> {
        let element = &self.elements[index];

        for attr in TEST_ID_ATTRIBUTES {
            if let Some(value) = element.attr(attr).filter(|v| !v.is_empty()) {
                if self.attribute_count(attr, value) == 1 {
                    return Some(attribute_selector(None, attr, value));
                }
            }
        }
        if let Some(id) = element.id() {
            if self.attribute_count("id", id) == 1 {
                return Some(id_selector(id));
            }
        }
        for attr in TAGGED_ATTRIBUTES {
            if let Some(value) = element.attr(attr).filter(|v| !v.is_empty()) {
                if self.tagged_count(&element.tag, attr, value) == 1 {
                    return Some(attribute_selector(Some(&element.tag), attr, value));
                }
            }
        }
        element
            .classes
            .iter()
            .find(|class| is_css_ident(class) && self.class_count(&element.tag, class) == 1)
            .map(|class| format!("{}.{}", element.tag, class))
    }

    /// Child-combinator path from the nearest uniquely identified ancestor
    pub fn css_path(&self, index: usize) -> String {
        let mut parts = Vec::new();
        let mut current = Some(index);

        while let Some(i) = current {
            let element = &self.elements[i];
            if i != index {
                if let Some(id) = element.id() {
                    if self.attribute_count("id", id) == 1 {
                        parts.push(id_selector(id));
                        break;
                    }
                }
            }
            if element.tag == "body" || element.tag == "html" {
                parts.push(element.tag.clone());
                break;
            }

            if element.same_type_siblings > 1 {
                parts.push(format!("{}:nth-of-type({})", element.tag, element.nth_of_type));
            } else {
                parts.push(element.tag.clone());
            }
            current = element.parent;
        }

        parts.reverse();
        parts.join(" > ")
    }
}

#[derive(Default)]
struct Builder {
    elements: Vec<DomElement>,
    segments: Vec<Vec<Segment>>,
}

impl Builder {
    fn walk(&mut self, element: ElementRef<'_>, parent: Option<usize>, depth: usize) -> Option<usize> {
        let value = element.value();
        let tag = value.name().to_lowercase();
        if SKIPPED_TAGS.contains(&tag.as_str()) {
            return None;
        }

        let index = self.elements.len();
        self.elements.push(DomElement {
            index,
            tag,
            attributes: value
                .attrs()
                .map(|(n, v)| (n.to_lowercase(), v.to_string()))
                .collect(),
            classes: value.classes().map(str::to_string).collect(),
            parent,
            children: Vec::new(),
            nth_of_type: 1,
            same_type_siblings: 1,
            text: String::new(),
        });
        self.segments.push(Vec::new());

        if depth >= MAX_DEPTH {
            return Some(index);
        }

        for child in element.children() {
            if let Some(text) = child.value().as_text() {
                let text: &str = text;
                self.segments[index].push(Segment::Text(text.to_string()));
            } else if let Some(child) = ElementRef::wrap(child) {
                if let Some(child_index) = self.walk(child, Some(index), depth + 1) {
                    self.elements[index].children.push(child_index);
                    self.segments[index].push(Segment::Child(child_index));
                }
            }
        }
        Some(index)
    }

    fn finish(mut self) -> Vec<DomElement> {
        let mut raw: Vec<String> = vec![String::new(); self.elements.len()];
        for index in (0..self.elements.len()).rev() {
            let mut text = String::new();
            for segment in &self.segments[index] {
                match segment {
                    Segment::Text(t) => push_capped(&mut text, t),
                    Segment::Child(c) => push_capped(&mut text, &raw[*c]),
                }
            }
            self.elements[index].text = normalize_text(&text);
            raw[index] = text;
        }

        for index in 0..self.elements.len() {
            let children = std::mem::take(&mut self.elements[index].children);
            let mut seen: HashMap<&str, usize> = HashMap::new();
            let mut ordinals = Vec::with_capacity(children.len());
            for &child in &children {
                let n = seen.entry(self.elements[child].tag.as_str()).or_default();
                *n += 1;
                ordinals.push(*n);
            }
            let totals: Vec<usize> = children
                .iter()
                .map(|&c| seen[self.elements[c].tag.as_str()])
                .collect();
            for ((&child, nth), total) in children.iter().zip(ordinals).zip(totals) {
                self.elements[child].nth_of_type = nth;
                self.elements[child].same_type_siblings = total;
            }
            self.elements[index].children = children;
        }
        self.elements
    }
}

fn push_capped(text: &mut String, more: &str) {
    let room = MAX_TEXT_BYTES.saturating_sub(text.len());
    if more.len() <= room {
        text.push_str(more);
        return;
    }
    let mut end = room;
    while !more.is_char_boundary(end) {
        end -= 1;
    }
    text.push_str(&more[..end]);
}

/// Collapse runs of whitespace and trim
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized, case-folded text for loose comparison
pub fn fold_text(text: &str) -> String {
    normalize_text(text).to_lowercase()
}

pub fn is_css_ident(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        Some('-') => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Escape a value for a double-quoted CSS attribute selector
pub fn css_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn attribute_selector(tag: Option<&str>, name: &str, value: &str) -> String {
    format!("{}[{}=\"{}\"]", tag.unwrap_or(""), name, css_string(value))
}

pub fn id_selector(id: &str) -> String {
    if is_css_ident(id) {
        format!("#{}", id)
    } else {
        attribute_selector(None, "id", id)
    }
}
