//! Locator parsing
//!
//! Turns a failing locator string (CSS, XPath, Playwright engine selectors
//! or Playwright `getBy*` calls) into structured constraints the candidate
//! heuristics can compare against a DOM snapshot. Parsing never fails: an
//! unrecognized locator simply produces no constraints.

use once_cell::sync::Lazy;
use regex::Regex;

/// Relationship between a step and the step before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeConstraint {
    pub name: String,
    /// `None` for a bare presence check like `[disabled]`
    pub value: Option<String>,
    /// `*=`, `^=`, `$=`, `~=` and XPath `contains(@x, ..)` match part of the value
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextConstraint {
    pub text: String,
    pub exact: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleConstraint {
    pub role: Option<String>,
    pub name: Option<String>,
}

/// One compound selector in a locator chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatorStep {
    pub combinator: Option<Combinator>,
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<AttributeConstraint>,
    /// 1-based position among siblings (`:nth-of-type`, XPath `[n]`)
    pub nth: Option<usize>,
    pub has_text: Option<TextConstraint>,
}

impl LocatorStep {
    pub fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attributes.is_empty()
            && self.nth.is_none()
            && self.has_text.is_none()
    }

    /// Value of an exact attribute constraint
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name && !a.partial)
            .and_then(|a| a.value.as_deref())
    }

    fn with_attribute(name: &str, value: &str) -> Self {
        let mut step = LocatorStep::default();
        if name == "id" {
            step.id = Some(value.to_string());
        } else {
            step.attributes.push(AttributeConstraint {
                name: name.to_string(),
                value: Some(value.to_string()),
                partial: false,
            });
        }
        step
    }
}

/// One identifying constraint of the target element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Id(String),
    Class(String),
    Attribute {
        name: String,
        value: Option<String>,
        partial: bool,
    },
}

/// Structured view of a locator string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLocator {
    pub raw: String,
    pub steps: Vec<LocatorStep>,
    pub text: Option<TextConstraint>,
    pub role: Option<RoleConstraint>,
}

impl ParsedLocator {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let mut parsed = ParsedLocator {
            raw: trimmed.to_string(),
            ..Default::default()
        };

        for (i, segment) in split_outside_quotes(trimmed, ">>").into_iter().enumerate() {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            parsed.absorb(parse_segment(segment), i > 0);
        }
        parsed
    }

    fn absorb(&mut self, part: ParsedLocator, chained: bool) {
        for (i, mut step) in part.steps.into_iter().enumerate() {
            if i == 0 && chained && !self.steps.is_empty() && step.combinator.is_none() {
                step.combinator = Some(Combinator::Descendant);
            }
            self.steps.push(step);
        }
        if part.text.is_some() {
            self.text = part.text;
        }
        if part.role.is_some() {
            self.role = part.role;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.text.is_none() && self.role.is_none()
    }

    /// The step describing the element itself
    pub fn target(&self) -> Option<&LocatorStep> {
        self.steps.last()
    }

    pub fn target_tag(&self) -> Option<&str> {
        self.target().and_then(|s| s.tag.as_deref())
    }

    /// Visible-text constraint from a text engine or a `:has-text` / `text()` predicate
    pub fn text_constraint(&self) -> Option<&TextConstraint> {
        self.text
            .as_ref()
            .or_else(|| self.target().and_then(|s| s.has_text.as_ref()))
    }

    /// Role/name constraint, falling back to `role` and `aria-label` attributes
    pub fn role_constraint(&self) -> Option<RoleConstraint> {
        if let Some(role) = &self.role {
            return Some(role.clone());
        }
        let target = self.target()?;
        let role = target.attribute("role").map(str::to_string);
        let name = target.attribute("aria-label").map(str::to_string);
        if role.is_none() && name.is_none() {
            return None;
        }
        Some(RoleConstraint { role, name })
    }

    /// Identifying constraints of the target step, tag excluded
    pub fn attribute_constraints(&self) -> Vec<Constraint> {
        let Some(target) = self.target() else {
            return Vec::new();
        };

        let mut constraints = Vec::new();
        if let Some(id) = &target.id {
            constraints.push(Constraint::Id(id.clone()));
        }
        for class in &target.classes {
            constraints.push(Constraint::Class(class.clone()));
        }
        for attr in &target.attributes {
            constraints.push(Constraint::Attribute {
                name: attr.name.clone(),
                value: attr.value.clone(),
                partial: attr.partial,
            });
        }
        constraints
    }
}

// ============================================================================
// Segment dispatch
// ============================================================================

const ATTRIBUTE_ENGINES: &[&str] = &[
    "id",
    "data-testid",
    "data-test-id",
    "data-test",
    "data-qa",
    "data-cy",
];

fn parse_segment(segment: &str) -> ParsedLocator {
    if let Some(parsed) = parse_api_call(segment) {
        return parsed;
    }

    if let Some((engine, body)) = split_engine(segment) {
        return match engine {
            "text" => text_locator(body),
            "role" => role_locator(body),
            "css" => parse_css(body),
            "xpath" => parse_xpath(body),
            name => ParsedLocator {
                steps: vec![LocatorStep::with_attribute(name, &unquote(body))],
                ..Default::default()
            },
        };
    }

    if segment.starts_with('/') || segment.starts_with("(/") || segment.starts_with("./") {
        return parse_xpath(segment);
    }

    if is_quoted(segment) {
        return ParsedLocator {
            text: Some(TextConstraint {
                text: unquote(segment),
                exact: true,
            }),
            ..Default::default()
        };
    }

    parse_css(segment)
}

fn split_engine(segment: &str) -> Option<(&str, &str)> {
    let (engine, body) = segment.split_once('=')?;
    let engine = engine.trim();
    let known = matches!(engine, "text" | "role" | "css" | "xpath")
        || ATTRIBUTE_ENGINES.contains(&engine);
    known.then_some((engine, body.trim()))
}

static API_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)^(?:page\.)?(getByTestId|getByText|getByRole|getByLabel|getByPlaceholder|getByAltText|getByTitle|locator)\((.*)\)$",
    )
    .expect("valid regex")
});

static FIRST_STRING_ARG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)"|`([^`]*)`)"#)
        .expect("valid regex")
});

static NAME_OPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"name\s*:\s*(?:'([^']*)'|"([^"]*)")"#).expect("valid regex")
});

static EXACT_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"exact\s*:\s*true").expect("valid regex"));

fn first_capture(caps: &regex::Captures<'_>) -> Option<String> {
    (1..caps.len())
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str().to_string())
}

fn parse_api_call(segment: &str) -> Option<ParsedLocator> {
    let caps = API_CALL.captures(segment)?;
    let method = caps.get(1)?.as_str();
    let args = caps.get(2)?.as_str();
    let value = FIRST_STRING_ARG
        .captures(args)
        .and_then(|c| first_capture(&c))?;
    let exact = EXACT_OPTION.is_match(args);

    let parsed = match method {
        "locator" => ParsedLocator::parse(&value),
        "getByTestId" => ParsedLocator {
            steps: vec![LocatorStep::with_attribute("data-testid", &value)],
            ..Default::default()
        },
        "getByPlaceholder" => ParsedLocator {
            steps: vec![LocatorStep::with_attribute("placeholder", &value)],
            ..Default::default()
        },
        "getByAltText" => ParsedLocator {
            steps: vec![LocatorStep::with_attribute("alt", &value)],
            ..Default::default()
        },
        "getByTitle" => ParsedLocator {
            steps: vec![LocatorStep::with_attribute("title", &value)],
            ..Default::default()
        },
        "getByText" => ParsedLocator {
            text: Some(TextConstraint { text: value, exact }),
            ..Default::default()
        },
        "getByLabel" => ParsedLocator {
            role: Some(RoleConstraint {
                role: None,
                name: Some(value),
            }),
            ..Default::default()
        },
        _ => {
            let name = NAME_OPTION.captures(args).and_then(|c| first_capture(&c));
            ParsedLocator {
                role: Some(RoleConstraint {
                    role: Some(value.to_lowercase()),
                    name,
                }),
                ..Default::default()
            }
        }
    };
    Some(parsed)
}

fn text_locator(body: &str) -> ParsedLocator {
    let body = body.trim();
    let (text, exact) = if is_quoted(body) {
        (unquote(body), true)
    } else if body.len() > 1 && body.starts_with('/') {
        // `/regex/flags` is matched as plain text
        let inner = body[1..].rsplit_once('/').map(|(t, _)| t).unwrap_or(&body[1..]);
        (inner.to_string(), false)
    } else {
        (body.to_string(), false)
    };

    ParsedLocator {
        text: Some(TextConstraint { text, exact }),
        ..Default::default()
    }
}

static ROLE_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^([A-Za-z]+)\s*(\[.*\])?$").expect("valid regex"));

static ROLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"name\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\]\s]+))"#).expect("valid regex")
});

fn role_locator(body: &str) -> ParsedLocator {
    let Some(caps) = ROLE_BODY.captures(body.trim()) else {
        return ParsedLocator::default();
    };
    let role = caps.get(1).map(|m| m.as_str().to_lowercase());
    let name = caps
        .get(2)
        .and_then(|m| ROLE_NAME.captures(m.as_str()))
        .and_then(|c| first_capture(&c));

    ParsedLocator {
        role: Some(RoleConstraint { role, name }),
        ..Default::default()
    }
}

// ============================================================================
// CSS
// ============================================================================

enum CssToken<'a> {
    Compound(&'a str),
    Combinator(Combinator),
}

fn parse_css(input: &str) -> ParsedLocator {
    let first = split_outside_quotes(input, ",")
        .into_iter()
        .next()
        .unwrap_or_default();

    let mut steps: Vec<LocatorStep> = Vec::new();
    let mut pending: Option<Combinator> = None;

    for token in css_tokens(first) {
        match token {
            CssToken::Combinator(c) => {
                pending = match (pending, c) {
                    (Some(Combinator::Child), _) => Some(Combinator::Child),
                    _ => Some(c),
                };
            }
            CssToken::Compound(text) => {
                if let Some(mut step) = parse_compound(text) {
                    if !steps.is_empty() {
                        step.combinator = Some(pending.unwrap_or(Combinator::Descendant));
                    }
                    steps.push(step);
                }
                pending = None;
            }
        }
    }

    ParsedLocator {
        steps,
        ..Default::default()
    }
}

fn css_tokens(input: &str) -> Vec<CssToken<'_>> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start: Option<usize> = None;
    let mut escaped = false;

    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                start.get_or_insert(i);
            }
            '"' | '\'' => {
                quote = Some(c);
                start.get_or_insert(i);
            }
            '[' | '(' => {
                depth += 1;
                start.get_or_insert(i);
            }
            ']' | ')' => depth = depth.saturating_sub(1),
            c if depth == 0 && (c.is_whitespace() || matches!(c, '>' | '+' | '~')) => {
                if let Some(s) = start.take() {
                    tokens.push(CssToken::Compound(&input[s..i]));
                }
                match c {
                    '>' => tokens.push(CssToken::Combinator(Combinator::Child)),
                    '+' | '~' => tokens.push(CssToken::Combinator(Combinator::Descendant)),
                    _ => {}
                }
            }
            _ => {
                start.get_or_insert(i);
            }
        }
    }
    if let Some(s) = start {
        tokens.push(CssToken::Compound(&input[s..]));
    }
    tokens
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii()
}

fn read_ident(chars: &[char], i: &mut usize) -> String {
    let mut out = String::new();
    while *i < chars.len() {
        let c = chars[*i];
        if c == '\\' && *i + 1 < chars.len() {
            out.push(chars[*i + 1]);
            *i += 2;
        } else if is_ident_char(c) {
            out.push(c);
            *i += 1;
        } else {
            break;
        }
    }
    out
}

/// Index of the bracket closing the one at `open`, or `chars.len()`
fn find_closing(chars: &[char], open: usize, opening: char, closing: char) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
        } else if c == opening {
            depth += 1;
        } else if c == closing {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return i;
            }
        }
    }
    chars.len()
}

fn parse_compound(text: &str) -> Option<LocatorStep> {
    let chars: Vec<char> = text.chars().collect();
    let mut step = LocatorStep::default();
    let mut i = 0;

    let tag = read_ident(&chars, &mut i);
    if !tag.is_empty() {
        step.tag = Some(tag.to_lowercase());
    } else if chars.first() == Some(&'*') {
        i += 1;
    }

    while i < chars.len() {
        match chars[i] {
            '#' => {
                i += 1;
                let id = read_ident(&chars, &mut i);
                if !id.is_empty() {
                    step.id = Some(id);
                }
            }
            '.' => {
                i += 1;
                let class = read_ident(&chars, &mut i);
                if !class.is_empty() {
                    step.classes.push(class);
                }
            }
            '[' => {
                let end = find_closing(&chars, i, '[', ']');
                if end >= chars.len() {
                    break;
                }
                let inner: String = chars[i + 1..end].iter().collect();
                if let Some(attr) = parse_attribute(&inner) {
                    apply_attribute(&mut step, attr);
                }
                i = end + 1;
            }
            ':' => {
                i += 1;
                if chars.get(i) == Some(&':') {
                    i += 1;
                }
                let name = read_ident(&chars, &mut i);
                let mut arg = None;
                if chars.get(i) == Some(&'(') {
                    let end = find_closing(&chars, i, '(', ')');
                    arg = Some(chars[i + 1..end.min(chars.len())].iter().collect::<String>());
                    i = end + 1;
                }
                apply_pseudo(&mut step, &name, arg.as_deref());
            }
            _ => i += 1,
        }
    }

    (!step.is_empty()).then_some(step)
}

static CSS_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*([A-Za-z_][\w:.-]*)\s*(?:([~|^$*]?=)\s*(?:"([^"]*)"|'([^']*)'|([^\s\]]+)))?\s*[iIsS]?\s*$"#,
    )
    .expect("valid regex")
});

fn parse_attribute(inner: &str) -> Option<AttributeConstraint> {
    let caps = CSS_ATTRIBUTE.captures(inner)?;
    let name = caps.get(1)?.as_str().to_lowercase();
    let op = caps.get(2).map(|m| m.as_str());
    let value = (3..=5)
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str().to_string());

    Some(AttributeConstraint {
        name,
        value,
        partial: matches!(op, Some(o) if o != "="),
    })
}

fn apply_attribute(step: &mut LocatorStep, attr: AttributeConstraint) {
    match (attr.name.as_str(), &attr.value, attr.partial) {
        ("id", Some(v), false) => step.id = Some(v.clone()),
        ("class", Some(v), _) => step
            .classes
            .extend(v.split_whitespace().map(str::to_string)),
        _ => step.attributes.push(attr),
    }
}

fn apply_pseudo(step: &mut LocatorStep, name: &str, arg: Option<&str>) {
    match name {
        "nth-of-type" | "nth-child" => {
            step.nth = arg.and_then(|a| a.trim().parse().ok());
        }
        "first-child" | "first-of-type" => step.nth = Some(1),
        "has-text" | "text" | "contains" => {
            if let Some(a) = arg {
                step.has_text = Some(TextConstraint {
                    text: unquote(a),
                    exact: false,
                });
            }
        }
        "text-is" => {
            if let Some(a) = arg {
                step.has_text = Some(TextConstraint {
                    text: unquote(a),
                    exact: true,
                });
            }
        }
        _ => {}
    }
}

// ============================================================================
// XPath
// ============================================================================

static XPATH_NTH_WRAPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\((.*)\)\[(\d+)\]$").expect("valid regex"));

static XPATH_ATTR_EQ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^@([\w:-]+)\s*=\s*(?:'([^']*)'|"([^"]*)")$"#).expect("valid regex")
});

static XPATH_ATTR_CONTAINS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^contains\(\s*@([\w:-]+)\s*,\s*(?:'([^']*)'|"([^"]*)")\s*\)$"#)
        .expect("valid regex")
});

static XPATH_TEXT_EQ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:text\(\)|\.|normalize-space\((?:\.|text\(\))?\))\s*=\s*(?:'([^']*)'|"([^"]*)")$"#,
    )
    .expect("valid regex")
});

static XPATH_TEXT_CONTAINS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^contains\(\s*(?:text\(\)|\.|normalize-space\((?:\.|text\(\))?\))\s*,\s*(?:'([^']*)'|"([^"]*)")\s*\)$"#,
    )
    .expect("valid regex")
});

fn parse_xpath(input: &str) -> ParsedLocator {
    let input = input.trim();
    let (body, outer_nth) = match XPATH_NTH_WRAPPER.captures(input) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str()).unwrap_or(input),
            caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()),
        ),
        None => (input, None),
    };
    let body = body.trim_start_matches('.');

    let mut steps: Vec<LocatorStep> = Vec::new();
    let mut combinator = Combinator::Child;

    for (i, segment) in split_outside_quotes(body, "/").into_iter().enumerate() {
        if segment.is_empty() {
            if i > 0 {
                combinator = Combinator::Descendant;
            }
            continue;
        }
        if let Some(mut step) = parse_xpath_step(segment) {
            if !steps.is_empty() {
                step.combinator = Some(combinator);
            }
            steps.push(step);
        }
        combinator = Combinator::Child;
    }

    if let (Some(nth), Some(last)) = (outer_nth, steps.last_mut()) {
        last.nth = Some(nth);
    }

    ParsedLocator {
        steps,
        ..Default::default()
    }
}

fn parse_xpath_step(segment: &str) -> Option<LocatorStep> {
    let segment = match segment.split_once("::") {
        Some((_axis, rest)) => rest,
        None => segment,
    };
    let chars: Vec<char> = segment.chars().collect();
    let tag_end = chars.iter().position(|&c| c == '[').unwrap_or(chars.len());
    let tag: String = chars[..tag_end].iter().collect();
    let tag = tag.trim();

    if tag == "text()" || tag.starts_with('@') {
        return None;
    }

    let mut step = LocatorStep::default();
    if !tag.is_empty() && tag != "*" && tag != "node()" {
        step.tag = Some(tag.to_lowercase());
    }

    let mut i = tag_end;
    while i < chars.len() {
        if chars[i] != '[' {
            i += 1;
            continue;
        }
        let end = find_closing(&chars, i, '[', ']');
        let predicate: String = chars[i + 1..end.min(chars.len())].iter().collect();
        for clause in split_outside_quotes(&predicate, " and ") {
            apply_xpath_clause(&mut step, clause.trim());
        }
        i = end + 1;
    }

    (!step.is_empty()).then_some(step)
}

fn apply_xpath_clause(step: &mut LocatorStep, clause: &str) {
    if let Ok(n) = clause.parse::<usize>() {
        step.nth = Some(n);
        return;
    }
    if let Some(caps) = XPATH_ATTR_EQ.captures(clause) {
        let name = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str().to_string());
        apply_attribute(
            step,
            AttributeConstraint {
                name,
                value,
                partial: false,
            },
        );
        return;
    }
    if let Some(caps) = XPATH_ATTR_CONTAINS.captures(clause) {
        let name = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        let value = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str().to_string());
        if name == "class" {
            if let Some(v) = value {
                step.classes.extend(v.split_whitespace().map(str::to_string));
            }
        } else {
            step.attributes.push(AttributeConstraint {
                name,
                value,
                partial: true,
            });
        }
        return;
    }
    if let Some(caps) = XPATH_TEXT_EQ.captures(clause) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            step.has_text = Some(TextConstraint {
                text: m.as_str().to_string(),
                exact: true,
            });
        }
        return;
    }
    if let Some(caps) = XPATH_TEXT_CONTAINS.captures(clause) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            step.has_text = Some(TextConstraint {
                text: m.as_str().to_string(),
                exact: false,
            });
        }
        return;
    }
    if let Some(name) = clause.strip_prefix('@') {
        step.attributes.push(AttributeConstraint {
            name: name.to_lowercase(),
            value: None,
            partial: false,
        });
    }
}

// ============================================================================
// Message extraction
// ============================================================================

static MESSAGE_LOCATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"waiting for (?:selector|locator)\s*\(?\s*(?:"([^"]+)"|'([^']+)'|`([^`]+)`)"#,
        r#"Unable to locate element: \{"method":"[^"]*","selector":"([^"]+)"\}"#,
        r#"locator\(\s*(?:'([^']+)'|"([^"]+)")\s*\)"#,
        r#"(?i)(?:no element|no node) (?:found )?(?:for|matching) (?:selector:? )?(?:"([^"]+)"|'([^']+)')"#,
        r#"(?i)element (?:"([^"]+)"|'([^']+)') (?:was )?not (?:found|visible)"#,
        r"waiting for (?:selector|locator)\s+([^\s\x22'`]+)",
        r"(?i)(?:no element|no node) (?:found )?(?:for|matching) (?:selector:? )?([^\s\x22']+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Recover the locator a runner mentioned in its error text
pub fn extract_locator_from_message(message: &str) -> Option<String> {
    MESSAGE_LOCATORS.iter().find_map(|re| {
        re.captures(message)
            .and_then(|c| first_capture(&c))
            .map(|s| s.trim_end_matches(['.', ',', ';', ':']).to_string())
            .filter(|s| !s.is_empty())
    })
}

// ============================================================================
// Helpers
// ============================================================================

fn is_quoted(s: &str) -> bool {
    s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if is_quoted(s) {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Split on `sep` wherever it is not inside quotes or brackets
fn split_outside_quotes<'a>(input: &'a str, sep: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut last = 0;
    let bytes = input.as_bytes();
    let mut i = 0;

    while i < input.len() {
        let c = bytes[i] as char;
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 && bytes[i..].starts_with(sep.as_bytes()) => {
                parts.push(&input[last..i]);
                i += sep.len();
                last = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&input[last..]);
    parts
}
