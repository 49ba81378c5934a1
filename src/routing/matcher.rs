//! Route condition matching.
//!
//! # Responsibilities
//! - Evaluate `has`/`missing` conditions against headers, cookies, query, host
//! - Fold condition lists with AND semantics (negated for `missing`)
//! - Compile rule tables once at startup into matchers
//!
//! # Design Decisions
//! - Manifest regexes are JavaScript flavoured (lookaround included) and are
//!   compiled with `fancy_regex`
//! - Condition values are searched, not anchored: `Mobile` matches any
//!   user agent containing it
//! - An absent value regex only checks that the key is present
//! - A malformed rule regex disables that rule; a malformed condition regex
//!   fails that condition; a malformed source template falls back to literal
//!   destinations. None of them abort resolution.

use fancy_regex::Regex;

use crate::http::request::InternalRequest;
use crate::routing::template::{MatcherError, Params, PathTemplate};
use crate::routing::types::{ConditionKind, ConditionValue, HeaderRule, RouteHas, RouteRule};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &InternalRequest) -> bool;
}

#[derive(Debug, Clone)]
enum ValuePattern {
    /// No value given: presence check.
    Present,
    /// Any of the regexes must match.
    AnyOf(Vec<Regex>),
    /// The configured regex did not compile; the condition never holds.
    Invalid(String),
}

/// A compiled `has`/`missing` condition.
#[derive(Debug, Clone)]
pub struct Condition {
    pub kind: ConditionKind,
    pub key: String,
    pattern: ValuePattern,
}

fn compile_value(value: &str) -> Result<Regex, MatcherError> {
    Regex::new(value).map_err(|e| MatcherError::InvalidRegex {
        pattern: value.to_string(),
        reason: e.to_string(),
    })
}

/// `regex.is_match`, treating a runtime failure (backtrack limit) as no match.
pub(crate) fn search(regex: &Regex, haystack: &str) -> bool {
    regex.is_match(haystack).unwrap_or_else(|e| {
        tracing::debug!(regex = %regex.as_str(), error = %e, "Regex evaluation failed");
        false
    })
}

impl Condition {
    /// Compile a condition from its rule-table form.
    pub fn compile(has: &RouteHas) -> Self {
        let values: Vec<&str> = match &has.value {
            None => Vec::new(),
            Some(ConditionValue::One(v)) if v.is_empty() => Vec::new(),
            Some(ConditionValue::One(v)) => vec![v.as_str()],
            Some(ConditionValue::AnyOf(vs)) => vs.iter().map(String::as_str).collect(),
        };

        let pattern = if values.is_empty() {
            ValuePattern::Present
        } else {
            match values.into_iter().map(compile_value).collect::<Result<Vec<_>, _>>() {
                Ok(regexes) => ValuePattern::AnyOf(regexes),
                Err(e) => {
                    tracing::warn!(kind = ?has.kind, key = %has.key, error = %e, "Invalid condition regex");
                    ValuePattern::Invalid(e.to_string())
                }
            }
        };

        Self {
            kind: has.kind,
            key: has.key.clone(),
            pattern,
        }
    }

    fn test_values(&self, values: &[&str]) -> bool {
        match &self.pattern {
            ValuePattern::Present => !values.is_empty(),
            ValuePattern::AnyOf(regexes) => values
                .iter()
                .any(|v| regexes.iter().any(|re| search(re, v))),
            ValuePattern::Invalid(reason) => {
                tracing::debug!(kind = ?self.kind, key = %self.key, reason = %reason, "Condition failed: invalid regex");
                false
            }
        }
    }
}

impl Matcher for Condition {
    fn matches(&self, req: &InternalRequest) -> bool {
        matches_condition(req, self)
    }
}

/// Evaluate one condition against a request.
pub fn matches_condition(req: &InternalRequest, condition: &Condition) -> bool {
    match condition.kind {
        ConditionKind::Header => {
            let value = req.header(&condition.key.to_ascii_lowercase()).filter(|v| !v.is_empty());
            condition.test_values(&value.into_iter().collect::<Vec<_>>())
        }
        ConditionKind::Cookie => {
            let value = req
                .cookies
                .get(&condition.key)
                .map(String::as_str)
                .filter(|v| !v.is_empty());
            condition.test_values(&value.into_iter().collect::<Vec<_>>())
        }
        ConditionKind::Query => {
            let values = req
                .query
                .get(&condition.key)
                .map(|v| v.values())
                .unwrap_or_default();
            condition.test_values(&values)
        }
        ConditionKind::Host => {
            let host = req
                .host()
                .map(|h| h.split(':').next().unwrap_or(h))
                .filter(|h| !h.is_empty());
            condition.test_values(&host.into_iter().collect::<Vec<_>>())
        }
    }
}

/// AND-fold over `conditions`. With `invert`, each test is negated first.
pub fn evaluate_conditions(req: &InternalRequest, conditions: &[Condition], invert: bool) -> bool {
    conditions
        .iter()
        .all(|c| matches_condition(req, c) != invert)
}

fn compile_rule_regex(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(regex = %pattern, error = %e, "Rule disabled: invalid regex");
            None
        }
    }
}

fn compile_source(source: &str) -> Option<PathTemplate> {
    match PathTemplate::parse(source) {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(source = %source, error = %e, "Source template unusable, destinations will be literal");
            None
        }
    }
}

/// Shared matching state of rewrite/redirect and header rules.
#[derive(Debug, Clone)]
struct RuleMatch {
    regex: Option<Regex>,
    source: Option<PathTemplate>,
    has: Vec<Condition>,
    missing: Vec<Condition>,
}

impl RuleMatch {
    fn compile(regex: &str, source: &str, has: &[RouteHas], missing: &[RouteHas]) -> Self {
        Self {
            regex: compile_rule_regex(regex),
            source: compile_source(source),
            has: has.iter().map(Condition::compile).collect(),
            missing: missing.iter().map(Condition::compile).collect(),
        }
    }

    fn matches(&self, req: &InternalRequest) -> bool {
        let Some(regex) = &self.regex else {
            return false;
        };
        search(regex, &req.raw_path)
            && evaluate_conditions(req, &self.has, false)
            && evaluate_conditions(req, &self.missing, true)
    }

    fn params(&self, req: &InternalRequest) -> Params {
        self.source
            .as_ref()
            .and_then(|t| t.match_path(&req.raw_path))
            .unwrap_or_default()
    }
}

/// A rewrite/redirect rule ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: RouteRule,
    matcher: RuleMatch,
}

impl CompiledRule {
    pub fn compile(rule: RouteRule) -> Self {
        let matcher = RuleMatch::compile(&rule.regex, &rule.source, &rule.has, &rule.missing);
        Self { rule, matcher }
    }

    /// Parameters captured from the raw path by the source template.
    pub fn params(&self, req: &InternalRequest) -> Params {
        self.matcher.params(req)
    }
}

impl Matcher for CompiledRule {
    fn matches(&self, req: &InternalRequest) -> bool {
        self.matcher.matches(req)
    }
}

/// A header-injection rule ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledHeaderRule {
    pub rule: HeaderRule,
    matcher: RuleMatch,
}

impl CompiledHeaderRule {
    pub fn compile(rule: HeaderRule) -> Self {
        let matcher = RuleMatch::compile(&rule.regex, &rule.source, &rule.has, &rule.missing);
        Self { rule, matcher }
    }

    pub fn params(&self, req: &InternalRequest) -> Params {
        self.matcher.params(req)
    }
}

impl Matcher for CompiledHeaderRule {
    fn matches(&self, req: &InternalRequest) -> bool {
        self.matcher.matches(req)
    }
}

/// Substitute `params` into `template`, falling back to the literal template
/// when it has no parameters, fails to parse, or cannot be satisfied.
pub fn substitute(template: &str, params: &Params) -> String {
    if params.is_empty() {
        return template.to_string();
    }
    let compiled = PathTemplate::parse(template).and_then(|t| {
        if t.has_params() {
            t.compile(params)
        } else {
            Ok(template.to_string())
        }
    });
    match compiled {
        Ok(out) => out,
        Err(e) => {
            tracing::debug!(template = %template, error = %e, "Falling back to literal substitution");
            template.to_string()
        }
    }
}
