//! Path templates in `path-to-regexp` syntax.
//!
//! # Responsibilities
//! - Parse rule sources and destinations (`/blog/:slug`, `/docs/:path*`,
//!   `/(.*)`, `/user/:id(\d+)?`)
//! - Match a template against a raw path and capture parameters
//! - Compile a destination template back into a path from captured parameters
//!
//! # Design Decisions
//! - A parameter takes a directly preceding `/` or `.` as its prefix, so
//!   optional and repeated parameters swallow their separator
//! - Unnamed groups are named by position ("0", "1", ...)
//! - Matching is anchored and tolerates one trailing slash
//! - Custom patterns may use lookaround (`/:path((?!api).*)`)

use std::collections::BTreeMap;

use fancy_regex::Regex;
use thiserror::Error;

const DEFAULT_PATTERN: &str = "[^/#?]+?";

/// Errors raised while parsing or compiling templates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatcherError {
    /// The template text could not be tokenized.
    #[error("malformed template `{template}`: {reason}")]
    MalformedTemplate { template: String, reason: String },

    /// A rule or condition regex failed to compile.
    #[error("invalid regex `{pattern}`: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// A required destination parameter was not captured by the source.
    #[error("missing parameter `{0}`")]
    MissingParam(String),
}

/// A captured parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    Segments(Vec<String>),
}

impl ParamValue {
    fn joined(&self) -> String {
        match self {
            ParamValue::Single(v) => v.clone(),
            ParamValue::Segments(vs) => vs.join("/"),
        }
    }
}

/// Parameters captured by a successful match, keyed by name.
pub type Params = BTreeMap<String, ParamValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Required,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

impl Modifier {
    fn is_repeat(self) -> bool {
        matches!(self, Modifier::ZeroOrMore | Modifier::OneOrMore)
    }

    fn is_optional(self) -> bool {
        matches!(self, Modifier::Optional | Modifier::ZeroOrMore)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Param {
        name: String,
        prefix: String,
        pattern: String,
        modifier: Modifier,
    },
}

/// A parsed path template with its compiled matching regex.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    source: String,
    tokens: Vec<Token>,
    regex: Regex,
}

impl PathTemplate {
    /// Parse a template.
    pub fn parse(source: &str) -> Result<Self, MatcherError> {
        let tokens = tokenize(source)?;
        let pattern = build_regex(&tokens);
        let regex = Regex::new(&pattern).map_err(|e| MatcherError::MalformedTemplate {
            template: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            tokens,
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the template declares at least one parameter.
    pub fn has_params(&self) -> bool {
        self.tokens.iter().any(|t| matches!(t, Token::Param { .. }))
    }

    /// Match a raw path, returning the captured parameters.
    pub fn match_path(&self, path: &str) -> Option<Params> {
        let captures = self.regex.captures(path).ok().flatten()?;
        let mut params = Params::new();
        for (index, token) in self.tokens.iter().enumerate() {
            let Token::Param {
                name,
                prefix,
                modifier,
                ..
            } = token
            else {
                continue;
            };
            let Some(m) = captures.name(&group_name(index)) else {
                continue;
            };
            let value = if modifier.is_repeat() {
                let segments = if prefix.is_empty() {
                    vec![m.as_str().to_string()]
                } else {
                    m.as_str().split(prefix.as_str()).map(str::to_string).collect()
                };
                ParamValue::Segments(segments)
            } else {
                ParamValue::Single(m.as_str().to_string())
            };
            params.insert(name.clone(), value);
        }
        Some(params)
    }

    /// Substitute `params` into the template.
    pub fn compile(&self, params: &Params) -> Result<String, MatcherError> {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Param {
                    name,
                    prefix,
                    modifier,
                    ..
                } => match params.get(name) {
                    Some(ParamValue::Segments(segments)) if modifier.is_repeat() => {
                        if segments.is_empty() && !modifier.is_optional() {
                            return Err(MatcherError::MissingParam(name.clone()));
                        }
                        for segment in segments {
                            out.push_str(prefix);
                            out.push_str(segment);
                        }
                    }
                    Some(value) => {
                        out.push_str(prefix);
                        out.push_str(&value.joined());
                    }
                    None if modifier.is_optional() => {}
                    None => return Err(MatcherError::MissingParam(name.clone())),
                },
            }
        }
        Ok(out)
    }
}

fn group_name(index: usize) -> String {
    format!("p{}", index)
}

fn malformed(source: &str, reason: &str) -> MatcherError {
    MatcherError::MalformedTemplate {
        template: source.to_string(),
        reason: reason.to_string(),
    }
}

/// Read a `( ... )` group starting at `start`, returning its body and the
/// index just past the closing paren.
fn read_group(chars: &[char], start: usize, source: &str) -> Result<(String, usize), MatcherError> {
    let mut depth = 1;
    let mut body = String::new();
    let mut i = start + 1;
    if chars.get(i) == Some(&'?') && chars.get(i + 1) != Some(&':') {
        return Err(malformed(source, "pattern cannot start with `?`"));
    }
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                body.push(c);
                if let Some(next) = chars.get(i + 1) {
                    body.push(*next);
                }
                i += 2;
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    if body.is_empty() {
                        return Err(malformed(source, "empty pattern group"));
                    }
                    return Ok((body, i + 1));
                }
            }
            _ => {}
        }
        body.push(c);
        i += 1;
    }
    Err(malformed(source, "unbalanced pattern group"))
}

fn tokenize(source: &str) -> Result<Vec<Token>, MatcherError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut unnamed = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let (name, pattern) = match c {
            '\\' => {
                let Some(escaped) = chars.get(i + 1) else {
                    return Err(malformed(source, "dangling escape"));
                };
                literal.push(*escaped);
                i += 2;
                continue;
            }
            ':' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                if end == start {
                    return Err(malformed(source, "missing parameter name"));
                }
                let name: String = chars[start..end].iter().collect();
                i = end;
                let pattern = if chars.get(i) == Some(&'(') {
                    let (pattern, next) = read_group(&chars, i, source)?;
                    i = next;
                    pattern
                } else {
                    DEFAULT_PATTERN.to_string()
                };
                (name, pattern)
            }
            '(' => {
                let (pattern, next) = read_group(&chars, i, source)?;
                i = next;
                let name = unnamed.to_string();
                unnamed += 1;
                (name, pattern)
            }
            _ => {
                literal.push(c);
                i += 1;
                continue;
            }
        };

        let modifier = match chars.get(i) {
            Some('?') => Modifier::Optional,
            Some('*') => Modifier::ZeroOrMore,
            Some('+') => Modifier::OneOrMore,
            _ => Modifier::Required,
        };
        if modifier != Modifier::Required {
            i += 1;
        }

        let prefix = match literal.chars().last() {
            Some(p @ ('/' | '.')) => {
                literal.pop();
                p.to_string()
            }
            _ => String::new(),
        };
        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(&mut literal)));
        }
        tokens.push(Token::Param {
            name,
            prefix,
            pattern,
            modifier,
        });
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

fn build_regex(tokens: &[Token]) -> String {
    let mut re = String::from("^");
    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::Literal(text) => re.push_str(&fancy_regex::escape(text)),
            Token::Param {
                prefix,
                pattern,
                modifier,
                ..
            } => {
                let p = fancy_regex::escape(prefix);
                let g = group_name(index);
                let part = match modifier {
                    Modifier::Required => format!("{p}(?P<{g}>{pattern})"),
                    Modifier::Optional => format!("(?:{p}(?P<{g}>{pattern}))?"),
                    Modifier::OneOrMore => {
                        format!("{p}(?P<{g}>(?:{pattern})(?:{p}(?:{pattern}))*)")
                    }
                    Modifier::ZeroOrMore => {
                        format!("(?:{p}(?P<{g}>(?:{pattern})(?:{p}(?:{pattern}))*))?")
                    }
                };
                re.push_str(&part);
            }
        }
    }
    re.push_str("/?$");
    re
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(v: &str) -> ParamValue {
        ParamValue::Single(v.to_string())
    }

    #[test]
    fn test_named_param_match() {
        let t = PathTemplate::parse("/blog/:slug").unwrap();
        let params = t.match_path("/blog/hello-world").unwrap();
        assert_eq!(params.get("slug"), Some(&single("hello-world")));
        assert!(t.match_path("/blog/a/b").is_none());
        assert!(t.match_path("/blog/hello/").is_some());
    }

    #[test]
    fn test_wildcard_params() {
        let t = PathTemplate::parse("/docs/:path*").unwrap();
        assert_eq!(
            t.match_path("/docs/a/b/c").unwrap().get("path"),
            Some(&ParamValue::Segments(vec!["a".into(), "b".into(), "c".into()]))
        );
        assert!(t.match_path("/docs").unwrap().get("path").is_none());

        let plus = PathTemplate::parse("/docs/:path+").unwrap();
        assert!(plus.match_path("/docs").is_none());
    }

    #[test]
    fn test_custom_pattern_and_unnamed_group() {
        let t = PathTemplate::parse("/user/:id(\\d+)").unwrap();
        assert!(t.match_path("/user/42").is_some());
        assert!(t.match_path("/user/abc").is_none());

        let unnamed = PathTemplate::parse("/old/(.*)").unwrap();
        let params = unnamed.match_path("/old/x/y").unwrap();
        assert_eq!(params.get("0"), Some(&single("x/y")));
    }

    #[test]
    fn test_lookahead_pattern() {
        let t = PathTemplate::parse("/:path((?!api).*)").unwrap();
        assert_eq!(t.match_path("/about/team").unwrap().get("path"), Some(&single("about/team")));
        assert!(t.match_path("/api/users").is_none());
    }

    #[test]
    fn test_compile_substitutes_params() {
        let source = PathTemplate::parse("/docs/:path*").unwrap();
        let dest = PathTemplate::parse("/guides/:path*").unwrap();
        let params = source.match_path("/docs/intro/setup").unwrap();
        assert_eq!(dest.compile(&params).unwrap(), "/guides/intro/setup");

        let dest = PathTemplate::parse("/archive/:path").unwrap();
        assert_eq!(dest.compile(&params).unwrap(), "/archive/intro/setup");
    }

    #[test]
    fn test_compile_missing_param() {
        let dest = PathTemplate::parse("/post/:id").unwrap();
        assert_eq!(
            dest.compile(&Params::new()),
            Err(MatcherError::MissingParam("id".into()))
        );
        let optional = PathTemplate::parse("/post/:id?").unwrap();
        assert_eq!(optional.compile(&Params::new()).unwrap(), "/post");
    }

    #[test]
    fn test_malformed_templates() {
        assert!(PathTemplate::parse("/a/:").is_err());
        assert!(PathTemplate::parse("/a/(unclosed").is_err());
        assert!(PathTemplate::parse("/a/()").is_err());
    }

    #[test]
    fn test_escaped_characters_are_literal() {
        let t = PathTemplate::parse("/price\\:usd").unwrap();
        assert!(!t.has_params());
        assert!(t.match_path("/price:usd").is_some());
    }
}
