//! Path templates compiled to regular expressions.
//!
//! Supported template syntax:
//!
//! | Token          | Matches                                  | Param key      |
//! |----------------|------------------------------------------|----------------|
//! | `text`         | itself                                   |                |
//! | `:name`        | one segment (no `/`)                     | `name`         |
//! | `:name?`       | an optional segment with its separator   | `name`         |
//! | `:name(\d+)`   | the given regex                          | `name`         |
//! | `*`            | anything, including `/`                  | `0`, `1`, ...  |
//!
//! A `/` or `.` directly before a parameter belongs to that parameter, so
//! `/:id?` matches both `/7` and the empty string.
//!
//! In non-strict mode a trailing slash is optional. In prefix mode (`end:
//! false`) the match must stop at a `/` or at the end of the path; the root
//! template `/` in prefix mode matches every path and consumes nothing.

use regex::{Regex, RegexBuilder};

use super::params::{ParamKey, Params};
use crate::error::RouteError;

/// Options fixed when a pattern is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternOptions {
    /// Compare literal text case-sensitively.
    pub case_sensitive: bool,
    /// Trailing slash is significant.
    pub strict: bool,
    /// Match the whole path (true) or a prefix of it (false).
    pub end: bool,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            strict: false,
            end: true,
        }
    }
}

/// Result of a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub params: Params,
    /// The matched prefix of the input path.
    pub path: String,
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    regex: Regex,
    keys: Vec<ParamKey>,
    options: PatternOptions,
    /// `/` in prefix mode: matches anything without consuming.
    fast_slash: bool,
}

/// Name of the group wrapping the consumed part of the path.
const MATCHED: &str = "matched";

impl PathPattern {
    /// Compile a template. Fails only when a custom capture is not a valid
    /// regular expression.
    pub fn compile(template: &str, options: PatternOptions) -> Result<Self, regex::Error> {
        let (source, keys) = translate(template, options);
        let regex = RegexBuilder::new(&source)
            .case_insensitive(!options.case_sensitive)
            .build()?;

        Ok(Self {
            template: template.to_string(),
            regex,
            keys,
            options,
            fast_slash: template == "/" && !options.end,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn keys(&self) -> &[ParamKey] {
        &self.keys
    }

    pub fn options(&self) -> PatternOptions {
        self.options
    }

    /// Whether this pattern must match the whole path.
    pub fn is_terminal(&self) -> bool {
        self.options.end
    }

    /// Match a path.
    ///
    /// Returns `Ok(None)` on mismatch and an error when a captured value is
    /// not valid percent-encoding. Nothing is mutated either way.
    pub fn matches(&self, path: &str) -> Result<Option<PathMatch>, RouteError> {
        if self.fast_slash {
            return Ok(Some(PathMatch {
                params: Params::new(),
                path: String::new(),
            }));
        }

        let caps = match self.regex.captures(path) {
            Some(caps) => caps,
            None => return Ok(None),
        };

        let matched = caps
            .name(MATCHED)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let mut params = Params::new();
        for (i, key) in self.keys.iter().enumerate() {
            // group 0 is the whole match, group 1 the consumed prefix
            let value = match caps.get(i + 2) {
                Some(m) => Some(decode_param(m.as_str())?),
                None => None,
            };
            params.capture(key.clone(), value);
        }

        Ok(Some(PathMatch {
            params,
            path: matched,
        }))
    }
}

/// Percent-decode one captured value.
///
/// Every `%` must start a two-digit hex escape and the result must be UTF-8.
pub fn decode_param(raw: &str) -> Result<String, RouteError> {
    if raw.is_empty() {
        return Ok(String::new());
    }

    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(RouteError::decode_param(raw));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|_| RouteError::decode_param(raw))
}

/// Translate a template into regex source plus its ordered capture keys.
fn translate(template: &str, options: PatternOptions) -> (String, Vec<ParamKey>) {
    let chars: Vec<char> = template.chars().collect();
    let mut body = String::new();
    let mut keys = Vec::new();
    let mut next_index = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        // A separator directly before `:name` is folded into the parameter.
        let (prefix, colon_at) = match c {
            '/' | '.' if chars.get(i + 1) == Some(&':') => (Some(c), i + 1),
            ':' => (None, i),
            _ => (None, usize::MAX),
        };

        if colon_at != usize::MAX {
            if let Some((name, capture, optional, consumed)) = read_param(&chars, colon_at + 1) {
                let format = if prefix == Some('.') { "\\." } else { "" };
                let slash = if prefix == Some('/') { "/" } else { "" };
                let capture = capture.unwrap_or_else(|| format!("([^/{}]+?)", format));

                if optional {
                    body.push_str(&format!("(?:{}{}{})?", format, slash, capture));
                } else {
                    body.push_str(&format!("{}(?:{}{})", slash, format, capture));
                }
                keys.push(ParamKey::Name(name));
                i = colon_at + 1 + consumed;
                continue;
            }
        }

        if c == '*' {
            body.push_str("(.*)");
            keys.push(ParamKey::Index(next_index));
            next_index += 1;
        } else {
            body.push_str(&regex::escape(&c.to_string()));
        }
        i += 1;
    }

    if !options.strict {
        if template.ends_with('/') {
            body.push('?');
        } else {
            body.push_str("/?");
        }
    }

    let tail = if options.end {
        "$"
    } else if options.strict && template.ends_with('/') {
        ""
    } else {
        "(?:/|$)"
    };

    (format!("^(?P<{}>{}){}", MATCHED, body, tail), keys)
}

/// Parse `name`, an optional `(capture)`, and an optional `?` starting at
/// `start`. Returns the pieces and the number of chars consumed.
fn read_param(chars: &[char], start: usize) -> Option<(String, Option<String>, bool, usize)> {
    let mut i = start;
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        i += 1;
    }
    if i == start {
        return None;
    }
    let name: String = chars[start..i].iter().collect();

    // an unclosed capture keeps the rest of the template, so the regex
    // compiler rejects it
    let mut capture = None;
    if chars.get(i) == Some(&'(') {
        let end = match chars[i..].iter().position(|&c| c == ')') {
            Some(close) => i + close + 1,
            None => chars.len(),
        };
        capture = Some(chars[i..end].iter().collect());
        i = end;
    }

    let optional = chars.get(i) == Some(&'?');
    if optional {
        i += 1;
    }

    Some((name, capture, optional, i - start))
}
