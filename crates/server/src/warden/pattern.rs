//! Policy patterns: literal text with `<regex>` segments.
//!
//! `rn:accounts:<[^:]+>` matches `rn:accounts:42` but not
//! `rn:accounts:42:keys`. Literal parts are escaped; the whole value must
//! match. Segments may contain nested `<` `>` pairs.

use regex::Regex;
use thiserror::Error;

const START: char = '<';
const END: char = '>';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern '{0}' has unbalanced '<' '>' delimiters")]
    Unbalanced(String),
    #[error("pattern '{pattern}' is not a valid regular expression: {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    /// `None` for purely literal patterns, which compare by equality
    regex: Option<Regex>,
}

impl Pattern {
    pub fn compile(raw: &str) -> Result<Self, PatternError> {
        if !raw.contains(START) && !raw.contains(END) {
            return Ok(Self {
                raw: raw.to_string(),
                regex: None,
            });
        }

        let mut expression = String::from("^");
        let mut literal = String::new();
        let mut segment = String::new();
        let mut depth = 0usize;
        for c in raw.chars() {
            match c {
                START if depth == 0 => {
                    expression.push_str(&regex::escape(&literal));
                    literal.clear();
                    depth = 1;
                }
                START => {
                    depth += 1;
                    segment.push(c);
                }
                END if depth == 0 => return Err(PatternError::Unbalanced(raw.to_string())),
                END if depth == 1 => {
                    expression.push('(');
                    expression.push_str(&segment);
                    expression.push(')');
                    segment.clear();
                    depth = 0;
                }
                END => {
                    depth -= 1;
                    segment.push(c);
                }
                _ if depth > 0 => segment.push(c),
                _ => literal.push(c),
            }
        }
        if depth != 0 {
            return Err(PatternError::Unbalanced(raw.to_string()));
        }
        expression.push_str(&regex::escape(&literal));
        expression.push('$');

        let regex = Regex::new(&expression).map_err(|e| PatternError::InvalidRegex {
            pattern: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            raw: raw.to_string(),
            regex: Some(regex),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, value: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(value),
            None => self.raw == value,
        }
    }
}

/// Compiles every pattern of a policy field.
pub fn compile_all(raw: &[String]) -> Result<Vec<Pattern>, PatternError> {
    raw.iter().map(|p| Pattern::compile(p)).collect()
}
