//! Key patterns accepted by `invalidate`
//!
//! * no wildcard: the exact key
//! * one trailing `*`: every key with that prefix
//! * anything else: a glob where `*` is any run and `?` any single character,
//!   matched against the whole key

use regex::Regex;

use crate::errors::{CacheError, CacheResult};

#[derive(Debug, Clone)]
pub enum KeyPattern {
    Exact(String),
    Prefix(String),
    Glob(Regex),
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> CacheResult<Self> {
        let wildcards = pattern.matches(['*', '?']).count();
        if wildcards == 0 {
            return Ok(KeyPattern::Exact(pattern.to_string()));
        }
        if wildcards == 1 && pattern.ends_with('*') {
            return Ok(KeyPattern::Prefix(pattern[..pattern.len() - 1].to_string()));
        }

        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');

        Regex::new(&expr)
            .map(KeyPattern::Glob)
            .map_err(|e| CacheError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(exact) => key == exact,
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyPattern::Glob(regex) => regex.is_match(key),
        }
    }
}
