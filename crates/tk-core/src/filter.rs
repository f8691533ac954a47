//! urlFilter expressions
//!
//! The host's rule table matches URLs with a small filter language:
//!
//! - `||host^` anchors at the start of the hostname or at any label boundary
//!   inside it, so it covers the domain and all of its subdomains
//! - a leading `|` anchors at the start of the URL, a trailing `|` at its end
//! - `*` matches any run of characters
//! - `^` matches one separator character, or the end of the URL
//! - everything else is a case-insensitive literal
//!
//! A filter is compiled once into a short op list and evaluated against a
//! lowercased URL.

use crate::url::{get_host_position, is_separator_char};

// =============================================================================
// Pattern Ops
// =============================================================================

/// Compiled filter step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternOp {
    /// Match a lowercased literal at the current position
    FindLit(String),
    /// Skip any chars (for * wildcard)
    SkipAny,
    /// Assert next char is a separator (or end of URL)
    AssertSeparator,
}

/// Where the first op has to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnchorType {
    #[default]
    None,
    Left,
    Hostname,
}

/// Why a filter could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("filter is empty")]
    Empty,
    #[error("hostname anchor is not followed by a host")]
    EmptyHostAnchor,
    #[error("filter contains non-ASCII characters")]
    NonAscii,
}

/// A compiled urlFilter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFilter {
    pub anchor: AnchorType,
    pub ops: Vec<PatternOp>,
    pub right_anchor: bool,
}

impl UrlFilter {
    /// Compile a filter expression.
    pub fn parse(filter: &str) -> Result<Self, FilterError> {
        if filter.is_empty() {
            return Err(FilterError::Empty);
        }
        if !filter.is_ascii() {
            return Err(FilterError::NonAscii);
        }

        let (anchor, mut body) = if let Some(rest) = filter.strip_prefix("||") {
            (AnchorType::Hostname, rest)
        } else if let Some(rest) = filter.strip_prefix('|') {
            (AnchorType::Left, rest)
        } else {
            (AnchorType::None, filter)
        };

        let mut right_anchor = false;
        if let Some(rest) = body.strip_suffix('|') {
            right_anchor = true;
            body = rest;
        }

        if anchor == AnchorType::Hostname
            && (body.is_empty() || body.starts_with('^') || body.starts_with('*'))
        {
            return Err(FilterError::EmptyHostAnchor);
        }

        let mut ops = Vec::new();
        let mut literal = String::new();
        for c in body.chars() {
            match c {
                '*' => {
                    flush_literal(&mut literal, &mut ops);
                    if ops.last() != Some(&PatternOp::SkipAny) {
                        ops.push(PatternOp::SkipAny);
                    }
                }
                '^' => {
                    flush_literal(&mut literal, &mut ops);
                    ops.push(PatternOp::AssertSeparator);
                }
                _ => literal.push(c.to_ascii_lowercase()),
            }
        }
        flush_literal(&mut literal, &mut ops);

        Ok(Self {
            anchor,
            ops,
            right_anchor,
        })
    }

    /// True when the filter matches `url`.
    pub fn matches(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        self.matches_lowercased(&lower)
    }

    /// Same as [`matches`](Self::matches) for an already lowercased URL.
    pub fn matches_lowercased(&self, url: &str) -> bool {
        let bytes = url.as_bytes();
        match self.anchor {
            AnchorType::Left => match_ops(&self.ops, bytes, 0, self.right_anchor),
            AnchorType::None => {
                (0..=bytes.len()).any(|pos| match_ops(&self.ops, bytes, pos, self.right_anchor))
            }
            AnchorType::Hostname => {
                let Some((host_start, host_end)) = get_host_position(url) else {
                    return false;
                };
                let label_starts = std::iter::once(host_start).chain(
                    (host_start..host_end)
                        .filter(|&i| bytes[i] == b'.')
                        .map(|i| i + 1),
                );
                for start in label_starts {
                    if match_ops(&self.ops, bytes, start, self.right_anchor) {
                        return true;
                    }
                }
                false
            }
        }
    }
}

fn flush_literal(literal: &mut String, ops: &mut Vec<PatternOp>) {
    if !literal.is_empty() {
        ops.push(PatternOp::FindLit(std::mem::take(literal)));
    }
}

fn match_ops(ops: &[PatternOp], s: &[u8], pos: usize, right_anchor: bool) -> bool {
    match ops.split_first() {
        None => !right_anchor || pos == s.len(),
        Some((PatternOp::FindLit(lit), rest)) => {
            s[pos..].starts_with(lit.as_bytes())
                && match_ops(rest, s, pos + lit.len(), right_anchor)
        }
        Some((PatternOp::SkipAny, rest)) => {
            (pos..=s.len()).any(|p| match_ops(rest, s, p, right_anchor))
        }
        Some((PatternOp::AssertSeparator, rest)) => {
            if pos == s.len() {
                match_ops(rest, s, pos, right_anchor)
            } else {
                is_separator_char(s[pos]) && match_ops(rest, s, pos + 1, right_anchor)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_anchor() {
        let filter = UrlFilter::parse("||YouTube.com^").unwrap();
        assert_eq!(filter.anchor, AnchorType::Hostname);
        assert_eq!(
            filter.ops,
            vec![
                PatternOp::FindLit("youtube.com".to_string()),
                PatternOp::AssertSeparator
            ]
        );
        assert!(!filter.right_anchor);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(UrlFilter::parse(""), Err(FilterError::Empty));
        assert_eq!(UrlFilter::parse("||"), Err(FilterError::EmptyHostAnchor));
        assert_eq!(UrlFilter::parse("||^"), Err(FilterError::EmptyHostAnchor));
        assert_eq!(UrlFilter::parse("||bücher.de"), Err(FilterError::NonAscii));
    }

    #[test]
    fn test_host_anchor_covers_subdomains() {
        let filter = UrlFilter::parse("||youtube.com^").unwrap();
        assert!(filter.matches("https://youtube.com/watch?v=x"));
        assert!(filter.matches("https://www.youtube.com/"));
        assert!(filter.matches("https://M.YOUTUBE.COM"));
        assert!(filter.matches("https://youtube.com:8443/"));
        assert!(!filter.matches("https://notyoutube.com/"));
        assert!(!filter.matches("https://youtube.company.com/"));
        assert!(!filter.matches("https://example.com/?next=youtube.com"));
    }

    #[test]
    fn test_wildcard_matches_everything() {
        let filter = UrlFilter::parse("*").unwrap();
        assert!(filter.matches("https://example.com/"));
        assert!(filter.matches(""));
    }

    #[test]
    fn test_plain_substring() {
        let filter = UrlFilter::parse("tube").unwrap();
        assert!(filter.matches("https://youtube.com/"));
        assert!(!filter.matches("https://example.com/"));
    }

    #[test]
    fn test_left_and_right_anchors() {
        let filter = UrlFilter::parse("|https://example.com/|").unwrap();
        assert!(filter.matches("https://example.com/"));
        assert!(!filter.matches("https://example.com/page"));
        assert!(!filter.matches("http://https://example.com/"));
    }
}
