use std::collections::HashSet;
use std::net::IpAddr;

use tk_core::url::normalize_domain;

/// Why a block-list entry was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error("entry is empty")]
    Empty,
    #[error("'{0}' is not a valid domain")]
    InvalidDomain(String),
}

/// Normalize one user-entered site into a block-list domain.
///
/// Accepts bare domains, URLs (`https://www.example.com/path`) and
/// host-anchored filters (`||example.com^`).
pub fn normalize_entry(input: &str) -> Result<String, EntryError> {
    let input = input.trim();
    let input = match parse_host_anchor(input) {
        Some(host) => host,
        None => input,
    };

    let domain = normalize_domain(input).ok_or(EntryError::Empty)?;
    let domain = domain.trim_matches('.');
    if domain.is_empty() {
        return Err(EntryError::Empty);
    }

    if !domain
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
    {
        return Err(EntryError::InvalidDomain(domain.to_string()));
    }

    Ok(domain.to_string())
}

/// Parse a block list, one site per line.
///
/// Comment lines (`!`, `#`, `[`) and blank lines are skipped, hosts-file lines
/// (`0.0.0.0 example.com`) contribute their host, invalid entries are logged
/// and dropped. The result is unique and keeps first-seen order.
pub fn parse_block_list(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut domains = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || is_comment_line(line) {
            continue;
        }

        let entry = parse_hosts_file_domain(line).unwrap_or(line);
        match normalize_entry(entry) {
            Ok(domain) => {
                if seen.insert(domain.clone()) {
                    domains.push(domain);
                }
            }
            Err(e) => log::warn!("Skipping block list entry '{}': {}", line, e),
        }
    }

    domains
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!') || line.starts_with('[') || line.starts_with('#')
}

fn parse_host_anchor(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("||")?;
    let end = rest.find(&['^', '|'][..]).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn parse_hosts_file_domain(line: &str) -> Option<&str> {
    let mut parts = line.split_whitespace();
    let first = parts.next()?;
    let second = parts.next()?;

    if first.parse::<IpAddr>().is_ok() {
        return Some(second);
    }

    None
}
