//! URL and host utilities
//!
//! These functions avoid allocations on the matching path and work directly on
//! string slices. Normalization helpers used for the persisted block list
//! allocate once per call.

// =============================================================================
// Scheme
// =============================================================================

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();

    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    if bytes.len() > colon_pos + 2 && bytes[colon_pos + 1] == b'/' && bytes[colon_pos + 2] == b'/'
    {
        return Some(colon_pos + 3);
    }

    None
}

/// Strip a leading `http://` or `https://`, ignoring case.
#[inline]
pub fn strip_web_scheme(input: &str) -> &str {
    for prefix in ["https://", "http://"] {
        if let Some(head) = input.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                return &input[prefix.len()..];
            }
        }
    }
    input
}

// =============================================================================
// Host Extraction
// =============================================================================

/// Get the start and end positions of the hostname in a URL.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    // Skip userinfo
    let mut host_start = scheme_end;
    for (i, &b) in bytes.iter().enumerate().skip(scheme_end) {
        if b == b'@' {
            host_start = i + 1;
            break;
        }
        if b == b'/' {
            break;
        }
    }

    // Find host end
    let mut host_end = bytes.len();
    for (i, &b) in bytes.iter().enumerate().skip(host_start) {
        if b == b'/' || b == b'?' || b == b'#' || b == b':' {
            host_end = i;
            break;
        }
    }

    Some((host_start, host_end))
}

/// Fast host extraction without allocations.
/// Returns a slice into the original URL.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (host_start, host_end) = get_host_position(url)?;
    Some(&url[host_start..host_end])
}

// =============================================================================
// Domains
// =============================================================================

/// Normalize user input into a block-list domain.
///
/// Lowercases, trims, strips an `http(s)://` prefix and anything from the
/// first `/` on. Returns `None` when nothing is left.
pub fn normalize_domain(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let without_scheme = strip_web_scheme(trimmed);
    let host = match without_scheme.find('/') {
        Some(pos) => &without_scheme[..pos],
        None => without_scheme,
    };
    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

/// True when `host` is `domain` or one of its subdomains.
#[inline]
pub fn host_matches_domain(host: &str, domain: &str) -> bool {
    if domain.is_empty() || host.len() < domain.len() {
        return false;
    }
    let split = host.len() - domain.len();
    if !host.is_char_boundary(split) || !host[split..].eq_ignore_ascii_case(domain) {
        return false;
    }
    split == 0 || host.as_bytes()[split - 1] == b'.'
}

/// Tab match patterns covering `domain` and every subdomain.
pub fn domain_match_patterns(domain: &str) -> Vec<String> {
    vec![format!("*://{domain}/*"), format!("*://*.{domain}/*")]
}

/// Check a URL against a tab match pattern of the form
/// `<scheme>://<host>/<path>` where scheme may be `*`, host may start with
/// `*.`, and path may contain `*`.
pub fn matches_url_pattern(pattern: &str, url: &str) -> bool {
    let (Some(p_scheme_end), Some(u_scheme_end)) = (get_scheme_end(pattern), get_scheme_end(url))
    else {
        return false;
    };

    let p_scheme = &pattern[..p_scheme_end - 3];
    let u_scheme = &url[..u_scheme_end - 3];
    let scheme_ok = if p_scheme == "*" {
        u_scheme.eq_ignore_ascii_case("http") || u_scheme.eq_ignore_ascii_case("https")
    } else {
        p_scheme.eq_ignore_ascii_case(u_scheme)
    };
    if !scheme_ok {
        return false;
    }

    let p_rest = &pattern[p_scheme_end..];
    let (p_host, p_path) = match p_rest.find('/') {
        Some(pos) => (&p_rest[..pos], &p_rest[pos..]),
        None => (p_rest, "/"),
    };

    let u_host = match extract_host(url) {
        Some(host) => host,
        None => return false,
    };
    let host_ok = if p_host == "*" {
        true
    } else if let Some(suffix) = p_host.strip_prefix("*.") {
        host_matches_domain(u_host, suffix)
    } else {
        u_host.eq_ignore_ascii_case(p_host)
    };
    if !host_ok {
        return false;
    }

    glob_match(p_path.as_bytes(), url_path_and_query(url).as_bytes())
}

/// Path, query and fragment of a URL (`/` when absent).
fn url_path_and_query(url: &str) -> &str {
    let Some((_, host_end)) = get_host_position(url) else {
        return "/";
    };
    let rest = &url[host_end..];
    // Skip the port
    let rest = match rest.strip_prefix(':') {
        Some(after_colon) => {
            let end = after_colon
                .find(|c: char| matches!(c, '/' | '?' | '#'))
                .unwrap_or(after_colon.len());
            &after_colon[end..]
        }
        None => rest,
    };
    if rest.starts_with('/') {
        rest
    } else {
        "/"
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some((&c, rest)) => text.first() == Some(&c) && glob_match(rest, &text[1..]),
    }
}

// =============================================================================
// Separator Check
// =============================================================================

/// Check if a byte is a `^` separator in a url filter.
/// Anything except letters, digits and `_ - . %` separates.
#[inline]
pub fn is_separator_char(c: u8) -> bool {
    !(c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'.' | b'%'))
}

/// Check if position in string is at a separator (end of string counts).
#[inline]
pub fn is_at_separator(s: &str, pos: usize) -> bool {
    if pos >= s.len() {
        return true;
    }
    is_separator_char(s.as_bytes()[pos])
}
