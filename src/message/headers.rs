//! Header value helpers.
//!
//! # Design Decisions
//! - Header storage is `http::HeaderMap`: case-insensitive, multi-valued, and
//!   order-preserving for values of the same name
//! - Splitting respects double-quoted segments so `;` or `,` inside a quoted
//!   cookie value never splits it

use axum::http::header::HeaderName;
use axum::http::HeaderMap;

/// Split `value` on any of `delimiters` that appear outside double quotes.
///
/// Segments are trimmed; empty segments are dropped.
pub fn split_quoted(value: &str, delimiters: &[char]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;

    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if !quoted && delimiters.contains(&c) => {
                let segment = current.trim();
                if !segment.is_empty() {
                    parts.push(segment.to_string());
                }
                current.clear();
            }
            c => current.push(c),
        }
    }
    let segment = current.trim();
    if !segment.is_empty() {
        parts.push(segment.to_string());
    }
    parts
}

/// Split `name=value` at the first `=`; a bare token yields an empty value.
pub fn split_pair(token: &str) -> (&str, &str) {
    match token.split_once('=') {
        Some((name, value)) => (name.trim(), value.trim()),
        None => (token.trim(), ""),
    }
}

/// Strip one level of surrounding double quotes.
pub fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// First value of `name` as text.
pub fn first_value<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Every value of `name` as owned text, skipping non-visible-ASCII values.
pub fn all_values(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// Split a `Host` value into host and optional port. A bracketed IPv6
/// literal keeps its brackets: `[::1]:8080` gives `("[::1]", Some("8080"))`.
pub fn split_host_port(value: &str) -> (&str, Option<&str>) {
    if let Some(rest) = value.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) => (&value[..host.len() + 2], tail.strip_prefix(':')),
            None => (value, None),
        };
    }
    match value.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (value, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_quotes() {
        let parts = split_quoted(r#"a=1; b="x;y"; c=3"#, &[';']);
        assert_eq!(parts, vec!["a=1", r#"b="x;y""#, "c=3"]);
    }

    #[test]
    fn test_split_on_either_delimiter() {
        let parts = split_quoted("a=1, b=2;c=3 ;; ", &[';', ',']);
        assert_eq!(parts, vec!["a=1", "b=2", "c=3"]);
    }

    #[test]
    fn test_escaped_quote_inside_value() {
        let parts = split_quoted(r#"a="say \"hi\", ok", b=2"#, &[',']);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1], "b=2");
    }

    #[test]
    fn test_pair_and_unquote() {
        assert_eq!(split_pair(" SID = abc "), ("SID", "abc"));
        assert_eq!(split_pair("Secure"), ("Secure", ""));
        assert_eq!(unquote("\"v\""), "v");
        assert_eq!(unquote("v"), "v");
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("example.com:8080"), ("example.com", Some("8080")));
        assert_eq!(split_host_port("example.com"), ("example.com", None));
        assert_eq!(split_host_port("[::1]:8080"), ("[::1]", Some("8080")));
        assert_eq!(split_host_port("[::1]"), ("[::1]", None));
    }
}
