//! Cookies and cookie header syntax.
//!
//! # Responsibilities
//! - `Cookie` attribute bag with equality over every field
//! - Parse request `Cookie` headers, keeping RFC 2965 `$` attribute tokens
//!   attached to the pair they qualify
//! - Parse `Set-Cookie` (one cookie per value) and `Set-Cookie2`
//!   (comma separated list) response headers
//! - Render cookies back to header syntax

use std::time::{Duration, SystemTime};

use crate::message::headers::{split_pair, split_quoted, unquote};

/// An HTTP cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<SystemTime>,
    pub max_age: Option<i64>,
    pub version: Option<u32>,
    pub comment: Option<String>,
    pub comment_url: Option<String>,
    pub ports: Vec<u16>,
    pub discard: bool,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn with_expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Absolute expiry derived from `Max-Age` (preferred) or `Expires`,
    /// relative to `received`. `None` means the cookie does not expire
    /// before the session ends, which includes a `Max-Age` beyond what
    /// `SystemTime` can represent.
    pub fn expiry(&self, received: SystemTime) -> Option<SystemTime> {
        match self.max_age {
            Some(age) if age <= 0 => Some(SystemTime::UNIX_EPOCH),
            Some(age) => received.checked_add(Duration::from_secs(age as u64)),
            None => self.expires,
        }
    }

    /// `name=value` as sent in a request `Cookie` header.
    pub fn to_pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_set_cookie(&self) -> String {
        let mut out = self.to_pair();
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(expires) = self.expires {
            out.push_str("; Expires=");
            out.push_str(&httpdate::fmt_http_date(expires));
        }
        if let Some(age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", age));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// One `name=value` token of a request `Cookie` header with the `$Path`,
/// `$Domain` and `$Port` tokens that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePair {
    pub name: String,
    pub value: String,
    raw: String,
    attributes: Vec<String>,
}

impl CookiePair {
    /// The attribute tokens (`$Path=...`) attached to this pair.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    fn to_cookie(&self, version: Option<u32>) -> Cookie {
        let mut cookie = Cookie::new(self.name.clone(), unquote(&self.value));
        cookie.version = version;
        for attribute in &self.attributes {
            let (name, value) = split_pair(attribute);
            let value = unquote(value).to_string();
            match name.to_ascii_lowercase().as_str() {
                "$path" => cookie.path = Some(value),
                "$domain" => cookie.domain = Some(value),
                "$port" => cookie.ports = parse_ports(&value),
                _ => {}
            }
        }
        cookie
    }
}

/// Parsed request `Cookie` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieHeader {
    version: Option<String>,
    pairs: Vec<CookiePair>,
}

impl CookieHeader {
    /// Parse one `Cookie` header value.
    pub fn parse(value: &str) -> Self {
        let mut header = CookieHeader::default();
        for token in split_quoted(value, &[';', ',']) {
            let (name, value) = split_pair(&token);
            if let Some(attribute) = name.strip_prefix('$') {
                if attribute.eq_ignore_ascii_case("version") && header.pairs.is_empty() {
                    header.version = Some(token.clone());
                } else if let Some(last) = header.pairs.last_mut() {
                    last.attributes.push(token.clone());
                }
                // An attribute with no preceding pair qualifies nothing.
                continue;
            }
            header.pairs.push(CookiePair {
                name: name.to_string(),
                value: value.to_string(),
                raw: token.clone(),
                attributes: Vec::new(),
            });
        }
        header
    }

    pub fn pairs(&self) -> &[CookiePair] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Keep only the pairs for which `keep` returns true; a removed pair
    /// takes its attribute tokens with it.
    pub fn retain(&mut self, mut keep: impl FnMut(&CookiePair) -> bool) {
        self.pairs.retain(|pair| keep(pair));
    }

    /// Append the pairs of `other`. The result keeps one leading
    /// `$Version`, the first one seen.
    pub fn merge(&mut self, other: CookieHeader) {
        if self.version.is_none() {
            self.version = other.version;
        }
        self.pairs.extend(other.pairs);
    }

    /// Append a plain `name=value` pair.
    pub fn push(&mut self, name: &str, value: &str) {
        self.pairs.push(CookiePair {
            name: name.to_string(),
            value: value.to_string(),
            raw: format!("{}={}", name, value),
            attributes: Vec::new(),
        });
    }

    /// Cookies described by this header.
    pub fn cookies(&self) -> Vec<Cookie> {
        let version = self
            .version
            .as_deref()
            .map(|v| unquote(split_pair(v).1).to_string())
            .and_then(|v| v.parse().ok());
        self.pairs.iter().map(|p| p.to_cookie(version)).collect()
    }

    /// Render the header, or `None` when no pair is left.
    pub fn to_header_value(&self) -> Option<String> {
        if self.pairs.is_empty() {
            return None;
        }
        let mut tokens: Vec<&str> = Vec::new();
        if let Some(version) = &self.version {
            tokens.push(version);
        }
        for pair in &self.pairs {
            tokens.push(&pair.raw);
            tokens.extend(pair.attributes.iter().map(String::as_str));
        }
        Some(tokens.join("; "))
    }
}

/// Name of the cookie set by one `Set-Cookie` value (or one `Set-Cookie2`
/// list element).
pub fn set_cookie_name(value: &str) -> Option<&str> {
    let first = value.split(';').next()?;
    let (name, _) = split_pair(first);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Split a `Set-Cookie2` value into its list elements.
pub fn split_set_cookie2(value: &str) -> Vec<String> {
    split_quoted(value, &[','])
}

/// Parse one `Set-Cookie` value.
pub fn parse_set_cookie(value: &str) -> Option<Cookie> {
    let mut tokens = split_quoted(value, &[';']).into_iter();
    let first = tokens.next()?;
    let (name, val) = split_pair(&first);
    if name.is_empty() || name.starts_with('$') {
        return None;
    }
    let mut cookie = Cookie::new(name, unquote(val));
    for token in tokens {
        let (attribute, raw_value) = split_pair(&token);
        let attr_value = unquote(raw_value);
        match attribute.to_ascii_lowercase().as_str() {
            "domain" => cookie.domain = Some(attr_value.to_ascii_lowercase()),
            "path" => cookie.path = Some(attr_value.to_string()),
            "expires" => cookie.expires = parse_cookie_date(attr_value),
            "max-age" => cookie.max_age = attr_value.parse().ok(),
            "version" => cookie.version = attr_value.parse().ok(),
            "comment" => cookie.comment = Some(attr_value.to_string()),
            "commenturl" => cookie.comment_url = Some(attr_value.to_string()),
            "port" => cookie.ports = parse_ports(attr_value),
            "discard" => cookie.discard = true,
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            _ => {}
        }
    }
    Some(cookie)
}

/// Parse every cookie of a `Set-Cookie2` value.
pub fn parse_set_cookie2(value: &str) -> Vec<Cookie> {
    split_set_cookie2(value)
        .iter()
        .filter_map(|element| parse_set_cookie(element))
        .collect()
}

fn parse_ports(value: &str) -> Vec<u16> {
    value
        .split(',')
        .filter_map(|p| p.trim().parse().ok())
        .collect()
}

/// Accepts RFC 1123 dates and the Netscape `DD-Mon-YYYY` variant.
fn parse_cookie_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value)
        .or_else(|_| httpdate::parse_http_date(&value.replace('-', " ")))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_roundtrip() {
        let header = CookieHeader::parse("a=1; b=2; c=3");
        assert_eq!(header.pairs().len(), 3);
        assert_eq!(header.to_header_value().as_deref(), Some("a=1; b=2; c=3"));
    }

    #[test]
    fn test_attributes_follow_their_pair() {
        let mut header =
            CookieHeader::parse("$Version=1; a=1; $Path=/a; b=2; $Path=/b; $Domain=.x.org; c=3");
        assert_eq!(header.pairs()[1].attributes().len(), 2);

        header.retain(|p| p.name != "b");
        assert_eq!(
            header.to_header_value().as_deref(),
            Some("$Version=1; a=1; $Path=/a; c=3")
        );

        let cookies = header.cookies();
        assert_eq!(cookies[0].path.as_deref(), Some("/a"));
        assert_eq!(cookies[0].version, Some(1));
    }

    #[test]
    fn test_merge_keeps_one_leading_version() {
        let mut header = CookieHeader::parse("a=1");
        header.merge(CookieHeader::parse("$Version=1; b=2; $Path=/b"));
        header.merge(CookieHeader::parse("$Version=0; c=3"));
        assert_eq!(
            header.to_header_value().as_deref(),
            Some("$Version=1; a=1; b=2; $Path=/b; c=3")
        );
    }

    #[test]
    fn test_empty_header_renders_none() {
        let mut header = CookieHeader::parse("$Version=1; a=1");
        header.retain(|_| false);
        assert!(header.to_header_value().is_none());
    }

    #[test]
    fn test_parse_set_cookie_attributes() {
        let cookie = parse_set_cookie(
            "SID=31d4d96e407aad42; Path=/; Domain=Example.com; Max-Age=3600; Secure; HttpOnly",
        )
        .unwrap();
        assert_eq!(cookie.name, "SID");
        assert_eq!(cookie.value, "31d4d96e407aad42");
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert_eq!(cookie.path.as_deref(), Some("/"));
        assert_eq!(cookie.max_age, Some(3600));
        assert!(cookie.secure && cookie.http_only);
    }

    #[test]
    fn test_parse_netscape_expires() {
        let cookie = parse_set_cookie("lang=en; Expires=Wed, 09-Jun-2021 10:18:14 GMT").unwrap();
        assert!(cookie.expires.is_some());
        let cookie = parse_set_cookie("lang=en; Expires=Wed, 09 Jun 2021 10:18:14 GMT").unwrap();
        assert!(cookie.expires.is_some());
    }

    #[test]
    fn test_parse_set_cookie2_list() {
        let cookies = parse_set_cookie2(r#"a="x,y"; Version=1; Port="80,8080", b=2; Version=1"#);
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].value, "x,y");
        assert_eq!(cookies[0].ports, vec![80, 8080]);
        assert_eq!(cookies[1].name, "b");
    }

    #[test]
    fn test_equality_covers_every_field() {
        let a = Cookie::new("n", "v").with_path("/");
        let b = Cookie::new("n", "v").with_path("/other");
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn test_huge_max_age_never_expires() {
        let cookie = parse_set_cookie("SID=x; Max-Age=9223372036854775807").unwrap();
        assert_eq!(cookie.max_age, Some(i64::MAX));
        assert_eq!(cookie.expiry(SystemTime::now()), None);
    }

    #[test]
    fn test_max_age_zero_expires_immediately() {
        let cookie = Cookie::new("n", "v").with_max_age(0);
        assert_eq!(cookie.expiry(SystemTime::now()), Some(SystemTime::UNIX_EPOCH));
    }
}
