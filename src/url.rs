//! URL parsing and resolution.
//!
//! Only `http://` and `https://` absolute URLs are accepted. A client may
//! carry a base URL whose target is a normalized prefix; relative request
//! URLs are concatenated onto that prefix.

use crate::error::{Error, Result};

/// The components of a parsed URL.
///
/// `target` is the request-line path plus query. For a base URL it is a
/// normalized prefix instead: trailing slashes stripped, possibly empty,
/// and never containing a query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlComponents {
    /// True for `https://` URLs.
    pub https: bool,
    /// Host portion, as written.
    pub host: String,
    /// Port portion; defaulted from the scheme when absent.
    pub port: String,
    /// Path plus query (or normalized base prefix).
    pub target: String,
}

impl UrlComponents {
    /// Render back to `scheme://host[:port]target`, eliding the port when
    /// it equals the scheme default.
    pub fn serialize(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        let default_port = if self.https { "443" } else { "80" };
        if self.port == default_port {
            format!("{}://{}{}", scheme, self.host, self.target)
        } else {
            format!("{}://{}:{}{}", scheme, self.host, self.port, self.target)
        }
    }
}

/// True if `s` starts with an `http://` or `https://` scheme.
pub fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Parse an absolute `http`/`https` URL into its components.
///
/// A missing port defaults to 443 for HTTPS and 80 otherwise; an empty
/// explicit port (`http://host:`) is invalid. A missing path becomes `/`;
/// otherwise the target is the literal substring from the first `/`,
/// including any query string.
pub fn parse_url(url: &str) -> Result<UrlComponents> {
    let (https, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        (false, rest)
    } else {
        return Err(Error::InvalidUrl(format!(
            "URL must start with http:// or https://: {:?}",
            url
        )));
    };

    let (hostport, target) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, "/"),
    };

    if hostport.is_empty() {
        return Err(Error::InvalidUrl(format!("URL missing host: {:?}", url)));
    }

    // The last ':' splits host from port.
    let (host, port) = match hostport.rfind(':') {
        Some(colon) => {
            let port = &hostport[colon + 1..];
            if port.is_empty() {
                return Err(Error::InvalidUrl(format!("URL has empty port: {:?}", url)));
            }
            (&hostport[..colon], port)
        }
        None => (hostport, if https { "443" } else { "80" }),
    };

    if host.is_empty() {
        return Err(Error::InvalidUrl(format!("URL has empty host: {:?}", url)));
    }

    Ok(UrlComponents {
        https,
        host: host.to_string(),
        port: port.to_string(),
        target: if target.is_empty() { "/" } else { target }.to_string(),
    })
}

/// Parse a base URL: an absolute URL whose target becomes a normalized
/// prefix with trailing slashes stripped (a bare `/` becomes empty). The
/// base must not carry a query string.
pub fn parse_base_url(url: &str) -> Result<UrlComponents> {
    let mut components = parse_url(url)?;
    if components.target.contains('?') {
        return Err(Error::InvalidUrl(format!(
            "base URL must not contain a query string: {:?}",
            url
        )));
    }
    components.target = components.target.trim_end_matches('/').to_string();
    Ok(components)
}

/// Resolve a request URL: absolute URLs are parsed directly; relative
/// paths are joined onto the base prefix (a leading `/` is inserted when
/// missing, so an empty path targets the prefix root). Relative paths
/// without a base fail with `InvalidUrl`.
pub fn resolve(url_or_path: &str, base: Option<&UrlComponents>) -> Result<UrlComponents> {
    if is_absolute_url(url_or_path) {
        return parse_url(url_or_path);
    }

    let base = base.ok_or_else(|| {
        Error::InvalidUrl(format!(
            "relative URL {:?} requires a configured base URL",
            url_or_path
        ))
    })?;

    let mut target = String::with_capacity(base.target.len() + url_or_path.len() + 1);
    target.push_str(&base.target);
    if !url_or_path.starts_with('/') {
        target.push('/');
    }
    target.push_str(url_or_path);

    Ok(UrlComponents {
        https: base.https,
        host: base.host.clone(),
        port: base.port.clone(),
        target,
    })
}

/// Percent-encode a string for use in a query parameter. Unreserved
/// characters pass through untouched.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{:02X}", byte));
            }
        }
    }
    out
}
