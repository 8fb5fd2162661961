//! Request interceptors.
//!
//! Interceptors run in configuration order on a copy of the request after
//! its URL has been resolved, just before preparation. They are the hook
//! for cross-cutting concerns like authentication.

use crate::http::Request;
use crate::url::{percent_encode, UrlComponents};

/// Modifies outgoing requests before they are prepared for the wire.
pub trait RequestInterceptor: Send + Sync {
    /// Mutate the request. `url` is the resolved form of the request URL
    /// at the time the interceptor runs.
    fn prepare(&self, request: &mut Request, url: &UrlComponents);
}

/// Injects an `Authorization: Bearer <token>` header into every request.
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl RequestInterceptor for BearerAuth {
    fn prepare(&self, request: &mut Request, _url: &UrlComponents) {
        request
            .headers
            .insert("Authorization".to_string(), format!("Bearer {}", self.token));
    }
}

/// Where an [`ApiKey`] is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyLocation {
    /// As an HTTP header.
    Header,
    /// As a URL query parameter, percent-encoded.
    Query,
}

/// Injects an API key either as a header or as a query parameter.
///
/// Query injection preserves any `#fragment` and appends with `?` or `&`
/// depending on whether the URL already carries a query string.
pub struct ApiKey {
    key: String,
    value: String,
    location: ApiKeyLocation,
}

impl ApiKey {
    pub fn new(key: impl Into<String>, value: impl Into<String>, location: ApiKeyLocation) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            location,
        }
    }
}

impl RequestInterceptor for ApiKey {
    fn prepare(&self, request: &mut Request, _url: &UrlComponents) {
        match self.location {
            ApiKeyLocation::Header => {
                request
                    .headers
                    .insert(self.key.clone(), self.value.clone());
            }
            ApiKeyLocation::Query => {
                let (mut url, fragment) = match request.url.find('#') {
                    Some(pos) => (
                        request.url[..pos].to_string(),
                        request.url[pos..].to_string(),
                    ),
                    None => (request.url.clone(), String::new()),
                };

                if !url.contains('?') {
                    url.push('?');
                } else if !url.ends_with('?') && !url.ends_with('&') {
                    url.push('&');
                }
                url.push_str(&percent_encode(&self.key));
                url.push('=');
                url.push_str(&percent_encode(&self.value));
                url.push_str(&fragment);

                request.url = url;
            }
        }
    }
}
