//! Link-header pagination.
//!
//! Walks a paginated collection by following the RFC 5988 `Link` header's
//! `rel="next"` URL from page to page.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::async_client::AsyncClient;
use crate::http::Response;

/// One page of a paginated collection.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// The decoded items on this page.
    pub items: Vec<T>,
    /// The `rel="next"` URL, if the server advertised one.
    pub next_url: Option<String>,
}

/// Lazily walks pages starting from an initial absolute URL.
///
/// The sequence ends when a page carries no `next` link or a fetch fails.
pub struct Paginator<'a, T> {
    client: &'a AsyncClient,
    next_url: Option<String>,
    _items: PhantomData<fn() -> T>,
}

impl<'a, T: DeserializeOwned> Paginator<'a, T> {
    /// Start paging from `initial_url`.
    pub fn new(client: &'a AsyncClient, initial_url: impl Into<String>) -> Self {
        Self {
            client,
            next_url: Some(initial_url.into()),
            _items: PhantomData,
        }
    }

    /// Fetch the next page, or `None` once the sequence is exhausted.
    pub async fn next(&mut self) -> Option<Page<T>> {
        let url = self.next_url.take()?;

        let response = match self.client.get(url).await {
            Ok(response) => response,
            Err(e) => {
                debug!("pagination stopped on fetch error: {}", e);
                return None;
            }
        };

        let items = response.json::<Vec<T>>().unwrap_or_default();
        let next_url = next_link(&response);
        self.next_url = next_url.clone();

        Some(Page { items, next_url })
    }
}

/// Extract the first `rel="next"` (or `rel=next`) URL from the `Link`
/// header, if any.
pub(crate) fn next_link(response: &Response) -> Option<String> {
    let link = response.header("Link")?;
    for segment in link.split(',') {
        let (Some(start), Some(end)) = (segment.find('<'), segment.find('>')) else {
            continue;
        };
        if end <= start {
            continue;
        }
        if segment.contains("rel=\"next\"") || segment.contains("rel=next") {
            return Some(segment[start + 1..end].to_string());
        }
    }
    None
}
