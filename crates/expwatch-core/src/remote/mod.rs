//! Remote dynamic-field table access.
//!
//! The tracker never talks to the network directly; it goes through
//! [`RemoteTable`], which has two operations:
//!
//! - **fetch_page**: one page of the table at a cursor
//! - **lookup**: a single key, used to re-verify tracked records

mod graphql;
pub mod wire;

pub use graphql::GraphqlTableClient;

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// One raw dynamic field as returned by a page query.
///
/// Both fields are optional because the remote side does not guarantee
/// them; extraction decides what is usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawNode {
    /// Key labels, root label first
    pub name_labels: Option<Vec<String>>,
    /// Expiration timestamp in milliseconds, as a decimal string
    pub expiration_raw: Option<String>,
}

impl RawNode {
    /// Build a node from labels and an expiration string.
    pub fn new(labels: &[&str], expiration_raw: impl Into<String>) -> Self {
        Self {
            name_labels: Some(labels.iter().map(|l| l.to_string()).collect()),
            expiration_raw: Some(expiration_raw.into()),
        }
    }
}

/// Paginated query request.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Table object that owns the fields
    pub parent_id: String,
    /// Continuation token from the previous page
    pub cursor: Option<String>,
    /// Maximum nodes per page
    pub page_size: usize,
}

/// One page of the remote table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Fields on this page
    pub nodes: Vec<RawNode>,
    /// Whether more pages follow
    pub has_next_page: bool,
    /// Token to pass as the next cursor
    pub end_cursor: Option<String>,
}

/// Point lookup request.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRequest {
    /// Table object that owns the fields
    pub parent_id: String,
    /// Key labels, root label first
    pub key_labels: Vec<String>,
}

/// Point lookup response. `expiration_raw` is `None` when the key or its
/// expiration is absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupResult {
    /// Expiration timestamp in milliseconds, as a decimal string
    pub expiration_raw: Option<String>,
}

/// Remote table operations.
#[async_trait]
pub trait RemoteTable: Send + Sync {
    /// Fetch one page starting at `request.cursor`.
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page>;

    /// Look up a single key.
    async fn lookup(&self, request: &LookupRequest) -> Result<LookupResult>;
}

#[async_trait]
impl<T: RemoteTable + ?Sized> RemoteTable for Arc<T> {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        (**self).fetch_page(request).await
    }

    async fn lookup(&self, request: &LookupRequest) -> Result<LookupResult> {
        (**self).lookup(request).await
    }
}
