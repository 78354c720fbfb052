use std::sync::atomic::{AtomicU64, Ordering};

use roster_shared::{ListPage, ListQuery};
use tracing::{debug, instrument, warn};

use crate::envelope::ResultUnwrapper;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Result of the most recently issued request.
    Fresh(ListPage),
    /// A newer request was issued while this one was in flight.
    Stale,
    /// The most recent request failed.
    Failed(TransportError),
}

/// Issues list reads and discards responses that were overtaken by a newer
/// request. Requests are not cancelled, only ignored on arrival.
#[derive(Debug)]
pub struct PaginatedFetcher {
    list_path: String,
    unwrapper: ResultUnwrapper,
    issued: AtomicU64,
}

impl PaginatedFetcher {
    pub fn new(list_path: impl Into<String>, unwrapper: ResultUnwrapper) -> Self {
        Self {
            list_path: list_path.into(),
            unwrapper,
            issued: AtomicU64::new(0),
        }
    }

    /// Number of requests issued so far; the latest request carries this
    /// ticket.
    pub fn latest_ticket(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn is_latest(&self, ticket: u64) -> bool {
        self.latest_ticket() == ticket
    }

    pub async fn fetch<T>(&self, transport: &T, query: ListQuery) -> FetchOutcome
    where
        T: Transport + ?Sized,
    {
        self.fetch_ticketed(transport, query).await.1
    }

    /// Like [`PaginatedFetcher::fetch`], also returning the request's
    /// ticket so the caller can re-check [`PaginatedFetcher::is_latest`]
    /// while it stores the result.
    #[instrument(skip(self, transport), fields(path = %self.list_path, page = query.page, limit = query.limit))]
    pub async fn fetch_ticketed<T>(&self, transport: &T, query: ListQuery) -> (u64, FetchOutcome)
    where
        T: Transport + ?Sized,
    {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(ticket, filtered = query.filter.is_some(), "issuing list request");

        let result = transport.get_list(&self.list_path, &query).await;

        let latest = self.latest_ticket();
        if ticket != latest {
            debug!(ticket, latest, "discarding stale list response");
            return (ticket, FetchOutcome::Stale);
        }

        let outcome = match result {
            Ok(envelope) => {
                let page = self.unwrapper.unwrap(&envelope);
                debug!(
                    ticket,
                    items = page.items.len(),
                    total = page.total_count,
                    "list request resolved"
                );
                FetchOutcome::Fresh(page)
            }
            Err(err) => {
                warn!(ticket, error = %err, "list request failed");
                FetchOutcome::Failed(err)
            }
        };
        (ticket, outcome)
    }
}
