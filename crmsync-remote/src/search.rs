//! Remote search by identity.
//!
//! Turns a batch of local identities (emails, domains, remote ids) into a
//! [`MatchIndex`]. Identities are chunked and the chunks searched
//! concurrently; every chunk must succeed.

use crate::connection::RemoteConnection;
use crate::error::RemoteResult;
use crmsync_merge::match_domain_pattern;
use crmsync_merge::query::{self, DEFAULT_CHUNK_SIZE};
use crmsync_types::{MappingSet, MatchIndex, RecordType, RemoteRecord};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;

/// Search tuning.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Identities per remote call.
    pub chunk_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Builds match indexes from remote searches.
pub struct RemoteSearcher {
    connection: Arc<dyn RemoteConnection>,
    config: SearchConfig,
}

impl RemoteSearcher {
    pub fn new(connection: Arc<dyn RemoteConnection>) -> Self {
        Self::with_config(connection, SearchConfig::default())
    }

    pub fn with_config(connection: Arc<dyn RemoteConnection>, config: SearchConfig) -> Self {
        Self { connection, config }
    }

    /// Runs one search per chunk of `values`, concurrently, skipping chunks
    /// left without a usable term.
    async fn search_chunks(
        &self,
        field: &str,
        values: &[String],
        mappings: &MappingSet,
    ) -> RemoteResult<Vec<RemoteRecord>> {
        let searches = query::chunked(values, self.config.chunk_size)
            .into_iter()
            .filter(|chunk| !query::search_terms(chunk).is_empty())
            .map(|chunk| {
                let sosl = query::search_query(field, &chunk, mappings);
                let connection = Arc::clone(&self.connection);
                async move { connection.search(&sosl).await }
            })
            .collect::<Vec<_>>();

        if searches.is_empty() {
            return Ok(Vec::new());
        }

        let pages = try_join_all(searches).await?;
        Ok(pages.into_iter().flatten().collect())
    }

    /// Finds person records by email. Results are indexed by their `Email`
    /// field, each email holding at most one record per type.
    pub async fn search_emails(
        &self,
        emails: &[String],
        mappings: &MappingSet,
    ) -> RemoteResult<MatchIndex> {
        let records = self.search_chunks("EMAIL", emails, mappings).await?;
        let mut index = MatchIndex::new();
        for record in records {
            match record.str_field("Email").map(str::to_string) {
                Some(email) => index.insert(email, record),
                None => debug!(id = ?record.id(), "search result without email ignored"),
            }
        }
        debug!(emails = emails.len(), matched = index.len(), "email search done");
        Ok(index)
    }

    /// Finds accounts by domain.
    ///
    /// Searches the name fields, then indexes each returned account under the
    /// first domain contained in its `Website`. Accounts whose website
    /// matches none of `domains` are dropped.
    pub async fn search_domains(
        &self,
        domains: &[String],
        mappings: &MappingSet,
    ) -> RemoteResult<MatchIndex> {
        let records = self.search_chunks("NAME", domains, mappings).await?;
        let mut index = MatchIndex::new();
        for record in records {
            let matched = record
                .str_field("Website")
                .and_then(|website| match_domain_pattern(website, domains))
                .cloned();
            match matched {
                Some(domain) => index.insert(domain, record),
                None => debug!(id = ?record.id(), "account website matches no domain"),
            }
        }
        debug!(domains = domains.len(), matched = index.len(), "domain search done");
        Ok(index)
    }

    /// Loads records of `record_type` by remote id, indexed by `Id`.
    pub async fn search_ids(
        &self,
        record_type: &RecordType,
        ids: &[String],
        fields: &[String],
    ) -> RemoteResult<MatchIndex> {
        let lookups = query::chunked(ids, self.config.chunk_size)
            .into_iter()
            .map(|chunk| {
                let soql = query::records_by_ids_query(record_type, fields, &chunk);
                let connection = Arc::clone(&self.connection);
                async move { connection.query(&soql).await }
            })
            .collect::<Vec<_>>();

        let mut index = MatchIndex::new();
        for record in try_join_all(lookups).await?.into_iter().flatten() {
            if let Some(id) = record.id().map(str::to_string) {
                index.insert(id, record);
            }
        }
        Ok(index)
    }
}
