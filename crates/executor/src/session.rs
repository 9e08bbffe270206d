//! Seams to the database driver.

use crate::error::DriverError;
use crate::result::{ExecutionInfo, Row};
use crate::statement::{RoutingKey, Statement};
use async_trait::async_trait;
use bulkload_types::ContinuousPagingConfig;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::BTreeSet;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// Opaque driver token identifying the next page of a read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagingState(pub Bytes);

/// One page of a response.
///
/// Writes return a page without rows.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub rows: Vec<Row>,
    pub info: ExecutionInfo,
    /// Present when more pages are available.
    pub paging_state: Option<PagingState>,
}

/// Connection to the database cluster.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Executes a statement and returns its first page, or the page
    /// identified by `paging_state` when continuing a read.
    async fn execute(
        &self,
        statement: Arc<Statement>,
        paging_state: Option<PagingState>,
    ) -> Result<Page, DriverError>;
}

/// Session able to stream all pages of a read without waiting for the client
/// to request each page.
#[cfg_attr(test, automock)]
pub trait ContinuousPagingSession: Send + Sync + 'static {
    /// Starts a continuous read. The returned stream yields pages in server
    /// order; a request failure is reported as the stream's only item.
    fn execute_continuously(
        &self,
        statement: Arc<Statement>,
        options: ContinuousPagingConfig,
    ) -> BoxStream<'static, Result<Page, DriverError>>;
}

/// Cluster metadata used to group statements by the replicas owning their
/// partitions.
pub trait ClusterTopology: Send + Sync {
    /// Addresses of the replicas owning the partition, or an empty set when
    /// they are unknown.
    fn replicas(&self, keyspace: Option<&str>, routing_key: &RoutingKey) -> BTreeSet<String>;
}
