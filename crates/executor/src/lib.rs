//! Bulk execution of database statements.
//!
//! The [`BulkExecutor`] takes single statements, finite collections, or
//! unbounded streams of [`Statement`]s and executes them against a
//! [`Session`] under admission control: a bounded number of in-flight
//! requests plus a token-bucket rate limit, see [`AdmissionGate`]. Every
//! execution produces [`WriteResult`]s or, for reads, one [`ReadResult`] per
//! returned row.
//!
//! Related statements can be combined into batches with the
//! [`StatementBatcher`] before they reach the executor.

mod admission;
mod batcher;
mod error;
mod executor;
mod listener;
mod result;
mod session;
mod statement;
mod subscription;


pub use admission::{AdmissionGate, AdmissionPermit};
pub use batcher::{GroupingKey, StatementBatcher};
pub use error::{BulkExecutionError, DriverError, ExecutorError};
pub use executor::{BulkExecutor, BulkExecutorBuilder};
pub use listener::{
    CompositeListener, ExecutionContext, ExecutionListener, ExecutionMetrics,
    MetricsCollectingListener,
};
pub use result::{BulkResult, ExecutionInfo, ReadResult, Row, WriteResult};
pub use session::{ClusterTopology, ContinuousPagingSession, Page, PagingState, Session};
pub use statement::{BatchStatement, Origin, RoutingKey, SimpleStatement, Statement};

pub use bulkload_types::{BatchConfig, BatchMode, BatchType, ContinuousPagingConfig, ExecutorConfig};
