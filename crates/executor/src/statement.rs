//! Units of database work.

use bulkload_types::BatchType;
use bytes::Bytes;
use serde_json::Value;
use std::fmt::{self, Display};
use std::slice;
use std::sync::Arc;
use url::Url;

/// Serialized partition key of a statement, used to route it to the
/// replicas owning the partition and to group statements into batches.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(Bytes);

impl RoutingKey {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Where the record behind a statement came from.
///
/// `resource` identifies the source (typically a file URL) and `position`
/// the record's offset within it. `location` is a finer-grained pointer used
/// in error messages, e.g. `file:///data.csv?line=12`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    pub resource: Url,
    pub position: u64,
    pub location: Url,
    /// The record exactly as it was read, before any parsing.
    pub source: Option<Arc<str>>,
}

impl Origin {
    pub fn new(resource: Url, position: u64, location: Url) -> Self {
        Self {
            resource,
            position,
            location,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A single query with its bound values.
#[derive(Clone, Debug, PartialEq)]
pub struct SimpleStatement {
    query: Arc<str>,
    values: Vec<Value>,
    keyspace: Option<Arc<str>>,
    routing_key: Option<RoutingKey>,
    origin: Option<Origin>,
}

impl SimpleStatement {
    pub fn new(query: impl Into<Arc<str>>) -> Self {
        Self {
            query: query.into(),
            values: Vec::new(),
            keyspace: None,
            routing_key: None,
            origin: None,
        }
    }

    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = values;
        self
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<Arc<str>>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn with_routing_key(mut self, routing_key: RoutingKey) -> Self {
        self.routing_key = Some(routing_key);
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    pub fn routing_key(&self) -> Option<&RoutingKey> {
        self.routing_key.as_ref()
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }
}

/// Several statements sent to the server as one request.
///
/// Batches are produced by the [`StatementBatcher`](crate::StatementBatcher),
/// which guarantees that all children share one grouping key.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchStatement {
    batch_type: BatchType,
    children: Vec<SimpleStatement>,
}

impl BatchStatement {
    pub fn new(batch_type: BatchType, children: Vec<SimpleStatement>) -> Self {
        Self {
            batch_type,
            children,
        }
    }

    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    pub fn children(&self) -> &[SimpleStatement] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// A statement submitted to the executor.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Simple(SimpleStatement),
    Batch(BatchStatement),
}

impl Statement {
    /// Statements this request is made of: the statement itself, or the
    /// children of a batch.
    pub fn children(&self) -> &[SimpleStatement] {
        match self {
            Self::Simple(statement) => slice::from_ref(statement),
            Self::Batch(batch) => batch.children(),
        }
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.children().first().and_then(|s| s.keyspace())
    }

    pub fn routing_key(&self) -> Option<&RoutingKey> {
        self.children().first().and_then(|s| s.routing_key())
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }
}

impl From<SimpleStatement> for Statement {
    fn from(statement: SimpleStatement) -> Self {
        Self::Simple(statement)
    }
}

impl From<BatchStatement> for Statement {
    fn from(batch: BatchStatement) -> Self {
        Self::Batch(batch)
    }
}

impl From<&str> for Statement {
    fn from(query: &str) -> Self {
        Self::Simple(SimpleStatement::new(query))
    }
}

/// Short form used in error messages: the query of a simple statement, or
/// the number of children of a batch.
impl Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(statement) => f.write_str(statement.query()),
            Self::Batch(batch) => write!(f, "{} batched statements", batch.len()),
        }
    }
}
