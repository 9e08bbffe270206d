//! Grouping of statements into batches.
//!
//! Statements are grouped by a [`GroupingKey`]: the partition they target,
//! or the set of replicas owning that partition. Statements without a key
//! are never batched. A group of one statement is emitted unbatched.

use crate::session::ClusterTopology;
use crate::statement::{BatchStatement, RoutingKey, SimpleStatement, Statement};
use async_stream::stream;
use bulkload_types::{BatchConfig, BatchMode, BatchType};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::mem;
use std::sync::Arc;

/// Key shared by all children of a batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GroupingKey {
    Partition {
        keyspace: Option<Arc<str>>,
        routing_key: RoutingKey,
    },
    ReplicaSet(BTreeSet<String>),
}

/// Groups statements into [`BatchStatement`]s.
#[derive(Clone)]
pub struct StatementBatcher {
    mode: BatchMode,
    batch_type: BatchType,
    max_batch_size: usize,
    sorted: bool,
    topology: Option<Arc<dyn ClusterTopology>>,
}

impl StatementBatcher {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            mode: config.mode,
            batch_type: config.batch_type,
            max_batch_size: config.max_batch_size.max(1),
            sorted: config.sorted,
            topology: None,
        }
    }

    /// Cluster metadata used in [`BatchMode::ReplicaSet`] mode. Without it,
    /// statements are grouped by partition.
    pub fn with_topology(mut self, topology: Arc<dyn ClusterTopology>) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Key used to group `statement`, or `None` if it must not be batched.
    pub fn grouping_key(&self, statement: &SimpleStatement) -> Option<GroupingKey> {
        let routing_key = statement.routing_key()?;
        if self.mode == BatchMode::Disabled {
            return None;
        }
        if self.mode == BatchMode::ReplicaSet {
            if let Some(topology) = &self.topology {
                let replicas = topology.replicas(statement.keyspace(), routing_key);
                if !replicas.is_empty() {
                    return Some(GroupingKey::ReplicaSet(replicas));
                }
            }
        }
        Some(GroupingKey::Partition {
            keyspace: statement.keyspace().map(Arc::from),
            routing_key: routing_key.clone(),
        })
    }

    /// Turns an accumulated group into one statement.
    fn flush(&self, group: &mut Vec<SimpleStatement>) -> Statement {
        let mut group = mem::take(group);
        if group.len() == 1 {
            if let Some(statement) = group.pop() {
                return Statement::Simple(statement);
            }
        }
        Statement::Batch(BatchStatement::new(self.batch_type, group))
    }

    /// Groups a finite collection by key, regardless of order.
    ///
    /// Groups are emitted in the order their keys first appeared, each split
    /// into batches of at most `max_batch_size` statements. Ungroupable
    /// statements come first, in input order.
    pub fn batch_by_grouping_key<I>(&self, statements: I) -> Vec<Statement>
    where
        I: IntoIterator<Item = SimpleStatement>,
    {
        let mut output = Vec::new();
        let mut groups: IndexMap<GroupingKey, Vec<SimpleStatement>> = IndexMap::new();
        for statement in statements {
            match self.grouping_key(&statement) {
                Some(key) => groups.entry(key).or_default().push(statement),
                None => output.push(Statement::Simple(statement)),
            }
        }
        for (_, group) in groups {
            self.split_into(group, &mut output);
        }
        output
    }

    /// Batches statements together regardless of their keys, in input
    /// order, each batch holding at most `max_batch_size` statements.
    pub fn batch_all<I>(&self, statements: I) -> Vec<Statement>
    where
        I: IntoIterator<Item = SimpleStatement>,
    {
        let mut output = Vec::new();
        self.split_into(statements.into_iter().collect(), &mut output);
        output
    }

    fn split_into(&self, statements: Vec<SimpleStatement>, output: &mut Vec<Statement>) {
        let mut group = Vec::with_capacity(self.max_batch_size.min(statements.len()));
        for statement in statements {
            group.push(statement);
            if group.len() == self.max_batch_size {
                output.push(self.flush(&mut group));
            }
        }
        if !group.is_empty() {
            output.push(self.flush(&mut group));
        }
    }

    /// Batches a stream in sorted or unsorted mode, as configured.
    pub fn batch_stream<S>(&self, statements: S) -> BoxStream<'static, Statement>
    where
        S: Stream<Item = SimpleStatement> + Send + 'static,
    {
        if self.sorted {
            self.batch_sorted(statements)
        } else {
            self.batch_unsorted(statements)
        }
    }

    /// Batches a stream whose statements arrive grouped by key.
    ///
    /// Only adjacent statements sharing a key are batched: a key change ends
    /// the current group, as does reaching `max_batch_size`. At most one
    /// group is buffered.
    pub fn batch_sorted<S>(&self, statements: S) -> BoxStream<'static, Statement>
    where
        S: Stream<Item = SimpleStatement> + Send + 'static,
    {
        let batcher = self.clone();
        stream! {
            let mut statements = Box::pin(statements);
            let mut group: Vec<SimpleStatement> = Vec::new();
            let mut current: Option<GroupingKey> = None;
            while let Some(statement) = statements.next().await {
                let key = match batcher.grouping_key(&statement) {
                    Some(key) => key,
                    None => {
                        if !group.is_empty() {
                            yield batcher.flush(&mut group);
                        }
                        current = None;
                        yield Statement::Simple(statement);
                        continue;
                    }
                };
                if current.as_ref() != Some(&key) && !group.is_empty() {
                    yield batcher.flush(&mut group);
                }
                current = Some(key);
                group.push(statement);
                if group.len() == batcher.max_batch_size {
                    yield batcher.flush(&mut group);
                }
            }
            if !group.is_empty() {
                yield batcher.flush(&mut group);
            }
        }
        .boxed()
    }

    /// Batches a stream in arbitrary order.
    ///
    /// One group is buffered per key and emitted as soon as it reaches
    /// `max_batch_size`; incomplete groups are emitted when the input ends.
    /// Ungroupable statements pass through immediately.
    pub fn batch_unsorted<S>(&self, statements: S) -> BoxStream<'static, Statement>
    where
        S: Stream<Item = SimpleStatement> + Send + 'static,
    {
        let batcher = self.clone();
        stream! {
            let mut statements = Box::pin(statements);
            let mut groups: IndexMap<GroupingKey, Vec<SimpleStatement>> = IndexMap::new();
            while let Some(statement) = statements.next().await {
                let key = match batcher.grouping_key(&statement) {
                    Some(key) => key,
                    None => {
                        yield Statement::Simple(statement);
                        continue;
                    }
                };
                let group = groups.entry(key.clone()).or_default();
                group.push(statement);
                if group.len() == batcher.max_batch_size {
                    if let Some(mut full) = groups.shift_remove(&key) {
                        yield batcher.flush(&mut full);
                    }
                }
            }
            for (_, mut group) in groups.drain(..) {
                yield batcher.flush(&mut group);
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod test {
    use super::{GroupingKey, StatementBatcher};
    use crate::session::ClusterTopology;
    use crate::statement::{RoutingKey, SimpleStatement, Statement};
    use bulkload_types::{BatchConfig, BatchMode, BatchType};
    use futures::{stream, StreamExt};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn statement(key: &str, id: usize) -> SimpleStatement {
        SimpleStatement::new(format!("INSERT {key}{id}"))
            .with_keyspace("ks")
            .with_routing_key(RoutingKey::new(key.as_bytes().to_vec()))
    }

    fn statements(keys: &[&str]) -> Vec<SimpleStatement> {
        keys.iter()
            .enumerate()
            .map(|(i, key)| statement(key, i))
            .collect()
    }

    fn batcher(max_batch_size: usize) -> StatementBatcher {
        StatementBatcher::new(&BatchConfig {
            max_batch_size,
            ..BatchConfig::default()
        })
    }

    /// Renders batches as the queries of their children.
    fn shape(statements: &[Statement]) -> Vec<Vec<String>> {
        statements
            .iter()
            .map(|s| s.children().iter().map(|c| c.query().to_string()).collect())
            .collect()
    }

    async fn collect(stream: futures::stream::BoxStream<'static, Statement>) -> Vec<Statement> {
        stream.collect().await
    }

    #[tokio::test]
    async fn sorted() {
        let input = statements(&["A", "A", "B", "B", "C", "C"]);
        let output = collect(batcher(2).batch_sorted(stream::iter(input))).await;
        assert_eq!(
            shape(&output),
            vec![
                vec!["INSERT A0", "INSERT A1"],
                vec!["INSERT B2", "INSERT B3"],
                vec!["INSERT C4", "INSERT C5"],
            ]
        );
        assert!(output.iter().all(Statement::is_batch));
        assert!(output.iter().all(|s| match s {
            Statement::Batch(batch) => batch.batch_type() == BatchType::Unlogged,
            Statement::Simple(_) => false,
        }));
    }

    #[tokio::test]
    async fn sorted_only_batches_adjacent_statements() {
        let input = statements(&["A", "B", "A", "A", "A", "C"]);
        let output = collect(batcher(2).batch_sorted(stream::iter(input))).await;
        assert_eq!(
            shape(&output),
            vec![
                vec!["INSERT A0"],
                vec!["INSERT B1"],
                vec!["INSERT A2", "INSERT A3"],
                vec!["INSERT A4"],
                vec!["INSERT C5"],
            ]
        );
        // Groups of one are not wrapped in a batch.
        assert!(!output[0].is_batch());
        assert!(output[2].is_batch());
    }

    #[tokio::test]
    async fn unsorted() {
        let input = statements(&["A", "B", "A", "B"]);
        let output = collect(batcher(2).batch_unsorted(stream::iter(input))).await;
        assert_eq!(
            shape(&output),
            vec![vec!["INSERT A0", "INSERT A2"], vec!["INSERT B1", "INSERT B3"]]
        );
    }

    #[tokio::test]
    async fn unsorted_flushes_residual_groups() {
        let input = statements(&["A", "B", "C", "A", "A", "B"]);
        let output = collect(batcher(3).batch_unsorted(stream::iter(input))).await;
        assert_eq!(
            shape(&output),
            vec![
                vec!["INSERT A0", "INSERT A3", "INSERT A4"],
                vec!["INSERT B1", "INSERT B5"],
                vec!["INSERT C2"],
            ]
        );
    }

    #[tokio::test]
    async fn ungroupable_statements_pass_through() {
        let mut input = statements(&["A", "A"]);
        input.insert(1, SimpleStatement::new("INSERT no key"));
        let sorted = collect(batcher(2).batch_sorted(stream::iter(input.clone()))).await;
        assert_eq!(
            shape(&sorted),
            vec![vec!["INSERT A0"], vec!["INSERT no key"], vec!["INSERT A1"]]
        );

        let unsorted = collect(batcher(2).batch_unsorted(stream::iter(input))).await;
        assert_eq!(
            shape(&unsorted),
            vec![vec!["INSERT no key"], vec!["INSERT A0", "INSERT A1"]]
        );
    }

    #[test]
    fn disabled() {
        let batcher = StatementBatcher::new(&BatchConfig {
            mode: BatchMode::Disabled,
            ..BatchConfig::default()
        });
        let output = batcher.batch_by_grouping_key(statements(&["A", "A", "A"]));
        assert_eq!(output.len(), 3);
        assert!(output.iter().all(|s| !s.is_batch()));
    }

    #[test]
    fn batch_by_grouping_key() {
        let output = batcher(2).batch_by_grouping_key(statements(&["A", "B", "A", "A", "B"]));
        assert_eq!(
            shape(&output),
            vec![
                vec!["INSERT A0", "INSERT A2"],
                vec!["INSERT A3"],
                vec!["INSERT B1", "INSERT B4"],
            ]
        );
    }

    #[test]
    fn batch_all() {
        let output = batcher(2).batch_all(statements(&["A", "B", "C", "D", "E"]));
        assert_eq!(
            shape(&output),
            vec![
                vec!["INSERT A0", "INSERT B1"],
                vec!["INSERT C2", "INSERT D3"],
                vec!["INSERT E4"],
            ]
        );
    }

    /// Partitions A and B live on the same replicas, C on other ones; D's
    /// replicas are unknown.
    struct FakeTopology;

    impl ClusterTopology for FakeTopology {
        fn replicas(&self, _keyspace: Option<&str>, routing_key: &RoutingKey) -> BTreeSet<String> {
            let hosts: &[&str] = match routing_key.as_bytes() {
                b"A" | b"B" => &["10.0.0.1", "10.0.0.2"],
                b"C" => &["10.0.0.3", "10.0.0.4"],
                _ => &[],
            };
            hosts.iter().map(|h| h.to_string()).collect()
        }
    }

    #[test]
    fn replica_set() {
        let batcher = StatementBatcher::new(&BatchConfig {
            mode: BatchMode::ReplicaSet,
            max_batch_size: 10,
            ..BatchConfig::default()
        })
        .with_topology(Arc::new(FakeTopology));

        let output = batcher.batch_by_grouping_key(statements(&["A", "C", "B", "D", "D"]));
        assert_eq!(
            shape(&output),
            vec![
                vec!["INSERT A0", "INSERT B2"],
                vec!["INSERT C1"],
                vec!["INSERT D3", "INSERT D4"],
            ]
        );
        assert!(matches!(
            batcher.grouping_key(&statement("D", 0)),
            Some(GroupingKey::Partition { .. })
        ));
    }

    fn key_strategy() -> impl Strategy<Value = Vec<SimpleStatement>> {
        prop::collection::vec(prop::sample::select(vec!["A", "B", "C", "D"]), 0..64).prop_map(
            |keys| {
                keys.iter()
                    .enumerate()
                    .map(|(i, key)| statement(key, i))
                    .collect()
            },
        )
    }

    fn check_batches(input_len: usize, output: &[Statement], max: usize) {
        let mut total = 0;
        for statement in output {
            let children = statement.children();
            assert!(children.len() <= max);
            let first = children[0].routing_key();
            assert!(children.iter().all(|c| c.routing_key() == first));
            total += children.len();
        }
        assert_eq!(total, input_len);
    }

    proptest! {
        #[test]
        fn batches_share_one_key_and_respect_max_size(input in key_strategy(), max in 1usize..8) {
            let batcher = batcher(max);
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let len = input.len();

            let sorted = batcher.batch_sorted(stream::iter(input.clone()));
            let sorted = runtime.block_on(collect(sorted));
            check_batches(len, &sorted, max);

            let unsorted = batcher.batch_unsorted(stream::iter(input.clone()));
            let unsorted = runtime.block_on(collect(unsorted));
            check_batches(len, &unsorted, max);

            check_batches(len, &batcher.batch_by_grouping_key(input), max);
        }
    }
}
