//! Failure logs and resume positions of one operation.
//!
//! Failures fall into four categories, each with its own files in the
//! execution directory:
//!
//! | category    | failures                                         |
//! |-------------|--------------------------------------------------|
//! | `connector` | records the connector could not read             |
//! | `mapping`   | records or rows that could not be converted      |
//! | `load`      | failed writes                                    |
//! | `unload`    | failed reads                                     |
//!
//! `<category>.bad` holds the failed source records, one per line, so that
//! they can be fixed and loaded again. `<category>-errors.log` describes each
//! failure. Files are only created for categories that saw a failure.
//!
//! Load operations also track which positions of each source resource were
//! processed, successfully or not, and write them to `positions.txt` on
//! close.

pub mod positions;
pub mod statement;
mod threshold;

use crate::error::LogError;
use crate::execution::WorkflowType;
use crate::record::{ErrorRecord, UnmappableRow, UnmappableStatement};
use async_stream::stream;
use bulkload_executor::{
    BulkExecutionError, BulkResult, DriverError, Origin, ReadResult, SimpleStatement, Statement,
    WriteResult,
};
use bulkload_types::{ErrorBudget, LogConfig};
use enum_map::{Enum, EnumMap};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use positions::PositionSet;
use statement::{format_single_line, StatementFormatter};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use threshold::ErrorThreshold;
use tracing::{debug, info, warn};
use url::Url;

const POSITIONS_FILE: &str = "positions.txt";

/// Kind of failure, which determines the files it is logged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum Category {
    Connector,
    Mapping,
    Load,
    Unload,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Self::Connector => "connector",
            Self::Mapping => "mapping",
            Self::Load => "load",
            Self::Unload => "unload",
        }
    }

    pub fn bad_file_name(self) -> String {
        format!("{}.bad", self.name())
    }

    pub fn errors_file_name(self) -> String {
        format!("{}-errors.log", self.name())
    }

    /// Failed reads have no source record worth replaying.
    fn has_bad_file(self) -> bool {
        self != Self::Unload
    }
}

/// Append-only text file, opened on first use.
struct LogFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogFile {
    fn open(path: PathBuf) -> Result<Self, LogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LogError::io(&path, e))?;
        debug!("created {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Lets `write!` and `writeln!` target the file directly.
    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<(), LogError> {
        self.writer
            .write_fmt(args)
            .map_err(|e| LogError::io(&self.path, e))
    }

    fn flush(&mut self) -> Result<(), LogError> {
        self.writer
            .flush()
            .map_err(|e| LogError::io(&self.path, e))
    }
}

#[derive(Default)]
struct CategoryFiles {
    bad: Option<LogFile>,
    errors: Option<LogFile>,
}

fn open_lazily<'a>(
    slot: &'a mut Option<LogFile>,
    path: impl FnOnce() -> PathBuf,
) -> Result<&'a mut LogFile, LogError> {
    let file = match slot.take() {
        Some(file) => file,
        None => LogFile::open(path())?,
    };
    Ok(slot.insert(file))
}

#[derive(Default)]
struct State {
    files: EnumMap<Category, CategoryFiles>,
    /// Failures logged per category, including unrecoverable ones.
    logged: EnumMap<Category, u64>,
    positions: PositionSet,
}

/// What is known about one failed item.
struct Entry<'a> {
    location: Option<&'a Url>,
    source: Option<Cow<'a, str>>,
    position: Option<(&'a Url, u64)>,
}

impl<'a> Entry<'a> {
    fn of_origin(origin: &'a Origin) -> Self {
        Self {
            location: Some(&origin.location),
            source: origin.source.as_deref().map(Cow::Borrowed),
            position: Some((&origin.resource, origin.position)),
        }
    }

    fn of_statement(statement: &'a SimpleStatement) -> Self {
        match statement.origin() {
            Some(origin) => Self::of_origin(origin),
            None => Self {
                location: None,
                source: None,
                position: None,
            },
        }
    }
}

struct Inner {
    workflow: WorkflowType,
    execution_directory: PathBuf,
    formatter: StatementFormatter,
    threshold: ErrorThreshold,
    state: Mutex<State>,
}

/// Accounts for the failures of one operation.
///
/// The manager is a cheap handle: clones share the same counters and files.
/// Each `*_handler` method adapts a stream of items from one stage of the
/// operation: successful items pass through, failures are logged and
/// counted, and the stream ends with an error once the error budget is
/// exceeded or an unrecoverable failure is seen. Aborting does not depend on
/// the executor's fail-safe setting.
#[derive(Clone)]
pub struct LogManager {
    inner: Arc<Inner>,
}

impl LogManager {
    pub fn new(
        workflow: WorkflowType,
        execution_directory: impl Into<PathBuf>,
        budget: ErrorBudget,
        formatter: StatementFormatter,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                workflow,
                execution_directory: execution_directory.into(),
                formatter,
                threshold: ErrorThreshold::new(budget),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn from_config(
        workflow: WorkflowType,
        execution_directory: impl Into<PathBuf>,
        config: &LogConfig,
    ) -> Self {
        Self::new(
            workflow,
            execution_directory,
            config.error_budget(),
            StatementFormatter::new(config.stmt.clone()),
        )
    }

    pub fn workflow(&self) -> WorkflowType {
        self.inner.workflow
    }

    pub fn execution_directory(&self) -> &Path {
        &self.inner.execution_directory
    }

    pub fn error_budget(&self) -> ErrorBudget {
        self.inner.threshold.budget()
    }

    /// Failures counted against the error budget so far.
    pub fn error_count(&self) -> u64 {
        self.inner.threshold.errors()
    }

    /// Items seen by [`Self::total_items_counter`] so far.
    pub fn total_items(&self) -> u64 {
        self.inner.threshold.total_items()
    }

    /// Failures logged in `category`, unrecoverable ones included.
    pub fn logged_errors(&self, category: Category) -> u64 {
        self.lock().logged[category]
    }

    /// Snapshot of the positions recorded so far.
    pub fn positions(&self) -> PositionSet {
        self.lock().positions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts every item of `items` toward the total used by percentage
    /// budgets. Place it where one item is one source record.
    pub fn total_items_counter<S, T>(&self, items: S) -> BoxStream<'static, T>
    where
        S: Stream<Item = T> + Send + 'static,
        T: Send + 'static,
    {
        let log = self.clone();
        items
            .inspect(move |_| log.inner.threshold.record_item())
            .boxed()
    }

    /// Records the source positions of every result's statement.
    pub fn result_position_tracker<S, R>(&self, results: S) -> BoxStream<'static, R>
    where
        S: Stream<Item = R> + Send + 'static,
        R: BulkResult + Send + 'static,
    {
        let log = self.clone();
        results
            .inspect(move |result| log.track_positions(result.statement()))
            .boxed()
    }

    fn track_positions(&self, statement: &Statement) {
        if self.inner.workflow != WorkflowType::Load {
            return;
        }
        let mut state = self.lock();
        for child in statement.children() {
            if let Some(origin) = child.origin() {
                state.positions.add(&origin.resource, origin.position);
            }
        }
    }

    /// Handles records the connector failed to read.
    pub fn failed_records_handler<S, T>(
        &self,
        records: S,
    ) -> BoxStream<'static, Result<T, LogError>>
    where
        S: Stream<Item = Result<T, ErrorRecord>> + Send + 'static,
        T: Send + 'static,
    {
        let log = self.clone();
        stream! {
            let mut records = Box::pin(records);
            while let Some(record) = records.next().await {
                match record {
                    Ok(record) => yield Ok(record),
                    Err(failed) => {
                        if let Err(error) = log.failed_record(&failed) {
                            yield Err(error);
                            break;
                        }
                    }
                }
            }
        }
        .boxed()
    }

    /// Handles records that could not be mapped to a statement.
    pub fn unmappable_statements_handler<S, T>(
        &self,
        statements: S,
    ) -> BoxStream<'static, Result<T, LogError>>
    where
        S: Stream<Item = Result<T, UnmappableStatement>> + Send + 'static,
        T: Send + 'static,
    {
        let log = self.clone();
        stream! {
            let mut statements = Box::pin(statements);
            while let Some(statement) = statements.next().await {
                match statement {
                    Ok(statement) => yield Ok(statement),
                    Err(failed) => {
                        if let Err(error) = log.unmappable_statement(&failed) {
                            yield Err(error);
                            break;
                        }
                    }
                }
            }
        }
        .boxed()
    }

    /// Handles rows that could not be mapped to a record.
    pub fn unmappable_rows_handler<S, T>(&self, rows: S) -> BoxStream<'static, Result<T, LogError>>
    where
        S: Stream<Item = Result<T, UnmappableRow>> + Send + 'static,
        T: Send + 'static,
    {
        let log = self.clone();
        stream! {
            let mut rows = Box::pin(rows);
            while let Some(row) = rows.next().await {
                match row {
                    Ok(row) => yield Ok(row),
                    Err(failed) => {
                        if let Err(error) = log.unmappable_row(&failed) {
                            yield Err(error);
                            break;
                        }
                    }
                }
            }
        }
        .boxed()
    }

    /// Handles failed writes; successful results pass through.
    pub fn failed_writes_handler<S>(
        &self,
        results: S,
    ) -> BoxStream<'static, Result<WriteResult, LogError>>
    where
        S: Stream<Item = WriteResult> + Send + 'static,
    {
        let log = self.clone();
        stream! {
            let mut results = Box::pin(results);
            while let Some(result) = results.next().await {
                match result {
                    WriteResult::Failure(failed) => {
                        if let Err(error) = log.failed_execution(Category::Load, &failed) {
                            yield Err(error);
                            break;
                        }
                    }
                    success => yield Ok(success),
                }
            }
        }
        .boxed()
    }

    /// Handles failed reads; successful results pass through.
    pub fn failed_reads_handler<S>(
        &self,
        results: S,
    ) -> BoxStream<'static, Result<ReadResult, LogError>>
    where
        S: Stream<Item = ReadResult> + Send + 'static,
    {
        let log = self.clone();
        stream! {
            let mut results = Box::pin(results);
            while let Some(result) = results.next().await {
                match result {
                    ReadResult::Failure(failed) => {
                        if let Err(error) = log.failed_execution(Category::Unload, &failed) {
                            yield Err(error);
                            break;
                        }
                    }
                    success => yield Ok(success),
                }
            }
        }
        .boxed()
    }

    fn failed_record(&self, failed: &ErrorRecord) -> Result<(), LogError> {
        let entry = Entry::of_origin(&failed.origin);
        self.log_failure(Category::Connector, &[entry], None, &*failed.error)?;
        self.inner.threshold.record_errors(1)?;
        Ok(())
    }

    fn unmappable_statement(&self, failed: &UnmappableStatement) -> Result<(), LogError> {
        let entry = Entry::of_origin(&failed.origin);
        self.log_failure(Category::Mapping, &[entry], None, &*failed.error)?;
        self.inner.threshold.record_errors(1)?;
        Ok(())
    }

    fn unmappable_row(&self, failed: &UnmappableRow) -> Result<(), LogError> {
        let location = failed
            .statement
            .children()
            .first()
            .and_then(SimpleStatement::origin)
            .map(|origin| &origin.location);
        let entry = Entry {
            location,
            source: Some(Cow::Owned(failed.source())),
            position: None,
        };
        self.log_failure(
            Category::Mapping,
            &[entry],
            Some(failed.statement.as_ref()),
            &*failed.error,
        )?;
        self.inner.threshold.record_errors(1)?;
        Ok(())
    }

    /// Logs a failed request. Every child of a failed batch counts as one
    /// failure. Unrecoverable failures are logged but not counted, and stop
    /// the job.
    fn failed_execution(
        &self,
        category: Category,
        failed: &BulkExecutionError,
    ) -> Result<(), LogError> {
        let statement: &Statement = failed.statement();
        let entries: Vec<Entry<'_>> = statement
            .children()
            .iter()
            .map(Entry::of_statement)
            .collect();
        self.log_failure(category, &entries, Some(statement), failed)?;
        if failed.is_unrecoverable() {
            warn!("unrecoverable error: {failed}");
            return Err(LogError::Fatal(failed.clone()));
        }
        self.inner.threshold.record_errors(entries.len() as u64)?;
        Ok(())
    }

    fn log_failure(
        &self,
        category: Category,
        entries: &[Entry<'_>],
        statement: Option<&Statement>,
        error: &(dyn Error + 'static),
    ) -> Result<(), LogError> {
        let directory = &self.inner.execution_directory;
        let mut guard = self.lock();
        let state = &mut *guard;
        let files = &mut state.files[category];

        for entry in entries {
            if let Some(source) = entry.source.as_deref().filter(|_| category.has_bad_file()) {
                let bad = open_lazily(&mut files.bad, || directory.join(category.bad_file_name()))?;
                writeln!(bad, "{}", source.trim())?;
            }
            if self.inner.workflow == WorkflowType::Load {
                if let Some((resource, position)) = entry.position {
                    state.positions.add(resource, position);
                }
            }
        }

        let log = open_lazily(&mut files.errors, || {
            directory.join(category.errors_file_name())
        })?;
        for entry in entries {
            if let Some(location) = entry.location {
                writeln!(log, "Location: {location}")?;
            }
            if let Some(source) = &entry.source {
                writeln!(log, "Source  : {}", format_single_line(source))?;
            }
        }
        if let Some(statement) = statement {
            writeln!(log, "{}", self.inner.formatter.format(statement))?;
        }
        writeln!(log, "{error}")?;
        let mut cause = error.source();
        while let Some(error) = cause {
            match error.downcast_ref::<DriverError>() {
                Some(driver) => writeln!(log, "  Caused by: {}: {error}", driver.kind())?,
                None => writeln!(log, "  Caused by: {error}")?,
            }
            cause = error.source();
        }
        writeln!(log)?;

        state.logged[category] += entries.len() as u64;
        Ok(())
    }

    /// Flushes all files, writes `positions.txt` for load operations, and
    /// logs a summary.
    pub fn close(&self) -> Result<(), LogError> {
        let directory = &self.inner.execution_directory;
        let mut state = self.lock();

        for (_, files) in state.files.iter_mut() {
            for file in [&mut files.bad, &mut files.errors].into_iter().flatten() {
                file.flush()?;
            }
        }
        state.files = EnumMap::default();

        if self.inner.workflow == WorkflowType::Load && !state.positions.is_empty() {
            let path = directory.join(POSITIONS_FILE);
            File::create(&path)
                .and_then(|file| {
                    let mut writer = BufWriter::new(file);
                    state.positions.write_to(&mut writer)?;
                    writer.flush()
                })
                .map_err(|e| LogError::io(&path, e))?;
        }

        let total: u64 = state.logged.values().sum();
        if total == 0 {
            info!("{} operation completed without errors", self.inner.workflow);
        } else {
            for (category, count) in state.logged.iter().filter(|(_, count)| **count > 0) {
                warn!(
                    "{count} {} errors, see {}",
                    category.name(),
                    directory.join(category.errors_file_name()).display()
                );
            }
        }
        info!("operation directory: {}", directory.display());
        Ok(())
    }
}
