//! Rendering of statements in error logs.

use bulkload_executor::{BatchStatement, SimpleStatement, Statement};
use bulkload_types::{StatementFormatConfig, StatementVerbosity};
use std::borrow::Cow;
use std::fmt::{self, Display};

/// Appended to anything that was cut short.
const TRUNCATED: &str = "...";

/// Prints statements within the configured size limits.
#[derive(Debug, Clone, Default)]
pub struct StatementFormatter {
    config: StatementFormatConfig,
}

impl StatementFormatter {
    pub fn new(config: StatementFormatConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StatementFormatConfig {
        &self.config
    }

    pub fn format<'a>(&'a self, statement: &'a Statement) -> FormattedStatement<'a> {
        FormattedStatement {
            formatter: self,
            statement,
        }
    }

    fn fmt_simple(
        &self,
        f: &mut fmt::Formatter<'_>,
        statement: &SimpleStatement,
        indent: &str,
    ) -> fmt::Result {
        let config = &self.config;
        write!(
            f,
            "Query   : {}",
            truncate(statement.query(), config.max_query_string_length)
        )?;

        let values = statement.values();
        if config.level >= StatementVerbosity::Normal && !values.is_empty() {
            write!(f, "\n{indent}Values  : ")?;
            for (i, value) in values.iter().take(config.max_bound_values).enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                let value = value.to_string();
                write!(f, "{}", truncate(&value, config.max_bound_value_length))?;
            }
            if values.len() > config.max_bound_values {
                write!(
                    f,
                    ", {TRUNCATED} ({} more values)",
                    values.len() - config.max_bound_values
                )?;
            }
        }

        if config.level == StatementVerbosity::Extended {
            if let Some(keyspace) = statement.keyspace() {
                write!(f, "\n{indent}Keyspace: {keyspace}")?;
            }
            if let Some(routing_key) = statement.routing_key() {
                write!(f, "\n{indent}Routing : {routing_key}")?;
            }
        }
        Ok(())
    }

    fn fmt_batch(&self, f: &mut fmt::Formatter<'_>, batch: &BatchStatement) -> fmt::Result {
        let max = self.config.max_inner_statements;
        write!(
            f,
            "Batch   : {:?}, {} statements",
            batch.batch_type(),
            batch.len()
        )?;
        for (i, child) in batch.children().iter().take(max).enumerate() {
            write!(f, "\n  [{}] ", i + 1)?;
            self.fmt_simple(f, child, "      ")?;
        }
        if batch.len() > max {
            write!(f, "\n  {TRUNCATED} ({} more statements)", batch.len() - max)?;
        }
        Ok(())
    }
}

/// A statement rendered by a [`StatementFormatter`].
pub struct FormattedStatement<'a> {
    formatter: &'a StatementFormatter,
    statement: &'a Statement,
}

impl Display for FormattedStatement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.statement {
            Statement::Simple(statement) => self.formatter.fmt_simple(f, statement, ""),
            Statement::Batch(batch) => self.formatter.fmt_batch(f, batch),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => Cow::Owned(format!("{}{TRUNCATED}", &s[..end])),
        None => Cow::Borrowed(s),
    }
}

/// Escapes line breaks so that `s` fits on one line.
pub fn format_single_line(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}
