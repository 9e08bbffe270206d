//! Failures reported by the layers around the executor.

use bulkload_executor::{Origin, Row, Statement};
use std::fmt::{self, Display};
use std::sync::Arc;

/// A source record the connector could not read.
#[derive(Debug)]
pub struct ErrorRecord {
    pub origin: Origin,
    pub error: anyhow::Error,
}

impl ErrorRecord {
    pub fn new(origin: Origin, error: anyhow::Error) -> Self {
        Self { origin, error }
    }
}

/// A source record that could not be mapped to a statement.
#[derive(Debug)]
pub struct UnmappableStatement {
    pub origin: Origin,
    pub error: anyhow::Error,
}

impl UnmappableStatement {
    pub fn new(origin: Origin, error: anyhow::Error) -> Self {
        Self { origin, error }
    }
}

/// A row returned by a read that could not be mapped to a record.
#[derive(Debug)]
pub struct UnmappableRow {
    pub statement: Arc<Statement>,
    pub row: Row,
    pub error: anyhow::Error,
}

impl UnmappableRow {
    pub fn new(statement: Arc<Statement>, row: Row, error: anyhow::Error) -> Self {
        Self {
            statement,
            row,
            error,
        }
    }

    /// The row as `column=value` pairs.
    pub fn source(&self) -> String {
        RowDisplay(&self.row).to_string()
    }
}

struct RowDisplay<'a>(&'a Row);

impl Display for RowDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let row = self.0;
        for (i, (column, value)) in row.columns().iter().zip(row.values()).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{column}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::UnmappableRow;
    use bulkload_executor::{Row, Statement};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn row_source() {
        let row = Row::new(
            Arc::from(vec!["id".to_string(), "name".to_string()]),
            vec![json!(1), json!("foo")],
        );
        let unmappable = UnmappableRow::new(
            Arc::new(Statement::from("SELECT 1")),
            row,
            anyhow::anyhow!("cannot convert"),
        );
        assert_eq!(unmappable.source(), r#"id=1, name="foo""#);
    }
}
