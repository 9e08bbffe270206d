use chrono::Utc;
use colored::Colorize;
use serde_json::{Map, Number, Value};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{Format, Writer};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Environment variable that switches console output to JSON.
pub const LOG_JSON_ENV: &str = "BULKLOAD_LOG_JSON";

/// Identifies the operation that emitted an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTag {
    /// `LOAD`, `UNLOAD` or `COUNT`.
    pub workflow: String,
    pub execution_id: String,
}

impl OperationTag {
    pub fn new(workflow: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            execution_id: execution_id.into(),
        }
    }
}

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines prefixed with the execution id.
    Text,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// [`LogFormat::Json`] when [`LOG_JSON_ENV`] is set to a true value.
    pub fn from_env() -> Self {
        let value = std::env::var(LOG_JSON_ENV).unwrap_or_default();
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Writes each event as a JSON object carrying the workflow and execution
/// id, the message, the remaining fields and the names of the enclosing
/// spans from the root.
pub struct JsonEventFormat {
    tag: OperationTag,
}

impl JsonEventFormat {
    pub fn new(tag: OperationTag) -> Self {
        Self { tag }
    }
}

impl<S, N> FormatEvent<S, N> for JsonEventFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let metadata = event.metadata();
        let mut object = Map::new();
        object.insert(
            "timestamp".into(),
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string().into(),
        );
        object.insert("level".into(), metadata.level().as_str().into());
        object.insert("target".into(), metadata.target().into());
        object.insert("workflow".into(), self.tag.workflow.as_str().into());
        object.insert("execution_id".into(), self.tag.execution_id.as_str().into());
        if let Some(message) = fields.message {
            object.insert("message".into(), message.into());
        }
        if !fields.values.is_empty() {
            object.insert("fields".into(), Value::Object(fields.values));
        }
        if let Some(scope) = ctx.event_scope() {
            let spans: Vec<Value> = scope.from_root().map(|span| span.name().into()).collect();
            object.insert("spans".into(), Value::Array(spans));
        }

        writeln!(writer, "{}", Value::Object(object))
    }
}

/// Event fields, with numbers and booleans kept typed.
#[derive(Default)]
struct EventFields {
    message: Option<String>,
    values: Map<String, Value>,
}

impl EventFields {
    fn insert(&mut self, field: &Field, value: Value) {
        self.values.insert(field.name().to_string(), value);
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.insert(field, Value::String(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, value.into());
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| value.to_string().into());
        self.insert(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_i128(&mut self, field: &Field, value: i128) {
        let value = i64::try_from(value)
            .map(Value::from)
            .unwrap_or_else(|_| value.to_string().into());
        self.insert(field, value);
    }

    fn record_u128(&mut self, field: &Field, value: u128) {
        let value = u64::try_from(value)
            .map(Value::from)
            .unwrap_or_else(|_| value.to_string().into());
        self.insert(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }
}

/// Default text format behind a `[<execution id>]` prefix, coloured only
/// when the writer accepts ANSI escapes.
pub struct TextEventFormat {
    prefix: String,
    inner: Format,
}

impl TextEventFormat {
    pub fn new(tag: &OperationTag) -> Self {
        Self {
            prefix: format!("[{}]", tag.execution_id),
            inner: Format::default(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for TextEventFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        if writer.has_ansi_escapes() {
            write!(writer, "{} ", self.prefix.bright_blue())?;
        } else {
            write!(writer, "{} ", self.prefix)?;
        }
        self.inner.format_event(ctx, writer, event)
    }
}
