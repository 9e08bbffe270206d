//! Installs the process logger, so it runs in its own test binary.

use bulkload_engine::{Category, ErrorRecord, ExitStatus, LogError, Operation, WorkflowType};
use bulkload_executor::Origin;
use bulkload_observability::{LogFormat, OPERATION_LOG_FILE};
use bulkload_types::LogConfig;
use futures::{stream, StreamExt};
use std::fs;
use tempfile::TempDir;
use url::Url;

fn origin(n: u64) -> Origin {
    Origin::new(
        Url::parse("file:///file.csv").unwrap(),
        n,
        Url::parse(&format!("file:///file.csv?line={n}")).unwrap(),
    )
    .with_source(format!("line{n}"))
}

#[tokio::test]
async fn operation_lifecycle() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig {
        directory: dir.path().to_path_buf(),
        ..LogConfig::default()
    };

    let operation = Operation::start(WorkflowType::Load, &config, LogFormat::Text).unwrap();
    let execution_id = operation.execution_id().to_string();
    assert!(execution_id.starts_with("LOAD_"), "{execution_id}");
    assert_eq!(operation.workflow(), WorkflowType::Load);
    assert_eq!(operation.execution_directory(), dir.path().join(&execution_id));

    let records = vec![
        Ok(1u64),
        Err(ErrorRecord::new(origin(2), anyhow::anyhow!("unterminated quote"))),
        Ok(3),
    ];
    let results: Vec<_> = operation
        .log_manager()
        .failed_records_handler(stream::iter(records))
        .collect()
        .await;
    assert_eq!(results.len(), 2);
    assert_eq!(operation.log_manager().logged_errors(Category::Connector), 1);

    let directory = operation.execution_directory().to_path_buf();
    assert_eq!(operation.finish(Ok(())), ExitStatus::CompletedWithErrors);

    assert_eq!(
        fs::read_to_string(directory.join("connector.bad")).unwrap(),
        "line2\n"
    );
    let log = fs::read_to_string(directory.join(OPERATION_LOG_FILE)).unwrap();
    let prefix = format!("[{execution_id}] ");
    assert!(log.lines().all(|line| line.starts_with(&prefix)), "{log}");
    assert!(log.contains(&format!("LOAD operation {execution_id} started")));
    assert!(log.contains("1 connector errors"));
    assert!(log.contains("finished: STATUS_COMPLETED_WITH_ERRORS"));

    // Process logging is installed once per process.
    let error = Operation::start(WorkflowType::Unload, &config, LogFormat::Json)
        .err()
        .unwrap();
    assert!(matches!(error, LogError::Logging(_)), "{error}");
}
