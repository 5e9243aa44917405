use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use hvremote_exec::config::ConnectionConfig;
use hvremote_exec::context::ExecContext;
use hvremote_exec::dialect::Dialect;
use hvremote_exec::ephemeral::EphemeralTransport;
use hvremote_exec::error::ExecError;
use hvremote_exec::result::CommandResult;
use hvremote_exec::traits::{Connection, Connector, Transport};

#[derive(Default)]
struct Counters {
    dials: AtomicUsize,
    closes: AtomicUsize,
}

impl Counters {
    fn dials(&self) -> usize {
        self.dials.load(Ordering::Acquire)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::Acquire)
    }
}

// Mock implementations
struct CountingConnector {
    counters: Arc<Counters>,
}

struct CountingConnection {
    counters: Arc<Counters>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for CountingConnection {
    async fn exec(&self, command: &str) -> Result<CommandResult, ExecError> {
        if command.contains("sleep") {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        if command.contains("broken") {
            return Err(ExecError::Channel("stream reset".to_string()));
        }

        let status = i32::from(command.contains("fail"));
        Ok(CommandResult {
            status,
            stdout: "true".to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
        })
    }

    async fn put_file(&self, _: &str, _: Option<&str>, _: &[u8]) -> Result<(), ExecError> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), ExecError> {
        self.closed.store(true, Ordering::Release);
        self.counters.closes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[async_trait]
impl Connector for CountingConnector {
    type Connection = CountingConnection;

    async fn connect(&self, _: &ConnectionConfig) -> Result<CountingConnection, ExecError> {
        self.counters.dials.fetch_add(1, Ordering::AcqRel);
        Ok(CountingConnection {
            counters: Arc::clone(&self.counters),
            closed: AtomicBool::new(false),
        })
    }

    fn kind(&self) -> &'static str {
        "counting"
    }
}

fn transport() -> (EphemeralTransport<CountingConnector>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let config = ConnectionConfig::new("hv01", "admin")
        .with_password("pw")
        .with_dialect(Dialect::Posix);
    let transport = EphemeralTransport::with_connector(
        CountingConnector {
            counters: Arc::clone(&counters),
        },
        Arc::new(config),
    );
    (transport, counters)
}

#[tokio::test]
async fn test_successful_operations_close_their_connection() {
    let (transport, counters) = transport();
    let ctx = ExecContext::new();

    assert_eq!(transport.run_fire_and_forget(&ctx, "ok").await.unwrap().status, 0);
    assert!(transport.file_exists(&ctx, "/tmp/x").await.unwrap());
    transport.delete_file_or_directory(&ctx, "/tmp/x").await.unwrap();

    assert_eq!(counters.dials(), 3);
    assert_eq!(counters.closes(), 3);
}

#[tokio::test]
async fn test_non_zero_exit_closes_connection() {
    let (transport, counters) = transport();

    let result = transport
        .run_with_result(&ExecContext::new(), "fail")
        .await
        .unwrap();

    assert_eq!(result.status, 1);
    assert_eq!(counters.closes(), counters.dials());
}

#[tokio::test]
async fn test_stream_error_closes_connection() {
    let (transport, counters) = transport();

    let err = transport
        .run_with_result(&ExecContext::new(), "broken")
        .await
        .unwrap_err();

    assert!(matches!(err, ExecError::Channel(_)));
    assert_eq!(counters.dials(), 1);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn test_timed_out_operation_closes_connection() {
    let (transport, counters) = transport();
    let ctx = ExecContext::with_timeout(Duration::from_millis(50));

    let err = transport.run_with_result(&ctx, "sleep").await.unwrap_err();

    assert!(matches!(err, ExecError::Timeout { .. }));
    assert_eq!(counters.dials(), 1);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn test_cancelled_operation_closes_connection() {
    let (transport, counters) = transport();
    let ctx = ExecContext::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let err = transport.run_fire_and_forget(&ctx, "sleep").await.unwrap_err();

    assert!(matches!(err, ExecError::Cancelled));
    assert_eq!(counters.dials(), 1);
    assert_eq!(counters.closes(), 1);
}
