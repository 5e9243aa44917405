use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use hvremote_exec::config::{ConnectionConfig, PoolSettings};
use hvremote_exec::context::ExecContext;
use hvremote_exec::dialect::Dialect;
use hvremote_exec::error::ExecError;
use hvremote_exec::pool::Pool;
use hvremote_exec::pooled::PooledTransport;
use hvremote_exec::result::CommandResult;
use hvremote_exec::traits::{Connection, Connector, Transport};

// Mock implementations
#[derive(Default)]
struct ScriptedConnector {
    dials: AtomicUsize,
}

struct ScriptedConnection {
    closed: AtomicBool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn exec(&self, command: &str) -> Result<CommandResult, ExecError> {
        if command.contains("panic") {
            panic!("connection blew up");
        }
        if command.contains("sleep") {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        if command.contains("drop") {
            self.closed.store(true, Ordering::Release);
            return Err(ExecError::Channel("connection reset".to_string()));
        }
        if command.contains("broken") {
            return Err(ExecError::Channel("channel open failed".to_string()));
        }

        let status = i32::from(command.contains("fail"));
        Ok(CommandResult {
            status,
            stdout: "true".to_string(),
            stderr: if status == 0 { String::new() } else { "failed".to_string() },
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
        Ok(())
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    async fn connect(&self, _: &ConnectionConfig) -> Result<ScriptedConnection, ExecError> {
        self.dials.fetch_add(1, Ordering::AcqRel);
        Ok(ScriptedConnection {
            closed: AtomicBool::new(false),
        })
    }

    fn kind(&self) -> &'static str {
        "scripted"
    }
}

fn transport(capacity: usize) -> Arc<PooledTransport<ScriptedConnector>> {
    let config = ConnectionConfig::new("hv01", "admin")
        .with_password("pw")
        .with_dialect(Dialect::Posix)
        .with_pool(PoolSettings {
            max_size: capacity,
            min_idle: 0,
            borrow_timeout_secs: 30,
        });
    Arc::new(PooledTransport::from_pool(Pool::new(
        ScriptedConnector::default(),
        Arc::new(config),
    )))
}

#[tokio::test]
async fn test_sequential_operations_return_every_borrow() {
    let transport = transport(1);
    let ctx = ExecContext::new();

    assert_eq!(transport.run_fire_and_forget(&ctx, "ok").await.unwrap().status, 0);
    assert_eq!(transport.run_fire_and_forget(&ctx, "fail").await.unwrap().status, 1);
    assert!(transport.run_with_result(&ctx, "broken").await.is_err());
    assert!(transport.file_exists(&ctx, "/tmp/x").await.unwrap());
    assert!(transport.delete_file_or_directory(&ctx, "/tmp/x").await.is_ok());

    let stats = transport.stats();
    assert_eq!(stats.borrowed, 5);
    assert_eq!(stats.returned, 5);
    assert_eq!(stats.created, 1);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test]
async fn test_concurrent_operations_share_single_connection() {
    let transport = transport(1);

    let mut handles = Vec::new();
    for i in 0..16 {
        let transport = Arc::clone(&transport);
        handles.push(tokio::spawn(async move {
            let script = match i % 3 {
                0 => "ok",
                1 => "fail",
                _ => "broken",
            };
            transport
                .run_with_result(&ExecContext::new(), script)
                .await
                .map(|r| r.status)
        }));
    }

    let mut failures = 0;
    for handle in handles {
        if !matches!(handle.await.unwrap(), Ok(0)) {
            failures += 1;
        }
    }

    assert_eq!(failures, 10);
    let stats = transport.stats();
    assert_eq!(stats.borrowed, 16);
    assert_eq!(stats.returned, 16);
    assert_eq!(stats.created, 1);
}

#[tokio::test]
async fn test_timed_out_operation_releases_borrow() {
    let transport = transport(1);
    let ctx = ExecContext::with_timeout(Duration::from_millis(50));

    let err = transport.run_with_result(&ctx, "sleep").await.unwrap_err();
    assert!(matches!(err, ExecError::Timeout { .. }));
    assert_eq!(transport.stats().outstanding(), 0);

    // the single slot is free again
    let report = transport
        .run_fire_and_forget(&ExecContext::new(), "ok")
        .await
        .unwrap();
    assert_eq!(report.status, 0);
}

#[tokio::test]
async fn test_cancelled_operation_releases_borrow() {
    let transport = transport(1);
    let ctx = ExecContext::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let err = transport.run_with_result(&ctx, "sleep").await.unwrap_err();
    assert!(matches!(err, ExecError::Cancelled));

    let stats = transport.stats();
    assert_eq!(stats.borrowed, stats.returned);
    assert_eq!(stats.in_use, 0);
}

#[tokio::test]
async fn test_panicking_operation_releases_borrow() {
    let transport = transport(1);

    let task = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            transport
                .run_fire_and_forget(&ExecContext::new(), "panic")
                .await
        })
    };
    assert!(task.await.is_err());

    assert_eq!(transport.stats().outstanding(), 0);
    assert!(
        transport
            .run_fire_and_forget(&ExecContext::new(), "ok")
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_dead_connection_is_replaced() {
    let transport = transport(1);
    let ctx = ExecContext::new();

    assert!(transport.run_with_result(&ctx, "drop").await.is_err());
    assert!(transport.run_with_result(&ctx, "ok").await.is_ok());

    let stats = transport.stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.outstanding(), 0);
}

#[tokio::test]
async fn test_exhausted_pool_reports_pool_exhausted() {
    let config = ConnectionConfig::new("hv01", "admin")
        .with_password("pw")
        .with_dialect(Dialect::Posix)
        .with_pool(PoolSettings {
            max_size: 1,
            min_idle: 0,
            borrow_timeout_secs: 30,
        });
    let pool = Pool::new(ScriptedConnector::default(), Arc::new(config))
        .with_borrow_timeout(Duration::from_millis(20));
    let transport = PooledTransport::from_pool(pool);

    let held = transport.pool().get().await.unwrap();
    let err = transport
        .run_fire_and_forget(&ExecContext::new(), "ok")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::PoolExhausted { .. }));

    drop(held);
    assert_eq!(transport.stats().outstanding(), 0);
}

#[tokio::test]
async fn test_closed_transport_rejects_operations() {
    let transport = transport(2);
    transport.warm_up().await.unwrap();
    transport.close().await;

    let err = transport
        .file_exists(&ExecContext::new(), "/tmp")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::PoolClosed));
}
