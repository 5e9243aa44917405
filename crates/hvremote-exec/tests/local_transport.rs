#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use hvremote_exec::{
    ConnectionConfig, Dialect, EphemeralTransport, ExecContext, ExecError, LocalConnector,
    PooledTransport, ScriptRunner, Template, Transport,
};

const ECHO: Template<'static> = Template::new(
    "Echo",
    r#"echo '{"message":"{{Message}}","value":{{Value}}}'"#,
);

const FAIL: Template<'static> = Template::new(
    "Fail",
    "echo '{{Reason}}' >&2; exit {{Code}}",
);

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EchoArgs {
    message: String,
    value: i64,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Echo {
    message: String,
    value: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct FailArgs {
    reason: &'static str,
    code: i32,
}

fn config() -> ConnectionConfig {
    ConnectionConfig::new("localhost", "tester")
        .with_password("unused")
        .with_dialect(Dialect::Posix)
}

fn ephemeral(config: ConnectionConfig) -> EphemeralTransport<LocalConnector> {
    EphemeralTransport::with_connector(LocalConnector::new(), Arc::new(config))
}

fn sha256(path: &Path) -> Vec<u8> {
    Sha256::digest(std::fs::read(path).unwrap()).to_vec()
}

#[tokio::test]
async fn test_result_returning_round_trip() {
    let transport = ephemeral(config());
    let args = EchoArgs {
        message: "hi".to_string(),
        value: 3,
    };

    let echo: Echo = transport
        .run_script_with_result(&ExecContext::new(), &ECHO, &args)
        .await
        .unwrap();

    assert_eq!(
        echo,
        Echo {
            message: "hi".to_string(),
            value: 3
        }
    );
}

#[tokio::test]
async fn test_fire_and_forget_failure_surfaces_stderr_and_exit_code() {
    let transport = ephemeral(config());
    let args = FailArgs {
        reason: "disk full",
        code: 7,
    };

    let err = transport
        .run_script(&ExecContext::new(), &FAIL, &args)
        .await
        .unwrap_err();

    match err {
        ExecError::ScriptFailed {
            exit_code, stderr, ..
        } => {
            assert_eq!(exit_code, 7);
            assert_eq!(stderr.trim(), "disk full");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_json_surfaces_literal_stdout() {
    let transport = ephemeral(config());
    let garbage = Template::new("Garbage", "echo 'not {{Kind}}'");

    #[derive(Serialize)]
    struct Args {
        #[serde(rename = "Kind")]
        kind: &'static str,
    }

    let result: Result<Echo, _> = transport
        .run_script_with_result(&ExecContext::new(), &garbage, &Args { kind: "json" })
        .await;

    match result.unwrap_err() {
        ExecError::ResultDecode {
            stdout, command, ..
        } => {
            assert_eq!(stdout, "not json");
            assert_eq!(command, "echo 'not json'");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_vars_prelude_reaches_script() {
    let transport = ephemeral(config().with_vars("export HV_GREETING=hello"));
    let template = Template::new("Greeting", "printf '\"%s\"' \"$HV_GREETING\"");

    let greeting: String = transport
        .run_script_with_result(&ExecContext::new(), &template, &())
        .await
        .unwrap();

    assert_eq!(greeting, "hello");
}

#[tokio::test]
async fn test_file_exists_false_for_missing_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.iso");
    let present = dir.path().join("present.iso");
    std::fs::write(&present, b"iso").unwrap();

    for transport in [
        Box::new(ephemeral(config())) as Box<dyn Transport>,
        Box::new(PooledTransport::with_connector(
            LocalConnector::new(),
            Arc::new(config()),
        )),
    ] {
        let ctx = ExecContext::new();
        assert!(
            !transport
                .file_exists(&ctx, missing.to_str().unwrap())
                .await
                .unwrap()
        );
        assert!(
            transport
                .file_exists(&ctx, present.to_str().unwrap())
                .await
                .unwrap()
        );
        assert!(
            transport
                .directory_exists(&ctx, dir.path().to_str().unwrap())
                .await
                .unwrap()
        );
    }
}

#[tokio::test]
async fn test_file_exists_on_unreachable_host_is_error() {
    let config = ConnectionConfig::new("127.0.0.1", "nobody")
        .with_port(1)
        .with_password("pw")
        .with_dialect(Dialect::Posix);
    let transport = EphemeralTransport::new(Arc::new(config));

    let result = transport.file_exists(&ExecContext::new(), "/etc/hosts").await;

    let err = result.unwrap_err();
    assert!(err.is_transport(), "expected transport error, got {err:?}");
}

#[tokio::test]
async fn test_primary_and_fallback_uploads_are_identical() {
    let src = tempfile::tempdir().unwrap();
    let local = src.path().join("payload.bin");
    // spans several base64 chunks and every byte value
    let data: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 256) as u8).collect();
    std::fs::write(&local, &data).unwrap();

    let dst = tempfile::tempdir().unwrap();
    let primary_target = dst.path().join("primary/payload.bin");
    let fallback_target = dst.path().join("fallback/payload.bin");

    let primary = ephemeral(config());
    let fallback = EphemeralTransport::with_connector(
        LocalConnector::without_structured_transfer(),
        Arc::new(config()),
    );
    let ctx = ExecContext::new();

    let primary_path = primary
        .upload_file(&ctx, &local, primary_target.to_str().unwrap())
        .await
        .unwrap();
    let fallback_path = fallback
        .upload_file(&ctx, &local, fallback_target.to_str().unwrap())
        .await
        .unwrap();

    assert_eq!(primary_path, primary_target.to_str().unwrap());
    assert_eq!(fallback_path, fallback_target.to_str().unwrap());
    assert_eq!(sha256(&primary_target), sha256(&local));
    assert_eq!(sha256(&fallback_target), sha256(&local));
}

#[tokio::test]
async fn test_upload_to_directory_path_appends_file_name() {
    let src = tempfile::tempdir().unwrap();
    let local = src.path().join("boot.img");
    std::fs::write(&local, b"").unwrap();

    let dst = tempfile::tempdir().unwrap();
    let target_dir = format!("{}/", dst.path().display());
    let transport = EphemeralTransport::with_connector(
        LocalConnector::without_structured_transfer(),
        Arc::new(config()),
    );

    let remote = transport
        .upload_file(&ExecContext::new(), &local, &target_dir)
        .await
        .unwrap();

    assert_eq!(remote, format!("{target_dir}boot.img"));
    assert_eq!(std::fs::read(&remote).unwrap(), b"");
}

#[tokio::test]
async fn test_directory_upload_honours_exclusions() {
    let src = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("a.txt"), b"alpha").unwrap();
    std::fs::write(src.path().join("b.tmp"), b"scratch").unwrap();
    std::fs::create_dir(src.path().join("sub")).unwrap();
    std::fs::write(src.path().join("sub/c.txt"), b"charlie").unwrap();

    let remote_tmp = tempfile::tempdir().unwrap();
    let config = config().with_remote_temp_dir(remote_tmp.path().to_str().unwrap());

    for transport in [
        Box::new(ephemeral(config.clone())) as Box<dyn Transport>,
        Box::new(PooledTransport::with_connector(
            LocalConnector::without_structured_transfer(),
            Arc::new(config.clone()),
        )),
    ] {
        let (root, files) = transport
            .upload_directory(&ExecContext::new(), src.path(), &["*.tmp".to_string()])
            .await
            .unwrap();

        assert!(root.starts_with(remote_tmp.path().to_str().unwrap()));
        assert!(root.contains("hyperv-upload-"));
        assert_eq!(files, vec![format!("{root}/a.txt"), format!("{root}/sub/c.txt")]);
        assert_eq!(std::fs::read(format!("{root}/sub/c.txt")).unwrap(), b"charlie");
        assert!(!Path::new(&format!("{root}/b.tmp")).exists());

        transport
            .delete_file_or_directory(&ExecContext::new(), &root)
            .await
            .unwrap();
        assert!(!Path::new(&root).exists());
    }
}

#[tokio::test]
async fn test_concurrent_directory_uploads_get_distinct_roots() {
    let first = tempfile::tempdir().unwrap();
    std::fs::write(first.path().join("a.txt"), b"alpha").unwrap();
    let second = tempfile::tempdir().unwrap();
    std::fs::write(second.path().join("b.txt"), b"bravo").unwrap();

    let remote_tmp = tempfile::tempdir().unwrap();
    let config = config().with_remote_temp_dir(remote_tmp.path().to_str().unwrap());

    for transport in [
        Box::new(ephemeral(config.clone())) as Box<dyn Transport>,
        Box::new(PooledTransport::with_connector(
            LocalConnector::new(),
            Arc::new(config.clone()),
        )),
    ] {
        let ctx = ExecContext::new();
        let (a, b) = tokio::join!(
            transport.upload_directory(&ctx, first.path(), &[]),
            transport.upload_directory(&ctx, second.path(), &[]),
        );
        let (root_a, files_a) = a.unwrap();
        let (root_b, files_b) = b.unwrap();

        assert_ne!(root_a, root_b);
        assert_eq!(files_a, vec![format!("{root_a}/a.txt")]);
        assert_eq!(files_b, vec![format!("{root_b}/b.txt")]);
        assert!(!Path::new(&format!("{root_a}/b.txt")).exists());

        transport.delete_file_or_directory(&ctx, &root_a).await.unwrap();
        assert!(Path::new(&format!("{root_b}/b.txt")).exists());
        transport.delete_file_or_directory(&ctx, &root_b).await.unwrap();
    }
}
