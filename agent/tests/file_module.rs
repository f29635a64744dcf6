//! File-staging module behaviour on a real filesystem

use std::path::PathBuf;

use otagent::errors::AgentError;
use otagent::installer::file::FileModule;
use otagent::installer::UpdateModule;

fn scratch(name: &str) -> (PathBuf, PathBuf) {
    let root = std::env::temp_dir().join(format!("otagent-test-{}-{}", std::process::id(), name));
    (root.join("staging"), root.join("target"))
}

async fn remove(paths: &[&PathBuf]) {
    for path in paths {
        if let Some(root) = path.parent() {
            let _ = tokio::fs::remove_dir_all(root).await;
        }
    }
}

#[tokio::test]
async fn test_stream_install_commit_moves_file_to_target() {
    let (staging, target) = scratch("commit");
    remove(&[&staging]).await;

    let mut module = FileModule::new("config", &staging, &target);
    let content = b"first halfsecond half".to_vec();

    module
        .stream("settings.json", content.len() as u64, 0, b"first half")
        .await
        .unwrap();
    // Target stays untouched while the payload is still streaming
    assert!(!target.join("settings.json").exists());

    module
        .stream("settings.json", content.len() as u64, 10, b"second half")
        .await
        .unwrap();
    module.install().await.unwrap();
    module.commit().await.unwrap();

    let written = tokio::fs::read(target.join("settings.json")).await.unwrap();
    assert_eq!(written, content);
    assert!(!staging.join("settings.json").exists());

    remove(&[&staging]).await;
}

#[tokio::test]
async fn test_rollback_discards_staged_files() {
    let (staging, target) = scratch("rollback");
    remove(&[&staging]).await;

    let mut module = FileModule::new("config", &staging, &target);
    module.stream("a.bin", 4, 0, b"data").await.unwrap();
    module.install().await.unwrap();
    module.rollback().await.unwrap();

    assert!(!staging.join("a.bin").exists());
    assert!(!target.join("a.bin").exists());

    remove(&[&staging]).await;
}

#[tokio::test]
async fn test_install_rejects_incomplete_stream() {
    let (staging, target) = scratch("incomplete");
    remove(&[&staging]).await;

    let mut module = FileModule::new("config", &staging, &target);
    module.stream("a.bin", 100, 0, b"short").await.unwrap();

    let err = module.install().await.unwrap_err();
    assert!(matches!(err, AgentError::InstallError(_)));

    module.rollback().await.unwrap();
    remove(&[&staging]).await;
}

#[tokio::test]
async fn test_rejects_filename_leaving_staging_directory() {
    let (staging, target) = scratch("traversal");
    remove(&[&staging]).await;

    let mut module = FileModule::new("config", &staging, &target);
    for filename in ["../escape.bin", "nested/escape.bin", ".."] {
        let err = module.stream(filename, 4, 0, b"data").await.unwrap_err();
        assert!(
            matches!(err, AgentError::InstallError(_)),
            "filename '{}'",
            filename
        );
    }
    assert!(!staging.exists());

    remove(&[&staging]).await;
}

#[tokio::test]
async fn test_multiple_files_commit_together() {
    let (staging, target) = scratch("multi");
    remove(&[&staging]).await;

    let mut module = FileModule::new("config", &staging, &target);
    module.stream("a.bin", 1, 0, b"a").await.unwrap();
    module.stream("b.bin", 1, 0, b"b").await.unwrap();
    module.install().await.unwrap();
    module.commit().await.unwrap();

    assert_eq!(tokio::fs::read(target.join("a.bin")).await.unwrap(), b"a");
    assert_eq!(tokio::fs::read(target.join("b.bin")).await.unwrap(), b"b");

    remove(&[&staging]).await;
}
