//! Integration tests for binary resolution and the factory

mod support;

use envoy_harness::config::{HarnessConfig, Platform};
use envoy_harness::{BinaryProvider, Cleanup, EnvoyFactory, HarnessError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use support::RecordingDocker;
use tempfile::TempDir;

fn linux_config(temp_root: &Path) -> HarnessConfig {
    HarnessConfig {
        platform: Platform::Linux,
        image_tag: "v0.1.2".to_string(),
        temp_root: Some(temp_root.to_path_buf()),
        ..HarnessConfig::default()
    }
}

#[test]
fn test_explicit_binary_never_touches_docker() {
    envoy_harness::logging::init_for_tests();
    let docker = Arc::new(RecordingDocker::new());
    let config = HarnessConfig {
        binary_path: Some(PathBuf::from("/usr/bin/proxybin")),
        ..HarnessConfig::default()
    };

    let factory = EnvoyFactory::with_docker(config, docker.clone()).unwrap();
    let instance = factory.new_instance().unwrap();

    assert_eq!(instance.binary(), Some(Path::new("/usr/bin/proxybin")));
    assert!(!instance.uses_docker());
    assert!(docker.calls().is_empty());
}

#[test]
fn test_explicit_binary_from_env_lookup() {
    let docker = Arc::new(RecordingDocker::new());
    let mut config = HarnessConfig::default();
    config.apply_env(|key| (key == "ENVOY_BINARY").then(|| "/usr/bin/proxybin".to_string()));

    let factory = EnvoyFactory::with_docker(config, docker.clone()).unwrap();
    assert_eq!(factory.binary_path(), Some(Path::new("/usr/bin/proxybin")));
    assert!(docker.calls().is_empty());
}

#[test]
fn test_linux_extracts_binary_from_image() {
    envoy_harness::logging::init_for_tests();
    let root = TempDir::new().unwrap();
    let docker = Arc::new(RecordingDocker::new());
    docker.respond("create", 0, "cid123\n", "");
    docker.respond("inspect", 0, "[soloio/envoy@sha256:abc]\n", "");

    let mut factory = EnvoyFactory::with_docker(linux_config(root.path()), docker.clone()).unwrap();

    assert_eq!(docker.subcommands(), vec!["create", "inspect", "cp", "rm"]);
    let calls = docker.calls();
    assert_eq!(calls[0][1], "soloio/envoy:v0.1.2");
    assert_eq!(calls[1][1], "soloio/envoy:v0.1.2");
    assert_eq!(calls[3], vec!["rm", "cid123"]);

    let binary = factory.binary_path().unwrap().to_path_buf();
    assert_eq!(binary.file_name().unwrap(), "envoy");
    let extract_dir = binary.parent().unwrap().to_path_buf();
    assert!(extract_dir.starts_with(root.path()));
    assert!(extract_dir.exists());
    assert_eq!(
        calls[2],
        vec![
            "cp".to_string(),
            "cid123:/usr/local/bin/envoy".to_string(),
            binary.display().to_string(),
        ]
    );
    assert!(matches!(factory.provider(), Some(BinaryProvider::Extracted { .. })));

    // instances share the extracted binary
    let instance = factory.new_instance().unwrap();
    assert_eq!(instance.binary(), Some(binary.as_path()));
    drop(instance);

    factory.clean().unwrap();
    assert!(!extract_dir.exists());
    assert_eq!(factory.binary_path(), None);
    factory.clean().unwrap();

    // the binary is gone, so no more instances
    let err = factory.new_instance().err().unwrap();
    assert!(matches!(err, HarnessError::Launch { .. }));
    assert_eq!(docker.calls().len(), 4);
}

#[test]
fn test_clean_keeps_explicit_binary() {
    let docker = Arc::new(RecordingDocker::new());
    let config = HarnessConfig {
        binary_path: Some(PathBuf::from("/usr/bin/proxybin")),
        ..HarnessConfig::default()
    };

    let mut factory = EnvoyFactory::with_docker(config, docker.clone()).unwrap();
    factory.clean().unwrap();

    assert_eq!(factory.binary_path(), Some(Path::new("/usr/bin/proxybin")));
    assert!(matches!(factory.provider(), Some(BinaryProvider::ExplicitPath(_))));
    let instance = factory.new_instance().unwrap();
    assert_eq!(instance.binary(), Some(Path::new("/usr/bin/proxybin")));
    assert!(!instance.uses_docker());
    assert!(docker.calls().is_empty());
}

#[test]
fn test_clean_keeps_container_only_mode() {
    let docker = Arc::new(RecordingDocker::new());
    let config = HarnessConfig {
        platform: Platform::MacOs,
        ..HarnessConfig::default()
    };

    let mut factory = EnvoyFactory::with_docker(config, docker.clone()).unwrap();
    factory.clean().unwrap();

    assert!(factory.uses_docker());
    assert!(matches!(factory.provider(), Some(BinaryProvider::ContainerOnly)));
    let instance = factory.new_instance().unwrap();
    assert!(instance.uses_docker());
    assert_eq!(instance.binary(), None);
}

#[test]
fn test_copy_failure_still_removes_container() {
    let root = TempDir::new().unwrap();
    let docker = Arc::new(RecordingDocker::new());
    docker.respond("create", 0, "cid456\n", "");
    docker.respond("cp", 1, "", "Error: No such container:path\n");

    let err = EnvoyFactory::with_docker(linux_config(root.path()), docker.clone())
        .err()
        .unwrap();

    assert!(matches!(err, HarnessError::Fetch { ref image, .. } if image == "soloio/envoy:v0.1.2"));
    assert_eq!(docker.subcommands(), vec!["create", "inspect", "cp", "rm"]);
    // the extraction dir is dropped with the failed provider
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[test]
fn test_pull_failure_is_fetch_error() {
    let root = TempDir::new().unwrap();
    let docker = Arc::new(RecordingDocker::new());
    docker.respond("create", 125, "", "Unable to find image 'soloio/envoy:v0.1.2' locally\n");

    let err = EnvoyFactory::with_docker(linux_config(root.path()), docker.clone())
        .err()
        .unwrap();

    match err {
        HarnessError::Fetch { reason, .. } => assert!(reason.contains("Unable to find image")),
        other => panic!("expected fetch error, got {other:?}"),
    }
    assert_eq!(docker.subcommands(), vec!["create"]);
}

#[test]
fn test_macos_factory_is_container_only() {
    let docker = Arc::new(RecordingDocker::new());
    let config = HarnessConfig {
        platform: Platform::MacOs,
        ..HarnessConfig::default()
    };

    let factory = EnvoyFactory::with_docker(config, docker.clone()).unwrap();
    assert!(factory.uses_docker());
    assert_eq!(factory.binary_path(), None);
    assert!(docker.calls().is_empty());
}

#[test]
fn test_unsupported_platform_fails() {
    let docker = Arc::new(RecordingDocker::new());
    let config = HarnessConfig {
        platform: Platform::Other("plan9".to_string()),
        ..HarnessConfig::default()
    };

    let err = EnvoyFactory::with_docker(config, docker).err().unwrap();
    assert_eq!(err.to_string(), "unsupported platform: plan9");
}

#[test]
fn test_clean_unconstructed_factory_is_noop() {
    let mut factory: Option<EnvoyFactory> = None;
    factory.clean().unwrap();
}
