//! Integration tests for launching and cleaning up envoy instances
//!
//! Direct mode runs a shell script posing as envoy; container mode runs
//! against a recording fake of the docker CLI.

mod support;

use envoy_harness::config::{HarnessConfig, Platform};
use envoy_harness::{Cleanup, EnvoyFactory, EnvoyInstance, HarnessError, InstanceState};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::sync::Arc;
use support::{fake_envoy, recorded_args, recorded_cwd, spawn_lock, RecordingDocker};
use tempfile::TempDir;

fn direct_factory(binary: &Path, temp_root: &Path) -> EnvoyFactory {
    let config = HarnessConfig {
        binary_path: Some(binary.to_path_buf()),
        temp_root: Some(temp_root.to_path_buf()),
        stop_grace_ms: 2_000,
        ..HarnessConfig::default()
    };
    EnvoyFactory::with_docker(config, Arc::new(RecordingDocker::new())).unwrap()
}

fn container_factory(docker: Arc<RecordingDocker>) -> EnvoyFactory {
    let config = HarnessConfig {
        platform: Platform::MacOs,
        control_plane_addr: Some("10.9.8.7".to_string()),
        ..HarnessConfig::default()
    };
    EnvoyFactory::with_docker(config, docker).unwrap()
}

fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None::<Signal>).is_ok()
}

// =============================================================================
// Direct mode
// =============================================================================

#[test]
fn test_run_with_port_launches_binary_with_config() {
    envoy_harness::logging::init_for_tests();
    let scratch = TempDir::new().unwrap();
    let _guard = spawn_lock();
    let binary = fake_envoy(scratch.path());
    let factory = direct_factory(&binary, scratch.path());
    let mut instance = factory.new_instance().unwrap();

    instance.run_with_port(9901).unwrap();

    let config = std::fs::read_to_string(instance.config_path()).unwrap();
    assert!(config.contains("port_value: 9901"));
    assert!(config.contains("address: localhost"));

    let args = recorded_args(&binary);
    assert_eq!(
        args,
        vec![
            "-c".to_string(),
            instance.config_path().display().to_string(),
            "--v2-config-only".to_string(),
        ]
    );
    let cwd = recorded_cwd(&binary);
    assert_eq!(
        cwd.canonicalize().unwrap(),
        instance.temp_dir().unwrap().canonicalize().unwrap()
    );

    assert!(instance.pid().is_some());
    assert!(instance.container_id().is_none());
    instance.clean().unwrap();
}

#[test]
fn test_run_uses_default_port() {
    let scratch = TempDir::new().unwrap();
    let _guard = spawn_lock();
    let binary = fake_envoy(scratch.path());
    let factory = direct_factory(&binary, scratch.path());
    let mut instance = factory.new_instance().unwrap();

    instance.run().unwrap();
    let config = std::fs::read_to_string(instance.config_path()).unwrap();
    assert!(config.contains("port_value: 8081"));
    instance.clean().unwrap();
}

#[test]
fn test_clean_terminates_process_and_is_idempotent() {
    let scratch = TempDir::new().unwrap();
    let _guard = spawn_lock();
    let binary = fake_envoy(scratch.path());
    let factory = direct_factory(&binary, scratch.path());
    let mut instance = factory.new_instance().unwrap();

    instance.run().unwrap();
    recorded_args(&binary);
    let pid = instance.pid().unwrap();
    let dir = instance.temp_dir().unwrap().to_path_buf();
    assert!(process_alive(pid));

    instance.clean().unwrap();
    assert!(!process_alive(pid));
    assert!(!dir.exists());
    assert!(matches!(instance.state(), InstanceState::Stopped));
    assert_eq!(instance.pid(), None);

    instance.clean().unwrap();
    assert!(matches!(instance.state(), InstanceState::Stopped));
}

#[test]
fn test_drop_cleans_up() {
    let scratch = TempDir::new().unwrap();
    let _guard = spawn_lock();
    let binary = fake_envoy(scratch.path());
    let factory = direct_factory(&binary, scratch.path());
    let mut instance = factory.new_instance().unwrap();

    instance.run().unwrap();
    recorded_args(&binary);
    let pid = instance.pid().unwrap();
    let dir = instance.temp_dir().unwrap().to_path_buf();

    drop(instance);
    assert!(!process_alive(pid));
    assert!(!dir.exists());
}

#[test]
fn test_second_run_is_rejected() {
    let scratch = TempDir::new().unwrap();
    let _guard = spawn_lock();
    let binary = fake_envoy(scratch.path());
    let factory = direct_factory(&binary, scratch.path());
    let mut instance = factory.new_instance().unwrap();

    instance.run().unwrap();
    let pid = instance.pid();
    let err = instance.run_with_port(9000).unwrap_err();
    assert!(matches!(err, HarnessError::Launch { .. }));
    assert_eq!(instance.pid(), pid);
    instance.clean().unwrap();
}

#[test]
fn test_concurrent_instances_use_separate_configs() {
    let scratch = TempDir::new().unwrap();
    let factory = direct_factory(Path::new("/usr/bin/proxybin"), scratch.path());
    let a = factory.new_instance().unwrap();
    let b = factory.new_instance().unwrap();
    assert_ne!(a.config_path(), b.config_path());
    assert_ne!(a.temp_dir(), b.temp_dir());
}

#[test]
fn test_clean_unconstructed_instance_is_noop() {
    let mut instance: Option<EnvoyInstance> = None;
    instance.clean().unwrap();
    instance.clean().unwrap();
}

// =============================================================================
// Container mode
// =============================================================================

#[test]
fn test_container_run_and_stop() {
    envoy_harness::logging::init_for_tests();
    let docker = Arc::new(RecordingDocker::new());
    docker.respond("run", 0, "3f2a9c0ffee\n", "");
    let factory = container_factory(docker.clone());
    let mut instance = factory.new_instance().unwrap();
    let dir = instance.temp_dir().unwrap().to_path_buf();

    assert_eq!(instance.binary(), None);
    instance.run_with_port(9901).unwrap();

    assert_eq!(instance.container_id(), Some("3f2a9c0ffee"));
    assert_eq!(instance.pid(), None);

    let config = std::fs::read_to_string(instance.config_path()).unwrap();
    assert!(config.contains("address: 10.9.8.7"));
    assert!(config.contains("port_value: 9901"));

    let calls = docker.calls();
    let run = &calls[0];
    assert_eq!(&run[..3], ["run", "-d", "--rm"]);
    assert_eq!(run[4], format!("{}:/etc/config/", dir.display()));
    assert!(run.contains(&"8080:8080".to_string()));
    assert!(run.contains(&"19000:19000".to_string()));
    assert_eq!(run.last().unwrap(), "/etc/config/envoyconfig.yaml");

    instance.clean().unwrap();
    assert_eq!(docker.subcommands(), vec!["run", "stop"]);
    assert_eq!(docker.calls()[1], vec!["stop", "3f2a9c0ffee"]);
    assert!(!dir.exists());

    instance.clean().unwrap();
    assert_eq!(docker.calls().len(), 2);
}

#[test]
fn test_container_stop_failure_still_removes_dir() {
    let docker = Arc::new(RecordingDocker::new());
    docker.respond("run", 0, "deadbeef\n", "");
    docker.respond("stop", 1, "", "Error response from daemon: No such container\n");
    let factory = container_factory(docker.clone());
    let mut instance = factory.new_instance().unwrap();
    let dir = instance.temp_dir().unwrap().to_path_buf();

    instance.run().unwrap();
    let err = instance.clean().unwrap_err();
    assert!(matches!(err, HarnessError::Stop { ref container_id, .. } if container_id == "deadbeef"));
    assert!(!dir.exists());

    // already torn down, nothing left to do
    instance.clean().unwrap();
    assert_eq!(docker.subcommands(), vec!["run", "stop"]);
}

#[test]
fn test_container_run_failure_is_launch_error() {
    let docker = Arc::new(RecordingDocker::new());
    docker.respond("run", 125, "", "port is already allocated\n");
    let factory = container_factory(docker.clone());
    let mut instance = factory.new_instance().unwrap();

    let err = instance.run().unwrap_err();
    match err {
        HarnessError::Launch { reason, .. } => assert!(reason.contains("port is already allocated")),
        other => panic!("expected launch error, got {other:?}"),
    }
    assert!(matches!(instance.state(), InstanceState::NotStarted));

    // nothing to stop
    instance.clean().unwrap();
    assert_eq!(docker.subcommands(), vec!["run"]);
}
