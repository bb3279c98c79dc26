//! Shared fixtures for the integration tests

#![allow(dead_code)]

use envoy_harness::docker::DockerRunner;
use std::collections::HashMap;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Fake docker CLI: records every invocation and answers from a script keyed
/// by subcommand. Unscripted subcommands succeed with empty output.
#[derive(Default)]
pub struct RecordingDocker {
    calls: Mutex<Vec<Vec<String>>>,
    responses: Mutex<HashMap<String, (i32, String, String)>>,
}

impl RecordingDocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, subcommand: &str, code: i32, stdout: &str, stderr: &str) {
        self.responses.lock().unwrap().insert(
            subcommand.to_string(),
            (code, stdout.to_string(), stderr.to_string()),
        );
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|args| args.first().cloned())
            .collect()
    }
}

impl DockerRunner for RecordingDocker {
    fn run(&self, args: &[String], _cwd: Option<&Path>) -> io::Result<Output> {
        self.calls.lock().unwrap().push(args.to_vec());
        let subcommand = args.first().cloned().unwrap_or_default();
        let (code, stdout, stderr) = self
            .responses
            .lock()
            .unwrap()
            .get(&subcommand)
            .cloned()
            .unwrap_or_default();
        Ok(Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.into_bytes(),
            stderr: stderr.into_bytes(),
        })
    }
}

/// Serializes writing and executing fake binaries so a concurrent fork never
/// holds the script open for writing (ETXTBSY)
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

pub fn spawn_lock() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shell script standing in for envoy. It records its arguments and working
/// directory next to itself, prints a line, then sleeps until killed.
pub fn fake_envoy(dir: &Path) -> PathBuf {
    let path = dir.join("fake-envoy");
    let script = r#"#!/bin/sh
pwd > "$0.cwd"
printf '%s\n' "$@" > "$0.args.tmp"
mv "$0.args.tmp" "$0.args"
echo "fake envoy up"
exec sleep 30
"#;
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Arguments the fake envoy at `binary` was started with
pub fn recorded_args(binary: &Path) -> Vec<String> {
    let args_path = PathBuf::from(format!("{}.args", binary.display()));
    wait_for_file(&args_path, Duration::from_secs(10));
    std::fs::read_to_string(&args_path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Working directory the fake envoy at `binary` was started in
pub fn recorded_cwd(binary: &Path) -> PathBuf {
    let cwd_path = PathBuf::from(format!("{}.cwd", binary.display()));
    wait_for_file(&cwd_path, Duration::from_secs(10));
    PathBuf::from(std::fs::read_to_string(&cwd_path).unwrap().trim())
}

fn wait_for_file(path: &Path, timeout: Duration) {
    let start = Instant::now();
    while !path.exists() {
        assert!(
            start.elapsed() < timeout,
            "{} did not appear within {:?}",
            path.display(),
            timeout
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}
