//! Docker CLI plumbing
//!
//! All container work goes through [`DockerRunner`] so the factory and instances
//! can be driven by a fake in tests. [`DockerCli`] shells out to the real CLI.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// Path of the envoy binary inside the image
pub const CONTAINER_ENVOY_PATH: &str = "/usr/local/bin/envoy";
/// Where the instance temp dir is mounted inside the container
pub const CONTAINER_CONFIG_DIR: &str = "/etc/config/";
/// Host ports published by containerized envoy (listener, admin)
pub const PUBLISHED_PORTS: [u16; 2] = [8080, crate::bootstrap::ADMIN_PORT];

/// Runs one docker command to completion and returns its captured output
pub trait DockerRunner: Send + Sync {
    fn run(&self, args: &[String], cwd: Option<&Path>) -> io::Result<Output>;
}

/// Real docker CLI
pub struct DockerCli {
    program: PathBuf,
}

impl DockerCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DockerRunner for DockerCli {
    fn run(&self, args: &[String], cwd: Option<&Path>) -> io::Result<Output> {
        tracing::debug!(command = %render_command(args), "running docker");
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let output = cmd.output()?;
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::debug!(target: "docker", "{}", line);
        }
        Ok(output)
    }
}

/// Run `args` and require a zero exit status.
///
/// On failure the error string carries the command, exit status and stderr.
pub fn run_checked(
    runner: &dyn DockerRunner,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<Output, String> {
    let command = render_command(args);
    let output = runner
        .run(args, cwd)
        .map_err(|e| format!("`{}` could not be executed: {}", command, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "`{}` failed with {}: {}",
            command,
            output.status,
            stderr.trim()
        ));
    }
    Ok(output)
}

/// Trimmed stdout, the container id for `create` and `run -d`
pub fn stdout_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Human readable command line, for logs and errors
pub fn render_command(args: &[String]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push("docker".to_string());
    parts.extend(args.iter().map(|arg| {
        if arg.is_empty() {
            "\"\"".to_string()
        } else if arg.chars().any(|c| c.is_whitespace()) {
            format!("\"{}\"", arg.replace('"', "\\\""))
        } else {
            arg.clone()
        }
    }));
    parts.join(" ")
}

// =============================================================================
// Argument builders
// =============================================================================

/// Create (and pull, if needed) a throwaway container to copy envoy out of
pub fn create_args(image: &str) -> Vec<String> {
    vec![
        "create".into(),
        image.into(),
        "/bin/bash".into(),
        "-c".into(),
        "exit".into(),
    ]
}

pub fn inspect_digest_args(image: &str) -> Vec<String> {
    vec![
        "inspect".into(),
        image.into(),
        "-f".into(),
        "{{.RepoDigests}}".into(),
    ]
}

pub fn copy_out_args(container_id: &str, dest: &Path) -> Vec<String> {
    vec![
        "cp".into(),
        format!("{}:{}", container_id, CONTAINER_ENVOY_PATH),
        dest.display().to_string(),
    ]
}

pub fn rm_args(container_id: &str) -> Vec<String> {
    vec!["rm".into(), container_id.into()]
}

/// Detached, self-removing envoy container reading `config_dir/config_file`
pub fn run_envoy_args(image: &str, config_dir: &Path, config_file: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "-d".into(),
        "--rm".into(),
        "-v".into(),
        format!("{}:{}", config_dir.display(), CONTAINER_CONFIG_DIR),
    ];
    for port in PUBLISHED_PORTS {
        args.push("-p".into());
        args.push(format!("{port}:{port}"));
    }
    args.extend([
        image.to_string(),
        CONTAINER_ENVOY_PATH.to_string(),
        "--v2-config-only".to_string(),
        "-c".to_string(),
        format!("{}{}", CONTAINER_CONFIG_DIR, config_file),
    ]);
    args
}

pub fn stop_args(container_id: &str) -> Vec<String> {
    vec!["stop".into(), container_id.into()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    struct Scripted {
        code: i32,
        stdout: &'static str,
        stderr: &'static str,
    }

    impl DockerRunner for Scripted {
        fn run(&self, _args: &[String], _cwd: Option<&Path>) -> io::Result<Output> {
            Ok(Output {
                status: ExitStatus::from_raw(self.code << 8),
                stdout: self.stdout.as_bytes().to_vec(),
                stderr: self.stderr.as_bytes().to_vec(),
            })
        }
    }

    #[test]
    fn test_run_envoy_args() {
        let args = run_envoy_args("soloio/envoy:latest", Path::new("/tmp/envoy123"), "envoyconfig.yaml");
        assert_eq!(
            args,
            vec![
                "run",
                "-d",
                "--rm",
                "-v",
                "/tmp/envoy123:/etc/config/",
                "-p",
                "8080:8080",
                "-p",
                "19000:19000",
                "soloio/envoy:latest",
                "/usr/local/bin/envoy",
                "--v2-config-only",
                "-c",
                "/etc/config/envoyconfig.yaml",
            ]
        );
    }

    #[test]
    fn test_copy_out_args() {
        let args = copy_out_args("abc123", Path::new("/tmp/envoy/envoy"));
        assert_eq!(args, vec!["cp", "abc123:/usr/local/bin/envoy", "/tmp/envoy/envoy"]);
    }

    #[test]
    fn test_render_command_quotes_whitespace() {
        let args = vec!["run".to_string(), "a b".to_string(), String::new()];
        assert_eq!(render_command(&args), "docker run \"a b\" \"\"");
    }

    #[test]
    fn test_run_checked_reports_stderr() {
        let runner = Scripted {
            code: 1,
            stdout: "",
            stderr: "Error: No such image\n",
        };
        let err = run_checked(&runner, &stop_args("abc"), None).unwrap_err();
        assert!(err.starts_with("`docker stop abc` failed with"));
        assert!(err.ends_with("Error: No such image"));
    }

    #[test]
    fn test_stdout_line_trims() {
        let runner = Scripted {
            code: 0,
            stdout: "f00dcafe\n",
            stderr: "",
        };
        let output = run_checked(&runner, &create_args("img"), None).unwrap();
        assert_eq!(stdout_line(&output), "f00dcafe");
    }
}
