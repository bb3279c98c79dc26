//! Envoy instances
//!
//! One instance is one envoy under test, started either as a local process or
//! as a detached container. Each instance owns a private temp dir holding its
//! bootstrap, so concurrently running instances never share a config file.
//!
//! Starting is fire-and-forget: `run` returns once the process or container is
//! launched. Use [`EnvoyInstance::wait_ready`] to block until the admin port
//! accepts connections.

use crate::address::resolve_control_plane_addr;
use crate::bootstrap::{self, ADMIN_PORT, BOOTSTRAP_FILE_NAME};
use crate::config::HarnessConfig;
use crate::docker::{self, DockerRunner};
use crate::error::{HarnessError, Result};
use crate::lifecycle::{terminate_child, Cleanup};
use crate::logcapture;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// xDS port used by [`EnvoyInstance::run`]
pub const DEFAULT_XDS_PORT: u32 = 8081;

/// Control-plane address for envoy running directly on the host
const LOCAL_CONTROL_PLANE: &str = "localhost";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Parent of container-mode temp dirs, relative to the working directory
const CONTAINER_TEMP_DIR: &str = "_temp";

/// Where an instance is in its life
#[derive(Debug)]
pub enum InstanceState {
    NotStarted,
    RunningProcess(Child),
    RunningContainer(String),
    Stopped,
}

impl InstanceState {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            InstanceState::RunningProcess(_) | InstanceState::RunningContainer(_)
        )
    }
}

pub struct EnvoyInstance {
    binary: Option<PathBuf>,
    config_path: PathBuf,
    tempdir: Option<TempDir>,
    use_docker: bool,
    state: InstanceState,
    config: HarnessConfig,
    docker: Arc<dyn DockerRunner>,
}

impl EnvoyInstance {
    /// Prepare an instance with its own temp dir; nothing is started yet
    pub(crate) fn new(
        binary: Option<PathBuf>,
        use_docker: bool,
        config: HarnessConfig,
        docker: Arc<dyn DockerRunner>,
    ) -> Result<Self> {
        let tempdir = if use_docker {
            // Docker Desktop only shares a few host paths, stay below the cwd
            shared_tempdir(&std::env::current_dir()?.join(CONTAINER_TEMP_DIR))?
        } else {
            tempfile::Builder::new()
                .prefix("envoy")
                .tempdir_in(config.temp_root())?
        };
        let config_path = tempdir.path().join(BOOTSTRAP_FILE_NAME);

        Ok(Self {
            binary,
            config_path,
            tempdir: Some(tempdir),
            use_docker,
            state: InstanceState::NotStarted,
            config,
            docker,
        })
    }

    /// Start envoy against a control plane on [`DEFAULT_XDS_PORT`]
    pub fn run(&mut self) -> Result<()> {
        self.run_with_port(DEFAULT_XDS_PORT)
    }

    /// Write the bootstrap for `xds_port` and launch envoy
    pub fn run_with_port(&mut self, xds_port: u32) -> Result<()> {
        if !matches!(self.state, InstanceState::NotStarted) {
            return Err(HarnessError::launch("instance already started"));
        }

        let control_plane = if self.use_docker {
            resolve_control_plane_addr(self.config.control_plane_addr.as_deref())?
        } else {
            LOCAL_CONTROL_PLANE.to_string()
        };
        bootstrap::write_bootstrap(&self.config_path, &control_plane, xds_port)?;
        tracing::info!(
            config = %self.config_path.display(),
            %control_plane,
            xds_port,
            "wrote envoy bootstrap"
        );

        self.state = if self.use_docker {
            InstanceState::RunningContainer(self.start_container()?)
        } else {
            InstanceState::RunningProcess(self.start_process()?)
        };
        Ok(())
    }

    fn start_container(&self) -> Result<String> {
        let config_dir = self.config_dir()?;
        let args = docker::run_envoy_args(&self.config.image_ref(), config_dir, BOOTSTRAP_FILE_NAME);
        tracing::info!(command = %docker::render_command(&args), "starting envoy container");

        let output = docker::run_checked(self.docker.as_ref(), &args, Some(config_dir))
            .map_err(HarnessError::launch)?;
        let container_id = docker::stdout_line(&output);
        if container_id.is_empty() {
            return Err(HarnessError::launch("docker run printed no container id"));
        }
        tracing::info!(%container_id, "envoy container started");
        Ok(container_id)
    }

    fn start_process(&self) -> Result<Child> {
        let binary = self
            .binary
            .as_deref()
            .ok_or_else(|| HarnessError::launch("no envoy binary resolved"))?;
        let config_dir = self.config_dir()?;

        let mut child = Command::new(binary)
            .arg("-c")
            .arg(&self.config_path)
            .arg("--v2-config-only")
            .current_dir(config_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HarnessError::Launch {
                reason: format!("failed to spawn {}", binary.display()),
                source: Some(e),
            })?;

        tracing::info!(pid = child.id(), binary = %binary.display(), "envoy process started");
        logcapture::forward_output(&mut child, "ENVOY");
        Ok(child)
    }

    fn config_dir(&self) -> Result<&Path> {
        self.tempdir
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(|| HarnessError::launch("instance temp dir already removed"))
    }

    /// Block until the admin port accepts TCP connections.
    ///
    /// `run` never waits on its own; call this when a test needs a serving envoy.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        if !self.state.is_running() {
            return Err(HarnessError::launch("instance is not running"));
        }
        wait_for_port(ADMIN_PORT, timeout)
    }

    /// Host path of the envoy binary, `None` when envoy only runs in docker
    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Instance temp dir, `None` after cleanup
    pub fn temp_dir(&self) -> Option<&Path> {
        self.tempdir.as_ref().map(TempDir::path)
    }

    pub fn uses_docker(&self) -> bool {
        self.use_docker
    }

    pub fn state(&self) -> &InstanceState {
        &self.state
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            InstanceState::RunningProcess(child) => Some(child.id()),
            _ => None,
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        match &self.state {
            InstanceState::RunningContainer(id) => Some(id),
            _ => None,
        }
    }
}

impl Cleanup for EnvoyInstance {
    /// Stop envoy and remove the temp dir.
    ///
    /// The temp dir is removed even when `docker stop` fails; that failure is
    /// still returned. In container mode the shared `_temp` parent goes too once
    /// no other instance uses it.
    fn clean(&mut self) -> Result<()> {
        let stopped = match std::mem::replace(&mut self.state, InstanceState::Stopped) {
            InstanceState::RunningProcess(mut child) => {
                terminate_child(&mut child, self.config.stop_grace());
                Ok(())
            }
            InstanceState::RunningContainer(container_id) => self.stop_container(container_id),
            InstanceState::NotStarted | InstanceState::Stopped => Ok(()),
        };

        if let Some(dir) = self.tempdir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::debug!(path = %path.display(), error = %e, "failed to remove instance temp dir");
            }
            if self.use_docker {
                if let Some(parent) = path.parent() {
                    remove_if_empty(parent);
                }
            }
        }

        stopped
    }
}

impl EnvoyInstance {
    fn stop_container(&self, container_id: String) -> Result<()> {
        tracing::info!(%container_id, "stopping envoy container");
        docker::run_checked(self.docker.as_ref(), &docker::stop_args(&container_id), None)
            .map(drop)
            .map_err(|reason| HarnessError::Stop {
                container_id,
                reason,
            })
    }
}

impl Drop for EnvoyInstance {
    fn drop(&mut self) {
        if let Err(e) = self.clean() {
            tracing::warn!(error = %e, "envoy instance cleanup failed on drop");
        }
    }
}

/// Unique `envoy*` dir below `root`, creating `root` as needed
fn shared_tempdir(root: &Path) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("envoy");
    // another instance may remove an empty root between the two calls
    for _ in 0..3 {
        std::fs::create_dir_all(root)?;
        match builder.tempdir_in(root) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            other => return Ok(other?),
        }
    }
    std::fs::create_dir_all(root)?;
    Ok(builder.tempdir_in(root)?)
}

/// Remove `dir` if it has no entries left; anything else leaves it alone
fn remove_if_empty(dir: &Path) {
    match std::fs::remove_dir(dir) {
        Ok(()) => tracing::debug!(path = %dir.display(), "removed empty temp root"),
        Err(e) => tracing::trace!(path = %dir.display(), error = %e, "temp root kept"),
    }
}

/// Poll `127.0.0.1:port` until a connection succeeds or `timeout` elapses
pub fn wait_for_port(port: u16, timeout: Duration) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let start = Instant::now();

    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(HarnessError::NotReady { port, timeout });
        }
        if TcpStream::connect_timeout(&addr, remaining.min(Duration::from_secs(1))).is_ok() {
            return Ok(());
        }
        thread::sleep(READY_POLL_INTERVAL.min(remaining));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::net::TcpListener;
    use std::process::Output;

    struct NoDocker;

    impl DockerRunner for NoDocker {
        fn run(&self, args: &[String], _cwd: Option<&Path>) -> io::Result<Output> {
            panic!("docker must not be invoked, got {:?}", args);
        }
    }

    fn local_instance(binary: &str, root: &Path) -> EnvoyInstance {
        let config = HarnessConfig {
            temp_root: Some(root.to_path_buf()),
            ..HarnessConfig::default()
        };
        EnvoyInstance::new(Some(PathBuf::from(binary)), false, config, Arc::new(NoDocker)).unwrap()
    }

    #[test]
    fn test_new_instance_layout() {
        let root = tempfile::tempdir().unwrap();
        let instance = local_instance("/usr/bin/proxybin", root.path());

        let dir = instance.temp_dir().unwrap();
        assert!(dir.starts_with(root.path()));
        assert!(dir.file_name().unwrap().to_string_lossy().starts_with("envoy"));
        assert_eq!(instance.config_path(), dir.join("envoyconfig.yaml"));
        assert!(matches!(instance.state(), InstanceState::NotStarted));
        assert_eq!(instance.pid(), None);
        assert_eq!(instance.container_id(), None);
    }

    #[test]
    fn test_instances_get_distinct_dirs() {
        let root = tempfile::tempdir().unwrap();
        let a = local_instance("/usr/bin/proxybin", root.path());
        let b = local_instance("/usr/bin/proxybin", root.path());
        assert_ne!(a.temp_dir(), b.temp_dir());
    }

    #[test]
    fn test_spawn_failure_is_launch_error() {
        let root = tempfile::tempdir().unwrap();
        let mut instance = local_instance("/nonexistent/envoy", root.path());

        let err = instance.run().unwrap_err();
        assert!(matches!(err, HarnessError::Launch { source: Some(_), .. }));
        assert!(matches!(instance.state(), InstanceState::NotStarted));
        // bootstrap was written before the launch attempt
        assert!(instance.config_path().exists());
    }

    #[test]
    fn test_clean_unstarted_removes_dir() {
        let root = tempfile::tempdir().unwrap();
        let mut instance = local_instance("/usr/bin/proxybin", root.path());
        let dir = instance.temp_dir().unwrap().to_path_buf();

        instance.clean().unwrap();
        assert!(!dir.exists());
        assert!(matches!(instance.state(), InstanceState::Stopped));
        instance.clean().unwrap();
    }

    #[test]
    fn test_run_after_clean_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let mut instance = local_instance("/usr/bin/proxybin", root.path());
        instance.clean().unwrap();

        let err = instance.run().unwrap_err();
        assert!(matches!(err, HarnessError::Launch { source: None, .. }));
    }

    #[test]
    fn test_remove_if_empty_only_removes_empty_dirs() {
        let root = tempfile::tempdir().unwrap();
        let empty = root.path().join("empty");
        let busy = root.path().join("busy");
        std::fs::create_dir(&empty).unwrap();
        std::fs::create_dir_all(busy.join("envoy123")).unwrap();

        remove_if_empty(&empty);
        remove_if_empty(&busy);
        remove_if_empty(&root.path().join("missing"));

        assert!(!empty.exists());
        assert!(busy.join("envoy123").exists());
    }

    #[test]
    fn test_shared_tempdir_recreates_root() {
        let root = tempfile::tempdir().unwrap();
        let shared = root.path().join("_temp");

        let first = shared_tempdir(&shared).unwrap();
        assert!(first.path().starts_with(&shared));
        first.close().unwrap();
        remove_if_empty(&shared);
        assert!(!shared.exists());

        let second = shared_tempdir(&shared).unwrap();
        assert!(second.path().exists());
    }

    #[test]
    fn test_container_clean_removes_empty_temp_root() {
        let root = std::env::current_dir().unwrap().join(CONTAINER_TEMP_DIR);
        let existed = root.exists();

        let mut instance =
            EnvoyInstance::new(None, true, HarnessConfig::default(), Arc::new(NoDocker)).unwrap();
        let dir = instance.temp_dir().unwrap().to_path_buf();
        assert_eq!(dir.parent(), Some(root.as_path()));

        instance.clean().unwrap();
        assert!(!dir.exists());
        if !existed {
            assert!(!root.exists());
        }
    }

    #[test]
    fn test_wait_for_port_succeeds_on_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        wait_for_port(port, Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn test_wait_for_port_times_out() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = wait_for_port(port, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, HarnessError::NotReady { port: p, .. } if p == port));
    }

    #[test]
    fn test_wait_ready_requires_running_instance() {
        let root = tempfile::tempdir().unwrap();
        let instance = local_instance("/usr/bin/proxybin", root.path());
        assert!(instance.wait_ready(Duration::from_millis(10)).is_err());
    }
}
