//! Binary resolution
//!
//! Decides once, at factory construction, where envoy comes from:
//!
//! 1. An explicit binary path from the config (no docker involved)
//! 2. macOS: no native binary, every instance runs in a container
//! 3. Linux: the binary is copied out of the envoy image into a temp dir

use crate::config::{HarnessConfig, Platform};
use crate::docker::{self, DockerRunner};
use crate::error::{HarnessError, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Where instances get their envoy from
#[derive(Debug)]
pub enum BinaryProvider {
    /// Binary supplied by the caller
    ExplicitPath(PathBuf),
    /// Binary copied out of the image; `dir` is removed with the provider
    Extracted { path: PathBuf, dir: TempDir },
    /// Envoy only runs inside docker
    ContainerOnly,
}

impl BinaryProvider {
    /// Select and prepare a provider for `config`
    pub fn resolve(config: &HarnessConfig, docker: &dyn DockerRunner) -> Result<Self> {
        if let Some(path) = &config.binary_path {
            tracing::info!(path = %path.display(), "using explicit envoy binary");
            return Ok(BinaryProvider::ExplicitPath(path.clone()));
        }

        match &config.platform {
            Platform::MacOs => {
                tracing::info!("no native envoy on macos, instances will run in docker");
                Ok(BinaryProvider::ContainerOnly)
            }
            Platform::Linux => extract_from_image(config, docker),
            Platform::Other(os) => Err(HarnessError::UnsupportedPlatform(os.clone())),
        }
    }

    /// Host path of the envoy binary, `None` in container-only mode
    pub fn binary_path(&self) -> Option<&Path> {
        match self {
            BinaryProvider::ExplicitPath(path) => Some(path),
            BinaryProvider::Extracted { path, .. } => Some(path),
            BinaryProvider::ContainerOnly => None,
        }
    }

    pub fn uses_docker(&self) -> bool {
        matches!(self, BinaryProvider::ContainerOnly)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BinaryProvider::ExplicitPath(_) => "explicit",
            BinaryProvider::Extracted { .. } => "extracted",
            BinaryProvider::ContainerOnly => "container",
        }
    }
}

/// Pull the image, copy envoy out of a throwaway container, remove the container
fn extract_from_image(config: &HarnessConfig, docker: &dyn DockerRunner) -> Result<BinaryProvider> {
    let image = config.image_ref();
    let dir = tempfile::Builder::new()
        .prefix("envoy")
        .tempdir_in(config.temp_root())?;
    let fetch_err = |reason: String| HarnessError::Fetch {
        image: image.clone(),
        reason,
    };

    tracing::info!(%image, dir = %dir.path().display(), "extracting envoy from image");

    let created = docker::run_checked(docker, &docker::create_args(&image), Some(dir.path()))
        .map_err(fetch_err)?;
    let container_id = docker::stdout_line(&created);
    if container_id.is_empty() {
        return Err(fetch_err("docker create printed no container id".to_string()));
    }

    let path = dir.path().join("envoy");
    let copied = log_digest(docker, &image, dir.path()).and_then(|()| {
        docker::run_checked(
            docker,
            &docker::copy_out_args(&container_id, &path),
            Some(dir.path()),
        )
        .map(drop)
    });
    let removed = docker::run_checked(docker, &docker::rm_args(&container_id), Some(dir.path()));

    copied.map_err(fetch_err)?;
    removed.map_err(fetch_err)?;

    Ok(BinaryProvider::Extracted { path, dir })
}

/// Log the image digest so runs can be reproduced
fn log_digest(docker: &dyn DockerRunner, image: &str, cwd: &Path) -> std::result::Result<(), String> {
    let output = docker::run_checked(docker, &docker::inspect_digest_args(image), Some(cwd))?;
    tracing::info!(%image, digests = %docker::stdout_line(&output), "using envoy image");
    Ok(())
}
