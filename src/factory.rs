//! Envoy factory
//!
//! Created once per test run. Resolves envoy up front (see [`BinaryProvider`])
//! and hands out [`EnvoyInstance`]s that share the resolved binary.

use crate::config::HarnessConfig;
use crate::docker::{DockerCli, DockerRunner};
use crate::error::{HarnessError, Result};
use crate::instance::EnvoyInstance;
use crate::lifecycle::Cleanup;
use crate::provider::BinaryProvider;
use std::path::Path;
use std::sync::Arc;

pub struct EnvoyFactory {
    provider: Option<BinaryProvider>,
    config: HarnessConfig,
    docker: Arc<dyn DockerRunner>,
}

impl EnvoyFactory {
    /// Resolve envoy for `config` using the real docker CLI
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let docker = Arc::new(DockerCli::new(&config.docker_bin));
        Self::with_docker(config, docker)
    }

    /// Resolve envoy from the process environment
    pub fn from_env() -> Result<Self> {
        Self::new(HarnessConfig::from_env())
    }

    /// Resolve envoy with a caller-supplied docker runner
    pub fn with_docker(config: HarnessConfig, docker: Arc<dyn DockerRunner>) -> Result<Self> {
        let provider = BinaryProvider::resolve(&config, docker.as_ref())?;
        tracing::debug!(provider = provider.kind(), "envoy factory ready");
        Ok(Self {
            provider: Some(provider),
            config,
            docker,
        })
    }

    /// A fresh, not yet started instance with its own temp dir.
    ///
    /// Fails once cleanup has removed an extracted binary.
    pub fn new_instance(&self) -> Result<EnvoyInstance> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| HarnessError::launch("envoy factory already cleaned up"))?;
        EnvoyInstance::new(
            provider.binary_path().map(Path::to_path_buf),
            provider.uses_docker(),
            self.config.clone(),
            Arc::clone(&self.docker),
        )
    }

    /// Host path of envoy, `None` in container-only mode or once an extracted
    /// binary has been cleaned up
    pub fn binary_path(&self) -> Option<&Path> {
        self.provider.as_ref().and_then(BinaryProvider::binary_path)
    }

    pub fn uses_docker(&self) -> bool {
        self.provider
            .as_ref()
            .is_some_and(BinaryProvider::uses_docker)
    }

    pub fn provider(&self) -> Option<&BinaryProvider> {
        self.provider.as_ref()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }
}

impl Cleanup for EnvoyFactory {
    /// Remove the extraction temp dir, if any. Removal errors are ignored.
    ///
    /// Explicit and container-only providers own nothing on disk and stay usable.
    fn clean(&mut self) -> Result<()> {
        if !matches!(self.provider, Some(BinaryProvider::Extracted { .. })) {
            return Ok(());
        }
        if let Some(BinaryProvider::Extracted { dir, .. }) = self.provider.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::debug!(path = %path.display(), error = %e, "failed to remove envoy temp dir");
            }
        }
        Ok(())
    }
}
