//! Reporter Module: Human (CLI) and Machine (JSON) output for harness events
//!
//! - `Reporter` trait defines the event callbacks
//! - `JsonReporter` outputs NDJSON to stdout (for --format=json)
//! - `HumanReporter` outputs human-readable text to stderr
//!
//! When JsonReporter is active, ONLY valid JSON goes to stdout. Logs go to
//! stderr through tracing.

use crate::config::OutputFormat;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Machine-readable events for JSON output
#[derive(Serialize, Debug, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MachineEvent<'a> {
    /// Emitted once the factory has resolved envoy
    BinaryResolved {
        provider: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<&'a str>,
    },
    /// Emitted after a successful launch
    InstanceStarted {
        config: &'a str,
        xds_port: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        container_id: Option<&'a str>,
    },
    /// Emitted when the admin port accepted a connection
    InstanceReady { admin_port: u16 },
    /// Emitted after cleanup
    InstanceStopped,
    /// Emitted on fatal error
    Error { message: &'a str },
}

/// Reporter trait for output abstraction
pub trait Reporter {
    fn on_binary_resolved(&mut self, provider: &str, path: Option<&Path>);

    fn on_instance_started(
        &mut self,
        config: &Path,
        xds_port: u32,
        pid: Option<u32>,
        container_id: Option<&str>,
    );

    fn on_instance_ready(&mut self, admin_port: u16);

    fn on_instance_stopped(&mut self);

    fn on_error(&mut self, message: &str);
}

/// Reporter for the requested output format
pub fn for_format(format: &OutputFormat) -> Box<dyn Reporter> {
    match format {
        OutputFormat::Human => Box::new(HumanReporter),
        OutputFormat::Json => Box::new(JsonReporter::new(std::io::stdout())),
    }
}

// =============================================================================
// JSON Reporter
// =============================================================================

/// JSON Reporter - one event per line
pub struct JsonReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, event: &MachineEvent<'_>) {
        match serde_json::to_string(event) {
            Ok(line) => {
                let _ = writeln!(self.out, "{}", line);
                let _ = self.out.flush();
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize event"),
        }
    }
}

impl<W: Write> Reporter for JsonReporter<W> {
    fn on_binary_resolved(&mut self, provider: &str, path: Option<&Path>) {
        let path = path.map(|p| p.to_string_lossy());
        self.emit(&MachineEvent::BinaryResolved {
            provider,
            path: path.as_deref(),
        });
    }

    fn on_instance_started(
        &mut self,
        config: &Path,
        xds_port: u32,
        pid: Option<u32>,
        container_id: Option<&str>,
    ) {
        let config = config.to_string_lossy();
        self.emit(&MachineEvent::InstanceStarted {
            config: &config,
            xds_port,
            pid,
            container_id,
        });
    }

    fn on_instance_ready(&mut self, admin_port: u16) {
        self.emit(&MachineEvent::InstanceReady { admin_port });
    }

    fn on_instance_stopped(&mut self) {
        self.emit(&MachineEvent::InstanceStopped);
    }

    fn on_error(&mut self, message: &str) {
        self.emit(&MachineEvent::Error { message });
    }
}

// =============================================================================
// Human Reporter
// =============================================================================

/// Human Reporter - outputs readable text to stderr
pub struct HumanReporter;

impl Reporter for HumanReporter {
    fn on_binary_resolved(&mut self, provider: &str, path: Option<&Path>) {
        match path {
            Some(path) => eprintln!("[envoy-harness] envoy ({}): {}", provider, path.display()),
            None => eprintln!("[envoy-harness] envoy ({}): runs in docker", provider),
        }
    }

    fn on_instance_started(
        &mut self,
        config: &Path,
        xds_port: u32,
        pid: Option<u32>,
        container_id: Option<&str>,
    ) {
        let handle = match (pid, container_id) {
            (Some(pid), _) => format!("pid {}", pid),
            (None, Some(id)) => format!("container {}", id),
            (None, None) => "unknown handle".to_string(),
        };
        eprintln!(
            "[envoy-harness] envoy started ({}), xDS port {}, config {}",
            handle,
            xds_port,
            config.display()
        );
    }

    fn on_instance_ready(&mut self, admin_port: u16) {
        eprintln!("[envoy-harness] admin port {} is ready", admin_port);
    }

    fn on_instance_stopped(&mut self) {
        eprintln!("[envoy-harness] envoy stopped, resources released.");
    }

    fn on_error(&mut self, message: &str) {
        eprintln!("[envoy-harness] error: {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(reporter: JsonReporter<Vec<u8>>) -> Vec<serde_json::Value> {
        String::from_utf8(reporter.into_inner())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_json_binary_resolved() {
        let mut reporter = JsonReporter::new(Vec::new());
        reporter.on_binary_resolved("explicit", Some(Path::new("/usr/bin/proxybin")));
        reporter.on_binary_resolved("container", None);

        let events = lines(reporter);
        assert_eq!(events[0]["event"], "binary_resolved");
        assert_eq!(events[0]["path"], "/usr/bin/proxybin");
        assert!(events[1].get("path").is_none());
    }

    #[test]
    fn test_json_instance_started_skips_missing_handle() {
        let mut reporter = JsonReporter::new(Vec::new());
        reporter.on_instance_started(Path::new("/tmp/envoyX/envoyconfig.yaml"), 9901, Some(42), None);

        let events = lines(reporter);
        assert_eq!(events[0]["event"], "instance_started");
        assert_eq!(events[0]["xds_port"], 9901);
        assert_eq!(events[0]["pid"], 42);
        assert!(events[0].get("container_id").is_none());
    }

    #[test]
    fn test_json_unit_events() {
        let mut reporter = JsonReporter::new(Vec::new());
        reporter.on_instance_ready(19000);
        reporter.on_instance_stopped();
        reporter.on_error("boom");

        let events = lines(reporter);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["admin_port"], 19000);
        assert_eq!(events[1]["event"], "instance_stopped");
        assert_eq!(events[2]["message"], "boom");
    }

    #[test]
    fn test_human_reporter_implements_reporter() {
        fn accepts_reporter<T: Reporter>(_r: T) {}
        accepts_reporter(HumanReporter);
    }
}
