//! CLI Integration Tests
//!
//! Tests for:
//! - Subcommand and flag recognition
//! - JSON output format selection

use clap::Parser;
use envoy_harness::config::{Cli, Commands, OutputFormat};
use envoy_harness::reporter::{JsonReporter, Reporter};
use std::path::{Path, PathBuf};

#[test]
fn test_render_defaults() {
    let cli = Cli::try_parse_from(["envoy-harness", "render"]).unwrap();
    assert_eq!(
        cli.command,
        Commands::Render {
            address: "localhost".to_string(),
            port: 8081,
        }
    );
}

#[test]
fn test_render_with_address_and_port() {
    let cli = Cli::try_parse_from([
        "envoy-harness",
        "render",
        "--address",
        "10.0.0.3",
        "--port",
        "9901",
    ])
    .unwrap();
    assert_eq!(
        cli.command,
        Commands::Render {
            address: "10.0.0.3".to_string(),
            port: 9901,
        }
    );
}

#[test]
fn test_run_flags() {
    let cli = Cli::try_parse_from([
        "envoy-harness",
        "--format",
        "json",
        "--config",
        "harness.toml",
        "run",
        "--port",
        "9000",
        "--wait-ready",
        "15",
    ])
    .unwrap();
    assert_eq!(cli.format, OutputFormat::Json);
    assert_eq!(cli.config, Some(PathBuf::from("harness.toml")));
    assert_eq!(
        cli.command,
        Commands::Run {
            port: 9000,
            wait_ready: Some(15),
        }
    );
}

#[test]
fn test_address_subcommand() {
    let cli = Cli::try_parse_from(["envoy-harness", "address"]).unwrap();
    assert_eq!(cli.command, Commands::Address);
    assert!(cli.config.is_none());
}

#[test]
fn test_subcommand_is_required() {
    assert!(Cli::try_parse_from(["envoy-harness"]).is_err());
}

#[test]
fn test_rejects_non_numeric_port() {
    assert!(Cli::try_parse_from(["envoy-harness", "run", "--port", "abc"]).is_err());
}

#[test]
fn test_output_format_variants() {
    assert_ne!(OutputFormat::Human, OutputFormat::Json);
    assert_eq!(OutputFormat::default(), OutputFormat::Human);
}

#[test]
fn test_json_reporter_emits_ndjson() {
    let mut reporter = JsonReporter::new(Vec::new());
    reporter.on_binary_resolved("explicit", Some(Path::new("/usr/bin/proxybin")));
    reporter.on_instance_started(Path::new("/tmp/envoy1/envoyconfig.yaml"), 8081, None, Some("abc"));
    reporter.on_instance_stopped();

    let out = String::from_utf8(reporter.into_inner()).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("\"event\":\"binary_resolved\""));
    assert!(lines[1].contains("\"container_id\":\"abc\""));
    assert_eq!(lines[2], "{\"event\":\"instance_stopped\"}");
}
