use anyhow::{Context, Result};
use clap::Parser;
use envoy_harness::address::resolve_control_plane_addr;
use envoy_harness::bootstrap::{render_bootstrap, ADMIN_PORT};
use envoy_harness::config::{Cli, Commands};
use envoy_harness::reporter::{self, Reporter};
use envoy_harness::{logging, signals, Cleanup, EnvoyFactory, HarnessConfig};
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config = HarnessConfig::load(cli.config.as_deref()).context("failed to load harness config")?;
    let mut reporter = reporter::for_format(&cli.format);

    let result = match cli.command {
        Commands::Render { address, port } => {
            print!("{}", render_bootstrap(&address, port));
            Ok(())
        }
        Commands::Address => resolve_control_plane_addr(config.control_plane_addr.as_deref())
            .map(|addr| println!("{}", addr))
            .context("failed to resolve control-plane address"),
        Commands::Run { port, wait_ready } => run(config, port, wait_ready, reporter.as_mut()),
    };

    if let Err(e) = &result {
        reporter.on_error(&format!("{:#}", e));
    }
    result
}

/// Launch one envoy and keep it up until SIGINT/SIGTERM/SIGQUIT
fn run(config: HarnessConfig, port: u32, wait_ready: Option<u64>, reporter: &mut dyn Reporter) -> Result<()> {
    let mut signals = signals::register_shutdown().context("failed to install signal handlers")?;

    let mut factory = EnvoyFactory::new(config).context("failed to resolve envoy")?;
    if let Some(provider) = factory.provider() {
        reporter.on_binary_resolved(provider.kind(), provider.binary_path());
    }

    let mut instance = factory.new_instance().context("failed to prepare envoy instance")?;
    let served = (|| -> Result<()> {
        instance.run_with_port(port).context("failed to start envoy")?;
        reporter.on_instance_started(
            instance.config_path(),
            port,
            instance.pid(),
            instance.container_id(),
        );

        if let Some(secs) = wait_ready {
            instance
                .wait_ready(Duration::from_secs(secs))
                .context("envoy never became ready")?;
            reporter.on_instance_ready(ADMIN_PORT);
        }

        signals::wait_for_shutdown(&mut signals);
        Ok(())
    })();

    let stopped = instance.clean().context("failed to stop envoy");
    let cleaned = factory.clean().context("failed to clean envoy factory");
    if stopped.is_ok() {
        reporter.on_instance_stopped();
    }

    served.and(stopped).and(cleaned)
}
