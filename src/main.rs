//! CLI Entry Point for homecam
//!
//! Provides command-line access to:
//! - Watching a camera stream with automatic reconnection
//! - One-shot health probes against the camera server
//! - Camera stream authorization against the configured backend
//! - The account password policy
//!
//! # Usage
//!
//! Watch a camera until Ctrl+C (type `r` to reload or `t` to test the
//! connection while it runs):
//! ```bash
//! homecam watch --address 192.168.1.40
//! ```
//!
//! Probe its health endpoint:
//! ```bash
//! homecam probe --address 192.168.1.40
//! ```
//!
//! Check that an account may view the camera:
//! ```bash
//! HOMECAM_PASSWORD=... homecam authorize --email me@example.com
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use homecam::auth::AuthService;
use homecam::camera_access::CameraAccess;
use homecam::config::HomecamConfig;
use homecam::controller::{ControllerOptions, ManualAction, StreamController};
use homecam::logging;
use homecam::monitor::{self, DeviceMonitor, HttpReachability};
use homecam::probe::{HealthProbe, HttpHealthProbe};
use homecam::rest_gateway;
use homecam::transport::HttpStreamTransport;
use homecam::AppError;
use homecam_core::clock::SystemClock;
use homecam_core::target::StreamTarget;
use homecam_core::validation::validate_password;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "homecam")]
#[command(about = "Home camera stream watcher", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = homecam::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera stream and log every state change
    Watch {
        /// Device address (overrides monitor.address)
        #[arg(long)]
        address: Option<String>,

        /// Treat the device as online instead of running reachability checks
        #[arg(long)]
        assume_online: bool,
    },

    /// Probe the camera's health endpoint once
    Probe {
        /// Device address (overrides monitor.address)
        #[arg(long)]
        address: Option<String>,
    },

    /// Sign in and check that the account may view the camera stream
    Authorize {
        /// Account email
        #[arg(long)]
        email: String,

        /// Account password
        #[arg(long, env = "HOMECAM_PASSWORD", hide_env_values = true)]
        password: String,

        /// Device address (overrides monitor.address)
        #[arg(long)]
        address: Option<String>,
    },

    /// Check a password against the account policy
    CheckPassword {
        /// Password to check
        password: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::CheckPassword { password } = &cli.command {
        return check_password(password);
    }

    let config = HomecamConfig::load_validated(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config).map_err(AppError::Tracing)?;

    match cli.command {
        Commands::Watch {
            address,
            assume_online,
        } => {
            let target = resolve_target(&config, address)?;
            watch(&config, target, assume_online).await
        }
        Commands::Probe { address } => {
            let target = resolve_target(&config, address)?;
            probe(&config, target).await
        }
        Commands::Authorize {
            email,
            password,
            address,
        } => {
            let target = resolve_target(&config, address)?;
            authorize(&config, target, &email, &password).await
        }
        Commands::CheckPassword { .. } => Ok(()),
    }
}

fn resolve_target(config: &HomecamConfig, address: Option<String>) -> Result<StreamTarget> {
    let address = address.or_else(|| config.monitor.address.clone());
    Ok(StreamTarget::require(address.as_deref(), true)?)
}

async fn watch(config: &HomecamConfig, target: StreamTarget, assume_online: bool) -> Result<()> {
    println!("📷 Watching {}", target.stream_url());

    let clock = Arc::new(SystemClock);
    let controller = StreamController::spawn(
        Arc::new(HttpStreamTransport::new(config.stream.probe_timeout())?),
        Arc::new(HttpHealthProbe::new(config.stream.probe_timeout())?),
        clock.clone(),
        ControllerOptions {
            policy: config.stream.retry_policy(),
            motion: config.stream.motion(),
            motion_seed: None,
        },
    );

    let device_monitor = if assume_online {
        controller.handle().set_target(Some(target))?;
        None
    } else {
        let reach = Arc::new(HttpReachability::new(config.monitor.check_timeout())?);
        let device_monitor =
            DeviceMonitor::spawn(target, reach, clock, config.monitor.check_interval());
        monitor::link(&device_monitor, controller.handle());
        Some(device_monitor)
    };

    let mut snapshots = controller.subscribe();
    let mut console = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;
    println!("Type r + Enter to reload, t + Enter to test the connection, Ctrl+C to stop");
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                println!("{}", serde_json::to_string(&snapshot)?);
                if snapshot.needs_manual_action {
                    println!("⚠️  Retries exhausted; type r to retry or t to test");
                }
            }
            line = console.next_line(), if console_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<ManualAction>() {
                    Ok(action) => controller.handle().perform(action)?,
                    Err(err) => println!("❓ {}", err),
                },
                // stdin closed or unreadable; keep watching without it
                Ok(None) | Err(_) => console_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("\n👋 Shutting down...");
    if let Some(device_monitor) = device_monitor {
        device_monitor.shutdown().await;
    }
    controller.shutdown().await;
    Ok(())
}

async fn probe(config: &HomecamConfig, target: StreamTarget) -> Result<()> {
    let url = target.health_url();
    let prober = HttpHealthProbe::new(config.stream.probe_timeout())?;
    match prober.probe(&url).await {
        Ok(report) => {
            println!("✅ {}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(err) => bail!("health probe of {} failed: {}", url, err),
    }
}

async fn authorize(
    config: &HomecamConfig,
    target: StreamTarget,
    email: &str,
    password: &str,
) -> Result<()> {
    let gateway = rest_gateway::connect(config.backend.as_ref(), Arc::new(SystemClock))?;
    let auth = AuthService::new(gateway.clone());
    let session = auth.sign_in(email, password).await?;
    println!("🔑 Signed in as {}", session.user.email);

    let access = CameraAccess::new(gateway, config.camera.device_id.clone(), target);
    let result = access.authorize().await;
    auth.sign_out().await?;
    match result {
        Ok(grant) => {
            println!("✅ {}", serde_json::to_string_pretty(&grant)?);
            Ok(())
        }
        Err(err) => bail!("{} (HTTP {})", err, err.status()),
    }
}

fn check_password(password: &str) -> Result<()> {
    let result = validate_password(password);
    if result.is_valid() {
        println!("✅ Password meets the policy");
        Ok(())
    } else {
        for error in &result.errors {
            println!("❌ {}", error);
        }
        bail!("password rejected")
    }
}
