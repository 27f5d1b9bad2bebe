//! `compose-supervisor`: watches a services directory and keeps every compose
//! project in it up to date.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::dbg_macro,
	deprecated
)]

use cs_core::{DockerCompose, Supervisor, SupervisorConfig, DEFAULT_BASE_PATH};

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
	Debug,
	Info,
	Warn,
	Error,
}

impl From<LogLevel> for LevelFilter {
	fn from(level: LogLevel) -> Self {
		match level {
			LogLevel::Debug => Self::DEBUG,
			LogLevel::Info => Self::INFO,
			LogLevel::Warn => Self::WARN,
			LogLevel::Error => Self::ERROR,
		}
	}
}

#[derive(Parser, Debug)]
#[command(
	name = "compose-supervisor",
	version,
	about = "Keeps compose services in sync with their folders"
)]
struct Args {
	/// Directory whose subdirectories are compose services
	#[arg(long, env = "BASE_PATH", default_value = DEFAULT_BASE_PATH)]
	base_path: PathBuf,

	/// Seconds a service must stay quiet before its changes are applied
	#[arg(long = "wait-seconds", env = "WAIT_SECONDS", value_parser = parse_seconds, default_value = "1")]
	wait: Duration,

	#[arg(long, env = "LOG_LEVEL", value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
	log_level: LogLevel,

	/// Program providing the `compose` subcommand
	#[arg(long, env = "COMPOSE_BIN", default_value = "docker")]
	compose_bin: String,

	/// Upper bound in seconds for a single compose action
	#[arg(long = "compose-timeout-seconds", env = "COMPOSE_TIMEOUT_SECONDS", value_parser = parse_seconds, default_value = "300")]
	compose_timeout: Duration,
}

impl Args {
	fn supervisor_config(&self) -> SupervisorConfig {
		SupervisorConfig::new(&self.base_path)
			.with_wait(self.wait)
			.with_action_timeout(self.compose_timeout)
	}
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
	let seconds = value
		.trim()
		.parse::<f64>()
		.map_err(|e| format!("not a number of seconds: {e}"))?;

	Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration: {e}"))
}

/// `RUST_LOG` wins over `LOG_LEVEL` when set.
fn init_logging(level: LogLevel) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		EnvFilter::builder()
			.with_default_directive(LevelFilter::from(level).into())
			.parse_lossy("")
	});

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_writer(std::io::stderr).with_target(false))
		.init();
}

async fn shutdown_signal() -> Result<&'static str> {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.context("failed to install Ctrl+C handler")
			.map(|()| "SIGINT")
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.context("failed to install SIGTERM handler")?
			.recv()
			.await;
		Ok("SIGTERM")
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<Result<&'static str>>();

	tokio::select! {
		received = ctrl_c => received,
		received = terminate => received,
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	init_logging(args.log_level);

	info!(
		base_path = %args.base_path.display(),
		wait = ?args.wait,
		compose_bin = %args.compose_bin,
		compose_timeout = ?args.compose_timeout,
		"Starting compose supervisor;"
	);

	let executor = Arc::new(DockerCompose::new(&args.compose_bin));
	let supervisor = Supervisor::start(args.supervisor_config(), executor)
		.await
		.with_context(|| format!("unable to supervise {}", args.base_path.display()))?;

	let outcome = tokio::select! {
		received = shutdown_signal() => received.map(|signal| {
			info!(signal, "Received shutdown signal, shutting down gracefully;");
		}),
		e = supervisor.fatal_error() => {
			error!(%e, "Supervisor can't continue, shutting down;");
			Err(anyhow::Error::new(e).context("services directory is no longer watched"))
		}
	};

	supervisor.shutdown().await;

	outcome
}
