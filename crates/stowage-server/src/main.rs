// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stowage backup server binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stowage_server_config::{LogFormat, LoggingConfig, ServerConfig};
use stowage_server_db::BackupRepository;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod engine;
mod version;

use engine::Engine;

/// Stowage - scheduled database backups.
#[derive(Parser, Debug)]
#[command(name = "stowage-server", about = "Database backup orchestration server", version)]
struct Args {
	/// Path to a TOML config file (defaults to /etc/stowage/server.toml)
	#[arg(long, global = true, env = "STOWAGE_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
	/// Run the scheduler until interrupted (default)
	Serve,
	/// Back up one connection now and print the record
	Backup { connection_id: String },
	/// Create or replace a connection's schedule. A running server picks it
	/// up within `backup.schedule_sync_secs`.
	Schedule {
		connection_id: String,
		/// Six fields: sec min hour day-of-month month day-of-week
		cron: String,
		#[arg(long, default_value_t = 0)]
		retention_days: u32,
	},
	/// Change an existing schedule
	UpdateSchedule {
		connection_id: String,
		cron: String,
		#[arg(long, default_value_t = 0)]
		retention_days: u32,
	},
	/// Stop scheduled backups for a connection
	DisableSchedule { connection_id: String },
	/// Print backup statistics for a user
	Stats { user_id: String },
	/// Show version and build information
	Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	let command = args.command.unwrap_or(Command::Serve);

	if command == Command::Version {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => stowage_server_config::load_config_with_file(path)?,
		None => stowage_server_config::load_config()?,
	};
	init_tracing(&config.logging);

	let engine = Engine::build(&config).await?;
	let result = run(&engine, &config, command).await;
	engine.shutdown().await;
	result
}

async fn run(engine: &Engine, config: &ServerConfig, command: Command) -> anyhow::Result<()> {
	match command {
		Command::Serve => {
			tracing::info!(
				database = %config.database.url,
				backup_dir = %config.backup.dir.display(),
				"starting stowage-server"
			);
			engine.manager.start().await?;

			let mut sync = tokio::time::interval(config.backup.schedule_sync_interval);
			sync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			sync.tick().await;
			let shutdown = tokio::signal::ctrl_c();
			tokio::pin!(shutdown);
			loop {
				tokio::select! {
					signal = &mut shutdown => {
						signal?;
						break;
					}
					_ = sync.tick() => {
						if let Err(e) = engine.manager.reconcile().await {
							tracing::warn!(error = %e, "failed to reconcile schedules");
						}
					}
				}
			}
			tracing::info!("received shutdown signal");
		}
		Command::Backup { connection_id } => {
			let record = engine.manager.run_now(&connection_id).await?;
			println!("{}", serde_json::to_string_pretty(&record)?);
		}
		Command::Schedule {
			connection_id,
			cron,
			retention_days,
		} => {
			let schedule = engine
				.manager
				.schedule(&connection_id, &cron, retention_days)
				.await?;
			println!("{}", serde_json::to_string_pretty(&schedule)?);
		}
		Command::UpdateSchedule {
			connection_id,
			cron,
			retention_days,
		} => {
			let schedule = engine
				.manager
				.update(&connection_id, &cron, retention_days)
				.await?;
			println!("{}", serde_json::to_string_pretty(&schedule)?);
		}
		Command::DisableSchedule { connection_id } => {
			engine.manager.disable(&connection_id).await?;
			println!("schedule for {connection_id} disabled");
		}
		Command::Stats { user_id } => {
			let stats = engine.backups.stats(&user_id).await?;
			println!("{}", serde_json::to_string_pretty(&stats)?);
		}
		Command::Version => {}
	}
	Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
	let registry = tracing_subscriber::registry().with(filter);
	match logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serve_is_the_default() {
		let args = Args::try_parse_from(["stowage-server"]).unwrap();
		assert!(args.command.is_none());
	}

	#[test]
	fn schedule_takes_cron_and_retention() {
		let args = Args::try_parse_from([
			"stowage-server",
			"schedule",
			"c1",
			"0 0 2 * * *",
			"--retention-days",
			"7",
		])
		.unwrap();
		assert_eq!(
			args.command,
			Some(Command::Schedule {
				connection_id: "c1".into(),
				cron: "0 0 2 * * *".into(),
				retention_days: 7,
			})
		);
	}

	#[test]
	fn config_flag_is_global() {
		let args =
			Args::try_parse_from(["stowage-server", "stats", "u1", "--config", "/tmp/s.toml"]).unwrap();
		assert_eq!(args.config, Some(PathBuf::from("/tmp/s.toml")));
		assert_eq!(args.command, Some(Command::Stats { user_id: "u1".into() }));
	}

	#[test]
	fn disable_requires_connection() {
		assert!(Args::try_parse_from(["stowage-server", "disable-schedule"]).is_err());
	}
}
