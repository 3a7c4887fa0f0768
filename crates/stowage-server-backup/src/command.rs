// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-engine dump command construction.
//!
//! Each engine has a [`DumpStrategy`] that turns a target endpoint and an
//! output path into a [`DumpCommand`]. Credentials are held as secrets and
//! only exposed when the process is spawned; the `Display` form is safe to log.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use stowage_backup_core::EngineKind;
use stowage_common_secret::{SecretString, REDACTED};

/// The endpoint a dump tool talks to. When a tunnel is open this is the local
/// loopback side of it, not the profile's host.
#[derive(Debug, Clone)]
pub struct DumpTarget<'a> {
	pub host: &'a str,
	pub port: u16,
	pub username: &'a str,
	pub password: &'a SecretString,
	pub database: &'a str,
}

#[derive(Debug, Clone)]
enum Arg {
	Plain(String),
	Secret {
		prefix: &'static str,
		value: SecretString,
	},
}

#[derive(Debug, Clone)]
pub struct DumpCommand {
	program: PathBuf,
	args: Vec<Arg>,
	envs: Vec<(&'static str, SecretString)>,
}

impl DumpCommand {
	fn new(program: &Path) -> Self {
		Self {
			program: program.to_path_buf(),
			args: Vec::new(),
			envs: Vec::new(),
		}
	}

	fn arg(mut self, value: impl Into<String>) -> Self {
		self.args.push(Arg::Plain(value.into()));
		self
	}

	fn flag(self, flag: &str, value: impl Into<String>) -> Self {
		self.arg(flag).arg(value)
	}

	fn secret_arg(mut self, prefix: &'static str, value: &SecretString) -> Self {
		self.args.push(Arg::Secret {
			prefix,
			value: value.clone(),
		});
		self
	}

	fn env(mut self, key: &'static str, value: &SecretString) -> Self {
		self.envs.push((key, value.clone()));
		self
	}

	pub fn program(&self) -> &Path {
		&self.program
	}

	/// Arguments with credentials in place. Never log these.
	pub fn exposed_args(&self) -> Vec<String> {
		self
			.args
			.iter()
			.map(|arg| match arg {
				Arg::Plain(s) => s.clone(),
				Arg::Secret { prefix, value } => format!("{prefix}{}", value.expose()),
			})
			.collect()
	}

	pub fn env_names(&self) -> impl Iterator<Item = &'static str> + '_ {
		self.envs.iter().map(|(k, _)| *k)
	}

	/// A spawnable command with piped output, closed stdin and kill-on-drop.
	pub fn to_command(&self) -> tokio::process::Command {
		let mut cmd = tokio::process::Command::new(&self.program);
		cmd.args(self.exposed_args());
		for (key, value) in &self.envs {
			cmd.env(key, value.expose());
		}
		cmd.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		cmd
	}
}

impl fmt::Display for DumpCommand {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (key, _) in &self.envs {
			write!(f, "{key}={REDACTED} ")?;
		}
		write!(f, "{}", self.program.display())?;
		for arg in &self.args {
			match arg {
				Arg::Plain(s) => write!(f, " {s}")?,
				Arg::Secret { prefix, .. } => write!(f, " {prefix}{REDACTED}")?,
			}
		}
		Ok(())
	}
}

pub trait DumpStrategy: Send + Sync {
	fn build(&self, program: &Path, target: &DumpTarget<'_>, output: &Path) -> DumpCommand;
}

/// `pg_dump`, password through `PGPASSWORD`.
pub struct PgDump;

impl DumpStrategy for PgDump {
	fn build(&self, program: &Path, target: &DumpTarget<'_>, output: &Path) -> DumpCommand {
		let mut cmd = DumpCommand::new(program)
			.flag("-h", target.host)
			.flag("-p", target.port.to_string())
			.flag("-U", target.username)
			.flag("-d", target.database)
			.flag("-f", output.display().to_string());
		if !target.password.is_blank() {
			cmd = cmd.env("PGPASSWORD", target.password);
		}
		cmd
	}
}

/// `mysqldump`, shared by MySQL and MariaDB.
pub struct MySqlDump;

impl DumpStrategy for MySqlDump {
	fn build(&self, program: &Path, target: &DumpTarget<'_>, output: &Path) -> DumpCommand {
		let mut cmd = DumpCommand::new(program)
			.flag("-h", target.host)
			.flag("-P", target.port.to_string())
			.flag("-u", target.username);
		// A bare -p makes mysqldump prompt on the tty.
		if !target.password.is_blank() {
			cmd = cmd.secret_arg("-p", target.password);
		}
		cmd.arg(target.database)
			.flag("-r", output.display().to_string())
	}
}

pub struct MongoDump;

impl DumpStrategy for MongoDump {
	fn build(&self, program: &Path, target: &DumpTarget<'_>, output: &Path) -> DumpCommand {
		let mut cmd = DumpCommand::new(program)
			.flag("--host", target.host)
			.flag("--port", target.port.to_string())
			.flag("--db", target.database)
			.flag("--out", output.display().to_string());
		if !target.username.is_empty() {
			cmd = cmd.flag("--username", target.username);
		}
		if !target.password.is_blank() {
			cmd = cmd.arg("--password").secret_arg("", target.password);
		}
		cmd
	}
}

/// `redis-cli --rdb`. The database name doubles as the logical db index
/// when it is numeric.
pub struct RedisDump;

impl DumpStrategy for RedisDump {
	fn build(&self, program: &Path, target: &DumpTarget<'_>, output: &Path) -> DumpCommand {
		let mut cmd = DumpCommand::new(program)
			.flag("-h", target.host)
			.flag("-p", target.port.to_string());
		if !target.password.is_blank() {
			cmd = cmd.arg("-a").secret_arg("", target.password);
		}
		if let Ok(index) = target.database.trim().parse::<u32>() {
			cmd = cmd.flag("-n", index.to_string());
		}
		cmd.flag("--rdb", output.display().to_string())
	}
}

pub fn strategy_for(engine: EngineKind) -> &'static dyn DumpStrategy {
	match engine {
		EngineKind::Postgresql => &PgDump,
		EngineKind::Mysql | EngineKind::Mariadb => &MySqlDump,
		EngineKind::Mongodb => &MongoDump,
		EngineKind::Redis => &RedisDump,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn build(engine: EngineKind, password: &str, database: &str) -> DumpCommand {
		let password = SecretString::from(password);
		let target = DumpTarget {
			host: "db.internal",
			port: 6000,
			username: "backup",
			password: &password,
			database,
		};
		strategy_for(engine).build(
			Path::new("/usr/bin/tool"),
			&target,
			Path::new("/var/backups/app_20240101000000.sql"),
		)
	}

	#[test]
	fn pg_dump_keeps_password_out_of_argv() {
		let cmd = build(EngineKind::Postgresql, "hunter2", "app");
		assert_eq!(
			cmd.exposed_args(),
			[
				"-h",
				"db.internal",
				"-p",
				"6000",
				"-U",
				"backup",
				"-d",
				"app",
				"-f",
				"/var/backups/app_20240101000000.sql"
			]
		);
		assert_eq!(cmd.env_names().collect::<Vec<_>>(), ["PGPASSWORD"]);
	}

	#[test]
	fn pg_dump_without_password_sets_no_env() {
		let cmd = build(EngineKind::Postgresql, "", "app");
		assert_eq!(cmd.env_names().count(), 0);
	}

	#[test]
	fn mysqldump_attaches_password_to_flag() {
		let cmd = build(EngineKind::Mariadb, "s3cret", "shop");
		assert_eq!(
			cmd.exposed_args(),
			[
				"-h",
				"db.internal",
				"-P",
				"6000",
				"-u",
				"backup",
				"-ps3cret",
				"shop",
				"-r",
				"/var/backups/app_20240101000000.sql"
			]
		);
		assert!(!build(EngineKind::Mysql, "", "shop")
			.exposed_args()
			.iter()
			.any(|a| a.starts_with("-p")));
	}

	#[test]
	fn mongodump_credentials_only_when_present() {
		let with = build(EngineKind::Mongodb, "pw", "events").exposed_args();
		assert!(with.windows(2).any(|w| w == ["--username", "backup"]));
		assert!(with.windows(2).any(|w| w == ["--password", "pw"]));
		assert!(with.windows(2).any(|w| w == ["--out", "/var/backups/app_20240101000000.sql"]));

		let without = build(EngineKind::Mongodb, "", "events").exposed_args();
		assert!(!without.contains(&"--password".to_string()));
	}

	#[test]
	fn redis_db_index_and_auth() {
		let args = build(EngineKind::Redis, "pw", "3").exposed_args();
		assert!(args.windows(2).any(|w| w == ["-a", "pw"]));
		assert!(args.windows(2).any(|w| w == ["-n", "3"]));
		assert_eq!(args[args.len() - 2], "--rdb");

		let args = build(EngineKind::Redis, "", "cache").exposed_args();
		assert!(!args.contains(&"-a".to_string()));
		assert!(!args.contains(&"-n".to_string()));
	}

	#[test]
	fn display_redacts_credentials() {
		for engine in EngineKind::ALL {
			let rendered = build(engine, "topsecret", "app").to_string();
			assert!(!rendered.contains("topsecret"), "{engine}: {rendered}");
		}
		let rendered = build(EngineKind::Mysql, "topsecret", "app").to_string();
		assert!(rendered.contains(&format!("-p{REDACTED}")));
		let rendered = build(EngineKind::Postgresql, "topsecret", "app").to_string();
		assert!(rendered.starts_with(&format!("PGPASSWORD={REDACTED} /usr/bin/tool")));
	}
}
