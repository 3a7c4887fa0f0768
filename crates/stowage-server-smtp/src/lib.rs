// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SMTP client for Stowage failure alerts.
//!
//! Each user brings their own relay, so a client is built per delivery from
//! that user's settings. Connections are always encrypted and always
//! authenticated; the password travels as a [`SecretString`].
//!
//! ```no_run
//! use stowage_server_smtp::{SmtpClient, SmtpConfig, TlsMode};
//! use stowage_common_secret::SecretString;
//!
//! # async fn example() -> Result<(), stowage_server_smtp::SmtpError> {
//! let client = SmtpClient::new(SmtpConfig {
//!     host: "smtp.example.com".to_string(),
//!     port: 465,
//!     username: "alerts@example.com".to_string(),
//!     password: SecretString::new("app-password".to_string()),
//!     from_address: "alerts@example.com".to_string(),
//!     tls: TlsMode::Tls,
//! })?;
//! client.send_text("oncall@example.com", "Backup Failed", "pg_dump exited 1").await?;
//! # Ok(())
//! # }
//! ```

use lettre::{
	message::{header::ContentType, Mailbox},
	transport::smtp::authentication::Credentials,
	AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};
use stowage_common_secret::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
	/// Failed to connect to the SMTP server.
	#[error("connection failed: {0}")]
	Connection(String),

	#[error("send failed: {0}")]
	Send(String),

	/// Missing or invalid settings.
	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("invalid email address: {0}")]
	Address(String),
}

/// How the connection is encrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
	/// TLS from the first byte (SMTPS, usually port 465).
	#[default]
	Tls,
	/// Plain connection upgraded with STARTTLS (usually port 587).
	StartTls,
}

impl TlsMode {
	/// Port 587 conventionally means STARTTLS; everything else gets implicit TLS.
	pub fn for_port(port: u16) -> Self {
		if port == 587 {
			Self::StartTls
		} else {
			Self::Tls
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
	pub host: String,
	pub port: u16,
	pub username: String,
	pub password: SecretString,
	/// Envelope sender; alerts are sent from the authenticated account.
	pub from_address: String,
	#[serde(default)]
	pub tls: TlsMode,
}

impl SmtpConfig {
	fn validate(&self) -> Result<(), SmtpError> {
		if self.host.trim().is_empty() {
			return Err(SmtpError::Config("host is required".into()));
		}
		if self.port == 0 {
			return Err(SmtpError::Config("port is required".into()));
		}
		if self.username.trim().is_empty() || self.password.is_blank() {
			return Err(SmtpError::Config("username and password are required".into()));
		}
		Ok(())
	}
}

pub struct SmtpClient {
	transport: AsyncSmtpTransport<Tokio1Executor>,
	from_mailbox: Mailbox,
}

impl SmtpClient {
	/// Build the transport. No connection is made until a message is sent.
	///
	/// # Errors
	///
	/// [`SmtpError::Config`] for missing fields, [`SmtpError::Address`] for a
	/// bad sender, [`SmtpError::Connection`] if the TLS relay cannot be set up.
	#[tracing::instrument(
		name = "smtp_client_new",
		skip(config),
		fields(host = %config.host, port = %config.port, tls = ?config.tls)
	)]
	pub fn new(config: SmtpConfig) -> Result<Self, SmtpError> {
		config.validate()?;

		let from_mailbox: Mailbox = config
			.from_address
			.parse()
			.map_err(|e| SmtpError::Address(format!("{e}")))?;

		let builder = match config.tls {
			TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host),
			TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host),
		}
		.map_err(|e| SmtpError::Connection(format!("{e}")))?;

		let credentials = Credentials::new(config.username, config.password.expose().clone());
		let transport = builder
			.port(config.port)
			.credentials(credentials)
			.build();

		tracing::debug!("SMTP client initialized");

		Ok(Self {
			transport,
			from_mailbox,
		})
	}

	/// Send a plain-text message.
	#[tracing::instrument(
		name = "smtp_send_text",
		skip(self, body),
		fields(to = %to, subject = %subject)
	)]
	pub async fn send_text(&self, to: &str, subject: &str, body: &str) -> Result<(), SmtpError> {
		let message = build_message(&self.from_mailbox, to, subject, body)?;

		self
			.transport
			.send(message)
			.await
			.map_err(|e| SmtpError::Send(format!("{e}")))?;

		tracing::info!("email sent");
		Ok(())
	}
}

fn build_message(from: &Mailbox, to: &str, subject: &str, body: &str) -> Result<Message, SmtpError> {
	let to_mailbox: Mailbox = to.parse().map_err(|e| SmtpError::Address(format!("{e}")))?;

	Message::builder()
		.from(from.clone())
		.to(to_mailbox)
		.subject(subject)
		.header(ContentType::TEXT_PLAIN)
		.body(body.to_string())
		.map_err(|e| SmtpError::Send(format!("failed to build message: {e}")))
}

pub fn is_valid_email(email: &str) -> bool {
	email.parse::<Mailbox>().is_ok()
}
