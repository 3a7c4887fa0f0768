// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Failure alerts.
//!
//! The pipeline hands failures to [`NotificationDispatcher::notify_failure`],
//! which only enqueues. A single worker drains the bounded queue in order:
//! it resolves the owning user's preferences, writes the dashboard row, then
//! delivers webhook and email alerts. Every problem on the worker side is
//! logged and dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stowage_backup_core::{FailureMetadata, Notification, SmtpSettings};
use stowage_common_secret::{SecretCipher, SecretError};
use stowage_server_db::{ConnectionRegistry, NotificationRepository, SettingsStore};
use stowage_server_smtp::{SmtpClient, SmtpConfig, TlsMode};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const EMAIL_SUBJECT: &str = "Backup Failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
	Dashboard,
	Webhook,
	Email,
}

impl fmt::Display for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Dashboard => "dashboard",
			Self::Webhook => "webhook",
			Self::Email => "email",
		})
	}
}

#[derive(Debug, Error)]
pub enum NotifyError {
	#[error("{channel} notification failed: {message}")]
	ChannelFailed { channel: Channel, message: String },

	#[error("incomplete SMTP configuration")]
	IncompleteSmtp,

	#[error("failed to decrypt SMTP password: {0}")]
	Secret(#[from] SecretError),
}

impl NotifyError {
	fn channel(channel: Channel, err: impl fmt::Display) -> Self {
		Self::ChannelFailed {
			channel,
			message: err.to_string(),
		}
	}
}

/// Delivery of external alerts.
#[async_trait]
pub trait AlertTransport: Send + Sync {
	async fn post_webhook(&self, url: &str, payload: &FailureMetadata) -> Result<(), NotifyError>;

	async fn send_email(
		&self,
		smtp: SmtpConfig,
		to: &str,
		subject: &str,
		body: &str,
	) -> Result<(), NotifyError>;
}

/// `reqwest` for webhooks, `lettre` for mail.
pub struct LiveTransport {
	http: reqwest::Client,
	webhook_timeout: Duration,
}

impl LiveTransport {
	pub fn new(webhook_timeout: Duration) -> Self {
		Self {
			http: reqwest::Client::new(),
			webhook_timeout,
		}
	}
}

#[async_trait]
impl AlertTransport for LiveTransport {
	async fn post_webhook(&self, url: &str, payload: &FailureMetadata) -> Result<(), NotifyError> {
		let response = self
			.http
			.post(url)
			.timeout(self.webhook_timeout)
			.json(payload)
			.send()
			.await
			.map_err(|e| NotifyError::channel(Channel::Webhook, e))?;
		response
			.error_for_status()
			.map_err(|e| NotifyError::channel(Channel::Webhook, e))?;
		Ok(())
	}

	async fn send_email(
		&self,
		smtp: SmtpConfig,
		to: &str,
		subject: &str,
		body: &str,
	) -> Result<(), NotifyError> {
		let client = SmtpClient::new(smtp).map_err(|e| NotifyError::channel(Channel::Email, e))?;
		client
			.send_text(to, subject, body)
			.await
			.map_err(|e| NotifyError::channel(Channel::Email, e))
	}
}

#[derive(Debug, Clone)]
pub struct FailureEvent {
	pub connection_id: String,
	pub error: String,
	pub at: DateTime<Utc>,
}

/// Resolves preferences and fans out one failure.
pub struct NotificationWorker {
	connections: Arc<dyn ConnectionRegistry>,
	settings: Arc<dyn SettingsStore>,
	notifications: Arc<dyn NotificationRepository>,
	cipher: Arc<dyn SecretCipher>,
	transport: Arc<dyn AlertTransport>,
}

impl NotificationWorker {
	pub fn new(
		connections: Arc<dyn ConnectionRegistry>,
		settings: Arc<dyn SettingsStore>,
		notifications: Arc<dyn NotificationRepository>,
		cipher: Arc<dyn SecretCipher>,
		transport: Arc<dyn AlertTransport>,
	) -> Self {
		Self {
			connections,
			settings,
			notifications,
			cipher,
			transport,
		}
	}

	#[instrument(skip(self, event), fields(connection_id = %event.connection_id))]
	pub async fn handle(&self, event: &FailureEvent) {
		let profile = match self.connections.get_connection(&event.connection_id).await {
			Ok(Some(profile)) => profile,
			Ok(None) => {
				warn!("connection not found, dropping failure alert");
				return;
			}
			Err(e) => {
				warn!(error = %e, "failed to load connection for failure alert");
				return;
			}
		};

		let prefs = match self.settings.get_settings(&profile.user_id).await {
			Ok(Some(settings)) => settings.notifications,
			Ok(None) => {
				debug!(user_id = %profile.user_id, "no notification preferences, nothing to send");
				return;
			}
			Err(e) => {
				warn!(user_id = %profile.user_id, error = %e, "failed to load notification preferences");
				return;
			}
		};

		let metadata = FailureMetadata::new(
			&event.connection_id,
			&profile.database_name,
			&profile.engine_type,
			&event.error,
			event.at,
		);

		if prefs.notify_dashboard {
			let notification = Notification::backup_failed(&profile.user_id, &metadata);
			match self.notifications.create_notification(&notification).await {
				Ok(()) => debug!(notification_id = %notification.id, "dashboard notification created"),
				Err(e) => warn!(error = %e, "failed to create dashboard notification"),
			}
		}

		if let Some(url) = prefs.webhook_target() {
			match self.transport.post_webhook(url, &metadata).await {
				Ok(()) => info!("webhook notification delivered"),
				Err(e) => warn!(error = %e, "webhook notification failed"),
			}
		}

		if let Some(to) = prefs.email_target() {
			let smtp = match smtp_config(&prefs.smtp, self.cipher.as_ref()) {
				Ok(smtp) => smtp,
				Err(e) => {
					info!(reason = %e, "skipping email notification");
					return;
				}
			};
			let body = format!(
				"Backup failed for database '{}'. Error: {}",
				metadata.database_name, metadata.error
			);
			match self.transport.send_email(smtp, to, EMAIL_SUBJECT, &body).await {
				Ok(()) => info!("email notification delivered"),
				Err(e) => warn!(error = %e, "email notification failed"),
			}
		}
	}
}

/// SMTP settings for alerts; the authenticated account is also the sender.
pub fn smtp_config(smtp: &SmtpSettings, cipher: &dyn SecretCipher) -> Result<SmtpConfig, NotifyError> {
	if !smtp.is_complete() {
		return Err(NotifyError::IncompleteSmtp);
	}
	let (Some(host), Some(port), Some(username), Some(sealed)) = (
		smtp.host.as_deref(),
		smtp.port,
		smtp.username.as_deref(),
		smtp.password_encrypted.as_deref(),
	) else {
		return Err(NotifyError::IncompleteSmtp);
	};

	Ok(SmtpConfig {
		host: host.trim().to_string(),
		port,
		username: username.trim().to_string(),
		password: cipher.decrypt(sealed)?,
		from_address: username.trim().to_string(),
		tls: TlsMode::for_port(port),
	})
}

/// Producer side of the alert queue.
pub struct NotificationDispatcher {
	tx: mpsc::Sender<FailureEvent>,
	cancel: CancellationToken,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
	/// Spawn the worker behind a queue of `capacity` events.
	pub fn start(worker: NotificationWorker, capacity: usize) -> Self {
		let (tx, mut rx) = mpsc::channel::<FailureEvent>(capacity.max(1));
		let cancel = CancellationToken::new();
		let stop = cancel.clone();

		let handle = tokio::spawn(async move {
			loop {
				tokio::select! {
					biased;
					event = rx.recv() => match event {
						Some(event) => worker.handle(&event).await,
						None => break,
					},
					_ = stop.cancelled() => {
						rx.close();
						while let Some(event) = rx.recv().await {
							worker.handle(&event).await;
						}
						break;
					}
				}
			}
			debug!("notification worker stopped");
		});

		Self {
			tx,
			cancel,
			worker: Mutex::new(Some(handle)),
		}
	}

	/// Queue a failure alert. Never waits: a full or closed queue drops the
	/// alert with a warning.
	pub fn notify_failure(&self, connection_id: &str, error: &str) {
		let event = FailureEvent {
			connection_id: connection_id.to_string(),
			error: error.to_string(),
			at: Utc::now(),
		};
		match self.tx.try_send(event) {
			Ok(()) => debug!(connection_id = %connection_id, "failure alert queued"),
			Err(mpsc::error::TrySendError::Full(event)) => warn!(
				connection_id = %event.connection_id,
				"notification queue full, dropping failure alert"
			),
			Err(mpsc::error::TrySendError::Closed(event)) => warn!(
				connection_id = %event.connection_id,
				"notification worker stopped, dropping failure alert"
			),
		}
	}

	/// Deliver everything already queued, then stop the worker.
	pub async fn shutdown(&self) {
		self.cancel.cancel();
		if let Some(handle) = self.worker.lock().await.take() {
			if let Err(e) = handle.await {
				warn!(error = %e, "notification worker ended abnormally");
			}
		}
	}
}
