// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSH local port forwarding for connections behind a bastion.
//!
//! A [`Tunnel`] binds an ephemeral loopback port and relays every accepted
//! connection through a channel opened by a [`ChannelOpener`], normally an
//! authenticated SSH session using `direct-tcpip`. Each forwarded connection
//! runs on its own task.
//!
//! Stopping a tunnel cancels the accept loop and every relay, then closes the
//! session. [`Tunnel::stop`] is idempotent and also runs on drop, so a tunnel
//! held across a dump is torn down on every exit path.
//!
//! # Host keys
//!
//! [`HostKeyPolicy::AcceptAny`] trusts whatever key the bastion presents.
//! That keeps ad-hoc bastions working but allows a man-in-the-middle to
//! capture database credentials sent through the tunnel. Deployments that can
//! should pin fingerprints with [`HostKeyPolicy::Fingerprint`].

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::Disconnect;
use russh_keys::key;
use stowage_backup_core::SshSettings;
use stowage_server_config::{HostKeyPolicy, TunnelConfig};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum TunnelError {
	#[error("no SSH authentication method configured (password or private key required)")]
	NoAuthMethod,

	#[error("failed to connect to SSH server {addr}: {message}")]
	Connect { addr: String, message: String },

	#[error("timed out connecting to SSH server {0}")]
	Timeout(String),

	#[error("host key presented by {0} is not trusted")]
	HostKeyRejected(String),

	#[error("invalid SSH private key: {0}")]
	InvalidKey(String),

	#[error("SSH authentication failed for {user}@{addr}")]
	AuthFailed { user: String, addr: String },

	#[error("SSH protocol error: {0}")]
	Protocol(String),

	#[error("failed to bind local tunnel port: {0}")]
	Bind(#[source] io::Error),
}

pub trait RelayIo: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> RelayIo for T {}

pub type RelayStream = Pin<Box<dyn RelayIo>>;

/// Opens the remote leg of a forwarded connection.
#[async_trait]
pub trait ChannelOpener: Send + Sync + 'static {
	async fn open_channel(
		&self,
		remote_host: &str,
		remote_port: u16,
		originator: SocketAddr,
	) -> io::Result<RelayStream>;

	/// Close the underlying session. Called once when the tunnel stops.
	async fn close(&self);
}

pub struct Tunnel {
	local_addr: SocketAddr,
	cancel: CancellationToken,
	stopped: AtomicBool,
	accept_task: Option<JoinHandle<()>>,
}

impl Tunnel {
	/// Bind `127.0.0.1:0` and start forwarding to `remote_host:remote_port`.
	///
	/// The opener is closed if the local port cannot be bound.
	pub async fn start(
		opener: Arc<dyn ChannelOpener>,
		remote_host: impl Into<String>,
		remote_port: u16,
	) -> Result<Self, TunnelError> {
		let remote_host = remote_host.into();
		let bound = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
			.await
			.and_then(|listener| listener.local_addr().map(|addr| (listener, addr)));
		let (listener, local_addr) = match bound {
			Ok(bound) => bound,
			Err(e) => {
				opener.close().await;
				return Err(TunnelError::Bind(e));
			}
		};

		let cancel = CancellationToken::new();
		let accept_task = tokio::spawn(accept_loop(
			listener,
			opener,
			remote_host.clone(),
			remote_port,
			cancel.clone(),
		));

		info!(
			local = %local_addr,
			remote_host = %remote_host,
			remote_port,
			"tunnel listening"
		);

		Ok(Self {
			local_addr,
			cancel,
			stopped: AtomicBool::new(false),
			accept_task: Some(accept_task),
		})
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}

	/// Stop accepting, cut every forwarded connection and close the session.
	/// Later calls do nothing.
	pub fn stop(&self) {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return;
		}
		self.cancel.cancel();
		debug!(local = %self.local_addr, "tunnel stopping");
	}

	/// [`stop`](Self::stop), then wait until the listener is released and the
	/// session has been closed.
	pub async fn shutdown(mut self) {
		self.stop();
		if let Some(task) = self.accept_task.take() {
			if let Err(e) = task.await {
				warn!(local = %self.local_addr, error = %e, "tunnel accept task ended abnormally");
			}
		}
	}
}

impl Drop for Tunnel {
	fn drop(&mut self) {
		self.stop();
	}
}

impl std::fmt::Debug for Tunnel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Tunnel")
			.field("local_addr", &self.local_addr)
			.field("stopped", &self.is_stopped())
			.finish()
	}
}

async fn accept_loop(
	listener: TcpListener,
	opener: Arc<dyn ChannelOpener>,
	remote_host: String,
	remote_port: u16,
	cancel: CancellationToken,
) {
	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			accepted = listener.accept() => match accepted {
				Ok((socket, peer)) => {
					tokio::spawn(relay(
						Arc::clone(&opener),
						socket,
						peer,
						remote_host.clone(),
						remote_port,
						cancel.child_token(),
					));
				}
				Err(e) => {
					warn!(error = %e, "tunnel accept failed");
				}
			},
		}
	}

	drop(listener);
	opener.close().await;
	debug!("tunnel session closed");
}

async fn relay(
	opener: Arc<dyn ChannelOpener>,
	mut inbound: TcpStream,
	peer: SocketAddr,
	remote_host: String,
	remote_port: u16,
	cancel: CancellationToken,
) {
	let opened = tokio::select! {
		_ = cancel.cancelled() => return,
		opened = opener.open_channel(&remote_host, remote_port, peer) => opened,
	};
	let mut outbound = match opened {
		Ok(stream) => stream,
		Err(e) => {
			warn!(
				peer = %peer,
				remote_host = %remote_host,
				remote_port,
				error = %e,
				"failed to open forwarded channel"
			);
			return;
		}
	};

	tokio::select! {
		_ = cancel.cancelled() => {
			debug!(peer = %peer, "forwarded connection cut by tunnel stop");
		}
		copied = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => match copied {
			Ok((sent, received)) => debug!(peer = %peer, sent, received, "forwarded connection closed"),
			Err(e) => debug!(peer = %peer, error = %e, "forwarded connection ended with error"),
		},
	}
}

/// Builds tunnels for connection profiles.
#[async_trait]
pub trait TunnelOpener: Send + Sync {
	async fn open(
		&self,
		ssh: &SshSettings,
		remote_host: &str,
		remote_port: u16,
	) -> Result<Tunnel, TunnelError>;
}

pub struct SshTunnelOpener {
	config: TunnelConfig,
}

impl SshTunnelOpener {
	pub fn new(config: TunnelConfig) -> Self {
		Self { config }
	}
}

#[async_trait]
impl TunnelOpener for SshTunnelOpener {
	#[instrument(skip(self, ssh), fields(bastion = %ssh.host, bastion_port = ssh.port))]
	async fn open(
		&self,
		ssh: &SshSettings,
		remote_host: &str,
		remote_port: u16,
	) -> Result<Tunnel, TunnelError> {
		let session = SshSession::connect(ssh, &self.config).await?;
		Tunnel::start(Arc::new(session), remote_host, remote_port).await
	}
}

struct HostKeyVerifier {
	policy: HostKeyPolicy,
	known: Vec<String>,
	addr: String,
}

#[async_trait]
impl client::Handler for HostKeyVerifier {
	type Error = russh::Error;

	async fn check_server_key(
		&mut self,
		server_public_key: &key::PublicKey,
	) -> Result<bool, Self::Error> {
		let fingerprint = server_public_key.fingerprint();
		match self.policy {
			HostKeyPolicy::AcceptAny => {
				debug!(addr = %self.addr, fingerprint = %fingerprint, "accepting unverified host key");
				Ok(true)
			}
			HostKeyPolicy::Fingerprint => {
				let trusted = self
					.known
					.iter()
					.any(|known| fingerprint_matches(known, &fingerprint));
				if !trusted {
					warn!(addr = %self.addr, fingerprint = %fingerprint, "host key not in known fingerprints");
				}
				Ok(trusted)
			}
		}
	}
}

/// Compare SHA-256 fingerprints, tolerating a `SHA256:` prefix and padding.
pub fn fingerprint_matches(known: &str, presented: &str) -> bool {
	fn normalize(fp: &str) -> &str {
		let fp = fp.trim();
		let fp = fp.strip_prefix("SHA256:").unwrap_or(fp);
		fp.trim_end_matches('=')
	}
	let known = normalize(known);
	!known.is_empty() && known == normalize(presented)
}

/// An authenticated SSH client session.
pub struct SshSession {
	handle: client::Handle<HostKeyVerifier>,
	addr: String,
}

impl SshSession {
	pub async fn connect(ssh: &SshSettings, config: &TunnelConfig) -> Result<Self, TunnelError> {
		if !ssh.has_auth_method() {
			return Err(TunnelError::NoAuthMethod);
		}

		let addr = format!("{}:{}", ssh.host, ssh.port);
		let handler = HostKeyVerifier {
			policy: config.host_key_policy,
			known: config.known_fingerprints.clone(),
			addr: addr.clone(),
		};
		let client_config = Arc::new(client::Config::default());

		let connecting = client::connect(client_config, (ssh.host.as_str(), ssh.port), handler);
		let mut handle = match tokio::time::timeout(config.connect_timeout, connecting).await {
			Err(_) => return Err(TunnelError::Timeout(addr)),
			Ok(Err(russh::Error::UnknownKey)) => return Err(TunnelError::HostKeyRejected(addr)),
			Ok(Err(e)) => {
				return Err(TunnelError::Connect {
					addr,
					message: e.to_string(),
				})
			}
			Ok(Ok(handle)) => handle,
		};

		let mut authenticated = false;
		if let Some(private_key) = ssh.private_key.as_ref().filter(|k| !k.is_blank()) {
			let pair = russh_keys::decode_secret_key(private_key.expose(), None)
				.map_err(|e| TunnelError::InvalidKey(e.to_string()))?;
			authenticated = handle
				.authenticate_publickey(ssh.username.as_str(), Arc::new(pair))
				.await
				.map_err(|e| TunnelError::Protocol(e.to_string()))?;
			if !authenticated {
				debug!(addr = %addr, "public key rejected");
			}
		}
		if !authenticated {
			if let Some(password) = ssh.password.as_ref().filter(|p| !p.is_blank()) {
				authenticated = handle
					.authenticate_password(ssh.username.as_str(), password.expose().as_str())
					.await
					.map_err(|e| TunnelError::Protocol(e.to_string()))?;
			}
		}
		if !authenticated {
			return Err(TunnelError::AuthFailed {
				user: ssh.username.clone(),
				addr,
			});
		}

		info!(addr = %addr, user = %ssh.username, "SSH session established");
		Ok(Self {
			handle,
			addr,
		})
	}
}

#[async_trait]
impl ChannelOpener for SshSession {
	async fn open_channel(
		&self,
		remote_host: &str,
		remote_port: u16,
		originator: SocketAddr,
	) -> io::Result<RelayStream> {
		let channel = self
			.handle
			.channel_open_direct_tcpip(
				remote_host,
				u32::from(remote_port),
				originator.ip().to_string(),
				u32::from(originator.port()),
			)
			.await
			.map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string()))?;
		Ok(Box::pin(channel.into_stream()))
	}

	async fn close(&self) {
		if let Err(e) = self
			.handle
			.disconnect(Disconnect::ByApplication, "tunnel closed", "en")
			.await
		{
			debug!(addr = %self.addr, error = %e, "SSH disconnect failed");
		}
	}
}

/// Plain TCP stand-in for an SSH session.
#[cfg(test)]
pub(crate) struct DirectOpener {
	pub closed: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl DirectOpener {
	pub fn new() -> Self {
		Self {
			closed: std::sync::atomic::AtomicUsize::new(0),
		}
	}
}

#[cfg(test)]
#[async_trait]
impl ChannelOpener for DirectOpener {
	async fn open_channel(
		&self,
		remote_host: &str,
		remote_port: u16,
		_originator: SocketAddr,
	) -> io::Result<RelayStream> {
		let stream = TcpStream::connect((remote_host, remote_port)).await?;
		Ok(Box::pin(stream))
	}

	async fn close(&self) {
		self.closed.fetch_add(1, Ordering::SeqCst);
	}
}
