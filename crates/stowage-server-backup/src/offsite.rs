// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Off-site copies of completed artifacts on S3-compatible storage.
//!
//! Uploads are a single signed `PUT` (AWS Signature Version 4, path-style
//! addressing) with the artifact streamed from disk. The payload hash is
//! computed in a first pass so the body never has to sit in memory.
//! Directory artifacts (mongodump output) are packed into a `.tar.gz` next
//! to the artifact first and that archive is uploaded instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use stowage_backup_core::{BackupRecord, OffsiteSettings};
use stowage_common_secret::{SecretCipher, SecretError, SecretString};
use stowage_server_db::{DbError, SettingsStore};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument};

pub const DEFAULT_REGION: &str = "us-east-1";

const SERVICE: &str = "s3";
const CONTENT_TYPE: &str = "application/octet-stream";
const SIGNED_HEADERS: &str = "content-type;host;x-amz-content-sha256;x-amz-date";

#[derive(Debug, Error)]
pub enum OffsiteError {
	#[error("incomplete S3 configuration: missing {0}")]
	IncompleteS3Config(String),

	#[error("invalid S3 endpoint '{0}'")]
	InvalidEndpoint(String),

	#[error("failed to decrypt S3 secret key: {0}")]
	Secret(#[from] SecretError),

	#[error("failed to load user settings: {0}")]
	Settings(#[from] DbError),

	#[error("artifact {} is not a regular file", .0.display())]
	NotAFile(PathBuf),

	#[error("failed to read artifact {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to archive {}: {source}", path.display())]
	Archive {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("request signing failed: {0}")]
	Signing(String),

	#[error("S3 request failed: {0}")]
	Request(#[from] reqwest::Error),

	#[error("S3 rejected upload with status {status}: {body}")]
	Rejected { status: u16, body: String },
}

/// Validated destination with the secret key decrypted.
#[derive(Debug, Clone)]
pub struct S3Target {
	pub endpoint: reqwest::Url,
	pub region: String,
	pub bucket: String,
	pub access_key: String,
	pub secret_key: SecretString,
	pub prefix: Option<String>,
}

impl S3Target {
	pub fn resolve(
		settings: &OffsiteSettings,
		cipher: &dyn SecretCipher,
	) -> Result<Self, OffsiteError> {
		fn filled(value: &Option<String>) -> Option<&str> {
			value.as_deref().map(str::trim).filter(|v| !v.is_empty())
		}

		let endpoint = filled(&settings.endpoint);
		let bucket = filled(&settings.bucket);
		let access_key = filled(&settings.access_key);
		let secret_key = filled(&settings.secret_key_encrypted);

		let missing: Vec<&str> = [
			("endpoint", endpoint.is_none()),
			("bucket", bucket.is_none()),
			("access_key", access_key.is_none()),
			("secret_key", secret_key.is_none()),
		]
		.into_iter()
		.filter_map(|(name, absent)| absent.then_some(name))
		.collect();

		let (Some(endpoint), Some(bucket), Some(access_key), Some(secret_key)) =
			(endpoint, bucket, access_key, secret_key)
		else {
			return Err(OffsiteError::IncompleteS3Config(missing.join(", ")));
		};

		let with_scheme = if endpoint.contains("://") {
			endpoint.to_string()
		} else if settings.use_ssl {
			format!("https://{endpoint}")
		} else {
			format!("http://{endpoint}")
		};
		let endpoint = reqwest::Url::parse(&with_scheme)
			.ok()
			.filter(|url| url.host_str().is_some())
			.ok_or_else(|| OffsiteError::InvalidEndpoint(endpoint.to_string()))?;

		Ok(Self {
			endpoint,
			region: filled(&settings.region).unwrap_or(DEFAULT_REGION).to_string(),
			bucket: bucket.to_string(),
			access_key: access_key.to_string(),
			secret_key: cipher.decrypt(secret_key)?,
			prefix: filled(&settings.path_prefix)
				.map(|p| p.trim_matches('/').to_string())
				.filter(|p| !p.is_empty()),
		})
	}

	pub fn object_key(&self, file_name: &str) -> String {
		match &self.prefix {
			Some(prefix) => format!("{prefix}/{file_name}"),
			None => file_name.to_string(),
		}
	}

	/// Path-style object URL.
	pub fn object_url(&self, object_key: &str) -> Result<reqwest::Url, OffsiteError> {
		let base = self.endpoint.as_str().trim_end_matches('/');
		let url = format!(
			"{base}/{}/{}",
			encode_path(&self.bucket),
			encode_path(object_key)
		);
		reqwest::Url::parse(&url).map_err(|_| OffsiteError::InvalidEndpoint(url))
	}
}

pub struct OffsiteUploader {
	settings: Arc<dyn SettingsStore>,
	cipher: Arc<dyn SecretCipher>,
	client: reqwest::Client,
	timeout: Duration,
}

impl OffsiteUploader {
	pub fn new(
		settings: Arc<dyn SettingsStore>,
		cipher: Arc<dyn SecretCipher>,
		timeout: Duration,
	) -> Self {
		Self {
			settings,
			cipher,
			client: reqwest::Client::new(),
			timeout,
		}
	}

	/// Upload when the owning user has off-site storage switched on.
	/// `Ok(None)` means nothing was attempted.
	pub async fn upload_if_enabled(
		&self,
		record: &BackupRecord,
		user_id: &str,
	) -> Result<Option<String>, OffsiteError> {
		let enabled = self
			.settings
			.get_settings(user_id)
			.await?
			.is_some_and(|s| s.offsite.enabled);
		if !enabled {
			return Ok(None);
		}
		self.upload(record, user_id).await.map(Some)
	}

	/// Push the record's artifact and return its object key.
	#[instrument(skip(self, record), fields(backup_id = %record.id, user_id = %user_id))]
	pub async fn upload(&self, record: &BackupRecord, user_id: &str) -> Result<String, OffsiteError> {
		let settings = self
			.settings
			.get_settings(user_id)
			.await?
			.map(|s| s.offsite)
			.unwrap_or_default();
		let target = S3Target::resolve(&settings, self.cipher.as_ref())?;

		let path = Path::new(&record.path);
		let file_name = path
			.file_name()
			.and_then(|n| n.to_str())
			.ok_or_else(|| OffsiteError::NotAFile(path.to_path_buf()))?;
		let meta = tokio::fs::metadata(path).await.map_err(|source| OffsiteError::Read {
			path: path.to_path_buf(),
			source,
		})?;

		let object_key = if meta.is_dir() {
			let archive = PathBuf::from(format!("{}.tar.gz", record.path));
			pack_directory(path, &archive).await?;
			let object_key = target.object_key(&format!("{file_name}.tar.gz"));
			let sent = self.put_object(&target, &object_key, &archive, Utc::now()).await;
			if let Err(e) = tokio::fs::remove_file(&archive).await {
				debug!(path = %archive.display(), error = %e, "could not remove upload archive");
			}
			sent?;
			object_key
		} else {
			let object_key = target.object_key(file_name);
			self.put_object(&target, &object_key, path, Utc::now()).await?;
			object_key
		};

		info!(
			bucket = %target.bucket,
			object_key = %object_key,
			size = record.size,
			"artifact uploaded off-site"
		);
		Ok(object_key)
	}

	async fn put_object(
		&self,
		target: &S3Target,
		object_key: &str,
		path: &Path,
		now: DateTime<Utc>,
	) -> Result<(), OffsiteError> {
		let read_err = |source| OffsiteError::Read {
			path: path.to_path_buf(),
			source,
		};

		let meta = tokio::fs::metadata(path).await.map_err(read_err)?;
		if !meta.is_file() {
			return Err(OffsiteError::NotAFile(path.to_path_buf()));
		}
		let payload_hash = sha256_file(path).await.map_err(read_err)?;

		let url = target.object_url(object_key)?;
		let host = host_header(&url)?;
		let authorization = sigv4_authorization(
			&SigningInput {
				method: "PUT",
				uri_path: url.path(),
				host: &host,
				content_type: CONTENT_TYPE,
				payload_hash: &payload_hash,
				region: &target.region,
				now,
			},
			&target.access_key,
			&target.secret_key,
		)?;

		let file = tokio::fs::File::open(path).await.map_err(read_err)?;
		let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));

		let response = self
			.client
			.put(url)
			.timeout(self.timeout)
			.header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
			.header(reqwest::header::CONTENT_LENGTH, meta.len())
			.header("x-amz-date", now.format("%Y%m%dT%H%M%SZ").to_string())
			.header("x-amz-content-sha256", &payload_hash)
			.header(reqwest::header::AUTHORIZATION, authorization)
			.body(body)
			.send()
			.await?;

		let status = response.status();
		if status.is_success() {
			return Ok(());
		}
		let mut body = response.text().await.unwrap_or_default();
		body.truncate(512);
		Err(OffsiteError::Rejected {
			status: status.as_u16(),
			body,
		})
	}
}

/// Gzipped tarball of `dir`, rooted at the directory's own name.
async fn pack_directory(dir: &Path, archive: &Path) -> Result<(), OffsiteError> {
	let archive_err = |source| OffsiteError::Archive {
		path: dir.to_path_buf(),
		source,
	};
	let src = dir.to_path_buf();
	let dest = archive.to_path_buf();
	tokio::task::spawn_blocking(move || -> std::io::Result<()> {
		let root = src
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|| "artifact".to_string());
		let file = std::fs::File::create(&dest)?;
		let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
		builder.append_dir_all(&root, &src)?;
		builder.into_inner()?.finish()?;
		Ok(())
	})
	.await
	.map_err(|e| archive_err(std::io::Error::other(e)))?
	.map_err(archive_err)
}

fn host_header(url: &reqwest::Url) -> Result<String, OffsiteError> {
	let host = url
		.host_str()
		.ok_or_else(|| OffsiteError::InvalidEndpoint(url.to_string()))?;
	Ok(match url.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_string(),
	})
}

/// Percent-encode an object path, keeping `/` separators.
fn encode_path(path: &str) -> String {
	let mut out = String::with_capacity(path.len());
	for byte in path.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
				out.push(byte as char)
			}
			_ => out.push_str(&format!("%{byte:02X}")),
		}
	}
	out
}

async fn sha256_file(path: &Path) -> std::io::Result<String> {
	let mut file = tokio::fs::File::open(path).await?;
	let mut hasher = Sha256::new();
	let mut buf = vec![0u8; 64 * 1024];
	loop {
		let n = file.read(&mut buf).await?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}
	Ok(hex::encode(hasher.finalize()))
}

struct SigningInput<'a> {
	method: &'a str,
	uri_path: &'a str,
	host: &'a str,
	content_type: &'a str,
	payload_hash: &'a str,
	region: &'a str,
	now: DateTime<Utc>,
}

fn sigv4_authorization(
	input: &SigningInput<'_>,
	access_key: &str,
	secret_key: &SecretString,
) -> Result<String, OffsiteError> {
	let date_stamp = input.now.format("%Y%m%d").to_string();
	let amz_date = input.now.format("%Y%m%dT%H%M%SZ").to_string();
	let scope = format!("{date_stamp}/{}/{SERVICE}/aws4_request", input.region);

	let canonical_headers = format!(
		"content-type:{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{amz_date}\n",
		input.content_type, input.host, input.payload_hash
	);
	let canonical_request = format!(
		"{}\n{}\n\n{canonical_headers}\n{SIGNED_HEADERS}\n{}",
		input.method, input.uri_path, input.payload_hash
	);
	let string_to_sign = format!(
		"AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
		hex::encode(Sha256::digest(canonical_request.as_bytes()))
	);

	let key = derive_signing_key(secret_key.expose(), &date_stamp, input.region, SERVICE)?;
	let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

	Ok(format!(
		"AWS4-HMAC-SHA256 Credential={access_key}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}"
	))
}

fn derive_signing_key(
	secret_key: &str,
	date_stamp: &str,
	region: &str,
	service: &str,
) -> Result<Vec<u8>, OffsiteError> {
	let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes())?;
	let k_region = hmac_sha256(&k_date, region.as_bytes())?;
	let k_service = hmac_sha256(&k_region, service.as_bytes())?;
	hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, OffsiteError> {
	let mut mac = Hmac::<Sha256>::new_from_slice(key)
		.map_err(|e| OffsiteError::Signing(e.to_string()))?;
	mac.update(data);
	Ok(mac.finalize().into_bytes().to_vec())
}
