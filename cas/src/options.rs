// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::PathBuf;
use std::time::Duration;

use grpc_util::retry::{DEFAULT_RETRY_DELAY_BASE, DEFAULT_RETRY_LIMIT};

use crate::error::ClientError;

/// How to reach and authenticate against a remote CAS endpoint.
///
/// Accepted URL schemes: `http://`, `https://`, `grpc://`, `grpcs://` and
/// `unix:`. TLS material and bearer tokens only make sense for secure (or,
/// for tokens, local-socket) endpoints; mismatches fail fast at `connect`
/// rather than at first use.
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    pub url: String,
    pub instance_name: String,
    /// PEM file with the root certificates used to verify the server.
    pub server_cert_path: Option<PathBuf>,
    /// PEM files with the client certificate chain and private key (mTLS).
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// File whose contents are sent as `Authorization: Bearer <token>`.
    pub access_token_path: Option<PathBuf>,
    /// Re-read the access-token file on this interval.
    pub token_refresh_interval: Option<Duration>,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub rpc_concurrency_limit: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            url: String::new(),
            instance_name: String::new(),
            server_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            access_token_path: None,
            token_refresh_interval: None,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_delay: DEFAULT_RETRY_DELAY_BASE,
            rpc_concurrency_limit: 128,
        }
    }
}

impl ConnectionOptions {
    pub fn is_secure(&self) -> bool {
        self.url.starts_with("https://") || self.url.starts_with("grpcs://")
    }

    pub fn is_unix(&self) -> bool {
        self.url.starts_with("unix:")
    }

    fn has_tls_material(&self) -> bool {
        self.server_cert_path.is_some()
            || self.client_cert_path.is_some()
            || self.client_key_path.is_some()
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.url.is_empty() {
            return Err(ClientError::InvalidArgument(
                "CAS server URL is missing".to_owned(),
            ));
        }
        if self.has_tls_material() && !self.is_secure() {
            return Err(ClientError::InvalidArgument(format!(
                "TLS options were provided, but the URL \"{}\" is not a secure endpoint",
                self.url
            )));
        }
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ClientError::InvalidArgument(
                "client certificate and client key must be provided together".to_owned(),
            ));
        }
        if self.access_token_path.is_some() && !(self.is_secure() || self.is_unix()) {
            return Err(ClientError::InvalidArgument(format!(
                "an access token must not be sent over the insecure endpoint \"{}\"",
                self.url
            )));
        }
        if self.token_refresh_interval.is_some() && self.access_token_path.is_none() {
            return Err(ClientError::InvalidArgument(
                "a token refresh interval requires an access token file".to_owned(),
            ));
        }
        Ok(())
    }
}
