// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::iter::FromIterator;
use std::str::FromStr;
use std::sync::Arc;

use either::Either;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use itertools::Itertools;
use tower::limit::ConcurrencyLimit;
use tower::ServiceBuilder;

use crate::auth::TokenSource;
use crate::headers::{SetRequestHeaders, SetRequestHeadersLayer};

pub mod auth;
pub mod channel;
pub mod headers;
pub mod prost;
pub mod retry;
pub mod tls;

pub use crate::channel::Channel;

/// Initialize the process-wide rustls cryptography provider. Idempotent.
pub fn initialize() -> Result<(), String> {
    // The return value is ignored: a second call reports that a provider is
    // already installed, which is fine.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    Ok(())
}

// NB: Rather than boxing our tower/tonic services, we define a type alias that fully defines the
// Service layers that we use universally. If this type becomes unwieldy, or our various Services
// diverge in which layers they use, we should instead use a Box<dyn Service<..>>.
pub type LayeredService = SetRequestHeaders<ConcurrencyLimit<Channel>>;

pub fn layered_service(
    channel: Channel,
    concurrency_limit: usize,
    http_headers: HeaderMap,
    bearer_token: Option<Arc<TokenSource>>,
) -> LayeredService {
    ServiceBuilder::new()
        .layer(SetRequestHeadersLayer::new(http_headers, bearer_token))
        .concurrency_limit(concurrency_limit)
        .service(channel)
}

/// Create a `Channel` from a URL of one of the accepted schemes:
/// `http://`, `https://`, `grpc://`, `grpcs://`, or `unix:`.
pub async fn create_channel(
    addr: &str,
    tls_config: Option<&rustls::ClientConfig>,
) -> Result<Channel, String> {
    if let Some(path) = addr.strip_prefix("unix:") {
        if tls_config.is_some() {
            return Err(format!(
                "TLS options are not supported for unix-socket address {addr}"
            ));
        }
        let path = path.strip_prefix("//").unwrap_or(path);
        return Channel::new_unix(path).map_err(|err| format!("{err}"));
    }

    let uri = http::Uri::try_from(addr).map_err(|err| format!("invalid address {addr}: {err}"))?;
    let scheme = match uri.scheme_str() {
        Some("http") | Some("grpc") => "http",
        Some("https") | Some("grpcs") => "https",
        other => {
            return Err(format!(
                "unsupported scheme {other:?} in address {addr}: expected http, https, grpc, grpcs or unix"
            ))
        }
    };

    if scheme == "https" && tls_config.is_none() {
        return Err(format!("missing TLS configuration for secure address {addr}"));
    }
    if scheme == "http" && tls_config.is_some() {
        return Err(format!(
            "TLS options were provided, but address {addr} is not secure"
        ));
    }

    let authority = uri
        .authority()
        .ok_or_else(|| format!("address {addr} is missing an authority"))?
        .clone();
    let uri = http::Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query("/")
        .build()
        .map_err(|err| format!("could not rewrite address {addr}: {err}"))?;

    Channel::new(tls_config, uri)
        .await
        .map_err(|err| format!("{err}"))
}

pub fn headers_to_http_header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, String> {
    let (http_headers, errors): (Vec<(HeaderName, HeaderValue)>, Vec<String>) = headers
        .iter()
        .map(|(key, value)| {
            let header_name = HeaderName::from_str(key)
                .map_err(|err| format!("Invalid header name {key}: {err}"))?;

            let header_value = HeaderValue::from_str(value)
                .map_err(|err| format!("Invalid header value {value}: {err}"))?;

            Ok((header_name, header_value))
        })
        .partition_map(|result| match result {
            Ok(v) => Either::Left(v),
            Err(err) => Either::Right(err),
        });

    if !errors.is_empty() {
        return Err(format!("header conversion errors: {}", errors.join("; ")));
    }

    Ok(HeaderMap::from_iter(http_headers))
}

pub fn status_to_str(status: tonic::Status) -> String {
    status_ref_to_str(&status)
}

pub fn status_ref_to_str(status: &tonic::Status) -> String {
    format!("{:?}: {:?}", status.code(), status.message())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    #[test]
    fn headers_to_http_header_map_ok() {
        let mut headers = BTreeMap::new();
        headers.insert("user-agent".to_owned(), "remexec/0.1".to_owned());
        headers.insert("x-request-id".to_owned(), "abc".to_owned());

        let map = super::headers_to_http_header_map(&headers).unwrap();
        assert_eq!(map.get("user-agent").unwrap(), "remexec/0.1");
        assert_eq!(map.get("x-request-id").unwrap(), "abc");
    }

    #[test]
    fn headers_to_http_header_map_bad_name() {
        let mut headers = BTreeMap::new();
        headers.insert("not a header".to_owned(), "x".to_owned());

        let err = super::headers_to_http_header_map(&headers).unwrap_err();
        assert!(err.contains("Invalid header name"), "Bad error: {err}");
    }

    #[tokio::test]
    async fn create_channel_rejects_unknown_scheme() {
        let err = super::create_channel("ftp://localhost:1234", None)
            .await
            .unwrap_err();
        assert!(err.contains("unsupported scheme"), "Bad error: {err}");
    }

    #[tokio::test]
    async fn create_channel_rejects_tls_for_insecure_url() {
        super::initialize().unwrap();
        let tls = rustls::ClientConfig::builder()
            .with_root_certificates(rustls::RootCertStore::empty())
            .with_no_client_auth();
        let err = super::create_channel("grpc://localhost:1234", Some(&tls))
            .await
            .unwrap_err();
        assert!(err.contains("not secure"), "Bad error: {err}");
    }

    #[tokio::test]
    async fn create_channel_maps_grpc_scheme() {
        // Construction does not dial, so an unroutable port is fine.
        super::create_channel("grpc://localhost:1", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_channel_unix() {
        super::create_channel("unix:/tmp/some-socket", None)
            .await
            .unwrap();
    }
}
