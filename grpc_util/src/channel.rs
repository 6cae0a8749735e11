// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Uri;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::client::legacy::{Client as HyperClient, Error as HyperClientError};
use hyper_util::rt::{TokioExecutor, TokioIo};
use pin_project_lite::pin_project;
use rustls::ClientConfig;
use tokio::net::UnixStream;
use tonic::body::BoxBody;
use tower_service::Service;

// Inspired by https://github.com/LucioFranco/tonic-openssl/blob/master/example/src/client2.rs.

/// Enumeration wrapping the HTTP, HTTPS and unix-socket clients so they can
/// be treated equivalently by `Channel`.
#[derive(Clone, Debug)]
pub enum Client {
    Plain(HyperClient<HttpConnector, BoxBody>),
    Tls(HyperClient<hyper_rustls::HttpsConnector<HttpConnector>, BoxBody>),
    Unix(HyperClient<UnixConnector, BoxBody>),
}

/// A communication channel which may communicate using HTTP, HTTP over TLS,
/// or HTTP over a unix-domain socket. This `Channel` can be passed directly
/// to Tonic clients as a connector.
///
/// `Channel` implements the `Service` expected by Tonic for the underlying
/// communication channel. This strategy is necessary because Tonic removed
/// the ability to pass in a raw `rustls` configuration, and so we must
/// implement our own connection setup logic to be able to continue to use
/// `rustls` directly.
#[derive(Clone, Debug)]
pub struct Channel {
    client: Client,
    uri: Uri,
}

impl Channel {
    pub async fn new(
        tls_config: Option<&ClientConfig>,
        uri: Uri,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        crate::initialize()?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let client = match tls_config {
            None => Client::Plain(
                HyperClient::builder(TokioExecutor::new())
                    .http2_only(true)
                    .build(http),
            ),
            Some(tls_config) => {
                let tls_config = tls_config.to_owned();

                let https = hyper_rustls::HttpsConnectorBuilder::new()
                    .with_tls_config(tls_config)
                    .https_or_http()
                    .enable_http2()
                    .build();

                Client::Tls(
                    HyperClient::builder(TokioExecutor::new())
                        .http2_only(true)
                        .build(https),
                )
            }
        };

        Ok(Self { client, uri })
    }

    /// A channel over a unix-domain socket. The URI carried by requests is a
    /// placeholder required by h2; only the socket path matters.
    pub fn new_unix<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        crate::initialize()?;

        let connector = UnixConnector {
            path: Arc::new(path.as_ref().to_owned()),
        };
        let client = Client::Unix(
            HyperClient::builder(TokioExecutor::new())
                .http2_only(true)
                .build(connector),
        );

        Ok(Self {
            client,
            uri: Uri::from_static("http://localhost"),
        })
    }
}

impl Service<http::Request<BoxBody>> for Channel {
    type Response = http::Response<Incoming>;
    type Error = HyperClientError;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: http::Request<BoxBody>) -> Self::Future {
        // The scheme and authority do not get set by Hyper, so we copy the
        // URI and replace them with the ones from the initial URI used to
        // configure the client.
        let uri = Uri::builder()
            .scheme(self.uri.scheme().unwrap().clone())
            .authority(self.uri.authority().unwrap().clone())
            .path_and_query(req.uri().path_and_query().unwrap().clone())
            .build()
            .unwrap();
        *req.uri_mut() = uri;

        let client = self.client.clone();
        Box::pin(async move {
            match &client {
                Client::Plain(client) => client.request(req).await,
                Client::Tls(client) => client.request(req).await,
                Client::Unix(client) => client.request(req).await,
            }
        })
    }
}

/// A tower connector dialing a fixed unix-domain socket path, ignoring the
/// request URI.
#[derive(Clone, Debug)]
pub struct UnixConnector {
    path: Arc<PathBuf>,
}

impl Service<Uri> for UnixConnector {
    type Response = UnixIo;
    type Error = std::io::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        let path = self.path.clone();
        Box::pin(async move {
            let stream = UnixStream::connect(path.as_path()).await?;
            Ok(UnixIo {
                inner: TokioIo::new(stream),
            })
        })
    }
}

pin_project! {
    /// Adapter giving a `UnixStream` the hyper IO and `Connection` traits
    /// that the legacy client requires of connector outputs.
    pub struct UnixIo {
        #[pin]
        inner: TokioIo<UnixStream>,
    }
}

impl Connection for UnixIo {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for UnixIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl hyper::rt::Write for UnixIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<Result<usize, std::io::Error>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }
}
