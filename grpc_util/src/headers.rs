// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::header::{HeaderMap, AUTHORIZATION};
use http::Request;
use tower_layer::Layer;
use tower_service::Service;

use crate::auth::TokenSource;

#[derive(Debug)]
pub struct SetRequestHeadersLayer {
    headers: HeaderMap,
    bearer_token: Option<Arc<TokenSource>>,
}

impl SetRequestHeadersLayer {
    pub fn new(headers: HeaderMap, bearer_token: Option<Arc<TokenSource>>) -> Self {
        SetRequestHeadersLayer {
            headers,
            bearer_token,
        }
    }
}

impl<S> Layer<S> for SetRequestHeadersLayer {
    type Service = SetRequestHeaders<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SetRequestHeaders {
            inner,
            headers: self.headers.clone(),
            bearer_token: self.bearer_token.clone(),
        }
    }
}

/// Stamps a fixed set of headers onto every request. The Authorization
/// header is resolved per request so that a reloaded bearer token takes
/// effect without rebuilding the service stack.
#[derive(Clone)]
pub struct SetRequestHeaders<S> {
    inner: S,
    headers: HeaderMap,
    bearer_token: Option<Arc<TokenSource>>,
}

impl<S> fmt::Debug for SetRequestHeaders<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetRequestHeaders")
            .field("inner", &self.inner)
            .field("headers", &self.headers)
            .finish()
    }
}

impl<ReqBody, S> Service<Request<ReqBody>> for SetRequestHeaders<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if !self.headers.is_empty() || self.bearer_token.is_some() {
            let headers = req.headers_mut();
            for (header_name, header_value) in &self.headers {
                headers.insert(header_name, header_value.clone());
            }
            if let Some(token) = &self.bearer_token {
                headers.insert(AUTHORIZATION, token.header_value());
            }
        }

        self.inner.call(req)
    }
}
