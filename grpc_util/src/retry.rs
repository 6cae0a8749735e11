// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use prost::Message;
use tonic::{Code, Status};

/// Default number of retries after the initial attempt.
pub const DEFAULT_RETRY_LIMIT: u32 = 4;
/// Default base delay between attempts.
pub const DEFAULT_RETRY_DELAY_BASE: Duration = Duration::from_millis(100);

const BACKOFF_MULTIPLIER: f64 = 1.6;

/// By default only UNAVAILABLE is considered transient. Callers widen the
/// set per call site when a service is known to return other codes for
/// transient conditions.
pub fn status_is_retryable(status: &Status) -> bool {
    matches!(status.code(), Code::Unavailable)
}

/// An error type that the retry envelope can interrogate.
pub trait RetryableError {
    fn code(&self) -> Option<Code>;

    /// A server-specified delay override, when the error carries one.
    fn retry_delay_hint(&self) -> Option<Duration>;
}

impl RetryableError for Status {
    fn code(&self) -> Option<Code> {
        Some(Status::code(self))
    }

    fn retry_delay_hint(&self) -> Option<Duration> {
        status_retry_delay_hint(self)
    }
}

/// Extract a `google.rpc.RetryInfo` delay from the status details, if the
/// server attached one.
pub fn status_retry_delay_hint(status: &Status) -> Option<Duration> {
    let details = status.details();
    if details.is_empty() {
        return None;
    }

    // The details trailer carries a serialized google.rpc.Status whose
    // `details` list may include a RetryInfo.
    if let Ok(rpc_status) = protos::pb::google::rpc::Status::decode(details) {
        for any in &rpc_status.details {
            if any.type_url.ends_with("google.rpc.RetryInfo") {
                if let Ok(info) = protos::pb::google::rpc::RetryInfo::decode(any.value.as_ref()) {
                    return info
                        .retry_delay
                        .as_ref()
                        .map(protos::timestamp::to_duration);
                }
            }
        }
    }

    // Some servers place a bare serialized RetryInfo in the trailer instead.
    protos::pb::google::rpc::RetryInfo::decode(details)
        .ok()
        .and_then(|info| info.retry_delay.as_ref().map(protos::timestamp::to_duration))
}

/// The outcome of an exhausted or aborted retry loop.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The last failure was not retryable.
    Terminal(E),
    /// The retry budget ran out; the last underlying failure is preserved.
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Terminal(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Terminal(e) => write!(f, "{e}"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "Retry limit ({attempts}) exceeded, last error was [{last}]")
            }
        }
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for RetryError<E> {}

/// Retry envelope for a single RPC: invokes a closure with a fresh request
/// each attempt, sleeping `delay_base * 1.6^attempt` between attempts.
///
/// A server-supplied RetryInfo hint found on the *first* failure overrides
/// the base delay for the remainder of the loop.
#[derive(Clone, Debug)]
pub struct Retrier {
    pub limit: u32,
    pub delay_base: Duration,
    pub retryable_codes: Vec<Code>,
    /// Used to label log lines; has no effect on behavior.
    pub operation_name: &'static str,
}

impl Default for Retrier {
    fn default() -> Self {
        Retrier {
            limit: DEFAULT_RETRY_LIMIT,
            delay_base: DEFAULT_RETRY_DELAY_BASE,
            retryable_codes: vec![Code::Unavailable],
            operation_name: "",
        }
    }
}

impl Retrier {
    pub fn new(limit: u32, delay_base: Duration) -> Self {
        Retrier {
            limit,
            delay_base,
            ..Retrier::default()
        }
    }

    pub fn for_operation(&self, operation_name: &'static str) -> Self {
        Retrier {
            operation_name,
            ..self.clone()
        }
    }

    /// Additional codes to treat as transient for this retrier.
    pub fn with_retryable_codes(mut self, codes: &[Code]) -> Self {
        for code in codes {
            if !self.retryable_codes.contains(code) {
                self.retryable_codes.push(*code);
            }
        }
        self
    }

    fn is_retryable<E: RetryableError>(&self, err: &E) -> bool {
        match err.code() {
            Some(code) => self.retryable_codes.contains(&code),
            None => false,
        }
    }

    /// Invoke `f(value, attempt)` until it succeeds, fails terminally, or the
    /// retry budget is exhausted. `attempt` is 0 for the initial call.
    pub async fn call<T, R, E, F, Fut>(&self, value: T, f: F) -> Result<R, RetryError<E>>
    where
        T: Clone,
        E: RetryableError + fmt::Display,
        F: Fn(T, u32) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let mut attempt: u32 = 0;
        let mut delay_base = self.delay_base;

        loop {
            let err = match f(value.clone(), attempt).await {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            if !self.is_retryable(&err) {
                return Err(RetryError::Terminal(err));
            }

            // The error might specify a number of seconds to wait before
            // retrying. If so, use it for the base value.
            if attempt == 0 {
                if let Some(hint) = err.retry_delay_hint() {
                    if hint > Duration::ZERO {
                        debug!(
                            "Overriding retry delay base with value specified by server: {} ms",
                            hint.as_millis()
                        );
                        delay_base = hint;
                    }
                }
            }

            if attempt >= self.limit {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = delay_base.mul_f64(BACKOFF_MULTIPLIER.powi(attempt as i32));
            warn!(
                "Attempt {}/{}{} failed with [{}], retrying in {} ms...",
                attempt + 1,
                self.limit + 1,
                if self.operation_name.is_empty() {
                    String::new()
                } else {
                    format!(" for \"{}\"", self.operation_name)
                },
                err,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
