// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::io;
use std::time::Duration;

use grpc_util::retry::{RetryError, RetryableError};
use tonic::{Code, Status};

/// Failures surfaced by the CAS client.
#[derive(Debug)]
pub enum ClientError {
    /// Connection, TLS or framing failure before a status was produced.
    Transport(String),
    /// Terminal non-OK status from a unary or streaming RPC.
    Rpc(Status),
    /// NOT_FOUND on a read: a cache miss rather than a transport failure.
    /// Never retried.
    NotFound(Status),
    /// Contract violation by the caller.
    InvalidArgument(String),
    /// Local filesystem failure.
    Io(io::Error),
    /// Downloaded or committed data does not match what was requested.
    Integrity(String),
    /// The retry envelope exhausted its budget; the last underlying status
    /// is preserved.
    RetryExhausted { attempts: u32, last: Status },
}

impl ClientError {
    /// Classify a status from a read RPC, so that callers can distinguish a
    /// cache miss from a transport failure.
    pub(crate) fn from_read_status(status: Status) -> ClientError {
        if status.code() == Code::NotFound {
            ClientError::NotFound(status)
        } else {
            ClientError::Rpc(status)
        }
    }

    /// An approximation of this error as a gRPC status, for per-blob result
    /// reporting.
    pub fn to_status(&self) -> Status {
        match self {
            ClientError::Rpc(status) | ClientError::NotFound(status) => status.clone(),
            ClientError::RetryExhausted { last, .. } => last.clone(),
            ClientError::InvalidArgument(msg) => Status::invalid_argument(msg.clone()),
            other => Status::internal(other.to_string()),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(msg) => write!(f, "transport failure: {msg}"),
            ClientError::Rpc(status) => {
                write!(f, "{:?}: {:?}", status.code(), status.message())
            }
            ClientError::NotFound(status) => write!(f, "blob not found: {:?}", status.message()),
            ClientError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            ClientError::Io(err) => write!(f, "i/o error: {err}"),
            ClientError::Integrity(msg) => write!(f, "integrity failure: {msg}"),
            ClientError::RetryExhausted { attempts, last } => write!(
                f,
                "retry limit ({attempts}) exceeded, last error was [{:?}: {:?}]",
                last.code(),
                last.message()
            ),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(err)
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Rpc(status)
    }
}

impl RetryableError for ClientError {
    fn code(&self) -> Option<Code> {
        match self {
            ClientError::Rpc(status) => Some(status.code()),
            _ => None,
        }
    }

    fn retry_delay_hint(&self) -> Option<Duration> {
        match self {
            ClientError::Rpc(status) => status.retry_delay_hint(),
            _ => None,
        }
    }
}

impl From<RetryError<ClientError>> for ClientError {
    fn from(err: RetryError<ClientError>) -> Self {
        match err {
            RetryError::Terminal(err) => err,
            RetryError::Exhausted { attempts, last } => match last {
                ClientError::Rpc(status) => ClientError::RetryExhausted {
                    attempts,
                    last: status,
                },
                other => other,
            },
        }
    }
}

impl From<RetryError<Status>> for ClientError {
    fn from(err: RetryError<Status>) -> Self {
        match err {
            RetryError::Terminal(status) => ClientError::from(status),
            RetryError::Exhausted { attempts, last } => ClientError::RetryExhausted {
                attempts,
                last,
            },
        }
    }
}
