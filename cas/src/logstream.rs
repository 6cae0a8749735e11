// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! An append-only writer for a byte-stream log resource (a running
//! command's stdout or stderr).
//!
//! The server may block the initial `QueryWriteStatus` until a reader
//! attaches, or answer NOT_FOUND when nobody is interested - in which case
//! the writer silently abandons all subsequent writes.

use bytes::Bytes;
use grpc_util::retry::Retrier;
use grpc_util::LayeredService;
use log::{debug, error};
use protos::pb::google::bytestream;
use protos::pb::google::bytestream::byte_stream_client::ByteStreamClient;
use tokio::sync::mpsc::UnboundedSender;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    New,
    Ready,
    Abandoned,
    Committed,
}

/// Exclusive-owned, not shareable across threads. `write` returns false and
/// gives up silently when the stream has no subscriber or breaks; using the
/// writer after `commit` is a programming error and panics.
pub struct LogStreamWriter {
    resource_name: String,
    client: ByteStreamClient<LayeredService>,
    retrier: Retrier,
    state: State,
    write_offset: i64,
    sender: Option<UnboundedSender<bytestream::WriteRequest>>,
    response: Option<
        tokio::task::JoinHandle<Result<tonic::Response<bytestream::WriteResponse>, tonic::Status>>,
    >,
}

impl LogStreamWriter {
    pub(crate) fn new(
        resource_name: String,
        client: ByteStreamClient<LayeredService>,
        retrier: Retrier,
    ) -> LogStreamWriter {
        LogStreamWriter {
            resource_name,
            client,
            retrier,
            state: State::New,
            write_offset: 0,
            sender: None,
            response: None,
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// Append `data` at the running offset. The first call gates on
    /// `QueryWriteStatus`; if that fails (for example NOT_FOUND because no
    /// reader subscribed) the writer abandons silently and every call
    /// returns false from then on.
    pub async fn write(&mut self, data: &[u8]) -> bool {
        match self.state {
            State::Committed => panic!("Attempted to `write()` after `commit()`."),
            State::Abandoned => return false,
            State::New => {
                debug!(
                    "First call to `write()`. Issuing a `QueryWriteStatus()` request and \
                     waiting for it to return..."
                );
                if !self.query_stream_write_status().await {
                    debug!("`QueryWriteStatus()` failed. Abandoning the log stream.");
                    self.state = State::Abandoned;
                    return false;
                }
                self.state = State::Ready;
                self.open_stream();
            }
            State::Ready => {}
        }

        let request = bytestream::WriteRequest {
            resource_name: self.resource_name.clone(),
            write_offset: self.write_offset,
            finish_write: false,
            data: Bytes::copy_from_slice(data),
        };
        match self.sender.as_ref().map(|sender| sender.send(request)) {
            Some(Ok(())) => {
                self.write_offset += data.len() as i64;
                true
            }
            _ => {
                debug!("Log stream upload failed: broken stream");
                self.state = State::Abandoned;
                false
            }
        }
    }

    /// Send the final empty request with `finish_write`, drain the stream,
    /// and compare the server's committed size against the local offset.
    /// A second commit is a programming error and panics.
    pub async fn commit(&mut self) -> bool {
        match self.state {
            State::Committed => panic!("Attempted to `commit()` an already committed write."),
            State::Abandoned => return false,
            State::New => {
                // Nothing was written; still open the stream so the commit
                // request reaches the server.
                self.open_stream();
            }
            State::Ready => {}
        }
        self.state = State::Committed;

        let request = bytestream::WriteRequest {
            resource_name: self.resource_name.clone(),
            write_offset: self.write_offset,
            finish_write: true,
            data: Bytes::new(),
        };
        let Some(sender) = self.sender.take() else {
            return false;
        };
        if sender.send(request).is_err() {
            debug!("Log stream commit failed: broken stream");
            return false;
        }
        // Closing the send side lets the server finish the call.
        drop(sender);

        let response = match self.response.take() {
            Some(handle) => handle.await,
            None => return false,
        };
        let response = match response {
            Ok(Ok(response)) => response.into_inner(),
            Ok(Err(status)) => {
                error!("Log stream commit failed: {status:?}");
                return false;
            }
            Err(join_error) => {
                error!("Log stream commit failed: {join_error}");
                return false;
            }
        };

        if response.committed_size != self.write_offset {
            // DATA_LOSS: the server retained less than was written.
            error!(
                "Server reported uncommitted data: {} of {} bytes",
                response.committed_size, self.write_offset
            );
            return false;
        }
        true
    }

    async fn query_stream_write_status(&self) -> bool {
        let client = self.client.clone();
        let resource_name = self.resource_name.clone();
        self.retrier
            .call(client, move |mut client, _| {
                let request = bytestream::QueryWriteStatusRequest {
                    resource_name: resource_name.clone(),
                };
                async move {
                    client
                        .query_write_status(tonic::Request::new(request))
                        .await
                }
            })
            .await
            .is_ok()
    }

    fn open_stream(&mut self) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let mut client = self.client.clone();
        self.sender = Some(sender);
        self.response = Some(tokio::spawn(async move {
            client
                .write(tonic::Request::new(UnboundedReceiverStream::new(receiver)))
                .await
        }));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use grpc_util::retry::Retrier;
    use protos::pb::google::bytestream::byte_stream_client::ByteStreamClient;

    use super::LogStreamWriter;

    /// A writer addressing an endpoint nothing listens on: every RPC fails
    /// immediately with a connection error.
    async fn unreachable_writer() -> LogStreamWriter {
        let channel = grpc_util::create_channel("grpc://127.0.0.1:1", None)
            .await
            .unwrap();
        let headers = grpc_util::headers_to_http_header_map(&BTreeMap::new()).unwrap();
        let service = grpc_util::layered_service(channel, 1, headers, None);
        LogStreamWriter::new(
            "logs/stdout/123".to_owned(),
            ByteStreamClient::new(service),
            Retrier::new(0, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn write_abandons_silently_without_a_subscriber() {
        let mut writer = unreachable_writer().await;
        // The QueryWriteStatus gate fails, so the writer gives up without
        // an error, and stays abandoned.
        assert!(!writer.write(b"one").await);
        assert!(!writer.write(b"two").await);
        assert!(!writer.commit().await);
    }

    #[tokio::test]
    async fn commit_on_broken_stream_reports_failure() {
        let mut writer = unreachable_writer().await;
        assert!(!writer.commit().await);
    }

    #[tokio::test]
    #[should_panic(expected = "already committed")]
    async fn double_commit_fails_loudly() {
        let mut writer = unreachable_writer().await;
        let _ = writer.commit().await;
        let _ = writer.commit().await;
    }

    #[tokio::test]
    #[should_panic(expected = "after `commit()`")]
    async fn write_after_commit_fails_loudly() {
        let mut writer = unreachable_writer().await;
        let _ = writer.commit().await;
        let _ = writer.write(b"too late").await;
    }
}
