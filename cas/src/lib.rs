// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A client for the Remote Execution API content-addressable storage: the
//! byte-stream transport for single blobs, the batched blob APIs with
//! automatic size-based batching, directory upload/download, and the
//! BuildGrid LocalCAS extension for server-side staging and capture.

use std::collections::HashMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use grpc_util::auth::TokenSource;
use grpc_util::prost::MessageExt;
use grpc_util::retry::Retrier;
use grpc_util::{headers_to_http_header_map, layered_service, LayeredService};
use hashing::Digest;
use log::{debug, error, info, warn};
use merkle::{BlobSource, DigestBlobMap};
use protos::pb::build::bazel::remote::execution::v2 as remexec;
use protos::pb::build::buildgrid as localcas;
use protos::pb::google::bytestream;
use protos::pb::google::rpc;
use remexec::capabilities_client::CapabilitiesClient;
use remexec::content_addressable_storage_client::ContentAddressableStorageClient;
use bytestream::byte_stream_client::ByteStreamClient;
use localcas::local_content_addressable_storage_client::LocalContentAddressableStorageClient;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::metadata::{BinaryMetadataValue, MetadataKey, MetadataMap};
use tonic::{Code, Status};

mod batch;
mod error;
pub mod logstream;
mod options;
pub mod resource;

pub use batch::BatchLimits;
pub use error::ClientError;
pub use logstream::LogStreamWriter;
pub use options::ConnectionOptions;

/// Size of individual chunks on the byte-stream transport.
pub const BYTESTREAM_CHUNK_SIZE_BYTES: usize = 1024 * 1024;

// The default limit for gRPC messages is 4 MiB. The batch ceiling leaves
// headroom below it for metadata and framing.
const GRPC_DEFAULT_MAX_RECV_MESSAGE_LENGTH: usize = 4 * 1024 * 1024;
const MAX_ROOM_FOR_METADATA: usize = 1 << 16;
const DEFAULT_MAX_BATCH_TOTAL_SIZE_BYTES: usize =
    GRPC_DEFAULT_MAX_RECV_MESSAGE_LENGTH - MAX_ROOM_FOR_METADATA;

const REQUEST_METADATA_HEADER: &str = "build.bazel.remote.execution.v2.requestmetadata-bin";

const USER_AGENT: &str = concat!("remexec-client/", env!("CARGO_PKG_VERSION"));

/// One blob to upload: the digest the caller asserts, plus where its bytes
/// live.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub digest: Digest,
    pub source: BlobSource,
}

/// A blob that failed to upload, with its terminal status.
#[derive(Clone, Debug)]
pub struct UploadResult {
    pub digest: Digest,
    pub status: Status,
}

/// Per-digest terminal statuses of a batched download.
pub type DownloadResults = Vec<(Digest, rpc::Status)>;

/// hash -> (status, bytes) form of a batched download.
pub type DownloadBlobsResult = HashMap<String, (rpc::Status, Bytes)>;

/// hash -> every (path, is_executable) target the blob must be written to.
pub type OutputMap = HashMap<String, Vec<(PathBuf, bool)>>;

/// Callback receiving each successfully downloaded blob.
pub type WriteBlobCallback<'a> = dyn FnMut(&str, &Bytes) + Send + 'a;

pub fn ok_rpc_status() -> rpc::Status {
    rpc::Status {
        code: Code::Ok as i32,
        ..rpc::Status::default()
    }
}

fn rpc_status_from(status: &Status) -> rpc::Status {
    rpc::Status {
        code: status.code() as i32,
        message: status.message().to_owned(),
        ..rpc::Status::default()
    }
}

/// The CAS client. One instance addresses one remote endpoint; every public
/// operation is internally self-contained, and the upload UUID is assigned
/// once at connect time and then only read.
pub struct Client {
    instance_name: String,
    uuid: String,
    chunk_size_bytes: usize,
    retrier: Retrier,
    batch_limits: BatchLimits,
    max_batch_total_size_bytes: usize,
    byte_stream_client: Arc<ByteStreamClient<LayeredService>>,
    cas_client: Arc<ContentAddressableStorageClient<LayeredService>>,
    capabilities_client: Arc<CapabilitiesClient<LayeredService>>,
    local_cas_client: Arc<LocalContentAddressableStorageClient<LayeredService>>,
    request_metadata: remexec::RequestMetadata,
    request_metadata_header: Option<BinaryMetadataValue>,
    token_refresh_task: Option<tokio::task::JoinHandle<()>>,
}

impl Client {
    /// Bind a channel from the connection options and perform the
    /// capabilities handshake. If the server advertises a
    /// `max_batch_total_size_bytes` smaller than the internal default, the
    /// smaller value is adopted.
    pub async fn connect(options: &ConnectionOptions) -> Result<Client, ClientError> {
        options.validate()?;

        let tls_config = if options.is_secure() {
            let root_ca = options
                .server_cert_path
                .as_ref()
                .map(std::fs::read)
                .transpose()?;
            let mtls = match (&options.client_cert_path, &options.client_key_path) {
                (Some(cert), Some(key)) => Some((std::fs::read(cert)?, std::fs::read(key)?)),
                _ => None,
            };
            let config =
                grpc_util::tls::Config::new(root_ca, mtls).map_err(ClientError::Transport)?;
            Some(config.try_into().map_err(ClientError::Transport)?)
        } else {
            None
        };

        let channel = grpc_util::create_channel(&options.url, tls_config.as_ref())
            .await
            .map_err(ClientError::Transport)?;

        let token_source = options
            .access_token_path
            .as_ref()
            .map(TokenSource::load)
            .transpose()
            .map_err(ClientError::Transport)?;
        let token_refresh_task = match (&token_source, options.token_refresh_interval) {
            (Some(source), Some(interval)) => Some(source.spawn_refresh_task(interval)),
            _ => None,
        };

        let mut headers = std::collections::BTreeMap::new();
        headers.insert("user-agent".to_owned(), USER_AGENT.to_owned());
        let http_headers = headers_to_http_header_map(&headers).map_err(ClientError::Transport)?;

        let service = layered_service(
            channel,
            options.rpc_concurrency_limit,
            http_headers,
            token_source,
        );

        let byte_stream_client = Arc::new(ByteStreamClient::new(service.clone()));
        let cas_client = Arc::new(ContentAddressableStorageClient::new(service.clone()));
        let capabilities_client = Arc::new(CapabilitiesClient::new(service.clone()));
        let local_cas_client = Arc::new(LocalContentAddressableStorageClient::new(service));

        let retrier = Retrier::new(options.retry_limit, options.retry_delay);

        let mut client = Client {
            instance_name: options.instance_name.clone(),
            uuid: uuid::Uuid::new_v4().to_string(),
            chunk_size_bytes: BYTESTREAM_CHUNK_SIZE_BYTES,
            retrier,
            batch_limits: BatchLimits::default(),
            max_batch_total_size_bytes: DEFAULT_MAX_BATCH_TOTAL_SIZE_BYTES,
            byte_stream_client,
            cas_client,
            capabilities_client,
            local_cas_client,
            request_metadata: remexec::RequestMetadata::default(),
            request_metadata_header: None,
            token_refresh_task,
        };
        client.negotiate_capabilities().await?;
        Ok(client)
    }

    async fn negotiate_capabilities(&mut self) -> Result<(), ClientError> {
        debug!(
            "Setting max_batch_total_size_bytes = {} bytes by default",
            self.max_batch_total_size_bytes
        );

        let instance_name = self.instance_name.clone();
        let client = self.capabilities_client.as_ref().clone();
        let handshake = self
            .retrier
            .call(client, move |mut client, _| {
                let request = remexec::GetCapabilitiesRequest {
                    instance_name: instance_name.clone(),
                };
                async move {
                    client
                        .get_capabilities(tonic::Request::new(request))
                        .await
                        .map(|response| response.into_inner())
                }
            })
            .await;

        match handshake {
            Ok(capabilities) => {
                let server_max = capabilities
                    .cache_capabilities
                    .as_ref()
                    .map(|c| c.max_batch_total_size_bytes as usize)
                    .unwrap_or(0);
                // 0 means no server limit.
                if server_max > 0 && server_max < self.max_batch_total_size_bytes {
                    info!(
                        "Reconfiguring max_batch_total_size_bytes down from {} to {} due to \
                         server max_batch_total_size_bytes",
                        self.max_batch_total_size_bytes, server_max
                    );
                    self.max_batch_total_size_bytes = server_max;
                }
                Ok(())
            }
            Err(retry_error) => {
                let err = ClientError::from(retry_error);
                if let ClientError::Rpc(status) = &err {
                    if status.code() == Code::Unimplemented {
                        debug!("Get capabilities request unimplemented; using default: {err}");
                        return Ok(());
                    }
                }
                Err(err)
            }
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn set_instance_name(&mut self, instance_name: String) {
        self.instance_name = instance_name;
    }

    pub fn bytestream_chunk_size_bytes(&self) -> usize {
        self.chunk_size_bytes
    }

    pub fn max_batch_total_size_bytes(&self) -> usize {
        self.max_batch_total_size_bytes
    }

    pub fn set_tool_details(&mut self, tool_name: &str, tool_version: &str) {
        self.request_metadata.tool_details = Some(remexec::ToolDetails {
            tool_name: tool_name.to_owned(),
            tool_version: tool_version.to_owned(),
        });
        self.rebuild_metadata_header();
    }

    pub fn set_request_metadata(
        &mut self,
        action_id: &str,
        tool_invocation_id: &str,
        correlated_invocations_id: &str,
    ) {
        self.request_metadata.action_id = action_id.to_owned();
        self.request_metadata.tool_invocation_id = tool_invocation_id.to_owned();
        self.request_metadata.correlated_invocations_id = correlated_invocations_id.to_owned();
        self.rebuild_metadata_header();
    }

    fn rebuild_metadata_header(&mut self) {
        self.request_metadata_header = Some(BinaryMetadataValue::from_bytes(
            &self.request_metadata.to_bytes(),
        ));
    }

    fn attach_metadata(&self, metadata: &mut MetadataMap) {
        if let Some(value) = &self.request_metadata_header {
            metadata.insert_bin(
                MetadataKey::from_static(REQUEST_METADATA_HEADER),
                value.clone(),
            );
        }
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        self.attach_metadata(request.metadata_mut());
        request
    }

    pub fn make_resource_name(&self, digest: &Digest, is_upload: bool) -> String {
        if is_upload {
            resource::make_write_resource_name(&self.instance_name, &self.uuid, digest)
        } else {
            resource::make_read_resource_name(&self.instance_name, digest)
        }
    }

    /// Stream a blob into memory. NOT_FOUND is surfaced as
    /// `ClientError::NotFound` so callers can distinguish a cache miss from
    /// a transport failure; a size mismatch is an integrity failure.
    pub async fn fetch_string(&self, digest: Digest) -> Result<Bytes, ClientError> {
        let resource_name = self.make_resource_name(&digest, false);
        let client = self.byte_stream_client.as_ref().clone();

        self.retrier
            .call(client, move |mut client, _| {
                let resource_name = resource_name.clone();
                async move {
                    let request = self.request(bytestream::ReadRequest {
                        resource_name,
                        read_offset: 0,
                        // 0 means no limit.
                        read_limit: 0,
                    });
                    let mut stream = client
                        .read(request)
                        .await
                        .map_err(ClientError::from_read_status)?
                        .into_inner();

                    let mut downloaded = BytesMut::with_capacity(digest.size_bytes);
                    while let Some(response) = stream.next().await {
                        let response = response.map_err(ClientError::from_read_status)?;
                        downloaded.extend_from_slice(&response.data);
                    }

                    if downloaded.len() != digest.size_bytes {
                        return Err(ClientError::Integrity(format!(
                            "Expected {} bytes, but downloaded blob was {} bytes",
                            digest.size_bytes,
                            downloaded.len()
                        )));
                    }
                    Ok(downloaded.freeze())
                }
            })
            .await
            .map_err(ClientError::from)
    }

    /// Stream a blob straight into an open file, verifying the final size.
    pub async fn download_file(
        &self,
        file: &mut tokio::fs::File,
        digest: Digest,
    ) -> Result<(), ClientError> {
        let resource_name = self.make_resource_name(&digest, false);
        let client = self.byte_stream_client.as_ref().clone();
        let destination = Arc::new(Mutex::new(file));

        self.retrier
            .call(
                (client, destination),
                move |(mut client, destination), retry_attempt| {
                    let resource_name = resource_name.clone();
                    async move {
                        let mut file = destination.lock().await;
                        if retry_attempt > 0 {
                            // Start the whole write fresh.
                            file.rewind().await?;
                            file.set_len(0).await?;
                        }

                        let request = self.request(bytestream::ReadRequest {
                            resource_name,
                            read_offset: 0,
                            read_limit: 0,
                        });
                        let mut stream = client
                            .read(request)
                            .await
                            .map_err(ClientError::from_read_status)?
                            .into_inner();

                        while let Some(response) = stream.next().await {
                            let response = response.map_err(ClientError::from_read_status)?;
                            file.write_all(&response.data).await?;
                        }
                        file.flush().await?;

                        let written = file.metadata().await?.len();
                        if written != digest.size_bytes as u64 {
                            return Err(ClientError::Integrity(format!(
                                "Expected {} bytes, but downloaded blob was {written} bytes",
                                digest.size_bytes
                            )));
                        }
                        Ok(())
                    }
                },
            )
            .await
            .map_err(ClientError::from)
    }

    pub async fn fetch_message<M: prost::Message + Default>(
        &self,
        digest: Digest,
    ) -> Result<M, ClientError> {
        let blob = self.fetch_string(digest).await?;
        M::decode(blob).map_err(|err| {
            ClientError::Integrity(format!("Could not decode message {digest:?}: {err}"))
        })
    }

    /// Upload an in-memory blob over the byte stream in chunk-sized writes
    /// with cumulative offsets; the final chunk sets `finish_write`.
    pub async fn upload_bytes(&self, bytes: Bytes, digest: Digest) -> Result<(), ClientError> {
        if bytes.len() != digest.size_bytes {
            return Err(ClientError::InvalidArgument(format!(
                "Digest length of {} bytes for {} does not match data length of {} bytes",
                digest.size_bytes,
                digest.hash,
                bytes.len()
            )));
        }

        let resource_name = self.make_resource_name(&digest, true);
        let client = self.byte_stream_client.as_ref().clone();
        let chunk_size_bytes = self.chunk_size_bytes;

        self.retrier
            .call((client, bytes), move |(mut client, bytes), _| {
                let resource_name = resource_name.clone();
                async move {
                    let len = bytes.len();
                    let stream = async_stream::stream! {
                        if len == 0 {
                            // An empty blob still needs one (finishing) write.
                            yield bytestream::WriteRequest {
                                resource_name: resource_name.clone(),
                                write_offset: 0,
                                finish_write: true,
                                data: Bytes::new(),
                            };
                            return;
                        }

                        let mut offset = 0;
                        while offset < len {
                            let end = (offset + chunk_size_bytes).min(len);
                            yield bytestream::WriteRequest {
                                resource_name: resource_name.clone(),
                                write_offset: offset as i64,
                                finish_write: end == len,
                                data: bytes.slice(offset..end),
                            };
                            offset = end;
                        }
                    };

                    let response = client
                        .write(self.streaming_request(stream))
                        .await
                        .map_err(ClientError::from)?
                        .into_inner();
                    if response.committed_size != digest.size_bytes as i64 {
                        return Err(ClientError::Integrity(format!(
                            "Uploading {}: want committed size {} but got {}",
                            digest.hash, digest.size_bytes, response.committed_size
                        )));
                    }
                    Ok(())
                }
            })
            .await
            .map_err(ClientError::from)
    }

    /// Stream a file's contents over the byte stream. Reaching EOF before
    /// `digest.size_bytes` is an error; extra data past the expected length
    /// is not sent.
    pub async fn upload_file(
        &self,
        file: tokio::fs::File,
        digest: Digest,
    ) -> Result<(), ClientError> {
        let resource_name = self.make_resource_name(&digest, true);
        let source = Arc::new(Mutex::new(file));
        let chunk_size_bytes = self.chunk_size_bytes;

        self.retrier
            .call(source, move |source, _| {
                let resource_name = resource_name.clone();
                async move {
                    source.lock().await.rewind().await?;

                    // Errors reading the source surface out of band: the
                    // request stream can only yield requests.
                    let read_error: Arc<parking_lot::Mutex<Option<ClientError>>> =
                        Arc::new(parking_lot::Mutex::new(None));
                    let read_error_stream = read_error.clone();

                    let len = digest.size_bytes;
                    let stream_source = source.clone();
                    let stream = async_stream::stream! {
                        if len == 0 {
                            yield bytestream::WriteRequest {
                                resource_name: resource_name.clone(),
                                write_offset: 0,
                                finish_write: true,
                                data: Bytes::new(),
                            };
                            return;
                        }

                        let mut file = stream_source.lock().await;
                        let reader = tokio_util::io::ReaderStream::with_capacity(
                            &mut *file,
                            chunk_size_bytes,
                        );
                        let mut sent = 0;
                        for await read_result in reader {
                            match read_result {
                                Ok(data) => {
                                    // The chunk that completes the expected
                                    // length is the last one, even if the
                                    // file has more data.
                                    let data = if sent + data.len() > len {
                                        data.slice(0..len - sent)
                                    } else {
                                        data
                                    };
                                    let write_offset = sent as i64;
                                    sent += data.len();
                                    let finish_write = sent == len;
                                    yield bytestream::WriteRequest {
                                        resource_name: resource_name.clone(),
                                        write_offset,
                                        finish_write,
                                        data,
                                    };
                                    if finish_write {
                                        break;
                                    }
                                }
                                Err(err) => {
                                    *read_error_stream.lock() = Some(ClientError::Io(err));
                                    break;
                                }
                            }
                        }
                        if sent < len {
                            let mut slot = read_error_stream.lock();
                            if slot.is_none() {
                                *slot = Some(ClientError::Integrity(format!(
                                    "Upload failed: unexpected end of file after {sent} of {len} bytes"
                                )));
                            }
                        }
                    };

                    let mut client = self.byte_stream_client.as_ref().clone();
                    let result = client.write(self.streaming_request(stream)).await;

                    // A local read failure is the interesting root cause even
                    // when the server also reports a short write.
                    if let Some(err) = read_error.lock().take() {
                        return Err(err);
                    }

                    let response = result.map_err(ClientError::from)?.into_inner();
                    if response.committed_size != len as i64 {
                        return Err(ClientError::Integrity(format!(
                            "Uploading {}: want committed size {len} but got {}",
                            digest.hash, response.committed_size
                        )));
                    }
                    Ok(())
                }
            })
            .await
            .map_err(ClientError::from)
    }

    async fn upload_request(&self, request: &UploadRequest) -> Result<(), ClientError> {
        match &request.source {
            BlobSource::Inline(bytes) => self.upload_bytes(bytes.clone(), request.digest).await,
            BlobSource::OnDisk(path) => {
                let file = tokio::fs::File::open(path).await?;
                self.upload_file(file, request.digest).await
            }
        }
    }

    /// Upload a set of blobs, batching small ones and streaming over-large
    /// ones individually. Returns the per-blob failures; with
    /// `throw_on_error` the first failure is raised instead.
    pub async fn upload_blobs(
        &self,
        requests: Vec<UploadRequest>,
        throw_on_error: bool,
    ) -> Result<Vec<UploadResult>, ClientError> {
        let mut request_list = requests;
        // Sorting ascending by size lets the batcher greedily pack as many
        // digests as possible into each request.
        request_list.sort_by_key(|r| r.digest.size_bytes);
        let digests: Vec<Digest> = request_list.iter().map(|r| r.digest).collect();

        let batches = batch::make_batches(
            &self.batch_limits,
            self.max_batch_total_size_bytes,
            &digests,
        );

        let mut results = Vec::new();
        for range in &batches {
            match self.batch_upload(&request_list[range.clone()]).await {
                Ok(mut not_uploaded) => results.append(&mut not_uploaded),
                Err(err) => {
                    // The whole batch request failed.
                    error!("Batch upload failed: {err}");
                    if throw_on_error {
                        return Err(err);
                    }
                    let failed_status = Status::internal(err.to_string());
                    for request in &request_list[range.clone()] {
                        results.push(UploadResult {
                            digest: request.digest,
                            status: failed_status.clone(),
                        });
                    }
                }
            }
        }

        // Anything past the final batch is too large for the batch API and
        // goes over the byte stream.
        let batch_end = batches.last().map(|range| range.end).unwrap_or(0);
        for request in &request_list[batch_end..] {
            if let Err(err) = self.upload_request(request).await {
                error!("Failed to upload blob: {err}");
                if throw_on_error {
                    return Err(err);
                }
                results.push(UploadResult {
                    digest: request.digest,
                    status: err.to_status(),
                });
            }
        }

        Ok(results)
    }

    async fn batch_upload(
        &self,
        requests: &[UploadRequest],
    ) -> Result<Vec<UploadResult>, ClientError> {
        let mut entries = Vec::with_capacity(requests.len());
        for request in requests {
            let data = match &request.source {
                BlobSource::Inline(bytes) => bytes.clone(),
                BlobSource::OnDisk(path) => Bytes::from(tokio::fs::read(path).await?),
            };
            if data.len() != request.digest.size_bytes {
                return Err(ClientError::InvalidArgument(format!(
                    "Digest length of {} bytes for {} does not match data length of {} bytes",
                    request.digest.size_bytes,
                    request.digest.hash,
                    data.len()
                )));
            }
            entries.push(remexec::batch_update_blobs_request::Request {
                digest: Some(request.digest.into()),
                data,
                compressor: remexec::compressor::Value::Identity as i32,
            });
        }

        let request = remexec::BatchUpdateBlobsRequest {
            instance_name: self.instance_name.clone(),
            requests: entries,
            ..remexec::BatchUpdateBlobsRequest::default()
        };

        let client = self.cas_client.as_ref().clone();
        let response = self
            .retrier
            .call((client, request), move |(mut client, request), _| {
                async move { client.batch_update_blobs(self.request(request)).await }
            })
            .await
            .map_err(ClientError::from)?
            .into_inner();

        let mut not_uploaded = Vec::new();
        for entry in response.responses {
            let status = entry.status.unwrap_or_default();
            if status.code != Code::Ok as i32 {
                let digest = protos::require_digest(entry.digest.as_ref())
                    .map_err(ClientError::InvalidArgument)?;
                not_uploaded.push(UploadResult {
                    digest,
                    status: Status::new(Code::from_i32(status.code), status.message),
                });
            }
        }
        Ok(not_uploaded)
    }

    /// Download a set of blobs, invoking `write_blob(hash, data)` for each
    /// one received (at most once per digest). Over-large blobs fall back to
    /// the byte-stream path. Per-digest terminal statuses are returned; with
    /// `throw_on_error` the first failure is raised instead.
    pub async fn download_blobs(
        &self,
        digests: &[Digest],
        write_blob: &mut WriteBlobCallback<'_>,
        throw_on_error: bool,
    ) -> Result<DownloadResults, ClientError> {
        let mut request_list = digests.to_vec();
        request_list.sort_by_key(|d| d.size_bytes);

        let batches = batch::make_batches(
            &self.batch_limits,
            self.max_batch_total_size_bytes,
            &request_list,
        );

        let mut download_results = Vec::new();
        for range in &batches {
            let chunk = &request_list[range.clone()];
            match self.batch_download(chunk).await {
                Ok(responses) => {
                    for (digest, status, data) in responses {
                        if status.code == Code::Ok as i32 {
                            if let Some(data) = &data {
                                write_blob(&digest.hash.to_hex(), data);
                            }
                        }
                        download_results.push((digest, status));
                    }
                }
                Err(err) => {
                    // The whole batch request failed.
                    error!("Batch download failed: {err}");
                    if throw_on_error {
                        return Err(err);
                    }
                    let failed_status = rpc::Status {
                        code: Code::Internal as i32,
                        message: err.to_string(),
                        ..rpc::Status::default()
                    };
                    for digest in chunk {
                        download_results.push((*digest, failed_status.clone()));
                    }
                }
            }
        }

        let batch_end = batches.last().map(|range| range.end).unwrap_or(0);
        for digest in &request_list[batch_end..] {
            match self.fetch_string(*digest).await {
                Ok(data) => {
                    write_blob(&digest.hash.to_hex(), &data);
                    download_results.push((*digest, ok_rpc_status()));
                }
                Err(err) => {
                    error!("Failed to fetch blob: {err}");
                    if throw_on_error {
                        return Err(err);
                    }
                    download_results.push((*digest, rpc_status_from(&err.to_status())));
                }
            }
        }

        Ok(download_results)
    }

    async fn batch_download(
        &self,
        digests: &[Digest],
    ) -> Result<Vec<(Digest, rpc::Status, Option<Bytes>)>, ClientError> {
        let request = remexec::BatchReadBlobsRequest {
            instance_name: self.instance_name.clone(),
            digests: digests.iter().map(|d| d.into()).collect(),
            acceptable_compressors: vec![],
            ..remexec::BatchReadBlobsRequest::default()
        };

        let client = self.cas_client.as_ref().clone();
        let response = self
            .retrier
            .call((client, request), move |(mut client, request), _| {
                async move { client.batch_read_blobs(self.request(request)).await }
            })
            .await
            .map_err(ClientError::from)?
            .into_inner();

        let mut results = Vec::with_capacity(response.responses.len());
        for entry in response.responses {
            let digest = protos::require_digest(entry.digest.as_ref())
                .map_err(ClientError::InvalidArgument)?;
            let mut status = entry.status.unwrap_or_default();
            let data = if status.code == Code::Ok as i32 {
                if entry.data.len() == digest.size_bytes {
                    Some(entry.data)
                } else {
                    status = rpc::Status {
                        code: Code::Internal as i32,
                        message: format!(
                            "Expected {} bytes, but batch entry had {} bytes",
                            digest.size_bytes,
                            entry.data.len()
                        ),
                        ..rpc::Status::default()
                    };
                    None
                }
            } else {
                None
            };
            results.push((digest, status, data));
        }
        Ok(results)
    }

    /// hash -> (status, bytes) convenience form of `download_blobs`.
    pub async fn download_blobs_to_map(
        &self,
        digests: &[Digest],
    ) -> Result<DownloadBlobsResult, ClientError> {
        let mut downloaded: DownloadBlobsResult = HashMap::new();
        let results = {
            let mut write_blob = |hash: &str, data: &Bytes| {
                downloaded.insert(hash.to_owned(), (ok_rpc_status(), data.clone()));
            };
            self.download_blobs(digests, &mut write_blob, false).await?
        };

        for (digest, status) in results {
            if status.code != Code::Ok as i32 {
                downloaded.insert(digest.hash.to_hex(), (status, Bytes::new()));
            }
        }
        Ok(downloaded)
    }

    /// Download blobs and atomically write each one to all of its target
    /// paths with mode 0644 (0755 when executable). Aborts on the first
    /// failure.
    pub async fn download_blobs_to_paths(
        &self,
        digests: &[Digest],
        outputs: &OutputMap,
    ) -> Result<(), ClientError> {
        let mut first_error: Option<ClientError> = None;
        {
            let mut write_blob = |hash: &str, data: &Bytes| {
                if first_error.is_some() {
                    return;
                }
                let Some(targets) = outputs.get(hash) else {
                    return;
                };
                for (path, is_executable) in targets {
                    let mode = if *is_executable { 0o755 } else { 0o644 };
                    if let Err(err) = write_file_atomically(path, data, mode) {
                        first_error = Some(ClientError::Io(err));
                        return;
                    }
                }
            };
            self.download_blobs(digests, &mut write_blob, true).await?;
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Query which of the given digests the server does not have. The
    /// request list is partitioned so each RPC stays well under the message
    /// size limit.
    pub async fn find_missing_blobs(&self, digests: &[Digest]) -> Result<Vec<Digest>, ClientError> {
        let requests =
            batch::partition_find_missing(&self.instance_name, digests, self.chunk_size_bytes);

        let futures = requests
            .into_iter()
            .map(|request| {
                let client = self.cas_client.as_ref().clone();
                self.retrier
                    .call((client, request), move |(mut client, request), _| {
                        async move { client.find_missing_blobs(self.request(request)).await }
                    })
            })
            .collect::<Vec<_>>();

        let mut missing = Vec::new();
        for response in futures::future::join_all(futures).await {
            let response = response.map_err(ClientError::from)?.into_inner();
            for digest in response.missing_blob_digests {
                missing.push(
                    Digest::try_from(digest).map_err(ClientError::InvalidArgument)?,
                );
            }
        }
        Ok(missing)
    }

    /// Merkle-ize `path`, ask the server which blobs are missing, and upload
    /// only those. Returns the per-blob failures, the root `Directory`
    /// digest, and the corresponding `Tree`.
    pub async fn upload_directory(
        &self,
        path: &Path,
    ) -> Result<(Vec<UploadResult>, Digest, remexec::Tree), ClientError> {
        let mut blob_map: DigestBlobMap = HashMap::new();
        let nested = merkle::make_nested_directory(path, false, &[], Some(&mut blob_map))?;
        let root_digest = nested.to_digest(Some(&mut blob_map));

        let digests: Vec<Digest> = blob_map.keys().copied().collect();
        let missing = self.find_missing_blobs(&digests).await?;

        let mut upload_requests = Vec::with_capacity(missing.len());
        for digest in missing {
            let Some(source) = blob_map.get(&digest) else {
                continue;
            };
            upload_requests.push(UploadRequest {
                digest,
                source: source.clone(),
            });
        }

        let tree = nested.to_tree();
        let failures = self.upload_blobs(upload_requests, false).await?;
        Ok((failures, root_digest, tree))
    }

    pub async fn upload_message<M: prost::Message>(
        &self,
        message: &M,
    ) -> Result<Digest, ClientError> {
        let blob = message.to_bytes();
        let digest = Digest::of_bytes(&blob);
        self.upload_bytes(blob, digest).await?;
        Ok(digest)
    }

    /// Recursively materialize the directory identified by `digest` under
    /// `path`: files at each level via one batched blob download, child
    /// directories by recursion, symlinks verbatim.
    pub async fn download_directory(&self, digest: Digest, path: &Path) -> Result<(), ClientError> {
        self.download_directory_inner(digest, path.to_owned())
            .await
    }

    fn download_directory_inner(
        &self,
        digest: Digest,
        path: PathBuf,
    ) -> BoxFuture<'_, Result<(), ClientError>> {
        async move {
            let directory: remexec::Directory = self.fetch_message(digest).await?;
            protos::verify_directory_canonical(digest, &directory)
                .map_err(ClientError::Integrity)?;

            let mut file_digests = Vec::with_capacity(directory.files.len());
            let mut outputs: OutputMap = HashMap::new();
            for file in &directory.files {
                let file_digest = protos::require_digest(file.digest.as_ref())
                    .map_err(ClientError::InvalidArgument)?;
                file_digests.push(file_digest);
                outputs
                    .entry(file_digest.hash.to_hex())
                    .or_default()
                    .push((path.join(&file.name), file.is_executable));
            }
            self.download_blobs_to_paths(&file_digests, &outputs).await?;

            for directory_node in &directory.directories {
                let directory_path = path.join(&directory_node.name);
                std::fs::create_dir(&directory_path)?;
                let child_digest = protos::require_digest(directory_node.digest.as_ref())
                    .map_err(ClientError::InvalidArgument)?;
                self.download_directory_inner(child_digest, directory_path)
                    .await?;
            }

            // Just create the symlink; it is not this client's job to ensure
            // the target is valid or has contents.
            for symlink_node in &directory.symlinks {
                if symlink_node.target.is_empty() || symlink_node.name.is_empty() {
                    warn!("Symlink node name or target empty, skipping.");
                    continue;
                }
                std::os::unix::fs::symlink(&symlink_node.target, path.join(&symlink_node.name))?;
            }

            Ok(())
        }
        .boxed()
    }

    /// Accumulate the transitive `Directory` closure of `root_digest` from
    /// the server's streaming GetTree.
    pub async fn get_tree(&self, root_digest: Digest) -> Result<Vec<remexec::Directory>, ClientError> {
        let client = self.cas_client.as_ref().clone();
        let root: remexec::Digest = root_digest.into();

        self.retrier
            .call((client, root), move |(mut client, root), _| async move {
                let request = self.request(remexec::GetTreeRequest {
                    instance_name: self.instance_name.clone(),
                    root_digest: Some(root),
                    ..remexec::GetTreeRequest::default()
                });
                let mut stream = client
                    .get_tree(request)
                    .await
                    .map_err(ClientError::from_read_status)?
                    .into_inner();

                let mut tree = Vec::new();
                while let Some(response) = stream.next().await {
                    let response = response.map_err(ClientError::from_read_status)?;
                    tree.extend(response.directories);
                }
                Ok::<_, ClientError>(tree)
            })
            .await
            .map_err(ClientError::from)
    }

    /// Ask the LocalCAS server to merkle-ize directories on its side.
    pub async fn capture_tree(
        &self,
        paths: &[String],
        properties: &[String],
        bypass_local_cache: bool,
    ) -> Result<localcas::CaptureTreeResponse, ClientError> {
        let request = localcas::CaptureTreeRequest {
            instance_name: self.instance_name.clone(),
            path: paths.to_vec(),
            bypass_local_cache,
            node_properties: properties.to_vec(),
        };
        let client = self.local_cas_client.as_ref().clone();
        self.retrier
            .call((client, request), move |(mut client, request), _| {
                async move { client.capture_tree(self.request(request)).await }
            })
            .await
            .map(|response| response.into_inner())
            .map_err(ClientError::from)
    }

    pub async fn capture_files(
        &self,
        paths: &[String],
        properties: &[String],
        bypass_local_cache: bool,
    ) -> Result<localcas::CaptureFilesResponse, ClientError> {
        let request = localcas::CaptureFilesRequest {
            instance_name: self.instance_name.clone(),
            path: paths.to_vec(),
            bypass_local_cache,
            node_properties: properties.to_vec(),
        };
        let client = self.local_cas_client.as_ref().clone();
        self.retrier
            .call((client, request), move |(mut client, request), _| {
                async move { client.capture_files(self.request(request)).await }
            })
            .await
            .map(|response| response.into_inner())
            .map_err(ClientError::from)
    }

    /// Ask the LocalCAS server to stage `root_digest` as a local directory.
    /// The staging stays pinned for as long as the returned handle lives.
    pub async fn stage(
        &self,
        root_digest: Digest,
        path: Option<&Path>,
    ) -> Result<StagedTreeHandle, ClientError> {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let initial = localcas::StageTreeRequest {
            instance_name: self.instance_name.clone(),
            root_digest: Some(root_digest.into()),
            path: path.map(|p| p.display().to_string()).unwrap_or_default(),
        };
        sender
            .send(initial)
            .map_err(|_| ClientError::Transport("stage stream closed before start".to_owned()))?;

        let mut client = self.local_cas_client.as_ref().clone();
        let mut responses = client
            .stage_tree(self.streaming_request(UnboundedReceiverStream::new(receiver)))
            .await
            .map_err(ClientError::from)?
            .into_inner();

        let response = match responses.next().await {
            Some(Ok(response)) => response,
            Some(Err(status)) => return Err(ClientError::from(status)),
            None => {
                return Err(ClientError::Transport(format!(
                    "Error staging {root_digest:?}: stream closed without a response"
                )))
            }
        };

        Ok(StagedTreeHandle {
            path: PathBuf::from(response.path),
            sender: Some(sender),
            _responses: Mutex::new(responses),
        })
    }

    /// A writer for the named append-only log-stream resource.
    pub fn log_stream_writer(&self, resource_name: &str) -> LogStreamWriter {
        LogStreamWriter::new(
            resource_name.to_owned(),
            self.byte_stream_client.as_ref().clone(),
            self.retrier.clone(),
        )
    }

    fn streaming_request<S>(&self, stream: S) -> tonic::Request<S> {
        let mut request = tonic::Request::new(stream);
        self.attach_metadata(request.metadata_mut());
        request
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(task) = &self.token_refresh_task {
            task.abort();
        }
    }
}

/// A directory tree staged on the server side. Dropping the handle writes
/// an empty terminating request and closes the stream, which is the
/// server's signal to release the staging. Owns its stream exclusively.
pub struct StagedTreeHandle {
    path: PathBuf,
    sender: Option<UnboundedSender<localcas::StageTreeRequest>>,
    _responses: Mutex<tonic::codec::Streaming<localcas::StageTreeResponse>>,
}

impl StagedTreeHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedTreeHandle {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(localcas::StageTreeRequest::default());
            // Dropping the sender closes the write side of the stream.
        }
    }
}

/// Write `data` to `path` atomically: write a uniquely named temp file in
/// the same directory, then hard-link it into place. EEXIST on the link
/// means another writer already produced the same content-addressed file,
/// which is success.
pub fn write_file_atomically(path: &Path, data: &[u8], mode: u32) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file()
        .set_permissions(std::fs::Permissions::from_mode(mode))?;
    match std::fs::hard_link(temp.path(), path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err),
    }
}
