// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

// NOTE: The nested module structure mirrors the proto packages because
// generated code relies on it to refer to types in other packages.

pub mod google {
    pub mod rpc {
        /// The canonical gRPC status codes.
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
        )]
        #[repr(i32)]
        pub enum Code {
            Ok = 0,
            Cancelled = 1,
            Unknown = 2,
            InvalidArgument = 3,
            DeadlineExceeded = 4,
            NotFound = 5,
            AlreadyExists = 6,
            PermissionDenied = 7,
            ResourceExhausted = 8,
            FailedPrecondition = 9,
            Aborted = 10,
            OutOfRange = 11,
            Unimplemented = 12,
            Internal = 13,
            Unavailable = 14,
            DataLoss = 15,
            Unauthenticated = 16,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Status {
            #[prost(int32, tag = "1")]
            pub code: i32,
            #[prost(string, tag = "2")]
            pub message: ::prost::alloc::string::String,
            #[prost(message, repeated, tag = "3")]
            pub details: ::prost::alloc::vec::Vec<::prost_types::Any>,
        }

        /// Describes when clients can retry a failed request.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct RetryInfo {
            #[prost(message, optional, tag = "1")]
            pub retry_delay: ::core::option::Option<::prost_types::Duration>,
        }
    }

    pub mod bytestream {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ReadRequest {
            #[prost(string, tag = "1")]
            pub resource_name: ::prost::alloc::string::String,
            #[prost(int64, tag = "2")]
            pub read_offset: i64,
            #[prost(int64, tag = "3")]
            pub read_limit: i64,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ReadResponse {
            #[prost(bytes = "bytes", tag = "10")]
            pub data: ::prost::bytes::Bytes,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct WriteRequest {
            #[prost(string, tag = "1")]
            pub resource_name: ::prost::alloc::string::String,
            #[prost(int64, tag = "2")]
            pub write_offset: i64,
            #[prost(bool, tag = "3")]
            pub finish_write: bool,
            #[prost(bytes = "bytes", tag = "10")]
            pub data: ::prost::bytes::Bytes,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct WriteResponse {
            #[prost(int64, tag = "1")]
            pub committed_size: i64,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct QueryWriteStatusRequest {
            #[prost(string, tag = "1")]
            pub resource_name: ::prost::alloc::string::String,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct QueryWriteStatusResponse {
            #[prost(int64, tag = "1")]
            pub committed_size: i64,
            #[prost(bool, tag = "2")]
            pub complete: bool,
        }

        pub mod byte_stream_client {
            use tonic::codegen::*;

            #[derive(Debug, Clone)]
            pub struct ByteStreamClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl<T> ByteStreamClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
            {
                pub fn new(inner: T) -> Self {
                    let inner = tonic::client::Grpc::new(inner);
                    Self { inner }
                }

                pub async fn read(
                    &mut self,
                    request: impl tonic::IntoRequest<super::ReadRequest>,
                ) -> std::result::Result<
                    tonic::Response<tonic::codec::Streaming<super::ReadResponse>>,
                    tonic::Status,
                > {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path =
                        http::uri::PathAndQuery::from_static("/google.bytestream.ByteStream/Read");
                    let mut req = request.into_request();
                    req.extensions_mut()
                        .insert(GrpcMethod::new("google.bytestream.ByteStream", "Read"));
                    self.inner.server_streaming(req, path, codec).await
                }

                pub async fn write(
                    &mut self,
                    request: impl tonic::IntoStreamingRequest<Message = super::WriteRequest>,
                ) -> std::result::Result<tonic::Response<super::WriteResponse>, tonic::Status>
                {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path =
                        http::uri::PathAndQuery::from_static("/google.bytestream.ByteStream/Write");
                    let mut req = request.into_streaming_request();
                    req.extensions_mut()
                        .insert(GrpcMethod::new("google.bytestream.ByteStream", "Write"));
                    self.inner.client_streaming(req, path, codec).await
                }

                pub async fn query_write_status(
                    &mut self,
                    request: impl tonic::IntoRequest<super::QueryWriteStatusRequest>,
                ) -> std::result::Result<
                    tonic::Response<super::QueryWriteStatusResponse>,
                    tonic::Status,
                > {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/google.bytestream.ByteStream/QueryWriteStatus",
                    );
                    let mut req = request.into_request();
                    req.extensions_mut().insert(GrpcMethod::new(
                        "google.bytestream.ByteStream",
                        "QueryWriteStatus",
                    ));
                    self.inner.unary(req, path, codec).await
                }
            }
        }
    }
}

pub mod build {
    pub mod bazel {
        pub mod semver {
            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct SemVer {
                #[prost(int32, tag = "1")]
                pub major: i32,
                #[prost(int32, tag = "2")]
                pub minor: i32,
                #[prost(int32, tag = "3")]
                pub patch: i32,
                #[prost(string, tag = "4")]
                pub prerelease: ::prost::alloc::string::String,
            }
        }

        pub mod remote {
            pub mod execution {
                pub mod v2 {
                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct Digest {
                        /// The lowercase-hex hash of the blob.
                        #[prost(string, tag = "1")]
                        pub hash: ::prost::alloc::string::String,
                        #[prost(int64, tag = "2")]
                        pub size_bytes: i64,
                    }

                    pub fn empty_digest() -> Digest {
                        Digest {
                            hash: hashing::EMPTY_DIGEST.hash.to_hex(),
                            size_bytes: 0,
                        }
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct NodeProperty {
                        #[prost(string, tag = "1")]
                        pub name: ::prost::alloc::string::String,
                        #[prost(string, tag = "2")]
                        pub value: ::prost::alloc::string::String,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct NodeProperties {
                        #[prost(message, repeated, tag = "1")]
                        pub properties: ::prost::alloc::vec::Vec<NodeProperty>,
                        #[prost(message, optional, tag = "2")]
                        pub mtime: ::core::option::Option<::prost_types::Timestamp>,
                        #[prost(message, optional, tag = "3")]
                        pub unix_mode: ::core::option::Option<u32>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct FileNode {
                        #[prost(string, tag = "1")]
                        pub name: ::prost::alloc::string::String,
                        #[prost(message, optional, tag = "2")]
                        pub digest: ::core::option::Option<Digest>,
                        #[prost(bool, tag = "4")]
                        pub is_executable: bool,
                        #[prost(message, optional, tag = "6")]
                        pub node_properties: ::core::option::Option<NodeProperties>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct DirectoryNode {
                        #[prost(string, tag = "1")]
                        pub name: ::prost::alloc::string::String,
                        #[prost(message, optional, tag = "2")]
                        pub digest: ::core::option::Option<Digest>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct SymlinkNode {
                        #[prost(string, tag = "1")]
                        pub name: ::prost::alloc::string::String,
                        #[prost(string, tag = "2")]
                        pub target: ::prost::alloc::string::String,
                        #[prost(message, optional, tag = "4")]
                        pub node_properties: ::core::option::Option<NodeProperties>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct Directory {
                        #[prost(message, repeated, tag = "1")]
                        pub files: ::prost::alloc::vec::Vec<FileNode>,
                        #[prost(message, repeated, tag = "2")]
                        pub directories: ::prost::alloc::vec::Vec<DirectoryNode>,
                        #[prost(message, repeated, tag = "3")]
                        pub symlinks: ::prost::alloc::vec::Vec<SymlinkNode>,
                        #[prost(message, optional, tag = "5")]
                        pub node_properties: ::core::option::Option<NodeProperties>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct Tree {
                        #[prost(message, optional, tag = "1")]
                        pub root: ::core::option::Option<Directory>,
                        #[prost(message, repeated, tag = "2")]
                        pub children: ::prost::alloc::vec::Vec<Directory>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct Platform {
                        #[prost(message, repeated, tag = "1")]
                        pub properties: ::prost::alloc::vec::Vec<platform::Property>,
                    }

                    pub mod platform {
                        #[derive(Clone, PartialEq, ::prost::Message)]
                        pub struct Property {
                            #[prost(string, tag = "1")]
                            pub name: ::prost::alloc::string::String,
                            #[prost(string, tag = "2")]
                            pub value: ::prost::alloc::string::String,
                        }
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct Command {
                        #[prost(string, repeated, tag = "1")]
                        pub arguments: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
                        #[prost(message, repeated, tag = "2")]
                        pub environment_variables:
                            ::prost::alloc::vec::Vec<command::EnvironmentVariable>,
                        #[prost(string, repeated, tag = "3")]
                        pub output_files: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
                        #[prost(string, repeated, tag = "4")]
                        pub output_directories:
                            ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
                        #[prost(string, repeated, tag = "5")]
                        pub output_paths: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
                        #[prost(message, optional, tag = "6")]
                        pub platform: ::core::option::Option<Platform>,
                        #[prost(string, tag = "7")]
                        pub working_directory: ::prost::alloc::string::String,
                        #[prost(string, repeated, tag = "8")]
                        pub output_node_properties:
                            ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
                    }

                    pub mod command {
                        #[derive(Clone, PartialEq, ::prost::Message)]
                        pub struct EnvironmentVariable {
                            #[prost(string, tag = "1")]
                            pub name: ::prost::alloc::string::String,
                            #[prost(string, tag = "2")]
                            pub value: ::prost::alloc::string::String,
                        }
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct Action {
                        #[prost(message, optional, tag = "1")]
                        pub command_digest: ::core::option::Option<Digest>,
                        #[prost(message, optional, tag = "2")]
                        pub input_root_digest: ::core::option::Option<Digest>,
                        #[prost(message, optional, tag = "6")]
                        pub timeout: ::core::option::Option<::prost_types::Duration>,
                        #[prost(bool, tag = "7")]
                        pub do_not_cache: bool,
                        #[prost(bytes = "bytes", tag = "9")]
                        pub salt: ::prost::bytes::Bytes,
                        #[prost(message, optional, tag = "10")]
                        pub platform: ::core::option::Option<Platform>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct OutputFile {
                        #[prost(string, tag = "1")]
                        pub path: ::prost::alloc::string::String,
                        #[prost(message, optional, tag = "2")]
                        pub digest: ::core::option::Option<Digest>,
                        #[prost(bool, tag = "4")]
                        pub is_executable: bool,
                        #[prost(bytes = "bytes", tag = "5")]
                        pub contents: ::prost::bytes::Bytes,
                        #[prost(message, optional, tag = "7")]
                        pub node_properties: ::core::option::Option<NodeProperties>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct OutputSymlink {
                        #[prost(string, tag = "1")]
                        pub path: ::prost::alloc::string::String,
                        #[prost(string, tag = "2")]
                        pub target: ::prost::alloc::string::String,
                        #[prost(message, optional, tag = "4")]
                        pub node_properties: ::core::option::Option<NodeProperties>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct OutputDirectory {
                        #[prost(string, tag = "1")]
                        pub path: ::prost::alloc::string::String,
                        #[prost(message, optional, tag = "2")]
                        pub tree_digest: ::core::option::Option<Digest>,
                        #[prost(bool, tag = "3")]
                        pub is_topologically_sorted: bool,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct ExecutedActionMetadata {
                        #[prost(string, tag = "1")]
                        pub worker: ::prost::alloc::string::String,
                        #[prost(message, optional, tag = "2")]
                        pub queued_timestamp: ::core::option::Option<::prost_types::Timestamp>,
                        #[prost(message, optional, tag = "3")]
                        pub worker_start_timestamp:
                            ::core::option::Option<::prost_types::Timestamp>,
                        #[prost(message, optional, tag = "4")]
                        pub worker_completed_timestamp:
                            ::core::option::Option<::prost_types::Timestamp>,
                        #[prost(message, optional, tag = "5")]
                        pub input_fetch_start_timestamp:
                            ::core::option::Option<::prost_types::Timestamp>,
                        #[prost(message, optional, tag = "6")]
                        pub input_fetch_completed_timestamp:
                            ::core::option::Option<::prost_types::Timestamp>,
                        #[prost(message, optional, tag = "7")]
                        pub execution_start_timestamp:
                            ::core::option::Option<::prost_types::Timestamp>,
                        #[prost(message, optional, tag = "8")]
                        pub execution_completed_timestamp:
                            ::core::option::Option<::prost_types::Timestamp>,
                        #[prost(message, optional, tag = "9")]
                        pub output_upload_start_timestamp:
                            ::core::option::Option<::prost_types::Timestamp>,
                        #[prost(message, optional, tag = "10")]
                        pub output_upload_completed_timestamp:
                            ::core::option::Option<::prost_types::Timestamp>,
                        #[prost(message, repeated, tag = "11")]
                        pub auxiliary_metadata: ::prost::alloc::vec::Vec<::prost_types::Any>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct ActionResult {
                        #[prost(message, repeated, tag = "2")]
                        pub output_files: ::prost::alloc::vec::Vec<OutputFile>,
                        #[prost(message, repeated, tag = "3")]
                        pub output_directories: ::prost::alloc::vec::Vec<OutputDirectory>,
                        #[prost(int32, tag = "4")]
                        pub exit_code: i32,
                        #[prost(bytes = "bytes", tag = "5")]
                        pub stdout_raw: ::prost::bytes::Bytes,
                        #[prost(message, optional, tag = "6")]
                        pub stdout_digest: ::core::option::Option<Digest>,
                        #[prost(bytes = "bytes", tag = "7")]
                        pub stderr_raw: ::prost::bytes::Bytes,
                        #[prost(message, optional, tag = "8")]
                        pub stderr_digest: ::core::option::Option<Digest>,
                        #[prost(message, optional, tag = "9")]
                        pub execution_metadata:
                            ::core::option::Option<ExecutedActionMetadata>,
                        #[prost(message, repeated, tag = "12")]
                        pub output_symlinks: ::prost::alloc::vec::Vec<OutputSymlink>,
                    }

                    pub mod digest_function {
                        #[derive(
                            Clone,
                            Copy,
                            Debug,
                            PartialEq,
                            Eq,
                            Hash,
                            PartialOrd,
                            Ord,
                            ::prost::Enumeration,
                        )]
                        #[repr(i32)]
                        pub enum Value {
                            Unknown = 0,
                            Sha256 = 1,
                            Sha1 = 2,
                            Md5 = 3,
                            Vso = 4,
                            Sha384 = 5,
                            Sha512 = 6,
                            Murmur3 = 7,
                        }
                    }

                    pub mod compressor {
                        #[derive(
                            Clone,
                            Copy,
                            Debug,
                            PartialEq,
                            Eq,
                            Hash,
                            PartialOrd,
                            Ord,
                            ::prost::Enumeration,
                        )]
                        #[repr(i32)]
                        pub enum Value {
                            Identity = 0,
                            Zstd = 1,
                            Deflate = 2,
                            Brotli = 3,
                        }
                    }

                    pub mod symlink_absolute_path_strategy {
                        #[derive(
                            Clone,
                            Copy,
                            Debug,
                            PartialEq,
                            Eq,
                            Hash,
                            PartialOrd,
                            Ord,
                            ::prost::Enumeration,
                        )]
                        #[repr(i32)]
                        pub enum Value {
                            Unknown = 0,
                            Disallowed = 1,
                            Allowed = 2,
                        }
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct FindMissingBlobsRequest {
                        #[prost(string, tag = "1")]
                        pub instance_name: ::prost::alloc::string::String,
                        #[prost(message, repeated, tag = "2")]
                        pub blob_digests: ::prost::alloc::vec::Vec<Digest>,
                        #[prost(enumeration = "digest_function::Value", tag = "3")]
                        pub digest_function: i32,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct FindMissingBlobsResponse {
                        #[prost(message, repeated, tag = "2")]
                        pub missing_blob_digests: ::prost::alloc::vec::Vec<Digest>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct BatchUpdateBlobsRequest {
                        #[prost(string, tag = "1")]
                        pub instance_name: ::prost::alloc::string::String,
                        #[prost(message, repeated, tag = "2")]
                        pub requests:
                            ::prost::alloc::vec::Vec<batch_update_blobs_request::Request>,
                        #[prost(enumeration = "digest_function::Value", tag = "5")]
                        pub digest_function: i32,
                    }

                    pub mod batch_update_blobs_request {
                        #[derive(Clone, PartialEq, ::prost::Message)]
                        pub struct Request {
                            #[prost(message, optional, tag = "1")]
                            pub digest: ::core::option::Option<super::Digest>,
                            #[prost(bytes = "bytes", tag = "2")]
                            pub data: ::prost::bytes::Bytes,
                            #[prost(enumeration = "super::compressor::Value", tag = "3")]
                            pub compressor: i32,
                        }
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct BatchUpdateBlobsResponse {
                        #[prost(message, repeated, tag = "1")]
                        pub responses:
                            ::prost::alloc::vec::Vec<batch_update_blobs_response::Response>,
                    }

                    pub mod batch_update_blobs_response {
                        #[derive(Clone, PartialEq, ::prost::Message)]
                        pub struct Response {
                            #[prost(message, optional, tag = "1")]
                            pub digest: ::core::option::Option<super::Digest>,
                            #[prost(message, optional, tag = "2")]
                            pub status:
                                ::core::option::Option<crate::pb::google::rpc::Status>,
                        }
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct BatchReadBlobsRequest {
                        #[prost(string, tag = "1")]
                        pub instance_name: ::prost::alloc::string::String,
                        #[prost(message, repeated, tag = "2")]
                        pub digests: ::prost::alloc::vec::Vec<Digest>,
                        #[prost(enumeration = "compressor::Value", repeated, tag = "3")]
                        pub acceptable_compressors: ::prost::alloc::vec::Vec<i32>,
                        #[prost(enumeration = "digest_function::Value", tag = "4")]
                        pub digest_function: i32,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct BatchReadBlobsResponse {
                        #[prost(message, repeated, tag = "1")]
                        pub responses:
                            ::prost::alloc::vec::Vec<batch_read_blobs_response::Response>,
                    }

                    pub mod batch_read_blobs_response {
                        #[derive(Clone, PartialEq, ::prost::Message)]
                        pub struct Response {
                            #[prost(message, optional, tag = "1")]
                            pub digest: ::core::option::Option<super::Digest>,
                            #[prost(bytes = "bytes", tag = "2")]
                            pub data: ::prost::bytes::Bytes,
                            #[prost(message, optional, tag = "3")]
                            pub status:
                                ::core::option::Option<crate::pb::google::rpc::Status>,
                            #[prost(enumeration = "super::compressor::Value", tag = "4")]
                            pub compressor: i32,
                        }
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct GetTreeRequest {
                        #[prost(string, tag = "1")]
                        pub instance_name: ::prost::alloc::string::String,
                        #[prost(message, optional, tag = "2")]
                        pub root_digest: ::core::option::Option<Digest>,
                        #[prost(int32, tag = "3")]
                        pub page_size: i32,
                        #[prost(string, tag = "4")]
                        pub page_token: ::prost::alloc::string::String,
                        #[prost(enumeration = "digest_function::Value", tag = "5")]
                        pub digest_function: i32,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct GetTreeResponse {
                        #[prost(message, repeated, tag = "1")]
                        pub directories: ::prost::alloc::vec::Vec<Directory>,
                        #[prost(string, tag = "2")]
                        pub next_page_token: ::prost::alloc::string::String,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct GetCapabilitiesRequest {
                        #[prost(string, tag = "1")]
                        pub instance_name: ::prost::alloc::string::String,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct ActionCacheUpdateCapabilities {
                        #[prost(bool, tag = "1")]
                        pub update_enabled: bool,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct CacheCapabilities {
                        #[prost(enumeration = "digest_function::Value", repeated, tag = "1")]
                        pub digest_functions: ::prost::alloc::vec::Vec<i32>,
                        #[prost(message, optional, tag = "2")]
                        pub action_cache_update_capabilities:
                            ::core::option::Option<ActionCacheUpdateCapabilities>,
                        #[prost(int64, tag = "4")]
                        pub max_batch_total_size_bytes: i64,
                        #[prost(
                            enumeration = "symlink_absolute_path_strategy::Value",
                            tag = "5"
                        )]
                        pub symlink_absolute_path_strategy: i32,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct ExecutionCapabilities {
                        #[prost(enumeration = "digest_function::Value", tag = "1")]
                        pub digest_function: i32,
                        #[prost(bool, tag = "2")]
                        pub exec_enabled: bool,
                        #[prost(enumeration = "digest_function::Value", repeated, tag = "4")]
                        pub digest_functions: ::prost::alloc::vec::Vec<i32>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct ServerCapabilities {
                        #[prost(message, optional, tag = "1")]
                        pub cache_capabilities: ::core::option::Option<CacheCapabilities>,
                        #[prost(message, optional, tag = "2")]
                        pub execution_capabilities:
                            ::core::option::Option<ExecutionCapabilities>,
                        #[prost(message, optional, tag = "3")]
                        pub deprecated_api_version: ::core::option::Option<crate::pb::build::bazel::semver::SemVer>,
                        #[prost(message, optional, tag = "4")]
                        pub low_api_version: ::core::option::Option<crate::pb::build::bazel::semver::SemVer>,
                        #[prost(message, optional, tag = "5")]
                        pub high_api_version: ::core::option::Option<crate::pb::build::bazel::semver::SemVer>,
                    }

                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct ToolDetails {
                        #[prost(string, tag = "1")]
                        pub tool_name: ::prost::alloc::string::String,
                        #[prost(string, tag = "2")]
                        pub tool_version: ::prost::alloc::string::String,
                    }

                    /// Attached to every RPC as the
                    /// `build.bazel.remote.execution.v2.requestmetadata-bin` binary
                    /// header.
                    #[derive(Clone, PartialEq, ::prost::Message)]
                    pub struct RequestMetadata {
                        #[prost(message, optional, tag = "1")]
                        pub tool_details: ::core::option::Option<ToolDetails>,
                        #[prost(string, tag = "2")]
                        pub action_id: ::prost::alloc::string::String,
                        #[prost(string, tag = "3")]
                        pub tool_invocation_id: ::prost::alloc::string::String,
                        #[prost(string, tag = "4")]
                        pub correlated_invocations_id: ::prost::alloc::string::String,
                    }

                    pub mod content_addressable_storage_client {
                        use tonic::codegen::*;

                        #[derive(Debug, Clone)]
                        pub struct ContentAddressableStorageClient<T> {
                            inner: tonic::client::Grpc<T>,
                        }

                        impl<T> ContentAddressableStorageClient<T>
                        where
                            T: tonic::client::GrpcService<tonic::body::BoxBody>,
                            T::Error: Into<StdError>,
                            T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
                            <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
                        {
                            pub fn new(inner: T) -> Self {
                                let inner = tonic::client::Grpc::new(inner);
                                Self { inner }
                            }

                            pub async fn find_missing_blobs(
                                &mut self,
                                request: impl tonic::IntoRequest<super::FindMissingBlobsRequest>,
                            ) -> std::result::Result<
                                tonic::Response<super::FindMissingBlobsResponse>,
                                tonic::Status,
                            > {
                                self.inner.ready().await.map_err(|e| {
                                    tonic::Status::new(
                                        tonic::Code::Unknown,
                                        format!("Service was not ready: {}", e.into()),
                                    )
                                })?;
                                let codec = tonic::codec::ProstCodec::default();
                                let path = http::uri::PathAndQuery::from_static(
                                    "/build.bazel.remote.execution.v2.ContentAddressableStorage/FindMissingBlobs",
                                );
                                let mut req = request.into_request();
                                req.extensions_mut().insert(GrpcMethod::new(
                                    "build.bazel.remote.execution.v2.ContentAddressableStorage",
                                    "FindMissingBlobs",
                                ));
                                self.inner.unary(req, path, codec).await
                            }

                            pub async fn batch_update_blobs(
                                &mut self,
                                request: impl tonic::IntoRequest<super::BatchUpdateBlobsRequest>,
                            ) -> std::result::Result<
                                tonic::Response<super::BatchUpdateBlobsResponse>,
                                tonic::Status,
                            > {
                                self.inner.ready().await.map_err(|e| {
                                    tonic::Status::new(
                                        tonic::Code::Unknown,
                                        format!("Service was not ready: {}", e.into()),
                                    )
                                })?;
                                let codec = tonic::codec::ProstCodec::default();
                                let path = http::uri::PathAndQuery::from_static(
                                    "/build.bazel.remote.execution.v2.ContentAddressableStorage/BatchUpdateBlobs",
                                );
                                let mut req = request.into_request();
                                req.extensions_mut().insert(GrpcMethod::new(
                                    "build.bazel.remote.execution.v2.ContentAddressableStorage",
                                    "BatchUpdateBlobs",
                                ));
                                self.inner.unary(req, path, codec).await
                            }

                            pub async fn batch_read_blobs(
                                &mut self,
                                request: impl tonic::IntoRequest<super::BatchReadBlobsRequest>,
                            ) -> std::result::Result<
                                tonic::Response<super::BatchReadBlobsResponse>,
                                tonic::Status,
                            > {
                                self.inner.ready().await.map_err(|e| {
                                    tonic::Status::new(
                                        tonic::Code::Unknown,
                                        format!("Service was not ready: {}", e.into()),
                                    )
                                })?;
                                let codec = tonic::codec::ProstCodec::default();
                                let path = http::uri::PathAndQuery::from_static(
                                    "/build.bazel.remote.execution.v2.ContentAddressableStorage/BatchReadBlobs",
                                );
                                let mut req = request.into_request();
                                req.extensions_mut().insert(GrpcMethod::new(
                                    "build.bazel.remote.execution.v2.ContentAddressableStorage",
                                    "BatchReadBlobs",
                                ));
                                self.inner.unary(req, path, codec).await
                            }

                            pub async fn get_tree(
                                &mut self,
                                request: impl tonic::IntoRequest<super::GetTreeRequest>,
                            ) -> std::result::Result<
                                tonic::Response<tonic::codec::Streaming<super::GetTreeResponse>>,
                                tonic::Status,
                            > {
                                self.inner.ready().await.map_err(|e| {
                                    tonic::Status::new(
                                        tonic::Code::Unknown,
                                        format!("Service was not ready: {}", e.into()),
                                    )
                                })?;
                                let codec = tonic::codec::ProstCodec::default();
                                let path = http::uri::PathAndQuery::from_static(
                                    "/build.bazel.remote.execution.v2.ContentAddressableStorage/GetTree",
                                );
                                let mut req = request.into_request();
                                req.extensions_mut().insert(GrpcMethod::new(
                                    "build.bazel.remote.execution.v2.ContentAddressableStorage",
                                    "GetTree",
                                ));
                                self.inner.server_streaming(req, path, codec).await
                            }
                        }
                    }

                    pub mod capabilities_client {
                        use tonic::codegen::*;

                        #[derive(Debug, Clone)]
                        pub struct CapabilitiesClient<T> {
                            inner: tonic::client::Grpc<T>,
                        }

                        impl<T> CapabilitiesClient<T>
                        where
                            T: tonic::client::GrpcService<tonic::body::BoxBody>,
                            T::Error: Into<StdError>,
                            T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
                            <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
                        {
                            pub fn new(inner: T) -> Self {
                                let inner = tonic::client::Grpc::new(inner);
                                Self { inner }
                            }

                            pub async fn get_capabilities(
                                &mut self,
                                request: impl tonic::IntoRequest<super::GetCapabilitiesRequest>,
                            ) -> std::result::Result<
                                tonic::Response<super::ServerCapabilities>,
                                tonic::Status,
                            > {
                                self.inner.ready().await.map_err(|e| {
                                    tonic::Status::new(
                                        tonic::Code::Unknown,
                                        format!("Service was not ready: {}", e.into()),
                                    )
                                })?;
                                let codec = tonic::codec::ProstCodec::default();
                                let path = http::uri::PathAndQuery::from_static(
                                    "/build.bazel.remote.execution.v2.Capabilities/GetCapabilities",
                                );
                                let mut req = request.into_request();
                                req.extensions_mut().insert(GrpcMethod::new(
                                    "build.bazel.remote.execution.v2.Capabilities",
                                    "GetCapabilities",
                                ));
                                self.inner.unary(req, path, codec).await
                            }
                        }
                    }
                }
            }
        }
    }

    /// The BuildGrid LocalCAS protocol extension.
    pub mod buildgrid {
        use crate::pb::build::bazel::remote::execution::v2::Digest;

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct CaptureTreeRequest {
            #[prost(string, tag = "1")]
            pub instance_name: ::prost::alloc::string::String,
            #[prost(string, repeated, tag = "2")]
            pub path: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
            #[prost(bool, tag = "3")]
            pub bypass_local_cache: bool,
            #[prost(string, repeated, tag = "4")]
            pub node_properties: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct CaptureTreeResponse {
            #[prost(message, repeated, tag = "1")]
            pub responses: ::prost::alloc::vec::Vec<capture_tree_response::Response>,
        }

        pub mod capture_tree_response {
            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct Response {
                #[prost(string, tag = "1")]
                pub path: ::prost::alloc::string::String,
                #[prost(message, optional, tag = "2")]
                pub tree_digest: ::core::option::Option<super::Digest>,
                #[prost(message, optional, tag = "3")]
                pub status: ::core::option::Option<crate::pb::google::rpc::Status>,
            }
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct CaptureFilesRequest {
            #[prost(string, tag = "1")]
            pub instance_name: ::prost::alloc::string::String,
            #[prost(string, repeated, tag = "2")]
            pub path: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
            #[prost(bool, tag = "3")]
            pub bypass_local_cache: bool,
            #[prost(string, repeated, tag = "4")]
            pub node_properties: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct CaptureFilesResponse {
            #[prost(message, repeated, tag = "1")]
            pub responses: ::prost::alloc::vec::Vec<capture_files_response::Response>,
        }

        pub mod capture_files_response {
            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct Response {
                #[prost(string, tag = "1")]
                pub path: ::prost::alloc::string::String,
                #[prost(message, optional, tag = "2")]
                pub digest: ::core::option::Option<super::Digest>,
                #[prost(message, optional, tag = "3")]
                pub status: ::core::option::Option<crate::pb::google::rpc::Status>,
                #[prost(bool, tag = "4")]
                pub is_executable: bool,
            }
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct StageTreeRequest {
            #[prost(string, tag = "1")]
            pub instance_name: ::prost::alloc::string::String,
            #[prost(message, optional, tag = "2")]
            pub root_digest: ::core::option::Option<Digest>,
            #[prost(string, tag = "3")]
            pub path: ::prost::alloc::string::String,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct StageTreeResponse {
            #[prost(string, tag = "1")]
            pub path: ::prost::alloc::string::String,
        }

        pub mod local_content_addressable_storage_client {
            use tonic::codegen::*;

            #[derive(Debug, Clone)]
            pub struct LocalContentAddressableStorageClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl<T> LocalContentAddressableStorageClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
            {
                pub fn new(inner: T) -> Self {
                    let inner = tonic::client::Grpc::new(inner);
                    Self { inner }
                }

                pub async fn capture_tree(
                    &mut self,
                    request: impl tonic::IntoRequest<super::CaptureTreeRequest>,
                ) -> std::result::Result<tonic::Response<super::CaptureTreeResponse>, tonic::Status>
                {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/build.buildgrid.LocalContentAddressableStorage/CaptureTree",
                    );
                    let mut req = request.into_request();
                    req.extensions_mut().insert(GrpcMethod::new(
                        "build.buildgrid.LocalContentAddressableStorage",
                        "CaptureTree",
                    ));
                    self.inner.unary(req, path, codec).await
                }

                pub async fn capture_files(
                    &mut self,
                    request: impl tonic::IntoRequest<super::CaptureFilesRequest>,
                ) -> std::result::Result<tonic::Response<super::CaptureFilesResponse>, tonic::Status>
                {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/build.buildgrid.LocalContentAddressableStorage/CaptureFiles",
                    );
                    let mut req = request.into_request();
                    req.extensions_mut().insert(GrpcMethod::new(
                        "build.buildgrid.LocalContentAddressableStorage",
                        "CaptureFiles",
                    ));
                    self.inner.unary(req, path, codec).await
                }

                pub async fn stage_tree(
                    &mut self,
                    request: impl tonic::IntoStreamingRequest<Message = super::StageTreeRequest>,
                ) -> std::result::Result<
                    tonic::Response<tonic::codec::Streaming<super::StageTreeResponse>>,
                    tonic::Status,
                > {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/build.buildgrid.LocalContentAddressableStorage/StageTree",
                    );
                    let mut req = request.into_streaming_request();
                    req.extensions_mut().insert(GrpcMethod::new(
                        "build.buildgrid.LocalContentAddressableStorage",
                        "StageTree",
                    ));
                    self.inner.streaming(req, path, codec).await
                }
            }
        }
    }
}
