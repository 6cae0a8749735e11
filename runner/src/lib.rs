// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The runner harness: fetch an Action, stage its input tree, execute the
//! command under output capture, and upload the results.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use cas::{ClientError, ConnectionOptions, UploadRequest};
use clap::Parser;
use grpc_util::prost::MessageExt;
use hashing::Digest;
use log::{debug, error, info};
use merkle::BlobSource;
use prost::Message;
use protos::pb::build::bazel::remote::execution::v2 as remexec;
use protos::timestamp;

pub mod monitor;
pub mod process;
pub mod staged;

use process::signal_status;
use staged::StagedDirectory;

/// Capability names printed by `--capabilities`.
pub const RUNNER_CAPABILITIES: &[&str] = &["mtime", "use-localcas"];

const TOOL_NAME: &str = "remexec-runner";
const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often the execution loop re-checks the signal flag.
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Parser)]
#[command(name = "remexec-runner", disable_version_flag = true)]
pub struct RunnerOptions {
    /// Path to read the input Action from.
    #[arg(long, value_name = "PATH")]
    pub action: Option<PathBuf>,

    /// Path to write the output ActionResult to.
    #[arg(long, value_name = "PATH")]
    pub action_result: Option<PathBuf>,

    /// Location on disk which the runner will use as root when executing
    /// jobs.
    #[arg(long, value_name = "PATH")]
    pub workspace_path: Option<PathBuf>,

    /// Use the LocalCAS protocol to stage the input tree server-side.
    #[arg(long)]
    pub use_localcas: bool,

    /// Log verbosity: trace, debug, info, warning, error.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Set log level to debug.
    #[arg(long)]
    pub verbose: bool,

    /// File to write the log to.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Print capabilities supported by this runner and exit.
    #[arg(long)]
    pub capabilities: bool,

    /// URL of the remote CAS endpoint, e.g. grpc://localhost:50051 or
    /// unix:/run/casd.sock.
    #[arg(long, value_name = "URL")]
    pub remote: Option<String>,

    /// Instance name to address within the remote.
    #[arg(long, value_name = "NAME", default_value = "")]
    pub instance: String,

    /// PEM file with the root certificates to verify the server.
    #[arg(long, value_name = "PATH")]
    pub server_cert: Option<PathBuf>,

    /// PEM file with the private key for client authentication (mTLS).
    #[arg(long, value_name = "PATH")]
    pub client_key: Option<PathBuf>,

    /// PEM file with the certificate chain for client authentication
    /// (mTLS).
    #[arg(long, value_name = "PATH")]
    pub client_cert: Option<PathBuf>,

    /// File whose contents are sent as an Authorization bearer token.
    #[arg(long, value_name = "PATH")]
    pub access_token: Option<PathBuf>,

    /// Seconds between re-reads of the access token file.
    #[arg(long, value_name = "SECONDS")]
    pub token_reload_interval: Option<u64>,

    /// Number of times to retry transient gRPC errors.
    #[arg(long, value_name = "INT", default_value_t = grpc_util::retry::DEFAULT_RETRY_LIMIT)]
    pub retry_limit: u32,

    /// Base delay in milliseconds between retry attempts.
    #[arg(long, value_name = "MILLISECONDS", default_value_t = 100)]
    pub retry_delay: u64,
}

impl RunnerOptions {
    pub fn connection_options(&self) -> Result<ConnectionOptions, String> {
        let url = self
            .remote
            .clone()
            .ok_or_else(|| "CAS server URL is missing.".to_owned())?;
        Ok(ConnectionOptions {
            url,
            instance_name: self.instance.clone(),
            server_cert_path: self.server_cert.clone(),
            client_cert_path: self.client_cert.clone(),
            client_key_path: self.client_key.clone(),
            access_token_path: self.access_token.clone(),
            token_refresh_interval: self.token_reload_interval.map(Duration::from_secs),
            retry_limit: self.retry_limit,
            retry_delay: Duration::from_millis(self.retry_delay),
            ..ConnectionOptions::default()
        })
    }
}

pub struct Runner {
    options: RunnerOptions,
    action_digest: Digest,
}

impl Runner {
    /// Run one Action end to end. The returned value is the process exit
    /// code: 0 on completion, 1 on setup failures, the signal number when
    /// interrupted.
    pub async fn run(options: RunnerOptions) -> i32 {
        let mut runner = Runner {
            options,
            action_digest: *hashing::EMPTY_DIGEST,
        };
        // -- Worker started --
        let worker_start = timestamp::now();

        let action_path = match &runner.options.action {
            Some(path) => path.clone(),
            None => {
                error!("No input Action given; pass --action=PATH.");
                return 1;
            }
        };
        let action = match read_action(&action_path) {
            Ok(action) => action,
            Err(err) => {
                error!("Could not read Action from {action_path:?}: {err}");
                return 1;
            }
        };
        runner.action_digest = Digest::of_bytes(&action.to_bytes());
        debug!("Read Action with digest {:?}", runner.action_digest);

        if let Err(err) = process::register_signal_handlers() {
            error!("{err}");
            return 1;
        }

        let connection_options = match runner.options.connection_options() {
            Ok(options) => options,
            Err(err) => {
                error!("{err}");
                return 1;
            }
        };
        debug!(
            "Initializing CAS client to connect to: \"{}\"",
            connection_options.url
        );
        let mut client = match cas::Client::connect(&connection_options).await {
            Ok(client) => client,
            Err(err) => {
                error!("Error initializing CAS client: {err}");
                return 1;
            }
        };
        client.set_tool_details(TOOL_NAME, TOOL_VERSION);
        client.set_request_metadata(&runner.action_digest.hash.to_hex(), "", "");

        let command_digest = match protos::require_digest(action.command_digest.as_ref()) {
            Ok(digest) => digest,
            Err(err) => {
                error!("Invalid Action: {err}");
                return 1;
            }
        };
        debug!("Fetching Command {command_digest:?}");
        let command: remexec::Command = match client.fetch_message(command_digest).await {
            Ok(command) => command,
            Err(err) => {
                error!("Error fetching Command with digest {command_digest:?}: {err}");
                return 1;
            }
        };

        if let Some(signal) = signal_status() {
            // No clean up necessary yet.
            return signal;
        }

        let input_root_digest = match protos::require_digest(action.input_root_digest.as_ref()) {
            Ok(digest) => digest,
            Err(err) => {
                error!("Invalid Action: {err}");
                return 1;
            }
        };

        debug!("Executing command");
        let mut result = remexec::ActionResult::default();
        if let Err(err) = runner
            .execute(&client, &command, input_root_digest, &mut result)
            .await
        {
            error!("Error executing command: {err}");
            if result.exit_code == 0 {
                result.exit_code = 1;
            }
            let mut stderr = BytesMut::from(&result.stderr_raw[..]);
            stderr.extend_from_slice(format!("\n{err}\n").as_bytes());
            result.stderr_raw = stderr.freeze();
        }

        // -- Worker finished; set start/completed timestamps --
        let metadata = result
            .execution_metadata
            .get_or_insert_with(remexec::ExecutedActionMetadata::default);
        metadata.worker_start_timestamp = Some(worker_start);
        metadata.worker_completed_timestamp = Some(timestamp::now());

        if let Some(output_path) = &runner.options.action_result {
            if let Err(err) = write_action_result(&result, output_path) {
                error!("Failed to write ActionResult to {output_path:?}: {err}");
                return 1;
            }
        }

        signal_status().unwrap_or(0)
    }

    /// Stage the input root, run the command under capture, upload
    /// stdout/stderr and the declared outputs.
    async fn execute(
        &self,
        client: &cas::Client,
        command: &remexec::Command,
        input_root_digest: Digest,
        result: &mut remexec::ActionResult,
    ) -> Result<(), ClientError> {
        let mut metadata = remexec::ExecutedActionMetadata::default();

        // Stage the input tree.
        metadata.input_fetch_start_timestamp = Some(timestamp::now());
        let staged = self
            .stage_input_root(client, input_root_digest)
            .await
            .map_err(|err| {
                debug!(
                    "Could not stage directory with digest {input_root_digest:?}: {err}"
                );
                err
            })?;
        metadata.input_fetch_completed_timestamp = Some(timestamp::now());

        // The parent directories of declared outputs must exist before the
        // command runs.
        let working_directory = staged.path().join(&command.working_directory);
        staged::create_output_parent_directories(command, &working_directory)?;
        if let StagedDirectory::Fallback(_) = &staged {
            staged::recursively_chmod_directories(staged.path(), 0o755)?;
        }

        if command.arguments.is_empty() {
            return Err(ClientError::InvalidArgument(
                "Command has no arguments".to_owned(),
            ));
        }

        // Fork/exec with pipe capture.
        info!("Executing command: {:?}", command.arguments);
        metadata.execution_start_timestamp = Some(timestamp::now());
        let environment: Vec<(String, String)> = command
            .environment_variables
            .iter()
            .map(|var| (var.name.clone(), var.value.clone()))
            .collect();
        let child = process::spawn_child(
            &command.arguments,
            &environment,
            &working_directory,
            staged.path(),
        );

        let (exit_code, stdout, stderr) = match child {
            Ok(child) => {
                let pid = child.pid;
                let mut stdout = BytesMut::with_capacity(8192);
                let mut stderr = BytesMut::with_capacity(8192);
                let mut collect = Box::pin(process::collect_child_outputs(
                    &mut stdout,
                    &mut stderr,
                    child.stream,
                    true,
                ));

                let exit_code = loop {
                    tokio::select! {
                        collected = &mut collect => {
                            break Some(collected.map_err(|msg| {
                                ClientError::Io(std::io::Error::other(msg))
                            })?);
                        }
                        _ = tokio::time::sleep(SIGNAL_POLL_INTERVAL) => {
                            if signal_status().is_some() {
                                break None;
                            }
                        }
                    }
                };

                match exit_code {
                    Some(exit_code) => {
                        drop(collect);
                        (exit_code, stdout.freeze(), stderr.freeze())
                    }
                    None => {
                        // SIGINT or SIGTERM arrived mid-execution: terminate
                        // the child immediately and reap it.
                        info!("Caught signal");
                        process::kill_child(pid);
                        let _ = (&mut collect).await;
                        return Ok(());
                    }
                }
            }
            Err(err) => {
                // Spawning itself failed: surface the Bash-convention exit
                // code with the error on stderr.
                let exit_code = process::exit_code_for_spawn_error(&err);
                let message = format!("{}: {err}\n", command.arguments.first().map(String::as_str).unwrap_or(""));
                (exit_code, Bytes::new(), Bytes::from(message))
            }
        };

        debug!("Finished reading command's stdout/stderr");
        if signal_status().is_none() {
            let (stdout_digest, stderr_digest) =
                self.upload_standard_outputs(client, stdout, stderr).await;
            result.stdout_digest = Some(stdout_digest);
            result.stderr_digest = Some(stderr_digest);
        }
        metadata.execution_completed_timestamp = Some(timestamp::now());
        result.exit_code = exit_code;

        if signal_status().is_none() {
            metadata.output_upload_start_timestamp = Some(timestamp::now());
            staged.capture_all_outputs(client, command, result).await?;
            metadata.output_upload_completed_timestamp = Some(timestamp::now());
        }

        result.execution_metadata = Some(metadata);
        Ok(())
    }

    async fn stage_input_root(
        &self,
        client: &cas::Client,
        input_root_digest: Digest,
    ) -> Result<StagedDirectory, ClientError> {
        let workspace_path = self.options.workspace_path.as_deref();
        if self.options.use_localcas {
            staged::LocalCasStagedDirectory::create(client, input_root_digest, workspace_path)
                .await
                .map(StagedDirectory::LocalCas)
        } else {
            staged::FallbackStagedDirectory::create(client, input_root_digest, workspace_path)
                .await
                .map(StagedDirectory::Fallback)
        }
    }

    /// Upload stdout and stderr with a single batched upload. A failed
    /// upload leaves the corresponding digest empty, with an error logged,
    /// rather than failing the action.
    async fn upload_standard_outputs(
        &self,
        client: &cas::Client,
        stdout: Bytes,
        stderr: Bytes,
    ) -> (remexec::Digest, remexec::Digest) {
        let stdout_digest = Digest::of_bytes(&stdout);
        let stderr_digest = Digest::of_bytes(&stderr);

        let requests = vec![
            UploadRequest {
                digest: stdout_digest,
                source: BlobSource::Inline(stdout),
            },
            UploadRequest {
                digest: stderr_digest,
                source: BlobSource::Inline(stderr),
            },
        ];

        let failed_blobs = match client.upload_blobs(requests, false).await {
            Ok(failed_blobs) => failed_blobs,
            Err(err) => {
                error!("Failed to upload stdout and stderr: {err}");
                return (remexec::Digest::default(), remexec::Digest::default());
            }
        };

        let mut stdout_digest: remexec::Digest = stdout_digest.into();
        let mut stderr_digest: remexec::Digest = stderr_digest.into();
        for blob in failed_blobs {
            let failed: remexec::Digest = blob.digest.into();
            if failed == stdout_digest {
                error!(
                    "Failed to upload stdout contents. Received: {:?}",
                    blob.status
                );
                stdout_digest = remexec::Digest::default();
            } else {
                error!(
                    "Failed to upload stderr contents. Received: {:?}",
                    blob.status
                );
                stderr_digest = remexec::Digest::default();
            }
        }
        (stdout_digest, stderr_digest)
    }
}

pub fn read_action(path: &Path) -> Result<remexec::Action, String> {
    let bytes = std::fs::read(path).map_err(|err| err.to_string())?;
    remexec::Action::decode(bytes.as_slice()).map_err(|err| format!("Failed to parse Action: {err}"))
}

pub fn write_action_result(result: &remexec::ActionResult, path: &Path) -> Result<(), String> {
    std::fs::write(path, result.to_bytes()).map_err(|err| err.to_string())
}

/// Map the runner's log-level names (which accept "warning" as well as
/// "warn") onto the `log` crate's filter levels.
pub fn parse_log_level(level: &str) -> Result<log::LevelFilter, String> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(log::LevelFilter::Trace),
        "debug" => Ok(log::LevelFilter::Debug),
        "info" => Ok(log::LevelFilter::Info),
        "warn" | "warning" => Ok(log::LevelFilter::Warn),
        "error" => Ok(log::LevelFilter::Error),
        other => Err(format!("Invalid log level \"{other}\"")),
    }
}

#[cfg(test)]
mod tests;
