// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Staged input trees and output capture.
//!
//! The fallback variant materializes the tree into a scratch directory by
//! downloading it; the LocalCAS variant asks the server to stage the tree
//! and defers captures to server-side RPCs whose staging stays pinned for
//! the lifetime of the handle.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use cas::{Client, ClientError, StagedTreeHandle};
use futures::future::{BoxFuture, FutureExt};
use hashing::Digest;
use log::{debug, warn};
use protos::pb::build::bazel::remote::execution::v2 as remexec;
use tonic::Code;

/// A materialized input tree on the local filesystem. Owns its root (and,
/// for the LocalCAS variant, the stream pinning the staging); releasing the
/// value unstages.
pub enum StagedDirectory {
    Fallback(FallbackStagedDirectory),
    LocalCas(LocalCasStagedDirectory),
}

impl StagedDirectory {
    pub fn path(&self) -> &Path {
        match self {
            StagedDirectory::Fallback(staged) => staged.path(),
            StagedDirectory::LocalCas(staged) => staged.path(),
        }
    }

    /// Validate and capture every output file and directory the Command
    /// declares, appending well-formed entries to `result`.
    pub async fn capture_all_outputs(
        &self,
        client: &Client,
        command: &remexec::Command,
        result: &mut remexec::ActionResult,
    ) -> Result<(), ClientError> {
        let capture_mtime = command
            .output_node_properties
            .iter()
            .any(|p| p == merkle::MTIME_PROPERTY);

        match self {
            StagedDirectory::Fallback(staged) => {
                capture_all_outputs(
                    command,
                    result,
                    |path| staged.capture_file(client, path, capture_mtime).boxed(),
                    |path| staged.capture_directory(client, path).boxed(),
                )
                .await
            }
            StagedDirectory::LocalCas(staged) => {
                capture_all_outputs(
                    command,
                    result,
                    |path| staged.capture_file(client, path, capture_mtime).boxed(),
                    |path| staged.capture_directory(client, path).boxed(),
                )
                .await
            }
        }
    }
}

/// Stages by copying: creates a scratch directory and downloads the tree
/// into it. The tree is removed when the value is dropped.
pub struct FallbackStagedDirectory {
    root: tempfile::TempDir,
}

impl FallbackStagedDirectory {
    pub async fn create(
        client: &Client,
        root_digest: Digest,
        base_path: Option<&Path>,
    ) -> Result<FallbackStagedDirectory, ClientError> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("remexec-stage-");
            builder
        };
        let root = match base_path {
            Some(base) if !base.as_os_str().is_empty() => builder.tempdir_in(base),
            _ => builder.tempdir(),
        }?;

        debug!("Downloading {root_digest:?} to {:?}", root.path());
        client.download_directory(root_digest, root.path()).await?;
        Ok(FallbackStagedDirectory { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Hash and upload one output file. A path that does not exist inside
    /// the root yields an empty `OutputFile`; a path that can only be
    /// reached through a symlink is refused.
    pub async fn capture_file(
        &self,
        client: &Client,
        relative_path: String,
        capture_mtime: bool,
    ) -> Result<remexec::OutputFile, ClientError> {
        let Some(resolved) = resolve_in_input_root(self.path(), Path::new(&relative_path))? else {
            return Ok(remexec::OutputFile::default());
        };

        let mut file = match std::fs::File::open(&resolved) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(remexec::OutputFile::default());
            }
            Err(err) => return Err(err.into()),
        };
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Ok(remexec::OutputFile::default());
        }

        let digest = Digest::of_file(&mut file)?;
        client
            .upload_file(tokio::fs::File::from_std(file), digest)
            .await?;

        Ok(remexec::OutputFile {
            path: relative_path,
            digest: Some(digest.into()),
            is_executable: metadata.permissions().mode() & 0o111 != 0,
            node_properties: capture_mtime.then(|| remexec::NodeProperties {
                mtime: metadata
                    .modified()
                    .ok()
                    .map(protos::timestamp::from_mtime),
                ..remexec::NodeProperties::default()
            }),
            ..remexec::OutputFile::default()
        })
    }

    /// Merkle-ize and upload one output directory, plus the `Tree` message
    /// that names it. A missing directory yields an empty `OutputDirectory`.
    pub async fn capture_directory(
        &self,
        client: &Client,
        relative_path: String,
    ) -> Result<remexec::OutputDirectory, ClientError> {
        let Some(resolved) = resolve_in_input_root(self.path(), Path::new(&relative_path))? else {
            return Ok(remexec::OutputDirectory::default());
        };
        match std::fs::symlink_metadata(&resolved) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Ok(remexec::OutputDirectory::default()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(remexec::OutputDirectory::default());
            }
            Err(err) => return Err(err.into()),
        }

        debug!("Uploading directory {resolved:?}");
        let (failures, _root_digest, tree) = client.upload_directory(&resolved).await?;
        if let Some(failure) = failures.into_iter().next() {
            return Err(ClientError::Rpc(failure.status));
        }
        let tree_digest = client.upload_message(&tree).await?;

        Ok(remexec::OutputDirectory {
            path: relative_path,
            tree_digest: Some(tree_digest.into()),
            is_topologically_sorted: false,
        })
    }
}

/// Stages via the LocalCAS StageTree RPC; captures defer to server-side
/// CaptureFiles / CaptureTree.
pub struct LocalCasStagedDirectory {
    handle: StagedTreeHandle,
}

impl LocalCasStagedDirectory {
    pub async fn create(
        client: &Client,
        root_digest: Digest,
        path: Option<&Path>,
    ) -> Result<LocalCasStagedDirectory, ClientError> {
        let handle = client.stage(root_digest, path).await?;
        Ok(LocalCasStagedDirectory { handle })
    }

    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    pub async fn capture_file(
        &self,
        client: &Client,
        relative_path: String,
        capture_mtime: bool,
    ) -> Result<remexec::OutputFile, ClientError> {
        let absolute = self.path().join(&relative_path).display().to_string();
        let properties = if capture_mtime {
            vec![merkle::MTIME_PROPERTY.to_owned()]
        } else {
            vec![]
        };
        let response = client
            .capture_files(&[absolute], &properties, false)
            .await?;

        let Some(entry) = response.responses.into_iter().next() else {
            return Ok(remexec::OutputFile::default());
        };
        if let Some(status) = &entry.status {
            if status.code == Code::NotFound as i32 {
                return Ok(remexec::OutputFile::default());
            }
            if status.code != Code::Ok as i32 {
                return Err(ClientError::Rpc(tonic::Status::new(
                    Code::from_i32(status.code),
                    status.message.clone(),
                )));
            }
        }

        Ok(remexec::OutputFile {
            path: relative_path,
            digest: entry.digest,
            is_executable: entry.is_executable,
            ..remexec::OutputFile::default()
        })
    }

    pub async fn capture_directory(
        &self,
        client: &Client,
        relative_path: String,
    ) -> Result<remexec::OutputDirectory, ClientError> {
        let absolute = self.path().join(&relative_path).display().to_string();
        let response = client.capture_tree(&[absolute], &[], false).await?;

        let Some(entry) = response.responses.into_iter().next() else {
            return Ok(remexec::OutputDirectory::default());
        };
        if let Some(status) = &entry.status {
            if status.code == Code::NotFound as i32 {
                return Ok(remexec::OutputDirectory::default());
            }
            if status.code != Code::Ok as i32 {
                return Err(ClientError::Rpc(tonic::Status::new(
                    Code::from_i32(status.code),
                    status.message.clone(),
                )));
            }
        }

        Ok(remexec::OutputDirectory {
            path: relative_path,
            tree_digest: entry.tree_digest,
            is_topologically_sorted: false,
        })
    }
}

/// Validate the Command's working directory and output paths, and invoke
/// the capture callbacks with the normalized path of each declared output
/// inside the input root. The `path` fields of the captured entries use the
/// original relative names as written in the Command.
pub async fn capture_all_outputs<'a, F1, F2>(
    command: &remexec::Command,
    result: &mut remexec::ActionResult,
    mut capture_file: F1,
    mut capture_directory: F2,
) -> Result<(), ClientError>
where
    F1: FnMut(String) -> BoxFuture<'a, Result<remexec::OutputFile, ClientError>>,
    F2: FnMut(String) -> BoxFuture<'a, Result<remexec::OutputDirectory, ClientError>>,
{
    // `working_directory` can be empty; in that case no prefix is added so
    // that paths do not become absolute.
    let mut base_path = String::new();
    if !command.working_directory.is_empty() {
        base_path = format!("{}/", normalize_path(&command.working_directory));

        if base_path.starts_with('/') {
            return Err(ClientError::InvalidArgument(format!(
                "`working_directory` path in `Command` must be relative. It is \"{base_path}\""
            )));
        }
        if base_path.starts_with("../") {
            return Err(ClientError::InvalidArgument(format!(
                "The `working_directory` path in `Command` is outside of input root \"{base_path}\""
            )));
        }
    }

    for output_filename in &command.output_files {
        assert_no_invalid_slashes(output_filename)?;
        let path = normalize_path(&format!("{base_path}{output_filename}"));
        assert_path_inside_input_root(&path)?;

        let mut output_file = capture_file(path).await?;
        if !output_file.path.is_empty() {
            output_file.path = output_filename.clone();
            result.output_files.push(output_file);
        }
    }

    for output_dir_name in &command.output_directories {
        assert_no_invalid_slashes(output_dir_name)?;
        let path = normalize_path(&format!("{base_path}{output_dir_name}"));
        assert_path_inside_input_root(&path)?;

        let mut output_directory = capture_directory(path).await?;
        if !output_directory.path.is_empty() {
            output_directory.path = output_dir_name.clone();
            result.output_directories.push(output_directory);
        }
    }

    Ok(())
}

/// "The paths are relative to the working directory of the action
/// execution. [...] The path MUST NOT include a trailing slash, nor a
/// leading slash, being a relative path."
fn assert_no_invalid_slashes(path: &str) -> Result<(), ClientError> {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return Err(ClientError::InvalidArgument(format!(
            "Output path in `Command` is empty or has leading or trailing slashes: \"{path}\""
        )));
    }
    Ok(())
}

fn assert_path_inside_input_root(path_from_root: &str) -> Result<(), ClientError> {
    // PRE: `path_from_root` is normalized.
    if path_from_root == ".." || path_from_root.starts_with("../") {
        return Err(ClientError::InvalidArgument(format!(
            "Output path in `Command` is outside of the input root: \"{path_from_root}\""
        )));
    }
    Ok(())
}

/// Lexically normalize a slash-separated path: collapse `.` and empty
/// components and resolve `..` against earlier components, keeping any
/// leading `..` that escape. The filesystem is never consulted.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if absolute && segments.is_empty() {
                    // "/.." is "/".
                } else {
                    match segments.last() {
                        None | Some(&"..") => segments.push(".."),
                        Some(_) => {
                            segments.pop();
                        }
                    }
                }
            }
            segment => segments.push(segment),
        }
    }

    let joined = segments.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_owned(),
        (false, false) => joined,
    }
}

/// Resolve a normalized relative path against the input root without
/// traversing any symlink component (a symlink could point outside the
/// root). Returns Ok(None) when the path does not exist inside the root.
pub fn resolve_in_input_root(root: &Path, relative: &Path) -> io::Result<Option<PathBuf>> {
    let mut current = root.to_path_buf();
    let mut components = relative.components().peekable();

    while let Some(component) = components.next() {
        match component {
            Component::CurDir => {}
            Component::Normal(name) => {
                current.push(name);
                match std::fs::symlink_metadata(&current) {
                    Ok(metadata) => {
                        if metadata.file_type().is_symlink() {
                            return Err(io::Error::new(
                                io::ErrorKind::PermissionDenied,
                                format!(
                                    "output path {relative:?} traverses the symlink {current:?}"
                                ),
                            ));
                        }
                        if components.peek().is_some() && !metadata.is_dir() {
                            return Ok(None);
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                    Err(err) => return Err(err),
                }
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("output path {relative:?} escapes the input root"),
                ))
            }
        }
    }

    Ok(Some(current))
}

/// Best-effort recursive chmod of every directory under `path`. EPERM
/// failures are aggregated into a single warning rather than aborting: a
/// capture that genuinely needs the permission will surface the real error
/// later.
pub fn recursively_chmod_directories(path: &Path, mode: u32) -> io::Result<()> {
    let mut encountered_permission_errors = false;
    chmod_visit(path, mode, &mut encountered_permission_errors)?;
    if encountered_permission_errors {
        warn!("Failed to `chmod()` some directories in {path:?} due to permission issues (`EPERM`).");
    }
    Ok(())
}

fn chmod_visit(path: &Path, mode: u32, permission_errors: &mut bool) -> io::Result<()> {
    match std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        Ok(()) => {}
        Err(err) if err.raw_os_error() == Some(libc::EPERM) => *permission_errors = true,
        Err(err) => warn!("Unable to chmod dir {path:?}: {err}"),
    }

    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            chmod_visit(&entry.path(), mode, permission_errors)?;
        }
    }
    Ok(())
}

/// The parent directories for declared output files and directories must
/// exist before execution.
pub fn create_output_parent_directories(
    command: &remexec::Command,
    working_directory: &Path,
) -> io::Result<()> {
    for output in command
        .output_files
        .iter()
        .chain(command.output_directories.iter())
    {
        if let Some(parent) = Path::new(output).parent() {
            if !parent.as_os_str().is_empty() {
                let location = working_directory.join(parent);
                std::fs::create_dir_all(&location)?;
                debug!("Created parent output directory: {location:?}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
