// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The in-memory Merkle directory model: scan a local filesystem tree (or
//! assemble one programmatically) and serialize it into the canonical
//! `Directory` and `Tree` wire messages of the Remote Execution API.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use grpc_util::prost::MessageExt;
use hashing::Digest;
use protos::pb::build::bazel::remote::execution::v2 as remexec;

pub mod merge;

#[cfg(test)]
mod tests;

/// The property name that opts a capture into recording mtimes.
pub const MTIME_PROPERTY: &str = "mtime";

/// Where the bytes of a blob can be found when it is time to upload it.
///
/// Directory messages are always carried inline; file contents stay on disk
/// so uploaders can stream them instead of holding whole trees in memory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BlobSource {
    Inline(Bytes),
    OnDisk(PathBuf),
}

/// Accumulates every blob referenced while digesting a tree.
pub type DigestBlobMap = HashMap<Digest, BlobSource>;

/// A regular file captured for the Merkle model: its content digest, the
/// executable bit, and the source mtime when the caller asked for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct File {
    pub digest: Digest,
    pub is_executable: bool,
    pub mtime: Option<SystemTime>,
}

impl File {
    pub fn new(digest: Digest, is_executable: bool) -> File {
        File {
            digest,
            is_executable,
            mtime: None,
        }
    }

    /// Capture a single path: hash its contents and record its metadata.
    pub fn from_path(path: &Path, capture_properties: &[String]) -> io::Result<File> {
        let mut file = std::fs::File::open(path)?;
        let metadata = file.metadata()?;
        let digest = Digest::of_file(&mut file)?;
        let mtime = if capture_properties.iter().any(|p| p == MTIME_PROPERTY) {
            Some(metadata.modified()?)
        } else {
            None
        };
        Ok(File {
            digest,
            is_executable: metadata.permissions().mode() & 0o111 != 0,
            mtime,
        })
    }

    pub fn to_file_node(&self, name: &str) -> remexec::FileNode {
        remexec::FileNode {
            name: name.to_owned(),
            digest: Some(self.digest.into()),
            is_executable: self.is_executable,
            node_properties: self.mtime.map(|mtime| remexec::NodeProperties {
                mtime: Some(protos::timestamp::from_mtime(mtime)),
                ..remexec::NodeProperties::default()
            }),
        }
    }
}

/// A directory tree under construction. Entries are kept in sorted maps so
/// that serialization is deterministic and already in the canonical order
/// the wire format requires.
#[derive(Clone, Debug, Default)]
pub struct NestedDirectory {
    files: BTreeMap<String, File>,
    symlinks: BTreeMap<String, String>,
    subdirs: BTreeMap<String, NestedDirectory>,
}

impl NestedDirectory {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.symlinks.is_empty() && self.subdirs.is_empty()
    }

    /// Insert a file at a slash-separated path relative to this directory,
    /// creating intermediate directories as needed. Empty path components
    /// are skipped, so `a//b` and `a/b` are the same destination.
    pub fn add(&mut self, file: File, relative_path: &str) {
        match relative_path.split_once('/') {
            Some(("", rest)) => self.add(file, rest),
            Some((subdir, rest)) => self
                .subdirs
                .entry(subdir.to_owned())
                .or_default()
                .add(file, rest),
            None => {
                self.files.insert(relative_path.to_owned(), file);
            }
        }
    }

    pub fn add_symlink(&mut self, target: &str, relative_path: &str) {
        match relative_path.split_once('/') {
            Some(("", rest)) => self.add_symlink(target, rest),
            Some((subdir, rest)) => self
                .subdirs
                .entry(subdir.to_owned())
                .or_default()
                .add_symlink(target, rest),
            None => {
                self.symlinks
                    .insert(relative_path.to_owned(), target.to_owned());
            }
        }
    }

    pub fn add_directory(&mut self, directory: &str) {
        // A forward slash by itself is not a valid input directory.
        if directory == "/" {
            return;
        }
        match directory.split_once('/') {
            Some(("", rest)) => self.add_directory(rest),
            Some((subdir, rest)) => self
                .subdirs
                .entry(subdir.to_owned())
                .or_default()
                .add_directory(rest),
            None => {
                self.subdirs.entry(directory.to_owned()).or_default();
            }
        }
    }

    /// The wire message for this level alone. Subdirectory digests are
    /// computed recursively.
    pub fn to_directory(&self) -> remexec::Directory {
        self.to_directory_impl(&mut None)
    }

    /// Recursively serialize this tree, returning the root digest. When
    /// `map` is supplied, every emitted `Directory` blob is inserted keyed
    /// by its digest so callers can upload exactly what was produced.
    pub fn to_digest(&self, map: Option<&mut DigestBlobMap>) -> Digest {
        let mut map = map;
        self.to_digest_impl(&mut map)
    }

    fn to_digest_impl(&self, map: &mut Option<&mut DigestBlobMap>) -> Digest {
        let directory = self.to_directory_impl(map);
        let blob = directory.to_bytes();
        let digest = Digest::of_bytes(&blob);
        if let Some(map) = map.as_deref_mut() {
            map.insert(digest, BlobSource::Inline(blob));
        }
        digest
    }

    fn to_directory_impl(&self, map: &mut Option<&mut DigestBlobMap>) -> remexec::Directory {
        // The sorted maps guarantee that the node lists come out in
        // lexicographical order, which the canonical form requires.
        let mut directory = remexec::Directory::default();
        for (name, file) in &self.files {
            directory.files.push(file.to_file_node(name));
        }
        for (name, target) in &self.symlinks {
            directory.symlinks.push(remexec::SymlinkNode {
                name: name.clone(),
                target: target.clone(),
                ..remexec::SymlinkNode::default()
            });
        }
        for (name, subdir) in &self.subdirs {
            let subdir_digest = subdir.to_digest_impl(map);
            directory.directories.push(remexec::DirectoryNode {
                name: name.clone(),
                digest: Some(subdir_digest.into()),
            });
        }
        directory
    }

    /// A single-blob representation of this tree: the root `Directory` plus
    /// every reachable descendant.
    pub fn to_tree(&self) -> remexec::Tree {
        let mut result = remexec::Tree::default();
        let mut root = remexec::Directory::default();
        for (name, file) in &self.files {
            root.files.push(file.to_file_node(name));
        }
        for (name, target) in &self.symlinks {
            root.symlinks.push(remexec::SymlinkNode {
                name: name.clone(),
                target: target.clone(),
                ..remexec::SymlinkNode::default()
            });
        }
        for (name, subdir) in &self.subdirs {
            let subtree = subdir.to_tree();
            result.children.extend(subtree.children.iter().cloned());
            let subtree_root = subtree.root.unwrap_or_default();
            root.directories.push(remexec::DirectoryNode {
                name: name.clone(),
                digest: Some(Digest::of_bytes(&subtree_root.to_bytes()).into()),
            });
            result.children.push(subtree_root);
        }
        result.root = Some(root);
        result
    }
}

/// Walk the filesystem anchored at `path` and build the corresponding
/// `NestedDirectory`.
///
/// With `follow_symlinks`, links are recorded as the kind they point at;
/// otherwise a `SymlinkNode` is recorded with the link target read verbatim
/// and never validated. Each regular file encountered is added to
/// `file_map` (when supplied) as an on-disk blob source keyed by digest.
pub fn make_nested_directory(
    path: &Path,
    follow_symlinks: bool,
    capture_properties: &[String],
    file_map: Option<&mut DigestBlobMap>,
) -> io::Result<NestedDirectory> {
    let mut file_map = file_map;
    walk(path, follow_symlinks, capture_properties, &mut file_map)
}

fn walk(
    dir: &Path,
    follow_symlinks: bool,
    capture_properties: &[String],
    file_map: &mut Option<&mut DigestBlobMap>,
) -> io::Result<NestedDirectory> {
    let mut result = NestedDirectory::default();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(name) => {
                log::warn!("Skipping non-unicode directory entry {name:?} in {dir:?}");
                continue;
            }
        };
        let path = entry.path();

        let metadata = if follow_symlinks {
            std::fs::metadata(&path)
        } else {
            std::fs::symlink_metadata(&path)
        };
        let metadata = match metadata {
            Ok(metadata) => metadata,
            // An entry that disappears mid-walk is dropped from the tree.
            Err(_) => continue,
        };

        if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(&path)?;
            result
                .symlinks
                .insert(name, target.to_string_lossy().into_owned());
        } else if metadata.is_dir() {
            result.subdirs.insert(
                name,
                walk(&path, follow_symlinks, capture_properties, file_map)?,
            );
        } else if metadata.is_file() {
            let file = File::from_path(&path, capture_properties)?;
            if let Some(map) = file_map.as_deref_mut() {
                map.insert(file.digest, BlobSource::OnDisk(path));
            }
            result.files.insert(name, file);
        }
        // Sockets, fifos and devices have no Merkle representation.
    }

    Ok(result)
}
