// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Merges two flattened directory trees (typically an Action's input root
//! and a chroot template overlaid on top) into one tree, detecting
//! node-level collisions.

use std::collections::{HashMap, HashSet};

use grpc_util::prost::MessageExt;
use hashing::Digest;
use log::{debug, error};
use prost::Message;
use protos::pb::build::bazel::remote::execution::v2 as remexec;

use crate::{BlobSource, DigestBlobMap, File, NestedDirectory};

/// A flattened directory tree: index 0 is the root `Directory`, the rest
/// are descendants reachable from it by digest.
pub type DirectoryTree = [remexec::Directory];

/// The product of a merge.
#[derive(Debug)]
pub struct MergedTree {
    pub root_digest: Digest,
    /// Every directory blob of the merged tree (inputs and newly created),
    /// keyed by digest.
    pub blobs: DigestBlobMap,
    /// Digests of directories that exist only in the merged tree, which
    /// callers can use to upload just the delta.
    pub new_directories: HashSet<Digest>,
}

#[derive(Clone, Debug)]
enum Node {
    File { digest: Digest, is_executable: bool },
    Symlink { target: String },
    Dir,
}

pub fn merge_trees(
    input_tree: &DirectoryTree,
    template_tree: &DirectoryTree,
) -> Result<MergedTree, String> {
    if input_tree.is_empty() && template_tree.is_empty() {
        return Err("invalid args: both input trees are empty".to_owned());
    }

    // Map every Directory from both trees by its digest.
    let mut directories_by_digest: HashMap<Digest, bytes::Bytes> = HashMap::new();
    insert_tree_blobs(input_tree, &mut directories_by_digest);
    insert_tree_blobs(template_tree, &mut directories_by_digest);
    let input_digests: HashSet<Digest> = directories_by_digest.keys().copied().collect();

    // Flatten both trees into one path -> node map, detecting collisions:
    // same file path with a different digest or executable bit, or the same
    // symlink name with a different target. Identical directory paths are
    // accepted; collisions among their children surface while visiting the
    // children.
    let mut nodes_by_path: HashMap<String, Node> = HashMap::new();
    if let Some(root) = input_tree.first() {
        flatten(&mut nodes_by_path, root, &directories_by_digest, "")?;
    }
    if let Some(root) = template_tree.first() {
        flatten(&mut nodes_by_path, root, &directories_by_digest, "")?;
    }

    // Reassemble the union into a NestedDirectory and digest it, collecting
    // the serialized blobs of every merged directory.
    let mut merged = NestedDirectory::default();
    for (path, node) in &nodes_by_path {
        match node {
            Node::File {
                digest,
                is_executable,
            } => merged.add(File::new(*digest, *is_executable), path),
            Node::Symlink { target } => merged.add_symlink(target, path),
            Node::Dir => merged.add_directory(path),
        }
    }

    let mut blobs: DigestBlobMap = directories_by_digest
        .iter()
        .map(|(digest, blob)| (*digest, BlobSource::Inline(blob.clone())))
        .collect();
    let root_digest = merged.to_digest(Some(&mut blobs));

    let new_directories = blobs
        .keys()
        .filter(|digest| !input_digests.contains(digest))
        .copied()
        .collect();

    Ok(MergedTree {
        root_digest,
        blobs,
        new_directories,
    })
}

fn insert_tree_blobs(tree: &DirectoryTree, map: &mut HashMap<Digest, bytes::Bytes>) {
    for directory in tree {
        let blob = directory.to_bytes();
        let digest = Digest::of_bytes(&blob);
        if map.insert(digest, blob).is_some() {
            debug!("digest [{digest:?}] present in both trees (identical contents)");
        }
    }
}

fn join_path(dir_name: &str, node_name: &str) -> String {
    if dir_name.is_empty() {
        node_name.to_owned()
    } else {
        format!("{dir_name}/{node_name}")
    }
}

fn flatten(
    nodes_by_path: &mut HashMap<String, Node>,
    directory: &remexec::Directory,
    directories_by_digest: &HashMap<Digest, bytes::Bytes>,
    dir_name: &str,
) -> Result<(), String> {
    for node in &directory.files {
        let path = join_path(dir_name, &node.name);
        let digest = protos::require_digest(node.digest.as_ref())?;
        match nodes_by_path.get(&path) {
            Some(Node::File {
                digest: existing_digest,
                is_executable,
            }) if *existing_digest == digest && *is_executable == node.is_executable => {}
            Some(existing) => {
                return Err(format!(
                    "file collision: existing node [{path}: {existing:?}] conflicts with new \
                     file [{path}:{digest:?}:{}]",
                    node.is_executable
                ));
            }
            None => {}
        }
        nodes_by_path.insert(
            path,
            Node::File {
                digest,
                is_executable: node.is_executable,
            },
        );
    }

    for node in &directory.symlinks {
        let path = join_path(dir_name, &node.name);
        match nodes_by_path.get(&path) {
            Some(Node::Symlink { target }) if *target == node.target => {}
            Some(existing) => {
                return Err(format!(
                    "symlink collision: existing node [{path}: {existing:?}] conflicts with new \
                     target \"{path}:{}\"",
                    node.target
                ));
            }
            None => {}
        }
        nodes_by_path.insert(
            path,
            Node::Symlink {
                target: node.target.clone(),
            },
        );
    }

    for node in &directory.directories {
        let path = join_path(dir_name, &node.name);
        let digest = protos::require_digest(node.digest.as_ref())?;
        match nodes_by_path.get(&path) {
            Some(Node::Dir) | None => {}
            Some(existing) => {
                return Err(format!(
                    "directory collision: existing node [{path}: {existing:?}] conflicts with \
                     new directory [{path}:{digest:?}]"
                ));
            }
        }
        nodes_by_path.insert(path.clone(), Node::Dir);

        let Some(blob) = directories_by_digest.get(&digest) else {
            error!("error finding digest {digest:?} for {path}");
            continue;
        };
        let child = remexec::Directory::decode(blob.clone())
            .map_err(|err| format!("could not decode Directory {digest:?}: {err}"))?;
        flatten(nodes_by_path, &child, directories_by_digest, &path)?;
    }

    Ok(())
}
