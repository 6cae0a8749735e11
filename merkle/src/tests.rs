use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;

use grpc_util::prost::MessageExt;
use hashing::Digest;
use protos::pb::build::bazel::remote::execution::v2 as remexec;

use crate::merge::merge_trees;
use crate::{make_nested_directory, BlobSource, DigestBlobMap, File, NestedDirectory};

fn file(content: &[u8]) -> File {
    File::new(Digest::of_bytes(content), false)
}

fn flatten_tree(nd: &NestedDirectory) -> Vec<remexec::Directory> {
    let tree = nd.to_tree();
    let mut directories = vec![tree.root.unwrap()];
    directories.extend(tree.children);
    directories
}

#[test]
fn single_file() {
    let content_digest = Digest::of_bytes(b"sample contents");
    let mut nd = NestedDirectory::default();
    nd.add(File::new(content_digest, false), "sample");

    let directory = nd.to_directory();
    assert_eq!(directory.files.len(), 1);
    assert_eq!(directory.files[0].name, "sample");
    assert_eq!(
        protos::require_digest(directory.files[0].digest.as_ref()).unwrap(),
        content_digest
    );
    assert!(!directory.files[0].is_executable);
    assert!(directory.directories.is_empty());
    assert!(directory.symlinks.is_empty());
}

#[test]
fn nested_path_creates_intermediate_directories() {
    let content_digest = Digest::of_bytes(b"sample2");
    let mut nd = NestedDirectory::default();
    nd.add(
        File::new(content_digest, false),
        "subdir/anothersubdir/sample2",
    );

    let root = nd.to_directory();
    assert!(root.files.is_empty());
    assert_eq!(root.directories.len(), 1);
    assert_eq!(root.directories[0].name, "subdir");

    let mut blobs: DigestBlobMap = HashMap::new();
    nd.to_digest(Some(&mut blobs));

    let subdir = decode_directory(&blobs, root.directories[0].digest.as_ref().unwrap());
    assert_eq!(subdir.directories.len(), 1);
    assert_eq!(subdir.directories[0].name, "anothersubdir");

    let inner = decode_directory(&blobs, subdir.directories[0].digest.as_ref().unwrap());
    assert_eq!(inner.files.len(), 1);
    assert_eq!(inner.files[0].name, "sample2");
    assert_eq!(
        protos::require_digest(inner.files[0].digest.as_ref()).unwrap(),
        content_digest
    );
}

fn decode_directory(blobs: &DigestBlobMap, digest: &remexec::Digest) -> remexec::Directory {
    use prost::Message;

    let digest = protos::require_digest(digest).unwrap();
    match blobs.get(&digest) {
        Some(BlobSource::Inline(bytes)) => remexec::Directory::decode(bytes.clone()).unwrap(),
        other => panic!("Want inline directory blob for {digest:?}, got {other:?}"),
    }
}

#[test]
fn digest_is_insensitive_to_insertion_order() {
    let mut first = NestedDirectory::default();
    first.add(file(b"a"), "alpha");
    first.add(file(b"b"), "beta/inner");
    first.add_symlink("alpha", "link");

    let mut second = NestedDirectory::default();
    second.add_symlink("alpha", "link");
    second.add(file(b"b"), "beta/inner");
    second.add(file(b"a"), "alpha");

    assert_eq!(first.to_digest(None), second.to_digest(None));
}

#[test]
fn differing_content_changes_root_digest() {
    let mut first = NestedDirectory::default();
    first.add(file(b"contents one"), "dir/a");

    let mut second = NestedDirectory::default();
    second.add(file(b"contents two"), "dir/a");

    assert_ne!(first.to_digest(None), second.to_digest(None));
}

#[test]
fn executable_bit_changes_digest() {
    let digest = Digest::of_bytes(b"tool");

    let mut plain = NestedDirectory::default();
    plain.add(File::new(digest, false), "tool");

    let mut executable = NestedDirectory::default();
    executable.add(File::new(digest, true), "tool");

    assert_ne!(plain.to_digest(None), executable.to_digest(None));
}

#[test]
fn empty_directory_node() {
    let mut nd = NestedDirectory::default();
    nd.add_directory("var");

    let root = nd.to_directory();
    assert_eq!(root.directories.len(), 1);
    assert_eq!(root.directories[0].name, "var");

    // A lone slash is not a valid directory.
    let mut bad = NestedDirectory::default();
    bad.add_directory("/");
    assert!(bad.is_empty());
}

#[test]
fn to_digest_populates_blob_map() {
    let mut nd = NestedDirectory::default();
    nd.add(file(b"x"), "a/b/c");

    let mut blobs: DigestBlobMap = HashMap::new();
    let root_digest = nd.to_digest(Some(&mut blobs));

    // Root, a, and a/b.
    assert_eq!(blobs.len(), 3);
    match blobs.get(&root_digest) {
        Some(BlobSource::Inline(bytes)) => {
            assert_eq!(Digest::of_bytes(bytes), root_digest);
        }
        other => panic!("Want inline root blob, got {other:?}"),
    }
}

#[test]
fn tree_contains_transitive_closure() {
    let mut nd = NestedDirectory::default();
    nd.add(file(b"1"), "src/main.c");
    nd.add(file(b"2"), "src/lib/util.c");
    nd.add(file(b"3"), "README");

    let tree = nd.to_tree();
    let root = tree.root.unwrap();
    assert_eq!(root.files.len(), 1);
    assert_eq!(root.directories.len(), 1);
    // src and src/lib.
    assert_eq!(tree.children.len(), 2);

    // The root serialized from the Tree agrees with to_digest.
    assert_eq!(
        Digest::of_bytes(&root.to_bytes()),
        nd.to_digest(None)
    );
}

#[test]
fn walk_captures_files_directories_and_symlinks() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("file1"), b"file1 contents").unwrap();
    std::fs::create_dir(dir.path().join("subdir")).unwrap();
    std::fs::write(dir.path().join("subdir/file2"), b"file2 contents").unwrap();
    std::os::unix::fs::symlink("file1", dir.path().join("link1")).unwrap();

    let mut file_map: DigestBlobMap = HashMap::new();
    let nd = make_nested_directory(dir.path(), false, &[], Some(&mut file_map)).unwrap();

    let root = nd.to_directory();
    assert_eq!(root.files.len(), 1);
    assert_eq!(root.files[0].name, "file1");
    assert_eq!(root.directories.len(), 1);
    assert_eq!(root.directories[0].name, "subdir");
    assert_eq!(root.symlinks.len(), 1);
    assert_eq!(root.symlinks[0].name, "link1");
    assert_eq!(root.symlinks[0].target, "file1");

    // Both files were recorded as on-disk blob sources.
    let file1_digest = Digest::of_bytes(b"file1 contents");
    let file2_digest = Digest::of_bytes(b"file2 contents");
    assert_eq!(
        file_map.get(&file1_digest),
        Some(&BlobSource::OnDisk(dir.path().join("file1")))
    );
    assert_eq!(
        file_map.get(&file2_digest),
        Some(&BlobSource::OnDisk(dir.path().join("subdir/file2")))
    );
}

#[test]
fn walk_follows_symlinks_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("target"), b"pointed-at").unwrap();
    std::os::unix::fs::symlink("target", dir.path().join("link")).unwrap();

    let nd = make_nested_directory(dir.path(), true, &[], None).unwrap();
    let root = nd.to_directory();

    assert!(root.symlinks.is_empty());
    assert_eq!(root.files.len(), 2);
    let names: Vec<_> = root.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["link", "target"]);
    assert_eq!(root.files[0].digest, root.files[1].digest);
}

#[test]
fn walk_records_executable_bit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tool.sh");
    std::fs::write(&path, b"#!/bin/sh\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let nd = make_nested_directory(dir.path(), false, &[], None).unwrap();
    let root = nd.to_directory();
    assert!(root.files[0].is_executable);
}

#[test]
fn walk_captures_mtime_only_when_requested() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("file"), b"contents").unwrap();

    let without = make_nested_directory(dir.path(), false, &[], None).unwrap();
    assert!(without.to_directory().files[0].node_properties.is_none());

    let with = make_nested_directory(dir.path(), false, &["mtime".to_owned()], None).unwrap();
    let props = with.to_directory().files[0]
        .node_properties
        .clone()
        .expect("Want node_properties");
    let mtime = props.mtime.expect("Want mtime");
    assert!(mtime.seconds > 0);
    // Microsecond resolution.
    assert_eq!(mtime.nanos % 1_000, 0);
}

#[test]
fn walk_missing_root_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    make_nested_directory(&dir.path().join("nope"), false, &[], None).expect_err("Want err");
}

mod merge {
    use super::*;

    #[test]
    fn disjoint_trees() {
        let mut input = NestedDirectory::default();
        input.add(file(b"main"), "src/main.c");

        let mut template = NestedDirectory::default();
        template.add(file(b"libc"), "usr/lib/libc.so");

        let merged = merge_trees(&flatten_tree(&input), &flatten_tree(&template)).unwrap();

        let mut expected = NestedDirectory::default();
        expected.add(file(b"main"), "src/main.c");
        expected.add(file(b"libc"), "usr/lib/libc.so");
        assert_eq!(merged.root_digest, expected.to_digest(None));
    }

    #[test]
    fn shared_directory_with_distinct_children() {
        let mut input = NestedDirectory::default();
        input.add(file(b"one"), "shared/one");

        let mut template = NestedDirectory::default();
        template.add(file(b"two"), "shared/two");

        let merged = merge_trees(&flatten_tree(&input), &flatten_tree(&template)).unwrap();

        let mut expected = NestedDirectory::default();
        expected.add(file(b"one"), "shared/one");
        expected.add(file(b"two"), "shared/two");
        assert_eq!(merged.root_digest, expected.to_digest(None));
    }

    #[test]
    fn identical_files_do_not_collide() {
        let mut input = NestedDirectory::default();
        input.add(file(b"same"), "dir/file");

        let merged = merge_trees(&flatten_tree(&input), &flatten_tree(&input)).unwrap();
        assert_eq!(merged.root_digest, input.to_digest(None));
        // Nothing new was created by a self-merge.
        assert!(merged.new_directories.is_empty());
    }

    #[test]
    fn file_content_collision() {
        let mut input = NestedDirectory::default();
        input.add(file(b"one"), "dir/file");

        let mut template = NestedDirectory::default();
        template.add(file(b"two"), "dir/file");

        let err =
            merge_trees(&flatten_tree(&input), &flatten_tree(&template)).expect_err("Want err");
        assert!(err.contains("file collision"), "Bad error: {err}");
    }

    #[test]
    fn executable_flag_collision() {
        let digest = Digest::of_bytes(b"same contents");

        let mut input = NestedDirectory::default();
        input.add(File::new(digest, false), "dir/file");

        let mut template = NestedDirectory::default();
        template.add(File::new(digest, true), "dir/file");

        let err =
            merge_trees(&flatten_tree(&input), &flatten_tree(&template)).expect_err("Want err");
        assert!(err.contains("file collision"), "Bad error: {err}");
    }

    #[test]
    fn symlink_same_target_is_accepted() {
        let mut input = NestedDirectory::default();
        input.add_symlink("../lib", "dir/link");
        input.add(file(b"x"), "dir/file");

        let merged = merge_trees(&flatten_tree(&input), &flatten_tree(&input)).unwrap();
        assert_eq!(merged.root_digest, input.to_digest(None));
    }

    #[test]
    fn symlink_target_collision() {
        let mut input = NestedDirectory::default();
        input.add_symlink("one", "dir/link");

        let mut template = NestedDirectory::default();
        template.add_symlink("two", "dir/link");

        let err =
            merge_trees(&flatten_tree(&input), &flatten_tree(&template)).expect_err("Want err");
        assert!(err.contains("symlink collision"), "Bad error: {err}");
    }

    #[test]
    fn file_directory_collision() {
        let mut input = NestedDirectory::default();
        input.add(file(b"x"), "name");

        let mut template = NestedDirectory::default();
        template.add(file(b"y"), "name/inner");

        let err =
            merge_trees(&flatten_tree(&input), &flatten_tree(&template)).expect_err("Want err");
        assert!(err.contains("collision"), "Bad error: {err}");
    }

    #[test]
    fn new_directories_delta() {
        let mut input = NestedDirectory::default();
        input.add(file(b"one"), "shared/one");

        let mut template = NestedDirectory::default();
        template.add(file(b"two"), "shared/two");

        let merged = merge_trees(&flatten_tree(&input), &flatten_tree(&template)).unwrap();

        // The merged root and the merged "shared" directory are new; the
        // original roots and subdirectories are not.
        assert_eq!(merged.new_directories.len(), 2);
        assert!(merged.new_directories.contains(&merged.root_digest));
        for digest in &merged.new_directories {
            assert!(merged.blobs.contains_key(digest));
        }
    }

    #[test]
    fn both_trees_empty_is_an_error() {
        let err = merge_trees(&[], &[]).expect_err("Want err");
        assert!(err.contains("both input trees are empty"), "Bad error: {err}");
    }

    #[test]
    fn one_empty_tree_is_identity() {
        let mut input = NestedDirectory::default();
        input.add(file(b"main"), "src/main.c");

        let merged = merge_trees(&flatten_tree(&input), &[]).unwrap();
        assert_eq!(merged.root_digest, input.to_digest(None));
    }
}
