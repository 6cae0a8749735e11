use hashing::EMPTY_DIGEST;

use crate::pb::build::bazel::remote::execution::v2::{Digest, Directory, DirectoryNode, FileNode};
use crate::verify_directory_canonical;

const HASH: &str = "693d8db7b05e99c6b7a7c0616456039d89c555029026936248085193559a0b5d";
const FILE_SIZE: i64 = 16;
const DIRECTORY_HASH: &str = "63949aa823baf765eff07b946050d76ec0033144c785a94d3ebd82baa931cd16";
const DIRECTORY_SIZE: i64 = 80;

fn file(name: &str) -> FileNode {
    FileNode {
        name: name.to_owned(),
        digest: Some(Digest {
            hash: HASH.to_owned(),
            size_bytes: FILE_SIZE,
        }),
        ..FileNode::default()
    }
}

fn dir(name: &str) -> DirectoryNode {
    DirectoryNode {
        name: name.to_owned(),
        digest: Some(Digest {
            hash: DIRECTORY_HASH.to_owned(),
            size_bytes: DIRECTORY_SIZE,
        }),
    }
}

#[test]
fn empty_directory() {
    assert_eq!(
        Ok(()),
        verify_directory_canonical(*EMPTY_DIGEST, &Directory::default())
    );
}

#[test]
fn canonical_directory() {
    let directory = Directory {
        files: vec![file("main.c"), file("util.c")],
        directories: vec![dir("include"), dir("lib")],
        ..Directory::default()
    };

    assert_eq!(
        Ok(()),
        verify_directory_canonical(*EMPTY_DIGEST, &directory)
    );
}

#[test]
fn unsorted_files() {
    let directory = Directory {
        files: vec![file("util.c"), file("main.c")],
        ..Directory::default()
    };

    let error = verify_directory_canonical(*EMPTY_DIGEST, &directory).expect_err("Want error");
    assert!(
        error.contains("must be sorted"),
        "Bad error message: {error}"
    );
}

#[test]
fn empty_child_name() {
    let directory = Directory {
        directories: vec![dir("")],
        ..Directory::default()
    };

    let error = verify_directory_canonical(*EMPTY_DIGEST, &directory).expect_err("Want error");
    assert!(
        error.contains("A child name must not be empty"),
        "Bad error message: {error}"
    );
}

#[test]
fn multiple_path_segments_in_directory() {
    let directory = Directory {
        directories: vec![dir("src/include")],
        ..Directory::default()
    };

    let error = verify_directory_canonical(*EMPTY_DIGEST, &directory).expect_err("Want error");
    assert!(error.contains("src/include"), "Bad error message: {error}");
}

#[test]
fn multiple_path_segments_in_file() {
    let directory = Directory {
        files: vec![file("src/main.c")],
        ..Directory::default()
    };

    let error = verify_directory_canonical(*EMPTY_DIGEST, &directory).expect_err("Want error");
    assert!(error.contains("src/main.c"), "Bad error message: {error}");
}

#[test]
fn duplicate_path_in_directory() {
    let directory = Directory {
        directories: vec![dir("include"), dir("include")],
        ..Directory::default()
    };

    let error = verify_directory_canonical(*EMPTY_DIGEST, &directory).expect_err("Want error");
    assert!(error.contains("include"), "Bad error message: {error}");
}

#[test]
fn duplicate_path_in_file_and_directory() {
    let directory = Directory {
        files: vec![file("include")],
        directories: vec![dir("include")],
        ..Directory::default()
    };

    verify_directory_canonical(*EMPTY_DIGEST, &directory).expect_err("Want error");
}
