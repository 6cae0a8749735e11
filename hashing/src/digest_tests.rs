use std::io::Write;

use crate::{Digest, Fingerprint, EMPTY_DIGEST};

// The expected values in this module assume the default SHA-256 digest
// function.

#[test]
fn empty_input() {
    let digest = Digest::of_bytes(b"");
    assert_eq!(
        digest.hash.to_hex(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(digest.size_bytes, 0);
    assert_eq!(digest, *EMPTY_DIGEST);
}

#[test]
fn hash_matches_reference_implementation() {
    use sha2::Digest as _;

    let input = b"Hello, world!";
    let digest = Digest::of_bytes(input);

    let mut reference = sha2::Sha256::new();
    reference.update(input);
    let expected = Fingerprint::from_bytes_unsafe(&reference.finalize());

    assert_eq!(digest.hash, expected);
    assert_eq!(digest.size_bytes, 13);
}

#[test]
fn hashing_is_deterministic() {
    assert_eq!(Digest::of_bytes(b"meep"), Digest::of_bytes(b"meep"));
    assert_ne!(Digest::of_bytes(b"meep"), Digest::of_bytes(b"moop"));
}

#[test]
fn file_agrees_with_bytes() {
    // Larger than the 64 KiB hashing buffer so the chunk loop is exercised.
    let contents = vec![0xa5_u8; 3 * 64 * 1024 + 7];

    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&contents).unwrap();

    // `of_file` must rewind before reading.
    assert_eq!(
        Digest::of_file(&mut file).unwrap(),
        Digest::of_bytes(&contents)
    );
}

#[test]
fn path_agrees_with_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob");
    std::fs::write(&path, b"European Burmese").unwrap();

    assert_eq!(
        Digest::of_path(&path).unwrap(),
        Digest::of_bytes(b"European Burmese")
    );
}

#[tokio::test]
async fn async_path_agrees_with_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blob");
    let contents = vec![0x5a_u8; 2 * 64 * 1024 + 1];
    std::fs::write(&path, &contents).unwrap();

    assert_eq!(
        crate::hash_path(&path).await.unwrap(),
        Digest::of_bytes(&contents)
    );
}

#[test]
fn missing_path_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    Digest::of_path(dir.path().join("nope")).expect_err("Want err");
}
