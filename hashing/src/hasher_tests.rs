use crate::{Digest, Hasher, WriterHasher};

#[test]
fn incremental_matches_one_shot() {
    let mut hasher = Hasher::new();
    hasher.update(b"European ");
    hasher.update(b"Burmese");
    assert_eq!(hasher.finish(), Digest::of_bytes(b"European Burmese"));
}

#[test]
fn writer_hasher_hashes_written_bytes() {
    let mut src = "meep".as_bytes();

    let dst = Vec::with_capacity(10);
    let mut hasher = WriterHasher::new(dst);
    assert_eq!(std::io::copy(&mut src, &mut hasher).unwrap(), 4);

    let (digest, written) = hasher.finish();
    assert_eq!(digest, Digest::of_bytes(b"meep"));
    assert_eq!(written, b"meep".to_vec());
}

#[tokio::test]
async fn async_copy_and_hash_hashes_all_bytes() {
    let contents = vec![0x42_u8; 128 * 1024];
    let mut reader = std::io::Cursor::new(contents.clone());
    let mut writer = Vec::new();

    let digest = crate::async_copy_and_hash(&mut reader, &mut writer)
        .await
        .unwrap();
    assert_eq!(digest, Digest::of_bytes(&contents));
    assert_eq!(writer, contents);
}
