// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Size-based batching of blob requests.

use std::ops::Range;

use hashing::Digest;
use prost::Message;
use protos::pb::build::bazel::remote::execution::v2 as remexec;

/// Hand-tuned estimates for the space the gRPC containers themselves take
/// up in a batch request, leaving the payload a margin below the message
/// size cap.
#[derive(Clone, Debug)]
pub struct BatchLimits {
    pub top_level_overhead: usize,
    pub per_entry_overhead: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        BatchLimits {
            top_level_overhead: 256,
            per_entry_overhead: 50,
        }
    }
}

/// Greedily pack digests (which must be sorted ascending by size) into
/// `[start, end)` index ranges whose payload fits one batch request.
///
/// Digests larger than what a single batch can carry are left for the
/// byte-stream path: the ranges cover a prefix of the input up to the first
/// over-large entry.
pub fn make_batches(
    limits: &BatchLimits,
    max_batch_total_size_bytes: usize,
    digests: &[Digest],
) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let max_batch_size = max_batch_total_size_bytes
        .saturating_sub(limits.top_level_overhead)
        .saturating_sub(limits.per_entry_overhead * digests.len());

    let mut batch_start = 0;
    let mut batch_end = 0;
    while batch_end < digests.len() {
        if digests[batch_end].size_bytes > max_batch_size {
            // All digests from `batch_end` to the end of the list are larger
            // than what we can request; stop.
            return batches;
        }

        let mut bytes_in_batch = 0;
        while batch_end < digests.len()
            && bytes_in_batch + digests[batch_end].size_bytes <= max_batch_size
        {
            bytes_in_batch += digests[batch_end].size_bytes;
            batch_end += 1;
        }

        batches.push(batch_start..batch_end);
        batch_start = batch_end;
    }

    batches
}

/// Split a digest list into FindMissingBlobs requests whose serialized
/// per-digest payload stays under `max_request_bytes`.
pub fn partition_find_missing(
    instance_name: &str,
    digests: &[Digest],
    max_request_bytes: usize,
) -> Vec<remexec::FindMissingBlobsRequest> {
    let mut requests = Vec::new();
    let mut current = remexec::FindMissingBlobsRequest {
        instance_name: instance_name.to_owned(),
        ..remexec::FindMissingBlobsRequest::default()
    };
    let mut batch_size = 0;

    for digest in digests {
        let wire_digest: remexec::Digest = digest.into();
        let digest_size = wire_digest.encoded_len();
        if batch_size + digest_size > max_request_bytes && !current.blob_digests.is_empty() {
            requests.push(std::mem::replace(
                &mut current,
                remexec::FindMissingBlobsRequest {
                    instance_name: instance_name.to_owned(),
                    ..remexec::FindMissingBlobsRequest::default()
                },
            ));
            batch_size = 0;
        }
        batch_size += digest_size;
        current.blob_digests.push(wire_digest);
    }
    requests.push(current);

    requests
}

#[cfg(test)]
mod tests {
    use hashing::{Digest, EMPTY_DIGEST};

    use super::{make_batches, partition_find_missing, BatchLimits};

    fn digest_of_size(size_bytes: usize) -> Digest {
        Digest::new(EMPTY_DIGEST.hash, size_bytes)
    }

    fn zero_overheads() -> BatchLimits {
        BatchLimits {
            top_level_overhead: 0,
            per_entry_overhead: 0,
        }
    }

    #[test]
    fn packs_prefix_and_skips_oversized_tail() {
        // Sizes [1, 1, 2, 128, 4]; after ascending sort: [1, 1, 2, 4, 128].
        let mut digests: Vec<_> = [1, 1, 2, 128, 4].iter().map(|s| digest_of_size(*s)).collect();
        digests.sort_by_key(|d| d.size_bytes);

        let batches = make_batches(&zero_overheads(), 64, &digests);
        // 1 + 1 + 2 + 4 = 8 <= 64; the 128-byte digest exceeds the cap, so
        // the loop terminates with a single batch.
        assert_eq!(batches, vec![0..4]);
    }

    #[test]
    fn splits_into_multiple_batches() {
        let digests: Vec<_> = [10, 10, 10, 10].iter().map(|s| digest_of_size(*s)).collect();
        let batches = make_batches(&zero_overheads(), 25, &digests);
        assert_eq!(batches, vec![0..2, 2..4]);
    }

    #[test]
    fn oversized_first_entry_yields_no_batches() {
        let digests = vec![digest_of_size(100)];
        assert!(make_batches(&zero_overheads(), 64, &digests).is_empty());
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(make_batches(&zero_overheads(), 64, &[]).is_empty());
    }

    #[test]
    fn overheads_shrink_the_cap() {
        let digests: Vec<_> = [8, 8].iter().map(|s| digest_of_size(*s)).collect();
        // Cap 20, minus top-level 2 and per-entry 1 * 2 digests = 16: both
        // digests no longer fit in one batch.
        let limits = BatchLimits {
            top_level_overhead: 2,
            per_entry_overhead: 1,
        };
        let batches = make_batches(&limits, 20, &digests);
        assert_eq!(batches, vec![0..1, 1..2]);
    }

    #[test]
    fn batches_are_contiguous_and_within_cap() {
        let digests: Vec<_> = (1..100).map(digest_of_size).collect();
        let cap = 256;
        let batches = make_batches(&zero_overheads(), cap, &digests);

        let mut expected_start = 0;
        for range in &batches {
            assert_eq!(range.start, expected_start);
            expected_start = range.end;
            let total: usize = digests[range.clone()].iter().map(|d| d.size_bytes).sum();
            assert!(total <= cap, "batch {range:?} exceeds cap: {total}");
        }
    }

    #[test]
    fn find_missing_partitions_by_encoded_size() {
        let digests: Vec<_> = (0..100).map(|_| Digest::of_bytes(b"roland")).collect();
        let wire: protos::pb::build::bazel::remote::execution::v2::Digest = (&digests[0]).into();
        let per_digest = prost::Message::encoded_len(&wire);

        // Room for three digests per request.
        let requests = partition_find_missing("", &digests, per_digest * 3);
        assert_eq!(requests.len(), 34);
        assert!(requests.iter().take(33).all(|r| r.blob_digests.len() == 3));
        assert_eq!(requests.last().unwrap().blob_digests.len(), 1);
        let total: usize = requests.iter().map(|r| r.blob_digests.len()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn find_missing_empty_input_is_one_empty_request() {
        let requests = partition_find_missing("main", &[], 1024);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].blob_digests.is_empty());
        assert_eq!(requests[0].instance_name, "main");
    }
}
