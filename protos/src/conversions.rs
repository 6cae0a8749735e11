// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
impl<'a> From<&'a hashing::Digest> for crate::pb::build::bazel::remote::execution::v2::Digest {
    fn from(d: &'a hashing::Digest) -> Self {
        Self {
            hash: d.hash.to_hex(),
            size_bytes: d.size_bytes as i64,
        }
    }
}

impl From<hashing::Digest> for crate::pb::build::bazel::remote::execution::v2::Digest {
    fn from(d: hashing::Digest) -> Self {
        Self {
            hash: d.hash.to_hex(),
            size_bytes: d.size_bytes as i64,
        }
    }
}

impl<'a> TryFrom<&'a crate::pb::build::bazel::remote::execution::v2::Digest> for hashing::Digest {
    type Error = String;

    fn try_from(
        d: &crate::pb::build::bazel::remote::execution::v2::Digest,
    ) -> Result<Self, Self::Error> {
        hashing::Fingerprint::from_hex_string(&d.hash)
            .map_err(|err| format!("Bad fingerprint in Digest {:?}: {:?}", &d.hash, err))
            .map(|fingerprint| hashing::Digest::new(fingerprint, d.size_bytes as usize))
    }
}

impl TryFrom<crate::pb::build::bazel::remote::execution::v2::Digest> for hashing::Digest {
    type Error = String;

    fn try_from(
        d: crate::pb::build::bazel::remote::execution::v2::Digest,
    ) -> Result<Self, Self::Error> {
        hashing::Digest::try_from(&d)
    }
}

pub fn require_digest<
    'a,
    D: Into<Option<&'a crate::pb::build::bazel::remote::execution::v2::Digest>>,
>(
    digest_opt: D,
) -> Result<hashing::Digest, String> {
    match digest_opt.into() {
        Some(digest) => hashing::Digest::try_from(digest),
        None => {
            Err("Protocol violation: Digest missing from a Remote Execution API protobuf.".into())
        }
    }
}

/// The wire value for the digest function this process was built with.
pub fn digest_function_value() -> crate::pb::build::bazel::remote::execution::v2::digest_function::Value
{
    use crate::pb::build::bazel::remote::execution::v2::digest_function::Value;
    match hashing::DIGEST_FUNCTION {
        hashing::DigestFunction::Md5 => Value::Md5,
        hashing::DigestFunction::Sha1 => Value::Sha1,
        hashing::DigestFunction::Sha256 => Value::Sha256,
        hashing::DigestFunction::Sha384 => Value::Sha384,
        hashing::DigestFunction::Sha512 => Value::Sha512,
    }
}
