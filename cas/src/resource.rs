// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Byte-stream resource names.
//!
//! Reads address `{instance}/blobs/{hash}/{size}`; writes address
//! `{instance}/uploads/{uuid}/blobs/{hash}/{size}`. The leading
//! `{instance}/` is omitted iff the instance name is empty.

use hashing::Digest;

pub fn make_read_resource_name(instance_name: &str, digest: &Digest) -> String {
    let mut name = String::new();
    if !instance_name.is_empty() {
        name.push_str(instance_name);
        name.push('/');
    }
    name.push_str("blobs/");
    name.push_str(&digest.hash.to_hex());
    name.push('/');
    name.push_str(&digest.size_bytes.to_string());
    name
}

pub fn make_write_resource_name(instance_name: &str, uuid: &str, digest: &Digest) -> String {
    let mut name = String::new();
    if !instance_name.is_empty() {
        name.push_str(instance_name);
        name.push('/');
    }
    name.push_str("uploads/");
    name.push_str(uuid);
    name.push('/');
    name.push_str("blobs/");
    name.push_str(&digest.hash.to_hex());
    name.push('/');
    name.push_str(&digest.size_bytes.to_string());
    name
}

#[derive(Debug, Eq, PartialEq)]
pub struct ParsedReadResourceName<'a> {
    pub instance_name: &'a str,
    pub hash: &'a str,
    pub size: usize,
}

#[derive(Debug, Eq, PartialEq)]
pub struct ParsedWriteResourceName<'a> {
    pub instance_name: &'a str,
    pub uuid: &'a str,
    pub hash: &'a str,
    pub size: usize,
}

/// Parses `"{instance_name}/blobs/{hash}/{size}"`. The `{instance_name}`
/// may be blank (with no leading slash).
pub fn parse_read_resource_name(resource: &str) -> Result<ParsedReadResourceName<'_>, String> {
    if resource.is_empty() {
        return Err("Missing resource name".to_owned());
    }

    let parts: Vec<_> = resource.split('/').collect();

    let blobs_index = match parts.iter().position(|p| *p == "blobs") {
        Some(index) => index,
        None => return Err("Malformed resource name: missing `blobs` component".to_owned()),
    };

    if (parts.len() - blobs_index) < 3 {
        return Err("Malformed resource name: not enough path components after `blobs`".to_owned());
    }

    let size = parts[blobs_index + 2]
        .parse::<usize>()
        .map_err(|_| "Malformed resource name: cannot parse size".to_owned())?;

    Ok(ParsedReadResourceName {
        instance_name: instance_prefix(resource, &parts[0..blobs_index]),
        hash: parts[blobs_index + 1],
        size,
    })
}

/// Parses `"{instance_name}/uploads/{uuid}/blobs/{hash}/{size}"`.
pub fn parse_write_resource_name(resource: &str) -> Result<ParsedWriteResourceName<'_>, String> {
    if resource.is_empty() {
        return Err("Missing resource name".to_owned());
    }

    let parts: Vec<_> = resource.split('/').collect();

    let uploads_index = match parts.iter().position(|p| *p == "uploads") {
        Some(index) => index,
        None => return Err("Malformed resource name: missing `uploads` component".to_owned()),
    };

    if (parts.len() - uploads_index) < 5 {
        return Err(
            "Malformed resource name: not enough path components after `uploads`".to_owned(),
        );
    }

    if parts[uploads_index + 2] != "blobs" {
        return Err("Malformed resource name: expected `blobs` component".to_owned());
    }

    let size = parts[uploads_index + 4]
        .parse::<usize>()
        .map_err(|_| "Malformed resource name: cannot parse size".to_owned())?;

    Ok(ParsedWriteResourceName {
        instance_name: instance_prefix(resource, &parts[0..uploads_index]),
        uuid: parts[uploads_index + 1],
        hash: parts[uploads_index + 3],
        size,
    })
}

fn instance_prefix<'a>(resource: &'a str, instance_parts: &[&str]) -> &'a str {
    if instance_parts.is_empty() {
        ""
    } else {
        let len = instance_parts.iter().map(|x| x.len()).sum::<usize>() + instance_parts.len() - 1;
        &resource[0..len]
    }
}
