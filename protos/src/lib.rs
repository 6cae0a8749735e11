// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Checked-in message and client-stub definitions for the subset of the
//! Remote Execution API v2 (plus the google bytestream service and the
//! BuildGrid LocalCAS extension) that this client exercises.
//!
//! The definitions are written in the layout and style that `tonic-build`
//! would generate from the upstream protos, so that they can be swapped for
//! generated code without touching callers.

#![allow(clippy::derive_partial_eq_without_eq)]

pub mod pb;

mod conversions;
pub use conversions::{digest_function_value, require_digest};


mod verification;
pub use crate::verification::verify_directory_canonical;
#[cfg(test)]
mod verification_tests;

pub mod timestamp;
