// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Helpers for the protobuf well-known `Timestamp` type.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use prost_types::Timestamp;

/// The current wall-clock time as a protobuf Timestamp.
pub fn now() -> Timestamp {
    from_system_time(SystemTime::now())
}

pub fn from_system_time(time: SystemTime) -> Timestamp {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => Timestamp {
            seconds: elapsed.as_secs() as i64,
            nanos: elapsed.subsec_nanos() as i32,
        },
        // A time before the epoch is expressed as a negative second count.
        Err(err) => {
            let before = err.duration();
            Timestamp {
                seconds: -(before.as_secs() as i64) - 1,
                nanos: 1_000_000_000 - before.subsec_nanos() as i32,
            }
        }
    }
}

/// Mtimes are captured with microsecond resolution.
pub fn from_mtime(time: SystemTime) -> Timestamp {
    let mut ts = from_system_time(time);
    ts.nanos -= ts.nanos % 1_000;
    ts
}

pub fn to_duration(ts: &prost_types::Duration) -> Duration {
    Duration::new(ts.seconds.max(0) as u64, ts.nanos.max(0) as u32)
}
