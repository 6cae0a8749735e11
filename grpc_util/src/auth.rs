// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Bearer-token loading with optional periodic refresh.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderValue;
use log::{debug, warn};
use parking_lot::RwLock;

/// The contents of an access-token file, exposed as an `Authorization`
/// header value. Readers never observe a torn value: the header is swapped
/// under a lock.
#[derive(Debug)]
pub struct TokenSource {
    path: PathBuf,
    value: RwLock<HeaderValue>,
}

impl TokenSource {
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<Arc<TokenSource>, String> {
        let path = path.into();
        let value = read_token_file(&path)?;
        Ok(Arc::new(TokenSource {
            path,
            value: RwLock::new(value),
        }))
    }

    pub fn header_value(&self) -> HeaderValue {
        self.value.read().clone()
    }

    /// Re-read the token file. A failure keeps the previously loaded token.
    pub fn refresh(&self) {
        match read_token_file(&self.path) {
            Ok(value) => {
                let mut guard = self.value.write();
                if *guard != value {
                    debug!("Reloaded access token from {:?}", self.path);
                    *guard = value;
                }
            }
            Err(err) => warn!("Could not reload access token: {err}"),
        }
    }

    /// Refresh the token on a fixed interval until the returned task is
    /// aborted or every client handle is dropped.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the token was just loaded.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(source) => source.refresh(),
                    None => break,
                }
            }
        })
    }
}

fn read_token_file(path: &std::path::Path) -> Result<HeaderValue, String> {
    let token = std::fs::read_to_string(path)
        .map_err(|err| format!("Failed to read access token file {path:?}: {err}"))?;
    let token = token.trim();
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|err| format!("Access token in {path:?} is not a valid header value: {err}"))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::TokenSource;

    #[test]
    fn loads_and_trims_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "sekrit\n").unwrap();

        let source = TokenSource::load(&path).unwrap();
        assert_eq!(source.header_value().to_str().unwrap(), "Bearer sekrit");
    }

    #[test]
    fn refresh_picks_up_new_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "one").unwrap();

        let source = TokenSource::load(&path).unwrap();
        std::fs::write(&path, "two").unwrap();
        source.refresh();
        assert_eq!(source.header_value().to_str().unwrap(), "Bearer two");
    }

    #[test]
    fn refresh_failure_keeps_old_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "one").unwrap();

        let source = TokenSource::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        source.refresh();
        assert_eq!(source.header_value().to_str().unwrap(), "Bearer one");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        TokenSource::load(dir.path().join("nope")).expect_err("Want err");
    }
}
