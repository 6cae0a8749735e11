// Copyright 2024 Remexec project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Monitors that tail a file being written by a running command and feed
//! chunks of new bytes to a callback (typically a LogStream writer).
//!
//! Two interchangeable implementations cover inotify-capable and
//! non-inotify filesystems. Both guarantee sequential delivery, at least
//! once, no delivery after the destructor returns, and safe shutdown from
//! another thread.

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use log::warn;
use notify::event::{AccessKind, AccessMode, EventKind};
use notify::{RecursiveMode, Watcher};

/// Receives chunks of bytes as they are appended to the monitored file.
pub type DataCallback = Box<dyn FnMut(&[u8]) + Send>;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_BUFFER_SIZE: usize = 4096;

/// Only emit a chunk once this many bytes accumulated (unless stopping).
const READ_BATCH_MIN_BYTES: usize = 100;

fn drain(file: &mut std::fs::File, callback: &mut DataCallback) {
    let mut buffer = [0_u8; READ_BUFFER_SIZE];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => return,
            Ok(n) => callback(&buffer[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                warn!("Error reading monitored file: {err}");
                return;
            }
        }
    }
}

/// Event-driven monitor: a filesystem watcher reports modifications, and a
/// background thread drains the file on each one. Seeing close-for-write
/// means the writer is done and the thread exits after one final drain.
pub struct InotifyFileMonitor {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    // Kept alive so events keep flowing until the thread has exited.
    _watcher: notify::RecommendedWatcher,
}

impl InotifyFileMonitor {
    pub fn new(path: &Path, mut callback: DataCallback) -> Result<InotifyFileMonitor, String> {
        let mut file = std::fs::File::open(path)
            .map_err(|err| format!("Could not open {path:?} for monitoring: {err}"))?;

        let (event_sender, event_receiver) = crossbeam_channel::unbounded();
        let mut watcher = notify::RecommendedWatcher::new(
            move |event| {
                // The monitor thread exiting first is fine.
                let _ = event_sender.send(event);
            },
            notify::Config::default(),
        )
        .map_err(|err| format!("Failed to watch {path:?}: {err}"))?;
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|err| format!("Failed to watch {path:?}: {err}"))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = thread::spawn(move || {
            loop {
                match event_receiver.recv_timeout(POLL_INTERVAL) {
                    Ok(Ok(event)) => match event.kind {
                        EventKind::Modify(_) => drain(&mut file, &mut callback),
                        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                            drain(&mut file, &mut callback);
                            return;
                        }
                        _ => {}
                    },
                    Ok(Err(err)) => warn!("File watch error: {err}"),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        drain(&mut file, &mut callback);
                        return;
                    }
                }

                if thread_stop.load(Ordering::Relaxed) {
                    // Run two more poll cycles so that writes immediately
                    // preceding stop() are not lost.
                    for _ in 0..2 {
                        if let Ok(Ok(event)) = event_receiver.recv_timeout(POLL_INTERVAL) {
                            if matches!(event.kind, EventKind::Modify(_)) {
                                drain(&mut file, &mut callback);
                            }
                        }
                    }
                    drain(&mut file, &mut callback);
                    return;
                }
            }
        });

        Ok(InotifyFileMonitor {
            stop,
            thread: Some(thread),
            _watcher: watcher,
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for InotifyFileMonitor {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Polling monitor for filesystems without modification events: waits for
/// the file to first have bytes, then reads in chunks, emitting to the
/// callback once a minimum batch has accumulated (or unconditionally when
/// stopping). Residual bytes are flushed before exit.
pub struct StatFileMonitor {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl StatFileMonitor {
    pub fn new(path: &Path, mut callback: DataCallback) -> Result<StatFileMonitor, String> {
        let path = path.to_owned();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let thread = thread::spawn(move || {
            // Wait until the file exists and has bytes.
            let mut file = loop {
                if let Ok(metadata) = std::fs::metadata(&path) {
                    if metadata.len() > 0 {
                        match std::fs::File::open(&path) {
                            Ok(file) => break file,
                            Err(err) => {
                                warn!("Could not open {path:?} for monitoring: {err}");
                                return;
                            }
                        }
                    }
                }
                if thread_stop.load(Ordering::Relaxed) {
                    return;
                }
                thread::sleep(POLL_INTERVAL);
            };

            let mut buffer = [0_u8; READ_BUFFER_SIZE];
            let mut batch: Vec<u8> = Vec::with_capacity(READ_BUFFER_SIZE);
            loop {
                let stopping = thread_stop.load(Ordering::Relaxed);
                match file.read(&mut buffer) {
                    Ok(0) => {
                        if stopping {
                            break;
                        }
                        thread::sleep(POLL_INTERVAL);
                    }
                    Ok(n) => batch.extend_from_slice(&buffer[..n]),
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        warn!("Error reading monitored file: {err}");
                        break;
                    }
                }

                if !batch.is_empty() && (batch.len() >= READ_BATCH_MIN_BYTES || stopping) {
                    callback(&batch);
                    batch.clear();
                }
            }

            if !batch.is_empty() {
                callback(&batch);
            }
        });

        Ok(StatFileMonitor {
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for StatFileMonitor {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use super::{DataCallback, InotifyFileMonitor, StatFileMonitor};

    fn collector() -> (Arc<Mutex<Vec<u8>>>, DataCallback) {
        let collected: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();
        let callback: DataCallback = Box::new(move |bytes| {
            sink.lock().unwrap().extend_from_slice(bytes);
        });
        (collected, callback)
    }

    fn wait_for(collected: &Arc<Mutex<Vec<u8>>>, want: &[u8]) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if collected.lock().unwrap().as_slice() == want {
                return;
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        panic!(
            "Timed out; collected {:?}",
            String::from_utf8_lossy(&collected.lock().unwrap())
        );
    }

    #[test]
    fn stat_monitor_delivers_appended_bytes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        std::fs::write(&path, b"").unwrap();

        let (collected, callback) = collector();
        let monitor = StatFileMonitor::new(&path, callback).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        // Larger than the minimum batch, delivered while running.
        let big_chunk = vec![b'a'; 256];
        file.write_all(&big_chunk).unwrap();
        file.flush().unwrap();

        let mut want = big_chunk.clone();
        wait_for(&collected, &want);

        // A residual smaller than the minimum batch is flushed at stop.
        file.write_all(b"tail").unwrap();
        file.flush().unwrap();
        std::thread::sleep(Duration::from_millis(300));

        monitor.stop();
        drop(monitor);
        want.extend_from_slice(b"tail");
        assert_eq!(collected.lock().unwrap().as_slice(), want.as_slice());
    }

    #[test]
    fn stat_monitor_stop_before_any_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stderr");
        std::fs::write(&path, b"").unwrap();

        let (collected, callback) = collector();
        let monitor = StatFileMonitor::new(&path, callback).unwrap();
        monitor.stop();
        drop(monitor);
        assert!(collected.lock().unwrap().is_empty());
    }

    #[test]
    fn inotify_monitor_delivers_appended_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        std::fs::write(&path, b"").unwrap();

        let (collected, callback) = collector();
        let monitor = InotifyFileMonitor::new(&path, callback).unwrap();

        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(b"hello ").unwrap();
            file.flush().unwrap();
            file.write_all(b"world").unwrap();
            // Dropping closes the file, which also signals the monitor.
        }

        wait_for(&collected, b"hello world");
        drop(monitor);
    }

    #[test]
    fn inotify_monitor_flushes_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdout");
        std::fs::write(&path, b"").unwrap();

        let (collected, callback) = collector();
        let monitor = InotifyFileMonitor::new(&path, callback).unwrap();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"just before stop").unwrap();
        file.flush().unwrap();

        monitor.stop();
        drop(monitor);

        assert_eq!(collected.lock().unwrap().as_slice(), b"just before stop");
    }
}
