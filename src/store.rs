//! Atomic File Store: crash-safe, concurrent-reader-tolerant JSON persistence
//! (spec.md §4.1). Every other component writes state through this module so
//! no component hand-rolls the write-temp-then-rename dance itself.
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Instant,
};

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    constants::{STORE_MIN_RETRIES, STORE_RETRY_BASE, STORE_RETRY_JITTER},
    error::StoreError,
};

/// Outcome of a [`read`], distinguishing absence/partial content from a hard error.
pub enum ReadOutcome {
    /// The file was present and its full contents are returned.
    Present(Vec<u8>),
    /// The file is absent, empty, or could not be parsed as complete JSON —
    /// the caller should treat this the same as "nothing written yet".
    NotYetAvailable,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_path_for(path: &Path) -> PathBuf {
    let pid = std::process::id();
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!("{file_name}.tmp-{pid}-{counter}"))
}

fn jittered_sleep(attempt: u32) {
    let thread_mix = format!("{:?}", thread::current().id());
    let mix: u64 = thread_mix.bytes().map(u64::from).sum();
    let now_nanos = Instant::now().elapsed().as_nanos() as u64;
    let jitter_fraction = (mix ^ now_nanos ^ u64::from(attempt)) % 1000;
    let jitter = STORE_RETRY_JITTER.mul_f64(jitter_fraction as f64 / 1000.0);
    thread::sleep(STORE_RETRY_BASE * attempt.max(1) + jitter);
}

/// Writes `bytes` to `path` such that a concurrent reader observes either the
/// prior content or the new content, never a mix and never an empty file.
pub fn write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut last_err: Option<io::Error> = None;

    for attempt in 1..=STORE_MIN_RETRIES {
        match write_once(path, bytes) {
            Ok(()) => return Ok(()),
            Err(err) => {
                last_err = Some(err);
                if attempt < STORE_MIN_RETRIES {
                    jittered_sleep(attempt);
                }
            }
        }
    }

    Err(StoreError::RetriesExhausted {
        path: path.to_path_buf(),
        attempts: STORE_MIN_RETRIES,
        source: last_err.expect("at least one attempt runs"),
    })
}

fn write_once(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp_path = temp_path_for(path);

    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&temp_path);
            Err(err)
        }
    }
}

/// Reads the complete stored bytes, tolerating absence, emptiness, and
/// truncated content as the same [`ReadOutcome::NotYetAvailable`].
pub fn read(path: &Path) -> Result<ReadOutcome, StoreError> {
    match fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(ReadOutcome::NotYetAvailable),
        Ok(bytes) => Ok(ReadOutcome::Present(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(ReadOutcome::NotYetAvailable),
        Err(err) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

/// Serializes `value` and writes it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, source),
    })?;
    write(path, &bytes)
}

/// Outcome of [`read_json`].
pub enum JsonReadOutcome<T> {
    /// A complete, well-formed value was read.
    Present(T),
    /// Nothing usable is on disk yet (absent, empty, or still-being-written).
    NotYetAvailable,
}

/// Reads and deserializes a JSON value, treating parse failures the same as
/// [`ReadOutcome::NotYetAvailable`] (a reader may observe a half-written file
/// that the writer is about to replace).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<JsonReadOutcome<T>, StoreError> {
    match read(path)? {
        ReadOutcome::NotYetAvailable => Ok(JsonReadOutcome::NotYetAvailable),
        ReadOutcome::Present(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(JsonReadOutcome::Present(value)),
            Err(_) => Ok(JsonReadOutcome::NotYetAvailable),
        },
    }
}

/// Opens a file for exclusive creation, failing with `AlreadyExists` if the
/// path already exists. Used by the Instance Lock's race-safe acquire path.
pub fn create_exclusive(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json(&path, &Sample { value: 7 }).unwrap();
        match read_json::<Sample>(&path).unwrap() {
            JsonReadOutcome::Present(sample) => assert_eq!(sample, Sample { value: 7 }),
            JsonReadOutcome::NotYetAvailable => panic!("expected Present"),
        }
    }

    #[test]
    fn missing_file_is_not_yet_available() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(matches!(
            read_json::<Sample>(&path).unwrap(),
            JsonReadOutcome::NotYetAvailable
        ));
    }

    #[test]
    fn empty_file_is_not_yet_available() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.json");
        fs::write(&path, b"").unwrap();
        assert!(matches!(
            read_json::<Sample>(&path).unwrap(),
            JsonReadOutcome::NotYetAvailable
        ));
    }

    #[test]
    fn truncated_json_is_not_yet_available() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truncated.json");
        fs::write(&path, b"{\"value\":").unwrap();
        assert!(matches!(
            read_json::<Sample>(&path).unwrap(),
            JsonReadOutcome::NotYetAvailable
        ));
    }

    #[test]
    fn second_write_replaces_first_without_leaving_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json(&path, &Sample { value: 1 }).unwrap();
        write_json(&path, &Sample { value: 2 }).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["state.json".to_string()]);
    }

    #[test]
    fn create_exclusive_fails_on_existing_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");
        create_exclusive(&path).unwrap();
        let err = create_exclusive(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
}
