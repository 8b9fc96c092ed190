//! Shared-directory transport.
//!
//! One append-only `<source_id>.jsonl` per peer in a directory every peer
//! can reach (network mount, synced folder). Incremental cursors are line
//! counts per file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use serde_json::Value;
use tracing::warn;

use super::wire::{self, Envelope};
use super::{FileCursors, Transport, TransportError};

const CHANNEL_EXT: &str = "jsonl";

pub struct DirTransport {
    shared_dir: PathBuf,
    source_file: String,
}

impl DirTransport {
    pub fn new(shared_dir: impl Into<PathBuf>, source_id: &str) -> Self {
        Self {
            shared_dir: shared_dir.into(),
            source_file: format!("{source_id}.{CHANNEL_EXT}"),
        }
    }

    /// Other peers' channel files, sorted by name for a stable scan order.
    fn peer_files(&self) -> Vec<(String, PathBuf)> {
        let entries = match fs::read_dir(&self.shared_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        let mut files: Vec<(String, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let name = entry.file_name().into_string().ok()?;
                if !name.ends_with(&format!(".{CHANNEL_EXT}")) || name == self.source_file {
                    return None;
                }
                Some((name, path))
            })
            .collect();
        files.sort();
        files
    }

    fn read_lines(&self, path: &PathBuf) -> Vec<String> {
        match fs::read_to_string(path) {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(e) => {
                warn!(file = %path.display(), "peer channel unreadable, skipping: {e}");
                Vec::new()
            }
        }
    }
}

fn parse_payloads(lines: impl Iterator<Item = String>, out: &mut Vec<Value>) {
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(value) => out.push(value),
            Err(_) => warn!("skipping malformed transport line"),
        }
    }
}

impl Transport for DirTransport {
    fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        fs::create_dir_all(&self.shared_dir)?;
        let line = wire::to_line(envelope)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.shared_dir.join(&self.source_file))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<Value>, TransportError> {
        let mut payloads = Vec::new();
        for (_, path) in self.peer_files() {
            parse_payloads(self.read_lines(&path).into_iter(), &mut payloads);
        }
        Ok(payloads)
    }

    fn receive_incremental(
        &mut self,
        cursors: &FileCursors,
    ) -> Result<(Vec<Value>, FileCursors), TransportError> {
        let mut payloads = Vec::new();
        let mut next = cursors.clone();
        for (name, path) in self.peer_files() {
            let lines = self.read_lines(&path);
            let consumed = cursors.get(&name).copied().unwrap_or(0);
            let offset = (consumed as usize).min(lines.len());
            parse_payloads(lines[offset..].iter().cloned(), &mut payloads);
            // Never move a cursor backwards, even if a channel was truncated.
            next.insert(name, consumed.max(lines.len() as u64));
        }
        Ok((payloads, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manual_ping_event;

    #[test]
    fn peers_see_each_other_but_not_themselves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut a = DirTransport::new(dir.path(), "cornelius");
        let mut b = DirTransport::new(dir.path(), "anson");

        let event = manual_ping_event("hello", "cornelius");
        a.send(&wire::encode("cornelius", &event)).expect("send");

        assert_eq!(b.receive().expect("receive").len(), 1);
        assert!(a.receive().expect("receive").is_empty());
    }

    #[test]
    fn incremental_scan_only_returns_new_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut a = DirTransport::new(dir.path(), "cornelius");
        let mut b = DirTransport::new(dir.path(), "anson");

        let e1 = manual_ping_event("one", "cornelius");
        a.send(&wire::encode("cornelius", &e1)).expect("send");

        let (first, cursors) = b.receive_incremental(&FileCursors::new()).expect("first");
        assert_eq!(first.len(), 1);
        assert_eq!(cursors.get("cornelius.jsonl"), Some(&1));

        let (empty, cursors) = b.receive_incremental(&cursors).expect("second");
        assert!(empty.is_empty());

        let e2 = manual_ping_event("two", "cornelius");
        a.send(&wire::encode("cornelius", &e2)).expect("send");
        let (second, cursors) = b.receive_incremental(&cursors).expect("third");
        assert_eq!(second.len(), 1);
        assert_eq!(cursors.get("cornelius.jsonl"), Some(&2));
    }

    #[test]
    fn cursor_never_regresses_when_channel_shrinks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut a = DirTransport::new(dir.path(), "cornelius");
        let mut b = DirTransport::new(dir.path(), "anson");

        for n in 0..3 {
            let event = manual_ping_event(&format!("e{n}"), "cornelius");
            a.send(&wire::encode("cornelius", &event)).expect("send");
        }
        let (_, cursors) = b.receive_incremental(&FileCursors::new()).expect("scan");
        assert_eq!(cursors.get("cornelius.jsonl"), Some(&3));

        // Truncate the channel behind the cursor.
        fs::write(dir.path().join("cornelius.jsonl"), "").expect("truncate");
        let (payloads, cursors) = b.receive_incremental(&cursors).expect("rescan");
        assert!(payloads.is_empty());
        assert_eq!(cursors.get("cornelius.jsonl"), Some(&3));
    }

    #[test]
    fn missing_shared_dir_is_empty_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut b = DirTransport::new(dir.path().join("absent"), "anson");
        assert!(b.receive().expect("receive").is_empty());
        let (payloads, cursors) = b.receive_incremental(&FileCursors::new()).expect("scan");
        assert!(payloads.is_empty());
        assert!(cursors.is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path()).expect("mkdir");
        fs::write(dir.path().join("cornelius.jsonl"), "{broken\n{\"ok\": true}\n").expect("write");

        let mut b = DirTransport::new(dir.path(), "anson");
        let payloads = b.receive().expect("receive");
        assert_eq!(payloads.len(), 1);
    }
}
