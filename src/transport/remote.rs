//! Remote content-store transport.
//!
//! Speaks a GitHub-style contents API: files live under a folder at a
//! branch, reads return text plus a revision token, and writes must present
//! the last-known token so concurrent writers cannot clobber each other.
//! HTTP outcomes map onto structured transport errors: 404 reads as empty,
//! 401/403 as auth failure, 429 as rate limiting with any reset hint the
//! store provides.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use tracing::warn;

use super::wire::{self, Envelope};
use super::{FileCursors, Transport, TransportError};
use crate::config::RemoteConfig;

const CHANNEL_EXT: &str = "jsonl";
const HTTP_TIMEOUT_SECS: u64 = 15;
const USER_AGENT: &str = concat!("driftlog-sync/", env!("CARGO_PKG_VERSION"));

pub struct RemoteStoreTransport {
    client: reqwest::blocking::Client,
    base_url: String,
    repo: String,
    token: String,
    branch: String,
    folder: String,
    source_file: String,
}

impl RemoteStoreTransport {
    pub fn new(remote: &RemoteConfig, source_id: &str) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: remote.base_url.trim_end_matches('/').to_string(),
            repo: remote.repo.clone(),
            token: remote.token.clone(),
            branch: remote.branch.clone(),
            folder: remote.folder.trim_matches('/').replace('\\', "/"),
            source_file: format!("{source_id}.{CHANNEL_EXT}"),
        })
    }

    fn require_token(&self) -> Result<(), TransportError> {
        if self.token.trim().is_empty() {
            return Err(TransportError::MissingCredentials { what: "token" });
        }
        Ok(())
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.base_url,
            self.repo,
            encode_path(path)
        )
    }

    fn channel_path(&self, filename: &str) -> String {
        format!("{}/{}", self.folder, filename)
    }

    fn request(
        &self,
        op: &'static str,
        builder: reqwest::blocking::RequestBuilder,
    ) -> Result<(u16, Option<u64>, Value), TransportError> {
        let response = builder
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(&self.token)
            .send()
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    TransportError::Offline(format!("remote {op}: {e}"))
                } else {
                    TransportError::Http(format!("remote {op}: {e}"))
                }
            })?;

        let status = response.status().as_u16();
        let reset_epoch_s = response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().unwrap_or_default();
        let value = serde_json::from_str(&body).unwrap_or(Value::Null);
        Ok((status, reset_epoch_s, value))
    }

    /// Read a file, returning its text and revision token. 404 is an empty
    /// channel, not an error.
    fn read_file(&self, path: &str) -> Result<Option<(String, Option<String>)>, TransportError> {
        let url = format!("{}?ref={}", self.contents_url(path), urlencoding::encode(&self.branch));
        let (status, reset, value) = self.request("read", self.client.get(&url))?;
        if status == 404 {
            return Ok(None);
        }
        check_status("read", status, reset)?;

        let text = value
            .get("content")
            .and_then(Value::as_str)
            .map(decode_content)
            .unwrap_or_default();
        let revision = value
            .get("sha")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Some((text, revision)))
    }

    fn write_file(
        &self,
        path: &str,
        text: &str,
        revision: Option<&str>,
        message: &str,
    ) -> Result<(), TransportError> {
        let mut body = json!({
            "message": message,
            "content": BASE64.encode(text.as_bytes()),
            "branch": self.branch,
        });
        if let Some(revision) = revision {
            body["sha"] = Value::from(revision);
        }
        let (status, reset, _) =
            self.request("write", self.client.put(self.contents_url(path)).json(&body))?;
        check_status("write", status, reset)
    }

    /// Names of all channel files in the folder. A missing folder is empty.
    fn list_files(&self) -> Result<Vec<String>, TransportError> {
        let url = format!(
            "{}?ref={}",
            self.contents_url(&self.folder),
            urlencoding::encode(&self.branch)
        );
        let (status, reset, value) = self.request("list", self.client.get(&url))?;
        if status == 404 {
            return Ok(Vec::new());
        }
        check_status("list", status, reset)?;

        let mut names: Vec<String> = value
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.get("type").and_then(Value::as_str) == Some("file"))
                    .filter_map(|e| e.get("name").and_then(Value::as_str))
                    .filter(|name| name.ends_with(&format!(".{CHANNEL_EXT}")))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    fn channel_lines(&self, filename: &str) -> Result<Vec<String>, TransportError> {
        let text = self
            .read_file(&self.channel_path(filename))?
            .map(|(text, _)| text)
            .unwrap_or_default();
        Ok(text.lines().map(str::to_string).collect())
    }
}

impl Transport for RemoteStoreTransport {
    fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        self.require_token()?;
        let line = wire::to_line(envelope)?;
        let path = self.channel_path(&self.source_file);
        let (existing, revision) = self.read_file(&path)?.unwrap_or((String::new(), None));
        let next = appended(&existing, &line);
        self.write_file(
            &path,
            &next,
            revision.as_deref(),
            &format!("sync({}): append event", envelope.sender),
        )
    }

    fn receive(&mut self) -> Result<Vec<Value>, TransportError> {
        self.require_token()?;
        let mut payloads = Vec::new();
        for name in self.list_files()? {
            if name == self.source_file {
                continue;
            }
            for line in self.channel_lines(&name)? {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(&line) {
                    Ok(value) => payloads.push(value),
                    Err(_) => warn!(channel = %name, "skipping malformed remote line"),
                }
            }
        }
        Ok(payloads)
    }

    fn receive_incremental(
        &mut self,
        cursors: &FileCursors,
    ) -> Result<(Vec<Value>, FileCursors), TransportError> {
        self.require_token()?;
        let mut payloads = Vec::new();
        let mut next = cursors.clone();
        for name in self.list_files()? {
            if name == self.source_file {
                continue;
            }
            let lines = self.channel_lines(&name)?;
            let consumed = cursors.get(&name).copied().unwrap_or(0);
            let offset = (consumed as usize).min(lines.len());
            for line in &lines[offset..] {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(line) {
                    Ok(value) => payloads.push(value),
                    Err(_) => warn!(channel = %name, "skipping malformed remote line"),
                }
            }
            next.insert(name, consumed.max(lines.len() as u64));
        }
        Ok((payloads, next))
    }
}

fn check_status(op: &'static str, status: u16, reset_epoch_s: Option<u64>) -> Result<(), TransportError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(TransportError::Unauthorized { status }),
        429 => Err(TransportError::RateLimited { reset_epoch_s }),
        _ => Err(TransportError::Status { op, status }),
    }
}

/// Percent-encode each segment of a contents-API path, keeping the `/`
/// separators literal so folder structure survives.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Contents APIs wrap base64 bodies across lines; strip the whitespace
/// before decoding.
fn decode_content(b64: &str) -> String {
    let compact: String = b64.split_whitespace().collect();
    BASE64
        .decode(compact.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .map(|text| text.trim_matches('\n').to_string())
        .unwrap_or_default()
}

fn appended(existing: &str, line: &str) -> String {
    if existing.is_empty() {
        line.to_string()
    } else {
        format!("{existing}\n{line}")
    }
}
