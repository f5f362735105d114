//! The document task: downloads the API documents from the forked
//! application and writes them to the output directory.

use std::collections::BTreeMap;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::core::TaskContext;
use crate::error::DocsError;
use crate::fork::ForkedApp;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Even the last attempt before the deadline gets this long to answer.
const MIN_REQUEST_TIME: Duration = Duration::from_millis(100);

/// What to download and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocsSettings {
    /// URL to output file name, downloaded in this order.
    pub mappings: Vec<(String, String)>,
    pub output_dir: Utf8PathBuf,
    /// How long each URL may take to answer successfully.
    pub wait_time: Duration,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedDoc {
    pub url: String,
    pub path: Utf8PathBuf,
    /// BLAKE3 hash of the written content, hex encoded.
    pub fingerprint: String,
    /// False when the file already had this content and was left alone.
    pub changed: bool,
}

/// The output of the document task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedDocs {
    pub files: Vec<GeneratedDoc>,
}

impl GeneratedDocs {
    pub fn paths(&self) -> impl Iterator<Item = &Utf8Path> {
        self.files.iter().map(|doc| doc.path.as_path())
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, DocsError> {
    let mut map = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        let key = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DocsError::Header(name.clone()))?;
        let value = HeaderValue::from_str(value).map_err(|_| DocsError::Header(name.clone()))?;
        map.insert(key, value);
    }

    Ok(map)
}

fn output_path(dir: &Utf8Path, file_name: &str) -> Result<Utf8PathBuf, DocsError> {
    let plain = Utf8Path::new(file_name).file_name() == Some(file_name)
        && !file_name.contains(['/', '\\'])
        && file_name != "..";

    if !plain {
        return Err(DocsError::FileName(file_name.to_string()));
    }

    Ok(dir.join(file_name))
}

/// Polls `url` until it answers with a success status. No request outlives
/// the deadline.
fn await_success(
    client: &Client,
    app: &ForkedApp,
    url: &str,
    wait_time: Duration,
) -> Result<Response, DocsError> {
    let deadline = Instant::now() + wait_time;

    loop {
        if !app.is_running() {
            return Err(DocsError::ProcessExited(url.to_string()));
        }

        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(MIN_REQUEST_TIME);

        let last = match client.get(url).timeout(remaining).send() {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => response.status().to_string(),
            Err(err) => err.to_string(),
        };

        if Instant::now() >= deadline {
            return Err(DocsError::Timeout {
                url: url.to_string(),
                secs: wait_time.as_secs(),
                last,
            });
        }

        tracing::debug!(url, %last, "API docs not available yet");
        thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }
}

/// JSON bodies are pretty-printed with their key order intact, anything
/// else is kept as it came.
fn render(body: Vec<u8>) -> Vec<u8> {
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => serde_json::to_vec_pretty(&value).unwrap_or(body),
        Err(_) => body,
    }
}

/// Writes `content` unless the file already holds exactly that.
fn write_if_changed(path: &Utf8Path, content: &[u8]) -> Result<(String, bool), DocsError> {
    let fingerprint = blake3::hash(content);

    let unchanged = fs::read(path)
        .map(|existing| blake3::hash(&existing) == fingerprint)
        .unwrap_or(false);

    if !unchanged {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| DocsError::Write(dir.to_owned(), e))?;
        }
        fs::write(path, content).map_err(|e| DocsError::Write(path.to_owned(), e))?;
    }

    Ok((fingerprint.to_hex().to_string(), !unchanged))
}

/// Body of the document task.
///
/// Runs while the forked application is live. Each configured URL is polled
/// until it answers, then its body is written to the output directory.
pub(crate) fn generate(
    ctx: &TaskContext,
    app: &ForkedApp,
    settings: &DocsSettings,
) -> Result<GeneratedDocs, DocsError> {
    let client = Client::builder()
        .default_headers(header_map(&settings.headers)?)
        .build()
        .map_err(DocsError::Client)?;

    let mut files = Vec::with_capacity(settings.mappings.len());

    for (url, file_name) in &settings.mappings {
        let s = Instant::now();
        let path = output_path(&settings.output_dir, file_name)?;

        let response = await_success(&client, app, url, settings.wait_time)?;
        let body = response
            .bytes()
            .map_err(|e| DocsError::Body(url.clone(), e))?;

        let (fingerprint, changed) = write_if_changed(&path, &render(body.to_vec()))?;

        if changed {
            tracing::info!("{}: wrote {path} {}", ctx.name, crate::utils::as_overhead(s));
        } else {
            tracing::info!("{}: {path} is up to date {}", ctx.name, crate::utils::as_overhead(s));
        }

        files.push(GeneratedDoc {
            url: url.clone(),
            path,
            fingerprint,
            changed,
        });
    }

    Ok(GeneratedDocs { files })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_is_pretty_printed_in_order() {
        let body = br#"{"openapi":"3.0.1","info":{"title":"t"},"paths":{}}"#.to_vec();
        let rendered = String::from_utf8(render(body)).unwrap();

        assert_eq!(
            rendered,
            "{\n  \"openapi\": \"3.0.1\",\n  \"info\": {\n    \"title\": \"t\"\n  },\n  \"paths\": {}\n}"
        );
    }

    #[test]
    fn other_bodies_are_kept() {
        let body = b"openapi: 3.0.1\n".to_vec();
        assert_eq!(render(body.clone()), body);
    }

    #[test]
    fn file_names_must_be_plain() {
        let dir = Utf8Path::new("/out");
        assert_eq!(output_path(dir, "api.json").unwrap(), "/out/api.json");

        for name in ["", "..", "../api.json", "nested/api.json", "a\\b.json"] {
            assert!(
                matches!(output_path(dir, name), Err(DocsError::FileName(_))),
                "{name:?} was accepted"
            );
        }
    }

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("api.json")).unwrap();

        let (first, changed) = write_if_changed(&path, b"{}").unwrap();
        assert!(changed);

        let (second, changed) = write_if_changed(&path, b"{}").unwrap();
        assert!(!changed);
        assert_eq!(first, second);

        let (third, changed) = write_if_changed(&path, b"[]").unwrap();
        assert!(changed);
        assert_ne!(first, third);
        assert_eq!(fs::read(&path).unwrap(), b"[]");
    }

    #[test]
    fn invalid_headers_are_rejected() {
        let headers = BTreeMap::from([("bad header".to_string(), "x".to_string())]);
        assert!(matches!(header_map(&headers), Err(DocsError::Header(_))));

        let headers = BTreeMap::from([("Authorization".to_string(), "Bearer t".to_string())]);
        assert_eq!(header_map(&headers).unwrap().len(), 1);
    }
}
