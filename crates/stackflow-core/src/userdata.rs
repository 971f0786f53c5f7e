//! Server user data composition
//!
//! Combines the blueprint's user data with the agent init script supplied
//! by the host. Linux servers get a multipart MIME document; Windows servers
//! get a single `#ps1_sysnative` script built from the PowerShell segments
//! of both inputs.

use crate::error::{OperationError, Result};
use base64::Engine;
use serde_json::Value;

pub const MIME_BOUNDARY: &str = "===============stackflow-user-data==";
const PS_HEADER: &str = "#ps1_sysnative";
const PS_OPEN: &str = "<powershell>";
const PS_CLOSE: &str = "</powershell>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    Windows,
}

impl OsFamily {
    pub fn from_property(value: Option<&str>) -> Self {
        match value {
            Some(os) if os.eq_ignore_ascii_case("windows") => OsFamily::Windows,
            _ => OsFamily::Linux,
        }
    }
}

/// Text of an inline user data value
///
/// A string is used as is; `{type: http, url}` is downloaded.
pub async fn load(value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Object(map) => {
            let source = map.get("type").and_then(Value::as_str).unwrap_or("http");
            let url = map.get("url").and_then(Value::as_str);
            match (source, url) {
                ("http", Some(url)) => fetch(url).await.map(Some),
                _ => Err(OperationError::non_recoverable(format!(
                    "unsupported user data source: {}",
                    value
                ))),
            }
        }
        other => Err(OperationError::non_recoverable(format!(
            "user data must be a string or an http source, got {}",
            other
        ))),
    }
}

async fn fetch(url: &str) -> Result<String> {
    tracing::debug!(url, "downloading user data");
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| {
            OperationError::non_recoverable(format!("failed to download user data from {}", url))
                .caused_by(e)
        })?;
    response.text().await.map_err(|e| {
        OperationError::non_recoverable(format!("failed to read user data from {}", url))
            .caused_by(e)
    })
}

/// Combine user data and agent init script
pub fn compose(user_data: Option<&str>, init_script: Option<&str>, os: OsFamily) -> Option<String> {
    let parts: Vec<&str> = [user_data, init_script]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect();

    if parts.is_empty() {
        return None;
    }
    match os {
        OsFamily::Windows => Some(powershell(&parts)),
        OsFamily::Linux if parts.len() == 1 => Some(parts[0].to_string()),
        OsFamily::Linux => Some(multipart(&parts)),
    }
}

pub fn encode(text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(text.as_bytes())
}

/// MIME content type for a cloud-init part, from its first line
fn part_type(content: &str) -> &'static str {
    let first = content.lines().next().unwrap_or_default().trim();
    if first.starts_with("#!") {
        "text/x-shellscript"
    } else if first.starts_with("#cloud-config") {
        "text/cloud-config"
    } else if first.starts_with("#include") {
        "text/x-include-url"
    } else if first.starts_with("#cloud-boothook") {
        "text/cloud-boothook"
    } else {
        "text/plain"
    }
}

fn multipart(parts: &[&str]) -> String {
    let mut out = format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"\nMIME-Version: 1.0\n",
        MIME_BOUNDARY
    );
    for part in parts {
        out.push_str(&format!(
            "\n--{}\nContent-Type: {}; charset=\"us-ascii\"\nMIME-Version: 1.0\nContent-Transfer-Encoding: 7bit\n\n{}\n",
            MIME_BOUNDARY,
            part_type(part),
            part.trim_end_matches('\n')
        ));
    }
    out.push_str(&format!("\n--{}--\n", MIME_BOUNDARY));
    out
}

/// Bodies of a document produced by [`compose`] for Linux, in order
pub fn split_multipart(document: &str) -> Vec<String> {
    let delimiter = format!("--{}", MIME_BOUNDARY);
    document
        .split(delimiter.as_str())
        .skip(1)
        .filter(|chunk| !chunk.starts_with("--"))
        .filter_map(|chunk| {
            chunk
                .split_once("\n\n")
                .map(|(_, body)| body.strip_suffix('\n').unwrap_or(body).to_string())
        })
        .map(|body| body.strip_suffix('\n').map(str::to_string).unwrap_or(body))
        .collect()
}

/// PowerShell segments of a script
///
/// Text between `<powershell>` markers when present, otherwise the whole
/// script minus a leading `#ps1_sysnative` line.
pub fn powershell_segments(script: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut rest = script;
    while let Some(start) = rest.find(PS_OPEN) {
        let after = &rest[start + PS_OPEN.len()..];
        let Some(end) = after.find(PS_CLOSE) else {
            break;
        };
        let segment = after[..end].trim();
        if !segment.is_empty() {
            segments.push(segment.to_string());
        }
        rest = &after[end + PS_CLOSE.len()..];
    }

    if segments.is_empty() && !script.contains(PS_OPEN) {
        let body = script
            .trim_start()
            .strip_prefix(PS_HEADER)
            .unwrap_or(script)
            .trim();
        if !body.is_empty() {
            segments.push(body.to_string());
        }
    }
    segments
}

fn powershell(parts: &[&str]) -> String {
    let mut seen: Vec<String> = Vec::new();
    for part in parts {
        for segment in powershell_segments(part) {
            if !seen.contains(&segment) {
                seen.push(segment);
            }
        }
    }
    format!("{}\n{}", PS_HEADER, seen.join("\n"))
}
