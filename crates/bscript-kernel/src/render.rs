//! Rendering of workflow results that point at files.
//!
//! A workflow that returns a dataset prints its location as
//! `file:///data/<relative path>`. The notebook image mounts that same data
//! directory elsewhere, so the path is mapped onto the local data directory
//! and the file is shown instead of its name.

use std::path::{Component, Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bscript_core::DisplayData;
use serde_json::Value;
use thiserror::Error;

/// URL prefix of files inside the remote data directory.
pub const DATA_URL_PREFIX: &str = "file:///data";
/// URL prefix of any file.
pub const FILE_URL_PREFIX: &str = "file://";

/// Rendering error.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("File '{0}' does not live in data directory: cannot show.")]
    OutsideDataDir(String),
    #[error("File '{}' does not exist.", .0.display())]
    NotFound(PathBuf),
    #[error("Could not read '{}': cannot determine file type.", .0.display())]
    UnknownType(PathBuf),
    #[error("File '{}' is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Map a `file:///data/...` URL onto `data_dir`.
///
/// Returns `None` if `output` is not a file URL at all.
///
/// # Errors
/// Returns error if the URL points outside the data directory.
pub fn map_data_path(output: &str, data_dir: &Path) -> Result<Option<PathBuf>, RenderError> {
    let output = output.trim();
    if !output.starts_with(FILE_URL_PREFIX) {
        return Ok(None);
    }

    let outside = || RenderError::OutsideDataDir(output.to_string());
    let rest = output.strip_prefix(DATA_URL_PREFIX).ok_or_else(outside)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return Err(outside());
    }

    let relative = Path::new(rest.trim_start_matches('/'));
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(outside());
    }

    Ok(Some(data_dir.join(relative)))
}

/// Detect an image format from its leading bytes.
#[must_use]
pub fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes)
        .filter(|kind| matches!(kind.matcher_type(), infer::MatcherType::Image))
        .map(|kind| kind.mime_type())
}

/// Try to interpret a reply's stdout as a file in the data directory.
///
/// Returns `None` if the text is not a file URL; otherwise the file's
/// contents as a display payload: `.json` as parsed JSON, `.html` as HTML,
/// recognised images base64-encoded, anything else as plain text.
///
/// # Errors
/// Returns error if the file lies outside the data directory, does not
/// exist, or cannot be read.
pub async fn try_as_file(output: &str, data_dir: &Path) -> Result<Option<DisplayData>, RenderError> {
    let Some(path) = map_data_path(output, data_dir)? else {
        return Ok(None);
    };

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(RenderError::NotFound(path)),
    }

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| RenderError::UnknownType(path.clone()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    tracing::debug!(path = %path.display(), %extension, "Rendering file output");

    let display = match extension.as_str() {
        "json" => {
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|source| RenderError::Json { path, source })?;
            DisplayData::single("application/json", value)
        }
        "html" => {
            let html = String::from_utf8(bytes).map_err(|_| RenderError::UnknownType(path))?;
            DisplayData::single("text/html", Value::String(html))
        }
        _ => {
            if let Some(mime) = sniff_image(&bytes) {
                DisplayData::single(mime, Value::String(BASE64.encode(&bytes)))
            } else {
                let text = String::from_utf8(bytes).map_err(|_| RenderError::UnknownType(path))?;
                DisplayData::single("text/plain", Value::String(text))
            }
        }
    };

    Ok(Some(display))
}
