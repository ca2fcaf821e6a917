//! Error types for askfiles-core

use thiserror::Error;

/// Main error type for the askfiles-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The upstream generative API answered with a failure.
    ///
    /// The rendered message carries the HTTP status line (e.g.
    /// `503 Service Unavailable`) so retry classification can inspect it.
    #[error("upstream error: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// Every model in the roster was overloaded
    #[error("all models are overloaded or unavailable, please try again in a few moments (last error: {last})")]
    AllModelsUnavailable { last: String },

    /// Caller supplied an invalid request
    #[error("{0}")]
    InvalidInput(String),

    /// An explicitly requested file is deactivated
    #[error("file {0} is deactivated, reactivate it to use it")]
    FileInactive(String),

    /// An explicitly requested file does not exist upstream
    #[error("file {0} not found")]
    FileNotFound(String),

    /// Nothing has been uploaded yet
    #[error("no files found, upload files first")]
    NoFiles,

    /// Files exist but all of them are deactivated
    #[error("no active files found, reactivate files or upload new ones")]
    NoActiveFiles,

    /// Upload rejected by the media-type allowlist
    #[error("unsupported file type {0}; allowed: PDF, TXT, MD, DOC/DOCX, XLS/XLSX, PPT/PPTX, JPEG, PNG, GIF, WEBP")]
    UnsupportedMediaType(String),

    /// No API key has been configured
    #[error("API key not configured, set one in the settings")]
    NotConfigured,
}

impl Error {
    /// Build an upstream error from an HTTP status and response body.
    pub fn upstream(status: reqwest::StatusCode, body: &str) -> Self {
        Error::Upstream {
            status: Some(status.as_u16()),
            message: format!("{}: {}", status, truncate_body(body)),
        }
    }

    /// True when upstream reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Upstream { status: Some(404), .. })
    }

    /// True for failures caused by the caller's request rather than upstream.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::FileInactive(_)
                | Error::FileNotFound(_)
                | Error::NoFiles
                | Error::NoActiveFiles
                | Error::UnsupportedMediaType(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Upstream {
            status: err.status().map(|s| s.as_u16()),
            message: format!("HTTP request failed: {}", err),
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.trim().to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", body[..end].trim())
}

/// Result type alias for askfiles-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_message_carries_status_line() {
        let err = Error::upstream(
            reqwest::StatusCode::SERVICE_UNAVAILABLE,
            r#"{"error":{"message":"The model is overloaded."}}"#,
        );
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("Service Unavailable"));
        assert!(msg.contains("overloaded"));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "é".repeat(400);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 503);
    }

    #[test]
    fn test_caller_errors() {
        assert!(Error::NoFiles.is_caller_error());
        assert!(Error::FileInactive("abc".into()).is_caller_error());
        assert!(Error::FileNotFound("abc".into()).is_caller_error());
        assert!(!Error::NotConfigured.is_caller_error());
        assert!(Error::Upstream {
            status: Some(404),
            message: "404 Not Found".into()
        }
        .is_not_found());
        assert!(!Error::AllModelsUnavailable { last: "x".into() }.is_caller_error());
    }
}
