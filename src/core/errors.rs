use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pipeline stage a [`CrawlError::Stage`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Download,
    Analyze,
    Process,
    Schedule,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Download => "downloader",
            Stage::Analyze => "analyzer",
            Stage::Process => "pipeline",
            Stage::Schedule => "scheduler",
        };
        f.write_str(name)
    }
}

/// Error kinds, each with a stable numeric code that survives the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    StatusConflict,
    NotFound,
    Transport,
    Download,
    Analyze,
    Process,
    Schedule,
    Capacity,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            ErrorKind::Argument => 10001,
            ErrorKind::Download => 20001,
            ErrorKind::Analyze => 20002,
            ErrorKind::Process => 20003,
            ErrorKind::Schedule => 20004,
            ErrorKind::NotFound => 30001,
            ErrorKind::StatusConflict => 40004,
            ErrorKind::Transport => 60005,
            ErrorKind::Capacity => 70003,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            10001 => ErrorKind::Argument,
            20001 => ErrorKind::Download,
            20002 => ErrorKind::Analyze,
            20003 => ErrorKind::Process,
            20004 => ErrorKind::Schedule,
            30001 => ErrorKind::NotFound,
            40004 => ErrorKind::StatusConflict,
            60005 => ErrorKind::Transport,
            70003 => ErrorKind::Capacity,
            _ => return None,
        };
        Some(kind)
    }

    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::Argument => "Argument Error",
            ErrorKind::StatusConflict => "Status Conflict",
            ErrorKind::NotFound => "Not Found",
            ErrorKind::Transport => "Transport Error",
            ErrorKind::Download => "Downloader Error",
            ErrorKind::Analyze => "Analyzer Error",
            ErrorKind::Process => "Pipeline Error",
            ErrorKind::Schedule => "Scheduler Error",
            ErrorKind::Capacity => "Capacity Error",
        }
    }
}

/// Structured error as carried by RPC replies: code, message and detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: u32,
    pub message: String,
    pub detail: String,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.message, self.detail)
    }
}

#[derive(Error, Debug, Clone)]
pub enum CrawlError {
    #[error("Argument error: {0}")]
    Argument(String),

    #[error("Status conflict: {0}")]
    StatusConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{stage} error: {message} ({context})")]
    Stage {
        stage: Stage,
        message: String,
        context: String,
    },

    #[error("Capacity error: {0}")]
    Capacity(String),

    #[error("Remote error: {0}")]
    Remote(RpcError),
}

impl CrawlError {
    pub fn stage(stage: Stage, message: impl Into<String>, context: impl Into<String>) -> Self {
        CrawlError::Stage {
            stage,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CrawlError::Argument(_) => ErrorKind::Argument,
            CrawlError::StatusConflict(_) => ErrorKind::StatusConflict,
            CrawlError::NotFound(_) => ErrorKind::NotFound,
            CrawlError::Transport(_) => ErrorKind::Transport,
            CrawlError::Stage { stage, .. } => match stage {
                Stage::Download => ErrorKind::Download,
                Stage::Analyze => ErrorKind::Analyze,
                Stage::Process => ErrorKind::Process,
                Stage::Schedule => ErrorKind::Schedule,
            },
            CrawlError::Capacity(_) => ErrorKind::Capacity,
            CrawlError::Remote(remote) => {
                ErrorKind::from_code(remote.code).unwrap_or(ErrorKind::Transport)
            }
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            CrawlError::Remote(remote) => remote.code,
            other => other.kind().code(),
        }
    }

    pub fn to_rpc(&self) -> RpcError {
        if let CrawlError::Remote(remote) = self {
            return remote.clone();
        }
        let kind = self.kind();
        let detail = match self {
            CrawlError::Argument(d)
            | CrawlError::StatusConflict(d)
            | CrawlError::NotFound(d)
            | CrawlError::Transport(d)
            | CrawlError::Capacity(d) => d.clone(),
            CrawlError::Stage {
                message, context, ..
            } => format!("{} ({})", message, context),
            CrawlError::Remote(remote) => remote.detail.clone(),
        };
        RpcError {
            code: kind.code(),
            message: kind.message().to_string(),
            detail,
        }
    }
}

impl From<RpcError> for CrawlError {
    fn from(err: RpcError) -> Self {
        let detail = err.detail.clone();
        match ErrorKind::from_code(err.code) {
            Some(ErrorKind::Argument) => CrawlError::Argument(detail),
            Some(ErrorKind::StatusConflict) => CrawlError::StatusConflict(detail),
            Some(ErrorKind::NotFound) => CrawlError::NotFound(detail),
            Some(ErrorKind::Capacity) => CrawlError::Capacity(detail),
            _ => CrawlError::Remote(err),
        }
    }
}

impl From<reqwest::Error> for CrawlError {
    fn from(err: reqwest::Error) -> Self {
        let context = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown url".to_string());
        CrawlError::stage(Stage::Download, err.to_string(), context)
    }
}

impl From<url::ParseError> for CrawlError {
    fn from(err: url::ParseError) -> Self {
        CrawlError::Argument(format!("invalid url: {}", err))
    }
}

impl From<regex::Error> for CrawlError {
    fn from(err: regex::Error) -> Self {
        CrawlError::Argument(format!("invalid pattern: {}", err))
    }
}

impl From<serde_json::Error> for CrawlError {
    fn from(err: serde_json::Error) -> Self {
        CrawlError::Transport(format!("serialization failed: {}", err))
    }
}

impl From<std::io::Error> for CrawlError {
    fn from(err: std::io::Error) -> Self {
        CrawlError::Transport(err.to_string())
    }
}

pub type CrawlResult<T> = Result<T, CrawlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_rpc_error() {
        let errors = vec![
            CrawlError::Argument("bad mid".into()),
            CrawlError::StatusConflict("not started".into()),
            CrawlError::NotFound("spider".into()),
            CrawlError::Capacity("closed".into()),
        ];
        for err in errors {
            let wire = err.to_rpc();
            assert_eq!(wire.code, err.code());
            let back = CrawlError::from(wire);
            assert_eq!(back.kind(), err.kind());
        }
    }

    #[test]
    fn test_stage_errors_keep_their_code_remotely() {
        let err = CrawlError::stage(Stage::Download, "timeout", "http://example.com");
        let back = CrawlError::from(err.to_rpc());
        assert!(matches!(back, CrawlError::Remote(_)));
        assert_eq!(back.kind(), ErrorKind::Download);
        assert_eq!(back.code(), 20001);
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(ErrorKind::from_code(99999), None);
    }
}
