use thiserror::Error;

pub type Result<T> = std::result::Result<T, PropMatchError>;

/// Stable error taxonomy surfaced to the orchestrator and, eventually, the
/// transport layer. Variant names double as the `kind` string callers see.
#[derive(Debug, Error)]
pub enum PropMatchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("access denied")]
    AccessDenied,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    pub const INVALID_INPUT: i32 = 3;
    pub const RATE_LIMITED: i32 = 4;
    pub const ACCESS_DENIED: i32 = 5;
}

impl PropMatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            PropMatchError::InvalidInput(_) => "invalid_input",
            PropMatchError::NotFound(_) => "not_found",
            PropMatchError::RateLimited { .. } => "rate_limited",
            PropMatchError::AccessDenied => "access_denied",
            PropMatchError::UpstreamUnavailable(_)
            | PropMatchError::Http(_)
            | PropMatchError::Yaml(_)
            | PropMatchError::Regex(_) => "upstream_unavailable",
            PropMatchError::Serialization(_) | PropMatchError::Other(_) | PropMatchError::Internal(_) => {
                "internal"
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            PropMatchError::NotFound(_) => exit_codes::NOT_FOUND,
            PropMatchError::InvalidInput(_) => exit_codes::INVALID_INPUT,
            PropMatchError::RateLimited { .. } => exit_codes::RATE_LIMITED,
            PropMatchError::AccessDenied => exit_codes::ACCESS_DENIED,
            _ => exit_codes::GENERAL_ERROR,
        }
    }
}
