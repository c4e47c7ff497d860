use thiserror::Error;

/// Target could not be turned into an address or range. Fatal for the run.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("invalid target: {0} (expected an IP, URL, hostname or CIDR range)")]
    Invalid(String),

    #[error("could not resolve hostname {0}")]
    Unresolvable(String),
}

/// One engine invocation failed. Recorded on that host's result.
#[derive(Debug, Error)]
pub enum ScanEngineError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine exited with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("could not parse engine output: {0}")]
    Parse(String),
}

/// One URL's probe failed. Recorded on that URL's result.
#[derive(Debug, Error)]
pub enum WebProbeError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

/// The final report could not be written.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}
