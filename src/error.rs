use thiserror::Error;

/// Errors that abort the current ingest run outright (§7 "Fatal setup" / "Fatal data").
///
/// Anything that is merely a tolerated anomaly (free of an unknown address, a stray
/// launch-buf, a mismatched finish) is logged in place via `tracing` and never
/// constructs one of these — see the reactors in `devmem`, `recipe`, `python_cmd`.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("output directory {0} already exists (use --overwrite)")]
    OutputExists(std::path::PathBuf),

    #[error("failed to open input log {path}: {source}")]
    OpenInput {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unrecognized event kind in dispatcher: {0}")]
    UnknownEventKind(String),

    #[error("unsupported python command: {0}")]
    UnsupportedPythonCommand(String),

    #[error("address interval map corruption: addr {addr:#x} resolved to {count} overlapping intervals")]
    IntervalMapCorruption { addr: u64, count: usize },

    #[error("malformed payload for {kind}: {body:?}")]
    MalformedPayload { kind: String, body: String },
}

pub type Result<T> = std::result::Result<T, IngestError>;
