use std::path::PathBuf;

/// Errors surfaced to the caller. Bad filter values, undefined requested
/// metrics and arithmetic edges are recovered inside the pipeline and never
/// show up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("fact table: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid quarter `{0}`")]
    InvalidQuarter(String),

    #[error("unknown reporting form `{0}`")]
    UnknownForm(String),

    #[error("line taxonomy has a cycle through `{0}`")]
    TaxonomyCycle(String),

    #[error("metric `{metric}` references undefined input `{input}`")]
    UnknownInput { metric: String, input: String },

    #[error("metric dictionary has a dependency cycle through `{0}`")]
    MetricCycle(String),

    #[error("invalid synthetic market: {0}")]
    InvalidMarket(String),
}

pub type Result<T> = std::result::Result<T, Error>;
