#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("failed to parse playlist: {reason}")]
    Parse { reason: String },

    #[error("failed to serialize playlist: {source}")]
    Serialize {
        #[from]
        source: std::io::Error,
    },

    #[error("rewritten playlist is not valid UTF-8")]
    NonUtf8Output,

    #[error("invalid percent-encoding in `{input}`")]
    InvalidEncoding { input: String },
}
