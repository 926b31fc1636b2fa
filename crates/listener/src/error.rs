use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener io error: {0}")]
    Io(#[from] std::io::Error),
}
