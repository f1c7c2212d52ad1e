use thiserror::Error;

#[derive(Error, Debug)]
pub enum LanternError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Engine channel closed")]
    ChannelClosed,
}
