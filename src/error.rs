use thiserror::Error;

/// Errors surfaced by the control surface and by startup configuration.
///
/// The hot data path never returns this type: per the propagation policy,
/// accounting operations silently no-op on missing state instead of failing.
#[derive(Debug, Error)]
pub enum ShaperError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("chooser failed: {0}")]
    ChooserFailed(String),
}

pub type Result<T> = std::result::Result<T, ShaperError>;
