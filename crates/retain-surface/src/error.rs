use thiserror::Error;

use crate::stateful::LoadState;

/// Why a loader could not produce pixels.
///
/// Captured into the `Failure` state of a [`crate::StatefulSurface`]; never
/// raised out of the background task.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("requesting {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid file URL {url}")]
    InvalidUrl { url: String },
    #[error("{url} points outside the file root")]
    OutsideRoot { url: String },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("{0}")]
    Other(String),
}

/// Misuse of the load state machine. Returned, never panicked.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum LoadStateError {
    #[error("cannot load while the surface is {state}; reset it first")]
    AlreadyLoading { state: LoadState },
    #[error("cannot reset the surface while it is loading")]
    StillLoading,
    #[error("surface was disposed")]
    Disposed,
}
