//! Error levels of the pipeline.
//!
//! A [`LineError`] only costs the line its text, a [`PageError`] costs the
//! page, and a [`RunError`] ends the volume run without producing an archive.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LineError {
    #[error("invalid line geometry: {reason}")]
    InvalidGeometry { reason: String },
    #[error("line mask is {mask_width}x{mask_height}, crop is {crop_width}x{crop_height}")]
    MaskMismatch {
        crop_width: u32,
        crop_height: u32,
        mask_width: u32,
        mask_height: u32,
    },
}

impl LineError {
    pub(crate) fn geometry(reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("invalid image: {reason}")]
    InvalidImage { reason: String },
    #[error("failed to read page")]
    Read {
        #[source]
        source: std::io::Error,
    },
    #[error("text detector failed: {0:#}")]
    DetectorFailure(anyhow::Error),
    #[error("text recognizer failed: {0:#}")]
    RecognizerFailure(anyhow::Error),
}

impl PageError {
    pub(crate) fn invalid_image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("page {page} failed")]
    Page {
        page: String,
        #[source]
        source: PageError,
    },
    #[error("failed to write archive")]
    ArchiveWrite {
        #[source]
        source: ArchiveWriteError,
    },
    #[error("failed to read volume source: {0:#}")]
    Source(anyhow::Error),
}

/// I/O level failure while producing the container.
#[derive(Debug, Error)]
pub enum ArchiveWriteError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to encode {entry}")]
    Encode {
        entry: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to move archive into place")]
    Persist(#[from] tempfile::PersistError),
}

impl From<ArchiveWriteError> for RunError {
    fn from(source: ArchiveWriteError) -> Self {
        Self::ArchiveWrite { source }
    }
}
