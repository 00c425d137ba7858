use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Sub-file index {index} out of range (container holds {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Signature not found")]
    NotFound,

    #[error("Signature is ambiguous: {count} matches")]
    Ambiguous { count: usize },

    #[error("Invalid signature pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("Patch '{0}' is not defined for this revision")]
    PatchNotDefined(String),

    #[error("Malformed patch: {0}")]
    MalformedPatch(String),

    #[error("Patch record at {origin:#x} (+{len}) exceeds buffer of {buffer_len} bytes")]
    PatchOutOfBounds {
        origin: usize,
        len: usize,
        buffer_len: usize,
    },

    #[error("Insufficient space: need {required} bytes of slack, only {available} available")]
    InsufficientSpace { required: usize, available: usize },

    #[error("No {kind} instruction at {offset:#x}")]
    NotABranch { offset: usize, kind: &'static str },

    #[error("Relocated {kind} at {offset:#x} cannot encode displacement {displacement}")]
    BranchOutOfRange {
        offset: usize,
        kind: &'static str,
        displacement: i64,
    },

    #[error("Adjustment {adjustment} at {offset:#x} is not a multiple of {granularity}")]
    MisalignedRelocation {
        offset: usize,
        adjustment: i64,
        granularity: i64,
    },

    #[error("Offset {0:#x} has already been relocated")]
    AlreadyRelocated(usize),

    #[error("Overlay {0} is not loaded")]
    UnknownOverlay(u32),

    #[error("Malformed overlay table: {0}")]
    MalformedOverlayTable(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Invalid component id: {0}")]
    InvalidComponent(String),

    #[error("Unknown offset name: {0}")]
    UnknownOffset(String),

    #[error("No profile for code {code} version {version}")]
    ProfileNotFound { code: String, version: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Outcomes that mean "this optional thing is not here" rather than damage.
    pub fn is_absent(&self) -> bool {
        matches!(self, Error::NotFound | Error::PatchNotDefined(_))
    }

    /// Outcomes that must abort a write-back instead of persisting a partial image.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::MalformedContainer(_)
                | Error::Ambiguous { .. }
                | Error::InsufficientSpace { .. }
                | Error::MalformedPatch(_)
                | Error::PatchOutOfBounds { .. }
                | Error::NotABranch { .. }
                | Error::BranchOutOfRange { .. }
                | Error::MisalignedRelocation { .. }
                | Error::AlreadyRelocated(_)
                | Error::MalformedOverlayTable(_)
                | Error::Decompression(_)
        )
    }

    /// Check if this error is a "file not found" error
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}
