use std::fmt;

/// Failure reported by a [`GlApi`](super::GlApi) backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlError {
    /// No live context is installed; the call was not issued.
    ContextLost,
    /// The driver refused to hand out a new object name.
    ObjectCreation(String),
    /// `map_write` could not obtain a pointer (entry point absent or driver
    /// returned null).
    MapFailed { offset: usize, length: usize },
    /// A reflected GL type enum has no slot layout.
    UnsupportedType(u32),
}

impl fmt::Display for GlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlError::ContextLost => write!(f, "no live GL context"),
            GlError::ObjectCreation(msg) => write!(f, "GL object creation failed: {msg}"),
            GlError::MapFailed { offset, length } => {
                write!(f, "failed to map buffer range {offset}..{}", offset + length)
            }
            GlError::UnsupportedType(ty) => write!(f, "unsupported GL type 0x{ty:04X}"),
        }
    }
}

impl std::error::Error for GlError {}
