//! Prelude module for convenient imports
//!
//! ```ignore
//! use romforge_core::prelude::*;
//! ```

// Buffers and images
pub use crate::container::{Container, ContainerLayout};
pub use crate::image::{Blob, ExecutableImage};

// Error handling
pub use crate::error::{Error, Result};

// Locating and patching
pub use crate::patch::{PatchApplier, PatchSource, PatchTable, StructuralEdit};
pub use crate::signature::Signature;

// Revision checks
pub use crate::checksum::Checksum;
pub use crate::revision::{ComponentId, RevisionGate, RevisionProfile};
