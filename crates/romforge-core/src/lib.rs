//! # romforge-core
//!
//! Binary container and patch engine for handheld-console ROM images.
//!
//! This crate provides:
//! - Packed sub-file containers (Nitro archives and flat offset tables)
//!   with byte-identical round trips
//! - Unique byte-signature lookup inside code blobs
//! - Flat (IPS) patches and "extend and relocate" structural edits with
//!   branch fix-ups
//! - CRC-32 revision gating against per-revision expectation tables
//!
//! Every operation works on in-memory buffers owned by the caller. File
//! access is limited to the profile and patch-table loaders.

mod byteio;
pub mod checksum;
pub mod container;
pub mod error;
pub mod image;
pub mod patch;
pub mod prelude;
pub mod revision;
pub mod signature;

pub use checksum::{Checksum, crc32};
pub use container::{Container, ContainerLayout};
pub use error::{Error, Result};
pub use image::{Blob, ExecutableImage, ImageParts, OverlayEntry};
pub use patch::{
    BranchKind, FlatPatch, PatchApplier, PatchRecord, PatchSource, PatchTable, Relocation,
    RelocationTable, StructuralEdit, StructuralOutcome,
};
pub use revision::{
    ChecksumRecord, ChecksumSnapshot, ComponentId, Mismatch, ProfileSet, RevisionGate,
    RevisionProfile, ValidationReport, load_profiles, save_profiles,
};
pub use signature::{Signature, find_free_space};
