//! Patch application: named flat patches and structural edits.

mod branch;
mod flat;
mod relocate;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::image::{Blob, ExecutableImage};

pub use branch::BranchKind;
pub use flat::{FlatPatch, PatchRecord, PatchSource, PatchTable};
pub use relocate::{Relocation, RelocationTable, StructuralEdit, StructuralOutcome};

/// Applies patches from one revision's patch source.
pub struct PatchApplier<'a, S: PatchSource> {
    source: &'a S,
}

impl<'a, S: PatchSource> PatchApplier<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    fn lookup(&self, patch_id: &str) -> Result<&'a FlatPatch> {
        self.source
            .patch(patch_id)
            .ok_or_else(|| Error::PatchNotDefined(patch_id.to_string()))
    }

    /// Overlay the named patch onto `buffer`.
    pub fn apply_flat(&self, buffer: &mut Vec<u8>, patch_id: &str) -> Result<()> {
        let patch = self.lookup(patch_id)?;
        patch.apply(buffer)?;
        info!("Applied patch {} ({} records)", patch_id, patch.records.len());
        Ok(())
    }

    /// Like [`Self::apply_flat`], but an undefined patch is reported as `Ok(false)`.
    pub fn apply_flat_if_defined(&self, buffer: &mut Vec<u8>, patch_id: &str) -> Result<bool> {
        match self.apply_flat(buffer, patch_id) {
            Ok(()) => Ok(true),
            Err(e) if e.is_absent() => {
                info!("Patch {} not defined for this revision, skipping", patch_id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn apply_flat_to_image(
        &self,
        image: &mut ExecutableImage,
        blob: Blob,
        patch_id: &str,
    ) -> Result<()> {
        let patch = self.lookup(patch_id)?;
        patch.apply(image.blob_mut(blob)?)?;
        info!("Applied patch {} to {}", patch_id, blob);
        Ok(())
    }

    pub fn apply_structural(
        &self,
        buffer: &mut [u8],
        edit: &StructuralEdit,
    ) -> Result<StructuralOutcome> {
        edit.apply(buffer)
    }

    /// Apply a structural edit to the primary blob, tracking relocated offsets.
    ///
    /// An offset relocated by an earlier edit is refused with `AlreadyRelocated`
    /// before anything is written.
    pub fn apply_structural_to_image(
        &self,
        image: &mut ExecutableImage,
        edit: &StructuralEdit,
    ) -> Result<StructuralOutcome> {
        if let Some(relocation) = edit
            .relocations
            .iter()
            .find(|relocation| image.is_relocated(relocation.offset))
        {
            return Err(Error::AlreadyRelocated(relocation.offset));
        }

        let outcome = edit.apply(image.blob_mut(Blob::Primary)?)?;
        image.track_relocations(outcome.block.clone(), edit.shift, &outcome.relocated);
        debug!(
            "Image now tracks {} relocated offsets",
            image.relocated_offsets().count()
        );
        Ok(outcome)
    }
}
