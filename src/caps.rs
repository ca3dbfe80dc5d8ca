//! Capability dropping for the jailed child, in the same blunt
//! clear-everything style the teacher uses for its own isolation process.

use caps::CapSet;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("capability operation failed: {0}")]
pub struct CapsError(#[from] caps::errors::CapsError);

/// Drops every capability from every set. Called after privileges are no
/// longer needed for any remaining containment step.
pub fn clear_all() -> Result<(), CapsError> {
    caps::clear(None, CapSet::Effective)?;
    caps::clear(None, CapSet::Permitted)?;
    caps::clear(None, CapSet::Inheritable)?;
    caps::clear(None, CapSet::Ambient)?;
    Ok(())
}
