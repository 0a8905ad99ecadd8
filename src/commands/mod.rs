pub mod choices;
pub mod menu;
pub mod reports;

use crate::error::{CanteenError, Result};
use crate::models::Role;

/// Identity is decided elsewhere; this only checks the view the caller is in.
pub fn require_role(actual: Role, needed: Role) -> Result<()> {
    if actual == needed {
        Ok(())
    } else {
        Err(CanteenError::Forbidden(needed.as_str()))
    }
}
