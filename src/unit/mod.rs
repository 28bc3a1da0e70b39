//! Work units and harvest targets
//!
//! This module handles:
//! - Namespaced unit identities (book pages, narrator profiles)
//! - Deriving the target address for a unit
//! - Expanding a configured target into the requested unit set
//! - Discovering narrator identities from an existing book log

mod discovery;
mod key;
mod target;

pub use discovery::narrator_ids_from_book_log;
pub use key::UnitKey;
pub use target::{HarvestTarget, WorkUnit};
