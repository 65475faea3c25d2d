//! Translation between editor operations and document changes.
//!
//! - [`apply_editor_ops`]: editor batch → one document change
//! - [`diff_to_editor_ops`]: document diff → editor batch
//! - [`resync_from_document`]: rebuild the editor value from scratch

mod resync;
mod to_crdt;
mod to_editor;

pub use resync::resync_from_document;
pub use to_crdt::apply_editor_ops;
pub use to_editor::diff_to_editor_ops;
