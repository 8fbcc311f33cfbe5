// ============================================================================
// Reference Tracking
// ============================================================================
//
// Reverse index of non-paired references. Associations without a reverse
// field cannot be navigated backwards, so the session records which
// entities point at which while fields, structures and entity sets change.
//
// ============================================================================

pub mod registry;

pub use registry::{ReferenceInfo, ReferenceRegistry};
