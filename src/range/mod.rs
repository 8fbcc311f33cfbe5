// ============================================================================
// Key Ranges
// ============================================================================
//
// Bounds extended with infinities and infinitesimal shifts, closed ranges
// over index key tuples and normalized range sets. `RangeSetInfo` is the
// symbolic form produced by predicate extraction; it is evaluated against a
// parameter context right before an index scan.
//
// ============================================================================

pub mod entire;
#[allow(clippy::module_inception)]
pub mod range;
pub mod range_set;
pub mod range_set_info;

pub use entire::{Entire, PrefixOrd, Shift};
pub use range::Range;
pub use range_set::RangeSet;
pub use range_set_info::{ColumnConstraint, ConstraintOp, Operand, RangeSetInfo};
