// ============================================================================
// Operation Log
// ============================================================================
//
// Every mutation of a session runs inside a registration scope. While a
// listener is subscribed, scopes record a tree of operations:
//
//   begin_registration ── register_operation ── notify_operation_starting
//          │                                          │
//          └─ nested scopes closing here are          └─ nested scopes closing
//             `preceding`                                here are `following`
//
// Outermost completed operations are reported to listeners and can be
// collected into an `OperationLog`, serialized as JSON and replayed against
// another session with key remapping, or undone.
//
// ============================================================================

pub mod context;
pub mod log;
pub mod operation;
pub mod registry;

pub use context::OperationExecutionContext;
pub use log::OperationLog;
pub use operation::{FieldValue, Operation, OperationKind, OperationType};
pub use registry::{ListenerId, OperationEvent, OperationEvents, OperationRegistry, ScopeHandle};
