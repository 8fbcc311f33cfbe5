use super::{Operation, OperationType};
use crate::core::{OrmError, Result};
use bitflags::bitflags;
use tracing::{debug, trace};

bitflags! {
    /// Events a listener is interested in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OperationEvents: u32 {
        const STARTING = 1;
        const OUTERMOST_COMPLETED = 1 << 1;
        const NESTED_COMPLETED = 1 << 2;
        const ALL = Self::STARTING.bits()
            | Self::OUTERMOST_COMPLETED.bits()
            | Self::NESTED_COMPLETED.bits();
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OperationEvent<'a> {
    Starting(&'a Operation),
    OutermostCompleted(&'a Operation),
    NestedCompleted(&'a Operation),
}

impl OperationEvent<'_> {
    pub fn kind(&self) -> OperationEvents {
        match self {
            OperationEvent::Starting(_) => OperationEvents::STARTING,
            OperationEvent::OutermostCompleted(_) => OperationEvents::OUTERMOST_COMPLETED,
            OperationEvent::NestedCompleted(_) => OperationEvents::NESTED_COMPLETED,
        }
    }

    pub fn operation(&self) -> &Operation {
        match self {
            OperationEvent::Starting(op)
            | OperationEvent::OutermostCompleted(op)
            | OperationEvent::NestedCompleted(op) => op,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Token of an open registration scope. Scopes close in LIFO order.
#[must_use = "a registration scope must be closed"]
#[derive(Debug, PartialEq, Eq)]
pub struct ScopeHandle {
    id: u64,
}

#[derive(Debug)]
struct RegistrationScope {
    id: u64,
    kind: OperationType,
    operation: Option<Operation>,
    started: bool,
    preceding: Vec<Operation>,
    following: Vec<Operation>,
    undo: Vec<Operation>,
}

#[derive(Debug)]
enum Scope {
    /// Registration is suppressed until the scope closes
    Blocking { id: u64 },
    Registering(RegistrationScope),
}

impl Scope {
    fn id(&self) -> u64 {
        match self {
            Scope::Blocking { id } => *id,
            Scope::Registering(scope) => scope.id,
        }
    }
}

type Listener = Box<dyn FnMut(&OperationEvent<'_>)>;

/// Records the operations of a session as a tree and reports them to
/// listeners.
///
/// Registration is active only while someone listens. A scope opened while
/// registration is off, or while a blocking scope is open, blocks every
/// scope nested in it.
pub struct OperationRegistry {
    scopes: Vec<Scope>,
    next_scope_id: u64,
    listeners: Vec<(ListenerId, OperationEvents, Listener)>,
    next_listener_id: u64,
    system_registration: bool,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            next_scope_id: 0,
            listeners: Vec::new(),
            next_listener_id: 0,
            system_registration: false,
        }
    }

    pub fn subscribe(
        &mut self,
        interest: OperationEvents,
        listener: impl FnMut(&OperationEvent<'_>) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, interest, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _, _)| *listener != id);
        self.listeners.len() != before
    }

    /// Whether some listener waits for outermost operations.
    pub fn is_registration_enabled(&self) -> bool {
        self.listeners
            .iter()
            .any(|(_, interest, _)| interest.contains(OperationEvents::OUTERMOST_COMPLETED))
    }

    /// Whether system operations open registering scopes. Returns the
    /// previous setting.
    pub fn set_system_registration(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.system_registration, enabled)
    }

    pub fn is_system_registration_enabled(&self) -> bool {
        self.system_registration
    }

    /// Whether the innermost scope records operations.
    pub fn is_registering(&self) -> bool {
        matches!(self.scopes.last(), Some(Scope::Registering(_)))
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn begin_registration(&mut self, kind: OperationType) -> ScopeHandle {
        let id = self.next_scope_id;
        self.next_scope_id += 1;
        let blocked = matches!(self.scopes.last(), Some(Scope::Blocking { .. }))
            || !self.is_registration_enabled()
            || (kind.contains(OperationType::SYSTEM) && !self.system_registration);
        let scope = if blocked {
            Scope::Blocking { id }
        } else {
            Scope::Registering(RegistrationScope {
                id,
                kind,
                operation: None,
                started: false,
                preceding: Vec::new(),
                following: Vec::new(),
                undo: Vec::new(),
            })
        };
        trace!(id, blocked, depth = self.scopes.len(), "registration scope opened");
        self.scopes.push(scope);
        ScopeHandle { id }
    }

    /// Attaches `operation` to the innermost scope. Ignored in blocking
    /// scopes.
    pub fn register_operation(&mut self, operation: Operation) -> Result<()> {
        match self.scopes.last_mut() {
            None => Err(OrmError::OperationRegistration(format!(
                "No registration scope is open for '{}'",
                operation
            ))),
            Some(Scope::Blocking { .. }) => Ok(()),
            Some(Scope::Registering(scope)) => {
                if let Some(existing) = &scope.operation {
                    return Err(OrmError::OperationRegistration(format!(
                        "Scope already holds '{}', cannot register '{}'",
                        existing, operation
                    )));
                }
                scope.operation = Some(operation);
                Ok(())
            }
        }
    }

    pub fn register_undo_operation(&mut self, operation: Operation) -> Result<()> {
        match self.scopes.last_mut() {
            None => Err(OrmError::OperationRegistration(format!(
                "No registration scope is open for undo operation '{}'",
                operation
            ))),
            Some(Scope::Blocking { .. }) => Ok(()),
            Some(Scope::Registering(scope)) => {
                scope.undo.push(operation);
                Ok(())
            }
        }
    }

    /// Marks the operation of the innermost scope as started. Nested
    /// operations completing afterwards become its `following` operations.
    pub fn notify_operation_starting(&mut self, throw_if_not_registered: bool) -> Result<()> {
        let scope = match self.scopes.last_mut() {
            Some(Scope::Registering(scope)) => scope,
            _ => return Ok(()),
        };
        let Some(operation) = &scope.operation else {
            if throw_if_not_registered {
                return Err(OrmError::OperationRegistration(
                    "Operation is starting but was never registered".into(),
                ));
            }
            return Ok(());
        };
        if scope.started {
            return Err(OrmError::OperationRegistration(format!(
                "Operation '{}' is already started",
                operation
            )));
        }
        scope.started = true;
        let event = OperationEvent::Starting(operation);
        Self::fire(&mut self.listeners, &event);
        Ok(())
    }

    /// Closes the innermost scope. A completed scope hands its operation to
    /// the enclosing scope or, when outermost, to the listeners.
    pub fn close(&mut self, handle: ScopeHandle, completed: bool) -> Result<()> {
        match self.scopes.last() {
            Some(scope) if scope.id() == handle.id => {}
            Some(scope) => {
                return Err(OrmError::ScopeNesting(format!(
                    "Scope {} closed while scope {} is innermost",
                    handle.id,
                    scope.id()
                )));
            }
            None => {
                return Err(OrmError::ScopeNesting(format!("Scope {} closed twice", handle.id)));
            }
        }
        let Some(Scope::Registering(scope)) = self.scopes.pop() else {
            return Ok(());
        };
        if !completed {
            trace!(id = scope.id, "registration scope discarded");
            return Ok(());
        }
        let Some(mut operation) = scope.operation else {
            return Ok(());
        };
        if !scope.started {
            return Err(OrmError::OperationRegistration(format!(
                "Operation '{}' completed without being started",
                operation
            )));
        }
        operation.preceding = scope.preceding;
        operation.following = scope.following;
        operation.undo = scope.undo;

        match self.scopes.last_mut() {
            Some(Scope::Registering(parent)) => {
                Self::fire(&mut self.listeners, &OperationEvent::NestedCompleted(&operation));
                if parent.started {
                    parent.following.push(operation);
                } else {
                    parent.preceding.push(operation);
                }
            }
            _ => {
                debug!(operation = %operation, kind = ?scope.kind, "operation completed");
                Self::fire(&mut self.listeners, &OperationEvent::OutermostCompleted(&operation));
            }
        }
        Ok(())
    }

    fn fire(listeners: &mut [(ListenerId, OperationEvents, Listener)], event: &OperationEvent<'_>) {
        let kind = event.kind();
        for (_, interest, listener) in listeners.iter_mut() {
            if interest.contains(kind) {
                listener(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::OperationKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn call(name: &str) -> Operation {
        Operation::new(OperationKind::MethodCall {
            name: name.into(),
            arguments: Vec::new(),
        })
    }

    fn recording_registry() -> (OperationRegistry, Rc<RefCell<Vec<Operation>>>) {
        let mut registry = OperationRegistry::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        registry.subscribe(OperationEvents::OUTERMOST_COMPLETED, move |event| {
            sink.borrow_mut().push(event.operation().clone());
        });
        (registry, log)
    }

    #[test]
    fn test_nested_operations_split_around_start() {
        let (mut registry, log) = recording_registry();
        let outer = registry.begin_registration(OperationType::USER);
        registry.register_operation(call("outer")).unwrap();

        let before = registry.begin_registration(OperationType::USER);
        registry.register_operation(call("before")).unwrap();
        registry.notify_operation_starting(true).unwrap();
        registry.close(before, true).unwrap();

        registry.notify_operation_starting(true).unwrap();
        let after = registry.begin_registration(OperationType::USER);
        registry.register_operation(call("after")).unwrap();
        registry.notify_operation_starting(true).unwrap();
        registry.close(after, true).unwrap();
        registry.close(outer, true).unwrap();

        let log = log.borrow();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].preceding, vec![call("before")]);
        assert_eq!(log[0].following, vec![call("after")]);
    }

    #[test]
    fn test_scopes_close_lifo() {
        let (mut registry, _) = recording_registry();
        let outer = registry.begin_registration(OperationType::USER);
        let inner = registry.begin_registration(OperationType::USER);
        let err = registry.close(outer, true).unwrap_err();
        assert!(matches!(err, OrmError::ScopeNesting(_)));
        registry.close(inner, true).unwrap();
        assert_eq!(registry.depth(), 1);
    }

    #[test]
    fn test_double_registration_fails() {
        let (mut registry, _) = recording_registry();
        let scope = registry.begin_registration(OperationType::USER);
        registry.register_operation(call("a")).unwrap();
        assert!(matches!(
            registry.register_operation(call("b")),
            Err(OrmError::OperationRegistration(_))
        ));
        registry.notify_operation_starting(true).unwrap();
        assert!(registry.notify_operation_starting(true).is_err());
        registry.close(scope, true).unwrap();
    }

    #[test]
    fn test_completion_requires_start() {
        let (mut registry, log) = recording_registry();
        let scope = registry.begin_registration(OperationType::USER);
        assert!(registry.notify_operation_starting(true).is_err());
        registry.register_operation(call("a")).unwrap();
        assert!(matches!(
            registry.close(scope, true),
            Err(OrmError::OperationRegistration(_))
        ));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_blocking_without_listeners_and_for_system() {
        let mut registry = OperationRegistry::new();
        let scope = registry.begin_registration(OperationType::USER);
        assert!(!registry.is_registering());
        registry.register_operation(call("ignored")).unwrap();
        registry.close(scope, true).unwrap();

        let (mut registry, log) = recording_registry();
        let outer = registry.begin_registration(OperationType::SYSTEM);
        assert!(!registry.is_registering());
        let inner = registry.begin_registration(OperationType::USER);
        assert!(!registry.is_registering());
        registry.close(inner, true).unwrap();
        registry.close(outer, true).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_discarded_scope_reports_nothing() {
        let (mut registry, log) = recording_registry();
        let scope = registry.begin_registration(OperationType::USER);
        registry.register_operation(call("failed")).unwrap();
        registry.notify_operation_starting(true).unwrap();
        registry.close(scope, false).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(registry.depth(), 0);
    }
}
