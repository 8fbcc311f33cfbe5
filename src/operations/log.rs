use super::{Operation, OperationExecutionContext};
use crate::core::{Key, Result};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ordered list of outermost operations, replayable against another session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationLog {
    operations: Vec<Operation>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Executes the operations against `session`.
    ///
    /// Keys of existing entities are prefetched in one go first; temporary
    /// keys are mapped to keys generated by `session`. The returned context
    /// holds that mapping.
    pub fn replay(&self, session: &mut Session) -> Result<OperationExecutionContext> {
        let mut context = OperationExecutionContext::new();
        for operation in &self.operations {
            operation.prepare(&mut context);
        }
        for key in context.prepared_keys() {
            session.model().check_key(key)?;
        }
        let existing: Vec<Key> = context
            .prepared_keys()
            .iter()
            .filter(|key| !key.is_temporary())
            .cloned()
            .collect();
        debug!(
            operations = self.operations.len(),
            keys = existing.len(),
            "replaying operation log"
        );
        session.prefetch_keys(&existing)?;
        for operation in &self.operations {
            operation.execute(session, &mut context)?;
        }
        Ok(context)
    }

    /// Reverts the effects of the operations in `session`, last first.
    /// Entity removals have no undo.
    pub fn undo(&self, session: &mut Session) -> Result<()> {
        let undo_operations: Vec<&Operation> = self
            .operations
            .iter()
            .rev()
            .flat_map(|operation| operation.undo_operations())
            .collect();
        for key in undo_operations.iter().copied().flat_map(Operation::keys) {
            session.model().check_key(key)?;
        }
        let mut context = OperationExecutionContext::new();
        for undo in undo_operations {
            undo.execute(session, &mut context)?;
        }
        Ok(())
    }
}

impl FromIterator<Operation> for OperationLog {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}
