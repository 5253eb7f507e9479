//! The StateCell propagation protocol.
//!
//! Every mutable entity (Collection, ColSelection, ProcessingEngineRunner,
//! ProcessingEngine) embeds a [`StateCell`] and implements [`Transitionable`]
//! so that [`transition`] can persist the entity and recompute its parent.
//! There is no observer list: the hook is the single coupling point between
//! layers, and propagation is synchronous and depth-first.

use colpipe_models::EntityState;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateCell {
    pub state: EntityState,
    pub error_string: String,
}

impl StateCell {
    pub fn pending() -> Self {
        StateCell {
            state: EntityState::Pending,
            error_string: String::new(),
        }
    }

    pub fn new(state: EntityState, error_string: impl Into<String>) -> Self {
        StateCell {
            state,
            error_string: error_string.into(),
        }
    }

    /// Captures `(old_state, old_error)`, then applies `next`/`message`.
    pub fn apply(&mut self, next: EntityState, message: Option<&str>) -> (EntityState, String) {
        let old = (self.state, std::mem::take(&mut self.error_string));
        self.state = next;
        self.error_string = message.unwrap_or_default().to_string();
        old
    }
}

/// Implemented by every entity that owns a [`StateCell`]. `persist` writes
/// the entity's own row; `propagate` reloads the parent (if any) and
/// invokes its recompute-from-child, and must be a no-op when this entity
/// is not its parent's most-recently-created child.
#[async_trait::async_trait]
pub trait Transitionable: Send + Sync {
    fn cell_mut(&mut self) -> &mut StateCell;
    async fn persist(&self, pool: &sqlx::PgPool) -> Result<(), Error>;
    async fn propagate(&self, pool: &sqlx::PgPool) -> Result<(), Error>;
}

/// The sole mutator: capture, apply, persist self, then propagate to the
/// parent. Callers never write `state`/`error_string` fields directly.
/// `message` becomes the entity's `error_string`; pass `None` for
/// `Pending`/`Running`/`Completed`, and `Some(err.to_string())` for
/// `Failed`.
pub async fn transition<T: Transitionable>(
    entity: &mut T,
    next: EntityState,
    message: Option<&str>,
    pool: &sqlx::PgPool,
) -> Result<(), Error> {
    entity.cell_mut().apply(next, message);
    entity.persist(pool).await?;
    entity.propagate(pool).await?;
    Ok(())
}

/// The child->parent state mapping table from the propagation protocol.
/// Returns `None` when the parent is left unchanged (a non-terminal
/// `Completed` from a child that isn't last in sequence).
pub fn map_child_state(child: EntityState, child_is_last: bool) -> Option<EntityState> {
    match child {
        EntityState::Pending => Some(EntityState::Pending),
        EntityState::Running => Some(EntityState::Running),
        EntityState::Completed if child_is_last => Some(EntityState::Completed),
        EntityState::Completed => None,
        EntityState::Failed => Some(EntityState::Failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_only_propagates_when_last() {
        assert_eq!(
            map_child_state(EntityState::Completed, true),
            Some(EntityState::Completed)
        );
        assert_eq!(map_child_state(EntityState::Completed, false), None);
    }

    #[test]
    fn failed_always_propagates() {
        assert_eq!(
            map_child_state(EntityState::Failed, false),
            Some(EntityState::Failed)
        );
    }

    #[test]
    fn apply_clears_error_on_success() {
        let mut cell = StateCell::new(EntityState::Running, "boom");
        let (old_state, old_err) = cell.apply(EntityState::Completed, None);
        assert_eq!(old_state, EntityState::Running);
        assert_eq!(old_err, "boom");
        assert_eq!(cell.state, EntityState::Completed);
        assert_eq!(cell.error_string, "");
    }
}
