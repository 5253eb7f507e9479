use std::fmt;

/// EntityState is the four-value state machine shared by every
/// layer of the pipeline: a ProcessingEngine invocation, its owning
/// Runner, the Selection that launched the Runner, and the
/// Collection the Selection belongs to.
///
/// Legal transitions:
///   Pending  -> Running
///   Pending  -> Failed     (pre-launch error)
///   Running  -> Completed
///   Running  -> Failed
///   Completed, Failed are terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum EntityState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl EntityState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntityState::Completed | EntityState::Failed)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityState::Pending => "Pending",
            EntityState::Running => "Running",
            EntityState::Completed => "Completed",
            EntityState::Failed => "Failed",
        };
        f.write_str(s)
    }
}
