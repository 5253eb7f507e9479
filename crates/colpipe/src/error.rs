use colpipe_models::{Id, InvalidName};

/// The single error taxonomy returned by every domain operation. `main`
/// and the sql layer wrap opaque failures into `IoFailure` /
/// `PersistenceFailure` before they reach a caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    InvalidName(#[from] InvalidName),

    #[error("{kind} {name:?} already exists")]
    DuplicateName { kind: &'static str, name: String },

    #[error("no catalog named {0:?}")]
    UnknownCatalog(String),

    #[error("no collection named {0:?}")]
    UnknownCollection(String),

    #[error("collection {name:?} cannot be edited while in state {state}")]
    NotEditable { name: String, state: &'static str },

    #[error("schemaJson does not match the current catalog's schema")]
    SchemaMismatch,

    #[error("the collection's catalog changed since EditPrep was called")]
    CatalogChanged,

    #[error("jsonInput does not match the previous selection's jsonOutput")]
    InputMismatch,

    #[error("selection {0} already has a runner")]
    AlreadyRun(Id),

    #[error("{engine_name} gave exit-code {exit_code}: {}", truncate_output(combined_output))]
    EngineFailed {
        engine_name: String,
        exit_code: i32,
        combined_output: String,
    },

    #[error("io failure: {0}")]
    IoFailure(String),

    #[error("persistence failure, caller should retry: {0}")]
    PersistenceFailure(#[from] sqlx::Error),
}

impl Error {
    /// Prepends the failing child's identifier the way every enclosing
    /// layer's `EngineFailed` propagation is required to.
    pub fn prefixed(self, child: &str) -> Error {
        match self {
            Error::EngineFailed {
                engine_name,
                exit_code,
                combined_output,
            } => Error::EngineFailed {
                engine_name: format!("{child}: {engine_name}"),
                exit_code,
                combined_output,
            },
            Error::IoFailure(msg) => Error::IoFailure(format!("{child}: {msg}")),
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoFailure(err.to_string())
    }
}

/// Persisted `error_string` columns are meant for an overview/replay UI,
/// not a full log dump -- keep the tail of the output, where the actual
/// failure message usually lands, and cap it well short of pathological.
const MAX_DISPLAYED_OUTPUT: usize = 4096;

fn truncate_output(combined_output: &str) -> String {
    if combined_output.len() <= MAX_DISPLAYED_OUTPUT {
        return combined_output.to_string();
    }
    let mut start = combined_output.len() - MAX_DISPLAYED_OUTPUT;
    while !combined_output.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &combined_output[start..])
}
