use std::fmt::{Display, Formatter};

/// Entity families that can be looked up by id.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EntityKind {
    Recipe,
    UserRecipe,
    Venue,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recipe => "recipe",
            Self::UserRecipe => "user recipe",
            Self::Venue => "venue",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum BackbarError {
    #[error("import error: {0}")]
    Import(String),
    #[error("no active profile; call initialize first")]
    NoActiveProfile,
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BackbarError {
    pub(crate) fn not_found(kind: EntityKind, id: impl Display) -> Self {
        Self::NotFound { kind, id: id.to_string() }
    }
}

impl From<serde_json::Error> for BackbarError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
