use keel_core::StoreError;
use thiserror::Error;

/// Errors produced while reconciling a hook.
#[derive(Debug, Error)]
pub enum Error {
    /// Store call failed. `NotFound` on lookup never reaches the caller.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A hook reported an inconsistency (e.g. a payload of the wrong shape).
    #[error("hook logic error: {0}")]
    HookLogic(String),

    /// Cancellation token fired or the deadline passed.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// Attribution wrapper added by the engine before an error leaves a hook.
    #[error("reconciling {kind} {name}: {source}")]
    Hook {
        kind: String,
        name: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn hook_logic(msg: impl Into<String>) -> Self { Error::HookLogic(msg.into()) }

    pub(crate) fn attribute(self, kind: &str, name: &str) -> Self {
        match self {
            already @ Error::Hook { .. } => already,
            other => Error::Hook { kind: kind.to_string(), name: name.to_string(), source: Box::new(other) },
        }
    }

    /// Innermost error, past any attribution wrapper.
    pub fn root(&self) -> &Error {
        match self {
            Error::Hook { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool { matches!(self.root(), Error::Cancelled) }

    pub fn is_not_found(&self) -> bool { matches!(self.root(), Error::Store(e) if e.is_not_found()) }

    pub fn is_transient(&self) -> bool { matches!(self.root(), Error::Store(e) if e.is_transient()) }
}
