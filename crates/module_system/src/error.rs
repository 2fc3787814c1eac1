//! Error types for module discovery, enabling and collaborator calls.

use thiserror::Error;

/// Errors raised while discovering, pre-enabling or enabling modules.
///
/// Discovery and build-time errors abort the owning module's enable sequence.
/// Runtime activation failures never surface as a `ModuleError`; the
/// dispatcher swallows them (see [`ActivationError`]).
#[derive(Debug, Error)]
pub enum ModuleError {
    /// A module, item path or parent command could not be found.
    #[error("Discovery error in module {module}: {item} not found")]
    Discovery { module: String, item: String },

    /// Two command descriptors claim the same alias in the same scope.
    #[error("Duplicate alias '{alias}' in scope '{scope}': declared by {first} and {second}")]
    DuplicateAlias {
        alias: String,
        scope: String,
        first: String,
        second: String,
    },

    /// An item factory failed and the item was not marked skip-on-error.
    #[error("Failed to construct {item} in module {module}: {source}")]
    Instantiation {
        module: String,
        item: String,
        #[source]
        source: anyhow::Error,
    },

    /// A module's pre-enable hook failed. Fatal for startup.
    #[error("Cannot enable module {module}: {source}")]
    PreEnable {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    /// A lifecycle call was made against a module in the wrong state.
    #[error("Module {module} is {state}, expected {expected}")]
    InvalidState {
        module: String,
        state: String,
        expected: String,
    },

    /// A catalog path or command id is declared more than once.
    #[error("Item {0} is declared more than once")]
    DuplicateItem(String),

    /// A manifest or module configuration could not be read.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A permission key was registered twice under the reject policy.
    #[error("Permission {0} is already registered")]
    DuplicatePermission(String),

    /// A collaborator (event bus, scheduler, config store) failed.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Errors produced by the external collaborators.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Event bus error: {0}")]
    EventBus(String),
    #[error("Scheduler error: {0}")]
    Scheduler(String),
    #[error("Task {0} has a zero interval")]
    InvalidInterval(String),
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("Config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Failure while evaluating whether a listener or command should be active.
///
/// Always treated as "inactive" by the caller.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("activation predicate failed: {0}")]
    Failed(#[from] anyhow::Error),
    #[error("activation predicate panicked: {0}")]
    Panicked(String),
}

impl ActivationError {
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        ActivationError::Panicked(message)
    }
}

/// Runs a fallible constructor or hook, turning a panic into an error.
pub(crate) fn caught<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(ActivationError::from_panic(payload).to_string())),
    }
}

/// Evaluates a fallible predicate, converting both errors and panics into
/// [`ActivationError`].
pub(crate) fn guarded<F>(f: F) -> Result<bool, ActivationError>
where
    F: FnOnce() -> anyhow::Result<bool>,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ActivationError::Failed(e)),
        Err(payload) => Err(ActivationError::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_converts_panics() {
        let result = guarded(|| panic!("boom"));
        match result {
            Err(ActivationError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn guarded_passes_errors_through() {
        let result = guarded(|| Err(anyhow::anyhow!("no config")));
        assert!(matches!(result, Err(ActivationError::Failed(_))));
        assert!(matches!(guarded(|| Ok(true)), Ok(true)));
    }

    #[test]
    fn caught_turns_panic_into_error() {
        let result: anyhow::Result<u8> = caught(|| panic!("factory exploded"));
        let message = result.unwrap_err().to_string();
        assert!(message.contains("factory exploded"));
        assert_eq!(caught(|| Ok(7u8)).unwrap(), 7);
    }

    #[test]
    fn duplicate_alias_names_both_descriptors() {
        let err = ModuleError::DuplicateAlias {
            alias: "status".into(),
            scope: "<root>".into(),
            first: "a.status".into(),
            second: "b.status".into(),
        };
        let text = err.to_string();
        assert!(text.contains("a.status") && text.contains("b.status"));
    }
}
