//! Built-in extensions and the registry that maps manifest sections to
//! extensions.

pub mod exec;
pub mod relocation;

pub use exec::ExecExtension;
pub use relocation::RelocationExtension;

use crate::pipeline::{ExecutionScope, Extension, SharedContract};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Section names the manifest grammar reserves for itself.
pub const RESERVED_SECTIONS: [&str; 3] = ["repos", "deps", "end"];

/// Errors raised while registering an extension.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The name is used by the manifest grammar.
    #[error("`{name}` is a reserved section name")]
    Reserved {
        /// The rejected name.
        name: String,
    },

    /// The name cannot appear in a `__name__` header.
    #[error("`{name}` is not a valid section name: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Another extension already uses the name.
    #[error("an extension named `{name}` is already registered")]
    Duplicate {
        /// The rejected name.
        name: String,
    },
}

/// Registered extensions, keyed by manifest section name.
///
/// [`ExtensionRegistry::default`] registers the `relocation` extension. The
/// `exec` extension runs external programs and must be opted into with
/// [`ExtensionRegistry::with_exec`].
#[derive(Clone)]
pub struct ExtensionRegistry {
    extensions: BTreeMap<String, Arc<dyn Extension>>,
    contract: Arc<SharedContract>,
}

impl ExtensionRegistry {
    /// A registry with no extensions and the default shared contract.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            extensions: BTreeMap::new(),
            contract: Arc::new(SharedContract::default()),
        }
    }

    /// Register `extension` under the section `name`.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] when the name is reserved, malformed or
    /// already taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        extension: Arc<dyn Extension>,
    ) -> Result<(), RegistryError> {
        let section = name.into();
        validate_name(&section)?;
        if self.extensions.contains_key(&section) {
            return Err(RegistryError::Duplicate { name: section });
        }
        self.extensions.insert(section, extension);
        Ok(())
    }

    /// Builder form of [`ExtensionRegistry::register`].
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] when the name is reserved, malformed or
    /// already taken.
    pub fn with(
        mut self,
        name: impl Into<String>,
        extension: Arc<dyn Extension>,
    ) -> Result<Self, RegistryError> {
        self.register(name, extension)?;
        Ok(self)
    }

    /// Add the `exec` extension.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when `exec` is already registered.
    pub fn with_exec(self) -> Result<Self, RegistryError> {
        self.with(exec::NAME, Arc::new(ExecExtension))
    }

    /// Replace the shared contract visible to every scope.
    #[must_use]
    pub fn with_contract(mut self, contract: SharedContract) -> Self {
        self.contract = Arc::new(contract);
        self
    }

    /// The extension registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Extension>> {
        self.extensions.get(name)
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }

    /// Registered section names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extensions.keys().map(String::as_str)
    }

    /// The shared contract.
    #[must_use]
    pub fn contract(&self) -> Arc<SharedContract> {
        Arc::clone(&self.contract)
    }

    /// The host scope: every registered extension's exports plus the shared
    /// contract.
    #[must_use]
    pub fn host_scope(&self) -> ExecutionScope {
        ExecutionScope::host(
            self.extensions
                .values()
                .flat_map(|extension| extension.exports()),
            self.contract(),
        )
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        let mut extensions: BTreeMap<String, Arc<dyn Extension>> = BTreeMap::new();
        extensions.insert(relocation::NAME.to_owned(), Arc::new(RelocationExtension));
        Self {
            extensions,
            contract: Arc::new(SharedContract::default()),
        }
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .field("contract", &self.contract)
            .finish()
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if RESERVED_SECTIONS.contains(&name) {
        return Err(RegistryError::Reserved {
            name: name.to_owned(),
        });
    }
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.chars().any(char::is_whitespace) {
        Some("name contains whitespace")
    } else if name.contains(['/', '\\']) {
        Some("name contains a path separator")
    } else if name.starts_with('_') || name.ends_with('_') {
        Some("name starts or ends with `_`")
    } else {
        None
    };
    reason.map_or(Ok(()), |why| {
        Err(RegistryError::InvalidName {
            name: name.to_owned(),
            reason: why.to_owned(),
        })
    })
}
