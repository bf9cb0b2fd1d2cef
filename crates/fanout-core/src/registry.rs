//! Dotted-name method registry.
//!
//! Both the coordinator's RPC surface and a worker's capabilities are exposed
//! by name. Names are dotted paths (`"demo.add"`); every prefix of a registered
//! name is a namespace. A name is either a callable leaf or a namespace, never
//! both, and the table is fixed once the owning server or worker starts.

use crate::RemoteError;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Segments starting with this marker are private and never dispatched.
pub const PRIVATE_PREFIX: char = '_';

/// Intercepted by the RPC server; never resolvable through a registry.
pub const SHUTDOWN_METHOD: &str = "shutdown";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid method name: {0:?}")]
    InvalidName(String),

    #[error("Cannot call methods with leading '{prefix}': {0}", prefix = PRIVATE_PREFIX)]
    Private(String),

    #[error("Method name `{0}` is reserved")]
    Reserved(String),

    #[error("Method already registered: {0}")]
    Duplicate(String),

    #[error("Method `{name}` conflicts with existing name `{existing}`")]
    Conflict { name: String, existing: String },

    #[error(
        "Requested method `{name}` not found; valid names in `{namespace}` are: [{listed}]",
        listed = .valid.join(", ")
    )]
    NotFound {
        name: String,
        namespace: String,
        valid: Vec<String>,
    },

    #[error("Requested method `{0}` is a namespace and is not callable")]
    NotCallable(String),
}

impl From<RegistryError> for RemoteError {
    fn from(err: RegistryError) -> Self {
        RemoteError::protocol(err.to_string())
    }
}

/// Check syntax and the private/reserved rules for a method name.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name.split('.').any(|s| s.is_empty() || s.contains(char::is_whitespace)) {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    if name.split('.').any(|s| s.starts_with(PRIVATE_PREFIX)) {
        return Err(RegistryError::Private(name.to_string()));
    }
    if name == SHUTDOWN_METHOD {
        return Err(RegistryError::Reserved(name.to_string()));
    }
    Ok(())
}

/// Registry of handlers keyed by dotted name
pub struct MethodRegistry<H> {
    methods: BTreeMap<String, H>,
}

impl<H> MethodRegistry<H> {
    pub fn new() -> Self {
        MethodRegistry {
            methods: BTreeMap::new(),
        }
    }

    /// Register a handler under a dotted name
    pub fn register(&mut self, name: impl Into<String>, handler: H) -> Result<(), RegistryError> {
        let name = name.into();
        validate_name(&name)?;

        if self.methods.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        // A leaf may not shadow a namespace and vice versa.
        if let Some(existing) = self.first_under(&name) {
            return Err(RegistryError::Conflict {
                name,
                existing: existing.to_string(),
            });
        }
        let segments: Vec<&str> = name.split('.').collect();
        for i in 1..segments.len() {
            let prefix = segments[..i].join(".");
            if self.methods.contains_key(&prefix) {
                return Err(RegistryError::Conflict {
                    name,
                    existing: prefix,
                });
            }
        }

        self.methods.insert(name, handler);
        Ok(())
    }

    /// Resolve a dotted name to its handler
    pub fn resolve(&self, name: &str) -> Result<&H, RegistryError> {
        validate_name(name)?;

        if let Some(handler) = self.methods.get(name) {
            return Ok(handler);
        }
        if self.first_under(name).is_some() {
            return Err(RegistryError::NotCallable(name.to_string()));
        }

        // Report the members of the deepest namespace that does exist.
        let segments: Vec<&str> = name.split('.').collect();
        let namespace = (1..segments.len())
            .rev()
            .map(|depth| segments[..depth].join("."))
            .find(|namespace| !self.children(namespace).is_empty())
            .unwrap_or_default();
        let valid = self.children(&namespace);
        Err(RegistryError::NotFound {
            name: name.to_string(),
            namespace: if namespace.is_empty() {
                "<root>".to_string()
            } else {
                namespace
            },
            valid,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// All registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    fn first_under(&self, namespace: &str) -> Option<&str> {
        let prefix = format!("{}.", namespace);
        self.methods
            .range(prefix.clone()..)
            .next()
            .map(|(k, _)| k.as_str())
            .filter(|k| k.starts_with(&prefix))
    }

    /// Immediate members (methods or sub-namespaces) of a namespace
    fn children(&self, namespace: &str) -> Vec<String> {
        let mut out = BTreeSet::new();
        for key in self.methods.keys() {
            let rest = if namespace.is_empty() {
                Some(key.as_str())
            } else {
                key.strip_prefix(namespace).and_then(|r| r.strip_prefix('.'))
            };
            if let Some(rest) = rest {
                out.insert(rest.split('.').next().unwrap_or(rest).to_string());
            }
        }
        out.into_iter().collect()
    }
}

impl<H> Default for MethodRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
