use crate::{Kwargs, RemoteError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arguments of one remote call: positional values plus keyword values.
///
/// Parameters are looked up positionally first, then by name, so callers may
/// pass `f(1, 2)` or `f(1, y=2)` interchangeably.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl CallArgs {
    pub fn new(args: Vec<Value>, kwargs: Kwargs) -> Self {
        CallArgs { args, kwargs }
    }

    pub fn positional(args: Vec<Value>) -> Self {
        CallArgs {
            args,
            kwargs: Kwargs::new(),
        }
    }

    fn raw(&self, position: usize, name: &str) -> Option<&Value> {
        self.args.get(position).or_else(|| self.kwargs.get(name))
    }

    /// Required parameter
    pub fn get<T: DeserializeOwned>(&self, position: usize, name: &str) -> Result<T, RemoteError> {
        let raw = self
            .raw(position, name)
            .ok_or_else(|| RemoteError::bad_arguments(format!("missing argument `{}`", name)))?;
        serde_json::from_value(raw.clone())
            .map_err(|e| RemoteError::bad_arguments(format!("argument `{}`: {}", name, e)))
    }

    /// Optional parameter; absent or null yields `None`
    pub fn opt<T: DeserializeOwned>(
        &self,
        position: usize,
        name: &str,
    ) -> Result<Option<T>, RemoteError> {
        match self.raw(position, name) {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => serde_json::from_value(raw.clone())
                .map(Some)
                .map_err(|e| RemoteError::bad_arguments(format!("argument `{}`: {}", name, e))),
        }
    }

    /// Optional parameter with a fallback
    pub fn get_or<T: DeserializeOwned>(
        &self,
        position: usize,
        name: &str,
        default: T,
    ) -> Result<T, RemoteError> {
        Ok(self.opt(position, name)?.unwrap_or(default))
    }
}
