//! Parent/child exchange for process isolation.
//!
//! The parent writes one JSON `ChildRequest` to the child's stdin and closes
//! it. The child runs the capability and prints one JSON `ChildOutcome` line
//! on stdout; the last parseable line wins. Child logs go to stderr.

use crate::capability::CapabilityRegistry;
use crate::Result;
use fanout_core::{CallArgs, Value};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRequest {
    pub method: String,
    #[serde(flatten)]
    pub args: CallArgs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildOutcome {
    Ok(Value),
    Err(String),
}

impl From<std::result::Result<Value, String>> for ChildOutcome {
    fn from(result: std::result::Result<Value, String>) -> Self {
        match result {
            Ok(value) => ChildOutcome::Ok(value),
            Err(message) => ChildOutcome::Err(message),
        }
    }
}

impl ChildOutcome {
    /// Find the outcome line in captured stdout
    pub fn parse(stdout: &[u8]) -> Option<ChildOutcome> {
        String::from_utf8_lossy(stdout)
            .lines()
            .rev()
            .filter(|line| !line.trim().is_empty())
            .find_map(|line| serde_json::from_str(line).ok())
    }
}

/// Child-mode entry: read one request, run it, print the outcome
pub fn serve_child(
    registry: &CapabilityRegistry,
    mut input: impl Read,
    mut output: impl Write,
) -> Result<()> {
    let mut raw = Vec::new();
    input.read_to_end(&mut raw)?;
    let request: ChildRequest = serde_json::from_slice(&raw)?;
    tracing::debug!("Child {} running {}", std::process::id(), request.method);

    let outcome = ChildOutcome::from(registry.invoke(&request.method, &request.args));
    let mut line = serde_json::to_vec(&outcome)?;
    line.push(b'\n');
    output.write_all(&line)?;
    output.flush()?;
    Ok(())
}
