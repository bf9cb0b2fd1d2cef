//! Capabilities shipped with the worker binary.
//!
//! `demo.*` exists for smoke and stress testing: `demo.sleep` can fail or
//! abort the process on purpose, `demo.crash_once` aborts the first time it
//! sees a given marker path.

use crate::capability::{CapabilityRegistry, CapabilityResult};
use fanout_core::{CacheLimits, CallArgs, LruCache, RegistryError, RemoteError, Value};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Registry with every built-in capability.
///
/// The `io.file_len` cache lives as long as the registry. Under
/// `IsolationMode::Thread` every task shares the worker's registry and hits
/// the cache; under `IsolationMode::Process` each task builds a fresh registry
/// in its own child, so every call starts cold.
pub fn demo_registry(file_cache: CacheLimits) -> Result<CapabilityRegistry, RegistryError> {
    let mut registry = CapabilityRegistry::new();
    registry.register("demo.echo", echo)?;
    registry.register("demo.reverse", reverse)?;
    registry.register("demo.add", add)?;
    registry.register("demo.sleep", sleep)?;
    registry.register("demo.crash_once", crash_once)?;

    let cache = Arc::new(Mutex::new(LruCache::<PathBuf, u64>::new(file_cache)));
    registry.register("io.file_len", move |args: &CallArgs| file_len(&cache, args))?;
    Ok(registry)
}

fn bad(e: RemoteError) -> String {
    e.message
}

fn echo(args: &CallArgs) -> CapabilityResult {
    args.get(0, "value").map_err(bad)
}

fn reverse(args: &CallArgs) -> CapabilityResult {
    let text: String = args.get(0, "text").map_err(bad)?;
    Ok(json!(text.chars().rev().collect::<String>()))
}

fn add(args: &CallArgs) -> CapabilityResult {
    let a: Value = args.get(0, "a").map_err(bad)?;
    let b: Value = args.get(1, "b").map_err(bad)?;
    sum(&a, &b)
}

fn sum(a: &Value, b: &Value) -> CapabilityResult {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(total) = x.checked_add(y) {
            return Ok(json!(total));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(json!(x + y)),
        _ => Err(format!("cannot add {} and {}", a, b)),
    }
}

/// Sleep, then return the duration; may fail or abort at the given rates
fn sleep(args: &CallArgs) -> CapabilityResult {
    let seconds: f64 = args.get(0, "seconds").map_err(bad)?;
    let exc_rate: f64 = args.get_or(1, "exc_rate", 0.0).map_err(bad)?;
    let crash_rate: f64 = args.get_or(2, "crash_rate", 0.0).map_err(bad)?;

    let roll: f64 = rand::thread_rng().gen();
    if roll < crash_rate {
        tracing::warn!("demo.sleep aborting the process on purpose");
        std::process::abort();
    }
    if roll < crash_rate + exc_rate {
        return Err("Random exception".to_string());
    }

    std::thread::sleep(Duration::try_from_secs_f64(seconds).unwrap_or_default());
    Ok(json!(seconds))
}

/// Abort unless `marker` exists; create it first so the next attempt succeeds
fn crash_once(args: &CallArgs) -> CapabilityResult {
    let marker: PathBuf = args.get(0, "marker").map_err(bad)?;
    if !marker.exists() {
        std::fs::write(&marker, b"").map_err(|e| format!("cannot create {}: {}", marker.display(), e))?;
        tracing::warn!("demo.crash_once aborting, marker {} created", marker.display());
        std::process::abort();
    }
    let a: Value = args.get(1, "a").map_err(bad)?;
    let b: Value = args.get(2, "b").map_err(bad)?;
    sum(&a, &b)
}

fn file_len(cache: &Mutex<LruCache<PathBuf, u64>>, args: &CallArgs) -> CapabilityResult {
    let path: PathBuf = args.get(0, "path").map_err(bad)?;
    let len = cache
        .lock()
        .get_or_try_insert_with(path.clone(), || measure(&path))?;
    Ok(json!(len))
}

fn measure(path: &Path) -> Result<u64, String> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| format!("cannot stat {}: {}", path.display(), e))
}
