use fanout_core::{CallArgs, MethodRegistry, RegistryError, Value};
use std::sync::Arc;

/// Outcome of one capability call; the error is reported to the coordinator verbatim
pub type CapabilityResult = Result<Value, String>;

/// Application code a worker can run on behalf of a task
pub trait Capability: Send + Sync {
    fn invoke(&self, args: &CallArgs) -> CapabilityResult;
}

impl<F> Capability for F
where
    F: Fn(&CallArgs) -> CapabilityResult + Send + Sync,
{
    fn invoke(&self, args: &CallArgs) -> CapabilityResult {
        self(args)
    }
}

/// Capabilities by dotted name, fixed before the worker starts
#[derive(Default)]
pub struct CapabilityRegistry {
    methods: MethodRegistry<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        CapabilityRegistry {
            methods: MethodRegistry::new(),
        }
    }

    /// Register a capability under a dotted name
    pub fn register<C: Capability + 'static>(
        &mut self,
        name: impl Into<String>,
        capability: C,
    ) -> Result<(), RegistryError> {
        self.methods.register(name, Arc::new(capability))
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Capability>, RegistryError> {
        self.methods.resolve(name).map(Arc::clone)
    }

    /// Resolve and run in the current thread; a panic becomes an error
    pub fn invoke(&self, name: &str, args: &CallArgs) -> CapabilityResult {
        let capability = self.resolve(name).map_err(|e| e.to_string())?;
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| capability.invoke(args)))
            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())))
    }

    pub fn names(&self) -> Vec<String> {
        self.methods.names()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Capability panicked: {}", detail)
}
