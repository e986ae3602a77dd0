// Task registry: task_name -> handler, filled once at startup

use crate::error::{AppError, Result};
use crate::port::TaskHandler;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Names are unique.
    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> Result<()>
    where
        H: TaskHandler + 'static,
    {
        self.register_arc(name, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(AppError::Conflict(format!(
                "task '{}' is already registered",
                name
            )));
        }
        debug!(task_name = %name, "Registered task handler");
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::task_handler::mocks::MockHandler;

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = TaskRegistry::new();
        registry
            .register("send_email", MockHandler::succeeding())
            .unwrap();
        let err = registry
            .register("send_email", MockHandler::succeeding())
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup() {
        let mut registry = TaskRegistry::new();
        registry.register("b", MockHandler::succeeding()).unwrap();
        registry.register("a", MockHandler::succeeding()).unwrap();
        assert!(registry.get("a").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
