// Handler Registry - task type -> handler, resolved when a worker is built
use crate::domain::TaskType;
use crate::error::{AppError, Result};
use crate::port::{GroupedTaskHandler, Task, TaskHandler, TypedHandler};
use std::collections::HashMap;
use std::sync::Arc;

/// A handler as registered for one task type
#[derive(Clone)]
pub enum RegisteredHandler {
    /// Jobs are handled one by one
    Single(Arc<dyn TaskHandler>),
    /// Jobs sharing a group key are handled together
    Grouped(Arc<dyn GroupedTaskHandler>),
}

/// Registry of task handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an untyped handler (replaces any previous one)
    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(
            TaskType::new(task_type),
            RegisteredHandler::Single(handler),
        );
    }

    /// Register a typed task
    pub fn register_task<T: Task>(&mut self, task_type: impl Into<String>, task: T) {
        self.register(task_type, Arc::new(TypedHandler(task)));
    }

    /// Register a handler that processes same-resource jobs together
    pub fn register_grouped(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn GroupedTaskHandler>,
    ) {
        self.handlers.insert(
            TaskType::new(task_type),
            RegisteredHandler::Grouped(handler),
        );
    }

    pub fn get(&self, task_type: &TaskType) -> Option<&RegisteredHandler> {
        self.handlers.get(task_type)
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Resolve handlers for a worker's task types
    ///
    /// # Errors
    /// `AppError::Config` if any task type has no registered handler
    pub fn resolve(&self, task_types: &[TaskType]) -> Result<HashMap<TaskType, RegisteredHandler>> {
        task_types
            .iter()
            .map(|task_type| {
                self.handlers
                    .get(task_type)
                    .cloned()
                    .map(|handler| (task_type.clone(), handler))
                    .ok_or_else(|| {
                        AppError::Config(format!("no handler registered for task type {}", task_type))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::task_handler::mocks::MockTaskHandler;

    #[test]
    fn test_resolve_reports_missing_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("create_order", Arc::new(MockTaskHandler::new_success(None)));

        let resolved = registry
            .resolve(&[TaskType::new("create_order")])
            .unwrap();
        assert!(matches!(
            resolved.get(&TaskType::new("create_order")),
            Some(RegisteredHandler::Single(_))
        ));

        let err = registry
            .resolve(&[TaskType::new("create_order"), TaskType::new("tracking_number")])
            .err()
            .unwrap();
        assert!(err.to_string().contains("tracking_number"));
    }

    #[test]
    fn test_task_types_sorted() {
        let mut registry = HandlerRegistry::new();
        registry.register("update_status_ecount", Arc::new(MockTaskHandler::new_success(None)));
        registry.register("create_order", Arc::new(MockTaskHandler::new_success(None)));

        let names: Vec<String> = registry
            .task_types()
            .into_iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(names, vec!["create_order", "update_status_ecount"]);
    }
}
