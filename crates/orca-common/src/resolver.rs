//! Dependency container
//!
//! Orchestration helpers look up collaborator clients (scheduler, graph,
//! registrar) by type at call time instead of holding them directly. The
//! container is built by the composition root and passed down explicitly.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

use crate::{OrcaError, Result};

#[derive(Default)]
pub struct Container {
    services: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance. Trait objects are registered as `Arc<dyn Trait>`:
    ///
    /// ```ignore
    /// container.register::<dyn SchedulerClient>(Arc::new(repo));
    /// ```
    pub fn register<T>(&self, instance: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.insert(TypeId::of::<T>(), Arc::new(instance));
    }

    pub fn resolve<T>(&self) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let entry = self
            .services
            .get(&TypeId::of::<T>())
            .map(|e| e.value().clone())
            .ok_or(OrcaError::NotRegistered { type_name: std::any::type_name::<T>() })?;

        entry
            .downcast::<Arc<T>>()
            .map(|outer| (*outer).clone())
            .map_err(|_| OrcaError::NotRegistered { type_name: std::any::type_name::<T>() })
    }

    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.contains_key(&TypeId::of::<T>())
    }
}
