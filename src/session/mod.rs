//! Session identity for one activation of the bridge

mod manager;

use std::sync::{Arc, PoisonError, RwLock};

pub use manager::SessionManager;

/// Shared, cloneable holder of the current session id
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    id: Arc<RwLock<Option<String>>>,
}

impl SessionSlot {
    pub fn get(&self) -> Option<String> {
        self.id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, id: impl Into<String>) {
        *self.id.write().unwrap_or_else(PoisonError::into_inner) = Some(id.into());
    }

    pub fn clear(&self) {
        *self.id.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
