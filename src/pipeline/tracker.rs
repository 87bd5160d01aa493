use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::enumerate::WorkItem;

/// Conjunto de identificadores já admitidos nesta execução.
#[derive(Debug, Default)]
pub struct ItemTracker {
    seen: Mutex<HashSet<String>>,
}

impl ItemTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra `item`; retorna false se ele já tinha sido admitido.
    pub fn try_admit(&self, item: &WorkItem) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.id())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
