use indexmap::IndexMap;
use std::sync::Arc;

use crate::condensation::CondensationStrategy;

#[derive(Clone)]
pub struct RegisteredStrategy {
    pub strategy: Arc<dyn CondensationStrategy>,
    pub enabled: bool,
    pub priority: i32,
}

/// Listing entry exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyInfo {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
}

/// Maps strategy id to implementation plus enablement/priority metadata.
/// Insertion order is retained so it can break priority ties.
#[derive(Default)]
pub struct StrategyRegistry {
    entries: IndexMap<String, RegisteredStrategy>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Upsert. Registering an existing id replaces its strategy and metadata
    /// but keeps its original registration position.
    pub fn register(&mut self, strategy: Arc<dyn CondensationStrategy>, enabled: bool, priority: i32) {
        let id = strategy.id().to_string();
        self.entries.insert(
            id,
            RegisteredStrategy {
                strategy,
                enabled,
                priority,
            },
        );
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        self.entries.shift_remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredStrategy> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Sorted by priority, then registration order.
    pub fn list(&self) -> Vec<StrategyInfo> {
        let mut infos: Vec<(usize, StrategyInfo)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, (id, entry))| {
                (
                    position,
                    StrategyInfo {
                        id: id.clone(),
                        name: entry.strategy.name().to_string(),
                        enabled: entry.enabled,
                        priority: entry.priority,
                    },
                )
            })
            .collect();

        infos.sort_by_key(|(position, info)| (info.priority, *position));
        infos.into_iter().map(|(_, info)| info).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
