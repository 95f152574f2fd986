// SPDX-License-Identifier: MIT OR Apache-2.0
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::action::Action;

/// Maps pipeline-declared action names to constructed [`Action`]
/// implementations.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `action`. Re-registering a name replaces the prior
    /// binding.
    pub fn register(&mut self, name: impl Into<String>, action: Arc<dyn Action>) {
        self.actions.insert(name.into(), action);
    }

    /// Look up a binding by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Every registered action name, for validator allowlisting.
    #[must_use]
    pub fn known_action_names(&self) -> HashSet<String> {
        self.actions.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rag_core::pipeline::StepDef;
    use rag_core::state::State;
    use rag_error::Result;

    struct Noop;
    #[async_trait]
    impl Action for Noop {
        fn action_id(&self) -> &str {
            "noop"
        }
        async fn do_execute(
            &self,
            _step: &StepDef,
            _state: &mut State,
            _runtime: &crate::Runtime,
        ) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let mut reg = ActionRegistry::new();
        reg.register("noop", Arc::new(Noop));
        assert!(reg.get("noop").is_some());
        assert!(reg.get("missing").is_none());
        assert_eq!(reg.known_action_names().len(), 1);
    }
}
