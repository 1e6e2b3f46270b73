//! Definition registry: stores and retrieves approval workflow definitions.
//!
//! Definitions are immutable once registered. To modify one, register a
//! new version under the same name; instances created earlier keep the
//! snapshot they were born with, so in-flight approvals never observe
//! template edits.

use crate::error::{EngineError, EngineResult};
use approval_types::{ApprovalContext, DefinitionId, WorkflowDefinition};
use std::collections::HashMap;

/// Registry of approval workflow definitions.
#[derive(Clone, Debug, Default)]
pub struct DefinitionRegistry {
    /// All registered definitions, keyed by ID
    definitions: HashMap<DefinitionId, WorkflowDefinition>,
    /// Index by name → definition IDs in registration order (versioning)
    by_name: HashMap<String, Vec<DefinitionId>>,
    /// Registration order across all names, newest last
    order: Vec<DefinitionId>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition after validating it. Returns the
    /// definition ID.
    pub fn register(&mut self, definition: WorkflowDefinition) -> EngineResult<DefinitionId> {
        definition.validate()?;

        let id = definition.id.clone();
        let name = definition.name.clone();

        self.definitions.insert(id.clone(), definition);
        self.by_name.entry(name).or_default().push(id.clone());
        self.order.push(id.clone());

        tracing::info!(definition_id = %id, "approval definition registered");
        Ok(id)
    }

    pub fn get(&self, id: &DefinitionId) -> EngineResult<&WorkflowDefinition> {
        self.definitions
            .get(id)
            .ok_or_else(|| EngineError::not_found(format!("definition {id} is not registered")))
    }

    /// The most recently registered version under `name`.
    pub fn get_latest_by_name(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.by_name
            .get(name)
            .and_then(|ids| ids.last())
            .and_then(|id| self.definitions.get(id))
    }

    /// All versions registered under `name`, oldest first.
    pub fn get_versions_by_name(&self, name: &str) -> Vec<&WorkflowDefinition> {
        self.by_name
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.definitions.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The definition that should govern a new approval for the given
    /// subject type and context: the most recently registered active
    /// definition whose subject types and applicability conditions match.
    pub fn find_applicable(
        &self,
        subject_type: &str,
        context: &ApprovalContext,
    ) -> Option<&WorkflowDefinition> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.definitions.get(id))
            .find(|def| def.applies_to(subject_type, context))
    }

    /// Retires a definition so `find_applicable` skips it. Instances
    /// already created from it are unaffected.
    pub fn deactivate(&mut self, id: &DefinitionId) -> EngineResult<()> {
        let def = self
            .definitions
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(format!("definition {id} is not registered")))?;
        def.is_active = false;
        tracing::info!(definition_id = %id, "approval definition deactivated");
        Ok(())
    }

    pub fn list(&self) -> Vec<&WorkflowDefinition> {
        self.order
            .iter()
            .filter_map(|id| self.definitions.get(id))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.definitions.len()
    }

    pub fn contains(&self, id: &DefinitionId) -> bool {
        self.definitions.contains_key(id)
    }

    /// Removes a definition entirely. Prefer [`Self::deactivate`] when
    /// instances may still reference the name.
    pub fn remove(&mut self, id: &DefinitionId) -> EngineResult<WorkflowDefinition> {
        let def = self
            .definitions
            .remove(id)
            .ok_or_else(|| EngineError::not_found(format!("definition {id} is not registered")))?;

        if let Some(ids) = self.by_name.get_mut(&def.name) {
            ids.retain(|i| i != id);
            if ids.is_empty() {
                self.by_name.remove(&def.name);
            }
        }
        self.order.retain(|i| i != id);

        tracing::info!(definition_id = %id, "approval definition removed");
        Ok(def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use approval_types::{ApprovalMode, ApproverId, ApproverSpec, LevelDefinition, TenantId};

    fn make_valid_definition(name: &str) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new(name);
        def.add_level(LevelDefinition::new(
            1,
            "Manager",
            ApproverSpec::role("manager"),
            ApprovalMode::Any,
        ))
        .unwrap();
        def
    }

    fn context() -> ApprovalContext {
        ApprovalContext::new(TenantId::new("acme"), ApproverId::new("req-1"))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = DefinitionRegistry::new();
        let id = registry
            .register(make_valid_definition("Change Approval"))
            .unwrap();

        let retrieved = registry.get(&id).unwrap();
        assert_eq!(retrieved.name, "Change Approval");
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_register_rejects_invalid_definition() {
        let mut registry = DefinitionRegistry::new();
        // No levels at all.
        let result = registry.register(WorkflowDefinition::new("Bad"));
        assert!(matches!(
            result.unwrap_err().kind(),
            ErrorKind::InvalidDefinition(_)
        ));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_versions_by_name() {
        let mut registry = DefinitionRegistry::new();
        registry
            .register(make_valid_definition("Review"))
            .unwrap();
        let id2 = registry.register(make_valid_definition("Review")).unwrap();

        assert_eq!(registry.get_versions_by_name("Review").len(), 2);
        assert_eq!(registry.get_latest_by_name("Review").unwrap().id, id2);
        assert!(registry.get_latest_by_name("Nonexistent").is_none());
    }

    #[test]
    fn test_find_applicable_prefers_newest_active() {
        let mut registry = DefinitionRegistry::new();

        let old = make_valid_definition("Change Approval").for_subject_type("change_request");
        let old_id = registry.register(old).unwrap();

        let new = make_valid_definition("Change Approval v2").for_subject_type("change_request");
        let new_id = registry.register(new).unwrap();

        let found = registry.find_applicable("change_request", &context()).unwrap();
        assert_eq!(found.id, new_id);

        registry.deactivate(&new_id).unwrap();
        let found = registry.find_applicable("change_request", &context()).unwrap();
        assert_eq!(found.id, old_id);

        assert!(registry.find_applicable("expense", &context()).is_none());
    }

    #[test]
    fn test_remove_cleans_the_name_index() {
        let mut registry = DefinitionRegistry::new();
        let id = registry.register(make_valid_definition("Remove Me")).unwrap();

        assert!(registry.contains(&id));
        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.name, "Remove Me");
        assert!(!registry.contains(&id));
        assert!(registry.get_versions_by_name("Remove Me").is_empty());
        assert_eq!(registry.list().len(), 0);
    }

    #[test]
    fn test_get_nonexistent() {
        let registry = DefinitionRegistry::new();
        let result = registry.get(&DefinitionId::new("missing"));
        assert!(matches!(
            result.unwrap_err().kind(),
            ErrorKind::NotFound(_)
        ));
    }
}
