//! SBOL document mapping.
//!
//! Maps each item to an SBOL component definition, each non-job generator
//! to an SBOL activity, and operation inputs to usage edges. The serialized
//! document is handed to the external SBOL toolchain.
//!
//! Known gaps, preserved deliberately: job generators and
//! measurement-derived files are not represented.

use indexmap::IndexMap;
use labtrace_build::{TraceVisitor, VisitCx};
use labtrace_model::{ActivityRef, Entity};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ComponentDefinition {
    pub display_id: String,
    pub identity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub was_generated_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub display_id: String,
    pub entity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SbolActivity {
    pub display_id: String,
    pub identity: String,
    pub usages: Vec<Usage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SbolDocument {
    pub namespace: String,
    pub component_definitions: IndexMap<String, ComponentDefinition>,
    pub activities: IndexMap<String, SbolActivity>,
}

impl SbolDocument {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            component_definitions: IndexMap::new(),
            activities: IndexMap::new(),
        }
    }

    fn identity(&self, display_id: &str) -> String {
        format!("{}/{}", self.namespace, display_id)
    }

    fn component(&mut self, item_id: &str) -> &mut ComponentDefinition {
        let display_id = format!("item_{}", item_id);
        let identity = self.identity(&display_id);
        self.component_definitions
            .entry(display_id.clone())
            .or_insert(ComponentDefinition {
                display_id,
                identity,
                was_generated_by: None,
            })
    }

    fn activity(&mut self, operation_id: &str) -> &mut SbolActivity {
        let display_id = format!("operation_{}", operation_id);
        let identity = self.identity(&display_id);
        self.activities.entry(display_id.clone()).or_insert(SbolActivity {
            display_id,
            identity,
            usages: Vec::new(),
        })
    }
}

/// Builds an [`SbolDocument`] from a trace. Apply over the trace and take
/// the document with [`SbolVisitor::into_document`].
pub struct SbolVisitor {
    document: SbolDocument,
}

impl SbolVisitor {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            document: SbolDocument::new(namespace),
        }
    }

    pub fn into_document(self) -> SbolDocument {
        self.document
    }
}

impl TraceVisitor for SbolVisitor {
    fn visit_item(&mut self, cx: &mut VisitCx<'_>, item_id: &str) {
        let Some(item) = cx.trace.get_item(item_id) else {
            return;
        };
        let generator = item.provenance().generator.clone();
        self.document.component(item_id);
        // job generators are not represented yet
        if let Some(ActivityRef::Operation(operation_id)) = generator {
            let identity = self
                .document
                .identity(&format!("operation_{}", operation_id));
            self.document.component(item_id).was_generated_by = Some(identity);
        }
    }

    fn visit_operation(&mut self, cx: &mut VisitCx<'_>, operation_id: &str) {
        let Some(operation) = cx.trace.get_operation(operation_id) else {
            return;
        };
        let input_ids: Vec<String> = operation
            .input_items()
            .filter_map(|arg| arg.item_id().map(str::to_string))
            .filter(|item_id| {
                cx.trace
                    .get_item(item_id)
                    .map(Entity::is_item)
                    .unwrap_or(false)
            })
            .collect();
        for item_id in input_ids {
            let entity = self.document.component(&item_id).identity.clone();
            let usage = Usage {
                display_id: format!("usage_{}", item_id),
                entity,
            };
            let activity = self.document.activity(operation_id);
            if !activity.usages.iter().any(|u| u.display_id == usage.display_id) {
                activity.usages.push(usage);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labtrace_build::{apply_visitor, NullResolver};
    use labtrace_model::{
        ItemEntity, OperationActivity, OperationArgument, OperationType, Trace,
    };

    #[test]
    fn items_and_usages_map_to_sbol() {
        let mut trace = Trace::new("x");
        let mut item = ItemEntity::new("100", None, None);
        item.provenance
            .add_generator(ActivityRef::Operation("op1".to_string()));
        trace.add_item(Entity::Item(item));
        let mut operation = OperationActivity::new(
            "op1",
            OperationType {
                id: "1".to_string(),
                category: "c".to_string(),
                name: "Transfer".to_string(),
            },
        );
        operation.add_input(OperationArgument::Input {
            name: "in".to_string(),
            field_value_id: "9".to_string(),
            item_id: "100".to_string(),
            routing_id: None,
        });
        trace.add_operation(operation);

        let mut visitor = SbolVisitor::new("https://lab.example/traces");
        let mut resolver = NullResolver;
        apply_visitor(&mut trace, &mut resolver, &mut visitor);
        let document = visitor.into_document();

        let component = document.component_definitions.get("item_100").unwrap();
        assert_eq!(
            component.was_generated_by.as_deref(),
            Some("https://lab.example/traces/operation_op1")
        );
        let activity = document.activities.get("operation_op1").unwrap();
        assert_eq!(activity.usages.len(), 1);
        assert_eq!(
            activity.usages[0].entity,
            "https://lab.example/traces/item_100"
        );
    }
}
