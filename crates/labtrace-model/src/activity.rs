//! Activities: the executions that generate and consume entities.
//!
//! An operation is one execution of a named operation type. A job groups
//! operations that executed together on shared lab automation and stands in
//! as a generator when no single operation can be blamed. A plan is the
//! top-level workflow execution being traced.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attributes::Attributes;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationType {
    pub id: String,
    pub category: String,
    /// Dispatch key: every heuristic repair rule matches on this name.
    pub name: String,
}

/// An argument of an operation: either a scalar parameter or a reference to
/// an item, collection, or part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationArgument {
    Parameter {
        name: String,
        field_value_id: String,
        value: Value,
    },
    Input {
        name: String,
        field_value_id: String,
        item_id: String,
        /// Lab-declared grouping key correlating inputs with outputs of the
        /// same operation; the primary raw derivation signal.
        routing_id: Option<String>,
    },
}

impl OperationArgument {
    pub fn name(&self) -> &str {
        match self {
            OperationArgument::Parameter { name, .. } => name,
            OperationArgument::Input { name, .. } => name,
        }
    }

    pub fn is_item(&self) -> bool {
        matches!(self, OperationArgument::Input { .. })
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            OperationArgument::Input { item_id, .. } => Some(item_id),
            OperationArgument::Parameter { .. } => None,
        }
    }

    pub fn routing_id(&self) -> Option<&str> {
        match self {
            OperationArgument::Input { routing_id, .. } => routing_id.as_deref(),
            OperationArgument::Parameter { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            OperationArgument::Parameter { value, .. } => Some(value),
            OperationArgument::Input { .. } => None,
        }
    }

    /// Parameter value as a string, for rules that parse argument text.
    pub fn value_str(&self) -> Option<&str> {
        self.value().and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationActivity {
    pub operation_id: String,
    pub operation_type: OperationType,
    pub job_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Ordered, multi-valued, keyed by argument name.
    pub inputs: IndexMap<String, Vec<OperationArgument>>,
    pub outputs: IndexMap<String, Vec<OperationArgument>>,
    pub attributes: Attributes,
}

impl OperationActivity {
    pub fn new(operation_id: impl Into<String>, operation_type: OperationType) -> Self {
        Self {
            operation_id: operation_id.into(),
            operation_type,
            job_id: None,
            start_time: None,
            end_time: None,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn add_input(&mut self, argument: OperationArgument) {
        self.inputs
            .entry(argument.name().to_string())
            .or_default()
            .push(argument);
    }

    pub fn add_output(&mut self, argument: OperationArgument) {
        self.outputs
            .entry(argument.name().to_string())
            .or_default()
            .push(argument);
    }

    pub fn get_inputs(&self) -> impl Iterator<Item = &OperationArgument> {
        self.inputs.values().flatten()
    }

    pub fn get_outputs(&self) -> impl Iterator<Item = &OperationArgument> {
        self.outputs.values().flatten()
    }

    /// Input arguments that reference an item, collection, or part.
    pub fn input_items(&self) -> impl Iterator<Item = &OperationArgument> {
        self.get_inputs().filter(|arg| arg.is_item())
    }

    pub fn has_input_item(&self, item_id: &str) -> bool {
        self.input_items().any(|arg| arg.item_id() == Some(item_id))
    }

    pub fn named_inputs(&self, name: &str) -> &[OperationArgument] {
        self.inputs.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn named_outputs(&self, name: &str) -> &[OperationArgument] {
        self.outputs.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn type_name(&self) -> &str {
        &self.operation_type.name
    }

    pub fn is_measurement(&self) -> bool {
        self.attributes
            .get("measurement_operation")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn activity_id(&self) -> String {
        format!("op_{}", self.operation_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobActivity {
    pub job_id: String,
    pub operation_ids: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: String,
}

impl JobActivity {
    pub fn activity_id(&self) -> String {
        format!("job_{}", self.job_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanActivity {
    pub plan_id: String,
    pub name: String,
    pub status: String,
    pub operation_ids: Vec<String>,
    pub attributes: Attributes,
}
