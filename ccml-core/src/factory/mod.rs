//! Config-driven object factory — descriptors, the registry, and pipeline nodes.

pub mod descriptor;
pub mod registry;

pub use descriptor::{DottedPath, ObjectDescriptor, Params, from_params};
pub use registry::{Constructor, Instance, Member, ObjectRegistry, Resolved, SharedValue};

use crate::error::Result;
use serde_json::Value;
use std::collections::BTreeMap;

/// A single value produced by a pipeline node.
#[derive(Debug)]
pub enum NodeValue {
    Object(Resolved),
    List(Vec<Resolved>),
}

/// Named outputs of a pipeline node.
pub type NodeOutput = BTreeMap<String, NodeValue>;

/// Resolve a descriptor and wrap the result under `"class"`.
pub fn init_object_node(registry: &ObjectRegistry, descriptor: &Value) -> Result<NodeOutput> {
    let obj = registry.resolve_value(descriptor)?;
    Ok(NodeOutput::from([("class".to_string(), NodeValue::Object(obj))]))
}
