//! Output propagation from child stacks into the parent namespace.
//!
//! Each child's outputs land under `<logical_name>_outputs`, so outputs of
//! different regions never collide. Ordering follows child declaration order.

use crate::error::{Result, StratusError};
use crate::types::{Outputs, RemoteStackHandle};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Merged parent outputs, in child declaration order.
pub type ParentOutputs = IndexMap<String, serde_json::Value>;

/// Suffix appended to a child's logical name to form its parent output key.
pub const OUTPUT_KEY_SUFFIX: &str = "_outputs";

/// How a child's outputs are turned into the value stored in the parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputProjection {
    /// The child's whole output map, as a JSON object
    #[default]
    Full,

    /// A single named output of the child (`null` when the child lacks it)
    Key(String),
}

/// Deterministic merge of per-child outputs.
#[derive(Debug, Clone, Default)]
pub struct StackOutputAggregator {
    projection: OutputProjection,
}

impl StackOutputAggregator {
    pub fn new(projection: OutputProjection) -> Self {
        Self { projection }
    }

    /// Parent output key for a child (`stack_one` -> `stack_one_outputs`).
    pub fn output_key(logical_name: &str) -> String {
        format!("{logical_name}{OUTPUT_KEY_SUFFIX}")
    }

    /// Value stored in the parent for one child's outputs.
    pub fn project(&self, outputs: &Outputs) -> serde_json::Value {
        match &self.projection {
            OutputProjection::Full => serde_json::Value::Object(
                outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ),
            OutputProjection::Key(key) => {
                outputs.get(key).cloned().unwrap_or(serde_json::Value::Null)
            }
        }
    }

    /// Merge the outputs of `children` in the order given.
    ///
    /// Callers decide whether the children are complete; this only merges.
    pub fn aggregate(&self, children: &[RemoteStackHandle]) -> Result<ParentOutputs> {
        let mut merged = ParentOutputs::with_capacity(children.len());

        for child in children {
            let key = Self::output_key(&child.logical_name);
            if merged.contains_key(&key) {
                return Err(StratusError::DuplicateOutputKey { key });
            }
            merged.insert(key, self.project(&child.outputs));
        }

        Ok(merged)
    }
}
