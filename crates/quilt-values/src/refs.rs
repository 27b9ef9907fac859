use quilt_hash::Address;

use crate::types::Type;
use crate::value::Value;

/// A typed reference to another value.
///
/// A ref carries the target's address, its type, and its height in the
/// ref graph: 1 for a target that contains no refs, otherwise one more
/// than the tallest ref reachable inside the target. Height is computed
/// at construction and bounds DAG traversals (ancestor search pops the
/// taller frontier first, so it can never loop).
#[derive(Clone, Debug, PartialEq)]
pub struct Ref {
    address: Address,
    target_type: Type,
    height: u64,
}

impl Ref {
    /// A ref to an in-memory value, deriving type and height from it.
    pub fn to_value(value: &Value) -> Self {
        Self {
            address: value.address(),
            target_type: value.type_of(),
            height: 1 + value.max_ref_height(),
        }
    }

    /// A ref to an in-memory value with an explicitly chosen target
    /// type. Used where the derived type must be closed over a cycle,
    /// e.g. refs to commits.
    pub fn to_value_with_type(value: &Value, target_type: Type) -> Self {
        Self {
            address: value.address(),
            target_type,
            height: 1 + value.max_ref_height(),
        }
    }

    /// Reassemble a ref from its encoded parts.
    pub fn from_parts(address: Address, target_type: Type, height: u64) -> Self {
        Self {
            address,
            target_type,
            height,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn target_type(&self) -> &Type {
        &self.target_type
    }

    pub fn height(&self) -> u64 {
        self.height
    }
}
