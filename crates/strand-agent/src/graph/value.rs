use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

/// A value flowing between nodes, with its concrete type erased.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Bound for every node input/output type.
pub trait GraphValue: Any + Clone + Debug + Send + Sync {}

impl<T: Any + Clone + Debug + Send + Sync> GraphValue for T {}

/// Runtime type tag of a node input or output.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
    describe: fn(&Value) -> String,
}

impl TypeTag {
    pub fn of<T: GraphValue>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            describe: describe_as::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether `value` holds exactly this type.
    pub fn matches(&self, value: &Value) -> bool {
        (**value).type_id() == self.id
    }

    /// Debug rendering of a value of this type.
    pub fn describe(&self, value: &Value) -> String {
        (self.describe)(value)
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Debug for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

fn describe_as<T: GraphValue>(value: &Value) -> String {
    match value.downcast_ref::<T>() {
        Some(v) => format!("{:?}", v),
        None => "<value of another type>".to_string(),
    }
}

pub fn erase<T: GraphValue>(value: T) -> Value {
    Arc::new(value)
}

/// Take a typed value out, cloning only when the value is still shared.
pub fn downcast<T: GraphValue>(value: Value) -> Option<T> {
    value
        .downcast::<T>()
        .ok()
        .map(|arc| Arc::try_unwrap(arc).unwrap_or_else(|shared| (*shared).clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_inner_type_not_arc() {
        let v = erase("hello".to_string());
        assert!(TypeTag::of::<String>().matches(&v));
        assert!(!TypeTag::of::<u32>().matches(&v));
    }

    #[test]
    fn describe_uses_debug() {
        let v = erase(vec![1, 2]);
        assert_eq!(TypeTag::of::<Vec<i32>>().describe(&v), "[1, 2]");
        assert_eq!(
            TypeTag::of::<String>().describe(&v),
            "<value of another type>"
        );
    }

    #[test]
    fn downcast_shared_and_unique() {
        let v = erase(7u8);
        let shared = v.clone();
        assert_eq!(downcast::<u8>(v), Some(7));
        assert_eq!(downcast::<u8>(shared), Some(7));
        assert_eq!(downcast::<String>(erase(1u8)), None);
    }
}
