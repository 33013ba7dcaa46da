//! Type-erased shared values
//!
//! Property values and action payloads travel through the graph as
//! [`Value`]s: an `Arc` of the concrete value plus its type identity.
//! Propagation to child properties clones the `Arc`, never the value.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Value {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Value {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Identity of the concrete stored type
    pub fn type_id(&self) -> TypeId {
        Any::type_id(&*self.inner)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.type_id() == TypeId::of::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Clone the concrete value out
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// True when both values share one allocation
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value<{}>", self.type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_downcast() {
        let v = Value::new(42i32);
        assert!(v.is::<i32>());
        assert!(!v.is::<i64>());
        assert_eq!(v.get::<i32>(), Some(42));
        assert_eq!(v.get::<String>(), None);
    }

    #[test]
    fn test_value_type_id_is_concrete() {
        let v = Value::new(String::from("x"));
        assert_eq!(v.type_id(), TypeId::of::<String>());
        assert!(v.type_name().ends_with("String"));
    }

    #[test]
    fn test_clone_shares_allocation() {
        let a = Value::new(vec![1u8, 2, 3]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Value::new(vec![1u8, 2, 3])));
    }
}
