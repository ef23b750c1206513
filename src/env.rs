// ABOUTME: Runtime scope chain for variable bindings, shared with closures

use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One scope in the chain. Frames hold the innermost scope of their call;
/// closures keep the defining scope alive through the `parent` link.
#[derive(Debug, Default)]
pub struct Scope {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    /// Creates a root scope with no parent (the global scope).
    pub fn new() -> Rc<Self> {
        Rc::new(Scope::default())
    }

    /// Creates a child scope chained to a parent.
    pub fn with_parent(parent: Rc<Scope>) -> Rc<Self> {
        Rc::new(Scope {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent),
        })
    }

    /// Defines a binding in THIS scope without walking the chain.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Looks a name up through the chain.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.bindings.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// Updates an existing binding somewhere in the chain. Returns false if
    /// the name is bound nowhere.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        if self.bindings.borrow().contains_key(name) {
            self.bindings.borrow_mut().insert(name.to_string(), value);
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }

    pub fn parent(&self) -> Option<&Rc<Scope>> {
        self.parent.as_ref()
    }

    /// Snapshot of the local bindings, used for GC root enumeration.
    pub fn values(&self) -> Vec<Value> {
        self.bindings.borrow().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let scope = Scope::new();
        scope.define("x", Value::Int(42));
        assert_eq!(scope.get("x"), Some(Value::Int(42)));
        assert_eq!(scope.get("missing"), None);
    }

    #[test]
    fn test_shadowing_and_parent_lookup() {
        let parent = Scope::new();
        parent.define("x", Value::Int(1));
        parent.define("y", Value::Int(2));

        let child = Scope::with_parent(parent);
        child.define("x", Value::Int(10));

        assert_eq!(child.get("x"), Some(Value::Int(10)));
        assert_eq!(child.get("y"), Some(Value::Int(2)));
    }

    #[test]
    fn test_assign_walks_the_chain() {
        let parent = Scope::new();
        parent.define("x", Value::Int(1));
        let child = Scope::with_parent(parent.clone());

        assert!(child.assign("x", Value::Int(5)));
        assert_eq!(parent.get("x"), Some(Value::Int(5)));
        assert!(!child.assign("unknown", Value::Null));
    }
}
