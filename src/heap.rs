// ABOUTME: Tracked object heap with mark-and-sweep collection

use crate::env::Scope;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::rc::Rc;

/// Stable handle to a heap slot. Objects never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(pub u32);

/// Payload of a heap object. Only composite values are heap-allocated; the
/// GC traces exactly these shapes.
#[derive(Debug, Clone)]
pub enum HeapData {
    List(Vec<Value>),
    Dict(IndexMap<String, Value>),
    Set(Vec<Value>),
    Instance {
        class: String,
        fields: IndexMap<String, Value>,
    },
}

impl HeapData {
    fn type_name(&self) -> String {
        match self {
            HeapData::List(_) => "List".to_string(),
            HeapData::Dict(_) => "Dict".to_string(),
            HeapData::Set(_) => "Set".to_string(),
            HeapData::Instance { class, .. } => class.clone(),
        }
    }

    /// Rough byte estimate used for the collection trigger.
    fn estimated_bytes(&self) -> usize {
        let base = std::mem::size_of::<HeapObject>();
        let per_value = std::mem::size_of::<Value>();
        match self {
            HeapData::List(items) | HeapData::Set(items) => base + items.len() * per_value,
            HeapData::Dict(entries) => {
                base + entries
                    .iter()
                    .map(|(k, _)| k.len() + per_value)
                    .sum::<usize>()
            }
            HeapData::Instance { fields, .. } => {
                base + fields
                    .iter()
                    .map(|(k, _)| k.len() + per_value)
                    .sum::<usize>()
            }
        }
    }

    fn children(&self) -> Vec<Value> {
        match self {
            HeapData::List(items) | HeapData::Set(items) => items.clone(),
            HeapData::Dict(entries) => entries.values().cloned().collect(),
            HeapData::Instance { fields, .. } => fields.values().cloned().collect(),
        }
    }
}

/// A tracked object: payload, type name, mark bit, and a stable identity
/// that survives for the object's lifetime (the `id` native).
#[derive(Debug, Clone)]
pub struct HeapObject {
    pub data: HeapData,
    pub type_name: String,
    pub marked: bool,
    pub identity: u64,
}

/// Point-in-time heap numbers, for tests and the GC trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub allocated_bytes: usize,
}

/// Result of one collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcCycle {
    pub freed: usize,
    pub live: usize,
}

/// Slot-arena heap. Freed slots are recycled; identities are not.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<HeapObject>>,
    free: Vec<u32>,
    allocated_bytes: usize,
    threshold: usize,
    next_identity: u64,
}

impl Heap {
    pub fn new(threshold: usize) -> Self {
        Heap {
            threshold,
            ..Default::default()
        }
    }

    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        let type_name = data.type_name();
        self.allocated_bytes += data.estimated_bytes();
        self.next_identity += 1;
        let object = HeapObject {
            data,
            type_name,
            marked: false,
            identity: self.next_identity,
        };
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(object);
                HeapId(slot)
            }
            None => {
                self.slots.push(Some(object));
                HeapId(self.slots.len() as u32 - 1)
            }
        }
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> HeapId {
        self.alloc(HeapData::List(items))
    }

    pub fn alloc_dict(&mut self, entries: IndexMap<String, Value>) -> HeapId {
        self.alloc(HeapData::Dict(entries))
    }

    pub fn alloc_set(&mut self, items: Vec<Value>) -> HeapId {
        self.alloc(HeapData::Set(items))
    }

    pub fn alloc_instance(&mut self, class: impl Into<String>) -> HeapId {
        self.alloc(HeapData::Instance {
            class: class.into(),
            fields: IndexMap::new(),
        })
    }

    pub fn get(&self, id: HeapId) -> Option<&HeapObject> {
        self.slots.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: HeapId) -> Option<&mut HeapObject> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
    }

    pub fn list(&self, id: HeapId) -> Option<&Vec<Value>> {
        match self.get(id).map(|o| &o.data) {
            Some(HeapData::List(items)) => Some(items),
            _ => None,
        }
    }

    pub fn list_mut(&mut self, id: HeapId) -> Option<&mut Vec<Value>> {
        match self.get_mut(id).map(|o| &mut o.data) {
            Some(HeapData::List(items)) => Some(items),
            _ => None,
        }
    }

    pub fn dict(&self, id: HeapId) -> Option<&IndexMap<String, Value>> {
        match self.get(id).map(|o| &o.data) {
            Some(HeapData::Dict(entries)) => Some(entries),
            _ => None,
        }
    }

    pub fn dict_mut(&mut self, id: HeapId) -> Option<&mut IndexMap<String, Value>> {
        match self.get_mut(id).map(|o| &mut o.data) {
            Some(HeapData::Dict(entries)) => Some(entries),
            _ => None,
        }
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_objects: self.slots.iter().filter(|slot| slot.is_some()).count(),
            allocated_bytes: self.allocated_bytes,
        }
    }

    /// Whether tracked bytes have crossed the collection threshold.
    pub fn should_collect(&self) -> bool {
        self.allocated_bytes > self.threshold
    }

    /// One mark-and-sweep cycle. Roots are the values directly reachable
    /// from the caller (frame temporaries, pinned values) plus whole scope
    /// chains (frame locals, globals). Marking traces through collection
    /// children and through closure-captured scopes.
    pub fn collect(
        &mut self,
        root_values: impl IntoIterator<Item = Value>,
        root_scopes: &[Rc<Scope>],
    ) -> GcCycle {
        for slot in self.slots.iter_mut().flatten() {
            slot.marked = false;
        }

        let mut value_worklist: Vec<Value> = root_values.into_iter().collect();
        let mut scope_worklist: Vec<Rc<Scope>> = root_scopes.to_vec();
        let mut seen_scopes: HashSet<*const Scope> = HashSet::new();

        loop {
            if let Some(scope) = scope_worklist.pop() {
                if seen_scopes.insert(Rc::as_ptr(&scope)) {
                    value_worklist.extend(scope.values());
                    if let Some(parent) = scope.parent() {
                        scope_worklist.push(parent.clone());
                    }
                }
                continue;
            }
            let value = match value_worklist.pop() {
                Some(value) => value,
                None => break,
            };
            if let Value::Function(closure) = &value {
                if let Some(env) = &closure.env {
                    scope_worklist.push(env.clone());
                }
                if let Some(receiver) = &closure.receiver {
                    value_worklist.push(receiver.clone());
                }
            }
            if let Some(id) = value.heap_id() {
                if let Some(object) = self.get_mut(id) {
                    if !object.marked {
                        object.marked = true;
                        value_worklist.extend(object.data.children());
                    }
                }
            }
        }

        let mut freed = 0;
        let mut live = 0;
        let mut live_bytes = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(object) if !object.marked => {
                    freed += 1;
                    *slot = None;
                    self.free.push(index as u32);
                }
                Some(object) => {
                    object.marked = false;
                    live += 1;
                    live_bytes += object.data.estimated_bytes();
                }
                None => {}
            }
        }
        self.allocated_bytes = live_bytes;
        GcCycle { freed, live }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_alloc_and_access() {
        let mut heap = Heap::new(usize::MAX);
        let id = heap.alloc_list(vec![Value::Int(1)]);
        assert_eq!(heap.list(id).unwrap().len(), 1);
        assert_eq!(heap.get(id).unwrap().type_name, "List");
    }

    #[test]
    fn test_identities_are_unique_across_slot_reuse() {
        let mut heap = Heap::new(usize::MAX);
        let a = heap.alloc_list(vec![]);
        let first_identity = heap.get(a).unwrap().identity;
        heap.collect([], &[]);
        let b = heap.alloc_list(vec![]);
        // Slot may be recycled, identity may not
        assert_ne!(heap.get(b).unwrap().identity, first_identity);
    }

    #[test]
    fn test_collect_frees_unreachable_keeps_reachable() {
        let mut heap = Heap::new(usize::MAX);
        let garbage = heap.alloc_list(vec![Value::Int(1)]);
        let kept_inner = heap.alloc_list(vec![Value::Int(2)]);
        let kept_outer = heap.alloc_list(vec![Value::List(kept_inner)]);

        let cycle = heap.collect([Value::List(kept_outer)], &[]);
        assert_eq!(cycle.freed, 1);
        assert_eq!(cycle.live, 2);
        assert!(heap.get(garbage).is_none());
        assert!(heap.get(kept_inner).is_some());
        assert!(heap.get(kept_outer).is_some());
    }

    #[test]
    fn test_collect_traces_through_scopes_and_closures() {
        let mut heap = Heap::new(usize::MAX);
        let in_scope = heap.alloc_list(vec![]);
        let in_closure = heap.alloc_list(vec![]);

        let global = Scope::new();
        global.define("xs", Value::List(in_scope));

        let captured = Scope::new();
        captured.define("hidden", Value::List(in_closure));
        let closure = Value::Function(Rc::new(crate::value::Closure {
            function: "lambda$0".to_string(),
            env: Some(captured),
            receiver: None,
        }));
        global.define("f", closure);

        let cycle = heap.collect([], &[global]);
        assert_eq!(cycle.freed, 0);
        assert!(heap.get(in_scope).is_some());
        assert!(heap.get(in_closure).is_some());
    }

    #[test]
    fn test_every_object_reachable_or_freed_after_cycle() {
        let mut heap = Heap::new(usize::MAX);
        let mut kept = Vec::new();
        for i in 0..20 {
            let id = heap.alloc_list(vec![Value::Int(i)]);
            if i % 2 == 0 {
                kept.push(Value::List(id));
            }
        }
        let cycle = heap.collect(kept.clone(), &[]);
        assert_eq!(cycle.freed, 10);
        assert_eq!(heap.stats().live_objects, 10);
        for value in &kept {
            assert!(heap.get(value.heap_id().unwrap()).is_some());
        }
    }
}
