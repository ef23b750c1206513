//! Collection natives: range, push, pop, insert, remove, sort, reverse,
//! keys, values, entries, contains_key, merge, clone, deep_clone, clear
//!
//! Mutating natives (push, pop, insert, remove, clear) work in place;
//! sort and reverse return fresh lists.

use super::{arity_error, type_error, want_dict, want_int, want_list, NativeCtx, NativeRegistry};
use crate::error::RuntimeError;
use crate::heap::{Heap, HeapData};
use crate::value::{values_equal, Value};
use indexmap::IndexMap;

/// `range(start, stop)` or `range(start, stop, step)`, end-exclusive.
fn native_range(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() < 2 || args.len() > 3 {
        return Err(arity_error("range", "2-3", args.len()));
    }
    let start = want_int("range", args, 0, ctx.heap)?;
    let stop = want_int("range", args, 1, ctx.heap)?;
    let step = if args.len() == 3 {
        want_int("range", args, 2, ctx.heap)?
    } else {
        1
    };
    if step == 0 {
        return Err(RuntimeError::type_error("range: step must not be zero"));
    }
    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        current += step;
    }
    Ok(Value::List(ctx.heap.alloc_list(items)))
}

/// Append and return the list itself, so pushes chain.
fn native_push(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("push", "2", args.len()));
    }
    let id = want_list("push", args, 0, ctx.heap)?;
    ctx.heap
        .list_mut(id)
        .expect("checked list")
        .push(args[1].clone());
    Ok(args[0].clone())
}

fn native_pop(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("pop", "1", args.len()));
    }
    let id = want_list("pop", args, 0, ctx.heap)?;
    ctx.heap
        .list_mut(id)
        .expect("checked list")
        .pop()
        .ok_or_else(|| RuntimeError::index_error("pop: list is empty"))
}

fn native_insert(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 3 {
        return Err(arity_error("insert", "3", args.len()));
    }
    let id = want_list("insert", args, 0, ctx.heap)?;
    let index = want_int("insert", args, 1, ctx.heap)?;
    let items = ctx.heap.list_mut(id).expect("checked list");
    if index < 0 || index as usize > items.len() {
        return Err(RuntimeError::index_error(format!(
            "insert: index {index} out of range for length {}",
            items.len()
        )));
    }
    items.insert(index as usize, args[2].clone());
    Ok(args[0].clone())
}

/// Remove the first element equal to the argument.
fn native_remove(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("remove", "2", args.len()));
    }
    let id = want_list("remove", args, 0, ctx.heap)?;
    let items = ctx.heap.list(id).cloned().unwrap_or_default();
    let position = items
        .iter()
        .position(|item| values_equal(item, &args[1], ctx.heap));
    match position {
        Some(index) => {
            ctx.heap.list_mut(id).expect("checked list").remove(index);
            Ok(args[0].clone())
        }
        None => Err(RuntimeError::type_error("remove: value not in list")),
    }
}

/// A sorted copy; elements must be mutually ordered numbers or strings.
fn native_sort(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("sort", "1", args.len()));
    }
    let id = want_list("sort", args, 0, ctx.heap)?;
    let mut items = ctx.heap.list(id).cloned().unwrap_or_default();

    let mut failure: Option<RuntimeError> = None;
    items.sort_by(|a, b| match order(a, b) {
        Some(ordering) => ordering,
        None => {
            if failure.is_none() {
                failure = Some(RuntimeError::type_error("sort: values are not comparable"));
            }
            std::cmp::Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(Value::List(ctx.heap.alloc_list(items)))
}

fn order(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        _ => None,
    }
}

/// A reversed copy.
fn native_reverse(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("reverse", "1", args.len()));
    }
    let id = want_list("reverse", args, 0, ctx.heap)?;
    let mut items = ctx.heap.list(id).cloned().unwrap_or_default();
    items.reverse();
    Ok(Value::List(ctx.heap.alloc_list(items)))
}

fn native_keys(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("keys", "1", args.len()));
    }
    let id = want_dict("keys", args, 0, ctx.heap)?;
    let keys: Vec<Value> = ctx
        .heap
        .dict(id)
        .map(|entries| entries.keys().map(Value::str).collect())
        .unwrap_or_default();
    Ok(Value::List(ctx.heap.alloc_list(keys)))
}

fn native_values(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("values", "1", args.len()));
    }
    let id = want_dict("values", args, 0, ctx.heap)?;
    let values: Vec<Value> = ctx
        .heap
        .dict(id)
        .map(|entries| entries.values().cloned().collect())
        .unwrap_or_default();
    Ok(Value::List(ctx.heap.alloc_list(values)))
}

/// List of `[key, value]` pairs in insertion order.
fn native_entries(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("entries", "1", args.len()));
    }
    let id = want_dict("entries", args, 0, ctx.heap)?;
    let pairs: Vec<(String, Value)> = ctx
        .heap
        .dict(id)
        .map(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    let items: Vec<Value> = pairs
        .into_iter()
        .map(|(k, v)| Value::List(ctx.heap.alloc_list(vec![Value::str(k), v])))
        .collect();
    Ok(Value::List(ctx.heap.alloc_list(items)))
}

fn native_contains_key(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("contains_key", "2", args.len()));
    }
    let id = want_dict("contains_key", args, 0, ctx.heap)?;
    let key = match &args[1] {
        Value::Str(s) => s.to_string(),
        other => return Err(type_error("contains_key", "a string key", other, ctx.heap)),
    };
    let present = ctx
        .heap
        .dict(id)
        .map(|entries| entries.contains_key(&key))
        .unwrap_or(false);
    Ok(Value::Bool(present))
}

/// New dict with the second dict's entries layered over the first's.
fn native_merge(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("merge", "2", args.len()));
    }
    let first = want_dict("merge", args, 0, ctx.heap)?;
    let second = want_dict("merge", args, 1, ctx.heap)?;
    let mut merged: IndexMap<String, Value> = ctx.heap.dict(first).cloned().unwrap_or_default();
    for (key, value) in ctx.heap.dict(second).cloned().unwrap_or_default() {
        merged.insert(key, value);
    }
    Ok(Value::Dict(ctx.heap.alloc_dict(merged)))
}

/// Shallow copy; primitives pass through unchanged.
fn native_clone(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("clone", "1", args.len()));
    }
    Ok(shallow_clone(&args[0], ctx.heap))
}

fn shallow_clone(value: &Value, heap: &mut Heap) -> Value {
    match value {
        Value::List(id) => {
            let items = heap.list(*id).cloned().unwrap_or_default();
            Value::List(heap.alloc_list(items))
        }
        Value::Dict(id) => {
            let entries = heap.dict(*id).cloned().unwrap_or_default();
            Value::Dict(heap.alloc_dict(entries))
        }
        Value::Set(id) => {
            let items = match heap.get(*id).map(|o| &o.data) {
                Some(HeapData::Set(items)) => items.clone(),
                _ => Vec::new(),
            };
            Value::Set(heap.alloc_set(items))
        }
        other => other.clone(),
    }
}

fn native_deep_clone(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("deep_clone", "1", args.len()));
    }
    Ok(deep_clone(&args[0], ctx.heap))
}

pub(crate) fn deep_clone(value: &Value, heap: &mut Heap) -> Value {
    match value {
        Value::List(id) => {
            let items = heap.list(*id).cloned().unwrap_or_default();
            let cloned: Vec<Value> = items.iter().map(|item| deep_clone(item, heap)).collect();
            Value::List(heap.alloc_list(cloned))
        }
        Value::Dict(id) => {
            let entries = heap.dict(*id).cloned().unwrap_or_default();
            let cloned: IndexMap<String, Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), deep_clone(v, heap)))
                .collect();
            Value::Dict(heap.alloc_dict(cloned))
        }
        Value::Set(id) => {
            let items = match heap.get(*id).map(|o| &o.data) {
                Some(HeapData::Set(items)) => items.clone(),
                _ => Vec::new(),
            };
            let cloned: Vec<Value> = items.iter().map(|item| deep_clone(item, heap)).collect();
            Value::Set(heap.alloc_set(cloned))
        }
        other => other.clone(),
    }
}

/// Empty the collection in place.
fn native_clear(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("clear", "1", args.len()));
    }
    let id = match &args[0] {
        Value::List(id) | Value::Dict(id) | Value::Set(id) => *id,
        other => return Err(type_error("clear", "a collection", other, ctx.heap)),
    };
    if let Some(object) = ctx.heap.get_mut(id) {
        match &mut object.data {
            HeapData::List(items) | HeapData::Set(items) => items.clear(),
            HeapData::Dict(entries) => entries.clear(),
            HeapData::Instance { fields, .. } => fields.clear(),
        }
    }
    Ok(Value::Null)
}

pub fn register(registry: &mut NativeRegistry) {
    registry.define("range", native_range);
    registry.define("push", native_push);
    registry.define("pop", native_pop);
    registry.define("insert", native_insert);
    registry.define("remove", native_remove);
    registry.define("sort", native_sort);
    registry.define("reverse", native_reverse);
    registry.define("keys", native_keys);
    registry.define("values", native_values);
    registry.define("entries", native_entries);
    registry.define("contains_key", native_contains_key);
    registry.define("merge", native_merge);
    registry.define("clone", native_clone);
    registry.define("deep_clone", native_deep_clone);
    registry.define("clear", native_clear);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn with_ctx<R>(f: impl FnOnce(&mut NativeCtx<'_>) -> R) -> R {
        let mut heap = Heap::new(usize::MAX);
        let mut out: Vec<u8> = Vec::new();
        let mut ctx = NativeCtx {
            heap: &mut heap,
            out: &mut out,
        };
        f(&mut ctx)
    }

    #[test]
    fn test_range_forward_and_step() {
        with_ctx(|ctx| {
            let result = native_range(ctx, &[Value::Int(0), Value::Int(5)]).unwrap();
            let id = result.heap_id().unwrap();
            assert_eq!(ctx.heap.list(id).unwrap().len(), 5);

            let result =
                native_range(ctx, &[Value::Int(10), Value::Int(0), Value::Int(-3)]).unwrap();
            let items = ctx.heap.list(result.heap_id().unwrap()).unwrap();
            assert_eq!(
                items,
                &vec![Value::Int(10), Value::Int(7), Value::Int(4), Value::Int(1)]
            );

            assert!(native_range(ctx, &[Value::Int(0), Value::Int(3), Value::Int(0)]).is_err());
        });
    }

    #[test]
    fn test_push_pop_insert_remove() {
        with_ctx(|ctx| {
            let id = ctx.heap.alloc_list(vec![Value::Int(1)]);
            let list = Value::List(id);
            native_push(ctx, &[list.clone(), Value::Int(2)]).unwrap();
            assert_eq!(ctx.heap.list(id).unwrap().len(), 2);

            native_insert(ctx, &[list.clone(), Value::Int(0), Value::Int(0)]).unwrap();
            assert_eq!(ctx.heap.list(id).unwrap()[0], Value::Int(0));

            assert_eq!(native_pop(ctx, &[list.clone()]).unwrap(), Value::Int(2));
            native_remove(ctx, &[list.clone(), Value::Int(0)]).unwrap();
            assert_eq!(ctx.heap.list(id).unwrap(), &vec![Value::Int(1)]);

            let empty = Value::List(ctx.heap.alloc_list(vec![]));
            assert!(native_pop(ctx, &[empty]).is_err());
            assert!(native_remove(ctx, &[list, Value::Int(99)]).is_err());
        });
    }

    #[test]
    fn test_sort_returns_new_list() {
        with_ctx(|ctx| {
            let id = ctx
                .heap
                .alloc_list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
            let sorted = native_sort(ctx, &[Value::List(id)]).unwrap();
            let sorted_id = sorted.heap_id().unwrap();
            assert_ne!(sorted_id, id);
            assert_eq!(
                ctx.heap.list(sorted_id).unwrap(),
                &vec![Value::Int(1), Value::Int(2), Value::Int(3)]
            );
            // Original untouched
            assert_eq!(ctx.heap.list(id).unwrap()[0], Value::Int(3));

            let mixed = ctx.heap.alloc_list(vec![Value::Int(1), Value::str("a")]);
            assert!(native_sort(ctx, &[Value::List(mixed)]).is_err());
        });
    }

    #[test]
    fn test_dict_views_preserve_order() {
        with_ctx(|ctx| {
            let mut entries = IndexMap::new();
            entries.insert("b".to_string(), Value::Int(2));
            entries.insert("a".to_string(), Value::Int(1));
            let dict = Value::Dict(ctx.heap.alloc_dict(entries));

            let keys = native_keys(ctx, &[dict.clone()]).unwrap();
            assert_eq!(
                ctx.heap.list(keys.heap_id().unwrap()).unwrap(),
                &vec![Value::str("b"), Value::str("a")]
            );

            let entries_list = native_entries(ctx, &[dict.clone()]).unwrap();
            let first = &ctx.heap.list(entries_list.heap_id().unwrap()).unwrap()[0];
            let pair = ctx.heap.list(first.heap_id().unwrap()).unwrap();
            assert_eq!(pair[0], Value::str("b"));
            assert_eq!(pair[1], Value::Int(2));

            assert_eq!(
                native_contains_key(ctx, &[dict.clone(), Value::str("a")]).unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                native_contains_key(ctx, &[dict, Value::str("z")]).unwrap(),
                Value::Bool(false)
            );
        });
    }

    #[test]
    fn test_merge_later_wins() {
        with_ctx(|ctx| {
            let mut left = IndexMap::new();
            left.insert("x".to_string(), Value::Int(1));
            left.insert("y".to_string(), Value::Int(2));
            let mut right = IndexMap::new();
            right.insert("y".to_string(), Value::Int(9));
            let a = Value::Dict(ctx.heap.alloc_dict(left));
            let b = Value::Dict(ctx.heap.alloc_dict(right));

            let merged = native_merge(ctx, &[a, b]).unwrap();
            let entries = ctx.heap.dict(merged.heap_id().unwrap()).unwrap();
            assert_eq!(entries["x"], Value::Int(1));
            assert_eq!(entries["y"], Value::Int(9));
        });
    }

    #[test]
    fn test_clone_is_shallow_deep_clone_is_not() {
        with_ctx(|ctx| {
            let inner = ctx.heap.alloc_list(vec![Value::Int(1)]);
            let outer = ctx.heap.alloc_list(vec![Value::List(inner)]);

            let shallow = native_clone(ctx, &[Value::List(outer)]).unwrap();
            let shallow_inner = ctx.heap.list(shallow.heap_id().unwrap()).unwrap()[0]
                .heap_id()
                .unwrap();
            assert_eq!(shallow_inner, inner);

            let deep = native_deep_clone(ctx, &[Value::List(outer)]).unwrap();
            let deep_inner = ctx.heap.list(deep.heap_id().unwrap()).unwrap()[0]
                .heap_id()
                .unwrap();
            assert_ne!(deep_inner, inner);
        });
    }

    #[test]
    fn test_clear_empties_in_place() {
        with_ctx(|ctx| {
            let id = ctx.heap.alloc_list(vec![Value::Int(1), Value::Int(2)]);
            assert_eq!(
                native_clear(ctx, &[Value::List(id)]).unwrap(),
                Value::Null
            );
            assert!(ctx.heap.list(id).unwrap().is_empty());
        });
    }
}
