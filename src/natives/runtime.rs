//! Runtime introspection natives: type, assert, id, hash, is_instance

use super::{arity_error, NativeCtx, NativeRegistry};
use crate::error::RuntimeError;
use crate::value::{display_value, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn native_type(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("type", "1", args.len()));
    }
    Ok(Value::str(args[0].type_name(ctx.heap)))
}

/// Raise AssertionError when the condition is falsy; otherwise pass the
/// condition value through.
fn native_assert(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(arity_error("assert", "1-2", args.len()));
    }
    if args[0].is_truthy(ctx.heap) {
        return Ok(args[0].clone());
    }
    let message = match args.get(1) {
        Some(value) => display_value(value, ctx.heap),
        None => "Assertion failed".to_string(),
    };
    Err(RuntimeError::assertion(message))
}

/// Identity: heap objects report their allocation identity; immediates get
/// a stable value-derived number.
fn native_id(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("id", "1", args.len()));
    }
    if let Some(heap_id) = args[0].heap_id() {
        if let Some(object) = ctx.heap.get(heap_id) {
            return Ok(Value::Int(object.identity as i64));
        }
    }
    hash_value("id", &args[0])
}

fn native_hash(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("hash", "1", args.len()));
    }
    if args[0].heap_id().is_some() {
        return Err(RuntimeError::type_error(format!(
            "hash: unhashable type '{}'",
            args[0].type_name(ctx.heap)
        )));
    }
    hash_value("hash", &args[0])
}

fn hash_value(name: &str, value: &Value) -> Result<Value, RuntimeError> {
    let mut hasher = DefaultHasher::new();
    match value {
        Value::Int(n) => n.hash(&mut hasher),
        Value::Float(n) => n.to_bits().hash(&mut hasher),
        Value::Bool(b) => b.hash(&mut hasher),
        Value::Str(s) => s.hash(&mut hasher),
        Value::Null => 0u8.hash(&mut hasher),
        Value::Bytes(b) => b.hash(&mut hasher),
        Value::Native(n) => n.hash(&mut hasher),
        Value::Function(c) => c.function.hash(&mut hasher),
        Value::Error(e) => {
            e.kind.hash(&mut hasher);
            e.message.hash(&mut hasher);
        }
        _ => return Err(RuntimeError::type_error(format!("{name}: unhashable type"))),
    }
    Ok(Value::Int(hasher.finish() as i64))
}

/// Compare a value's type name (class name for instances) to a string.
fn native_is_instance(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("is_instance", "2", args.len()));
    }
    let expected = match &args[1] {
        Value::Str(s) => s.to_string(),
        other => return Err(super::type_error("is_instance", "a type name", other, ctx.heap)),
    };
    Ok(Value::Bool(args[0].type_name(ctx.heap) == expected))
}

pub fn register(registry: &mut NativeRegistry) {
    registry.define("type", native_type);
    registry.define("assert", native_assert);
    registry.define("id", native_id);
    registry.define("hash", native_hash);
    registry.define("is_instance", native_is_instance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeErrorKind;
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
    fn test_type_names() {
        with_ctx(|ctx| {
            assert_eq!(native_type(ctx, &[Value::Int(1)]).unwrap(), Value::str("Int"));
            assert_eq!(
                native_type(ctx, &[Value::str("x")]).unwrap(),
                Value::str("String")
            );
            let id = ctx.heap.alloc_list(vec![]);
            assert_eq!(
                native_type(ctx, &[Value::List(id)]).unwrap(),
                Value::str("List")
            );
            let instance = ctx.heap.alloc_instance("Point");
            assert_eq!(
                native_type(ctx, &[Value::Instance(instance)]).unwrap(),
                Value::str("Point")
            );
        });
    }

    #[test]
    fn test_assert_passes_and_fails() {
        with_ctx(|ctx| {
            assert_eq!(
                native_assert(ctx, &[Value::Int(5)]).unwrap(),
                Value::Int(5)
            );
            let err =
                native_assert(ctx, &[Value::Bool(false), Value::str("boom")]).unwrap_err();
            assert_eq!(err.kind, RuntimeErrorKind::Assertion);
            assert_eq!(err.message, "boom");
        });
    }

    #[test]
    fn test_id_is_stable_per_object() {
        with_ctx(|ctx| {
            let a = Value::List(ctx.heap.alloc_list(vec![]));
            let b = Value::List(ctx.heap.alloc_list(vec![]));
            let id_a = native_id(ctx, &[a.clone()]).unwrap();
            let id_a_again = native_id(ctx, &[a]).unwrap();
            let id_b = native_id(ctx, &[b]).unwrap();
            assert_eq!(id_a, id_a_again);
            assert_ne!(id_a, id_b);
        });
    }

    #[test]
    fn test_hash_rejects_collections() {
        with_ctx(|ctx| {
            assert!(native_hash(ctx, &[Value::Int(5)]).is_ok());
            assert!(native_hash(ctx, &[Value::str("s")]).is_ok());
            let id = ctx.heap.alloc_list(vec![]);
            assert!(native_hash(ctx, &[Value::List(id)]).is_err());
        });
    }

    #[test]
    fn test_is_instance() {
        with_ctx(|ctx| {
            assert_eq!(
                native_is_instance(ctx, &[Value::Int(1), Value::str("Int")]).unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                native_is_instance(ctx, &[Value::Int(1), Value::str("Float")]).unwrap(),
                Value::Bool(false)
            );
            let instance = ctx.heap.alloc_instance("Dog");
            assert_eq!(
                native_is_instance(ctx, &[Value::Instance(instance), Value::str("Dog")]).unwrap(),
                Value::Bool(true)
            );
        });
    }
}
