//! Conversion natives: to_int, to_float, to_string, to_bool, to_list,
//! to_dict, to_hex, to_bin, parse_json, stringify_json
//!
//! JSON mapping: dict ↔ object, list ↔ array, int/float ↔ number,
//! string ↔ string, bool ↔ boolean, null ↔ null. Functions, natives and
//! instances cannot be encoded.

use super::{arity_error, type_error, want_int, NativeCtx, NativeRegistry};
use crate::error::RuntimeError;
use crate::heap::{Heap, HeapData};
use crate::value::{display_value, Value};
use indexmap::IndexMap;

fn native_to_int(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("to_int", "1", args.len()));
    }
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(n) => Ok(Value::Int(*n as i64)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(|n| Value::Int(n as i64))
            .map_err(|_| RuntimeError::type_error(format!("to_int: cannot convert {s:?}"))),
        other => Err(type_error("to_int", "a number or string", other, ctx.heap)),
    }
}

fn native_to_float(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("to_float", "1", args.len()));
    }
    match &args[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(n) => Ok(Value::Float(*n)),
        Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| RuntimeError::type_error(format!("to_float: cannot convert {s:?}"))),
        other => Err(type_error("to_float", "a number or string", other, ctx.heap)),
    }
}

fn native_to_string(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("to_string", "1", args.len()));
    }
    Ok(Value::str(display_value(&args[0], ctx.heap)))
}

fn native_to_bool(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("to_bool", "1", args.len()));
    }
    Ok(Value::Bool(args[0].is_truthy(ctx.heap)))
}

fn native_to_list(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("to_list", "1", args.len()));
    }
    let items: Vec<Value> = match &args[0] {
        Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
        Value::Bytes(b) => b.iter().map(|byte| Value::Int(*byte as i64)).collect(),
        Value::List(id) => ctx.heap.list(*id).cloned().unwrap_or_default(),
        Value::Set(id) => match ctx.heap.get(*id).map(|o| &o.data) {
            Some(HeapData::Set(items)) => items.clone(),
            _ => Vec::new(),
        },
        // A dict becomes its key list
        Value::Dict(id) => ctx
            .heap
            .dict(*id)
            .map(|entries| entries.keys().map(Value::str).collect())
            .unwrap_or_default(),
        other => return Err(type_error("to_list", "an iterable", other, ctx.heap)),
    };
    Ok(Value::List(ctx.heap.alloc_list(items)))
}

/// A dict from a dict (copy) or from a list of `[key, value]` pairs.
fn native_to_dict(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("to_dict", "1", args.len()));
    }
    match &args[0] {
        Value::Dict(id) => {
            let entries = ctx.heap.dict(*id).cloned().unwrap_or_default();
            Ok(Value::Dict(ctx.heap.alloc_dict(entries)))
        }
        Value::List(id) => {
            let pairs = ctx.heap.list(*id).cloned().unwrap_or_default();
            let mut entries = IndexMap::new();
            for pair in &pairs {
                let pair_items = pair
                    .heap_id()
                    .and_then(|pair_id| ctx.heap.list(pair_id).cloned());
                match pair_items.as_deref() {
                    Some([Value::Str(key), value]) => {
                        entries.insert(key.to_string(), value.clone());
                    }
                    _ => {
                        return Err(RuntimeError::type_error(
                            "to_dict: expected a list of [key, value] pairs",
                        ))
                    }
                }
            }
            Ok(Value::Dict(ctx.heap.alloc_dict(entries)))
        }
        other => Err(type_error("to_dict", "a dict or pair list", other, ctx.heap)),
    }
}

fn native_to_hex(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("to_hex", "1", args.len()));
    }
    let n = want_int("to_hex", args, 0, ctx.heap)?;
    let text = if n < 0 {
        format!("-0x{:x}", n.unsigned_abs())
    } else {
        format!("0x{n:x}")
    };
    Ok(Value::str(text))
}

fn native_to_bin(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("to_bin", "1", args.len()));
    }
    let n = want_int("to_bin", args, 0, ctx.heap)?;
    let text = if n < 0 {
        format!("-0b{:b}", n.unsigned_abs())
    } else {
        format!("0b{n:b}")
    };
    Ok(Value::str(text))
}

fn native_parse_json(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("parse_json", "1", args.len()));
    }
    let text = match &args[0] {
        Value::Str(s) => s,
        other => return Err(type_error("parse_json", "a string", other, ctx.heap)),
    };
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| RuntimeError::type_error(format!("parse_json: {e}")))?;
    Ok(json_to_value(&json, ctx.heap))
}

fn native_stringify_json(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("stringify_json", "1", args.len()));
    }
    let json = value_to_json(&args[0], ctx.heap)?;
    let text = serde_json::to_string(&json)
        .map_err(|e| RuntimeError::type_error(format!("stringify_json: {e}")))?;
    Ok(Value::str(text))
}

pub(crate) fn json_to_value(json: &serde_json::Value, heap: &mut Heap) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(|item| json_to_value(item, heap)).collect();
            Value::List(heap.alloc_list(values))
        }
        serde_json::Value::Object(object) => {
            let mut entries = IndexMap::new();
            for (key, value) in object {
                entries.insert(key.clone(), json_to_value(value, heap));
            }
            Value::Dict(heap.alloc_dict(entries))
        }
    }
}

pub(crate) fn value_to_json(
    value: &Value,
    heap: &Heap,
) -> Result<serde_json::Value, RuntimeError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Int(n) => Ok(serde_json::Value::Number((*n).into())),
        Value::Float(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                RuntimeError::type_error(format!("stringify_json: cannot encode {n}"))
            }),
        Value::Str(s) => Ok(serde_json::Value::String(s.to_string())),
        Value::List(id) | Value::Set(id) => {
            let items = match heap.get(*id).map(|o| &o.data) {
                Some(HeapData::List(items)) | Some(HeapData::Set(items)) => items.clone(),
                _ => Vec::new(),
            };
            let encoded: Result<Vec<_>, _> =
                items.iter().map(|item| value_to_json(item, heap)).collect();
            Ok(serde_json::Value::Array(encoded?))
        }
        Value::Dict(id) => {
            let mut object = serde_json::Map::new();
            if let Some(entries) = heap.dict(*id) {
                for (key, value) in entries {
                    object.insert(key.clone(), value_to_json(value, heap)?);
                }
            }
            Ok(serde_json::Value::Object(object))
        }
        other => Err(RuntimeError::type_error(format!(
            "stringify_json: cannot encode {}",
            other.type_name(heap)
        ))),
    }
}

pub fn register(registry: &mut NativeRegistry) {
    registry.define("to_int", native_to_int);
    registry.define("to_float", native_to_float);
    registry.define("to_string", native_to_string);
    registry.define("to_bool", native_to_bool);
    registry.define("to_list", native_to_list);
    registry.define("to_dict", native_to_dict);
    registry.define("to_hex", native_to_hex);
    registry.define("to_bin", native_to_bin);
    registry.define("parse_json", native_parse_json);
    registry.define("stringify_json", native_stringify_json);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;
    use crate::value::values_equal;

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
    fn test_to_int_family() {
        with_ctx(|ctx| {
            assert_eq!(
                native_to_int(ctx, &[Value::Float(3.9)]).unwrap(),
                Value::Int(3)
            );
            assert_eq!(
                native_to_int(ctx, &[Value::str("42")]).unwrap(),
                Value::Int(42)
            );
            assert_eq!(
                native_to_int(ctx, &[Value::str("3.5")]).unwrap(),
                Value::Int(3)
            );
            assert!(native_to_int(ctx, &[Value::str("nope")]).is_err());
        });
    }

    #[test]
    fn test_int_string_round_trip() {
        with_ctx(|ctx| {
            for n in [-1000, -1, 0, 1, 7, 123456789] {
                let text = native_to_string(ctx, &[Value::Int(n)]).unwrap();
                assert_eq!(native_to_int(ctx, &[text]).unwrap(), Value::Int(n));
            }
        });
    }

    #[test]
    fn test_to_hex_and_bin() {
        with_ctx(|ctx| {
            assert_eq!(
                native_to_hex(ctx, &[Value::Int(26)]).unwrap(),
                Value::str("0x1a")
            );
            assert_eq!(
                native_to_hex(ctx, &[Value::Int(-26)]).unwrap(),
                Value::str("-0x1a")
            );
            assert_eq!(
                native_to_bin(ctx, &[Value::Int(10)]).unwrap(),
                Value::str("0b1010")
            );
        });
    }

    #[test]
    fn test_json_round_trip() {
        with_ctx(|ctx| {
            // Build {a: 1, b: [1, 2.5, "x", true, null]}
            let inner = ctx.heap.alloc_list(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::str("x"),
                Value::Bool(true),
                Value::Null,
            ]);
            let mut entries = IndexMap::new();
            entries.insert("a".to_string(), Value::Int(1));
            entries.insert("b".to_string(), Value::List(inner));
            let original = Value::Dict(ctx.heap.alloc_dict(entries));

            let text = native_stringify_json(ctx, &[original.clone()]).unwrap();
            let decoded = native_parse_json(ctx, &[text]).unwrap();
            assert!(values_equal(&original, &decoded, ctx.heap));
        });
    }

    #[test]
    fn test_stringify_rejects_functions() {
        with_ctx(|ctx| {
            let err = native_stringify_json(ctx, &[Value::Native("print".into())]).unwrap_err();
            assert!(err.message.contains("cannot encode"));
        });
    }

    #[test]
    fn test_to_dict_from_pairs() {
        with_ctx(|ctx| {
            let pair = ctx
                .heap
                .alloc_list(vec![Value::str("k"), Value::Int(7)]);
            let pairs = ctx.heap.alloc_list(vec![Value::List(pair)]);
            let dict = native_to_dict(ctx, &[Value::List(pairs)]).unwrap();
            let entries = ctx.heap.dict(dict.heap_id().unwrap()).unwrap();
            assert_eq!(entries["k"], Value::Int(7));
        });
    }
}
