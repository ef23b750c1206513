//! String natives: upper, lower, capitalize, trim, split, join, replace,
//! contains, starts_with, ends_with, substring, index_of, repeat, len,
//! format
//!
//! Indices are in characters, not bytes. `len` doubles as the generic
//! length query for collections.

use super::{arity_error, type_error, want_int, want_list, want_str, NativeCtx, NativeRegistry};
use crate::error::RuntimeError;
use crate::heap::HeapData;
use crate::value::{display_value, Value};

fn native_upper(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("upper", "1", args.len()));
    }
    Ok(Value::str(
        want_str("upper", args, 0, ctx.heap)?.to_uppercase(),
    ))
}

fn native_lower(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("lower", "1", args.len()));
    }
    Ok(Value::str(
        want_str("lower", args, 0, ctx.heap)?.to_lowercase(),
    ))
}

fn native_capitalize(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("capitalize", "1", args.len()));
    }
    let s = want_str("capitalize", args, 0, ctx.heap)?;
    let mut chars = s.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };
    Ok(Value::str(capitalized))
}

fn native_trim(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("trim", "1", args.len()));
    }
    Ok(Value::str(want_str("trim", args, 0, ctx.heap)?.trim()))
}

fn native_split(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("split", "2", args.len()));
    }
    let s = want_str("split", args, 0, ctx.heap)?;
    let separator = want_str("split", args, 1, ctx.heap)?;
    if separator.is_empty() {
        return Err(RuntimeError::type_error("split: empty separator"));
    }
    let parts: Vec<Value> = s.split(separator).map(Value::str).collect();
    Ok(Value::List(ctx.heap.alloc_list(parts)))
}

fn native_join(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("join", "2", args.len()));
    }
    let id = want_list("join", args, 0, ctx.heap)?;
    let separator = want_str("join", args, 1, ctx.heap)?.to_string();
    let items = ctx.heap.list(id).cloned().unwrap_or_default();
    let mut parts = Vec::with_capacity(items.len());
    for item in &items {
        match item {
            Value::Str(s) => parts.push(s.to_string()),
            other => return Err(type_error("join", "a list of strings", other, ctx.heap)),
        }
    }
    Ok(Value::str(parts.join(&separator)))
}

fn native_replace(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 3 {
        return Err(arity_error("replace", "3", args.len()));
    }
    let s = want_str("replace", args, 0, ctx.heap)?;
    let from = want_str("replace", args, 1, ctx.heap)?;
    let to = want_str("replace", args, 2, ctx.heap)?;
    Ok(Value::str(s.replace(from, to)))
}

fn native_contains(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("contains", "2", args.len()));
    }
    let s = want_str("contains", args, 0, ctx.heap)?;
    let needle = want_str("contains", args, 1, ctx.heap)?;
    Ok(Value::Bool(s.contains(needle)))
}

fn native_starts_with(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("starts_with", "2", args.len()));
    }
    let s = want_str("starts_with", args, 0, ctx.heap)?;
    let prefix = want_str("starts_with", args, 1, ctx.heap)?;
    Ok(Value::Bool(s.starts_with(prefix)))
}

fn native_ends_with(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("ends_with", "2", args.len()));
    }
    let s = want_str("ends_with", args, 0, ctx.heap)?;
    let suffix = want_str("ends_with", args, 1, ctx.heap)?;
    Ok(Value::Bool(s.ends_with(suffix)))
}

/// `substring(s, start, end)` with character indices, end exclusive.
fn native_substring(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 3 {
        return Err(arity_error("substring", "3", args.len()));
    }
    let s = want_str("substring", args, 0, ctx.heap)?;
    let start = want_int("substring", args, 1, ctx.heap)?;
    let end = want_int("substring", args, 2, ctx.heap)?;
    let length = s.chars().count() as i64;
    if start < 0 || end < start || end > length {
        return Err(RuntimeError::index_error(format!(
            "substring: range {start}..{end} out of bounds for length {length}"
        )));
    }
    let extracted: String = s
        .chars()
        .skip(start as usize)
        .take((end - start) as usize)
        .collect();
    Ok(Value::str(extracted))
}

/// Character index of the first occurrence, or -1.
fn native_index_of(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("index_of", "2", args.len()));
    }
    let s = want_str("index_of", args, 0, ctx.heap)?;
    let needle = want_str("index_of", args, 1, ctx.heap)?;
    match s.find(needle) {
        Some(byte_index) => Ok(Value::Int(s[..byte_index].chars().count() as i64)),
        None => Ok(Value::Int(-1)),
    }
}

fn native_repeat(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("repeat", "2", args.len()));
    }
    let s = want_str("repeat", args, 0, ctx.heap)?;
    let count = want_int("repeat", args, 1, ctx.heap)?;
    if count < 0 {
        return Err(RuntimeError::type_error("repeat: negative count"));
    }
    Ok(Value::str(s.repeat(count as usize)))
}

/// Length of a string (in characters), list, set, dict, or bytes value.
fn native_len(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("len", "1", args.len()));
    }
    let length = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(id) | Value::Set(id) => match ctx.heap.get(*id).map(|o| &o.data) {
            Some(HeapData::List(items)) | Some(HeapData::Set(items)) => items.len(),
            _ => 0,
        },
        Value::Dict(id) => ctx.heap.dict(*id).map(|d| d.len()).unwrap_or(0),
        other => return Err(type_error("len", "a string or collection", other, ctx.heap)),
    };
    Ok(Value::Int(length as i64))
}

/// Substitute each `{}` in the template with the next argument.
fn native_format(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Err(arity_error("format", "at least 1", 0));
    }
    let template = want_str("format", args, 0, ctx.heap)?.to_string();
    let mut result = String::with_capacity(template.len());
    let mut rest = template.as_str();
    let mut next = 1;
    while let Some(index) = rest.find("{}") {
        result.push_str(&rest[..index]);
        match args.get(next) {
            Some(value) => result.push_str(&display_value(value, ctx.heap)),
            None => {
                return Err(RuntimeError::type_error(
                    "format: more placeholders than arguments",
                ))
            }
        }
        next += 1;
        rest = &rest[index + 2..];
    }
    result.push_str(rest);
    Ok(Value::str(result))
}

pub fn register(registry: &mut NativeRegistry) {
    registry.define("upper", native_upper);
    registry.define("lower", native_lower);
    registry.define("capitalize", native_capitalize);
    registry.define("trim", native_trim);
    registry.define("split", native_split);
    registry.define("join", native_join);
    registry.define("replace", native_replace);
    registry.define("contains", native_contains);
    registry.define("starts_with", native_starts_with);
    registry.define("ends_with", native_ends_with);
    registry.define("substring", native_substring);
    registry.define("index_of", native_index_of);
    registry.define("repeat", native_repeat);
    registry.define("len", native_len);
    registry.define("format", native_format);
}
