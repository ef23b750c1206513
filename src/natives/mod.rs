//! # Native Function Registry
//!
//! Host-provided callables exposed to user code, organised into 8 families
//! with 75 total entries:
//!
//! - **[io]** (5): print, input, read_file, write_file, append_file
//! - **[math]** (15): abs, ceil, floor, round, max, min, pow, sqrt, sin,
//!   cos, tan, log, exp, random, randint
//! - **[strings]** (15): upper, lower, capitalize, trim, split, join,
//!   replace, contains, starts_with, ends_with, substring, index_of,
//!   repeat, len, format
//! - **[collections]** (15): range, push, pop, insert, remove, sort,
//!   reverse, keys, values, entries, contains_key, merge, clone,
//!   deep_clone, clear
//! - **[datetime]** (5): now, timestamp, format_date, parse_date, sleep
//! - **[system]** (5): exit, env, platform, version, exec
//! - **[convert]** (10): to_int, to_float, to_string, to_bool, to_list,
//!   to_dict, to_hex, to_bin, parse_json, stringify_json
//! - **[runtime]** (5): type, assert, id, hash, is_instance
//!
//! Every native has the same shape: it receives the heap handle and an
//! ordered argument slice, and returns a value or a runtime error. There is
//! no per-arity overloading at the registry level.

use crate::error::RuntimeError;
use crate::heap::{Heap, HeapId};
use crate::value::Value;
use indexmap::IndexMap;
use std::io::Write;

pub mod collections;
pub mod convert;
pub mod datetime;
pub mod io;
pub mod math;
pub mod runtime;
pub mod strings;
pub mod system;

/// Execution context handed to every native: the heap (allocation and
/// collection access) and the VM's output sink.
pub struct NativeCtx<'a> {
    pub heap: &'a mut Heap,
    pub out: &'a mut dyn Write,
}

pub type NativeFn = fn(&mut NativeCtx<'_>, &[Value]) -> Result<Value, RuntimeError>;

/// The single name → callable map owned by the VM. Insertion order is kept
/// so listings and count checks are deterministic.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    entries: IndexMap<String, NativeFn>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        NativeRegistry::default()
    }

    /// Registry pre-loaded with the full 75-entry standard library.
    pub fn with_stdlib() -> Self {
        let mut registry = NativeRegistry::new();
        io::register(&mut registry);
        math::register(&mut registry);
        strings::register(&mut registry);
        collections::register(&mut registry);
        datetime::register(&mut registry);
        system::register(&mut registry);
        convert::register(&mut registry);
        runtime::register(&mut registry);
        registry
    }

    /// Bind a name to a host callable. Later definitions win, which is how
    /// embedders override a standard native.
    pub fn define(&mut self, name: impl Into<String>, func: NativeFn) {
        self.entries.insert(name.into(), func);
    }

    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

// ===== Shared argument helpers =====

pub(crate) fn arity_error(name: &str, expected: &str, got: usize) -> RuntimeError {
    RuntimeError::type_error(format!("{name}: expected {expected} arguments, got {got}"))
}

pub(crate) fn type_error(name: &str, expected: &str, got: &Value, heap: &Heap) -> RuntimeError {
    RuntimeError::type_error(format!(
        "{name}: expected {expected}, got {}",
        got.type_name(heap)
    ))
}

pub(crate) fn want_str<'a>(
    name: &str,
    args: &'a [Value],
    index: usize,
    heap: &Heap,
) -> Result<&'a str, RuntimeError> {
    match &args[index] {
        Value::Str(s) => Ok(s),
        other => Err(type_error(name, "a string", other, heap)),
    }
}

pub(crate) fn want_int(
    name: &str,
    args: &[Value],
    index: usize,
    heap: &Heap,
) -> Result<i64, RuntimeError> {
    match &args[index] {
        Value::Int(n) => Ok(*n),
        other => Err(type_error(name, "an integer", other, heap)),
    }
}

pub(crate) fn want_number(
    name: &str,
    args: &[Value],
    index: usize,
    heap: &Heap,
) -> Result<f64, RuntimeError> {
    match &args[index] {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(n) => Ok(*n),
        other => Err(type_error(name, "a number", other, heap)),
    }
}

pub(crate) fn want_list(
    name: &str,
    args: &[Value],
    index: usize,
    heap: &Heap,
) -> Result<HeapId, RuntimeError> {
    match &args[index] {
        Value::List(id) => Ok(*id),
        other => Err(type_error(name, "a list", other, heap)),
    }
}

pub(crate) fn want_dict(
    name: &str,
    args: &[Value],
    index: usize,
    heap: &Heap,
) -> Result<HeapId, RuntimeError> {
    match &args[index] {
        Value::Dict(id) => Ok(*id),
        other => Err(type_error(name, "a dict", other, heap)),
    }
}
