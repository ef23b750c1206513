//! Console and file I/O natives: print, input, read_file, write_file,
//! append_file
//!
//! File natives resolve paths relative to the current working directory.
//! `read_file` yields null on a missing file; the write variants report
//! success as a boolean rather than raising.

use super::{arity_error, want_str, NativeCtx, NativeRegistry};
use crate::error::RuntimeError;
use crate::value::{display_value, Value};
use std::fs::OpenOptions;
use std::io::Write;

/// Print arguments separated by spaces, followed by a newline.
fn native_print(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rendered: Vec<String> = args
        .iter()
        .map(|arg| display_value(arg, ctx.heap))
        .collect();
    writeln!(ctx.out, "{}", rendered.join(" "))
        .map_err(|e| RuntimeError::type_error(format!("print: {e}")))?;
    Ok(Value::Null)
}

/// Read one line from standard input, with an optional prompt.
fn native_input(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if let Some(prompt) = args.first() {
        write!(ctx.out, "{}", display_value(prompt, ctx.heap))
            .and_then(|_| ctx.out.flush())
            .map_err(|e| RuntimeError::type_error(format!("input: {e}")))?;
    }
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| RuntimeError::type_error(format!("input: {e}")))?;
    Ok(Value::str(line.trim_end_matches(['\n', '\r'])))
}

fn native_read_file(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("read_file", "1", args.len()));
    }
    let path = want_str("read_file", args, 0, ctx.heap)?;
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Value::str(content)),
        Err(_) => Ok(Value::Null),
    }
}

fn native_write_file(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("write_file", "2", args.len()));
    }
    let path = want_str("write_file", args, 0, ctx.heap)?;
    let content = display_value(&args[1], ctx.heap);
    Ok(Value::Bool(std::fs::write(path, content).is_ok()))
}

fn native_append_file(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("append_file", "2", args.len()));
    }
    let path = want_str("append_file", args, 0, ctx.heap)?;
    let content = display_value(&args[1], ctx.heap);
    let appended = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(content.as_bytes()));
    Ok(Value::Bool(appended.is_ok()))
}

pub fn register(registry: &mut NativeRegistry) {
    registry.define("print", native_print);
    registry.define("input", native_input);
    registry.define("read_file", native_read_file);
    registry.define("write_file", native_write_file);
    registry.define("append_file", native_append_file);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn run(f: super::super::NativeFn, args: &[Value]) -> Result<Value, RuntimeError> {
        let mut heap = Heap::new(usize::MAX);
        let mut out: Vec<u8> = Vec::new();
        let mut ctx = NativeCtx {
            heap: &mut heap,
            out: &mut out,
        };
        f(&mut ctx, args)
    }

    #[test]
    fn test_print_joins_with_spaces() {
        let mut heap = Heap::new(usize::MAX);
        let mut out: Vec<u8> = Vec::new();
        let mut ctx = NativeCtx {
            heap: &mut heap,
            out: &mut out,
        };
        native_print(&mut ctx, &[Value::Int(1), Value::str("a")]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1 a\n");
    }

    #[test]
    fn test_read_missing_file_is_null() {
        let result = run(native_read_file, &[Value::str("/no/such/file.prox")]).unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let path = std::env::temp_dir().join(format!("prox-io-{}.txt", std::process::id()));
        let path_value = Value::str(path.to_string_lossy());
        let ok = run(native_write_file, &[path_value.clone(), Value::str("body")]).unwrap();
        assert_eq!(ok, Value::Bool(true));
        let content = run(native_read_file, &[path_value.clone()]).unwrap();
        assert_eq!(content, Value::str("body"));

        let ok = run(native_append_file, &[path_value.clone(), Value::str("!")]).unwrap();
        assert_eq!(ok, Value::Bool(true));
        let content = run(native_read_file, &[path_value]).unwrap();
        assert_eq!(content, Value::str("body!"));
        let _ = std::fs::remove_file(path);
    }
}
