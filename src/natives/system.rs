//! System natives: exit, env, platform, version, exec

use super::{arity_error, want_str, NativeCtx, NativeRegistry};
use crate::error::RuntimeError;
use crate::value::Value;
use std::process::Command;

/// Unwind the whole VM with an exit code. The unwind is not catchable, but
/// pending `finally` cleanups still run on the way out.
fn native_exit(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let code = match args.first() {
        None => 0,
        Some(Value::Int(n)) => *n as i32,
        Some(other) => return Err(super::type_error("exit", "an integer", other, ctx.heap)),
    };
    Err(RuntimeError::exit(code))
}

fn native_env(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("env", "1", args.len()));
    }
    let name = want_str("env", args, 0, ctx.heap)?;
    match std::env::var(name) {
        Ok(value) => Ok(Value::str(value)),
        Err(_) => Ok(Value::Null),
    }
}

fn native_platform(_: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if !args.is_empty() {
        return Err(arity_error("platform", "0", args.len()));
    }
    Ok(Value::str(std::env::consts::OS))
}

fn native_version(_: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if !args.is_empty() {
        return Err(arity_error("version", "0", args.len()));
    }
    Ok(Value::str(crate::config::VERSION_STRING))
}

/// Run a shell command and return its captured stdout; null if the command
/// could not be spawned.
fn native_exec(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("exec", "1", args.len()));
    }
    let command = want_str("exec", args, 0, ctx.heap)?;
    let output = if cfg!(windows) {
        Command::new("cmd").args(["/C", command]).output()
    } else {
        Command::new("sh").args(["-c", command]).output()
    };
    match output {
        Ok(output) => Ok(Value::str(String::from_utf8_lossy(&output.stdout))),
        Err(_) => Ok(Value::Null),
    }
}

pub fn register(registry: &mut NativeRegistry) {
    registry.define("exit", native_exit);
    registry.define("env", native_env);
    registry.define("platform", native_platform);
    registry.define("version", native_version);
    registry.define("exec", native_exec);
}
