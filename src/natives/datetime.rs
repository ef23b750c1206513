//! Datetime natives: now, timestamp, format_date, parse_date, sleep
//!
//! Timestamps are seconds since the Unix epoch; formatting and parsing use
//! chrono's strftime syntax in local time.

use super::{arity_error, want_number, want_str, NativeCtx, NativeRegistry};
use crate::error::RuntimeError;
use crate::value::Value;
use chrono::{Local, NaiveDateTime, TimeZone};

/// Current time as a float of epoch seconds.
fn native_now(_: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if !args.is_empty() {
        return Err(arity_error("now", "0", args.len()));
    }
    let now = Local::now();
    Ok(Value::Float(now.timestamp_micros() as f64 / 1_000_000.0))
}

/// Current time as whole epoch seconds.
fn native_timestamp(_: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if !args.is_empty() {
        return Err(arity_error("timestamp", "0", args.len()));
    }
    Ok(Value::Int(Local::now().timestamp()))
}

fn native_format_date(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("format_date", "2", args.len()));
    }
    let seconds = want_number("format_date", args, 0, ctx.heap)?;
    let format = want_str("format_date", args, 1, ctx.heap)?;
    let instant = Local
        .timestamp_opt(seconds as i64, 0)
        .single()
        .ok_or_else(|| RuntimeError::type_error("format_date: timestamp out of range"))?;
    Ok(Value::str(instant.format(format).to_string()))
}

fn native_parse_date(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("parse_date", "2", args.len()));
    }
    let text = want_str("parse_date", args, 0, ctx.heap)?;
    let format = want_str("parse_date", args, 1, ctx.heap)?;
    let naive = NaiveDateTime::parse_from_str(text, format)
        .map_err(|e| RuntimeError::type_error(format!("parse_date: {e}")))?;
    let instant = naive
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| RuntimeError::type_error("parse_date: nonexistent local time"))?;
    Ok(Value::Float(instant.timestamp() as f64))
}

/// Block for the given number of seconds.
fn native_sleep(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("sleep", "1", args.len()));
    }
    let seconds = want_number("sleep", args, 0, ctx.heap)?;
    if seconds < 0.0 {
        return Err(RuntimeError::type_error("sleep: negative duration"));
    }
    std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
    Ok(Value::Bool(true))
}

pub fn register(registry: &mut NativeRegistry) {
    registry.define("now", native_now);
    registry.define("timestamp", native_timestamp);
    registry.define("format_date", native_format_date);
    registry.define("parse_date", native_parse_date);
    registry.define("sleep", native_sleep);
}
