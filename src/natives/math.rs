//! Math natives: abs, ceil, floor, round, max, min, pow, sqrt, sin, cos,
//! tan, log, exp, random, randint

use super::{arity_error, type_error, want_int, want_number, NativeCtx, NativeRegistry};
use crate::error::RuntimeError;
use crate::value::Value;
use rand::Rng;

fn native_abs(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("abs", "1", args.len()));
    }
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(n.wrapping_abs())),
        Value::Float(n) => Ok(Value::Float(n.abs())),
        other => Err(type_error("abs", "a number", other, ctx.heap)),
    }
}

fn native_ceil(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("ceil", "1", args.len()));
    }
    Ok(Value::Int(want_number("ceil", args, 0, ctx.heap)?.ceil() as i64))
}

fn native_floor(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("floor", "1", args.len()));
    }
    Ok(Value::Int(
        want_number("floor", args, 0, ctx.heap)?.floor() as i64
    ))
}

/// `round(x)` yields an integer; `round(x, digits)` keeps a float.
fn native_round(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(arity_error("round", "1-2", args.len()));
    }
    let x = want_number("round", args, 0, ctx.heap)?;
    if args.len() == 1 {
        return Ok(Value::Int(x.round() as i64));
    }
    let digits = want_int("round", args, 1, ctx.heap)?;
    let factor = 10f64.powi(digits as i32);
    Ok(Value::Float((x * factor).round() / factor))
}

fn extreme(
    name: &str,
    ctx: &mut NativeCtx<'_>,
    args: &[Value],
    pick_greater: bool,
) -> Result<Value, RuntimeError> {
    // A single list argument means "over the list's elements"
    let items: Vec<Value> = match args {
        [] => return Err(arity_error(name, "at least 1", 0)),
        [Value::List(id)] => ctx
            .heap
            .list(*id)
            .map(|items| items.clone())
            .unwrap_or_default(),
        _ => args.to_vec(),
    };
    if items.is_empty() {
        return Err(RuntimeError::type_error(format!("{name}: empty input")));
    }
    let mut best = items[0].clone();
    for item in &items[1..] {
        let ordering = compare_numbers_or_strings(name, &best, item, ctx)?;
        if (pick_greater && ordering.is_lt()) || (!pick_greater && ordering.is_gt()) {
            best = item.clone();
        }
    }
    Ok(best)
}

fn compare_numbers_or_strings(
    name: &str,
    a: &Value,
    b: &Value,
    ctx: &mut NativeCtx<'_>,
) -> Result<std::cmp::Ordering, RuntimeError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        _ => {
            let x = want_number(name, std::slice::from_ref(a), 0, ctx.heap)?;
            let y = want_number(name, std::slice::from_ref(b), 0, ctx.heap)?;
            x.partial_cmp(&y)
                .ok_or_else(|| RuntimeError::type_error(format!("{name}: unordered values")))
        }
    }
}

fn native_max(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    extreme("max", ctx, args, true)
}

fn native_min(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    extreme("min", ctx, args, false)
}

fn native_pow(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("pow", "2", args.len()));
    }
    let base = want_number("pow", args, 0, ctx.heap)?;
    let exponent = want_number("pow", args, 1, ctx.heap)?;
    Ok(Value::Float(base.powf(exponent)))
}

fn native_sqrt(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("sqrt", "1", args.len()));
    }
    let x = want_number("sqrt", args, 0, ctx.heap)?;
    if x < 0.0 {
        return Err(RuntimeError::type_error("sqrt: math domain error"));
    }
    Ok(Value::Float(x.sqrt()))
}

fn native_sin(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("sin", "1", args.len()));
    }
    Ok(Value::Float(want_number("sin", args, 0, ctx.heap)?.sin()))
}

fn native_cos(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("cos", "1", args.len()));
    }
    Ok(Value::Float(want_number("cos", args, 0, ctx.heap)?.cos()))
}

fn native_tan(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("tan", "1", args.len()));
    }
    Ok(Value::Float(want_number("tan", args, 0, ctx.heap)?.tan()))
}

/// `log(x)` is the natural logarithm; `log(x, base)` changes the base.
fn native_log(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(arity_error("log", "1-2", args.len()));
    }
    let x = want_number("log", args, 0, ctx.heap)?;
    if x <= 0.0 {
        return Err(RuntimeError::type_error("log: math domain error"));
    }
    if args.len() == 2 {
        let base = want_number("log", args, 1, ctx.heap)?;
        Ok(Value::Float(x.log(base)))
    } else {
        Ok(Value::Float(x.ln()))
    }
}

fn native_exp(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 1 {
        return Err(arity_error("exp", "1", args.len()));
    }
    Ok(Value::Float(want_number("exp", args, 0, ctx.heap)?.exp()))
}

fn native_random(_: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if !args.is_empty() {
        return Err(arity_error("random", "0", args.len()));
    }
    Ok(Value::Float(rand::thread_rng().gen::<f64>()))
}

/// Inclusive on both ends.
fn native_randint(ctx: &mut NativeCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.len() != 2 {
        return Err(arity_error("randint", "2", args.len()));
    }
    let low = want_int("randint", args, 0, ctx.heap)?;
    let high = want_int("randint", args, 1, ctx.heap)?;
    if low > high {
        return Err(RuntimeError::type_error("randint: empty range"));
    }
    Ok(Value::Int(rand::thread_rng().gen_range(low..=high)))
}

pub fn register(registry: &mut NativeRegistry) {
    registry.define("abs", native_abs);
    registry.define("ceil", native_ceil);
    registry.define("floor", native_floor);
    registry.define("round", native_round);
    registry.define("max", native_max);
    registry.define("min", native_min);
    registry.define("pow", native_pow);
    registry.define("sqrt", native_sqrt);
    registry.define("sin", native_sin);
    registry.define("cos", native_cos);
    registry.define("tan", native_tan);
    registry.define("log", native_log);
    registry.define("exp", native_exp);
    registry.define("random", native_random);
    registry.define("randint", native_randint);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn ctx_run(f: super::super::NativeFn, args: &[Value]) -> Result<Value, RuntimeError> {
        let mut heap = Heap::new(usize::MAX);
        let mut out: Vec<u8> = Vec::new();
        let mut ctx = NativeCtx {
            heap: &mut heap,
            out: &mut out,
        };
        f(&mut ctx, args)
    }

    #[test]
    fn test_abs_preserves_kind() {
        assert_eq!(ctx_run(native_abs, &[Value::Int(-3)]).unwrap(), Value::Int(3));
        assert_eq!(
            ctx_run(native_abs, &[Value::Float(-2.5)]).unwrap(),
            Value::Float(2.5)
        );
    }

    #[test]
    fn test_ceil_floor_round() {
        assert_eq!(
            ctx_run(native_ceil, &[Value::Float(1.2)]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(
            ctx_run(native_floor, &[Value::Float(1.8)]).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            ctx_run(native_round, &[Value::Float(2.5)]).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            ctx_run(native_round, &[Value::Float(2.345), Value::Int(2)]).unwrap(),
            Value::Float(2.35)
        );
    }

    #[test]
    fn test_max_min_variadic_and_over_list() {
        assert_eq!(
            ctx_run(native_max, &[Value::Int(1), Value::Int(7), Value::Int(3)]).unwrap(),
            Value::Int(7)
        );
        let mut heap = Heap::new(usize::MAX);
        let id = heap.alloc_list(vec![Value::Int(4), Value::Int(-2)]);
        let mut out: Vec<u8> = Vec::new();
        let mut ctx = NativeCtx {
            heap: &mut heap,
            out: &mut out,
        };
        assert_eq!(
            native_min(&mut ctx, &[Value::List(id)]).unwrap(),
            Value::Int(-2)
        );
    }

    #[test]
    fn test_sqrt_domain() {
        assert_eq!(
            ctx_run(native_sqrt, &[Value::Int(9)]).unwrap(),
            Value::Float(3.0)
        );
        assert!(ctx_run(native_sqrt, &[Value::Int(-1)]).is_err());
    }

    #[test]
    fn test_randint_bounds() {
        for _ in 0..50 {
            match ctx_run(native_randint, &[Value::Int(2), Value::Int(4)]).unwrap() {
                Value::Int(n) => assert!((2..=4).contains(&n)),
                other => panic!("unexpected value {other:?}"),
            }
        }
        assert!(ctx_run(native_randint, &[Value::Int(4), Value::Int(2)]).is_err());
    }

    #[test]
    fn test_random_is_unit_interval() {
        for _ in 0..20 {
            match ctx_run(native_random, &[]).unwrap() {
                Value::Float(x) => assert!((0.0..1.0).contains(&x)),
                other => panic!("unexpected value {other:?}"),
            }
        }
    }
}
