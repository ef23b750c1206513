// ABOUTME: IR optimiser: constant folding and dead-code elimination to a fixed point

use crate::ir::{is_temp_name, Function, Instruction, Module, OpCode, Operand};
use std::collections::{HashMap, HashSet};

/// Optimise every function in the module, plus the top-level init
/// instructions. Total: always a no-op or an improvement, never a failure.
pub fn optimize(module: &mut Module) {
    for func in module.functions.values_mut() {
        optimize_function(func);
    }
    // Top-level code runs through the same passes via a scratch function
    let mut main = Function::from_flat("__main__", &module.globals, module.global_handlers.clone());
    optimize_function(&mut main);
    module.globals = main.flatten();
    module.global_handlers = main.handlers;
}

/// Repeat the passes until neither changes anything.
pub fn optimize_function(func: &mut Function) {
    loop {
        let mut changed = false;
        changed |= constant_folding(func);
        changed |= dead_code_elimination(func);
        if !changed {
            break;
        }
    }
    func.seal();
}

/// Fold arithmetic over numeric immediates into MOVEs, propagating folded
/// temporaries within each block. `ADD t1, 5, 3` becomes `MOVE t1, 8`;
/// division and modulo by zero are left alone to fault at runtime.
fn constant_folding(func: &mut Function) -> bool {
    let mut changed = false;
    for block in &mut func.blocks {
        let mut constants: HashMap<String, Operand> = HashMap::new();
        for instr in &mut block.instructions {
            changed |= substitute_constants(instr, &constants);

            if instr.opcode.is_arithmetic() {
                if let (Some(a), Some(b)) = (&instr.arg1, &instr.arg2) {
                    if let Some(folded) = fold_arithmetic(instr.opcode, a, b) {
                        let result = instr.result.clone();
                        *instr = Instruction::with_args(
                            OpCode::MOVE,
                            Some(folded),
                            None,
                            None,
                            result,
                        )
                        .at(instr.line, instr.column);
                        changed = true;
                    }
                }
            }

            // Record `MOVE t, <imm>` so later uses in this block fold too
            if instr.opcode == OpCode::MOVE {
                if let (Some(result), Some(src)) = (&instr.result, &instr.arg1) {
                    if is_temp_name(result) && src.is_numeric() {
                        constants.insert(result.clone(), src.clone());
                    } else {
                        constants.remove(result);
                    }
                }
            } else if let Some(result) = &instr.result {
                constants.remove(result);
            }
        }
    }
    changed
}

fn substitute_constants(instr: &mut Instruction, constants: &HashMap<String, Operand>) -> bool {
    let mut changed = false;
    for slot in [&mut instr.arg1, &mut instr.arg2, &mut instr.arg3]
        .into_iter()
        .flatten()
    {
        changed |= substitute_operand(slot, constants);
    }
    changed
}

fn substitute_operand(operand: &mut Operand, constants: &HashMap<String, Operand>) -> bool {
    match operand {
        Operand::Temp(name) => {
            if let Some(value) = constants.get(name) {
                *operand = value.clone();
                return true;
            }
            false
        }
        Operand::Args(items) => {
            let mut changed = false;
            for item in items {
                changed |= substitute_operand(item, constants);
            }
            changed
        }
        _ => false,
    }
}

fn fold_arithmetic(opcode: OpCode, a: &Operand, b: &Operand) -> Option<Operand> {
    if !a.is_numeric() || !b.is_numeric() {
        return None;
    }
    match (a, b) {
        (Operand::Int(x), Operand::Int(y)) => match opcode {
            OpCode::ADD => Some(Operand::Int(x.wrapping_add(*y))),
            OpCode::SUB => Some(Operand::Int(x.wrapping_sub(*y))),
            OpCode::MUL => Some(Operand::Int(x.wrapping_mul(*y))),
            // int / int produces a float; never folded when y is zero
            OpCode::DIV if *y != 0 => Some(Operand::Float(*x as f64 / *y as f64)),
            OpCode::MOD if *y != 0 => Some(Operand::Int(x.wrapping_rem(*y))),
            OpCode::POW => {
                if *y >= 0 && *y <= u32::MAX as i64 {
                    Some(Operand::Int(x.wrapping_pow(*y as u32)))
                } else {
                    Some(Operand::Float((*x as f64).powf(*y as f64)))
                }
            }
            _ => None,
        },
        _ => {
            let x = numeric(a)?;
            let y = numeric(b)?;
            match opcode {
                OpCode::ADD => Some(Operand::Float(x + y)),
                OpCode::SUB => Some(Operand::Float(x - y)),
                OpCode::MUL => Some(Operand::Float(x * y)),
                OpCode::DIV if y != 0.0 => Some(Operand::Float(x / y)),
                OpCode::MOD if y != 0.0 => Some(Operand::Float(x % y)),
                OpCode::POW => Some(Operand::Float(x.powf(y))),
                _ => None,
            }
        }
    }
}

fn numeric(operand: &Operand) -> Option<f64> {
    match operand {
        Operand::Int(n) => Some(*n as f64),
        Operand::Float(n) => Some(*n),
        _ => None,
    }
}

/// Delete instructions defining temporaries that are never read, as long as
/// the defining opcode has no observable effect. Conservative: variables and
/// side-effecting opcodes are always live.
fn dead_code_elimination(func: &mut Function) -> bool {
    let mut used: HashSet<String> = HashSet::new();
    for block in &func.blocks {
        for instr in &block.instructions {
            for operand in instr.operands() {
                collect_temps(operand, &mut used);
            }
        }
    }

    let mut changed = false;
    for block in &mut func.blocks {
        let before = block.instructions.len();
        block.instructions.retain(|instr| {
            if instr.opcode.has_effect() {
                return true;
            }
            match &instr.result {
                Some(result) if is_temp_name(result) => used.contains(result),
                _ => true,
            }
        });
        changed |= block.instructions.len() != before;
    }
    changed
}

fn collect_temps(operand: &Operand, used: &mut HashSet<String>) {
    match operand {
        Operand::Temp(name) => {
            used.insert(name.clone());
        }
        Operand::Args(items) => {
            for item in items {
                collect_temps(item, used);
            }
        }
        _ => {}
    }
}
