// ABOUTME: Lowering from the AST to three-address IR functions and blocks

use crate::ast::{BinaryOp, Expr, Literal, LogicalOp, Pos, Stmt, UnaryOp};
use crate::ir::{ClassDef, Function, Handler, Instruction, Module, OpCode, Operand};

/// Internal callee name recognised by the VM as "raise the argument". Lets
/// `throw` and the synthesized finally rethrow stay inside the fixed opcode
/// set.
pub const THROW_INTRINSIC: &str = "__throw";

struct LoopCtx {
    break_label: String,
    continue_label: Option<String>,
    finally_depth: usize,
}

/// Per-function lowering state.
struct FuncCtx {
    func: Function,
    current: usize,
    terminated: bool,
    loops: Vec<LoopCtx>,
    /// Bodies of enclosing `finally` clauses, innermost last. Inlined on
    /// every abrupt exit edge (`return`, `break`, `continue`).
    finallys: Vec<Vec<Stmt>>,
    pos: Pos,
}

impl FuncCtx {
    fn new(name: &str, params: Vec<String>) -> Self {
        let mut func = Function::new(name, params);
        func.add_block("entry");
        FuncCtx {
            func,
            current: 0,
            terminated: false,
            loops: Vec::new(),
            finallys: Vec::new(),
            pos: Pos::default(),
        }
    }

    fn emit(&mut self, instr: Instruction) {
        if self.terminated {
            // Unreachable code after a jump still needs somewhere to live
            let label = self.func.new_label("dead");
            self.start_block(&label);
        }
        let pos = self.pos;
        self.func.blocks[self.current].push(instr.at(pos.line, pos.column));
    }

    fn start_block(&mut self, id: &str) {
        self.current = self.func.add_block(id);
        self.terminated = false;
    }

    fn jump(&mut self, target: &str) {
        self.emit(Instruction::with_args(
            OpCode::JUMP,
            Some(Operand::Label(target.to_string())),
            None,
            None,
            None,
        ));
        self.terminated = true;
    }

    fn jump_if(&mut self, condition: Operand, then_label: &str, else_label: &str) {
        self.emit(Instruction::with_args(
            OpCode::JUMP_IF,
            Some(condition),
            Some(Operand::Label(then_label.to_string())),
            Some(Operand::Label(else_label.to_string())),
            None,
        ));
        self.terminated = true;
    }

    /// Jump to `target` unless the current block already ended control flow.
    fn ensure_jump(&mut self, target: &str) {
        if !self.terminated {
            self.jump(target);
        }
    }

    fn emit_return(&mut self, value: Operand) {
        self.emit(Instruction::with_args(
            OpCode::RETURN,
            Some(value),
            None,
            None,
            None,
        ));
        self.terminated = true;
    }

    /// Block ids created from `start` onward; the coverage of a protected
    /// region.
    fn block_ids_since(&self, start: usize) -> Vec<String> {
        self.func.blocks[start..]
            .iter()
            .map(|b| b.id.clone())
            .collect()
    }
}

pub struct Lowerer {
    module: Module,
    lifted_counter: u32,
}

/// Lower a resolved program into an IR module.
pub fn lower_program(statements: &[Stmt]) -> Module {
    Lowerer::new(0).lower(statements).0
}

impl Lowerer {
    pub fn new(lifted_counter: u32) -> Self {
        Lowerer {
            module: Module::new(),
            lifted_counter,
        }
    }

    /// Lower a program, returning the module and the updated lambda counter
    /// (the REPL threads it through so lifted names stay unique).
    pub fn lower(mut self, statements: &[Stmt]) -> (Module, u32) {
        // Function and class declarations populate the module tables; the
        // remaining statements become the top-level init instructions.
        for stmt in statements {
            match stmt {
                Stmt::FuncDecl {
                    name, params, body, ..
                } => self.lower_named_function(name.clone(), params.clone(), body),
                Stmt::ClassDecl {
                    name,
                    superclass,
                    methods,
                    ..
                } => self.lower_class(name, superclass.as_deref(), methods),
                _ => {}
            }
        }

        let mut ctx = FuncCtx::new("__main__", Vec::new());
        let mut last = Operand::Null;
        for stmt in statements {
            match stmt {
                Stmt::FuncDecl { .. } | Stmt::ClassDecl { .. } => {}
                Stmt::Expression { expr, pos } => {
                    ctx.pos = *pos;
                    last = self.lower_expr(expr, &mut ctx);
                }
                other => {
                    self.lower_stmt(other, &mut ctx);
                }
            }
        }
        if !ctx.terminated {
            ctx.emit_return(last);
        }
        ctx.func.seal();
        self.module.globals = ctx.func.flatten();
        self.module.global_handlers = ctx.func.handlers.clone();
        (self.module, self.lifted_counter)
    }

    fn lower_named_function(&mut self, name: String, params: Vec<String>, body: &[Stmt]) {
        let mut ctx = FuncCtx::new(&name, params);
        for stmt in body {
            self.lower_stmt(stmt, &mut ctx);
        }
        if !ctx.terminated {
            ctx.emit_return(Operand::Null);
        }
        ctx.func.seal();
        self.module.add_function(ctx.func);
    }

    fn lower_class(&mut self, name: &str, superclass: Option<&str>, methods: &[Stmt]) {
        let mut def = ClassDef {
            name: name.to_string(),
            superclass: superclass.map(str::to_string),
            methods: indexmap::IndexMap::new(),
        };
        for method in methods {
            if let Stmt::FuncDecl {
                name: method_name,
                params,
                body,
                ..
            } = method
            {
                let ir_name = format!("{name}.{method_name}");
                self.lower_named_function(ir_name.clone(), params.clone(), body);
                def.methods.insert(method_name.clone(), ir_name);
            }
        }
        self.module.classes.insert(name.to_string(), def);
    }

    fn lift_name(&mut self, prefix: &str) -> String {
        let name = format!("{prefix}${}", self.lifted_counter);
        self.lifted_counter += 1;
        name
    }

    // ===== Statements =====

    fn lower_stmt(&mut self, stmt: &Stmt, ctx: &mut FuncCtx) {
        ctx.pos = stmt.pos();
        match stmt {
            Stmt::Expression { expr, .. } => {
                self.lower_expr(expr, ctx);
            }
            Stmt::VarDecl {
                name, initializer, ..
            } => {
                let value = match initializer {
                    Some(init) => self.lower_expr(init, ctx),
                    None => Operand::Null,
                };
                ctx.emit(Instruction::with_args(
                    OpCode::MOVE,
                    Some(value),
                    None,
                    None,
                    Some(name.clone()),
                ));
            }
            Stmt::FuncDecl {
                name, params, body, ..
            } => {
                // A function declaration below top level closes over the
                // defining scope, exactly like a lambda bound to its name
                let lifted = self.lift_name(name);
                self.lower_named_function(lifted.clone(), params.clone(), body);
                let temp = ctx.func.new_temp();
                ctx.emit(Instruction::with_args(
                    OpCode::LOAD,
                    Some(Operand::Func(lifted)),
                    None,
                    None,
                    Some(temp.clone()),
                ));
                ctx.emit(Instruction::with_args(
                    OpCode::MOVE,
                    Some(Operand::Temp(temp)),
                    None,
                    None,
                    Some(name.clone()),
                ));
            }
            Stmt::ClassDecl {
                name,
                superclass,
                methods,
                ..
            } => self.lower_class(name, superclass.as_deref(), methods),
            Stmt::UseDecl { .. } => {
                // Imports were spliced before lowering
            }
            Stmt::Block { statements, .. } => {
                for inner in statements {
                    self.lower_stmt(inner, ctx);
                }
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                let cond = self.lower_expr(condition, ctx);
                let then_label = ctx.func.new_label("lbl");
                let end_label = ctx.func.new_label("lbl");
                let else_label = if else_branch.is_some() {
                    ctx.func.new_label("lbl")
                } else {
                    end_label.clone()
                };
                ctx.jump_if(cond, &then_label, &else_label);

                ctx.start_block(&then_label);
                self.lower_stmt(then_branch, ctx);
                ctx.ensure_jump(&end_label);

                if let Some(else_branch) = else_branch {
                    ctx.start_block(&else_label);
                    self.lower_stmt(else_branch, ctx);
                    ctx.ensure_jump(&end_label);
                }
                ctx.start_block(&end_label);
            }
            Stmt::While {
                condition, body, ..
            } => {
                let cond_label = ctx.func.new_label("lbl");
                let body_label = ctx.func.new_label("lbl");
                let end_label = ctx.func.new_label("lbl");
                ctx.ensure_jump(&cond_label);

                ctx.start_block(&cond_label);
                let cond = self.lower_expr(condition, ctx);
                ctx.jump_if(cond, &body_label, &end_label);

                ctx.start_block(&body_label);
                ctx.loops.push(LoopCtx {
                    break_label: end_label.clone(),
                    continue_label: Some(cond_label.clone()),
                    finally_depth: ctx.finallys.len(),
                });
                self.lower_stmt(body, ctx);
                ctx.loops.pop();
                ctx.ensure_jump(&cond_label);

                ctx.start_block(&end_label);
            }
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                ..
            } => {
                if let Some(init) = initializer {
                    self.lower_stmt(init, ctx);
                }
                let cond_label = ctx.func.new_label("lbl");
                let body_label = ctx.func.new_label("lbl");
                let incr_label = ctx.func.new_label("lbl");
                let end_label = ctx.func.new_label("lbl");
                ctx.ensure_jump(&cond_label);

                ctx.start_block(&cond_label);
                let cond = match condition {
                    Some(cond) => self.lower_expr(cond, ctx),
                    None => Operand::Bool(true),
                };
                ctx.jump_if(cond, &body_label, &end_label);

                ctx.start_block(&body_label);
                ctx.loops.push(LoopCtx {
                    break_label: end_label.clone(),
                    continue_label: Some(incr_label.clone()),
                    finally_depth: ctx.finallys.len(),
                });
                self.lower_stmt(body, ctx);
                ctx.loops.pop();
                ctx.ensure_jump(&incr_label);

                ctx.start_block(&incr_label);
                if let Some(incr) = increment {
                    self.lower_expr(incr, ctx);
                }
                ctx.ensure_jump(&cond_label);

                ctx.start_block(&end_label);
            }
            Stmt::Switch {
                subject,
                cases,
                default,
                ..
            } => {
                let subject_op = self.lower_expr(subject, ctx);
                let subject_temp = ctx.func.new_temp();
                ctx.emit(Instruction::with_args(
                    OpCode::MOVE,
                    Some(subject_op),
                    None,
                    None,
                    Some(subject_temp.clone()),
                ));

                let end_label = ctx.func.new_label("lbl");
                let body_labels: Vec<String> =
                    cases.iter().map(|_| ctx.func.new_label("lbl")).collect();
                let default_label = default.as_ref().map(|_| ctx.func.new_label("lbl"));

                // Equality chain; the final miss falls to default or the end
                for (i, case) in cases.iter().enumerate() {
                    ctx.pos = case.pos;
                    let value = self.lower_expr(&case.value, ctx);
                    let matched = ctx.func.new_temp();
                    ctx.emit(Instruction::with_args(
                        OpCode::EQ,
                        Some(Operand::Temp(subject_temp.clone())),
                        Some(value),
                        None,
                        Some(matched.clone()),
                    ));
                    let miss_label = if i + 1 < cases.len() {
                        ctx.func.new_label("lbl")
                    } else {
                        default_label.clone().unwrap_or_else(|| end_label.clone())
                    };
                    ctx.jump_if(Operand::Temp(matched), &body_labels[i], &miss_label);
                    if i + 1 < cases.len() {
                        ctx.start_block(&miss_label);
                    }
                }

                ctx.loops.push(LoopCtx {
                    break_label: end_label.clone(),
                    continue_label: None,
                    finally_depth: ctx.finallys.len(),
                });
                for (i, case) in cases.iter().enumerate() {
                    ctx.start_block(&body_labels[i]);
                    for inner in &case.body {
                        self.lower_stmt(inner, ctx);
                    }
                    ctx.ensure_jump(&end_label);
                }
                if let (Some(label), Some(body)) = (&default_label, default) {
                    ctx.start_block(label);
                    for inner in body {
                        self.lower_stmt(inner, ctx);
                    }
                    ctx.ensure_jump(&end_label);
                }
                ctx.loops.pop();
                ctx.start_block(&end_label);
            }
            Stmt::Try {
                body,
                catch,
                finally,
                ..
            } => self.lower_try(body, catch.as_ref(), finally.as_ref(), ctx),
            Stmt::Throw { value, .. } => {
                let op = self.lower_expr(value, ctx);
                self.emit_throw(op, ctx);
            }
            Stmt::Return { value, .. } => {
                let mut op = match value {
                    Some(value) => self.lower_expr(value, ctx),
                    None => Operand::Null,
                };
                if !ctx.finallys.is_empty() {
                    // Pin the value before cleanup code runs
                    if matches!(op, Operand::Var(_)) {
                        let temp = ctx.func.new_temp();
                        ctx.emit(Instruction::with_args(
                            OpCode::MOVE,
                            Some(op),
                            None,
                            None,
                            Some(temp.clone()),
                        ));
                        op = Operand::Temp(temp);
                    }
                    self.inline_finallys(0, ctx);
                }
                ctx.emit_return(op);
            }
            Stmt::Break { .. } => {
                let (break_label, depth) = match ctx.loops.last() {
                    Some(ctx_loop) => (ctx_loop.break_label.clone(), ctx_loop.finally_depth),
                    None => return, // resolver already reported this
                };
                self.inline_finallys(depth, ctx);
                ctx.jump(&break_label);
            }
            Stmt::Continue { .. } => {
                let target = ctx
                    .loops
                    .iter()
                    .rev()
                    .find_map(|l| l.continue_label.clone().map(|c| (c, l.finally_depth)));
                let (continue_label, depth) = match target {
                    Some(found) => found,
                    None => return,
                };
                self.inline_finallys(depth, ctx);
                ctx.jump(&continue_label);
            }
        }
    }

    /// Inline every pending `finally` body above `upto_depth`, innermost
    /// first, without disturbing the stack for code that follows.
    fn inline_finallys(&mut self, upto_depth: usize, ctx: &mut FuncCtx) {
        let saved = ctx.finallys.clone();
        while ctx.finallys.len() > upto_depth {
            let body = ctx.finallys.pop().expect("checked non-empty");
            for stmt in &body {
                self.lower_stmt(stmt, ctx);
            }
        }
        ctx.finallys = saved;
    }

    fn emit_throw(&mut self, value: Operand, ctx: &mut FuncCtx) {
        ctx.emit(Instruction::with_args(
            OpCode::CALL,
            Some(Operand::Var(THROW_INTRINSIC.to_string())),
            Some(Operand::Args(vec![value])),
            None,
            None,
        ));
    }

    fn lower_try(
        &mut self,
        body: &[Stmt],
        catch: Option<&(String, Vec<Stmt>)>,
        finally: Option<&Vec<Stmt>>,
        ctx: &mut FuncCtx,
    ) {
        let try_label = ctx.func.new_label("lbl");
        let cont_label = ctx.func.new_label("lbl");
        let after_label = ctx.func.new_label("lbl");
        let catch_label = catch.map(|_| ctx.func.new_label("lbl"));
        let finally_err_label = finally.map(|_| ctx.func.new_label("lbl"));
        let finally_err_var = finally.map(|_| ctx.func.new_label("$err"));

        // Reserve handler slots now so nested regions register after (and
        // therefore match before) this one; coverage is filled in below.
        let finally_handler_index = finally_err_label.as_ref().map(|label| {
            ctx.func.handlers.push(Handler {
                covered: Vec::new(),
                catch_block: label.clone(),
                error_var: finally_err_var.clone().expect("finally err var"),
                catch_all: true,
            });
            ctx.func.handlers.len() - 1
        });
        let catch_handler_index = catch.map(|(name, _)| {
            ctx.func.handlers.push(Handler {
                covered: Vec::new(),
                catch_block: catch_label.clone().expect("catch label"),
                error_var: name.clone(),
                catch_all: false,
            });
            ctx.func.handlers.len() - 1
        });

        // Protected body
        ctx.ensure_jump(&try_label);
        let body_start = ctx.func.blocks.len();
        ctx.start_block(&try_label);
        if let Some(finally_body) = finally {
            ctx.finallys.push(finally_body.clone());
        }
        for stmt in body {
            self.lower_stmt(stmt, ctx);
        }
        if finally.is_some() {
            ctx.finallys.pop();
        }
        ctx.ensure_jump(&cont_label);
        let body_blocks = ctx.block_ids_since(body_start);

        // Catch body: covered by the finally handler but not by itself
        let mut catch_blocks = Vec::new();
        if let (Some((_, catch_body)), Some(label)) = (catch, &catch_label) {
            let catch_start = ctx.func.blocks.len();
            ctx.start_block(label);
            if let Some(finally_body) = finally {
                ctx.finallys.push(finally_body.clone());
            }
            for stmt in catch_body {
                self.lower_stmt(stmt, ctx);
            }
            if finally.is_some() {
                ctx.finallys.pop();
            }
            ctx.ensure_jump(&cont_label);
            catch_blocks = ctx.block_ids_since(catch_start);
        }

        // Error edge: run finally, then rethrow
        if let (Some(finally_body), Some(label)) = (finally, &finally_err_label) {
            ctx.start_block(label);
            for stmt in finally_body {
                self.lower_stmt(stmt, ctx);
            }
            let err_var = finally_err_var.clone().expect("finally err var");
            self.emit_throw(Operand::Var(err_var), ctx);
            ctx.ensure_jump(&after_label);
        }

        if let Some(index) = catch_handler_index {
            ctx.func.handlers[index].covered = body_blocks.clone();
        }
        if let Some(index) = finally_handler_index {
            let mut covered = body_blocks;
            covered.extend(catch_blocks);
            ctx.func.handlers[index].covered = covered;
        }

        // Normal continuation runs finally once, shared by body and catch
        ctx.start_block(&cont_label);
        if let Some(finally_body) = finally {
            for stmt in finally_body {
                self.lower_stmt(stmt, ctx);
            }
        }
        ctx.ensure_jump(&after_label);
        ctx.start_block(&after_label);
    }

    // ===== Expressions =====

    fn lower_expr(&mut self, expr: &Expr, ctx: &mut FuncCtx) -> Operand {
        ctx.pos = expr.pos();
        match expr {
            Expr::Literal { value, .. } => match value {
                Literal::Int(n) => Operand::Int(*n),
                Literal::Float(n) => Operand::Float(*n),
                Literal::Bool(b) => Operand::Bool(*b),
                Literal::Str(s) => Operand::Str(s.clone()),
                Literal::Null => Operand::Null,
            },
            Expr::Grouping { inner, .. } => self.lower_expr(inner, ctx),
            Expr::Variable { name, .. } => Operand::Var(name.clone()),
            Expr::Assign { name, value, .. } => {
                let op = self.lower_expr(value, ctx);
                ctx.emit(Instruction::with_args(
                    OpCode::STORE,
                    Some(op.clone()),
                    None,
                    None,
                    Some(name.clone()),
                ));
                op
            }
            Expr::Unary { op, operand, .. } => {
                let operand = self.lower_expr(operand, ctx);
                let temp = ctx.func.new_temp();
                let instr = match op {
                    UnaryOp::Not => Instruction::with_args(
                        OpCode::NOT,
                        Some(operand),
                        None,
                        None,
                        Some(temp.clone()),
                    ),
                    // No NEG opcode: negation is subtraction from zero
                    UnaryOp::Neg => Instruction::with_args(
                        OpCode::SUB,
                        Some(Operand::Int(0)),
                        Some(operand),
                        None,
                        Some(temp.clone()),
                    ),
                };
                ctx.emit(instr);
                Operand::Temp(temp)
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let left = self.lower_expr(left, ctx);
                let right = self.lower_expr(right, ctx);
                let temp = ctx.func.new_temp();
                let opcode = match op {
                    BinaryOp::Add => OpCode::ADD,
                    BinaryOp::Sub => OpCode::SUB,
                    BinaryOp::Mul => OpCode::MUL,
                    BinaryOp::Div => OpCode::DIV,
                    BinaryOp::Mod => OpCode::MOD,
                    BinaryOp::Pow => OpCode::POW,
                    BinaryOp::Eq => OpCode::EQ,
                    BinaryOp::Neq => OpCode::NEQ,
                    BinaryOp::Lt => OpCode::LT,
                    BinaryOp::Lte => OpCode::LTE,
                    BinaryOp::Gt => OpCode::GT,
                    BinaryOp::Gte => OpCode::GTE,
                };
                ctx.emit(Instruction::with_args(
                    opcode,
                    Some(left),
                    Some(right),
                    None,
                    Some(temp.clone()),
                ));
                Operand::Temp(temp)
            }
            Expr::Logical {
                op, left, right, ..
            } => {
                // Short-circuit operators become branches, never AND/OR
                let result = ctx.func.new_temp();
                let rhs_label = ctx.func.new_label("lbl");
                let end_label = ctx.func.new_label("lbl");

                let left = self.lower_expr(left, ctx);
                ctx.emit(Instruction::with_args(
                    OpCode::MOVE,
                    Some(left),
                    None,
                    None,
                    Some(result.clone()),
                ));
                match op {
                    LogicalOp::And => {
                        ctx.jump_if(Operand::Temp(result.clone()), &rhs_label, &end_label)
                    }
                    LogicalOp::Or => {
                        ctx.jump_if(Operand::Temp(result.clone()), &end_label, &rhs_label)
                    }
                }

                ctx.start_block(&rhs_label);
                let right = self.lower_expr(right, ctx);
                ctx.emit(Instruction::with_args(
                    OpCode::MOVE,
                    Some(right),
                    None,
                    None,
                    Some(result.clone()),
                ));
                ctx.ensure_jump(&end_label);

                ctx.start_block(&end_label);
                Operand::Temp(result)
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                let result = ctx.func.new_temp();
                let then_label = ctx.func.new_label("lbl");
                let else_label = ctx.func.new_label("lbl");
                let end_label = ctx.func.new_label("lbl");

                let cond = self.lower_expr(condition, ctx);
                ctx.jump_if(cond, &then_label, &else_label);

                ctx.start_block(&then_label);
                let then_value = self.lower_expr(then_branch, ctx);
                ctx.emit(Instruction::with_args(
                    OpCode::MOVE,
                    Some(then_value),
                    None,
                    None,
                    Some(result.clone()),
                ));
                ctx.ensure_jump(&end_label);

                ctx.start_block(&else_label);
                let else_value = self.lower_expr(else_branch, ctx);
                ctx.emit(Instruction::with_args(
                    OpCode::MOVE,
                    Some(else_value),
                    None,
                    None,
                    Some(result.clone()),
                ));
                ctx.ensure_jump(&end_label);

                ctx.start_block(&end_label);
                Operand::Temp(result)
            }
            Expr::Call {
                callee, arguments, ..
            } => {
                let callee_op = match callee.as_ref() {
                    Expr::Variable { name, .. } => Operand::Var(name.clone()),
                    Expr::Get { object, name, .. } => {
                        let object = self.lower_expr(object, ctx);
                        let method = ctx.func.new_temp();
                        ctx.emit(Instruction::with_args(
                            OpCode::GET_ATTR,
                            Some(object),
                            Some(Operand::Str(name.clone())),
                            None,
                            Some(method.clone()),
                        ));
                        Operand::Temp(method)
                    }
                    other => self.lower_expr(other, ctx),
                };
                let args: Vec<Operand> = arguments
                    .iter()
                    .map(|arg| self.lower_expr(arg, ctx))
                    .collect();
                let result = ctx.func.new_temp();
                ctx.pos = expr.pos();
                ctx.emit(Instruction::with_args(
                    OpCode::CALL,
                    Some(callee_op),
                    Some(Operand::Args(args)),
                    None,
                    Some(result.clone()),
                ));
                Operand::Temp(result)
            }
            Expr::Get { object, name, .. } => {
                let object = self.lower_expr(object, ctx);
                let temp = ctx.func.new_temp();
                ctx.emit(Instruction::with_args(
                    OpCode::GET_ATTR,
                    Some(object),
                    Some(Operand::Str(name.clone())),
                    None,
                    Some(temp.clone()),
                ));
                Operand::Temp(temp)
            }
            Expr::Set {
                object,
                name,
                value,
                ..
            } => {
                let object = self.lower_expr(object, ctx);
                let value = self.lower_expr(value, ctx);
                ctx.emit(Instruction::with_args(
                    OpCode::SET_ATTR,
                    Some(object),
                    Some(Operand::Str(name.clone())),
                    Some(value.clone()),
                    None,
                ));
                value
            }
            Expr::Index { target, index, .. } => {
                let target = self.lower_expr(target, ctx);
                let index = self.lower_expr(index, ctx);
                let temp = ctx.func.new_temp();
                ctx.emit(Instruction::with_args(
                    OpCode::GET_INDEX,
                    Some(target),
                    Some(index),
                    None,
                    Some(temp.clone()),
                ));
                Operand::Temp(temp)
            }
            Expr::IndexSet {
                target,
                index,
                value,
                ..
            } => {
                let target = self.lower_expr(target, ctx);
                let index = self.lower_expr(index, ctx);
                let value = self.lower_expr(value, ctx);
                ctx.emit(Instruction::with_args(
                    OpCode::SET_INDEX,
                    Some(target),
                    Some(index),
                    Some(value.clone()),
                    None,
                ));
                value
            }
            Expr::List { elements, .. } => {
                let ops: Vec<Operand> = elements
                    .iter()
                    .map(|element| self.lower_expr(element, ctx))
                    .collect();
                let temp = ctx.func.new_temp();
                ctx.pos = expr.pos();
                ctx.emit(Instruction::with_args(
                    OpCode::NEW_LIST,
                    Some(Operand::Args(ops)),
                    None,
                    None,
                    Some(temp.clone()),
                ));
                Operand::Temp(temp)
            }
            Expr::Dict { entries, .. } => {
                let mut ops = Vec::with_capacity(entries.len() * 2);
                for (key, value) in entries {
                    ops.push(self.lower_expr(key, ctx));
                    ops.push(self.lower_expr(value, ctx));
                }
                let temp = ctx.func.new_temp();
                ctx.pos = expr.pos();
                ctx.emit(Instruction::with_args(
                    OpCode::NEW_DICT,
                    Some(Operand::Args(ops)),
                    None,
                    None,
                    Some(temp.clone()),
                ));
                Operand::Temp(temp)
            }
            Expr::Lambda { params, body, .. } => {
                let name = self.lift_name("lambda");
                self.lower_named_function(name.clone(), params.clone(), body);
                let temp = ctx.func.new_temp();
                ctx.emit(Instruction::with_args(
                    OpCode::LOAD,
                    Some(Operand::Func(name)),
                    None,
                    None,
                    Some(temp.clone()),
                ));
                Operand::Temp(temp)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn lower(source: &str) -> Module {
        let statements = parse(tokenize(source).unwrap()).unwrap();
        lower_program(&statements)
    }

    fn global_opcodes(module: &Module) -> Vec<OpCode> {
        module.globals.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn test_function_gets_entry_block_and_implicit_return() {
        let module = lower("func f() { let a = 1; }");
        let func = &module.functions["f"];
        assert_eq!(func.blocks[0].id, "entry");
        let last = func.blocks.last().unwrap().instructions.last().unwrap();
        assert_eq!(last.opcode, OpCode::RETURN);
    }

    #[test]
    fn test_for_lowers_to_cond_body_incr_shape() {
        let module = lower("let s = 0; for (let i = 0; i < 3; i = i + 1) { s = s + i; }");
        let ops = global_opcodes(&module);
        // init MOVEs, then a JUMP into the condition block
        assert!(ops.contains(&OpCode::JUMP));
        assert!(ops.contains(&OpCode::JUMP_IF));
        assert!(ops.contains(&OpCode::LT));
        // Condition and increment blocks exist as LABEL markers
        let labels = module
            .globals
            .iter()
            .filter(|i| i.opcode == OpCode::LABEL)
            .count();
        assert!(labels >= 3, "expected cond/body/incr/end labels: {module}");
    }

    #[test]
    fn test_short_circuit_lowers_to_branches_not_and_or() {
        let module = lower("func f(a, b) { return a && b; }");
        let func = &module.functions["f"];
        let all: Vec<OpCode> = func
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter().map(|i| i.opcode))
            .collect();
        assert!(!all.contains(&OpCode::AND));
        assert!(all.contains(&OpCode::JUMP_IF));
    }

    #[test]
    fn test_lambda_is_lifted_to_module_function() {
        let module = lower("let f = func (x) { return x; };");
        assert!(module.functions.contains_key("lambda$0"));
        assert!(module
            .globals
            .iter()
            .any(|i| matches!(&i.arg1, Some(Operand::Func(name)) if name == "lambda$0")));
    }

    #[test]
    fn test_class_methods_become_mangled_functions() {
        let module = lower("class Point { func mag() { return 0; } }");
        assert!(module.functions.contains_key("Point.mag"));
        assert_eq!(module.classes["Point"].methods["mag"], "Point.mag");
    }

    #[test]
    fn test_try_registers_handlers() {
        let module = lower(
            "try { let x = 1; } catch (e) { let y = 2; } finally { let z = 3; }",
        );
        assert_eq!(module.global_handlers.len(), 2);
        let catch_all: Vec<bool> = module.global_handlers.iter().map(|h| h.catch_all).collect();
        assert!(catch_all.contains(&true));
        assert!(catch_all.contains(&false));
        // The catch-all (finally) handler also covers the catch body
        let finally_handler = module
            .global_handlers
            .iter()
            .find(|h| h.catch_all)
            .unwrap();
        let catch_handler = module
            .global_handlers
            .iter()
            .find(|h| !h.catch_all)
            .unwrap();
        assert!(finally_handler.covered.len() > catch_handler.covered.len());
    }

    #[test]
    fn test_throw_lowers_to_intrinsic_call() {
        let module = lower("throw \"boom\";");
        assert!(module.globals.iter().any(|i| {
            i.opcode == OpCode::CALL
                && matches!(&i.arg1, Some(Operand::Var(name)) if name == THROW_INTRINSIC)
        }));
    }

    #[test]
    fn test_top_level_last_expression_is_returned() {
        let module = lower("1 + 2;");
        let last = module.globals.last().unwrap();
        assert_eq!(last.opcode, OpCode::RETURN);
        assert!(matches!(last.arg1, Some(Operand::Temp(_))));
    }

    #[test]
    fn test_switch_lowers_to_equality_chain() {
        let module = lower("switch (2) { case 1: break; case 2: break; default: }");
        let ops = global_opcodes(&module);
        assert_eq!(ops.iter().filter(|op| **op == OpCode::EQ).count(), 2);
    }

    #[test]
    fn test_instructions_carry_positions() {
        let module = lower("let x = 1;\nlet y = 2;");
        let moves: Vec<&Instruction> = module
            .globals
            .iter()
            .filter(|i| i.opcode == OpCode::MOVE)
            .collect();
        assert_eq!(moves[0].line, 1);
        assert_eq!(moves[1].line, 2);
    }
}
