// ABOUTME: Three-address IR: modules, functions, basic blocks, instructions

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// The complete opcode set. `PHI` is reserved and never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[allow(non_camel_case_types)]
pub enum OpCode {
    // Arithmetic
    ADD,
    SUB,
    MUL,
    DIV,
    MOD,
    POW,
    // Comparison
    EQ,
    NEQ,
    LT,
    LTE,
    GT,
    GTE,
    // Logical
    AND,
    OR,
    NOT,
    // Data movement
    LOAD,
    STORE,
    MOVE,
    // Control flow
    LABEL,
    JUMP,
    JUMP_IF,
    CALL,
    RETURN,
    // Aggregates
    NEW_LIST,
    NEW_DICT,
    GET_ATTR,
    SET_ATTR,
    GET_INDEX,
    SET_INDEX,
    // Special
    PHI,
    NOOP,
}

impl OpCode {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            OpCode::ADD | OpCode::SUB | OpCode::MUL | OpCode::DIV | OpCode::MOD | OpCode::POW
        )
    }

    /// Opcodes with observable effects; dead-code elimination never deletes
    /// these.
    pub fn has_effect(self) -> bool {
        matches!(
            self,
            OpCode::CALL
                | OpCode::STORE
                | OpCode::SET_ATTR
                | OpCode::SET_INDEX
                | OpCode::LABEL
                | OpCode::JUMP
                | OpCode::JUMP_IF
                | OpCode::RETURN
        )
    }
}

/// An instruction operand: an immediate literal, a temporary, a variable
/// name, a label, a function reference (lambda lifting), or the argument
/// list of a CALL / aggregate constructor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Null,
    /// `t0`, `t1`, … single definition per function.
    Temp(String),
    Var(String),
    Label(String),
    /// Reference to a module function; produced when lowering lambdas and
    /// nested function declarations.
    Func(String),
    Args(Vec<Operand>),
}

impl Operand {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Operand::Int(_) | Operand::Float(_))
    }

    pub fn as_temp(&self) -> Option<&str> {
        match self {
            Operand::Temp(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Int(n) => write!(f, "{n}"),
            Operand::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{n:.1}")
                } else {
                    write!(f, "{n}")
                }
            }
            Operand::Bool(b) => write!(f, "{b}"),
            Operand::Str(s) => write!(f, "{s:?}"),
            Operand::Null => write!(f, "null"),
            Operand::Temp(name) | Operand::Var(name) | Operand::Label(name) => {
                write!(f, "{name}")
            }
            Operand::Func(name) => write!(f, "func {name}"),
            Operand::Args(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Three-address instruction with an explicit result slot. The source
/// position of the originating AST node rides along for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub opcode: OpCode,
    pub arg1: Option<Operand>,
    pub arg2: Option<Operand>,
    pub arg3: Option<Operand>,
    pub result: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl Instruction {
    pub fn new(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            arg1: None,
            arg2: None,
            arg3: None,
            result: None,
            line: 0,
            column: 0,
        }
    }

    pub fn with_args(
        opcode: OpCode,
        arg1: Option<Operand>,
        arg2: Option<Operand>,
        arg3: Option<Operand>,
        result: Option<String>,
    ) -> Self {
        Instruction {
            opcode,
            arg1,
            arg2,
            arg3,
            result,
            line: 0,
            column: 0,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    /// Operands in argument position (not the result slot).
    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        [self.arg1.as_ref(), self.arg2.as_ref(), self.arg3.as_ref()]
            .into_iter()
            .flatten()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.opcode)?;
        let mut first = true;
        let mut write_part = |f: &mut fmt::Formatter<'_>, part: String| -> fmt::Result {
            if first {
                first = false;
                write!(f, " {part}")
            } else {
                write!(f, ", {part}")
            }
        };
        if let Some(result) = &self.result {
            write_part(f, result.clone())?;
        }
        for operand in self.operands() {
            write_part(f, operand.to_string())?;
        }
        Ok(())
    }
}

/// A straight-line run of instructions; the last instruction is the only
/// control transfer. Predecessors and successors refer to other blocks in
/// the same function by id, never by owning reference.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BasicBlock {
    pub id: String,
    pub instructions: Vec<Instruction>,
    pub predecessors: Vec<String>,
    pub successors: Vec<String>,
}

impl BasicBlock {
    pub fn new(id: impl Into<String>) -> Self {
        BasicBlock {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, instr: Instruction) {
        self.instructions.push(instr);
    }

    /// Label ids this block can transfer to, read off the terminator.
    pub fn jump_targets(&self) -> Vec<String> {
        let mut targets = Vec::new();
        if let Some(last) = self.instructions.last() {
            match last.opcode {
                OpCode::JUMP => {
                    if let Some(Operand::Label(l)) = &last.arg1 {
                        targets.push(l.clone());
                    }
                }
                OpCode::JUMP_IF => {
                    for operand in [&last.arg2, &last.arg3].into_iter().flatten() {
                        if let Operand::Label(l) = operand {
                            targets.push(l.clone());
                        }
                    }
                }
                _ => {}
            }
        }
        targets
    }
}

/// A protected region: when a runtime error is raised inside one of the
/// covered blocks, control transfers to `catch_block` with the thrown value
/// bound to `error_var`. Synthesized catch-alls (finally rethrow paths)
/// intercept every error including cancellation and exit unwinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handler {
    pub covered: Vec<String>,
    pub catch_block: String,
    pub error_var: String,
    pub catch_all: bool,
}

/// An IR function: ordered basic blocks plus monotonic counters handing out
/// fresh temporaries and labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub blocks: Vec<BasicBlock>,
    pub handlers: Vec<Handler>,
    pub temp_counter: u32,
    pub label_counter: u32,
    #[serde(skip)]
    block_index: HashMap<String, usize>,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<String>) -> Self {
        Function {
            name: name.into(),
            params,
            blocks: Vec::new(),
            handlers: Vec::new(),
            temp_counter: 0,
            label_counter: 0,
            block_index: HashMap::new(),
        }
    }

    pub fn new_temp(&mut self) -> String {
        let name = format!("t{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    pub fn new_label(&mut self, prefix: &str) -> String {
        let name = format!("{}_{}", prefix, self.label_counter);
        self.label_counter += 1;
        name
    }

    pub fn add_block(&mut self, id: impl Into<String>) -> usize {
        let block = BasicBlock::new(id);
        self.block_index
            .insert(block.id.clone(), self.blocks.len());
        self.blocks.push(block);
        self.blocks.len() - 1
    }

    pub fn block_position(&self, id: &str) -> Option<usize> {
        self.block_index.get(id).copied()
    }

    pub fn block_mut(&mut self, id: &str) -> Option<&mut BasicBlock> {
        let index = self.block_position(id)?;
        self.blocks.get_mut(index)
    }

    /// Recompute the predecessor/successor id sets and the block lookup
    /// table. Call after lowering or after structural edits.
    pub fn seal(&mut self) {
        self.block_index = self
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id.clone(), i))
            .collect();

        let mut successors: Vec<Vec<String>> = Vec::with_capacity(self.blocks.len());
        for (i, block) in self.blocks.iter().enumerate() {
            let mut targets = block.jump_targets();
            // A block that does not end in a control transfer falls through
            let falls_through = !matches!(
                block.instructions.last().map(|instr| instr.opcode),
                Some(OpCode::JUMP) | Some(OpCode::JUMP_IF) | Some(OpCode::RETURN)
            );
            if falls_through {
                if let Some(next) = self.blocks.get(i + 1) {
                    targets.push(next.id.clone());
                }
            }
            successors.push(targets);
        }

        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
        for (i, succs) in successors.iter().enumerate() {
            for succ in succs {
                predecessors
                    .entry(succ.clone())
                    .or_default()
                    .push(self.blocks[i].id.clone());
            }
        }
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.successors = successors[i].clone();
            block.predecessors = predecessors.remove(&block.id).unwrap_or_default();
        }
    }

    /// Flatten blocks into a single instruction list, each block introduced
    /// by a LABEL marker so jump targets survive.
    pub fn flatten(&self) -> Vec<Instruction> {
        let mut out = Vec::new();
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                let mut label = Instruction::new(OpCode::LABEL);
                label.arg1 = Some(Operand::Label(block.id.clone()));
                out.push(label);
            }
            out.extend(block.instructions.iter().cloned());
        }
        out
    }

    /// Rebuild a function from a flat instruction list by splitting at the
    /// LABEL markers. The first segment becomes the entry block.
    pub fn from_flat(
        name: impl Into<String>,
        instructions: &[Instruction],
        handlers: Vec<Handler>,
    ) -> Self {
        let mut func = Function::new(name, Vec::new());
        func.handlers = handlers;
        func.add_block("entry");
        let mut current = 0usize;
        for instr in instructions {
            if instr.opcode == OpCode::LABEL {
                if let Some(Operand::Label(id)) = &instr.arg1 {
                    current = func.add_block(id.clone());
                    continue;
                }
            }
            func.blocks[current].push(instr.clone());
        }
        func.seal();
        func
    }
}

/// Whether a name is a temporary (`t0`, `t1`, …) rather than a user
/// variable.
pub(crate) fn is_temp_name(name: &str) -> bool {
    name.len() > 1 && name.starts_with('t') && name[1..].chars().all(|c| c.is_ascii_digit())
}

/// Definition of a class: superclass and the mangled names of its lowered
/// method functions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDef {
    pub name: String,
    pub superclass: Option<String>,
    /// method name → IR function name (`Class.method`)
    pub methods: IndexMap<String, String>,
}

/// An IR module: top-level init instructions plus the function and class
/// tables, in declaration order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Module {
    pub globals: Vec<Instruction>,
    pub global_handlers: Vec<Handler>,
    pub functions: IndexMap<String, Function>,
    pub classes: IndexMap<String, ClassDef>,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    pub fn add_function(&mut self, func: Function) {
        self.functions.insert(func.name.clone(), func);
    }

    /// Merge another module into this one; later definitions win. Used by
    /// the REPL to accumulate functions across inputs.
    pub fn merge(&mut self, other: Module) {
        for (name, func) in other.functions {
            self.functions.insert(name, func);
        }
        for (name, class) in other.classes {
            self.classes.insert(name, class);
        }
        self.globals = other.globals;
        self.global_handlers = other.global_handlers;
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Module IR:")?;
        for instr in &self.globals {
            writeln!(f, "Global: {instr}")?;
        }
        for (name, func) in &self.functions {
            writeln!(f)?;
            writeln!(f, "Function {name}:")?;
            for block in &func.blocks {
                writeln!(f, "Block {}:", block.id)?;
                for instr in &block.instructions {
                    writeln!(f, "  {instr}")?;
                }
            }
        }
        Ok(())
    }
}
