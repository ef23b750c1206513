// ABOUTME: The host-facing pipeline: lex, parse, compile, run, build

use crate::ast::Stmt;
use crate::config::Config;
use crate::error::{
    CompileError, LexError, ParseError, ProxError, RuntimeError, RuntimeErrorKind,
};
use crate::importer::Importer;
use crate::ir::Module;
use crate::lexer::tokenize;
use crate::lower::{lower_program, Lowerer};
use crate::natives::{NativeFn, NativeRegistry};
use crate::optimizer::optimize;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::token::Token;
use crate::trace::{Phase, TraceEvent, TraceSink};
use crate::value::Value;
use crate::vm::Vm;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Front end plus execution, wired together the way the `run`/`build`
/// driver and embedders consume it. Construction is cheap; a pipeline can
/// compile any number of programs.
pub struct Pipeline {
    config: Config,
    registry: NativeRegistry,
    trace: Option<TraceSink>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Pipeline {
            config,
            registry: NativeRegistry::with_stdlib(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, sink: TraceSink) -> Self {
        self.trace = Some(sink);
        self
    }

    /// Extend (or override) the native registry before running.
    pub fn define_native(&mut self, name: impl Into<String>, func: NativeFn) {
        self.registry.define(name, func);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn emit(&self, event: TraceEvent) {
        if let Some(trace) = &self.trace {
            trace(&event);
        }
    }

    fn phase<T>(&self, phase: Phase, detail: impl FnOnce(&T) -> String, result: T) -> T {
        self.emit(TraceEvent::PhaseFinished {
            phase,
            detail: detail(&result),
        });
        result
    }

    // ===== Host API =====

    pub fn lex(&self, source: &str) -> Result<Vec<Token>, LexError> {
        self.emit(TraceEvent::PhaseStarted { phase: Phase::Lex });
        let tokens = tokenize(source)?;
        Ok(self.phase(Phase::Lex, |t: &Vec<Token>| format!("{} tokens", t.len()), tokens))
    }

    pub fn parse(&self, tokens: Vec<Token>) -> Result<Vec<Stmt>, Vec<ParseError>> {
        self.emit(TraceEvent::PhaseStarted { phase: Phase::Parse });
        let (statements, errors) = Parser::new(tokens).parse();
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(self.phase(
            Phase::Parse,
            |s: &Vec<Stmt>| format!("{} statements", s.len()),
            statements,
        ))
    }

    /// Compile source text into an optimised IR module. Imports resolve
    /// relative to the working directory.
    pub fn compile(&self, source: &str) -> Result<Module, CompileError> {
        self.compile_from(source, Path::new("."))
    }

    pub fn compile_file(&self, path: &Path) -> Result<Module, ProxError> {
        let source = std::fs::read_to_string(path).map_err(|e| ProxError::Io(e.to_string()))?;
        let base_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        self.compile_from(&source, &base_dir).map_err(ProxError::from)
    }

    fn compile_from(&self, source: &str, base_dir: &Path) -> Result<Module, CompileError> {
        let tokens = self.lex(source)?;
        let statements = self.parse(tokens).map_err(CompileError::Parse)?;

        self.emit(TraceEvent::PhaseStarted {
            phase: Phase::Import,
        });
        let mut importer = Importer::new(&self.config);
        let statements = importer.expand(statements, base_dir)?;
        self.emit(TraceEvent::PhaseFinished {
            phase: Phase::Import,
            detail: format!("{} modules loaded", importer.loaded_count()),
        });

        self.emit(TraceEvent::PhaseStarted {
            phase: Phase::Resolve,
        });
        let errors = Resolver::new(self.registry.names()).resolve(&statements);
        if !errors.is_empty() {
            return Err(CompileError::Semantic(errors));
        }
        self.emit(TraceEvent::PhaseFinished {
            phase: Phase::Resolve,
            detail: "analysis passed".to_string(),
        });

        self.emit(TraceEvent::PhaseStarted { phase: Phase::Lower });
        let mut module = lower_program(&statements);
        self.emit(TraceEvent::PhaseFinished {
            phase: Phase::Lower,
            detail: format!("{} functions", module.functions.len()),
        });

        if self.config.optimize {
            self.emit(TraceEvent::PhaseStarted {
                phase: Phase::Optimize,
            });
            optimize(&mut module);
            self.emit(TraceEvent::PhaseFinished {
                phase: Phase::Optimize,
                detail: "complete".to_string(),
            });
        }
        Ok(module)
    }

    /// Compile and execute to completion, returning the program's last
    /// value. A clean `exit(0)` is a success.
    pub fn run(&mut self, source: &str) -> Result<Value, ProxError> {
        let module = self.compile(source)?;
        self.run_module(module)
    }

    pub fn run_file(&mut self, path: &Path) -> Result<Value, ProxError> {
        let module = self.compile_file(path)?;
        self.run_module(module)
    }

    fn run_module(&mut self, module: Module) -> Result<Value, ProxError> {
        self.emit(TraceEvent::PhaseStarted {
            phase: Phase::Execute,
        });
        let mut vm = Vm::new(self.registry.clone());
        vm.set_gc_threshold(self.config.gc_threshold);
        if let Some(trace) = &self.trace {
            vm.set_trace(trace.clone());
        }
        vm.load(module);
        match vm.run() {
            Ok(value) => Ok(value),
            Err(RuntimeError {
                kind: RuntimeErrorKind::Exit(0),
                ..
            }) => Ok(Value::Null),
            Err(err) => Err(ProxError::Runtime(err)),
        }
    }

    /// Compile and write the textual IR artifact.
    pub fn build(&self, source: &str, out_path: &Path) -> Result<(), ProxError> {
        let module = self.compile(source)?;
        std::fs::write(out_path, module.to_string()).map_err(|e| ProxError::Io(e.to_string()))
    }

    pub fn build_file(&self, path: &Path, out_path: &Path) -> Result<(), ProxError> {
        let module = self.compile_file(path)?;
        std::fs::write(out_path, module.to_string()).map_err(|e| ProxError::Io(e.to_string()))
    }

    /// Default artifact path for `build`: the source path with a `.ir`
    /// suffix.
    pub fn default_artifact_path(path: &Path) -> PathBuf {
        path.with_extension("ir")
    }
}

/// An interactive session: a persistent VM fed one input at a time, with
/// definitions carried across inputs. Backs the REPL.
pub struct Session {
    config: Config,
    registry: NativeRegistry,
    vm: Vm,
    known_globals: HashSet<String>,
    lifted_counter: u32,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let registry = NativeRegistry::with_stdlib();
        let mut vm = Vm::new(registry.clone());
        vm.set_gc_threshold(config.gc_threshold);
        Session {
            config,
            registry,
            vm,
            known_globals: HashSet::new(),
            lifted_counter: 0,
        }
    }

    /// Evaluate one input and return its last value.
    pub fn eval(&mut self, source: &str) -> Result<Value, ProxError> {
        let tokens = tokenize(source).map_err(CompileError::from)?;
        let (statements, errors) = Parser::new(tokens).parse();
        if !errors.is_empty() {
            return Err(CompileError::Parse(errors).into());
        }
        let mut importer = Importer::new(&self.config);
        let statements = importer
            .expand(statements, Path::new("."))
            .map_err(CompileError::from)?;

        let mut resolver = Resolver::new(self.registry.names());
        for name in &self.known_globals {
            resolver.add_global(name.clone());
        }
        let errors = resolver.resolve(&statements);
        if !errors.is_empty() {
            return Err(CompileError::Semantic(errors).into());
        }

        // Lifted lambda names must stay unique across the whole session
        let (mut module, next_counter) = Lowerer::new(self.lifted_counter).lower(&statements);
        self.lifted_counter = next_counter;
        if self.config.optimize {
            optimize(&mut module);
        }

        for stmt in &statements {
            match stmt {
                Stmt::VarDecl { name, .. }
                | Stmt::FuncDecl { name, .. }
                | Stmt::ClassDecl { name, .. } => {
                    self.known_globals.insert(name.clone());
                }
                _ => {}
            }
        }

        self.vm.load(module);
        self.vm.run().map_err(ProxError::Runtime)
    }

    /// Render a value against the session heap, the way `print` would.
    pub fn render(&self, value: &Value) -> String {
        self.vm.display(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_compile_produces_ir_text() {
        let pipeline = Pipeline::new(Config::default());
        let module = pipeline.compile("let y = 2 * 3 + 1;").unwrap();
        let text = module.to_string();
        assert!(text.starts_with("Module IR:"));
        assert!(text.contains("MOVE y, 7"));
    }

    #[test]
    fn test_compile_reports_semantic_errors() {
        let pipeline = Pipeline::new(Config::default());
        let err = pipeline.compile("print(missing);").unwrap_err();
        assert!(matches!(err, CompileError::Semantic(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_compile_reports_parse_errors() {
        let pipeline = Pipeline::new(Config::default());
        let err = pipeline.compile("let = 3;").unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }

    #[test]
    fn test_run_returns_last_value() {
        let mut pipeline = Pipeline::new(Config::default());
        let value = pipeline.run("40 + 2;").unwrap();
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn test_exit_zero_is_success_nonzero_is_not() {
        let mut pipeline = Pipeline::new(Config::default());
        assert!(pipeline.run("exit(0);").is_ok());
        let err = pipeline.run("exit(2);").unwrap_err();
        assert!(matches!(
            err,
            ProxError::Runtime(RuntimeError {
                kind: RuntimeErrorKind::Exit(2),
                ..
            })
        ));
    }

    #[test]
    fn test_trace_events_fire_in_order() {
        let phases: Rc<RefCell<Vec<Phase>>> = Rc::new(RefCell::new(Vec::new()));
        let sink_phases = phases.clone();
        let pipeline = Pipeline::new(Config::default()).with_trace(Rc::new(move |event| {
            if let TraceEvent::PhaseStarted { phase } = event {
                sink_phases.borrow_mut().push(*phase);
            }
        }));
        pipeline.compile("let x = 1;").unwrap();
        assert_eq!(
            *phases.borrow(),
            vec![
                Phase::Lex,
                Phase::Parse,
                Phase::Import,
                Phase::Resolve,
                Phase::Lower,
                Phase::Optimize
            ]
        );
    }

    #[test]
    fn test_build_writes_artifact() {
        let pipeline = Pipeline::new(Config::default());
        let out = std::env::temp_dir().join(format!("prox-build-{}.ir", std::process::id()));
        pipeline.build("func f() { return 1; }", &out).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("Function f:"));
        assert!(text.contains("Block entry:"));
        let _ = std::fs::remove_file(out);
    }

    #[test]
    fn test_session_carries_definitions_across_inputs() {
        let mut session = Session::new(Config::default());
        session.eval("let x = 10;").unwrap();
        session.eval("func double(n) { return n * 2; }").unwrap();
        let value = session.eval("double(x) + 1;").unwrap();
        assert_eq!(value, Value::Int(21));
    }

    #[test]
    fn test_session_lambdas_stay_unique() {
        let mut session = Session::new(Config::default());
        session.eval("let f = func () { return 1; };").unwrap();
        session.eval("let g = func () { return 2; };").unwrap();
        assert_eq!(session.eval("f() + g();").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_unoptimized_pipeline_still_runs() {
        let config = Config {
            optimize: false,
            ..Config::default()
        };
        let mut pipeline = Pipeline::new(config);
        assert_eq!(pipeline.run("2 * 3 + 1;").unwrap(), Value::Int(7));
    }
}
