// ABOUTME: End-to-end tests driving the full pipeline from source to output

use prox::error::RuntimeErrorKind;
use prox::natives::NativeRegistry;
use prox::pipeline::Pipeline;
use prox::value::Value;
use prox::vm::Vm;
use prox::Config;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Writer that keeps what the program printed, for assertions.
#[derive(Clone, Default)]
struct SharedOut(Rc<RefCell<Vec<u8>>>);

impl Write for SharedOut {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run(source: &str) -> (Result<Value, prox::error::RuntimeError>, String) {
    let pipeline = Pipeline::new(Config::default());
    let module = pipeline.compile(source).expect("compile failed");
    let out = SharedOut::default();
    let mut vm = Vm::with_output(NativeRegistry::with_stdlib(), Box::new(out.clone()));
    vm.load(module);
    let result = vm.run();
    let text = String::from_utf8(out.0.borrow().clone()).unwrap();
    (result, text)
}

fn output_of(source: &str) -> String {
    let (result, text) = run(source);
    result.expect("program failed");
    text
}

// ===== Seed scenarios =====

#[test]
fn test_scenario_function_call_prints_5() {
    assert_eq!(output_of("func add(a,b){ return a+b; } print(add(2,3));"), "5\n");
}

#[test]
fn test_scenario_for_loop_prints_45() {
    assert_eq!(
        output_of("let s=0; for(let i=0;i<10;i=i+1){ s=s+i; } print(s);"),
        "45\n"
    );
}

#[test]
fn test_scenario_try_catch_finally() {
    assert_eq!(
        output_of(
            "try { let x = 1/0; } catch(e) { print(\"caught\"); } finally { print(\"done\"); }"
        ),
        "caught\ndone\n"
    );
}

#[test]
fn test_scenario_push_into_list() {
    assert_eq!(
        output_of("let xs=[]; for(let i=0;i<3;i=i+1){ push(xs,i); } print(xs);"),
        "[0, 1, 2]\n"
    );
}

#[test]
fn test_scenario_constant_folding_visible_in_ir() {
    let pipeline = Pipeline::new(Config::default());
    let module = pipeline.compile("let y = 2*3+1;").unwrap();
    let global_lines: Vec<String> = module
        .globals
        .iter()
        .map(|instr| instr.to_string())
        .collect();
    assert!(
        global_lines.contains(&"MOVE y, 7".to_string()),
        "globals: {global_lines:?}"
    );
    // The whole right-hand side collapsed; no arithmetic remains
    assert!(!global_lines.iter().any(|line| line.starts_with("MUL")));
    assert!(!global_lines.iter().any(|line| line.starts_with("ADD")));
}

// ===== Invariants =====

#[test]
fn test_invariant_normative_counts() {
    assert_eq!(prox::token::KEYWORDS.len(), 45);
    assert_eq!(prox::token::OPERATORS.len(), 42);
    assert_eq!(prox::value::DATA_TYPES.len(), 12);
    assert_eq!(NativeRegistry::with_stdlib().len(), 75);
}

#[test]
fn test_invariant_relexing_is_stable() {
    let source = r#"
        use math; // comment survives nothing
        func f(a, b) { return a ** b + 0x1F; }
        let s = "text with \n escape";
    "#;
    let first = prox::lexer::tokenize(source).unwrap();
    let second = prox::lexer::tokenize(source).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_invariant_pretty_print_parse_round_trip() {
    let source = r#"
        use mathlib;
        const LIMIT = 10;
        func classify(n) {
            if (n < 0) { return "negative"; }
            let label = n % 2 == 0 ? "even" : "odd";
            switch (n) {
                case 0: label = "zero"; break;
            }
            return label;
        }
        class Counter extends Base {
            func init() { this.total = 0; }
            func bump(by) { this.total = this.total + by; return this; }
        }
        let xs = [1, 2.5, "three", {k: null}];
        for (let i = 0; i < LIMIT; i = i + 1) {
            try { xs[0] = classify(i); } catch (e) { throw e; } finally { print(i); }
        }
        while (false) { break; }
        let f = func (a, b) { return a ** b; };
        print(f(2, 3), !true, -xs[1]);
    "#;
    let first = prox::parser::parse(prox::lexer::tokenize(source).unwrap()).unwrap();
    let printed = prox::ast::pretty(&first);
    let second = prox::parser::parse(
        prox::lexer::tokenize(&printed)
            .unwrap_or_else(|e| panic!("reprinted source failed to lex: {e}\n{printed}")),
    )
    .unwrap_or_else(|e| panic!("reprinted source failed to parse: {e:?}\n{printed}"));
    assert_eq!(prox::ast::pretty(&second), printed);
}

#[test]
fn test_invariant_optimizer_fixed_point() {
    let pipeline = Pipeline::new(Config::default());
    let once = pipeline
        .compile("let y = 2*3+1; func f(n) { return n > 0 ? f(n - 1) : 0; } f(3);")
        .unwrap();
    let mut twice = once.clone();
    prox::optimizer::optimize(&mut twice);
    assert_eq!(once, twice);
}

#[test]
fn test_invariant_folding_preserves_semantics() {
    // Same program with and without the optimiser produces the same output
    let source = "let a = 2 * 3 + 1; let b = 10 / 4; let c = 2 ** 8; print(a, b, c);";
    let optimized = output_of(source);

    let config = Config {
        optimize: false,
        ..Config::default()
    };
    let pipeline = Pipeline::new(config);
    let module = pipeline.compile(source).unwrap();
    let out = SharedOut::default();
    let mut vm = Vm::with_output(NativeRegistry::with_stdlib(), Box::new(out.clone()));
    vm.load(module);
    vm.run().unwrap();
    let unoptimized = String::from_utf8(out.0.borrow().clone()).unwrap();

    assert_eq!(optimized, unoptimized);
    assert_eq!(optimized, "7 2.5 256\n");
}

#[test]
fn test_invariant_division_by_zero_not_folded_and_raises() {
    let pipeline = Pipeline::new(Config::default());
    let module = pipeline.compile("let x = 1 / 0;").unwrap();
    assert!(module
        .globals
        .iter()
        .any(|instr| instr.to_string().starts_with("DIV")));

    let (result, _) = run("let x = 1 / 0;");
    assert_eq!(result.unwrap_err().kind, RuntimeErrorKind::DivisionByZero);
}

#[test]
fn test_invariant_gc_keeps_reachable_frees_rest() {
    let pipeline = Pipeline::new(Config::default());
    let module = pipeline
        .compile(
            "let keep = [[1], [2]];\n\
             for (let i = 0; i < 50; i = i + 1) { let garbage = [i]; }\n",
        )
        .unwrap();
    let mut vm = Vm::with_output(NativeRegistry::with_stdlib(), Box::new(Vec::new()));
    vm.load(module);
    vm.run().unwrap();

    let before = vm.heap_stats().live_objects;
    let cycle = vm.collect_now();
    let after = vm.heap_stats().live_objects;
    assert_eq!(after, cycle.live);
    assert!(cycle.freed >= 49, "freed {} of {}", cycle.freed, before);
    // keep, its two children, and the last loop list survive
    assert!(after >= 3);
}

// ===== Round trips =====

#[test]
fn test_round_trip_json() {
    assert_eq!(
        output_of(
            "let v = {name: \"ada\", tags: [1, 2.5, true, null]};\n\
             let again = parse_json(stringify_json(v));\n\
             print(again == v);"
        ),
        "true\n"
    );
}

#[test]
fn test_round_trip_int_strings() {
    assert_eq!(
        output_of(
            "let ok = true;\n\
             let ns = [0, 1, 7, 123456, 0 - 42];\n\
             for (let i = 0; i < 5; i = i + 1) {\n\
               if (to_int(to_string(ns[i])) != ns[i]) { ok = false; }\n\
             }\n\
             print(ok);"
        ),
        "true\n"
    );
}

// ===== Boundary behaviours =====

#[test]
fn test_boundary_negative_index_is_an_error() {
    let (result, _) = run("let xs = [1, 2, 3]; print(xs[0 - 1]);");
    assert_eq!(result.unwrap_err().kind, RuntimeErrorKind::Index);
}

#[test]
fn test_boundary_break_outside_loop_is_semantic_error() {
    let pipeline = Pipeline::new(Config::default());
    let err = pipeline.compile("break;").unwrap_err();
    assert!(err.to_string().contains("'break' outside"));
    let err = pipeline.compile("continue;").unwrap_err();
    assert!(err.to_string().contains("'continue' outside"));
}

#[test]
fn test_uncaught_error_has_position_format() {
    let (result, _) = run("let x = 0;\nlet y = 1 / x;");
    let err = result.unwrap_err();
    let text = err.to_string();
    assert!(
        text.starts_with("DivisionByZero: ") && text.contains(" at 2:"),
        "diagnostic was: {text}"
    );
}

// ===== Larger programs =====

#[test]
fn test_program_fibonacci() {
    assert_eq!(
        output_of(
            "func fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }\n\
             print(fib(15));"
        ),
        "610\n"
    );
}

#[test]
fn test_program_classes_and_collections() {
    assert_eq!(
        output_of(
            "class Stack {\n\
               func init() { this.items = []; }\n\
               func add(v) { push(this.items, v); return this; }\n\
               func size() { return len(this.items); }\n\
             }\n\
             let s = Stack();\n\
             s.add(1); s.add(2); s.add(3);\n\
             print(s.size());"
        ),
        "3\n"
    );
}

#[test]
fn test_program_higher_order_functions() {
    assert_eq!(
        output_of(
            "func map_list(f, xs) {\n\
               let out = [];\n\
               for (let i = 0; i < len(xs); i = i + 1) { push(out, f(xs[i])); }\n\
               return out;\n\
             }\n\
             let doubled = map_list(func (n) { return n * 2; }, range(1, 4));\n\
             print(doubled);"
        ),
        "[2, 4, 6]\n"
    );
}

#[test]
fn test_program_string_pipeline() {
    assert_eq!(
        output_of(
            "let words = split(\"the quick brown fox\", \" \");\n\
             let caps = [];\n\
             for (let i = 0; i < len(words); i = i + 1) { push(caps, capitalize(words[i])); }\n\
             print(join(caps, \" \"));"
        ),
        "The Quick Brown Fox\n"
    );
}

#[test]
fn test_define_native_is_callable_from_code() {
    fn triple(
        _: &mut prox::natives::NativeCtx<'_>,
        args: &[Value],
    ) -> Result<Value, prox::error::RuntimeError> {
        match args {
            [Value::Int(n)] => Ok(Value::Int(n * 3)),
            _ => Err(prox::error::RuntimeError::type_error("triple: bad args")),
        }
    }
    let mut pipeline = Pipeline::new(Config::default());
    pipeline.define_native("triple", triple);
    assert_eq!(pipeline.run("triple(14);").unwrap(), Value::Int(42));
}
