// ABOUTME: Standard-library natives exercised through the language

use prox::natives::NativeRegistry;
use prox::pipeline::Pipeline;
use prox::vm::Vm;
use prox::Config;
use serial_test::serial;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

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

fn output_of(source: &str) -> String {
    let pipeline = Pipeline::new(Config::default());
    let module = pipeline.compile(source).expect("compile failed");
    let out = SharedOut::default();
    let mut vm = Vm::with_output(NativeRegistry::with_stdlib(), Box::new(out.clone()));
    vm.load(module);
    vm.run().expect("program failed");
    let text = String::from_utf8(out.0.borrow().clone()).unwrap();
    text
}

#[test]
fn test_math_family() {
    assert_eq!(output_of("print(abs(0 - 7));"), "7\n");
    assert_eq!(output_of("print(ceil(1.1), floor(1.9), round(2.5));"), "2 1 3\n");
    assert_eq!(output_of("print(max(3, 9, 4), min(3, 9, 4));"), "9 3\n");
    assert_eq!(output_of("print(sqrt(16));"), "4.0\n");
    assert_eq!(output_of("print(pow(2, 10));"), "1024.0\n");
}

#[test]
fn test_string_family() {
    assert_eq!(output_of("print(upper(\"ab\") + lower(\"CD\"));"), "ABcd\n");
    assert_eq!(output_of("print(trim(\"  x  \"));"), "x\n");
    assert_eq!(
        output_of("print(replace(\"a-b-c\", \"-\", \"+\"));"),
        "a+b+c\n"
    );
    assert_eq!(
        output_of("print(substring(\"window\", 0, 3), index_of(\"window\", \"do\"));"),
        "win 3\n"
    );
    assert_eq!(output_of("print(repeat(\"ab\", 3));"), "ababab\n");
    assert_eq!(
        output_of("print(format(\"{} of {}\", 3, 10));"),
        "3 of 10\n"
    );
}

#[test]
fn test_collections_family() {
    assert_eq!(output_of("print(range(1, 5));"), "[1, 2, 3, 4]\n");
    assert_eq!(
        output_of("let xs = [3, 1, 2]; print(sort(xs), reverse(xs), xs);"),
        "[1, 2, 3] [2, 1, 3] [3, 1, 2]\n"
    );
    assert_eq!(
        output_of(
            "let d = {a: 1, b: 2};\n\
             print(keys(d), values(d), contains_key(d, \"a\"));"
        ),
        "[\"a\", \"b\"] [1, 2] true\n"
    );
    assert_eq!(
        output_of(
            "let d = merge({a: 1}, {b: 2});\n\
             print(len(keys(d)));"
        ),
        "2\n"
    );
    assert_eq!(
        output_of(
            "let orig = [[1]];\n\
             let copy = deep_clone(orig);\n\
             push(orig[0], 2);\n\
             print(orig, copy);"
        ),
        "[[1, 2]] [[1]]\n"
    );
}

#[test]
fn test_convert_family() {
    assert_eq!(output_of("print(to_int(\"41\") + 1);"), "42\n");
    assert_eq!(output_of("print(to_float(2));"), "2.0\n");
    assert_eq!(output_of("print(to_bool(0), to_bool(\"x\"));"), "false true\n");
    assert_eq!(output_of("print(to_hex(255), to_bin(5));"), "0xff 0b101\n");
    assert_eq!(output_of("print(to_list(\"abc\"));"), "[\"a\", \"b\", \"c\"]\n");
    assert_eq!(
        output_of("print(parse_json(\"[1, {\\\"k\\\": null}]\"));"),
        "[1, {\"k\": null}]\n"
    );
}

#[test]
fn test_runtime_family() {
    assert_eq!(
        output_of("print(type(1), type(1.5), type(\"s\"), type([]), type(null));"),
        "Int Float String List Null\n"
    );
    assert_eq!(output_of("print(assert(41) + 1);"), "42\n");
    assert_eq!(
        output_of("try { assert(false, \"nope\"); } catch (e) { print(e); }"),
        "<error AssertionError: nope>\n"
    );
    assert_eq!(
        output_of("let xs = [1]; print(id(xs) == id(xs), id(xs) == id([1]));"),
        "true false\n"
    );
    assert_eq!(
        output_of("print(hash(\"a\") == hash(\"a\"), is_instance(2.5, \"Float\"));"),
        "true true\n"
    );
}

#[test]
fn test_datetime_family_basics() {
    assert_eq!(
        output_of(
            "let f = \"%Y-%m-%d %H:%M:%S\";\n\
             let ts = parse_date(format_date(1700000000, f), f);\n\
             print(ts == 1700000000.0);"
        ),
        "true\n"
    );
    assert_eq!(output_of("print(timestamp() > 1500000000);"), "true\n");
}

#[test]
fn test_io_file_round_trip() {
    let path = std::env::temp_dir().join(format!("prox-stdlib-io-{}.txt", std::process::id()));
    let path_str = path.to_string_lossy().replace('\\', "/");
    assert_eq!(
        output_of(&format!(
            "let p = \"{path_str}\";\n\
             write_file(p, \"alpha\");\n\
             append_file(p, \"beta\");\n\
             print(read_file(p));"
        )),
        "alphabeta\n"
    );
    let _ = std::fs::remove_file(path);
}

#[test]
#[serial]
fn test_system_env_native() {
    std::env::set_var("PROX_TEST_FLAG", "on");
    assert_eq!(output_of("print(env(\"PROX_TEST_FLAG\"));"), "on\n");
    std::env::remove_var("PROX_TEST_FLAG");
    assert_eq!(output_of("print(env(\"PROX_TEST_FLAG\"));"), "null\n");
}

#[test]
fn test_version_and_platform() {
    assert_eq!(
        output_of("print(starts_with(version(), \"Prox \"));"),
        "true\n"
    );
    assert_eq!(output_of("print(len(platform()) > 0);"), "true\n");
}
