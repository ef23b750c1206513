// ABOUTME: Interactive read-eval-print loop over a persistent session

use prox::pipeline::Session;
use prox::Config;
use rustyline::error::ReadlineError;
use rustyline::{Config as LineConfig, DefaultEditor};
use std::process::ExitCode;

const HISTORY_FILE: &str = ".prox_history";

pub fn run(config: Config) -> ExitCode {
    let line_config = LineConfig::builder().auto_add_history(true).build();
    let mut editor = match DefaultEditor::with_config(line_config) {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Failed to initialize REPL: {err}");
            return ExitCode::FAILURE;
        }
    };
    let _ = editor.load_history(HISTORY_FILE);

    println!("Prox {} interactive shell", prox::config::VERSION);
    println!("Type 'exit' or press Ctrl-D to leave.");

    let mut session = Session::new(config);
    loop {
        match editor.readline("prox> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" || line == "quit" {
                    break;
                }
                // Allow bare expressions without the trailing semicolon
                let source = if line.ends_with(';') || line.ends_with('}') {
                    line.to_string()
                } else {
                    format!("{line};")
                };
                match session.eval(&source) {
                    Ok(value) => {
                        if !matches!(value, prox::Value::Null) {
                            println!("=> {}", session.render(&value));
                        }
                    }
                    Err(err) => eprintln!("{err}"),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {err}");
                break;
            }
        }
    }

    let _ = editor.save_history(HISTORY_FILE);
    ExitCode::SUCCESS
}
