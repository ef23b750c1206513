// ABOUTME: Semantic resolver: scope-stack name binding and statement legality

use crate::ast::{Expr, Stmt};
use crate::error::SemanticError;
use std::collections::HashMap;

/// What a name is bound to, for const-rebinding checks and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Var,
    Const,
    Func,
    Class,
    Param,
    Native,
    This,
}

#[derive(Default)]
struct LexicalScope {
    bindings: HashMap<String, Binding>,
}

/// Walks the AST with a scope stack, collecting name-binding errors. No type
/// inference happens here; the language stays dynamic.
pub struct Resolver {
    scopes: Vec<LexicalScope>,
    errors: Vec<SemanticError>,
    function_depth: usize,
    loop_depth: usize,
    /// Loops and switches both admit `break`; only loops admit `continue`.
    breakable_depth: usize,
}

impl Resolver {
    /// The native registry's names sit in a prelude scope underneath the
    /// program's global scope, so `print(...)` resolves without a
    /// declaration and a top-level binding may shadow a native.
    pub fn new(native_names: impl IntoIterator<Item = String>) -> Self {
        let mut prelude = LexicalScope::default();
        for name in native_names {
            prelude.bindings.insert(name, Binding::Native);
        }
        Resolver {
            scopes: vec![prelude, LexicalScope::default()],
            errors: Vec::new(),
            function_depth: 0,
            loop_depth: 0,
            breakable_depth: 0,
        }
    }

    /// Pre-bind a name in the global scope. Used by the REPL to carry
    /// definitions across inputs.
    pub fn add_global(&mut self, name: impl Into<String>) {
        self.scopes[1].bindings.insert(name.into(), Binding::Var);
    }

    /// Resolve a program. An empty result means the program is well-formed
    /// in name-binding terms.
    pub fn resolve(mut self, statements: &[Stmt]) -> Vec<SemanticError> {
        // Hoist top-level function and class names so mutual recursion
        // binds; the VM resolves calls through the module table anyway.
        for stmt in statements {
            match stmt {
                Stmt::FuncDecl { name, pos, .. } => {
                    if self.declared_here(name) {
                        self.error(format!("Function '{name}' already declared in this scope."), *pos);
                    } else {
                        self.declare(name, Binding::Func);
                    }
                }
                Stmt::ClassDecl { name, pos, .. } => {
                    if self.declared_here(name) {
                        self.error(format!("Class '{name}' already declared in this scope."), *pos);
                    } else {
                        self.declare(name, Binding::Class);
                    }
                }
                _ => {}
            }
        }
        for stmt in statements {
            self.resolve_stmt(stmt, true);
        }
        self.errors
    }

    fn resolve_stmt(&mut self, stmt: &Stmt, top_level: bool) {
        match stmt {
            Stmt::Expression { expr, .. } => self.resolve_expr(expr),
            Stmt::VarDecl {
                name,
                initializer,
                is_const,
                pos,
            } => {
                if let Some(init) = initializer {
                    self.resolve_expr(init);
                }
                if self.declared_here(name) {
                    self.error(
                        format!("Variable '{name}' already declared in this scope."),
                        *pos,
                    );
                } else {
                    self.declare(
                        name,
                        if *is_const { Binding::Const } else { Binding::Var },
                    );
                }
            }
            Stmt::FuncDecl {
                name,
                params,
                body,
                pos,
            } => {
                // Top-level names were hoisted above
                if !top_level {
                    if self.declared_here(name) {
                        self.error(
                            format!("Function '{name}' already declared in this scope."),
                            *pos,
                        );
                    } else {
                        self.declare(name, Binding::Func);
                    }
                }
                self.resolve_function(params, body, pos);
            }
            Stmt::ClassDecl {
                name,
                superclass,
                methods,
                pos,
            } => {
                if !top_level {
                    if self.declared_here(name) {
                        self.error(
                            format!("Class '{name}' already declared in this scope."),
                            *pos,
                        );
                    } else {
                        self.declare(name, Binding::Class);
                    }
                }
                if let Some(parent) = superclass {
                    if self.lookup(parent).is_none() {
                        self.error(format!("Undefined superclass '{parent}'."), *pos);
                    }
                }
                // The class body scope pre-binds the implicit receiver
                self.scopes.push(LexicalScope::default());
                self.declare("this", Binding::This);
                for method in methods {
                    if let Stmt::FuncDecl {
                        params, body, pos, ..
                    } = method
                    {
                        self.resolve_function(params, body, pos);
                    }
                }
                self.scopes.pop();
            }
            // Imports are spliced away before resolution; a survivor is inert
            Stmt::UseDecl { .. } => {}
            Stmt::Block { statements, .. } => {
                self.scopes.push(LexicalScope::default());
                for inner in statements {
                    self.resolve_stmt(inner, false);
                }
                self.scopes.pop();
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch, false);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch, false);
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                self.resolve_expr(condition);
                self.loop_depth += 1;
                self.breakable_depth += 1;
                self.resolve_stmt(body, false);
                self.loop_depth -= 1;
                self.breakable_depth -= 1;
            }
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                ..
            } => {
                self.scopes.push(LexicalScope::default());
                if let Some(init) = initializer {
                    self.resolve_stmt(init, false);
                }
                if let Some(cond) = condition {
                    self.resolve_expr(cond);
                }
                if let Some(incr) = increment {
                    self.resolve_expr(incr);
                }
                self.loop_depth += 1;
                self.breakable_depth += 1;
                self.resolve_stmt(body, false);
                self.loop_depth -= 1;
                self.breakable_depth -= 1;
                self.scopes.pop();
            }
            Stmt::Switch {
                subject,
                cases,
                default,
                ..
            } => {
                self.resolve_expr(subject);
                self.breakable_depth += 1;
                for case in cases {
                    self.resolve_expr(&case.value);
                    self.scopes.push(LexicalScope::default());
                    for inner in &case.body {
                        self.resolve_stmt(inner, false);
                    }
                    self.scopes.pop();
                }
                if let Some(default) = default {
                    self.scopes.push(LexicalScope::default());
                    for inner in default {
                        self.resolve_stmt(inner, false);
                    }
                    self.scopes.pop();
                }
                self.breakable_depth -= 1;
            }
            Stmt::Try {
                body,
                catch,
                finally,
                ..
            } => {
                self.scopes.push(LexicalScope::default());
                for inner in body {
                    self.resolve_stmt(inner, false);
                }
                self.scopes.pop();
                if let Some((name, catch_body)) = catch {
                    self.scopes.push(LexicalScope::default());
                    self.declare(name, Binding::Var);
                    for inner in catch_body {
                        self.resolve_stmt(inner, false);
                    }
                    self.scopes.pop();
                }
                if let Some(finally_body) = finally {
                    self.scopes.push(LexicalScope::default());
                    for inner in finally_body {
                        self.resolve_stmt(inner, false);
                    }
                    self.scopes.pop();
                }
            }
            Stmt::Throw { value, .. } => self.resolve_expr(value),
            Stmt::Return { value, pos } => {
                if self.function_depth == 0 {
                    self.error("'return' outside of a function.", *pos);
                }
                if let Some(value) = value {
                    self.resolve_expr(value);
                }
            }
            Stmt::Break { pos } => {
                if self.breakable_depth == 0 {
                    self.error("'break' outside of a loop.", *pos);
                }
            }
            Stmt::Continue { pos } => {
                if self.loop_depth == 0 {
                    self.error("'continue' outside of a loop.", *pos);
                }
            }
        }
    }

    fn resolve_function(&mut self, params: &[String], body: &[Stmt], pos: &crate::ast::Pos) {
        self.scopes.push(LexicalScope::default());
        for param in params {
            if self.declared_here(param) {
                self.error(format!("Duplicate parameter '{param}'."), *pos);
            } else {
                self.declare(param, Binding::Param);
            }
        }
        // Loop legality does not cross a function boundary
        let saved = (self.loop_depth, self.breakable_depth);
        self.loop_depth = 0;
        self.breakable_depth = 0;
        self.function_depth += 1;
        for stmt in body {
            self.resolve_stmt(stmt, false);
        }
        self.function_depth -= 1;
        (self.loop_depth, self.breakable_depth) = saved;
        self.scopes.pop();
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal { .. } => {}
            Expr::Grouping { inner, .. } => self.resolve_expr(inner),
            Expr::Variable { name, pos } => {
                if self.lookup(name).is_none() {
                    self.error(format!("Undefined variable '{name}'."), *pos);
                }
            }
            Expr::Assign { name, value, pos } => {
                match self.lookup(name) {
                    None => self.error(format!("Undefined variable '{name}' in assignment."), *pos),
                    Some(Binding::Const) => {
                        self.error(format!("Cannot assign to constant '{name}'."), *pos)
                    }
                    Some(_) => {}
                }
                self.resolve_expr(value);
            }
            Expr::Unary { operand, .. } => self.resolve_expr(operand),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.resolve_expr(condition);
                self.resolve_expr(then_branch);
                self.resolve_expr(else_branch);
            }
            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee);
                for arg in arguments {
                    self.resolve_expr(arg);
                }
            }
            Expr::Get { object, .. } => self.resolve_expr(object),
            Expr::Set { object, value, .. } => {
                self.resolve_expr(object);
                self.resolve_expr(value);
            }
            Expr::Index { target, index, .. } => {
                self.resolve_expr(target);
                self.resolve_expr(index);
            }
            Expr::IndexSet {
                target,
                index,
                value,
                ..
            } => {
                self.resolve_expr(target);
                self.resolve_expr(index);
                self.resolve_expr(value);
            }
            Expr::List { elements, .. } => {
                for element in elements {
                    self.resolve_expr(element);
                }
            }
            Expr::Dict { entries, .. } => {
                for (key, value) in entries {
                    self.resolve_expr(key);
                    self.resolve_expr(value);
                }
            }
            Expr::Lambda { params, body, pos } => self.resolve_function(params, body, pos),
        }
    }

    // ===== Helpers =====

    fn declare(&mut self, name: impl Into<String>, binding: Binding) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .bindings
            .insert(name.into(), binding);
    }

    fn declared_here(&self, name: &str) -> bool {
        self.scopes
            .last()
            .expect("scope stack is never empty")
            .bindings
            .contains_key(name)
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(name).copied())
    }

    fn error(&mut self, message: impl Into<String>, pos: crate::ast::Pos) {
        self.errors
            .push(SemanticError::new(message, pos.line, pos.column));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::natives::NativeRegistry;
    use crate::parser::parse;

    fn resolve(source: &str) -> Vec<SemanticError> {
        let statements = parse(tokenize(source).unwrap()).unwrap();
        let registry = NativeRegistry::with_stdlib();
        Resolver::new(registry.names()).resolve(&statements)
    }

    #[test]
    fn test_well_formed_program() {
        let errors = resolve("func add(a, b) { return a + b; } print(add(2, 3));");
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_duplicate_declaration_in_same_scope() {
        let errors = resolve("let x = 1; let x = 2;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("already declared"));
    }

    #[test]
    fn test_shadowing_in_inner_scope_is_fine() {
        let errors = resolve("let x = 1; { let x = 2; }");
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_top_level_binding_may_shadow_a_native() {
        assert!(resolve("let len = 1; len = 2;").is_empty());
    }

    #[test]
    fn test_unknown_identifier() {
        let errors = resolve("print(missing);");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Undefined variable 'missing'"));
    }

    #[test]
    fn test_return_outside_function() {
        let errors = resolve("return 1;");
        assert!(errors[0].message.contains("'return' outside"));
    }

    #[test]
    fn test_break_and_continue_outside_loop() {
        let errors = resolve("break;");
        assert!(errors[0].message.contains("'break' outside"));
        let errors = resolve("continue;");
        assert!(errors[0].message.contains("'continue' outside"));
    }

    #[test]
    fn test_break_legal_in_loop_and_switch_continue_only_in_loop() {
        assert!(resolve("while (true) { break; }").is_empty());
        assert!(resolve("for (let i = 0; i < 3; i = i + 1) { continue; }").is_empty());
        let errors = resolve("switch (1) { case 1: continue; break; }");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("'continue' outside"));
    }

    #[test]
    fn test_break_does_not_leak_into_lambda() {
        let errors = resolve("while (true) { let f = func () { break; }; }");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("'break' outside"));
    }

    #[test]
    fn test_const_cannot_be_reassigned() {
        let errors = resolve("const k = 1; k = 2;");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("constant 'k'"));
    }

    #[test]
    fn test_class_binds_this_and_checks_superclass() {
        assert!(resolve("class A { func get() { return this; } }").is_empty());
        let errors = resolve("class B extends Missing {}");
        assert!(errors[0].message.contains("Undefined superclass"));
        assert!(resolve("class A {} class B extends A {}").is_empty());
    }

    #[test]
    fn test_this_outside_class_is_unbound() {
        let errors = resolve("print(this);");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_mutual_recursion_at_top_level() {
        let errors = resolve(
            "func even(n) { return n == 0 ? true : odd(n - 1); }\n\
             func odd(n) { return n == 0 ? false : even(n - 1); }\n\
             print(even(4));",
        );
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_catch_variable_is_bound_in_catch_body() {
        assert!(resolve("try { print(1); } catch (e) { print(e); }").is_empty());
        let errors = resolve("try { print(1); } catch (e) {} print(e);");
        assert_eq!(errors.len(), 1);
    }
}
