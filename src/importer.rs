// ABOUTME: Module importer: search-path resolution, once-only loading, cycle detection

use crate::ast::Stmt;
use crate::config::{Config, SOURCE_EXTENSION};
use crate::error::ImportError;
use crate::lexer::tokenize;
use crate::parser::Parser;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Resolves `use` declarations and splices each module's statements into
/// the program. Each absolute path loads at most once per compile; a second
/// request contributes nothing (its symbols are already installed).
pub struct Importer {
    search_paths: Vec<PathBuf>,
    loaded: HashSet<PathBuf>,
    /// Modules currently being resolved, for cycle detection.
    processing: Vec<PathBuf>,
}

impl Importer {
    pub fn new(config: &Config) -> Self {
        Importer {
            search_paths: config.module_paths.clone(),
            loaded: HashSet::new(),
            processing: Vec::new(),
        }
    }

    /// Expand every top-level use-declaration, recursively.
    pub fn expand(
        &mut self,
        statements: Vec<Stmt>,
        base_dir: &Path,
    ) -> Result<Vec<Stmt>, ImportError> {
        let mut expanded = Vec::with_capacity(statements.len());
        for stmt in statements {
            match stmt {
                Stmt::UseDecl { modules, .. } => {
                    for module in &modules {
                        expanded.extend(self.load_module(module, base_dir)?);
                    }
                }
                other => expanded.push(other),
            }
        }
        Ok(expanded)
    }

    /// Number of distinct modules loaded so far.
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    fn resolve_path(&self, module: &str, base_dir: &Path) -> Result<PathBuf, ImportError> {
        let filename = format!("{module}.{SOURCE_EXTENSION}");
        let mut searched = Vec::new();
        for search_path in &self.search_paths {
            let root = if search_path.is_absolute() {
                search_path.clone()
            } else {
                base_dir.join(search_path)
            };
            let candidate = root.join(&filename);
            if candidate.is_file() {
                return candidate
                    .canonicalize()
                    .map_err(|e| ImportError::Unreadable {
                        module: module.to_string(),
                        message: e.to_string(),
                    });
            }
            searched.push(root);
        }
        Err(ImportError::NotFound {
            module: module.to_string(),
            searched,
        })
    }

    fn load_module(&mut self, module: &str, base_dir: &Path) -> Result<Vec<Stmt>, ImportError> {
        let path = self.resolve_path(module, base_dir)?;

        if self.loaded.contains(&path) {
            return Ok(Vec::new());
        }
        if self.processing.contains(&path) {
            let mut names: Vec<String> = self
                .processing
                .iter()
                .map(|p| file_label(p))
                .collect();
            names.push(file_label(&path));
            return Err(ImportError::Cycle {
                chain: names.join(" -> "),
            });
        }

        self.processing.push(path.clone());
        let result = self.load_module_inner(module, &path);
        self.processing.pop();

        let statements = result?;
        self.loaded.insert(path);
        Ok(statements)
    }

    fn load_module_inner(
        &mut self,
        module: &str,
        path: &Path,
    ) -> Result<Vec<Stmt>, ImportError> {
        let source = std::fs::read_to_string(path).map_err(|e| ImportError::Unreadable {
            module: module.to_string(),
            message: e.to_string(),
        })?;
        let tokens = tokenize(&source).map_err(|e| ImportError::Malformed {
            module: module.to_string(),
            message: e.to_string(),
        })?;
        let (statements, errors) = Parser::new(tokens).parse();
        if let Some(first) = errors.first() {
            return Err(ImportError::Malformed {
                module: module.to_string(),
                message: first.to_string(),
            });
        }
        // A module's own imports resolve relative to its directory
        let module_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        self.expand(statements, &module_dir)
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Pos;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

    fn temp_module_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "prox-importer-{}-{}",
            std::process::id(),
            DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_module(dir: &Path, name: &str, source: &str) {
        std::fs::write(dir.join(format!("{name}.prox")), source).unwrap();
    }

    fn use_stmt(modules: &[&str]) -> Stmt {
        Stmt::UseDecl {
            modules: modules.iter().map(|m| m.to_string()).collect(),
            pos: Pos::new(1, 1),
        }
    }

    #[test]
    fn test_splices_module_statements() {
        let dir = temp_module_dir();
        write_module(&dir, "m", "let shared = 7;");

        let mut importer = Importer::new(&Config::default());
        let expanded = importer.expand(vec![use_stmt(&["m"])], &dir).unwrap();
        assert_eq!(expanded.len(), 1);
        assert!(matches!(&expanded[0], Stmt::VarDecl { name, .. } if name == "shared"));
    }

    #[test]
    fn test_each_path_loads_at_most_once() {
        let dir = temp_module_dir();
        write_module(&dir, "util", "let u = 1;");
        // Both `a` and `b` pull in `util`
        write_module(&dir, "a", "use util; let a = 1;");
        write_module(&dir, "b", "use util; let b = 1;");

        let mut importer = Importer::new(&Config::default());
        let expanded = importer
            .expand(vec![use_stmt(&["a", "b"])], &dir)
            .unwrap();
        let util_decls = expanded
            .iter()
            .filter(|s| matches!(s, Stmt::VarDecl { name, .. } if name == "u"))
            .count();
        assert_eq!(util_decls, 1);
        assert_eq!(importer.loaded_count(), 3);
    }

    #[test]
    fn test_cycle_is_detected_and_named() {
        let dir = temp_module_dir();
        write_module(&dir, "a", "use b; let a = 1;");
        write_module(&dir, "b", "use a; let b = 1;");

        let mut importer = Importer::new(&Config::default());
        let err = importer.expand(vec![use_stmt(&["a"])], &dir).unwrap_err();
        match err {
            ImportError::Cycle { chain } => {
                assert!(chain.contains("a.prox"), "chain: {chain}");
                assert!(chain.contains("b.prox"), "chain: {chain}");
            }
            other => panic!("expected a cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_module_names_searched_paths() {
        let dir = temp_module_dir();
        let mut importer = Importer::new(&Config::default());
        let err = importer
            .expand(vec![use_stmt(&["ghost"])], &dir)
            .unwrap_err();
        match err {
            ImportError::NotFound { module, searched } => {
                assert_eq!(module, "ghost");
                assert!(!searched.is_empty());
            }
            other => panic!("expected not-found, got {other:?}"),
        }
    }

    #[test]
    fn test_packages_directory_is_searched() {
        let dir = temp_module_dir();
        std::fs::create_dir_all(dir.join("packages")).unwrap();
        std::fs::write(dir.join("packages/dep.prox"), "let from_pkg = 1;").unwrap();

        let mut importer = Importer::new(&Config::default());
        let expanded = importer.expand(vec![use_stmt(&["dep"])], &dir).unwrap();
        assert!(matches!(&expanded[0], Stmt::VarDecl { name, .. } if name == "from_pkg"));
    }

    #[test]
    fn test_malformed_module_aborts() {
        let dir = temp_module_dir();
        write_module(&dir, "bad", "let = ;");
        let mut importer = Importer::new(&Config::default());
        let err = importer.expand(vec![use_stmt(&["bad"])], &dir).unwrap_err();
        assert!(matches!(err, ImportError::Malformed { .. }));
    }
}
