// ABOUTME: Version constants and pipeline configuration

use std::path::PathBuf;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What the `version` native reports.
pub const VERSION_STRING: &str = concat!("Prox ", env!("CARGO_PKG_VERSION"));

/// Source file suffix for modules.
pub const SOURCE_EXTENSION: &str = "prox";

/// GC trigger: collect once tracked bytes exceed this (1 MiB).
pub const DEFAULT_GC_THRESHOLD: usize = 1024 * 1024;

/// Pipeline configuration: where modules are found, how eagerly the GC
/// runs, and whether the optimiser is applied.
#[derive(Debug, Clone)]
pub struct Config {
    /// Module search order: first hit wins. Relative entries are resolved
    /// against the importing file's directory (or the working directory).
    pub module_paths: Vec<PathBuf>,
    pub gc_threshold: usize,
    pub optimize: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            module_paths: vec![
                PathBuf::from("."),
                PathBuf::from("packages"),
                default_stdlib_root(),
            ],
            gc_threshold: DEFAULT_GC_THRESHOLD,
            optimize: true,
        }
    }
}

impl Config {
    /// Prepend user-supplied search paths ahead of the defaults.
    pub fn with_extra_module_paths(mut self, extra: Vec<PathBuf>) -> Self {
        let mut paths = extra;
        paths.append(&mut self.module_paths);
        self.module_paths = paths;
        self
    }
}

/// Installed standard-library root: `$PROX_HOME/stdlib` when set, else a
/// `stdlib` directory next to the working directory.
pub fn default_stdlib_root() -> PathBuf {
    match std::env::var_os("PROX_HOME") {
        Some(home) => PathBuf::from(home).join("stdlib"),
        None => PathBuf::from("stdlib"),
    }
}
