//! Per-run generator configuration.

use std::env;

/// Options that are fixed for one generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorOptions {
    /// Emit a memoization-cache cleanup after every kernel call. Meant for
    /// correctness and benchmarking runs.
    pub flush_cache: bool,
    /// Forward-declare every kernel entry point so the generated file does not
    /// need the kernel's own header.
    pub extern_decls: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            flush_cache: false,
            extern_decls: true,
        }
    }
}

impl GeneratorOptions {
    pub fn with_flush_cache(mut self, flush_cache: bool) -> Self {
        self.flush_cache = flush_cache;
        self
    }

    pub fn with_extern_decls(mut self, extern_decls: bool) -> Self {
        self.extern_decls = extern_decls;
        self
    }

    /// Defaults, with `flush_cache` taken from `FLUSH_MEMOIZE_CACHE=1`.
    ///
    /// Only front ends should call this; the generator itself never reads
    /// the environment.
    pub fn from_env() -> Self {
        let flush_cache = env::var("FLUSH_MEMOIZE_CACHE").is_ok_and(|v| v.trim() == "1");
        Self::default().with_flush_cache(flush_cache)
    }
}
