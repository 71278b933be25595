//! Runtime options, parsed once from the `TAINT_OPTIONS` environment
//! variable.
//!
//! The format is the sanitizer-style `key=value` list separated by `:` or
//! spaces, e.g. `TAINT_OPTIONS=taint_file=input.bin:output_dir=/tmp/out`.
//! Unknown keys are ignored so older and newer instrumentation can share an
//! environment. The parse happens on first access and the result is
//! process-sticky.

use std::sync::OnceLock;

/// Process-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Path of the tainted input, `"stdin"`, or empty for none.
    pub taint_file: String,
    /// Directory for synthesized inputs.
    pub output_dir: String,
    /// Cosmetic identifier for log correlation.
    pub instance_id: u32,
    /// Cosmetic identifier for log correlation.
    pub session_id: u32,
    /// Alternative solver backend selector; 0 = built-in solver only.
    pub solver_select: u32,
    /// Warn on calls into uninstrumented functions.
    pub warn_unimplemented: bool,
    /// Warn when a nominally label-free program produces a label.
    pub warn_nonzero_labels: bool,
    /// Path to write the label dump on exit; empty disables.
    pub dump_labels_at_exit: String,
    /// Path of the on-disk exploration store; empty keeps dedup in-process.
    pub kv_store: String,
    /// Program name mixed into cross-run dedup keys; empty = executable stem.
    pub program: String,
    /// Maintain the rolling path-prefix observer.
    pub path_prefix: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            taint_file: String::new(),
            output_dir: ".".to_string(),
            instance_id: 0,
            session_id: 0,
            solver_select: 0,
            warn_unimplemented: true,
            warn_nonzero_labels: false,
            dump_labels_at_exit: String::new(),
            kv_store: String::new(),
            program: String::new(),
            path_prefix: false,
        }
    }
}

impl Options {
    /// Parse an option string, starting from defaults.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut opts = Self::default();
        for item in s.split([':', ' ']).filter(|i| !i.is_empty()) {
            let Some((key, value)) = item.split_once('=') else {
                tracing::warn!(item, "malformed TAINT_OPTIONS entry");
                continue;
            };
            opts.apply(key, value);
        }
        opts
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "taint_file" => self.taint_file = value.to_string(),
            "output_dir" => self.output_dir = value.to_string(),
            "instance_id" => self.instance_id = parse_u32(key, value, self.instance_id),
            "session_id" => self.session_id = parse_u32(key, value, self.session_id),
            "solver_select" => self.solver_select = parse_u32(key, value, self.solver_select),
            "warn_unimplemented" => {
                self.warn_unimplemented = parse_bool(key, value, self.warn_unimplemented);
            }
            "warn_nonzero_labels" => {
                self.warn_nonzero_labels = parse_bool(key, value, self.warn_nonzero_labels);
            }
            "dump_labels_at_exit" => self.dump_labels_at_exit = value.to_string(),
            "kv_store" => self.kv_store = value.to_string(),
            "program" => self.program = value.to_string(),
            "path_prefix" => self.path_prefix = parse_bool(key, value, self.path_prefix),
            _ => tracing::debug!(key, "ignoring unrecognized taint option"),
        }
    }

    /// Program name used in cross-run dedup keys.
    #[must_use]
    pub fn program_name(&self) -> String {
        if !self.program.is_empty() {
            return self.program.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn parse_u32(key: &str, value: &str, fallback: u32) -> u32 {
    value.parse().unwrap_or_else(|_| {
        tracing::warn!(key, value, "expected an unsigned integer");
        fallback
    })
}

fn parse_bool(key: &str, value: &str, fallback: bool) -> bool {
    match value {
        "1" | "true" | "yes" => true,
        "0" | "false" | "no" => false,
        _ => {
            tracing::warn!(key, value, "expected a boolean");
            fallback
        }
    }
}

static OPTIONS: OnceLock<Options> = OnceLock::new();

/// The process options, reading `TAINT_OPTIONS` on first use.
pub fn options() -> &'static Options {
    OPTIONS.get_or_init(|| {
        let raw = std::env::var("TAINT_OPTIONS").unwrap_or_default();
        Options::parse(&raw)
    })
}
