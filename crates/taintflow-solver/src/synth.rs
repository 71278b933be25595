//! Input synthesizer: turns a satisfying model into a new input file.
//!
//! Each emitted file is a byte-for-byte copy of the original input with the
//! model's per-offset assignments patched in, and optionally a new length
//! when the model constrains the `fsize` symbol.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use z3::ast::BV;
use z3::{Context, Model, Symbol};

use taintflow_core::TaintRuntime;

use crate::error::SolveError;
use crate::serialize::DepSet;

/// Upper bound on grown files.
pub const MAX_INPUT_SIZE: u64 = 10240;

/// What applying a model did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Plain byte patches; the branch constraint can be committed.
    Written,
    /// The model constrained the file length. Size constraints are not
    /// remembered, so the caller must skip committing this branch.
    ResizedInput,
}

pub struct InputSynthesizer {
    output_dir: PathBuf,
    next_index: AtomicU32,
}

impl InputSynthesizer {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            next_index: AtomicU32::new(0),
        }
    }

    /// Inputs emitted so far; published to the fuzzer harness on exit.
    #[must_use]
    pub fn emitted(&self) -> u32 {
        self.next_index.load(Ordering::Relaxed)
    }

    /// Write `<output_dir>/id-<8 digits>` from the original input and the
    /// model's assignments over `deps` (plus `fsize` when serialized).
    pub fn generate(
        &self,
        rt: &TaintRuntime,
        ctx: &'static Context,
        model: &Model<'static>,
        deps: &DepSet,
        fsize_width: Option<u32>,
    ) -> Result<Outcome, SolveError> {
        let original = match rt.input().bytes() {
            Some(bytes) => bytes,
            None if rt.input().is_stdin() => return Err(SolveError::StdinSource),
            None => return Err(SolveError::NoSource),
        };

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let path = self.output_dir.join(format!("id-{index:08}"));
        let mut file = create_output(&path)?;
        file.write_all(original)?;

        // Deterministic patch order keeps emitted files reproducible.
        let mut offsets: Vec<u32> = deps.iter().copied().collect();
        offsets.sort_unstable();
        for offset in offsets {
            let sym = BV::new_const(ctx, Symbol::Int(offset), 8);
            // Without model completion, unconstrained bytes evaluate to
            // themselves and are skipped.
            let Some(value) = model.eval(&sym, false).and_then(|v| v.as_u64()) else {
                continue;
            };
            tracing::debug!(offset, value, "patching input byte");
            file.seek(SeekFrom::Start(u64::from(offset)))?;
            file.write_all(&[value as u8])?;
        }

        if let Some(width) = fsize_width {
            let sym = BV::new_const(ctx, Symbol::String("fsize".to_string()), width);
            if let Some(size) = model.eval(&sym, false).and_then(|v| v.as_u64()) {
                self.resize(&mut file, original.len() as u64, size)?;
                tracing::debug!(size, "model resized input");
                return Ok(Outcome::ResizedInput);
            }
        }

        tracing::debug!(index, "generated input");
        Ok(Outcome::Written)
    }

    fn resize(&self, file: &mut File, original: u64, requested: u64) -> Result<(), SolveError> {
        if requested > original {
            let grown = requested.min(MAX_INPUT_SIZE);
            if grown > 0 {
                file.seek(SeekFrom::Start(grown - 1))?;
                file.write_all(&[0])?;
            }
        } else {
            file.set_len(requested)?;
        }
        Ok(())
    }
}

fn create_output(path: &Path) -> Result<File, SolveError> {
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taintflow_core::TaintSource;
    use z3::ast::{Ast, Bool};
    use z3::{Config, Solver};

    fn ctx() -> &'static Context {
        Box::leak(Box::new(Context::new(&Config::new())))
    }

    fn model_for(ctx: &'static Context, assertion: &Bool<'static>) -> Model<'static> {
        let solver = Solver::new(ctx);
        solver.assert(assertion);
        assert_eq!(solver.check(), z3::SatResult::Sat);
        solver.get_model().expect("sat check must produce a model")
    }

    fn runtime(bytes: &[u8]) -> TaintRuntime {
        TaintRuntime::with_heap_storage(1 << 10, TaintSource::from_bytes(bytes))
    }

    #[test]
    fn patches_assigned_bytes_and_keeps_the_rest() {
        let ctx = ctx();
        let dir = tempfile::tempdir().unwrap();
        let synth = InputSynthesizer::new(dir.path());
        let rt = runtime(b"BANANA");

        let byte0 = BV::new_const(ctx, Symbol::Int(0), 8);
        let model = model_for(ctx, &byte0._eq(&BV::from_u64(ctx, b'A'.into(), 8)));
        let deps: DepSet = [0u32].into_iter().collect();
        let outcome = synth.generate(&rt, ctx, &model, &deps, None).unwrap();
        assert_eq!(outcome, Outcome::Written);

        let written = std::fs::read(dir.path().join("id-00000000")).unwrap();
        assert_eq!(written, b"AANANA");
    }

    #[test]
    fn unconstrained_deps_stay_original() {
        let ctx = ctx();
        let dir = tempfile::tempdir().unwrap();
        let synth = InputSynthesizer::new(dir.path());
        let rt = runtime(b"xy");

        let byte0 = BV::new_const(ctx, Symbol::Int(0), 8);
        let model = model_for(ctx, &byte0._eq(&BV::from_u64(ctx, b'z'.into(), 8)));
        // Offset 1 is a dependency but the model says nothing about it.
        let deps: DepSet = [0u32, 1].into_iter().collect();
        synth.generate(&rt, ctx, &model, &deps, None).unwrap();
        let written = std::fs::read(dir.path().join("id-00000000")).unwrap();
        assert_eq!(written, b"zy");
    }

    #[test]
    fn file_names_count_up_zero_padded() {
        let ctx = ctx();
        let dir = tempfile::tempdir().unwrap();
        let synth = InputSynthesizer::new(dir.path());
        let rt = runtime(b"q");
        let t = Bool::from_bool(ctx, true);
        let model = model_for(ctx, &t);
        let deps = DepSet::default();
        synth.generate(&rt, ctx, &model, &deps, None).unwrap();
        synth.generate(&rt, ctx, &model, &deps, None).unwrap();
        assert!(dir.path().join("id-00000000").exists());
        assert!(dir.path().join("id-00000001").exists());
        assert_eq!(synth.emitted(), 2);
    }

    #[test]
    fn fsize_growth_is_capped() {
        let ctx = ctx();
        let dir = tempfile::tempdir().unwrap();
        let synth = InputSynthesizer::new(dir.path());
        let rt = runtime(b"abc");

        let fsize = BV::new_const(ctx, Symbol::String("fsize".to_string()), 32);
        let model = model_for(ctx, &fsize._eq(&BV::from_u64(ctx, 1 << 20, 32)));
        let outcome = synth
            .generate(&rt, ctx, &model, &DepSet::default(), Some(32))
            .unwrap();
        assert_eq!(outcome, Outcome::ResizedInput);
        let len = std::fs::metadata(dir.path().join("id-00000000"))
            .unwrap()
            .len();
        assert_eq!(len, MAX_INPUT_SIZE);
    }

    #[test]
    fn fsize_shrink_truncates() {
        let ctx = ctx();
        let dir = tempfile::tempdir().unwrap();
        let synth = InputSynthesizer::new(dir.path());
        let rt = runtime(b"abcdef");

        let fsize = BV::new_const(ctx, Symbol::String("fsize".to_string()), 32);
        let model = model_for(ctx, &fsize._eq(&BV::from_u64(ctx, 2, 32)));
        let outcome = synth
            .generate(&rt, ctx, &model, &DepSet::default(), Some(32))
            .unwrap();
        assert_eq!(outcome, Outcome::ResizedInput);
        let written = std::fs::read(dir.path().join("id-00000000")).unwrap();
        assert_eq!(written, b"ab");
    }

    #[test]
    fn stdin_source_cannot_be_synthesized() {
        let ctx = ctx();
        let dir = tempfile::tempdir().unwrap();
        let synth = InputSynthesizer::new(dir.path());
        let rt = TaintRuntime::with_heap_storage(64, TaintSource::none());
        let t = Bool::from_bool(ctx, true);
        let model = model_for(ctx, &t);
        assert!(matches!(
            synth.generate(&rt, ctx, &model, &DepSet::default(), None),
            Err(SolveError::NoSource)
        ));
    }
}
