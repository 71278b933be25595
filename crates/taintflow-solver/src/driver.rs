//! Branch solver driver.
//!
//! Every tainted branch or index runs the same pipeline: filter, serialize,
//! assemble the accumulated path constraints for the touched offsets,
//! negate, solve (strict, then optimistically without the path), synthesize
//! on SAT, and commit the taken direction so nested branches see it.

use z3::SatResult;
use z3::ast::{Ast, BV, Bool};

use taintflow_core::label::{CONST_OFFSET, INITIALIZING_LABEL, Label};
use taintflow_core::{TaintRuntime, op};

use crate::constraints::ConstraintKey;
use crate::error::SolveError;
use crate::filter;
use crate::serialize::DepSet;
use crate::session::SolverSession;
use crate::synth::Outcome;

/// Where a trace callback fired from.
#[derive(Debug, Clone, Copy)]
pub struct BranchSite {
    /// Return address of the instrumentation call.
    pub addr: usize,
    /// Thread-local call-stack id maintained by instrumented prologues.
    pub callstack: u32,
}

impl SolverSession {
    /// Comparison branch: the two operands have not been unioned yet.
    #[allow(clippy::too_many_arguments)]
    pub fn trace_cmp(
        &mut self,
        rt: &TaintRuntime,
        l1: Label,
        l2: Label,
        size: u32,
        predicate: u32,
        c1: u64,
        c2: u64,
        site: BranchSite,
    ) {
        let deterministic = l1 == 0 && l2 == 0;
        let taken = op::concrete_cmp_result(c1, c2, predicate as u16);
        if let Some(prefix) = self.prefix.as_mut() {
            prefix.record(site.addr as u64, deterministic, taken);
        }
        if deterministic {
            return;
        }
        if !self.pass_filter(site) {
            return;
        }
        let label = rt.union(
            l1,
            l2,
            op::icmp_with(predicate as u16),
            size as u16,
            c1,
            c2,
        );
        if label < CONST_OFFSET || label == INITIALIZING_LABEL {
            return;
        }
        tracing::debug!(l1, l2, size, predicate, taken, "solving cmp");
        self.solve_cond(rt, label, taken, site);
    }

    /// Boolean branch over an already-formed condition label.
    pub fn trace_cond(&mut self, rt: &TaintRuntime, label: Label, taken: bool, site: BranchSite) {
        if let Some(prefix) = self.prefix.as_mut() {
            prefix.record(site.addr as u64, label == 0, taken);
        }
        if label == 0 {
            return;
        }
        if !self.pass_filter(site) {
            return;
        }
        tracing::debug!(label, taken, "solving cond");
        self.solve_cond(rt, label, taken, site);
    }

    /// Tainted pointer-arithmetic index: try to push it past the observed
    /// value, then pin it so nested constraints stay consistent.
    pub fn trace_gep(&mut self, rt: &TaintRuntime, label: Label, index: u64, site: BranchSite) {
        if label == 0 {
            return;
        }
        let info = rt.store().get(label);
        if info.is_flipped() {
            return;
        }
        tracing::debug!(label, index, "tainted gep index");
        let width = u32::from(info.size);
        if let Err(err) = self.solve_gep(rt, label, index, width) {
            tracing::warn!(%err, addr = site.addr, "index solving error");
        }
        info.set_flag(taintflow_core::B_FLIPPED);
    }

    /// Tainted indirect call target. Observed, not solved.
    pub fn trace_indcall(&mut self, label: Label) {
        if label == 0 {
            return;
        }
        tracing::debug!(label, "tainted indirect call target");
    }

    /// First-layer occurrence counting plus cross-run KV deduplication.
    fn pass_filter(&mut self, site: BranchSite) -> bool {
        let Some(order) = self.counters.record(site.callstack, site.addr) else {
            return false;
        };
        let hash = filter::context_hash(site.addr, site.callstack, order);
        filter::should_explore(self.kv.as_ref(), &self.program, hash)
    }

    /// The full pipeline for one boolean condition.
    fn solve_cond(&mut self, rt: &TaintRuntime, label: Label, taken: bool, site: BranchSite) {
        if rt.store().get(label).is_flipped() {
            return;
        }
        if let Err(err) = self.solve_cond_inner(rt, label, taken) {
            tracing::warn!(%err, addr = site.addr, "solving error");
        }
        // Set even on failure so a broken branch cannot loop the solver.
        rt.store().get(label).set_flag(taintflow_core::B_FLIPPED);
    }

    fn solve_cond_inner(
        &mut self,
        rt: &TaintRuntime,
        label: Label,
        taken: bool,
    ) -> Result<(), SolveError> {
        let mut deps = DepSet::default();
        let cond = self
            .serializer
            .serialize(rt, label, &mut deps)?
            .into_bool()?;
        let result = Bool::from_bool(self.ctx, taken);
        let negated = cond._eq(&result).not();

        let emitted = self.solve_negation(rt, &deps, &negated)?;
        if emitted == Some(Outcome::ResizedInput) {
            // Size constraints are not remembered.
            return Ok(());
        }

        let key: ConstraintKey = (label, u64::from(taken));
        self.forest.commit(&deps, key, cond._eq(&result));
        Ok(())
    }

    fn solve_gep(
        &mut self,
        rt: &TaintRuntime,
        label: Label,
        index: u64,
        width: u32,
    ) -> Result<(), SolveError> {
        let mut deps = DepSet::default();
        let sym = self.serializer.serialize(rt, label, &mut deps)?;
        let index_expr = sym.into_bv()?;
        let observed = BV::from_u64(self.ctx, index, width);
        // Out-of-range exploration: ask for a strictly larger index.
        let beyond = index_expr.bvsgt(&observed);

        let emitted = self.solve_negation(rt, &deps, &beyond)?;
        if emitted == Some(Outcome::ResizedInput) {
            return Ok(());
        }

        let key: ConstraintKey = (label, index);
        self.forest.commit(&deps, key, index_expr._eq(&observed));
        Ok(())
    }

    /// Solve `goal` under the accumulated constraints of `deps`; fall back
    /// to solving it alone when the path is infeasible or the check timed
    /// out. Returns what the synthesizer did, if it ran.
    fn solve_negation(
        &mut self,
        rt: &TaintRuntime,
        deps: &DepSet,
        goal: &Bool<'static>,
    ) -> Result<Option<Outcome>, SolveError> {
        self.solver.reset();
        let mut added: std::collections::HashSet<ConstraintKey> = std::collections::HashSet::new();
        for &off in deps {
            let Some(tree) = self.forest.tree(off) else {
                continue;
            };
            for (key, expr) in tree.borrow().exprs() {
                if added.insert(*key) {
                    self.solver.assert(expr);
                }
            }
        }
        self.solver.assert(goal);

        match self.solver.check() {
            SatResult::Sat => {
                tracing::debug!("branch solved");
                let model = self
                    .solver
                    .get_model()
                    .ok_or(SolveError::NoModel)?;
                let outcome = self.synth.generate(
                    rt,
                    self.ctx,
                    &model,
                    deps,
                    self.serializer.fsize_width,
                )?;
                Ok(Some(outcome))
            }
            SatResult::Unsat | SatResult::Unknown => {
                // Optimistic: drop the path, keep only the local goal.
                tracing::debug!("path infeasible; optimistic attempt");
                let optimistic = z3::Solver::new(self.ctx);
                optimistic.assert(goal);
                if optimistic.check() == SatResult::Sat {
                    let model = optimistic
                        .get_model()
                        .ok_or(SolveError::NoModel)?;
                    let outcome = self.synth.generate(
                        rt,
                        self.ctx,
                        &model,
                        deps,
                        self.serializer.fsize_width,
                    )?;
                    return Ok(Some(outcome));
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use taintflow_core::TaintSource;
    use taintflow_core::options::Options;

    use crate::filter::MAX_BRANCH_COUNT;
    use crate::kv::MemoryStore;

    fn runtime(bytes: &[u8]) -> TaintRuntime {
        TaintRuntime::with_heap_storage(1 << 12, TaintSource::from_bytes(bytes))
    }

    fn session_for(dir: &std::path::Path, input_size: usize) -> SolverSession {
        let opts = Options {
            output_dir: dir.to_string_lossy().into_owned(),
            program: "unit".to_string(),
            ..Options::default()
        };
        SolverSession::with_store(input_size, &opts, Box::new(MemoryStore::default()))
    }

    fn site(addr: usize) -> BranchSite {
        BranchSite { addr, callstack: 0 }
    }

    #[test]
    fn untainted_comparison_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(b"AB");
        let mut sess = session_for(dir.path(), 2);
        sess.trace_cmp(&rt, 0, 0, 8, op::predicate::BVEQ.into(), 5, 5, site(0x1000));
        assert_eq!(sess.emitted(), 0);
    }

    #[test]
    fn single_byte_equality_synthesizes_the_other_side() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(b"B");
        let mut sess = session_for(dir.path(), 1);
        // if (input[0] == 'A'), concretely false because input is "B".
        sess.trace_cmp(
            &rt,
            1,
            0,
            8,
            op::predicate::BVEQ.into(),
            u64::from(b'B'),
            u64::from(b'A'),
            site(0x1000),
        );
        assert_eq!(sess.emitted(), 1);
        let out = std::fs::read(dir.path().join("id-00000000")).unwrap();
        assert_eq!(out[0], b'A');
    }

    #[test]
    fn shape_collapsed_word_solves_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(b"\0\0\0\0");
        let mut sess = session_for(dir.path(), 4);
        // v = LE32 load of bytes 0..4; if (v == 0x12345678).
        let v = rt.union_load(&[1, 2, 3, 4], &[0, 0, 0, 0]);
        sess.trace_cmp(
            &rt,
            v,
            0,
            32,
            op::predicate::BVEQ.into(),
            0,
            0x1234_5678,
            site(0x2000),
        );
        assert_eq!(sess.emitted(), 1);
        let out = std::fs::read(dir.path().join("id-00000000")).unwrap();
        assert_eq!(&out[..4], &[0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn chained_branches_share_one_tree_and_stay_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(&[20, 5]);
        let mut sess = session_for(dir.path(), 2);

        // if (a[0] > 10), taken since 20 > 10.
        sess.trace_cmp(&rt, 1, 0, 8, op::predicate::BVUGT.into(), 20, 10, site(0x100));
        // if (a[1] < a[0]), taken since 5 < 20.
        sess.trace_cmp(&rt, 2, 1, 8, op::predicate::BVULT.into(), 5, 20, site(0x200));

        let t0 = sess.forest.tree(0).expect("offset 0 has a tree").clone();
        let t1 = sess.forest.tree(1).expect("offset 1 has a tree").clone();
        assert!(Rc::ptr_eq(&t0, &t1), "chained offsets must share a tree");
        assert_eq!(t0.borrow().len(), 2, "both branches committed");

        // Negating the second branch must stay consistent with the first:
        // solve a[1] >= a[0] under a[0] > 10 and check the emitted bytes.
        let second = std::fs::read(dir.path().join("id-00000001")).unwrap();
        assert!(second[1] >= second[0], "negated second branch");
        assert!(second[0] > 10, "first branch constraint still holds");
    }

    #[test]
    fn optimistic_solving_rescues_unsat_paths() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(&[7]);
        let mut sess = session_for(dir.path(), 1);

        // First branch pins a[0] == 7 on the path. The second branch's
        // negation needs a[0] != 7, which is UNSAT under the path but
        // trivially SAT on its own.
        sess.trace_cmp(&rt, 1, 0, 8, op::predicate::BVEQ.into(), 7, 7, site(0x100));
        assert_eq!(sess.emitted(), 1, "first negation (a[0] != 7) solves");

        let before = sess.emitted();
        sess.trace_cmp(&rt, 1, 0, 8, op::predicate::BVNEQ.into(), 7, 7, site(0x200));
        assert_eq!(sess.emitted(), before + 1, "optimistic fallback emitted");
    }

    #[test]
    fn per_site_counter_caps_solving() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(&[1]);
        let mut sess = session_for(dir.path(), 1);
        for i in 0..20u64 {
            // Same site every time; vary the compared constant so every
            // visit forms a fresh, solvable comparison label.
            sess.trace_cmp(&rt, 1, 0, 8, op::predicate::BVEQ.into(), 1, 100 + i, site(0x300));
        }
        assert_eq!(
            sess.emitted(),
            u32::from(MAX_BRANCH_COUNT),
            "exactly MAX_BRANCH_COUNT solves per site"
        );
    }

    #[test]
    fn flipped_labels_never_reenter_the_solver() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(&[3]);
        let mut sess = session_for(dir.path(), 1);
        sess.trace_cmp(&rt, 1, 0, 8, op::predicate::BVEQ.into(), 3, 9, site(0x400));
        let after_first = sess.emitted();
        assert_eq!(after_first, 1);
        // Different site, same comparison label: B_FLIPPED suppresses it.
        sess.trace_cmp(&rt, 1, 0, 8, op::predicate::BVEQ.into(), 3, 9, site(0x500));
        assert_eq!(sess.emitted(), after_first);
    }

    #[test]
    fn cross_run_store_suppresses_resolving() {
        let dir = tempfile::tempdir().unwrap();
        let store = Box::new(MemoryStore::default());
        let hash = filter::context_hash(0x600, 0, 1);
        store.set(&format!("{hash}unit"), "explored");

        let rt = runtime(&[3]);
        let mut sess = session_for(dir.path(), 1);
        sess.kv = store;
        sess.trace_cmp(&rt, 1, 0, 8, op::predicate::BVEQ.into(), 3, 9, site(0x600));
        assert_eq!(sess.emitted(), 0, "previously explored context is skipped");
    }

    #[test]
    fn gep_pins_index_and_marks_flipped() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(&[4]);
        let mut sess = session_for(dir.path(), 1);
        let idx = rt.union(1, 0, op::ZEXT, 32, 0, 0);
        sess.trace_gep(&rt, idx, 4, site(0x700));
        assert!(rt.store().get(idx).is_flipped());
        // The committed constraint pins index == 4 for later branches.
        let tree = sess.forest.tree(0).expect("gep committed a tree");
        assert_eq!(tree.borrow().len(), 1);
        // An index beyond 4 is satisfiable, so a file was emitted.
        assert_eq!(sess.emitted(), 1);
        // Re-tracing is a no-op.
        sess.trace_gep(&rt, idx, 4, site(0x700));
        assert_eq!(sess.emitted(), 1);
    }
}
