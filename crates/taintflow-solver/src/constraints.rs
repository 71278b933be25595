//! Path-constraint accumulator.
//!
//! For every input-byte offset there is at most one constraint tree: the
//! bag of committed branch expressions touching that offset, plus the set
//! of offsets currently pointing at the bag. When a branch touches several
//! offsets their trees are unioned into one and every member offset is
//! rewritten to point at it, so the tree reachable from any offset holds
//! every past constraint over transitively-connected offsets.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use rustc_hash::FxHashSet;
use z3::ast::Bool;

use taintflow_core::Label;

/// Identity of a committed constraint: the branch label and the value its
/// condition took. Cheap to hash, stable across serializations.
pub type ConstraintKey = (Label, u64);

/// One bag of committed constraints shared by a set of offsets.
#[derive(Default)]
pub struct ConstraintTree {
    exprs: Vec<(ConstraintKey, Bool<'static>)>,
    keys: HashSet<ConstraintKey>,
    pub deps: FxHashSet<u32>,
}

impl ConstraintTree {
    /// Insert if the key is new; returns whether it was.
    pub fn insert(&mut self, key: ConstraintKey, expr: Bool<'static>) -> bool {
        if self.keys.insert(key) {
            self.exprs.push((key, expr));
            true
        } else {
            false
        }
    }

    pub fn exprs(&self) -> impl Iterator<Item = &(ConstraintKey, Bool<'static>)> {
        self.exprs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }
}

pub type TreeRef = Rc<RefCell<ConstraintTree>>;

/// All constraint trees of the current execution, indexed by input offset.
pub struct ConstraintForest {
    trees: Vec<Option<TreeRef>>,
}

impl ConstraintForest {
    /// One slot per input byte.
    #[must_use]
    pub fn new(input_size: usize) -> Self {
        Self {
            trees: (0..input_size).map(|_| None).collect(),
        }
    }

    /// Tree currently reachable from `offset`.
    #[must_use]
    pub fn tree(&self, offset: u32) -> Option<&TreeRef> {
        self.trees.get(offset as usize).and_then(|t| t.as_ref())
    }

    /// Union the trees of `offsets` into one and point every involved
    /// offset at it. Returns the merged tree, or `None` when no offset is
    /// in range.
    pub fn merge(&mut self, offsets: &FxHashSet<u32>) -> Option<TreeRef> {
        let mut the_tree: Option<TreeRef> = None;
        for &off in offsets {
            let Some(slot) = self.trees.get(off as usize) else {
                tracing::warn!(off, "constraint offset outside the input");
                continue;
            };
            let current = slot
                .clone()
                .unwrap_or_else(|| Rc::new(RefCell::new(ConstraintTree::default())));
            match &the_tree {
                None => the_tree = Some(current.clone()),
                Some(t) if Rc::ptr_eq(t, &current) => {}
                Some(t) => {
                    // Fold `current` into the canonical tree and rewrite
                    // every offset that pointed at it.
                    let absorbed: Vec<u32> = {
                        let mut tb = t.borrow_mut();
                        let cb = current.borrow();
                        for (key, expr) in cb.exprs() {
                            if tb.keys.insert(*key) {
                                tb.exprs.push((*key, expr.clone()));
                            }
                        }
                        for &d in &cb.deps {
                            tb.deps.insert(d);
                        }
                        cb.deps.iter().copied().collect()
                    };
                    let t = t.clone();
                    for idx in absorbed {
                        if let Some(slot) = self.trees.get_mut(idx as usize) {
                            *slot = Some(t.clone());
                        }
                    }
                }
            }
            self.trees[off as usize] = the_tree.clone();
        }
        the_tree
    }

    /// Merge the trees of `offsets` and commit one constraint into the
    /// result, registering every offset as a member.
    pub fn commit(&mut self, offsets: &FxHashSet<u32>, key: ConstraintKey, expr: Bool<'static>) {
        let Some(tree) = self.merge(offsets) else {
            return;
        };
        let mut t = tree.borrow_mut();
        t.insert(key, expr);
        for &off in offsets {
            if (off as usize) < self.trees.len() {
                t.deps.insert(off);
            }
        }
    }
}
