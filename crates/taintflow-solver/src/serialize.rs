//! Recursive serializer from the label DAG to bit-vector expressions.
//!
//! Input bytes become 8-bit constants named by their file offset, so a
//! model assignment maps directly back onto the input file. Serialized
//! expressions and the input-byte offsets they depend on are memoized per
//! label; the DAG is topologically ordered by construction, so recursion
//! terminates without cycle tracking.

use std::collections::HashMap;

use rustc_hash::FxHashSet;
use z3::ast::{Ast, BV, Bool};
use z3::{Context, Symbol};

use taintflow_core::label::{CONST_OFFSET, INITIALIZING_LABEL, Label};
use taintflow_core::{TaintRuntime, op};

use crate::error::SolveError;
use crate::sym::Sym;

/// Offsets of input bytes an expression transitively reads.
pub type DepSet = FxHashSet<u32>;

/// Per-session serializer state: memoized expressions and dependency sets.
pub struct Serializer {
    ctx: &'static Context,
    exprs: HashMap<Label, Sym>,
    deps: HashMap<Label, DepSet>,
    /// Width of the `fsize` symbol once one has been serialized; models can
    /// then be asked for a file-length assignment.
    pub fsize_width: Option<u32>,
}

impl Serializer {
    #[must_use]
    pub fn new(ctx: &'static Context) -> Self {
        Self {
            ctx,
            exprs: HashMap::new(),
            deps: HashMap::new(),
            fsize_width: None,
        }
    }

    #[must_use]
    pub fn ctx(&self) -> &'static Context {
        self.ctx
    }

    /// 8-bit constant standing for the input byte at `offset`.
    #[must_use]
    pub fn byte_const(&self, offset: u32) -> BV<'static> {
        BV::new_const(self.ctx, Symbol::Int(offset), 8)
    }

    /// Serialize `label`, merging its input-byte dependencies into `deps`.
    pub fn serialize(
        &mut self,
        rt: &TaintRuntime,
        label: Label,
        deps: &mut DepSet,
    ) -> Result<Sym, SolveError> {
        if label < CONST_OFFSET || label == INITIALIZING_LABEL {
            return Err(SolveError::InvalidLabel(label));
        }

        if let Some(cached) = self.exprs.get(&label) {
            if let Some(d) = self.deps.get(&label) {
                deps.extend(d.iter().copied());
            }
            return Ok(cached.clone());
        }

        let info = rt.store().get(label);
        tracing::trace!(
            label,
            l1 = info.l1,
            l2 = info.l2,
            op = info.op,
            size = info.size,
            "serialize"
        );

        match op::base_op(info.op) {
            op::INPUT => {
                let offset = info.op1 as u32;
                deps.insert(offset);
                info.set_tree_size(1);
                // One byte constant; caching buys nothing here.
                Ok(Sym::Bv(self.byte_const(offset)))
            }
            op::LOAD => self.serialize_load(rt, label, deps),
            op::ZEXT => {
                let base = self
                    .serialize(rt, info.l1, deps)?
                    .lift_to_bv(self.ctx);
                let ext = extension_bits(info.size, base.get_size(), label)?;
                info.set_tree_size(rt.store().get(info.l1).tree_size());
                Ok(self.cache(label, Sym::Bv(base.zero_ext(ext)), deps))
            }
            op::SEXT => {
                let base = self.serialize(rt, info.l1, deps)?.into_bv()?;
                let ext = extension_bits(info.size, base.get_size(), label)?;
                info.set_tree_size(rt.store().get(info.l1).tree_size());
                Ok(self.cache(label, Sym::Bv(base.sign_ext(ext)), deps))
            }
            op::TRUNC => {
                let base = self.serialize(rt, info.l1, deps)?.into_bv()?;
                info.set_tree_size(rt.store().get(info.l1).tree_size());
                let out = base.extract(u32::from(info.size) - 1, 0);
                Ok(self.cache(label, Sym::Bv(out), deps))
            }
            op::EXTRACT => {
                let base = self.serialize(rt, info.l1, deps)?.into_bv()?;
                info.set_tree_size(rt.store().get(info.l1).tree_size());
                let low = info.op2 as u32;
                let out = base.extract(low + u32::from(info.size) - 1, low);
                Ok(self.cache(label, Sym::Bv(out), deps))
            }
            op::NOT => {
                if info.l2 == 0 || info.size != 1 {
                    return Err(SolveError::MalformedNode {
                        label,
                        what: "Not requires a boolean second operand",
                    });
                }
                let e = self.serialize(rt, info.l2, deps)?.into_bool()?;
                info.set_tree_size(rt.store().get(info.l2).tree_size());
                Ok(self.cache(label, Sym::Bool(e.not()), deps))
            }
            op::NEG => {
                if info.l2 == 0 {
                    return Err(SolveError::MalformedNode {
                        label,
                        what: "Neg requires a symbolic second operand",
                    });
                }
                let e = self.serialize(rt, info.l2, deps)?.into_bv()?;
                info.set_tree_size(rt.store().get(info.l2).tree_size());
                Ok(self.cache(label, Sym::Bv(e.bvneg()), deps))
            }
            op::FMEMCMP => self.serialize_fmemcmp(rt, label, deps),
            op::FSIZE => {
                let width = u32::from(info.size);
                let base = BV::new_const(self.ctx, Symbol::String("fsize".to_string()), width);
                info.set_tree_size(1);
                self.fsize_width = Some(width);
                // Reads through an offset slot; not cacheable.
                if info.op1 != 0 {
                    let offset = BV::from_u64(self.ctx, info.op1, width);
                    Ok(Sym::Bv(base.bvsub(&offset)))
                } else {
                    Ok(Sym::Bv(base))
                }
            }
            _ => self.serialize_binary(rt, label, deps),
        }
    }

    /// `Load(base, n)`: little-endian concatenation of the byte constants at
    /// `n` consecutive file offsets.
    fn serialize_load(
        &mut self,
        rt: &TaintRuntime,
        label: Label,
        deps: &mut DepSet,
    ) -> Result<Sym, SolveError> {
        let info = rt.store().get(label);
        let offset = rt.store().get(info.l1).op1 as u32;
        let mut out = self.byte_const(offset);
        deps.insert(offset);
        for i in 1..info.l2 {
            let byte = self.byte_const(offset + i);
            out = byte.concat(&out);
            deps.insert(offset + i);
        }
        info.set_tree_size(1);
        Ok(self.cache(label, Sym::Bv(out), deps))
    }

    /// `fmemcmp(a, b)` models a span comparison as `ite(a = b, 0, 1)`.
    fn serialize_fmemcmp(
        &mut self,
        rt: &TaintRuntime,
        label: Label,
        deps: &mut DepSet,
    ) -> Result<Sym, SolveError> {
        let info = rt.store().get(label);
        let lhs = if info.l1 >= CONST_OFFSET {
            self.serialize(rt, info.l1, deps)?.into_bv()?
        } else {
            self.read_concrete(info.op1, info.size)?
        };
        if info.l2 < CONST_OFFSET {
            return Err(SolveError::MalformedNode {
                label,
                what: "fmemcmp requires a symbolic second span",
            });
        }
        let rhs = self.serialize(rt, info.l2, deps)?.into_bv()?;
        info.set_tree_size(1);
        let zero = BV::from_u64(self.ctx, 0, 32);
        let one = BV::from_u64(self.ctx, 1, 32);
        // Reads live memory for the concrete side; never cached.
        Ok(Sym::Bv(lhs._eq(&rhs).ite(&zero, &one)))
    }

    /// Build a literal from `size` bytes of traced-program memory,
    /// little-endian.
    fn read_concrete(&self, addr: u64, size: u16) -> Result<BV<'static>, SolveError> {
        if addr == 0 || size == 0 {
            return Err(SolveError::BadConcreteRead);
        }
        let ptr = addr as *const u8;
        // SAFETY: the instrumentation recorded `addr` as the live concrete
        // operand of a memcmp-like call in the traced program; the span was
        // readable when recorded and the serializer runs in-process.
        let first = unsafe { ptr.read() };
        let mut val = BV::from_u64(self.ctx, u64::from(first), 8);
        for i in 1..u64::from(size) {
            // SAFETY: as above, `addr + i` stays inside the compared span.
            let byte = unsafe { ptr.add(i as usize).read() };
            val = BV::from_u64(self.ctx, u64::from(byte), 8).concat(&val);
        }
        Ok(val)
    }

    /// Binary operators, comparisons, and concatenation.
    fn serialize_binary(
        &mut self,
        rt: &TaintRuntime,
        label: Label,
        deps: &mut DepSet,
    ) -> Result<Sym, SolveError> {
        let info = rt.store().get(label);
        let base = op::base_op(info.op);
        let width_1 = info.size == 1;

        // A concat with a constant side covers only the symbolic side's
        // complement of the result width.
        let mut lhs_width = u32::from(info.size);
        if base == op::CONCAT && info.l1 == 0 {
            debug_assert!(info.l2 >= CONST_OFFSET);
            lhs_width = u32::from(info.size) - u32::from(rt.store().get(info.l2).size);
        }
        let lhs = if info.l1 >= CONST_OFFSET {
            self.serialize(rt, info.l1, deps)?.simplify()
        } else if width_1 {
            Sym::Bool(Bool::from_bool(self.ctx, info.op1 == 1))
        } else {
            Sym::Bv(BV::from_u64(self.ctx, info.op1, lhs_width))
        };

        let mut rhs_width = u32::from(info.size);
        if base == op::CONCAT && info.l2 == 0 {
            debug_assert!(info.l1 >= CONST_OFFSET);
            rhs_width = u32::from(info.size) - u32::from(rt.store().get(info.l1).size);
        }
        let rhs = if info.l2 >= CONST_OFFSET {
            let mut rhs_deps = DepSet::default();
            let rhs = self.serialize(rt, info.l2, &mut rhs_deps)?.simplify();
            deps.extend(rhs_deps.iter().copied());
            rhs
        } else if width_1 {
            Sym::Bool(Bool::from_bool(self.ctx, info.op2 == 1))
        } else {
            Sym::Bv(BV::from_u64(self.ctx, info.op2, rhs_width))
        };

        info.set_tree_size(
            rt.store()
                .get(info.l1)
                .tree_size()
                .saturating_add(rt.store().get(info.l2).tree_size()),
        );

        let out = match base {
            // Logical and bitwise collapse onto one tag; width decides.
            op::AND => match (lhs, rhs) {
                (Sym::Bool(a), Sym::Bool(b)) => Sym::Bool(Bool::and(self.ctx, &[&a, &b])),
                (Sym::Bv(a), Sym::Bv(b)) => Sym::Bv(a.bvand(&b)),
                _ => return Err(SolveError::SortMismatch),
            },
            op::OR => match (lhs, rhs) {
                (Sym::Bool(a), Sym::Bool(b)) => Sym::Bool(Bool::or(self.ctx, &[&a, &b])),
                (Sym::Bv(a), Sym::Bv(b)) => Sym::Bv(a.bvor(&b)),
                _ => return Err(SolveError::SortMismatch),
            },
            op::XOR => match (lhs, rhs) {
                (Sym::Bool(a), Sym::Bool(b)) => Sym::Bool(a.xor(&b)),
                (Sym::Bv(a), Sym::Bv(b)) => Sym::Bv(a.bvxor(&b)),
                _ => return Err(SolveError::SortMismatch),
            },
            op::SHL => Sym::Bv(lhs.into_bv()?.bvshl(&rhs.into_bv()?)),
            op::LSHR => Sym::Bv(lhs.into_bv()?.bvlshr(&rhs.into_bv()?)),
            op::ASHR => Sym::Bv(lhs.into_bv()?.bvashr(&rhs.into_bv()?)),
            op::ADD => Sym::Bv(lhs.into_bv()?.bvadd(&rhs.into_bv()?)),
            op::SUB => Sym::Bv(lhs.into_bv()?.bvsub(&rhs.into_bv()?)),
            op::MUL => Sym::Bv(lhs.into_bv()?.bvmul(&rhs.into_bv()?)),
            op::UDIV => Sym::Bv(lhs.into_bv()?.bvudiv(&rhs.into_bv()?)),
            op::SDIV => Sym::Bv(lhs.into_bv()?.bvsdiv(&rhs.into_bv()?)),
            op::UREM => Sym::Bv(lhs.into_bv()?.bvurem(&rhs.into_bv()?)),
            op::SREM => Sym::Bv(lhs.into_bv()?.bvsrem(&rhs.into_bv()?)),
            op::ICMP => Sym::Bool(compare(&lhs, &rhs, op::predicate_of(info.op))?),
            // Little endian: the second operand is the high part.
            op::CONCAT => Sym::Bv(rhs.into_bv()?.concat(&lhs.into_bv()?)),
            other => return Err(SolveError::UnsupportedOp(other)),
        };
        Ok(self.cache(label, out, deps))
    }

    fn cache(&mut self, label: Label, sym: Sym, deps: &DepSet) -> Sym {
        self.exprs.insert(label, sym.clone());
        self.deps.insert(label, deps.clone());
        sym
    }
}

fn extension_bits(target: u16, have: u32, label: Label) -> Result<u32, SolveError> {
    u32::from(target)
        .checked_sub(have)
        .ok_or(SolveError::MalformedNode {
            label,
            what: "extension narrower than its operand",
        })
}

/// Build the comparison `pred(lhs, rhs)`.
pub fn compare(lhs: &Sym, rhs: &Sym, pred: u16) -> Result<Bool<'static>, SolveError> {
    use op::predicate::*;
    if let (Sym::Bool(_), Sym::Bool(_)) = (lhs, rhs) {
        // Booleans only ever compare for (in)equality.
        return match pred {
            BVEQ => lhs.eq_expr(rhs),
            BVNEQ => lhs.neq_expr(rhs),
            _ => Err(SolveError::UnsupportedPredicate(pred)),
        };
    }
    let (a, b) = match (lhs, rhs) {
        (Sym::Bv(a), Sym::Bv(b)) => (a, b),
        _ => return Err(SolveError::SortMismatch),
    };
    Ok(match pred {
        BVEQ => a._eq(b),
        BVNEQ => a._eq(b).not(),
        BVUGT => a.bvugt(b),
        BVUGE => a.bvuge(b),
        BVULT => a.bvult(b),
        BVULE => a.bvule(b),
        BVSGT => a.bvsgt(b),
        BVSGE => a.bvsge(b),
        BVSLT => a.bvslt(b),
        BVSLE => a.bvsle(b),
        other => return Err(SolveError::UnsupportedPredicate(other)),
    })
}
