//! Expression wrapper over the two sorts the serializer produces.
//!
//! LLVM has no boolean type, so comparison results arrive as width-1
//! integers while the solver wants real booleans. [`Sym`] keeps the two
//! apart and lifts between them only where the original protocol does.

use z3::Context;
use z3::ast::{Ast, BV, Bool};

use crate::error::SolveError;

/// A serialized expression: bit-vector or boolean.
#[derive(Clone, Debug)]
pub enum Sym {
    Bv(BV<'static>),
    Bool(Bool<'static>),
}

impl Sym {
    #[must_use]
    pub fn is_bool(&self) -> bool {
        matches!(self, Sym::Bool(_))
    }

    pub fn into_bv(self) -> Result<BV<'static>, SolveError> {
        match self {
            Sym::Bv(bv) => Ok(bv),
            Sym::Bool(_) => Err(SolveError::SortMismatch),
        }
    }

    pub fn into_bool(self) -> Result<Bool<'static>, SolveError> {
        match self {
            Sym::Bool(b) => Ok(b),
            Sym::Bv(_) => Err(SolveError::SortMismatch),
        }
    }

    /// Lift a boolean to the 1-bit vector LLVM pretends it is.
    #[must_use]
    pub fn lift_to_bv(self, ctx: &'static Context) -> BV<'static> {
        match self {
            Sym::Bv(bv) => bv,
            Sym::Bool(b) => b.ite(&BV::from_u64(ctx, 1, 1), &BV::from_u64(ctx, 0, 1)),
        }
    }

    /// Equality across matching sorts.
    pub fn eq_expr(&self, other: &Sym) -> Result<Bool<'static>, SolveError> {
        match (self, other) {
            (Sym::Bv(a), Sym::Bv(b)) => Ok(a._eq(b)),
            (Sym::Bool(a), Sym::Bool(b)) => Ok(a._eq(b)),
            _ => Err(SolveError::SortMismatch),
        }
    }

    /// Disequality across matching sorts.
    pub fn neq_expr(&self, other: &Sym) -> Result<Bool<'static>, SolveError> {
        Ok(self.eq_expr(other)?.not())
    }

    #[must_use]
    pub fn simplify(&self) -> Sym {
        match self {
            Sym::Bv(bv) => Sym::Bv(bv.simplify()),
            Sym::Bool(b) => Sym::Bool(b.simplify()),
        }
    }
}
