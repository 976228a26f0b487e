//! Axis extents that can be either concrete or symbolic.
//!
//! Symbolic extents are opaque expressions (`blockDim.x`, `T0.size[1]`,
//! `ceilDiv(T0.size[1], 4)`); only constants are folded.

use std::fmt;
use std::sync::Arc;

use crate::ParallelType;

/// Extent of one axis.
///
/// # Examples
///
/// ```rust
/// # use kfuse_ir::Extent;
/// let e = Extent::from(1024);
/// assert_eq!(e.ceil_div(&Extent::from(4)), Extent::from(256));
///
/// let n = Extent::symbol("T0.size[1]");
/// assert!(!n.ceil_div(&Extent::from(4)).is_const());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extent {
    /// Compile-time constant.
    Const(usize),

    /// Runtime expression, kept as its rendered form.
    Symbolic(Arc<str>),
}

impl Extent {
    pub fn symbol(name: impl Into<Arc<str>>) -> Self {
        Self::Symbolic(name.into())
    }

    /// Runtime launch dimension bound to a hardware index (`blockDim.x` for `ThreadX`).
    ///
    /// Non-hardware tags have no launch dimension and are rendered by name.
    pub fn parallel_dim(ptype: ParallelType) -> Self {
        Self::symbol(ptype.dim_name().unwrap_or_else(|| ptype.name()))
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Self::Const(_))
    }

    pub fn as_const(&self) -> Option<usize> {
        match self {
            Self::Const(v) => Some(*v),
            Self::Symbolic(_) => None,
        }
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Self::Const(1))
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Self::Const(0))
    }

    /// `⌈self / factor⌉`, folded when both sides are constant.
    pub fn ceil_div(&self, factor: &Extent) -> Extent {
        match (self, factor) {
            (_, Self::Const(1)) => self.clone(),
            (Self::Const(a), Self::Const(b)) if *b > 0 => Self::Const(a.div_ceil(*b)),
            _ => Self::symbol(format!("ceilDiv({self}, {factor})")),
        }
    }
}

impl From<usize> for Extent {
    fn from(v: usize) -> Self {
        Self::Const(v)
    }
}

impl From<ParallelType> for Extent {
    fn from(ptype: ParallelType) -> Self {
        Self::parallel_dim(ptype)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(v) => write!(f, "{v}"),
            Self::Symbolic(s) => f.write_str(s),
        }
    }
}
