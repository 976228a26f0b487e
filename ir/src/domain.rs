//! Axes and the transforms that derive leaf domains from root domains.

use std::fmt;

use crate::{Extent, IterKind, ParallelType};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Stable handle of a node in a [`Fusion`](crate::Fusion).
    NodeId,
    "T"
);
arena_id!(
    /// Stable handle of an axis.
    AxisId,
    "ax"
);
arena_id!(
    /// Stable handle of an expression.
    ExprId,
    "e"
);

/// Where an axis came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOrigin {
    Root,
    SplitOuter(AxisId),
    SplitInner(AxisId),
    /// Copy of another axis (rfactor producers, recomputed nodes).
    Clone(AxisId),
}

/// One axis of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterDomain {
    pub extent: Extent,
    pub kind: IterKind,
    pub parallel: ParallelType,
    /// Reduction axis materialized into an rfactor producer.
    pub rfactor_product: bool,
    /// Block-level extent rounded up to a warp multiple at launch.
    pub padded_to_warp: bool,
    pub origin: AxisOrigin,
}

impl IterDomain {
    pub fn new(extent: impl Into<Extent>, kind: IterKind) -> Self {
        Self {
            extent: extent.into(),
            kind,
            parallel: ParallelType::Serial,
            rfactor_product: false,
            padded_to_warp: false,
            origin: AxisOrigin::Root,
        }
    }

    pub fn iteration(extent: impl Into<Extent>) -> Self {
        Self::new(extent, IterKind::Iteration)
    }

    pub fn reduction(extent: impl Into<Extent>) -> Self {
        Self::new(extent, IterKind::Reduction)
    }

    pub fn broadcast() -> Self {
        Self::new(1, IterKind::Broadcast)
    }

    pub fn is_reduction(&self) -> bool {
        self.kind == IterKind::Reduction
    }

    pub fn is_broadcast(&self) -> bool {
        self.kind == IterKind::Broadcast
    }

    pub fn is_iteration(&self) -> bool {
        self.kind == IterKind::Iteration
    }

    /// Child axis of a split: same kind, inherits the tag.
    pub(crate) fn derived(&self, extent: Extent, origin: AxisOrigin) -> Self {
        Self { extent, kind: self.kind, parallel: self.parallel, rfactor_product: false, padded_to_warp: false, origin }
    }

    pub(crate) fn cloned_from(&self, source: crate::AxisId) -> Self {
        Self { origin: AxisOrigin::Clone(source), ..self.clone() }
    }
}

impl fmt::Display for IterDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{{{}}}", self.kind.letter(), self.parallel, self.extent)?;
        if self.rfactor_product {
            f.write_str("rf")?;
        }
        Ok(())
    }
}

/// Leaf-domain transform, recorded in node coordinates at the time it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// Replace `axis` by two axes; `inner_split` puts `factor` on the inner one.
    Split { axis: usize, factor: Extent, inner_split: bool },
    /// `perm[new_position] = old_position`.
    Reorder { perm: Vec<usize> },
}
