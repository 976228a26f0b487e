//! Textual dump of a fusion.
//!
//! ```text
//! T0_g[iS{128}, iS{1024}]
//! T2_l[iblockIdx.x{128}, rthreadIdx.x{256}rf, ...] = reduction(Add)(T0) ca(1)
//! ```

use std::fmt;

use crate::fusion::ExprKind;
use crate::{Fusion, MemoryType, NodeId};

pub struct NodeDisplay<'a> {
    fusion: &'a Fusion,
    node: NodeId,
}

impl Fusion {
    pub fn display_node(&self, node: NodeId) -> NodeDisplay<'_> {
        NodeDisplay { fusion: self, node }
    }
}

impl fmt::Display for NodeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(n) = self.fusion.node(self.node) else {
            return write!(f, "{}<removed>", self.node);
        };
        let mem = match n.memory {
            MemoryType::Local => 'l',
            MemoryType::Shared => 's',
            MemoryType::Global => 'g',
        };
        write!(f, "{}_{}[", self.node, mem)?;
        for (i, &axis) in n.leaf().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", self.fusion.axis(axis))?;
        }
        f.write_str("]")
    }
}

impl fmt::Display for ExprKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set => f.write_str("set"),
            Self::Unary(op) => write!(f, "{op:?}"),
            Self::Binary(op) => write!(f, "{op:?}"),
            Self::Reduction(op) => write!(f, "reduction({op:?})"),
            Self::GroupedReduction(ops) => write!(f, "grouped_reduction({ops:?})"),
            Self::Broadcast(flags) => write!(f, "broadcast({flags:?})"),
        }
    }
}

impl fmt::Display for Fusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &input in self.inputs() {
            writeln!(f, "{}", self.display_node(input))?;
        }
        for id in self.exprs() {
            let expr = self.expr(id);
            for (i, &out) in expr.outputs.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", self.display_node(out))?;
            }
            write!(f, " = {}(", expr.kind)?;
            for (i, input) in expr.inputs.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{input}")?;
            }
            f.write_str(")")?;
            if let Some(&out) = expr.outputs.first()
                && let Ok(n) = self.node(out)
                && n.compute_at > 0
            {
                write!(f, " ca({})", n.compute_at)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
