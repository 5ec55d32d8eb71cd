//! Node, port and edge identifiers.
//!
//! Ports are plain indices: an output port is named by its producing node and
//! a port number, an input is the consuming node itself. Holding a
//! [`PortRef`] never keeps a node alive.

use core::fmt;

/// Identifier of a node within one [`Pipeline`](super::Pipeline).
///
/// Ids are assigned sequentially from 1 and never reused within a pipeline.
/// `NodeId(0)` is the invalid sentinel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Reserved id that never names a node.
    pub const INVALID: Self = Self(0);

    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Returns `false` for the sentinel.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identifier of an edge within one pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdgeId(pub(crate) u32);

impl EdgeId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge#{}", self.0)
    }
}

/// One output port of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortRef {
    /// Producing node.
    pub node: NodeId,
    /// Output port index on that node.
    pub port: u16,
}

impl PortRef {
    /// Port `port` of `node`.
    pub const fn new(node: NodeId, port: u16) -> Self {
        Self { node, port }
    }
}

impl From<NodeId> for PortRef {
    /// The default (first) output port of `node`.
    fn from(node: NodeId) -> Self {
        Self { node, port: 0 }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

/// A directed connection from an output port into a node's input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Edge {
    pub from: PortRef,
    pub to: NodeId,
}
