//! Pipeline: node arena, edges and the per-tick processing walk.

use std::collections::VecDeque;

use super::port::{Edge, EdgeId, NodeId, PortRef};
use crate::error::{HpaeError, Result};
use crate::node::AudioNode;
use crate::pcm_buffer::PcmBuffer;

struct Slot<N> {
    /// `None` only while the node is being processed or was taken out.
    node: Option<Box<N>>,
    incoming: Vec<EdgeId>,
    outgoing: Vec<EdgeId>,
    produced: bool,
}

/// Owns a DAG of nodes and drives one processing tick at a time.
///
/// Each [`process`](Self::process) call visits, in topological order, every
/// node that feeds a terminal node (one with no output ports). A node sees
/// the outputs of upstream nodes that produced data this tick; upstream
/// nodes that returned `false` from `do_process` are skipped, which is how a
/// missing buffer terminates the walk for everything downstream.
///
/// Node and edge indices freed by removal are reused, so a long-lived
/// pipeline that keeps adding and removing sessions stays the same size.
pub struct Pipeline<N: AudioNode> {
    slots: Vec<Option<Slot<N>>>,
    edges: Vec<Option<Edge>>,
    free_slots: Vec<u32>,
    free_edges: Vec<u32>,
    order: Vec<usize>,
    /// Input list allocation carried between `process` calls.
    scratch: Vec<&'static PcmBuffer>,
    dirty: bool,
}

impl<N: AudioNode> Default for Pipeline<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: AudioNode> Pipeline<N> {
    /// Creates an empty pipeline. Slot 0 is reserved for [`NodeId::INVALID`].
    pub fn new() -> Self {
        Self {
            slots: vec![None],
            edges: Vec::new(),
            free_slots: Vec::new(),
            free_edges: Vec::new(),
            order: Vec::new(),
            scratch: Vec::new(),
            dirty: false,
        }
    }

    /// Adds a node and assigns its id.
    ///
    /// Ids of removed nodes are handed out again; slot 0 never is.
    pub fn add_node(&mut self, mut node: N) -> NodeId {
        let index = self.free_slots.pop().unwrap_or(self.slots.len() as u32);
        let id = NodeId(index);
        node.node_info_mut().node_id = id;
        #[cfg(feature = "tracing")]
        tracing::debug!(node = %id, name = %node.node_info().node_name, "pipeline_add");
        let slot = Some(Slot {
            node: Some(Box::new(node)),
            incoming: Vec::new(),
            outgoing: Vec::new(),
            produced: false,
        });
        match self.slots.get_mut(index as usize) {
            Some(free) => *free = slot,
            None => self.slots.push(slot),
        }
        self.dirty = true;
        id
    }

    /// Removes a node together with every edge touching it and returns it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<N> {
        let slot = self.slot(id)?;
        let edge_ids: Vec<EdgeId> = slot
            .incoming
            .iter()
            .chain(slot.outgoing.iter())
            .copied()
            .collect();
        for edge_id in edge_ids {
            self.disconnect_internal(edge_id);
        }

        let slot = self.slots[id.0 as usize].take();
        self.free_slots.push(id.0);
        self.dirty = true;
        #[cfg(feature = "tracing")]
        tracing::debug!(node = %id, "pipeline_remove");
        slot.and_then(|s| s.node)
            .map(|node| *node)
            .ok_or(HpaeError::NodeNotFound(id))
    }

    /// Returns `true` if `id` names a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.slot(id).is_ok()
    }

    /// Shared access to a node.
    pub fn node(&self, id: NodeId) -> Option<&N> {
        self.slot(id).ok()?.node.as_deref()
    }

    /// Exclusive access to a node.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut N> {
        self.slot_mut(id).ok()?.node.as_deref_mut()
    }

    /// Ids of all live nodes, ascending.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| NodeId(i as u32))
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|e| e.is_some()).count()
    }

    /// Connects output port `from` into node `to`.
    ///
    /// Fails if either node is missing, the port does not exist, the edge
    /// already exists or it would close a cycle. On success the consuming
    /// node's [`AudioNode::connect`] hook runs.
    pub fn connect(&mut self, from: PortRef, to: NodeId) -> Result<EdgeId> {
        let ports = self
            .node(from.node)
            .ok_or(HpaeError::NodeNotFound(from.node))?
            .output_port_count();
        if !self.contains(to) {
            return Err(HpaeError::NodeNotFound(to));
        }
        if from.port >= ports {
            return Err(HpaeError::invalid_param(format!(
                "{} has {ports} output ports",
                from.node
            )));
        }
        if self.find_edge(from, to).is_some() {
            return Err(HpaeError::DuplicateEdge(from, to));
        }
        // A cycle exists if `to` can already reach the producer.
        if from.node == to || self.can_reach(to, from.node) {
            return Err(HpaeError::CycleDetected(from, to));
        }

        let edge = Some(Edge { from, to });
        let edge_id = match self.free_edges.pop() {
            Some(index) => {
                self.edges[index as usize] = edge;
                EdgeId(index)
            }
            None => {
                self.edges.push(edge);
                EdgeId(self.edges.len() as u32 - 1)
            }
        };
        self.slot_mut(from.node)?.outgoing.push(edge_id);
        self.slot_mut(to)?.incoming.push(edge_id);
        self.dirty = true;

        self.notify(from.node, to, true);
        #[cfg(feature = "tracing")]
        tracing::debug!(from = %from, to = %to, "pipeline_connect");
        Ok(edge_id)
    }

    /// Removes one edge and runs the consumer's [`AudioNode::disconnect`] hook.
    pub fn disconnect(&mut self, id: EdgeId) -> Result<()> {
        if self.edges.get(id.0 as usize).and_then(Option::as_ref).is_none() {
            return Err(HpaeError::EdgeNotFound(id));
        }
        self.disconnect_internal(id);
        #[cfg(feature = "tracing")]
        tracing::debug!(edge = %id, "pipeline_disconnect");
        Ok(())
    }

    /// Removes every edge from any port of `from` into `to`.
    ///
    /// Returns the number of edges removed.
    pub fn disconnect_nodes(&mut self, from: NodeId, to: NodeId) -> usize {
        let Ok(slot) = self.slot(to) else {
            return 0;
        };
        let ids: Vec<EdgeId> = slot
            .incoming
            .iter()
            .copied()
            .filter(|e| self.edge(*e).is_some_and(|edge| edge.from.node == from))
            .collect();
        for id in &ids {
            self.disconnect_internal(*id);
        }
        ids.len()
    }

    /// Removes every edge into `id`.
    pub fn disconnect_all_inputs(&mut self, id: NodeId) -> usize {
        let Ok(slot) = self.slot(id) else {
            return 0;
        };
        let ids = slot.incoming.clone();
        for edge in &ids {
            self.disconnect_internal(*edge);
        }
        ids.len()
    }

    /// Removes every edge out of `id`.
    pub fn disconnect_all_outputs(&mut self, id: NodeId) -> usize {
        let Ok(slot) = self.slot(id) else {
            return 0;
        };
        let ids = slot.outgoing.clone();
        for edge in &ids {
            self.disconnect_internal(*edge);
        }
        ids.len()
    }

    /// Edge from `from` into `to`, if present.
    pub fn find_edge(&self, from: PortRef, to: NodeId) -> Option<EdgeId> {
        let slot = self.slot(to).ok()?;
        slot.incoming
            .iter()
            .copied()
            .find(|e| self.edge(*e).is_some_and(|edge| edge.from == from))
    }

    /// Number of edges into `id`.
    pub fn pre_out_num(&self, id: NodeId) -> usize {
        self.slot(id).map_or(0, |s| s.incoming.len())
    }

    /// Number of edges out of `id`.
    pub fn out_num(&self, id: NodeId) -> usize {
        self.slot(id).map_or(0, |s| s.outgoing.len())
    }

    /// Producers feeding `id`, in edge order.
    pub fn inputs_of(&self, id: NodeId) -> Vec<PortRef> {
        self.slot(id).map_or_else(
            |_| Vec::new(),
            |s| s.incoming.iter().filter_map(|e| self.edge(*e)).map(|e| e.from).collect(),
        )
    }

    /// Consumers fed by `id`, in edge order.
    pub fn outputs_of(&self, id: NodeId) -> Vec<NodeId> {
        self.slot(id).map_or_else(
            |_| Vec::new(),
            |s| s.outgoing.iter().filter_map(|e| self.edge(*e)).map(|e| e.to).collect(),
        )
    }

    /// Output produced on `port` by node `id` during the last tick.
    ///
    /// `None` if the node did not produce output in that tick.
    pub fn last_output(&self, id: NodeId, port: u16) -> Option<&PcmBuffer> {
        let slot = self.slot(id).ok()?;
        if !slot.produced {
            return None;
        }
        slot.node.as_ref()?.output(port)
    }

    /// Runs one tick. Returns the number of nodes that produced output.
    pub fn process(&mut self) -> usize {
        if self.dirty {
            self.rebuild_order();
        }
        for slot in self.slots.iter_mut().flatten() {
            slot.produced = false;
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        let mut produced_count = 0;
        for pos in 0..self.order.len() {
            let idx = self.order[pos];
            let Some(mut node) = self.slots[idx].as_mut().and_then(|s| s.node.take()) else {
                continue;
            };

            let produced = {
                let mut inputs = recycle(scratch);
                if let Some(slot) = &self.slots[idx] {
                    for edge_id in &slot.incoming {
                        let Some(edge) = self.edge(*edge_id) else {
                            continue;
                        };
                        if let Some(upstream) = &self.slots[edge.from.node.0 as usize]
                            && upstream.produced
                            && let Some(buf) =
                                upstream.node.as_ref().and_then(|n| n.output(edge.from.port))
                        {
                            inputs.push(buf);
                        }
                    }
                }
                let produced = node.do_process(&inputs);
                scratch = recycle(inputs);
                produced
            };

            if let Some(slot) = self.slots[idx].as_mut() {
                slot.node = Some(node);
                slot.produced = produced;
            }
            produced_count += usize::from(produced);
        }
        self.scratch = scratch;
        produced_count
    }

    /// Resets every node.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            if let Some(node) = slot.node.as_mut() {
                node.reset();
            }
            slot.produced = false;
        }
    }

    /// Node ids in the order the next tick will visit them.
    pub fn process_order(&mut self) -> Vec<NodeId> {
        if self.dirty {
            self.rebuild_order();
        }
        self.order.iter().map(|&i| NodeId(i as u32)).collect()
    }

    // --- internals ---

    fn slot(&self, id: NodeId) -> Result<&Slot<N>> {
        self.slots
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(HpaeError::NodeNotFound(id))
    }

    fn slot_mut(&mut self, id: NodeId) -> Result<&mut Slot<N>> {
        self.slots
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(HpaeError::NodeNotFound(id))
    }

    fn edge(&self, id: EdgeId) -> Option<Edge> {
        self.edges.get(id.0 as usize).copied().flatten()
    }

    fn disconnect_internal(&mut self, id: EdgeId) {
        let Some(edge) = self.edges.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        self.free_edges.push(id.0);
        if let Ok(slot) = self.slot_mut(edge.from.node) {
            slot.outgoing.retain(|e| *e != id);
        }
        if let Ok(slot) = self.slot_mut(edge.to) {
            slot.incoming.retain(|e| *e != id);
        }
        self.dirty = true;
        self.notify(edge.from.node, edge.to, false);
    }

    fn notify(&mut self, from: NodeId, to: NodeId, connected: bool) {
        let Some(pre) = self.node(from).map(|n| n.node_info().clone()) else {
            return;
        };
        if let Some(node) = self.node_mut(to) {
            if connected {
                node.connect(&pre);
            } else {
                node.disconnect(&pre);
            }
        }
    }

    /// Depth-first reachability over outgoing edges.
    fn can_reach(&self, from: NodeId, target: NodeId) -> bool {
        let mut visited = vec![false; self.slots.len()];
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            let idx = id.0 as usize;
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            if let Ok(slot) = self.slot(id) {
                stack.extend(slot.outgoing.iter().filter_map(|e| self.edge(*e)).map(|e| e.to));
            }
        }
        false
    }

    /// Kahn sort over the ancestors of terminal nodes.
    fn rebuild_order(&mut self) {
        let n = self.slots.len();
        let mut live = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot
                && slot.node.as_ref().is_some_and(|node| node.output_port_count() == 0)
            {
                live[i] = true;
                stack.push(i);
            }
        }
        while let Some(idx) = stack.pop() {
            let Some(slot) = &self.slots[idx] else {
                continue;
            };
            for edge in slot.incoming.iter().filter_map(|e| self.edge(*e)) {
                let up = edge.from.node.0 as usize;
                if !live[up] {
                    live[up] = true;
                    stack.push(up);
                }
            }
        }

        let mut in_degree = vec![0usize; n];
        for (i, slot) in self.slots.iter().enumerate() {
            if live[i]
                && let Some(slot) = slot
            {
                in_degree[i] = slot.incoming.len();
            }
        }
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| live[i] && in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(queue.len());
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            let Some(slot) = &self.slots[idx] else {
                continue;
            };
            for edge in slot.outgoing.iter().filter_map(|e| self.edge(*e)) {
                let to = edge.to.0 as usize;
                if live[to] {
                    in_degree[to] -= 1;
                    if in_degree[to] == 0 {
                        queue.push_back(to);
                    }
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(nodes = order.len(), "pipeline_sort");
        self.order = order;
        self.dirty = false;
    }
}

/// Empties `inputs` and hands its allocation back with a fresh lifetime.
fn recycle<'a, 'b>(mut inputs: Vec<&'a PcmBuffer>) -> Vec<&'b PcmBuffer> {
    inputs.clear();
    inputs.into_iter().filter_map(|_| None).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeInfo, NodeType};
    use crate::pcm_buffer::{BufferState, PcmBufferInfo};

    /// Emits a constant each tick.
    struct Source {
        info: NodeInfo,
        out: PcmBuffer,
        value: f32,
        ticks: usize,
    }

    /// Sums inputs.
    struct Sum {
        info: NodeInfo,
        out: PcmBuffer,
    }

    /// Terminal node that records the last input.
    struct Sink {
        info: NodeInfo,
        last: Option<f32>,
        inputs: usize,
        connects: usize,
    }

    enum TestNode {
        Source(Source),
        Sum(Sum),
        Sink(Sink),
    }

    fn geometry() -> PcmBufferInfo {
        PcmBufferInfo::new(1, 4, 48000, 4)
    }

    fn source(value: f32) -> TestNode {
        TestNode::Source(Source {
            info: NodeInfo::default(),
            out: PcmBuffer::new(geometry()),
            value,
            ticks: 0,
        })
    }

    fn sum() -> TestNode {
        TestNode::Sum(Sum {
            info: NodeInfo::default(),
            out: PcmBuffer::new(geometry()),
        })
    }

    fn sink() -> TestNode {
        TestNode::Sink(Sink {
            info: NodeInfo::default(),
            last: None,
            inputs: 0,
            connects: 0,
        })
    }

    impl AudioNode for TestNode {
        fn node_info(&self) -> &NodeInfo {
            match self {
                Self::Source(n) => &n.info,
                Self::Sum(n) => &n.info,
                Self::Sink(n) => &n.info,
            }
        }

        fn node_info_mut(&mut self) -> &mut NodeInfo {
            match self {
                Self::Source(n) => &mut n.info,
                Self::Sum(n) => &mut n.info,
                Self::Sink(n) => &mut n.info,
            }
        }

        fn node_type(&self) -> NodeType {
            match self {
                Self::Source(_) => NodeType::SinkInput,
                Self::Sum(_) => NodeType::Mixer,
                Self::Sink(_) => NodeType::SinkOutput,
            }
        }

        fn output_port_count(&self) -> u16 {
            match self {
                Self::Sink(_) => 0,
                _ => 1,
            }
        }

        fn do_process(&mut self, inputs: &[&PcmBuffer]) -> bool {
            match self {
                Self::Source(n) => {
                    n.ticks += 1;
                    n.out.data_mut().fill(n.value);
                    n.out.set_state(BufferState::NONE);
                    true
                }
                Self::Sum(n) => {
                    if inputs.is_empty() {
                        return false;
                    }
                    n.out.reset();
                    for input in inputs {
                        n.out += input;
                    }
                    true
                }
                Self::Sink(n) => {
                    n.inputs = inputs.len();
                    n.last = inputs.first().map(|b| b.data()[0]);
                    false
                }
            }
        }

        fn output(&self, _port: u16) -> Option<&PcmBuffer> {
            match self {
                Self::Source(n) => Some(&n.out),
                Self::Sum(n) => Some(&n.out),
                Self::Sink(_) => None,
            }
        }

        fn connect(&mut self, _pre: &NodeInfo) {
            if let Self::Sink(n) = self {
                n.connects += 1;
            }
        }
    }

    fn sink_state(p: &Pipeline<TestNode>, id: NodeId) -> (Option<f32>, usize) {
        match p.node(id) {
            Some(TestNode::Sink(s)) => (s.last, s.inputs),
            _ => panic!("not a sink"),
        }
    }

    fn source_ticks(p: &Pipeline<TestNode>, id: NodeId) -> usize {
        match p.node(id) {
            Some(TestNode::Source(s)) => s.ticks,
            _ => panic!("not a source"),
        }
    }

    #[test]
    fn ids_start_at_one_and_are_assigned() {
        let mut p = Pipeline::new();
        let a = p.add_node(source(0.1));
        assert_eq!(a, NodeId(1));
        assert_eq!(p.node(a).unwrap().node_info().node_id, a);
        assert!(!p.contains(NodeId::INVALID));
    }

    #[test]
    fn mixes_two_sources_into_sink() {
        let mut p = Pipeline::new();
        let a = p.add_node(source(0.25));
        let b = p.add_node(source(0.5));
        let m = p.add_node(sum());
        let s = p.add_node(sink());
        p.connect(a.into(), m).unwrap();
        p.connect(b.into(), m).unwrap();
        p.connect(m.into(), s).unwrap();

        assert_eq!(p.process(), 3);
        assert_eq!(sink_state(&p, s), (Some(0.75), 1));
        assert_eq!(p.pre_out_num(m), 2);
        assert!(p.last_output(m, 0).is_some());
    }

    #[test]
    fn connect_hook_runs() {
        let mut p = Pipeline::new();
        let a = p.add_node(source(0.0));
        let s = p.add_node(sink());
        p.connect(a.into(), s).unwrap();
        match p.node(s) {
            Some(TestNode::Sink(n)) => assert_eq!(n.connects, 1),
            _ => unreachable!(),
        }
    }

    #[test]
    fn rejects_cycles_and_duplicates() {
        let mut p = Pipeline::new();
        let a = p.add_node(sum());
        let b = p.add_node(sum());
        p.connect(a.into(), b).unwrap();
        assert!(matches!(
            p.connect(a.into(), b),
            Err(HpaeError::DuplicateEdge(_, _))
        ));
        assert!(matches!(
            p.connect(b.into(), a),
            Err(HpaeError::CycleDetected(_, _))
        ));
        assert!(matches!(
            p.connect(a.into(), a),
            Err(HpaeError::CycleDetected(_, _))
        ));
    }

    #[test]
    fn rejects_missing_ports() {
        let mut p = Pipeline::new();
        let a = p.add_node(source(0.0));
        let s = p.add_node(sink());
        assert!(matches!(
            p.connect(PortRef::new(a, 1), s),
            Err(HpaeError::InvalidParam(_))
        ));
        assert!(matches!(
            p.connect(s.into(), a),
            Err(HpaeError::InvalidParam(_))
        ));
        assert!(matches!(
            p.connect(a.into(), NodeId(99)),
            Err(HpaeError::NodeNotFound(_))
        ));
    }

    #[test]
    fn remove_node_drops_all_edges() {
        let mut p = Pipeline::new();
        let a = p.add_node(source(0.1));
        let m = p.add_node(sum());
        let s = p.add_node(sink());
        p.connect(a.into(), m).unwrap();
        p.connect(m.into(), s).unwrap();

        let removed = p.remove_node(m).unwrap();
        assert!(matches!(removed, TestNode::Sum(_)));
        assert_eq!(p.edge_count(), 0);
        assert_eq!(p.out_num(a), 0);
        assert_eq!(p.pre_out_num(s), 0);
        assert!(p.remove_node(m).is_err());
    }

    #[test]
    fn unreachable_nodes_are_not_processed() {
        let mut p = Pipeline::new();
        let a = p.add_node(source(0.1));
        let orphan = p.add_node(source(0.2));
        let s = p.add_node(sink());
        p.connect(a.into(), s).unwrap();

        p.process();
        assert_eq!(source_ticks(&p, a), 1);
        assert_eq!(source_ticks(&p, orphan), 0);
        assert!(p.last_output(orphan, 0).is_none());
    }

    #[test]
    fn empty_mixer_stops_the_walk() {
        let mut p = Pipeline::new();
        let m = p.add_node(sum());
        let s = p.add_node(sink());
        p.connect(m.into(), s).unwrap();
        p.process();
        assert_eq!(sink_state(&p, s), (None, 0));
    }

    #[test]
    fn add_remove_reuses_slots() {
        let mut p = Pipeline::new();
        let s = p.add_node(sink());
        for _ in 0..10_000 {
            let a = p.add_node(source(0.1));
            let e = p.connect(a.into(), s).unwrap();
            p.disconnect(e).unwrap();
            p.connect(a.into(), s).unwrap();
            p.remove_node(a).unwrap();
        }
        assert_eq!(p.node_count(), 1);
        assert_eq!(p.edge_count(), 0);
        assert_eq!(p.slots.len(), 3);
        assert_eq!(p.edges.len(), 1);
        assert_eq!(p.add_node(source(0.2)), NodeId(2));
    }

    #[test]
    fn reused_id_does_not_inherit_edges() {
        let mut p = Pipeline::new();
        let a = p.add_node(source(0.5));
        let s = p.add_node(sink());
        p.connect(a.into(), s).unwrap();
        p.remove_node(a).unwrap();

        let b = p.add_node(source(0.25));
        assert_eq!(b, a);
        assert_eq!(p.out_num(b), 0);
        assert_eq!(p.pre_out_num(s), 0);
        p.connect(b.into(), s).unwrap();
        p.process();
        assert_eq!(sink_state(&p, s), (Some(0.25), 1));
    }

    #[test]
    fn input_list_allocation_is_kept() {
        let mut p = Pipeline::new();
        let a = p.add_node(source(0.25));
        let b = p.add_node(source(0.5));
        let m = p.add_node(sum());
        let s = p.add_node(sink());
        p.connect(a.into(), m).unwrap();
        p.connect(b.into(), m).unwrap();
        p.connect(m.into(), s).unwrap();

        p.process();
        let capacity = p.scratch.capacity();
        assert!(capacity >= 2);
        for _ in 0..100 {
            p.process();
        }
        assert_eq!(p.scratch.capacity(), capacity);
        assert!(p.scratch.is_empty());
    }

    #[test]
    fn disconnect_nodes_and_order() {
        let mut p = Pipeline::new();
        let a = p.add_node(source(0.1));
        let m = p.add_node(sum());
        let s = p.add_node(sink());
        p.connect(a.into(), m).unwrap();
        let e = p.connect(m.into(), s).unwrap();
        assert_eq!(p.process_order(), vec![a, m, s]);

        assert_eq!(p.disconnect_nodes(a, m), 1);
        assert_eq!(p.process_order(), vec![m, s]);
        p.disconnect(e).unwrap();
        assert!(matches!(p.disconnect(e), Err(HpaeError::EdgeNotFound(_))));
        assert_eq!(p.process_order(), vec![s]);
    }
}
