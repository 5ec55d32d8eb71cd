//! Arena-indexed node graph.
//!
//! A [`Pipeline`] owns its nodes in a dense slot vector and its edges in a
//! second vector. Ports are indices ([`PortRef`]), so the graph cannot hold
//! reference cycles, and `connect` refuses edges that would create a
//! topological cycle. The pipeline is the only place node processing is
//! dispatched from.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut pipeline = Pipeline::new();
//! let input = pipeline.add_node(sink_input);
//! let mixer = pipeline.add_node(mixer);
//! let output = pipeline.add_node(sink_output);
//!
//! pipeline.connect(input.into(), mixer)?;
//! pipeline.connect(mixer.into(), output)?;
//! pipeline.process();
//! ```

mod pipeline;
mod port;

pub use pipeline::Pipeline;
pub use port::{EdgeId, NodeId, PortRef};
