//! Scaffold Replicated Document
//!
//! Conflict-free replicated state shared by every peer of a research room.
//!
//! # Core Concepts
//!
//! - [`Doc`]: the document; three replicated fields plus observers
//! - [`ReplicatedText`]: `crdts::List` sequence behind the shared input text
//! - [`ReplicatedMap`]: last-writer-wins registers behind the graph and
//!   access-control fields
//! - [`Update`] / [`StateVector`]: the delta exchange format; a full-state
//!   sync is simply the diff against an empty state vector
//! - [`CausalGraph`]: the snapshot stored, whole, in the graph field
//!
//! # Example
//!
//! ```rust,ignore
//! use scaffold_crdt::{Doc, Field, PeerId};
//!
//! let a = Doc::new(PeerId::random());
//! let b = Doc::new(PeerId::random());
//!
//! b.observe(Field::SharedInput, |doc, _| println!("text: {}", doc.text()));
//! a.apply_local_text_edit("rainfall drives yield");
//!
//! // ship whatever b is missing
//! b.apply_update(a.encode_diff(&b.state_vector()));
//! assert_eq!(a.text(), b.text());
//! ```

#![warn(unreachable_pub)]

mod doc;
mod error;
mod graph;
mod id;
mod map;
mod observer;
mod text;
mod update;

pub use doc::{Doc, Transaction, GRAPH_KEY};
pub use error::DocError;
pub use graph::{CausalGraph, GraphEdge, GraphIssue, GraphNode, NodeKind};
pub use id::{OpId, PeerId, Stamp};
pub use map::ReplicatedMap;
pub use observer::{FieldEvent, Origin, Subscription};
pub use text::{ReplicatedText, TextOp};
pub use update::{AccessStatus, Field, Op, OpKind, StateVector, Update};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
