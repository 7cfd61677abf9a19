//! # gc-acceptor
//!
//! Heap traversal interfaces for a tracing garbage collector, and a collector built on them.
//!
//! Every pass over the heap (marking, weak reference clearing, verification, counting, heap
//! snapshots) is written as an acceptor: a sink that is handed each reference the runtime holds,
//! one call per reference. Roots outside the heap are reported in named sections; references
//! inside cells are reported through the `Trace` trait. Logical wrappers let a pass see plain
//! cell pointers and values while slots keep their compressed representation.
//!
//! ## Usage
//!
//! Usage is best illustrated by the demos provided.


mod acceptor;
mod census;
mod check;
mod collector;
mod config;
mod constants;
mod error;
mod heap;
mod heapdump;
mod identifier;
mod logical;
mod roots;
mod section;
mod snapshot;
mod statistics;
mod trace;
mod value;


pub use acceptor::{DroppingAcceptor, RootAcceptor, RootAcceptorExt, RootAcceptorWithNamesExt,
                   RootAndSlotAcceptor, RootAndSlotAcceptorWithNames, RootSectionAcceptor,
                   SlotAcceptor, WeakRefAcceptor, WeakRootAcceptor};
pub use census::{CountingAcceptor, RefCounts, SectionStats};
pub use check::CheckHeapWellFormed;
pub use collector::Collector;
pub use config::GcConfig;
pub use constants::*;
pub use error::{HeapError, HeapResult, SnapshotError, SnapshotResult};
pub use heap::{GcBox, Heap, ObjectHeader, ObjectMeta, TraceStack};
pub use heapdump::{create_snapshot, EdgeAddingAcceptor, PrimitiveNodeAcceptor,
                   SnapshotRootAcceptor, SnapshotRootSectionAcceptor};
pub use identifier::IdentifierTable;
pub use logical::{CellAcceptor, Logical, LogicalWithNames, NamedCellAcceptor};
pub use roots::{CustomRoots, RootSet};
pub use section::{Section, SectionTracker};
pub use snapshot::{first_non_reserved_id, number_key, section_node_id, singleton_node_id, Edge,
                   EdgeName, EdgeType, HeapSnapshot, IdTracker, Node, NodeId, NodeType};
pub use statistics::{CollectionStats, DefaultLogger, Phase, StatsLogger};
pub use trace::{mark_cell, mark_cell_with_names, mark_weak_slots, Slot, SlotVisitor, Trace};
pub use value::{as_raw_slot, null_raw, CompressedPointer, GcPointer, GcPointerBase, GcSymbolId,
                GcValue, PinnedValue, PointerBase, RawPtr, RootSymbolId, SymbolId, Value,
                WeakRef, WeakRefSlot, WeakRoot, WeakSlotState};
