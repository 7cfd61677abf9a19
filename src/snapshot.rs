//! Heap snapshot graph, built node by node while acceptors walk the heap, and written out in
//! the V8 `.heapsnapshot` JSON shape.
//!
//! A node is opened with `begin_node()`, collects edges, and is closed by `end_node()` which
//! gives it a type, name and id. Edges name the id of the node they point at; ids are resolved
//! to node positions when the snapshot is written.


use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::warn;
use serde::Serialize;

use crate::constants::{EDGE_FIELD_COUNT, ID_STEP, NODE_FIELD_COUNT, WEAK_SLOT_STORAGE_ID};
use crate::error::SnapshotResult;
use crate::section::Section;
use crate::value::{SymbolId, Value};


pub type NodeId = u64;


/// Node types, in V8 order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeType {
    Hidden,
    Array,
    String,
    Object,
    Code,
    Closure,
    RegExp,
    Number,
    Native,
    Synthetic,
    ConcatenatedString,
    SlicedString,
    Symbol,
    BigInt,
}


/// Edge types, in V8 order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeType {
    Context,
    Element,
    Property,
    Internal,
    Hidden,
    Shortcut,
    Weak,
}


const NODE_TYPE_NAMES: [&str; 14] = ["hidden", "array", "string", "object", "code", "closure",
                                     "regexp", "number", "native", "synthetic",
                                     "concatenated string", "sliced string", "symbol", "bigint"];

const EDGE_TYPE_NAMES: [&str; 7] = ["context", "element", "property", "internal", "hidden",
                                    "shortcut", "weak"];


#[derive(Clone, Debug, PartialEq)]
pub enum EdgeName {
    Named(String),
    Index(u32),
}


#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub ty: EdgeType,
    pub name: EdgeName,
    pub to: NodeId,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub ty: NodeType,
    pub name: String,
    pub id: NodeId,
    pub self_size: usize,
    pub trace_node_id: u32,
    pub edges: Vec<Edge>,
}


/// The snapshot graph under construction.
#[derive(Debug, Default)]
pub struct HeapSnapshot {
    nodes: Vec<Node>,
    // edges of the node currently open
    open: Option<Vec<Edge>>,
}


/// Stable snapshot ids for everything that is not a heap object with its own header.
#[derive(Debug)]
pub struct IdTracker {
    next_id: NodeId,
    numbers: HashMap<u64, NodeId>,
    symbols: HashMap<SymbolId, NodeId>,
}


#[derive(Serialize)]
struct SnapshotInfo {
    meta: serde_json::Value,
    node_count: usize,
    edge_count: usize,
    trace_function_count: usize,
}


#[derive(Serialize)]
struct SnapshotFile<'a> {
    snapshot: SnapshotInfo,
    nodes: Vec<u64>,
    edges: Vec<u64>,
    strings: Vec<&'a str>,
}


/// Interns strings for the output string table.
#[derive(Default)]
struct StringTable<'a> {
    strings: Vec<&'a str>,
    index: HashMap<&'a str, u64>,
}


impl NodeType {
    pub fn name(self) -> &'static str {
        NODE_TYPE_NAMES[self as usize]
    }
}


impl EdgeType {
    pub fn name(self) -> &'static str {
        EDGE_TYPE_NAMES[self as usize]
    }
}


impl HeapSnapshot {
    pub fn new() -> HeapSnapshot {
        HeapSnapshot {
            nodes: Vec::new(),
            open: None,
        }
    }

    /// Open a node. Edges added from here on belong to it.
    pub fn begin_node(&mut self) {
        if self.open.is_some() {
            warn!("heap snapshot node opened while another is open; dropping its edges");
        }
        self.open = Some(Vec::new());
    }

    pub fn add_named_edge(&mut self, ty: EdgeType, name: &str, to: NodeId) {
        self.add_edge(Edge {
            ty,
            name: EdgeName::Named(name.to_string()),
            to,
        });
    }

    pub fn add_indexed_edge(&mut self, ty: EdgeType, index: u32, to: NodeId) {
        self.add_edge(Edge {
            ty,
            name: EdgeName::Index(index),
            to,
        });
    }

    /// Close the open node.
    pub fn end_node(&mut self, ty: NodeType, name: &str, id: NodeId, self_size: usize,
                    trace_node_id: u32) {
        let edges = match self.open.take() {
            Some(edges) => edges,
            None => {
                warn!("heap snapshot node {} ended without being begun", id);
                Vec::new()
            }
        };

        self.nodes.push(Node {
            ty,
            name: name.to_string(),
            id,
            self_size,
            trace_node_id,
            edges,
        });
    }

    pub fn is_node_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_named(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|node| node.edges.len()).sum()
    }

    /// Write the snapshot as V8 heap snapshot JSON.
    pub fn write_to<W: Write>(&self, writer: W) -> SnapshotResult<()> {
        let positions: HashMap<NodeId, usize> =
            self.nodes.iter().enumerate().map(|(i, node)| (node.id, i)).collect();

        let mut strings = StringTable::default();
        let mut nodes = Vec::with_capacity(self.nodes.len() * NODE_FIELD_COUNT);
        let mut edges = Vec::with_capacity(self.edge_count() * EDGE_FIELD_COUNT);

        for node in &self.nodes {
            let mut edge_count = 0;

            for edge in &node.edges {
                let to = match positions.get(&edge.to) {
                    Some(&pos) => pos,
                    None => {
                        warn!("heap snapshot edge from node {} to unknown node {}",
                              node.id,
                              edge.to);
                        continue;
                    }
                };

                let name_or_index = match edge.name {
                    EdgeName::Named(ref name) => strings.intern(name),
                    EdgeName::Index(index) => index as u64,
                };

                edges.extend_from_slice(&[edge.ty as u64,
                                          name_or_index,
                                          (to * NODE_FIELD_COUNT) as u64]);
                edge_count += 1;
            }

            nodes.extend_from_slice(&[node.ty as u64,
                                      strings.intern(&node.name),
                                      node.id,
                                      node.self_size as u64,
                                      edge_count,
                                      node.trace_node_id as u64]);
        }

        let file = SnapshotFile {
            snapshot: SnapshotInfo {
                meta: snapshot_meta(),
                node_count: self.nodes.len(),
                edge_count: edges.len() / EDGE_FIELD_COUNT,
                trace_function_count: 0,
            },
            nodes,
            edges,
            strings: strings.strings,
        };

        let mut writer = writer;
        serde_json::to_writer(&mut writer, &file)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> SnapshotResult<()> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))
    }

    fn add_edge(&mut self, edge: Edge) {
        match self.open {
            Some(ref mut edges) => edges.push(edge),
            None => warn!("heap snapshot edge to {} added outside of a node", edge.to),
        }
    }
}


impl<'a> StringTable<'a> {
    fn intern(&mut self, string: &'a str) -> u64 {
        if let Some(&index) = self.index.get(string) {
            return index;
        }

        let index = self.strings.len() as u64;
        self.strings.push(string);
        self.index.insert(string, index);
        index
    }
}


fn snapshot_meta() -> serde_json::Value {
    serde_json::json!({
        "node_fields": ["type", "name", "id", "self_size", "edge_count", "trace_node_id"],
        "node_types": [NODE_TYPE_NAMES, "string", "number", "number", "number", "number"],
        "edge_fields": ["type", "name_or_index", "to_node"],
        "edge_types": [EDGE_TYPE_NAMES, "string_or_number", "node"],
        "trace_function_info_fields": [],
        "trace_node_fields": [],
        "sample_fields": [],
        "location_fields": [],
    })
}


/// The synthetic node for a root section
pub fn section_node_id(section: Section) -> NodeId {
    WEAK_SLOT_STORAGE_ID + ID_STEP * (section.index() as u64 + 1)
}


fn singletons_base() -> NodeId {
    WEAK_SLOT_STORAGE_ID + ID_STEP * (Section::NUM_SECTIONS as u64 + 1)
}


/// Ids of the value singletons, which share one node each.
pub fn singleton_node_id(value: Value) -> Option<NodeId> {
    let offset = match value {
        Value::Undefined => 0,
        Value::Null => 1,
        Value::Bool(true) => 2,
        Value::Bool(false) => 3,
        _ => return None,
    };

    Some(singletons_base() + ID_STEP * offset)
}


/// The first id handed out for heap objects, numbers and symbols
pub fn first_non_reserved_id() -> NodeId {
    singletons_base() + ID_STEP * 4
}


impl IdTracker {
    pub fn new() -> IdTracker {
        IdTracker {
            next_id: first_non_reserved_id(),
            numbers: HashMap::new(),
            symbols: HashMap::new(),
        }
    }

    pub fn next_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += ID_STEP;
        id
    }

    /// The id for a number, assigned on first request. All NaNs share one id, as do the
    /// two zeros.
    pub fn number_id(&mut self, num: f64) -> NodeId {
        let key = number_key(num);
        if let Some(&id) = self.numbers.get(&key) {
            return id;
        }

        let id = self.next_id();
        self.numbers.insert(key, id);
        id
    }

    pub fn find_number_id(&self, num: f64) -> Option<NodeId> {
        self.numbers.get(&number_key(num)).cloned()
    }

    pub fn symbol_id(&mut self, sym: SymbolId) -> NodeId {
        if let Some(&id) = self.symbols.get(&sym) {
            return id;
        }

        let id = self.next_id();
        self.symbols.insert(sym, id);
        id
    }

    pub fn find_symbol_id(&self, sym: SymbolId) -> Option<NodeId> {
        self.symbols.get(&sym).cloned()
    }

    /// A freed symbol's index may be reused for a different name, which must get a new id
    pub fn untrack_symbol(&mut self, sym: SymbolId) {
        self.symbols.remove(&sym);
    }
}


impl Default for IdTracker {
    fn default() -> IdTracker {
        IdTracker::new()
    }
}


/// Key under which a number gets its node: NaNs collapse to one key, as do the two zeros.
pub fn number_key(num: f64) -> u64 {
    if num.is_nan() {
        f64::NAN.to_bits()
    } else if num == 0.0 {
        0
    } else {
        num.to_bits()
    }
}
