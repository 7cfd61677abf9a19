//! Heap snapshot production: the acceptors that turn a root scan and a heap walk into snapshot
//! nodes and edges, and the driver that runs them.
//!
//! The graph is laid out the way V8 tools expect it. A synthetic super root points at the
//! "(GC roots)" node, which points at one synthetic node per root section, whose edges lead into
//! the heap, and at a native node standing for the weak reference slot storage. Every cell becomes a node with an edge per reference slot. Numbers and the value
//! singletons get shared nodes, and every live identifier gets a symbol node.


use std::collections::HashSet;
use std::mem::size_of;

use log::{debug, warn};

use crate::constants::{GC_ROOTS_ID, SUPER_ROOT_ID, WEAK_SLOT_STORAGE_ID};
use crate::heap::Heap;
use crate::identifier::IdentifierTable;
use crate::logical::{LogicalWithNames, NamedCellAcceptor};
use crate::roots::RootSet;
use crate::section::{Section, SectionTracker};
use crate::snapshot::{number_key, section_node_id, singleton_node_id, EdgeType, HeapSnapshot,
                      NodeId, NodeType};
use crate::trace::{mark_cell_with_names, mark_weak_slots};
use crate::value::{RawPtr, SymbolId, Value, WeakRefSlot, WeakSlotState};


/// Adds an edge from the open "(GC roots)" node to each root section as it begins.
pub struct SnapshotRootSectionAcceptor<'s> {
    snap: &'s mut HeapSnapshot,
    // V8 numbers root sections from 1
    next_section: u32,
}


/// Makes one synthetic node per root section with an edge to each distinct cell it holds.
pub struct SnapshotRootAcceptor<'s> {
    heap: &'s Heap,
    snap: &'s mut HeapSnapshot,
    tracker: SectionTracker,
    seen: HashSet<NodeId>,
    // unnamed edges are numbered, restarting in each section
    next_edge: u32,
}


/// Adds an edge for every reference held by the cell whose node is open.
pub struct EdgeAddingAcceptor<'s> {
    heap: &'s Heap,
    snap: &'s mut HeapSnapshot,
    next_edge: u32,
}


/// Collects the numbers held by cells so that each gets one node.
#[derive(Default)]
pub struct PrimitiveNodeAcceptor {
    seen: HashSet<u64>,
    numbers: Vec<f64>,
}


impl<'s> SnapshotRootSectionAcceptor<'s> {
    pub fn new(snap: &'s mut HeapSnapshot) -> SnapshotRootSectionAcceptor<'s> {
        SnapshotRootSectionAcceptor {
            snap,
            next_section: 1,
        }
    }
}


impl<'s> NamedCellAcceptor for SnapshotRootSectionAcceptor<'s> {
    fn accept_named_cell(&mut self, _cell: &mut RawPtr, _name: Option<&str>) {}

    fn begin_section(&mut self, section: Section) {
        self.snap.add_indexed_edge(EdgeType::Element,
                                   self.next_section,
                                   section_node_id(section));
        self.next_section += 1;
    }
}


impl<'s> SnapshotRootAcceptor<'s> {
    pub fn new(heap: &'s Heap, snap: &'s mut HeapSnapshot) -> SnapshotRootAcceptor<'s> {
        SnapshotRootAcceptor {
            heap,
            snap,
            tracker: SectionTracker::new(),
            seen: HashSet::new(),
            next_edge: 0,
        }
    }

    fn add_root_edge(&mut self, id: NodeId, name: Option<&str>, weak: bool) {
        if !self.tracker.is_open() {
            warn!("heap snapshot: root {} reported outside of a root section", id);
            return;
        }

        // only one edge from the roots to any node
        if !self.seen.insert(id) {
            return;
        }

        match name {
            Some(name) if !name.is_empty() => {
                let ty = if weak { EdgeType::Weak } else { EdgeType::Internal };
                self.snap.add_named_edge(ty, name, id);
            }
            _ => {
                if weak {
                    self.snap.add_named_edge(EdgeType::Weak, &self.next_edge.to_string(), id);
                } else {
                    self.snap.add_indexed_edge(EdgeType::Element, self.next_edge, id);
                }
                self.next_edge += 1;
            }
        }
    }

    fn add_pointer_edge(&mut self, cell: RawPtr, name: Option<&str>, weak: bool) {
        match self.heap.object_id(cell) {
            Some(id) => self.add_root_edge(id, name, weak),
            None => warn!("heap snapshot: root {:p} is not a heap cell", cell),
        }
    }
}


impl<'s> NamedCellAcceptor for SnapshotRootAcceptor<'s> {
    fn accept_named_cell(&mut self, cell: &mut RawPtr, name: Option<&str>) {
        self.add_pointer_edge(*cell, name, false);
    }

    fn accept_named_root_symbol(&mut self, sym: SymbolId, name: Option<&str>) {
        let id = self.heap.ids().symbol_id(sym);
        self.add_root_edge(id, name, false);
    }

    fn accept_weak_cell(&mut self, cell: &mut RawPtr) {
        self.add_pointer_edge(*cell, None, true);
    }

    fn accept_weak_slot(&mut self, slot: &WeakRefSlot) {
        if slot.state() == WeakSlotState::Free {
            return;
        }
        if let Some(cell) = slot.pointer() {
            self.add_pointer_edge(cell, None, true);
        }
    }

    fn begin_section(&mut self, section: Section) {
        if let Err(e) = self.tracker.begin(section) {
            warn!("heap snapshot: {}", e);
        }
        self.snap.begin_node();
    }

    fn end_section(&mut self) {
        match self.tracker.end() {
            Ok(section) => {
                // synthetic section nodes have no size, so tools do not place them in the heap
                self.snap.end_node(NodeType::Synthetic,
                                   &section.to_string(),
                                   section_node_id(section),
                                   0,
                                   0);
            }
            Err(e) => warn!("heap snapshot: {}", e),
        }
        self.next_edge = 0;
    }

    fn provide_snapshot(&mut self, func: &mut dyn FnMut(&mut HeapSnapshot)) {
        func(&mut *self.snap);
    }
}


impl<'s> EdgeAddingAcceptor<'s> {
    pub fn new(heap: &'s Heap, snap: &'s mut HeapSnapshot) -> EdgeAddingAcceptor<'s> {
        EdgeAddingAcceptor {
            heap,
            snap,
            next_edge: 0,
        }
    }

    fn add_edge(&mut self, id: Option<NodeId>, name: Option<&str>) {
        if let Some(id) = id {
            self.snap.add_named_edge(EdgeType::Internal, name.unwrap_or(""), id);
        }
    }
}


impl<'s> NamedCellAcceptor for EdgeAddingAcceptor<'s> {
    fn accept_named_cell(&mut self, cell: &mut RawPtr, name: Option<&str>) {
        let id = self.heap.object_id(*cell);
        if id.is_none() {
            warn!("heap snapshot: field {:?} points at {:p}, not a heap cell", name, *cell);
        }
        self.add_edge(id, name);
    }

    fn accept_named_value(&mut self, value: &mut Value, name: Option<&str>) {
        let id = self.heap.snapshot_id(*value);
        self.add_edge(id, name);
    }

    fn accept_named_symbol(&mut self, sym: SymbolId, name: Option<&str>) {
        let id = self.heap.ids().symbol_id(sym);
        self.add_edge(Some(id), name);
    }

    fn accept_weak_slot(&mut self, slot: &WeakRefSlot) {
        if slot.state() == WeakSlotState::Free {
            return;
        }

        // weak references are unnamed and numbered like array elements
        if let Some(id) = slot.pointer().and_then(|cell| self.heap.object_id(cell)) {
            self.snap.add_named_edge(EdgeType::Weak, &self.next_edge.to_string(), id);
            self.next_edge += 1;
        }
    }
}


impl PrimitiveNodeAcceptor {
    pub fn new() -> PrimitiveNodeAcceptor {
        PrimitiveNodeAcceptor::default()
    }

    /// Write the singleton nodes and one node per distinct number seen.
    pub fn write_all_nodes(&self, snap: &mut HeapSnapshot, heap: &Heap) {
        let singletons = [(Value::Undefined, "undefined"),
                          (Value::Null, "null"),
                          (Value::Bool(true), "true"),
                          (Value::Bool(false), "false")];

        for &(value, name) in singletons.iter() {
            if let Some(id) = singleton_node_id(value) {
                snap.begin_node();
                snap.end_node(NodeType::Object, name, id, 0, 0);
            }
        }

        for &num in &self.numbers {
            let id = heap.ids().number_id(num);
            snap.begin_node();
            // numbers are stored inline, so they take no heap space of their own
            snap.end_node(NodeType::Number, &number_name(num), id, 0, 0);
        }
    }
}


impl NamedCellAcceptor for PrimitiveNodeAcceptor {
    fn accept_named_cell(&mut self, _cell: &mut RawPtr, _name: Option<&str>) {}

    fn accept_named_value(&mut self, value: &mut Value, _name: Option<&str>) {
        if let Value::Number(num) = *value {
            if self.seen.insert(number_key(num)) {
                self.numbers.push(num);
            }
        }
    }
}


/// Number formatting as script code would print it: plain decimals for magnitudes from 1e-6
/// up to 1e21, exponent form outside that range.
fn number_name(num: f64) -> String {
    if num.is_nan() {
        return "NaN".to_string();
    } else if num.is_infinite() {
        return if num > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    } else if num == 0.0 {
        return "0".to_string();
    }

    // shortest round-trip digits d1.d2..dk and exponent, value = 0.d1..dk * 10^n
    let sci = format!("{:e}", num.abs());
    let (mantissa, exp) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return num.to_string(),
    };
    let n = match exp.parse::<i32>() {
        Ok(exp) => exp + 1,
        Err(_) => return num.to_string(),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;

    let body = if k <= n && n <= 21 {
        format!("{}{}", digits, "0".repeat((n - k) as usize))
    } else if 0 < n && n <= 21 {
        let (int, frac) = digits.split_at(n as usize);
        format!("{}.{}", int, frac)
    } else if -6 < n && n <= 0 {
        format!("0.{}{}", "0".repeat(-n as usize), digits)
    } else {
        let exp = n - 1;
        let exp = if exp >= 0 { format!("+{}", exp) } else { exp.to_string() };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{}e{}", first, exp)
        } else {
            format!("{}.{}e{}", first, rest, exp)
        }
    };

    if num < 0.0 { format!("-{}", body) } else { body }
}


// The weak slot table lives outside the managed heap, as a native node.
fn add_weak_slot_storage_node(snap: &mut HeapSnapshot, heap: &Heap) {
    snap.begin_node();
    snap.end_node(NodeType::Native,
                  "Vec<Rc<WeakRefSlot>>",
                  WEAK_SLOT_STORAGE_ID,
                  heap.weak_slots().len() * size_of::<WeakRefSlot>(),
                  0);
}


/// Build a snapshot of the heap and everything that refers into it.
pub fn create_snapshot(heap: &Heap, roots: &mut RootSet, identifiers: &IdentifierTable)
                       -> HeapSnapshot {
    let mut snap = HeapSnapshot::new();

    // the super root has a single element pointing at "(GC roots)"
    snap.begin_node();
    snap.add_indexed_edge(EdgeType::Element, 1, GC_ROOTS_ID);
    snap.end_node(NodeType::Synthetic, "", SUPER_ROOT_ID, 0, 0);

    add_weak_slot_storage_node(&mut snap, heap);

    snap.begin_node();
    {
        let mut sections = LogicalWithNames::new(heap, SnapshotRootSectionAcceptor::new(&mut snap));
        roots.mark_roots(&mut sections, true);
        identifiers.mark_roots(&mut sections);
        roots.mark_weak_roots(&mut sections);
    }
    snap.add_named_edge(EdgeType::Internal, "weakRefSlots", WEAK_SLOT_STORAGE_ID);
    snap.end_node(NodeType::Synthetic, "(GC roots)", GC_ROOTS_ID, 0, 0);

    {
        // duplicates within the roots are filtered: only one edge from the roots to any node
        let mut root_acceptor = LogicalWithNames::new(heap, SnapshotRootAcceptor::new(heap, &mut snap));
        roots.mark_roots(&mut root_acceptor, true);
        identifiers.mark_roots(&mut root_acceptor);
        roots.mark_weak_roots(&mut root_acceptor);
    }

    identifiers.visit_identifiers(|sym, name| {
        let id = heap.ids().symbol_id(sym);
        snap.begin_node();
        snap.end_node(NodeType::Symbol, name, id, size_of::<SymbolId>(), 0);
    });

    let mut primitives = LogicalWithNames::new(heap, PrimitiveNodeAcceptor::new());

    for (ptr, cell) in heap.objects() {
        let cell = unsafe { &mut *cell };
        let id = match heap.object_id(ptr) {
            Some(id) => id,
            None => continue,
        };

        mark_cell_with_names(&mut primitives, cell);

        snap.begin_node();
        {
            let mut edges = LogicalWithNames::new(heap, EdgeAddingAcceptor::new(heap, &mut snap));
            mark_cell_with_names(&mut edges, cell);
            mark_weak_slots(&mut edges, cell);
        }
        snap.end_node(cell.node_type(), cell.kind(), id, cell.size(), 0);
    }

    primitives.acceptor().write_all_nodes(&mut snap, heap);

    debug!("heap snapshot: {} nodes, {} edges", snap.nodes().len(), snap.edge_count());
    snap
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::heap::GcBox;
    use crate::snapshot::EdgeName;
    use crate::trace::{Slot, SlotVisitor, Trace};
    use crate::value::{GcPointerBase, GcValue, WeakRef};


    struct Pair {
        left: GcPointerBase,
        right: GcValue,
        cache: Option<WeakRef>,
    }


    unsafe impl Trace for Pair {
        fn traversible(&self) -> bool {
            true
        }

        fn trace(&mut self, visitor: &mut dyn SlotVisitor) {
            visitor.visit(Some("left"), Slot::Pointer(&mut self.left));
            visitor.visit(Some("right"), Slot::Value(&mut self.right));
            if let Some(ref mut weak) = self.cache {
                visitor.visit(None, Slot::Weak(weak));
            }
        }

        fn kind(&self) -> &str {
            "Pair"
        }
    }


    fn edge_names(snap: &HeapSnapshot, id: NodeId) -> Vec<(EdgeType, String, NodeId)> {
        snap.node(id)
            .map(|node| {
                node.edges
                    .iter()
                    .map(|edge| {
                        let name = match edge.name {
                            EdgeName::Named(ref s) => s.clone(),
                            EdgeName::Index(i) => i.to_string(),
                        };
                        (edge.ty, name, edge.to)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_root_structure() {
        let mut heap = Heap::new();
        let mut roots = RootSet::new();
        let identifiers = IdentifierTable::new();

        let leaf = GcBox::as_raw(heap.alloc(String::from("leaf")));
        roots.push_register(Value::Pointer(leaf));
        roots.push_register(Value::Pointer(leaf));
        roots.set_global("answer", Value::Number(42.0));

        let snap = create_snapshot(&heap, &mut roots, &identifiers);

        assert_eq!(edge_names(&snap, SUPER_ROOT_ID),
                   vec![(EdgeType::Element, "1".to_string(), GC_ROOTS_ID)]);

        assert_eq!(edge_names(&snap, GC_ROOTS_ID),
                   vec![(EdgeType::Element, "1".to_string(), section_node_id(Section::Registers)),
                        (EdgeType::Element,
                         "2".to_string(),
                         section_node_id(Section::RuntimeInstanceVars)),
                        (EdgeType::Internal, "weakRefSlots".to_string(), WEAK_SLOT_STORAGE_ID)]);

        // no weak references yet, so the slot storage is empty
        let storage = snap.node(WEAK_SLOT_STORAGE_ID).unwrap();
        assert_eq!(storage.ty, NodeType::Native);
        assert_eq!(storage.self_size, 0);
        assert!(storage.edges.is_empty());

        // the duplicate register is filtered out
        let leaf_id = heap.object_id(leaf).unwrap();
        let registers = snap.node(section_node_id(Section::Registers)).unwrap();
        assert_eq!(registers.name, "(Registers)");
        assert_eq!(registers.ty, NodeType::Synthetic);
        assert_eq!(edge_names(&snap, registers.id),
                   vec![(EdgeType::Element, "0".to_string(), leaf_id)]);

        // numbers held by roots get no edge
        assert!(edge_names(&snap, section_node_id(Section::RuntimeInstanceVars)).is_empty());

        let leaf_node = snap.node(leaf_id).unwrap();
        assert_eq!(leaf_node.name, "leaf");
        assert_eq!(leaf_node.ty, NodeType::String);
    }

    #[test]
    fn test_object_edges_and_primitives() {
        let mut heap = Heap::new();
        let mut roots = RootSet::new();
        let identifiers = IdentifierTable::new();

        let child = GcBox::as_raw(heap.alloc(7u64));
        let left = GcPointerBase::new(&heap, child);
        let cache = heap.alloc_weak_ref(Value::Pointer(child));
        let pair = GcBox::as_raw(heap.alloc(Pair {
            left,
            right: GcValue::new(Value::Number(1.5)),
            cache: Some(cache),
        }));
        roots.push_handle(pair);

        let snap = create_snapshot(&heap, &mut roots, &identifiers);

        let child_id = heap.object_id(child).unwrap();
        let number_id = heap.ids().find_number_id(1.5).unwrap();
        let pair_id = heap.object_id(pair).unwrap();

        assert_eq!(edge_names(&snap, pair_id),
                   vec![(EdgeType::Internal, "left".to_string(), child_id),
                        (EdgeType::Internal, "right".to_string(), number_id),
                        (EdgeType::Weak, "0".to_string(), child_id)]);

        let storage = snap.node(WEAK_SLOT_STORAGE_ID).unwrap();
        assert_eq!(storage.self_size, size_of::<WeakRefSlot>());

        let pair_node = snap.node(pair_id).unwrap();
        assert_eq!(pair_node.name, "Pair");
        assert!(pair_node.self_size > 0);

        let number = snap.node(number_id).unwrap();
        assert_eq!(number.name, "1.5");
        assert_eq!(number.ty, NodeType::Number);

        assert_eq!(snap.node(singleton_node_id(Value::Null).unwrap()).unwrap().name, "null");
    }

    #[test]
    fn test_symbols_and_weak_roots() {
        let mut heap = Heap::new();
        let mut roots = RootSet::new();
        let mut identifiers = IdentifierTable::new();

        let sym = identifiers.intern_pinned("length");
        let target = GcBox::as_raw(heap.alloc(1u8));
        roots.add_weak_root(&heap, target);

        let snap = create_snapshot(&heap, &mut roots, &identifiers);

        let sym_id = heap.ids().find_symbol_id(sym).unwrap();
        let sym_node = snap.node(sym_id).unwrap();
        assert_eq!(sym_node.ty, NodeType::Symbol);
        assert_eq!(sym_node.name, "length");

        assert_eq!(edge_names(&snap, section_node_id(Section::IdentifierTable)),
                   vec![(EdgeType::Internal, "length".to_string(), sym_id)]);

        let target_id = heap.object_id(target).unwrap();
        assert_eq!(edge_names(&snap, section_node_id(Section::WeakRefs)),
                   vec![(EdgeType::Weak, "0".to_string(), target_id)]);
    }

    #[test]
    fn test_custom_roots_can_extend_snapshot() {
        let heap = Heap::new();
        let mut roots = RootSet::new();
        let identifiers = IdentifierTable::new();

        roots.add_custom(Box::new(|acceptor: &mut dyn crate::acceptor::RootAndSlotAcceptorWithNames| {
            acceptor.provide_snapshot(&mut |snap: &mut HeapSnapshot| {
                snap.add_named_edge(EdgeType::Internal, "native", SUPER_ROOT_ID);
            });
        }));

        let snap = create_snapshot(&heap, &mut roots, &identifiers);

        assert_eq!(edge_names(&snap, section_node_id(Section::Custom)),
                   vec![(EdgeType::Internal, "native".to_string(), SUPER_ROOT_ID)]);
    }

    #[test]
    fn test_number_names() {
        assert_eq!(number_name(1.0), "1");
        assert_eq!(number_name(-0.0), "0");
        assert_eq!(number_name(2.5), "2.5");
        assert_eq!(number_name(f64::INFINITY), "Infinity");
        assert_eq!(number_name(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_name(f64::NAN), "NaN");
        assert_eq!(number_name(-2.5), "-2.5");
        assert_eq!(number_name(123.456), "123.456");
    }

    #[test]
    fn test_number_names_switch_to_exponents() {
        assert_eq!(number_name(1e20), "100000000000000000000");
        assert_eq!(number_name(1e21), "1e+21");
        assert_eq!(number_name(1.5e22), "1.5e+22");
        assert_eq!(number_name(-1e21), "-1e+21");
        assert_eq!(number_name(0.000001), "0.000001");
        assert_eq!(number_name(1e-7), "1e-7");
        assert_eq!(number_name(1.25e-7), "1.25e-7");
        assert_eq!(number_name(0.5), "0.5");
    }
}
