//! Core heap data types: boxed cells, their metadata, and the compressed pointer table.
//!
//! Every cell is a `GcBox<T>` whose header carries the cell's stable snapshot id. Cells are
//! tracked by address; references stored inside cells use a compressed index into the
//! pointer table, which the heap hands out as its `PointerBase`.


use std::cell::{Cell, RefCell, RefMut};
use std::collections::HashMap;
use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use log::{debug, trace};

use crate::constants::{DEFAULT_WEAK_SLOT_CAPACITY, MARK_BIT, MARK_MASK, TRAVERSE_BIT};
use crate::snapshot::{singleton_node_id, IdTracker, NodeId, NodeType};
use crate::trace::{SlotVisitor, Trace};
use crate::value::{null_raw, CompressedPointer, PointerBase, RawPtr, Value, WeakRef,
                   WeakRefSlot, WeakSlotState};


/// Fields common to every cell, at offset zero.
#[repr(C)]
#[derive(Debug)]
pub struct ObjectHeader {
    id: NodeId,
}


/// A GC-managed cell.
#[repr(C)]
pub struct GcBox<T> {
    header: ObjectHeader,
    value: T,
}


/// A GC-managed pointer's metadata
pub struct ObjectMeta {
    /// the cell as a Trace trait object
    cell: *mut dyn Trace,
    /// Using bit 0 as the mark bit (MARK_BIT)
    /// Using bit 1 to indicate traversibility (TRAVERSE_BIT)
    flags: Cell<usize>,
    /// slot in the pointer table
    index: CompressedPointer,
    size: usize,
}


/// A stack of cells to trace into, separated from the heap so that marking can hold it while
/// the heap is borrowed.
#[derive(Default)]
pub struct TraceStack {
    stack: Vec<RawPtr>,
}


/// This references all known GC-managed objects and weak reference slots.
pub struct Heap {
    objects: HashMap<usize, ObjectMeta>,
    // compressed index n is table[n - 1]; index zero is null
    table: Vec<RawPtr>,
    free_indices: Vec<u32>,
    weak_slots: Vec<Rc<WeakRefSlot>>,
    ids: RefCell<IdTracker>,
    bytes_allocated: usize,
}


impl<T> GcBox<T> {
    pub fn id(&self) -> NodeId {
        self.header.id
    }

    /// The cell's address in the form acceptors see it
    pub fn as_raw(ptr: *mut GcBox<T>) -> RawPtr {
        ptr as RawPtr
    }
}


impl<T> Deref for GcBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}


impl<T> DerefMut for GcBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}


unsafe impl<T: Trace> Trace for GcBox<T> {
    fn traversible(&self) -> bool {
        self.value.traversible()
    }

    fn trace(&mut self, visitor: &mut dyn SlotVisitor) {
        self.value.trace(visitor)
    }

    fn kind(&self) -> &str {
        self.value.kind()
    }

    fn node_type(&self) -> NodeType {
        self.value.node_type()
    }

    fn size(&self) -> usize {
        size_of::<ObjectHeader>() + self.value.size()
    }
}


impl ObjectMeta {
    fn new(cell: *mut dyn Trace, index: CompressedPointer, traversible: bool, size: usize)
           -> ObjectMeta {
        let flags = if traversible { TRAVERSE_BIT } else { 0 };

        ObjectMeta {
            cell,
            flags: Cell::new(flags),
            index,
            size,
        }
    }

    pub fn cell(&self) -> *mut dyn Trace {
        self.cell
    }

    pub fn index(&self) -> CompressedPointer {
        self.index
    }

    pub fn size(&self) -> usize {
        self.size
    }

    // Mark this object and return true if it needs to be traced into
    #[inline]
    pub fn mark_and_needs_trace(&self) -> bool {
        let flags = self.flags.get();

        let was_unmarked = flags & MARK_BIT == 0;
        if was_unmarked {
            self.flags.set(flags | MARK_BIT);
        }

        was_unmarked && flags & TRAVERSE_BIT != 0
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.flags.get() & MARK_BIT != 0
    }

    // Reset the mark bit back to 0
    #[inline]
    pub fn unmark(&self) {
        self.flags.set(self.flags.get() & MARK_MASK);
    }
}


impl TraceStack {
    pub fn new() -> TraceStack {
        TraceStack { stack: Vec::new() }
    }

    pub fn push(&mut self, cell: RawPtr) {
        self.stack.push(cell);
    }

    pub fn pop(&mut self) -> Option<RawPtr> {
        self.stack.pop()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}


impl Heap {
    pub fn new() -> Heap {
        Heap::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Heap {
        Heap {
            objects: HashMap::with_capacity(capacity),
            table: Vec::with_capacity(capacity),
            free_indices: Vec::new(),
            weak_slots: Vec::with_capacity(DEFAULT_WEAK_SLOT_CAPACITY),
            ids: RefCell::new(IdTracker::new()),
            bytes_allocated: 0,
        }
    }

    /// Move `value` into a new cell.
    pub fn alloc<T: Trace + 'static>(&mut self, value: T) -> *mut GcBox<T> {
        let id = self.ids.borrow_mut().next_id();
        let boxed = Box::into_raw(Box::new(GcBox {
            header: ObjectHeader { id },
            value,
        }));

        let cell: *mut dyn Trace = boxed;
        let (traversible, size) = {
            let cell = unsafe { &*cell };
            (cell.traversible(), cell.size())
        };

        let index = self.assign_index(boxed as RawPtr);
        self.objects.insert(boxed as usize, ObjectMeta::new(cell, index, traversible, size));
        self.bytes_allocated += size;

        trace!("alloc cell {:p} id {} ({} bytes)", boxed, id, size);
        boxed
    }

    /// A weak reference to `value`, tracked by the heap.
    pub fn alloc_weak_ref(&mut self, value: Value) -> WeakRef {
        let slot = Rc::new(WeakRefSlot::new(value));
        self.weak_slots.push(slot.clone());
        WeakRef::new(slot)
    }

    pub fn contains(&self, ptr: RawPtr) -> bool {
        self.objects.contains_key(&(ptr as usize))
    }

    pub fn meta(&self, ptr: RawPtr) -> Option<&ObjectMeta> {
        self.objects.get(&(ptr as usize))
    }

    /// Mark the cell at `ptr`, returning true if it was unmarked and has slots to trace.
    /// Pointers outside the heap are never marked.
    pub fn mark(&self, ptr: RawPtr) -> bool {
        match self.meta(ptr) {
            Some(meta) => meta.mark_and_needs_trace(),
            None => false,
        }
    }

    pub fn is_marked(&self, ptr: RawPtr) -> bool {
        self.meta(ptr).map_or(false, |meta| meta.is_marked())
    }

    /// The snapshot id stored in a cell's header
    pub fn object_id(&self, ptr: RawPtr) -> Option<NodeId> {
        if self.contains(ptr) {
            // every tracked address is a GcBox, whose header is at offset zero
            Some(unsafe { (*(ptr as *const ObjectHeader)).id })
        } else {
            None
        }
    }

    /// The snapshot id of whatever a value refers to, if it has a node.
    pub fn snapshot_id(&self, value: Value) -> Option<NodeId> {
        match value {
            Value::Pointer(ptr) => self.object_id(ptr),
            Value::Number(num) => Some(self.ids.borrow_mut().number_id(num)),
            Value::Symbol(sym) if sym.is_valid() => Some(self.ids.borrow_mut().symbol_id(sym)),
            Value::Symbol(_) | Value::Empty => None,
            other => singleton_node_id(other),
        }
    }

    pub fn ids(&self) -> RefMut<IdTracker> {
        self.ids.borrow_mut()
    }

    /// Every cell, in allocation order.
    pub fn objects(&self) -> Vec<(RawPtr, *mut dyn Trace)> {
        let mut cells: Vec<(NodeId, RawPtr, *mut dyn Trace)> = self.objects
            .iter()
            .map(|(&addr, meta)| {
                let ptr = addr as RawPtr;
                let id = unsafe { (*(ptr as *const ObjectHeader)).id };
                (id, ptr, meta.cell)
            })
            .collect();

        cells.sort_by_key(|&(id, _, _)| id);
        cells.into_iter().map(|(_, ptr, cell)| (ptr, cell)).collect()
    }

    pub fn weak_slots(&self) -> &[Rc<WeakRefSlot>] {
        &self.weak_slots
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Drop every unmarked cell and unmark the rest. Weak slots not held by a live cell are
    /// freed. Returns a tuple of (heap_object_count, dropped_object_count).
    pub fn sweep(&mut self) -> (usize, usize) {
        let heap_size = self.objects.len();

        let dead: Vec<usize> = self.objects
            .iter()
            .filter(|&(_, meta)| !meta.is_marked())
            .map(|(&addr, _)| addr)
            .collect();

        for addr in &dead {
            if let Some(meta) = self.objects.remove(addr) {
                self.free_index(meta.index);
                self.bytes_allocated -= meta.size;

                unsafe {
                    let owned = Box::from_raw(meta.cell);
                    drop(owned);
                }
            }
        }

        for meta in self.objects.values() {
            meta.unmark();
        }

        self.weak_slots.retain(|slot| {
            match slot.state() {
                WeakSlotState::Marked => {
                    slot.unmark();
                    true
                }
                WeakSlotState::Unmarked => {
                    slot.free();
                    false
                }
                WeakSlotState::Free => false,
            }
        });

        debug!("swept {} of {} cells, {} weak slots in use",
               dead.len(),
               heap_size,
               self.weak_slots.len());

        (heap_size, dead.len())
    }

    fn assign_index(&mut self, ptr: RawPtr) -> CompressedPointer {
        match self.free_indices.pop() {
            Some(raw) => {
                self.table[raw as usize - 1] = ptr;
                CompressedPointer::from_raw(raw)
            }
            None => {
                self.table.push(ptr);
                CompressedPointer::from_raw(self.table.len() as u32)
            }
        }
    }

    fn free_index(&mut self, index: CompressedPointer) {
        self.table[index.raw() as usize - 1] = null_raw();
        self.free_indices.push(index.raw());
    }
}


impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}


impl PointerBase for Heap {
    fn compress(&self, ptr: RawPtr) -> CompressedPointer {
        if ptr.is_null() {
            return CompressedPointer::NULL;
        }

        match self.meta(ptr) {
            Some(meta) => meta.index,
            None => unreachable!("compressing {:p}, which is not a heap cell", ptr),
        }
    }

    fn decompress(&self, ptr: CompressedPointer) -> RawPtr {
        if ptr.is_null() {
            return null_raw();
        }

        match self.table.get(ptr.raw() as usize - 1) {
            Some(&cell) => cell,
            None => unreachable!("compressed pointer {} is outside the pointer table", ptr.raw()),
        }
    }
}


impl Drop for Heap {
    fn drop(&mut self) {
        for (_, meta) in self.objects.drain() {
            unsafe { drop(Box::from_raw(meta.cell)) };
        }

        for slot in &self.weak_slots {
            slot.free();
        }
    }
}


#[cfg(test)]
mod tests {

    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::trace::Slot;
    use crate::value::GcPointerBase;


    struct Link {
        next: GcPointerBase,
    }


    unsafe impl Trace for Link {
        fn traversible(&self) -> bool {
            true
        }

        fn trace(&mut self, visitor: &mut dyn SlotVisitor) {
            visitor.visit(Some("next"), Slot::Pointer(&mut self.next));
        }
    }


    struct DropCounter {
        drops: Rc<Cell<usize>>,
    }


    unsafe impl Trace for DropCounter {}


    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }


    #[test]
    fn test_alloc_and_compress() {
        let mut heap = Heap::new();
        let a = GcBox::as_raw(heap.alloc(1u64));
        let b = GcBox::as_raw(heap.alloc(String::from("b")));

        assert!(heap.contains(a));
        assert!(heap.contains(b));
        assert!(!heap.contains(0x8 as RawPtr));
        assert_eq!(heap.len(), 2);

        let field = GcPointerBase::new(&heap, b);
        assert_eq!(field.compressed(), CompressedPointer::from_raw(2));
        assert_eq!(field.get(&heap), b);
        assert_eq!(heap.decompress(heap.compress(a)), a);
        assert!(heap.compress(null_raw()).is_null());
    }

    #[test]
    fn test_object_ids_are_distinct_and_stable() {
        let mut heap = Heap::new();
        let a = heap.alloc(1u32);
        let b = heap.alloc(2u32);

        let id_a = heap.object_id(GcBox::as_raw(a)).unwrap();
        let id_b = heap.object_id(GcBox::as_raw(b)).unwrap();

        assert!(id_a != id_b);
        assert_eq!(unsafe { (&*a).id() }, id_a);
        assert_eq!(id_a % 2, 1);
        assert_eq!(heap.object_id(0x8 as RawPtr), None);
    }

    #[test]
    fn test_mark_traces_once() {
        let mut heap = Heap::new();
        let link = GcBox::as_raw(heap.alloc(Link { next: GcPointerBase::null() }));
        let leaf = GcBox::as_raw(heap.alloc(5u8));

        assert!(heap.mark(link));
        assert!(!heap.mark(link));
        // leaves are marked but never traced
        assert!(!heap.mark(leaf));
        assert!(heap.is_marked(leaf));
        assert!(!heap.mark(0x8 as RawPtr));
    }

    #[test]
    fn test_sweep_drops_unmarked() {
        let drops = Rc::new(Cell::new(0));
        let mut heap = Heap::new();

        let kept = GcBox::as_raw(heap.alloc(DropCounter { drops: drops.clone() }));
        let lost = GcBox::as_raw(heap.alloc(DropCounter { drops: drops.clone() }));
        let bytes = heap.bytes_allocated();

        heap.mark(kept);
        assert_eq!(heap.sweep(), (2, 1));

        assert_eq!(drops.get(), 1);
        assert!(heap.contains(kept));
        assert!(!heap.contains(lost));
        assert!(!heap.is_marked(kept));
        assert_eq!(heap.bytes_allocated(), bytes / 2);

        // the freed table slot is reused
        let again = GcBox::as_raw(heap.alloc(7u64));
        assert_eq!(heap.compress(again), CompressedPointer::from_raw(2));

        drop(heap);
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn test_sweep_frees_unheld_weak_slots() {
        let mut heap = Heap::new();
        let target = GcBox::as_raw(heap.alloc(3u64));

        let held = heap.alloc_weak_ref(Value::Pointer(target));
        let dropped = heap.alloc_weak_ref(Value::Pointer(target));
        held.slot().mark();
        heap.mark(target);

        heap.sweep();

        assert_eq!(held.slot().state(), WeakSlotState::Unmarked);
        assert_eq!(held.get(), Some(target));
        assert_eq!(dropped.slot().state(), WeakSlotState::Free);
        assert_eq!(dropped.get(), None);
        assert_eq!(heap.weak_slots().len(), 1);
    }

    #[test]
    fn test_objects_in_allocation_order() {
        let mut heap = Heap::new();
        let ptrs: Vec<RawPtr> = (0..8u64).map(|n| GcBox::as_raw(heap.alloc(n))).collect();

        let listed: Vec<RawPtr> = heap.objects().into_iter().map(|(ptr, _)| ptr).collect();
        assert_eq!(listed, ptrs);
    }

    #[test]
    fn test_snapshot_ids_for_values() {
        let mut heap = Heap::new();
        let cell = GcBox::as_raw(heap.alloc(1u64));

        assert_eq!(heap.snapshot_id(Value::Pointer(cell)), heap.object_id(cell));
        assert_eq!(heap.snapshot_id(Value::Empty), None);
        assert_eq!(heap.snapshot_id(Value::Null), singleton_node_id(Value::Null));

        let num = heap.snapshot_id(Value::Number(2.5));
        assert_eq!(heap.snapshot_id(Value::Number(2.5)), num);
        assert_eq!(heap.ids().find_number_id(2.5), num);
    }
}
