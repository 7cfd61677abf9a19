//! A stop-the-world mark and sweep collector driven entirely through the acceptor interfaces.
//!
//! A collection runs three phases. The strong phase reports every root through a marking
//! acceptor and traces from the trace stack until it is empty. The weak phase clears weak roots
//! and weak references whose referents were not marked. The sweep phase drops unmarked cells
//! and frees unmarked symbols.


use std::io::Write;
use std::path::Path;

use log::{debug, info, warn};

use crate::acceptor::DroppingAcceptor;
use crate::census::{CountingAcceptor, RefCounts, SectionStats};
use crate::check::CheckHeapWellFormed;
use crate::config::GcConfig;
use crate::error::{HeapError, HeapResult, SnapshotResult};
use crate::heap::{GcBox, Heap, TraceStack};
use crate::heapdump::create_snapshot;
use crate::identifier::IdentifierTable;
use crate::logical::{CellAcceptor, Logical};
use crate::roots::RootSet;
use crate::snapshot::HeapSnapshot;
use crate::statistics::{CollectionStats, DefaultLogger, Phase, StatsLogger};
use crate::trace::{mark_cell, mark_weak_slots, Trace};
use crate::value::{null_raw, RawPtr, SymbolId, WeakRefSlot};


/// Owns a heap, its roots and its identifier table, and collects them.
pub struct Collector<S: StatsLogger> {
    heap: Heap,
    roots: RootSet,
    identifiers: IdentifierTable,
    config: GcConfig,
    logger: S,
}


/// Strong phase: marks every cell it is handed and queues it for tracing.
struct MarkCells<'h> {
    heap: &'h Heap,
    identifiers: &'h IdentifierTable,
    stack: TraceStack,
}


/// Weak phase: clears references to cells the strong phase did not reach.
struct ClearWeak<'h> {
    heap: &'h Heap,
    roots_cleared: usize,
    slots_cleared: usize,
}


impl<'h> CellAcceptor for MarkCells<'h> {
    fn accept_cell(&mut self, cell: &mut RawPtr) {
        if self.heap.mark(*cell) {
            self.stack.push(*cell);
        }
    }

    fn accept_symbol_id(&mut self, sym: SymbolId) {
        if !self.identifiers.mark_symbol(sym) {
            warn!("marking: symbol {:?} is not live", sym);
        }
    }
}


impl<'h> CellAcceptor for ClearWeak<'h> {
    // the weak phase is never handed strong references
    fn accept_cell(&mut self, _cell: &mut RawPtr) {}

    fn accept_weak_cell(&mut self, cell: &mut RawPtr) {
        if !self.heap.is_marked(*cell) {
            *cell = null_raw();
            self.roots_cleared += 1;
        }
    }

    fn accept_weak_slot(&mut self, slot: &WeakRefSlot) {
        slot.mark();

        if let Some(ptr) = slot.pointer() {
            if !self.heap.is_marked(ptr) {
                slot.clear();
                self.slots_cleared += 1;
            }
        }
    }
}


impl Collector<DefaultLogger> {
    /// A collector with the default configuration and a `DefaultLogger`.
    pub fn new() -> Collector<DefaultLogger> {
        Collector::with_config(GcConfig::default(), DefaultLogger::new())
    }
}


impl Default for Collector<DefaultLogger> {
    fn default() -> Collector<DefaultLogger> {
        Collector::new()
    }
}


impl<S: StatsLogger> Collector<S> {
    pub fn with_config(config: GcConfig, mut logger: S) -> Collector<S> {
        logger.mark_start_time();

        Collector {
            heap: Heap::with_capacity(config.initial_capacity),
            roots: RootSet::new(),
            identifiers: IdentifierTable::new(),
            config,
            logger,
        }
    }

    /// Move `value` into a new cell.
    pub fn alloc<T: Trace + 'static>(&mut self, value: T) -> *mut GcBox<T> {
        self.heap.alloc(value)
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    pub fn roots_mut(&mut self) -> &mut RootSet {
        &mut self.roots
    }

    pub fn identifiers(&self) -> &IdentifierTable {
        &self.identifiers
    }

    pub fn identifiers_mut(&mut self) -> &mut IdentifierTable {
        &mut self.identifiers
    }

    /// The roots and the heap, both mutable, for building object graphs that need the heap as
    /// a pointer base while roots are added.
    pub fn split_mut(&mut self) -> (&mut Heap, &mut RootSet) {
        (&mut self.heap, &mut self.roots)
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Return a reference to the logger
    pub fn logger(&mut self) -> &mut S {
        &mut self.logger
    }

    /// Call to return the logger on shutdown. Remaining cells are dropped with the heap.
    pub fn shutdown(mut self) -> S {
        self.logger.mark_end_time();
        self.logger
    }

    /// Run a full collection.
    pub fn collect(&mut self) -> HeapResult<CollectionStats> {
        if self.config.verify_heap {
            self.check_well_formed()?;
        }

        self.logger.begin_phase(Phase::Strong);
        self.mark();
        self.logger.end_phase();

        self.logger.begin_phase(Phase::Weak);
        let (weak_roots_cleared, weak_slots_cleared) = self.clear_weak();
        self.logger.end_phase();

        self.logger.begin_phase(Phase::Sweep);
        let (heap_size, dropped) = self.heap.sweep();
        let freed = self.identifiers.sweep();
        {
            let mut ids = self.heap.ids();
            for sym in &freed {
                ids.untrack_symbol(*sym);
            }
        }
        self.logger.current_heap_size(heap_size);
        self.logger.add_dropped(dropped);
        self.logger.end_phase();

        let stats = CollectionStats {
            heap_size,
            dropped,
            marked: heap_size - dropped,
            symbols_freed: freed.len(),
            weak_slots_cleared,
            weak_roots_cleared,
        };

        debug!("collection: {:?}", stats);

        if self.config.log_stats {
            self.logger.log(&self.logger.dump());
        }

        if self.config.verify_heap {
            self.check_well_formed()?;
        }

        Ok(stats)
    }

    // Mark everything reachable from the roots.
    fn mark(&mut self) {
        let mut marker = Logical::new(&self.heap,
                                      MarkCells {
                                          heap: &self.heap,
                                          identifiers: &self.identifiers,
                                          stack: TraceStack::new(),
                                      });

        {
            let mut dropping = DroppingAcceptor::new(&mut marker);
            let mut stats = SectionStats::new(&mut dropping, &mut self.logger);
            self.roots.mark_roots(&mut stats, true);
            self.identifiers.mark_roots(&mut stats);
        }

        // now there may be cells on the trace stack: pull them off and trace them too
        while let Some(ptr) = marker.acceptor_mut().stack.pop() {
            if let Some(meta) = self.heap.meta(ptr) {
                let cell = unsafe { &mut *meta.cell() };
                mark_cell(&mut marker, cell);
            }
        }
    }

    // Clear weak roots and weak references of marked cells whose referents are unmarked.
    // Returns (weak roots cleared, weak slots cleared).
    fn clear_weak(&mut self) -> (usize, usize) {
        let mut weak = Logical::new(&self.heap,
                                    ClearWeak {
                                        heap: &self.heap,
                                        roots_cleared: 0,
                                        slots_cleared: 0,
                                    });

        self.roots.mark_weak_roots(&mut weak);

        for (ptr, cell) in self.heap.objects() {
            if self.heap.is_marked(ptr) {
                mark_weak_slots(&mut weak, unsafe { &mut *cell });
            }
        }

        let weak = weak.into_inner();
        (weak.roots_cleared, weak.slots_cleared)
    }

    /// Check every reference held by the roots and the heap. Returns the first problem found;
    /// every problem is logged.
    pub fn check_well_formed(&mut self) -> HeapResult<()> {
        let errors = self.heap_errors();

        for error in &errors {
            warn!("heap verification: {}", error);
        }

        match errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Every problem found by checking the roots and the heap.
    pub fn heap_errors(&mut self) -> Vec<HeapError> {
        let mut check = CheckHeapWellFormed::new(&self.heap, &self.identifiers);

        self.roots.mark_roots(&mut check, true);
        self.identifiers.mark_roots(&mut check);
        self.roots.mark_weak_roots(&mut check);

        for (_, cell) in self.heap.objects() {
            let cell = unsafe { &mut *cell };
            mark_cell(&mut check, cell);
            mark_weak_slots(&mut check, cell);
        }

        debug!("heap verification checked {} references", check.checked());
        check.into_errors()
    }

    /// Count every reference the roots and the heap report, by kind.
    pub fn count_references(&mut self) -> RefCounts {
        let mut counter = CountingAcceptor::new();

        self.roots.mark_roots(&mut counter, true);
        self.identifiers.mark_roots(&mut counter);
        self.roots.mark_weak_roots(&mut counter);

        for (_, cell) in self.heap.objects() {
            let cell = unsafe { &mut *cell };
            mark_cell(&mut counter, cell);
            mark_weak_slots(&mut counter, cell);
        }

        counter.counts().clone()
    }

    pub fn create_snapshot(&mut self) -> HeapSnapshot {
        create_snapshot(&self.heap, &mut self.roots, &self.identifiers)
    }

    /// Write a V8 format heap snapshot of the current heap.
    pub fn write_snapshot<W: Write>(&mut self, writer: W) -> SnapshotResult<()> {
        let snap = self.create_snapshot();
        snap.write_to(writer)
    }

    pub fn write_snapshot_to_file<P: AsRef<Path>>(&mut self, path: P) -> SnapshotResult<()> {
        let snap = self.create_snapshot();
        snap.write_to_file(path.as_ref())?;
        info!("wrote heap snapshot of {} cells to {}",
              self.heap.len(),
              path.as_ref().display());
        Ok(())
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::trace::{Slot, SlotVisitor};
    use crate::value::{GcPointerBase, Value};


    struct Node {
        next: GcPointerBase,
    }


    unsafe impl Trace for Node {
        fn traversible(&self) -> bool {
            true
        }

        fn trace(&mut self, visitor: &mut dyn SlotVisitor) {
            visitor.visit(Some("next"), Slot::Pointer(&mut self.next));
        }
    }


    #[test]
    fn test_unreachable_cells_are_dropped() {
        let mut gc = Collector::new();

        let tail = GcBox::as_raw(gc.alloc(Node { next: GcPointerBase::null() }));
        let next = GcPointerBase::new(gc.heap(), tail);
        let head = GcBox::as_raw(gc.alloc(Node { next }));
        gc.alloc(Node { next: GcPointerBase::null() });

        gc.roots_mut().push_register(Value::Pointer(head));

        let stats = gc.collect().unwrap();
        assert_eq!(stats.heap_size, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.marked, 2);
        assert!(gc.heap().contains(head));
        assert!(gc.heap().contains(tail));

        gc.roots_mut().pop_register();
        let stats = gc.collect().unwrap();
        assert_eq!(stats.dropped, 2);
        assert!(gc.heap().is_empty());
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut gc = Collector::new();

        let a = GcBox::as_raw(gc.alloc(Node { next: GcPointerBase::null() }));
        let b = GcBox::as_raw(gc.alloc(Node { next: GcPointerBase::new(gc.heap(), a) }));
        unsafe { (&mut *(a as *mut GcBox<Node>)).next.set(gc.heap(), b) };

        gc.roots_mut().push_handle(a);
        assert_eq!(gc.collect().unwrap().dropped, 0);

        gc.roots_mut().pop_handle();
        assert_eq!(gc.collect().unwrap().dropped, 2);
    }

    #[test]
    fn test_symbols_marked_through_values() {
        let mut gc = Collector::new();
        let kept = gc.identifiers_mut().intern("kept");
        let lost = gc.identifiers_mut().intern("lost");
        let pinned = gc.identifiers_mut().intern_pinned("pinned");

        gc.roots_mut().set_global("key", Value::Symbol(kept));

        let stats = gc.collect().unwrap();
        assert_eq!(stats.symbols_freed, 1);
        assert!(gc.identifiers().is_symbol_live(kept));
        assert!(gc.identifiers().is_symbol_live(pinned));
        assert!(!gc.identifiers().is_symbol_live(lost));
    }

    #[test]
    fn test_weak_root_cleared_when_referent_dies() {
        let mut gc = Collector::new();

        let cell = GcBox::as_raw(gc.alloc(5u32));
        let index = {
            let (heap, roots) = gc.split_mut();
            roots.add_weak_root(heap, cell)
        };

        let stats = gc.collect().unwrap();
        assert_eq!(stats.weak_roots_cleared, 1);
        assert_eq!(gc.roots().weak_root(gc.heap(), index), Some(null_raw()));
    }

    #[test]
    fn test_logger_sees_phases_and_sections() {
        let mut gc = Collector::new();
        let cell = GcBox::as_raw(gc.alloc(1u8));
        gc.roots_mut().push_handle(cell);

        gc.collect().unwrap();
        gc.collect().unwrap();

        // only the last cycle's phases are kept
        let logger = gc.shutdown();
        assert_eq!(logger.phases(), &[Phase::Strong, Phase::Weak, Phase::Sweep]);
        assert_eq!(logger.phase_runs(Phase::Sweep), 2);
        assert_eq!(logger.section_roots(crate::section::Section::GcScopes), 2);
    }

    #[test]
    fn test_verification_catches_stray_root() {
        let config = GcConfig {
            verify_heap: true,
            ..GcConfig::default()
        };
        let mut gc = Collector::with_config(config, DefaultLogger::new());
        gc.roots_mut().push_handle(0x1000 as RawPtr);

        assert_eq!(gc.collect(), Err(HeapError::DanglingPointer(0x1000)));
    }

    #[test]
    fn test_count_references() {
        let mut gc = Collector::new();
        let tail = GcBox::as_raw(gc.alloc(Node { next: GcPointerBase::null() }));
        let head = GcBox::as_raw(gc.alloc(Node { next: GcPointerBase::new(gc.heap(), tail) }));
        gc.roots_mut().push_register(Value::Pointer(head));

        let counts = gc.count_references();
        assert_eq!(counts.pinned, 1);
        assert_eq!(counts.pointers, 2);
    }
}
