//! Heap verification: an acceptor that checks every reference it is handed points somewhere
//! valid, recording what it finds.


use log::warn;

use crate::acceptor::{RootAndSlotAcceptorWithNames, RootSectionAcceptor, WeakRefAcceptor,
                      WeakRootAcceptor};
use crate::error::HeapError;
use crate::heap::Heap;
use crate::identifier::IdentifierTable;
use crate::section::{Section, SectionTracker};
use crate::value::{GcPointerBase, GcSymbolId, GcValue, PinnedValue, RawPtr, RootSymbolId,
                   SymbolId, Value, WeakRef, WeakRoot, WeakSlotState};


/// Checks that pointers name live cells and symbols name live identifiers.
pub struct CheckHeapWellFormed<'h> {
    heap: &'h Heap,
    identifiers: &'h IdentifierTable,
    tracker: SectionTracker,
    errors: Vec<HeapError>,
    checked: usize,
}


impl<'h> CheckHeapWellFormed<'h> {
    pub fn new(heap: &'h Heap, identifiers: &'h IdentifierTable) -> CheckHeapWellFormed<'h> {
        CheckHeapWellFormed {
            heap,
            identifiers,
            tracker: SectionTracker::new(),
            errors: Vec::new(),
            checked: 0,
        }
    }

    pub fn errors(&self) -> &[HeapError] {
        &self.errors
    }

    /// Number of references looked at
    pub fn checked(&self) -> usize {
        self.checked
    }

    pub fn into_errors(self) -> Vec<HeapError> {
        self.errors
    }

    fn check_pointer(&mut self, ptr: RawPtr) {
        self.checked += 1;
        if !ptr.is_null() && !self.heap.contains(ptr) {
            self.errors.push(HeapError::dangling(ptr));
        }
    }

    fn check_value(&mut self, value: Value) {
        match value {
            Value::Pointer(ptr) => self.check_pointer(ptr),
            Value::Symbol(sym) => self.check_symbol(sym),
            _ => self.checked += 1,
        }
    }

    // an invalid symbol is an empty symbol field, which is allowed
    fn check_symbol(&mut self, sym: SymbolId) {
        self.checked += 1;
        if sym.is_valid() && !self.identifiers.is_symbol_live(sym) {
            self.errors.push(HeapError::DeadSymbol(sym));
        }
    }

    fn record(&mut self, error: HeapError) {
        warn!("heap check: {}", error);
        self.errors.push(error);
    }
}


impl<'h> RootSectionAcceptor for CheckHeapWellFormed<'h> {
    fn begin_root_section(&mut self, section: Section) {
        if let Err(e) = self.tracker.begin(section) {
            self.record(e);
        }
    }

    fn end_root_section(&mut self) {
        if let Err(e) = self.tracker.end() {
            self.record(e);
        }
    }
}


impl<'h> RootAndSlotAcceptorWithNames for CheckHeapWellFormed<'h> {
    fn accept_root_named(&mut self, ptr: &mut RawPtr, _name: Option<&str>) {
        self.check_pointer(*ptr);
    }

    fn accept_pinned_named(&mut self, value: &mut PinnedValue, _name: Option<&str>) {
        if value.get().is_empty() {
            self.checked += 1;
            self.errors.push(HeapError::EmptyRoot);
        } else {
            self.check_value(value.get());
        }
    }

    fn accept_root_symbol_named(&mut self, sym: RootSymbolId, _name: Option<&str>) {
        self.check_symbol(sym.get());
    }

    fn accept_pointer_named(&mut self, ptr: &mut GcPointerBase, _name: Option<&str>) {
        let compressed = ptr.compressed();
        let cell = ptr.get(self.heap);

        // a freed table index decompresses to null
        if !compressed.is_null() && cell.is_null() {
            self.checked += 1;
            self.errors.push(HeapError::DanglingPointer(compressed.raw() as usize));
        } else {
            self.check_pointer(cell);
        }
    }

    fn accept_value_named(&mut self, value: &mut GcValue, _name: Option<&str>) {
        self.check_value(value.get());
    }

    fn accept_symbol_named(&mut self, sym: GcSymbolId, _name: Option<&str>) {
        self.check_symbol(sym.get());
    }
}


impl<'h> WeakRefAcceptor for CheckHeapWellFormed<'h> {
    fn accept_weak_ref(&mut self, weak: &mut WeakRef) {
        // an empty weak ref is allowed
        let slot = weak.slot();
        if slot.state() != WeakSlotState::Free {
            if let Some(ptr) = slot.pointer() {
                self.check_pointer(ptr);
            }
        }
    }
}


impl<'h> WeakRootAcceptor for CheckHeapWellFormed<'h> {
    fn accept_weak(&mut self, root: &mut WeakRoot) {
        let cell = root.get(self.heap);
        self.check_pointer(cell);
    }
}
