//! Logical acceptors: write a pass against plain cell pointers and tagged values and let a
//! wrapper deal with how each slot kind physically stores its reference.
//!
//! `Logical` wraps a `CellAcceptor` and implements every raw acceptor trait over it.
//! `LogicalWithNames` does the same for a `NamedCellAcceptor`. Each raw slot is read into a
//! local, handed over, and written back through the slot only if the acceptor changed it.
//! Null pointers and empty or invalid references are filtered out before the acceptor sees them.


use crate::acceptor::{RootAcceptor, RootAndSlotAcceptorWithNames, RootSectionAcceptor,
                      SlotAcceptor, WeakRefAcceptor, WeakRootAcceptor};
use crate::section::Section;
use crate::snapshot::HeapSnapshot;
use crate::value::{GcPointerBase, GcSymbolId, GcValue, PinnedValue, PointerBase, RawPtr,
                   RootSymbolId, SymbolId, Value, WeakRef, WeakRefSlot, WeakRoot};


/// A pass over decompressed references.
pub trait CellAcceptor {
    /// A strong reference to a non-null cell. The pointer may be rewritten.
    fn accept_cell(&mut self, cell: &mut RawPtr);

    /// A tagged value. Pointers go to `accept_cell` and symbols to `accept_symbol_id`; other
    /// values are ignored.
    fn accept_cell_value(&mut self, value: &mut Value) {
        match *value {
            Value::Pointer(mut cell) => {
                self.accept_cell(&mut cell);
                *value = Value::from_pointer(cell);
            }
            Value::Symbol(sym) => self.accept_symbol_id(sym),
            _ => (),
        }
    }

    /// A valid symbol
    fn accept_symbol_id(&mut self, _sym: SymbolId) {}

    /// A weak root's referent, non-null. May be cleared by writing null.
    fn accept_weak_cell(&mut self, _cell: &mut RawPtr) {}

    /// The slot behind a weak reference held in a heap object
    fn accept_weak_slot(&mut self, _slot: &WeakRefSlot) {}

    fn begin_section(&mut self, _section: Section) {}

    fn end_section(&mut self) {}
}


/// A pass over decompressed references, with names.
pub trait NamedCellAcceptor {
    fn accept_named_cell(&mut self, cell: &mut RawPtr, name: Option<&str>);

    /// Pointers go to `accept_named_cell`, symbols to `accept_named_symbol`.
    fn accept_named_value(&mut self, value: &mut Value, name: Option<&str>) {
        match *value {
            Value::Pointer(mut cell) => {
                self.accept_named_cell(&mut cell, name);
                *value = Value::from_pointer(cell);
            }
            Value::Symbol(sym) => self.accept_named_symbol(sym, name),
            _ => (),
        }
    }

    /// A valid symbol held outside the heap. Defaults to `accept_named_symbol`.
    fn accept_named_root_symbol(&mut self, sym: SymbolId, name: Option<&str>) {
        self.accept_named_symbol(sym, name);
    }

    fn accept_named_symbol(&mut self, _sym: SymbolId, _name: Option<&str>) {}

    fn accept_weak_cell(&mut self, _cell: &mut RawPtr) {}

    fn accept_weak_slot(&mut self, _slot: &WeakRefSlot) {}

    fn begin_section(&mut self, _section: Section) {}

    fn end_section(&mut self) {}

    fn provide_snapshot(&mut self, _func: &mut dyn FnMut(&mut HeapSnapshot)) {}
}


/// Adapts a `CellAcceptor` to the raw acceptor traits.
pub struct Logical<'b, A: CellAcceptor> {
    base: &'b dyn PointerBase,
    acceptor: A,
}


/// Adapts a `NamedCellAcceptor` to `RootAndSlotAcceptorWithNames` and `WeakRootAcceptor`.
pub struct LogicalWithNames<'b, A: NamedCellAcceptor> {
    base: &'b dyn PointerBase,
    acceptor: A,
}


// Run `f` against a copy of the cell in a compressed slot, storing it back if it changed.
#[inline]
fn with_pointer_slot<F>(base: &dyn PointerBase, slot: &mut GcPointerBase, f: F)
    where F: FnOnce(&mut RawPtr)
{
    let before = slot.get(base);
    if before.is_null() {
        return;
    }

    let mut cell = before;
    f(&mut cell);

    if cell != before {
        slot.set(base, cell);
    }
}


#[inline]
fn with_weak_root<F>(base: &dyn PointerBase, root: &mut WeakRoot, f: F)
    where F: FnOnce(&mut RawPtr)
{
    let before = root.get(base);
    if before.is_null() {
        return;
    }

    let mut cell = before;
    f(&mut cell);

    if cell != before {
        root.set(base, cell);
    }
}


#[inline]
fn changed(before: Value, after: Value) -> bool {
    // compare by bits so that a NaN is not seen as a write
    match (before, after) {
        (Value::Number(a), Value::Number(b)) => a.to_bits() != b.to_bits(),
        _ => before != after,
    }
}


impl<'b, A: CellAcceptor> Logical<'b, A> {
    pub fn new(base: &'b dyn PointerBase, acceptor: A) -> Logical<'b, A> {
        Logical { base, acceptor }
    }

    pub fn acceptor(&self) -> &A {
        &self.acceptor
    }

    pub fn acceptor_mut(&mut self) -> &mut A {
        &mut self.acceptor
    }

    pub fn into_inner(self) -> A {
        self.acceptor
    }
}


impl<'b, A: CellAcceptor> RootSectionAcceptor for Logical<'b, A> {
    fn begin_root_section(&mut self, section: Section) {
        self.acceptor.begin_section(section);
    }

    fn end_root_section(&mut self) {
        self.acceptor.end_section();
    }
}


impl<'b, A: CellAcceptor> RootAcceptor for Logical<'b, A> {
    fn accept_root(&mut self, ptr: &mut RawPtr) {
        if !ptr.is_null() {
            self.acceptor.accept_cell(ptr);
        }
    }

    fn accept_pinned(&mut self, value: &mut PinnedValue) {
        let before = value.get();
        let mut after = before;
        self.acceptor.accept_cell_value(&mut after);

        if changed(before, after) {
            value.set(after);
        }
    }

    fn accept_root_symbol(&mut self, sym: RootSymbolId) {
        if sym.get().is_valid() {
            self.acceptor.accept_symbol_id(sym.get());
        }
    }
}


impl<'b, A: CellAcceptor> SlotAcceptor for Logical<'b, A> {
    fn accept_pointer(&mut self, ptr: &mut GcPointerBase) {
        let acceptor = &mut self.acceptor;
        with_pointer_slot(self.base, ptr, |cell| acceptor.accept_cell(cell));
    }

    fn accept_value(&mut self, value: &mut GcValue) {
        let before = value.get();
        let mut after = before;
        self.acceptor.accept_cell_value(&mut after);

        if changed(before, after) {
            value.set(after);
        }
    }

    fn accept_symbol(&mut self, sym: GcSymbolId) {
        if sym.get().is_valid() {
            self.acceptor.accept_symbol_id(sym.get());
        }
    }
}


impl<'b, A: CellAcceptor> WeakRefAcceptor for Logical<'b, A> {
    fn accept_weak_ref(&mut self, weak: &mut WeakRef) {
        self.acceptor.accept_weak_slot(weak.slot());
    }
}


impl<'b, A: CellAcceptor> WeakRootAcceptor for Logical<'b, A> {
    fn accept_weak(&mut self, root: &mut WeakRoot) {
        let acceptor = &mut self.acceptor;
        with_weak_root(self.base, root, |cell| acceptor.accept_weak_cell(cell));
    }
}


impl<'b, A: NamedCellAcceptor> LogicalWithNames<'b, A> {
    pub fn new(base: &'b dyn PointerBase, acceptor: A) -> LogicalWithNames<'b, A> {
        LogicalWithNames { base, acceptor }
    }

    pub fn acceptor(&self) -> &A {
        &self.acceptor
    }

    pub fn acceptor_mut(&mut self) -> &mut A {
        &mut self.acceptor
    }

    pub fn into_inner(self) -> A {
        self.acceptor
    }
}


impl<'b, A: NamedCellAcceptor> RootSectionAcceptor for LogicalWithNames<'b, A> {
    fn begin_root_section(&mut self, section: Section) {
        self.acceptor.begin_section(section);
    }

    fn end_root_section(&mut self) {
        self.acceptor.end_section();
    }
}


impl<'b, A: NamedCellAcceptor> RootAndSlotAcceptorWithNames for LogicalWithNames<'b, A> {
    fn accept_root_named(&mut self, ptr: &mut RawPtr, name: Option<&str>) {
        if !ptr.is_null() {
            self.acceptor.accept_named_cell(ptr, name);
        }
    }

    fn accept_pinned_named(&mut self, value: &mut PinnedValue, name: Option<&str>) {
        let before = value.get();
        let mut after = before;
        self.acceptor.accept_named_value(&mut after, name);

        if changed(before, after) {
            value.set(after);
        }
    }

    fn accept_root_symbol_named(&mut self, sym: RootSymbolId, name: Option<&str>) {
        if sym.get().is_valid() {
            self.acceptor.accept_named_root_symbol(sym.get(), name);
        }
    }

    fn accept_pointer_named(&mut self, ptr: &mut GcPointerBase, name: Option<&str>) {
        let acceptor = &mut self.acceptor;
        with_pointer_slot(self.base, ptr, |cell| acceptor.accept_named_cell(cell, name));
    }

    fn accept_value_named(&mut self, value: &mut GcValue, name: Option<&str>) {
        let before = value.get();
        let mut after = before;
        self.acceptor.accept_named_value(&mut after, name);

        if changed(before, after) {
            value.set(after);
        }
    }

    fn accept_symbol_named(&mut self, sym: GcSymbolId, name: Option<&str>) {
        if sym.get().is_valid() {
            self.acceptor.accept_named_symbol(sym.get(), name);
        }
    }

    fn provide_snapshot(&mut self, func: &mut dyn FnMut(&mut HeapSnapshot)) {
        self.acceptor.provide_snapshot(func);
    }
}


impl<'b, A: NamedCellAcceptor> WeakRefAcceptor for LogicalWithNames<'b, A> {
    fn accept_weak_ref(&mut self, weak: &mut WeakRef) {
        self.acceptor.accept_weak_slot(weak.slot());
    }
}


impl<'b, A: NamedCellAcceptor> WeakRootAcceptor for LogicalWithNames<'b, A> {
    fn accept_weak(&mut self, root: &mut WeakRoot) {
        let acceptor = &mut self.acceptor;
        with_weak_root(self.base, root, |cell| acceptor.accept_weak_cell(cell));
    }
}


#[cfg(test)]
mod tests {

    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::value::{null_raw, CompressedPointer};


    /// Slot n holds pointer n * 16.
    struct Sixteen;


    impl PointerBase for Sixteen {
        fn compress(&self, ptr: RawPtr) -> CompressedPointer {
            CompressedPointer::from_raw((ptr as usize / 16) as u32)
        }

        fn decompress(&self, ptr: CompressedPointer) -> RawPtr {
            (ptr.raw() as usize * 16) as RawPtr
        }
    }


    /// Counts every access to the compressed form.
    struct CountingBase {
        writes: RefCell<usize>,
    }


    impl PointerBase for CountingBase {
        fn compress(&self, ptr: RawPtr) -> CompressedPointer {
            *self.writes.borrow_mut() += 1;
            Sixteen.compress(ptr)
        }

        fn decompress(&self, ptr: CompressedPointer) -> RawPtr {
            Sixteen.decompress(ptr)
        }
    }


    /// Relocates every cell by a fixed offset and remembers what it saw.
    #[derive(Default)]
    struct Relocate {
        offset: usize,
        cells: Vec<usize>,
        symbols: Vec<SymbolId>,
        weak: Vec<usize>,
        sections: Vec<Option<Section>>,
    }


    impl CellAcceptor for Relocate {
        fn accept_cell(&mut self, cell: &mut RawPtr) {
            self.cells.push(*cell as usize);
            *cell = (*cell as usize + self.offset) as RawPtr;
        }

        fn accept_symbol_id(&mut self, sym: SymbolId) {
            self.symbols.push(sym);
        }

        fn accept_weak_cell(&mut self, cell: &mut RawPtr) {
            self.weak.push(*cell as usize);
            *cell = null_raw();
        }

        fn begin_section(&mut self, section: Section) {
            self.sections.push(Some(section));
        }

        fn end_section(&mut self) {
            self.sections.push(None);
        }
    }


    #[derive(Default)]
    struct Names {
        seen: Vec<(usize, Option<String>)>,
        root_symbols: Vec<SymbolId>,
        provided: usize,
    }


    impl NamedCellAcceptor for Names {
        fn accept_named_cell(&mut self, cell: &mut RawPtr, name: Option<&str>) {
            self.seen.push((*cell as usize, name.map(String::from)));
        }

        fn accept_named_root_symbol(&mut self, sym: SymbolId, _name: Option<&str>) {
            self.root_symbols.push(sym);
        }

        fn provide_snapshot(&mut self, func: &mut dyn FnMut(&mut HeapSnapshot)) {
            self.provided += 1;
            func(&mut HeapSnapshot::new());
        }
    }


    #[test]
    fn test_pointer_slot_written_back() {
        let mut logical = Logical::new(&Sixteen, Relocate { offset: 32, ..Default::default() });
        let mut field = GcPointerBase::new(&Sixteen, 0x100 as RawPtr);

        logical.accept_pointer(&mut field);

        assert_eq!(field.get(&Sixteen) as usize, 0x120);
        assert_eq!(logical.acceptor().cells, vec![0x100]);
    }

    #[test]
    fn test_unchanged_slot_not_written() {
        let base = CountingBase { writes: RefCell::new(0) };
        let mut field = GcPointerBase::new(&base, 0x100 as RawPtr);
        let mut empty = GcPointerBase::null();
        assert_eq!(*base.writes.borrow(), 1);

        let mut logical = Logical::new(&base, Relocate::default());
        logical.accept_pointer(&mut field);
        logical.accept_pointer(&mut empty);

        assert_eq!(*base.writes.borrow(), 1);
        assert_eq!(logical.acceptor().cells, vec![0x100]);
    }

    #[test]
    fn test_values_and_symbols() {
        let mut logical = Logical::new(&Sixteen, Relocate { offset: 16, ..Default::default() });

        let mut ptr_value = GcValue::new(Value::Pointer(0x40 as RawPtr));
        let mut num_value = GcValue::new(Value::Number(3.0));
        let mut sym_value = PinnedValue::new(Value::Symbol(SymbolId::from_index(9)));

        logical.accept_value(&mut ptr_value);
        logical.accept_value(&mut num_value);
        logical.accept_pinned(&mut sym_value);
        logical.accept_symbol(GcSymbolId::new(SymbolId::INVALID));
        logical.accept_root_symbol(RootSymbolId::new(SymbolId::from_index(2)));

        assert_eq!(ptr_value.get(), Value::Pointer(0x50 as RawPtr));
        assert_eq!(num_value.get(), Value::Number(3.0));

        let relocate = logical.into_inner();
        assert_eq!(relocate.cells, vec![0x40]);
        assert_eq!(relocate.symbols, vec![SymbolId::from_index(9), SymbolId::from_index(2)]);
    }

    #[test]
    fn test_null_roots_are_skipped() {
        let mut logical = Logical::new(&Sixteen, Relocate::default());
        let mut root = null_raw();
        let mut live = 0x70 as RawPtr;

        logical.begin_root_section(Section::Registers);
        logical.accept_root(&mut root);
        logical.accept_root(&mut live);
        logical.end_root_section();

        assert_eq!(logical.acceptor().cells, vec![0x70]);
        assert_eq!(logical.acceptor().sections, vec![Some(Section::Registers), None]);
    }

    #[test]
    fn test_weak_root_cleared() {
        let mut logical = Logical::new(&Sixteen, Relocate::default());
        let mut root = WeakRoot::new(&Sixteen, 0x200 as RawPtr);
        let mut empty = WeakRoot::null();

        logical.accept_weak(&mut root);
        logical.accept_weak(&mut empty);

        assert!(root.is_null());
        assert_eq!(logical.acceptor().weak, vec![0x200]);
    }

    #[test]
    fn test_weak_ref_reaches_slot() {
        struct Marks;

        impl CellAcceptor for Marks {
            fn accept_cell(&mut self, _cell: &mut RawPtr) {}

            fn accept_weak_slot(&mut self, slot: &WeakRefSlot) {
                slot.mark();
            }
        }

        let slot = Rc::new(WeakRefSlot::new(Value::Pointer(0x10 as RawPtr)));
        let mut weak = WeakRef::new(slot.clone());

        Logical::new(&Sixteen, Marks).accept_weak_ref(&mut weak);
        assert_eq!(slot.state(), crate::value::WeakSlotState::Marked);
    }

    #[test]
    fn test_named_wrapper_keeps_names() {
        let mut logical = LogicalWithNames::new(&Sixteen, Names::default());
        let mut root = 0x10 as RawPtr;
        let mut field = GcPointerBase::new(&Sixteen, 0x20 as RawPtr);
        let mut value = GcValue::new(Value::Pointer(0x30 as RawPtr));

        logical.accept_root_named(&mut root, Some("root"));
        logical.accept_pointer_named(&mut field, Some("field"));
        logical.accept_value(&mut value);
        logical.accept_root_symbol_named(RootSymbolId::new(SymbolId::from_index(4)), None);

        let names = logical.acceptor();
        assert_eq!(names.seen,
                   vec![(0x10, Some("root".to_string())),
                        (0x20, Some("field".to_string())),
                        (0x30, None)]);
        assert_eq!(names.root_symbols, vec![SymbolId::from_index(4)]);
    }

    #[test]
    fn test_named_wrapper_forwards_snapshot() {
        let mut logical = LogicalWithNames::new(&Sixteen, Names::default());
        let mut ran = 0;

        logical.provide_snapshot(&mut |_snap: &mut HeapSnapshot| ran += 1);

        assert_eq!(ran, 1);
        assert_eq!(logical.acceptor().provided, 1);
    }
}
