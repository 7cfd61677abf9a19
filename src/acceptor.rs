//! Acceptor traits: the sinks a traversal pass reports each reference to.
//!
//! Capabilities are split by where a reference lives and how strongly it is held:
//!
//!  * `SlotAcceptor` takes references stored inside heap objects
//!  * `RootAcceptor` takes references stored outside the heap, grouped by `RootSectionAcceptor`
//!  * `WeakRefAcceptor` and `WeakRootAcceptor` take weak references, in a separate later pass
//!
//! `RootAndSlotAcceptor` is the union of the strong capabilities. `RootAndSlotAcceptorWithNames`
//! adds an optional name to every call; a type that implements it gets the unnamed methods for
//! free, forwarding a `None` name, and cannot override them. `DroppingAcceptor` goes the other
//! way, letting an unnamed acceptor be driven through the named surface.
//!
//! No acceptor method can fail.


use crate::section::Section;
use crate::snapshot::HeapSnapshot;
use crate::value::{as_raw_slot, GcPointerBase, GcSymbolId, GcValue, PinnedValue, RawPtr,
                   RootSymbolId, WeakRef, WeakRoot};


/// Accepts the references held inside an already reachable heap object.
///
/// An implementation may rewrite a pointer or value slot, but must do so through the slot's
/// `set()` so that the write reaches the slot's real storage.
pub trait SlotAcceptor {
    fn accept_pointer(&mut self, ptr: &mut GcPointerBase);

    fn accept_value(&mut self, value: &mut GcValue);

    fn accept_symbol(&mut self, sym: GcSymbolId);
}


/// Accepts weak references held inside heap objects.
///
/// Finding and resolving weak references costs more than strong ones and is only meaningful
/// once strong liveness is final, so this is kept apart from `SlotAcceptor`.
pub trait WeakRefAcceptor {
    fn accept_weak_ref(&mut self, weak: &mut WeakRef);
}


/// Brackets for a group of roots. Both default to doing nothing.
///
/// A producer that groups its roots calls `begin_root_section` and `end_root_section` in
/// strictly alternating order. Nesting is not checked here.
pub trait RootSectionAcceptor {
    fn begin_root_section(&mut self, _section: Section) {}

    fn end_root_section(&mut self) {}
}


/// Accepts references held outside the heap.
pub trait RootAcceptor: RootSectionAcceptor {
    fn accept_root(&mut self, ptr: &mut RawPtr);

    fn accept_pinned(&mut self, value: &mut PinnedValue);

    fn accept_root_symbol(&mut self, sym: RootSymbolId);
}


/// Typed entry point for raw root pointers, available on every `RootAcceptor` including trait
/// objects.
pub trait RootAcceptorExt: RootAcceptor {
    /// Accept a root pointer to a cell of any type through the untyped `accept_root`.
    #[inline]
    fn accept_root_ptr<T>(&mut self, ptr: &mut *mut T) {
        self.accept_root(as_raw_slot(ptr));
    }
}


impl<A: RootAcceptor + ?Sized> RootAcceptorExt for A {}


/// Both strong capabilities, for passes that treat roots and heap slots alike.
pub trait RootAndSlotAcceptor: RootAcceptor + SlotAcceptor {}


impl<A: RootAcceptor + SlotAcceptor + ?Sized> RootAndSlotAcceptor for A {}


/// A `RootAndSlotAcceptor` where every reference may carry a name, for diagnostic tools and
/// heap snapshots.
///
/// Implement only the named methods: the unnamed `RootAcceptor` and `SlotAcceptor` methods are
/// provided for every implementor and forward to these with a `None` name.
pub trait RootAndSlotAcceptorWithNames: RootSectionAcceptor {
    fn accept_root_named(&mut self, ptr: &mut RawPtr, name: Option<&str>);

    fn accept_pinned_named(&mut self, value: &mut PinnedValue, name: Option<&str>);

    fn accept_root_symbol_named(&mut self, sym: RootSymbolId, name: Option<&str>);

    fn accept_pointer_named(&mut self, ptr: &mut GcPointerBase, name: Option<&str>);

    fn accept_value_named(&mut self, value: &mut GcValue, name: Option<&str>);

    fn accept_symbol_named(&mut self, sym: GcSymbolId, name: Option<&str>);

    /// Run `func` against the snapshot being built, if this acceptor is part of a heap
    /// snapshot pass. Every other acceptor ignores it.
    fn provide_snapshot(&mut self, _func: &mut dyn FnMut(&mut HeapSnapshot)) {}
}


/// Typed entry point for named raw root pointers.
pub trait RootAcceptorWithNamesExt: RootAndSlotAcceptorWithNames {
    #[inline]
    fn accept_root_ptr_named<T>(&mut self, ptr: &mut *mut T, name: Option<&str>) {
        self.accept_root_named(as_raw_slot(ptr), name);
    }
}


impl<A: RootAndSlotAcceptorWithNames + ?Sized> RootAcceptorWithNamesExt for A {}


impl<A: RootAndSlotAcceptorWithNames + ?Sized> RootAcceptor for A {
    #[inline]
    fn accept_root(&mut self, ptr: &mut RawPtr) {
        self.accept_root_named(ptr, None);
    }

    #[inline]
    fn accept_pinned(&mut self, value: &mut PinnedValue) {
        self.accept_pinned_named(value, None);
    }

    #[inline]
    fn accept_root_symbol(&mut self, sym: RootSymbolId) {
        self.accept_root_symbol_named(sym, None);
    }
}


impl<A: RootAndSlotAcceptorWithNames + ?Sized> SlotAcceptor for A {
    #[inline]
    fn accept_pointer(&mut self, ptr: &mut GcPointerBase) {
        self.accept_pointer_named(ptr, None);
    }

    #[inline]
    fn accept_value(&mut self, value: &mut GcValue) {
        self.accept_value_named(value, None);
    }

    #[inline]
    fn accept_symbol(&mut self, sym: GcSymbolId) {
        self.accept_symbol_named(sym, None);
    }
}


/// Accepts weak references held outside the heap.
pub trait WeakRootAcceptor: WeakRefAcceptor + RootSectionAcceptor {
    /// Named apart from the `accept_*` family so a type that is also a strong acceptor can
    /// never route a weak root through its strong path.
    fn accept_weak(&mut self, root: &mut WeakRoot);
}


/// Presents an unnamed `RootAndSlotAcceptor` as a `RootAndSlotAcceptorWithNames`, dropping
/// every name. Only the accept calls are forwarded: section brackets stop here, so an acceptor
/// that tracks sections must implement the named surface itself.
pub struct DroppingAcceptor<'a, A: RootAndSlotAcceptor + ?Sized> {
    acceptor: &'a mut A,
}


impl<'a, A: RootAndSlotAcceptor + ?Sized> DroppingAcceptor<'a, A> {
    pub fn new(acceptor: &'a mut A) -> DroppingAcceptor<'a, A> {
        DroppingAcceptor { acceptor }
    }

    pub fn inner(&mut self) -> &mut A {
        &mut *self.acceptor
    }
}


impl<'a, A: RootAndSlotAcceptor + ?Sized> RootSectionAcceptor for DroppingAcceptor<'a, A> {}


impl<'a, A: RootAndSlotAcceptor + ?Sized> RootAndSlotAcceptorWithNames for DroppingAcceptor<'a, A> {
    fn accept_root_named(&mut self, ptr: &mut RawPtr, _name: Option<&str>) {
        self.acceptor.accept_root(ptr);
    }

    fn accept_pinned_named(&mut self, value: &mut PinnedValue, _name: Option<&str>) {
        self.acceptor.accept_pinned(value);
    }

    fn accept_root_symbol_named(&mut self, sym: RootSymbolId, _name: Option<&str>) {
        self.acceptor.accept_root_symbol(sym);
    }

    fn accept_pointer_named(&mut self, ptr: &mut GcPointerBase, _name: Option<&str>) {
        self.acceptor.accept_pointer(ptr);
    }

    fn accept_value_named(&mut self, value: &mut GcValue, _name: Option<&str>) {
        self.acceptor.accept_value(value);
    }

    fn accept_symbol_named(&mut self, sym: GcSymbolId, _name: Option<&str>) {
        self.acceptor.accept_symbol(sym);
    }
}
