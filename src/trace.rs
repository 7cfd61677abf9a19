//! The Trace trait must be implemented by every type that can be GC managed.
//!
//! A cell reports its reference slots to a `SlotVisitor`. The drivers below turn those reports
//! into acceptor calls, so a cell type is written once and works with every pass.


use std::mem::size_of_val;

use crate::acceptor::{RootAndSlotAcceptorWithNames, SlotAcceptor, WeakRefAcceptor};
use crate::snapshot::NodeType;
use crate::value::{GcPointerBase, GcSymbolId, GcValue, WeakRef};


/// One reference slot inside a cell.
pub enum Slot<'a> {
    Pointer(&'a mut GcPointerBase),
    Value(&'a mut GcValue),
    Symbol(GcSymbolId),
    Weak(&'a mut WeakRef),
}


/// Receives the slots of a cell, each with an optional field name.
pub trait SlotVisitor {
    fn visit(&mut self, name: Option<&str>, slot: Slot<'_>);
}


/// Trace trait. Every type that can be managed by the GC must implement this trait.
/// This trait is unsafe in that incorrectly implementing it can cause Undefined Behavior: a slot
/// that is not reported is not kept alive.
pub unsafe trait Trace {
    /// If the type can contain references, this must return true
    fn traversible(&self) -> bool {
        false
    }

    /// If the type can contain references, this must visit each reference slot.
    fn trace(&mut self, _visitor: &mut dyn SlotVisitor) {}

    /// Node name in heap snapshots
    fn kind(&self) -> &str {
        "Object"
    }

    fn node_type(&self) -> NodeType {
        NodeType::Object
    }

    /// Bytes attributed to this cell
    fn size(&self) -> usize {
        size_of_val(self)
    }
}


macro_rules! leaf_trace {
    ($($ty:ty),+) => {
        $(unsafe impl Trace for $ty {
            fn node_type(&self) -> NodeType {
                NodeType::Number
            }
        })+
    };
}


leaf_trace!(usize, isize, i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);


unsafe impl Trace for String {
    fn kind(&self) -> &str {
        self.as_str()
    }

    fn node_type(&self) -> NodeType {
        NodeType::String
    }

    fn size(&self) -> usize {
        size_of_val(self) + self.capacity()
    }
}


struct StrongSlots<'a, A: ?Sized> {
    acceptor: &'a mut A,
}


struct NamedSlots<'a, A: ?Sized> {
    acceptor: &'a mut A,
}


struct WeakSlots<'a, A: ?Sized> {
    acceptor: &'a mut A,
}


impl<'a, A: SlotAcceptor + ?Sized> SlotVisitor for StrongSlots<'a, A> {
    fn visit(&mut self, _name: Option<&str>, slot: Slot<'_>) {
        match slot {
            Slot::Pointer(ptr) => self.acceptor.accept_pointer(ptr),
            Slot::Value(value) => self.acceptor.accept_value(value),
            Slot::Symbol(sym) => self.acceptor.accept_symbol(sym),
            Slot::Weak(_) => (),
        }
    }
}


impl<'a, A: RootAndSlotAcceptorWithNames + ?Sized> SlotVisitor for NamedSlots<'a, A> {
    fn visit(&mut self, name: Option<&str>, slot: Slot<'_>) {
        match slot {
            Slot::Pointer(ptr) => self.acceptor.accept_pointer_named(ptr, name),
            Slot::Value(value) => self.acceptor.accept_value_named(value, name),
            Slot::Symbol(sym) => self.acceptor.accept_symbol_named(sym, name),
            Slot::Weak(_) => (),
        }
    }
}


impl<'a, A: WeakRefAcceptor + ?Sized> SlotVisitor for WeakSlots<'a, A> {
    fn visit(&mut self, _name: Option<&str>, slot: Slot<'_>) {
        if let Slot::Weak(weak) = slot {
            self.acceptor.accept_weak_ref(weak);
        }
    }
}


/// Hand every strong slot of `cell` to `acceptor`.
pub fn mark_cell<A: SlotAcceptor + ?Sized>(acceptor: &mut A, cell: &mut dyn Trace) {
    if cell.traversible() {
        cell.trace(&mut StrongSlots { acceptor });
    }
}


/// Hand every strong slot of `cell` to `acceptor` along with its field name.
pub fn mark_cell_with_names<A>(acceptor: &mut A, cell: &mut dyn Trace)
    where A: RootAndSlotAcceptorWithNames + ?Sized
{
    if cell.traversible() {
        cell.trace(&mut NamedSlots { acceptor });
    }
}


/// Hand every weak reference held by `cell` to `acceptor`.
pub fn mark_weak_slots<A: WeakRefAcceptor + ?Sized>(acceptor: &mut A, cell: &mut dyn Trace) {
    if cell.traversible() {
        cell.trace(&mut WeakSlots { acceptor });
    }
}
