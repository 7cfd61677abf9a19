//! Reference kinds: the slot types an acceptor can be handed.
//!
//! A slot is never assumed to hold its reference in a directly mutable form. Managed pointer
//! fields and weak roots are stored compressed and are read and written through a
//! `PointerBase`, tagged values are read out by copy and written back with `set()`.


use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::null_mut;
use std::rc::Rc;

use crate::constants::{INVALID_SYMBOL, NULL_INDEX};


/// An untyped reference to a heap cell.
pub type RawPtr = *mut ();


/// The physical form of a pointer stored inside the heap: an index into a table owned by the
/// `PointerBase`. Zero is null.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CompressedPointer(u32);


/// Translates between compressed and full pointers.
pub trait PointerBase {
    /// Compress a full pointer. Null compresses to `CompressedPointer::NULL`.
    fn compress(&self, ptr: RawPtr) -> CompressedPointer;

    /// Expand a compressed pointer. `CompressedPointer::NULL` expands to null.
    fn decompress(&self, ptr: CompressedPointer) -> RawPtr;
}


/// A managed pointer field inside a heap object.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GcPointerBase {
    ptr: CompressedPointer,
}


/// Typed view of a managed pointer field.
pub struct GcPointer<T> {
    base: GcPointerBase,
    _marker: PhantomData<*mut T>,
}


/// An interned identifier: an index into the identifier table.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);


/// An identifier stored inside a heap object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GcSymbolId(SymbolId);


/// An identifier held outside the heap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RootSymbolId(SymbolId);


/// A tagged value. Only `Pointer` refers to a heap cell and only `Symbol` refers to the
/// identifier table; everything else is inline data.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    Empty,
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Symbol(SymbolId),
    Pointer(RawPtr),
}


/// A tagged value slot inside a heap object.
#[derive(Debug, PartialEq)]
pub struct GcValue {
    value: Value,
}


/// A tagged value slot held in non-relocatable storage outside the heap.
#[derive(Debug, PartialEq)]
pub struct PinnedValue {
    value: Value,
}


/// Lifecycle of a weak reference slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WeakSlotState {
    /// Not yet found held by a live object in this cycle
    Unmarked,
    /// Held by a live object
    Marked,
    /// Released; the value is meaningless
    Free,
}


/// The shared cell a weak reference points through. The heap keeps one handle to every slot
/// so that it can clear the value once the referent dies.
#[derive(Debug)]
pub struct WeakRefSlot {
    state: Cell<WeakSlotState>,
    value: Cell<Value>,
}


/// A weak reference stored inside a heap object.
#[derive(Debug, Clone)]
pub struct WeakRef {
    slot: Rc<WeakRefSlot>,
}


/// A weak reference held outside the heap.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct WeakRoot {
    ptr: CompressedPointer,
}


impl CompressedPointer {
    pub const NULL: CompressedPointer = CompressedPointer(NULL_INDEX);

    pub fn from_raw(raw: u32) -> CompressedPointer {
        CompressedPointer(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == NULL_INDEX
    }
}


impl GcPointerBase {
    pub fn null() -> GcPointerBase {
        GcPointerBase { ptr: CompressedPointer::NULL }
    }

    pub fn new(base: &dyn PointerBase, ptr: RawPtr) -> GcPointerBase {
        GcPointerBase { ptr: base.compress(ptr) }
    }

    #[inline]
    pub fn get(&self, base: &dyn PointerBase) -> RawPtr {
        base.decompress(self.ptr)
    }

    #[inline]
    pub fn set(&mut self, base: &dyn PointerBase, ptr: RawPtr) {
        self.ptr = base.compress(ptr);
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// The stored physical form
    pub fn compressed(&self) -> CompressedPointer {
        self.ptr
    }
}


impl<T> GcPointer<T> {
    pub fn null() -> GcPointer<T> {
        GcPointer {
            base: GcPointerBase::null(),
            _marker: PhantomData,
        }
    }

    pub fn new(base: &dyn PointerBase, ptr: *mut T) -> GcPointer<T> {
        GcPointer {
            base: GcPointerBase::new(base, ptr as RawPtr),
            _marker: PhantomData,
        }
    }

    pub fn get(&self, base: &dyn PointerBase) -> *mut T {
        self.base.get(base) as *mut T
    }

    pub fn set(&mut self, base: &dyn PointerBase, ptr: *mut T) {
        self.base.set(base, ptr as RawPtr);
    }
}


impl<T> Default for GcPointer<T> {
    fn default() -> GcPointer<T> {
        GcPointer::null()
    }
}


impl<T> fmt::Debug for GcPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("GcPointer").field(&self.base.ptr).finish()
    }
}


impl<T> Deref for GcPointer<T> {
    type Target = GcPointerBase;

    fn deref(&self) -> &GcPointerBase {
        &self.base
    }
}


impl<T> DerefMut for GcPointer<T> {
    fn deref_mut(&mut self) -> &mut GcPointerBase {
        &mut self.base
    }
}


impl SymbolId {
    pub const INVALID: SymbolId = SymbolId(INVALID_SYMBOL);

    pub fn from_index(index: u32) -> SymbolId {
        SymbolId(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != INVALID_SYMBOL
    }

    pub fn is_invalid(self) -> bool {
        !self.is_valid()
    }
}


impl fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_valid() {
            write!(f, "SymbolId({})", self.0)
        } else {
            write!(f, "SymbolId(invalid)")
        }
    }
}


impl GcSymbolId {
    pub fn new(sym: SymbolId) -> GcSymbolId {
        GcSymbolId(sym)
    }

    pub fn get(self) -> SymbolId {
        self.0
    }
}


impl RootSymbolId {
    pub fn new(sym: SymbolId) -> RootSymbolId {
        RootSymbolId(sym)
    }

    pub fn get(self) -> SymbolId {
        self.0
    }
}


impl Value {
    pub fn from_pointer(ptr: RawPtr) -> Value {
        if ptr.is_null() {
            Value::Null
        } else {
            Value::Pointer(ptr)
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(*self, Value::Pointer(_))
    }

    pub fn pointer(&self) -> Option<RawPtr> {
        match *self {
            Value::Pointer(ptr) => Some(ptr),
            _ => None,
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(*self, Value::Symbol(_))
    }

    pub fn symbol(&self) -> Option<SymbolId> {
        match *self {
            Value::Symbol(sym) => Some(sym),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(*self, Value::Number(_))
    }

    pub fn number(&self) -> Option<f64> {
        match *self {
            Value::Number(num) => Some(num),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Value::Empty
    }
}


impl Default for Value {
    fn default() -> Value {
        Value::Undefined
    }
}


impl GcValue {
    pub fn new(value: Value) -> GcValue {
        GcValue { value }
    }

    #[inline]
    pub fn get(&self) -> Value {
        self.value
    }

    #[inline]
    pub fn set(&mut self, value: Value) {
        self.value = value;
    }
}


impl Default for GcValue {
    fn default() -> GcValue {
        GcValue::new(Value::Undefined)
    }
}


impl PinnedValue {
    pub fn new(value: Value) -> PinnedValue {
        PinnedValue { value }
    }

    #[inline]
    pub fn get(&self) -> Value {
        self.value
    }

    #[inline]
    pub fn set(&mut self, value: Value) {
        self.value = value;
    }
}


impl Default for PinnedValue {
    fn default() -> PinnedValue {
        PinnedValue::new(Value::Undefined)
    }
}


impl WeakRefSlot {
    pub fn new(value: Value) -> WeakRefSlot {
        WeakRefSlot {
            state: Cell::new(WeakSlotState::Unmarked),
            value: Cell::new(value),
        }
    }

    pub fn state(&self) -> WeakSlotState {
        self.state.get()
    }

    pub fn value(&self) -> Value {
        self.value.get()
    }

    pub fn has_pointer(&self) -> bool {
        self.value.get().is_pointer()
    }

    pub fn pointer(&self) -> Option<RawPtr> {
        self.value.get().pointer()
    }

    /// Record that a live object holds this slot
    pub fn mark(&self) {
        if self.state.get() == WeakSlotState::Unmarked {
            self.state.set(WeakSlotState::Marked);
        }
    }

    pub fn unmark(&self) {
        if self.state.get() == WeakSlotState::Marked {
            self.state.set(WeakSlotState::Unmarked);
        }
    }

    /// Replace the referent. Used by moving collectors to redirect the slot.
    pub fn set_value(&self, value: Value) {
        self.value.set(value);
    }

    /// The referent died: the weak reference now reads as empty
    pub fn clear(&self) {
        self.value.set(Value::Empty);
    }

    pub fn free(&self) {
        self.state.set(WeakSlotState::Free);
        self.value.set(Value::Empty);
    }
}


impl WeakRef {
    pub fn new(slot: Rc<WeakRefSlot>) -> WeakRef {
        WeakRef { slot }
    }

    pub fn slot(&self) -> &WeakRefSlot {
        &self.slot
    }

    /// The referent, if it is still alive
    pub fn get(&self) -> Option<RawPtr> {
        match self.slot.state() {
            WeakSlotState::Free => None,
            _ => self.slot.pointer(),
        }
    }
}


impl WeakRoot {
    pub fn null() -> WeakRoot {
        WeakRoot { ptr: CompressedPointer::NULL }
    }

    pub fn new(base: &dyn PointerBase, ptr: RawPtr) -> WeakRoot {
        WeakRoot { ptr: base.compress(ptr) }
    }

    #[inline]
    pub fn get(&self, base: &dyn PointerBase) -> RawPtr {
        base.decompress(self.ptr)
    }

    #[inline]
    pub fn set(&mut self, base: &dyn PointerBase, ptr: RawPtr) {
        self.ptr = base.compress(ptr);
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }
}


/// Narrow a typed pointer slot to the untyped slot form. The pointee type is irrelevant to
/// acceptors; type safety is the caller's concern when it later dereferences.
#[inline]
pub fn as_raw_slot<T>(ptr: &mut *mut T) -> &mut RawPtr {
    // *mut T and *mut () have the same layout for sized T
    unsafe { &mut *(ptr as *mut *mut T as *mut RawPtr) }
}


/// A null untyped pointer
#[inline]
pub fn null_raw() -> RawPtr {
    null_mut()
}
