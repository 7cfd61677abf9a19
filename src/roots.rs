//! The root set: every reference the runtime holds outside the heap, grouped by section.


use crate::acceptor::{RootAcceptorWithNamesExt, RootAndSlotAcceptorWithNames, WeakRootAcceptor};
use crate::section::Section;
use crate::value::{PinnedValue, PointerBase, RawPtr, Value, WeakRoot};


/// Extra roots reported by an embedder, under the Custom section.
pub type CustomRoots = Box<dyn FnMut(&mut dyn RootAndSlotAcceptorWithNames)>;


/// Roots outside the heap
#[derive(Default)]
pub struct RootSet {
    // the register stack
    registers: Vec<PinnedValue>,
    // named runtime globals
    globals: Vec<(String, PinnedValue)>,
    // long-lived roots, only reported when asked for
    modules: Vec<RawPtr>,
    // scoped handles
    handles: Vec<RawPtr>,
    custom: Vec<CustomRoots>,
    weak: Vec<WeakRoot>,
}


impl RootSet {
    pub fn new() -> RootSet {
        RootSet::default()
    }

    /// Push a value onto the register stack, returning its index.
    pub fn push_register(&mut self, value: Value) -> usize {
        self.registers.push(PinnedValue::new(value));
        self.registers.len() - 1
    }

    pub fn pop_register(&mut self) -> Option<Value> {
        self.registers.pop().map(|value| value.get())
    }

    pub fn register(&self, index: usize) -> Option<Value> {
        self.registers.get(index).map(|value| value.get())
    }

    pub fn set_register(&mut self, index: usize, value: Value) {
        if let Some(slot) = self.registers.get_mut(index) {
            slot.set(value);
        }
    }

    pub fn registers_len(&self) -> usize {
        self.registers.len()
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        match self.globals.iter_mut().find(|entry| entry.0 == name) {
            Some(entry) => entry.1.set(value),
            None => self.globals.push((name.to_string(), PinnedValue::new(value))),
        }
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.iter().find(|entry| entry.0 == name).map(|entry| entry.1.get())
    }

    pub fn remove_global(&mut self, name: &str) -> Option<Value> {
        let pos = self.globals.iter().position(|entry| entry.0 == name)?;
        Some(self.globals.remove(pos).1.get())
    }

    /// Add a long-lived root
    pub fn add_module(&mut self, cell: RawPtr) {
        self.modules.push(cell);
    }

    pub fn modules(&self) -> &[RawPtr] {
        &self.modules
    }

    /// Open a scoped handle, returning its index
    pub fn push_handle(&mut self, cell: RawPtr) -> usize {
        self.handles.push(cell);
        self.handles.len() - 1
    }

    pub fn pop_handle(&mut self) -> Option<RawPtr> {
        self.handles.pop()
    }

    pub fn handle(&self, index: usize) -> Option<RawPtr> {
        self.handles.get(index).cloned()
    }

    pub fn add_custom(&mut self, roots: CustomRoots) {
        self.custom.push(roots);
    }

    /// Add a weak root, returning its index.
    pub fn add_weak_root(&mut self, base: &dyn PointerBase, cell: RawPtr) -> usize {
        self.weak.push(WeakRoot::new(base, cell));
        self.weak.len() - 1
    }

    /// The referent of a weak root; null once it has been collected.
    pub fn weak_root(&self, base: &dyn PointerBase, index: usize) -> Option<RawPtr> {
        self.weak.get(index).map(|root| root.get(base))
    }

    /// Report every strong root, one section at a time. Empty groups are skipped. Long-lived
    /// roots are only reported when `mark_long_lived` is set.
    pub fn mark_roots(&mut self, acceptor: &mut dyn RootAndSlotAcceptorWithNames,
                      mark_long_lived: bool) {
        if !self.registers.is_empty() {
            acceptor.begin_root_section(Section::Registers);
            for register in self.registers.iter_mut() {
                acceptor.accept_pinned_named(register, None);
            }
            acceptor.end_root_section();
        }

        if !self.globals.is_empty() {
            acceptor.begin_root_section(Section::RuntimeInstanceVars);
            for &mut (ref name, ref mut value) in self.globals.iter_mut() {
                acceptor.accept_pinned_named(value, Some(name.as_str()));
            }
            acceptor.end_root_section();
        }

        if mark_long_lived && !self.modules.is_empty() {
            acceptor.begin_root_section(Section::RuntimeModules);
            for module in self.modules.iter_mut() {
                acceptor.accept_root_ptr_named(module, Some("module"));
            }
            acceptor.end_root_section();
        }

        if !self.handles.is_empty() {
            acceptor.begin_root_section(Section::GcScopes);
            for handle in self.handles.iter_mut() {
                acceptor.accept_root_named(handle, None);
            }
            acceptor.end_root_section();
        }

        if !self.custom.is_empty() {
            acceptor.begin_root_section(Section::Custom);
            for roots in self.custom.iter_mut() {
                roots(&mut *acceptor);
            }
            acceptor.end_root_section();
        }
    }

    /// Report every weak root under the WeakRefs section.
    pub fn mark_weak_roots(&mut self, acceptor: &mut dyn WeakRootAcceptor) {
        if self.weak.is_empty() {
            return;
        }

        acceptor.begin_root_section(Section::WeakRefs);
        for root in self.weak.iter_mut() {
            acceptor.accept_weak(root);
        }
        acceptor.end_root_section();
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::acceptor::{RootSectionAcceptor, WeakRefAcceptor};
    use crate::value::{null_raw, CompressedPointer, GcPointerBase, GcSymbolId, GcValue,
                       RootSymbolId, WeakRef};


    struct Identity;


    impl PointerBase for Identity {
        fn compress(&self, ptr: RawPtr) -> CompressedPointer {
            CompressedPointer::from_raw(ptr as usize as u32)
        }

        fn decompress(&self, ptr: CompressedPointer) -> RawPtr {
            ptr.raw() as usize as RawPtr
        }
    }


    #[derive(Debug, PartialEq)]
    enum Event {
        Begin(Section),
        End,
        Root(usize, Option<String>),
        Pinned(Value, Option<String>),
    }


    /// Records events and doubles every root pointer.
    #[derive(Default)]
    struct Doubler {
        events: Vec<Event>,
    }


    impl RootSectionAcceptor for Doubler {
        fn begin_root_section(&mut self, section: Section) {
            self.events.push(Event::Begin(section));
        }

        fn end_root_section(&mut self) {
            self.events.push(Event::End);
        }
    }


    impl RootAndSlotAcceptorWithNames for Doubler {
        fn accept_root_named(&mut self, ptr: &mut RawPtr, name: Option<&str>) {
            self.events.push(Event::Root(*ptr as usize, name.map(String::from)));
            *ptr = (*ptr as usize * 2) as RawPtr;
        }

        fn accept_pinned_named(&mut self, value: &mut PinnedValue, name: Option<&str>) {
            self.events.push(Event::Pinned(value.get(), name.map(String::from)));
            if let Value::Pointer(ptr) = value.get() {
                value.set(Value::Pointer((ptr as usize * 2) as RawPtr));
            }
        }

        fn accept_root_symbol_named(&mut self, _sym: RootSymbolId, _name: Option<&str>) {}

        fn accept_pointer_named(&mut self, _ptr: &mut GcPointerBase, _name: Option<&str>) {}

        fn accept_value_named(&mut self, _value: &mut GcValue, _name: Option<&str>) {}

        fn accept_symbol_named(&mut self, _sym: GcSymbolId, _name: Option<&str>) {}
    }


    struct ClearWeak {
        sections: usize,
    }


    impl RootSectionAcceptor for ClearWeak {
        fn begin_root_section(&mut self, section: Section) {
            assert_eq!(section, Section::WeakRefs);
            self.sections += 1;
        }
    }


    impl WeakRefAcceptor for ClearWeak {
        fn accept_weak_ref(&mut self, _weak: &mut WeakRef) {}
    }


    impl WeakRootAcceptor for ClearWeak {
        fn accept_weak(&mut self, root: &mut WeakRoot) {
            root.set(&Identity, null_raw());
        }
    }


    #[test]
    fn test_sections_in_order_and_empty_skipped() {
        let mut roots = RootSet::new();
        roots.push_register(Value::Number(1.0));
        roots.set_global("answer", Value::Pointer(0x10 as RawPtr));
        roots.add_module(0x20 as RawPtr);

        let mut doubler = Doubler::default();
        roots.mark_roots(&mut doubler, false);

        assert_eq!(doubler.events,
                   vec![Event::Begin(Section::Registers),
                        Event::Pinned(Value::Number(1.0), None),
                        Event::End,
                        Event::Begin(Section::RuntimeInstanceVars),
                        Event::Pinned(Value::Pointer(0x10 as RawPtr), Some("answer".to_string())),
                        Event::End]);
    }

    #[test]
    fn test_long_lived_roots() {
        let mut roots = RootSet::new();
        roots.add_module(0x20 as RawPtr);

        let mut doubler = Doubler::default();
        roots.mark_roots(&mut doubler, true);

        assert_eq!(doubler.events,
                   vec![Event::Begin(Section::RuntimeModules),
                        Event::Root(0x20, Some("module".to_string())),
                        Event::End]);
        assert_eq!(roots.modules(), &[0x40 as RawPtr]);
    }

    #[test]
    fn test_root_updates_reach_storage() {
        let mut roots = RootSet::new();
        roots.push_register(Value::Pointer(0x8 as RawPtr));
        roots.set_global("g", Value::Pointer(0x10 as RawPtr));
        roots.push_handle(0x18 as RawPtr);

        roots.mark_roots(&mut Doubler::default(), true);

        assert_eq!(roots.register(0), Some(Value::Pointer(0x10 as RawPtr)));
        assert_eq!(roots.global("g"), Some(Value::Pointer(0x20 as RawPtr)));
        assert_eq!(roots.handle(0), Some(0x30 as RawPtr));
    }

    #[test]
    fn test_custom_roots_in_custom_section() {
        let mut roots = RootSet::new();
        roots.add_custom(Box::new(|acceptor: &mut dyn RootAndSlotAcceptorWithNames| {
            let mut extra = 0x50 as RawPtr;
            acceptor.accept_root_named(&mut extra, Some("extra"));
        }));

        let mut doubler = Doubler::default();
        roots.mark_roots(&mut doubler, false);

        assert_eq!(doubler.events,
                   vec![Event::Begin(Section::Custom),
                        Event::Root(0x50, Some("extra".to_string())),
                        Event::End]);
    }

    #[test]
    fn test_weak_roots() {
        let mut roots = RootSet::new();
        let mut clear = ClearWeak { sections: 0 };

        roots.mark_weak_roots(&mut clear);
        assert_eq!(clear.sections, 0);

        let index = roots.add_weak_root(&Identity, 0x60 as RawPtr);
        assert_eq!(roots.weak_root(&Identity, index), Some(0x60 as RawPtr));

        roots.mark_weak_roots(&mut clear);
        assert_eq!(clear.sections, 1);
        assert_eq!(roots.weak_root(&Identity, index), Some(null_raw()));
    }

    #[test]
    fn test_globals() {
        let mut roots = RootSet::new();
        roots.set_global("x", Value::Number(1.0));
        roots.set_global("x", Value::Number(2.0));

        assert_eq!(roots.global("x"), Some(Value::Number(2.0)));
        assert_eq!(roots.remove_global("x"), Some(Value::Number(2.0)));
        assert_eq!(roots.global("x"), None);
        assert_eq!(roots.pop_register(), None);
    }
}
