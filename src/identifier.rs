//! Interned identifiers. A `SymbolId` is an index into this table; the collector marks the
//! symbols it finds and sweeps the rest so their indices can be reused.


use std::cell::Cell;
use std::collections::HashMap;

use log::trace;

use crate::acceptor::RootAndSlotAcceptorWithNames;
use crate::section::Section;
use crate::value::{RootSymbolId, SymbolId};


struct Entry {
    // None when the index is free
    name: Option<String>,
    marked: Cell<bool>,
    pinned: bool,
}


/// Identifier storage
#[derive(Default)]
pub struct IdentifierTable {
    entries: Vec<Entry>,
    lookup: HashMap<String, SymbolId>,
    free: Vec<u32>,
}


impl IdentifierTable {
    pub fn new() -> IdentifierTable {
        IdentifierTable {
            entries: Vec::new(),
            lookup: HashMap::new(),
            free: Vec::new(),
        }
    }

    /// The symbol for `name`, creating it if needed
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&sym) = self.lookup.get(name) {
            return sym;
        }

        let entry = Entry {
            name: Some(name.to_string()),
            marked: Cell::new(false),
            pinned: false,
        };

        let sym = match self.free.pop() {
            Some(index) => {
                self.entries[index as usize] = entry;
                SymbolId::from_index(index)
            }
            None => {
                self.entries.push(entry);
                SymbolId::from_index(self.entries.len() as u32 - 1)
            }
        };

        self.lookup.insert(name.to_string(), sym);
        sym
    }

    /// Intern `name` and keep it alive across collections, reporting it as a root.
    pub fn intern_pinned(&mut self, name: &str) -> SymbolId {
        let sym = self.intern(name);
        self.entries[sym.index() as usize].pinned = true;
        sym
    }

    pub fn name(&self, sym: SymbolId) -> Option<&str> {
        self.entry(sym).and_then(|entry| entry.name.as_deref())
    }

    pub fn is_symbol_live(&self, sym: SymbolId) -> bool {
        self.name(sym).is_some()
    }

    /// Mark a symbol as reachable for this cycle. Returns false if it is not live.
    pub fn mark_symbol(&self, sym: SymbolId) -> bool {
        match self.entry(sym) {
            Some(entry) if entry.name.is_some() => {
                entry.marked.set(true);
                true
            }
            _ => false,
        }
    }

    pub fn is_marked(&self, sym: SymbolId) -> bool {
        self.entry(sym).map_or(false, |entry| entry.marked.get())
    }

    /// Report every pinned symbol as a root, under the IdentifierTable section.
    pub fn mark_roots(&self, acceptor: &mut dyn RootAndSlotAcceptorWithNames) {
        let mut pinned = self.entries
            .iter()
            .enumerate()
            .filter(|&(_, entry)| entry.pinned && entry.name.is_some())
            .peekable();

        if pinned.peek().is_none() {
            return;
        }

        acceptor.begin_root_section(Section::IdentifierTable);
        for (index, entry) in pinned {
            let sym = RootSymbolId::new(SymbolId::from_index(index as u32));
            acceptor.accept_root_symbol_named(sym, entry.name.as_deref());
        }
        acceptor.end_root_section();
    }

    /// Free every unmarked symbol and clear the marks of the rest. Returns the freed symbols.
    pub fn sweep(&mut self) -> Vec<SymbolId> {
        let mut freed = Vec::new();

        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.name.is_none() {
                continue;
            }

            if entry.marked.get() {
                entry.marked.set(false);
                continue;
            }

            if let Some(name) = entry.name.take() {
                trace!("freeing symbol {} {:?}", index, name);
                self.lookup.remove(&name);
            }

            entry.pinned = false;
            self.free.push(index as u32);
            freed.push(SymbolId::from_index(index as u32));
        }

        freed
    }

    /// Call `func` for every live symbol, in index order.
    pub fn visit_identifiers<F>(&self, mut func: F)
        where F: FnMut(SymbolId, &str)
    {
        for (index, entry) in self.entries.iter().enumerate() {
            if let Some(ref name) = entry.name {
                func(SymbolId::from_index(index as u32), name);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    fn entry(&self, sym: SymbolId) -> Option<&Entry> {
        if sym.is_invalid() {
            return None;
        }
        self.entries.get(sym.index() as usize)
    }
}
