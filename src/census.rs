//! Counting acceptors: a pure counter over every reference kind, and a wrapper attributing root
//! counts and scan time to root sections.


use log::warn;
use time::precise_time_ns;

use crate::acceptor::{RootAndSlotAcceptorWithNames, RootSectionAcceptor, WeakRefAcceptor,
                      WeakRootAcceptor};
use crate::error::HeapError;
use crate::section::{Section, SectionTracker};
use crate::snapshot::HeapSnapshot;
use crate::statistics::StatsLogger;
use crate::value::{GcPointerBase, GcSymbolId, GcValue, PinnedValue, RawPtr, RootSymbolId,
                   WeakRef, WeakRoot};


/// Calls received, per reference kind
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefCounts {
    pub roots: usize,
    pub pinned: usize,
    pub root_symbols: usize,
    pub pointers: usize,
    pub values: usize,
    pub symbols: usize,
    pub weak_refs: usize,
    pub weak_roots: usize,
}


/// Counts every call it receives without looking at or changing the references. Names are
/// ignored.
pub struct CountingAcceptor {
    counts: RefCounts,
    per_section: Vec<usize>,
    tracker: SectionTracker,
    errors: Vec<HeapError>,
}


/// Wraps a named acceptor, counting and timing the roots of each section for a `StatsLogger`.
pub struct SectionStats<'a, A: ?Sized, S: ?Sized> {
    acceptor: &'a mut A,
    logger: &'a mut S,
    tracker: SectionTracker,
    roots: usize,
    started: u64,
}


impl RefCounts {
    pub fn total(&self) -> usize {
        self.roots + self.pinned + self.root_symbols + self.pointers + self.values +
        self.symbols + self.weak_refs + self.weak_roots
    }
}


impl CountingAcceptor {
    pub fn new() -> CountingAcceptor {
        CountingAcceptor {
            counts: RefCounts::default(),
            per_section: vec![0; Section::NUM_SECTIONS],
            tracker: SectionTracker::new(),
            errors: Vec::new(),
        }
    }

    pub fn counts(&self) -> &RefCounts {
        &self.counts
    }

    /// Root references received inside `section`
    pub fn section_count(&self, section: Section) -> usize {
        self.per_section[section.index()]
    }

    /// Bracket mistakes seen so far
    pub fn errors(&self) -> &[HeapError] {
        &self.errors
    }

    fn count_root(&mut self) {
        if let Some(section) = self.tracker.current() {
            self.per_section[section.index()] += 1;
        }
    }
}


impl Default for CountingAcceptor {
    fn default() -> CountingAcceptor {
        CountingAcceptor::new()
    }
}


impl RootSectionAcceptor for CountingAcceptor {
    fn begin_root_section(&mut self, section: Section) {
        if let Err(e) = self.tracker.begin(section) {
            warn!("counting acceptor: {}", e);
            self.errors.push(e);
        }
    }

    fn end_root_section(&mut self) {
        if let Err(e) = self.tracker.end() {
            warn!("counting acceptor: {}", e);
            self.errors.push(e);
        }
    }
}


impl RootAndSlotAcceptorWithNames for CountingAcceptor {
    fn accept_root_named(&mut self, _ptr: &mut RawPtr, _name: Option<&str>) {
        self.counts.roots += 1;
        self.count_root();
    }

    fn accept_pinned_named(&mut self, _value: &mut PinnedValue, _name: Option<&str>) {
        self.counts.pinned += 1;
        self.count_root();
    }

    fn accept_root_symbol_named(&mut self, _sym: RootSymbolId, _name: Option<&str>) {
        self.counts.root_symbols += 1;
        self.count_root();
    }

    fn accept_pointer_named(&mut self, _ptr: &mut GcPointerBase, _name: Option<&str>) {
        self.counts.pointers += 1;
    }

    fn accept_value_named(&mut self, _value: &mut GcValue, _name: Option<&str>) {
        self.counts.values += 1;
    }

    fn accept_symbol_named(&mut self, _sym: GcSymbolId, _name: Option<&str>) {
        self.counts.symbols += 1;
    }
}


impl WeakRefAcceptor for CountingAcceptor {
    fn accept_weak_ref(&mut self, _weak: &mut WeakRef) {
        self.counts.weak_refs += 1;
    }
}


impl WeakRootAcceptor for CountingAcceptor {
    fn accept_weak(&mut self, _root: &mut WeakRoot) {
        self.counts.weak_roots += 1;
        self.count_root();
    }
}


impl<'a, A, S> SectionStats<'a, A, S>
    where A: RootAndSlotAcceptorWithNames + ?Sized,
          S: StatsLogger + ?Sized
{
    pub fn new(acceptor: &'a mut A, logger: &'a mut S) -> SectionStats<'a, A, S> {
        SectionStats {
            acceptor,
            logger,
            tracker: SectionTracker::new(),
            roots: 0,
            started: 0,
        }
    }

    pub fn inner(&mut self) -> &mut A {
        &mut *self.acceptor
    }
}


impl<'a, A, S> RootSectionAcceptor for SectionStats<'a, A, S>
    where A: RootAndSlotAcceptorWithNames + ?Sized,
          S: StatsLogger + ?Sized
{
    fn begin_root_section(&mut self, section: Section) {
        if let Err(e) = self.tracker.begin(section) {
            warn!("root scan: {}", e);
        }
        self.roots = 0;
        self.started = precise_time_ns();
        self.acceptor.begin_root_section(section);
    }

    fn end_root_section(&mut self) {
        self.acceptor.end_root_section();

        match self.tracker.end() {
            Ok(section) => {
                let nanos = precise_time_ns().saturating_sub(self.started);
                self.logger.add_root_section(section, self.roots, nanos);
            }
            Err(e) => warn!("root scan: {}", e),
        }
    }
}


impl<'a, A, S> RootAndSlotAcceptorWithNames for SectionStats<'a, A, S>
    where A: RootAndSlotAcceptorWithNames + ?Sized,
          S: StatsLogger + ?Sized
{
    fn accept_root_named(&mut self, ptr: &mut RawPtr, name: Option<&str>) {
        self.roots += 1;
        self.acceptor.accept_root_named(ptr, name);
    }

    fn accept_pinned_named(&mut self, value: &mut PinnedValue, name: Option<&str>) {
        self.roots += 1;
        self.acceptor.accept_pinned_named(value, name);
    }

    fn accept_root_symbol_named(&mut self, sym: RootSymbolId, name: Option<&str>) {
        self.roots += 1;
        self.acceptor.accept_root_symbol_named(sym, name);
    }

    fn accept_pointer_named(&mut self, ptr: &mut GcPointerBase, name: Option<&str>) {
        self.acceptor.accept_pointer_named(ptr, name);
    }

    fn accept_value_named(&mut self, value: &mut GcValue, name: Option<&str>) {
        self.acceptor.accept_value_named(value, name);
    }

    fn accept_symbol_named(&mut self, sym: GcSymbolId, name: Option<&str>) {
        self.acceptor.accept_symbol_named(sym, name);
    }

    fn provide_snapshot(&mut self, func: &mut dyn FnMut(&mut HeapSnapshot)) {
        self.acceptor.provide_snapshot(func);
    }
}
