//! Performance counters and statistics


use std::cmp::max;

use log::info;
use time::{get_time, precise_time_ns, Timespec};

use crate::section::Section;


/// Collection phases, in the order a cycle runs them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// roots and everything reachable through strong references
    Strong,
    /// weak roots and weak references of live cells
    Weak,
    Sweep,
}


/// Type that provides counters for the GC to gain some measure of performance.
pub trait StatsLogger {
    /// mark start of time
    fn mark_start_time(&mut self);
    /// mark end of time
    fn mark_end_time(&mut self);

    /// a collection phase starts
    fn begin_phase(&mut self, phase: Phase);
    /// the current phase ends
    fn end_phase(&mut self);

    /// a root section reported `roots` references in `nanos` nanoseconds
    fn add_root_section(&mut self, section: Section, roots: usize, nanos: u64);

    /// add a count of dropped objects
    fn add_dropped(&mut self, count: usize);
    /// give the current heap object count
    fn current_heap_size(&mut self, size: usize);

    /// summarize
    fn dump(&self) -> String;

    /// log something
    fn log(&self, string: &str) {
        info!("{}", string);
    }
}


/// Counters for one collection, returned by the collector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub heap_size: usize,
    pub dropped: usize,
    pub marked: usize,
    pub symbols_freed: usize,
    pub weak_slots_cleared: usize,
    pub weak_roots_cleared: usize,
}


pub struct DefaultLogger {
    max_heap_size: usize,

    total_dropped: usize,
    drop_iterations: usize,

    start_time: Timespec,
    stop_time: Timespec,

    // phases of the current cycle only
    phases: Vec<Phase>,
    phase_start: u64,
    phase_nanos: [u64; 3],
    phase_runs: [usize; 3],

    section_roots: Vec<usize>,
    section_nanos: Vec<u64>,
}


impl DefaultLogger {
    pub fn new() -> DefaultLogger {
        DefaultLogger {
            max_heap_size: 0,
            total_dropped: 0,
            drop_iterations: 0,
            start_time: Timespec::new(0, 0),
            stop_time: Timespec::new(0, 0),
            phases: Vec::new(),
            phase_start: 0,
            phase_nanos: [0; 3],
            phase_runs: [0; 3],
            section_roots: vec![0; Section::NUM_SECTIONS],
            section_nanos: vec![0; Section::NUM_SECTIONS],
        }
    }

    /// Phases of the current or most recent cycle, in the order they began
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Times `phase` has run over every collection
    pub fn phase_runs(&self, phase: Phase) -> usize {
        self.phase_runs[phase as usize]
    }

    /// Roots counted in a section over every collection
    pub fn section_roots(&self, section: Section) -> usize {
        self.section_roots[section.index()]
    }

    pub fn total_dropped(&self) -> usize {
        self.total_dropped
    }

    pub fn max_heap_size(&self) -> usize {
        self.max_heap_size
    }
}


impl Default for DefaultLogger {
    fn default() -> DefaultLogger {
        DefaultLogger::new()
    }
}


impl StatsLogger for DefaultLogger {
    fn mark_start_time(&mut self) {
        self.start_time = get_time();
    }

    fn mark_end_time(&mut self) {
        self.stop_time = get_time();
    }

    fn begin_phase(&mut self, phase: Phase) {
        // a phase that does not follow the last one starts a new cycle
        if let Some(&last) = self.phases.last() {
            if phase as usize <= last as usize {
                self.phases.clear();
            }
        }

        self.phases.push(phase);
        self.phase_runs[phase as usize] += 1;
        self.phase_start = precise_time_ns();
    }

    fn end_phase(&mut self) {
        if let Some(&phase) = self.phases.last() {
            self.phase_nanos[phase as usize] += precise_time_ns() - self.phase_start;
        }
    }

    fn add_root_section(&mut self, section: Section, roots: usize, nanos: u64) {
        self.section_roots[section.index()] += roots;
        self.section_nanos[section.index()] += nanos;
    }

    fn add_dropped(&mut self, count: usize) {
        self.total_dropped += count;
        self.drop_iterations += 1;
    }

    fn current_heap_size(&mut self, size: usize) {
        self.max_heap_size = max(self.max_heap_size, size);
    }

    fn dump(&self) -> String {
        // calculate timing
        let total_time = max((self.stop_time - self.start_time).num_milliseconds(), 1);

        let mut sections = String::new();
        for section in Section::ALL {
            let roots = self.section_roots[section.index()];
            if roots > 0 {
                sections.push_str(&format!(" {}={}/{}us",
                                           section.name(),
                                           roots,
                                           self.section_nanos[section.index()] / 1000));
            }
        }

        format!("max-heap {}; dropped {} in {} cycles; strong {}us weak {}us sweep {}us; \
                 total {}ms; roots:{}",
                self.max_heap_size,
                self.total_dropped,
                self.drop_iterations,
                self.phase_nanos[Phase::Strong as usize] / 1000,
                self.phase_nanos[Phase::Weak as usize] / 1000,
                self.phase_nanos[Phase::Sweep as usize] / 1000,
                total_time,
                sections)
    }
}
