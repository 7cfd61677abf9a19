//! Root sections: the origin categories roots are grouped under during a root scan.
//!
//! The list is closed but extended at compile time: add a name to the `root_sections!`
//! invocation below and every table indexed by section grows with it.


use std::fmt;

use crate::error::{HeapError, HeapResult};


macro_rules! root_sections {
    ($($name:ident),+ $(,)?) => {
        /// Where a group of roots comes from.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Section {
            $($name,)+
        }

        impl Section {
            /// Every section, in declaration order
            pub const ALL: &'static [Section] = &[$(Section::$name,)+];

            /// Number of sections. `Option<Section>::None` stands in for the invalid section.
            pub const NUM_SECTIONS: usize = Section::ALL.len();

            /// The section's name as written in its declaration
            pub fn name(self) -> &'static str {
                match self {
                    $(Section::$name => stringify!($name),)+
                }
            }
        }
    };
}


root_sections! {
    Registers,
    InstructionStack,
    RuntimeInstanceVars,
    RuntimeModules,
    CharStrings,
    Builtins,
    Prototypes,
    IdentifierTable,
    GcScopes,
    SymbolRegistry,
    Custom,
    WeakRefs,
}


impl Section {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Section> {
        Section::ALL.get(index).cloned()
    }
}


impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // parenthesized, after the synthetic root names in V8 heap snapshots
        write!(f, "({})", self.name())
    }
}


/// Bookkeeping for root section brackets. Tracks the open section and reports nesting
/// mistakes without acting on them.
#[derive(Debug, Default)]
pub struct SectionTracker {
    current: Option<Section>,
}


impl SectionTracker {
    pub fn new() -> SectionTracker {
        SectionTracker { current: None }
    }

    /// Open `section`. If another section is still open it is replaced and an error returned.
    pub fn begin(&mut self, section: Section) -> HeapResult<()> {
        let previous = self.current.replace(section);

        match previous {
            Some(current) => Err(HeapError::SectionNesting { current, opened: section }),
            None => Ok(()),
        }
    }

    /// Close the open section, returning it.
    pub fn end(&mut self) -> HeapResult<Section> {
        self.current.take().ok_or(HeapError::UnbalancedSection)
    }

    pub fn current(&self) -> Option<Section> {
        self.current
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }
}
