//! Numerous constants used as parameters to GC behavior


// Heap parameters
pub const DEFAULT_INITIAL_CAPACITY: usize = 1024;
pub const DEFAULT_WEAK_SLOT_CAPACITY: usize = 64;

// Bits and masks for object flags
pub const MARK_BIT: usize = 1;
pub const MARK_MASK: usize = !1;
pub const TRAVERSE_BIT: usize = 2;

// compressed pointer value reserved for null
pub const NULL_INDEX: u32 = 0;

// symbol id reserved for "no symbol"
pub const INVALID_SYMBOL: u32 = u32::MAX;

// Heap snapshot node ids. Ids are odd, as in V8 snapshots, and the first few are reserved for
// synthetic nodes: the super root, the GC roots node, the weak slot storage, one per root
// section, then singletons.
pub const SUPER_ROOT_ID: u64 = 1;
pub const GC_ROOTS_ID: u64 = 3;
pub const WEAK_SLOT_STORAGE_ID: u64 = 5;
pub const ID_STEP: u64 = 2;

// Fields per node and per edge in the serialized snapshot
pub const NODE_FIELD_COUNT: usize = 6;
pub const EDGE_FIELD_COUNT: usize = 3;
