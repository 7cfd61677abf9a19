//! Error types surfaced by concrete acceptors and the drivers built on them.
//!
//! Acceptor methods never return errors. An acceptor that detects a problem records it and the
//! driver that owns the acceptor decides how to surface it.


use std::io;

use thiserror::Error;

use crate::section::Section;
use crate::value::{RawPtr, SymbolId};


/// Problems found while walking the heap.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeapError {
    #[error("pointer {0:#x} is outside the managed heap")]
    DanglingPointer(usize),

    #[error("symbol {0:?} is referenced but not live")]
    DeadSymbol(SymbolId),

    #[error("empty value found in root slot")]
    EmptyRoot,

    #[error("root section {opened:?} opened while {current:?} is still open")]
    SectionNesting { current: Section, opened: Section },

    #[error("root section closed while no section is open")]
    UnbalancedSection,
}


impl HeapError {
    pub fn dangling(ptr: RawPtr) -> HeapError {
        HeapError::DanglingPointer(ptr as usize)
    }
}


/// Failures while writing out a heap snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to write heap snapshot: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode heap snapshot: {0}")]
    Json(#[from] serde_json::Error),
}


pub type HeapResult<T> = Result<T, HeapError>;
pub type SnapshotResult<T> = Result<T, SnapshotError>;
