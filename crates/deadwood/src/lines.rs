//! Offset→source-line mapping.
//!
//! The decompiler's line table maps a *starting* bytecode offset to a source
//! line. An offset belongs to the last entry at or before it; when the next
//! entry starts on a later line, the offset spans the whole line range in
//! between (a multi-line statement compiled to one region of bytecode).

use std::collections::BTreeSet;

use crate::bytecode::LineEntry;

/// A method's offset→line table, sorted by offset.
#[derive(Debug, Clone, Default)]
pub struct LineTable {
    entries: Vec<LineEntry>,
}

impl LineTable {
    pub fn new(mut entries: Vec<LineEntry>) -> Self {
        entries.sort_by_key(|e| e.offset);
        Self { entries }
    }

    /// The source lines a bytecode offset covers. Empty when the offset
    /// precedes the first mapping (no line info).
    pub fn lines_for(&self, offset: u32) -> Vec<u32> {
        let idx = self.entries.partition_point(|e| e.offset <= offset);
        if idx == 0 {
            return Vec::new();
        }
        let current = self.entries[idx - 1].line;
        if let Some(next) = self.entries.get(idx) {
            if next.line > current {
                return (current..next.line).collect();
            }
        }
        vec![current]
    }

    /// Maps a set of dead offsets to the sorted set of dead source lines.
    pub fn dead_lines(&self, dead_offsets: &[u32]) -> Vec<u32> {
        let mut lines = BTreeSet::new();
        for &offset in dead_offsets {
            lines.extend(self.lines_for(offset));
        }
        lines.into_iter().collect()
    }
}
