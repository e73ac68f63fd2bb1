//! Per-direction, per-connection header compression table (spec §4.2):
//! a fixed static table followed by a size-bounded, FIFO-evicting dynamic
//! table. Grounded in `examples/original_source/include/cocaine/rpc/asio/header.hpp`
//! for the eviction/size-accounting semantics, and in
//! `examples/dennisss-dacha/pkg/http/src/hpack/dynamic_table.rs` for the
//! idiomatic Rust shape of that same algorithm (`VecDeque`, push_front,
//! pop_back-until-it-fits).

mod static_table;

use std::collections::VecDeque;

use crate::frame::Header;

/// Dynamic table capacity in bytes (spec §3/§5: "capacity is 4096 bytes").
pub const CAPACITY: usize = 4096;

/// The combined static+dynamic compression dictionary for one direction of
/// one connection.
#[derive(Debug)]
pub struct HeaderTable {
    static_table: Vec<Header>,
    dynamic: VecDeque<Header>,
    dynamic_size: usize,
}

impl Default for HeaderTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderTable {
    pub fn new() -> Self {
        HeaderTable {
            static_table: static_table::build(),
            dynamic: VecDeque::new(),
            dynamic_size: 0,
        }
    }

    /// Total number of addressable entries (spec §4.2: `size = static.len +
    /// dyn.len`).
    pub fn len(&self) -> usize {
        self.static_table.len() + self.dynamic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of all dynamic entries' sizes.
    pub fn data_size(&self) -> usize {
        self.dynamic_size
    }

    /// Looks up a 1-based combined index; static indices come first.
    /// Index 0 is never valid.
    pub fn lookup(&self, idx: usize) -> Option<&Header> {
        if idx == 0 {
            return None;
        }
        let idx = idx - 1;
        if idx < self.static_table.len() {
            return self.static_table.get(idx);
        }
        self.dynamic.get(idx - self.static_table.len())
    }

    /// Exact `(name, value)` match, static table searched before dynamic.
    pub fn find_exact(&self, header: &Header) -> Option<usize> {
        self.find(|h| h.name == header.name && h.value == header.value)
    }

    /// First entry whose name matches, static table searched before
    /// dynamic. Per spec §4.1, when multiple positions match, any is
    /// acceptable.
    pub fn find_name(&self, header: &Header) -> Option<usize> {
        self.find(|h| h.name == header.name)
    }

    fn find(&self, pred: impl Fn(&Header) -> bool) -> Option<usize> {
        for (i, h) in self.static_table.iter().enumerate() {
            if pred(h) {
                return Some(i + 1);
            }
        }
        let base = self.static_table.len();
        for (i, h) in self.dynamic.iter().enumerate() {
            if pred(h) {
                return Some(base + i + 1);
            }
        }
        None
    }

    /// Inserts `header` into the dynamic table, evicting oldest entries
    /// (FIFO from the tail) until it fits. An entry whose size alone
    /// exceeds capacity empties the table and is not stored (spec §4.2,
    /// §8 "Header-table bound").
    pub fn push(&mut self, header: Header) {
        let size = header.size();
        if size > CAPACITY {
            self.dynamic.clear();
            self.dynamic_size = 0;
            return;
        }
        while self.dynamic_size + size > CAPACITY {
            match self.dynamic.pop_back() {
                Some(evicted) => self.dynamic_size -= evicted.size(),
                None => break,
            }
        }
        self.dynamic_size += size;
        self.dynamic.push_front(header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_zero_is_never_valid() {
        let table = HeaderTable::new();
        assert!(table.lookup(0).is_none());
    }

    #[test]
    fn static_indices_resolve_before_dynamic() {
        let mut table = HeaderTable::new();
        let static_len = table.len();
        table.push(Header::new(&b"x-custom"[..], &b"v"[..]));
        assert_eq!(table.lookup(static_len + 1).unwrap().name, &b"x-custom"[..]);
    }

    #[test]
    fn eviction_keeps_table_within_capacity() {
        let mut table = HeaderTable::new();
        table.push(Header::new(vec![0u8; 2960], vec![0u8; 8]));
        assert_eq!(table.data_size(), 3000);
        table.push(Header::new(vec![0u8; 1960], vec![0u8; 8]));
        assert_eq!(table.data_size(), 2000);
        assert_eq!(table.dynamic.len(), 1);
    }

    #[test]
    fn oversized_entry_empties_table() {
        let mut table = HeaderTable::new();
        table.push(Header::new(&b"x"[..], &b"y"[..]));
        assert_eq!(table.dynamic.len(), 1);
        table.push(Header::new(vec![0u8; CAPACITY], vec![0u8; 1]));
        assert_eq!(table.dynamic.len(), 0);
        assert_eq!(table.data_size(), 0);
    }

    #[test]
    fn find_exact_and_find_name_roundtrip() {
        let mut table = HeaderTable::new();
        let header = Header::new(&b"x-custom"[..], &b"v1"[..]);
        table.push(header.clone());
        let idx = table.find_exact(&header).expect("exact match");
        assert_eq!(table.lookup(idx).unwrap(), &header);

        let same_name_other_value = Header::new(&b"x-custom"[..], &b"v2"[..]);
        assert!(table.find_exact(&same_name_other_value).is_none());
        assert!(table.find_name(&same_name_other_value).is_some());
    }
}
