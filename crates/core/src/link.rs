//! Tag/link table: canned identification payloads keyed by a 32-bit tag.
//!
//! The table is immutable once built and must end with the [`LINK_TAG_LAST`]
//! sentinel, which never takes part in lookups. A link query arms a
//! [`LinkCursor`] that drains the matched payload one byte per read; reads
//! past the end (or with no match at all) return [`LINK_FILLER`] forever.

use crate::error::LinkTableError;

/// Terminates the table; never matches a query.
pub const LINK_TAG_LAST: u32 = 0xFFFF_FFFF;
/// Returned for every read past the payload or after an unmatched tag.
pub const LINK_FILLER: u8 = 0x5A;

// Identification tags answered by the card firmware
pub const TAG_BOARD_ID: u32 = 0x4151_5000;
pub const TAG_FIRMWARE_REV: u32 = 0x4151_5001;
pub const TAG_SERIAL_NO: u32 = 0x4151_5002;
pub const TAG_MEMORY_MAP: u32 = 0x4151_5003;

/// Built-in table, in scan order.
const DEFAULT_LINKS: &[(u32, &[u8])] = &[
    (TAG_BOARD_ID, b"BRUKER AQP/ISA\0"),
    (TAG_FIRMWARE_REV, b"FW 2.10 1996-04\0"),
    (TAG_SERIAL_NO, &[0x07, 0x31, 0x00, 0x96]),
    // base (LE), size (LE)
    (TAG_MEMORY_MAP, &[0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x20, 0x00]),
    (LINK_TAG_LAST, &[]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub tag: u32,
    pub payload: Box<[u8]>,
}

impl LinkEntry {
    pub fn new(tag: u32, payload: &[u8]) -> Self {
        LinkEntry { tag, payload: payload.into() }
    }

    /// Payload byte at `offset`, or the filler past the end.
    pub fn read_at(&self, offset: usize) -> u8 {
        self.payload.get(offset).copied().unwrap_or(LINK_FILLER)
    }
}

#[derive(Debug, Clone)]
pub struct LinkTable {
    entries: Vec<LinkEntry>,
}

impl LinkTable {
    /// Validate and build a table. The last entry must be the sentinel.
    pub fn new(entries: Vec<LinkEntry>) -> Result<Self, LinkTableError> {
        match entries.last() {
            Some(e) if e.tag == LINK_TAG_LAST => {}
            _ => return Err(LinkTableError::MissingSentinel),
        }
        let body = &entries[..entries.len() - 1];
        for (i, e) in body.iter().enumerate() {
            if e.tag == LINK_TAG_LAST {
                return Err(LinkTableError::SentinelInBody(i));
            }
            if body[..i].iter().any(|prev| prev.tag == e.tag) {
                return Err(LinkTableError::DuplicateTag(e.tag));
            }
        }
        Ok(LinkTable { entries })
    }

    /// The card's built-in identification table.
    pub fn builtin() -> Result<Self, LinkTableError> {
        Self::new(DEFAULT_LINKS.iter().map(|&(tag, payload)| LinkEntry::new(tag, payload)).collect())
    }

    /// Linear scan, first match wins; the sentinel is excluded.
    pub fn lookup(&self, tag: u32) -> Option<&LinkEntry> {
        self.position(tag).map(|i| &self.entries[i])
    }

    fn position(&self, tag: u32) -> Option<usize> {
        if tag == LINK_TAG_LAST {
            return None;
        }
        self.entries.iter().position(|e| e.tag == tag)
    }

    pub fn entry(&self, index: usize) -> Option<&LinkEntry> {
        self.entries.get(index)
    }

    /// Number of real entries (sentinel not counted).
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arm a cursor for `tag`. Absent tags give an empty cursor.
    pub fn open(&self, tag: u32) -> LinkCursor {
        LinkCursor { entry: self.position(tag), offset: 0 }
    }
}

/// Read position inside one table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCursor {
    pub entry: Option<usize>,
    pub offset: usize,
}

impl LinkCursor {
    pub fn is_matched(&self) -> bool {
        self.entry.is_some()
    }

    /// Emit the next byte. The offset stops at the payload length.
    pub fn next_byte(&mut self, table: &LinkTable) -> u8 {
        let Some(entry) = self.entry.and_then(|i| table.entry(i)) else {
            return LINK_FILLER;
        };
        let b = entry.read_at(self.offset);
        if self.offset < entry.payload.len() {
            self.offset += 1;
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_valid() {
        let t = LinkTable::builtin().unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(&*t.lookup(TAG_BOARD_ID).unwrap().payload, b"BRUKER AQP/ISA\0");
    }

    #[test]
    fn test_payload_then_filler() {
        let t = LinkTable::builtin().unwrap();
        let mut c = t.open(TAG_SERIAL_NO);
        let got: Vec<u8> = (0..4).map(|_| c.next_byte(&t)).collect();
        assert_eq!(got, vec![0x07, 0x31, 0x00, 0x96]);
        for _ in 0..10 {
            assert_eq!(c.next_byte(&t), LINK_FILLER);
        }
        assert_eq!(c.offset, 4);
    }

    #[test]
    fn test_unmatched_tag_all_filler() {
        let t = LinkTable::builtin().unwrap();
        let mut c = t.open(0x1234_5678);
        assert!(!c.is_matched());
        for _ in 0..8 {
            assert_eq!(c.next_byte(&t), LINK_FILLER);
        }
    }

    #[test]
    fn test_sentinel_never_matches() {
        let t = LinkTable::builtin().unwrap();
        assert!(t.lookup(LINK_TAG_LAST).is_none());
        assert!(!t.open(LINK_TAG_LAST).is_matched());
    }

    #[test]
    fn test_read_at_past_end() {
        let e = LinkEntry::new(1, &[9]);
        assert_eq!(e.read_at(0), 9);
        assert_eq!(e.read_at(1), LINK_FILLER);
        assert_eq!(e.read_at(1000), LINK_FILLER);
    }

    #[test]
    fn test_rejects_duplicate_tag() {
        let r = LinkTable::new(vec![
            LinkEntry::new(1, b"a"),
            LinkEntry::new(1, b"b"),
            LinkEntry::new(LINK_TAG_LAST, &[]),
        ]);
        assert_eq!(r.unwrap_err(), LinkTableError::DuplicateTag(1));
    }

    #[test]
    fn test_rejects_missing_or_misplaced_sentinel() {
        let r = LinkTable::new(vec![LinkEntry::new(1, b"a")]);
        assert_eq!(r.unwrap_err(), LinkTableError::MissingSentinel);
        assert_eq!(LinkTable::new(Vec::new()).unwrap_err(), LinkTableError::MissingSentinel);
        let r = LinkTable::new(vec![
            LinkEntry::new(LINK_TAG_LAST, &[]),
            LinkEntry::new(1, b"a"),
            LinkEntry::new(LINK_TAG_LAST, &[]),
        ]);
        assert_eq!(r.unwrap_err(), LinkTableError::SentinelInBody(0));
    }

    #[test]
    fn test_first_match_wins_order() {
        let t = LinkTable::new(vec![
            LinkEntry::new(5, b"x"),
            LinkEntry::new(6, b"y"),
            LinkEntry::new(LINK_TAG_LAST, &[]),
        ]).unwrap();
        assert_eq!(t.open(6).entry, Some(1));
    }
}
