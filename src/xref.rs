use std::collections::BTreeMap;
use std::io::Write;

use crate::Result;

/// Cross-reference section: where each object number lives.
#[derive(Debug, Clone, Default)]
pub struct Xref {
    /// Entries indexed by object number.
    pub entries: BTreeMap<u32, XrefEntry>,
    /// Total number of entries, one greater than the highest object number.
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// A free entry, linked to the next free object number.
    Free { next: u32, generation: u16 },
    /// An object stored at a byte offset in the file.
    Normal { offset: u64, generation: u16 },
    /// An object stored inside an object stream.
    Compressed { container: u32, index: u16 },
}

impl XrefEntry {
    pub fn is_free(&self) -> bool {
        matches!(self, XrefEntry::Free { .. })
    }

    fn fields(&self) -> (u8, u64, u16) {
        match *self {
            XrefEntry::Free { next, generation } => (0, u64::from(next), generation),
            XrefEntry::Normal { offset, generation } => (1, offset, generation),
            XrefEntry::Compressed { container, index } => (2, u64::from(container), index),
        }
    }
}

impl Xref {
    pub fn new(size: u32) -> Xref {
        Xref {
            entries: BTreeMap::new(),
            size,
        }
    }

    pub fn get(&self, id: u32) -> Option<&XrefEntry> {
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: u32, entry: XrefEntry) {
        self.entries.insert(id, entry);
    }

    /// Adds the entries of an older section. Entries already present win.
    pub fn merge(&mut self, older: Xref) {
        for (id, entry) in older.entries {
            self.entries.entry(id).or_insert(entry);
        }
        self.size = self.size.max(older.size);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_id(&self) -> u32 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    /// Runs of consecutive object numbers, as `(first, entries)`.
    pub fn subsections(&self) -> Vec<(u32, Vec<XrefEntry>)> {
        let mut sections: Vec<(u32, Vec<XrefEntry>)> = Vec::new();
        for (&id, &entry) in &self.entries {
            match sections.last_mut() {
                Some((first, run)) if *first + run.len() as u32 == id => run.push(entry),
                _ => sections.push((id, vec![entry])),
            }
        }
        sections
    }

    /// Writes a classic `xref` table. Every entry is exactly 20 bytes.
    pub fn write_table(&self, file: &mut dyn Write) -> Result<()> {
        file.write_all(b"xref\n")?;
        for (first, run) in self.subsections() {
            writeln!(file, "{} {}", first, run.len())?;
            for entry in run {
                let (kind, value, generation) = entry.fields();
                let marker = if kind == 0 { 'f' } else { 'n' };
                writeln!(file, "{value:010} {generation:05} {marker} ")?;
            }
        }
        Ok(())
    }

    /// Field widths for an xref stream: one byte for the type, enough bytes for the
    /// largest offset or container number, two bytes for generation or index.
    pub fn stream_widths(&self) -> [usize; 3] {
        let largest = self.entries.values().map(|entry| entry.fields().1).max().unwrap_or(0);
        let mut middle = 1;
        while middle < 8 && largest >> (middle * 8) != 0 {
            middle += 1;
        }
        [1, middle, 2]
    }

    /// The `/Index` array describing the subsections.
    pub fn stream_index(&self) -> Vec<(u32, u32)> {
        self.subsections()
            .into_iter()
            .map(|(first, run)| (first, run.len() as u32))
            .collect()
    }

    /// Binary rows of an xref stream, unfiltered.
    pub fn encode_stream_rows(&self, widths: [usize; 3]) -> Vec<u8> {
        let row_len: usize = widths.iter().sum();
        let mut data = Vec::with_capacity(self.entries.len() * row_len);
        for entry in self.entries.values() {
            let (kind, value, generation) = entry.fields();
            write_big_endian(&mut data, u64::from(kind), widths[0]);
            write_big_endian(&mut data, value, widths[1]);
            write_big_endian(&mut data, u64::from(generation), widths[2]);
        }
        data
    }
}

fn write_big_endian(data: &mut Vec<u8>, value: u64, width: usize) {
    let bytes = value.to_be_bytes();
    data.extend_from_slice(&bytes[bytes.len() - width..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Xref {
        let mut xref = Xref::new(4);
        xref.insert(0, XrefEntry::Free { next: 0, generation: 65535 });
        xref.insert(1, XrefEntry::Normal { offset: 15, generation: 0 });
        xref.insert(2, XrefEntry::Normal { offset: 300, generation: 0 });
        xref.insert(7, XrefEntry::Compressed { container: 2, index: 3 });
        xref
    }

    #[test]
    fn table_entries_are_twenty_bytes() {
        let mut out = Vec::new();
        sample().write_table(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("xref\n0 3\n0000000000 65535 f \n0000000015 00000 n \n"));
        assert!(text.contains("7 1\n"));
        for line in text.split_inclusive('\n').filter(|line| line.len() > 12) {
            assert_eq!(line.len(), 20);
        }
    }

    #[test]
    fn stream_rows_use_minimal_width() {
        let xref = sample();
        let widths = xref.stream_widths();
        assert_eq!(widths, [1, 2, 2]);
        let rows = xref.encode_stream_rows(widths);
        assert_eq!(rows.len(), 4 * 5);
        assert_eq!(&rows[10..15], &[1, 0x01, 0x2C, 0, 0]);
        assert_eq!(xref.stream_index(), vec![(0, 3), (7, 1)]);
    }

    #[test]
    fn newer_entries_win_on_merge() {
        let mut newer = Xref::new(3);
        newer.insert(1, XrefEntry::Normal { offset: 900, generation: 0 });
        newer.merge(sample());
        assert_eq!(newer.get(1), Some(&XrefEntry::Normal { offset: 900, generation: 0 }));
        assert_eq!(newer.size, 4);
        assert_eq!(newer.max_id(), 7);
    }
}
