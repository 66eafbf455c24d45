//! Page-buffered record stream writer.
//!
//! Records are packed back-to-back into a 256-byte buffer. A record that
//! would cross the buffer boundary is split: the prefix fills the current
//! buffer, the buffer goes to the filesystem, and the suffix starts the next
//! one. Every 16th flushed buffer is followed by an explicit sync.

use super::entry::{RecordEntry, MAX_RECORD_SIZE};
use crate::fs::{FsError, FsFile};

pub const REC_BUFFER_LEN: usize = 256;
const SYNC_INTERVAL: u32 = 16;

pub struct PageWriter {
    buf: [u8; REC_BUFFER_LEN],
    idx: usize,
    pages_written: u32,
}

impl PageWriter {
    pub fn new() -> Self {
        Self { buf: [0; REC_BUFFER_LEN], idx: 0, pages_written: 0 }
    }

    /// Appends one record, flushing full buffers to `file` as needed.
    pub fn push<F: FsFile>(&mut self, entry: &RecordEntry, file: &mut F) -> Result<(), FsError> {
        let mut tmp = [0u8; MAX_RECORD_SIZE];
        let len = entry.serialize(&mut tmp);

        let mut off = 0;
        while off < len {
            let take = (REC_BUFFER_LEN - self.idx).min(len - off);
            self.buf[self.idx..self.idx + take].copy_from_slice(&tmp[off..off + take]);
            self.idx += take;
            off += take;
            if self.idx == REC_BUFFER_LEN {
                self.flush(file)?;
            }
        }
        Ok(())
    }

    /// Writes out a partially filled buffer and syncs; used when a flight
    /// ends so the tail of the stream is not lost.
    pub fn finalize<F: FsFile>(&mut self, file: &mut F) -> Result<(), FsError> {
        if self.idx > 0 {
            file.write(&self.buf[..self.idx])?;
            self.idx = 0;
        }
        file.sync()
    }

    fn flush<F: FsFile>(&mut self, file: &mut F) -> Result<(), FsError> {
        file.write(&self.buf)?;
        self.idx = 0;
        self.pages_written += 1;
        if self.pages_written % SYNC_INTERVAL == 0 {
            file.sync()?;
        }
        Ok(())
    }
}

impl Default for PageWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MemFs;
    use crate::fs::FlightFs;
    use crate::recorder::entry::RecordTag;
    use crate::state::ImuSample;

    fn imu_entry(ts: u32) -> RecordEntry {
        RecordEntry::Imu {
            id: 0,
            data: ImuSample { ts, acc: [1, 2, 3], gyro: [4, 5, 6] },
        }
    }

    /// Reference byte stream: plain concatenation of the serializations.
    fn reference(entries: &[RecordEntry]) -> Vec<u8> {
        let mut out = Vec::new();
        for e in entries {
            let mut tmp = [0u8; MAX_RECORD_SIZE];
            let n = e.serialize(&mut tmp);
            out.extend_from_slice(&tmp[..n]);
        }
        out
    }

    #[test]
    fn stream_is_byte_exact_across_page_splits() {
        let mut fs = MemFs::new();
        let mut file = fs.create("/flights/flight_00001").unwrap();
        let mut w = PageWriter::new();

        // 20-byte records against a 256-byte buffer: every 13th record
        // straddles the boundary.
        let entries: Vec<RecordEntry> = (0..100).map(imu_entry).collect();
        for e in &entries {
            w.push(e, &mut file).unwrap();
        }
        w.finalize(&mut file).unwrap();

        let written = fs.contents("/flights/flight_00001").unwrap();
        assert_eq!(written, reference(&entries));
    }

    #[test]
    fn split_records_parse_back() {
        let mut fs = MemFs::new();
        let mut file = fs.create("/f").unwrap();
        let mut w = PageWriter::new();
        let entries: Vec<RecordEntry> = (0..50).map(imu_entry).collect();
        for e in &entries {
            w.push(e, &mut file).unwrap();
        }
        w.finalize(&mut file).unwrap();

        let written = fs.contents("/f").unwrap();
        let mut off = 0;
        let mut parsed = Vec::new();
        while let Some((e, n)) = RecordEntry::deserialize(&written[off..]) {
            parsed.push(e);
            off += n;
        }
        assert_eq!(parsed, entries);
        assert_eq!(off, written.len());
        assert_eq!(parsed[0].tag(), RecordTag::Imu0);
    }

    #[test]
    fn flushes_happen_per_full_buffer() {
        let mut fs = MemFs::new();
        let mut file = fs.create("/f").unwrap();
        let mut w = PageWriter::new();

        // 12 records × 20 bytes = 240 bytes: still buffered.
        for i in 0..12 {
            w.push(&imu_entry(i), &mut file).unwrap();
        }
        assert!(fs.contents("/f").unwrap().is_empty());

        // The 13th crosses 256: exactly one page on disk.
        w.push(&imu_entry(12), &mut file).unwrap();
        assert_eq!(fs.contents("/f").unwrap().len(), REC_BUFFER_LEN);
    }

    #[test]
    fn sync_every_sixteen_pages() {
        let mut fs = MemFs::new();
        let mut file = fs.create("/f").unwrap();
        let mut w = PageWriter::new();

        // 16 pages worth of records: 16 * 256 / 20 = 204.8 → 205 records.
        for i in 0..205 {
            w.push(&imu_entry(i), &mut file).unwrap();
        }
        assert_eq!(file.sync_count, 1);
    }
}
