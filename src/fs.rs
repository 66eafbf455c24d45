//! File store seam.
//!
//! The log-structured filesystem is an external collaborator; the core only
//! sees an opaque store with create/open/seek/read/write/sync/remove and
//! directory listing. The recorder task owns the store handle exclusively
//! while it is running.

use core::fmt::Write as _;

use heapless::String;

use crate::state::FlightStats;

pub const FLIGHT_COUNTER_PATH: &str = "/flight_counter";
pub const FLIGHTS_DIR: &str = "/flights";
pub const STATS_DIR: &str = "/stats";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsError {
    NotFound,
    NoSpace,
    Io,
}

pub trait FsFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError>;
    fn seek(&mut self, pos: u32) -> Result<(), FsError>;
    fn sync(&mut self) -> Result<(), FsError>;
}

pub trait FlightFs {
    type File: FsFile;

    /// Creates (truncating) a file.
    fn create(&mut self, path: &str) -> Result<Self::File, FsError>;
    fn open(&mut self, path: &str) -> Result<Self::File, FsError>;
    fn remove(&mut self, path: &str) -> Result<(), FsError>;
    /// Calls `visit` once per entry name in `dir`.
    fn list(&mut self, dir: &str, visit: &mut dyn FnMut(&str)) -> Result<(), FsError>;
}

/// Reads the persisted flight counter, bumps it, and returns the new flight
/// number together with its file path. The counter file holds a single
/// little-endian u32 and starts at zero on a fresh store.
pub fn next_flight<F: FlightFs>(fs: &mut F) -> Result<(u32, String<32>), FsError> {
    let mut count = 0u32;
    if let Ok(mut f) = fs.open(FLIGHT_COUNTER_PATH) {
        let mut buf = [0u8; 4];
        if f.read(&mut buf)? == 4 {
            count = u32::from_le_bytes(buf);
        }
    }
    count += 1;

    let mut f = fs.create(FLIGHT_COUNTER_PATH)?;
    f.write(&count.to_le_bytes())?;
    f.sync()?;

    Ok((count, flight_path(count)))
}

pub fn flight_path(flight: u32) -> String<32> {
    let mut path = String::new();
    // 32 bytes always fit the formatted name; a full counter still fits.
    let _ = write!(path, "{}/flight_{:05}", FLIGHTS_DIR, flight);
    path
}

pub fn stats_path(flight: u32) -> String<32> {
    let mut path = String::new();
    let _ = write!(path, "{}/stats_{:05}.txt", STATS_DIR, flight);
    path
}

/// Writes the human-readable post-flight summary.
pub fn write_stats<F: FlightFs>(fs: &mut F, flight: u32, stats: &FlightStats) -> Result<(), FsError> {
    let mut text: String<160> = String::new();
    let _ = write!(
        text,
        "flight {}\nmax height: {} m\nmax velocity: {} m/s\nmax acceleration: {} m/s2\n",
        flight, stats.max_height, stats.max_velocity, stats.max_acceleration
    );
    let mut f = fs.create(stats_path(flight).as_str())?;
    f.write(text.as_bytes())?;
    f.sync()
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory store used by the host tests.

    use super::*;
    use std::collections::BTreeMap;
    use std::rc::Rc;
    use std::sync::Mutex;
    use std::vec::Vec;

    type Files = Rc<Mutex<BTreeMap<std::string::String, Vec<u8>>>>;

    #[derive(Default)]
    pub struct MemFs {
        files: Files,
    }

    pub struct MemFile {
        files: Files,
        path: std::string::String,
        pos: usize,
        pub sync_count: usize,
    }

    impl MemFs {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().unwrap().get(path).cloned()
        }

        pub fn paths(&self) -> Vec<std::string::String> {
            self.files.lock().unwrap().keys().cloned().collect()
        }
    }

    impl FlightFs for MemFs {
        type File = MemFile;

        fn create(&mut self, path: &str) -> Result<MemFile, FsError> {
            self.files.lock().unwrap().insert(path.into(), Vec::new());
            Ok(MemFile { files: self.files.clone(), path: path.into(), pos: 0, sync_count: 0 })
        }

        fn open(&mut self, path: &str) -> Result<MemFile, FsError> {
            if !self.files.lock().unwrap().contains_key(path) {
                return Err(FsError::NotFound);
            }
            Ok(MemFile { files: self.files.clone(), path: path.into(), pos: 0, sync_count: 0 })
        }

        fn remove(&mut self, path: &str) -> Result<(), FsError> {
            self.files.lock().unwrap().remove(path).map(|_| ()).ok_or(FsError::NotFound)
        }

        fn list(&mut self, dir: &str, visit: &mut dyn FnMut(&str)) -> Result<(), FsError> {
            for k in self.files.lock().unwrap().keys() {
                if k.starts_with(dir) {
                    visit(k);
                }
            }
            Ok(())
        }
    }

    impl FsFile for MemFile {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
            let files = self.files.lock().unwrap();
            let data = files.get(&self.path).ok_or(FsError::NotFound)?;
            let n = buf.len().min(data.len().saturating_sub(self.pos));
            buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
            let mut files = self.files.lock().unwrap();
            let data = files.get_mut(&self.path).ok_or(FsError::NotFound)?;
            if data.len() < self.pos + buf.len() {
                data.resize(self.pos + buf.len(), 0);
            }
            data[self.pos..self.pos + buf.len()].copy_from_slice(buf);
            self.pos += buf.len();
            Ok(buf.len())
        }

        fn seek(&mut self, pos: u32) -> Result<(), FsError> {
            self.pos = pos as usize;
            Ok(())
        }

        fn sync(&mut self) -> Result<(), FsError> {
            self.sync_count += 1;
            Ok(())
        }
    }
}
