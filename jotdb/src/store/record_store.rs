use crate::document::{Oid, OID_LENGTH};
use crate::errors::{ErrorKind, JotError, JotResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File magic, first bytes of every store file.
const STORE_MAGIC: [u8; 4] = *b"JOTS";
/// On-disk format version.
const STORE_VERSION: u16 = 1;
/// Header: magic + version + two reserved bytes.
const HEADER_LEN: u64 = 8;

/// Per-record header: status byte, capacity, length, oid.
const RECORD_HEADER_LEN: u64 = 1 + 4 + 4 + OID_LENGTH as u64;

const STATUS_DEAD: u8 = 0;
const STATUS_LIVE: u8 = 1;

/// Location and shape of one record inside the file.
#[derive(Clone, Copy, Debug)]
struct Slot {
    /// Offset of the record header.
    offset: u64,
    /// Allocated payload capacity in bytes. Never shrinks.
    capacity: u32,
    /// Used payload length in bytes.
    length: u32,
}

/// File-backed record store.
///
/// Records are written as `status, capacity, length, oid, payload`; the
/// payload region is `capacity` bytes of which the first `length` are
/// used. Deleting a record flips its status byte and parks the slot in a
/// best-fit free list; a later insert or relocation reuses the smallest
/// sufficient slot, else appends at the end of the file. The directory
/// mapping OIDs to slots is rebuilt by a sequential scan on open.
///
/// All access goes through one `RwLock`: readers share, mutations are
/// exclusive, so a concurrent reader observes either the pre- or
/// post-state of an update and never a torn record. Durability is
/// explicit; `sync` forces everything to stable storage.
///
/// Cloning shares the underlying store.
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<RecordStoreInner>,
}

struct RecordStoreInner {
    path: PathBuf,
    read_only: bool,
    state: RwLock<StoreState>,
}

struct StoreState {
    file: File,
    directory: HashMap<Oid, Slot>,
    /// Free slots keyed by capacity; best fit takes the first entry of
    /// the first sufficient bucket.
    free: BTreeMap<u32, Vec<u64>>,
    /// Append position, end of the last record.
    end: u64,
}

impl RecordStore {
    /// Opens (or creates) the store file at `path` and rebuilds the
    /// directory by scanning it.
    pub fn open(path: &Path, create: bool, read_only: bool) -> JotResult<RecordStore> {
        let exists = path.exists();
        if !exists && !create {
            log::error!("Record store {} does not exist", path.display());
            return Err(JotError::new(
                &format!("Record store {} does not exist", path.display()),
                ErrorKind::NotFound,
            ));
        }
        if !exists && read_only {
            return Err(JotError::new(
                &format!("Cannot create record store {} read-only", path.display()),
                ErrorKind::ReadOnly,
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(create && !read_only)
            .open(path)?;

        let mut state = StoreState {
            file,
            directory: HashMap::new(),
            free: BTreeMap::new(),
            end: HEADER_LEN,
        };

        if exists && state.file_len()? > 0 {
            state.validate_header(path)?;
            state.rebuild_directory(path)?;
        } else {
            state.write_header()?;
        }

        Ok(RecordStore {
            inner: Arc::new(RecordStoreInner {
                path: path.to_path_buf(),
                read_only,
                state: RwLock::new(state),
            }),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Inserts a record, assigning it a fresh identifier.
    pub fn insert(&self, payload: &[u8]) -> JotResult<Oid> {
        self.check_writable()?;
        let oid = Oid::generate();
        let mut state = self.inner.state.write();
        let slot = state.allocate(payload.len() as u32)?;
        state.write_record(&slot, &oid, payload)?;
        state.directory.insert(oid, slot);
        Ok(oid)
    }

    /// Rewrites the record at `oid`.
    ///
    /// A payload that still fits the allocated capacity is written in
    /// place; a larger one relocates the record and frees the old slot.
    /// The identifier never changes.
    pub fn update(&self, oid: &Oid, payload: &[u8]) -> JotResult<()> {
        self.check_writable()?;
        let mut state = self.inner.state.write();
        let slot = match state.directory.get(oid) {
            Some(slot) => *slot,
            None => return Err(not_found(oid)),
        };

        if payload.len() as u32 <= slot.capacity {
            let updated = Slot {
                length: payload.len() as u32,
                ..slot
            };
            state.write_record(&updated, oid, payload)?;
            state.directory.insert(*oid, updated);
        } else {
            let new_slot = state.allocate(payload.len() as u32)?;
            state.write_record(&new_slot, oid, payload)?;
            state.mark_dead(&slot)?;
            state.directory.insert(*oid, new_slot);
        }
        Ok(())
    }

    /// Fetches the payload of the record at `oid`.
    pub fn fetch(&self, oid: &Oid) -> JotResult<Vec<u8>> {
        let state = self.inner.state.read();
        let slot = match state.directory.get(oid) {
            Some(slot) => *slot,
            None => return Err(not_found(oid)),
        };
        state.read_payload(&slot)
    }

    /// Whether a live record exists at `oid`.
    pub fn contains(&self, oid: &Oid) -> bool {
        self.inner.state.read().directory.contains_key(oid)
    }

    /// Deletes the record at `oid`, parking its slot for reuse. The
    /// identifier is never handed out again.
    pub fn remove(&self, oid: &Oid) -> JotResult<()> {
        self.check_writable()?;
        let mut state = self.inner.state.write();
        let slot = match state.directory.remove(oid) {
            Some(slot) => slot,
            None => return Err(not_found(oid)),
        };
        state.mark_dead(&slot)?;
        Ok(())
    }

    /// Number of live records.
    pub fn len(&self) -> u64 {
        self.inner.state.read().directory.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live record identifiers, in file order.
    pub fn oids(&self) -> Vec<Oid> {
        let state = self.inner.state.read();
        let mut entries: Vec<(u64, Oid)> = state
            .directory
            .iter()
            .map(|(oid, slot)| (slot.offset, *oid))
            .collect();
        entries.sort_by_key(|(offset, _)| *offset);
        entries.into_iter().map(|(_, oid)| oid).collect()
    }

    /// Visits every live record in file order. The callback may return
    /// an error to stop the scan.
    pub fn scan<F>(&self, mut visit: F) -> JotResult<()>
    where
        F: FnMut(&Oid, Vec<u8>) -> JotResult<()>,
    {
        for oid in self.oids() {
            // the record may have been removed between the snapshot and
            // this read; skip it rather than fail the scan
            match self.fetch(&oid) {
                Ok(payload) => visit(&oid, payload)?,
                Err(e) if e.kind() == &ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Forces all pending writes to stable storage.
    pub fn sync(&self) -> JotResult<()> {
        let state = self.inner.state.read();
        state.file.sync_all().map_err(|e| {
            log::error!("Sync of {} failed: {}", self.inner.path.display(), e);
            JotError::new(
                &format!("Sync of {} failed: {}", self.inner.path.display(), e),
                ErrorKind::Io,
            )
        })
    }

    /// Deletes the backing file. With `prune` the record payloads are
    /// overwritten with zeros before the file is unlinked, so reclaimed
    /// space does not retain document bytes.
    pub fn destroy(&self, prune: bool) -> JotResult<()> {
        self.check_writable()?;
        let mut state = self.inner.state.write();
        if prune {
            let end = state.end;
            let zeroes = vec![0u8; (end - HEADER_LEN) as usize];
            state.write_at(HEADER_LEN, &zeroes)?;
            state.file.sync_all()?;
        }
        state.directory.clear();
        state.free.clear();
        state.end = HEADER_LEN;
        std::fs::remove_file(&self.inner.path)?;
        Ok(())
    }

    fn check_writable(&self) -> JotResult<()> {
        if self.inner.read_only {
            log::error!("Record store {} is read-only", self.inner.path.display());
            return Err(JotError::new(
                &format!("Record store {} is read-only", self.inner.path.display()),
                ErrorKind::ReadOnly,
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.inner.path)
            .field("read_only", &self.inner.read_only)
            .finish()
    }
}

fn not_found(oid: &Oid) -> JotError {
    JotError::new(&format!("No record with id {}", oid), ErrorKind::NotFound)
}

impl StoreState {
    fn file_len(&self) -> JotResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn write_header(&mut self) -> JotResult<()> {
        let mut header = [0u8; HEADER_LEN as usize];
        header[0..4].copy_from_slice(&STORE_MAGIC);
        header[4..6].copy_from_slice(&STORE_VERSION.to_le_bytes());
        self.write_at(0, &header)
    }

    fn validate_header(&mut self, path: &Path) -> JotResult<()> {
        let mut header = [0u8; HEADER_LEN as usize];
        self.read_at(0, &mut header)?;
        if header[0..4] != STORE_MAGIC {
            log::error!("{} is not a record store file", path.display());
            return Err(JotError::new(
                &format!("{} is not a record store file", path.display()),
                ErrorKind::Corrupted,
            ));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != STORE_VERSION {
            return Err(JotError::new(
                &format!(
                    "{} has unsupported store version {}",
                    path.display(),
                    version
                ),
                ErrorKind::Corrupted,
            ));
        }
        Ok(())
    }

    /// Sequentially scans the file, filling the directory from live
    /// records and the free list from dead ones.
    fn rebuild_directory(&mut self, path: &Path) -> JotResult<()> {
        let file_len = self.file_len()?;
        let mut offset = HEADER_LEN;
        let mut header = [0u8; RECORD_HEADER_LEN as usize];

        while offset < file_len {
            if offset + RECORD_HEADER_LEN > file_len {
                log::error!("Record store {} has a truncated record header", path.display());
                return Err(corrupted(path, offset));
            }
            self.read_at(offset, &mut header)?;
            let status = header[0];
            let capacity = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
            let length = u32::from_le_bytes([header[5], header[6], header[7], header[8]]);
            let oid = Oid::from_bytes(&header[9..9 + OID_LENGTH])
                .map_err(|e| JotError::new_with_cause("Corrupt record id", ErrorKind::Corrupted, e))?;

            let record_end = offset + RECORD_HEADER_LEN + capacity as u64;
            if length > capacity || record_end > file_len {
                return Err(corrupted(path, offset));
            }

            match status {
                STATUS_LIVE => {
                    self.directory.insert(
                        oid,
                        Slot {
                            offset,
                            capacity,
                            length,
                        },
                    );
                }
                STATUS_DEAD => {
                    self.free.entry(capacity).or_default().push(offset);
                }
                _ => return Err(corrupted(path, offset)),
            }
            offset = record_end;
        }
        self.end = offset;
        Ok(())
    }

    /// Picks the smallest sufficient free slot, else appends.
    fn allocate(&mut self, length: u32) -> JotResult<Slot> {
        let reuse = self
            .free
            .range_mut(length..)
            .next()
            .map(|(capacity, offsets)| (*capacity, offsets.pop()));

        if let Some((capacity, Some(offset))) = reuse {
            if self.free.get(&capacity).is_some_and(|v| v.is_empty()) {
                self.free.remove(&capacity);
            }
            return Ok(Slot {
                offset,
                capacity,
                length,
            });
        }

        let slot = Slot {
            offset: self.end,
            capacity: length,
            length,
        };
        self.end += RECORD_HEADER_LEN + length as u64;
        Ok(slot)
    }

    fn write_record(&mut self, slot: &Slot, oid: &Oid, payload: &[u8]) -> JotResult<()> {
        let mut record =
            Vec::with_capacity(RECORD_HEADER_LEN as usize + payload.len());
        record.push(STATUS_LIVE);
        record.extend_from_slice(&slot.capacity.to_le_bytes());
        record.extend_from_slice(&slot.length.to_le_bytes());
        record.extend_from_slice(oid.as_bytes());
        record.extend_from_slice(payload);
        self.write_at(slot.offset, &record)
    }

    fn mark_dead(&mut self, slot: &Slot) -> JotResult<()> {
        self.write_at(slot.offset, &[STATUS_DEAD])?;
        self.free.entry(slot.capacity).or_default().push(slot.offset);
        Ok(())
    }

    fn read_payload(&self, slot: &Slot) -> JotResult<Vec<u8>> {
        let mut payload = vec![0u8; slot.length as usize];
        self.read_at(slot.offset + RECORD_HEADER_LEN, &mut payload)?;
        Ok(payload)
    }

    // positional I/O: no shared seek cursor, so concurrent readers under
    // the read lock cannot interleave
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> JotResult<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> JotResult<()> {
        self.file.write_all_at(bytes, offset)?;
        Ok(())
    }
}

fn corrupted(path: &Path, offset: u64) -> JotError {
    log::error!("Record store {} is corrupt at offset {}", path.display(), offset);
    JotError::new(
        &format!(
            "Record store {} is corrupt at offset {}",
            path.display(),
            offset
        ),
        ErrorKind::Corrupted,
    )
}
