use crate::header::{decode_slot, encode_slot, slot_offset, Header, DecodeError, HEADER_LEN, SLOT_LEN};
use ldm7_types::{FeedSpec, ProdIndex, Signature};
use memmap2::{Mmap, MmapMut};
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum IndexMapError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt index map at {path}: {source}")]
    Corrupt { path: PathBuf, source: DecodeError },
    #[error("map was opened for reading; put() is not available")]
    ReadOnly,
    #[error("capacity must be at least 1")]
    ZeroCapacity,
}

fn path_for(dir: &Path, feed: FeedSpec) -> PathBuf {
    dir.join(format!("{}.map", feed.as_key()))
}

enum Backing {
    Read(Mmap),
    Write(MmapMut),
}

impl Backing {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Backing::Read(m) => &m[..],
            Backing::Write(m) => &m[..],
        }
    }
}

/// A bounded circular `(ProdIndex, Signature)` store (C2), memory-mapped
/// into `{dir}/{feed}.map` so it survives process restart (I8).
///
/// Entries are slotted by `prod_index % capacity`: appending in order never
/// touches the header's notion of which slots are "live", and an
/// out-of-order `put` simply resets the live window to start at the new
/// index (I6) — the old slot contents are left in place but fall outside
/// the window so `get` on them reports `NOT_FOUND` (I7) until they are
/// eventually overwritten.
pub struct IndexMap {
    path: PathBuf,
    backing: Backing,
}

impl IndexMap {
    pub fn open_for_writing(dir: &Path, feed: FeedSpec, max_sigs: u32) -> Result<Self, IndexMapError> {
        if max_sigs == 0 {
            return Err(IndexMapError::ZeroCapacity);
        }
        let path = path_for(dir, feed);
        let expected_len = (HEADER_LEN + max_sigs as usize * SLOT_LEN) as u64;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| IndexMapError::Io { path: path.clone(), source })?;
        let current_len = file
            .metadata()
            .map_err(|source| IndexMapError::Io { path: path.clone(), source })?
            .len();

        let needs_init = current_len != expected_len;
        if needs_init {
            file.set_len(expected_len)
                .map_err(|source| IndexMapError::Io { path: path.clone(), source })?;
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|source| IndexMapError::Io { path: path.clone(), source })?;

        let header = if needs_init {
            Header::fresh(max_sigs)
        } else {
            match Header::decode(&mmap[..HEADER_LEN]) {
                Ok(h) if h.capacity == max_sigs => h,
                _ => Header::fresh(max_sigs),
            }
        };
        header.encode(&mut mmap[..HEADER_LEN]);
        mmap.flush().map_err(|source| IndexMapError::Io { path: path.clone(), source })?;

        Ok(Self {
            path,
            backing: Backing::Write(mmap),
        })
    }

    pub fn open_for_reading(dir: &Path, feed: FeedSpec) -> Result<Self, IndexMapError> {
        let path = path_for(dir, feed);
        let file = File::open(&path).map_err(|source| IndexMapError::Io { path: path.clone(), source })?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| IndexMapError::Io { path: path.clone(), source })?;
        Header::decode(&mmap[..HEADER_LEN.min(mmap.len())])
            .map_err(|source| IndexMapError::Corrupt { path: path.clone(), source })?;
        Ok(Self {
            path,
            backing: Backing::Read(mmap),
        })
    }

    pub fn delete(dir: &Path, feed: FeedSpec) -> Result<(), IndexMapError> {
        let path = path_for(dir, feed);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(IndexMapError::Io { path, source }),
        }
    }

    fn header(&self) -> Header {
        // `decode` only fails on a bad magic/version/length, which open()
        // already validated; a live header can only become malformed by
        // writing through `put`, which always re-encodes a well-formed one.
        Header::decode(&self.backing.as_bytes()[..HEADER_LEN]).expect("header corrupted after open")
    }

    /// `put(i, sig)`: appends if `i` continues the run, otherwise clears
    /// and re-anchors at `i` (I5, I6).
    pub fn put(&mut self, i: ProdIndex, sig: Signature) -> Result<(), IndexMapError> {
        let mmap = match &mut self.backing {
            Backing::Write(m) => m,
            Backing::Read(_) => return Err(IndexMapError::ReadOnly),
        };
        let header = Header::decode(&mmap[..HEADER_LEN]).expect("header corrupted after open");
        let capacity = header.capacity;

        let is_append = header.has_last && i.0 == header.last_index.wrapping_add(1);
        let new_count = if !header.has_last {
            1
        } else if is_append {
            (header.count + 1).min(capacity)
        } else {
            1
        };

        let slot = i.0 % capacity;
        let offset = slot_offset(slot);
        encode_slot(&mut mmap[offset..offset + SLOT_LEN], i.0, true, sig.as_bytes());
        mmap.flush_range(offset, SLOT_LEN)
            .map_err(|source| IndexMapError::Io { path: self.path.clone(), source })?;

        let new_header = Header {
            capacity,
            count: new_count,
            last_index: i.0,
            has_last: true,
        };
        new_header.encode(&mut mmap[..HEADER_LEN]);
        mmap.flush_range(0, HEADER_LEN)
            .map_err(|source| IndexMapError::Io { path: self.path.clone(), source })?;
        Ok(())
    }

    pub fn get(&self, i: ProdIndex) -> Option<Signature> {
        let header = self.header();
        if !header.has_last || header.count == 0 {
            return None;
        }
        let last = ProdIndex(header.last_index);
        let oldest = ProdIndex(header.last_index.wrapping_sub(header.count - 1));
        let in_window = (oldest == i || oldest.precedes(i)) && (i == last || i.precedes(last));
        if !in_window {
            return None;
        }
        let slot = i.0 % header.capacity;
        let offset = slot_offset(slot);
        let (stored_index, occupied, signature) = decode_slot(&self.backing.as_bytes()[offset..offset + SLOT_LEN]);
        if occupied && stored_index == i.0 {
            Some(Signature::from(signature))
        } else {
            None
        }
    }

    pub fn get_next_index(&self) -> ProdIndex {
        let header = self.header();
        if header.has_last {
            ProdIndex(header.last_index.wrapping_add(1))
        } else {
            ProdIndex(0)
        }
    }

    pub fn capacity(&self) -> u32 {
        self.header().capacity
    }

    pub fn len(&self) -> u32 {
        self.header().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
