//! An append-only log file backend. Entries are framed as key length,
//! value length (or `-1` for a tombstone), key bytes, value bytes; the
//! payloads are opaque `K`/`V` values framed with `bincode` rather than
//! written verbatim. An in-memory index of "most recent offset per key"
//! is rebuilt by replaying the file on open.
//!
//! There's no `scan`/range read here — the engine above never issues one
//! — so this adapter stays a plain point-lookup keydir rather than an
//! ordered structure built to serve scans.

use std::collections::HashMap;
use std::fs::File;
use std::hash::Hash;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use fs4::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Backend;
use crate::error::{CResult, Error};

struct Inner {
    file: File,
    /// Byte offset of the most recently written entry for each key still
    /// considered live. Absence means "no live entry" (tombstoned or
    /// never written).
    index: HashMap<Vec<u8>, u64>,
}

/// A durable, single-file backend. Takes out an exclusive lock on the file
/// for as long as it's open.
pub struct LogFileBackend<K, V> {
    inner: Mutex<Inner>,
    _marker: std::marker::PhantomData<fn() -> (K, V)>,
}

impl<K, V> LogFileBackend<K, V>
where
    K: Serialize + DeserializeOwned + Eq + Hash + Clone,
    V: Serialize + DeserializeOwned + Clone,
{
    pub fn open(path: PathBuf) -> CResult<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let file = std::fs::OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive()?;

        let mut inner = Inner { file, index: HashMap::new() };
        Self::rebuild_index(&mut inner)?;

        Ok(LogFileBackend { inner: Mutex::new(inner), _marker: std::marker::PhantomData })
    }

    /// Replays the file from the start, keeping only the final offset seen
    /// for each key (a later tombstone removes an earlier offset).
    fn rebuild_index(inner: &mut Inner) -> CResult<()> {
        let file_len = inner.file.metadata()?.len();
        let mut r = BufReader::new(&mut inner.file);
        let mut pos = r.seek(SeekFrom::Start(0))?;
        let mut len_buf = [0u8; 4];

        while pos < file_len {
            r.read_exact(&mut len_buf)?;
            let key_len = u32::from_be_bytes(len_buf);
            r.read_exact(&mut len_buf)?;
            let value_len_or_tombstone = i32::from_be_bytes(len_buf);

            let mut key = vec![0u8; key_len as usize];
            r.read_exact(&mut key)?;

            let entry_pos = pos;
            if value_len_or_tombstone >= 0 {
                r.seek_relative(value_len_or_tombstone as i64)?;
                inner.index.insert(key, entry_pos);
                pos = r.stream_position()?;
            } else {
                inner.index.remove(&key);
                pos = r.stream_position()?;
            }
        }

        Ok(())
    }

    fn encode_key(key: &K) -> CResult<Vec<u8>> {
        Ok(bincode::serialize(key)?)
    }

    fn append(inner: &mut Inner, key_bytes: &[u8], value: Option<&V>) -> CResult<u64> {
        let value_bytes = value.map(bincode::serialize).transpose()?;
        let value_len_or_tombstone = value_bytes.as_ref().map_or(-1, |v| v.len() as i32);

        let pos = inner.file.seek(SeekFrom::End(0))?;
        let mut w = BufWriter::new(&mut inner.file);
        w.write_all(&(key_bytes.len() as u32).to_be_bytes())?;
        w.write_all(&value_len_or_tombstone.to_be_bytes())?;
        w.write_all(key_bytes)?;
        if let Some(bytes) = &value_bytes {
            w.write_all(bytes)?;
        }
        w.flush()?;
        inner.file.sync_all()?;
        Ok(pos)
    }

    fn read_value_at(inner: &mut Inner, pos: u64) -> CResult<V> {
        inner.file.seek(SeekFrom::Start(pos))?;
        let mut len_buf = [0u8; 4];
        inner.file.read_exact(&mut len_buf)?;
        let key_len = u32::from_be_bytes(len_buf);
        inner.file.read_exact(&mut len_buf)?;
        let value_len = i32::from_be_bytes(len_buf);
        inner.file.seek(SeekFrom::Current(key_len as i64))?;
        let mut value_buf = vec![0u8; value_len.max(0) as usize];
        inner.file.read_exact(&mut value_buf)?;
        Ok(bincode::deserialize(&value_buf)?)
    }
}

impl<K, V> Backend<K, V> for LogFileBackend<K, V>
where
    K: Serialize + DeserializeOwned + Eq + Hash + Clone,
    V: Serialize + DeserializeOwned + Clone,
{
    type Error = Error;

    fn read(&self, key: &K) -> Result<Option<V>, Self::Error> {
        let key_bytes = Self::encode_key(key)?;
        let mut inner = self.inner.lock().unwrap();
        let pos = match inner.index.get(&key_bytes).copied() {
            Some(pos) => pos,
            None => return Ok(None),
        };
        Self::read_value_at(&mut inner, pos).map(Some)
    }

    fn write(&self, key: &K, value: V) -> Result<(), Self::Error> {
        let key_bytes = Self::encode_key(key)?;
        let mut inner = self.inner.lock().unwrap();
        let pos = Self::append(&mut inner, &key_bytes, Some(&value))?;
        inner.index.insert(key_bytes, pos);
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<(), Self::Error> {
        let key_bytes = Self::encode_key(key)?;
        let mut inner = self.inner.lock().unwrap();
        Self::append(&mut inner, &key_bytes, None)?;
        inner.index.remove(&key_bytes);
        Ok(())
    }

    fn exists(&self, key: &K) -> Result<bool, Self::Error> {
        let key_bytes = Self::encode_key(key)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.index.contains_key(&key_bytes))
    }
}
