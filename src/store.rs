//! Persistent ordered key-value storage behind the index.
//!
//! Everything the index persists goes through [`KeyValueStore`], an ordered
//! map with point lookups, batched writes, and prefix scans. Lookups of
//! absent keys are not errors: they return `None`, and `multi_get` reports
//! per-key presence in input order. Batched writes (`multi_put`,
//! `multi_delete`) are atomic per call on engines that support it; callers
//! must not assume atomicity across calls.

use {
  super::*,
  redb::{Database, ReadableTable, TableDefinition},
  snafu::Snafu,
  std::collections::BTreeMap,
};

const INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("index");

#[derive(Debug, Snafu)]
#[snafu(display("key-value store error: {message}"))]
pub struct StoreError {
  message: String,
}

impl StoreError {
  fn from_engine(err: impl Display) -> Self {
    Self {
      message: err.to_string(),
    }
  }
}

pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

  fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, StoreError>;

  fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

  fn multi_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError>;

  fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

  fn multi_delete(&self, keys: &[Vec<u8>]) -> Result<(), StoreError>;

  /// Returns every `(key, value)` pair whose key starts with `prefix`, in
  /// key order.
  fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

  fn close(&self) -> Result<(), StoreError>;
}

pub struct RedbStore {
  database: Database,
}

impl RedbStore {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let database = Database::create(path).map_err(StoreError::from_engine)?;

    let wtx = database.begin_write().map_err(StoreError::from_engine)?;
    wtx.open_table(INDEX).map_err(StoreError::from_engine)?;
    wtx.commit().map_err(StoreError::from_engine)?;

    Ok(Self { database })
  }
}

impl KeyValueStore for RedbStore {
  fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
    let rtx = self
      .database
      .begin_read()
      .map_err(StoreError::from_engine)?;
    let table = rtx.open_table(INDEX).map_err(StoreError::from_engine)?;
    Ok(
      table
        .get(key)
        .map_err(StoreError::from_engine)?
        .map(|guard| guard.value().to_vec()),
    )
  }

  fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
    let rtx = self
      .database
      .begin_read()
      .map_err(StoreError::from_engine)?;
    let table = rtx.open_table(INDEX).map_err(StoreError::from_engine)?;
    keys
      .iter()
      .map(|key| {
        Ok(
          table
            .get(key.as_slice())
            .map_err(StoreError::from_engine)?
            .map(|guard| guard.value().to_vec()),
        )
      })
      .collect()
  }

  fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
    self.multi_put(std::slice::from_ref(&(key.to_vec(), value.to_vec())))
  }

  fn multi_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
    let wtx = self
      .database
      .begin_write()
      .map_err(StoreError::from_engine)?;
    {
      let mut table = wtx.open_table(INDEX).map_err(StoreError::from_engine)?;
      for (key, value) in entries {
        table
          .insert(key.as_slice(), value.as_slice())
          .map_err(StoreError::from_engine)?;
      }
    }
    wtx.commit().map_err(StoreError::from_engine)
  }

  fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
    self.multi_delete(std::slice::from_ref(&key.to_vec()))
  }

  fn multi_delete(&self, keys: &[Vec<u8>]) -> Result<(), StoreError> {
    let wtx = self
      .database
      .begin_write()
      .map_err(StoreError::from_engine)?;
    {
      let mut table = wtx.open_table(INDEX).map_err(StoreError::from_engine)?;
      for key in keys {
        table
          .remove(key.as_slice())
          .map_err(StoreError::from_engine)?;
      }
    }
    wtx.commit().map_err(StoreError::from_engine)
  }

  fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
    let rtx = self
      .database
      .begin_read()
      .map_err(StoreError::from_engine)?;
    let table = rtx.open_table(INDEX).map_err(StoreError::from_engine)?;
    let mut entries = Vec::new();
    for entry in table.range(prefix..).map_err(StoreError::from_engine)? {
      let (key, value) = entry.map_err(StoreError::from_engine)?;
      if !key.value().starts_with(prefix) {
        break;
      }
      entries.push((key.value().to_vec(), value.value().to_vec()));
    }
    Ok(entries)
  }

  fn close(&self) -> Result<(), StoreError> {
    Ok(())
  }
}

/// In-memory store used by tests.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
    Ok(self.entries.lock().unwrap().get(key).cloned())
  }

  fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
    let entries = self.entries.lock().unwrap();
    Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
  }

  fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
    self
      .entries
      .lock()
      .unwrap()
      .insert(key.to_vec(), value.to_vec());
    Ok(())
  }

  fn multi_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
    let mut map = self.entries.lock().unwrap();
    for (key, value) in entries {
      map.insert(key.clone(), value.clone());
    }
    Ok(())
  }

  fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
    self.entries.lock().unwrap().remove(key);
    Ok(())
  }

  fn multi_delete(&self, keys: &[Vec<u8>]) -> Result<(), StoreError> {
    let mut map = self.entries.lock().unwrap();
    for key in keys {
      map.remove(key);
    }
    Ok(())
  }

  fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
    Ok(
      self
        .entries
        .lock()
        .unwrap()
        .range(prefix.to_vec()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect(),
    )
  }

  fn close(&self) -> Result<(), StoreError> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(store: &dyn KeyValueStore) {
    assert_eq!(store.get(b"missing").unwrap(), None);

    store.put(b"a", b"1").unwrap();
    store.put(b"a", b"2").unwrap();
    assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));

    store
      .multi_put(&[
        (b"pkx".to_vec(), b"x".to_vec()),
        (b"pky".to_vec(), b"y".to_vec()),
        (b"q".to_vec(), b"z".to_vec()),
      ])
      .unwrap();

    assert_eq!(
      store
        .multi_get(&[b"pky".to_vec(), b"missing".to_vec(), b"pkx".to_vec()])
        .unwrap(),
      vec![Some(b"y".to_vec()), None, Some(b"x".to_vec())],
    );

    assert_eq!(
      store.scan_prefix(b"pk").unwrap(),
      vec![
        (b"pkx".to_vec(), b"x".to_vec()),
        (b"pky".to_vec(), b"y".to_vec()),
      ],
    );

    store.delete(b"pkx").unwrap();
    store.multi_delete(&[b"pky".to_vec(), b"missing".to_vec()]).unwrap();
    assert_eq!(store.scan_prefix(b"pk").unwrap(), Vec::new());
    assert_eq!(store.get(b"q").unwrap(), Some(b"z".to_vec()));

    store.close().unwrap();
  }

  #[test]
  fn memory_store() {
    exercise(&MemoryStore::new());
  }

  #[test]
  fn redb_store() {
    let dir = tempfile::TempDir::new().unwrap();
    exercise(&RedbStore::open(dir.path().join("index.redb")).unwrap());
  }

  #[test]
  fn redb_store_persists() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("index.redb");

    {
      let store = RedbStore::open(&path).unwrap();
      store.put(b"tip", b"7").unwrap();
    }

    let store = RedbStore::open(&path).unwrap();
    assert_eq!(store.get(b"tip").unwrap(), Some(b"7".to_vec()));
  }
}
