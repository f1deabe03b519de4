//! The index: every derived view of the chain, materialized as composite
//! keys in one ordered keyspace.
//!
//! | key | value |
//! |---|---|
//! | `latestBlockHeight` | tip height, decimal ASCII |
//! | `<height>` (decimal ASCII) | block record, main chain |
//! | `<block hash>` (64-char hex) | block record |
//! | `orphan_<block hash>` | orphan block record |
//! | `orphan_<height>` | orphan block record |
//! | `<tx hash>` | transaction record |
//! | `pk<tx hash><index>` | output script hex (outpoint → script) |
//! | `<script hex><tx hash><index>` | unspent output record |
//! | `tx<script hex><tx hash>` | tx hash (touched-tx history) |
//!
//! Height tokens are decimal ASCII. The `<index>` component of composite
//! outpoint keys is always 4-byte big-endian; keys whose length does not
//! match that encoding are ignored by scans. All records are JSON.

use super::*;

pub mod entry;
pub(crate) mod reorg;
#[cfg(test)]
pub(crate) mod testing;
pub mod updater;

const LATEST_BLOCK_HEIGHT_KEY: &str = "latestBlockHeight";
const ORPHAN_KEY: &str = "orphan";
const PK_KEY: &str = "pk";
const TOUCHED_TX_KEY: &str = "tx";
const REORG_MARKER_KEY: &str = "reorgInProgress";

/// Outpoints per `remove_utxos` worker.
const UTXO_REMOVAL_BATCH: usize = 100;

fn height_key(height: u64) -> Vec<u8> {
  height.to_string().into_bytes()
}

fn hash_key(hash: &str) -> Vec<u8> {
  hash.as_bytes().to_vec()
}

fn orphan_hash_key(hash: &str) -> Vec<u8> {
  format!("{ORPHAN_KEY}_{hash}").into_bytes()
}

fn orphan_height_key(height: u64) -> Vec<u8> {
  format!("{ORPHAN_KEY}_{height}").into_bytes()
}

fn pk_key(hash: &str, index: u32) -> Vec<u8> {
  let mut key = Vec::with_capacity(PK_KEY.len() + hash.len() + 4);
  key.extend_from_slice(PK_KEY.as_bytes());
  key.extend_from_slice(hash.as_bytes());
  key.extend_from_slice(&index.to_be_bytes());
  key
}

fn utxo_key(script: &str, hash: &str, index: u32) -> Vec<u8> {
  let mut key = Vec::with_capacity(script.len() + hash.len() + 4);
  key.extend_from_slice(script.as_bytes());
  key.extend_from_slice(hash.as_bytes());
  key.extend_from_slice(&index.to_be_bytes());
  key
}

fn touched_tx_key(script: &str, hash: &str) -> Vec<u8> {
  let mut key = Vec::with_capacity(TOUCHED_TX_KEY.len() + script.len() + hash.len());
  key.extend_from_slice(TOUCHED_TX_KEY.as_bytes());
  key.extend_from_slice(script.as_bytes());
  key.extend_from_slice(hash.as_bytes());
  key
}

pub struct Index {
  store: Arc<dyn KeyValueStore>,
  chain: Chain,
}

impl Index {
  pub fn open(settings: &Settings) -> Result<Self> {
    std::fs::create_dir_all(&settings.db_path).with_context(|| {
      format!(
        "failed to create index directory `{}`",
        settings.db_path.display()
      )
    })?;
    let store = RedbStore::open(settings.db_path.join("index.redb"))?;
    Ok(Self::new(Arc::new(store), settings.chain))
  }

  pub fn new(store: Arc<dyn KeyValueStore>, chain: Chain) -> Self {
    Self { store, chain }
  }

  pub fn chain(&self) -> Chain {
    self.chain
  }

  pub fn get_latest_block_height(&self) -> Result<Option<u64>> {
    let Some(value) = self.store.get(LATEST_BLOCK_HEIGHT_KEY.as_bytes())? else {
      return Ok(None);
    };
    Ok(Some(
      String::from_utf8(value)
        .ok()
        .and_then(|height| height.parse().ok())
        .context("corrupt tip marker")?,
    ))
  }

  pub fn set_latest_block_height(&self, height: u64) -> Result {
    Ok(
      self
        .store
        .put(LATEST_BLOCK_HEIGHT_KEY.as_bytes(), height.to_string().as_bytes())?,
    )
  }

  pub fn get_latest_tip_hash(&self) -> Result<Option<String>> {
    let Some(height) = self.get_latest_block_height()? else {
      return Ok(None);
    };
    Ok(self.get_block_by_height(height)?.map(|block| block.hash))
  }

  fn decode_block(&self, key: String, value: Vec<u8>) -> Result<BlockEntry> {
    Ok(serde_json::from_slice(&value).snafu_context(error::StoreCorruption { key })?)
  }

  pub fn get_block(&self, hash: &str) -> Result<Option<BlockEntry>> {
    match self.store.get(hash.as_bytes())? {
      Some(value) => Ok(Some(self.decode_block(hash.into(), value)?)),
      None => Ok(None),
    }
  }

  pub fn get_block_by_height(&self, height: u64) -> Result<Option<BlockEntry>> {
    match self.store.get(&height_key(height))? {
      Some(value) => Ok(Some(self.decode_block(height.to_string(), value)?)),
      None => Ok(None),
    }
  }

  pub fn block_exists(&self, hash: &str) -> Result<bool> {
    Ok(self.store.get(hash.as_bytes())?.is_some())
  }

  pub fn get_block_height(&self, hash: &str) -> Result<Option<u64>> {
    Ok(self.get_block(hash)?.map(|block| block.height))
  }

  pub fn get_orphan_block(&self, hash: &str) -> Result<Option<BlockEntry>> {
    match self.store.get(&orphan_hash_key(hash))? {
      Some(value) => Ok(Some(self.decode_block(format!("{ORPHAN_KEY}_{hash}"), value)?)),
      None => Ok(None),
    }
  }

  pub fn get_orphan_block_by_height(&self, height: u64) -> Result<Option<BlockEntry>> {
    match self.store.get(&orphan_height_key(height))? {
      Some(value) => Ok(Some(
        self.decode_block(format!("{ORPHAN_KEY}_{height}"), value)?,
      )),
      None => Ok(None),
    }
  }

  /// Resolves heights to stored main-chain blocks, skipping heights with no
  /// record. Input order is preserved.
  pub fn get_blocks(&self, heights: &[u64]) -> Result<Vec<BlockEntry>> {
    let keys: Vec<Vec<u8>> = heights.iter().map(|height| height_key(*height)).collect();
    let mut blocks = Vec::new();
    for (height, value) in heights.iter().zip(self.store.multi_get(&keys)?) {
      if let Some(value) = value {
        blocks.push(self.decode_block(height.to_string(), value)?);
      }
    }
    Ok(blocks)
  }

  /// Main-chain or orphan blocks in `[start, end]`, ascending, skipping
  /// heights with no record.
  pub fn get_blocks_range(&self, start: u64, end: u64, orphans: bool) -> Result<Vec<BlockEntry>> {
    let mut blocks = Vec::new();
    if start > end {
      return Ok(blocks);
    }
    for height in start..=end {
      let block = if orphans {
        self.get_orphan_block_by_height(height)?
      } else {
        self.get_block_by_height(height)?
      };
      if let Some(block) = block {
        blocks.push(block);
      }
    }
    Ok(blocks)
  }

  /// Writes the block under both its height and hash keys in one batch.
  pub fn put_block(&self, block: &BlockEntry) -> Result {
    let value = serde_json::to_vec(block)?;
    Ok(self.store.multi_put(&[
      (height_key(block.height), value.clone()),
      (hash_key(&block.hash), value),
    ])?)
  }

  pub fn put_orphan_block(&self, block: &BlockEntry) -> Result {
    let value = serde_json::to_vec(block)?;
    Ok(self.store.multi_put(&[
      (orphan_hash_key(&block.hash), value.clone()),
      (orphan_height_key(block.height), value),
    ])?)
  }

  /// Re-files a main-chain block on the orphan side: the record lands under
  /// both `orphan_` keys, the plain hash key is rewritten with the orphan
  /// flag set so hash lookups stay truthful, and the main height slot is
  /// vacated if this block still occupies it.
  pub(crate) fn mark_block_orphan(&self, block: &BlockEntry) -> Result {
    let value = serde_json::to_vec(block)?;
    self.store.multi_put(&[
      (orphan_hash_key(&block.hash), value.clone()),
      (orphan_height_key(block.height), value.clone()),
      (hash_key(&block.hash), value),
    ])?;

    if let Some(occupant) = self.get_block_by_height(block.height)? {
      if occupant.hash == block.hash {
        self.store.delete(&height_key(block.height))?;
      }
    }
    Ok(())
  }

  pub fn put_tx(&self, tx: &TxEntry) -> Result {
    Ok(self.store.put(tx.hash.as_bytes(), &serde_json::to_vec(tx)?)?)
  }

  pub fn put_txs(&self, txs: &[TxEntry]) -> Result {
    let mut entries = Vec::with_capacity(txs.len());
    for tx in txs {
      entries.push((hash_key(&tx.hash), serde_json::to_vec(tx)?));
    }
    Ok(self.store.multi_put(&entries)?)
  }

  pub fn get_tx(&self, hash: &str) -> Result<Option<TxEntry>> {
    match self.store.get(hash.as_bytes())? {
      Some(value) => Ok(Some(
        serde_json::from_slice(&value).snafu_context(error::StoreCorruption {
          key: hash.to_string(),
        })?,
      )),
      None => Ok(None),
    }
  }

  /// Loads transactions that must exist; a missing record is an error.
  pub fn get_txs(&self, hashes: &[String]) -> Result<Vec<TxEntry>> {
    let keys: Vec<Vec<u8>> = hashes.iter().map(|hash| hash_key(hash)).collect();
    hashes
      .iter()
      .zip(self.store.multi_get(&keys)?)
      .map(|(hash, value)| {
        let value = value.ok_or_else(|| anyhow!("transaction {hash} missing from index"))?;
        serde_json::from_slice(&value)
          .snafu_context(error::StoreCorruption { key: hash.clone() })
          .map_err(Error::from)
      })
      .collect()
  }

  pub fn get_block_txs(&self, block_hash: &str, is_orphan: bool) -> Result<Vec<TxEntry>> {
    let block = if is_orphan {
      self.get_orphan_block(block_hash)?
    } else {
      self.get_block(block_hash)?
    };
    let block = block.ok_or_else(|| anyhow!("block {block_hash} missing from index"))?;
    self.get_txs(&block.txs)
  }

  /// Inserts unspent outputs, writing all three keyspaces (UTXO record,
  /// outpoint → script reverse index, touched-tx history) in one batch.
  pub fn put_utxos(&self, utxos: &[Vout]) -> Result {
    let mut entries = Vec::with_capacity(utxos.len() * 3);
    for utxo in utxos {
      entries.push((
        utxo_key(&utxo.script_pub_key, &utxo.tx_id, utxo.index),
        serde_json::to_vec(utxo)?,
      ));
      entries.push((
        pk_key(&utxo.tx_id, utxo.index),
        utxo.script_pub_key.clone().into_bytes(),
      ));
      entries.push((
        touched_tx_key(&utxo.script_pub_key, &utxo.tx_id),
        utxo.tx_id.clone().into_bytes(),
      ));
    }
    Ok(self.store.multi_put(&entries)?)
  }

  /// Deletes the UTXO records for the given outpoints, recording for each
  /// the transaction that consumed it in the touched-tx history. Outpoints
  /// are resolved to scripts through the `pk` reverse index; outpoints with
  /// no entry there are skipped, which keeps replays after a crash or a
  /// partial reorg harmless. Work is split into batches executed on
  /// parallel threads; the first error wins.
  pub fn remove_utxos(&self, hashes: &[String], indices: &[u32], spenders: &[String]) -> Result {
    ensure!(
      hashes.len() == indices.len() && hashes.len() == spenders.len(),
      "outpoint and spender lists must have the same length",
    );
    if hashes.is_empty() {
      return Ok(());
    }

    thread::scope(|scope| {
      let mut workers = Vec::new();
      for start in (0..hashes.len()).step_by(UTXO_REMOVAL_BATCH) {
        let end = cmp::min(start + UTXO_REMOVAL_BATCH, hashes.len());
        workers.push(scope.spawn(move || {
          self.remove_utxo_batch(
            &hashes[start..end],
            &indices[start..end],
            &spenders[start..end],
          )
        }));
      }

      let mut result = Ok(());
      for worker in workers {
        let outcome = worker
          .join()
          .map_err(|_| anyhow!("UTXO removal worker panicked"))?;
        if result.is_ok() {
          result = outcome;
        }
      }
      result
    })
  }

  fn remove_utxo_batch(&self, hashes: &[String], indices: &[u32], spenders: &[String]) -> Result {
    let scripts = self.get_pk_scripts(hashes, indices)?;

    let mut deletes = Vec::new();
    let mut touched = Vec::new();
    for (i, script) in scripts.iter().enumerate() {
      let Some(script) = script else {
        log::warn!(
          "outpoint {}:{} has no script index entry, skipping removal",
          hashes[i],
          indices[i],
        );
        continue;
      };
      deletes.push(utxo_key(script, &hashes[i], indices[i]));
      touched.push((
        touched_tx_key(script, &spenders[i]),
        spenders[i].clone().into_bytes(),
      ));
    }

    self
      .store
      .multi_delete(&deletes)
      .context("failed to delete spent outputs")?;
    self
      .store
      .multi_put(&touched)
      .context("failed to record touched transactions")?;
    Ok(())
  }

  /// Resolves outpoints to their output scripts via the `pk` reverse index.
  pub(crate) fn get_pk_scripts(
    &self,
    hashes: &[String],
    indices: &[u32],
  ) -> Result<Vec<Option<String>>> {
    let keys: Vec<Vec<u8>> = hashes
      .iter()
      .zip(indices)
      .map(|(hash, index)| pk_key(hash, *index))
      .collect();
    self
      .store
      .multi_get(&keys)?
      .into_iter()
      .map(|value| {
        value
          .map(|bytes| String::from_utf8(bytes).context("corrupt script index entry"))
          .transpose()
      })
      .collect()
  }

  /// All unspent outputs paying to a script, by prefix scan.
  pub fn get_utxos(&self, script: &str) -> Result<Vec<Vout>> {
    let mut utxos = Vec::new();
    for (key, value) in self.store.scan_prefix(script.as_bytes())? {
      // longer scripts sharing this prefix also land in the scan
      if key.len() != script.len() + 64 + 4 {
        continue;
      }
      let utxo: Vout =
        serde_json::from_slice(&value).snafu_context(error::StoreCorruption {
          key: String::from_utf8_lossy(&key).into_owned(),
        })?;
      if utxo.script_pub_key != script {
        continue;
      }
      utxos.push(utxo);
    }
    Ok(utxos)
  }

  /// Every transaction that produced or consumed an output paying to the
  /// script. Hashes whose record is gone are skipped.
  pub fn get_txs_of_script(&self, script: &str) -> Result<Vec<TxEntry>> {
    let prefix = [TOUCHED_TX_KEY.as_bytes(), script.as_bytes()].concat();
    let mut hashes = Vec::new();
    for (key, value) in self.store.scan_prefix(&prefix)? {
      if key.len() != prefix.len() + 64 {
        continue;
      }
      hashes.push(String::from_utf8(value).context("corrupt touched-tx entry")?);
    }

    let keys: Vec<Vec<u8>> = hashes.iter().map(|hash| hash_key(hash)).collect();
    let mut txs = Vec::new();
    for (hash, value) in hashes.iter().zip(self.store.multi_get(&keys)?) {
      if let Some(value) = value {
        txs.push(
          serde_json::from_slice(&value)
            .snafu_context(error::StoreCorruption { key: hash.clone() })?,
        );
      }
    }
    Ok(txs)
  }

  /// Admin operation: deletes every main-chain record strictly above the
  /// named block and moves the tip back to it. Orphan records are untouched.
  pub fn remove_blocks_above(&self, hash: &str) -> Result<Option<u64>> {
    let Some(block) = self.get_block(hash)? else {
      return Ok(None);
    };
    let tip = self.get_latest_block_height()?.unwrap_or(0);

    let mut deletes = Vec::new();
    for height in block.height + 1..=tip {
      if let Some(removed) = self.get_block_by_height(height)? {
        deletes.push(hash_key(&removed.hash));
      }
      deletes.push(height_key(height));
    }
    self.store.multi_delete(&deletes)?;
    self.set_latest_block_height(block.height)?;
    Ok(Some(block.height))
  }

  pub(crate) fn get_reorg_marker(&self) -> Result<Option<reorg::ReorgMarker>> {
    match self.store.get(REORG_MARKER_KEY.as_bytes())? {
      Some(value) => Ok(Some(serde_json::from_slice(&value).snafu_context(
        error::StoreCorruption {
          key: REORG_MARKER_KEY.to_string(),
        },
      )?)),
      None => Ok(None),
    }
  }

  pub(crate) fn set_reorg_marker(&self, marker: &reorg::ReorgMarker) -> Result {
    Ok(
      self
        .store
        .put(REORG_MARKER_KEY.as_bytes(), &serde_json::to_vec(marker)?)?,
    )
  }

  pub(crate) fn clear_reorg_marker(&self) -> Result {
    Ok(self.store.delete(REORG_MARKER_KEY.as_bytes())?)
  }
}

#[cfg(test)]
mod tests {
  use {super::*, pretty_assertions::assert_eq};

  fn index() -> Index {
    Index::new(Arc::new(MemoryStore::new()), Chain::BitcoinRegtest)
  }

  fn block_entry(hash: &str, height: u64) -> BlockEntry {
    BlockEntry {
      hash: hash.into(),
      height,
      is_orphan: false,
      previous_block: ZERO_HASH.into(),
      version: 1,
      nonce: 0,
      timestamp: 0,
      bits: 0x207f_ffff,
      merkle_root: ZERO_HASH.into(),
      txs: Vec::new(),
    }
  }

  fn utxo(tx: u64, index: u32, script: &str, value: i64) -> Vout {
    Vout {
      tx_id: format!("{tx:064x}"),
      index,
      script_pub_key: script.into(),
      value,
      script_type: "pubkeyhash".into(),
    }
  }

  #[test]
  fn tip_round_trip() {
    let index = index();
    assert_eq!(index.get_latest_block_height().unwrap(), None);
    index.set_latest_block_height(41).unwrap();
    index.set_latest_block_height(42).unwrap();
    assert_eq!(index.get_latest_block_height().unwrap(), Some(42));
  }

  #[test]
  fn block_height_hash_duality() {
    let index = index();
    let block = block_entry(&format!("{:064x}", 0xb1), 7);
    index.put_block(&block).unwrap();

    let by_height = index.get_block_by_height(7).unwrap().unwrap();
    let by_hash = index.get_block(&by_height.hash).unwrap().unwrap();
    assert_eq!(by_hash.height, 7);
    assert_eq!(by_hash, by_height);
    assert!(index.block_exists(&block.hash).unwrap());
    assert_eq!(index.get_block_height(&block.hash).unwrap(), Some(7));
  }

  #[test]
  fn orphan_blocks_are_filed_separately() {
    let index = index();
    let mut block = block_entry(&format!("{:064x}", 0xabcd), 3);
    block.is_orphan = true;
    index.put_orphan_block(&block).unwrap();

    assert_eq!(index.get_block(&block.hash).unwrap(), None);
    assert_eq!(index.get_block_by_height(3).unwrap(), None);
    assert_eq!(index.get_orphan_block(&block.hash).unwrap(), Some(block.clone()));
    assert_eq!(index.get_orphan_block_by_height(3).unwrap(), Some(block));
  }

  #[test]
  fn get_blocks_skips_missing_heights() {
    let index = index();
    index.put_block(&block_entry(&format!("{:064x}", 1), 1)).unwrap();
    index.put_block(&block_entry(&format!("{:064x}", 3), 3)).unwrap();

    let blocks = index.get_blocks(&[3, 2, 1]).unwrap();
    assert_eq!(
      blocks.iter().map(|block| block.height).collect::<Vec<u64>>(),
      vec![3, 1],
    );

    let range = index.get_blocks_range(1, 3, false).unwrap();
    assert_eq!(
      range.iter().map(|block| block.height).collect::<Vec<u64>>(),
      vec![1, 3],
    );
  }

  #[test]
  fn utxo_life_cycle() {
    let index = index();
    let script = "76a914000000000000000000000000000000000000000088ac";
    let produced = utxo(0xaa, 0, script, 50);
    index.put_utxos(std::slice::from_ref(&produced)).unwrap();

    assert_eq!(index.get_utxos(script).unwrap(), vec![produced.clone()]);
    assert_eq!(
      index
        .get_pk_scripts(&[produced.tx_id.clone()], &[0])
        .unwrap(),
      vec![Some(script.to_string())],
    );

    let spender = format!("{:064x}", 0xbb);
    index
      .remove_utxos(&[produced.tx_id.clone()], &[0], std::slice::from_ref(&spender))
      .unwrap();
    assert_eq!(index.get_utxos(script).unwrap(), Vec::new());

    // removing an unknown outpoint is a no-op
    index
      .remove_utxos(&[produced.tx_id], &[9], &[spender])
      .unwrap();
  }

  #[test]
  fn outpoint_index_component_is_big_endian() {
    let index = index();
    let script = "51";
    // indices ≥ 128 overflowed the legacy single-byte encoding
    let produced = utxo(0xcc, 513, script, 1);
    index.put_utxos(std::slice::from_ref(&produced)).unwrap();

    let utxos = index.get_utxos(script).unwrap();
    assert_eq!(utxos, vec![produced.clone()]);

    index
      .remove_utxos(
        &[produced.tx_id.clone()],
        &[513],
        &[format!("{:064x}", 0xdd)],
      )
      .unwrap();
    assert_eq!(index.get_utxos(script).unwrap(), Vec::new());
  }

  #[test]
  fn utxo_scan_ignores_longer_script_prefix_matches() {
    let index = index();
    index.put_utxos(&[utxo(0x01, 0, "6a", 1), utxo(0x02, 0, "6a6a", 2)]).unwrap();

    assert_eq!(index.get_utxos("6a").unwrap(), vec![utxo(0x01, 0, "6a", 1)]);
    assert_eq!(
      index.get_utxos("6a6a").unwrap(),
      vec![utxo(0x02, 0, "6a6a", 2)],
    );
  }

  #[test]
  fn touched_tx_history_names_producer_and_spender() {
    let index = index();
    let script = "6a";
    let produced = utxo(0x0a, 0, script, 5);
    let producer = produced.tx_id.clone();
    let spender = format!("{:064x}", 0x0b);

    index
      .put_txs(&[
        TxEntry {
          hash: producer.clone(),
          version: 1,
          lock_time: 0,
          block_hash: String::new(),
          vins: Vec::new(),
          vouts: vec![produced.clone()],
        },
        TxEntry {
          hash: spender.clone(),
          version: 1,
          lock_time: 0,
          block_hash: String::new(),
          vins: Vec::new(),
          vouts: Vec::new(),
        },
      ])
      .unwrap();
    index.put_utxos(&[produced]).unwrap();
    index
      .remove_utxos(&[producer.clone()], &[0], std::slice::from_ref(&spender))
      .unwrap();

    let mut touched: Vec<String> = index
      .get_txs_of_script(script)
      .unwrap()
      .into_iter()
      .map(|tx| tx.hash)
      .collect();
    touched.sort();
    let mut expected = vec![producer, spender];
    expected.sort();
    assert_eq!(touched, expected);
  }

  #[test]
  fn utxo_removal_splits_into_batches() {
    let index = index();
    let script = "6a";
    let utxos: Vec<Vout> = (0..250).map(|i| utxo(i, 0, script, 1)).collect();
    index.put_utxos(&utxos).unwrap();
    assert_eq!(index.get_utxos(script).unwrap().len(), 250);

    let hashes: Vec<String> = utxos.iter().map(|utxo| utxo.tx_id.clone()).collect();
    let indices = vec![0; 250];
    let spenders: Vec<String> = (0..250).map(|i| format!("{:064x}", 0x1000 + i)).collect();
    index.remove_utxos(&hashes, &indices, &spenders).unwrap();

    assert_eq!(index.get_utxos(script).unwrap(), Vec::new());
  }

  #[test]
  fn mark_block_orphan_vacates_height_slot() {
    let index = index();
    let mut block = block_entry(&format!("{:064x}", 0xee), 5);
    index.put_block(&block).unwrap();

    block.is_orphan = true;
    index.mark_block_orphan(&block).unwrap();

    assert_eq!(index.get_block_by_height(5).unwrap(), None);
    assert_eq!(index.get_orphan_block_by_height(5).unwrap(), Some(block.clone()));
    // hash lookups keep working and report the new side
    assert!(index.get_block(&block.hash).unwrap().unwrap().is_orphan);
  }

  #[test]
  fn remove_blocks_above_resets_tip() {
    let index = index();
    for height in 0..=4 {
      index
        .put_block(&block_entry(&format!("{height:064x}"), height))
        .unwrap();
    }
    index.set_latest_block_height(4).unwrap();

    let kept = index.remove_blocks_above(&format!("{:064x}", 2u64)).unwrap();
    assert_eq!(kept, Some(2));
    assert_eq!(index.get_latest_block_height().unwrap(), Some(2));
    assert_eq!(index.get_block_by_height(3).unwrap(), None);
    assert_eq!(index.get_block(&format!("{:064x}", 3u64)).unwrap(), None);
    assert!(index.get_block_by_height(2).unwrap().is_some());

    assert_eq!(index.remove_blocks_above("ff").unwrap(), None);
  }

  #[test]
  fn reorg_marker_round_trip() {
    let index = index();
    assert!(index.get_reorg_marker().unwrap().is_none());

    let marker = reorg::ReorgMarker {
      ancestor_height: 2,
      ancestor_hash: format!("{:064x}", 2u64),
      orphan_tip_hash: format!("{:064x}", 0xbeefu64),
      orphan_tip_height: 4,
    };
    index.set_reorg_marker(&marker).unwrap();
    assert_eq!(index.get_reorg_marker().unwrap(), Some(marker));

    index.clear_reorg_marker().unwrap();
    assert!(index.get_reorg_marker().unwrap().is_none());
  }
}
