//! Chain reorganization: switching the main chain onto a side chain that
//! shares a common ancestor with it.
//!
//! A `reorgInProgress` marker naming the ancestor and the side-chain tip is
//! persisted before the first mutation and cleared after the tip moves, so
//! that a process dying mid-switch can replay the procedure on restart.
//! Every step tolerates replay: removals skip outpoints that are already
//! gone, inserts overwrite, and main-chain blocks that already moved to the
//! orphan side are no longer found in the height range.

use super::*;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct ReorgMarker {
  pub(crate) ancestor_height: u64,
  pub(crate) ancestor_hash: String,
  pub(crate) orphan_tip_hash: String,
  pub(crate) orphan_tip_height: u64,
}

/// Makes the side chain ending at `orphan_tip` the main chain. Main-chain
/// blocks above the ancestor are undone newest-first, side-chain blocks are
/// re-applied oldest-first, and the tip moves to the side-chain tip.
/// Returns the new tip height.
pub(crate) fn reorganize(
  index: &Index,
  ancestor: &BlockEntry,
  orphan_tip: &BlockEntry,
  latest: u64,
) -> Result<u64> {
  let target = collect_side_chain(index, orphan_tip, ancestor)?;

  index.set_reorg_marker(&ReorgMarker {
    ancestor_height: ancestor.height,
    ancestor_hash: ancestor.hash.clone(),
    orphan_tip_hash: orphan_tip.hash.clone(),
    orphan_tip_height: orphan_tip.height,
  })?;

  let target_hashes: HashSet<&str> = target.iter().map(|block| block.hash.as_str()).collect();
  let mut mains = index.get_blocks_range(ancestor.height + 1, latest, false)?;
  // blocks already on the target chain stay put (only relevant on replay)
  mains.retain(|block| !block.is_orphan && !target_hashes.contains(block.hash.as_str()));

  for block in mains.iter().rev() {
    orphan_block(index, block)?;
  }
  for block in &target {
    unorphan_block(index, block)?;
  }

  index.set_latest_block_height(orphan_tip.height)?;
  index.clear_reorg_marker()?;

  log::info!(
    "reorganized: new tip {} at height {}, {} blocks orphaned",
    orphan_tip.hash,
    orphan_tip.height,
    mains.len(),
  );
  Ok(orphan_tip.height)
}

/// Walks parent links back from the side-chain tip to the common ancestor,
/// returning the side chain oldest-first. Orphan records survive promotion
/// to the main chain, so this walk also works while replaying a partially
/// applied reorganization.
fn collect_side_chain(
  index: &Index,
  tip: &BlockEntry,
  ancestor: &BlockEntry,
) -> Result<Vec<BlockEntry>> {
  let mut chain = vec![tip.clone()];
  let mut current = tip.clone();
  while current.height > ancestor.height + 1 {
    let previous = index
      .get_orphan_block(&current.previous_block)?
      .ok_or_else(|| {
        anyhow!(
          "side chain broken at {}: parent {} not stored",
          current.hash,
          current.previous_block,
        )
      })?;
    chain.push(previous.clone());
    current = previous;
  }
  ensure!(
    current.previous_block == ancestor.hash,
    "side chain root {} does not attach to ancestor {}",
    current.hash,
    ancestor.hash,
  );
  chain.reverse();
  Ok(chain)
}

/// Undoes a main-chain block and files it as an orphan: the outpoints its
/// inputs consumed become unspent again, the outputs it created are
/// removed.
fn orphan_block(index: &Index, block: &BlockEntry) -> Result {
  let txs = index.get_block_txs(&block.hash, false)?;

  let mut restored = Vec::new();
  for tx in &txs {
    for vin in &tx.vins {
      if vin.previous_tx == ZERO_HASH {
        continue;
      }
      let previous = index.get_tx(&vin.previous_tx)?.ok_or_else(|| {
        anyhow!(
          "cannot undo {}: spent transaction {} missing",
          block.hash,
          vin.previous_tx,
        )
      })?;
      let vout = previous
        .vouts
        .get(vin.previous_index as usize)
        .ok_or_else(|| {
          anyhow!(
            "cannot undo {}: outpoint {}:{} out of range",
            block.hash,
            vin.previous_tx,
            vin.previous_index,
          )
        })?;
      restored.push(vout.clone());
    }
  }
  index.put_utxos(&restored)?;

  let mut hashes = Vec::new();
  let mut indices = Vec::new();
  let mut producers = Vec::new();
  for tx in &txs {
    for vout in &tx.vouts {
      hashes.push(vout.tx_id.clone());
      indices.push(vout.index);
      producers.push(vout.tx_id.clone());
    }
  }
  index.remove_utxos(&hashes, &indices, &producers)?;

  let mut block = block.clone();
  block.is_orphan = true;
  index.mark_block_orphan(&block)
}

/// Promotes a side-chain block onto the main chain, re-applying it: outputs
/// added, inputs consumed.
fn unorphan_block(index: &Index, block: &BlockEntry) -> Result {
  let txs = index.get_block_txs(&block.hash, true)?;

  let mut vouts = Vec::new();
  for tx in &txs {
    vouts.extend(tx.vouts.iter().cloned());
  }
  index.put_utxos(&vouts)?;

  let mut hashes = Vec::new();
  let mut indices = Vec::new();
  let mut spenders = Vec::new();
  for tx in &txs {
    for vin in &tx.vins {
      if vin.previous_tx == ZERO_HASH {
        continue;
      }
      hashes.push(vin.previous_tx.clone());
      indices.push(vin.previous_index);
      spenders.push(tx.hash.clone());
    }
  }
  index.remove_utxos(&hashes, &indices, &spenders)?;

  let mut block = block.clone();
  block.is_orphan = false;
  index.put_block(&block)
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    crate::index::{testing, updater::Updater},
    pretty_assertions::assert_eq,
  };

  struct Forks {
    updater: Updater,
    index: Arc<Index>,
    a: Vec<Block>,
    b: Vec<Block>,
  }

  /// Two chains on top of regtest genesis: A₁..A₃ (main) and B₃..B₄ forking
  /// off A₂. B₃ double-spends the output A₃ spends.
  fn forks() -> Forks {
    let (mut updater, index) = testing::memory_updater();
    updater.ensure_genesis().unwrap();

    let genesis = Chain::BitcoinRegtest.genesis_block().block_hash();
    let a1 = testing::block(
      genesis,
      1,
      vec![testing::coinbase_tx(1, 50, &testing::script(1))],
    );
    let shared = a1.txdata[0].compute_txid();
    let a2 = testing::block(
      a1.block_hash(),
      2,
      vec![testing::coinbase_tx(2, 50, &testing::script(2))],
    );
    let a3 = testing::block(
      a2.block_hash(),
      3,
      vec![
        testing::coinbase_tx(3, 50, &testing::script(3)),
        testing::spend_tx((shared, 0), 49, &testing::script(13)),
      ],
    );
    let b3 = testing::block(
      a2.block_hash(),
      33,
      vec![
        testing::coinbase_tx(33, 50, &testing::script(4)),
        testing::spend_tx((shared, 0), 48, &testing::script(14)),
      ],
    );
    let b4 = testing::block(
      b3.block_hash(),
      34,
      vec![testing::coinbase_tx(34, 50, &testing::script(5))],
    );

    Forks {
      updater,
      index,
      a: vec![a1, a2, a3],
      b: vec![b3, b4],
    }
  }

  fn utxo_state(index: &Index, scripts: &[u8]) -> Vec<(String, Vec<Vout>)> {
    scripts
      .iter()
      .map(|n| {
        let script = hex::encode(testing::script(*n).as_bytes());
        let mut utxos = index.get_utxos(&script).unwrap();
        utxos.sort_by(|a, b| (&a.tx_id, a.index).cmp(&(&b.tx_id, b.index)));
        (script, utxos)
      })
      .collect()
  }

  const SCRIPTS: [u8; 7] = [1, 2, 3, 4, 5, 13, 14];

  #[test]
  fn overtaking_side_chain_triggers_reorganization() {
    let mut forks = forks();
    for block in forks.a.clone() {
      forks.updater.apply_block(&block).unwrap();
    }
    forks.updater.apply_block(&forks.b[0]).unwrap();
    assert_eq!(forks.index.get_latest_block_height().unwrap(), Some(3));

    // B₄ extends the side chain past the main tip
    forks.updater.apply_block(&forks.b[1]).unwrap();

    let index = &forks.index;
    assert_eq!(index.get_latest_block_height().unwrap(), Some(4));
    assert_eq!(
      index.get_block_by_height(4).unwrap().unwrap().hash,
      forks.b[1].block_hash().to_string(),
    );
    assert_eq!(
      index.get_block_by_height(3).unwrap().unwrap().hash,
      forks.b[0].block_hash().to_string(),
    );

    let a3_hash = forks.a[2].block_hash().to_string();
    assert!(index.get_orphan_block(&a3_hash).unwrap().is_some());
    assert!(index.get_block(&a3_hash).unwrap().unwrap().is_orphan);

    // UTXOs created in A₃ are gone, B-chain UTXOs exist
    let live: Vec<usize> = SCRIPTS
      .iter()
      .map(|n| {
        index
          .get_utxos(&hex::encode(testing::script(*n).as_bytes()))
          .unwrap()
          .len()
      })
      .collect();
    //         scripts:  1  2  3  4  5  13 14
    assert_eq!(live, vec![0, 1, 0, 1, 1, 0, 1]);
    assert!(index.get_reorg_marker().unwrap().is_none());
  }

  #[test]
  fn reorganized_state_matches_direct_application() {
    // chain A then reorganize to chain B
    let mut reorged = forks();
    for block in reorged.a.clone() {
      reorged.updater.apply_block(&block).unwrap();
    }
    for block in reorged.b.clone() {
      reorged.updater.apply_block(&block).unwrap();
    }

    // chain B applied directly from the common ancestor
    let mut direct = forks();
    for block in [&direct.a[0], &direct.a[1]] {
      let block = block.clone();
      direct.updater.apply_block(&block).unwrap();
    }
    for block in direct.b.clone() {
      direct.updater.apply_block(&block).unwrap();
    }

    assert_eq!(
      reorged.index.get_latest_block_height().unwrap(),
      direct.index.get_latest_block_height().unwrap(),
    );
    for height in 0..=4 {
      assert_eq!(
        reorged
          .index
          .get_block_by_height(height)
          .unwrap()
          .map(|block| block.hash),
        direct
          .index
          .get_block_by_height(height)
          .unwrap()
          .map(|block| block.hash),
      );
    }
    assert_eq!(
      utxo_state(&reorged.index, &SCRIPTS),
      utxo_state(&direct.index, &SCRIPTS),
    );
  }

  #[test]
  fn interrupted_reorganization_replays_from_marker() {
    let mut forks = forks();
    for block in forks.a.clone() {
      forks.updater.apply_block(&block).unwrap();
    }
    forks.updater.apply_block(&forks.b[0]).unwrap();

    let index = &forks.index;
    let ancestor = index
      .get_block(&forks.a[1].block_hash().to_string())
      .unwrap()
      .unwrap();
    let orphan_tip = index
      .get_orphan_block(&forks.b[0].block_hash().to_string())
      .unwrap()
      .unwrap();

    // crash after the marker and the first undo, before the switch finished
    index
      .set_reorg_marker(&ReorgMarker {
        ancestor_height: ancestor.height,
        ancestor_hash: ancestor.hash.clone(),
        orphan_tip_hash: orphan_tip.hash.clone(),
        orphan_tip_height: orphan_tip.height,
      })
      .unwrap();
    let a3 = index
      .get_block(&forks.a[2].block_hash().to_string())
      .unwrap()
      .unwrap();
    orphan_block(index, &a3).unwrap();

    forks.updater.recover_interrupted_reorg().unwrap();

    assert!(index.get_reorg_marker().unwrap().is_none());
    assert_eq!(index.get_latest_block_height().unwrap(), Some(3));
    assert_eq!(
      index.get_block_by_height(3).unwrap().unwrap().hash,
      forks.b[0].block_hash().to_string(),
    );

    // B₄ then extends the recovered chain normally
    forks.updater.apply_block(&forks.b[1].clone()).unwrap();
    assert_eq!(forks.index.get_latest_block_height().unwrap(), Some(4));
  }

  #[test]
  fn replaying_a_finished_reorganization_is_idempotent() {
    let mut forks = forks();
    for block in forks.a.clone() {
      forks.updater.apply_block(&block).unwrap();
    }
    forks.updater.apply_block(&forks.b[0].clone()).unwrap();

    let index = &forks.index;
    let ancestor = index
      .get_block(&forks.a[1].block_hash().to_string())
      .unwrap()
      .unwrap();
    let orphan_tip = index
      .get_orphan_block(&forks.b[0].block_hash().to_string())
      .unwrap()
      .unwrap();
    reorganize(index, &ancestor, &orphan_tip, 3).unwrap();

    let before = utxo_state(index, &SCRIPTS);

    // the process died between moving the tip and clearing the marker;
    // replaying the finished switch must not disturb the final state
    index
      .set_reorg_marker(&ReorgMarker {
        ancestor_height: ancestor.height,
        ancestor_hash: ancestor.hash.clone(),
        orphan_tip_hash: orphan_tip.hash.clone(),
        orphan_tip_height: orphan_tip.height,
      })
      .unwrap();
    forks.updater.recover_interrupted_reorg().unwrap();

    assert!(forks.index.get_reorg_marker().unwrap().is_none());
    assert_eq!(forks.index.get_latest_block_height().unwrap(), Some(3));
    assert_eq!(
      forks
        .index
        .get_block_by_height(3)
        .unwrap()
        .unwrap()
        .hash,
      forks.b[0].block_hash().to_string(),
    );
    assert_eq!(utxo_state(&forks.index, &SCRIPTS), before);

    // the side-chain extension then applies normally
    forks.updater.apply_block(&forks.b[1].clone()).unwrap();
    assert_eq!(forks.index.get_latest_block_height().unwrap(), Some(4));
  }
}
