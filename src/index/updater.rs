//! Keeps the index converging on the peer's tip.
//!
//! Three long-lived flows cooperate: the peer's reader thread dispatches
//! typed messages, this updater applies them one at a time, and the fetch
//! loop paces `getblocks` requests by counting one `block_processed` signal
//! per applied (or intentionally skipped) block. The updater is the sole
//! writer of the tip.

use {
  super::*,
  crate::{
    mempool::Mempool,
    peer::{Peer, PeerMessage},
  },
  indicatif::{ProgressBar, ProgressStyle},
  log::log_enabled,
  std::sync::mpsc,
};

/// Capacity of the `block_processed` channel. A `getblocks` round yields at
/// most 500 blocks plus a possible freshly-mined one, so the applier never
/// blocks on a live fetch loop; once caught up, signals nobody consumes are
/// dropped.
const BLOCK_PROCESSED_BUFFER: usize = 512;

/// How the applier reports tip movement back to the peer session without
/// depending on it.
pub(crate) trait TipObserver: Send + Sync {
  fn last_block(&self) -> u64;
  fn update_last_block_height(&self, height: u64);
}

/// Stands in for the peer before a session is up.
#[derive(Default)]
struct UnconnectedTip(AtomicU64);

impl TipObserver for UnconnectedTip {
  fn last_block(&self) -> u64 {
    self.0.load(Ordering::SeqCst)
  }

  fn update_last_block_height(&self, height: u64) {
    self.0.fetch_max(height, Ordering::SeqCst);
  }
}

pub struct Updater {
  index: Arc<Index>,
  settings: Settings,
  chain: Chain,
  tip: Arc<dyn TipObserver>,
  block_processed: SyncSender<()>,
  block_processed_rx: Arc<Mutex<Receiver<()>>>,
  latest_height: Arc<AtomicU64>,
  synced: Arc<AtomicBool>,
  mempool_synced: Arc<AtomicBool>,
  mempool: Mempool,
}

impl Updater {
  pub fn new(index: Arc<Index>, settings: Settings) -> Result<Self> {
    let latest = index.get_latest_block_height()?.unwrap_or(0);
    let (block_processed, block_processed_rx) = mpsc::sync_channel(BLOCK_PROCESSED_BUFFER);
    Ok(Self {
      chain: settings.chain,
      mempool: Mempool::new(index.clone()),
      index,
      settings,
      tip: Arc::new(UnconnectedTip::default()),
      block_processed,
      block_processed_rx: Arc::new(Mutex::new(block_processed_rx)),
      latest_height: Arc::new(AtomicU64::new(latest)),
      synced: Arc::new(AtomicBool::new(false)),
      mempool_synced: Arc::new(AtomicBool::new(false)),
    })
  }

  pub(crate) fn latest_height(&self) -> u64 {
    self.latest_height.load(Ordering::SeqCst)
  }

  /// Drives the sync loop until an unrecoverable error: connect, fetch,
  /// apply, reconnect on disconnect.
  pub fn run(&mut self) -> Result {
    self.ensure_genesis()?;
    self.recover_interrupted_reorg()?;

    let mut peer = self.connect_with_backoff();
    loop {
      self.tip = peer.clone();
      let (messages, reader) = peer.on_msg()?;

      let fetch = {
        let index = self.index.clone();
        let peer = peer.clone();
        let latest_height = self.latest_height.clone();
        let synced = self.synced.clone();
        let block_processed_rx = self.block_processed_rx.clone();
        thread::spawn(move || {
          fetch_blocks(&index, &peer, &latest_height, &synced, &block_processed_rx)
        })
      };

      let mut progress_bar = self.progress_bar(&peer);

      for message in messages {
        self.maybe_sync_mempool();
        match message {
          PeerMessage::Block(block) => {
            let hash = block.block_hash();
            match self.apply_block(&block) {
              Ok(()) => {
                if let Some(progress_bar) = &mut progress_bar {
                  progress_bar.set_position(self.latest_height());
                  if progress_bar.position() > progress_bar.length().unwrap_or(0) {
                    progress_bar.set_length(peer.last_block());
                  }
                }
              }
              Err(err)
                if matches!(
                  err.downcast_ref::<SnafuError>(),
                  Some(SnafuError::ApplyConflict { .. })
                ) =>
              {
                log::warn!("skipping block {hash}: {err}");
              }
              Err(err) => return Err(err),
            }
            let _ = self.block_processed.try_send(());
          }
          PeerMessage::Tx(tx) => {
            if let Err(err) = self.put_mempool_tx(&tx) {
              log::error!(
                "failed to import mempool transaction {}: {err}",
                tx.compute_txid(),
              );
            }
          }
        }
      }

      peer.wait_for_disconnect();
      let _ = fetch.join();
      let _ = reader.join();
      if let Some(progress_bar) = progress_bar {
        progress_bar.finish_and_clear();
      }

      log::warn!("peer disconnected, reconnecting");
      let mut delay = 1;
      peer = loop {
        match peer.reconnect() {
          Ok(fresh) => break fresh,
          Err(err) => {
            log::error!("error reconnecting peer: {err}; retrying in {delay}s");
            thread::sleep(Duration::from_secs(delay));
            delay = cmp::min(delay * 2, 60);
          }
        }
      };
    }
  }

  fn progress_bar(&self, peer: &Peer) -> Option<ProgressBar> {
    if cfg!(test) || log_enabled!(log::Level::Info) || peer.last_block() <= self.latest_height() {
      None
    } else {
      let progress_bar = ProgressBar::new(peer.last_block());
      progress_bar.set_position(self.latest_height());
      progress_bar.set_style(
        ProgressStyle::with_template("[indexing blocks] {wide_bar} {pos}/{len}").unwrap(),
      );
      Some(progress_bar)
    }
  }

  fn connect_with_backoff(&self) -> Arc<Peer> {
    let mut delay = 1;
    loop {
      match Peer::connect(&self.settings.peer_url, self.chain) {
        Ok(peer) => return peer,
        Err(err) => {
          log::error!(
            "cannot connect to {}: {err}; retrying in {delay}s",
            self.settings.peer_url,
          );
          thread::sleep(Duration::from_secs(delay));
          delay = cmp::min(delay * 2, 60);
        }
      }
    }
  }

  /// Seeds the index with the configured genesis block and its sentinel
  /// transaction if they are not present yet.
  pub fn ensure_genesis(&mut self) -> Result {
    let genesis = self.chain.genesis_block();
    let hash = genesis.block_hash().to_string();
    if self.index.get_block(&hash)?.is_some() {
      return Ok(());
    }

    self.index.put_block(&BlockEntry {
      hash: hash.clone(),
      height: 0,
      is_orphan: false,
      previous_block: genesis.header.prev_blockhash.to_string(),
      version: genesis.header.version.to_consensus(),
      nonce: genesis.header.nonce,
      timestamp: genesis.header.time,
      bits: genesis.header.bits.to_consensus(),
      merkle_root: genesis.header.merkle_root.to_string(),
      txs: vec![ZERO_HASH.into()],
    })?;
    self.index.put_tx(&TxEntry::sentinel())?;
    self.index.set_latest_block_height(0)?;
    self.latest_height.store(0, Ordering::SeqCst);
    log::info!("seeded genesis block {hash}");
    Ok(())
  }

  /// Finishes a reorganization the previous process died in the middle of.
  /// Every step of the procedure is idempotent, so replaying it from the
  /// persisted marker converges on the same final state.
  pub(crate) fn recover_interrupted_reorg(&mut self) -> Result {
    let Some(marker) = self.index.get_reorg_marker()? else {
      return Ok(());
    };
    log::warn!(
      "replaying interrupted reorganization toward {}",
      marker.orphan_tip_hash,
    );

    let ancestor = self
      .index
      .get_block_by_height(marker.ancestor_height)?
      .ok_or_else(|| anyhow!("reorg ancestor at height {} missing", marker.ancestor_height))?;
    ensure!(
      ancestor.hash == marker.ancestor_hash,
      "reorg ancestor mismatch: expected {}, found {}",
      marker.ancestor_hash,
      ancestor.hash,
    );
    let orphan_tip = self
      .index
      .get_orphan_block(&marker.orphan_tip_hash)?
      .ok_or_else(|| anyhow!("reorg target {} missing", marker.orphan_tip_hash))?;

    let tip = reorg::reorganize(&self.index, &ancestor, &orphan_tip, self.latest_height())?;
    self.latest_height.store(tip, Ordering::SeqCst);
    self.tip.update_last_block_height(tip);
    Ok(())
  }

  /// Classifies one block from the wire against the index and applies it:
  /// duplicates are dropped, the next main-chain block is applied,
  /// competing forks are stored as orphans, an orphan chain that caught up
  /// triggers a reorganization, and blocks with unknown parents are
  /// dropped for a later delivery to backfill.
  pub fn apply_block(&mut self, block: &Block) -> Result {
    let hash = block.block_hash().to_string();

    if self.index.block_exists(&hash)? {
      return Ok(());
    }
    if self.index.get_orphan_block(&hash)?.is_some() {
      return Ok(());
    }

    let prev_hash = block.header.prev_blockhash.to_string();
    let previous = match self.index.get_block(&prev_hash)? {
      Some(previous) if !previous.is_orphan => previous,
      _ => {
        let Some(orphan_parent) = self.index.get_orphan_block(&prev_hash)? else {
          log::debug!("dropping block {hash} with unknown parent {prev_hash}");
          return Ok(());
        };

        if self.latest_height() > orphan_parent.height + 1 {
          return self.put_orphan_block(block, orphan_parent.height + 1);
        }

        // The side chain has caught up with the main chain: switch over,
        // then apply this block on top of it.
        let Some(ancestor) = self.find_common_ancestor(&orphan_parent)? else {
          log::debug!("dropping block {hash}: side chain has no stored ancestor");
          return Ok(());
        };
        let tip = reorg::reorganize(&self.index, &ancestor, &orphan_parent, self.latest_height())?;
        self.latest_height.store(tip, Ordering::SeqCst);
        self.tip.update_last_block_height(tip);

        self
          .index
          .get_block(&prev_hash)?
          .filter(|previous| !previous.is_orphan)
          .ok_or_else(|| SnafuError::ApplyConflict {
            hash: hash.clone(),
            reason: format!("parent {prev_hash} missing after reorganization"),
          })?
      }
    };

    if self.latest_height() >= previous.height + 1 {
      return self.put_orphan_block(block, previous.height + 1);
    }

    let height = previous.height + 1;
    self
      .index
      .put_block(&BlockEntry::from_core(block, height, false))?;

    // Outputs land before inputs are consumed so that spends of outputs
    // created in this same block resolve through the reverse index.
    let split = SplitTxs::new(block, &hash);
    self.index.put_utxos(&split.vouts)?;
    self.index.put_txs(&split.txs)?;
    self
      .index
      .remove_utxos(&split.spent_hashes, &split.spent_indices, &split.spenders)?;

    self.index.set_latest_block_height(height)?;
    self.latest_height.store(height, Ordering::SeqCst);
    self.tip.update_last_block_height(height);
    log::debug!("indexed block {hash} at height {height}");
    Ok(())
  }

  /// Stores a side-chain block and its transactions. The UTXO set is not
  /// touched.
  fn put_orphan_block(&mut self, block: &Block, height: u64) -> Result {
    let hash = block.block_hash().to_string();
    self
      .index
      .put_orphan_block(&BlockEntry::from_core(block, height, true))?;
    self.index.put_txs(&SplitTxs::new(block, &hash).txs)?;
    log::info!("stored orphan block {hash} at height {height}");
    Ok(())
  }

  /// Walks the stored side chain back from `orphan` to the first main-chain
  /// block it attaches to. Returns `None` when a link is missing.
  fn find_common_ancestor(&self, orphan: &BlockEntry) -> Result<Option<BlockEntry>> {
    let mut current = orphan.clone();
    loop {
      if let Some(parent) = self.index.get_block(&current.previous_block)? {
        if !parent.is_orphan {
          return Ok(Some(parent));
        }
      }
      match self.index.get_orphan_block(&current.previous_block)? {
        Some(parent) => current = parent,
        None => return Ok(None),
      }
    }
  }

  fn put_mempool_tx(&self, tx: &Transaction) -> Result {
    let latest = self.index.get_latest_block_height()?.unwrap_or(0);
    if latest != 0 && latest != self.tip.last_block() {
      // unconfirmed transactions are noise until the chain is caught up
      return Ok(());
    }
    self.mempool.process_tx(tx)
  }

  /// Kicks off the one-shot background mempool import the first time the
  /// chain is caught up. A failed import rearms the trigger.
  fn maybe_sync_mempool(&self) {
    if !self.synced.load(Ordering::SeqCst) {
      return;
    }
    if self.mempool_synced.swap(true, Ordering::SeqCst) {
      return;
    }

    let (Some(url), Some(user), Some(pass)) = (
      self.settings.rpc_url.clone(),
      self.settings.rpc_user.clone(),
      self.settings.rpc_pass.clone(),
    ) else {
      log::info!("RPC_URL is not configured, skipping mempool import");
      return;
    };

    let mempool = Mempool::new(self.index.clone());
    let mempool_synced = self.mempool_synced.clone();
    thread::spawn(move || {
      log::info!("syncing all mempool transactions...");
      if let Err(err) = mempool.sync_mempool(&url, &user, &pass) {
        log::error!("mempool sync error: {err}");
        mempool_synced.store(false, Ordering::SeqCst);
      }
    });
  }
}

/// Repeatedly requests blocks until the peer reports no more, then marks
/// the chain synced. Exits when the peer disconnects; the run loop restarts
/// it on the next session.
fn fetch_blocks(
  index: &Index,
  peer: &Peer,
  latest_height: &AtomicU64,
  synced: &AtomicBool,
  block_processed_rx: &Mutex<Receiver<()>>,
) {
  let block_processed = block_processed_rx.lock().unwrap();

  // signals buffered after the previous session ended would skew the next
  // batch count
  while block_processed.try_recv().is_ok() {}

  while peer.connected() {
    let latest = match index.get_latest_block_height() {
      Ok(latest) => latest.unwrap_or(0),
      Err(err) => {
        log::error!("error getting latest block height: {err}");
        continue;
      }
    };

    let peer_last = peer.last_block();
    log::info!("local tip {latest}, peer tip {peer_last}");

    if peer_last == 0 {
      // the peer has not advertised its tip yet
      thread::sleep(Duration::from_millis(500));
      continue;
    }

    if latest == peer_last && latest != 0 {
      log::info!("blockchain synced");
      synced.store(true, Ordering::SeqCst);
      return;
    }

    let locator = match block_locator(index, latest) {
      Ok(locator) => locator,
      Err(err) => {
        log::error!("error building block locator: {err}");
        continue;
      }
    };

    if let Err(err) = peer.push_getblocks(&locator, BlockHash::all_zeros()) {
      log::error!("error pushing getblocks message: {err}");
      continue;
    }

    if wait_for_blocks(peer, latest_height, locator.len(), &block_processed) {
      log::debug!("batch processed");
    } else {
      log::info!("blockchain synced");
      synced.store(true, Ordering::SeqCst);
      return;
    }
  }
}

/// How many `block_processed` signals to expect after a `getblocks`
/// request: one per outstanding block, capped at the 500-inventory response
/// limit, or 501 to also absorb a freshly-mined block the peer pushes
/// unrequested. `None` means the chain is already caught up.
fn expected_batch(latest: u64, peer_last: u64, locator_len: usize) -> Option<usize> {
  let diff = peer_last as i64 - latest as i64;
  if latest != 0 && diff == 0 {
    return None;
  }
  let mut limit = 501;
  if diff > 0 && diff < 500 {
    limit = diff as usize;
  }
  if locator_len == 0 {
    limit = 500;
  }
  Some(limit)
}

/// Consumes one signal per expected block. Returns `true` when more blocks
/// may remain, `false` once fully caught up.
fn wait_for_blocks(
  peer: &Peer,
  latest_height: &AtomicU64,
  locator_len: usize,
  block_processed: &Receiver<()>,
) -> bool {
  let Some(limit) = expected_batch(
    latest_height.load(Ordering::SeqCst),
    peer.last_block(),
    locator_len,
  ) else {
    return false;
  };

  for _ in 0..limit {
    let latest = latest_height.load(Ordering::SeqCst);
    let caught_up = latest != 0 && peer.last_block() == latest;
    loop {
      match block_processed.recv_timeout(Duration::from_secs(30)) {
        Ok(()) => break,
        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
          if !peer.connected() {
            return true;
          }
        }
        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return false,
      }
    }
    if caught_up {
      return false;
    }
  }

  true
}

/// Resolves the exponential-backoff locator heights to stored block
/// hashes, newest-first. Missing heights are skipped; an empty locator is
/// valid and makes the peer stream from genesis.
pub(crate) fn block_locator(index: &Index, tip: u64) -> Result<Vec<BlockHash>> {
  let heights = calculate_locator(tip);
  index
    .get_blocks(&heights)?
    .iter()
    .map(|block| {
      BlockHash::from_str(&block.hash)
        .with_context(|| format!("stored block hash `{}` is malformed", block.hash))
    })
    .collect()
}

/// <https://en.bitcoin.it/wiki/Protocol_documentation#getblocks>: the last
/// 10 heights, then exponentially wider steps back to genesis.
pub(crate) fn calculate_locator(top: u64) -> Vec<u64> {
  let mut heights = Vec::new();
  let mut step: i64 = 1;
  let mut height = i64::try_from(top).unwrap_or(i64::MAX);
  while height > 0 {
    if heights.len() >= 10 {
      step = step.saturating_mul(2);
    }
    heights.push(height as u64);
    height -= step;
  }
  heights.push(0);
  heights
}
