//! Imports unconfirmed transactions from a node's JSON-RPC once the chain
//! is caught up. Mempool records carry no owning block hash; they are
//! rewritten with one when their block is indexed.

use {
  super::*,
  bitcoincore_rpc::{Auth, Client, RpcApi},
};

pub(crate) struct Mempool {
  index: Arc<Index>,
}

impl Mempool {
  pub(crate) fn new(index: Arc<Index>) -> Self {
    Self { index }
  }

  /// One-shot import of the node's current mempool.
  pub(crate) fn sync_mempool(&self, url: &str, user: &str, pass: &str) -> Result {
    let client = Client::new(url, Auth::UserPass(user.to_string(), pass.to_string()))
      .with_context(|| format!("failed to connect to node RPC at {url}"))?;

    let txids = client
      .get_raw_mempool()
      .context("failed to fetch raw mempool")?;
    log::info!("importing {} mempool transactions", txids.len());

    for txid in txids {
      match client.get_raw_transaction(&txid, None) {
        Ok(tx) => self.process_tx(&tx)?,
        // evicted or mined between the two calls
        Err(err) => log::warn!("mempool transaction {txid} dropped: {err}"),
      }
    }
    Ok(())
  }

  pub(crate) fn process_tx(&self, tx: &Transaction) -> Result {
    let entry = TxEntry::from_core(tx, "");
    log::debug!("importing mempool transaction {}", entry.hash);
    self.index.put_tx(&entry)
  }
}
