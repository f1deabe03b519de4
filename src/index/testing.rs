//! Builders for the hand-rolled blocks used by the applier tests. Headers
//! carry the real merkle root of their transactions so that blocks with
//! different contents hash differently; proof-of-work is irrelevant here and
//! never checked.

use {
  super::*,
  bitcoin::{
    absolute, block, transaction, Amount, CompactTarget, OutPoint, Sequence, TxIn, TxMerkleNode,
    TxOut, Txid, Witness,
  },
};

pub(crate) fn test_settings() -> Settings {
  Settings {
    chain: Chain::BitcoinRegtest,
    db_path: PathBuf::from("unused"),
    peer_url: String::new(),
    rpc_port: 0,
    rpc_url: None,
    rpc_user: None,
    rpc_pass: None,
  }
}

pub(crate) fn memory_updater() -> (updater::Updater, Arc<Index>) {
  let index = Arc::new(Index::new(
    Arc::new(MemoryStore::new()),
    Chain::BitcoinRegtest,
  ));
  let updater = updater::Updater::new(index.clone(), test_settings()).unwrap();
  (updater, index)
}

pub(crate) fn script(n: u8) -> ScriptBuf {
  let hash = bitcoin::PubkeyHash::from_slice(&[n; 20]).expect("20-byte hash");
  ScriptBuf::new_p2pkh(&hash)
}

pub(crate) fn coinbase_tx(tag: u32, value: u64, script: &Script) -> Transaction {
  Transaction {
    version: transaction::Version::ONE,
    lock_time: absolute::LockTime::ZERO,
    input: vec![TxIn {
      previous_output: OutPoint::null(),
      script_sig: ScriptBuf::from_bytes(tag.to_be_bytes().to_vec()),
      sequence: Sequence::MAX,
      witness: Witness::new(),
    }],
    output: vec![TxOut {
      value: Amount::from_sat(value),
      script_pubkey: script.to_owned(),
    }],
  }
}

pub(crate) fn spend_tx(previous: (Txid, u32), value: u64, script: &Script) -> Transaction {
  Transaction {
    version: transaction::Version::ONE,
    lock_time: absolute::LockTime::ZERO,
    input: vec![TxIn {
      previous_output: OutPoint {
        txid: previous.0,
        vout: previous.1,
      },
      script_sig: ScriptBuf::new(),
      sequence: Sequence::MAX,
      witness: Witness::new(),
    }],
    output: vec![TxOut {
      value: Amount::from_sat(value),
      script_pubkey: script.to_owned(),
    }],
  }
}

pub(crate) fn block(previous: BlockHash, nonce: u32, txdata: Vec<Transaction>) -> Block {
  let mut block = Block {
    header: block::Header {
      version: block::Version::from_consensus(1),
      prev_blockhash: previous,
      merkle_root: TxMerkleNode::all_zeros(),
      time: 1_386_325_540 + nonce,
      bits: CompactTarget::from_consensus(0x207f_ffff),
      nonce,
    },
    txdata,
  };
  if let Some(merkle_root) = block.compute_merkle_root() {
    block.header.merkle_root = merkle_root;
  }
  block
}
