use super::*;

/// Previous-outpoint hash carried by coinbase inputs, and the hash of the
/// sentinel transaction written alongside the genesis block.
pub(crate) const ZERO_HASH: &str =
  "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEntry {
  pub hash: String,
  pub height: u64,
  pub is_orphan: bool,
  pub previous_block: String,
  pub version: i32,
  pub nonce: u32,
  pub timestamp: u32,
  pub bits: u32,
  pub merkle_root: String,
  pub txs: Vec<String>,
}

impl BlockEntry {
  pub(crate) fn from_core(block: &Block, height: u64, is_orphan: bool) -> Self {
    Self {
      hash: block.block_hash().to_string(),
      height,
      is_orphan,
      previous_block: block.header.prev_blockhash.to_string(),
      version: block.header.version.to_consensus(),
      nonce: block.header.nonce,
      timestamp: block.header.time,
      bits: block.header.bits.to_consensus(),
      merkle_root: block.header.merkle_root.to_string(),
      txs: block
        .txdata
        .iter()
        .map(|tx| tx.compute_txid().to_string())
        .collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxEntry {
  pub hash: String,
  pub version: i32,
  pub lock_time: u32,
  pub block_hash: String,
  pub vins: Vec<Vin>,
  pub vouts: Vec<Vout>,
}

impl TxEntry {
  pub(crate) fn from_core(tx: &Transaction, block_hash: &str) -> Self {
    let hash = tx.compute_txid().to_string();
    Self {
      vins: tx
        .input
        .iter()
        .map(|input| Vin {
          previous_tx: input.previous_output.txid.to_string(),
          previous_index: input.previous_output.vout,
          sequence: input.sequence.0,
          signature_script: hex::encode(input.script_sig.as_bytes()),
          witness: encode_witness(&input.witness),
        })
        .collect(),
      vouts: tx
        .output
        .iter()
        .enumerate()
        .map(|(index, output)| Vout {
          tx_id: hash.clone(),
          index: u32::try_from(index).expect("output count fits u32"),
          script_pub_key: hex::encode(output.script_pubkey.as_bytes()),
          value: output.value.to_sat() as i64,
          script_type: script_type(&output.script_pubkey).into(),
        })
        .collect(),
      hash,
      version: tx.version.0,
      lock_time: tx.lock_time.to_consensus_u32(),
      block_hash: block_hash.to_string(),
    }
  }

  /// The all-zeros placeholder stored when the genesis block is seeded.
  pub(crate) fn sentinel() -> Self {
    Self {
      hash: ZERO_HASH.into(),
      version: 0,
      lock_time: 0,
      block_hash: String::new(),
      vins: Vec::new(),
      vouts: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vin {
  pub previous_tx: String,
  pub previous_index: u32,
  pub sequence: u32,
  pub signature_script: String,
  pub witness: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vout {
  pub tx_id: String,
  pub index: u32,
  pub script_pub_key: String,
  pub value: i64,
  pub script_type: String,
}

fn encode_witness(witness: &bitcoin::Witness) -> String {
  witness
    .iter()
    .map(hex::encode)
    .collect::<Vec<String>>()
    .join(",")
}

fn script_type(script: &Script) -> &'static str {
  if script.is_p2pkh() {
    "pubkeyhash"
  } else if script.is_p2sh() {
    "scripthash"
  } else if script.is_p2wpkh() {
    "witness_v0_keyhash"
  } else if script.is_p2wsh() {
    "witness_v0_scripthash"
  } else if script.is_p2tr() {
    "witness_v1_taproot"
  } else if script.is_p2pk() {
    "pubkey"
  } else if script.is_multisig() {
    "multisig"
  } else if script.is_op_return() {
    "nulldata"
  } else {
    "nonstandard"
  }
}

/// One block's transactions split for the apply path: the outputs it
/// creates, the outpoints it consumes (coinbase excluded) together with the
/// hash of the transaction spending each, and the records to persist.
pub(crate) struct SplitTxs {
  pub(crate) vouts: Vec<Vout>,
  pub(crate) spent_hashes: Vec<String>,
  pub(crate) spent_indices: Vec<u32>,
  pub(crate) spenders: Vec<String>,
  pub(crate) txs: Vec<TxEntry>,
}

impl SplitTxs {
  pub(crate) fn new(block: &Block, block_hash: &str) -> Self {
    let mut split = Self {
      vouts: Vec::new(),
      spent_hashes: Vec::new(),
      spent_indices: Vec::new(),
      spenders: Vec::new(),
      txs: Vec::new(),
    };

    for tx in &block.txdata {
      let entry = TxEntry::from_core(tx, block_hash);
      split.vouts.extend(entry.vouts.iter().cloned());
      for vin in &entry.vins {
        if vin.previous_tx == ZERO_HASH {
          continue;
        }
        split.spent_hashes.push(vin.previous_tx.clone());
        split.spent_indices.push(vin.previous_index);
        split.spenders.push(entry.hash.clone());
      }
      split.txs.push(entry);
    }

    split
  }
}
