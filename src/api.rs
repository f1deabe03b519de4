use super::*;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
  pub chain: Chain,
  pub height: u64,
  pub tip_hash: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptUtxos {
  pub script: String,
  pub address: Option<String>,
  pub balance: i64,
  pub utxos: Vec<Vout>,
}

impl ScriptUtxos {
  pub(crate) fn new(chain: Chain, script: &str, utxos: Vec<Vout>) -> Self {
    let address = hex::decode(script)
      .ok()
      .map(ScriptBuf::from_bytes)
      .and_then(|script| chain.address_string_from_script(&script));
    Self {
      script: script.to_string(),
      address,
      balance: utxos.iter().map(|utxo| utxo.value).sum(),
      utxos,
    }
  }
}
