use super::*;

#[derive(Clone, Debug)]
pub struct Settings {
  pub chain: Chain,
  pub db_path: PathBuf,
  pub peer_url: String,
  pub rpc_port: u16,
  pub rpc_url: Option<String>,
  pub rpc_user: Option<String>,
  pub rpc_pass: Option<String>,
}

impl Settings {
  pub fn load(options: Options) -> Result<Self, SnafuError> {
    let chain = Chain::from_parts(
      options.chain.as_deref().unwrap_or("bitcoin"),
      options.network.as_deref().unwrap_or("mainnet"),
    )?;

    if options.rpc_url.is_some() && (options.rpc_user.is_none() || options.rpc_pass.is_none()) {
      return Err(SnafuError::ConfigInvalid {
        reason: "RPC_URL requires RPC_USER and RPC_PASS".into(),
      });
    }

    Ok(Self {
      chain,
      db_path: chain.join_with_data_dir(
        options
          .db_path
          .unwrap_or_else(|| PathBuf::from("indexer-data")),
      ),
      peer_url: options
        .peer_url
        .unwrap_or_else(|| format!("127.0.0.1:{}", chain.default_p2p_port())),
      rpc_port: options.rpc_port.unwrap_or(8080),
      rpc_url: options.rpc_url,
      rpc_user: options.rpc_user,
      rpc_pass: options.rpc_pass,
    })
  }
}
