use super::*;

#[derive(Clone, Default, Debug, Parser)]
pub struct Options {
  #[arg(long, env = "CHAIN", help = "Index <CHAIN>. [default: bitcoin]")]
  pub(crate) chain: Option<String>,
  #[arg(long, env = "NETWORK", help = "Use <NETWORK>. [default: mainnet]")]
  pub(crate) network: Option<String>,
  #[arg(long, env = "DB_PATH", help = "Store the index at <DB_PATH>.")]
  pub(crate) db_path: Option<PathBuf>,
  #[arg(
    long,
    env = "PEER_URL",
    help = "Sync from the full node at <PEER_URL>. [default: 127.0.0.1:<chain p2p port>]"
  )]
  pub(crate) peer_url: Option<String>,
  #[arg(
    long,
    env = "RPC_PORT",
    help = "Serve queries on <RPC_PORT>. [default: 8080]"
  )]
  pub(crate) rpc_port: Option<u16>,
  #[arg(
    long,
    env = "RPC_URL",
    help = "Import the mempool from the node JSON-RPC at <RPC_URL>."
  )]
  pub(crate) rpc_url: Option<String>,
  #[arg(long, env = "RPC_USER", help = "Authenticate to the node as <RPC_USER>.")]
  pub(crate) rpc_user: Option<String>,
  #[arg(
    long,
    env = "RPC_PASS",
    help = "Authenticate to the node with <RPC_PASS>."
  )]
  pub(crate) rpc_pass: Option<String>,
}
