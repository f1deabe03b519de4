use {
  self::{
    arguments::Arguments,
    index::entry::{SplitTxs, ZERO_HASH},
  },
  anyhow::{anyhow, ensure, Context, Error},
  bitcoin::{
    consensus,
    hashes::Hash,
    p2p::{Magic, ServiceFlags},
    Block, BlockHash, Network, Script, ScriptBuf, Transaction,
  },
  clap::Parser,
  error::ResultExt,
  serde::{Deserialize, Serialize},
  std::{
    cmp,
    collections::HashSet,
    fmt::{self, Display, Formatter},
    net::SocketAddr,
    path::{Path, PathBuf},
    process,
    str::FromStr,
    sync::{
      atomic::{AtomicBool, AtomicU64, Ordering},
      mpsc::{Receiver, SyncSender},
      Arc, Mutex,
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
  },
};

pub use self::{
  chain::Chain,
  error::SnafuError,
  index::{
    entry::{BlockEntry, TxEntry, Vin, Vout},
    updater::Updater,
    Index,
  },
  options::Options,
  settings::Settings,
  store::{KeyValueStore, MemoryStore, RedbStore, StoreError},
};

pub mod api;
pub mod arguments;
pub mod chain;
pub mod error;
pub mod index;
mod mempool;
pub mod options;
pub mod peer;
pub mod server;
pub mod settings;
pub mod store;
pub mod subcommand;

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

pub fn main() {
  env_logger::init();

  match Arguments::parse().run() {
    Ok(()) => {}
    Err(err) => {
      eprintln!("error: {err}");
      for (i, err) in err.chain().skip(1).enumerate() {
        if i == 0 {
          eprintln!();
          eprintln!("because:");
        }
        eprintln!("- {err}");
      }
      process::exit(1);
    }
  }
}
