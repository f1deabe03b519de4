use super::*;

pub mod index;
pub mod remove_blocks;
pub mod server;

#[derive(Debug, Parser)]
pub enum Subcommand {
  #[command(about = "Sync the index from the peer")]
  Index,
  #[command(about = "Sync the index and serve queries over HTTP")]
  Server,
  #[command(about = "Remove main-chain blocks above a height")]
  RemoveBlocks(remove_blocks::RemoveBlocks),
}

impl Subcommand {
  pub fn run(self, settings: Settings) -> Result {
    match self {
      Self::Index => index::run(settings),
      Self::Server => server::run(settings),
      Self::RemoveBlocks(remove_blocks) => remove_blocks.run(settings),
    }
  }
}
