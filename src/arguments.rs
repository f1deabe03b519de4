use super::*;

#[derive(Debug, Parser)]
#[command(
  version,
  about = "UTXO chain indexer for Bitcoin-family networks",
  args_override_self = true
)]
pub struct Arguments {
  #[command(flatten)]
  pub options: Options,
  #[command(subcommand)]
  pub subcommand: subcommand::Subcommand,
}

impl Arguments {
  pub fn run(self) -> Result {
    let settings = Settings::load(self.options)?;
    self.subcommand.run(settings)
  }
}
