use super::*;

#[derive(Debug, Parser)]
pub struct RemoveBlocks {
  #[arg(long, help = "Keep blocks up to <HEIGHT>, remove everything above.")]
  height: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Output {
  pub new_tip: u64,
}

impl RemoveBlocks {
  pub(crate) fn run(self, settings: Settings) -> Result {
    let index = Index::open(&settings)?;
    let block = index
      .get_block_by_height(self.height)?
      .with_context(|| format!("no block at height {}", self.height))?;
    let new_tip = index
      .remove_blocks_above(&block.hash)?
      .with_context(|| format!("block {} missing from index", block.hash))?;

    serde_json::to_writer_pretty(std::io::stdout(), &Output { new_tip })?;
    println!();
    Ok(())
  }
}
