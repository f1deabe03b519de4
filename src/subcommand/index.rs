use super::*;

pub(crate) fn run(settings: Settings) -> Result {
  let index = Arc::new(Index::open(&settings)?);
  let mut updater = Updater::new(index, settings)?;
  updater.run()
}
