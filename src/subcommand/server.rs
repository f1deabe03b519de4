use {super::*, tokio::runtime::Runtime};

pub(crate) fn run(settings: Settings) -> Result {
  let index = Arc::new(Index::open(&settings)?);

  let sync_index = index.clone();
  let sync_settings = settings.clone();
  thread::spawn(move || {
    let result = Updater::new(sync_index, sync_settings).and_then(|mut updater| updater.run());
    if let Err(err) = result {
      // an inconsistent index needs operator attention before serving on
      log::error!("sync loop terminated: {err}");
      process::exit(1);
    }
  });

  Runtime::new()?.block_on(crate::server::spawn(settings, index))
}
