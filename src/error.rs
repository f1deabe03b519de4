use {snafu::Snafu, std::io};

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum SnafuError {
  #[snafu(display("Invalid chain `{chain}`"))]
  InvalidChain { chain: String },
  #[snafu(display("Invalid network `{network}`"))]
  InvalidNetwork { network: String },
  #[snafu(display("invalid configuration: {reason}"))]
  ConfigInvalid { reason: String },
  #[snafu(display("cannot reach peer {address}"))]
  PeerUnreachable { address: String, source: io::Error },
  #[snafu(display("handshake with {address} failed: {reason}"))]
  HandshakeFailed { address: String, reason: String },
  #[snafu(display("peer protocol violation: {reason}"))]
  PeerProtocol { reason: String },
  #[snafu(display("corrupt index entry under key `{key}`"))]
  StoreCorruption {
    key: String,
    source: serde_json::Error,
  },
  #[snafu(display("cannot apply block {hash}: {reason}"))]
  ApplyConflict { hash: String, reason: String },
  #[snafu(display("failed to parse address `{address}`"))]
  AddressParse {
    address: String,
    source: bitcoin::address::ParseError,
  },
  #[snafu(display("unsupported address `{address}`"))]
  UnsupportedAddress { address: String },
}

/// Like `snafu::ResultExt::context`, renamed so it can coexist with
/// `anyhow::Context` in modules that use both.
pub(crate) trait ResultExt<T, E>: Sized {
  fn snafu_context<C, E2>(self, context: C) -> Result<T, E2>
  where
    C: snafu::IntoError<E2, Source = E>,
    E2: std::error::Error + snafu::ErrorCompat;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
  fn snafu_context<C, E2>(self, context: C) -> Result<T, E2>
  where
    C: snafu::IntoError<E2, Source = E>,
    E2: std::error::Error + snafu::ErrorCompat,
  {
    self.map_err(|source| context.into_error(source))
  }
}
