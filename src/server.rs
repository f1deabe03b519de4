//! Read-only query surface over the index, JSON over HTTP.

use {
  super::*,
  axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
  },
  tokio::net::TcpListener,
};

pub(crate) enum ServerError {
  NotFound(String),
  Internal(Error),
}

pub(crate) type ServerResult<T> = std::result::Result<T, ServerError>;

impl From<Error> for ServerError {
  fn from(err: Error) -> Self {
    Self::Internal(err)
  }
}

impl IntoResponse for ServerError {
  fn into_response(self) -> Response {
    match self {
      Self::NotFound(message) => (StatusCode::NOT_FOUND, message).into_response(),
      Self::Internal(err) => {
        log::error!("query failed: {err}");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
      }
    }
  }
}

#[derive(Clone)]
struct ServerState {
  index: Arc<Index>,
}

pub async fn spawn(settings: Settings, index: Arc<Index>) -> Result {
  let addr = SocketAddr::from(([0, 0, 0, 0], settings.rpc_port));
  let router = router(index);

  log::info!("query surface listening on {addr}");
  axum::serve(TcpListener::bind(addr).await?, router)
    .await
    .context("query server terminated")
}

fn router(index: Arc<Index>) -> Router {
  Router::new()
    .route("/status", get(status))
    .route("/latest_tip", get(latest_tip))
    .route("/latest_tip_hash", get(latest_tip_hash))
    .route("/block/:height", get(block_by_height))
    .route("/block/hash/:hash", get(block_by_hash))
    .route("/tx/:hash", get(tx))
    .route("/utxos/:script", get(utxos))
    .route("/txs/:script", get(txs_of_script))
    .route("/address/:address/utxos", get(address_utxos))
    .with_state(ServerState { index })
}

async fn status(State(state): State<ServerState>) -> ServerResult<Json<api::Status>> {
  let height = state
    .index
    .get_latest_block_height()?
    .ok_or_else(|| ServerError::NotFound("no blocks indexed".to_string()))?;
  let tip_hash = state
    .index
    .get_latest_tip_hash()?
    .ok_or_else(|| ServerError::NotFound("tip block missing".to_string()))?;
  Ok(Json(api::Status {
    chain: state.index.chain(),
    height,
    tip_hash,
  }))
}

async fn latest_tip(State(state): State<ServerState>) -> ServerResult<Json<u64>> {
  Ok(Json(state.index.get_latest_block_height()?.ok_or_else(
    || ServerError::NotFound("no blocks indexed".to_string()),
  )?))
}

async fn latest_tip_hash(State(state): State<ServerState>) -> ServerResult<Json<String>> {
  Ok(Json(state.index.get_latest_tip_hash()?.ok_or_else(
    || ServerError::NotFound("no blocks indexed".to_string()),
  )?))
}

async fn block_by_height(
  State(state): State<ServerState>,
  Path(height): Path<u64>,
) -> ServerResult<Json<BlockEntry>> {
  Ok(Json(state.index.get_block_by_height(height)?.ok_or_else(
    || ServerError::NotFound(format!("no block at height {height}")),
  )?))
}

async fn block_by_hash(
  State(state): State<ServerState>,
  Path(hash): Path<String>,
) -> ServerResult<Json<BlockEntry>> {
  Ok(
    Json(state.index.get_block(&hash)?.ok_or_else(|| {
      ServerError::NotFound(format!("no block with hash {hash}"))
    })?),
  )
}

async fn tx(
  State(state): State<ServerState>,
  Path(hash): Path<String>,
) -> ServerResult<Json<TxEntry>> {
  Ok(
    Json(state.index.get_tx(&hash)?.ok_or_else(|| {
      ServerError::NotFound(format!("no transaction with hash {hash}"))
    })?),
  )
}

async fn utxos(
  State(state): State<ServerState>,
  Path(script): Path<String>,
) -> ServerResult<Json<api::ScriptUtxos>> {
  let utxos = state.index.get_utxos(&script)?;
  Ok(Json(api::ScriptUtxos::new(
    state.index.chain(),
    &script,
    utxos,
  )))
}

async fn txs_of_script(
  State(state): State<ServerState>,
  Path(script): Path<String>,
) -> ServerResult<Json<Vec<TxEntry>>> {
  Ok(Json(state.index.get_txs_of_script(&script)?))
}

async fn address_utxos(
  State(state): State<ServerState>,
  Path(address): Path<String>,
) -> ServerResult<Json<api::ScriptUtxos>> {
  let chain = state.index.chain();
  let script = chain
    .address_to_script(&address)
    .map_err(|err| ServerError::NotFound(err.to_string()))?;
  let script_hex = hex::encode(script.as_bytes());
  let utxos = state.index.get_utxos(&script_hex)?;
  Ok(Json(api::ScriptUtxos::new(chain, &script_hex, utxos)))
}
