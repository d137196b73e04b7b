//! `oolive replay`: re-send a recorded card log.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use oolive_api::WsConnector;
use oolive_core::ReaderSessionClient;
use oolive_core::reader::replay::{TerminalPrompt, replay};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::{GlobalOpts, ReplayArgs};
use crate::error::CliError;

pub async fn handle(args: ReplayArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = super::config_path(global);
    let reader = super::load(global)?
        .reader_config()
        .map_err(|source| CliError::Config {
            path: path.display().to_string(),
            source,
        })?;
    let log = BufReader::new(File::open(&args.file)?);

    let endpoint = reader.endpoint();
    let uri = endpoint.uri.clone();
    debug!(%uri, file = %args.file.display(), "starting replay");

    let (session, task) = ReaderSessionClient::connect(
        endpoint,
        Arc::new(WsConnector),
        reader.reconnect_delay,
        args.reply_timeout.map(Duration::from_secs),
        CancellationToken::new(),
    );

    let opened = tokio::time::timeout(
        Duration::from_secs(args.connect_timeout),
        session.wait_opened(),
    )
    .await;
    if opened.is_err() {
        session.shutdown();
        let _ = task.await;
        return Err(CliError::ConnectionFailed { uri });
    }
    info!(%uri, "connected");

    let handle = Handle::current();
    let worker = session.clone();
    let result = tokio::task::spawn_blocking(move || {
        replay(log, &mut TerminalPrompt, &worker, &handle)
    })
    .await
    .map_err(std::io::Error::other)?;

    session.shutdown();
    let _ = task.await;

    let summary = result?;
    println!(
        "{} record(s) sent, {} not sent",
        summary.sent, summary.remaining
    );
    Ok(())
}
