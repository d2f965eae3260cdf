//! bijou-tail - follow a chat session from the terminal
//!
//! Opens a session with the credential in `BIJOU_TOKEN` / `BIJOU_USER_ID`
//! and prints every inbound event as a JSON line until Ctrl-C.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bijou_client::shared::{Credential, ServerEvent};
use bijou_client::{logging, ChatSession};
use serde_json::json;

const TOKEN_ENV: &str = "BIJOU_TOKEN";
const USER_ID_ENV: &str = "BIJOU_USER_ID";

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(logging::DEFAULT_FILTER);

    let token = std::env::var(TOKEN_ENV).with_context(|| format!("{TOKEN_ENV} is not set"))?;
    let credential = Credential::new(std::env::var(USER_ID_ENV).ok(), token);
    if !credential.has_token() {
        bail!("{TOKEN_ENV} is empty");
    }

    let session = ChatSession::from_env();
    bijou_client::log_info!("Connecting to {}", session.config().endpoint);

    let printer = session.subscribe(Arc::new(|event: &ServerEvent| {
        let line = json!({ "event": event.name(), "payload": event.payload() });
        println!("{line}");
    }));

    let mut states = session.watch_state();
    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            bijou_client::log_info!("Session state: {:?}", state);
        }
    });

    session.init(credential);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    printer.dispose();
    session.teardown();
    watcher.abort();
    Ok(())
}
