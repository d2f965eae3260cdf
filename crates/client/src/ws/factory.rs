//! Builds inert connections from a credential.

use std::sync::Arc;

use bijou_shared::Credential;
use serde_json::json;

use super::connection::{Connector, WsConnection};
use crate::config::{ConfigError, SessionConfig};

/// Derive the endpoint and build a not-yet-connected handle for `credential`.
///
/// The token travels in the Socket.IO auth payload, not a header or the
/// query string. Connecting is left to the caller.
pub fn build_connection(
    credential: &Credential,
    config: &SessionConfig,
    connector: Arc<dyn Connector>,
) -> Result<WsConnection, ConfigError> {
    let url = config.socket_url()?;
    let auth = json!({ "token": credential.token });
    Ok(WsConnection::new(
        url,
        auth,
        config.backoff.clone(),
        config.connect_timeout,
        connector,
    ))
}
