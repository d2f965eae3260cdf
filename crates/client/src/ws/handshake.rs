//! Identity registration after every connect.

use bijou_shared::{ClientEvent, Credential, RegisterPayload};

use super::connection::WsHandle;

/// Tell the backend which user this transport belongs to.
///
/// Must run on every connect: the server forgets the association when the
/// transport drops. Returns whether a registration was queued.
pub(crate) fn register_identity(handle: &WsHandle, credential: &Credential) -> bool {
    let Some(user_id) = credential.identity() else {
        crate::log_debug!("No user id on credential; skipping socket registration");
        return false;
    };

    let event = ClientEvent::Register(RegisterPayload {
        user_id: user_id.to_string(),
    });
    match handle.emit(&event) {
        Ok(()) => {
            crate::log_info!("Registered socket for user {}", user_id);
            true
        }
        Err(e) => {
            crate::log_error!("Socket registration failed: {}", e);
            false
        }
    }
}
