//! Outbound message sends.

use bijou_shared::{ClientEvent, OutboundMessage};

use super::connection::{ConnectionState, WsHandle};

/// Forward `message` if the session is connected.
///
/// Disconnected sends are dropped with a warning; nothing is queued for
/// later delivery. `client_temp_id` travels verbatim.
pub(crate) fn dispatch(
    handle: Option<&WsHandle>,
    state: ConnectionState,
    message: OutboundMessage,
) -> bool {
    let Some(handle) = handle.filter(|_| state.is_connected()) else {
        crate::log_warn!(
            "Dropping outbound message (temp id {:?}): session is {:?}",
            message.client_temp_id,
            state
        );
        return false;
    };

    match handle.emit(&ClientEvent::SendMessage(message)) {
        Ok(()) => true,
        Err(e) => {
            crate::log_warn!("Outbound message not sent: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bijou_shared::{EnginePacket, SocketPacket};
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn disconnected_send_is_inert() {
        let (tx, mut rx) = unbounded_channel();
        let handle = WsHandle::new(tx);
        let msg = OutboundMessage::to_user("s1", "hello").with_client_temp_id("tmp-1");

        assert!(!dispatch(None, ConnectionState::Disconnected, msg.clone()));
        assert!(!dispatch(Some(&handle), ConnectionState::Connecting, msg));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn connected_send_wraps_in_envelope() {
        let (tx, mut rx) = unbounded_channel();
        let handle = WsHandle::new(tx);
        let msg = OutboundMessage::to_user("s1", "hello").with_client_temp_id("tmp-1");

        assert!(dispatch(Some(&handle), ConnectionState::Connected, msg));
        let frame = rx.try_recv().unwrap();
        let EnginePacket::Message(SocketPacket::Event { name, data, .. }) =
            EnginePacket::decode(&frame).unwrap()
        else {
            panic!("expected event frame, got {frame}");
        };
        assert_eq!(name, "send_message");
        assert_eq!(
            data,
            json!({"toUserId": "s1", "text": "hello", "clientTempId": "tmp-1"})
        );
    }

    #[test]
    fn back_to_back_sends_keep_call_order() {
        let (tx, mut rx) = unbounded_channel();
        let handle = WsHandle::new(tx);
        for text in ["one", "two", "three"] {
            assert!(dispatch(
                Some(&handle),
                ConnectionState::Connected,
                OutboundMessage::to_user("s1", text)
            ));
        }
        let order: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(order.len(), 3);
        assert!(order[0].contains("one") && order[2].contains("three"));
    }
}
