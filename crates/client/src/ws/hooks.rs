//! Dioxus provider and hooks over [`ChatSession`].

use std::rc::Rc;
use std::sync::Arc;

use bijou_shared::{Credential, ServerEvent};
use dioxus::prelude::*;

use super::connection::ConnectionState;
use super::session::ChatSession;

/// Provides `session` to the subtree and keeps it on `credential`.
#[component]
pub fn ChatSessionProvider(
    session: ChatSession,
    #[props(!optional)]
    credential: Option<Credential>,
    children: Element,
) -> Element {
    let provided = use_context_provider(|| session.clone());

    // Idempotent for an unchanged credential, so re-renders don't reconnect.
    provided.set_credential(credential);

    let on_drop = provided.clone();
    use_drop(move || on_drop.teardown());

    children
}

/// The session provided by the nearest [`ChatSessionProvider`].
///
/// # Panics
/// Outside a provider; that is a wiring bug, not a runtime condition.
pub fn use_chat_session() -> ChatSession {
    try_use_context::<ChatSession>()
        .unwrap_or_else(|| panic!("use_chat_session called outside of a ChatSessionProvider"))
}

/// Subscribe for the lifetime of the calling component.
pub fn use_chat_subscription(callback: impl Fn(&ServerEvent) + Send + Sync + 'static) {
    let session = use_chat_session();
    let subscription = use_hook(move || Rc::new(session.subscribe(Arc::new(callback))));
    use_drop(move || subscription.dispose());
}

/// Connection state as a signal, e.g. to disable the send button.
pub fn use_connection_state() -> Signal<ConnectionState> {
    let session = use_chat_session();
    let mut state = use_signal(|| session.state());

    use_future(move || {
        let mut changes = session.watch_state();
        async move {
            while changes.changed().await.is_ok() {
                let next = *changes.borrow_and_update();
                state.set(next);
            }
        }
    });

    state
}
