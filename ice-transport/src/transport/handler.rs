//! Session lifecycle glue between the acceptors and the socket wrappers.

use crate::session::{IceSession, SessionAttribute, CONNECTION, STUN_STACK};
use crate::socket::IceSocketWrapper;
use crate::stack::StunStack;
use log::{debug, warn};
use parking_lot::Mutex;
use shared::error::Error;
use shared::TransportAddress;
use std::collections::HashMap;
use std::sync::Arc;

/// The `(stack, wrapper)` pair stashed until a session opens on the
/// wrapper's local address.
pub(crate) type PendingAttach = (Arc<dyn StunStack>, Arc<IceSocketWrapper>);

/// Receives session lifecycle events from an acceptor and bridges them
/// into the socket wrappers: attributes are attached on open, wrappers are
/// detached on close, data-path exceptions close the session and nothing
/// else.
#[derive(Default)]
pub struct IceHandler {
    pending: Mutex<HashMap<TransportAddress, PendingAttach>>,
}

impl IceHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stashes a stack and wrapper until the first session on the
    /// wrapper's local address opens.
    pub fn add_stack_and_socket(&self, stack: Arc<dyn StunStack>, wrapper: Arc<IceSocketWrapper>) {
        self.pending
            .lock()
            .insert(wrapper.transport_address(), (stack, wrapper));
    }

    pub(crate) fn take_pending(&self, local: TransportAddress) -> Option<PendingAttach> {
        self.pending.lock().remove(&local)
    }

    /// Drops pending pairs that never saw a session (acceptor stop).
    pub(crate) fn clear_pending(&self) {
        self.pending.lock().clear();
    }

    /// Attaches the `STUN_STACK` and `CONNECTION` attributes and installs
    /// the session on its wrapper. The pending pair is consumed by the
    /// first session on a binding and cached in `attach_slot` so every
    /// later session on the same binding (UDP promotion, TCP reconnect)
    /// inherits it.
    pub(crate) fn session_opened(
        &self,
        session: &Arc<IceSession>,
        attach_slot: &Mutex<Option<PendingAttach>>,
    ) {
        let attach = {
            let mut slot = attach_slot.lock();
            if slot.is_none() {
                *slot = self.take_pending(session.local_address());
            }
            slot.clone()
        };
        match attach {
            Some((stack, wrapper)) => {
                session.set_attribute(STUN_STACK, SessionAttribute::StunStack(stack));
                session.set_attribute(CONNECTION, SessionAttribute::Connection(wrapper.clone()));
                wrapper.install_session(session.clone());
            }
            None => debug!(
                "no pending stack or socket for {}",
                session.local_address()
            ),
        }
    }

    /// Detaches the session from its wrapper without closing the wrapper.
    pub fn session_closed(&self, session: &Arc<IceSession>) {
        if let Some(wrapper) = session.connection() {
            wrapper.detach_session(session);
        }
    }

    /// Data-path exceptions close the offending session, never the
    /// acceptor.
    pub fn exception_caught(&self, session: &Arc<IceSession>, err: &Error) {
        warn!("exception on session {}: {err}", session.id());
        session.close();
    }

    pub fn session_idle(&self, _session: &Arc<IceSession>) {}
}
