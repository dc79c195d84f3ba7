//! Fan-out of parsed STUN messages to registered listeners.
//!
//! The registry is a two-level tree: generic listeners at the root fire for
//! matching messages on any local address, and one child dispatcher per
//! local [`TransportAddress`] holds the address-scoped listeners. A
//! registration is identified by `(message type, delegate)`, so adding the
//! same pair twice is a no-op and removing it once removes it fully.


use crate::stack::{StunMessageEvent, StunStack};
use parking_lot::{Mutex, RwLock};
use shared::TransportAddress;
use std::collections::HashMap;
use std::sync::Arc;

/// Class bits of the request class.
pub const STUN_REQUEST: u16 = 0x0000;
/// Class bits of the indication class.
pub const STUN_INDICATION: u16 = 0x0010;
/// Type carried by legacy (pre-RFC 5389) DATA indications after masking.
pub const OLD_INDICATION: u16 = 0x0110;
/// Mask extracting the two class bits from a raw STUN message type.
pub const MESSAGE_TYPE_CLASS_MASK: u16 = 0x0110;

/// A delegate notified when a STUN message of the type it registered for
/// arrives.
pub trait MessageEventHandler: Send + Sync {
    fn handle_message_event(&self, event: &StunMessageEvent);
}

/// A registered `(message type, delegate)` pair.
#[derive(Clone)]
struct MessageTypeEventHandler {
    message_type: u16,
    delegate: Arc<dyn MessageEventHandler>,
}

impl MessageTypeEventHandler {
    fn matches(&self, other: &MessageTypeEventHandler) -> bool {
        self.message_type == other.message_type && Arc::ptr_eq(&self.delegate, &other.delegate)
    }
}

/// The listener registry. See the module docs for the tree shape.
#[derive(Default)]
pub struct EventDispatcher {
    message_listeners: RwLock<Vec<MessageTypeEventHandler>>,
    children: Mutex<HashMap<TransportAddress, Arc<EventDispatcher>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_message_listener(&self, listener: MessageTypeEventHandler) {
        let mut listeners = self.message_listeners.write();
        if !listeners.iter().any(|l| l.matches(&listener)) {
            listeners.push(listener);
        }
    }

    fn add_message_listener_for(&self, local_addr: TransportAddress, listener: MessageTypeEventHandler) {
        let child = {
            let mut children = self.children.lock();
            children
                .entry(local_addr)
                .or_insert_with(|| Arc::new(EventDispatcher::new()))
                .clone()
        };
        child.add_message_listener(listener);
    }

    fn remove_message_listener(&self, listener: &MessageTypeEventHandler) {
        self.message_listeners.write().retain(|l| !l.matches(listener));
    }

    fn remove_message_listener_for(
        &self,
        local_addr: TransportAddress,
        listener: &MessageTypeEventHandler,
    ) {
        let child = self.children.lock().get(&local_addr).cloned();
        if let Some(child) = child {
            child.remove_message_listener(listener);
        }
    }

    /// Registers a listener for requests arriving on any local address.
    pub fn add_request_listener(&self, listener: Arc<dyn MessageEventHandler>) {
        self.add_message_listener(MessageTypeEventHandler {
            message_type: STUN_REQUEST,
            delegate: listener,
        });
    }

    /// Registers a listener for requests arriving on `local_addr` only.
    pub fn add_request_listener_for(
        &self,
        local_addr: TransportAddress,
        listener: Arc<dyn MessageEventHandler>,
    ) {
        self.add_message_listener_for(
            local_addr,
            MessageTypeEventHandler {
                message_type: STUN_REQUEST,
                delegate: listener,
            },
        );
    }

    /// Registers a listener for indications arriving on `local_addr`.
    pub fn add_indication_listener(
        &self,
        local_addr: TransportAddress,
        listener: Arc<dyn MessageEventHandler>,
    ) {
        self.add_message_listener_for(
            local_addr,
            MessageTypeEventHandler {
                message_type: STUN_INDICATION,
                delegate: listener,
            },
        );
    }

    /// Registers a listener for legacy DATA indications (masked type
    /// 0x0110) arriving on `local_addr`.
    pub fn add_old_indication_listener(
        &self,
        local_addr: TransportAddress,
        listener: Arc<dyn MessageEventHandler>,
    ) {
        self.add_message_listener_for(
            local_addr,
            MessageTypeEventHandler {
                message_type: OLD_INDICATION,
                delegate: listener,
            },
        );
    }

    pub fn remove_request_listener(&self, listener: &Arc<dyn MessageEventHandler>) {
        self.remove_message_listener(&MessageTypeEventHandler {
            message_type: STUN_REQUEST,
            delegate: listener.clone(),
        });
    }

    pub fn remove_request_listener_for(
        &self,
        local_addr: TransportAddress,
        listener: &Arc<dyn MessageEventHandler>,
    ) {
        self.remove_message_listener_for(
            local_addr,
            &MessageTypeEventHandler {
                message_type: STUN_REQUEST,
                delegate: listener.clone(),
            },
        );
    }

    pub fn remove_indication_listener(
        &self,
        local_addr: TransportAddress,
        listener: &Arc<dyn MessageEventHandler>,
    ) {
        self.remove_message_listener_for(
            local_addr,
            &MessageTypeEventHandler {
                message_type: STUN_INDICATION,
                delegate: listener.clone(),
            },
        );
    }

    pub fn remove_old_indication_listener(
        &self,
        local_addr: TransportAddress,
        listener: &Arc<dyn MessageEventHandler>,
    ) {
        self.remove_message_listener_for(
            local_addr,
            &MessageTypeEventHandler {
                message_type: OLD_INDICATION,
                delegate: listener.clone(),
            },
        );
    }

    /// Delivers the event to every matching listener: generic listeners in
    /// registration order first, then the listeners scoped to the event's
    /// local address.
    pub fn fire_message_event(&self, event: &StunMessageEvent) {
        let message_type = event.message_type() & MESSAGE_TYPE_CLASS_MASK;
        let listeners = self.message_listeners.read().clone();
        for listener in &listeners {
            if listener.message_type == message_type {
                listener.delegate.handle_message_event(event);
            }
        }
        let child = self.children.lock().get(&event.local_address()).cloned();
        if let Some(child) = child {
            child.fire_message_event(event);
        }
    }

    /// Whether any listener (generic ones count) would see a request
    /// arriving on `local_addr`.
    pub fn has_request_listeners(&self, local_addr: TransportAddress) -> bool {
        if !self.message_listeners.read().is_empty() {
            return true;
        }
        let child = self.children.lock().get(&local_addr).cloned();
        match child {
            Some(child) => !child.message_listeners.read().is_empty(),
            None => false,
        }
    }

    /// Drops every registration at both levels.
    pub fn remove_all_listeners(&self) {
        let mut listeners = self.message_listeners.write();
        let mut children = self.children.lock();
        listeners.clear();
        children.clear();
    }
}

impl StunStack for EventDispatcher {
    fn handle_message_event(&self, event: StunMessageEvent) {
        self.fire_message_event(&event);
    }
}
