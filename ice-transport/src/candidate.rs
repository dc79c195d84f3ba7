//! Host candidates and the component that owns them.

use crate::socket::IceSocketWrapper;
use crate::stack::StunStack;
use parking_lot::Mutex;
use shared::{TransportAddress, TransportProtocol};
use std::sync::Arc;

/// Component id of the RTP stream.
pub const COMPONENT_RTP: u16 = 1;
/// Component id of the RTCP stream.
pub const COMPONENT_RTCP: u16 = 2;

/// A local transport address with a bound socket, offered as an ICE
/// candidate. Created by the harvester, owned by its [`Component`],
/// destroyed when the component closes.
#[derive(Clone)]
pub struct HostCandidate {
    socket: Arc<IceSocketWrapper>,
    component_id: u16,
    transport: TransportProtocol,
    is_virtual: bool,
}

impl HostCandidate {
    pub fn new(
        socket: Arc<IceSocketWrapper>,
        component_id: u16,
        transport: TransportProtocol,
    ) -> Self {
        Self {
            socket,
            component_id,
            transport,
            is_virtual: false,
        }
    }

    pub fn socket(&self) -> &Arc<IceSocketWrapper> {
        &self.socket
    }

    pub fn transport_address(&self) -> TransportAddress {
        self.socket.transport_address()
    }

    pub fn component_id(&self) -> u16 {
        self.component_id
    }

    pub fn transport(&self) -> TransportProtocol {
        self.transport
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn set_virtual(&mut self, is_virtual: bool) {
        self.is_virtual = is_virtual;
    }
}

/// One media-stream component (RTP or RTCP): the owner of the host
/// candidates harvested for it and the holder of the STUN stack consuming
/// their signaling.
pub struct Component {
    component_id: u16,
    stun_stack: Arc<dyn StunStack>,
    local_candidates: Mutex<Vec<HostCandidate>>,
}

impl Component {
    pub fn new(component_id: u16, stun_stack: Arc<dyn StunStack>) -> Self {
        Self {
            component_id,
            stun_stack,
            local_candidates: Mutex::new(Vec::new()),
        }
    }

    pub fn component_id(&self) -> u16 {
        self.component_id
    }

    pub fn stun_stack(&self) -> Arc<dyn StunStack> {
        self.stun_stack.clone()
    }

    pub fn add_local_candidate(&self, candidate: HostCandidate) {
        self.local_candidates.lock().push(candidate);
    }

    pub fn local_candidate_count(&self) -> usize {
        self.local_candidates.lock().len()
    }

    pub fn local_candidates(&self) -> Vec<HostCandidate> {
        self.local_candidates.lock().clone()
    }

    /// Closes every candidate socket and forgets the candidates.
    pub async fn close(&self) {
        let candidates: Vec<_> = self.local_candidates.lock().drain(..).collect();
        for candidate in candidates {
            candidate.socket().close().await;
        }
    }
}
