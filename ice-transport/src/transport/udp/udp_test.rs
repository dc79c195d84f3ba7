use super::*;
use crate::classifier::MAGIC_COOKIE;
use crate::dispatcher::{EventDispatcher, MessageEventHandler};
use crate::stack::StunMessageEvent;
use shared::error::Result;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct CountingListener {
    count: AtomicUsize,
}

impl MessageEventHandler for CountingListener {
    fn handle_message_event(&self, _event: &StunMessageEvent) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn free_udp_addr() -> TransportAddress {
    let probe = std::net::UdpSocket::bind("127.0.0.1:0").expect("probe bind");
    let port = probe.local_addr().expect("probe addr").port();
    drop(probe);
    TransportAddress::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        shared::TransportProtocol::UDP,
    )
}

fn binding_request() -> Vec<u8> {
    let mut buf = vec![0u8; 20];
    buf[1] = 0x01;
    buf[4..8].copy_from_slice(&MAGIC_COOKIE);
    buf
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_inbound_traffic_synthesizes_a_session() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let transport = IceUdpTransport::instance("udp-e2e-test");
    let local = free_udp_addr();
    let wrapper = IceSocketWrapper::with_transport_id(local, "udp-e2e-test");
    let dispatcher = Arc::new(EventDispatcher::new());
    let requests = Arc::new(CountingListener::default());
    dispatcher.add_request_listener(requests.clone());

    transport
        .add_binding_with(dispatcher.clone(), wrapper.clone())
        .await?;
    assert!(transport.is_bound(local.port));

    let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let peer_addr = TransportAddress::udp(peer.local_addr()?);

    // a connectivity check synthesizes the session and reaches the stack
    peer.send_to(&binding_request(), local.socket_addr()).await?;
    assert!(wait_until(|| requests.count.load(Ordering::SeqCst) == 1).await);
    let session = wrapper.session().expect("session installed");
    assert_eq!(session.remote_address(), peer_addr);

    // DTLS on the same 5-tuple lands in the wrapper's queue
    let record = [
        0x16u8, 0xFE, 0xFD, 0, 0, 0, 0, 0, 0, 0, 1, 0, 3, 0xAA, 0xBB, 0xCC,
    ];
    peer.send_to(&record, local.socket_addr()).await?;
    assert!(wait_until(|| wrapper.pending_messages() == 1).await);
    let message = wrapper.read().expect("queued record");
    assert_eq!(message.len(), record.len());
    assert_eq!(message.remote_address(), peer_addr);

    // and the wrapper can answer over the synthesized session
    wrapper.send(b"response", peer_addr).await?;
    let mut buf = [0u8; 32];
    let (n, from) = peer.recv_from(&mut buf).await?;
    assert_eq!(&buf[..n], b"response");
    assert_eq!(from, local.socket_addr());

    IceUdpTransport::reset("udp-e2e-test").await;
    Ok(())
}

#[tokio::test]
async fn test_remove_binding_detaches_sessions() -> Result<()> {
    let transport = IceUdpTransport::instance("udp-unbind-test");
    let local = free_udp_addr();
    let wrapper = IceSocketWrapper::with_transport_id(local, "udp-unbind-test");
    let dispatcher = Arc::new(EventDispatcher::new());
    transport
        .add_binding_with(dispatcher, wrapper.clone())
        .await?;

    let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    peer.send_to(&binding_request(), local.socket_addr()).await?;
    assert!(wait_until(|| wrapper.session().is_some()).await);

    assert!(transport.remove_binding(local).await);
    assert!(!transport.is_bound(local.port));
    // the session is gone but the wrapper stays open
    assert!(wrapper.session().is_none());
    assert!(!wrapper.is_closed());
    // unbinding twice reports failure
    assert!(!transport.remove_binding(local).await);

    IceUdpTransport::reset("udp-unbind-test").await;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_binding_fails() -> Result<()> {
    let transport = IceUdpTransport::instance("udp-dup-test");
    let local = free_udp_addr();
    transport.add_binding(local).await?;
    assert!(matches!(
        transport.add_binding(local).await,
        Err(Error::ErrBindFailed)
    ));

    IceUdpTransport::reset("udp-dup-test").await;
    Ok(())
}
