use super::*;
use crate::classifier::MAGIC_COOKIE;
use crate::dispatcher::{EventDispatcher, MessageEventHandler};
use crate::stack::StunMessageEvent;
use shared::error::Result;
use shared::tcp_framing::{frame_packet, TcpFrameDecoder};
use shared::TransportProtocol;
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

fn free_tcp_addr() -> TransportAddress {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    let port = probe.local_addr().expect("probe addr").port();
    drop(probe);
    TransportAddress::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        TransportProtocol::TCP,
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
async fn test_accepted_connection_demuxes_framed_traffic() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let transport = IceTcpTransport::instance("tcp-e2e-test");
    let local = free_tcp_addr();
    let wrapper = IceSocketWrapper::with_transport_id(local, "tcp-e2e-test");
    let dispatcher = Arc::new(EventDispatcher::new());
    let requests = Arc::new(CountingListener::default());
    dispatcher.add_request_listener(requests.clone());

    transport
        .add_binding_with(dispatcher.clone(), wrapper.clone())
        .await?;
    assert!(transport.is_bound(local.port));

    let mut client = TcpStream::connect(local.socket_addr()).await?;
    let client_addr = TransportAddress::tcp(client.local_addr()?);

    // framed STUN reaches the stack once the session opens
    client
        .write_all(&frame_packet(&binding_request())?)
        .await?;
    assert!(wait_until(|| requests.count.load(Ordering::SeqCst) == 1).await);
    let session = wrapper.session().expect("session installed on accept");
    assert_eq!(session.remote_address(), client_addr);

    // a frame delivered byte-by-byte still comes out whole
    let media = frame_packet(b"opaque media payload")?;
    for chunk in media.chunks(3) {
        client.write_all(chunk).await?;
    }
    assert!(wait_until(|| wrapper.pending_messages() == 1).await);
    let message = wrapper.read().expect("queued frame");
    assert_eq!(message.bytes(), b"opaque media payload");

    // the answer comes back RFC 4571 framed
    wrapper.send(b"pong", client_addr).await?;
    let mut deframer = TcpFrameDecoder::new();
    let mut buf = [0u8; 64];
    let frame = loop {
        let n = client.read(&mut buf).await?;
        assert!(n > 0, "server closed unexpectedly");
        deframer.extend_from_slice(&buf[..n]);
        if let Some(frame) = deframer.next_frame() {
            break frame;
        }
    };
    assert_eq!(&frame[..], b"pong");

    IceTcpTransport::reset("tcp-e2e-test").await;
    Ok(())
}

#[tokio::test]
async fn test_connect_originates_a_framed_session() -> Result<()> {
    let transport = IceTcpTransport::instance("tcp-connect-test");
    let server = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let server_addr = TransportAddress::tcp(server.local_addr()?);
    let local = free_tcp_addr();

    let session = transport.connect(server_addr, local).await?;
    assert_eq!(session.remote_address(), server_addr);

    let (mut accepted, _) = server.accept().await?;
    session.write(b"hello").await?;

    let mut deframer = TcpFrameDecoder::new();
    let mut buf = [0u8; 64];
    let frame = loop {
        let n = accepted.read(&mut buf).await?;
        assert!(n > 0, "client closed unexpectedly");
        deframer.extend_from_slice(&buf[..n]);
        if let Some(frame) = deframer.next_frame() {
            break frame;
        }
    };
    assert_eq!(&frame[..], b"hello");

    IceTcpTransport::reset("tcp-connect-test").await;
    Ok(())
}

#[tokio::test]
async fn test_peer_disconnect_closes_the_session() -> Result<()> {
    let transport = IceTcpTransport::instance("tcp-close-test");
    let local = free_tcp_addr();
    let wrapper = IceSocketWrapper::with_transport_id(local, "tcp-close-test");
    let dispatcher = Arc::new(EventDispatcher::new());
    transport
        .add_binding_with(dispatcher, wrapper.clone())
        .await?;

    let client = TcpStream::connect(local.socket_addr()).await?;
    assert!(wait_until(|| wrapper.session().is_some()).await);

    drop(client);
    assert!(wait_until(|| wrapper.session().is_none()).await);
    assert!(!wrapper.is_closed());

    IceTcpTransport::reset("tcp-close-test").await;
    Ok(())
}
