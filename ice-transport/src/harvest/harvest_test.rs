use super::*;
use crate::candidate::{Component, COMPONENT_RTP};
use crate::dispatcher::EventDispatcher;

fn component() -> Component {
    Component::new(COMPONENT_RTP, Arc::new(EventDispatcher::new()))
}

#[tokio::test]
async fn test_harvest_rejects_bad_port_ranges() {
    let mut harvester = HostCandidateHarvester::with_transport_id("harvest-ports-test");
    let component = component();
    let bad_ranges = [
        (5000u16, 1000u16, 6000u16), // min below the dynamic range
        (5000, 6000, 4000),          // min above max
        (1500, 2000, 3000),          // preferred outside [min, max]
    ];
    for (preferred, min, max) in bad_ranges {
        let result = harvester
            .harvest(&component, preferred, min, max, TransportProtocol::UDP)
            .await;
        assert!(
            matches!(result, Err(Error::ErrIllegalArgument(_))),
            "range ({preferred}, {min}, {max}) should be rejected, got {result:?}"
        );
    }
    assert_eq!(harvester.harvest_statistics().candidate_count, 0);
    assert_eq!(component.local_candidate_count(), 0);
}

#[tokio::test]
async fn test_bind_retries_are_bounded() {
    // a socket without SO_REUSEADDR keeps the port genuinely busy
    let occupied = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind blocker");
    let port = occupied.local_addr().expect("local addr").port();

    let harvester = HostCandidateHarvester::with_transport_id("bind-retries-test");
    let result = harvester
        .create_datagram_socket("127.0.0.1".parse().unwrap(), port, port, port)
        .await;
    assert!(matches!(result, Err(Error::ErrBindFailed)));

    IceUdpTransport::reset("bind-retries-test").await;
}

#[tokio::test]
async fn test_bind_retry_wraps_to_next_free_port() {
    let occupied = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind blocker");
    let port = occupied.local_addr().expect("local addr").port();
    if port == u16::MAX {
        return;
    }

    let harvester = HostCandidateHarvester::with_transport_id("bind-wrap-test");
    let wrapper = harvester
        .create_datagram_socket("127.0.0.1".parse().unwrap(), port, port, port + 1)
        .await
        .expect("second port should be free");
    assert_eq!(wrapper.transport_address().port, port + 1);

    // the wrapper owns the binding, so closing it unbinds the port
    wrapper.close().await;
    let transport = IceUdpTransport::instance("bind-wrap-test");
    assert!(!transport.is_bound(port + 1));

    IceUdpTransport::reset("bind-wrap-test").await;
}

#[tokio::test]
async fn test_loopback_only_interfaces_yield_no_candidates() {
    let mut harvester = HostCandidateHarvester::with_transport_id("loopback-harvest-test");
    let component = component();
    let interfaces = vec![
        NetInterface {
            name: "lo".to_owned(),
            addrs: vec!["127.0.0.1".parse().unwrap()],
            is_loopback: true,
            is_virtual: false,
        },
        // non-loopback interface carrying only a loopback address: the
        // address filter still rejects it
        NetInterface {
            name: "dummy0".to_owned(),
            addrs: vec!["127.0.0.3".parse().unwrap()],
            is_loopback: false,
            is_virtual: false,
        },
    ];

    let result = harvester
        .harvest_interfaces(
            &component,
            interfaces,
            49160,
            49152,
            49200,
            TransportProtocol::UDP,
        )
        .await;
    assert!(matches!(result, Err(Error::ErrNoBoundCandidate)));
    assert_eq!(harvester.harvest_statistics().candidate_count, 0);
    assert!(harvester.harvest_statistics().started.is_none());

    IceUdpTransport::reset("loopback-harvest-test").await;
}

#[tokio::test]
async fn test_harvest_on_machine_interfaces() {
    let mut harvester = HostCandidateHarvester::with_transport_id("machine-harvest-test");
    let component = component();
    let result = harvester
        .harvest(&component, 49210, 49152, 49400, TransportProtocol::UDP)
        .await;

    match result {
        Ok(()) => {
            assert!(component.local_candidate_count() >= 1);
            assert_eq!(
                harvester.harvest_statistics().candidate_count,
                component.local_candidate_count()
            );
            for candidate in component.local_candidates() {
                assert_eq!(candidate.transport(), TransportProtocol::UDP);
                assert!(!candidate.transport_address().ip.is_loopback());
                assert!((49152..=49400).contains(&candidate.transport_address().port));
            }
            component.close().await;
        }
        // machines with nothing but loopback genuinely have no host
        // candidates to offer
        Err(Error::ErrNoBoundCandidate) => {
            assert_eq!(harvester.harvest_statistics().candidate_count, 0);
        }
        Err(other) => panic!("unexpected harvest failure: {other}"),
    }

    IceUdpTransport::reset("machine-harvest-test").await;
}
