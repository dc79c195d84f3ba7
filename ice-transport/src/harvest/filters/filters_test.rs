use super::*;
use shared::error::Result;

fn known() -> Vec<String> {
    vec!["lo".to_owned(), "eth0".to_owned(), "eth1".to_owned()]
}

#[test]
fn test_allowed_list_wins_over_blocked_list() -> Result<()> {
    let filter = InterfaceFilter::initialize(
        Some(vec!["eth0".to_owned()]),
        Some(vec!["eth0".to_owned(), "eth1".to_owned()]),
        &known(),
    )?;
    assert!(filter.is_interface_allowed("eth0"));
    assert!(!filter.is_interface_allowed("eth1"));
    assert!(!filter.is_interface_allowed("lo"));
    Ok(())
}

#[test]
fn test_blocked_list_used_without_allowed_list() -> Result<()> {
    let filter = InterfaceFilter::initialize(None, Some(vec!["eth1".to_owned()]), &known())?;
    assert!(filter.is_interface_allowed("eth0"));
    assert!(!filter.is_interface_allowed("eth1"));
    Ok(())
}

#[test]
fn test_empty_configuration_allows_everything() -> Result<()> {
    let filter = InterfaceFilter::initialize(None, None, &known())?;
    assert!(filter.is_interface_allowed("eth0"));
    assert!(filter.is_interface_allowed("anything"));
    Ok(())
}

#[test]
fn test_unknown_interface_name_is_a_config_error() {
    let result = InterfaceFilter::initialize(Some(vec!["wlan7".to_owned()]), None, &known());
    assert_eq!(
        result.err(),
        Some(Error::ErrConfig(
            "there is no network interface with the name wlan7".to_owned()
        ))
    );

    let result = InterfaceFilter::initialize(None, Some(vec!["wlan7".to_owned()]), &known());
    assert!(matches!(result, Err(Error::ErrConfig(_))));
}

#[test]
fn test_blocking_every_interface_is_a_config_error() {
    let result = InterfaceFilter::initialize(None, Some(known()), &known());
    assert_eq!(
        result.err(),
        Some(Error::ErrConfig(
            "all network interfaces are blocked".to_owned()
        ))
    );
}

#[test]
fn test_loopback_is_never_allowed() {
    let loopback: IpAddr = "127.0.0.1".parse().unwrap();
    let loopback6: IpAddr = "::1".parse().unwrap();

    // even an explicit allowed-list entry can't rescue loopback
    let filter = AddressFilter::new(vec![loopback], vec![], false, false);
    assert!(!filter.is_address_allowed(&loopback));
    assert!(!filter.is_address_allowed(&loopback6));
    assert!(!filter.admits(&loopback));
}

#[test]
fn test_address_allow_and_block_lists() {
    let a: IpAddr = "10.0.0.1".parse().unwrap();
    let b: IpAddr = "10.0.0.2".parse().unwrap();
    let c: IpAddr = "10.0.0.3".parse().unwrap();

    let filter = AddressFilter::new(vec![a, b], vec![b], false, false);
    assert!(filter.is_address_allowed(&a));
    // blocked wins even when explicitly allowed
    assert!(!filter.is_address_allowed(&b));
    // not on the allowed list
    assert!(!filter.is_address_allowed(&c));

    let unrestricted = AddressFilter::new(vec![], vec![b], false, false);
    assert!(unrestricted.is_address_allowed(&a));
    assert!(!unrestricted.is_address_allowed(&b));
}

#[test]
fn test_ipv6_gating() {
    let v6: IpAddr = "2001:db8::5".parse().unwrap();
    let link_local: IpAddr = "fe80::1".parse().unwrap();
    let v4: IpAddr = "10.0.0.1".parse().unwrap();

    let no_v6 = AddressFilter::new(vec![], vec![], true, false);
    assert!(!no_v6.admits(&v6));
    assert!(!no_v6.admits(&link_local));
    assert!(no_v6.admits(&v4));
    // the allow/block layer itself still passes IPv6
    assert!(no_v6.is_address_allowed(&v6));

    let no_link_local = AddressFilter::new(vec![], vec![], false, true);
    assert!(no_link_local.admits(&v6));
    assert!(!no_link_local.admits(&link_local));
}
