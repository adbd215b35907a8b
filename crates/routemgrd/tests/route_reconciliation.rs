//! End-to-end reconciliation scenarios against the fake kernel

use std::path::Path;

use pretty_assertions::assert_eq;
use sysvm_cfgmgr_common::{AddressFamily, CfgMgrError};
use sysvm_cfgmgr_test::{
    kernel_with_default_route, pristine_kernel, KernelVerifier, MockKernel, RT_TABLES_PATH,
};
use sysvm_routemgrd::{
    ReconciliationOutcome, RouteMgr, RouteMgrConfig, SkipReason, TableRegistry,
};

fn route_mgr(kernel: &MockKernel) -> RouteMgr<MockKernel> {
    RouteMgr::new(kernel.clone(), TableRegistry::new(RT_TABLES_PATH))
}

#[tokio::test]
async fn test_network_route_is_idempotent() {
    let kernel = pristine_kernel();
    let routes = route_mgr(&kernel);

    let first = routes.add_network_route("eth1", "10.0.2.0/24").await.unwrap();
    assert_eq!(first, ReconciliationOutcome::Added);
    assert_eq!(
        kernel.issued(),
        vec!["ip route add throw 10.0.2.0/24 table Table_eth1 proto static".to_string()]
    );

    kernel.clear_log();
    let second = routes.add_network_route("eth1", "10.0.2.0/24").await.unwrap();
    assert_eq!(second, ReconciliationOutcome::Skipped(SkipReason::AlreadyPresent));

    let verifier = KernelVerifier::new(&kernel);
    verifier.assert_nothing_issued().unwrap();
    verifier
        .assert_route_present(AddressFamily::V4, Some("Table_eth1"), "throw 10.0.2.0/24 proto static")
        .unwrap();
}

#[tokio::test]
async fn test_interface_bring_up() {
    let kernel = pristine_kernel().with_rule(AddressFamily::V4, "32765:\tfrom all lookup Table_eth2");
    let routes = route_mgr(&kernel);

    let table = routes.register_table("eth2").await.unwrap();
    assert_eq!(table.registry_entry(), "102 Table_eth2");

    routes.add_route("eth2", "10.0.3.1").await.unwrap();
    routes.add_network_route("eth2", "10.0.3.0/24").await.unwrap();

    assert_eq!(
        kernel.issued(),
        vec![
            "ip rule delete from all table Table_eth2".to_string(),
            "ip route add default via 10.0.3.1 table Table_eth2 proto static".to_string(),
            "ip route add throw 10.0.3.0/24 table Table_eth2 proto static".to_string(),
        ]
    );

    let verifier = KernelVerifier::new(&kernel);
    verifier
        .assert_no_rule(AddressFamily::V4, "from all lookup Table_eth2")
        .unwrap();
    verifier
        .assert_registry_count(Path::new(RT_TABLES_PATH), "102 Table_eth2", 1)
        .unwrap();
    assert_eq!(kernel.routes(AddressFamily::V4, Some("Table_eth2")).len(), 2);
}

#[tokio::test]
async fn test_repeated_registration_is_stable() {
    let kernel = pristine_kernel();
    let routes = route_mgr(&kernel);

    for _ in 0..3 {
        let table = routes.register_table("eth3").await.unwrap();
        assert_eq!(table.number, 103);
        assert_eq!(table.name, "Table_eth3");
    }

    KernelVerifier::new(&kernel)
        .assert_registry_count(Path::new(RT_TABLES_PATH), "103 Table_eth3", 1)
        .unwrap();
    // the distribution entries are untouched
    assert_eq!(kernel.file_lines(Path::new(RT_TABLES_PATH)).len(), 8);
}

#[tokio::test]
async fn test_partial_input_is_skipped() {
    let kernel = pristine_kernel();
    let routes = route_mgr(&kernel);

    let outcome = routes.add_route("eth1", "").await.unwrap();
    assert_eq!(outcome, ReconciliationOutcome::Skipped(SkipReason::MissingAddress));
    assert_eq!(outcome.to_string(), "skipped-invalid-input (address)");
    KernelVerifier::new(&kernel).assert_nothing_issued().unwrap();
}

#[tokio::test]
async fn test_default_route_policies_differ() {
    let preserve = kernel_with_default_route("10.0.0.1", "eth0");
    let routes = route_mgr(&preserve);
    assert!(!routes.default_routes().add_default_route("10.0.0.2").await.unwrap());
    KernelVerifier::new(&preserve).assert_nothing_issued().unwrap();

    let follow = kernel_with_default_route("10.0.0.1", "eth0");
    let routes = route_mgr(&follow);
    assert!(routes
        .default_routes()
        .add_or_change_default_route("10.0.0.2")
        .await
        .unwrap());
    KernelVerifier::new(&follow)
        .assert_issued("ip route change default via 10.0.0.2")
        .unwrap();
    KernelVerifier::new(&follow)
        .assert_route_present(AddressFamily::V4, None, "default via 10.0.0.2")
        .unwrap();
}

#[tokio::test]
async fn test_missing_gateway_is_rejected_before_any_command() {
    let kernel = kernel_with_default_route("10.0.0.1", "eth0");
    let routes = route_mgr(&kernel);
    let defaults = routes.default_routes();

    let err = defaults.add_default_route("").await.unwrap_err();
    assert_eq!(err.to_string(), "Gateway cannot be empty for add_default_route");
    assert!(matches!(
        defaults.add_or_change_default_route("").await,
        Err(CfgMgrError::MissingGateway { .. })
    ));

    assert!(kernel.issued().is_empty());
    assert!(kernel.queries().is_empty());
}

#[tokio::test]
async fn test_ipv6_default_route() {
    let kernel = pristine_kernel();
    let routes = route_mgr(&kernel);
    let defaults = routes.default_routes();

    assert!(defaults.add_default_route_v6("fd80:20:20:20::1").await.unwrap());
    assert_eq!(
        kernel.issued(),
        vec!["ip -6 route add default via fd80:20:20:20::1".to_string()]
    );

    kernel.clear_log();
    assert!(!defaults.add_default_route_v6("fd80:20:20:20::1").await.unwrap());
    KernelVerifier::new(&kernel).assert_nothing_issued().unwrap();

    // IPv4 is a separate namespace
    assert!(!routes.default_route_exists(AddressFamily::V4).await.unwrap());
}

#[tokio::test]
async fn test_role_driven_default_route() {
    let config = RouteMgrConfig::from_toml(sysvm_cfgmgr_test::appliance_fixtures::vpc_router()).unwrap();
    let kernel = kernel_with_default_route("10.0.0.1", "eth0");
    let routes = route_mgr(&kernel);

    assert!(routes
        .default_routes()
        .apply_for_role(&config.appliance, "10.0.0.254")
        .await
        .unwrap());
    KernelVerifier::new(&kernel)
        .assert_issued("ip route change default via 10.0.0.254")
        .unwrap();
}

#[tokio::test]
async fn test_kernel_failure_is_propagated_without_retry() {
    let kernel = pristine_kernel().fail_on("throw 10.0.2.0/24");
    let routes = route_mgr(&kernel);

    let err = routes.add_network_route("eth1", "10.0.2.0/24").await.unwrap_err();
    assert!(err.is_command_failure());
    assert_eq!(kernel.issued().len(), 1);
    assert!(kernel.routes(AddressFamily::V4, Some("Table_eth1")).is_empty());
}

#[tokio::test]
async fn test_invalid_device_name_fails_registration() {
    let kernel = pristine_kernel();
    let err = route_mgr(&kernel).register_table("bond").await.unwrap_err();
    assert!(matches!(err, CfgMgrError::InvalidDeviceName { ref device } if device == "bond"));
    KernelVerifier::new(&kernel).assert_nothing_issued().unwrap();
}
