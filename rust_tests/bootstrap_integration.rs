//! Integration tests for the rendered envoy bootstrap

use envoy_harness::bootstrap::{render_bootstrap, write_bootstrap, ADMIN_PORT, BOOTSTRAP_FILE_NAME};
use serde_yaml::Value;

fn parse(rendered: &str) -> Value {
    serde_yaml::from_str(rendered).expect("bootstrap is valid YAML")
}

fn xds_socket(doc: &Value) -> &Value {
    &doc["static_resources"]["clusters"][0]["hosts"][0]["socket_address"]
}

#[test]
fn test_slots_are_substituted_for_many_inputs() {
    let cases = [
        ("localhost", 8081u32),
        ("10.0.0.1", 9901),
        ("192.168.100.200", 1),
        ("gloo.gloo-system.svc.cluster.local", 65535),
    ];

    for (addr, port) in cases {
        let doc = parse(&render_bootstrap(addr, port));
        let socket = xds_socket(&doc);
        assert_eq!(socket["address"].as_str(), Some(addr), "address for {addr}:{port}");
        assert_eq!(socket["port_value"].as_u64(), Some(u64::from(port)), "port for {addr}:{port}");
    }
}

#[test]
fn test_static_structure() {
    let doc = parse(&render_bootstrap("localhost", 8081));

    assert_eq!(doc["node"]["cluster"].as_str(), Some("ingress"));
    assert_eq!(doc["node"]["id"].as_str(), Some("testnode"));

    let clusters = doc["static_resources"]["clusters"].as_sequence().unwrap();
    assert_eq!(clusters.len(), 1);
    let cluster = &clusters[0];
    assert_eq!(cluster["name"].as_str(), Some("xds_cluster"));
    assert_eq!(cluster["connect_timeout"].as_str(), Some("5.000s"));
    assert_eq!(cluster["type"].as_str(), Some("STRICT_DNS"));
    assert!(cluster["http2_protocol_options"].as_mapping().unwrap().is_empty());

    let ads = &doc["dynamic_resources"]["ads_config"];
    assert_eq!(ads["api_type"].as_str(), Some("GRPC"));
    assert_eq!(
        ads["grpc_services"][0]["envoy_grpc"]["cluster_name"].as_str(),
        Some("xds_cluster")
    );
    assert!(doc["dynamic_resources"]["cds_config"]["ads"].is_mapping());
    assert!(doc["dynamic_resources"]["lds_config"]["ads"].is_mapping());

    let admin = &doc["admin"];
    assert_eq!(admin["access_log_path"].as_str(), Some("/dev/null"));
    assert_eq!(admin["address"]["socket_address"]["address"].as_str(), Some("0.0.0.0"));
    assert_eq!(
        admin["address"]["socket_address"]["port_value"].as_u64(),
        Some(u64::from(ADMIN_PORT))
    );
}

#[test]
fn test_admin_port_does_not_follow_xds_port() {
    let doc = parse(&render_bootstrap("localhost", 19001));
    assert_eq!(
        doc["admin"]["address"]["socket_address"]["port_value"].as_u64(),
        Some(19000)
    );
}

#[test]
fn test_written_file_parses() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(BOOTSTRAP_FILE_NAME);
    write_bootstrap(&path, "10.1.1.1", 7000).unwrap();

    let doc = parse(&std::fs::read_to_string(&path).unwrap());
    assert_eq!(xds_socket(&doc)["address"].as_str(), Some("10.1.1.1"));
    assert_eq!(xds_socket(&doc)["port_value"].as_u64(), Some(7000));
}
