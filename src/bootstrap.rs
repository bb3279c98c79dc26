//! Envoy bootstrap rendering
//!
//! The bootstrap is a fixed template with two slots: the control-plane address
//! and its xDS port. Envoy discovers clusters and listeners over ADS from the
//! static `xds_cluster`; the admin listener is always on port 19000.

use std::fs;
use std::io;
use std::path::Path;

/// File name of the bootstrap inside an instance's temp dir
pub const BOOTSTRAP_FILE_NAME: &str = "envoyconfig.yaml";

/// Admin listener port baked into the template
pub const ADMIN_PORT: u16 = 19000;

/// Render the bootstrap for a control plane reachable at `control_plane_addr:xds_port`.
///
/// Inputs are not validated; a malformed address yields an envoy that fails
/// to connect at runtime.
pub fn render_bootstrap(control_plane_addr: &str, xds_port: u32) -> String {
    format!(
        r#"
node:
 cluster: ingress
 id: testnode

static_resources:
  clusters:
  - name: xds_cluster
    connect_timeout: 5.000s
    hosts:
    - socket_address:
        address: {control_plane_addr}
        port_value: {xds_port}
    http2_protocol_options: {{}}
    type: STRICT_DNS

dynamic_resources:
  ads_config:
    api_type: GRPC
    grpc_services:
    - envoy_grpc: {{cluster_name: xds_cluster}}
  cds_config:
    ads: {{}}
  lds_config:
    ads: {{}}

admin:
  access_log_path: /dev/null
  address:
    socket_address:
      address: 0.0.0.0
      port_value: {ADMIN_PORT}
"#
    )
}

/// Render and write the bootstrap to `path`, replacing any previous content
pub fn write_bootstrap(path: &Path, control_plane_addr: &str, xds_port: u32) -> io::Result<()> {
    fs::write(path, render_bootstrap(control_plane_addr, xds_port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_both_slots() {
        let rendered = render_bootstrap("10.0.0.7", 9977);
        assert!(rendered.contains("        address: 10.0.0.7\n"));
        assert!(rendered.contains("        port_value: 9977\n"));
    }

    #[test]
    fn test_admin_port_is_fixed() {
        let rendered = render_bootstrap("localhost", 8081);
        assert!(rendered.contains("      port_value: 19000\n"));
        assert_eq!(rendered.matches("port_value:").count(), 2);
    }

    #[test]
    fn test_braces_are_literal() {
        let rendered = render_bootstrap("localhost", 8081);
        assert!(rendered.contains("http2_protocol_options: {}"));
        assert!(rendered.contains("- envoy_grpc: {cluster_name: xds_cluster}"));
    }

    #[test]
    fn test_write_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BOOTSTRAP_FILE_NAME);
        write_bootstrap(&path, "localhost", 9901).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, render_bootstrap("localhost", 9901));
    }
}
