// CLASSIFICATION: COMMUNITY
// Filename: config_parse.rs v0.1
// Date Modified: 2026-04-03
// Author: Cohesix Codex

use homegw_init::config::InitConfig;

#[test]
fn full_document_parses() {
    let doc = r#"{
        "version": 12,
        "hostname": "homegw",
        "kexec_encryption_key": "c2VjcmV0",
        "api_server": {
            "listen": "0.0.0.0:8443",
            "certificates": [{"cert": "PEM", "key": "PEM"}],
            "client_keys": [
                {"id": "ops", "secret": "hunter2", "scopes": ["kexec", "debug"]},
                {"id": "car", "secret": "s3cret", "scopes": ["tesla"]}
            ],
            "max_concurrent_quic_connections": 64,
            "stateless_reset_key": "",
            "ext_reset_allowed_pins": ["7"],
            "allow_crash": false
        },
        "ssh_server": {
            "host_key": "aG9zdGtleQ==",
            "authorized_keys": ["ssh-ed25519 AAAA... operator"]
        },
        "disks": [
            {"device": "/dev/sda1", "encrypted_device": "data", "mountpoint": "/data", "luks_key": "a2V5"}
        ],
        "netif": [
            {"name": "eth0", "mode": "static", "ipv4_address": "10.0.0.2/24",
             "ipv4_gateway": "10.0.0.1", "nameservers": ["1.1.1.1"]}
        ],
        "wireguard": [
            {"interface": "wg0", "private_key": "priv", "addresses": ["10.1.0.2/32"],
             "peers": [{"public_key": "pub", "allowed_ips": ["0.0.0.0/0"],
                        "endpoint": "vpn.example:51820", "preshared_key": "",
                        "persistent_keepalive": 25}]}
        ],
        "fs_permissions": [
            {"path": "/data", "name": "", "type": "d", "chmod": "0755", "chown": "1000:1000"}
        ],
        "netboot": {"tftp_root": "/data/tftp"},
        "sysctl": [{"name": "net.ipv4.ip_forward", "value": "1"}],
        "tesla_api": [{"oauth_token": "tok", "vin": "5YJ3000000NEXUS01"}]
    }"#;

    let config: InitConfig = serde_json::from_str(doc).unwrap();
    assert_eq!(config.version, 12);
    assert_eq!(config.hostname, "homegw");
    let api = config.api_server.unwrap();
    assert_eq!(api.listen, "0.0.0.0:8443");
    assert_eq!(api.client_keys.len(), 2);
    assert_eq!(api.client_keys[0].scopes, vec!["kexec", "debug"]);
    assert_eq!(api.max_concurrent_quic_connections, 64);
    assert_eq!(config.disks[0].mountpoint, "/data");
    assert_eq!(config.netif[0].mode, "static");
    assert_eq!(config.wireguard[0].peers[0].persistent_keepalive, 25);
    assert_eq!(config.fs_permissions[0].file_type, "d");
    assert_eq!(config.netboot.unwrap().tftp_root, "/data/tftp");
    assert_eq!(config.tesla_api[0].vin, "5YJ3000000NEXUS01");
}

#[test]
fn minimal_document_uses_defaults() {
    let config: InitConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config.version, 0);
    assert!(config.api_server.is_none());
    assert!(config.ssh_server.is_none());
    assert!(config.disks.is_empty());
    assert!(config.kexec_encryption_key.is_empty());
}

#[test]
fn unknown_fields_are_tolerated() {
    // Collaborators may consume fields the core never looks at.
    let config: InitConfig =
        serde_json::from_str(r#"{"version": 3, "future_field": {"x": 1}}"#).unwrap();
    assert_eq!(config.version, 3);
}
