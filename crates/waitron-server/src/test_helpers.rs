//! Test helpers for waitron-server
//!
//! Provides fixtures and a router backed by manifests in a temporary directory.

use crate::{AppState, Config};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use waitron_common::{BootImage, Interface, MachineDefinition};

/// Minimal bootable definition with one interface
pub fn test_definition(hostname: &str, mac: &str) -> MachineDefinition {
    MachineDefinition {
        hostname: hostname.to_string(),
        domain: "example.com".to_string(),
        network: vec![Interface {
            name: "eth0".to_string(),
            mac_address: mac.to_string(),
            ..Default::default()
        }],
        boot: BootImage {
            image_url: "http://mirror/installer".to_string(),
            kernel: "linux".to_string(),
            initrd: vec!["initrd.gz".to_string()],
            cmdline: "auto=true".to_string(),
        },
        ..Default::default()
    }
}

/// Write an executable shell script
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const CONFIG: &str = r#"
templatepath: templates
machinepath: machines
operatingsystem: debian-12
preseed: preseed.j2
finish: finish.j2
image_url: http://mirror/installer
kernel: linux
initrd: [initrd.gz]
cmdline: "auto=true url={{ base_url }}/template/preseed/{{ hostname }}/{{ token }}"
rescue_image_url: http://mirror/rescue
rescue_kernel: vmlinuz
rescue_initrd: [rescue.img]
"#;

/// A state rooted in a temp dir with machines `web01` and `web02`
pub fn create_test_app_state() -> (AppState, TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();

    let templates = root.join("templates");
    let machines = root.join("machines");
    let vms = root.join("vms");
    for dir in [&templates, &machines, &vms] {
        std::fs::create_dir_all(dir).unwrap();
    }

    std::fs::write(
        templates.join("preseed.j2"),
        "d-i netcfg/get_hostname string {{ hostname }}",
    )
    .unwrap();
    std::fs::write(
        templates.join("finish.j2"),
        "curl {{ base_url }}/done/{{ hostname }}/{{ token }}",
    )
    .unwrap();
    std::fs::write(
        machines.join("web01.yaml"),
        "network:\n  - name: eth0\n    macaddress: \"aa:bb:cc:dd:ee:01\"\n",
    )
    .unwrap();
    std::fs::write(
        machines.join("web02.yaml"),
        "network:\n  - name: eth0\n    macaddress: \"aa:bb:cc:dd:ee:02\"\n",
    )
    .unwrap();
    std::fs::write(vms.join("vm01.yaml"), "cpus: 2\nmemory: 4G\n").unwrap();

    let mut config: Config = serde_yaml::from_str(CONFIG).unwrap();
    config.template_path = templates;
    config.machine_path = machines;
    config.vm_path = Some(vms);
    config.hooks_path = Some(root.join("hooks"));
    config.base_url = "http://waitron:9090".to_string();

    let definitions = Arc::new(config.definition_source());
    (AppState::new(config, definitions), tmp)
}

/// Create a test router with every route
pub fn create_test_router() -> (axum::Router, AppState, TempDir) {
    let (state, tmp) = create_test_app_state();
    (crate::router(state.clone()), state, tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn send_json(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let (status, body) = send(app, method, uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn build(app: &axum::Router, hostname: &str) -> String {
        let (status, json) = send_json(app, "PUT", &format!("/build/{}", hostname)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["State"], "OK");
        json["Token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _tmp) = create_test_router();
        let (status, json) = send_json(&app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"State": "OK"}));
    }

    #[tokio::test]
    async fn test_list_and_config() {
        let (app, _, _tmp) = create_test_router();

        let (status, json) = send_json(&app, "GET", "/list").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!(["web01", "web02"]));

        let (status, json) = send_json(&app, "GET", "/config/web01").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["operating_system"], "debian-12");
        assert_eq!(json["network"][0]["mac_address"], "aa:bb:cc:dd:ee:01");

        let (status, json) = send_json(&app, "GET", "/config/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["Error"].as_str().unwrap().contains("nope"));

        let (status, json) = send_json(&app, "GET", "/config/vm01/vm").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cpus"], 2);
    }

    #[tokio::test]
    async fn test_hooks_listing() {
        let (app, state, _tmp) = create_test_router();
        let hooks = state.config.hooks_path.clone().unwrap();
        write_script(&hooks.join("pre-hook"), "10-ipam", "true");

        let (status, json) = send_json(&app, "GET", "/hooks").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!(["pre-hook/10-ipam"]));
    }

    #[tokio::test]
    async fn test_build_unknown_host() {
        let (app, _, _tmp) = create_test_router();
        let (status, _) = send_json(&app, "PUT", "/build/db01").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_done_with_wrong_token_and_twice() {
        let (app, _, _tmp) = create_test_router();
        let token = build(&app, "web01").await;

        let (status, json) = send_json(&app, "GET", "/done/web01/wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["Error"], "Invalid Token");

        let (status, json) = send_json(&app, "GET", &format!("/done/web01/{}", token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({"State": "OK"}));

        let (status, _) = send_json(&app, "GET", &format!("/done/web01/{}", token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_template_flow_updates_status() {
        let (app, _, _tmp) = create_test_router();
        let token = build(&app, "web01").await;

        let (status, _) = send(&app, "GET", "/status/web01").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, body) = send(&app, "GET", &format!("/template/preseed/web01/{}", token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), "d-i netcfg/get_hostname string web01");

        let (_, body) = send(&app, "GET", "/status/web01").await;
        assert_eq!(body, b"installing");

        let (status, body) = send(&app, "GET", &format!("/template/finish/web01/{}", token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            String::from_utf8(body).unwrap(),
            format!("curl http://waitron:9090/done/web01/{}", token)
        );

        let (_, json) = send_json(&app, "GET", "/status").await;
        assert_eq!(json, serde_json::json!({"web01": "installed"}));
    }

    #[tokio::test]
    async fn test_template_errors() {
        let (app, _, _tmp) = create_test_router();
        let token = build(&app, "web01").await;

        let (status, _) = send(&app, "GET", &format!("/template/kickstart/web01/{}", token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "GET", "/template/preseed/web01/wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, "GET", &format!("/template/preseed/web02/{}", token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/template/cloud-init/web01/{}", token);
        let (status, json) = send_json(&app, "GET", &uri).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["Error"], "Unable to render template");
    }

    #[tokio::test]
    async fn test_pre_hook_failure_blocks_preseed() {
        let (app, state, _tmp) = create_test_router();
        let hooks = state.config.hooks_path.clone().unwrap();
        write_script(&hooks.join("pre-hook"), "10-fail", "exit 1");
        let token = build(&app, "web01").await;

        let uri = format!("/template/preseed/web01/{}", token);
        let (status, json) = send_json(&app, "GET", &uri).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["Error"], "Cannot execute hooks");

        let (status, _) = send(&app, "GET", &format!("/template/finish/web01/{}", token)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_boot_descriptor_and_rescue() {
        let (app, _, _tmp) = create_test_router();

        let (status, json) = send_json(&app, "GET", "/v1/boot/aa:bb:cc:dd:ee:01").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["Error"].is_string());

        let token = build(&app, "web01").await;
        let (status, json) = send_json(&app, "GET", "/v1/boot/AA-BB-CC-DD-EE-01").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["kernel"], "http://mirror/installer/linux");
        assert_eq!(json["initrd"], serde_json::json!(["http://mirror/installer/initrd.gz"]));
        assert_eq!(
            json["cmdline"],
            format!("auto=true url=http://waitron:9090/template/preseed/web01/{}", token)
        );

        let (status, json) = send_json(&app, "GET", "/rescue/web01").await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(json["Token"], token.as_str());

        let (_, json) = send_json(&app, "GET", "/v1/boot/aa:bb:cc:dd:ee:01").await;
        assert_eq!(json["kernel"], "http://mirror/rescue/vmlinuz");
    }

    #[tokio::test]
    async fn test_cancel() {
        let (app, _, _tmp) = create_test_router();
        let token = build(&app, "web02").await;

        let (status, json) = send_json(&app, "GET", &format!("/cancel/web02/{}", token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["State"], "OK");

        let (status, _) = send_json(&app, "GET", "/v1/boot/aa:bb:cc:dd:ee:02").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
