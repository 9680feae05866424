use airgap::errors::AirgapErrorKind;
use airgap::managers::mirror::ResourceTree;
use airgap::managers::offline::OfflineDriver;
use airgap::managers::remote::{CommandSpec, Credentials, RemoteSession};
use std::time::Duration;

mod common;
use common::{executor, exit, ok, quiet_logger, ScriptedTransport};

fn control() -> RemoteSession {
    RemoteSession::new("10.0.0.20", "centos", Credentials::key_file("/keys/cli.pem"))
}

const BLUEPRINT: &str = r#"
inputs:
  agent_package_urls:
    default:
      ubuntu_trusty_agent: http://repo.example.com/agents/Ubuntu-trusty-agent.tar.gz
      centos_7x_agent: http://repo.example.com/agents/centos-Core-agent.tar.gz
  plugin_resources:
    default: []
  dsl_resources:
    default:
      - source_path: http://www.getcloudify.org/spec/cloudify/3.3/types.yaml
        destination_path: /spec/cloudify/3.3/types.yaml
  manager_resources_package:
    default: https://repo.example.com/manager/resources.tar.gz
  ssh_user:
    default: centos
"#;

#[tokio::test]
async fn blueprint_resources_are_read_from_the_control_host() {
    let transport = ScriptedTransport::new();
    transport.put_file("/home/centos/manager-blueprint.yaml", BLUEPRINT);
    let driver = OfflineDriver::new(quiet_logger(), executor(&transport));

    let resources = driver
        .fetch_blueprint_resources(&control(), "/home/centos/manager-blueprint.yaml")
        .await
        .expect("resources");

    let keys: Vec<&str> = resources
        .entries()
        .iter()
        .map(|(key, _)| key.as_str())
        .collect();
    assert_eq!(
        keys,
        vec![
            "agent_package_urls",
            "plugin_resources",
            "dsl_resources",
            "manager_resources_package"
        ]
    );
    assert_eq!(
        resources
            .get("manager_resources_package")
            .and_then(|v| v.as_str()),
        Some("https://repo.example.com/manager/resources.tar.gz")
    );
}

#[tokio::test]
async fn inputs_file_is_merged_and_written_back_as_json() {
    let transport = ScriptedTransport::new();
    transport.put_file(
        "/home/centos/inputs.yaml",
        "keystone_url: http://keystone:5000/v2.0\nagent_package_urls: {}\n",
    );
    let driver = OfflineDriver::new(quiet_logger(), executor(&transport));
    let additional = ResourceTree::from_json_str(
        r#"{"agent_package_urls": {"centos": "http://10.0.0.5:8080/agents/c.tar.gz"}}"#,
    )
    .expect("tree");

    driver
        .update_inputs_file(&control(), "/home/centos/inputs.yaml", &additional)
        .await
        .expect("update");

    let written = transport.file("/home/centos/inputs.yaml").expect("written");
    let parsed: serde_json::Value = serde_json::from_str(&written).expect("json");
    assert_eq!(parsed["keystone_url"], "http://keystone:5000/v2.0");
    assert_eq!(
        parsed["agent_package_urls"]["centos"],
        "http://10.0.0.5:8080/agents/c.tar.gz"
    );
}

#[tokio::test]
async fn offline_assertion_accepts_unknown_host() {
    let transport = ScriptedTransport::new();
    transport.script("ping", vec![exit(2, "ping: unknown host www.google.com")]);
    let driver = OfflineDriver::new(quiet_logger(), executor(&transport));

    driver
        .assert_offline(&control(), "www.google.com")
        .await
        .expect("offline");

    assert_eq!(
        transport.commands(),
        vec!["ping -c 2 'www.google.com'".to_string()]
    );
}

#[tokio::test]
async fn offline_assertion_fails_when_host_answers() {
    let transport = ScriptedTransport::new();
    transport.script(
        "ping",
        vec![ok("64 bytes from 142.250.0.1: icmp_seq=1 ttl=115 time=3.1 ms")],
    );
    let driver = OfflineDriver::new(quiet_logger(), executor(&transport));

    let err = driver
        .assert_offline(&control(), "www.google.com")
        .await
        .expect_err("online");

    assert_eq!(err.kind, AirgapErrorKind::CommandExecution);
}

#[tokio::test(start_paused = true)]
async fn custom_machine_commands_get_three_retries() {
    let transport = ScriptedTransport::new();
    transport.script("/etc/hosts", vec![exit(1, "read-only file system")]);
    let driver = OfflineDriver::new(quiet_logger(), executor(&transport))
        .with_retry_interval(Duration::from_secs(1));

    let err = driver
        .append_hosts_entry(&control(), "10.1.1.1 keystone")
        .await
        .expect_err("always fails");

    assert!(err.message.contains("Tried 4 times"));
    assert_eq!(transport.count("/etc/hosts"), 4);
    assert_eq!(
        transport.commands()[0],
        "sudo -S -p '' sh -c 'echo '\\''10.1.1.1 keystone'\\'' >> /etc/hosts'"
    );
}

#[tokio::test]
async fn custom_machine_command_success_runs_once() {
    let transport = ScriptedTransport::new();
    let driver = OfflineDriver::new(quiet_logger(), executor(&transport));

    driver
        .run_on_custom_machine(&control(), &CommandSpec::new("uptime"))
        .await
        .expect("runs");

    assert_eq!(transport.count("uptime"), 1);
}
