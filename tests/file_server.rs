use airgap::errors::{AirgapError, AirgapErrorKind};
use airgap::managers::file_server::{FileServer, FileServerSettings, FileServerState};
use airgap::managers::mirror::ResourceTree;
use airgap::managers::provision::{Deployment, Provisioner};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{
    executor, exit, quiet_logger, refused, CountingProvisioner, ScriptedTransport,
};

const SERVER_CMD: &str = "python -m SimpleHTTPServer 8080";

fn settings() -> FileServerSettings {
    let deployment = Deployment::new(
        "File-Server",
        "resources/test-start-fileserver-vm-blueprint.yaml",
        serde_json::json!({"key_pair_path": "/keys/fs.pem"}),
    );
    let mut settings = FileServerSettings::new(deployment, "/keys/fs.pem");
    settings.readiness.max_retries = 2;
    settings
}

fn server(
    transport: &Arc<ScriptedTransport>,
    provisioner: &Arc<CountingProvisioner>,
) -> FileServer {
    let provisioner: Arc<dyn Provisioner> = provisioner.clone();
    FileServer::new(quiet_logger(), settings(), provisioner, executor(transport))
}

fn resources() -> ResourceTree {
    ResourceTree::from_json_str(
        r#"{"agent_package_urls": {"linux": "http://host/a/agent.tar.gz"}, "timeout": 30}"#,
    )
    .expect("tree")
}

#[tokio::test(start_paused = true)]
async fn scoped_run_serves_then_stops_then_tears_down() {
    let transport = ScriptedTransport::new();
    let provisioner = Arc::new(CountingProvisioner::new("10.0.0.5"));

    let served = server(&transport, &provisioner)
        .scoped(&resources(), |served| async move { Ok(served) })
        .await
        .expect("scoped");

    assert_eq!(served.base_url(), "http://10.0.0.5:8080");
    assert_eq!(
        served.inputs.to_json_string().expect("json"),
        r#"{"agent_package_urls":{"linux":"http://10.0.0.5:8080/a/agent.tar.gz"},"timeout":30}"#
    );
    assert_eq!(
        transport.commands(),
        vec![
            "echo".to_string(),
            "curl --fail --silent --show-error --create-dirs -Lo 'File-Server/a/agent.tar.gz' 'http://host/a/agent.tar.gz'".to_string(),
            "sudo -S -p '' sh -c 'yum install -y screen'".to_string(),
            format!(
                "mkdir -p 'File-Server' && cd 'File-Server' && screen -dm {}",
                SERVER_CMD
            ),
            "pgrep -f '[p]ython -m SimpleHTTPServer 8080'".to_string(),
            "pkill -9 -f '[p]ython -m SimpleHTTPServer 8080'".to_string(),
        ]
    );
    let launch = transport
        .requests()
        .into_iter()
        .find(|r| r.command.contains("screen -dm"))
        .expect("launch request");
    assert!(!launch.pty);
    assert_eq!(provisioner.installs(), 1);
    assert_eq!(provisioner.uninstalls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_boot_is_still_torn_down() {
    let transport = ScriptedTransport::new();
    let provisioner = Arc::new(
        CountingProvisioner::new("10.0.0.5")
            .failing_install(AirgapError::provisioning("quota exceeded")),
    );

    let err = server(&transport, &provisioner)
        .scoped(&resources(), |served| async move { Ok(served) })
        .await
        .expect_err("boot fails");

    assert_eq!(err.kind, AirgapErrorKind::Provisioning);
    assert_eq!(provisioner.uninstalls(), 1);
    assert!(transport.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn readiness_exhaustion_tears_down_without_stopping() {
    let transport = ScriptedTransport::new();
    transport.script("echo", vec![refused()]);
    let provisioner = Arc::new(CountingProvisioner::new("10.0.0.5"));

    let err = server(&transport, &provisioner)
        .scoped(&resources(), |served| async move { Ok(served) })
        .await
        .expect_err("never ready");

    assert!(err.is_connection_not_ready());
    assert_eq!(transport.count("echo"), 3);
    assert_eq!(transport.count("pkill"), 0);
    assert_eq!(provisioner.uninstalls(), 1);
}

#[tokio::test(start_paused = true)]
async fn download_failure_tears_down() {
    let transport = ScriptedTransport::new();
    transport.script("curl", vec![exit(22, "The requested URL returned error: 404")]);
    let provisioner = Arc::new(CountingProvisioner::new("10.0.0.5"));

    let err = server(&transport, &provisioner)
        .scoped(&resources(), |served| async move { Ok(served) })
        .await
        .expect_err("download fails");

    assert_eq!(err.kind, AirgapErrorKind::Download);
    assert_eq!(transport.count("curl"), 3);
    assert_eq!(transport.count("screen -dm"), 0);
    assert_eq!(provisioner.uninstalls(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_that_never_starts_tears_down() {
    let transport = ScriptedTransport::new();
    transport.script("pgrep", vec![exit(1, "")]);
    let provisioner = Arc::new(CountingProvisioner::new("10.0.0.5"));

    let err = server(&transport, &provisioner)
        .scoped(&resources(), |served| async move { Ok(served) })
        .await
        .expect_err("no server process");

    assert_eq!(err.kind, AirgapErrorKind::CommandExecution);
    assert_eq!(transport.count("pgrep"), 4);
    assert_eq!(provisioner.uninstalls(), 1);
}

#[tokio::test(start_paused = true)]
async fn body_failure_returns_the_body_error_after_teardown() {
    let transport = ScriptedTransport::new();
    let provisioner = Arc::new(
        CountingProvisioner::new("10.0.0.5")
            .failing_uninstall(AirgapError::provisioning("uninstall failed")),
    );

    let err = server(&transport, &provisioner)
        .scoped(&resources(), |_served| async move {
            Err::<(), _>(AirgapError::command_execution("bootstrap failed"))
        })
        .await
        .expect_err("body fails");

    assert_eq!(err.message, "bootstrap failed");
    assert_eq!(transport.count("pkill"), 0);
    assert_eq!(provisioner.uninstalls(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_failures_are_ignored() {
    let transport = ScriptedTransport::new();
    transport.script("pkill", vec![refused()]);
    let provisioner = Arc::new(CountingProvisioner::new("10.0.0.5"));

    server(&transport, &provisioner)
        .scoped(&resources(), |_served| async move { Ok(()) })
        .await
        .expect("stop failure is not fatal");

    assert_eq!(transport.count("pkill"), 1);
    assert_eq!(provisioner.uninstalls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_scope_tears_down_in_the_background() {
    let transport = ScriptedTransport::new();
    let provisioner = Arc::new(CountingProvisioner::new("10.0.0.5"));

    let tree = resources();
    let scope = server(&transport, &provisioner).scoped(&tree, |_served| async move {
        std::future::pending::<Result<(), AirgapError>>().await
    });
    let outcome = tokio::time::timeout(Duration::from_secs(3600), scope).await;
    assert!(outcome.is_err());

    for _ in 0..10 {
        if provisioner.uninstalls() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(provisioner.uninstalls(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_lifecycle_enforces_order_and_single_teardown() {
    let transport = ScriptedTransport::new();
    let provisioner = Arc::new(CountingProvisioner::new("10.0.0.5"));
    let mut server = server(&transport, &provisioner);

    server.teardown().await.expect("nothing to tear down");
    assert_eq!(provisioner.uninstalls(), 0);

    let err = server
        .mirror_resources(&resources())
        .await
        .expect_err("not booted");
    assert_eq!(err.kind, AirgapErrorKind::Internal);

    server.boot().await.expect("boot");
    assert_eq!(server.state(), FileServerState::Booted);
    assert_eq!(
        server.session().map(|s| s.label()),
        Some("centos@10.0.0.5:22".to_string())
    );
    server.await_ready().await.expect("ready");
    server.mirror_resources(&resources()).await.expect("serving");
    assert_eq!(server.state(), FileServerState::Serving);
    server.stop().await;
    assert_eq!(server.state(), FileServerState::Stopped);

    server.teardown().await.expect("teardown");
    server.teardown().await.expect("second teardown is a no-op");
    assert_eq!(server.state(), FileServerState::TornDown);
    drop(server);
    tokio::task::yield_now().await;
    assert_eq!(provisioner.uninstalls(), 1);
}
