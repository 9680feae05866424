use crate::app::App;
use crate::errors::AirgapError;
use crate::managers::blueprint::resources_from_blueprint;
use crate::managers::mirror::ResourceTree;
use crate::managers::remote::{Credentials, RemoteSession};
use crate::services::config::AirgapConfig;
use crate::utils::user_paths::expand_home_path;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "airgap",
    bin_name = "airgap",
    version,
    about = "Mirror deployment resources onto an ephemeral file server for offline installs"
)]
pub struct Cli {
    /// JSON or YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// download every URL in a JSON/YAML document into a local directory
    Mirror(MirrorArgs),
    /// print the resources a manager blueprint needs
    Resources(ResourcesArgs),
    /// wait until a host accepts SSH logins
    WaitReady(WaitReadyArgs),
    /// boot the file server vm, serve the blueprint resources, tear it down
    Serve(ServeArgs),
}

#[derive(Args)]
struct MirrorArgs {
    /// document whose URL values are mirrored
    #[arg(long)]
    input: PathBuf,
    /// directory the resources are downloaded into
    #[arg(long)]
    staging_root: PathBuf,
    /// host[:port] the rewritten URLs point at
    #[arg(long)]
    authority: String,
}

#[derive(Args)]
struct ResourcesArgs {
    #[arg(long)]
    blueprint: PathBuf,
}

#[derive(Args)]
struct WaitReadyArgs {
    #[arg(long)]
    host: String,
    #[arg(long, default_value = crate::constants::network::SSH_DEFAULT_USER)]
    user: String,
    #[arg(long, default_value_t = crate::constants::network::SSH_DEFAULT_PORT)]
    port: u16,
    /// private key; the ssh agent is used when omitted
    #[arg(long)]
    key: Option<PathBuf>,
    /// overrides readiness.max_retries
    #[arg(long)]
    retries: Option<u32>,
    /// overrides readiness.interval_secs
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[derive(Args)]
struct ServeArgs {
    /// local manager blueprint; read from the control host when omitted
    #[arg(long)]
    blueprint: Option<PathBuf>,
    /// keep serving until Ctrl-C
    #[arg(long)]
    hold: bool,
}

async fn read_tree(path: &Path) -> Result<ResourceTree, AirgapError> {
    let path = expand_home_path(path);
    let raw = tokio::fs::read_to_string(&path).await.map_err(|err| {
        AirgapError::invalid_params(format!("Failed to read {}: {}", path.display(), err))
    })?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        ResourceTree::from_json_str(&raw)
    } else {
        ResourceTree::from_yaml_str(&raw)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AirgapError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AirgapConfig, AirgapError> {
    match path {
        Some(path) => AirgapConfig::load(path),
        None => Ok(AirgapConfig::default().with_env_overrides()),
    }
}

pub async fn run() -> Result<(), AirgapError> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let app = App::new(config);

    match cli.cmd {
        Cmd::Mirror(args) => {
            let tree = read_tree(&args.input).await?;
            let outcome = app
                .mirror_local(&tree, &args.staging_root, &args.authority)
                .await?;
            print_json(&outcome)
        }
        Cmd::Resources(args) => {
            let blueprint = read_tree(&args.blueprint).await?;
            print_json(&resources_from_blueprint(&blueprint))
        }
        Cmd::WaitReady(args) => {
            let credentials = match args.key {
                Some(key) => Credentials::key_file(key),
                None => Credentials::Agent,
            };
            let session = RemoteSession::new(args.host, args.user, credentials).with_port(args.port);
            let mut policy = app.config.readiness_policy();
            if let Some(retries) = args.retries {
                policy.max_retries = retries;
            }
            if let Some(secs) = args.interval_secs {
                policy.interval = Duration::from_secs(secs);
            }
            let report = app.readiness().wait_until_ready(&session, &policy).await?;
            print_json(&report)
        }
        Cmd::Serve(args) => {
            let resources = match args.blueprint.as_deref() {
                Some(path) => Some(resources_from_blueprint(&read_tree(path).await?)),
                None => None,
            };
            let report = app.serve(resources, args.hold).await?;
            print_json(&report)
        }
    }
}
