use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use vm_lifecycle::logging::init_tracing;
use vm_lifecycle::{DeleteOptions, LifecycleConfig, VmLifecycleManager, XapiSession};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "vm-lifecycle")]
#[command(about = "Snapshot or delete VMs on an XAPI pool")]
#[command(version)]
struct Args {
    /// Pool master URL.
    #[arg(long, env = "XAPI_URL")]
    url: Option<String>,

    #[arg(long, env = "XAPI_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "XAPI_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Config file path.
    #[arg(short, long, env = "VM_LIFECYCLE_CONFIG")]
    config: Option<String>,

    /// Log level, overrides the configured one.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot a VM, quiescing it when possible, and print the snapshot record.
    Snapshot {
        vm_uuid: String,
        /// Name of the snapshot, defaults to the VM's name.
        #[arg(long)]
        name_label: Option<String>,
    },
    /// Delete a VM together with its snapshots and unshared disks.
    Delete {
        vm_uuid: String,
        /// Leave the VM's disks in place.
        #[arg(long)]
        keep_disks: bool,
        /// Delete even if `destroy` is a blocked operation.
        #[arg(long)]
        force: bool,
        /// Allow deleting a default template.
        #[arg(long)]
        allow_default_template: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = LifecycleConfig::load(args.config.as_deref())?;
    if let Some(url) = args.url {
        config.xapi.url = url;
    }
    if let Some(username) = args.username {
        config.xapi.username = username;
    }
    if let Some(password) = args.password {
        config.xapi.password = password;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_tracing(&config.logging);
    info!("Starting vm-lifecycle v{}", env!("CARGO_PKG_VERSION"));

    let session = Arc::new(XapiSession::new(&config.xapi)?);
    session.login().await.context("XAPI login failed")?;

    let manager = VmLifecycleManager::new(Arc::clone(&session), config);
    let result = run(&manager, args.command).await;

    if let Err(e) = session.logout().await {
        tracing::warn!(error = %e, "XAPI logout failed");
    }
    result
}

async fn run(manager: &VmLifecycleManager<XapiSession>, command: Command) -> Result<()> {
    match command {
        Command::Snapshot {
            vm_uuid,
            name_label,
        } => {
            let vm = manager.vm_by_uuid(&vm_uuid).await?;
            let snapshot = manager.snapshot_vm(&vm, name_label.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Delete {
            vm_uuid,
            keep_disks,
            force,
            allow_default_template,
        } => {
            let vm = manager.vm_by_uuid(&vm_uuid).await?;
            let options = DeleteOptions {
                delete_disks: !keep_disks,
                force,
                allow_deleting_default_template: allow_default_template,
            };
            manager.delete_vm(&vm, options).await?;
            println!("Deleted VM {vm_uuid}");
        }
    }
    Ok(())
}
