//! CLI module for azvm
//!
//! Subcommands:
//! - `azvm deploy` - Deploy a VM or cluster from a deployment file
//! - `azvm get` - Show a deployment and its instances
//! - `azvm start` / `stop` / `restart` / `resize` - Lifecycle actions
//! - `azvm run-script` - Run a shell or PowerShell script on instances
//! - `azvm delete` - Delete a deployment and the resources it created
//! - `azvm validate` - Check a deployment file without contacting Azure
//! - `azvm templates` - List the deployment templates
//! - `azvm context` - Manage subscription contexts

use clap::{ArgAction, ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "azvm")]
#[command(about = "Deploy and manage Azure virtual machines and VM clusters")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.azvm/config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Context to use instead of the current one
    #[arg(long, global = true, env = "AZVM_CONTEXT")]
    pub context: Option<String>,

    /// Path to a .env file loaded before anything else
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    /// Directory with templates that shadow the built-in ones
    #[arg(long, value_name = "DIR", global = true)]
    pub template_dir: Option<PathBuf>,

    /// Resource group (default: from the context)
    #[arg(short = 'g', long, global = true)]
    pub resource_group: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy a VM or VM cluster from a deployment file
    Deploy(DeployArgs),

    /// Show a deployment and its instances
    Get(NameArgs),

    /// Start every VM of a deployment
    Start(WaitArgs),

    /// Stop every VM of a deployment
    Stop(StopArgs),

    /// Restart every VM of a deployment
    Restart(WaitArgs),

    /// Change the VM size of a deployment
    Resize(ResizeArgs),

    /// Run a script on the VMs of a deployment
    #[command(name = "run-script")]
    RunScript(RunScriptArgs),

    /// Delete a deployment
    Delete(DeleteArgs),

    /// Validate a deployment file
    Validate(ValidateArgs),

    /// List deployment templates and where they load from
    Templates,

    /// Manage subscription contexts
    Context(ContextArgs),
}

/// Arguments for the deploy command
#[derive(Parser, Debug)]
pub struct DeployArgs {
    /// Path to the deployment file (JSON or JSONC)
    pub file: PathBuf,

    /// Print the deployment request (secrets masked) without submitting it
    #[arg(long)]
    pub dry_run: bool,

    /// Create the resource group if it does not exist
    #[arg(long)]
    pub create_resource_group: bool,

    /// Return once the deployment is accepted instead of waiting for it
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Parser, Debug)]
pub struct NameArgs {
    /// Deployment name
    pub name: String,
}

#[derive(Parser, Debug)]
pub struct WaitArgs {
    /// Deployment name
    pub name: String,

    /// Wait until every VM reaches the target power state
    #[arg(long)]
    pub wait: bool,
}

/// Arguments for the stop command
#[derive(Parser, Debug)]
pub struct StopArgs {
    /// Deployment name
    pub name: String,

    /// Deallocate the VMs so compute is no longer billed
    #[arg(long)]
    pub deallocate: bool,

    #[arg(long)]
    pub wait: bool,
}

#[derive(Parser, Debug)]
pub struct ResizeArgs {
    /// Deployment name
    pub name: String,

    /// New VM size, e.g. Standard_DS4_v2
    pub size: String,

    /// Deallocate each VM before resizing and start it again afterwards
    #[arg(long)]
    pub deallocate: bool,

    #[arg(long)]
    pub wait: bool,
}

#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("source").required(true).args(["script", "file"])))]
pub struct RunScriptArgs {
    /// Deployment name
    pub name: String,

    /// Script text
    #[arg(short, long)]
    pub script: Option<String>,

    /// Read the script from a file
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Only run on this instance (0-based)
    #[arg(short, long)]
    pub instance: Option<usize>,
}

/// Arguments for the delete command
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    /// Deployment name
    pub name: String,

    /// Only delete the deployment record, leaving its resources in place
    #[arg(long)]
    pub keep_resources: bool,

    /// Confirm the deletion
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the deployment file
    pub file: PathBuf,
}

/// Arguments for the context command
#[derive(Parser, Debug)]
pub struct ContextArgs {
    #[command(subcommand)]
    pub action: ContextAction,
}

#[derive(Subcommand, Debug)]
pub enum ContextAction {
    /// List all contexts
    List,

    /// Show current context
    Current,

    /// Switch to a context
    Use {
        /// Context name
        name: String,
    },

    /// Add a new context
    Add(ContextAddArgs),

    /// Delete a context
    Delete {
        /// Context name
        name: String,
    },
}

#[derive(Parser, Debug)]
pub struct ContextAddArgs {
    /// Context name
    pub name: String,

    /// Subscription id
    #[arg(long)]
    pub subscription: String,

    /// Azure AD tenant id
    #[arg(long)]
    pub tenant: Option<String>,

    /// Default resource group
    #[arg(long = "default-resource-group")]
    pub default_resource_group: Option<String>,

    /// Default location for new resource groups
    #[arg(long)]
    pub location: Option<String>,

    /// Service principal application id
    #[arg(long)]
    pub client_id: Option<String>,

    /// Environment variable holding the client secret
    #[arg(long)]
    pub secret_env: Option<String>,

    /// Management endpoint (sovereign clouds)
    #[arg(long)]
    pub endpoint: Option<String>,

    #[arg(long)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::parse_from(["azvm", "deploy", "vm.jsonc", "--create-resource-group"]);
        match cli.command {
            Commands::Deploy(args) => {
                assert_eq!(args.file, PathBuf::from("vm.jsonc"));
                assert!(args.create_resource_group);
                assert!(!args.dry_run);
                assert!(!args.no_wait);
            }
            _ => panic!("Expected Deploy command"),
        }
    }

    #[test]
    fn test_parse_stop_deallocate() {
        let cli = Cli::parse_from(["azvm", "stop", "myvm", "--deallocate", "--wait"]);
        match cli.command {
            Commands::Stop(args) => {
                assert_eq!(args.name, "myvm");
                assert!(args.deallocate);
                assert!(args.wait);
            }
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_parse_resize() {
        let cli = Cli::parse_from(["azvm", "resize", "myvm", "Standard_DS4_v2"]);
        match cli.command {
            Commands::Resize(args) => {
                assert_eq!(args.name, "myvm");
                assert_eq!(args.size, "Standard_DS4_v2");
                assert!(!args.deallocate);
            }
            _ => panic!("Expected Resize command"),
        }
    }

    #[test]
    fn test_parse_run_script_instance() {
        let cli = Cli::parse_from(["azvm", "run-script", "cl", "-s", "uptime", "--instance", "1"]);
        match cli.command {
            Commands::RunScript(args) => {
                assert_eq!(args.script.as_deref(), Some("uptime"));
                assert_eq!(args.instance, Some(1));
                assert!(args.file.is_none());
            }
            _ => panic!("Expected RunScript command"),
        }
    }

    #[test]
    fn test_run_script_needs_a_source() {
        assert!(Cli::try_parse_from(["azvm", "run-script", "cl"]).is_err());
        assert!(
            Cli::try_parse_from(["azvm", "run-script", "cl", "-s", "ls", "-f", "a.sh"]).is_err()
        );
    }

    #[test]
    fn test_parse_delete() {
        let cli = Cli::parse_from(["azvm", "delete", "myvm", "--keep-resources", "-y"]);
        match cli.command {
            Commands::Delete(args) => {
                assert!(args.keep_resources);
                assert!(args.yes);
            }
            _ => panic!("Expected Delete command"),
        }
    }

    #[test]
    fn test_parse_context_use() {
        let cli = Cli::parse_from(["azvm", "context", "use", "prod"]);
        match cli.command {
            Commands::Context(args) => match args.action {
                ContextAction::Use { name } => {
                    assert_eq!(name, "prod");
                }
                _ => panic!("Expected Use action"),
            },
            _ => panic!("Expected Context command"),
        }
    }

    #[test]
    fn test_parse_context_add() {
        let cli = Cli::parse_from([
            "azvm",
            "context",
            "add",
            "dev",
            "--subscription",
            "0000-1111",
            "--tenant",
            "tid",
            "--client-id",
            "app",
            "--default-resource-group",
            "rg-dev",
        ]);
        match cli.command {
            Commands::Context(args) => match args.action {
                ContextAction::Add(add) => {
                    assert_eq!(add.name, "dev");
                    assert_eq!(add.subscription, "0000-1111");
                    assert_eq!(add.default_resource_group.as_deref(), Some("rg-dev"));
                    assert!(add.secret_env.is_none());
                }
                _ => panic!("Expected Add action"),
            },
            _ => panic!("Expected Context command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["azvm", "-vv", "get", "myvm", "-g", "rg1", "--context", "dev"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.resource_group.as_deref(), Some("rg1"));
        assert_eq!(cli.context.as_deref(), Some("dev"));
    }
}
