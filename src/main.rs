use std::path::Path;
use std::process;

use anyhow::{bail, Context as _};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use azvm::cli::*;
use azvm::config::load_deployment_file;
use azvm::context::{default_config_path, load_config_from, save_config_to};
use azvm::deploy::SubmitOptions;

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Context(args) => handle_context(args.action, &config_path),

        Commands::Validate(args) => {
            let result = validate_deployment_file(&args.file).await;
            print!(
                "{}",
                format_validation_result(&result, &args.file.display().to_string())
            );
            if !result.valid {
                bail!("{} failed validation", args.file.display());
            }
            Ok(())
        }

        Commands::Templates => {
            let config = load_config_from(&config_path)?;
            let store = template_store(cli.template_dir.as_deref(), &config);
            print!("{}", format_template_list(&template_list(&store)));
            Ok(())
        }

        command => {
            let config = load_config_from(&config_path)?;
            let store = template_store(cli.template_dir.as_deref(), &config);
            let session = Session::connect(
                &config,
                cli.context.as_deref(),
                cli.resource_group.as_deref(),
                store,
                env_var,
            )?;
            handle_deployment(command, &session).await
        }
    }
}

fn handle_context(action: ContextAction, config_path: &Path) -> anyhow::Result<()> {
    let mut config = load_config_from(config_path)?;

    match action {
        ContextAction::List => {
            print!("{}", format_context_list(&context_list(&config, env_var)));
        }
        ContextAction::Current => {
            let current = context_current(&config, env_var)?;
            print!("{}", format_current_context(&current));
        }
        ContextAction::Use { name } => {
            context_use(&mut config, &name)?;
            save_config_to(&config, config_path)?;
            println!("Switched to context \"{}\"", name);
        }
        ContextAction::Add(args) => {
            context_add(&mut config, &args)?;
            save_config_to(&config, config_path)?;
            println!("Context \"{}\" added", args.name);
        }
        ContextAction::Delete { name } => {
            if !context_delete(&mut config, &name)? {
                bail!("Context \"{}\" not found", name);
            }
            save_config_to(&config, config_path)?;
            println!("Context \"{}\" deleted", name);
        }
    }
    Ok(())
}

async fn handle_deployment(command: Commands, session: &Session) -> anyhow::Result<()> {
    match command {
        Commands::Deploy(args) => {
            let spec = load_deployment_file(&args.file)
                .await
                .with_context(|| format!("Failed to load {}", args.file.display()))?;
            let plan = session.plan(&spec).await?;

            if args.dry_run {
                print!("{}", format_plan(&plan));
                return Ok(());
            }

            let options = SubmitOptions {
                create_resource_group: args.create_resource_group,
                wait: !args.no_wait,
            };
            let cluster = session.deploy(&plan, options).await?;
            info!("Deployment {} submitted", plan.name);
            print!("{}", format_cluster(&cluster));
        }

        Commands::Get(args) => {
            let cluster = session.cluster(&args.name).await?;
            print!("{}", format_cluster(&cluster));
        }

        Commands::Start(args) => {
            let mut cluster = session.cluster(&args.name).await?;
            let outcome = cluster.start(args.wait).await?;
            print!("{}", format_outcome("start", &args.name, &outcome));
        }

        Commands::Stop(args) => {
            let mut cluster = session.cluster(&args.name).await?;
            let outcome = cluster.stop(args.deallocate, args.wait).await?;
            let action = if args.deallocate { "deallocate" } else { "stop" };
            print!("{}", format_outcome(action, &args.name, &outcome));
        }

        Commands::Restart(args) => {
            let mut cluster = session.cluster(&args.name).await?;
            let outcome = cluster.restart(args.wait).await?;
            print!("{}", format_outcome("restart", &args.name, &outcome));
        }

        Commands::Resize(args) => {
            let mut cluster = session.cluster(&args.name).await?;
            let outcome = cluster.resize(&args.size, args.deallocate, args.wait).await?;
            print!(
                "{}",
                format_outcome(&format!("resize to {}", args.size), &args.name, &outcome)
            );
        }

        Commands::RunScript(args) => {
            let script = read_script(args.script.as_deref(), args.file.as_deref()).await?;
            let mut cluster = session.cluster(&args.name).await?;
            let (outcome, outputs) = cluster.run_script(&script, args.instance).await?;
            print!("{}", format_script_outputs(&outputs));
            print!("{}", format_outcome("run-script", &args.name, &outcome));
        }

        Commands::Delete(args) => {
            confirm_delete(&args.name, args.yes)?;
            let cluster = session.cluster(&args.name).await?;
            cluster.delete(!args.keep_resources).await?;
            println!("Deployment \"{}\" deleted", args.name);
        }

        other => bail!("{:?} does not act on a deployment", other),
    }
    Ok(())
}
