//! toolshed - declarative CLI tool version manager

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use toolshed_cli::cmd;
use toolshed_cli::{Cli, Commands, PolicyCommands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.global.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let global = cli.global;
    match cli.command {
        Commands::Install {
            only_link,
            tags,
            exclude_tags,
            force,
            all_or_nothing,
        } => {
            let options = cmd::install::InstallOptions {
                only_link,
                tags,
                exclude_tags,
                force,
                all_or_nothing,
            };
            cmd::install::install(&global, options).await
        }
        Commands::Exec { command, args } => {
            let code = cmd::exec::exec(&global, &command, &args).await?;
            std::process::exit(code);
        }
        Commands::UpdateChecksum { overwrite } => {
            cmd::update_checksum::update_checksum(&global, overwrite).await
        }
        Commands::Versions {
            package,
            query,
            limit,
            prerelease,
        } => {
            cmd::versions::versions(&global, &package, query.as_deref(), limit, prerelease).await
        }
        Commands::List => cmd::list::list(&global),
        Commands::Remove { packages, all } => cmd::remove::remove(&global, &packages, all),
        Commands::Which { command } => cmd::which::which(&global, &command).await,
        Commands::RootDir => cmd::root_dir::root_dir(&global),
        Commands::Policy { command } => match command {
            PolicyCommands::Check { path } => cmd::policy::check(&global, &path),
        },
    }
}
