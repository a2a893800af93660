//! `crmsync config init|show`

use anyhow::{Context, Result};
use clap::Subcommand;

use crmsync_core::config as sync_config;

use super::{home, load_config, TOKEN_ENV};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write the default config unless one exists.
    Init,
    /// Print the effective configuration as YAML (token redacted).
    Show,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = home()?;
    let path = sync_config::config_path_at(&home);

    match command {
        ConfigCommand::Init => {
            let existed = path.exists();
            sync_config::init_at(&home)
                .with_context(|| format!("failed to initialize {}", path.display()))?;
            if existed {
                println!("· config already exists: {}", path.display());
            } else {
                println!("✓ wrote default config: {}", path.display());
            }
        }
        ConfigCommand::Show => {
            let mut config = load_config(&home)?;
            let token_source = if std::env::var(TOKEN_ENV).is_ok() {
                Some(TOKEN_ENV)
            } else if config.token.is_some() {
                Some("config")
            } else {
                None
            };
            if config.token.is_some() {
                config.token = Some("<redacted>".to_owned());
            }
            println!("# {}", path.display());
            print!(
                "{}",
                serde_yaml::to_string(&config).context("failed to render config")?
            );
            match token_source {
                Some(source) => println!("# token: set ({source})"),
                None => println!("# token: not set"),
            }
        }
    }
    Ok(())
}
