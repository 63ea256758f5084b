//! Config command - configuration inspection.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::style;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration and where it came from
    Show,

    /// Show the user configuration file path
    Path,
}

/// Run the config command.
pub fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&ctx.config)?);
        return Ok(());
    }

    println!("# tankard Configuration\n");

    println!("Config file search order (later overrides earlier):");
    for source in &ctx.loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }
    println!();

    match ctx.cache_config() {
        Ok(cache) => {
            println!("Cache:");
            println!("  type: {}", cache.backend);
            if let Some(ref dir) = cache.data_dir {
                println!("  data_dir: {}", dir.display());
            }
            if let Some(ref url) = cache.url {
                println!("  url: {}", url);
            }
            match cache.expire {
                Some(expire) => println!("  expire: {}s", expire.as_secs()),
                None => println!("  expire: never"),
            }
            if let Some(timeout) = cache.lock_timeout {
                println!("  lock_timeout: {}ms", timeout.as_millis());
            }
            println!("  strict_expiry: {}", cache.strict_expiry);
            println!();
        }
        Err(e) => {
            println!("{} {}\n", style("Cache config invalid:").red(), e);
        }
    }

    let session = ctx.config.to_session_config();
    println!("Session:");
    println!("  namespace: {}", session.namespace);
    match session.timeout {
        Some(timeout) => println!("  timeout: {}s", timeout.as_secs()),
        None => println!("  timeout: none"),
    }
    println!();

    if !ctx.loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &ctx.loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        if let Ok(toml_str) = ctx.config.to_toml() {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    match &ctx.config_dir {
        Some(dir) => println!("{}", dir.join("config.toml").display()),
        None => eprintln!("Could not determine config directory"),
    }
    Ok(())
}
