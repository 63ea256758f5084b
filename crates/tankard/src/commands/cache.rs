//! Cache commands - read and modify namespaces.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde_json::Value;

use super::Context;

/// A key within a namespace.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Cache namespace
    pub namespace: String,

    /// Key to read
    pub key: String,
}

/// Arguments for the set command.
#[derive(Args, Debug)]
pub struct SetArgs {
    /// Cache namespace
    pub namespace: String,

    /// Key to write
    pub key: String,

    /// Value as JSON; anything that is not valid JSON is stored as a string
    pub value: String,

    /// Expiration in seconds stored with the value
    #[arg(long)]
    pub expire: Option<u64>,
}

/// Arguments for the remove command.
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Cache namespace
    pub namespace: String,

    /// Key to remove
    pub key: String,
}

/// A namespace.
#[derive(Args, Debug)]
pub struct NamespaceArgs {
    /// Cache namespace
    pub namespace: String,
}

pub fn get(args: GetArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.manager()?;
    let cache = manager.get_cache(&args.namespace)?;

    let value: Value = cache.get_value(&args.key)?;
    if ctx.json_output {
        match cache.get_container(&args.key)? {
            Some(container) => println!("{}", serde_json::to_string_pretty(&container)?),
            None => println!("{}", serde_json::to_string_pretty(&value)?),
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

pub fn set(args: SetArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.manager()?;
    let cache = manager.get_cache(&args.namespace)?;

    let value = serde_json::from_str::<Value>(&args.value).unwrap_or(Value::String(args.value));
    match args.expire {
        Some(secs) => cache.set_value_with(&args.key, &value, Duration::from_secs(secs))?,
        None => cache.set_value(&args.key, &value)?,
    }

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "namespace": args.namespace, "key": args.key, "stored": true })
        );
    } else {
        let green = Style::new().green();
        println!(
            "{} Stored {}/{}",
            green.apply_to("✓"),
            args.namespace,
            style(&args.key).bold()
        );
    }
    Ok(())
}

pub fn remove(args: RemoveArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.manager()?;
    let cache = manager.get_cache(&args.namespace)?;
    let removed = cache.remove_value(&args.key)?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "namespace": args.namespace, "key": args.key, "removed": removed })
        );
    } else if removed {
        println!("{} Removed {}/{}", Style::new().green().apply_to("✓"), args.namespace, args.key);
    } else {
        println!(
            "{}",
            style(format!("{}/{} not found", args.namespace, args.key)).dim()
        );
    }
    Ok(())
}

pub fn clear(args: NamespaceArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.manager()?;
    let cache = manager.get_cache(&args.namespace)?;
    cache.clear()?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "namespace": args.namespace, "cleared": true })
        );
    } else {
        println!("{} Cleared {}", Style::new().green().apply_to("✓"), args.namespace);
    }
    Ok(())
}

pub fn keys(args: NamespaceArgs, ctx: &Context) -> Result<()> {
    let manager = ctx.manager()?;
    let cache = manager.get_cache(&args.namespace)?;
    let mut keys = cache.keys()?;
    keys.sort();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    if keys.is_empty() {
        println!("{}", style("No keys found").dim());
    } else {
        for key in &keys {
            println!("{}", key);
        }
        if ctx.verbose {
            println!("{}", style(format!("{} key(s)", keys.len())).dim());
        }
    }
    Ok(())
}
