use anyhow::{Context as _, Result, bail};
use clap::Args;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use studydeck_core::error::SyncError;
use studydeck_core::merge::Side;
use studydeck_core::store::{Store, write_record};

use crate::Context;
use crate::output::{render, render_mode};

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Record key, e.g. `practiceSeconds` or `chat.maria`.
    pub key: String,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Record key.
    pub key: String,

    /// New value as JSON.
    #[arg(value_name = "JSON")]
    pub value: String,
}

#[derive(Debug, Serialize)]
struct KeyRow {
    key: String,
    rule: Option<&'static str>,
}

pub fn run_get(args: &GetArgs, ctx: &Context) -> Result<()> {
    let value = ctx
        .store
        .get(&args.key)
        .map_err(|source| SyncError::StorageRead {
            key: args.key.clone(),
            source,
        })?;
    let Some(value) = value else {
        bail!("no record named `{}`", args.key);
    };

    // Records are JSON already; every mode prints them as JSON.
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, &value)?;
    writeln!(out)?;
    Ok(())
}

pub fn run_set(args: &SetArgs, ctx: &Context) -> Result<()> {
    let value: Value = serde_json::from_str(&args.value)
        .with_context(|| format!("value for `{}` is not valid JSON", args.key))?;

    if let Some(rule) = ctx.catalog.rule_for(&args.key) {
        if let Err(err) = rule.check(&value, Side::Incoming) {
            bail!("`{}` expects a {} record: {err}", args.key, rule.name());
        }
    }

    write_record(&ctx.store, &args.key, value).map_err(|source| SyncError::StorageWrite {
        key: args.key.clone(),
        source,
    })?;

    render(ctx.output, &serde_json::json!({"ok": true, "key": args.key}), |_, w| {
        writeln!(w, "✓ saved {}", args.key)
    })
}

pub fn run_keys(ctx: &Context) -> Result<()> {
    let keys = ctx.store.keys().map_err(|source| SyncError::StorageRead {
        key: "*".to_string(),
        source,
    })?;
    let rows: Vec<KeyRow> = keys
        .into_iter()
        .map(|key| KeyRow {
            rule: ctx.catalog.rule_for(&key).map(|rule| rule.name()),
            key,
        })
        .collect();

    render_mode(
        ctx.output,
        &rows,
        |rows, w| {
            for row in rows {
                writeln!(w, "{}\t{}", row.key, row.rule.unwrap_or("-"))?;
            }
            Ok(())
        },
        |rows, w| {
            if rows.is_empty() {
                return writeln!(w, "No records stored yet.");
            }
            for row in rows {
                writeln!(w, "{:<24} {}", row.key, row.rule.unwrap_or("(not merged on import)"))?;
            }
            Ok(())
        },
    )
}
