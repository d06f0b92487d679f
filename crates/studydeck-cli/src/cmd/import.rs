use anyhow::{Context as _, Result};
use clap::Args;
use std::io::Write;
use std::path::PathBuf;
use studydeck_core::merge::import_document;

use crate::Context;
use crate::output::{pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Snapshot document created by `sd export`.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

pub fn run_import(args: &ImportArgs, ctx: &Context) -> Result<()> {
    let raw = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let report = import_document(&ctx.store, &ctx.catalog, &raw).context("import failed")?;

    render_mode(
        ctx.output,
        &report,
        |r, w| {
            writeln!(w, "changed\t{}", r.changed_count())?;
            for key in r.changed_keys() {
                writeln!(w, "changed\t{key}")?;
            }
            for skipped in &r.skipped {
                writeln!(w, "skipped\t{}\t{}", skipped.key, skipped.reason)?;
            }
            Ok(())
        },
        |r, w| {
            pretty_section(w, "Import")?;
            if r.is_noop() {
                writeln!(w, "Already up to date; nothing changed.")?;
            } else {
                writeln!(w, "Merged {} record type(s).", r.changed_count())?;
            }
            pretty_kv(w, "Added", r.adopted.len().to_string())?;
            pretty_kv(w, "Updated", r.merged.len().to_string())?;
            pretty_kv(w, "Unchanged", r.unchanged.len().to_string())?;
            if !r.skipped.is_empty() {
                pretty_kv(w, "Skipped", r.skipped.len().to_string())?;
                for skipped in &r.skipped {
                    writeln!(w, "  - {}: {}", skipped.key, skipped.reason)?;
                }
            }
            Ok(())
        },
    )
}
