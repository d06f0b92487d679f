use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use studydeck_core::snapshot::{export_snapshot, suggested_filename, write_snapshot_file};

use crate::Context;
use crate::output::{pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output path, or `-` for stdout (defaults to studydeck-backup-<date>.json).
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ExportSummary {
    path: PathBuf,
    records: usize,
    /// Exported but not merged back on import.
    unknown_keys: Vec<String>,
}

pub fn run_export(args: &ExportArgs, ctx: &Context) -> Result<()> {
    let now = Utc::now();
    let snapshot = export_snapshot(&ctx.store, &ctx.catalog, &ctx.config.device_name, now)
        .context("export failed")?;

    if args.output.as_deref().is_some_and(|p| p.as_os_str() == "-") {
        let bytes = snapshot.to_json_bytes().context("export failed")?;
        io::stdout().lock().write_all(&bytes)?;
        return Ok(());
    }

    let path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(suggested_filename(now.date_naive())));
    write_snapshot_file(&snapshot, &path).context("export failed")?;

    let summary = ExportSummary {
        path,
        records: snapshot.data.len(),
        unknown_keys: snapshot
            .data
            .keys()
            .filter(|key| !ctx.catalog.is_known(key))
            .cloned()
            .collect(),
    };

    render_mode(
        ctx.output,
        &summary,
        |s, w| {
            writeln!(w, "path\t{}", s.path.display())?;
            writeln!(w, "records\t{}", s.records)
        },
        |s, w| {
            pretty_section(w, "Export")?;
            pretty_kv(w, "Saved to", s.path.display().to_string())?;
            pretty_kv(w, "Records", s.records.to_string())?;
            if !s.unknown_keys.is_empty() {
                pretty_kv(w, "Not importable", s.unknown_keys.join(", "))?;
            }
            Ok(())
        },
    )
}
