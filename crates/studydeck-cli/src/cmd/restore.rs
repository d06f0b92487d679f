use anyhow::{Context as _, Result};
use clap::Args;
use std::io::{self, BufRead, IsTerminal, Write};
use studydeck_core::seed::{Confirmation, restore_seed};

use crate::Context;
use crate::output::{pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Skip the interactive confirmation.
    #[arg(long)]
    pub yes: bool,
}

pub fn run_restore(args: &RestoreArgs, ctx: &Context) -> Result<()> {
    let confirmation = if args.yes {
        Confirmation::Confirmed
    } else if io::stdin().is_terminal() && !ctx.output.is_json() {
        ask()?
    } else {
        Confirmation::Declined
    };

    let report = restore_seed(&ctx.store, confirmation).context("seed restore failed")?;

    render_mode(
        ctx.output,
        &report,
        |r, w| {
            writeln!(w, "removed\t{}", r.removed)?;
            writeln!(w, "written\t{}", r.written)
        },
        |r, w| {
            pretty_section(w, "Restore")?;
            pretty_kv(w, "Removed", r.removed.to_string())?;
            pretty_kv(w, "Installed", r.written.to_string())?;
            writeln!(w, "The baseline profile is in place.")
        },
    )
}

fn ask() -> Result<Confirmation> {
    let mut err = io::stderr().lock();
    write!(
        err,
        "This replaces ALL study data with the starter profile and cannot be undone.\nType `yes` to continue: "
    )?;
    err.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(Confirmation::from(answer.trim().eq_ignore_ascii_case("yes")))
}
