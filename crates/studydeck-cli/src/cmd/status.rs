use anyhow::{Context as _, Result};
use chrono::Local;
use std::io::Write;
use studydeck_core::stats::compute;

use crate::Context;
use crate::output::{format_seconds, pretty_kv, pretty_section, render_mode};

pub fn run_status(ctx: &Context) -> Result<()> {
    let today = Local::now().date_naive();
    let stats = compute(&ctx.store, today).context("could not compute progress")?;

    render_mode(
        ctx.output,
        &stats,
        |s, w| {
            writeln!(w, "total_seconds\t{}", s.total_seconds)?;
            writeln!(w, "current_streak\t{}", s.current_streak)?;
            writeln!(w, "longest_streak\t{}", s.longest_streak)?;
            writeln!(w, "completed_days\t{}", s.completed_days)?;
            writeln!(w, "completed_lessons\t{}", s.completed_lessons)?;
            writeln!(w, "contacts\t{}", s.contacts)?;
            writeln!(w, "conversations\t{}", s.conversations)?;
            writeln!(w, "messages\t{}", s.messages)?;
            writeln!(w, "mastered_grammar\t{}", s.mastered_grammar)?;
            writeln!(w, "vocabulary\t{}", s.vocabulary)
        },
        |s, w| {
            pretty_section(w, "Progress")?;
            pretty_kv(w, "Practice time", format_seconds(s.total_seconds))?;
            pretty_kv(
                w,
                "Streak",
                format!("{} day(s), best {}", s.current_streak, s.longest_streak),
            )?;
            pretty_kv(w, "Days completed", s.completed_days.to_string())?;
            pretty_kv(w, "Lessons", s.completed_lessons.to_string())?;
            pretty_kv(w, "Vocabulary", s.vocabulary.to_string())?;
            pretty_kv(w, "Grammar mastered", s.mastered_grammar.to_string())?;
            writeln!(w)?;
            pretty_section(w, "Conversations")?;
            pretty_kv(w, "Contacts", s.contacts.to_string())?;
            pretty_kv(
                w,
                "Active chats",
                format!("{} ({} messages)", s.conversations, s.messages),
            )
        },
    )
}
