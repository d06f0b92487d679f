use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use studydeck_core::chat::{Analysis, ChatSession, Turn};

use crate::Context;
use crate::chat_client::HttpTutor;
use crate::output::render;

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Contact id, as used in the `contacts` record.
    pub contact: String,

    /// Message to send.
    pub message: String,

    /// Also ask the tutor to correct the message.
    #[arg(long)]
    pub check: bool,

    /// Save the reply as audio to PATH, in the contact's voice.
    #[arg(long, value_name = "PATH")]
    pub speak: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct TurnOutput<'a> {
    ok: bool,
    contact: &'a str,
    text: &'a str,
    suggestions: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    correction: Option<Analysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<PathBuf>,
    /// Failures of the optional extras; the turn itself still counts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

pub fn run_chat(args: &ChatArgs, ctx: &Context) -> Result<()> {
    let tutor = HttpTutor::from_config(&ctx.config.user.chat);
    let session = ChatSession::new(&ctx.store, &tutor, args.contact.as_str());
    let turn = session
        .send(&args.message, Utc::now())
        .context("could not record the conversation")?;

    let mut output = match &turn {
        Turn::Replied { reply, suggestions } => TurnOutput {
            ok: true,
            contact: &args.contact,
            text: &reply.text,
            suggestions,
            correction: None,
            audio: None,
            warnings: Vec::new(),
        },
        Turn::Failed { notice } => TurnOutput {
            ok: false,
            contact: &args.contact,
            text: &notice.text,
            suggestions: &[],
            correction: None,
            audio: None,
            warnings: Vec::new(),
        },
    };

    if args.check {
        match session.analyze(&args.message) {
            Ok(analysis) => output.correction = Some(analysis),
            Err(err) => {
                tracing::warn!(error = %err, "correction failed");
                output.warnings.push(format!("correction unavailable ({})", err.code()));
            }
        }
    }

    if let (Some(path), Turn::Replied { reply, .. }) = (&args.speak, &turn) {
        match session.speak(&reply.text, &ctx.config.user.chat.voice) {
            Ok(audio) => {
                std::fs::write(path, audio)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                output.audio = Some(path.clone());
            }
            Err(err) => {
                tracing::warn!(error = %err, "speech synthesis failed");
                output.warnings.push(format!("audio unavailable ({})", err.code()));
            }
        }
    }

    render(ctx.output, &output, |o, w| {
        if o.ok {
            writeln!(w, "{}: {}", o.contact, o.text)?;
        } else {
            writeln!(w, "! {}", o.text)?;
        }
        for suggestion in o.suggestions {
            writeln!(w, "  > {suggestion}")?;
        }
        if let Some(correction) = &o.correction {
            writeln!(w, "  correction: {}", correction.corrected_text)?;
            writeln!(w, "  why: {}", correction.explanation)?;
        }
        if let Some(audio) = &o.audio {
            writeln!(w, "  audio saved to {}", audio.display())?;
        }
        for warning in &o.warnings {
            writeln!(w, "  ! {warning}")?;
        }
        Ok(())
    })
}
