//! Ticket transcripts.
//!
//! A transcript is a standalone HTML page holding the ticket metadata and
//! every message of the channel in timestamp order, plus a plaintext
//! rendering of the same content used as a bounded preview.

use crate::db::Ticket;
use crate::platform::ChannelMessage;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "transcript-";
const FILE_SUFFIX: &str = ".html";

const STYLE: &str = "body{font-family:Arial,sans-serif;line-height:1.6;margin:0;padding:20px;color:#333}\
.container{max-width:800px;margin:0 auto}\
.header{border-bottom:1px solid #eee;padding-bottom:10px;margin-bottom:20px}\
.message{margin-bottom:10px;padding:5px 0;border-bottom:1px solid #eee}\
.username{font-weight:bold}.timestamp{color:#666;font-size:.85em}\
.system{color:#666;font-style:italic}\
.attachment img{max-width:400px;max-height:300px}\
.embed{border-left:4px solid #5865F2;padding:8px;margin-top:5px}\
.embed-title{font-weight:bold}";

/// Ticket facts printed in the transcript header.
#[derive(Debug, Clone)]
pub struct TranscriptMeta {
    pub guild_id: String,
    pub ticket_number: i64,
    pub owner_name: String,
    pub created_at: i64,
    pub closed_at: Option<i64>,
}

impl TranscriptMeta {
    pub fn new(ticket: &Ticket, owner_name: impl Into<String>) -> Self {
        Self {
            guild_id: ticket.guild_id.clone(),
            ticket_number: ticket.ticket_number,
            owner_name: owner_name.into(),
            created_at: ticket.created_at,
            closed_at: ticket.closed_at,
        }
    }
}

/// A rendered transcript, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub file_name: String,
    pub html: String,
    /// Plaintext rendering, cut to the preview limit.
    pub preview: String,
}

/// `transcript-<guild>-<number>-<YYYYMMDDhhmmss>.html`
pub fn file_name(guild_id: &str, ticket_number: i64, at: DateTime<Utc>) -> String {
    format!(
        "{FILE_PREFIX}{guild_id}-{ticket_number}-{}{FILE_SUFFIX}",
        at.format("%Y%m%d%H%M%S")
    )
}

fn timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn closed_label(meta: &TranscriptMeta) -> String {
    meta.closed_at.map(timestamp).unwrap_or_else(|| "Not closed".to_string())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Cut `text` to at most `limit` characters, marking the cut with `...`.
pub fn truncate_preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Render a transcript. `messages` may come in any order.
pub fn render(
    meta: &TranscriptMeta,
    mut messages: Vec<ChannelMessage>,
    generated_at: DateTime<Utc>,
    preview_limit: usize,
) -> Transcript {
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let html = render_html(meta, &messages);
    let text = render_text(meta, &messages);

    Transcript {
        file_name: file_name(&meta.guild_id, meta.ticket_number, generated_at),
        html,
        preview: truncate_preview(&text, preview_limit),
    }
}

fn render_html(meta: &TranscriptMeta, messages: &[ChannelMessage]) -> String {
    let mut html = String::new();
    // Writing into a String cannot fail.
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n\
         <title>Transcript #{number}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
         <div class=\"container\">\n<div class=\"header\">\n\
         <h2>Ticket #{number}</h2>\n<p>Owner: {owner}</p>\n<p>Created: {created}</p>\n<p>Closed: {closed}</p>\n\
         </div>\n",
        number = meta.ticket_number,
        owner = escape(&meta.owner_name),
        created = timestamp(meta.created_at),
        closed = closed_label(meta),
    );

    for message in messages {
        if message.system {
            let _ = writeln!(html, "<div class=\"message system\">{}</div>", escape(&message.content));
            continue;
        }
        let _ = write!(
            html,
            "<div class=\"message\">\n<div><span class=\"username\">{}</span> \
             <span class=\"timestamp\">{}</span></div>\n<div class=\"content\">{}</div>\n",
            escape(&message.author.name),
            message.created_at.format("%Y-%m-%d %H:%M:%S"),
            escape(&message.content),
        );
        for attachment in &message.attachments {
            let url = escape(&attachment.url);
            let name = escape(&attachment.name);
            html.push_str("<div class=\"attachment\">");
            let is_image = attachment
                .content_type
                .as_deref()
                .is_some_and(|t| t.starts_with("image/"));
            if is_image {
                let _ = write!(html, "<img src=\"{url}\" alt=\"{name}\">");
            }
            let _ = writeln!(html, "<a href=\"{url}\" target=\"_blank\">{name}</a></div>");
        }
        for embed in &message.embeds {
            if embed.title.is_none() && embed.description.is_none() {
                continue;
            }
            html.push_str("<div class=\"embed\">");
            if let Some(title) = &embed.title {
                let _ = write!(html, "<div class=\"embed-title\">{}</div>", escape(title));
            }
            if let Some(description) = &embed.description {
                let _ = write!(html, "<div class=\"embed-description\">{}</div>", escape(description));
            }
            html.push_str("</div>\n");
        }
        html.push_str("</div>\n");
    }

    html.push_str("</div>\n</body>\n</html>\n");
    html
}

fn render_text(meta: &TranscriptMeta, messages: &[ChannelMessage]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Ticket #{}", meta.ticket_number);
    let _ = writeln!(text, "Owner: {}", meta.owner_name);
    let _ = writeln!(text, "Created: {}", timestamp(meta.created_at));
    let _ = writeln!(text, "Closed: {}", closed_label(meta));

    for message in messages {
        text.push('\n');
        if message.system {
            let _ = writeln!(text, "* {}", message.content);
            continue;
        }
        let _ = writeln!(
            text,
            "{} {}: {}",
            message.created_at.format("%Y-%m-%d %H:%M"),
            message.author.name,
            message.content
        );
        for attachment in &message.attachments {
            let _ = writeln!(text, "  [{}] {}", attachment.name, attachment.url);
        }
        for embed in &message.embeds {
            match (&embed.title, &embed.description) {
                (Some(title), Some(description)) => {
                    let _ = writeln!(text, "  {title}: {description}");
                }
                (Some(only), None) | (None, Some(only)) => {
                    let _ = writeln!(text, "  {only}");
                }
                (None, None) => {}
            }
        }
    }
    text
}

/// Write a transcript under `dir`, creating the directory if needed.
pub async fn save(dir: &Path, transcript: &Transcript) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(&transcript.file_name);
    tokio::fs::write(&path, transcript.html.as_bytes()).await?;
    debug!(path = %path.display(), "Transcript written");
    Ok(path)
}

/// Delete transcripts in `dir` last modified longer than `retention` ago.
/// Other files are left alone. Returns how many were deleted.
pub async fn cleanup(dir: &Path, retention: Duration) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut deleted = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(FILE_PREFIX) || !name.ends_with(FILE_SUFFIX) {
            continue;
        }
        let age = entry
            .metadata()
            .await?
            .modified()?
            .elapsed()
            .unwrap_or_default();
        if age < retention {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => deleted += 1,
            Err(e) => warn!(file = %name, error = %e, "Failed to delete old transcript"),
        }
    }

    if deleted > 0 {
        info!(deleted, dir = %dir.display(), "Old transcripts cleaned up");
    }
    Ok(deleted)
}
