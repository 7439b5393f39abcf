//! Digest composition and chat mentions.

use std::collections::HashSet;
use std::fmt::Write as _;

use interpel_core::{display_date, NewAnswer};

use crate::config::RepresentativeEntry;

pub const HEADLINE: &str = "## 🆕 Nowe odpowiedzi na interpelacje!";
pub const SEPARATOR: &str = "--------------------------------";

/// Render events as one markdown message. `None` when there is nothing to say.
pub fn compose_digest(events: &[NewAnswer], mention: Option<&str>) -> Option<String> {
    if events.is_empty() {
        return None;
    }

    let mut out = String::new();
    out.push_str(HEADLINE);
    out.push_str("\n\n");
    for event in events {
        push_entry(&mut out, event);
    }

    if let Some(mention) = mention.map(str::trim).filter(|m| !m.is_empty()) {
        out.push_str(mention);
        out.push_str("\n\n");
    }
    Some(out)
}

fn push_entry(out: &mut String, event: &NewAnswer) {
    // Writing into a String cannot fail.
    let _ = writeln!(out, "#### {} {} ({})", event.title, event.kind, event.id);
    if !event.submitters.is_empty() {
        let _ = writeln!(out, "**Zapytanie złożył/a/li:** {}", event.submitters);
    }
    let _ = writeln!(
        out,
        "Odpowiedzi: {} → {} (+{})",
        event.previous_reply_count, event.current_reply_count, event.new_count
    );
    if !event.reply_authors.is_empty() {
        let _ = writeln!(out, "**Odpowiada:** {}", event.reply_authors.join(", "));
    }
    if let Some(submitted) = event.submitted_on.as_deref() {
        let _ = writeln!(out, "**Złożono:** {}", display_date(submitted));
    }
    if let Some(days) = event.days_to_response {
        let _ = writeln!(out, "**Dni do odpowiedzi:** {days}");
    }
    if event.has_prolongation {
        out.push_str("⏰ **Przedłużenie terminu odpowiedzi**\n");
    }
    let _ = write!(out, "{}\n\n{SEPARATOR}\n\n", event.url.href());
}

/// Chat handles per configured representative, in config order.
#[derive(Debug, Clone, Default)]
pub struct MentionBook {
    entries: Vec<(String, Vec<String>)>,
}

impl MentionBook {
    pub fn from_entries(entries: &[RepresentativeEntry]) -> Self {
        Self {
            entries: entries
                .iter()
                .filter_map(|entry| {
                    let id = entry.rep_id()?;
                    let handles: Vec<String> = entry
                        .mattermost_users
                        .as_deref()
                        .unwrap_or_default()
                        .split_whitespace()
                        .map(str::to_string)
                        .collect();
                    Some((id.to_string(), handles))
                })
                .collect(),
        }
    }

    /// Space-joined handles of every configured representative who submitted
    /// any of `events`, without repeats.
    pub fn for_events(&self, events: &[NewAnswer]) -> String {
        let submitters: HashSet<&str> = events
            .iter()
            .flat_map(|event| event.submitter_ids.iter().map(String::as_str))
            .collect();

        let mut handles: Vec<&str> = Vec::new();
        for (id, rep_handles) in &self.entries {
            if !submitters.contains(id.as_str()) {
                continue;
            }
            for handle in rep_handles {
                if !handles.contains(&handle.as_str()) {
                    handles.push(handle);
                }
            }
        }
        handles.join(" ")
    }
}
