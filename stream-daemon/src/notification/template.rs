//! Message templates and length-limited rendering.

use std::collections::BTreeMap;

use stream_platforms::Platform;

use crate::monitor::NotificationEvent;

/// Used for platforms without a configured template.
pub const DEFAULT_TEMPLATE: &str = "{name} is live on {platform}: {title}\n{url}";

const ELLIPSIS: char = '…';

/// Per-platform message templates.
///
/// Placeholders: `{name}`, `{platform}`, `{title}`, `{url}`. Unknown
/// placeholders are left as written.
#[derive(Debug, Clone, Default)]
pub struct MessageTemplates {
    templates: BTreeMap<Platform, String>,
}

impl MessageTemplates {
    pub fn new(templates: BTreeMap<Platform, String>) -> Self {
        Self { templates }
    }

    pub fn template_for(&self, platform: Platform) -> &str {
        self.templates
            .get(&platform)
            .map(String::as_str)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_TEMPLATE)
    }

    /// Render the message for `event`.
    pub fn render(&self, event: &NotificationEvent) -> String {
        let title = event.title.as_deref().unwrap_or("");
        let text = self
            .template_for(event.channel.platform)
            .replace("{name}", &event.channel.display_name)
            .replace("{platform}", event.channel.platform.display_name())
            .replace("{title}", title)
            .replace("{url}", &event.url);

        if !title.is_empty() {
            return text;
        }

        // An empty title leaves a dangling separator behind, e.g. "live on Kick: \n".
        text.lines()
            .map(|line| line.trim_end().trim_end_matches(':'))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the message for `event`, fitting it into `limit` characters.
    pub fn render_limited(&self, event: &NotificationEvent, limit: usize) -> String {
        truncate_keeping_url(&self.render(event), &event.url, limit)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut `s` to at most `max` characters, marking the cut with an ellipsis.
fn truncate_end(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let kept: String = s.chars().take(max - 1).collect();
    let mut out = kept.trim_end().to_string();
    out.push(ELLIPSIS);
    out
}

/// Shorten `text` to `limit` characters without ever cutting into `url`.
///
/// Text after the URL gives way first, then text before it. If the URL alone
/// exceeds the limit it is returned whole.
pub fn truncate_keeping_url(text: &str, url: &str, limit: usize) -> String {
    if char_len(text) <= limit {
        return text.to_string();
    }

    let Some(pos) = (!url.is_empty()).then(|| text.find(url)).flatten() else {
        return truncate_end(text, limit);
    };

    let before = &text[..pos];
    let after = &text[pos + url.len()..];
    let budget = limit.saturating_sub(char_len(url));
    if budget == 0 {
        return url.to_string();
    }

    let before = if char_len(before) <= budget {
        before.to_string()
    } else {
        // Keep the separator between the text and the URL.
        let separator: String = before
            .chars()
            .rev()
            .take_while(|c| c.is_whitespace())
            .take(1)
            .collect();
        let room = budget.saturating_sub(char_len(&separator));
        let cut = truncate_end(before.trim_end(), room);
        if cut.is_empty() {
            String::new()
        } else {
            cut + &separator
        }
    };

    let after_budget = budget.saturating_sub(char_len(&before));
    let after = truncate_end(after, after_budget);

    format!("{before}{url}{after}")
}
