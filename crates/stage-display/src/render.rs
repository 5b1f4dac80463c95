//! Lyric/chord markup rendering.
//!
//! Source text is plain lines with a few inline conventions:
//!
//! | Source              | Rendered as                                   |
//! |---------------------|-----------------------------------------------|
//! | `{Chorus}` (alone)  | section anchor `<h3 class="section" id=…>`    |
//! | `[Am7]`             | `<span class="chord">`                        |
//! | `**ooh**`           | clickable `<span class="harmony">`            |
//! | `[[sung softly]]`   | `<sup class="footnote" title=…>` marker       |
//!
//! Every line is HTML-escaped before any substitution, so stored text can
//! never inject markup of its own.

use regex::{Captures, Regex};
use std::sync::OnceLock;

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\{\s*([^{}]+?)\s*\}\s*$").expect("valid section regex"))
}

fn footnote_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]]+)\]\]").expect("valid footnote regex"))
}

fn chord_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]\s]+)\]").expect("valid chord regex"))
}

fn harmony_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid harmony regex"))
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Render lyric/chord text to an HTML fragment, one block per source line.
pub fn render_lyrics(text: &str) -> String {
    let mut html = String::with_capacity(text.len() * 2);
    let mut footnotes = 0usize;

    for line in text.lines() {
        let escaped = escape_html(line);

        if let Some(caps) = section_re().captures(&escaped) {
            let label = &caps[1];
            html.push_str(&format!(
                "<h3 class=\"section\" id=\"section-{}\">{}</h3>\n",
                slug(label),
                label
            ));
            continue;
        }

        let line_html = render_inline(&escaped, &mut footnotes);
        if line_html.trim().is_empty() {
            html.push_str("<div class=\"line empty\"></div>\n");
        } else {
            html.push_str(&format!("<div class=\"line\">{}</div>\n", line_html));
        }
    }

    html
}

/// Inline substitutions on an already-escaped line.  Footnotes go first so
/// their double brackets are not mistaken for chords.
fn render_inline(escaped: &str, footnotes: &mut usize) -> String {
    let with_notes = footnote_re().replace_all(escaped, |caps: &Captures| {
        *footnotes += 1;
        // Keep harmony markers inside the tooltip literal.
        let note = caps[1].trim().replace('*', "&#42;");
        format!("<sup class=\"footnote\" title=\"{}\">{}</sup>", note, footnotes)
    });

    let with_chords = chord_re().replace_all(&with_notes, "<span class=\"chord\">$1</span>");

    harmony_re()
        .replace_all(
            &with_chords,
            "<span class=\"harmony\" role=\"button\" tabindex=\"0\">$1</span>",
        )
        .into_owned()
}

/// Map a 0..1 progress fraction onto 0..100, clamping out-of-range input.
pub fn progress_percent(fraction: f64) -> f64 {
    if fraction.is_nan() {
        return 0.0;
    }
    fraction.clamp(0.0, 1.0) * 100.0
}

pub fn render_progress(fraction: f64) -> String {
    let percent = progress_percent(fraction);
    format!(
        "<div class=\"progress\" role=\"progressbar\" aria-valuenow=\"{pct:.0}\" aria-valuemin=\"0\" aria-valuemax=\"100\"><div class=\"progress-bar\" style=\"width: {pct:.0}%\"></div></div>",
        pct = percent
    )
}
