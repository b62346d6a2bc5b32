// PDF export of saved reports via `printpdf` (A4, built-in Helvetica).

use crate::entities::Report;
use anyhow::{anyhow, Context, Result};
use printpdf::*;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN_LEFT: f32 = 20.0;
const TOP: f32 = 280.0;
const BOTTOM: f32 = 20.0;

const BODY_SIZE: f32 = 10.0;
const LINE_HEIGHT: f32 = 5.0;
/// Characters per body line at 10pt Helvetica across 170mm
const BODY_CHARS: usize = 95;

/// Render a report to PDF bytes.
///
/// Layout: title, one metadata line, then the body with paragraphs kept and
/// long lines wrapped. A new page starts whenever the cursor reaches the
/// bottom margin.
pub fn render_pdf(report: &Report) -> Result<Vec<u8>> {
    let title = pdf_safe(&report.title);
    let (doc, page1, layer1) = PdfDocument::new(&title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
    let mut layer = doc.get_page(page1).get_layer(layer1);
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| anyhow!("PDF font error: {e}"))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| anyhow!("PDF font error: {e}"))?;

    let mut y = Mm(TOP);

    for line in wrap_text(&title, 60) {
        layer.use_text(line, 16.0, Mm(MARGIN_LEFT), y, &bold);
        y -= Mm(8.0);
    }

    layer.use_text(pdf_safe(&metadata_line(report)), 9.0, Mm(MARGIN_LEFT), y, &font);
    y -= Mm(10.0);

    for paragraph in report.content.lines() {
        let paragraph = pdf_safe(paragraph);
        if paragraph.trim().is_empty() {
            y -= Mm(LINE_HEIGHT / 2.0);
            continue;
        }

        for line in wrap_text(&paragraph, BODY_CHARS) {
            if y.0 < BOTTOM {
                let (page, page_layer) = doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
                layer = doc.get_page(page).get_layer(page_layer);
                y = Mm(TOP);
            }
            layer.use_text(line, BODY_SIZE, Mm(MARGIN_LEFT), y, &font);
            y -= Mm(LINE_HEIGHT);
        }
    }

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf).map_err(|e| anyhow!("PDF save error: {e}"))?;
    buf.into_inner().map_err(|e| anyhow!("PDF buffer error: {e}"))
}

/// Render and write the PDF into `dir`, returning the file path.
pub fn export_pdf(report: &Report, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;

    let path = dir.join(file_name(report));
    let bytes = render_pdf(report)?;
    std::fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// `report-<id>-<slug>.pdf`
pub fn file_name(report: &Report) -> String {
    let mut slug = String::new();
    for c in report.title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "report" } else { slug };

    match report.meta.id {
        Some(id) => format!("report-{}-{}.pdf", id, slug),
        None => format!("report-{}.pdf", slug),
    }
}

fn metadata_line(report: &Report) -> String {
    let mut parts = vec![report.report_type.replace('_', " ")];
    if let Some(year) = report.year {
        parts.push(format!("FY{}", year));
    }
    if let Some(created) = &report.meta.created_at {
        parts.push(format!("generated {}", created.get(..10).unwrap_or(created)));
    }
    parts.push(format!("model {}", report.model));
    parts.join("  |  ")
}

/// Built-in fonts are written as single-byte WinAnsi text, so anything above
/// ASCII is transliterated (accents stripped, typographic punctuation
/// flattened) or dropped.
fn pdf_safe(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\t' => out.push(' '),
            c if c.is_control() => {}
            c if c.is_ascii() => out.push(c),
            c => {
                if let Some(folded) = fold_to_ascii(c) {
                    out.push_str(folded);
                }
            }
        }
    }
    out
}

fn fold_to_ascii(c: char) -> Option<&'static str> {
    let folded = match c {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => "'",
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{AB}' | '\u{BB}' => "\"",
        '\u{2013}' | '\u{2014}' | '\u{2212}' => "-",
        '\u{2022}' | '\u{B7}' => "*",
        '\u{2026}' => "...",
        '\u{A0}' | '\u{2009}' | '\u{202F}' => " ",
        '\u{A9}' => "(c)",
        '\u{AE}' => "(R)",
        '\u{B0}' => " deg",
        '\u{A7}' => "S",
        '\u{20AC}' => "EUR",
        '\u{A3}' => "GBP",
        '\u{BD}' => "1/2",
        '\u{BC}' => "1/4",
        '\u{BE}' => "3/4",
        '\u{D7}' => "x",
        '\u{F7}' => "/",
        'À'..='Å' => "A",
        'à'..='å' => "a",
        'Æ' => "AE",
        'æ' => "ae",
        'Ç' => "C",
        'ç' => "c",
        'È'..='Ë' => "E",
        'è'..='ë' => "e",
        'Ì'..='Ï' => "I",
        'ì'..='ï' => "i",
        'Ð' => "D",
        'ð' => "d",
        'Ñ' => "N",
        'ñ' => "n",
        'Ò'..='Ö' | 'Ø' => "O",
        'ò'..='ö' | 'ø' => "o",
        'Ù'..='Ü' => "U",
        'ù'..='ü' => "u",
        'Ý' => "Y",
        'ý' | 'ÿ' => "y",
        'Þ' => "Th",
        'þ' => "th",
        'ß' => "ss",
        _ => return None,
    };
    Some(folded)
}

/// Greedy word wrap. Words longer than a line (URLs, account strings) are
/// hard-broken so nothing runs past the right margin.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(max_chars) {
            let piece: String = piece.iter().collect();
            let current_len = current.chars().count();
            if !current.is_empty() && current_len + piece.chars().count() + 1 > max_chars {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::RecordMeta;

    fn sample(content: &str) -> Report {
        Report {
            meta: RecordMeta {
                id: Some(7),
                created_at: Some("2024-04-02T10:00:00+00:00".to_string()),
                updated_at: None,
            },
            title: "Executive Summary FY2024".to_string(),
            report_type: "executive_summary".to_string(),
            year: Some(2024),
            content: content.to_string(),
            model: "gpt-4o-mini".to_string(),
            style_template_id: None,
        }
    }

    #[test]
    fn test_wrap_text() {
        let lines = wrap_text("one two three four five", 9);
        assert_eq!(lines, vec!["one two", "three", "four five"]);
        assert!(wrap_text("   ", 10).is_empty());
    }

    #[test]
    fn test_wrap_text_breaks_long_words() {
        let url = format!("https://example.org/{}", "a".repeat(40));
        let lines = wrap_text(&format!("see {}", url), 20);

        assert!(lines.iter().all(|line| line.chars().count() <= 20));
        assert_eq!(lines[0], "see");
        assert_eq!(lines.concat(), format!("see{}", url));
    }

    #[test]
    fn test_pdf_safe() {
        assert_eq!(pdf_safe("HAP \u{2014} \u{201C}on pace\u{201D}"), "HAP - \"on pace\"");
        assert_eq!(pdf_safe("caf\u{e9} \u{1F4C8}"), "cafe ");
        assert_eq!(pdf_safe("Se\u{f1}or M\u{fc}ller \u{a9} 2024"), "Senor Muller (c) 2024");
        assert!(pdf_safe("Stra\u{df}e \u{e6}on \u{2026}").is_ascii());
    }

    #[test]
    fn test_metadata_and_file_name() {
        let report = sample("x");
        assert_eq!(
            metadata_line(&report),
            "executive summary  |  FY2024  |  generated 2024-04-02  |  model gpt-4o-mini"
        );
        assert_eq!(file_name(&report), "report-7-executive-summary-fy2024.pdf");
    }

    #[test]
    fn test_render_pdf_multi_page() {
        let paragraph = "Voucher utilization held steady through the quarter. ".repeat(20);
        let content = vec![paragraph; 30].join("\n\n");

        let bytes = render_pdf(&sample(&content)).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(bytes.len() > 1_000);
    }

    #[test]
    fn test_export_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = export_pdf(&sample("Reserves are stable."), dir.path()).unwrap();

        assert_eq!(path.file_name().unwrap(), "report-7-executive-summary-fy2024.pdf");
        assert!(std::fs::read(&path).unwrap().starts_with(b"%PDF"));
    }
}
