//! Case report rendering.
//!
//! The report is a single A4 page. Every field is written at a fixed position using the
//! built-in Helvetica faces, so no font files are needed at runtime.

use chrono::{DateTime, NaiveDate, Utc};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const LEFT_MM: f32 = 20.0;
const VALUE_MM: f32 = 70.0;
const HEADING_Y_MM: f32 = 270.0;
const FIRST_FIELD_Y_MM: f32 = 245.0;
const FIELD_STEP_MM: f32 = 9.0;
const DESCRIPTION_LINE_MM: f32 = 6.0;
const DESCRIPTION_WRAP: usize = 90;
const DESCRIPTION_MAX_LINES: usize = 22;
const FOOTER_Y_MM: f32 = 15.0;

/// Everything printed on a case report.
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub case_number: String,
    pub title: String,
    pub category: String,
    pub status: String,
    pub escalation_level: i32,
    pub location: Option<String>,
    pub incident_date: Option<NaiveDate>,
    pub accused_party: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub description: String,
    pub generated_at: DateTime<Utc>,
}

impl CaseReport {
    fn fields(&self) -> Vec<(&'static str, String)> {
        let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        vec![
            ("Case Number", self.case_number.clone()),
            ("Title", self.title.clone()),
            ("Category", self.category.replace('_', " ")),
            ("Status", self.status.replace('_', " ")),
            ("Escalation Level", self.escalation_level.to_string()),
            ("Location", or_dash(&self.location)),
            (
                "Incident Date",
                self.incident_date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_else(|| "-".into()),
            ),
            ("Accused Party", or_dash(&self.accused_party)),
            ("Submitted", self.submitted_at.format("%Y-%m-%d %H:%M UTC").to_string()),
        ]
    }
}

/// Greedy word wrap at `width` characters. Words longer than a line are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                lines.push(word.drain(..width).collect());
            }
            let word: String = word.into_iter().collect();
            if word.is_empty() {
                continue;
            }
            let needed = if current.is_empty() { word.chars().count() } else { current.chars().count() + 1 + word.chars().count() };
            if needed > width {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        lines.push(current);
    }
    lines
}

/// The built-in fonts only cover Latin-1; anything else prints as '?'.
fn printable(text: &str) -> String {
    text.chars()
        .map(|c| if (c as u32) < 0x20 || (c as u32) > 0xFF { '?' } else { c })
        .collect()
}

fn put(layer: &PdfLayerReference, font: &IndirectFontRef, size: f32, x: f32, y: f32, text: &str) {
    layer.use_text(printable(text), size, Mm(x), Mm(y), font);
}

/// Renders the report and returns the PDF bytes.
pub fn render_case_report(report: &CaseReport) -> anyhow::Result<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        format!("Case Report {}", report.case_number),
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Report",
    );
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| anyhow::anyhow!("failed to load Helvetica: {}", e))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| anyhow::anyhow!("failed to load Helvetica-Bold: {}", e))?;
    let layer = doc.get_page(page).get_layer(layer);

    put(&layer, &bold, 18.0, LEFT_MM, HEADING_Y_MM, "CORRUPTION CASE REPORT");
    put(&layer, &regular, 10.0, LEFT_MM, HEADING_Y_MM - 8.0, &report.case_number);

    let mut y = FIRST_FIELD_Y_MM;
    for (label, value) in report.fields() {
        put(&layer, &bold, 11.0, LEFT_MM, y, label);
        put(&layer, &regular, 11.0, VALUE_MM, y, &value);
        y -= FIELD_STEP_MM;
    }

    y -= FIELD_STEP_MM / 2.0;
    put(&layer, &bold, 12.0, LEFT_MM, y, "Description");
    y -= FIELD_STEP_MM;
    let mut lines = wrap_text(&report.description, DESCRIPTION_WRAP);
    if lines.len() > DESCRIPTION_MAX_LINES {
        lines.truncate(DESCRIPTION_MAX_LINES);
        if let Some(last) = lines.last_mut() {
            last.push_str(" [...]");
        }
    }
    for line in &lines {
        put(&layer, &regular, 10.0, LEFT_MM, y, line);
        y -= DESCRIPTION_LINE_MM;
    }

    let footer = format!(
        "Generated {} - verify the integrity of this document with its SHA-256 digest",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    put(&layer, &regular, 8.0, LEFT_MM, FOOTER_Y_MM, &footer);

    doc.save_to_bytes().map_err(|e| anyhow::anyhow!("failed to serialize PDF: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CaseReport {
        CaseReport {
            case_number: "CASE-20240101-ABC123".into(),
            title: "Procurement kickbacks".into(),
            category: "bribery".into(),
            status: "submitted".into(),
            escalation_level: 0,
            location: Some("City Hall".into()),
            incident_date: NaiveDate::from_ymd_opt(2024, 1, 1),
            accused_party: None,
            submitted_at: Utc::now(),
            description: "Officials requested payments before approving contracts. ".repeat(40),
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_wrap_text() {
        let lines = wrap_text("the quick brown fox jumps", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps"]);
        assert!(lines.iter().all(|l| l.chars().count() <= 10));
    }

    #[test]
    fn test_wrap_splits_long_words_and_keeps_paragraphs() {
        let lines = wrap_text("abcdefghijkl\nnext", 5);
        assert_eq!(lines, vec!["abcde", "fghij", "kl", "next"]);
    }

    #[test]
    fn test_printable() {
        assert_eq!(printable("Zürich"), "Zürich");
        assert_eq!(printable("日本"), "??");
    }

    #[test]
    fn test_render_case_report() {
        let bytes = render_case_report(&sample()).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        assert!(bytes.len() > 500);
    }
}
