//! Prompts for the map and reduce phases and a best-effort parser for the
//! model's free-text answers.
//!
//! Nothing here fails on unexpected input: a response that ignores the
//! requested structure yields empty lists and `None` fields.

use billdigest_core::{defaults, BucketSpan, DocumentId, FinalSummary};

/// Appended after head truncation of a bucket's text.
pub const HEAD_TRUNCATION_MARKER: &str = "\n\n[... content truncated ...]";

/// Inserted where the middle of the reduce input was dropped.
pub const MIDDLE_TRUNCATION_MARKER: &str = "\n\n[... middle sections truncated ...]\n\n";

/// Final financial text when the model gives none.
pub const NO_FINANCIAL_INFO: &str = "No specific financial provisions identified";

/// Separator between chunk texts of one bucket.
pub const CHUNK_SEPARATOR: &str = "\n\n";

/// Terms that mark a bill as high-salience.
const IMPORTANCE_TERMS: &[&str] = &[
    "appropriates",
    "billion",
    "million",
    "national security",
    "emergency",
    "crisis",
    "reform",
    "establishes",
    "creates",
];

/// Section names the prompts ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    ExecutiveSummary,
    KeyProvisions,
    FinancialImpact,
    Timeline,
    Significance,
    Definitions,
    AffectedEntities,
}

impl Section {
    const ALL: [Section; 7] = [
        Section::ExecutiveSummary,
        Section::KeyProvisions,
        Section::FinancialImpact,
        Section::Timeline,
        Section::Significance,
        Section::Definitions,
        Section::AffectedEntities,
    ];

    fn name(self) -> &'static str {
        match self {
            Section::ExecutiveSummary => "executive summary",
            Section::KeyProvisions => "key provisions",
            Section::FinancialImpact => "financial impact",
            Section::Timeline => "timeline",
            Section::Significance => "significance",
            Section::Definitions => "definitions",
            Section::AffectedEntities => "affected entities",
        }
    }
}

// =============================================================================
// TRUNCATION
// =============================================================================

fn boundary_before(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn boundary_after(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos.min(text.len())
}

/// Keep the first `max_chars` bytes and append [`HEAD_TRUNCATION_MARKER`].
pub fn truncate_head(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let cut = boundary_before(text, max_chars);
    format!("{}{}", &text[..cut], HEAD_TRUNCATION_MARKER)
}

/// Keep half of `max_chars` from each end and drop the middle.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let half = max_chars / 2;
    let head = boundary_before(text, half);
    let tail = boundary_after(text, text.len() - half);
    format!(
        "{}{}{}",
        &text[..head],
        MIDDLE_TRUNCATION_MARKER,
        &text[tail..]
    )
}

// =============================================================================
// PROMPTS
// =============================================================================

/// Map-phase prompt for one bucket.
pub fn map_prompt(span: &BucketSpan, context: &str) -> String {
    format!(
        "Summarize this section of a legislative bill (pages {start}-{end}).\n\n\
         Provide a structured summary with:\n\n\
         1. **Key Provisions**: Bullet points of major provisions (cite page ranges)\n\
         2. **Financial Impact**: Any appropriations, authorizations, or penalties\n\
         3. **Timeline**: Deadlines, effective dates, implementation schedules\n\
         4. **Definitions**: Key terms defined in this section\n\
         5. **Affected Entities**: Who or what is impacted by these provisions\n\n\
         Format your response as structured text with clear sections.\n\
         Include page citations in [pp. X-Y] format for each major point.\n\n\
         Text:\n{context}\n",
        start = span.page_start,
        end = span.page_end,
        context = context,
    )
}

/// Bucket summaries joined under page-range headers.
pub fn reduce_context<'a, I>(summaries: I) -> String
where
    I: IntoIterator<Item = (i32, i32, &'a str)>,
{
    summaries
        .into_iter()
        .map(|(start, end, text)| format!("## Pages {}-{}\n{}", start, end, text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Reduce-phase prompt asking for the six fixed sections.
pub fn reduce_prompt(doc: &DocumentId, context: &str) -> String {
    format!(
        "Create a comprehensive summary of legislative bill {doc} based on the section summaries below.\n\n\
         Structure your response EXACTLY as follows:\n\n\
         ## EXECUTIVE SUMMARY\n\
         [2-3 paragraph overview of the bill's purpose and major impacts]\n\n\
         ## KEY PROVISIONS\n\
         [Bullet points of major provisions with page citations in [pp. X-Y] format]\n\n\
         ## FINANCIAL IMPACT\n\
         [Summary of appropriations, authorizations, penalties, and fiscal effects]\n\n\
         ## TIMELINE & IMPLEMENTATION\n\
         [Key dates, deadlines, and implementation schedules]\n\n\
         ## SIGNIFICANCE\n\
         [Why this bill matters: who it affects and how]\n\n\
         ## DEFINITIONS\n\
         [Key terms and concepts defined in the bill]\n\n\
         Source summaries:\n{context}\n",
        doc = doc,
        context = context,
    )
}

// =============================================================================
// LINE CLASSIFICATION
// =============================================================================

fn is_heading(line: &str) -> bool {
    line.starts_with('#')
}

/// Text after a `-`, `•` or `*` bullet marker, if `line` is a bullet.
fn bullet_text(line: &str) -> Option<&str> {
    let mut chars = line.chars();
    let marker = chars.next()?;
    if !matches!(marker, '-' | '•' | '*') {
        return None;
    }
    let rest = chars.as_str();
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// The section a header-like line opens, if any.
///
/// Accepts markdown headings, numbered items and bold labels, e.g.
/// `## FINANCIAL IMPACT`, `2. **Financial Impact**: ...`, `Timeline:`.
fn section_header(line: &str) -> Option<Section> {
    if bullet_text(line).is_some() {
        return None;
    }
    let stripped = line
        .trim_start_matches(|c: char| {
            c == '#' || c == '*' || c == '.' || c == ')' || c.is_ascii_digit() || c.is_whitespace()
        })
        .to_lowercase();

    Section::ALL.into_iter().find(|section| {
        stripped.strip_prefix(section.name()).is_some_and(|rest| {
            let rest = rest.trim_start();
            is_heading(line)
                || rest.is_empty()
                || rest.starts_with(&[':', '*', '&', '('][..])
        })
    })
}

/// Non-empty trimmed lines of `section`, up to the next heading or section.
fn section_lines(text: &str, section: Section) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut inside = false;

    for raw in text.lines() {
        let line = raw.trim();
        if !inside {
            inside = section_header(line) == Some(section);
            continue;
        }
        if is_heading(line) || section_header(line).is_some() {
            break;
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

// =============================================================================
// BUCKET SUMMARY
// =============================================================================

/// Provision lines under the "key provisions" section, markers removed.
pub fn extract_provisions(text: &str) -> Vec<String> {
    section_lines(text, Section::KeyProvisions)
        .into_iter()
        .map(|line| bullet_text(line).unwrap_or(line))
        .filter(|line| !line.is_empty())
        .take(defaults::MAX_KEY_PROVISIONS)
        .map(str::to_string)
        .collect()
}

/// The "financial impact" section joined into one paragraph.
pub fn extract_financial_impact(text: &str) -> Option<String> {
    let lines = section_lines(text, Section::FinancialImpact);
    if lines.is_empty() {
        None
    } else {
        Some(lines.join(" "))
    }
}

// =============================================================================
// FINAL SUMMARY
// =============================================================================

/// Bullet lines anywhere in the text, markers removed.
pub fn extract_key_points(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| bullet_text(line.trim()))
        .filter(|point| !point.is_empty())
        .take(defaults::MAX_KEY_POINTS)
        .map(str::to_string)
        .collect()
}

/// Financial section of the final summary, or [`NO_FINANCIAL_INFO`].
pub fn extract_financial_info(text: &str) -> String {
    extract_financial_impact(text).unwrap_or_else(|| NO_FINANCIAL_INFO.to_string())
}

/// 1 to 5 from the number of distinct salience terms present.
pub fn estimate_importance(text: &str) -> u8 {
    let lower = text.to_lowercase();
    let matches = IMPORTANCE_TERMS
        .iter()
        .filter(|term| lower.contains(*term))
        .count();
    match matches {
        6.. => 5,
        4..=5 => 4,
        2..=3 => 3,
        1 => 2,
        _ => 1,
    }
}

/// Human-readable reading time at a fixed words-per-minute rate.
pub fn estimate_reading_time(text: &str) -> String {
    let words = text.split_whitespace().count();
    let minutes = (words / defaults::READING_WORDS_PER_MINUTE).max(1);

    if minutes == 1 {
        return "1 minute".to_string();
    }
    if minutes < 60 {
        return format!("{} minutes", minutes);
    }
    let hours = minutes / 60;
    let remaining = minutes % 60;
    let unit = if hours > 1 { "hours" } else { "hour" };
    if remaining == 0 {
        format!("{} {}", hours, unit)
    } else {
        format!("{} {} {} minutes", hours, unit, remaining)
    }
}

/// Parse a reduce-phase response. The full text becomes the `tldr`.
pub fn parse_final_summary(text: &str) -> FinalSummary {
    FinalSummary {
        tldr: text.to_string(),
        key_points: extract_key_points(text),
        financial_info: extract_financial_info(text),
        importance: estimate_importance(text),
        reading_time: estimate_reading_time(text),
    }
}
