use once_cell::sync::Lazy;
use regex::Regex;

static UNIT_CANONICAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^单位\s*[:：]\s*(.+)$").expect("unit canonical regex"));
static UNIT_NAMED_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^单位\s*([^\s:：]+)\s*[:：]\s*(.+)$").expect("unit named value regex")
});
static UNIT_BARE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^单位\s*([^\s:：]+)\s*$").expect("unit bare name regex"));

static FULLWIDTH_BRACKETS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[【】]").expect("fullwidth bracket regex"));
static EXT_SPACING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\.\s+([A-Za-z0-9]+)").expect("extension spacing regex"));

static SOURCE_MEGA_UNIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"单位\s*兆").expect("source mega unit regex"));
static IN_MEGABYTES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\(\s*in\s+megabytes\s*\)").expect("in megabytes regex"));
static UNIT_MEGABYTES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bunit\s*:\s*(?:megabytes\s*:\s*m|m\s*:\s*m|megabytes)\b")
        .expect("unit megabytes regex")
});
static MEGABYTES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bmegabytes\b").expect("megabytes regex"));

/// A translation decided without the model, plus any complaints about the source phrasing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForcedTranslation {
    pub text: String,
    pub notes: Vec<String>,
}

/// Recognises the `单位：X` family. Malformed variants get the same rendering plus a note.
pub fn force_unit_translation(source: &str) -> Option<ForcedTranslation> {
    let text = source.trim();
    if !text.starts_with("单位") {
        return None;
    }

    if let Some(caps) = UNIT_CANONICAL_RE.captures(text) {
        let value = caps[1].trim();
        if !value.is_empty() {
            return Some(ForcedTranslation {
                text: format!("unit: {value}"),
                notes: Vec::new(),
            });
        }
    }

    if let Some(caps) = UNIT_NAMED_VALUE_RE.captures(text) {
        let name = caps[1].trim();
        let value = caps[2].trim();
        let best = if value.is_empty() { name } else { value };
        return Some(ForcedTranslation {
            text: format!("unit: {best}"),
            notes: vec![format!(
                "unit label not in canonical form; expected 单位：{value} or 单位：{name}"
            )],
        });
    }

    if let Some(caps) = UNIT_BARE_NAME_RE.captures(text) {
        let name = caps[1].trim();
        return Some(ForcedTranslation {
            text: format!("unit: {name}"),
            notes: vec![format!(
                "unit label missing colon; expected 单位：{name}"
            )],
        });
    }

    None
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostProcessed {
    pub text: String,
    pub notes: Vec<String>,
}

/// Deterministic corrections applied to every restored translation.
pub fn post_process(source: &str, translated: &str) -> PostProcessed {
    let mut notes: Vec<String> = Vec::new();
    let mut text = translated.to_string();

    if FULLWIDTH_BRACKETS_RE.is_match(&text) {
        text = text.replace('【', "[").replace('】', "]");
        notes.push("full-width brackets normalised to []".to_string());
    }

    let fixed = EXT_SPACING_RE.replace_all(&text, "*.$1");
    if fixed != text {
        text = fixed.into_owned();
        notes.push("extension pattern spacing fixed (*. ext -> *.ext)".to_string());
    }

    if SOURCE_MEGA_UNIT_RE.is_match(source) {
        let before = text.clone();
        text = IN_MEGABYTES_RE.replace_all(&text, "(unit: M)").into_owned();
        text = UNIT_MEGABYTES_RE.replace_all(&text, "unit: M").into_owned();
        text = MEGABYTES_RE.replace_all(&text, "M").into_owned();
        if text != before {
            notes.push("megabyte unit normalised to 'unit: M'".to_string());
        }
    }

    PostProcessed { text, notes }
}
