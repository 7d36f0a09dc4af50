//! Bot reply text → [`ParsedRecord`].
//!
//! The upstream bot answers in loosely formatted, partially localized text.
//! Parsing is best-effort and total: every field is extracted independently
//! and a field that does not match is simply left `None`.

use std::{collections::BTreeMap, path::Path, sync::OnceLock};

use regex::Regex;

use crate::{
    errors::Error,
    record::{HistoryEntry, ParsedRecord},
    Result,
};

/// Localized label → canonical English label, applied before matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    entries: Vec<(String, String)>,
}

impl Default for LabelTable {
    fn default() -> Self {
        Self {
            entries: vec![
                ("Телефон".to_string(), "Phone".to_string()),
                (
                    "История изменения имени".to_string(),
                    "Name change history".to_string(),
                ),
                ("Интересовались этим".to_string(), "Viewed by".to_string()),
            ],
        }
    }
}

impl LabelTable {
    /// Add or replace substitutions. Later entries win over defaults.
    pub fn extend<I, K, V>(&mut self, extra: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (from, to) in extra {
            let from = from.into();
            let to = to.into();
            if from.is_empty() {
                continue;
            }
            match self.entries.iter_mut().find(|(f, _)| *f == from) {
                Some(entry) => entry.1 = to,
                None => self.entries.push((from, to)),
            }
        }
        // Longer labels first so a label that contains another is replaced whole.
        self.entries
            .sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));
    }

    /// Defaults plus the substitutions in a JSON object (`{"Телефон": "Phone"}`).
    pub fn with_json(json: &str) -> Result<Self> {
        let extra: BTreeMap<String, String> = serde_json::from_str(json)?;
        let mut table = Self::default();
        table.extend(extra);
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read label table {}: {e}", path.display()))
        })?;
        Self::with_json(&raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (from, to) in &self.entries {
            if out.contains(from.as_str()) {
                out = out.replace(from.as_str(), to);
            }
        }
        out
    }
}

struct Patterns {
    username: Regex,
    id: Regex,
    phone: Regex,
    viewed_by: Regex,
    history: Regex,
    number: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        username: Regex::new(r"t\.me/([A-Za-z0-9_]+)").expect("valid regex"),
        id: Regex::new(r"ID(?:[ \t]*[:：][ \t]*|[ \t]+)([0-9]+)").expect("valid regex"),
        phone: Regex::new(r"Phone(?:[ \t]*[:：][ \t]*|[ \t]+)\+?([0-9]+)").expect("valid regex"),
        viewed_by: Regex::new(r"Viewed by(?:[ \t]*[:：])?[ \t]*([0-9]+)").expect("valid regex"),
        history: Regex::new(r"([0-9]{2}\.[0-9]{2}\.[0-9]{4})[ \t]*→[ \t]*@(\w+),\s*([0-9][0-9, \t]*)")
            .expect("valid regex"),
        number: Regex::new(r"[0-9]+").expect("valid regex"),
    })
}

/// Reply parser with a configurable label table.
#[derive(Clone, Debug, Default)]
pub struct ReplyParser {
    labels: LabelTable,
}

impl ReplyParser {
    pub fn new(labels: LabelTable) -> Self {
        Self { labels }
    }

    pub fn parse(&self, text: &str) -> ParsedRecord {
        let p = patterns();
        let text = self.labels.apply(text);

        let capture = |re: &Regex| {
            re.captures(&text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };

        ParsedRecord {
            success: !text.trim().is_empty(),
            username: capture(&p.username),
            id: capture(&p.id),
            phone: capture(&p.phone),
            viewed_by: capture(&p.viewed_by).and_then(|s| s.parse::<u64>().ok()),
            name_history: p
                .history
                .captures_iter(&text)
                .map(|c| HistoryEntry {
                    date: c[1].to_string(),
                    username: c[2].to_string(),
                    // Only the first number of the trailing group is kept, matching
                    // what the bot's consumers have always received.
                    id: p.number.find(&c[3]).map(|m| m.as_str().to_string()),
                })
                .collect(),
        }
    }
}

/// Parse with the default label table.
pub fn parse_reply(text: &str) -> ParsedRecord {
    ReplyParser::default().parse(text)
}
