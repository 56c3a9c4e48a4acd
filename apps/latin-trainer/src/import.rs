//! Import of decks from TOML files.
//!
//! ```toml
//! [[group]]
//! name = "lektion-1"
//! parent = "latein"
//!
//! [[card]]
//! translations = [["rex, regis", "latin", "König", "german"]]
//! groups = ["lektion-1"]
//! ```

use crate::db::{Database, DbResult};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};
use vocab_core::{Language, RawTranslation};

#[derive(Debug, Deserialize)]
struct DeckFile {
    #[serde(default, rename = "group")]
    groups: Vec<GroupEntry>,
    #[serde(default, rename = "card")]
    cards: Vec<CardEntry>,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    name: String,
    #[serde(default)]
    parent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardEntry {
    translations: Vec<[String; 4]>,
    #[serde(default)]
    groups: Vec<String>,
}

/// What an import did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub groups: usize,
    pub new_cards: usize,
    pub known_cards: usize,
    /// One message per card that was not imported.
    pub rejected: Vec<String>,
}

pub fn import_deck(db: &Database, path: &Path) -> DbResult<ImportReport> {
    let content = std::fs::read_to_string(path)?;
    let report = import_str(db, &content)?;
    info!(
        path = %path.display(),
        new = report.new_cards,
        known = report.known_cards,
        rejected = report.rejected.len(),
        "imported deck"
    );
    Ok(report)
}

/// Import a deck given as TOML text.
///
/// Cards with an unknown language or without translations are reported and
/// skipped; the rest of the deck is still imported.
pub fn import_str(db: &Database, content: &str) -> DbResult<ImportReport> {
    let deck: DeckFile = toml::from_str(content)?;
    let mut report = ImportReport::default();

    for group in &deck.groups {
        db.insert_group(&group.name, group.parent.as_deref())?;
        report.groups += 1;
    }

    for (index, card) in deck.cards.iter().enumerate() {
        let rows = match validate_card(card) {
            Ok(rows) => rows,
            Err(reason) => {
                warn!(card = index + 1, %reason, "rejecting card");
                report.rejected.push(format!("card {}: {}", index + 1, reason));
                continue;
            }
        };
        let (_, created) = db.insert_card(&rows, &card.groups)?;
        if created {
            report.new_cards += 1;
        } else {
            report.known_cards += 1;
        }
    }
    Ok(report)
}

fn validate_card(card: &CardEntry) -> Result<Vec<RawTranslation>, String> {
    if card.translations.is_empty() {
        return Err("no translations".to_string());
    }
    card.translations
        .iter()
        .map(|[text1, tag1, text2, tag2]| {
            for (text, tag) in [(text1, tag1), (text2, tag2)] {
                if text.trim().is_empty() {
                    return Err("empty phrase".to_string());
                }
                tag.parse::<Language>().map_err(|e| e.to_string())?;
            }
            Ok((text1.clone(), tag1.trim().to_lowercase(), text2.clone(), tag2.trim().to_lowercase()))
        })
        .collect()
}
