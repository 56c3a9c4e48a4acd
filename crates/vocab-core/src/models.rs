//! Data models for the vocabulary trainer.

use crate::error::{CoreError, CoreResult};
use chrono::{Duration, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Card identifier as assigned by the storage layer.
pub type CardId = i64;

/// Leitner box index.
pub type Shelf = u8;

/// Shelf of freshly failed cards.
pub const MIN_SHELF: Shelf = 0;
/// Highest shelf; promotion saturates here.
pub const MAX_SHELF: Shelf = 7;

/// Check that a raw shelf value lies in `MIN_SHELF..=MAX_SHELF`.
pub fn validate_shelf(raw: i64) -> CoreResult<Shelf> {
    if (MIN_SHELF as i64..=MAX_SHELF as i64).contains(&raw) {
        Ok(raw as Shelf)
    } else {
        Err(CoreError::InvalidShelf(raw))
    }
}

/// Parse an ISO `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> CoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| CoreError::InvalidDate(raw.to_string()))
}

/// Language a phrase is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Latin,
    German,
}

impl Language {
    /// Tag used in storage and deck files.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Latin => "latin",
            Self::German => "german",
        }
    }
}

impl FromStr for Language {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "latin" => Ok(Self::Latin),
            "german" => Ok(Self::German),
            other => Err(CoreError::UnknownLanguage(other.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Grammatical category, only where questioning differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PartOfSpeech {
    /// Principal parts are elicited from the user.
    Verb,
    #[default]
    Other,
}

/// Shape of a phrase's text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PhraseKind {
    /// A single Latin word given by its root forms, optionally annotated.
    Word {
        root_forms: String,
        context: String,
        part_of_speech: PartOfSpeech,
    },
    /// Free text: German meanings and multi-word Latin expressions.
    WordGroup,
}

/// A piece of text in one language.
///
/// Equality and hashing follow `(text, language)`; the kind is derived from
/// those two and never disagrees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Phrase {
    text: String,
    language: Language,
    kind: PhraseKind,
}

fn context_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(?P<root>.*?\S)\s+(?P<context>[(\[].*)$").expect("valid regex"))
}

fn principal_parts_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\w+, \w+, .+$").expect("valid regex"))
}

impl Phrase {
    /// Parse raw text into a phrase of the given language.
    pub fn parse(text: &str, language: Language) -> Self {
        let text = text.trim().to_string();
        let kind = match language {
            Language::German => PhraseKind::WordGroup,
            Language::Latin => parse_latin(&text),
        };
        Self { text, language, kind }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn kind(&self) -> &PhraseKind {
        &self.kind
    }

    pub fn is_word(&self) -> bool {
        matches!(self.kind, PhraseKind::Word { .. })
    }

    pub fn is_verb(&self) -> bool {
        matches!(
            self.kind,
            PhraseKind::Word {
                part_of_speech: PartOfSpeech::Verb,
                ..
            }
        )
    }

    /// Root forms of a word, or the whole text for word groups.
    pub fn root_forms(&self) -> &str {
        match &self.kind {
            PhraseKind::Word { root_forms, .. } => root_forms,
            PhraseKind::WordGroup => &self.text,
        }
    }

    /// Context annotation of a word; empty for word groups.
    pub fn context(&self) -> &str {
        match &self.kind {
            PhraseKind::Word { context, .. } => context,
            PhraseKind::WordGroup => "",
        }
    }

    /// Split a verb's principal parts into the shown infinitive and the
    /// elicited remainder.
    pub fn principal_parts(&self) -> Option<(&str, String)> {
        if !self.is_verb() {
            return None;
        }
        let mut parts = self.root_forms().split(',').map(str::trim);
        let infinitive = parts.next()?;
        let rest: Vec<&str> = parts.collect();
        Some((infinitive, rest.join(", ")))
    }
}

fn parse_latin(text: &str) -> PhraseKind {
    let (root_forms, context) = match context_pattern().captures(text) {
        Some(caps) => (caps["root"].to_string(), caps["context"].to_string()),
        None => (text.to_string(), String::new()),
    };

    let parts: Vec<&str> = root_forms.split(',').map(str::trim).collect();
    let single_tokens = parts
        .iter()
        .all(|part| !part.is_empty() && !part.contains(char::is_whitespace));
    if !single_tokens {
        return PhraseKind::WordGroup;
    }

    let part_of_speech = if looks_like_verb(&root_forms, &parts) {
        PartOfSpeech::Verb
    } else {
        PartOfSpeech::Other
    };

    PhraseKind::Word {
        root_forms: parts.join(", "),
        context,
        part_of_speech,
    }
}

fn looks_like_verb(root_forms: &str, parts: &[&str]) -> bool {
    if parts.len() < 3 || !principal_parts_pattern().is_match(root_forms) {
        return false;
    }
    let infinitive = parts[0];
    let first_person = parts[1];
    infinitive.ends_with("re")
        || infinitive.ends_with("ri")
        || first_person.ends_with('o')
        || first_person.ends_with("or")
}

impl fmt::Display for Phrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// How the two sides of a translation relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationKind {
    /// Latin ↔ Latin.
    Synonym,
    /// Latin ↔ German.
    Meaning,
    /// German ↔ German; carries nothing to question.
    GermanPair,
}

/// An unordered pairing of two phrases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Translation {
    pub first: Arc<Phrase>,
    pub second: Arc<Phrase>,
}

impl Translation {
    pub fn new(first: Arc<Phrase>, second: Arc<Phrase>) -> Self {
        Self { first, second }
    }

    pub fn kind(&self) -> TranslationKind {
        match (self.first.language(), self.second.language()) {
            (Language::Latin, Language::Latin) => TranslationKind::Synonym,
            (Language::German, Language::German) => TranslationKind::GermanPair,
            _ => TranslationKind::Meaning,
        }
    }

    /// The pair with its Latin side first, if it has one.
    pub fn latin_first(&self) -> (&Arc<Phrase>, &Arc<Phrase>) {
        if self.first.language() == Language::German {
            (&self.second, &self.first)
        } else {
            (&self.first, &self.second)
        }
    }
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (latin, other) = self.latin_first();
        write!(f, "{} -> {}", latin, other)
    }
}

/// A vocabulary card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub id: CardId,
    pub translations: Vec<Translation>,
    pub groups: BTreeSet<String>,
}

impl Card {
    pub fn new(id: CardId, translations: Vec<Translation>) -> Self {
        Self {
            id,
            translations,
            groups: BTreeSet::new(),
        }
    }

    /// Add a group name.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }
}

/// A card with the active profile's scheduling state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedCard {
    pub card: Card,
    pub shelf: Shelf,
    pub due_date: NaiveDate,
}

impl UsedCard {
    pub fn new(card: Card, shelf: Shelf, due_date: NaiveDate) -> Self {
        Self {
            card,
            shelf: shelf.min(MAX_SHELF),
            due_date,
        }
    }

    pub fn id(&self) -> CardId {
        self.card.id
    }

    /// Move one shelf up and push the due date out exponentially.
    pub fn promote(&mut self, today: NaiveDate) {
        self.shelf = self.shelf.saturating_add(1).min(MAX_SHELF);
        self.due_date = today + review_interval(self.shelf);
    }

    /// Back to the bottom shelf, due immediately.
    pub fn demote(&mut self, today: NaiveDate) {
        self.shelf = MIN_SHELF;
        self.due_date = today;
    }
}

/// Interval after a correct answer lands a card on `shelf`: `2^shelf - 1` days.
pub fn review_interval(shelf: Shelf) -> Duration {
    Duration::days((1i64 << shelf.min(MAX_SHELF)) - 1)
}

/// Outcome of questioning one card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Everything right, or forwarded by the user.
    Correct,
    /// A single slip; the card gets a second chance.
    Again,
    /// Too many mistakes.
    Wrong,
}

impl Verdict {
    /// Get display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Correct => "Correct",
            Self::Again => "Again",
            Self::Wrong => "Wrong",
        }
    }
}

/// Number of cards per shelf, indexed by shelf.
pub type ShelfCounts = [usize; MAX_SHELF as usize + 1];

/// Count cards per shelf.
pub fn shelf_counts<'a>(cards: impl IntoIterator<Item = &'a UsedCard>) -> ShelfCounts {
    let mut counts = ShelfCounts::default();
    for card in cards {
        counts[card.shelf.min(MAX_SHELF) as usize] += 1;
    }
    counts
}

/// Result of a questioning session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Cards per shelf before anything was questioned.
    pub shelf_counts_before: ShelfCounts,
    /// Cards promoted in the first pass or second chance.
    pub correct_count: usize,
    /// Cards that entered the learning loop.
    pub wrong_count: usize,
    /// Cards that were granted a second chance.
    pub again_count: usize,
    /// Cards skipped because of malformed content.
    pub skipped_count: usize,
    /// Cards still open after the first pass (second chance + wrong).
    pub remaining_after_first_pass: usize,
    /// Cards still open after the second chance.
    pub remaining_after_second_chance: usize,
    /// Batches drawn in the learning loop.
    pub learning_batches: usize,
    /// Drill rounds over all learning batches.
    pub rounds_in_learning_loop: usize,
}

impl SessionSummary {
    /// Total number of cards the session started with.
    pub fn total_cards(&self) -> usize {
        self.shelf_counts_before.iter().sum()
    }
}
