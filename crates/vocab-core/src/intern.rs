//! Interning of phrases shared between cards.

use crate::error::{CoreError, CoreResult};
use crate::models::{Card, CardId, Language, Phrase, Translation};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A translation as stored: `(text, language, text, language)`.
pub type RawTranslation = (String, String, String, String);

/// Table of parsed phrases keyed by `(text, language)`.
///
/// Cards loaded through the same interner share one `Arc<Phrase>` per
/// distinct phrase, so parsing happens once per phrase.
#[derive(Debug, Default)]
pub struct PhraseInterner {
    table: HashMap<(String, Language), Arc<Phrase>>,
}

impl PhraseInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the shared phrase for `text`, parsing it on first use.
    pub fn intern(&mut self, text: &str, language: Language) -> Arc<Phrase> {
        let key = (text.trim().to_string(), language);
        self.table
            .entry(key)
            .or_insert_with(|| Arc::new(Phrase::parse(text, language)))
            .clone()
    }

    /// Like [`intern`](Self::intern), with the language given as a storage tag.
    pub fn intern_tagged(&mut self, text: &str, tag: &str) -> CoreResult<Arc<Phrase>> {
        let language = tag.parse::<Language>()?;
        Ok(self.intern(text, language))
    }

    /// Build a card from stored translation rows.
    ///
    /// An unknown language tag makes the whole card malformed.
    pub fn build_card(
        &mut self,
        id: CardId,
        rows: &[RawTranslation],
        groups: impl IntoIterator<Item = String>,
    ) -> CoreResult<Card> {
        let mut translations = Vec::with_capacity(rows.len());
        for (text1, tag1, text2, tag2) in rows {
            let first = self.intern_tagged(text1, tag1).map_err(|e| malformed(id, e))?;
            let second = self.intern_tagged(text2, tag2).map_err(|e| malformed(id, e))?;
            translations.push(Translation::new(first, second));
        }

        Ok(Card {
            id,
            translations,
            groups: groups.into_iter().collect::<BTreeSet<_>>(),
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

fn malformed(id: CardId, err: CoreError) -> CoreError {
    match err {
        CoreError::UnknownLanguage(tag) => CoreError::malformed(id, format!("unknown language tag '{}'", tag)),
        other => other,
    }
}
