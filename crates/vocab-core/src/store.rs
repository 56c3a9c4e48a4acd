//! Storage collaborator interface.
//!
//! The scheduler never talks to a database directly; it goes through
//! [`CardStore`]. [`MemoryStore`] keeps everything in maps and backs the tests.

use crate::error::{CoreError, CoreResult};
use crate::groups::GroupForest;
use crate::intern::{PhraseInterner, RawTranslation};
use crate::models::{Card, CardId, Shelf, UsedCard};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

/// Operations the core needs from persistent storage.
///
/// Updates must be durable when the call returns: the scheduler commits every
/// graded card before moving on.
pub trait CardStore {
    /// Ids and shelves of all used cards with `due_date <= as_of`.
    fn due_card_shelves(&self, as_of: NaiveDate) -> CoreResult<BTreeMap<CardId, Shelf>>;

    /// Load a used card with its translations; `None` if it is not used.
    fn load_card(&mut self, id: CardId) -> CoreResult<Option<UsedCard>>;

    /// Persist new scheduling state of a used card.
    fn update_card(&mut self, id: CardId, shelf: Shelf, due_date: NaiveDate) -> CoreResult<()>;

    /// Ids of all cards in a group, used or not; `None` if the group is unknown.
    fn group_card_ids(&self, group: &str, include_descendants: bool) -> CoreResult<Option<Vec<CardId>>>;

    /// Ids of all used cards on a shelf.
    fn shelf_card_ids(&self, shelf: Shelf) -> CoreResult<Vec<CardId>>;

    fn card_is_used(&self, id: CardId) -> CoreResult<bool>;

    /// Start scheduling a card for the active profile.
    fn add_used_card(&mut self, id: CardId, shelf: Shelf, due_date: NaiveDate) -> CoreResult<()>;

    /// Used cards of a group; `None` if the group is unknown.
    ///
    /// Malformed cards are logged and left out.
    fn get_cards_in_group(&mut self, group: &str, include_descendants: bool) -> CoreResult<Option<Vec<UsedCard>>> {
        let Some(ids) = self.group_card_ids(group, include_descendants)? else {
            return Ok(None);
        };
        Ok(Some(self.load_cards(&ids)?))
    }

    /// Load several used cards, skipping unused and malformed ones.
    fn load_cards(&mut self, ids: &[CardId]) -> CoreResult<Vec<UsedCard>> {
        let mut cards = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.load_card(id) {
                Ok(Some(card)) => cards.push(card),
                Ok(None) => {}
                Err(e) if e.is_card_local() => warn!(card_id = id, error = %e, "skipping card"),
                Err(e) => return Err(e),
            }
        }
        Ok(cards)
    }
}

/// In-memory [`CardStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    interner: PhraseInterner,
    cards: BTreeMap<CardId, Card>,
    used: BTreeMap<CardId, (Shelf, NaiveDate)>,
    forest: GroupForest,
    members: HashMap<String, BTreeSet<CardId>>,
    updates: Vec<(CardId, Shelf, NaiveDate)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a card to the deck and return its id.
    pub fn add_card(&mut self, rows: &[RawTranslation], groups: &[&str]) -> CoreResult<CardId> {
        let id = self.cards.keys().next_back().map_or(1, |last| last + 1);
        let card = self
            .interner
            .build_card(id, rows, groups.iter().map(|g| g.to_string()))?;
        for group in groups {
            self.forest.insert(group, None);
            self.members.entry(group.to_string()).or_default().insert(id);
        }
        self.cards.insert(id, card);
        Ok(id)
    }

    /// Insert a card as-is, bypassing parsing of stored rows.
    pub fn insert_card(&mut self, card: Card) {
        for group in &card.groups {
            self.forest.insert(group, None);
            self.members.entry(group.clone()).or_default().insert(card.id);
        }
        self.cards.insert(card.id, card);
    }

    /// Add a group below an optional parent.
    pub fn add_group(&mut self, name: &str, parent: Option<&str>) {
        self.forest.insert(name, parent);
    }

    /// Every `update_card` call in order.
    pub fn updates(&self) -> &[(CardId, Shelf, NaiveDate)] {
        &self.updates
    }

    /// Current scheduling state of a used card.
    pub fn schedule(&self, id: CardId) -> Option<(Shelf, NaiveDate)> {
        self.used.get(&id).copied()
    }
}

impl CardStore for MemoryStore {
    fn due_card_shelves(&self, as_of: NaiveDate) -> CoreResult<BTreeMap<CardId, Shelf>> {
        Ok(self
            .used
            .iter()
            .filter(|(_, (_, due))| *due <= as_of)
            .map(|(&id, &(shelf, _))| (id, shelf))
            .collect())
    }

    fn load_card(&mut self, id: CardId) -> CoreResult<Option<UsedCard>> {
        let Some(&(shelf, due_date)) = self.used.get(&id) else {
            return Ok(None);
        };
        let card = self
            .cards
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::malformed(id, "scheduled card has no content"))?;
        Ok(Some(UsedCard::new(card, shelf, due_date)))
    }

    fn update_card(&mut self, id: CardId, shelf: Shelf, due_date: NaiveDate) -> CoreResult<()> {
        let entry = self
            .used
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("card {} is not used", id)))?;
        *entry = (shelf, due_date);
        self.updates.push((id, shelf, due_date));
        Ok(())
    }

    fn group_card_ids(&self, group: &str, include_descendants: bool) -> CoreResult<Option<Vec<CardId>>> {
        let names = if include_descendants {
            match self.forest.descendant_names(group) {
                Some(names) => names,
                None => return Ok(None),
            }
        } else if self.forest.contains(group) {
            vec![group]
        } else {
            return Ok(None);
        };

        let ids: BTreeSet<CardId> = names
            .iter()
            .filter_map(|name| self.members.get(*name))
            .flatten()
            .copied()
            .collect();
        Ok(Some(ids.into_iter().collect()))
    }

    fn shelf_card_ids(&self, shelf: Shelf) -> CoreResult<Vec<CardId>> {
        Ok(self
            .used
            .iter()
            .filter(|(_, (s, _))| *s == shelf)
            .map(|(&id, _)| id)
            .collect())
    }

    fn card_is_used(&self, id: CardId) -> CoreResult<bool> {
        Ok(self.used.contains_key(&id))
    }

    fn add_used_card(&mut self, id: CardId, shelf: Shelf, due_date: NaiveDate) -> CoreResult<()> {
        if !self.cards.contains_key(&id) {
            return Err(CoreError::NotFound(format!("card {}", id)));
        }
        self.used.entry(id).or_insert((shelf, due_date));
        Ok(())
    }
}
