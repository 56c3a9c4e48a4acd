//! Leitner scheduling and the questioning session.
//!
//! A session runs in three phases over a batch of cards:
//!
//! 1. **First pass**: every card is questioned once. Correct cards move up a
//!    shelf, wrong cards drop to shelf 0 right away, and single slips on
//!    higher shelves are put aside for a second chance.
//! 2. **Second chance**: the put-aside cards are questioned again; anything
//!    but a correct answer drops them to shelf 0.
//! 3. **Learning loop**: the dropped cards are drilled in small batches until
//!    a batch has been answered without mistakes in consecutive passes; then
//!    the batch moves up to shelf 1.
//!
//! Every shelf change is written to the store as soon as it happens.

use crate::clock::{Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::{CoreError, CoreResult};
use crate::models::{shelf_counts, validate_shelf, CardId, SessionSummary, Shelf, ShelfCounts, UsedCard, Verdict};
use crate::store::CardStore;
use chrono::NaiveDate;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Anything that can question a user over a card.
pub trait CardGrader {
    fn grade_card(&mut self, card: &UsedCard) -> CoreResult<Verdict>;

    /// Progress notifications; ignored by default.
    fn session_event(&mut self, _event: SessionEvent<'_>) {}
}

/// Phase of a questioning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FirstPass,
    SecondChance,
    LearningLoop,
    Done,
}

/// Progress of a questioning session.
#[derive(Debug, Clone, Copy)]
pub enum SessionEvent<'a> {
    /// Cards per shelf before anything was asked.
    Started { counts: &'a ShelfCounts },
    PhaseStarted { phase: Phase, cards: usize },
    /// `index` is 1-based within the current pass.
    Questioning { card: &'a UsedCard, index: usize, total: usize },
    /// The card carries its state after the verdict was applied.
    Graded { card: &'a UsedCard, verdict: Verdict, phase: Phase },
    Skipped { card_id: CardId, error: &'a CoreError },
    LearningBatch { size: usize, remaining: usize },
    LearningRound { clean: bool, consecutive: usize, required: usize },
    Finished(&'a SessionSummary),
}

/// Which cards to question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardSelector {
    /// Due cards, capped by the portion.
    Due,
    /// All used cards on a shelf (`s0` … `s7`).
    Shelf(Shelf),
    /// A group and its descendants.
    Group(String),
}

impl FromStr for CardSelector {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "due" {
            return Ok(Self::Due);
        }
        if let Some(shelf) = s.strip_prefix('s').and_then(|n| n.parse::<i64>().ok()) {
            if let Ok(shelf) = validate_shelf(shelf) {
                return Ok(Self::Shelf(shelf));
            }
        }
        Ok(Self::Group(s.to_string()))
    }
}

/// Pick the due cards of one session.
///
/// Cards up to `always_include_max_shelf` are always taken. When more cards
/// are due than the portion allows, the remaining places go to higher-shelf
/// cards drawn without replacement, weighted by how far above the
/// always-included shelves they sit.
pub fn select_due_ids<R: Rng + ?Sized>(
    due: &BTreeMap<CardId, Shelf>,
    config: &SchedulerConfig,
    rng: &mut R,
) -> Vec<CardId> {
    let portion = config.card_portion.max(1);
    if due.len() <= portion {
        return due.keys().copied().collect();
    }

    let (mut selected, mut pool): (Vec<_>, Vec<_>) = due
        .iter()
        .map(|(&id, &shelf)| (id, shelf))
        .partition(|&(_, shelf)| shelf <= config.always_include_max_shelf);

    debug!(
        mandatory = selected.len(),
        pool = pool.len(),
        portion,
        "selecting due cards"
    );

    while selected.len() < portion && !pool.is_empty() {
        let weights = pool.iter().map(|&(_, shelf)| config.sampling_weight(shelf).max(1));
        let Ok(dist) = WeightedIndex::new(weights) else {
            break;
        };
        selected.push(pool.swap_remove(dist.sample(rng)));
    }

    selected.into_iter().map(|(id, _)| id).collect()
}

/// Decides what is due, runs sessions and moves cards between shelves.
pub struct Scheduler<S, C = SystemClock> {
    store: S,
    clock: C,
    config: SchedulerConfig,
    rng: ChaCha8Rng,
}

impl<S: CardStore> Scheduler<S, SystemClock> {
    pub fn new(store: S, config: SchedulerConfig) -> Self {
        Self::with_clock(store, SystemClock, config)
    }
}

impl<S: CardStore, C: Clock> Scheduler<S, C> {
    pub fn with_clock(store: S, clock: C, config: SchedulerConfig) -> Self {
        Self {
            store,
            clock,
            config: config.normalized(),
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Make shuffling and sampling reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Move a card one shelf up and persist it.
    pub fn correct(&mut self, card: &mut UsedCard) -> CoreResult<()> {
        let before = card.shelf;
        card.promote(self.clock.today());
        self.store.update_card(card.id(), card.shelf, card.due_date)?;
        info!(card_id = card.id(), from = before, to = card.shelf, due = %card.due_date, "promoted card");
        Ok(())
    }

    /// Drop a card to shelf 0, due today, and persist it.
    pub fn wrong(&mut self, card: &mut UsedCard) -> CoreResult<()> {
        let before = card.shelf;
        card.demote(self.clock.today());
        self.store.update_card(card.id(), card.shelf, card.due_date)?;
        info!(card_id = card.id(), from = before, "demoted card");
        Ok(())
    }

    /// Apply a verdict outside a session.
    ///
    /// There is no second chance here, so `Again` counts as wrong.
    pub fn apply_verdict(&mut self, card: &mut UsedCard, verdict: Verdict) -> CoreResult<()> {
        match verdict {
            Verdict::Correct => self.correct(card),
            Verdict::Again | Verdict::Wrong => self.wrong(card),
        }
    }

    /// Due cards as of `as_of` (today when `None`), capped by the portion.
    pub fn get_due_cards(&mut self, as_of: Option<NaiveDate>) -> CoreResult<Vec<UsedCard>> {
        let as_of = as_of.unwrap_or_else(|| self.clock.today());
        let due = self.store.due_card_shelves(as_of)?;
        let ids = select_due_ids(&due, &self.config, &mut self.rng);
        if ids.len() < due.len() {
            info!(selected = ids.len(), due = due.len(), "limited due cards to portion");
        }
        self.store.load_cards(&ids)
    }

    /// Used cards per shelf, and how many of them are due today.
    pub fn shelf_statistics(&self) -> CoreResult<(ShelfCounts, usize)> {
        let mut counts = ShelfCounts::default();
        for (shelf, count) in counts.iter_mut().enumerate() {
            *count = self.store.shelf_card_ids(shelf as Shelf)?.len();
        }
        let due = self.store.due_card_shelves(self.clock.today())?.len();
        Ok((counts, due))
    }

    /// Cards matching a selector; `None` if the named group does not exist.
    pub fn select_cards(&mut self, selector: &CardSelector) -> CoreResult<Option<Vec<UsedCard>>> {
        match selector {
            CardSelector::Due => self.get_due_cards(None).map(Some),
            CardSelector::Shelf(shelf) => {
                let ids = self.store.shelf_card_ids(*shelf)?;
                self.store.load_cards(&ids).map(Some)
            }
            CardSelector::Group(name) => self.store.get_cards_in_group(name, true),
        }
    }

    /// Start scheduling every card of a group that is not used yet.
    ///
    /// Returns the number of cards added, or `None` for an unknown group.
    pub fn use_group(&mut self, group: &str) -> CoreResult<Option<usize>> {
        let Some(ids) = self.store.group_card_ids(group, true)? else {
            return Ok(None);
        };
        let today = self.clock.today();
        let mut added = 0;
        for id in ids {
            if !self.store.card_is_used(id)? {
                self.store.add_used_card(id, self.config.default_shelf, today)?;
                added += 1;
            }
        }
        info!(group, added, "used group");
        Ok(Some(added))
    }

    /// Question one card until it is answered correctly.
    ///
    /// Every verdict is applied on the way. `None` if the card is not used.
    /// A card that cannot be graded is reported as skipped and returned
    /// unchanged.
    pub fn question_single_card<G: CardGrader + ?Sized>(
        &mut self,
        id: CardId,
        grader: &mut G,
    ) -> CoreResult<Option<UsedCard>> {
        let Some(mut card) = self.store.load_card(id)? else {
            return Ok(None);
        };
        loop {
            let verdict = match grader.grade_card(&card) {
                Ok(verdict) => verdict,
                Err(e) if e.is_card_local() => {
                    warn!(card_id = id, error = %e, "skipping card");
                    grader.session_event(SessionEvent::Skipped { card_id: id, error: &e });
                    return Ok(Some(card));
                }
                Err(e) => return Err(e),
            };
            self.apply_verdict(&mut card, verdict)?;
            grader.session_event(SessionEvent::Graded {
                card: &card,
                verdict,
                phase: Phase::FirstPass,
            });
            if verdict == Verdict::Correct {
                return Ok(Some(card));
            }
        }
    }

    /// Run the three-phase questioning protocol over `cards`.
    pub fn run_questioning_session<G: CardGrader + ?Sized>(
        &mut self,
        mut cards: Vec<UsedCard>,
        grader: &mut G,
    ) -> CoreResult<SessionSummary> {
        let mut summary = SessionSummary {
            shelf_counts_before: shelf_counts(&cards),
            ..SessionSummary::default()
        };
        grader.session_event(SessionEvent::Started {
            counts: &summary.shelf_counts_before,
        });

        let mut again = Vec::new();
        let mut wrong = Vec::new();

        // first pass
        cards.shuffle(&mut self.rng);
        self.start_phase(grader, Phase::FirstPass, cards.len());
        let total = cards.len();
        for (i, mut card) in cards.into_iter().enumerate() {
            grader.session_event(SessionEvent::Questioning {
                card: &card,
                index: i + 1,
                total,
            });
            let Some(verdict) = self.grade_or_skip(grader, &card, &mut summary)? else {
                continue;
            };
            let put_aside = verdict == Verdict::Again && card.shelf >= self.config.min_again_shelf;
            match verdict {
                Verdict::Correct => {
                    self.correct(&mut card)?;
                    summary.correct_count += 1;
                }
                _ if put_aside => summary.again_count += 1,
                _ => self.wrong(&mut card)?,
            }
            grader.session_event(SessionEvent::Graded {
                card: &card,
                verdict,
                phase: Phase::FirstPass,
            });
            if put_aside {
                again.push(card);
            } else if verdict != Verdict::Correct {
                wrong.push(card);
            }
        }
        summary.remaining_after_first_pass = again.len() + wrong.len();

        // second chance
        if !again.is_empty() {
            self.start_phase(grader, Phase::SecondChance, again.len());
        }
        let total = again.len();
        for (i, mut card) in again.into_iter().enumerate() {
            grader.session_event(SessionEvent::Questioning {
                card: &card,
                index: i + 1,
                total,
            });
            let Some(verdict) = self.grade_or_skip(grader, &card, &mut summary)? else {
                continue;
            };
            if verdict == Verdict::Correct {
                self.correct(&mut card)?;
                summary.correct_count += 1;
            } else {
                self.wrong(&mut card)?;
            }
            grader.session_event(SessionEvent::Graded {
                card: &card,
                verdict,
                phase: Phase::SecondChance,
            });
            if verdict != Verdict::Correct {
                wrong.push(card);
            }
        }
        summary.remaining_after_second_chance = wrong.len();
        summary.wrong_count = wrong.len();

        // learning loop
        if !wrong.is_empty() {
            self.start_phase(grader, Phase::LearningLoop, wrong.len());
        }
        while !wrong.is_empty() {
            wrong.shuffle(&mut self.rng);
            let size = wrong.len().min(self.config.learning_batch_size);
            let batch: Vec<UsedCard> = wrong.drain(..size).collect();
            summary.learning_batches += 1;
            grader.session_event(SessionEvent::LearningBatch {
                size,
                remaining: wrong.len(),
            });

            let batch = self.drill(grader, batch, &mut summary)?;
            for mut card in batch {
                self.correct(&mut card)?;
                grader.session_event(SessionEvent::Graded {
                    card: &card,
                    verdict: Verdict::Correct,
                    phase: Phase::LearningLoop,
                });
            }
        }

        self.start_phase(grader, Phase::Done, 0);
        info!(
            cards = summary.total_cards(),
            correct = summary.correct_count,
            wrong = summary.wrong_count,
            rounds = summary.rounds_in_learning_loop,
            "session finished"
        );
        grader.session_event(SessionEvent::Finished(&summary));
        Ok(summary)
    }

    /// Drill a batch until it survives the required number of consecutive
    /// clean passes. There is no retry cap.
    fn drill<G: CardGrader + ?Sized>(
        &mut self,
        grader: &mut G,
        mut batch: Vec<UsedCard>,
        summary: &mut SessionSummary,
    ) -> CoreResult<Vec<UsedCard>> {
        let required = self.config.required_clean_passes;
        let mut consecutive = 0;
        while consecutive < required && !batch.is_empty() {
            batch.shuffle(&mut self.rng);
            summary.rounds_in_learning_loop += 1;

            let mut clean = true;
            let mut dropped = Vec::new();
            let total = batch.len();
            for (i, card) in batch.iter().enumerate() {
                grader.session_event(SessionEvent::Questioning {
                    card,
                    index: i + 1,
                    total,
                });
                match self.grade_or_skip(grader, card, summary)? {
                    Some(Verdict::Correct) => {}
                    Some(_) => clean = false,
                    None => dropped.push(card.id()),
                }
            }
            batch.retain(|card| !dropped.contains(&card.id()));

            consecutive = if clean { consecutive + 1 } else { 0 };
            grader.session_event(SessionEvent::LearningRound {
                clean,
                consecutive,
                required,
            });
        }
        Ok(batch)
    }

    /// Grade a card; card-local failures are reported and yield `None`.
    fn grade_or_skip<G: CardGrader + ?Sized>(
        &mut self,
        grader: &mut G,
        card: &UsedCard,
        summary: &mut SessionSummary,
    ) -> CoreResult<Option<Verdict>> {
        match grader.grade_card(card) {
            Ok(verdict) => Ok(Some(verdict)),
            Err(e) if e.is_card_local() => {
                warn!(card_id = card.id(), error = %e, "skipping card");
                summary.skipped_count += 1;
                grader.session_event(SessionEvent::Skipped {
                    card_id: card.id(),
                    error: &e,
                });
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn start_phase<G: CardGrader + ?Sized>(&self, grader: &mut G, phase: Phase, cards: usize) {
        debug!(?phase, cards, "phase started");
        grader.session_event(SessionEvent::PhaseStarted { phase, cards });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::SchedulerConfig;
    use crate::grader::tests::ScriptedPrompter;
    use crate::grader::Grader;
    use crate::intern::RawTranslation;
    use crate::models::{parse_date, MAX_SHELF};
    use crate::store::MemoryStore;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::collections::{HashMap, VecDeque};

    fn today() -> NaiveDate {
        parse_date("2024-06-01").unwrap()
    }

    fn row(latin: &str, german: &str) -> RawTranslation {
        (latin.into(), "latin".into(), german.into(), "german".into())
    }

    fn scheduler(store: MemoryStore) -> Scheduler<MemoryStore, FixedClock> {
        Scheduler::with_clock(store, FixedClock(today()), SchedulerConfig::default()).with_seed(7)
    }

    /// Store with one used card per shelf entry.
    fn store_with_shelves(shelves: &[Shelf]) -> (MemoryStore, Vec<CardId>) {
        let mut store = MemoryStore::new();
        let mut ids = Vec::new();
        for (i, &shelf) in shelves.iter().enumerate() {
            let id = store
                .add_card(&[row(&format!("verbum{}", i), &format!("Wort{}", i))], &[])
                .unwrap();
            store.add_used_card(id, shelf, today()).unwrap();
            ids.push(id);
        }
        (store, ids)
    }

    /// Grader replaying verdicts per card id.
    #[derive(Default)]
    struct ScriptedVerdicts {
        verdicts: HashMap<CardId, VecDeque<Verdict>>,
        fallback: Option<Verdict>,
        failing: Vec<CardId>,
        asked: Vec<CardId>,
        rounds: Vec<(bool, usize)>,
    }

    impl ScriptedVerdicts {
        fn script(mut self, id: CardId, verdicts: &[Verdict]) -> Self {
            self.verdicts.insert(id, verdicts.iter().copied().collect());
            self
        }
    }

    impl CardGrader for ScriptedVerdicts {
        fn grade_card(&mut self, card: &UsedCard) -> CoreResult<Verdict> {
            self.asked.push(card.id());
            if self.failing.contains(&card.id()) {
                return Err(CoreError::malformed(card.id(), "broken"));
            }
            self.verdicts
                .get_mut(&card.id())
                .and_then(|q| q.pop_front())
                .or(self.fallback)
                .ok_or_else(|| CoreError::Storage("no verdict scripted".into()))
        }

        fn session_event(&mut self, event: SessionEvent<'_>) {
            if let SessionEvent::LearningRound { clean, consecutive, .. } = event {
                self.rounds.push((clean, consecutive));
            }
        }
    }

    #[test]
    fn test_correct_promotes_with_exponential_interval() {
        let (store, ids) = store_with_shelves(&[1]);
        let mut scheduler = scheduler(store);
        let mut card = scheduler.store_mut().load_card(ids[0]).unwrap().unwrap();

        scheduler.correct(&mut card).unwrap();
        assert_eq!(card.shelf, 2);
        assert_eq!(card.due_date, today() + Duration::days(3));
        assert_eq!(scheduler.store().schedule(ids[0]), Some((2, today() + Duration::days(3))));
    }

    #[test]
    fn test_wrong_resets_immediately() {
        let (store, ids) = store_with_shelves(&[6]);
        let mut scheduler = scheduler(store);
        let mut card = scheduler.store_mut().load_card(ids[0]).unwrap().unwrap();
        scheduler.wrong(&mut card).unwrap();
        assert_eq!(card.shelf, 0);
        assert_eq!(card.due_date, today());
        assert_eq!(scheduler.store().schedule(ids[0]), Some((0, today())));
    }

    #[test]
    fn test_apply_verdict_again_counts_as_wrong() {
        let (store, ids) = store_with_shelves(&[4]);
        let mut scheduler = scheduler(store);
        let mut card = scheduler.store_mut().load_card(ids[0]).unwrap().unwrap();
        scheduler.apply_verdict(&mut card, Verdict::Again).unwrap();
        assert_eq!(card.shelf, 0);
    }

    #[test]
    fn test_small_due_set_is_returned_whole() {
        let (store, ids) = store_with_shelves(&[0, 3, 7]);
        let mut scheduler = scheduler(store);
        let mut due: Vec<_> = scheduler.get_due_cards(None).unwrap().iter().map(|c| c.id()).collect();
        due.sort();
        assert_eq!(due, ids);
    }

    #[test]
    fn test_future_cards_are_not_due() {
        let (mut store, ids) = store_with_shelves(&[1, 1]);
        store.update_card(ids[1], 1, today() + Duration::days(1)).unwrap();
        let mut scheduler = scheduler(store);
        let due = scheduler.get_due_cards(None).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id(), ids[0]);

        let later = scheduler.get_due_cards(Some(today() + Duration::days(1))).unwrap();
        assert_eq!(later.len(), 2);
    }

    #[test]
    fn test_zero_portion_still_yields_a_card() {
        let (store, _) = store_with_shelves(&[5, 6]);
        let config = SchedulerConfig {
            card_portion: 0,
            ..SchedulerConfig::default()
        };
        let mut scheduler = Scheduler::with_clock(store, FixedClock(today()), config).with_seed(7);
        assert_eq!(scheduler.get_due_cards(None).unwrap().len(), 1);
    }

    #[test]
    fn test_portion_keeps_all_low_shelves() {
        let mut due = BTreeMap::new();
        for id in 0..30 {
            due.insert(id, (id % 3) as Shelf);
        }
        for id in 30..80 {
            due.insert(id, 5);
        }
        let config = SchedulerConfig {
            card_portion: 40,
            ..SchedulerConfig::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let selected = select_due_ids(&due, &config, &mut rng);
        assert_eq!(selected.len(), 40);
        for id in 0..30 {
            assert!(selected.contains(&id));
        }
    }

    #[test]
    fn test_mandatory_low_shelves_exceed_portion() {
        let due: BTreeMap<CardId, Shelf> = (0..15).map(|id| (id, if id < 12 { 1 } else { 4 })).collect();
        let config = SchedulerConfig {
            card_portion: 10,
            ..SchedulerConfig::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let selected = select_due_ids(&due, &config, &mut rng);
        assert_eq!(selected.len(), 12);
        assert!(selected.iter().all(|id| *id < 12));
    }

    #[test]
    fn test_sampling_prefers_higher_shelves() {
        let mut due = BTreeMap::new();
        for id in 0..200 {
            due.insert(id, if id < 100 { 3 } else { 7 });
        }
        let config = SchedulerConfig {
            card_portion: 50,
            ..SchedulerConfig::default()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let selected = select_due_ids(&due, &config, &mut rng);
        let high = selected.iter().filter(|id| **id >= 100).count();
        assert_eq!(selected.len(), 50);
        assert!(high > 25, "expected shelf 7 to dominate, got {}", high);
    }

    #[test]
    fn test_first_pass_all_correct() {
        let (store, ids) = store_with_shelves(&[1, 3]);
        let mut scheduler = scheduler(store);
        let cards = scheduler.get_due_cards(None).unwrap();
        let mut grader = ScriptedVerdicts {
            fallback: Some(Verdict::Correct),
            ..ScriptedVerdicts::default()
        };
        let summary = scheduler.run_questioning_session(cards, &mut grader).unwrap();

        assert_eq!(summary.correct_count, 2);
        assert_eq!(summary.wrong_count, 0);
        assert_eq!(summary.shelf_counts_before[1], 1);
        assert_eq!(summary.shelf_counts_before[3], 1);
        assert_eq!(scheduler.store().schedule(ids[0]).unwrap().0, 2);
        assert_eq!(scheduler.store().schedule(ids[1]).unwrap().0, 4);
        assert_eq!(grader.asked.len(), 2);
    }

    #[test]
    fn test_again_gets_second_chance_without_update() {
        let (store, ids) = store_with_shelves(&[4]);
        let mut scheduler = scheduler(store);
        let cards = scheduler.get_due_cards(None).unwrap();
        let mut grader = ScriptedVerdicts::default().script(ids[0], &[Verdict::Again, Verdict::Correct]);

        let summary = scheduler.run_questioning_session(cards, &mut grader).unwrap();
        assert_eq!(summary.again_count, 1);
        assert_eq!(summary.correct_count, 1);
        assert_eq!(summary.remaining_after_first_pass, 1);
        assert_eq!(summary.remaining_after_second_chance, 0);
        // only the second-chance result was written
        assert_eq!(scheduler.store().updates().len(), 1);
        assert_eq!(scheduler.store().schedule(ids[0]).unwrap().0, 5);
    }

    #[test]
    fn test_again_below_threshold_is_wrong() {
        let (store, ids) = store_with_shelves(&[1]);
        let mut scheduler = scheduler(store);
        let cards = scheduler.get_due_cards(None).unwrap();
        let mut grader = ScriptedVerdicts::default()
            .script(ids[0], &[Verdict::Again, Verdict::Correct, Verdict::Correct]);

        let summary = scheduler.run_questioning_session(cards, &mut grader).unwrap();
        assert_eq!(summary.again_count, 0);
        assert_eq!(summary.wrong_count, 1);
        // demoted, then promoted out of the learning loop
        assert_eq!(scheduler.store().updates()[0], (ids[0], 0, today()));
        assert_eq!(scheduler.store().schedule(ids[0]), Some((1, today() + Duration::days(1))));
    }

    #[test]
    fn test_failed_second_chance_enters_learning_loop() {
        let (store, ids) = store_with_shelves(&[5]);
        let mut scheduler = scheduler(store);
        let cards = scheduler.get_due_cards(None).unwrap();
        let mut grader = ScriptedVerdicts::default().script(
            ids[0],
            &[Verdict::Again, Verdict::Wrong, Verdict::Correct, Verdict::Correct],
        );

        let summary = scheduler.run_questioning_session(cards, &mut grader).unwrap();
        assert_eq!(summary.wrong_count, 1);
        assert_eq!(summary.rounds_in_learning_loop, 2);
        assert_eq!(scheduler.store().schedule(ids[0]).unwrap().0, 1);
    }

    #[test]
    fn test_learning_loop_needs_consecutive_clean_passes() {
        let (store, ids) = store_with_shelves(&[0]);
        let mut scheduler = scheduler(store);
        let cards = scheduler.get_due_cards(None).unwrap();
        // first pass wrong; loop: clean, mistake, clean, clean
        let mut grader = ScriptedVerdicts::default().script(
            ids[0],
            &[
                Verdict::Wrong,
                Verdict::Correct,
                Verdict::Wrong,
                Verdict::Correct,
                Verdict::Correct,
            ],
        );

        let summary = scheduler.run_questioning_session(cards, &mut grader).unwrap();
        assert_eq!(summary.rounds_in_learning_loop, 4);
        assert_eq!(grader.rounds, vec![(true, 1), (false, 0), (true, 1), (true, 2)]);
        assert_eq!(scheduler.store().schedule(ids[0]), Some((1, today() + Duration::days(1))));
    }

    #[test]
    fn test_learning_loop_batches() {
        let shelves = vec![0; 10];
        let (store, ids) = store_with_shelves(&shelves);
        let mut scheduler = scheduler(store);
        let cards = scheduler.get_due_cards(None).unwrap();
        let mut grader = ScriptedVerdicts {
            fallback: Some(Verdict::Correct),
            ..ScriptedVerdicts::default()
        };
        for &id in &ids {
            grader.verdicts.insert(id, VecDeque::from([Verdict::Wrong]));
        }

        let summary = scheduler.run_questioning_session(cards, &mut grader).unwrap();
        assert_eq!(summary.wrong_count, 10);
        assert_eq!(summary.learning_batches, 2);
        assert_eq!(summary.rounds_in_learning_loop, 4);
        // 10 first-pass + 2 rounds x 7 + 2 rounds x 3
        assert_eq!(grader.asked.len(), 30);
        for id in ids {
            assert_eq!(scheduler.store().schedule(id).unwrap().0, 1);
        }
    }

    #[test]
    fn test_malformed_card_is_skipped() {
        let (store, ids) = store_with_shelves(&[1, 1]);
        let mut scheduler = scheduler(store);
        let cards = scheduler.get_due_cards(None).unwrap();
        let mut grader = ScriptedVerdicts {
            fallback: Some(Verdict::Correct),
            failing: vec![ids[0]],
            ..ScriptedVerdicts::default()
        };

        let summary = scheduler.run_questioning_session(cards, &mut grader).unwrap();
        assert_eq!(summary.skipped_count, 1);
        assert_eq!(summary.correct_count, 1);
        assert_eq!(scheduler.store().schedule(ids[0]).unwrap().0, 1);
        assert_eq!(scheduler.store().schedule(ids[1]).unwrap().0, 2);
    }

    #[test]
    fn test_fatal_error_keeps_committed_updates() {
        let (store, ids) = store_with_shelves(&[1, 1, 1]);
        let mut scheduler = scheduler(store);
        let cards = scheduler.get_due_cards(None).unwrap();
        // one scripted answer, then the script runs dry
        let mut grader = ScriptedVerdicts::default();
        for &id in &ids {
            grader.verdicts.insert(id, VecDeque::new());
        }
        let first = {
            let mut shuffled = cards.clone();
            shuffled.shuffle(&mut ChaCha8Rng::seed_from_u64(7));
            shuffled[0].id()
        };
        grader.verdicts.insert(first, VecDeque::from([Verdict::Correct]));

        let result = scheduler.run_questioning_session(cards, &mut grader);
        assert!(result.is_err());
        assert_eq!(scheduler.store().updates().len(), 1);
        assert_eq!(scheduler.store().schedule(first).unwrap().0, 2);
    }

    #[test]
    fn test_end_to_end_with_grader() {
        let mut store = MemoryStore::new();
        let rex = store.add_card(&[row("rex, regis", "König")], &["lektion-1"]).unwrap();
        store.add_used_card(rex, 1, today()).unwrap();
        let mut scheduler = scheduler(store);

        let cards = scheduler.get_due_cards(None).unwrap();
        let mut grader = Grader::new(ScriptedPrompter::new(&["König"]), scheduler.config());
        let summary = scheduler.run_questioning_session(cards, &mut grader).unwrap();

        assert_eq!(summary.correct_count, 1);
        assert_eq!(scheduler.store().schedule(rex), Some((2, today() + Duration::days(3))));
    }

    #[test]
    fn test_question_single_card() {
        let (store, ids) = store_with_shelves(&[3]);
        let mut scheduler = scheduler(store);
        let mut grader = ScriptedVerdicts::default().script(ids[0], &[Verdict::Wrong, Verdict::Correct]);

        let card = scheduler.question_single_card(ids[0], &mut grader).unwrap().unwrap();
        assert_eq!(card.shelf, 1);
        assert_eq!(scheduler.store().updates().len(), 2);

        assert!(scheduler.question_single_card(999, &mut grader).unwrap().is_none());
    }

    #[test]
    fn test_single_card_that_cannot_be_graded_is_skipped() {
        let (store, ids) = store_with_shelves(&[3]);
        let mut scheduler = scheduler(store);
        let mut grader = ScriptedVerdicts {
            failing: vec![ids[0]],
            ..ScriptedVerdicts::default()
        };

        let card = scheduler.question_single_card(ids[0], &mut grader).unwrap().unwrap();
        assert_eq!(card.shelf, 3);
        assert_eq!(grader.asked, vec![ids[0]]);
        assert!(scheduler.store().updates().is_empty());
    }

    #[test]
    fn test_use_group() {
        let mut store = MemoryStore::new();
        store.add_group("latein", None);
        store.add_group("lektion-1", Some("latein"));
        let a = store.add_card(&[row("rex, regis", "König")], &["lektion-1"]).unwrap();
        let b = store.add_card(&[row("via, viae", "Weg")], &["latein"]).unwrap();
        store.add_used_card(b, 5, today()).unwrap();
        let mut scheduler = scheduler(store);

        assert_eq!(scheduler.use_group("latein").unwrap(), Some(1));
        assert_eq!(scheduler.store().schedule(a), Some((1, today())));
        assert_eq!(scheduler.store().schedule(b), Some((5, today())));
        assert_eq!(scheduler.use_group("latein").unwrap(), Some(0));
        assert_eq!(scheduler.use_group("missing").unwrap(), None);
    }

    #[test]
    fn test_shelf_statistics() {
        let (mut store, ids) = store_with_shelves(&[0, 3, 3, 7]);
        store.update_card(ids[3], 7, today() + Duration::days(5)).unwrap();
        let scheduler = scheduler(store);
        let (counts, due) = scheduler.shelf_statistics().unwrap();
        assert_eq!(counts, [1, 0, 0, 2, 0, 0, 0, 1]);
        assert_eq!(due, 3);
    }

    #[test]
    fn test_card_selector() {
        assert_eq!("".parse::<CardSelector>().unwrap(), CardSelector::Due);
        assert_eq!("due".parse::<CardSelector>().unwrap(), CardSelector::Due);
        assert_eq!("s3".parse::<CardSelector>().unwrap(), CardSelector::Shelf(3));
        assert_eq!("s9".parse::<CardSelector>().unwrap(), CardSelector::Group("s9".into()));
        assert_eq!(
            "lektion-1".parse::<CardSelector>().unwrap(),
            CardSelector::Group("lektion-1".into())
        );
    }

    #[test]
    fn test_select_cards_by_shelf_and_group() {
        let mut store = MemoryStore::new();
        let a = store.add_card(&[row("rex, regis", "König")], &["lektion-1"]).unwrap();
        let b = store.add_card(&[row("via, viae", "Weg")], &[]).unwrap();
        store.add_used_card(a, 3, today() + Duration::days(10)).unwrap();
        store.add_used_card(b, 3, today()).unwrap();
        let mut scheduler = scheduler(store);

        let on_shelf = scheduler.select_cards(&CardSelector::Shelf(3)).unwrap().unwrap();
        assert_eq!(on_shelf.len(), 2);
        let group = scheduler
            .select_cards(&CardSelector::Group("lektion-1".into()))
            .unwrap()
            .unwrap();
        assert_eq!(group.len(), 1);
        assert!(scheduler
            .select_cards(&CardSelector::Group("nope".into()))
            .unwrap()
            .is_none());
    }

    proptest! {
        #[test]
        fn prop_shelf_stays_in_bounds(start in 0u8..=MAX_SHELF, steps in prop::collection::vec(any::<bool>(), 0..40)) {
            let (store, ids) = store_with_shelves(&[start]);
            let mut scheduler = scheduler(store);
            let mut card = scheduler.store_mut().load_card(ids[0]).unwrap().unwrap();
            for correct in steps {
                if correct {
                    scheduler.correct(&mut card).unwrap();
                    prop_assert_eq!(card.due_date, today() + crate::models::review_interval(card.shelf));
                } else {
                    scheduler.wrong(&mut card).unwrap();
                    prop_assert_eq!(card.due_date, today());
                }
                prop_assert!(card.shelf <= MAX_SHELF);
            }
        }

        #[test]
        fn prop_portion_cap(shelves in prop::collection::vec(0u8..=MAX_SHELF, 0..200), portion in 1usize..60, seed in any::<u64>()) {
            let due: BTreeMap<CardId, Shelf> = shelves.iter().enumerate().map(|(i, s)| (i as CardId, *s)).collect();
            let config = SchedulerConfig { card_portion: portion, ..SchedulerConfig::default() };
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let selected = select_due_ids(&due, &config, &mut rng);

            let low: Vec<CardId> = due.iter().filter(|(_, s)| **s <= 2).map(|(id, _)| *id).collect();
            prop_assert!(selected.len() <= portion.max(low.len()));
            prop_assert!(low.iter().all(|id| selected.contains(id)));
            prop_assert_eq!(selected.is_empty(), due.is_empty());
            let mut unique = selected.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), selected.len());
        }
    }
}
