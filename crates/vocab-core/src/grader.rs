//! Questioning of a single card and grading of the answers.

use crate::config::SchedulerConfig;
use crate::error::{CoreError, CoreResult};
use crate::fuzzy::fuzzy_match;
use crate::models::{Card, Phrase, Shelf, TranslationKind, UsedCard, Verdict};
use crate::scheduler::{CardGrader, SessionEvent};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use tracing::debug;

/// One question: a Latin phrase (with its synonyms) and the German meanings
/// expected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub phrase: Arc<Phrase>,
    pub synonyms: Vec<Arc<Phrase>>,
    pub meanings: IndexSet<String>,
}

/// Split a card's translations into questions.
///
/// Latin↔Latin pairs merge their phrases into one synonym group; all
/// Latin↔German pairs of a group's members accumulate under the group's
/// representative, so synonyms are asked once and share one answer set.
/// German↔German pairs are ignored. A card left without any question is
/// malformed.
pub fn build_questions(card: &Card) -> CoreResult<Vec<Question>> {
    let mut groups: Vec<IndexSet<Arc<Phrase>>> = Vec::new();
    let mut with_meaning: IndexSet<Arc<Phrase>> = IndexSet::new();

    for translation in &card.translations {
        let (latin, other) = translation.latin_first();
        match translation.kind() {
            TranslationKind::Synonym => link_synonyms(&mut groups, latin, other),
            TranslationKind::Meaning => {
                with_meaning.insert(latin.clone());
            }
            TranslationKind::GermanPair => {}
        }
    }

    // the representative is the member whose meaning comes first on the card
    let representatives: Vec<Option<Arc<Phrase>>> = groups
        .iter()
        .map(|group| {
            with_meaning
                .iter()
                .find(|p| group.contains(*p))
                .or_else(|| group.first())
                .cloned()
        })
        .collect();

    let mut entries: IndexMap<Arc<Phrase>, IndexSet<String>> = IndexMap::new();
    for translation in &card.translations {
        if translation.kind() != TranslationKind::Meaning {
            continue;
        }
        let (latin, german) = translation.latin_first();
        let key = groups
            .iter()
            .position(|g| g.contains(latin))
            .and_then(|i| representatives[i].clone())
            .unwrap_or_else(|| latin.clone());
        entries.entry(key).or_default().insert(german.text().to_string());
    }

    if entries.is_empty() {
        return Err(CoreError::malformed(card.id, "no gradable translations"));
    }

    Ok(entries
        .into_iter()
        .map(|(phrase, meanings)| {
            let synonyms = groups
                .iter()
                .find(|g| g.contains(&phrase))
                .map(|g| g.iter().filter(|p| **p != phrase).cloned().collect())
                .unwrap_or_default();
            Question {
                phrase,
                synonyms,
                meanings,
            }
        })
        .collect())
}

fn link_synonyms(groups: &mut Vec<IndexSet<Arc<Phrase>>>, a: &Arc<Phrase>, b: &Arc<Phrase>) {
    let ga = groups.iter().position(|g| g.contains(a));
    let gb = groups.iter().position(|g| g.contains(b));
    match (ga, gb) {
        (Some(i), Some(j)) if i != j => {
            let merged = groups.remove(j);
            let i = if j < i { i - 1 } else { i };
            groups[i].extend(merged);
        }
        (Some(_), Some(_)) => {}
        (Some(i), None) => {
            groups[i].insert(b.clone());
        }
        (None, Some(j)) => {
            groups[j].insert(a.clone());
        }
        (None, None) => {
            groups.push(IndexSet::from([a.clone(), b.clone()]));
        }
    }
}

/// Split a comma-separated answer into trimmed, non-empty phrases.
pub fn split_answer(raw: &str) -> IndexSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Comparison of one answer against the expected meanings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerCheck {
    /// `(given, expected)` pairs accepted as typos.
    pub typos: Vec<(String, String)>,
    /// Given phrases that match nothing.
    pub surplus: Vec<String>,
    /// Expected phrases nobody gave.
    pub missing: Vec<String>,
}

impl AnswerCheck {
    /// Wrong answers this comparison contributes.
    ///
    /// A substitution shows up both as surplus and as missing; it is counted
    /// once.
    pub fn penalty(&self) -> usize {
        self.surplus.len().max(self.missing.len())
    }

    pub fn is_clean(&self) -> bool {
        self.penalty() == 0
    }
}

/// Compare a raw answer with the expected meanings.
pub fn check_answer(raw: &str, solution: &IndexSet<String>) -> AnswerCheck {
    let answer = split_answer(raw);
    let mut surplus: IndexSet<String> = answer.difference(solution).cloned().collect();
    let mut missing: IndexSet<String> = solution.difference(&answer).cloned().collect();
    let mut typos = Vec::new();

    for given in surplus.clone() {
        let hit = missing.iter().find(|expected| fuzzy_match(&given, expected)).cloned();
        if let Some(expected) = hit {
            surplus.shift_remove(&given);
            missing.shift_remove(&expected);
            typos.push((given, expected));
        }
    }

    // an expected "a, b" is present when "a" and "b" were both given
    for expected in missing.clone() {
        if !expected.contains(',') {
            continue;
        }
        let parts = split_answer(&expected);
        if !parts.is_empty() && parts.iter().all(|part| surplus.contains(part)) {
            missing.shift_remove(&expected);
            for part in &parts {
                surplus.shift_remove(part);
            }
        }
    }

    AnswerCheck {
        typos,
        surplus: surplus.into_iter().collect(),
        missing: missing.into_iter().collect(),
    }
}

/// Map a wrong-answer tally to a verdict.
///
/// `forwarded` is the user's override for near-misses they judge acceptable.
pub fn derive_verdict(wrong_answers: usize, forwarded: bool, shelf: Shelf, min_again_shelf: Shelf) -> Verdict {
    match wrong_answers {
        0 => Verdict::Correct,
        _ if forwarded => Verdict::Correct,
        1 if shelf >= min_again_shelf => Verdict::Again,
        _ => Verdict::Wrong,
    }
}

/// Something the user is asked to type.
#[derive(Debug, Clone, Copy)]
pub enum Prompt<'a> {
    /// The remaining principal parts after a verb's infinitive.
    PrincipalParts {
        infinitive: &'a str,
        synonyms: &'a [Arc<Phrase>],
    },
    /// Comma-separated meanings of a phrase.
    Meanings {
        /// Text to show before asking; `None` when the root forms were
        /// already shown or elicited.
        lead: Option<&'a str>,
        synonyms: &'a [Arc<Phrase>],
        context: &'a str,
    },
}

/// Yes/no questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    /// Count a card with mistakes as correct anyway?
    ForwardAnyway { wrong_answers: usize },
}

/// Feedback produced while grading.
#[derive(Debug, Clone, Copy)]
pub enum GradeEvent<'a> {
    /// A card is about to be questioned.
    CardHeader(&'a UsedCard),
    /// The principal parts were not typed exactly; these are right.
    PrincipalParts { expected: &'a str },
    Typo { given: &'a str, expected: &'a str },
    Surplus(&'a [String]),
    Missing(&'a [String]),
}

/// The interactive side of grading, implemented by front ends.
pub trait Prompter {
    fn ask(&mut self, prompt: Prompt<'_>) -> CoreResult<String>;

    fn confirm(&mut self, question: Confirm) -> CoreResult<bool>;

    fn notify(&mut self, event: GradeEvent<'_>);

    /// Progress of a questioning session.
    fn session_event(&mut self, _event: SessionEvent<'_>) {}
}

/// Conducts the question/answer exchange for cards.
pub struct Grader<P> {
    prompter: P,
    min_again_shelf: Shelf,
}

impl<P: Prompter> Grader<P> {
    pub fn new(prompter: P, config: &SchedulerConfig) -> Self {
        Self {
            prompter,
            min_again_shelf: config.min_again_shelf,
        }
    }

    pub fn prompter(&self) -> &P {
        &self.prompter
    }

    pub fn prompter_mut(&mut self) -> &mut P {
        &mut self.prompter
    }

    pub fn into_prompter(self) -> P {
        self.prompter
    }

    /// Question the user over one card.
    pub fn grade_card(&mut self, card: &UsedCard) -> CoreResult<Verdict> {
        let questions = build_questions(&card.card)?;
        self.prompter.notify(GradeEvent::CardHeader(card));

        let mut wrong_answers = 0;
        let mut last_root_forms: Option<&str> = None;

        for question in &questions {
            let phrase = &question.phrase;
            let raw = if phrase.is_word() {
                let fresh = last_root_forms != Some(phrase.root_forms());
                let mut lead = None;
                if fresh {
                    if let Some((infinitive, expected)) = phrase.principal_parts() {
                        wrong_answers += self.ask_principal_parts(infinitive, &expected, &question.synonyms)?;
                    } else {
                        lead = Some(phrase.root_forms());
                    }
                }
                last_root_forms = Some(phrase.root_forms());
                let synonyms: &[Arc<Phrase>] = if lead.is_some() { &question.synonyms } else { &[] };
                self.prompter.ask(Prompt::Meanings {
                    lead,
                    synonyms,
                    context: phrase.context(),
                })?
            } else {
                self.prompter.ask(Prompt::Meanings {
                    lead: Some(phrase.text()),
                    synonyms: &question.synonyms,
                    context: "",
                })?
            };

            let check = check_answer(&raw, &question.meanings);
            for (given, expected) in &check.typos {
                self.prompter.notify(GradeEvent::Typo { given, expected });
            }
            if !check.surplus.is_empty() {
                self.prompter.notify(GradeEvent::Surplus(&check.surplus));
            }
            if !check.missing.is_empty() {
                self.prompter.notify(GradeEvent::Missing(&check.missing));
            }
            wrong_answers += check.penalty();
        }

        let forwarded = wrong_answers > 0 && self.prompter.confirm(Confirm::ForwardAnyway { wrong_answers })?;
        let verdict = derive_verdict(wrong_answers, forwarded, card.shelf, self.min_again_shelf);
        debug!(card_id = card.id(), wrong_answers, forwarded, verdict = verdict.name(), "graded card");
        Ok(verdict)
    }

    fn ask_principal_parts(&mut self, infinitive: &str, expected: &str, synonyms: &[Arc<Phrase>]) -> CoreResult<usize> {
        let given = self.prompter.ask(Prompt::PrincipalParts { infinitive, synonyms })?;
        let given = given.trim();
        if given != expected {
            let full = format!("{}, {}", infinitive, expected);
            self.prompter.notify(GradeEvent::PrincipalParts { expected: &full });
        }
        Ok(usize::from(!fuzzy_match(given, expected)))
    }
}

impl<P: Prompter> CardGrader for Grader<P> {
    fn grade_card(&mut self, card: &UsedCard) -> CoreResult<Verdict> {
        Grader::grade_card(self, card)
    }

    fn session_event(&mut self, event: SessionEvent<'_>) {
        self.prompter.session_event(event);
    }
}
