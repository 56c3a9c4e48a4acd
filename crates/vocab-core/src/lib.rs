//! # vocab-core
//!
//! Leitner-box scheduling and answer grading for Latin/German vocabulary.
//!
//! ## Features
//!
//! - Eight shelves with exponentially growing review intervals
//! - Due-card selection capped by a portion, weighted towards high shelves
//! - Three-phase questioning sessions with a learning loop for missed cards
//! - Single-typo tolerance and comma-separated meaning lists
//! - Hierarchical card groups
//!
//! Storage and user interaction are plugged in through [`CardStore`] and
//! [`Prompter`].

mod clock;
mod config;
mod error;
mod fuzzy;
mod grader;
mod groups;
mod intern;
mod models;
mod scheduler;
mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::SchedulerConfig;
pub use error::{CoreError, CoreResult};
pub use fuzzy::fuzzy_match;
pub use grader::{
    build_questions, check_answer, derive_verdict, split_answer, AnswerCheck, Confirm, GradeEvent, Grader, Prompt,
    Prompter, Question,
};
pub use groups::{GroupForest, GroupId};
pub use intern::{PhraseInterner, RawTranslation};
pub use models::{
    parse_date, review_interval, shelf_counts, validate_shelf, Card, CardId, Language, PartOfSpeech, Phrase,
    PhraseKind, SessionSummary, Shelf, ShelfCounts, Translation, TranslationKind, UsedCard, Verdict, MAX_SHELF,
    MIN_SHELF,
};
pub use scheduler::{select_due_ids, CardGrader, CardSelector, Phase, Scheduler, SessionEvent};
pub use store::{CardStore, MemoryStore};
