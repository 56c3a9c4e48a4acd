//! Scheduler configuration.

use crate::models::{Shelf, MAX_SHELF};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cap on due cards surfaced per session.
    #[serde(default = "default_card_portion")]
    pub card_portion: usize,
    /// Shelf a card lands on when it is first used.
    #[serde(default = "default_shelf")]
    pub default_shelf: Shelf,
    /// Lowest shelf that earns a second chance after a single slip.
    #[serde(default = "default_min_again_shelf")]
    pub min_again_shelf: Shelf,
    /// Due cards up to this shelf are always included, regardless of the portion.
    #[serde(default = "default_always_include_max_shelf")]
    pub always_include_max_shelf: Shelf,
    /// Cards drilled together in the learning loop.
    #[serde(default = "default_learning_batch_size")]
    pub learning_batch_size: usize,
    /// Consecutive clean passes a learning batch needs.
    #[serde(default = "default_required_clean_passes")]
    pub required_clean_passes: usize,
}

fn default_card_portion() -> usize { 100 }
fn default_shelf() -> Shelf { 1 }
fn default_min_again_shelf() -> Shelf { 2 }
fn default_always_include_max_shelf() -> Shelf { 2 }
fn default_learning_batch_size() -> usize { 7 }
fn default_required_clean_passes() -> usize { 2 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            card_portion: default_card_portion(),
            default_shelf: default_shelf(),
            min_again_shelf: default_min_again_shelf(),
            always_include_max_shelf: default_always_include_max_shelf(),
            learning_batch_size: default_learning_batch_size(),
            required_clean_passes: default_required_clean_passes(),
        }
    }
}

impl SchedulerConfig {
    /// Clamp out-of-range values into something the scheduler can run with.
    pub fn normalized(mut self) -> Self {
        self.card_portion = self.card_portion.max(1);
        self.default_shelf = self.default_shelf.min(MAX_SHELF);
        self.min_again_shelf = self.min_again_shelf.min(MAX_SHELF);
        self.always_include_max_shelf = self.always_include_max_shelf.min(MAX_SHELF);
        self.learning_batch_size = self.learning_batch_size.max(1);
        self.required_clean_passes = self.required_clean_passes.max(1);
        self
    }

    /// Sampling weight of a due card above the always-included shelves.
    pub fn sampling_weight(&self, shelf: Shelf) -> u32 {
        shelf.saturating_sub(self.always_include_max_shelf) as u32
    }
}
