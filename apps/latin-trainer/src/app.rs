//! Command loop and command dispatch.

use crate::config::Config;
use crate::db::Database;
use crate::import::import_deck;
use crate::terminal::TerminalPrompter;
use crossterm::style::Color;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use vocab_core::{validate_shelf, CardId, CardSelector, CardStore, Grader, Scheduler, MAX_SHELF};

const HELP: &str = "\
Commands:
  question [due|<group>|sN]  question due cards, a group, or shelf N
  card <id>                  question one card until it is answered
  use <group>                start learning the cards of a group
  show                       list all groups
  show <group>               print the cards of a group
  show card <id>             print one card
  lookup <text>              print cards containing a phrase
  import <file.toml>         import groups and cards
  stats                      cards per shelf and due today
  help                       this text
  quit                       leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowTarget {
    Groups,
    Group(String),
    Card(CardId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Question(CardSelector),
    Card(CardId),
    Use(String),
    Show(ShowTarget),
    Lookup(String),
    Import(PathBuf),
    Stats,
    Help,
    Quit,
}

impl Command {
    /// Parse a command line; the error is a usage message.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(HELP.to_string());
        };
        let rest: Vec<&str> = words.collect();
        let arg = rest.join(" ");

        match (name, rest.as_slice()) {
            ("question" | "q", []) => Ok(Self::Question(CardSelector::Due)),
            ("question" | "q", [selector]) => parse_selector(selector).map(Self::Question),
            ("card" | "c", [id]) => parse_id(id).map(Self::Card),
            ("use" | "u", [_, ..]) => Ok(Self::Use(arg)),
            ("show" | "s", []) => Ok(Self::Show(ShowTarget::Groups)),
            ("show" | "s", ["card", id]) => parse_id(id).map(|id| Self::Show(ShowTarget::Card(id))),
            ("show" | "s", [_, ..]) => Ok(Self::Show(ShowTarget::Group(arg))),
            ("lookup" | "l", [_, ..]) => Ok(Self::Lookup(arg)),
            ("import" | "i", [_, ..]) => Ok(Self::Import(PathBuf::from(arg))),
            ("stats", []) => Ok(Self::Stats),
            ("help" | "h" | "?", _) => Ok(Self::Help),
            ("quit" | "exit", []) => Ok(Self::Quit),
            ("question" | "q", _) => Err("usage: question [due|<group>|s0..s7]".to_string()),
            ("card" | "c", _) => Err("usage: card <id>".to_string()),
            ("use" | "u", _) => Err("usage: use <group>".to_string()),
            ("lookup" | "l", _) => Err("usage: lookup <text>".to_string()),
            ("import" | "i", _) => Err("usage: import <file.toml>".to_string()),
            _ => Err(format!("unknown command '{}', try 'help'", line.trim())),
        }
    }
}

fn parse_id(raw: &str) -> Result<CardId, String> {
    match raw.parse::<CardId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(format!("'{}' is not a card id; usage: card <id>", raw)),
    }
}

/// `sN` must name a real shelf; anything else is a group name.
fn parse_selector(raw: &str) -> Result<CardSelector, String> {
    if let Some(digits) = raw.strip_prefix('s').filter(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_digit())) {
        return digits
            .parse::<i64>()
            .ok()
            .and_then(|n| validate_shelf(n).ok())
            .map(CardSelector::Shelf)
            .ok_or_else(|| format!("no shelf '{}'; shelves are s0..s{}", raw, MAX_SHELF));
    }
    raw.parse::<CardSelector>().map_err(|e| e.to_string())
}

pub struct App<R, W> {
    scheduler: Scheduler<Database>,
    grader: Grader<TerminalPrompter<R, W>>,
}

impl<R: BufRead, W: Write> App<R, W> {
    pub fn new(db: Database, config: &Config, prompter: TerminalPrompter<R, W>) -> Self {
        Self {
            scheduler: Scheduler::new(db, config.scheduler.clone()),
            grader: Grader::new(prompter, &config.scheduler),
        }
    }

    fn out(&mut self) -> &mut TerminalPrompter<R, W> {
        self.grader.prompter_mut()
    }

    /// Read and run commands until `quit` or end of input.
    pub fn run(&mut self) -> anyhow::Result<()> {
        self.out().say("Type 'help' for a list of commands.");
        while let Some(line) = self.out().read_line("latin> ")? {
            if line.trim().is_empty() {
                continue;
            }
            if !self.run_command(&line)? {
                break;
            }
        }
        Ok(())
    }

    /// Run one command line. Returns `false` when the user asked to quit.
    pub fn run_command(&mut self, line: &str) -> anyhow::Result<bool> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(usage) => {
                warn!(line, "rejected command");
                self.out().say_colored(&usage, Color::Yellow);
                return Ok(true);
            }
        };
        self.execute(command)
    }

    fn execute(&mut self, command: Command) -> anyhow::Result<bool> {
        match command {
            Command::Question(selector) => self.question(&selector)?,
            Command::Card(id) => match self.scheduler.question_single_card(id, &mut self.grader) {
                Ok(Some(_)) => {}
                Ok(None) => self.out().say(format!("Card {} is not in use.", id)),
                Err(e) if e.is_card_local() => {
                    warn!(card_id = id, error = %e, "cannot question card");
                    self.out().say_colored(&format!("Cannot question card {}: {}", id, e), Color::Red);
                }
                Err(e) => return Err(e.into()),
            },
            Command::Use(group) => match self.scheduler.use_group(&group)? {
                Some(added) => self.out().say(format!("{} card(s) of '{}' added.", added, group)),
                None => self.unknown_group(&group),
            },
            Command::Show(target) => self.show(target)?,
            Command::Lookup(text) => self.lookup(&text)?,
            Command::Import(path) => {
                let report = match import_deck(self.scheduler.store(), &path) {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "import failed");
                        self.out()
                            .say_colored(&format!("Cannot import '{}': {}", path.display(), e), Color::Red);
                        return Ok(true);
                    }
                };
                for message in &report.rejected {
                    self.out().say_colored(message, Color::Red);
                }
                self.out().say(format!(
                    "Imported {} group(s), {} new card(s), {} already known.",
                    report.groups, report.new_cards, report.known_cards
                ));
            }
            Command::Stats => self.stats()?,
            Command::Help => self.out().say(HELP),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn question(&mut self, selector: &CardSelector) -> anyhow::Result<()> {
        let Some(cards) = self.scheduler.select_cards(selector)? else {
            if let CardSelector::Group(name) = selector {
                self.unknown_group(name);
            }
            return Ok(());
        };
        if cards.is_empty() {
            self.out().say("No cards to question.");
            return Ok(());
        }
        info!(?selector, cards = cards.len(), "starting session");
        self.scheduler.run_questioning_session(cards, &mut self.grader)?;
        Ok(())
    }

    fn show(&mut self, target: ShowTarget) -> anyhow::Result<()> {
        match target {
            ShowTarget::Groups => {
                let forest = self.scheduler.store().group_forest()?;
                let lines: Vec<String> = (0..forest.len()).map(|id| forest.path(id).join(" / ")).collect();
                if lines.is_empty() {
                    self.out().say("No groups yet; use 'import <file.toml>'.");
                }
                for line in lines {
                    self.out().say(line);
                }
            }
            ShowTarget::Group(name) => {
                let Some(ids) = self.scheduler.store().group_card_ids(&name, true)? else {
                    self.unknown_group(&name);
                    return Ok(());
                };
                for id in ids {
                    self.show_card(id)?;
                }
            }
            ShowTarget::Card(id) => self.show_card(id)?,
        }
        Ok(())
    }

    fn show_card(&mut self, id: CardId) -> anyhow::Result<()> {
        let Some(card) = self.scheduler.store_mut().get_card(id)? else {
            self.out().say(format!("No card {}.", id));
            return Ok(());
        };
        let groups: Vec<&str> = card.groups.iter().map(String::as_str).collect();
        let header = format!("[{}, {}]", card.id, groups.join(", "));
        self.out().say_colored(&header, Color::DarkGrey);
        for translation in &card.translations {
            self.out().say(format!("  {}", translation));
        }
        Ok(())
    }

    fn lookup(&mut self, text: &str) -> anyhow::Result<()> {
        let ids = self.scheduler.store().find_cards_with(text)?;
        if ids.is_empty() {
            self.out().say("No cards found.");
        }
        for id in ids {
            self.show_card(id)?;
        }
        Ok(())
    }

    fn stats(&mut self) -> anyhow::Result<()> {
        let (counts, due) = self.scheduler.shelf_statistics()?;
        let total: usize = counts.iter().sum();
        for (shelf, count) in counts.iter().enumerate() {
            self.out().say(format!("s{}: {:>5}", shelf, count));
        }
        self.out().say(format!("{} card(s) in use, {} due today.", total, due));
        Ok(())
    }

    fn unknown_group(&mut self, name: &str) {
        self.out().say_colored(&format!("Unknown group '{}'.", name), Color::Yellow);
    }

    #[cfg(test)]
    pub fn into_parts(self) -> (Database, TerminalPrompter<R, W>) {
        (self.scheduler.into_store(), self.grader.into_prompter())
    }
}
