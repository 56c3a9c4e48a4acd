//! Line-oriented terminal front end for grading.

use crate::config::DisplayConfig;
use crossterm::style::{Color, Stylize};
use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use vocab_core::{
    Confirm, CoreError, CoreResult, GradeEvent, Phase, Phrase, Prompt, Prompter, SessionEvent, Verdict,
};

/// Reads answers from `input` and writes prompts and feedback to `output`.
pub struct TerminalPrompter<R, W> {
    input: R,
    output: W,
    color: bool,
    show_card_info: bool,
}

impl<R: BufRead, W: Write> TerminalPrompter<R, W> {
    pub fn new(input: R, output: W, display: &DisplayConfig) -> Self {
        Self {
            input,
            output,
            color: display.color,
            show_card_info: display.show_card_info,
        }
    }

    /// Show `prompt` and read one line without its line ending.
    ///
    /// `None` once the input is exhausted.
    pub fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    /// Write one line of output; write failures are ignored.
    pub fn say(&mut self, text: impl Display) {
        let _ = writeln!(self.output, "{}", text);
    }

    /// Like [`say`](Self::say), in a color when colors are enabled.
    pub fn say_colored(&mut self, text: &str, color: Color) {
        let text = self.paint(text, color);
        self.say(text);
    }

    #[cfg(test)]
    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn answer(&mut self, prompt: &str) -> CoreResult<String> {
        self.read_line(prompt)?.ok_or_else(|| {
            CoreError::Input(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"))
        })
    }
}

fn with_synonyms(text: &str, synonyms: &[Arc<Phrase>]) -> String {
    if synonyms.is_empty() {
        return text.to_string();
    }
    let synonyms: Vec<&str> = synonyms.iter().map(|s| s.text()).collect();
    format!("{} (= {})", text, synonyms.join("; "))
}

impl<R: BufRead, W: Write> Prompter for TerminalPrompter<R, W> {
    fn ask(&mut self, prompt: Prompt<'_>) -> CoreResult<String> {
        match prompt {
            Prompt::PrincipalParts { infinitive, synonyms } => {
                let lead = format!("{}, ", with_synonyms(infinitive, synonyms));
                let lead = self.paint(&lead, Color::Blue);
                self.answer(&lead)
            }
            Prompt::Meanings {
                lead,
                synonyms,
                context,
            } => {
                if let Some(lead) = lead {
                    let lead = with_synonyms(lead, synonyms);
                    self.say_colored(&lead, Color::Blue);
                }
                if !context.is_empty() {
                    self.say(format!("  {}", context));
                }
                self.answer("> ")
            }
        }
    }

    fn confirm(&mut self, question: Confirm) -> CoreResult<bool> {
        let Confirm::ForwardAnyway { wrong_answers } = question;
        let prompt = format!("{} mistake(s). Count as correct anyway? [y/N] ", wrong_answers);
        let reply = self.answer(&prompt)?;
        Ok(matches!(reply.trim().to_lowercase().as_str(), "y" | "yes" | "j" | "ja"))
    }

    fn notify(&mut self, event: GradeEvent<'_>) {
        match event {
            GradeEvent::CardHeader(card) => {
                if self.show_card_info {
                    let groups: Vec<&str> = card.card.groups.iter().map(String::as_str).collect();
                    let header = format!("[card {}, shelf {}, {}]", card.id(), card.shelf, groups.join(", "));
                    self.say_colored(&header, Color::DarkGrey);
                }
            }
            GradeEvent::PrincipalParts { expected } => {
                self.say_colored(&format!("correct: {}", expected), Color::Yellow);
            }
            GradeEvent::Typo { given, expected } => {
                self.say_colored(&format!("typo: {} -> {}", given, expected), Color::Yellow);
            }
            GradeEvent::Surplus(wrong) => {
                self.say_colored(&format!("wrong: {}", wrong.join(", ")), Color::Red);
            }
            GradeEvent::Missing(missing) => {
                self.say_colored(&format!("missing: {}", missing.join(", ")), Color::Cyan);
            }
        }
    }

    fn session_event(&mut self, event: SessionEvent<'_>) {
        match event {
            SessionEvent::Started { counts } => {
                let shelves: Vec<String> = counts
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| **n > 0)
                    .map(|(shelf, n)| format!("s{}: {}", shelf, n))
                    .collect();
                if !shelves.is_empty() {
                    self.say(format!("Cards per shelf: {}", shelves.join(", ")));
                }
            }
            SessionEvent::PhaseStarted { phase, cards } => match phase {
                Phase::FirstPass => self.say(format!("{} card(s) to question.", cards)),
                Phase::SecondChance => self.say_colored(&format!("Second chance for {} card(s).", cards), Color::Magenta),
                Phase::LearningLoop => self.say_colored(&format!("Learning {} missed card(s).", cards), Color::Magenta),
                Phase::Done => {}
            },
            SessionEvent::Questioning { index, total, .. } => {
                self.say(format!("\n({}/{})", index, total));
            }
            SessionEvent::Graded { card, verdict, phase } => match (verdict, phase) {
                (Verdict::Correct, Phase::LearningLoop) => {
                    self.say_colored(&format!("card {} learned, now on shelf {}", card.id(), card.shelf), Color::Green)
                }
                (Verdict::Correct, _) => self.say_colored(
                    &format!("correct, now on shelf {} until {}", card.shelf, card.due_date),
                    Color::Green,
                ),
                (Verdict::Again, Phase::FirstPass) if card.shelf > 0 => {
                    self.say_colored("one mistake, asked again later", Color::Yellow)
                }
                _ => self.say_colored("wrong, back to shelf 0", Color::Red),
            },
            SessionEvent::Skipped { card_id, error } => {
                self.say_colored(&format!("skipping card {}: {}", card_id, error), Color::Red);
            }
            SessionEvent::LearningBatch { size, remaining } => {
                self.say(format!("\nLearning batch of {} ({} waiting)", size, remaining));
            }
            SessionEvent::LearningRound {
                clean,
                consecutive,
                required,
            } => {
                if clean {
                    self.say_colored(&format!("clean round {}/{}", consecutive, required), Color::Green);
                } else {
                    self.say_colored("mistakes, starting over", Color::Yellow);
                }
            }
            SessionEvent::Finished(summary) => {
                self.say(format!(
                    "\nDone: {} correct, {} wrong, {} skipped, {} learning round(s).",
                    summary.correct_count, summary.wrong_count, summary.skipped_count, summary.rounds_in_learning_loop
                ));
            }
        }
    }
}
