//! Single-edit approximate matching of answers.
//!
//! An answer is accepted as a typo of the correct phrase when one of these
//! edits turns the correct phrase into the answer:
//!
//! - one inserted character,
//! - one deleted or substituted character,
//! - two adjacent characters swapped.
//!
//! Comparison is per `char` and literal; brackets and other punctuation carry
//! no special meaning.

/// Whether `candidate` is at most one edit away from `correct`.
pub fn fuzzy_match(candidate: &str, correct: &str) -> bool {
    if candidate == correct {
        return true;
    }

    let candidate: Vec<char> = candidate.chars().collect();
    let correct: Vec<char> = correct.chars().collect();

    match candidate.len() as isize - correct.len() as isize {
        1 => one_extra(&candidate, &correct),
        -1 => one_extra(&correct, &candidate),
        0 => one_substitution(&candidate, &correct) || one_transposition(&candidate, &correct),
        _ => false,
    }
}

/// `longer` equals `shorter` with exactly one character inserted.
fn one_extra(longer: &[char], shorter: &[char]) -> bool {
    let prefix = common_prefix(longer, shorter);
    longer[prefix + 1..] == shorter[prefix..]
}

fn one_substitution(a: &[char], b: &[char]) -> bool {
    let prefix = common_prefix(a, b);
    prefix < a.len() && a[prefix + 1..] == b[prefix + 1..]
}

fn one_transposition(a: &[char], b: &[char]) -> bool {
    let i = common_prefix(a, b);
    i + 1 < a.len() && a[i] == b[i + 1] && a[i + 1] == b[i] && a[i + 2..] == b[i + 2..]
}

fn common_prefix(a: &[char], b: &[char]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
