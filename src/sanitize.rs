//! Transport-boundary message filter.
//!
//! Runs before a body reaches the domain commands: it rejects only the hard
//! transport cap and strips decoration abuse (stacked combining marks,
//! endless character runs). The tighter domain cap lives in the send command
//! and is enforced there, not here.

use crate::error::AppError;
use tracing::warn;

pub const TRANSPORT_MAX_CHARS: usize = 10_000;

/// Bodies beyond this size pass through but are flagged for operators.
const FLAG_CHARS: usize = 5_000;
const MAX_COMBINING_RUN: usize = 2;
const MAX_REPEAT_RUN: usize = 10;

pub fn clean(input: &str) -> Result<String, AppError> {
    let chars = input.chars().count();
    if chars > TRANSPORT_MAX_CHARS {
        return Err(AppError::BadRequest(format!(
            "message exceeds {TRANSPORT_MAX_CHARS} characters"
        )));
    }
    if chars > FLAG_CHARS {
        warn!(chars, "oversized message body passed transport filter");
    }

    let stripped = strip_combining_runs(input);
    Ok(collapse_repeats(&stripped))
}

fn is_combining(c: char) -> bool {
    matches!(
        c,
        '\u{0300}'..='\u{036F}'
            | '\u{1AB0}'..='\u{1AFF}'
            | '\u{1DC0}'..='\u{1DFF}'
            | '\u{20D0}'..='\u{20FF}'
            | '\u{FE20}'..='\u{FE2F}'
    )
}

// Zalgo text stacks dozens of combining marks on one base char. Two marks
// cover legitimate diacritics; the rest are dropped.
fn strip_combining_runs(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut run = 0usize;
    for c in input.chars() {
        if is_combining(c) {
            run += 1;
            if run > MAX_COMBINING_RUN {
                continue;
            }
        } else {
            run = 0;
        }
        out.push(c);
    }
    out
}

fn collapse_repeats(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev: Option<char> = None;
    let mut run = 0usize;
    for c in input.chars() {
        if prev == Some(c) {
            run += 1;
        } else {
            run = 1;
            prev = Some(c);
        }
        if run > MAX_REPEAT_RUN {
            continue;
        }
        out.push(c);
    }
    out
}
