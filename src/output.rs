use std::io::{Read, Seek, SeekFrom};

use serde::Serialize;

use crate::engine::Status;

/// Appended when the captured output hit the ceiling
pub const TRUNCATION_MARKER: &str = "\n<too much output, truncated>\n";

pub const TIMEOUT_MESSAGE: &str = "<process ran for too long. output is below>\n";

/// Response body of `POST /run/{language}`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
}

impl ExecutionResult {
    /// A failure that happened before or around the execution itself
    pub fn failure(message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            output: format!("<{message}>"),
        }
    }
}

/// Human-readable line put in front of the captured output
pub fn status_line(status: &Status) -> Option<String> {
    match status {
        Status::Success => None,
        Status::Timeout => Some(TIMEOUT_MESSAGE.to_string()),
        Status::ProcessError(detail) => Some(format!(
            "<process finished with error: {detail}. output is below>\n"
        )),
    }
}

/// Builds the result from the output file.
///
/// The status line counts against `output_limit`; the captured bytes fill
/// the rest. The final length never exceeds
/// `output_limit + TRUNCATION_MARKER.len()`.
pub fn collect<R: Read + Seek>(
    output: &mut R,
    output_limit: usize,
    status: &Status,
) -> ExecutionResult {
    let mut text = status_line(status).unwrap_or_default();
    truncate_at_char_boundary(&mut text, output_limit);
    let budget = output_limit - text.len();

    let mut captured = Vec::with_capacity(budget.min(64 * 1024));
    let read = output.seek(SeekFrom::Start(0)).and_then(|_| {
        output
            .by_ref()
            .take(budget as u64)
            .read_to_end(&mut captured)
    });

    if let Err(e) = read {
        log::warn!("Failed to read process output: {e}");
        let mut message = format!("<failed to read output: {e}>");
        truncate_at_char_boundary(&mut message, budget);
        text.push_str(&message);
        return ExecutionResult {
            success: false,
            output: text,
        };
    }

    let mut body = String::from_utf8_lossy(&captured).into_owned();
    truncate_at_char_boundary(&mut body, budget);
    text.push_str(&body);
    if captured.len() == budget {
        text.push_str(TRUNCATION_MARKER);
    }

    ExecutionResult {
        success: *status == Status::Success,
        output: text,
    }
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
