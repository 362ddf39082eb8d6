//! Prompt sanitization applied before any text leaves the process.

use unicode_general_category::{GeneralCategory, get_general_category};

/// Removes control and other non-printable characters from a prompt.
///
/// Printable Unicode (letters, marks, numbers, punctuation, symbols) and all
/// Unicode whitespace, including `\t`, `\n` and `\r`, are kept as is. Control
/// characters such as NUL, BEL or ESC, invisible format characters,
/// private-use and unassigned code points are dropped. The result is stable:
/// sanitizing an already sanitized prompt returns it unchanged.
pub fn sanitize_prompt(prompt: &str) -> String {
    prompt
        .chars()
        .filter(|&c| c.is_whitespace() || is_printable(c))
        .collect()
}

// Everything outside the C* categories (Cc, Cf, Cs, Co, Cn).
fn is_printable(c: char) -> bool {
    !matches!(
        get_general_category(c),
        GeneralCategory::Control
            | GeneralCategory::Format
            | GeneralCategory::Surrogate
            | GeneralCategory::PrivateUse
            | GeneralCategory::Unassigned
    )
}
