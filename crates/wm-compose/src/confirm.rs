#![forbid(unsafe_code)]

//! Confirmation gate for destructive actions (delete, revalidate, rerun).
//!
//! The prompt blocks, and the guarded action (which usually issues a
//! request) only runs once the user has said yes.

/// A blocking yes/no prompt.
pub trait Prompt {
    fn confirm(&mut self, message: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Prompt for F {
    fn confirm(&mut self, message: &str) -> bool {
        self(message)
    }
}

/// Whether the action title reads as a statement that needs a `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phrasing {
    #[default]
    Question,
    /// The title already ends the sentence; no `?` is appended.
    Statement,
}

#[must_use]
pub fn danger_message(title: &str, phrasing: Phrasing) -> String {
    match phrasing {
        Phrasing::Question => format!("Are you sure you want to {title}?"),
        Phrasing::Statement => format!("Are you sure you want to {title}"),
    }
}

/// Ask the user to confirm the action named `title`.
pub fn confirm_danger(prompt: &mut dyn Prompt, title: &str, phrasing: Phrasing) -> bool {
    let confirmed = prompt.confirm(&danger_message(title, phrasing));
    tracing::debug!(title, confirmed, "danger confirmation");
    confirmed
}

/// Run `action` only if the user confirms. `None` when declined.
pub fn guard<R>(
    prompt: &mut dyn Prompt,
    title: &str,
    phrasing: Phrasing,
    action: impl FnOnce() -> R,
) -> Option<R> {
    confirm_danger(prompt, title, phrasing).then(action)
}
