//! The six workflow agents: retrieve, strategist, critic, moderator,
//! reporter, tutor. Each implements [`crate::graph::Node`] over
//! [`crate::state::WorkflowState`] and records its execution in the state's
//! audit log.

mod critic;
mod moderator;
mod reporter;
mod retrieve;
mod strategist;
mod tutor;

pub use critic::CriticNode;
pub use moderator::ModeratorNode;
pub use reporter::ReporterNode;
pub use retrieve::RetrieveNode;
pub use strategist::StrategistNode;
pub use tutor::TutorNode;

/// Splits an LLM response on `## ` headings into `(normalized_key, body)`
/// pairs. Keys are lowercased with non-alphanumeric runs collapsed to `_`,
/// so "STEP-BY-STEP SOLUTION" and "Step By Step Solution" both map to
/// `step_by_step_solution`.
pub(crate) fn split_markdown_sections(text: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("## ") {
            sections.push((normalize_section_key(heading), Vec::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            if !trimmed.is_empty() {
                body.push(trimmed);
            }
        }
    }
    sections
        .into_iter()
        .map(|(key, body)| (key, body.join("\n")))
        .collect()
}

pub(crate) fn normalize_section_key(heading: &str) -> String {
    let mut key = String::new();
    let mut last_was_sep = true;
    for c in heading.trim().chars() {
        if c.is_alphanumeric() {
            key.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            key.push('_');
            last_was_sep = true;
        }
    }
    key.trim_end_matches('_').to_string()
}

/// Looks up a section body by normalized key.
pub(crate) fn section<'a>(sections: &'a [(String, String)], key: &str) -> Option<&'a str> {
    sections
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, body)| body.as_str())
}
