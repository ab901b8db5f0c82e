//! Prompt construction for AI turns.

use ss_domain::model::{Message, Persona};
use ss_providers::HistoryTurn;

/// Render the persona as an instruction preamble in front of the question.
/// An empty persona leaves the question untouched.
pub fn render_question(persona: &Persona, question: &str) -> String {
    let mut lines = Vec::new();
    if let Some(tone) = non_blank(&persona.tone) {
        lines.push(format!("Respond in a {tone} tone."));
    }
    if let Some(focus) = non_blank(&persona.focus) {
        lines.push(format!("Focus on {focus}."));
    }
    if let Some(language) = non_blank(&persona.language) {
        lines.push(format!("Answer in {language}."));
    }

    if lines.is_empty() {
        return question.to_owned();
    }
    format!("{}\n\n{question}", lines.join(" "))
}

/// Stored messages as `{role, message}` history turns, order preserved.
pub fn history_turns(messages: &[Message]) -> Vec<HistoryTurn> {
    messages
        .iter()
        .map(|m| HistoryTurn::new(m.role, m.text.clone()))
        .collect()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ss_domain::model::Role;

    use super::*;

    #[test]
    fn empty_persona_passes_question_through() {
        assert_eq!(render_question(&Persona::default(), "What is 6*7?"), "What is 6*7?");
    }

    #[test]
    fn persona_fields_render_in_order() {
        let persona = Persona {
            tone: Some("friendly".into()),
            focus: Some("exam preparation".into()),
            language: Some("French".into()),
        };
        assert_eq!(
            render_question(&persona, "Explain osmosis"),
            "Respond in a friendly tone. Focus on exam preparation. Answer in French.\n\nExplain osmosis"
        );
    }

    #[test]
    fn blank_persona_fields_are_skipped() {
        let persona = Persona {
            tone: Some("  ".into()),
            focus: None,
            language: Some("German".into()),
        };
        assert_eq!(render_question(&persona, "Hi"), "Answer in German.\n\nHi");
    }

    #[test]
    fn history_keeps_roles_and_order() {
        let msg = |id: &str, role, text: &str| Message {
            id: id.into(),
            conversation_id: "c1".into(),
            role,
            text: text.into(),
            created_at: Utc::now(),
            feedback: None,
        };
        let turns = history_turns(&[msg("1", Role::User, "q"), msg("2", Role::Assistant, "a")]);
        assert_eq!(
            turns,
            vec![HistoryTurn::new(Role::User, "q"), HistoryTurn::new(Role::Assistant, "a")]
        );
    }
}
