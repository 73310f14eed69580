//! Shaping conversation history for the chat API.
//!
//! The API rejects conversations that do not open with a user turn, and it
//! only understands user/assistant turns with non-empty content.

use crate::plugins::history::{Conversation, Role};

use super::error::ChatError;
use super::types::ChatTurn;

fn drop_leading_assistant(turns: &mut Vec<ChatTurn>) {
    let first_user = turns
        .iter()
        .position(|t| t.role != Role::Assistant)
        .unwrap_or(turns.len());
    turns.drain(..first_user);
}

/// User/assistant turns with non-empty (trimmed) content, starting with a
/// user turn. System messages are dropped.
pub fn build_valid_history(conversation: &Conversation) -> Vec<ChatTurn> {
    let mut turns: Vec<ChatTurn> = conversation
        .messages
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter_map(|m| {
            let content = m.content.trim();
            (!content.is_empty()).then(|| ChatTurn::new(m.role, content))
        })
        .collect();
    drop_leading_assistant(&mut turns);
    turns
}

/// Final normalization applied by the API client right before sending.
///
/// Unlike `build_valid_history`, system turns are kept but demoted to the
/// user role, which is what the Llama web client has always sent.
pub fn prepare_for_transmission(history: &[ChatTurn]) -> Result<Vec<ChatTurn>, ChatError> {
    let mut turns: Vec<ChatTurn> = history
        .iter()
        .filter_map(|t| {
            let content = t.content.trim();
            if content.is_empty() {
                return None;
            }
            let role = match t.role {
                Role::System => Role::User,
                role => role,
            };
            Some(ChatTurn::new(role, content))
        })
        .collect();
    drop_leading_assistant(&mut turns);

    match turns.first() {
        Some(first) if first.role == Role::User => Ok(turns),
        _ => Err(ChatError::validation(
            "Conversation must start with a user message",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::history::Message;

    fn conversation(messages: Vec<Message>) -> Conversation {
        Conversation {
            id: "conv_test".to_string(),
            name: "test".to_string(),
            created: 0,
            updated: 0,
            messages,
        }
    }

    #[test]
    fn test_leading_assistant_dropped() {
        let conv = conversation(vec![
            Message::assistant("hi"),
            Message::user("hello"),
            Message::assistant("ok"),
        ]);
        assert_eq!(
            build_valid_history(&conv),
            vec![ChatTurn::user("hello"), ChatTurn::assistant("ok")]
        );
    }

    #[test]
    fn test_all_leading_assistants_dropped() {
        let conv = conversation(vec![
            Message::assistant("one"),
            Message::assistant("two"),
            Message::user("three"),
        ]);
        assert_eq!(build_valid_history(&conv), vec![ChatTurn::user("three")]);

        let conv = conversation(vec![Message::assistant("only")]);
        assert!(build_valid_history(&conv).is_empty());
    }

    #[test]
    fn test_empty_and_system_filtered() {
        let conv = conversation(vec![
            Message::system("be nice"),
            Message::user("   "),
            Message::assistant(""),
        ]);
        assert!(build_valid_history(&conv).is_empty());

        let conv = conversation(vec![
            Message::system("be nice"),
            Message::user("  padded  "),
            Message::system("ignored"),
            Message::assistant("reply"),
        ]);
        assert_eq!(
            build_valid_history(&conv),
            vec![ChatTurn::user("padded"), ChatTurn::assistant("reply")]
        );
    }

    #[test]
    fn test_transmission_demotes_system() {
        let turns = vec![
            ChatTurn::new(Role::System, "rules"),
            ChatTurn::assistant("ok"),
            ChatTurn::user("go"),
        ];
        let prepared = prepare_for_transmission(&turns).unwrap();
        assert_eq!(
            prepared,
            vec![
                ChatTurn::user("rules"),
                ChatTurn::assistant("ok"),
                ChatTurn::user("go"),
            ]
        );
    }

    #[test]
    fn test_transmission_rejects_empty() {
        let err = prepare_for_transmission(&[ChatTurn::assistant("x"), ChatTurn::user(" ")])
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation { .. }));
        assert!(prepare_for_transmission(&[]).is_err());
    }
}
