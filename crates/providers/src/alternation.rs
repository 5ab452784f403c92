//! Strict role alternation adapter.
//!
//! Some backends reject prompts unless turns alternate user/assistant and
//! open with a user turn. [`StrictAlternation`] reshapes the assembler's
//! neutral output for them before delegating to the wrapped backend.

use async_trait::async_trait;
use chorus_core::error::BackendError;
use chorus_core::{AssembledPrompt, Backend, Generation, PersonaDefinition, PromptTurn, Role, SafetyMode};

/// Drop everything before the first user turn, then merge runs of
/// same-role turns into one turn each.
pub fn collapse_alternation(turns: &[PromptTurn]) -> Vec<PromptTurn> {
    let Some(start) = turns.iter().position(|t| t.role == Role::User) else {
        return Vec::new();
    };

    let mut collapsed: Vec<PromptTurn> = Vec::new();
    for turn in &turns[start..] {
        match collapsed.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push('\n');
                last.content.push_str(&turn.content);
                last.cost += turn.cost;
                last.media.extend(turn.media.iter().cloned());
                last.synthetic &= turn.synthetic;
            }
            _ => collapsed.push(turn.clone()),
        }
    }
    collapsed
}

/// Wraps a backend that requires strictly alternating roles.
pub struct StrictAlternation<B> {
    inner: B,
}

impl<B: Backend> StrictAlternation<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<B: Backend> Backend for StrictAlternation<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        prompt: &AssembledPrompt,
        persona: Option<&PersonaDefinition>,
        mode: SafetyMode,
    ) -> Result<Generation, BackendError> {
        let reshaped = AssembledPrompt {
            turns: collapse_alternation(&prompt.turns),
            ..prompt.clone()
        };
        self.inner.generate(&reshaped, persona, mode).await
    }

    async fn health_check(&self) -> Result<bool, BackendError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::SafetyProfile;
    use std::sync::Mutex;

    fn turn(role: Role, content: &str) -> PromptTurn {
        PromptTurn {
            role,
            name: "n".into(),
            content: content.into(),
            cost: 1,
            media: vec![],
            function_name: None,
            synthetic: false,
        }
    }

    #[test]
    fn merges_consecutive_roles() {
        let turns = vec![
            turn(Role::Assistant, "a0"),
            turn(Role::User, "u1"),
            turn(Role::User, "u2"),
            turn(Role::Assistant, "a1"),
            turn(Role::Assistant, "a2"),
            turn(Role::User, "u3"),
        ];

        let collapsed = collapse_alternation(&turns);

        let contents: Vec<&str> = collapsed.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["u1\nu2", "a1\na2", "u3"]);
        assert_eq!(collapsed[0].cost, 2);
    }

    #[test]
    fn no_user_turn_means_nothing_to_send() {
        let turns = vec![turn(Role::Assistant, "a0")];
        assert!(collapse_alternation(&turns).is_empty());
    }

    struct Recording {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Backend for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate(
            &self,
            prompt: &AssembledPrompt,
            _persona: Option<&PersonaDefinition>,
            _mode: SafetyMode,
        ) -> Result<Generation, BackendError> {
            self.seen.lock().unwrap().push(prompt.turns.len());
            Ok(Generation::new("ok"))
        }
    }

    #[tokio::test]
    async fn wrapper_reshapes_before_delegating() {
        let backend = StrictAlternation::new(Recording {
            seen: Mutex::new(vec![]),
        });
        let prompt = AssembledPrompt {
            system_instruction: "sys".into(),
            instruction_tokens: 1,
            turns: vec![
                turn(Role::User, "u1"),
                turn(Role::User, "u2"),
                turn(Role::Assistant, "a1"),
            ],
            safety_profile: SafetyProfile::default(),
            budget: 10,
            dropped_turns: 0,
        };

        let generation = backend.generate(&prompt, None, SafetyMode::Sfw).await.unwrap();

        assert_eq!(generation.text(), "ok");
        assert_eq!(backend.name(), "recording");
        assert_eq!(*backend.inner.seen.lock().unwrap(), vec![2]);
    }
}
