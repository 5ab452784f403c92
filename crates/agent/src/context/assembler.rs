//! Prompt assembly pipeline: the core of what reaches the backend.
//!
//! Turns an ordered conversation history plus an optional persona into an
//! [`AssembledPrompt`]:
//!
//! 1. **System instruction**: highest priority, never trimmed
//! 2. **History**: newest turns kept while they fit; oldest dropped first
//! 3. **Leading-role fix**: the retained sequence must start with a user turn
//! 4. **Safety profile**: selected by mode
//!
//! # Determinism
//!
//! Assembly is deterministic given a deterministic [`TokenCounter`]:
//! identical inputs always produce identical outputs.

use std::collections::VecDeque;
use std::sync::Arc;

use chorus_core::{
    AssembledPrompt, ConversationTurn, PersonaDefinition, PromptTurn, Role, SafetyMode,
    TokenCounter,
};
use tracing::{debug, warn};

use crate::context::instructions::system_instruction;
use crate::context::safety::safety_profile;
use crate::context::token::HeuristicTokenCounter;

/// Text of the synthetic user turn inserted by the leading-role fix.
const PLACEHOLDER_TEXT: &str = "(continues the conversation)";

/// The prompt assembler. Stateless apart from its budget; create one per
/// backend and reuse it.
#[derive(Clone)]
pub struct PromptAssembler {
    budget: usize,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for PromptAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptAssembler")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl PromptAssembler {
    /// Create an assembler with the given token budget and counter.
    pub fn new(budget: usize, counter: Arc<dyn TokenCounter>) -> Self {
        Self { budget, counter }
    }

    /// Create an assembler using the character heuristic.
    pub fn with_heuristic_counter(budget: usize) -> Self {
        Self::new(budget, Arc::new(HeuristicTokenCounter))
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Assemble a backend-ready prompt.
    ///
    /// # Algorithm
    ///
    /// 1. Build the system instruction and count it
    /// 2. Walk history newest → oldest, keeping each rendered turn while the
    ///    remaining budget stays non-negative; the first turn that doesn't
    ///    fit ends the walk
    /// 3. If the kept sequence doesn't open with a user turn, prepend a
    ///    placeholder user turn (releasing the oldest kept turns if the
    ///    placeholder itself doesn't fit)
    /// 4. Attach the safety profile for `mode`
    pub fn assemble(
        &self,
        history: &[ConversationTurn],
        caller_name: &str,
        persona: Option<&PersonaDefinition>,
        mode: SafetyMode,
    ) -> AssembledPrompt {
        // ── Step 1: system instruction ─────────────────────────────────────
        let system_instruction = system_instruction(caller_name, persona, mode);
        let instruction_tokens = self.counter.count(&system_instruction);

        // ── Step 2: history pruning ────────────────────────────────────────
        let mut retained: VecDeque<PromptTurn> = VecDeque::new();
        let mut remaining = match self.budget.checked_sub(instruction_tokens) {
            Some(remaining) => remaining,
            None => {
                warn!(
                    instruction_tokens,
                    budget = self.budget,
                    "System instruction alone exceeds the token budget, dropping all history"
                );
                return AssembledPrompt {
                    system_instruction,
                    instruction_tokens,
                    turns: Vec::new(),
                    safety_profile: safety_profile(mode),
                    budget: self.budget,
                    dropped_turns: history.len(),
                };
            }
        };

        for turn in history.iter().rev() {
            let rendered = self.render(turn, persona);
            let Some(left) = remaining.checked_sub(rendered.cost) else {
                break;
            };
            remaining = left;
            retained.push_front(rendered);
        }

        let mut dropped_turns = history.len() - retained.len();

        // ── Step 3: leading-role fix ───────────────────────────────────────
        let placeholder = self.placeholder(caller_name);
        loop {
            match retained.front() {
                None => break,
                Some(first) if first.role == Role::User => break,
                Some(_) => {}
            }
            if placeholder.cost <= remaining {
                remaining -= placeholder.cost;
                retained.push_front(placeholder);
                break;
            }
            if let Some(released) = retained.pop_front() {
                remaining += released.cost;
                dropped_turns += 1;
            }
        }

        let turns: Vec<PromptTurn> = retained.into();
        debug!(
            instruction_tokens,
            kept = turns.len(),
            dropped = dropped_turns,
            remaining,
            "Assembled prompt"
        );

        // ── Step 4: safety profile ─────────────────────────────────────────
        AssembledPrompt {
            system_instruction,
            instruction_tokens,
            turns,
            safety_profile: safety_profile(mode),
            budget: self.budget,
            dropped_turns,
        }
    }

    // ── Helpers ────────────────────────────────────────────────────────────

    /// Render a turn with its speaker prefix. Assistant turns are attributed
    /// to the persona when one is active.
    fn render(&self, turn: &ConversationTurn, persona: Option<&PersonaDefinition>) -> PromptTurn {
        let name = match (turn.role, persona) {
            (Role::Assistant, Some(p)) => p.display_name.clone(),
            _ => turn.speaker.clone(),
        };
        let content = format!("{name}: {}", turn.text);
        let cost = self.counter.count(&content);
        PromptTurn {
            role: turn.role,
            name,
            content,
            cost,
            media: turn.media.clone(),
            function_name: turn.function_name.clone(),
            synthetic: false,
        }
    }

    fn placeholder(&self, caller_name: &str) -> PromptTurn {
        let content = format!("{caller_name}: {PLACEHOLDER_TEXT}");
        let cost = self.counter.count(&content);
        PromptTurn {
            role: Role::User,
            name: caller_name.to_string(),
            content,
            cost,
            media: Vec::new(),
            function_name: None,
            synthetic: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Turns rendered as `"u: xxxx"` cost one token per `x`; everything
    /// else (the instruction, placeholders) costs a flat amount.
    fn counter(flat: usize) -> Arc<dyn TokenCounter> {
        Arc::new(move |text: &str| match text.strip_prefix("u: ") {
            Some(body) => body.len(),
            None => match text.strip_prefix("bot: ") {
                Some(body) => body.len(),
                None => flat,
            },
        })
    }

    fn user(cost: usize) -> ConversationTurn {
        ConversationTurn::user("u", "x".repeat(cost))
    }

    fn bot(cost: usize) -> ConversationTurn {
        ConversationTurn::assistant("bot", "x".repeat(cost))
    }

    fn assert_within_budget(prompt: &AssembledPrompt) {
        assert!(prompt.total_tokens() <= prompt.budget);
    }

    #[test]
    fn keeps_everything_that_fits() {
        let asm = PromptAssembler::new(100, counter(50));
        let history = vec![user(10), user(10), user(10)];

        let prompt = asm.assemble(&history, "u", None, SafetyMode::Nsfw);

        assert_eq!(prompt.instruction_tokens, 50);
        assert_eq!(prompt.turns.len(), 3);
        assert_eq!(prompt.total_tokens(), 80);
        assert_eq!(prompt.dropped_turns, 0);
    }

    #[test]
    fn drops_oldest_turn_when_budget_runs_out() {
        let asm = PromptAssembler::new(100, counter(50));
        let history = vec![user(10), user(10), user(10), user(25)];

        let prompt = asm.assemble(&history, "u", None, SafetyMode::Nsfw);

        // 50 + 25 + 10 + 10 = 95; the oldest 10 would make 105.
        let costs: Vec<usize> = prompt.turns.iter().map(|t| t.cost).collect();
        assert_eq!(costs, vec![10, 10, 25]);
        assert_eq!(prompt.total_tokens(), 95);
        assert_eq!(prompt.dropped_turns, 1);
    }

    #[test]
    fn walk_stops_at_first_turn_that_does_not_fit() {
        let asm = PromptAssembler::new(100, counter(50));
        // The 40 doesn't fit after 10 + 10; the older 1 is dropped too.
        let history = vec![user(1), user(40), user(10), user(10)];

        let prompt = asm.assemble(&history, "u", None, SafetyMode::Sfw);

        assert_eq!(prompt.turns.len(), 2);
        assert_eq!(prompt.dropped_turns, 2);
    }

    #[test]
    fn retained_turns_stay_chronological() {
        let asm = PromptAssembler::with_heuristic_counter(4096);
        let history = vec![
            ConversationTurn::user("alice", "first"),
            ConversationTurn::assistant("bot", "second"),
            ConversationTurn::user("bob", "third"),
        ];

        let prompt = asm.assemble(&history, "bob", None, SafetyMode::Sfw);

        let contents: Vec<&str> = prompt.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["alice: first", "bot: second", "bob: third"]);
    }

    #[test]
    fn assistant_turns_take_persona_name() {
        let asm = PromptAssembler::with_heuristic_counter(4096);
        let persona = PersonaDefinition::new("Mira");
        let history = vec![
            ConversationTurn::user("alice", "hi"),
            ConversationTurn::assistant("webhook-7", "hello"),
        ];

        let prompt = asm.assemble(&history, "alice", Some(&persona), SafetyMode::Sfw);

        assert_eq!(prompt.turns[1].name, "Mira");
        assert_eq!(prompt.turns[1].content, "Mira: hello");
        assert!(prompt.system_instruction.contains("You are Mira"));
    }

    #[test]
    fn leading_assistant_turn_gets_placeholder() {
        let asm = PromptAssembler::new(100, counter(5));
        let history = vec![bot(10), user(10)];

        let prompt = asm.assemble(&history, "carol", None, SafetyMode::Sfw);

        assert_eq!(prompt.turns.len(), 3);
        assert_eq!(prompt.turns[0].role, Role::User);
        assert!(prompt.turns[0].synthetic);
        assert_eq!(prompt.turns[0].name, "carol");
        assert_within_budget(&prompt);
    }

    #[test]
    fn pruning_can_expose_a_non_user_turn() {
        let asm = PromptAssembler::new(80, counter(50));
        // Only the newest (assistant, 20) fits; placeholder costs 50 → doesn't.
        let history = vec![user(20), bot(20)];

        let prompt = asm.assemble(&history, "u2", None, SafetyMode::Sfw);

        // The assistant turn is released to make room, leaving nothing that
        // needs a placeholder.
        assert!(prompt.turns.is_empty());
        assert_eq!(prompt.dropped_turns, 2);
    }

    #[test]
    fn placeholder_releases_oldest_until_user_leads() {
        // instruction 5, placeholder 5, budget 40
        let asm = PromptAssembler::new(40, counter(5));
        let history = vec![bot(15), user(10), bot(10)];

        // bot(10) + user(10) + bot(15) = 35 = remaining → no room for the
        // placeholder, so the leading bot(15) is released and user leads.
        let prompt = asm.assemble(&history, "z", None, SafetyMode::Sfw);

        assert_eq!(prompt.turns.len(), 2);
        assert_eq!(prompt.turns[0].role, Role::User);
        assert!(!prompt.turns[0].synthetic);
        assert_within_budget(&prompt);
    }

    #[test]
    fn empty_history_yields_no_turns() {
        let asm = PromptAssembler::with_heuristic_counter(4096);
        let prompt = asm.assemble(&[], "alice", None, SafetyMode::Sfw);
        assert!(prompt.turns.is_empty());
        assert_eq!(prompt.dropped_turns, 0);
    }

    #[test]
    fn oversized_instruction_drops_all_history() {
        let asm = PromptAssembler::new(10, counter(50));
        let prompt = asm.assemble(&[user(1)], "u", None, SafetyMode::Sfw);
        assert!(prompt.turns.is_empty());
        assert_eq!(prompt.dropped_turns, 1);
    }

    #[test]
    fn budget_invariant_holds_across_budgets() {
        let history: Vec<ConversationTurn> = (0..30)
            .map(|i| {
                let cost = 3 + (i * 7) % 11;
                if i % 3 == 0 { bot(cost) } else { user(cost) }
            })
            .collect();

        for budget in (0..200).step_by(7) {
            let asm = PromptAssembler::new(budget, counter(12));
            let prompt = asm.assemble(&history, "u", None, SafetyMode::Nsfw);
            if prompt.instruction_tokens <= budget {
                assert_within_budget(&prompt);
            }
            if let Some(first) = prompt.turns.first() {
                assert_eq!(first.role, Role::User, "budget {budget}");
            }
        }
    }

    #[test]
    fn safety_profile_follows_mode() {
        let asm = PromptAssembler::with_heuristic_counter(4096);
        let strict = asm.assemble(&[], "a", None, SafetyMode::Sfw);
        let permissive = asm.assemble(&[], "a", None, SafetyMode::Nsfw);
        assert_eq!(strict.safety_profile, safety_profile(SafetyMode::Sfw));
        assert_ne!(strict.safety_profile, permissive.safety_profile);
    }

    #[test]
    fn deterministic_assembly() {
        let asm = PromptAssembler::with_heuristic_counter(64);
        let history: Vec<ConversationTurn> = (0..10)
            .map(|i| ConversationTurn::user("alice", format!("message number {i}")))
            .collect();
        let a = asm.assemble(&history, "alice", None, SafetyMode::Sfw);
        let b = asm.assemble(&history, "alice", None, SafetyMode::Sfw);
        assert_eq!(a.system_instruction, b.system_instruction);
        assert_eq!(a.turns.len(), b.turns.len());
        assert_eq!(a.dropped_turns, b.dropped_turns);
    }
}
