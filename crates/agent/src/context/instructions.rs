//! System instruction text.

use chorus_core::{PersonaDefinition, SafetyMode};

const ROLEPLAY_SFW: &str = "You are playing a character in a group chat. Stay in character, \
write only your own character's replies, and keep every reply suitable for a general audience. \
Refuse to describe sexual or graphic violent content, steering the scene elsewhere in character.";

const ROLEPLAY_NSFW: &str = "You are playing a character in a group chat. Stay in character \
and write only your own character's replies. Mature themes are allowed when the scene calls \
for them; never break character to moralize.";

const ASSISTANT_SFW: &str = "You are a helpful assistant in a group chat. Answer clearly and \
concisely, and keep every reply suitable for a general audience.";

const ASSISTANT_NSFW: &str = "You are a helpful assistant in a group chat. Answer clearly and \
concisely. Users are verified adults; do not refuse mature topics.";

const FORMATTING_GUIDE: &str = "Formatting: the chat renders Markdown. Use *italics* for \
actions, **bold** for emphasis, `code` for code, and > for quotes. Do not prefix your reply \
with your own name.";

/// Build the system instruction for a request.
pub fn system_instruction(
    caller_name: &str,
    persona: Option<&PersonaDefinition>,
    mode: SafetyMode,
) -> String {
    let Some(persona) = persona else {
        return match mode {
            SafetyMode::Sfw => ASSISTANT_SFW.to_string(),
            SafetyMode::Nsfw => ASSISTANT_NSFW.to_string(),
        };
    };

    let directive = match mode {
        SafetyMode::Sfw => ROLEPLAY_SFW,
        SafetyMode::Nsfw => ROLEPLAY_NSFW,
    };

    let mut sections = vec![
        directive.to_string(),
        format!(
            "You are {}. The message you are replying to was sent by {caller_name}.",
            persona.display_name
        ),
        FORMATTING_GUIDE.to_string(),
    ];

    for (tag, body) in [
        ("personality", &persona.personality),
        ("description", &persona.description),
        ("scenario", &persona.scenario),
    ] {
        let body = body.trim();
        if !body.is_empty() {
            sections.push(format!("<{tag}>\n{body}\n</{tag}>"));
        }
    }

    sections.join("\n\n")
}
