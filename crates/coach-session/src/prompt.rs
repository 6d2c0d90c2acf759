//! Llama-3 chat template.
//!
//! ```text
//! <|begin_of_text|><|start_header_id|>system<|end_header_id|>
//!
//! {instruction}
//!
//! {context}<|eot_id|><|start_header_id|>user<|end_header_id|>
//!
//! {utterance}<|eot_id|><|start_header_id|>assistant<|end_header_id|>
//!
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Stateless prompt composer.
pub struct PromptBuilder;

impl PromptBuilder {
    pub const BEGIN_OF_TEXT: &'static str = "<|begin_of_text|>";
    pub const START_HEADER: &'static str = "<|start_header_id|>";
    pub const END_HEADER: &'static str = "<|end_header_id|>";
    pub const END_OF_TURN: &'static str = "<|eot_id|>";

    /// Every delimiter the template emits.
    pub const MARKERS: [&'static str; 4] = [
        Self::BEGIN_OF_TEXT,
        Self::START_HEADER,
        Self::END_HEADER,
        Self::END_OF_TURN,
    ];

    /// System turn (instruction, then the context block verbatim), the user
    /// turn, and an open assistant header.
    pub fn build(system_instruction: &str, context_block: &str, user_utterance: &str) -> String {
        let system = if context_block.is_empty() {
            system_instruction.to_string()
        } else {
            format!("{system_instruction}\n\n{context_block}")
        };
        Self::render(&[Turn::new(Role::System, system), Turn::new(Role::User, user_utterance)])
    }

    /// Renders `turns` and leaves the assistant header open for generation.
    pub fn render(turns: &[Turn]) -> String {
        let body: usize = turns.iter().map(|t| t.text.len() + 48).sum();
        let mut out = String::with_capacity(body + 64);
        out.push_str(Self::BEGIN_OF_TEXT);
        for turn in turns {
            Self::push_header(&mut out, turn.role);
            out.push_str(&turn.text);
            out.push_str(Self::END_OF_TURN);
        }
        Self::push_header(&mut out, Role::Assistant);
        out
    }

    fn push_header(out: &mut String, role: Role) {
        out.push_str(Self::START_HEADER);
        out.push_str(role.as_str());
        out.push_str(Self::END_HEADER);
        out.push_str("\n\n");
    }

    /// True when `text` carries any template delimiter.
    pub fn contains_marker(text: &str) -> bool {
        Self::MARKERS.iter().any(|m| text.contains(m))
    }
}
