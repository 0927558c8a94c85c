//! Front-end collaborator interface.
//!
//! A [`Responder`] is how the relay talks back to whoever sent the inbound
//! message: typing indicators, the final answer, interim updates, reactions
//! and permission prompts. Chat-platform adapters implement this trait; the
//! crate ships a console implementation in [`console`].

pub mod approvals;
pub mod console;

use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// A permission question put to a human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPrompt {
    /// Correlation id of the `can_use_tool` request being decided.
    pub request_id: String,
    /// Tool name as sent by the agent.
    pub tool_name: String,
    /// Why the policy denied the call.
    pub reason: String,
    /// Compact rendering of the tool input.
    pub input_summary: String,
}

impl PermissionPrompt {
    /// Render the prompt as a single human-readable paragraph.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "Agent wants to run `{}` ({}).\nInput: {}",
            self.tool_name, self.reason, self.input_summary
        )
    }
}

/// Outbound surface of a front-end.
///
/// Every method may be called from the conversation task while a turn is in
/// progress; implementations must not call back into the orchestrator.
pub trait Responder: Send + Sync {
    /// Show a typing / working indicator.
    ///
    /// # Errors
    ///
    /// Returns an error if the front-end cannot be reached.
    fn send_typing(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Post the final answer for the inbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if the front-end cannot be reached.
    fn post_response(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// React to the inbound message with `emoji`.
    ///
    /// # Errors
    ///
    /// Returns an error if the front-end cannot be reached.
    fn add_reaction(&self, emoji: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Post an interim progress update.
    ///
    /// # Errors
    ///
    /// Returns an error if the front-end cannot be reached.
    fn send_update(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask a human whether a denied tool call may run anyway.
    ///
    /// May wait indefinitely; callers race it against their cancellation
    /// token.
    ///
    /// # Errors
    ///
    /// Returns an error if the question could not be delivered or the
    /// pending answer was abandoned.
    fn ask_permission(
        &self,
        prompt: &PermissionPrompt,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;
}
