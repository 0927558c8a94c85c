//! Shared fixtures for unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use agent_relay::responder::{PermissionPrompt, Responder};
use agent_relay::Result;

/// Responder that records every call and answers prompts with `approve`.
#[derive(Debug, Default)]
pub struct RecordingResponder {
    pub approve: bool,
    pub posts: Mutex<Vec<String>>,
    pub reactions: Mutex<Vec<String>>,
    pub updates: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<PermissionPrompt>>,
}

impl RecordingResponder {
    pub fn approving() -> Self {
        Self {
            approve: true,
            ..Self::default()
        }
    }

    pub fn rejecting() -> Self {
        Self::default()
    }
}

impl Responder for RecordingResponder {
    fn send_typing(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn post_response(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.posts.lock().unwrap().push(text.to_owned());
        Box::pin(async { Ok(()) })
    }

    fn add_reaction(&self, emoji: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.reactions.lock().unwrap().push(emoji.to_owned());
        Box::pin(async { Ok(()) })
    }

    fn send_update(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.updates.lock().unwrap().push(text.to_owned());
        Box::pin(async { Ok(()) })
    }

    fn ask_permission(
        &self,
        prompt: &PermissionPrompt,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let approve = self.approve;
        Box::pin(async move { Ok(approve) })
    }
}
