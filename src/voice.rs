//! Process-wide TTS voice setting, mutated by the `accent` tool and read
//! by every outgoing Polly request.

use std::sync::Arc;
use tokio::sync::RwLock;

pub const DEFAULT_VOICE: &str = "Daniel";

#[derive(Clone)]
pub struct VoiceState {
    inner: Arc<RwLock<String>>,
}

impl VoiceState {
    pub fn new(initial: impl Into<String>) -> Self {
        Self { inner: Arc::new(RwLock::new(initial.into())) }
    }

    pub async fn get(&self) -> String {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, voice: impl Into<String>) {
        *self.inner.write().await = voice.into();
    }
}

impl Default for VoiceState {
    fn default() -> Self {
        Self::new(DEFAULT_VOICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_voice() {
        let state = VoiceState::default();
        assert_eq!(state.get().await, DEFAULT_VOICE);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let state = VoiceState::default();
        state.set("Brian").await;
        assert_eq!(state.get().await, "Brian");
    }
}
