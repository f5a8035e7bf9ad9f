use std::collections::HashSet;
use std::sync::Mutex as StdMutex;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::gemini::{
    ChatTurn, GatewayError, GeminiClient, ImageQuality, SlideOutline, VideoDuration,
};
use crate::session::{ChatSession, MediaKind, Message, Theme};
use crate::store::SessionStore;

/// UI-facing state change, broadcast to connected WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    SessionUpdated { session_id: Uuid },
    Typing { session_id: Uuid, active: bool },
    HistoryCleared,
}

#[derive(Debug, Error)]
pub enum TurnError {
    /// At most one turn may be in flight per session; a second submit is
    /// rejected rather than queued.
    #[error("a reply is already being generated for this session")]
    Busy,
}

/// Owns the chat turn lifecycle: optimistic user append, gateway call,
/// assistant (or failure notice) append, and the per-session busy flag.
pub struct ChatOrchestrator {
    store: Mutex<SessionStore>,
    gateway: GeminiClient,
    in_flight: StdMutex<HashSet<Uuid>>,
    events: broadcast::Sender<UiEvent>,
}

impl ChatOrchestrator {
    pub fn new(store: SessionStore, gateway: GeminiClient) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store: Mutex::new(store),
            gateway,
            in_flight: StdMutex::new(HashSet::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    pub async fn sessions(&self) -> Vec<ChatSession> {
        self.store.lock().await.sessions().to_vec()
    }

    pub async fn active(&self) -> Option<Uuid> {
        self.store.lock().await.active()
    }

    pub async fn active_session(&self) -> Option<ChatSession> {
        self.store.lock().await.active_session().cloned()
    }

    pub async fn set_active(&self, id: Uuid) -> bool {
        self.store.lock().await.set_active(id)
    }

    pub async fn create_session(&self) -> Uuid {
        let id = self.store.lock().await.create_session();
        self.emit(UiEvent::SessionUpdated { session_id: id });
        id
    }

    pub async fn clear_all(&self) {
        self.store.lock().await.clear_all();
        self.emit(UiEvent::HistoryCleared);
    }

    pub async fn theme(&self) -> Theme {
        self.store.lock().await.theme()
    }

    pub async fn set_theme(&self, theme: Theme) {
        self.store.lock().await.set_theme(theme);
    }

    pub fn is_busy(&self, session_id: Uuid) -> bool {
        self.in_flight.lock().unwrap().contains(&session_id)
    }

    /// Run one chat turn. The target session is the given one, else the
    /// active one, else a freshly created one. The user message is appended
    /// before the network call; on failure a system notice is appended
    /// instead of an assistant reply, so the error is visible in the
    /// conversation. Returns the session id the turn ran against.
    pub async fn send_message(
        &self,
        session_id: Option<Uuid>,
        text: &str,
    ) -> Result<Uuid, TurnError> {
        let (id, history, turn) = {
            let mut store = self.store.lock().await;
            let id = match session_id.or_else(|| store.active()) {
                Some(id) if store.session(id).is_some() => {
                    store.set_active(id);
                    id
                }
                _ => store.create_session(),
            };
            // Reserve the in-flight slot while the store lock is still
            // held and before the optimistic append, so a rejected turn
            // leaves no orphaned user message behind.
            let turn = TurnGuard::begin(self, id)?;
            let history: Vec<ChatTurn> = store
                .session(id)
                .map(|s| {
                    s.messages
                        .iter()
                        .map(|m| ChatTurn {
                            role: m.role,
                            content: m.content.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            store.append_message(id, Message::user(text));
            (id, history, turn)
        };
        self.emit(UiEvent::SessionUpdated { session_id: id });

        // The guard clears the busy flag and the typing indicator on every
        // exit path, so the composer can never stay disabled.
        let _turn = turn;
        self.emit(UiEvent::Typing {
            session_id: id,
            active: true,
        });

        match self.gateway.chat_completion(&history, text).await {
            Ok(reply) => {
                let content = if reply.text.is_empty() {
                    "The model returned an empty reply.".to_string()
                } else {
                    reply.text
                };
                self.store.lock().await.append_message(
                    id,
                    Message::assistant(content, reply.sources, reply.search_entry_point),
                );
            }
            Err(e) => {
                error!("Chat turn failed for session {}: {}", id, e);
                self.store
                    .lock()
                    .await
                    .append_message(id, Message::system(failure_notice(&e)));
            }
        }
        self.emit(UiEvent::SessionUpdated { session_id: id });
        Ok(id)
    }

    /// Append an assistant-authored message carrying a generated media
    /// reference, creating a session first if none is active.
    pub async fn add_media_message(
        &self,
        kind: MediaKind,
        content: &str,
        media_url: Option<String>,
    ) -> Uuid {
        let id = {
            let mut store = self.store.lock().await;
            let id = match store.active() {
                Some(id) => id,
                None => store.create_session(),
            };
            store.append_message(id, Message::media(kind, content, media_url));
            id
        };
        self.emit(UiEvent::SessionUpdated { session_id: id });
        id
    }

    /// Generate an image and attach it to the conversation. `Ok(false)`
    /// means the backend produced no media; nothing is appended then.
    pub async fn create_image_message(
        &self,
        prompt: &str,
        quality: ImageQuality,
    ) -> Result<bool, GatewayError> {
        match self.gateway.generate_image(prompt, quality).await? {
            Some(data_uri) => {
                self.add_media_message(
                    MediaKind::Image,
                    &format!("Generated image: {prompt}"),
                    Some(data_uri),
                )
                .await;
                Ok(true)
            }
            None => {
                info!("Image generation produced no media for prompt: {}", prompt);
                Ok(false)
            }
        }
    }

    pub async fn create_video_message(
        &self,
        prompt: &str,
        duration: VideoDuration,
        cancel: &CancellationToken,
    ) -> Result<bool, GatewayError> {
        match self.gateway.generate_video(prompt, duration, cancel).await? {
            Some(url) => {
                self.add_media_message(
                    MediaKind::Video,
                    &format!("Generated video: {prompt}"),
                    Some(url),
                )
                .await;
                Ok(true)
            }
            None => {
                info!("Video generation produced no media for prompt: {}", prompt);
                Ok(false)
            }
        }
    }

    pub async fn create_slides_message(
        &self,
        topic: &str,
        slide_count: u32,
    ) -> Result<bool, GatewayError> {
        let outline = self
            .gateway
            .generate_slide_outline(topic, slide_count)
            .await?;
        if outline.is_empty() {
            info!("Slide outline came back empty for topic: {}", topic);
            return Ok(false);
        }
        self.add_media_message(MediaKind::Pptx, &outline_markdown(topic, &outline), None)
            .await;
        Ok(true)
    }

    fn emit(&self, event: UiEvent) {
        // No receivers is fine; the UI may not be connected.
        let _ = self.events.send(event);
    }
}

struct TurnGuard<'a> {
    orchestrator: &'a ChatOrchestrator,
    session_id: Uuid,
}

impl<'a> TurnGuard<'a> {
    fn begin(orchestrator: &'a ChatOrchestrator, session_id: Uuid) -> Result<Self, TurnError> {
        if !orchestrator.in_flight.lock().unwrap().insert(session_id) {
            return Err(TurnError::Busy);
        }
        Ok(Self {
            orchestrator,
            session_id,
        })
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator
            .in_flight
            .lock()
            .unwrap()
            .remove(&self.session_id);
        self.orchestrator.emit(UiEvent::Typing {
            session_id: self.session_id,
            active: false,
        });
    }
}

fn failure_notice(error: &GatewayError) -> String {
    match error {
        GatewayError::EntityNotFound(_) => {
            "The selected API credential has no access to the chat model. \
             Pick a different key and send your message again."
                .to_string()
        }
        _ => "The reply could not be generated. Check the server logs and try again.".to_string(),
    }
}

/// Render a slide outline as Markdown for the conversation body.
fn outline_markdown(topic: &str, outline: &[SlideOutline]) -> String {
    let mut out = format!("# {topic}\n");
    for (i, slide) in outline.iter().enumerate() {
        out.push_str(&format!("\n## {}. {}\n", i + 1, slide.title));
        for bullet in &slide.content {
            out.push_str(&format!("- {bullet}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outline_renders_numbered_slides_with_bullets() {
        let outline = vec![
            SlideOutline {
                title: "Why Hydrogen".to_string(),
                content: vec!["Dense fuel".to_string(), "Zero carbon at point of use".to_string()],
            },
            SlideOutline {
                title: "Challenges".to_string(),
                content: vec!["Storage".to_string()],
            },
        ];
        let md = outline_markdown("Hydrogen Economy", &outline);
        assert!(md.starts_with("# Hydrogen Economy\n"));
        assert!(md.contains("## 1. Why Hydrogen"));
        assert!(md.contains("- Dense fuel"));
        assert!(md.contains("## 2. Challenges"));
    }

    #[test]
    fn entity_not_found_notice_mentions_the_credential() {
        let notice = failure_notice(&GatewayError::EntityNotFound("404".to_string()));
        assert!(notice.contains("credential"));
        let generic = failure_notice(&GatewayError::Api {
            status: 500,
            body: "boom".to_string(),
        });
        assert!(generic.contains("could not be generated"));
    }
}
