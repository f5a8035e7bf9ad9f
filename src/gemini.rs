use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config;
use crate::session::{GroundingSource, Role};

/// Failure phrase the backend uses when the configured credential has no
/// access to the requested model.
const ENTITY_NOT_FOUND: &str = "Requested entity was not found";

const SYSTEM_INSTRUCTION: &str = "You are ChatHDI, a state-of-the-art AI search engine. \
Your mission is to provide information that is accurate, comprehensive, and perfectly formatted.\n\
\n\
Markdown & Formatting Rules:\n\
- Organize complex information into Markdown tables whenever possible (e.g., comparisons, lists of data, specs).\n\
- Use clean headings (## and ###) for logical structure.\n\
- DO NOT display raw markdown symbols like '###' or '**' in the final output; ensure the text flows naturally within the markdown structure.\n\
- Avoid excessive bolding. Use bold text sparingly for critical keywords only.\n\
- Use bullet points for readability.\n\
- For every factual claim, try to provide a citation or reference if search results allow.\n\
- If search grounding is used, ensure the output text contains natural links [Source Title](URL) if relevant.\n\
\n\
Hydrogen Focus:\n\
- If the query is about Hydrogen technology, provide high-level technical details and use industry-standard terminology.";

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Credential/entitlement failure; the credential hook has already been
    /// prompted by the time this reaches the caller.
    #[error("requested model or entity not found: {0}")]
    EntityNotFound(String),
    #[error("backend returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("video generation exceeded the poll budget of {0} cycles")]
    PollBudgetExhausted(u32),
    #[error("video generation was cancelled")]
    Cancelled,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not persist generated media: {0}")]
    Media(#[from] std::io::Error),
}

/// Host-provided credential selection capability. Injected at gateway
/// construction; environments without one use [`NoopCredentialHook`].
#[async_trait]
pub trait CredentialHook: Send + Sync {
    async fn has_credential(&self) -> bool;
    async fn prompt_select(&self);
}

pub struct NoopCredentialHook;

#[async_trait]
impl CredentialHook for NoopCredentialHook {
    async fn has_credential(&self) -> bool {
        true
    }

    async fn prompt_select(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageQuality {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoDuration {
    #[serde(rename = "4s")]
    FourSeconds,
    #[serde(rename = "10s")]
    TenSeconds,
}

impl VideoDuration {
    pub fn seconds(self) -> u32 {
        match self {
            Self::FourSeconds => 4,
            Self::TenSeconds => 10,
        }
    }
}

/// One prior conversation turn, as the gateway sees it. No vendor wire
/// types leak past this boundary.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub sources: Vec<GroundingSource>,
    pub search_entry_point: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideOutline {
    pub title: String,
    pub content: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub image_model_low: String,
    pub image_model_high: String,
    pub video_model: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub media_dir: PathBuf,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: config::GEMINI_API_BASE.clone(),
            api_key: config::GEMINI_API_KEY.clone(),
            chat_model: config::CHAT_MODEL.clone(),
            image_model_low: config::IMAGE_MODEL_LOW.clone(),
            image_model_high: config::IMAGE_MODEL_HIGH.clone(),
            video_model: config::VIDEO_MODEL.clone(),
            poll_interval: config::DEFAULT_POLL_INTERVAL,
            max_polls: config::DEFAULT_MAX_POLLS,
            media_dir: config::media_dir(),
        }
    }
}

/// Thin adapter over the Gemini REST API: chat with search grounding, image
/// synthesis, long-running video synthesis, and schema-constrained slide
/// outlines. Performs no retries; callers own retry policy.
pub struct GeminiClient {
    http: reqwest::Client,
    config: GatewayConfig,
    hook: Arc<dyn CredentialHook>,
}

impl GeminiClient {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_hook(config, Arc::new(NoopCredentialHook))
    }

    pub fn with_hook(config: GatewayConfig, hook: Arc<dyn CredentialHook>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            hook,
        }
    }

    /// Send the conversation plus the new user turn, with search grounding
    /// requested. System-kind turns are local notices and never forwarded.
    pub async fn chat_completion(
        &self,
        history: &[ChatTurn],
        last_message: &str,
    ) -> Result<ChatReply, GatewayError> {
        let mut contents: Vec<serde_json::Value> = history
            .iter()
            .filter_map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                    Role::System => return None,
                };
                Some(json!({ "role": role, "parts": [{ "text": turn.content }] }))
            })
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": last_message }] }));

        let body = json!({
            "contents": contents,
            "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "tools": [{ "googleSearch": {} }],
        });

        let response: GenerateContentResponse =
            self.generate_content(&self.config.chat_model, body).await?;

        let text = response.text();
        let metadata = response
            .candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref());
        let sources = metadata
            .map(|m| extract_sources(&m.grounding_chunks))
            .unwrap_or_default();
        let search_entry_point = metadata
            .and_then(|m| m.search_entry_point.as_ref())
            .and_then(|ep| ep.rendered_content.clone());

        debug!(
            "Chat completion returned {} chars, {} sources",
            text.len(),
            sources.len()
        );
        Ok(ChatReply {
            text,
            sources,
            search_entry_point,
        })
    }

    /// Generate an image and return it as a data URI. `Ok(None)` means the
    /// backend produced no inline image part, which is not an error.
    pub async fn generate_image(
        &self,
        prompt: &str,
        quality: ImageQuality,
    ) -> Result<Option<String>, GatewayError> {
        let model = match quality {
            ImageQuality::Low => &self.config.image_model_low,
            ImageQuality::High => {
                // The pro image model needs an entitled credential; prompt
                // up front rather than failing mid-generation.
                self.ensure_credential().await;
                &self.config.image_model_high
            }
        };

        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let response: GenerateContentResponse = self.generate_content(model, body).await?;
        Ok(first_inline_image(&response))
    }

    /// Submit a video generation job and block on it by polling, honoring
    /// `cancel` between cycles and the configured poll budget. Returns the
    /// local URL of the downloaded video, or `Ok(None)` when the finished
    /// operation carries no sample.
    pub async fn generate_video(
        &self,
        prompt: &str,
        duration: VideoDuration,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, GatewayError> {
        self.ensure_credential().await;

        let url = format!(
            "{}/v1beta/models/{}:predictLongRunning?key={}",
            self.config.base_url, self.config.video_model, self.config.api_key
        );
        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "numberOfVideos": 1,
                "resolution": "720p",
                "aspectRatio": "16:9",
                "durationSeconds": duration.seconds(),
            },
        });
        let submitted = self.http.post(&url).json(&body).send().await?;
        let mut operation: VideoOperation = self.decode(submitted).await?;
        info!("Submitted video job {}", operation.name);

        let mut polls = 0u32;
        while !operation.done {
            if polls >= self.config.max_polls {
                return Err(GatewayError::PollBudgetExhausted(self.config.max_polls));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            polls += 1;
            operation = self.get_operation(&operation.name).await?;
            debug!("Poll {} of job {}: done={}", polls, operation.name, operation.done);
        }

        let Some(remote_uri) = operation.first_video_uri() else {
            warn!("Video job {} finished without a sample", operation.name);
            return Ok(None);
        };
        self.download_video(&remote_uri).await.map(Some)
    }

    /// Request a strictly-typed outline of exactly `slide_count` slides.
    /// Empty or unparsable output degrades to an empty outline.
    pub async fn generate_slide_outline(
        &self,
        topic: &str,
        slide_count: u32,
    ) -> Result<Vec<SlideOutline>, GatewayError> {
        let prompt = format!(
            "Generate a detailed presentation outline for the topic: \"{topic}\". \
             Include exactly {slide_count} slides. \
             For each slide, provide a Title and 3-4 bullet points."
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "title": { "type": "STRING" },
                            "content": { "type": "ARRAY", "items": { "type": "STRING" } },
                        },
                        "required": ["title", "content"],
                    },
                },
            },
        });

        let response: GenerateContentResponse =
            self.generate_content(&self.config.chat_model, body).await?;
        Ok(parse_outline(&response.text()))
    }

    async fn generate_content<T: serde::de::DeserializeOwned>(
        &self,
        model: &str,
        body: serde_json::Value,
    ) -> Result<T, GatewayError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.base_url, model, self.config.api_key
        );
        let response = self.http.post(&url).json(&body).send().await?;
        self.decode(response).await
    }

    async fn get_operation(&self, name: &str) -> Result<VideoOperation, GatewayError> {
        let url = format!(
            "{}/v1beta/{}?key={}",
            self.config.base_url, name, self.config.api_key
        );
        let response = self.http.get(&url).send().await?;
        self.decode(response).await
    }

    async fn download_video(&self, remote_uri: &str) -> Result<String, GatewayError> {
        let url = signed_download_url(remote_uri, &self.config.api_key);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify_failure(status.as_u16(), body).await);
        }
        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(&self.config.media_dir).await?;
        let file_name = format!("{}.mp4", Uuid::new_v4());
        let path = self.config.media_dir.join(&file_name);
        tokio::fs::write(&path, &bytes).await?;
        info!("Stored generated video at {}", path.display());
        Ok(format!("/media/{file_name}"))
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify_failure(status.as_u16(), body).await);
        }
        Ok(response.json::<T>().await?)
    }

    /// Classify a non-success backend reply. Entitlement failures trigger
    /// the credential re-selection hook before the error propagates; the
    /// gateway itself never retries.
    async fn classify_failure(&self, status: u16, body: String) -> GatewayError {
        if body.contains(ENTITY_NOT_FOUND) {
            warn!("Backend reported missing entity; prompting credential selection");
            self.hook.prompt_select().await;
            GatewayError::EntityNotFound(body)
        } else {
            GatewayError::Api { status, body }
        }
    }

    async fn ensure_credential(&self) {
        if !self.hook.has_credential().await {
            self.hook.prompt_select().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types (responses only; requests are built with `json!`).

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
    search_entry_point: Option<SearchEntryPoint>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<ChunkRef>,
    maps: Option<ChunkRef>,
}

#[derive(Debug, Deserialize)]
struct ChunkRef {
    title: Option<String>,
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchEntryPoint {
    rendered_content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoOperation {
    name: String,
    #[serde(default)]
    done: bool,
    response: Option<VideoOperationResponse>,
}

impl VideoOperation {
    fn first_video_uri(&self) -> Option<String> {
        self.response
            .as_ref()?
            .generate_video_response
            .as_ref()?
            .generated_samples
            .iter()
            .find_map(|sample| sample.video.as_ref()?.uri.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoOperationResponse {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default, alias = "generatedVideos")]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: Option<VideoRef>,
}

#[derive(Debug, Deserialize)]
struct VideoRef {
    uri: Option<String>,
}

// ---------------------------------------------------------------------------
// Response shaping helpers.

/// Normalize grounding chunks into citation sources: web and map-place
/// variants map to {title, uri} with fallback titles, entries without a uri
/// are dropped, and duplicates (by uri) keep their first, most relevant
/// position.
fn extract_sources(chunks: &[GroundingChunk]) -> Vec<GroundingSource> {
    let mut sources: Vec<GroundingSource> = Vec::new();
    for chunk in chunks {
        let source = if let Some(web) = &chunk.web {
            web.uri.as_ref().map(|uri| GroundingSource {
                title: web
                    .title
                    .clone()
                    .unwrap_or_else(|| "Website Source".to_string()),
                uri: uri.clone(),
            })
        } else if let Some(maps) = &chunk.maps {
            maps.uri.as_ref().map(|uri| GroundingSource {
                title: maps
                    .title
                    .clone()
                    .unwrap_or_else(|| "Google Maps Place".to_string()),
                uri: uri.clone(),
            })
        } else {
            None
        };
        if let Some(source) = source {
            if !sources.iter().any(|s| s.uri == source.uri) {
                sources.push(source);
            }
        }
    }
    sources
}

fn first_inline_image(response: &GenerateContentResponse) -> Option<String> {
    response
        .candidates
        .first()?
        .content
        .as_ref()?
        .parts
        .iter()
        .find_map(|part| {
            part.inline_data
                .as_ref()
                .map(|inline| format!("data:{};base64,{}", inline.mime_type, inline.data))
        })
}

fn parse_outline(text: &str) -> Vec<SlideOutline> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str(text) {
        Ok(outline) => outline,
        Err(e) => {
            warn!("Discarding unparsable slide outline: {}", e);
            Vec::new()
        }
    }
}

fn signed_download_url(uri: &str, api_key: &str) -> String {
    if uri.contains('?') {
        format!("{uri}&key={api_key}")
    } else {
        format!("{uri}?key={api_key}")
    }
}
