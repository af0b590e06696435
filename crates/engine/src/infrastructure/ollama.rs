//! Ollama LLM client (OpenAI-compatible API).
//!
//! One chat client backs all three language-model contracts: narrative
//! generation, summarization, and the best-effort advisor calls. Responses
//! are expected as JSON payloads (optionally fenced); parsing is strict for
//! the primary contracts and lenient for advisory ones.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex_lite::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use taleweaver_domain::{CharacterMention, PacingLevel, StorySegment, JUDGMENT_MAX, JUDGMENT_MIN};

use crate::infrastructure::ports::{
    AdvisorPort, GenerationContext, NarrativeBatch, NarrativeError, NarrativePort,
    NarrativeRequest, SummarizerPort, SummaryOutcome, SummaryRequest,
};

/// Default Ollama base URL.
pub const DEFAULT_LLM_BASE_URL: &str = "http://localhost:11434";

/// Default model.
pub const DEFAULT_LLM_MODEL: &str = "llama3.2";

/// Client for Ollama's OpenAI-compatible API
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        // LLM requests can be slow; allow up to 120 seconds.
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create client from environment variables.
    ///
    /// Uses `LLM_BASE_URL` and `LLM_MODEL`, falling back to defaults.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_LLM_BASE_URL.to_string());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string());
        Self::new(&base_url, &model)
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, NarrativeError> {
        let api_request = OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(0.9),
            max_tokens: None,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&api_request)
            .send()
            .await
            .map_err(|e| NarrativeError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .map_err(|e| NarrativeError::RequestFailed(e.to_string()))?;
            return Err(NarrativeError::RequestFailed(error_text));
        }

        let api_response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| NarrativeError::InvalidResponse(e.to_string()))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| NarrativeError::InvalidResponse("No choices in response".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL)
    }
}

#[async_trait]
impl NarrativePort for OllamaClient {
    async fn generate(&self, request: NarrativeRequest) -> Result<NarrativeBatch, NarrativeError> {
        let content = self
            .chat(NARRATIVE_SYSTEM_PROMPT, &build_narrative_prompt(&request))
            .await?;
        parse_narrative_batch(&content)
    }
}

#[async_trait]
impl SummarizerPort for OllamaClient {
    async fn summarize(&self, request: SummaryRequest) -> Result<SummaryOutcome, NarrativeError> {
        let content = self
            .chat(SUMMARY_SYSTEM_PROMPT, &build_summary_prompt(&request))
            .await?;
        parse_summary(&content)
    }
}

#[async_trait]
impl AdvisorPort for OllamaClient {
    async fn starting_affinities(
        &self,
        protagonist: &str,
        new_characters: &[CharacterMention],
    ) -> Result<HashMap<String, i32>, NarrativeError> {
        let names: Vec<&str> = new_characters.iter().map(|c| c.name.as_str()).collect();
        let descriptions: Vec<String> = new_characters
            .iter()
            .map(|c| format!("- {}: {} {}", c.name, c.personality, c.background))
            .collect();
        let user = format!(
            "Protagonist: {}\nNew characters:\n{}\n\nReturn JSON mapping each of {:?} to an \
             integer affinity between 0 and 100.",
            protagonist,
            descriptions.join("\n"),
            names
        );
        let content = self.chat(AFFINITY_SYSTEM_PROMPT, &user).await?;
        parse_affinities(&content)
    }

    async fn quality_feedback(
        &self,
        recent_text: &str,
        choice_text: &str,
    ) -> Result<String, NarrativeError> {
        let user = format!(
            "Player action: {}\n\nContinuation:\n{}\n\nIn one sentence, what should the next \
             continuation do better?",
            choice_text, recent_text
        );
        let content = self.chat(QUALITY_SYSTEM_PROMPT, &user).await?;
        let line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        if line.trim().is_empty() {
            return Err(NarrativeError::InvalidResponse(
                "Empty quality feedback".to_string(),
            ));
        }
        Ok(line.trim().to_string())
    }

    async fn story_title(&self, premise: &str, opening: &str) -> Result<String, NarrativeError> {
        let user = format!(
            "Premise: {}\n\nOpening:\n{}\n\nReply with only the title.",
            premise, opening
        );
        let content = self.chat(TITLE_SYSTEM_PROMPT, &user).await?;
        let title = content.trim().trim_matches('"').trim();
        if title.is_empty() {
            return Err(NarrativeError::InvalidResponse("Empty title".to_string()));
        }
        Ok(title.to_string())
    }
}

// =============================================================================
// Prompts
// =============================================================================

const NARRATIVE_SYSTEM_PROMPT: &str = "You are the narrator of an interactive fiction session. \
Respond with a single JSON object: {\"segments\": [...], \"newCharacters\": [...], \"pacing\": \
\"slow|steady|brisk|climactic\"}. Each segment is one of {\"type\": \"narration\", \"text\": ...}, \
{\"type\": \"dialogue\", \"character\": ..., \"text\": ...}, or {\"type\": \"choice\", \"text\": \
..., \"choices\": [...], \"judgmentValues\": [1-8 or null per choice]}. Produce 5-10 segments and \
end with a choice. Each new character needs name, gender, personality, background; hiddenName, \
knownToPlayer and appearance are optional.";

const SUMMARY_SYSTEM_PROMPT: &str = "You compress interactive fiction history. Respond with a \
single JSON object: {\"summary\": ..., \"title\": ..., \"involvedCharacters\": [names]}. The \
summary must preserve plot-critical facts and relationship states.";

const AFFINITY_SYSTEM_PROMPT: &str = "You rate how a story's protagonist initially feels about \
newly introduced characters. Respond with a single JSON object mapping character name to an \
integer 0-100.";

const QUALITY_SYSTEM_PROMPT: &str =
    "You are an editor reviewing interactive fiction continuations. Be terse and concrete.";

const TITLE_SYSTEM_PROMPT: &str = "You title interactive fiction stories. Short, evocative, no \
punctuation beyond what the title itself needs.";

fn build_narrative_prompt(request: &NarrativeRequest) -> String {
    let mut prompt = format!(
        "Title: {}\nGenre: {}\nPremise: {}\nProtagonist: {}\nDifficulty: {:?}\nPacing: {:?}\n",
        request.title,
        request.genre,
        request.premise,
        request.protagonist,
        request.difficulty,
        request.pacing,
    );

    if !request.cards.is_empty() {
        prompt.push_str("\nKnown characters:\n");
        for card in &request.cards {
            prompt.push_str(&format!(
                "- {} (alias: {}, revealed: {}, affinity: {}): {} | {} | {}\n",
                card.name,
                if card.hidden_name.is_empty() { "-" } else { &card.hidden_name },
                card.is_name_revealed,
                card.affinity(),
                card.gender,
                card.personality,
                card.background,
            ));
        }
    }

    if !request.quality_feedback.is_empty() {
        prompt.push_str("\nRecent editorial feedback:\n");
        for feedback in &request.quality_feedback {
            prompt.push_str(&format!("- {}\n", feedback));
        }
    }

    match &request.context {
        GenerationContext::Opening => {
            prompt.push_str("\nWrite the opening batch of the story.\n");
        }
        GenerationContext::Continuation {
            condensed_history,
            choice_text,
        } => {
            prompt.push_str(&format!(
                "\nStory so far:\n{}\n\nThe player chose: {}\n\nContinue the story.\n",
                condensed_history, choice_text
            ));
        }
    }

    prompt
}

fn build_summary_prompt(request: &SummaryRequest) -> String {
    let mut prompt = String::new();
    if !request.recent_titles.is_empty() {
        prompt.push_str("Earlier chapters (newest first):\n");
        for title in &request.recent_titles {
            prompt.push_str(&format!("- {}\n", title));
        }
        prompt.push('\n');
    }
    prompt.push_str("History to compress:\n");
    prompt.push_str(&request.history_text);
    prompt
}

// =============================================================================
// Response parsing
// =============================================================================

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("valid regex"));

/// Pull the JSON payload out of a model reply: prefer a fenced block, fall
/// back to the outermost brace pair.
fn extract_json(raw: &str) -> Option<&str> {
    if let Some(caps) = JSON_FENCE_RE.captures(raw) {
        if let Some(inner) = caps.get(1) {
            let inner = inner.as_str().trim();
            if !inner.is_empty() {
                return Some(inner);
            }
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBatch {
    segments: Vec<WireSegment>,
    #[serde(default)]
    new_characters: Vec<WireCharacter>,
    #[serde(default)]
    pacing: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSegment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    character: Option<String>,
    #[serde(default)]
    choices: Option<Vec<String>>,
    #[serde(default)]
    judgment_values: Option<Vec<Option<i64>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCharacter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hidden_name: Option<String>,
    #[serde(default)]
    known_to_player: Option<bool>,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    personality: Option<String>,
    #[serde(default)]
    background: Option<String>,
    #[serde(default)]
    appearance: Option<String>,
}

pub(crate) fn parse_narrative_batch(raw: &str) -> Result<NarrativeBatch, NarrativeError> {
    let json = extract_json(raw)
        .ok_or_else(|| NarrativeError::InvalidResponse("No JSON object in reply".to_string()))?;
    let wire: WireBatch = serde_json::from_str(json)
        .map_err(|e| NarrativeError::InvalidResponse(e.to_string()))?;

    if wire.segments.is_empty() {
        return Err(NarrativeError::InvalidResponse(
            "Generator returned no segments".to_string(),
        ));
    }

    let mut segments = Vec::with_capacity(wire.segments.len());
    for (index, seg) in wire.segments.into_iter().enumerate() {
        segments.push(convert_segment(index, seg)?);
    }

    let new_characters = wire
        .new_characters
        .into_iter()
        .filter_map(normalize_character)
        .collect();

    let pacing = wire
        .pacing
        .as_deref()
        .map(parse_pacing)
        .unwrap_or_default();

    let generated_chars = segments.iter().map(StorySegment::char_len).sum();

    Ok(NarrativeBatch {
        segments,
        new_characters,
        pacing,
        generated_chars,
    })
}

fn convert_segment(index: usize, seg: WireSegment) -> Result<StorySegment, NarrativeError> {
    match seg.kind.as_str() {
        "narration" => {
            let text = seg.text.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
                NarrativeError::InvalidResponse(format!("Segment {}: narration without text", index))
            })?;
            Ok(StorySegment::Narration { text })
        }
        "dialogue" => {
            let character = seg
                .character
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| {
                    NarrativeError::InvalidResponse(format!(
                        "Segment {}: dialogue without character",
                        index
                    ))
                })?;
            let text = seg.text.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
                NarrativeError::InvalidResponse(format!("Segment {}: dialogue without text", index))
            })?;
            Ok(StorySegment::Dialogue { character, text })
        }
        "choice" => {
            let text = seg.text.unwrap_or_default();
            let choices = seg.choices.unwrap_or_default();
            if text.trim().is_empty() && choices.is_empty() {
                return Err(NarrativeError::InvalidResponse(format!(
                    "Segment {}: choice with neither text nor options",
                    index
                )));
            }
            let mut judgment_values = match seg.judgment_values {
                None => vec![None; choices.len()],
                Some(values) => {
                    let mut converted = Vec::with_capacity(values.len());
                    for value in values {
                        converted.push(match value {
                            None => None,
                            Some(v) if (JUDGMENT_MIN as i64..=JUDGMENT_MAX as i64).contains(&v) => {
                                Some(v as u8)
                            }
                            Some(v) => {
                                return Err(NarrativeError::InvalidResponse(format!(
                                    "Segment {}: judgment value {} outside [{}, {}]",
                                    index, v, JUDGMENT_MIN, JUDGMENT_MAX
                                )))
                            }
                        });
                    }
                    converted
                }
            };
            judgment_values.resize(choices.len(), None);
            Ok(StorySegment::Choice {
                text,
                choices,
                judgment_values,
                dice_result: None,
            })
        }
        other => Err(NarrativeError::InvalidResponse(format!(
            "Segment {}: unknown type '{}'",
            index, other
        ))),
    }
}

/// Required-field normalization for incoming characters: a nameless mention
/// is dropped with a log line; every other field is defaulted when absent.
fn normalize_character(wire: WireCharacter) -> Option<CharacterMention> {
    let name = wire.name.filter(|n| !n.trim().is_empty());
    let Some(name) = name else {
        tracing::warn!("Dropping character mention without a name");
        return None;
    };
    let defaulted = wire.gender.is_none() || wire.personality.is_none() || wire.background.is_none();
    if defaulted {
        tracing::debug!(character = %name, "Defaulting missing character fields");
    }
    Some(CharacterMention {
        name: name.trim().to_string(),
        hidden_name: wire.hidden_name.unwrap_or_default(),
        known_to_player: wire.known_to_player.unwrap_or(false),
        gender: wire.gender.unwrap_or_default(),
        personality: wire.personality.unwrap_or_default(),
        background: wire.background.unwrap_or_default(),
        appearance: wire.appearance.unwrap_or_default(),
    })
}

fn parse_pacing(raw: &str) -> PacingLevel {
    match raw.trim().to_lowercase().as_str() {
        "slow" => PacingLevel::Slow,
        "steady" => PacingLevel::Steady,
        "brisk" => PacingLevel::Brisk,
        "climactic" => PacingLevel::Climactic,
        other => {
            tracing::debug!(pacing = other, "Unknown pacing level, defaulting");
            PacingLevel::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSummary {
    summary: Option<String>,
    title: Option<String>,
    #[serde(default)]
    involved_characters: Vec<String>,
}

pub(crate) fn parse_summary(raw: &str) -> Result<SummaryOutcome, NarrativeError> {
    let json = extract_json(raw)
        .ok_or_else(|| NarrativeError::InvalidResponse("No JSON object in reply".to_string()))?;
    let wire: WireSummary = serde_json::from_str(json)
        .map_err(|e| NarrativeError::InvalidResponse(e.to_string()))?;
    let summary = wire
        .summary
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| NarrativeError::InvalidResponse("Summary missing".to_string()))?;
    let title = wire
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| NarrativeError::InvalidResponse("Summary title missing".to_string()))?;
    Ok(SummaryOutcome {
        summary,
        title,
        involved_characters: wire.involved_characters,
    })
}

/// Lenient by contract: entries that are not integers are ignored.
pub(crate) fn parse_affinities(raw: &str) -> Result<HashMap<String, i32>, NarrativeError> {
    let json = extract_json(raw)
        .ok_or_else(|| NarrativeError::InvalidResponse("No JSON object in reply".to_string()))?;
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| NarrativeError::InvalidResponse(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| NarrativeError::InvalidResponse("Expected a JSON object".to_string()))?;

    // Accept either a flat map or one nested under "affinities".
    let map = match object.get("affinities").and_then(|v| v.as_object()) {
        Some(nested) => nested,
        None => object,
    };

    let mut affinities = HashMap::new();
    for (name, value) in map {
        if let Some(v) = value.as_i64() {
            affinities.insert(name.clone(), v as i32);
        }
    }
    Ok(affinities)
}

// =============================================================================
// OpenAI API types
// =============================================================================

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIChoiceMessage,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIChoiceMessage {
    content: Option<String>,
}
