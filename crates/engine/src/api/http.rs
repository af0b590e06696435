//! HTTP routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use taleweaver_domain::{CardId, DiceResult, Difficulty, Story, StoryId, StorySetup};

use crate::app::App;
use crate::use_cases::{GenerationError, GenerationReport, ImageTaskError, QueueSnapshot};

/// Create all HTTP routes.
pub fn routes() -> Router<Arc<App>> {
    Router::new()
        .route("/", get(health))
        .route("/api/health", get(health))
        .route("/api/stories", post(create_story))
        .route("/api/stories/{id}", get(get_story))
        .route("/api/stories/{id}/start", post(start_generation))
        .route("/api/stories/{id}/choice", post(submit_choice))
        .route("/api/stories/{id}/cancel", post(cancel_generation))
        .route("/api/stories/{id}/images/scene", post(manual_scene_image))
        .route("/api/stories/{id}/cards", get(list_cards))
        .route(
            "/api/stories/{id}/cards/{card_id}",
            axum::routing::delete(remove_card),
        )
        .route(
            "/api/stories/{id}/cards/{card_id}/portrait",
            post(manual_portrait),
        )
        .route("/api/queues", get(queue_snapshot))
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateStoryRequest {
    #[serde(default)]
    title: String,
    premise: String,
    genre: String,
    protagonist: String,
    #[serde(default)]
    difficulty: Option<String>,
}

async fn create_story(
    State(app): State<Arc<App>>,
    Json(request): Json<CreateStoryRequest>,
) -> Result<Json<Story>, ApiError> {
    let difficulty = match request.difficulty.as_deref() {
        Some(raw) => raw
            .parse::<Difficulty>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => Difficulty::Normal,
    };
    let story = Story::new(
        StorySetup {
            title: request.title,
            premise: request.premise,
            genre: request.genre,
            protagonist: request.protagonist,
        },
        difficulty,
        app.clock.now(),
    );
    let story_id = story.id;
    app.store
        .put(&story)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    app.use_cases.generation.start.execute(story_id).await?;

    let story = app
        .store
        .get(story_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(story))
}

async fn get_story(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Story>, ApiError> {
    let story = app
        .store
        .get(StoryId::from_uuid(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(story))
}

/// Explicit re-submission path for a story whose opening generation failed.
async fn start_generation(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChoiceResponse>, ApiError> {
    let report = app
        .use_cases
        .generation
        .start
        .execute(StoryId::from_uuid(id))
        .await?;
    Ok(Json(report.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChoiceRequest {
    text: String,
    #[serde(default)]
    preset_index: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChoiceResponse {
    story_id: StoryId,
    appended_segments: usize,
    new_cards: Vec<CardId>,
    dice: Option<DiceResult>,
    affinity_toast: Option<String>,
}

impl From<GenerationReport> for ChoiceResponse {
    fn from(report: GenerationReport) -> Self {
        Self {
            story_id: report.story_id,
            appended_segments: report.appended_segments,
            new_cards: report.new_cards,
            dice: report.dice,
            affinity_toast: report.affinity_toast,
        }
    }
}

async fn submit_choice(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChoiceRequest>,
) -> Result<Json<ChoiceResponse>, ApiError> {
    let report = app
        .use_cases
        .generation
        .submit
        .execute(StoryId::from_uuid(id), request.text, request.preset_index)
        .await?;
    Ok(Json(report.into()))
}

async fn cancel_generation(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> Json<serde_json::Value> {
    let cancelled = app
        .use_cases
        .generation
        .cancel
        .execute(StoryId::from_uuid(id));
    Json(serde_json::json!({ "cancelled": cancelled }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SceneImageRequest {
    #[serde(default)]
    prompt: Option<String>,
}

async fn manual_scene_image(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
    request: Option<Json<SceneImageRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let prompt = request.and_then(|Json(r)| r.prompt);
    let uri = app
        .use_cases
        .manual_scene
        .execute(StoryId::from_uuid(id), prompt)
        .await?;
    Ok(Json(serde_json::json!({ "uri": uri })))
}

async fn manual_portrait(
    State(app): State<Arc<App>>,
    Path((id, card_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let uri = app
        .use_cases
        .manual_portrait
        .execute(StoryId::from_uuid(id), CardId::from_uuid(card_id))
        .await?;
    Ok(Json(serde_json::json!({ "uri": uri })))
}

/// Player-facing card view: the alias until the reveal, descriptive text
/// disclosed in steps as affinity grows.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CardView {
    id: CardId,
    name: String,
    is_name_revealed: bool,
    gender: String,
    personality: String,
    background: String,
    appearance: String,
    portrait_uri: Option<String>,
    affinity: i32,
}

async fn list_cards(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CardView>>, ApiError> {
    let story = app
        .store
        .get(StoryId::from_uuid(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;
    let cards = story
        .cards()
        .iter()
        .map(|card| CardView {
            id: card.id,
            name: card.display_name().to_string(),
            is_name_revealed: card.is_name_revealed,
            gender: card.gender.clone(),
            personality: taleweaver_domain::disclose(&card.personality, card.affinity())
                .to_string(),
            background: taleweaver_domain::disclose(&card.background, card.affinity()).to_string(),
            appearance: card.appearance.clone(),
            portrait_uri: card.portrait_uri.clone(),
            affinity: card.affinity(),
        })
        .collect();
    Ok(Json(cards))
}

/// Explicit external removal; the engine itself never deletes cards.
async fn remove_card(
    State(app): State<Arc<App>>,
    Path((id, card_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let story_id = StoryId::from_uuid(id);
    let mut story = app
        .store
        .get(story_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;
    story
        .remove_card(CardId::from_uuid(card_id))
        .ok_or(ApiError::NotFound)?;
    app.store
        .put(&story)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn queue_snapshot(State(app): State<Arc<App>>) -> Json<QueueSnapshot> {
    Json(app.queues.snapshot())
}

// =============================================================================
// Error mapping
// =============================================================================

#[derive(Debug)]
enum ApiError {
    NotFound,
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::StoryNotFound => Self::NotFound,
            GenerationError::Session(e) => Self::Conflict(e.to_string()),
            GenerationError::Cancelled => Self::Conflict(err.to_string()),
            GenerationError::InvalidChoice(msg) => Self::BadRequest(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ImageTaskError> for ApiError {
    fn from(err: ImageTaskError) -> Self {
        match err {
            ImageTaskError::StoryNotFound | ImageTaskError::CardNotFound => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
