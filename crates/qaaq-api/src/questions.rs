use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use qaaq_types::api::{Claims, CreateAnswerRequest, CreateQuestionRequest, QuestionDetail};
use qaaq_types::models::{Answer, Question};

use crate::convert;
use crate::error::ApiError;
use crate::state::{AppState, db_call};

const MAX_TITLE_CHARS: usize = 200;
const MAX_BODY_CHARS: usize = 10_000;
const MAX_TAGS: usize = 8;

#[derive(Debug, Deserialize)]
pub struct QuestionQuery {
    pub search: Option<String>,
    pub tag: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

pub async fn list_questions(
    State(state): State<AppState>,
    Query(query): Query<QuestionQuery>,
) -> Result<Json<Vec<Question>>, ApiError> {
    let search = query.search.filter(|s| !s.trim().is_empty());
    let tag = query.tag.filter(|t| !t.trim().is_empty());
    let limit = query.limit.clamp(1, 100);
    let offset = query.offset;

    let rows = db_call(&state, move |db| {
        db.list_questions(search.as_deref(), tag.as_deref(), limit, offset)
    })
    .await?;
    Ok(Json(rows.into_iter().map(convert::question).collect()))
}

pub async fn create_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.trim().to_string();
    let content = req.content.trim().to_string();
    if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::bad_request(format!("Title must be 1 to {} characters", MAX_TITLE_CHARS)));
    }
    if content.is_empty() || content.chars().count() > MAX_BODY_CHARS {
        return Err(ApiError::bad_request(format!("Question must be 1 to {} characters", MAX_BODY_CHARS)));
    }
    if req.tags.len() > MAX_TAGS {
        return Err(ApiError::bad_request(format!("At most {} tags", MAX_TAGS)));
    }
    let tags = convert::tags_to_column(&req.tags);

    let aid = claims.sub.to_string();
    let row = db_call(&state, move |db| {
        db.create_question(&Uuid::new_v4().to_string(), &aid, &title, &content, &tags)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(convert::question(row))))
}

pub async fn get_question(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
) -> Result<Json<QuestionDetail>, ApiError> {
    let qid = question_id.to_string();
    let (question, answers) = db_call(&state, move |db| {
        let Some(question) = db.get_question(&qid)? else {
            return Ok(None);
        };
        let answers = db.list_answers(&qid)?;
        Ok(Some((question, answers)))
    })
    .await?
    .ok_or(ApiError::NotFound("Question"))?;

    Ok(Json(QuestionDetail {
        question: convert::question(question),
        answers: answers.into_iter().map(convert::answer).collect(),
    }))
}

pub async fn create_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(question_id): Path<Uuid>,
    Json(req): Json<CreateAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() || content.chars().count() > MAX_BODY_CHARS {
        return Err(ApiError::bad_request(format!("Answer must be 1 to {} characters", MAX_BODY_CHARS)));
    }

    let qid = question_id.to_string();
    let aid = claims.sub.to_string();
    let row = db_call(&state, move |db| {
        if db.get_question(&qid)?.is_none() {
            return Ok(None);
        }
        db.create_answer(&Uuid::new_v4().to_string(), &qid, &aid, &content).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("Question"))?;

    Ok((StatusCode::CREATED, Json(convert::answer(row))))
}

/// Only the question's author may accept, and only one answer stays accepted.
pub async fn accept_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((question_id, answer_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<Answer>>, ApiError> {
    let qid = question_id.to_string();
    let question = db_call(&state, move |db| db.get_question(&qid))
        .await?
        .ok_or(ApiError::NotFound("Question"))?;

    if question.author_id != claims.sub.to_string() {
        return Err(ApiError::forbidden("Only the asker can accept an answer"));
    }

    let aid = answer_id.to_string();
    let answers = db_call(&state, move |db| {
        if !db.accept_answer(&question.id, &aid)? {
            return Ok(None);
        }
        db.list_answers(&question.id).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("Answer"))?;

    Ok(Json(answers.into_iter().map(convert::answer).collect()))
}
