use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Extension, Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use qaaq_db::models::QbotRow;
use qaaq_types::api::{Claims, QbotChatRequest, QbotChatResponse};
use qaaq_types::models::{QbotMessage, QbotRole};

use crate::convert;
use crate::error::ApiError;
use crate::state::{AppState, db_call};

pub const DEFAULT_LLM_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Earlier turns sent along with each new question.
const CONTEXT_TURNS: u32 = 10;
const MAX_QUESTION_CHARS: usize = 2000;

const SYSTEM_PROMPT: &str = "You are QBOT, the assistant of QaaqConnect, a community for seafarers \
and the people who serve them in port. Answer questions on shipboard operations, marine engineering, \
navigation, safety and regulations (SOLAS, MARPOL, STCW, ISM), port services and life at sea. \
Be concise and practical. When a question depends on a specific vessel or flag state, say what the \
answer depends on. Politely decline topics unrelated to the maritime world.";

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct QbotClient {
    http_client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionContent,
}

#[derive(Deserialize)]
struct CompletionContent {
    content: Option<String>,
}

impl QbotClient {
    pub fn new(url: Option<String>, api_key: Option<String>, model: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            url: url.unwrap_or_else(|| DEFAULT_LLM_URL.to_string()),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Answer `question` with the model, falling back to the built-in
    /// replies when no model is configured or the call fails.
    pub async fn reply(&self, history: &[QbotRow], question: &str) -> String {
        if self.api_key.is_none() {
            return rule_based_reply(question);
        }
        match self.complete(history, question).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("QBOT model call failed, using built-in reply: {:#}", e);
                rule_based_reply(question)
            }
        }
    }

    async fn complete(&self, history: &[QbotRow], question: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(CompletionMessage { role: "system", content: SYSTEM_PROMPT });
        for turn in history {
            messages.push(CompletionMessage { role: &turn.role, content: &turn.content });
        }
        messages.push(CompletionMessage { role: "user", content: question });

        let body = CompletionRequest { model: &self.model, messages, max_tokens: 600, temperature: 0.4 };

        let mut request = self.http_client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: CompletionResponse = request
            .send()
            .await
            .context("Failed to reach model endpoint")?
            .error_for_status()
            .context("Model endpoint returned an error")?
            .json()
            .await
            .context("Failed to parse model response")?;

        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .context("Model returned no answer")?;

        debug!("QBOT model answered with {} chars", answer.len());
        Ok(answer)
    }
}

/// Keyword replies used when no model is available.
///
/// Keywords match whole words; a trailing `*` also accepts longer words and
/// a space-separated keyword must appear as consecutive words. Greetings are
/// checked last so "hi, ..." still reaches the topic.
pub fn rule_based_reply(question: &str) -> String {
    let words = words(question);
    let has = |keywords: &[&str]| keywords.iter().any(|k| keyword_matches(&words, k));

    let reply = if has(&["marpol", "oil record", "garbage", "sewage", "ballast", "bwts", "scrubber*", "sox", "nox"]) {
        "Environmental rules at sea come mainly from MARPOL: Annex I (oil), IV (sewage), V (garbage) and \
         VI (air emissions), plus the Ballast Water Management Convention. Keep the Oil Record Book and \
         Garbage Record Book current, and check local port requirements, which are often stricter."
    } else if has(&["solas", "lifeboat*", "life raft*", "liferaft*", "fire drill*", "abandon ship", "muster*"]) {
        "SOLAS requires abandon-ship and fire drills at least monthly for cargo ships, with each crew \
         member taking part. Lifeboats are launched and manoeuvred at least every three months. Log \
         every drill and any defects found."
    } else if has(&["stcw", "certificate*", "coc", "licence*", "license*", "revalidat*", "endorsement*"]) {
        "Certificates of Competency are issued under STCW and need revalidation every five years, \
         normally with proof of sea service or a refresher course. Check your flag administration's \
         rules for endorsements."
    } else if has(&["engine*", "boiler*", "purifier*", "turbocharger*", "crankcase*", "fuel pump*", "injector*", "generator*"]) {
        "For machinery trouble, start with the maker's manual and the planned maintenance history. \
         Check recent changes in fuel, lube oil and temperatures, and record readings before and after \
         any adjustment. Tell me the equipment and the symptom and I can help narrow it down."
    } else if has(&["colreg*", "collision*", "navigation", "radar*", "ecdis", "passage plan*", "watchkeeping"]) {
        "Navigation questions usually come back to COLREGs and a sound passage plan. Use all available \
         means to determine risk of collision, including radar plotting and visual bearings, and never \
         rely on ECDIS alone."
    } else if has(&["ism", "sms", "audit*", "psc", "port state", "inspection*", "vetting"]) {
        "For Port State Control and audits, make sure certificates are valid, drills are logged, the \
         Safety Management System is followed as written, and deficiencies from earlier inspections \
         are closed with evidence."
    } else if has(&["port", "shore leave", "chandler*", "agent*", "sim card*", "seamen's club*", "mission*"]) {
        "In port, your agent is the first contact for shore leave, crew changes and supplies. The map \
         and CPSS groups on QaaqConnect show locals and services near your port."
    } else if has(&["salary", "salaries", "wage*", "contract*", "mlc", "repatriation", "leave"]) {
        "The Maritime Labour Convention (MLC 2006) covers your employment agreement, hours of rest, \
         wages and repatriation. Keep a copy of your contract and raise complaints through the \
         on-board procedure first."
    } else if has(&["hello", "hi", "hey", "namaste", "good morning", "good evening"]) {
        "Hello! I'm QBOT. Ask me about shipboard operations, engines, regulations or port services."
    } else {
        "I can help with shipboard operations, marine engineering, safety and environmental \
         regulations, and port services. Could you tell me a bit more about your question?"
    };
    reply.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn keyword_matches(words: &[String], keyword: &str) -> bool {
    let pattern: Vec<&str> = keyword.split(' ').collect();
    words
        .windows(pattern.len())
        .any(|window| window.iter().zip(&pattern).all(|(word, p)| word_matches(word, p)))
}

fn word_matches(word: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => word.starts_with(prefix),
        None => word == pattern || word.strip_suffix('s') == Some(pattern),
    }
}

pub async fn chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<QbotChatRequest>,
) -> Result<Json<QbotChatResponse>, ApiError> {
    let question = req.message.trim().to_string();
    if question.is_empty() || question.chars().count() > MAX_QUESTION_CHARS {
        return Err(ApiError::bad_request(format!(
            "Message must be 1 to {} characters",
            MAX_QUESTION_CHARS
        )));
    }

    let uid = claims.sub.to_string();
    let q = question.clone();
    let (history, asked) = db_call(&state, move |db| {
        let history = db.qbot_history(&uid, CONTEXT_TURNS)?;
        let asked = db.insert_qbot_message(&Uuid::new_v4().to_string(), &uid, QbotRole::User.as_str(), &q)?;
        Ok((history, asked))
    })
    .await?;

    let answer = state.qbot.reply(&history, &question).await;

    let uid = claims.sub.to_string();
    let answered = db_call(&state, move |db| {
        db.insert_qbot_message(&Uuid::new_v4().to_string(), &uid, QbotRole::Assistant.as_str(), &answer)
    })
    .await?;

    Ok(Json(QbotChatResponse {
        message: convert::qbot_message(asked),
        reply: convert::qbot_message(answered),
    }))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<QbotMessage>>, ApiError> {
    let uid = claims.sub.to_string();
    let rows = db_call(&state, move |db| db.qbot_history(&uid, 200)).await?;
    Ok(Json(rows.into_iter().map(convert::qbot_message).collect()))
}

pub async fn clear_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    let uid = claims.sub.to_string();
    db_call(&state, move |db| db.clear_qbot_history(&uid)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_pick_a_topic() {
        assert!(rule_based_reply("What does MARPOL Annex VI say?").contains("MARPOL"));
        assert!(rule_based_reply("purifier keeps tripping").contains("machinery"));
        assert!(rule_based_reply("how often lifeboat drills").contains("SOLAS"));
        assert!(rule_based_reply("hi").starts_with("Hello"));
        assert!(rule_based_reply("favourite colour?").contains("tell me a bit more"));
    }

    #[test]
    fn keywords_match_whole_words() {
        assert!(rule_based_reply("They say the boiler is leaking").contains("machinery"));
        assert!(rule_based_reply("Kochi port agent contact?").contains("your agent"));
        assert!(rule_based_reply("hi, when is the next lifeboat drill?").contains("SOLAS"));
        assert!(rule_based_reply("Explain the mechanism in this support report").contains("tell me a bit more"));
        assert!(rule_based_reply("Hey there").starts_with("Hello"));
    }

    #[test]
    fn phrases_need_consecutive_words() {
        let words = words("Who signs the Oil Record Book?");
        assert!(keyword_matches(&words, "oil record"));
        assert!(!keyword_matches(&words, "record oil"));
        assert!(keyword_matches(&words, "sign*"));
    }

    #[test]
    fn replies_have_no_source_line_breaks() {
        let reply = rule_based_reply("STCW revalidation");
        assert!(!reply.contains("  "));
        assert!(!reply.contains('\n'));
    }

    #[tokio::test]
    async fn unconfigured_client_uses_rules() {
        let client = QbotClient::new(None, None, None);
        assert!(!client.is_configured());
        let reply = client.reply(&[], "ballast water treatment").await;
        assert!(reply.contains("Ballast Water"));
    }
}
