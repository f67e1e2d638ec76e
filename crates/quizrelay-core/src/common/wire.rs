//! Versioned wire schema exchanged with the generation workers.
//!
//! Producers and consumers are separate processes deployed on their own
//! schedule, so every message body carries a schema version (`"v"`) next to
//! its camelCase payload fields:
//!
//! ```json
//! { "v": 1, "type": "BLANK", "definition": "...", "mainText": "..." }
//! ```
//!
//! Messages with a version other than [`SCHEMA_VERSION`] are rejected as
//! [`Error::Serialization`] instead of being half-decoded.
//!
//! The [`Workload`] trait ties each [`Family`] to its request and response
//! payload types, so dispatching a question payload on an explanation channel
//! does not type-check.

use crate::common::{
    error::{Error, Result},
    types::Family,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Current wire schema version.
pub const SCHEMA_VERSION: u16 = 1;

#[derive(Serialize)]
struct Outgoing<'a, T> {
    v: u16,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct Header {
    v: u16,
}

#[derive(Deserialize)]
struct Incoming<T> {
    #[serde(flatten)]
    body: T,
}

/// Encodes `body` into a versioned message value.
pub fn encode<T: Serialize>(body: &T) -> Result<Bytes> {
    let out = serde_json::to_vec(&Outgoing {
        v: SCHEMA_VERSION,
        body,
    })?;
    Ok(Bytes::from(out))
}

/// Decodes a versioned message value, rejecting unknown schema versions.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let header: Header = serde_json::from_slice(bytes)?;
    if header.v != SCHEMA_VERSION {
        return Err(Error::Serialization {
            reason: format!(
                "unsupported schema version {} (expected {SCHEMA_VERSION})",
                header.v
            ),
        });
    }
    let incoming: Incoming<T> = serde_json::from_slice(bytes)?;
    Ok(incoming.body)
}

/// The fifteen exam question types served by the generation workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Purpose,
    MainIdea,
    Title,
    Topic,
    TargetUnmatch,
    FeelingChange,
    Underline,
    Blank,
    BlankAb,
    InfoMatch,
    InfoUnmatch,
    Grammar,
    SummarizeAb,
    Ordering,
    Argument,
}

impl QuestionType {
    pub const ALL: [Self; 15] = [
        Self::Purpose,
        Self::MainIdea,
        Self::Title,
        Self::Topic,
        Self::TargetUnmatch,
        Self::FeelingChange,
        Self::Underline,
        Self::Blank,
        Self::BlankAb,
        Self::InfoMatch,
        Self::InfoUnmatch,
        Self::Grammar,
        Self::SummarizeAb,
        Self::Ordering,
        Self::Argument,
    ];
}

/// Question-generation request sent to a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Generation instructions for this question type.
    pub definition: String,
    /// Source passage the question is built from.
    pub main_text: String,
}

/// A generated question as returned by a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    /// Workers may omit the type; the caller knows what it asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    pub title: String,
    pub main_text: String,
    pub choices: Vec<String>,
    pub answer: String,
}

/// Explanation request for a previously generated question.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationRequest {
    pub question_type: QuestionType,
    pub title: String,
    pub main_text: String,
    pub choices: Vec<String>,
    pub answer: String,
    /// Generation instructions for explanations of this question type.
    pub explanation_definition: String,
}

impl ExplanationRequest {
    /// Builds an explanation request from a generated question.
    pub fn for_question(
        question_type: QuestionType,
        question: &QuestionResponse,
        explanation_definition: impl Into<String>,
    ) -> Self {
        Self {
            question_type,
            title: question.title.clone(),
            main_text: question.main_text.clone(),
            choices: question.choices.clone(),
            answer: question.answer.clone(),
            explanation_definition: explanation_definition.into(),
        }
    }
}

/// A generated explanation as returned by a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationResponse {
    pub translation: String,
    pub explanation: String,
    pub answer: String,
}

/// Type-level pairing of a [`Family`] with its payload types.
pub trait Workload: Send + Sync + 'static {
    const FAMILY: Family;
    type Request: Serialize + DeserializeOwned + Send + Sync;
    type Response: Serialize + DeserializeOwned + Send;
}

/// Question generation: [`QuestionRequest`] in, [`QuestionResponse`] out.
#[derive(Debug)]
pub enum QuestionWork {}

impl Workload for QuestionWork {
    const FAMILY: Family = Family::Question;
    type Request = QuestionRequest;
    type Response = QuestionResponse;
}

/// Explanation generation: [`ExplanationRequest`] in, [`ExplanationResponse`]
/// out.
#[derive(Debug)]
pub enum ExplanationWork {}

impl Workload for ExplanationWork {
    const FAMILY: Family = Family::Explanation;
    type Request = ExplanationRequest;
    type Response = ExplanationResponse;
}
