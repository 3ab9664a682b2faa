use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::models::{ChapterEntity, MatchEntity, ProfileEntity, QuestionEntity, ReportEntity};

pub const MATCH_PREFIX: &str = "match::";
pub const PROFILE_PREFIX: &str = "profile::";
pub const CHAPTER_PREFIX: &str = "chapter::";
pub const QUESTIONS_PREFIX: &str = "questions::";
pub const REPORT_PREFIX: &str = "report::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[allow(dead_code)]
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Body returned by CouchDB after a successful PUT.
#[derive(Debug, Deserialize)]
pub struct PutResponse {
    pub rev: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchMatchDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub record: MatchEntity,
}

impl From<(MatchEntity, Option<String>)> for CouchMatchDocument {
    fn from((record, rev): (MatchEntity, Option<String>)) -> Self {
        Self {
            id: match_doc_id(&record.match_id),
            rev,
            record,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchProfileDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub profile: ProfileEntity,
}

impl CouchProfileDocument {
    /// Fresh, never persisted profile document for `uid`.
    pub fn blank(uid: &str) -> Self {
        Self {
            id: profile_doc_id(uid),
            rev: None,
            profile: ProfileEntity::new(uid),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchChapterDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub chapter: ChapterEntity,
}

/// All questions of one chapter, stored as a single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchQuestionsDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub questions: Vec<QuestionEntity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchReportDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub report: ReportEntity,
}

impl From<ReportEntity> for CouchReportDocument {
    fn from(report: ReportEntity) -> Self {
        Self {
            id: report_doc_id(&report.id),
            rev: None,
            report,
        }
    }
}

pub fn match_doc_id(id: &str) -> String {
    format!("{MATCH_PREFIX}{id}")
}

pub fn profile_doc_id(uid: &str) -> String {
    format!("{PROFILE_PREFIX}{uid}")
}

/// Prefix shared by every chapter document of `subject_id`.
pub fn chapter_prefix(subject_id: &str) -> String {
    format!("{CHAPTER_PREFIX}{subject_id}::")
}

pub fn questions_doc_id(chapter_id: &str) -> String {
    format!("{QUESTIONS_PREFIX}{chapter_id}")
}

pub fn report_doc_id(id: &str) -> String {
    format!("{REPORT_PREFIX}{id}")
}
