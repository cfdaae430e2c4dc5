use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use time::{
    format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};
use validator::Validate;

use crate::core::time::{format_primitive, to_primitive_utc};
use crate::db::models::{Choice, Test};
use crate::db::types::QuestionType;
use crate::repositories::QuestionWithChoices;
use crate::services::catalog::{
    ChoiceDraft, QuestionDraft, TestDraft, MAX_TIME_LIMIT_SECONDS,
};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ChoiceCreate {
    #[validate(length(min = 1, message = "choice_text must not be empty"))]
    #[serde(alias = "choiceText")]
    pub(crate) choice_text: String,
    #[serde(default)]
    #[serde(alias = "isCorrect")]
    pub(crate) is_correct: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct QuestionCreate {
    #[validate(length(min = 1, message = "question_text must not be empty"))]
    #[serde(alias = "questionText")]
    pub(crate) question_text: String,
    #[serde(alias = "questionType")]
    pub(crate) question_type: QuestionType,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) choices: Vec<ChoiceCreate>,
}

impl QuestionCreate {
    pub(crate) fn into_draft(self) -> QuestionDraft {
        QuestionDraft {
            question_text: self.question_text,
            question_type: self.question_type,
            choices: self
                .choices
                .into_iter()
                .map(|choice| ChoiceDraft {
                    choice_text: choice.choice_text,
                    is_correct: choice.is_correct,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct TestCreate {
    #[serde(alias = "courseId", alias = "course")]
    pub(crate) course_id: String,
    #[validate(length(min = 1, max = 255, message = "title must be 1-255 characters"))]
    #[serde(alias = "name")]
    pub(crate) title: String,
    #[serde(alias = "timeLimitSeconds")]
    #[validate(range(
        min = 1,
        max = MAX_TIME_LIMIT_SECONDS,
        message = "time_limit_seconds must be between 1 second and one week"
    ))]
    pub(crate) time_limit_seconds: i64,
    #[serde(deserialize_with = "deserialize_offset_datetime_flexible")]
    pub(crate) deadline: OffsetDateTime,
    #[serde(default)]
    #[validate(nested)]
    pub(crate) questions: Vec<QuestionCreate>,
}

impl TestCreate {
    pub(crate) fn into_draft(self) -> TestDraft {
        TestDraft {
            course_id: self.course_id,
            title: self.title.trim().to_string(),
            time_limit_seconds: self.time_limit_seconds,
            deadline: to_primitive_utc(self.deadline),
            questions: self.questions.into_iter().map(QuestionCreate::into_draft).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TestListQuery {
    #[serde(default)]
    pub(crate) course_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TestResponse {
    pub(crate) id: String,
    pub(crate) course_id: String,
    pub(crate) creator_id: String,
    pub(crate) title: String,
    pub(crate) time_limit_seconds: i64,
    pub(crate) deadline: String,
    pub(crate) created_at: String,
}

impl TestResponse {
    pub(crate) fn from_db(test: Test) -> Self {
        Self {
            id: test.id,
            course_id: test.course_id,
            creator_id: test.creator_id,
            title: test.title,
            time_limit_seconds: test.time_limit_seconds,
            deadline: format_primitive(test.deadline),
            created_at: format_primitive(test.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChoiceResponse {
    pub(crate) id: String,
    pub(crate) choice_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) is_correct: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QuestionResponse {
    pub(crate) id: String,
    pub(crate) test_id: String,
    pub(crate) question_text: String,
    pub(crate) question_type: QuestionType,
    pub(crate) position: i32,
    pub(crate) choices: Vec<ChoiceResponse>,
}

impl QuestionResponse {
    /// `reveal_answers` is false for students, who never see which choice is correct.
    pub(crate) fn from_db(found: QuestionWithChoices, reveal_answers: bool) -> Self {
        let QuestionWithChoices { question, choices } = found;
        Self {
            id: question.id,
            test_id: question.test_id,
            question_text: question.question_text,
            question_type: question.question_type,
            position: question.position,
            choices: choices
                .into_iter()
                .map(|choice: Choice| ChoiceResponse {
                    id: choice.id,
                    choice_text: choice.choice_text,
                    is_correct: reveal_answers.then_some(choice.is_correct),
                })
                .collect(),
        }
    }
}

fn parse_offset_datetime_flexible(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(value);
    }

    // Naive timestamps are taken as UTC.
    if let Ok(value) = PrimitiveDateTime::parse(
        raw,
        &format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    ) {
        return Some(value.assume_utc());
    }
    if let Ok(value) =
        PrimitiveDateTime::parse(raw, &format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    {
        return Some(value.assume_utc());
    }

    None
}

fn deserialize_offset_datetime_flexible<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_offset_datetime_flexible(&raw)
        .ok_or_else(|| D::Error::custom(format!("invalid datetime: {raw}")))
}
