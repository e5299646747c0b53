// src/grading.rs

use std::collections::HashMap;

use crate::models::attempt::SubmittedResponse;
use crate::models::quiz::QuizQuestion;

/// A response deferred to human grading.
#[derive(Debug, Clone)]
pub struct DeferredResponse {
    pub question_id: String,
    pub kind: &'static str,
    pub answer: serde_json::Value,
}

/// Outcome of grading one submission against a quiz's answer key.
#[derive(Debug)]
pub struct GradedSubmission {
    /// Marks obtained across auto-gradable questions.
    pub obtained_marks: i64,
    /// Marks available across ALL questions, manual ones included; the
    /// manual share is awarded later by the reviewer workflow.
    pub total_marks: i64,
    pub correct_count: usize,
    pub deferred: Vec<DeferredResponse>,
}

impl GradedSubmission {
    pub fn manual_review_pending(&self) -> bool {
        !self.deferred.is_empty()
    }
}

/// Grades a submission. Auto-gradable responses are compared against the
/// stored answer key by structural JSON equality (arrays are
/// order-sensitive). Responses whose kind needs human grading are collected
/// for the manual review queue instead. Responses for unknown question ids
/// are ignored; unanswered questions simply score nothing.
pub fn grade_submission(
    questions: &[QuizQuestion],
    responses: &[SubmittedResponse],
) -> GradedSubmission {
    let by_id: HashMap<&str, &SubmittedResponse> = responses
        .iter()
        .map(|r| (r.question_id.as_str(), r))
        .collect();

    let mut obtained_marks = 0;
    let mut total_marks = 0;
    let mut correct_count = 0;
    let mut deferred = Vec::new();

    for question in questions {
        total_marks += question.marks;

        let Some(response) = by_id.get(question.id.as_str()) else {
            continue;
        };

        if question.kind.requires_manual_review() {
            deferred.push(DeferredResponse {
                question_id: question.id.clone(),
                kind: question.kind.as_str(),
                answer: response.answer.clone(),
            });
        } else if response.answer == question.correct_answer {
            obtained_marks += question.marks;
            correct_count += 1;
        }
    }

    GradedSubmission {
        obtained_marks,
        total_marks,
        correct_count,
        deferred,
    }
}
