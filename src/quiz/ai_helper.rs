//! Question generation over the ChatGPT API.
//!
//! The model is asked for strict JSON; replies are fence-stripped, parsed
//! and validated before a question is allowed anywhere near a session.

use async_trait::async_trait;
use chatgpt::client::ChatGPT;
use chatgpt::types::CompletionResponse;
use rand::seq::SliceRandom;
use rand::thread_rng;
use thiserror::Error;

use crate::quiz::{NextQuestion, Question, SubjectInfo};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("chat backend error: {0}")]
    Backend(#[from] chatgpt::err::Error),
    #[error("generator reply was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("generator reply was malformed: {0}")]
    Malformed(String),
}

/// The capability the session engine needs from a question source. Kept as
/// a trait so tests can script one without a network.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn initial_question(
        &self,
        info: &SubjectInfo,
        seed_question: &str,
    ) -> Result<Question, GenerateError>;

    async fn next_question(
        &self,
        info: &SubjectInfo,
        previous: &Question,
        was_correct: bool,
        chosen_index: usize,
    ) -> Result<NextQuestion, GenerateError>;
}

pub struct GptQuestionGenerator {
    chat_gpt: ChatGPT,
}

impl GptQuestionGenerator {
    pub fn new(chat_gpt: ChatGPT) -> Self {
        Self { chat_gpt }
    }

    async fn send(&self, prompt: &str) -> Result<String, GenerateError> {
        let response: CompletionResponse = self.chat_gpt.send_message(prompt).await?;
        let content = response.message().clone().content;
        log::debug!("completion: {:?}", content);
        Ok(content)
    }
}

#[async_trait]
impl QuestionGenerator for GptQuestionGenerator {
    async fn initial_question(
        &self,
        info: &SubjectInfo,
        seed_question: &str,
    ) -> Result<Question, GenerateError> {
        log::debug!("requesting initial question on {:?}", info.topic);

        let prompt = format!(
            "You are a quiz author helping a grade {} student master {}.
The student is working on the topic \"{}\". Here is an example question from their coursework:
\"{}\"
Write one new multiple-choice question on the same topic, at a similar difficulty, with four options.
Reply with JSON only, no prose, in exactly this shape:
{{\"questionText\": \"...\", \"options\": [\"...\", \"...\", \"...\", \"...\"], \"correctAnswerIndex\": 0}}",
            info.grade, info.subject, info.topic, seed_question
        );

        let raw = self.send(&prompt).await?;
        Ok(shuffle_options(parse_question(&raw)?))
    }

    async fn next_question(
        &self,
        info: &SubjectInfo,
        previous: &Question,
        was_correct: bool,
        chosen_index: usize,
    ) -> Result<NextQuestion, GenerateError> {
        log::debug!(
            "requesting next question on {:?} (last answer correct: {})",
            info.topic,
            was_correct
        );

        let chosen_option = previous
            .options
            .get(chosen_index)
            .map(String::as_str)
            .unwrap_or("(none of the options)");
        let numbered_options = previous
            .options
            .iter()
            .enumerate()
            .map(|(i, option)| format!("{}. {}", i + 1, option))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You are a quiz author helping a grade {} student master {} (topic: \"{}\").
The student was just asked:
\"{}\"
{}
The correct option was \"{}\". The student chose \"{}\", which was {}.
If the answer was wrong, write a one- or two-sentence explanation of why the correct option is right, and make the new question probe the same misunderstanding from a different angle.
If the answer was right, omit the explanation and make the new question slightly harder, moving the topic forward.
Reply with JSON only, no prose, in exactly this shape:
{{\"question\": {{\"questionText\": \"...\", \"options\": [\"...\", \"...\", \"...\", \"...\"], \"correctAnswerIndex\": 0}}, \"explanation\": \"...\"}}",
            info.grade,
            info.subject,
            info.topic,
            previous.question_text,
            numbered_options,
            previous.correct_option(),
            chosen_option,
            if was_correct { "correct" } else { "incorrect" }
        );

        let raw = self.send(&prompt).await?;
        let next = parse_next_question(&raw)?;
        Ok(NextQuestion {
            question: shuffle_options(next.question),
            explanation: next.explanation,
        })
    }
}

fn parse_question(raw: &str) -> Result<Question, GenerateError> {
    let question: Question = serde_json::from_str(strip_code_fence(raw))?;
    validate(&question)?;
    Ok(question)
}

fn parse_next_question(raw: &str) -> Result<NextQuestion, GenerateError> {
    let next: NextQuestion = serde_json::from_str(strip_code_fence(raw))?;
    validate(&next.question)?;
    // Models sometimes send "" instead of omitting the field
    let explanation = next.explanation.filter(|text| !text.trim().is_empty());
    Ok(NextQuestion {
        question: next.question,
        explanation,
    })
}

// Models tend to wrap the JSON in a markdown fence no matter how firmly
// they're told not to
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn validate(question: &Question) -> Result<(), GenerateError> {
    if question.question_text.trim().is_empty() {
        return Err(GenerateError::Malformed("empty question text".to_string()));
    }
    if question.options.len() < 2 {
        return Err(GenerateError::Malformed(format!(
            "only {} option(s)",
            question.options.len()
        )));
    }
    if question.correct_answer_index >= question.options.len() {
        return Err(GenerateError::Malformed(format!(
            "correctAnswerIndex {} out of range for {} options",
            question.correct_answer_index,
            question.options.len()
        )));
    }
    Ok(())
}

// The model likes putting the correct answer first, which a student picks
// up on quickly. Shuffle and remap the index.
fn shuffle_options(question: Question) -> Question {
    let mut order: Vec<usize> = (0..question.options.len()).collect();
    order.shuffle(&mut thread_rng());

    // It is safe to unwrap here because `order` is a permutation of the
    // option indexes, so the old correct index is in it exactly once
    let correct_answer_index = order
        .iter()
        .position(|&i| i == question.correct_answer_index)
        .unwrap();
    let options = order
        .iter()
        .map(|&i| question.options[i].clone())
        .collect();

    Question::new(question.question_text, options, correct_answer_index)
}
