pub mod ai_helper;
pub mod session;

/// What the quiz is about. Collected once during setup, dropped on restart.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubjectInfo {
    pub grade: String,
    pub subject: String,
    pub topic: String,
}

impl SubjectInfo {
    pub fn new(grade: String, subject: String, topic: String) -> Self {
        Self {
            grade,
            subject,
            topic,
        }
    }
}

/// A single multiple-choice question. `correct_answer_index` is always a
/// valid index into `options`; the generator validates this before a
/// question ever reaches a session.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
}

impl Question {
    pub fn new(question_text: String, options: Vec<String>, correct_answer_index: usize) -> Self {
        Self {
            question_text,
            options,
            correct_answer_index,
        }
    }

    pub fn correct_option(&self) -> &str {
        &self.options[self.correct_answer_index]
    }
}

/// Follow-up produced after an answer: the next question, plus a short
/// explanation when the generator chose to write one (usually after a
/// wrong answer).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NextQuestion {
    pub question: Question,
    pub explanation: Option<String>,
}
