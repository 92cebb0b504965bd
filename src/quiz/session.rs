//! One quiz-taking session: setup -> quiz -> mastery, restart back to setup.
//!
//! All mutation goes through `Session::apply`, so the whole machine can be
//! driven (and tested) without a bot or a network in sight. `QuizEngine`
//! wraps a question generator and sequences the request/completion events
//! around each network call.

use crate::quiz::ai_helper::QuestionGenerator;
use crate::quiz::{Question, SubjectInfo};

/// Cumulative correct answers needed to finish a session in `Mastery`.
pub const MASTERY_THRESHOLD: u32 = 3;

pub const START_FAILURE_TEXT: &str =
    "I couldn't come up with a first question. Please send your example question again.";
pub const ADVANCE_FAILURE_TEXT: &str =
    "I couldn't come up with the next question. Please pick an answer again.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GameState {
    #[default]
    Setup,
    Quiz,
    Mastery,
}

/// The complete state of one quiz interaction.
///
/// `subject_info` is present from the moment a quiz starts until restart;
/// `current_question` only while in `Quiz`. `correct_answers_count` stays
/// below `MASTERY_THRESHOLD`: the answer that would reach it flips the
/// state to `Mastery` instead.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub state: GameState,
    pub subject_info: Option<SubjectInfo>,
    pub current_question: Option<Question>,
    pub correct_answers_count: u32,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_answer_was_correct: Option<bool>,
    pub explanation: Option<String>,
    /// Bumped on every restart. Completion events carry the epoch they were
    /// issued under; a completion from before a restart no longer matches
    /// and is dropped instead of resurrecting stale state.
    pub epoch: u64,
}

#[derive(Debug, Clone)]
pub enum Event {
    /// An initial-question request is being issued.
    StartRequested,
    /// The initial question arrived.
    Started {
        epoch: u64,
        info: SubjectInfo,
        question: Question,
    },
    /// The user picked an option. Everything here is synchronous; whether a
    /// follow-up request is needed can be read off the resulting state
    /// (still in `Quiz` and loading).
    Answered { answer_index: usize },
    /// The next question arrived.
    Advanced {
        epoch: u64,
        question: Question,
        explanation: Option<String>,
    },
    /// A generation request failed; `message` is the fixed user-facing text.
    Failed { epoch: u64, message: String },
    Restarted,
}

impl Session {
    pub fn apply(&mut self, event: Event) {
        match event {
            Event::StartRequested => {
                self.is_loading = true;
                self.error = None;
            }
            Event::Started {
                epoch,
                info,
                question,
            } => {
                if epoch != self.epoch {
                    log::debug!("dropping stale start completion (epoch {epoch} != {})", self.epoch);
                    return;
                }
                self.subject_info = Some(info);
                self.current_question = Some(question);
                self.correct_answers_count = 0;
                self.last_answer_was_correct = None;
                self.explanation = None;
                self.state = GameState::Quiz;
                self.is_loading = false;
            }
            Event::Answered { answer_index } => {
                // Without a question and subject there is nothing to answer.
                let Some(question) = &self.current_question else {
                    return;
                };
                if self.subject_info.is_none() {
                    return;
                }
                self.is_loading = true;
                self.error = None;
                self.explanation = None;

                let correct = answer_index == question.correct_answer_index;
                self.last_answer_was_correct = Some(correct);

                if correct {
                    let new_count = self.correct_answers_count + 1;
                    if new_count >= MASTERY_THRESHOLD {
                        // The threshold value itself is never stored, and a
                        // mastered session carries no question.
                        self.state = GameState::Mastery;
                        self.current_question = None;
                        self.is_loading = false;
                    } else {
                        self.correct_answers_count = new_count;
                    }
                }
            }
            Event::Advanced {
                epoch,
                question,
                explanation,
            } => {
                if epoch != self.epoch {
                    log::debug!("dropping stale next-question completion (epoch {epoch} != {})", self.epoch);
                    return;
                }
                self.current_question = Some(question);
                if let Some(text) = explanation {
                    self.explanation = Some(text);
                }
                self.is_loading = false;
            }
            Event::Failed { epoch, message } => {
                if epoch != self.epoch {
                    log::debug!("dropping stale failure (epoch {epoch} != {})", self.epoch);
                    return;
                }
                self.error = Some(message);
                self.is_loading = false;
            }
            Event::Restarted => {
                *self = Session {
                    epoch: self.epoch + 1,
                    ..Session::default()
                };
            }
        }
    }

    /// How far along the session is, in `[0, 1)`. Derived, never stored.
    pub fn progress(&self) -> f64 {
        f64::from(self.correct_answers_count) / f64::from(MASTERY_THRESHOLD)
    }
}

/// Drives a `Session` against a question generator. One engine is shared by
/// every chat; the per-chat state all lives in the `Session` values.
pub struct QuizEngine<G> {
    generator: G,
}

impl<G: QuestionGenerator> QuizEngine<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }

    /// Begin a quiz: fetch the first question for `info`, seeded with a
    /// sample question the user supplied. On failure the session stays
    /// where it was, with `error` set to a fixed message.
    pub async fn start(&self, session: &mut Session, info: SubjectInfo, seed_question: &str) {
        let epoch = session.epoch;
        session.apply(Event::StartRequested);

        match self.generator.initial_question(&info, seed_question).await {
            Ok(question) => {
                session.apply(Event::Started {
                    epoch,
                    info,
                    question,
                });
            }
            Err(err) => {
                log::error!("initial question generation failed: {err}");
                session.apply(Event::Failed {
                    epoch,
                    message: START_FAILURE_TEXT.to_string(),
                });
            }
        }
    }

    /// Grade the chosen option and, unless the session just reached
    /// mastery, fetch the next question. Correctness is recorded before the
    /// request is issued, so feedback never waits on the network.
    pub async fn answer(&self, session: &mut Session, answer_index: usize) {
        let (Some(question), Some(info)) = (
            session.current_question.clone(),
            session.subject_info.clone(),
        ) else {
            return;
        };

        let epoch = session.epoch;
        session.apply(Event::Answered { answer_index });
        if session.state != GameState::Quiz {
            // Mastery reached; no further question is requested.
            return;
        }

        let was_correct = answer_index == question.correct_answer_index;
        match self
            .generator
            .next_question(&info, &question, was_correct, answer_index)
            .await
        {
            Ok(next) => {
                session.apply(Event::Advanced {
                    epoch,
                    question: next.question,
                    explanation: next.explanation,
                });
            }
            Err(err) => {
                log::error!("next question generation failed: {err}");
                session.apply(Event::Failed {
                    epoch,
                    message: ADVANCE_FAILURE_TEXT.to_string(),
                });
            }
        }
    }

    pub fn restart(&self, session: &mut Session) {
        session.apply(Event::Restarted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::ai_helper::GenerateError;
    use crate::quiz::NextQuestion;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn sample_question() -> Question {
        Question::new(
            "What is 2 + 2?".to_string(),
            vec!["3".to_string(), "4".to_string(), "5".to_string()],
            1,
        )
    }

    fn sample_info() -> SubjectInfo {
        SubjectInfo::new("7".to_string(), "Math".to_string(), "Addition".to_string())
    }

    fn quiz_session() -> Session {
        let mut session = Session::default();
        session.apply(Event::Started {
            epoch: 0,
            info: sample_info(),
            question: sample_question(),
        });
        session
    }

    /// Scripted generator: answers every call with the configured results
    /// and counts how many next-question requests it sees.
    struct StubGenerator {
        initial: Result<Question, ()>,
        next: Result<NextQuestion, ()>,
        next_calls: Arc<AtomicUsize>,
    }

    impl StubGenerator {
        fn ok() -> Self {
            Self {
                initial: Ok(sample_question()),
                next: Ok(NextQuestion {
                    question: sample_question(),
                    explanation: None,
                }),
                next_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing() -> Self {
            Self {
                initial: Err(()),
                next: Err(()),
                next_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_next(next: NextQuestion) -> Self {
            Self {
                next: Ok(next),
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl QuestionGenerator for StubGenerator {
        async fn initial_question(
            &self,
            _info: &SubjectInfo,
            _seed_question: &str,
        ) -> Result<Question, GenerateError> {
            self.initial
                .clone()
                .map_err(|_| GenerateError::Malformed("stub failure".to_string()))
        }

        async fn next_question(
            &self,
            _info: &SubjectInfo,
            _previous: &Question,
            _was_correct: bool,
            _chosen_index: usize,
        ) -> Result<NextQuestion, GenerateError> {
            self.next_calls.fetch_add(1, Ordering::SeqCst);
            self.next
                .clone()
                .map_err(|_| GenerateError::Malformed("stub failure".to_string()))
        }
    }

    #[test]
    fn start_requested_marks_loading_and_clears_error() {
        let mut session = Session::default();
        session.error = Some("old".to_string());

        session.apply(Event::StartRequested);

        assert!(session.is_loading);
        assert_eq!(session.error, None);
        assert_eq!(session.state, GameState::Setup);
    }

    #[test]
    fn started_moves_setup_to_quiz() {
        let mut session = Session::default();
        session.apply(Event::StartRequested);
        session.apply(Event::Started {
            epoch: 0,
            info: sample_info(),
            question: sample_question(),
        });

        assert_eq!(session.state, GameState::Quiz);
        assert_eq!(session.subject_info, Some(sample_info()));
        assert_eq!(session.current_question, Some(sample_question()));
        assert_eq!(session.correct_answers_count, 0);
        assert_eq!(session.error, None);
        assert_eq!(session.last_answer_was_correct, None);
        assert_eq!(session.explanation, None);
        assert!(!session.is_loading);
    }

    #[test]
    fn wrong_answer_records_feedback_and_keeps_count() {
        let mut session = quiz_session();

        session.apply(Event::Answered { answer_index: 0 });

        assert_eq!(session.last_answer_was_correct, Some(false));
        assert_eq!(session.correct_answers_count, 0);
        assert_eq!(session.state, GameState::Quiz);
        assert!(session.is_loading);
    }

    #[test]
    fn correct_answer_below_threshold_increments_count() {
        let mut session = quiz_session();

        session.apply(Event::Answered { answer_index: 1 });

        assert_eq!(session.last_answer_was_correct, Some(true));
        assert_eq!(session.correct_answers_count, 1);
        assert_eq!(session.state, GameState::Quiz);
    }

    #[test]
    fn correct_answer_at_threshold_reaches_mastery_without_storing_it() {
        let mut session = quiz_session();
        session.correct_answers_count = MASTERY_THRESHOLD - 1;

        session.apply(Event::Answered { answer_index: 1 });

        assert_eq!(session.state, GameState::Mastery);
        assert_eq!(session.correct_answers_count, MASTERY_THRESHOLD - 1);
        assert_eq!(session.current_question, None);
        assert!(!session.is_loading);
    }

    #[test]
    fn answer_without_question_is_a_noop() {
        let mut session = Session::default();
        let before = session.clone();

        session.apply(Event::Answered { answer_index: 0 });

        assert_eq!(session, before);
    }

    #[test]
    fn answering_clears_previous_explanation() {
        let mut session = quiz_session();
        session.explanation = Some("left over".to_string());

        session.apply(Event::Answered { answer_index: 0 });

        assert_eq!(session.explanation, None);
    }

    #[test]
    fn advanced_replaces_question_and_stores_explanation() {
        let mut session = quiz_session();
        session.apply(Event::Answered { answer_index: 0 });

        let next = Question::new(
            "What is 3 + 3?".to_string(),
            vec!["6".to_string(), "7".to_string()],
            0,
        );
        session.apply(Event::Advanced {
            epoch: 0,
            question: next.clone(),
            explanation: Some("because...".to_string()),
        });

        assert_eq!(session.current_question, Some(next));
        assert_eq!(session.explanation, Some("because...".to_string()));
        assert!(!session.is_loading);
    }

    #[test]
    fn advanced_without_explanation_leaves_it_cleared() {
        let mut session = quiz_session();
        session.apply(Event::Answered { answer_index: 1 });
        session.apply(Event::Advanced {
            epoch: 0,
            question: sample_question(),
            explanation: None,
        });

        assert_eq!(session.explanation, None);
    }

    #[test]
    fn failed_keeps_state_and_sets_fixed_message() {
        let mut session = quiz_session();
        session.apply(Event::Answered { answer_index: 1 });
        session.apply(Event::Failed {
            epoch: 0,
            message: ADVANCE_FAILURE_TEXT.to_string(),
        });

        assert_eq!(session.state, GameState::Quiz);
        assert_eq!(session.current_question, Some(sample_question()));
        assert_eq!(session.correct_answers_count, 1);
        assert_eq!(session.error, Some(ADVANCE_FAILURE_TEXT.to_string()));
        assert!(!session.is_loading);
    }

    #[test]
    fn restart_resets_every_field() {
        let mut session = quiz_session();
        session.apply(Event::Answered { answer_index: 1 });
        session.apply(Event::Restarted);

        assert_eq!(session.state, GameState::Setup);
        assert_eq!(session.subject_info, None);
        assert_eq!(session.current_question, None);
        assert_eq!(session.correct_answers_count, 0);
        assert_eq!(session.error, None);
        assert_eq!(session.last_answer_was_correct, None);
        assert_eq!(session.explanation, None);
    }

    #[test]
    fn restart_is_idempotent() {
        let mut once = quiz_session();
        once.apply(Event::Restarted);

        let mut twice = quiz_session();
        twice.apply(Event::Restarted);
        twice.apply(Event::Restarted);

        // Same observable state; only the epoch keeps counting.
        assert_eq!(once.state, twice.state);
        assert_eq!(once.subject_info, twice.subject_info);
        assert_eq!(once.current_question, twice.current_question);
        assert_eq!(once.correct_answers_count, twice.correct_answers_count);
        assert_eq!(once.error, twice.error);
        assert_eq!(once.last_answer_was_correct, twice.last_answer_was_correct);
        assert_eq!(once.explanation, twice.explanation);
    }

    #[test]
    fn completion_from_before_a_restart_is_dropped() {
        let mut session = Session::default();
        let stale_epoch = session.epoch;
        session.apply(Event::StartRequested);
        session.apply(Event::Restarted);

        session.apply(Event::Started {
            epoch: stale_epoch,
            info: sample_info(),
            question: sample_question(),
        });

        assert_eq!(session.state, GameState::Setup);
        assert_eq!(session.current_question, None);
    }

    #[test]
    fn progress_is_derived_from_the_count() {
        let mut session = quiz_session();
        assert_eq!(session.progress(), 0.0);
        session.apply(Event::Answered { answer_index: 1 });
        assert_eq!(session.progress(), 1.0 / f64::from(MASTERY_THRESHOLD));
    }

    #[tokio::test]
    async fn start_success_begins_the_quiz() {
        let engine = QuizEngine::new(StubGenerator::ok());
        let mut session = Session::default();

        engine.start(&mut session, sample_info(), "What is 1 + 1?").await;

        assert_eq!(session.state, GameState::Quiz);
        assert_eq!(session.current_question, Some(sample_question()));
        assert_eq!(session.correct_answers_count, 0);
        assert_eq!(session.error, None);
        assert!(!session.is_loading);
    }

    #[tokio::test]
    async fn start_failure_stays_in_setup_with_fixed_message() {
        let engine = QuizEngine::new(StubGenerator::failing());
        let mut session = Session::default();

        engine.start(&mut session, sample_info(), "What is 1 + 1?").await;

        assert_eq!(session.state, GameState::Setup);
        assert_eq!(session.subject_info, None);
        assert_eq!(session.error, Some(START_FAILURE_TEXT.to_string()));
        assert!(!session.is_loading);
    }

    #[tokio::test]
    async fn reaching_the_threshold_issues_no_next_question_request() {
        let generator = StubGenerator::ok();
        let next_calls = generator.next_calls.clone();
        let engine = QuizEngine::new(generator);
        let mut session = quiz_session();
        session.correct_answers_count = MASTERY_THRESHOLD - 1;

        engine.answer(&mut session, 1).await;

        assert_eq!(session.state, GameState::Mastery);
        assert_eq!(next_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wrong_answer_with_explanation_replaces_the_question() {
        let next = Question::new(
            "What is 5 - 2?".to_string(),
            vec!["2".to_string(), "3".to_string()],
            1,
        );
        let engine = QuizEngine::new(StubGenerator::with_next(NextQuestion {
            question: next.clone(),
            explanation: Some("because...".to_string()),
        }));
        let mut session = quiz_session();

        engine.answer(&mut session, 0).await;

        assert_eq!(session.last_answer_was_correct, Some(false));
        assert_eq!(session.correct_answers_count, 0);
        assert_eq!(session.current_question, Some(next));
        assert_eq!(session.explanation, Some("because...".to_string()));
    }

    #[tokio::test]
    async fn advance_failure_keeps_question_and_count() {
        let engine = QuizEngine::new(StubGenerator::failing());
        let mut session = quiz_session();

        engine.answer(&mut session, 1).await;

        assert_eq!(session.state, GameState::Quiz);
        assert_eq!(session.current_question, Some(sample_question()));
        assert_eq!(session.correct_answers_count, 1);
        assert_eq!(session.error, Some(ADVANCE_FAILURE_TEXT.to_string()));
        assert!(!session.is_loading);
    }

    #[tokio::test]
    async fn answer_without_a_session_underway_is_a_noop() {
        let generator = StubGenerator::ok();
        let next_calls = generator.next_calls.clone();
        let engine = QuizEngine::new(generator);
        let mut session = Session::default();

        engine.answer(&mut session, 0).await;

        assert_eq!(session, Session::default());
        assert_eq!(next_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn three_correct_answers_master_the_topic() {
        let engine = QuizEngine::new(StubGenerator::ok());
        let mut session = Session::default();

        engine.start(&mut session, sample_info(), "seed").await;
        assert_eq!(session.correct_answers_count, 0);

        engine.answer(&mut session, 1).await;
        assert_eq!(session.state, GameState::Quiz);
        assert_eq!(session.correct_answers_count, 1);

        engine.answer(&mut session, 1).await;
        assert_eq!(session.state, GameState::Quiz);
        assert_eq!(session.correct_answers_count, 2);

        engine.answer(&mut session, 1).await;
        assert_eq!(session.state, GameState::Mastery);
        assert_eq!(session.correct_answers_count, 2);
    }
}
