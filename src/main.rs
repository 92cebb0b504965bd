mod quiz;

use std::sync::Arc;

use chatgpt::{client::ChatGPT, config::ChatGPTEngine};
use dotenv::dotenv;
use quiz::ai_helper::GptQuestionGenerator;
use quiz::session::{GameState, QuizEngine, Session, MASTERY_THRESHOLD};
use quiz::SubjectInfo;
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{ChatAction, KeyboardButton, KeyboardMarkup, KeyboardRemove},
};

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type Engine = QuizEngine<GptQuestionGenerator>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveGrade,
    ReceiveSubject {
        grade: String,
    },
    ReceiveTopic {
        grade: String,
        subject: String,
    },
    ReceiveSeedQuestion {
        info: SubjectInfo,
    },
    InQuiz {
        session: Session,
    },
}

type DialogueStorage = std::sync::Arc<ErasedStorage<State>>;

#[tokio::main]
async fn main() {
    dotenv().expect("Failed to load .env file");
    let chatgpt_api_key = std::env::var("CHATGPT_API_KEY").expect("CHATGPT_API_KEY is not set");

    pretty_env_logger::init();
    log::info!("Starting mastery quiz bot...");

    let bot = Bot::from_env();

    log::info!("Establishing connection to the database...");
    let storage: DialogueStorage = SqliteStorage::open("db.sqlite", Json)
        .await
        .expect("Failed to open the dialogue database")
        .erase();
    log::info!("Connection established");

    let gpt = {
        let mut gpt = ChatGPT::new(chatgpt_api_key).expect("Unable to connect with ChatGPT");

        gpt.config.engine = ChatGPTEngine::Gpt35Turbo;
        gpt.config.timeout = std::time::Duration::from_secs(15);

        gpt
    };

    let engine = Arc::new(QuizEngine::new(GptQuestionGenerator::new(gpt)));
    let engine_for_seed = engine.clone();
    let engine_for_quiz = engine.clone();

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveGrade].endpoint(receive_grade))
            .branch(dptree::case![State::ReceiveSubject { grade }].endpoint(receive_subject))
            .branch(dptree::case![State::ReceiveTopic { grade, subject }].endpoint(receive_topic))
            .branch(dptree::case![State::ReceiveSeedQuestion { info }].endpoint(
                move |bot: Bot, dialogue: QuizDialogue, info: SubjectInfo, msg: Message| {
                    receive_seed_question(engine_for_seed.clone(), bot, dialogue, info, msg)
                },
            ))
            .branch(dptree::case![State::InQuiz { session }].endpoint(
                move |bot: Bot, dialogue: QuizDialogue, session: Session, msg: Message| {
                    in_quiz(engine_for_quiz.clone(), bot, dialogue, session, msg)
                },
            )),
    )
    .dependencies(dptree::deps![storage])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
}

const GREETING_TEXT: &str = "Hi! I'm a quiz coach. Tell me what you're studying, answer my questions, and I'll keep going until you've mastered the topic.\n\nWhat grade are you in?";
const RESTART_LABEL: &str = "Study another topic";

fn grade_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new("5"),
            KeyboardButton::new("6"),
            KeyboardButton::new("7"),
            KeyboardButton::new("8"),
        ],
        vec![
            KeyboardButton::new("9"),
            KeyboardButton::new("10"),
            KeyboardButton::new("11"),
            KeyboardButton::new("12"),
        ],
    ])
}

async fn start(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT)
        .reply_markup(grade_keyboard())
        .await?;

    dialogue.update(State::ReceiveGrade).await?;
    Ok(())
}

async fn receive_grade(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    let Some(grade) = msg.text() else {
        bot.send_message(msg.chat.id, "Please send your grade as text")
            .await?;
        return Ok(());
    };

    let keyboard = KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new("Math"),
            KeyboardButton::new("Physics"),
            KeyboardButton::new("Chemistry"),
        ],
        vec![
            KeyboardButton::new("Biology"),
            KeyboardButton::new("History"),
            KeyboardButton::new("English"),
        ],
    ]);
    bot.send_message(msg.chat.id, "Which subject?")
        .reply_markup(keyboard)
        .await?;

    dialogue
        .update(State::ReceiveSubject {
            grade: grade.to_string(),
        })
        .await?;
    Ok(())
}

async fn receive_subject(
    bot: Bot,
    dialogue: QuizDialogue,
    grade: String,
    msg: Message,
) -> HandlerResult {
    let Some(subject) = msg.text() else {
        bot.send_message(msg.chat.id, "Please send the subject as text")
            .await?;
        return Ok(());
    };

    bot.send_message(
        msg.chat.id,
        "What topic do you want to master? (e.g. \"fractions\", \"Newton's laws\")",
    )
    .reply_markup(KeyboardRemove::new())
    .await?;

    dialogue
        .update(State::ReceiveTopic {
            grade,
            subject: subject.to_string(),
        })
        .await?;
    Ok(())
}

async fn receive_topic(
    bot: Bot,
    dialogue: QuizDialogue,
    (grade, subject): (String, String),
    msg: Message,
) -> HandlerResult {
    let Some(topic) = msg.text() else {
        bot.send_message(msg.chat.id, "Please send the topic as text")
            .await?;
        return Ok(());
    };

    bot.send_message(
        msg.chat.id,
        "Almost there! Paste one example question from your coursework so I can match its style.",
    )
    .await?;

    dialogue
        .update(State::ReceiveSeedQuestion {
            info: SubjectInfo::new(grade, subject, topic.to_string()),
        })
        .await?;
    Ok(())
}

async fn receive_seed_question(
    engine: Arc<Engine>,
    bot: Bot,
    dialogue: QuizDialogue,
    info: SubjectInfo,
    msg: Message,
) -> HandlerResult {
    let Some(seed_question) = msg.text() else {
        bot.send_message(msg.chat.id, "Please paste the example question as text")
            .await?;
        return Ok(());
    };

    // Generation takes a few seconds; the typing indicator is the loading
    // state the user actually sees. Not worth failing over.
    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

    let mut session = Session::default();
    engine.start(&mut session, info, seed_question).await;

    if session.state != GameState::Quiz {
        // Still in setup; the user retries by sending the seed again.
        let error = session
            .error
            .unwrap_or_else(|| "Something went wrong. Please try again.".to_string());
        bot.send_message(msg.chat.id, error).await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, "Here we go! First question:")
        .await?;
    send_question(&bot, &msg, &session).await?;

    dialogue.update(State::InQuiz { session }).await?;
    Ok(())
}

async fn in_quiz(
    engine: Arc<Engine>,
    bot: Bot,
    dialogue: QuizDialogue,
    mut session: Session,
    msg: Message,
) -> HandlerResult {
    match session.state {
        GameState::Mastery => {
            if msg.text() == Some(RESTART_LABEL) {
                engine.restart(&mut session);
                bot.send_message(msg.chat.id, GREETING_TEXT)
                    .reply_markup(grade_keyboard())
                    .await?;
                dialogue.update(State::ReceiveGrade).await?;
            } else {
                bot.send_message(msg.chat.id, "You've already mastered this one!")
                    .reply_markup(restart_keyboard())
                    .await?;
            }
            return Ok(());
        }
        GameState::Setup => {
            // A quiz dialogue should never hold a setup session; recover by
            // starting over.
            bot.send_message(msg.chat.id, GREETING_TEXT)
                .reply_markup(grade_keyboard())
                .await?;
            dialogue.update(State::ReceiveGrade).await?;
            return Ok(());
        }
        GameState::Quiz => {}
    }

    let answer_index = msg
        .text()
        .and_then(|text| answer_index_for(&session, text));
    let Some(answer_index) = answer_index else {
        bot.send_message(msg.chat.id, "Please pick one of the options")
            .await?;
        send_question(&bot, &msg, &session).await?;
        return Ok(());
    };

    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;

    engine.answer(&mut session, answer_index).await;

    if session.state == GameState::Mastery {
        bot.send_message(msg.chat.id, "✅ Correct!").await?;
        bot.send_message(msg.chat.id, certificate_text(&session))
            .reply_markup(restart_keyboard())
            .await?;
        dialogue.update(State::InQuiz { session }).await?;
        return Ok(());
    }

    if let Some(error) = &session.error {
        // The question and score are untouched; re-offer the same question.
        bot.send_message(msg.chat.id, error.clone()).await?;
        send_question(&bot, &msg, &session).await?;
        dialogue.update(State::InQuiz { session }).await?;
        return Ok(());
    }

    let feedback = match session.last_answer_was_correct {
        Some(true) => "✅ Correct!".to_string(),
        Some(false) => match &session.explanation {
            Some(explanation) => format!("❌ Not quite.\n\n{}", explanation),
            None => "❌ Not quite.".to_string(),
        },
        None => String::new(),
    };
    if !feedback.is_empty() {
        bot.send_message(msg.chat.id, feedback).await?;
    }

    send_question(&bot, &msg, &session).await?;
    dialogue.update(State::InQuiz { session }).await?;
    Ok(())
}

/// Maps a pressed keyboard button (the option's own text) back to its index.
fn answer_index_for(session: &Session, text: &str) -> Option<usize> {
    session
        .current_question
        .as_ref()
        .and_then(|question| question.options.iter().position(|option| option == text))
}

async fn send_question(bot: &Bot, msg: &Message, session: &Session) -> HandlerResult {
    let Some(question) = &session.current_question else {
        return Ok(());
    };

    let numbered_options = question
        .options
        .iter()
        .enumerate()
        .map(|(i, option)| format!("{}. {}", i + 1, option))
        .collect::<Vec<_>>()
        .join("\n");
    let text = format!(
        "{}\n\n{}\n\nScore: {} of {}",
        question.question_text, numbered_options, session.correct_answers_count, MASTERY_THRESHOLD
    );

    let keyboard = KeyboardMarkup::new(
        question
            .options
            .iter()
            .map(|option| vec![KeyboardButton::new(option.clone())])
            .collect::<Vec<_>>(),
    );

    bot.send_message(msg.chat.id, text)
        .reply_markup(keyboard)
        .await?;
    Ok(())
}

fn restart_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![KeyboardButton::new(RESTART_LABEL)]])
}

fn certificate_text(session: &Session) -> String {
    match &session.subject_info {
        Some(info) => format!(
            "🎓 Mastery achieved!\n\nYou answered {} questions about \"{}\" ({}, grade {}) correctly. Great work!",
            MASTERY_THRESHOLD, info.topic, info.subject, info.grade
        ),
        None => "🎓 Mastery achieved! Great work!".to_string(),
    }
}
