//! Prompt templates for the tutor chat pipeline

use crate::llm::ChatMessage;
use crate::retrieval::ExerciseContext;

pub const REWRITE_DIRECT_SYSTEM: &str = "You rewrite a student's latest message into a single, \
self-contained search query for the course's lecture material. Resolve references to earlier \
turns of the conversation. Reply with the query only.";

pub const REWRITE_HYDE_SYSTEM: &str = "You write a short passage, as it could appear on a lecture \
slide or in a lecture transcript, that answers the student's latest message. Reply with the \
passage only.";

pub const TUTOR_SYSTEM: &str = "You are a patient tutor for a university course. Guide the \
student towards understanding instead of handing out complete solutions. Ground your answer in \
the lecture content provided when it is relevant, and say so when it is not.";

pub const SUGGESTIONS_SYSTEM: &str = "You propose follow-up questions a student could ask next. \
Reply with a JSON object of the form {\"suggestions\": [\"...\"]}.";

/// Render the last turns of a conversation as plain text
pub fn transcript(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| {
            let role = match m.role {
                crate::llm::Role::System => "system",
                crate::llm::Role::User => "student",
                crate::llm::Role::Assistant => "tutor",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Describe the exercise the student is working on
pub fn exercise_section(exercise: &ExerciseContext) -> String {
    let mut section = format!("The student is working on the exercise \"{}\".", exercise.title);
    if let Some(language) = &exercise.programming_language {
        section.push_str(&format!(" Programming language: {}.", language));
    }
    if !exercise.problem_statement.is_empty() {
        section.push_str("\nProblem statement:\n");
        section.push_str(&exercise.problem_statement);
    }
    section
}

/// System message for one query-rewrite variant
pub fn rewrite_system(base: &str, content_language: &str, exercise: Option<&ExerciseContext>) -> ChatMessage {
    let mut content = format!("{} Write in {}.", base, content_language);
    if let Some(exercise) = exercise {
        content.push_str("\n\n");
        content.push_str(&exercise_section(exercise));
    }
    ChatMessage::system(content)
}

/// User message for a query rewrite
pub fn rewrite_user(history: &[ChatMessage], latest: &str) -> ChatMessage {
    if history.is_empty() {
        ChatMessage::user(format!("Latest message:\n{}", latest))
    } else {
        ChatMessage::user(format!(
            "Conversation so far:\n{}\n\nLatest message:\n{}",
            transcript(history),
            latest
        ))
    }
}

/// System message for the tutor answer, grounded on retrieved lecture content
pub fn tutor_system(context: &[String], exercise: Option<&ExerciseContext>) -> ChatMessage {
    let mut content = TUTOR_SYSTEM.to_string();
    if let Some(exercise) = exercise {
        content.push_str("\n\n");
        content.push_str(&exercise_section(exercise));
    }
    if !context.is_empty() {
        content.push_str("\n\nLecture content:\n");
        for (i, text) in context.iter().enumerate() {
            content.push_str(&format!("[{}] {}\n", i + 1, text));
        }
    }
    ChatMessage::system(content)
}

/// Prompt for follow-up suggestions
pub fn suggestions(question: &str, answer: &str, count: usize) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!("{} Propose exactly {} questions.", SUGGESTIONS_SYSTEM, count)),
        ChatMessage::user(format!("Student: {}\n\nTutor: {}", question, answer)),
    ]
}
