//! The TOEIC backend: wire models, the operation catalog and client-side
//! helpers over fetched data.

mod catalog;
pub mod exam;
pub mod list;
pub mod models;

use serde_json::{Value, json};

use crate::transport::mock::MockTransport;

pub use catalog::{catalog, ops};
pub use models::{
    Category, ExamAnalysis, Flashcard, GroupedPart, NewFlashcard, PartAccuracy, Question, QuestionGroup, Test,
    TestPart, TestResult, VocabularyWord,
};

/// An in-memory backend seeded with a small sample data set, serving every
/// route in [`catalog`].
#[must_use]
pub fn sample_backend() -> MockTransport {
    MockTransport::new()
        .with_collection(
            "categories",
            vec![
                json!({"id": 1, "name": "Office", "description": "Workplace vocabulary"}),
                json!({"id": 2, "name": "Travel"}),
            ],
        )
        .with_collection(
            "flashcards",
            vec![
                flashcard(1, "invoice", "a list of goods and their prices", 1),
                flashcard(2, "itinerary", "a planned route of a journey", 2),
                flashcard(3, "ledger", "a book of financial accounts", 1),
            ],
        )
        .with_collection(
            "vocabulary",
            vec![
                json!({"id": 1, "word": "procure", "meaning": "obtain", "partOfSpeech": "verb", "categoryId": 1}),
                json!({"id": 2, "word": "layover", "meaning": "a short stay between flights", "categoryId": 2}),
            ],
        )
        .with_collection(
            "tests",
            vec![json!({"id": 1, "title": "Practice Test 1", "durationMinutes": 120, "questionCount": 4})],
        )
        .with_collection(
            "tests/1/parts",
            vec![
                json!({
                    "id": 1,
                    "partNumber": 5,
                    "title": "Incomplete Sentences",
                    "questions": [
                        {"id": 1, "number": 101, "content": "The report is ___ on Friday.",
                         "options": ["due", "dues", "duly", "dueing"]}
                    ]
                }),
                json!({
                    "id": 2,
                    "partNumber": 7,
                    "title": "Reading Comprehension",
                    "questions": [
                        {"id": 2, "number": 147, "content": "What is the memo about?",
                         "options": ["A", "B", "C", "D"], "groupId": 1, "passage": "Memo: office move"},
                        {"id": 3, "number": 148, "content": "When is the move?",
                         "options": ["A", "B", "C", "D"], "groupId": 1},
                        {"id": 4, "number": 149, "content": "Who signed the notice?",
                         "options": ["A", "B", "C", "D"]}
                    ]
                }),
            ],
        )
        .with_collection("results", Vec::new())
        .with_document(
            "analysis",
            json!({
                "listeningScore": 385,
                "readingScore": 340,
                "weakSkills": ["inference", "vocabulary in context"],
                "accuracyByPart": [{"partNumber": 5, "accuracy": 0.82}, {"partNumber": 7, "accuracy": 0.64}]
            }),
        )
        .with_document(
            "study-plan",
            json!({"weeks": [{"week": 1, "focus": "Part 7 inference questions"}]}),
        )
}

fn flashcard(id: u64, word: &str, definition: &str, category_id: u64) -> Value {
    json!({
        "id": id,
        "word": word,
        "definition": definition,
        "categoryId": category_id,
        "mastered": false,
        "createdAt": format!("2024-03-0{id}T09:00:00Z"),
    })
}
