//! Every operation the application issues, with its tags.

use crate::query::{Operation, Registry, RegistryError, Tag};
use crate::transport::Method;

/// Operation names.
pub mod ops {
    pub const GET_CATEGORIES: &str = "getCategories";
    pub const CREATE_CATEGORY: &str = "createCategory";
    pub const DELETE_CATEGORY: &str = "deleteCategory";

    pub const GET_FLASHCARDS: &str = "getFlashcards";
    pub const GET_FLASHCARD: &str = "getFlashcard";
    pub const CREATE_FLASHCARD: &str = "createFlashcard";
    pub const UPDATE_FLASHCARD: &str = "updateFlashcard";
    pub const DELETE_FLASHCARD: &str = "deleteFlashcard";

    pub const GET_VOCABULARY: &str = "getVocabulary";

    pub const GET_TESTS: &str = "getTests";
    pub const GET_TEST_PARTS: &str = "getTestParts";
    pub const SUBMIT_TEST: &str = "submitTest";
    pub const GET_TEST_RESULTS: &str = "getTestResults";

    pub const GET_EXAM_ANALYSIS: &str = "getExamAnalysis";
    pub const GET_STUDY_PLAN: &str = "getStudyPlan";
}

/// Builds the registry of the TOEIC backend.
///
/// # Errors
///
/// Fails only if an operation below is declared inconsistently.
pub fn catalog() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();

    for operation in [
        // Categories
        Operation::query(ops::GET_CATEGORIES, "/categories").provides([Tag::Category]),
        Operation::mutation(ops::CREATE_CATEGORY, Method::Post, "/categories")
            .invalidates([Tag::Category])
            .require("name"),
        // Deleting a category orphans its cards.
        Operation::mutation(ops::DELETE_CATEGORY, Method::Delete, "/categories/{id}")
            .invalidates([Tag::Category, Tag::Flashcard]),
        // Flashcards
        Operation::query(ops::GET_FLASHCARDS, "/flashcards").provides([Tag::Flashcard]),
        Operation::query(ops::GET_FLASHCARD, "/flashcards/{id}").provides([Tag::Flashcard]),
        Operation::mutation(ops::CREATE_FLASHCARD, Method::Post, "/flashcards")
            .invalidates([Tag::Flashcard])
            .require("word")
            .require("definition"),
        Operation::mutation(ops::UPDATE_FLASHCARD, Method::Patch, "/flashcards/{id}").invalidates([Tag::Flashcard]),
        Operation::mutation(ops::DELETE_FLASHCARD, Method::Delete, "/flashcards/{id}").invalidates([Tag::Flashcard]),
        // Vocabulary
        Operation::query(ops::GET_VOCABULARY, "/vocabulary").provides([Tag::Vocabulary]),
        // Tests
        Operation::query(ops::GET_TESTS, "/tests").provides([Tag::Test]),
        Operation::query(ops::GET_TEST_PARTS, "/tests/{testId}/parts").provides([Tag::Test, Tag::Question]),
        Operation::mutation(ops::SUBMIT_TEST, Method::Post, "/results")
            .invalidates([Tag::TestResult, Tag::Analysis, Tag::StudyPlan])
            .require("testId")
            .require("answers"),
        Operation::query(ops::GET_TEST_RESULTS, "/results").provides([Tag::TestResult]),
        // Analysis
        Operation::query(ops::GET_EXAM_ANALYSIS, "/analysis").provides([Tag::Analysis]),
        Operation::query(ops::GET_STUDY_PLAN, "/study-plan").provides([Tag::StudyPlan]),
    ] {
        registry.register(operation)?;
    }

    Ok(registry)
}
