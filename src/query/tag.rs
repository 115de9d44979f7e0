use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Invalidation label attached to query results.
///
/// The set is closed: a mutation can only invalidate tags that exist, so a
/// misspelt tag is a compile error rather than a silent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tag {
    Category,
    Flashcard,
    Vocabulary,
    Test,
    Question,
    TestResult,
    Analysis,
    StudyPlan,
}

/// Ordered set of tags.
pub type TagSet = BTreeSet<Tag>;

impl Tag {
    pub const ALL: [Self; 8] = [
        Self::Category,
        Self::Flashcard,
        Self::Vocabulary,
        Self::Test,
        Self::Question,
        Self::TestResult,
        Self::Analysis,
        Self::StudyPlan,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Category => "Category",
            Self::Flashcard => "Flashcard",
            Self::Vocabulary => "Vocabulary",
            Self::Test => "Test",
            Self::Question => "Question",
            Self::TestResult => "TestResult",
            Self::Analysis => "Analysis",
            Self::StudyPlan => "StudyPlan",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
