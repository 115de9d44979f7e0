//! Client-side filtering, sorting and pagination of fetched lists.
//!
//! The backend returns whole lists; narrowing them to what one screen shows
//! happens here, on data already in the cache.

use std::cmp::Ordering;

use super::models::{Flashcard, VocabularyWord};

/// An item that can be searched and filtered by category.
pub trait Listable {
    /// Case-insensitive match against the item's searchable text.
    fn matches(&self, needle: &str) -> bool;

    fn category_id(&self) -> Option<u64>;

    /// Ordering under `key`.
    fn compare(&self, other: &Self, key: SortKey) -> Ordering;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Id,
    Word,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// What one list view shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub search: Option<String>,
    pub category_id: Option<u64>,
    pub sort: SortKey,
    pub direction: Direction,
    /// 1-based.
    pub page: usize,
    /// `0` shows everything on one page.
    pub per_page: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            search: None,
            category_id: None,
            sort: SortKey::default(),
            direction: Direction::default(),
            page: 1,
            per_page: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// The page actually shown, after clamping.
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl<T> Page<T> {
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    #[must_use]
    pub const fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// Items matching `query`'s search text and category.
pub fn filter<'a, T: Listable>(items: &'a [T], query: &ListQuery) -> Vec<&'a T> {
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    items
        .iter()
        .filter(|item| query.category_id.is_none_or(|id| item.category_id() == Some(id)))
        .filter(|item| needle.as_deref().is_none_or(|needle| item.matches(needle)))
        .collect()
}

/// Stable sort under `key` and `direction`.
pub fn sort<T: Listable>(items: &mut [&T], key: SortKey, direction: Direction) {
    items.sort_by(|a, b| {
        let ordering = a.compare(b, key);
        match direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    });
}

/// Cuts page `page` (1-based) out of `items`. Out-of-range pages are
/// clamped to the nearest valid one; an empty list is one empty page.
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Page<T> {
    let total_items = items.len();
    if per_page == 0 {
        return Page {
            items: items.to_vec(),
            page: 1,
            total_pages: 1,
            total_items,
        };
    }

    let total_pages = total_items.div_ceil(per_page).max(1);
    let page = page.clamp(1, total_pages);
    let items = items
        .iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .cloned()
        .collect();

    Page {
        items,
        page,
        total_pages,
        total_items,
    }
}

/// Filters, sorts and paginates in one pass.
pub fn apply<T: Listable + Clone>(items: &[T], query: &ListQuery) -> Page<T> {
    let mut selected = filter(items, query);
    sort(&mut selected, query.sort, query.direction);
    let selected: Vec<T> = selected.into_iter().cloned().collect();
    paginate(&selected, query.page, query.per_page)
}

fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

impl Listable for Flashcard {
    fn matches(&self, needle: &str) -> bool {
        contains(&self.word, needle)
            || contains(&self.definition, needle)
            || self.example.as_deref().is_some_and(|example| contains(example, needle))
    }

    fn category_id(&self) -> Option<u64> {
        self.category_id
    }

    fn compare(&self, other: &Self, key: SortKey) -> Ordering {
        match key {
            SortKey::Id => self.id.cmp(&other.id),
            SortKey::Word => self
                .word
                .to_lowercase()
                .cmp(&other.word.to_lowercase())
                .then(self.id.cmp(&other.id)),
            // Cards without a timestamp sort first.
            SortKey::CreatedAt => self.created_at.cmp(&other.created_at).then(self.id.cmp(&other.id)),
        }
    }
}

impl Listable for VocabularyWord {
    fn matches(&self, needle: &str) -> bool {
        contains(&self.word, needle) || contains(&self.meaning, needle)
    }

    fn category_id(&self) -> Option<u64> {
        self.category_id
    }

    fn compare(&self, other: &Self, key: SortKey) -> Ordering {
        match key {
            SortKey::Id | SortKey::CreatedAt => self.id.cmp(&other.id),
            SortKey::Word => self
                .word
                .to_lowercase()
                .cmp(&other.word.to_lowercase())
                .then(self.id.cmp(&other.id)),
        }
    }
}
