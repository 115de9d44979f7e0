//! Regrouping test parts for rendering.

use std::collections::HashMap;

use super::models::{GroupedPart, Question, QuestionGroup, TestPart};

/// Turns the backend's flat parts into parts of question groups.
///
/// Parts are ordered by part number and questions by question number.
/// Questions that share a `group_id` form one group, placed where its
/// lowest-numbered question falls; the group's passage is the first one any
/// of its questions carries. Questions without a group stand alone.
#[must_use]
pub fn group_questions(parts: Vec<TestPart>) -> Vec<GroupedPart> {
    let mut parts = parts;
    parts.sort_by_key(|part| (part.part_number, part.id));
    parts.into_iter().map(group_part).collect()
}

fn group_part(part: TestPart) -> GroupedPart {
    let TestPart {
        id,
        part_number,
        title,
        mut questions,
    } = part;
    questions.sort_by_key(|question| (question.number, question.id));

    let mut groups: Vec<QuestionGroup> = Vec::new();
    let mut positions: HashMap<u64, usize> = HashMap::new();

    for question in questions {
        match question.group_id {
            Some(group_id) => {
                if let Some(&index) = positions.get(&group_id) {
                    let group = &mut groups[index];
                    if group.passage.is_none() {
                        group.passage.clone_from(&question.passage);
                    }
                    group.questions.push(question);
                } else {
                    positions.insert(group_id, groups.len());
                    groups.push(QuestionGroup {
                        id: Some(group_id),
                        passage: question.passage.clone(),
                        questions: vec![question],
                    });
                }
            }
            None => groups.push(standalone(question)),
        }
    }

    GroupedPart {
        id,
        part_number,
        title,
        groups,
    }
}

fn standalone(question: Question) -> QuestionGroup {
    QuestionGroup {
        id: None,
        passage: question.passage.clone(),
        questions: vec![question],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: u64, number: u32, group_id: Option<u64>, passage: Option<&str>) -> Question {
        Question {
            id,
            number,
            content: format!("Question {number}"),
            options: vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()],
            group_id,
            passage: passage.map(str::to_string),
            image_url: None,
        }
    }

    fn part(id: u64, part_number: u8, questions: Vec<Question>) -> TestPart {
        TestPart {
            id,
            part_number,
            title: format!("Part {part_number}"),
            questions,
        }
    }

    #[test]
    fn test_groups_share_passage_and_keep_order() {
        let parts = vec![part(
            7,
            7,
            vec![
                question(4, 150, Some(20), None),
                question(1, 147, Some(10), Some("Memo to staff")),
                question(3, 149, Some(20), Some("Advertisement")),
                question(2, 148, Some(10), None),
                question(5, 151, None, None),
            ],
        )];

        let grouped = group_questions(parts);
        assert_eq!(grouped.len(), 1);
        let groups = &grouped[0].groups;
        assert_eq!(groups.len(), 3);

        assert_eq!(groups[0].id, Some(10));
        assert_eq!(groups[0].passage.as_deref(), Some("Memo to staff"));
        let numbers: Vec<u32> = groups[0].questions.iter().map(|q| q.number).collect();
        assert_eq!(numbers, vec![147, 148]);

        assert_eq!(groups[1].id, Some(20));
        assert_eq!(groups[1].passage.as_deref(), Some("Advertisement"));

        assert_eq!(groups[2].id, None);
        assert_eq!(groups[2].questions.len(), 1);
        assert_eq!(grouped[0].question_count(), 5);
    }

    #[test]
    fn test_parts_sorted_by_number() {
        let parts = vec![
            part(2, 5, vec![question(2, 101, None, None)]),
            part(1, 1, vec![question(1, 1, None, None)]),
            part(3, 3, vec![]),
        ];
        let numbers: Vec<u8> = group_questions(parts).iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 3, 5]);
    }

    #[test]
    fn test_empty_input() {
        assert!(group_questions(Vec::new()).is_empty());
    }
}
