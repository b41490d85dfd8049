//! Topic stage builder
//!
//! Splits a chapter's topics into bounded, single-kind stages. Stage ids only
//! depend on topic ids and per-topic item counts, so progress rows stored
//! under an id stay valid when the same chapter is fetched again.

use crate::models::{MicroLesson, Quiz, Topic};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_CHUNK_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Microlesson,
    Quiz,
}

impl StageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageType::Microlesson => "microlesson",
            StageType::Quiz => "quiz",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStage {
    pub stage_id: String,
    pub source_topic_id: String,
    pub source_topic_order: i64,
    pub stage_order: usize,
    pub stage_type: StageType,
    /// 1-based position among the topic's stages of the same type
    pub stage_index_within_type: usize,
    pub microlessons: Vec<MicroLesson>,
    pub quizzes: Vec<Quiz>,
}

impl TopicStage {
    pub fn item_count(&self) -> usize {
        self.microlessons.len() + self.quizzes.len()
    }
}

pub fn stage_id(topic_id: &str, stage_type: StageType, index_within_type: usize) -> String {
    format!("{}:{}:{}", topic_id, stage_type, index_within_type)
}

/// Build the ordered stage list for a chapter.
///
/// A `chunk_size` of 0 puts every item of a kind into a single stage.
pub fn build_stages(topics: &[Topic], chunk_size: usize) -> Vec<TopicStage> {
    let mut ordered: Vec<&Topic> = topics.iter().collect();
    ordered.sort_by_key(|topic| topic.topic_order);

    let mut stages = Vec::new();
    for topic in ordered {
        for (index, items) in chunk(&topic.microlessons, chunk_size).enumerate() {
            let index_within_type = index + 1;
            stages.push(TopicStage {
                stage_id: stage_id(&topic.topic_id, StageType::Microlesson, index_within_type),
                source_topic_id: topic.topic_id.clone(),
                source_topic_order: topic.topic_order,
                stage_order: stages.len(),
                stage_type: StageType::Microlesson,
                stage_index_within_type: index_within_type,
                microlessons: items.to_vec(),
                quizzes: Vec::new(),
            });
        }

        for (index, items) in chunk(&topic.quizzes, chunk_size).enumerate() {
            let index_within_type = index + 1;
            stages.push(TopicStage {
                stage_id: stage_id(&topic.topic_id, StageType::Quiz, index_within_type),
                source_topic_id: topic.topic_id.clone(),
                source_topic_order: topic.topic_order,
                stage_order: stages.len(),
                stage_type: StageType::Quiz,
                stage_index_within_type: index_within_type,
                microlessons: Vec::new(),
                quizzes: items.to_vec(),
            });
        }
    }

    stages
}

fn chunk<T>(items: &[T], size: usize) -> impl Iterator<Item = &[T]> {
    let size = if size == 0 { items.len().max(1) } else { size };
    items.chunks(size).filter(|group| !group.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lesson(id: &str) -> MicroLesson {
        MicroLesson {
            id: id.to_string(),
            order: 0,
            title: id.to_string(),
            content: vec![],
        }
    }

    fn quiz(id: &str) -> Quiz {
        Quiz {
            id: id.to_string(),
            question: format!("{}?", id),
            options: vec!["a".into(), "b".into()],
            correct: 0,
            explanation: None,
        }
    }

    fn topic(id: &str, order: i64, lessons: usize, quizzes: usize) -> Topic {
        Topic {
            topic_id: id.to_string(),
            topic_order: order,
            topic_name: None,
            microlessons: (0..lessons).map(|i| lesson(&format!("{}-m{}", id, i))).collect(),
            quizzes: (0..quizzes).map(|i| quiz(&format!("{}-q{}", id, i))).collect(),
        }
    }

    #[test]
    fn test_two_topic_chapter() {
        let topics = vec![topic("T1", 1, 3, 2), topic("T2", 2, 1, 0)];
        let stages = build_stages(&topics, 5);

        assert_eq!(stages.len(), 3);

        assert_eq!(stages[0].stage_id, "T1:microlesson:1");
        assert_eq!(stages[0].microlessons.len(), 3);
        assert_eq!(stages[0].stage_order, 0);

        assert_eq!(stages[1].stage_id, "T1:quiz:1");
        assert_eq!(stages[1].quizzes.len(), 2);
        assert_eq!(stages[1].stage_order, 1);

        assert_eq!(stages[2].stage_id, "T2:microlesson:1");
        assert_eq!(stages[2].microlessons.len(), 1);
        assert_eq!(stages[2].stage_order, 2);
    }

    #[test]
    fn test_topics_are_ordered_before_chunking() {
        let topics = vec![topic("late", 9, 1, 0), topic("early", 1, 0, 1)];
        let stages = build_stages(&topics, 5);

        assert_eq!(stages[0].source_topic_id, "early");
        assert_eq!(stages[0].stage_type, StageType::Quiz);
        assert_eq!(stages[1].source_topic_id, "late");
    }

    #[test]
    fn test_long_lists_split_into_bounded_stages() {
        let stages = build_stages(&[topic("T1", 1, 12, 6)], 5);
        let sizes: Vec<usize> = stages.iter().map(TopicStage::item_count).collect();
        assert_eq!(sizes, vec![5, 5, 2, 5, 1]);
        assert_eq!(stages[2].stage_id, "T1:microlesson:3");
        assert_eq!(stages[4].stage_id, "T1:quiz:2");
    }

    #[test]
    fn test_empty_topic_contributes_nothing() {
        let stages = build_stages(&[topic("empty", 1, 0, 0), topic("T2", 2, 1, 1)], 5);
        assert_eq!(stages.len(), 2);
        assert!(stages.iter().all(|s| s.source_topic_id == "T2"));
        assert_eq!(stages[0].stage_order, 0);
    }

    #[test]
    fn test_zero_chunk_size_means_one_stage_per_kind() {
        let stages = build_stages(&[topic("T1", 1, 7, 3)], 0);
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].microlessons.len(), 7);
        assert_eq!(stages[1].quizzes.len(), 3);
    }

    fn topics_strategy() -> impl Strategy<Value = Vec<Topic>> {
        prop::collection::vec((0i64..6, 0usize..13, 0usize..13), 0..6).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (order, lessons, quizzes))| {
                    topic(&format!("T{}", i), order, lessons, quizzes)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_every_item_lands_in_exactly_one_stage(
            topics in topics_strategy(),
            chunk_size in 1usize..8,
        ) {
            let stages = build_stages(&topics, chunk_size);

            let mut lesson_ids: Vec<String> = stages
                .iter()
                .flat_map(|s| s.microlessons.iter().map(|m| m.id.clone()))
                .collect();
            let mut quiz_ids: Vec<String> = stages
                .iter()
                .flat_map(|s| s.quizzes.iter().map(|q| q.id.clone()))
                .collect();

            let mut expected_lessons: Vec<String> = topics
                .iter()
                .flat_map(|t| t.microlessons.iter().map(|m| m.id.clone()))
                .collect();
            let mut expected_quizzes: Vec<String> = topics
                .iter()
                .flat_map(|t| t.quizzes.iter().map(|q| q.id.clone()))
                .collect();

            lesson_ids.sort();
            quiz_ids.sort();
            expected_lessons.sort();
            expected_quizzes.sort();
            prop_assert_eq!(lesson_ids, expected_lessons);
            prop_assert_eq!(quiz_ids, expected_quizzes);

            for stage in &stages {
                prop_assert!(stage.item_count() >= 1);
                prop_assert!(stage.item_count() <= chunk_size);
                // Never mixes kinds
                prop_assert!(stage.microlessons.is_empty() || stage.quizzes.is_empty());
            }
        }

        #[test]
        fn prop_stage_order_is_dense(topics in topics_strategy(), chunk_size in 1usize..8) {
            let stages = build_stages(&topics, chunk_size);
            for (expected, stage) in stages.iter().enumerate() {
                prop_assert_eq!(stage.stage_order, expected);
            }
        }

        #[test]
        fn prop_items_keep_source_order(topics in topics_strategy(), chunk_size in 1usize..8) {
            let stages = build_stages(&topics, chunk_size);
            for source in &topics {
                let rebuilt: Vec<String> = stages
                    .iter()
                    .filter(|s| s.source_topic_id == source.topic_id)
                    .flat_map(|s| s.microlessons.iter().map(|m| m.id.clone()))
                    .collect();
                let original: Vec<String> =
                    source.microlessons.iter().map(|m| m.id.clone()).collect();
                prop_assert_eq!(rebuilt, original);
            }
        }

        #[test]
        fn prop_stage_ids_are_stable(topics in topics_strategy(), chunk_size in 1usize..8) {
            let first: Vec<String> =
                build_stages(&topics, chunk_size).into_iter().map(|s| s.stage_id).collect();
            let second: Vec<String> =
                build_stages(&topics, chunk_size).into_iter().map(|s| s.stage_id).collect();
            prop_assert_eq!(first, second);
        }
    }
}
