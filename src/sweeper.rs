use crate::errors::{AppError, AppResult};
use crate::models::{Topic, TopicId, TopicRef};
use crate::services::PersistenceService;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmptyTopicCandidate {
    pub topic: Topic,
    /// Deletion checkbox; starts unchecked.
    pub marked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopicDeletionFailure {
    pub topic_id: TopicId,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub deleted: Vec<TopicId>,
    pub failed: Vec<TopicDeletionFailure>,
}

/// Real topics whose reported entry count is zero. Pseudo-topics never qualify,
/// and a topic without a count is not assumed empty.
pub fn empty_topics(topics: &[TopicRef]) -> Vec<Topic> {
    topics
        .iter()
        .filter_map(|topic| match topic {
            TopicRef::Real(topic) if topic.entry_count == Some(0) => Some(topic.clone()),
            TopicRef::Real(_) | TopicRef::Uncategorized | TopicRef::AllTopics => None,
        })
        .collect()
}

/// Offers deletion of topics a reorganization left empty.
pub struct EmptyTopicSweeper {
    persistence: Arc<dyn PersistenceService>,
    candidates: Vec<EmptyTopicCandidate>,
}

impl EmptyTopicSweeper {
    /// Re-fetches topics and collects the empty ones.
    pub async fn scan(persistence: Arc<dyn PersistenceService>) -> AppResult<Self> {
        let topics = persistence.get_topics().await?;
        let candidates = empty_topics(&topics)
            .into_iter()
            .map(|topic| EmptyTopicCandidate { topic, marked: false })
            .collect::<Vec<_>>();
        tracing::info!(empty_topics = candidates.len(), "empty topic scan finished");
        Ok(Self {
            persistence,
            candidates,
        })
    }

    pub fn candidates(&self) -> &[EmptyTopicCandidate] {
        &self.candidates
    }

    pub fn set_marked(&mut self, topic_id: TopicId, marked: bool) -> AppResult<()> {
        let candidate = self
            .candidates
            .iter_mut()
            .find(|candidate| candidate.topic.id == topic_id)
            .ok_or_else(|| AppError::NotFound(format!("topic {} is not an empty-topic candidate", topic_id)))?;
        candidate.marked = marked;
        Ok(())
    }

    pub fn toggle(&mut self, topic_id: TopicId) -> AppResult<bool> {
        let marked = self
            .candidates
            .iter()
            .find(|candidate| candidate.topic.id == topic_id)
            .map(|candidate| !candidate.marked)
            .ok_or_else(|| AppError::NotFound(format!("topic {} is not an empty-topic candidate", topic_id)))?;
        self.set_marked(topic_id, marked)?;
        Ok(marked)
    }

    /// Deletes only the checked candidates. Deleted ones leave the list.
    pub async fn delete_marked(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        for candidate in self.candidates.iter().filter(|candidate| candidate.marked) {
            let topic_id = candidate.topic.id;
            match self.persistence.delete_topic(topic_id).await {
                Ok(()) => {
                    tracing::info!(topic_id, name = %candidate.topic.name, "deleted empty topic");
                    report.deleted.push(topic_id);
                }
                Err(error) => {
                    tracing::warn!(topic_id, error = %error, "empty topic deletion failed");
                    report.failed.push(TopicDeletionFailure {
                        topic_id,
                        message: error.to_string(),
                    });
                }
            }
        }
        self.candidates
            .retain(|candidate| !report.deleted.contains(&candidate.topic.id));
        report
    }
}
