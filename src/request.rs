use crate::errors::{AppError, AppResult};
use crate::models::{AnalyzeCategorizationRequest, EntryId, QuickCategorizeRequest, TopicId};
use crate::settings::CategorizationOptions;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestScope {
    Entries(Vec<EntryId>),
    AllUncategorized,
}

/// Assembles suggestion-service requests from a user-chosen scope.
///
/// An explicit id list wins over the "all uncategorized" mode. Neither one set
/// is a validation failure raised before any network call.
#[derive(Debug, Clone, Default)]
pub struct ProposalRequestBuilder {
    entry_ids: Vec<EntryId>,
    all_uncategorized: bool,
    topics_to_keep: Vec<TopicId>,
    options: CategorizationOptions,
}

impl ProposalRequestBuilder {
    pub fn new(options: CategorizationOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn entries(mut self, entry_ids: impl IntoIterator<Item = EntryId>) -> Self {
        self.entry_ids = dedup(entry_ids);
        self
    }

    pub fn all_uncategorized(mut self, enabled: bool) -> Self {
        self.all_uncategorized = enabled;
        self
    }

    pub fn topics_to_keep(mut self, topic_ids: impl IntoIterator<Item = TopicId>) -> Self {
        self.topics_to_keep = dedup(topic_ids);
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.options.instructions = Some(instructions.into());
        self
    }

    pub fn scope(&self) -> AppResult<RequestScope> {
        if !self.entry_ids.is_empty() {
            return Ok(RequestScope::Entries(self.entry_ids.clone()));
        }
        if self.all_uncategorized {
            return Ok(RequestScope::AllUncategorized);
        }
        Err(AppError::Validation(
            "Select at least one entry or choose all uncategorized entries".to_string(),
        ))
    }

    pub fn build_quick(&self) -> AppResult<QuickCategorizeRequest> {
        let scope = self.scope()?;
        let options = self.options.clone().validated()?;
        let entry_ids = match scope {
            RequestScope::Entries(ids) => Some(ids),
            RequestScope::AllUncategorized => None,
        };
        Ok(QuickCategorizeRequest {
            min_confidence_threshold: Some(options.min_confidence),
            max_new_topics: Some(options.max_new_topics),
            instructions: options.instructions,
            entry_ids,
        })
    }

    /// Whole-library request; entry scope does not apply.
    pub fn build_analysis(&self) -> AppResult<AnalyzeCategorizationRequest> {
        let options = self.options.clone().validated()?;
        Ok(AnalyzeCategorizationRequest {
            topics_to_keep: self.topics_to_keep.clone(),
            instructions: options.instructions,
        })
    }
}

fn dedup<T: Copy + Eq + std::hash::Hash>(values: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    values.into_iter().filter(|value| seen.insert(*value)).collect()
}
