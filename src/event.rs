//! CodeCommit trigger events

use serde::Deserialize;
use tracing::warn;

use crate::error::{MirrorError, Result};

/// Index of the resource name within `arn:partition:service:region:account:resource`
const ARN_RESOURCE_INDEX: usize = 5;

/// Change notification delivered by the event dispatcher
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodeCommitEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<CodeCommitRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeCommitRecord {
    #[serde(rename = "eventSourceARN", default)]
    pub event_source_arn: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub aws_region: Option<String>,
}

impl CodeCommitEvent {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| MirrorError::InvalidEvent(format!("malformed event JSON: {}", e)))
    }

    /// Repository named by the event.
    ///
    /// Every record must carry a resolvable ARN. When records disagree the
    /// last one wins.
    pub fn repository_name(&self) -> Result<String> {
        let mut repository: Option<String> = None;

        for record in &self.records {
            let name = record.repository_name()?;
            if let Some(previous) = &repository {
                if previous != &name {
                    warn!(previous = %previous, next = %name, "event records name different repositories");
                }
            }
            repository = Some(name);
        }

        repository.ok_or_else(|| MirrorError::InvalidEvent("event has no records".to_string()))
    }
}

impl CodeCommitRecord {
    pub fn repository_name(&self) -> Result<String> {
        repository_from_arn(&self.event_source_arn)
    }
}

/// Extract the repository from `arn:aws:codecommit:<region>:<account>:<repo>`
pub fn repository_from_arn(arn: &str) -> Result<String> {
    if arn.is_empty() {
        return Err(MirrorError::InvalidEvent(
            "could not resolve repository, source ARN is empty".to_string(),
        ));
    }

    let name = arn
        .split(':')
        .nth(ARN_RESOURCE_INDEX)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| MirrorError::InvalidEvent(format!("malformed source ARN {:?}", arn)))?;

    Ok(name.to_string())
}
