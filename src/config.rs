use crate::error::ConfigError;
use std::path::PathBuf;

pub const DEFAULT_ONLINE_QUEUE: &str = "images";
pub const DEFAULT_BATCH_QUEUE: &str = "non_online_images";
pub const DEFAULT_PLACEHOLDER_PATH: &str = "public/images/stub_thumb.gif";

/// Which of the two channels a job travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// A consumer is waiting for the result.
    Online,
    /// Background work tolerant of delay.
    Batch,
}

impl QueueKind {
    pub const ALL: [QueueKind; 2] = [QueueKind::Online, QueueKind::Batch];

    pub fn for_owner(online_processing: bool) -> Self {
        if online_processing {
            QueueKind::Online
        } else {
            QueueKind::Batch
        }
    }
}

/// Names shared by every owner type that processes images in background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub online_queue: String,
    pub batch_queue: String,
    pub placeholder: PathBuf,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            online_queue: DEFAULT_ONLINE_QUEUE.into(),
            batch_queue: DEFAULT_BATCH_QUEUE.into(),
            placeholder: PathBuf::from(DEFAULT_PLACEHOLDER_PATH),
        }
    }
}

impl DispatchConfig {
    pub fn new(
        online_queue: impl Into<String>,
        batch_queue: impl Into<String>,
        placeholder: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let config = DispatchConfig {
            online_queue: online_queue.into(),
            batch_queue: batch_queue.into(),
            placeholder: placeholder.into(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.online_queue.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName("online"));
        }
        if self.batch_queue.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName("non-online"));
        }
        if self.online_queue == self.batch_queue {
            return Err(ConfigError::SharedQueue(self.online_queue.clone()));
        }
        Ok(())
    }

    pub fn queue_name(&self, kind: QueueKind) -> &str {
        match kind {
            QueueKind::Online => &self.online_queue,
            QueueKind::Batch => &self.batch_queue,
        }
    }

    /// Online first; the reference server drains in this order.
    pub fn queue_names(&self) -> [&str; 2] {
        [&self.online_queue, &self.batch_queue]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_queue_from_online_flag() {
        let config = DispatchConfig::default();

        assert_eq!(config.queue_name(QueueKind::for_owner(true)), "images");
        assert_eq!(
            config.queue_name(QueueKind::for_owner(false)),
            "non_online_images"
        );
    }

    #[test]
    fn rejects_shared_or_empty_names() {
        assert_eq!(
            DispatchConfig::new("images", "images", "stub.gif"),
            Err(ConfigError::SharedQueue("images".into()))
        );
        assert_eq!(
            DispatchConfig::new("", "batch", "stub.gif"),
            Err(ConfigError::EmptyQueueName("online"))
        );
    }
}
