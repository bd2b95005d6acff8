//! Dispatcher configuration

/// Channel sizing for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Capacity of the subscribe/unsubscribe mailbox
    pub command_capacity: usize,

    /// Capacity of the channel shared by all readers
    ///
    /// Readers block when it is full, which throttles ingestion from the
    /// log while fan-out catches up.
    pub record_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            command_capacity: 10,
            record_capacity: 50,
        }
    }
}

impl DispatchConfig {
    /// Set the command mailbox capacity
    pub fn command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }

    /// Set the record channel capacity
    pub fn record_capacity(mut self, capacity: usize) -> Self {
        self.record_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();

        assert_eq!(config.command_capacity, 10);
        assert_eq!(config.record_capacity, 50);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let config = DispatchConfig::default()
            .command_capacity(0)
            .record_capacity(0);

        assert_eq!(config.command_capacity, 1);
        assert_eq!(config.record_capacity, 1);
    }
}
