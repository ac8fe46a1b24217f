//! Accumulates an ordered command list with an atomicity flag and optional
//! WATCH set.

use valkey_protocol::Command;

use crate::errors::{ClientError, Result};
use crate::router::RoutingHint;

/// A fluent accumulator for an ordered command list. `atomic` is fixed at
/// construction via [`Batch::atomic`]/[`Batch::pipeline`].
#[derive(Debug, Clone)]
pub struct Batch {
    commands: Vec<Command>,
    atomic: bool,
    watch_keys: Vec<Vec<u8>>,
}

impl Batch {
    /// Starts an atomic batch (MULTI/EXEC transaction).
    pub fn atomic() -> Batch {
        Batch { commands: Vec::new(), atomic: true, watch_keys: Vec::new() }
    }

    /// Starts a non-atomic batch (pipeline).
    pub fn pipeline() -> Batch {
        Batch { commands: Vec::new(), atomic: false, watch_keys: Vec::new() }
    }

    /// Appends a command, returning `self` for chaining.
    pub fn add(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Declares a key to `WATCH` before `MULTI` (atomic batches only; all
    /// watched keys must hash-tag to the batch's slot).
    pub fn watch(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.watch_keys.push(key.into());
        self
    }

    /// `true` if this batch is a MULTI/EXEC transaction.
    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    /// The accumulated commands, in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// The declared WATCH keys, in order.
    pub fn watch_keys(&self) -> &[Vec<u8>] {
        &self.watch_keys
    }

    /// Validates the batch is non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.commands.is_empty() {
            return Err(ClientError::EmptyBatch);
        }
        Ok(())
    }
}

/// Retry knobs for a non-atomic batch. Atomic batches must leave both
/// `false` — the engine rejects otherwise with `InvalidConfig`, since
/// retrying a MULTI/EXEC envelope cannot preserve WATCH semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryStrategy {
    /// Retry on server errors in the redirection/retry table.
    pub retry_server_error: bool,
    /// Retry on connection failures.
    pub retry_connection_error: bool,
}

/// Options accepted by `execute_batch`.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Upper bound on the per-attempt deadline, in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Explicit routing (atomic batches only: must resolve to a single
    /// node matching the batch's computed slot).
    pub route: Option<RoutingHint>,
    /// Non-atomic-only retry configuration.
    pub retry_strategy: RetryStrategy,
    /// If `true`, the first per-command server error in the result array
    /// terminates the call instead of being embedded as a value.
    pub raise_on_error: bool,
}

impl BatchOptions {
    /// Validates option combinations that are only legal for one kind of
    /// batch.
    pub fn validate_for(&self, atomic: bool) -> Result<()> {
        if atomic && (self.retry_strategy.retry_server_error || self.retry_strategy.retry_connection_error) {
            return Err(ClientError::InvalidConfig(
                "retry_strategy is not configurable for atomic batches".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch_fails_validation() {
        assert!(matches!(Batch::atomic().validate(), Err(ClientError::EmptyBatch)));
    }

    #[test]
    fn non_empty_batch_validates() {
        let batch = Batch::pipeline().add(Command::new("PING").build().unwrap());
        assert!(batch.validate().is_ok());
    }

    #[test]
    fn retry_strategy_on_atomic_batch_is_rejected() {
        let opts = BatchOptions {
            retry_strategy: RetryStrategy { retry_server_error: true, retry_connection_error: false },
            ..Default::default()
        };
        assert!(opts.validate_for(true).is_err());
        assert!(opts.validate_for(false).is_ok());
    }
}
