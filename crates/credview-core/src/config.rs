// ── Runtime view configuration ──
//
// Tuning knobs for a `CredentialsView`. Built by the caller (usually
// from credview-config) and handed in -- core never reads config files.

use std::time::Duration;

use crate::error::CoreError;

/// Configuration for a single credentials view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewConfig {
    /// Capacity of the command channel feeding the view loop.
    pub command_buffer: usize,
    /// Capacity of the problem broadcast channel.
    pub event_buffer: usize,
    /// How long an acknowledged delete may wait for its confirming
    /// `CredentialsDeleted` notification before it is marked failed.
    pub confirmation_timeout: Duration,
    /// How often pending confirmations are checked.
    pub sweep_interval: Duration,
    /// Stamp mutations with sequence numbers so that late refreshes
    /// cannot resurrect deleted rows. `false` gives last-completed-wins.
    pub sequenced_refresh: bool,
    /// Append `CredentialsStored` targets missing from the registry
    /// snapshot instead of dropping the event.
    pub accept_unregistered_stored: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            event_buffer: 256,
            confirmation_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            sequenced_refresh: true,
            accept_unregistered_stored: false,
        }
    }
}

impl ViewConfig {
    /// Reject values the runtime channels and timers cannot work with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.command_buffer == 0 {
            return Err(CoreError::Config {
                message: "command_buffer must be greater than zero".into(),
            });
        }
        if self.event_buffer == 0 {
            return Err(CoreError::Config {
                message: "event_buffer must be greater than zero".into(),
            });
        }
        if self.confirmation_timeout.is_zero() {
            return Err(CoreError::Config {
                message: "confirmation_timeout must be greater than zero".into(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(CoreError::Config {
                message: "sweep_interval must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ViewConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_buffers_are_rejected() {
        let cfg = ViewConfig {
            command_buffer: 0,
            ..ViewConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CoreError::Config { .. })));

        let cfg = ViewConfig {
            sweep_interval: Duration::ZERO,
            ..ViewConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn zero_confirmation_timeout_is_rejected() {
        let cfg = ViewConfig {
            confirmation_timeout: Duration::ZERO,
            ..ViewConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(CoreError::Config { message }) if message.contains("confirmation_timeout")
        ));
    }
}
