//! Transport engine configuration container.

use core::time::Duration;

/// Configuration for a [`crate::TransportProtocolManager`].
///
/// All values are read-only during operation.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum number of concurrently active sessions (transmit and receive
    /// combined).
    pub max_sessions: usize,
    /// Largest number of data frames a single session may emit per
    /// `update()` call.
    pub frames_per_update: u8,
    /// Minimum spacing between the frames of a broadcast session.
    pub min_bam_frame_interval: Duration,
    /// Largest packet window granted by a single Clear To Send, and the
    /// window limit advertised in emitted Request To Send frames.
    ///
    /// ISO 11783-3 recommends 16; values up to 255 are allowed.
    pub cts_packet_count_max: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            frames_per_update: 255,
            min_bam_frame_interval: Duration::from_millis(50),
            cts_packet_count_max: 16,
        }
    }
}

impl TransportConfig {
    /// Reject configurations that would wedge the engine.
    #[allow(clippy::result_unit_err)]
    pub fn validate(&self) -> Result<(), ()> {
        if self.max_sessions == 0 {
            return Err(());
        }
        if self.frames_per_update == 0 {
            return Err(());
        }
        if self.cts_packet_count_max == 0 {
            return Err(());
        }
        Ok(())
    }
}
