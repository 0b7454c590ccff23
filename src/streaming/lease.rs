// SPDX-License-Identifier: GPL-3.0-only

//! Scoped stream reference

use super::{StopOutcome, StreamIdentity, StreamingService};
use crate::backends::camera::VideoFrame;
use crate::errors::StreamingResult;
use std::sync::Arc;
use tracing::warn;

/// One reference on the acquisition loop, released when dropped
pub struct StreamLease {
    service: StreamingService,
    identity: StreamIdentity,
    slot: usize,
    released: bool,
}

impl StreamLease {
    pub(super) fn new(service: StreamingService, identity: StreamIdentity, slot: usize) -> Self {
        Self {
            service,
            identity,
            slot,
            released: false,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    pub fn service(&self) -> &StreamingService {
        &self.service
    }

    /// Latest frame of this lease's stream
    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.service.get_frame(self.slot)
    }

    /// Release now and report how the release went
    pub fn release(mut self) -> StreamingResult<StopOutcome> {
        self.released = true;
        self.service.stop()
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.service.stop() {
            warn!(path = %self.identity, error = %e, "Releasing stream lease failed");
        }
    }
}

impl std::fmt::Debug for StreamLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLease")
            .field("identity", &self.identity)
            .field("slot", &self.slot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::StreamKind;
    use crate::backends::camera::simulated::SimulatedContext;
    use crate::config::StreamingConfig;

    #[test]
    fn test_drop_releases_reference() {
        let context = SimulatedContext::new(1);
        let config = StreamingConfig {
            frame_wait_timeout_ms: 20,
            ..StreamingConfig::default()
        };
        let service = StreamingService::new(&context, config);
        let identity = StreamIdentity::new("SIM0000", StreamKind::InfraredLeft);

        let first = service.acquire(&identity).unwrap();
        let second = service.acquire(&identity).unwrap();
        assert_eq!(first.slot(), 1);
        assert_eq!(service.reference_count(), 2);

        drop(first);
        assert_eq!(service.reference_count(), 1);
        assert!(service.is_started());

        assert_eq!(second.release(), Ok(StopOutcome::Stopped));
        assert_eq!(service.reference_count(), 0);
        assert!(!service.is_started());
    }
}
