//! Per-connection session state and teardown.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tether_core::rpc::handles::CloseAllReport;
use tether_core::HandleRegistry;
use tracing::{info, warn};
use uuid::Uuid;

use crate::infrastructure::native::{FileSystemCloser, Services};
use crate::infrastructure::streaming::{
    StreamState, StreamingChannel, StreamingError, StreamingSettings,
};

/// Everything one connected peer owns on the device.
///
/// Handlers receive `&Session` as their dispatch context.  The handle
/// registry and the streaming channel are the only mutable parts and both
/// lock internally, so a session can be shared with blocking handler tasks
/// behind an `Arc`.
pub struct Session {
    id: Uuid,
    services: Services,
    handles: HandleRegistry,
    streaming: Mutex<StreamingChannel>,
}

impl Session {
    pub fn new(services: Services, streaming: StreamingSettings) -> Self {
        let channel = StreamingChannel::new(streaming, services.input.clone());
        Self {
            id: Uuid::new_v4(),
            services,
            handles: HandleRegistry::new(),
            streaming: Mutex::new(channel),
        }
    }

    /// Id used to correlate this session's log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    /// Starts the controller stream, replacing any running one.
    ///
    /// Returns the bound UDP port.
    pub fn start_streaming(&self) -> Result<u16, StreamingError> {
        self.streaming_channel().start()
    }

    pub fn stop_streaming(&self) {
        self.streaming_channel().stop();
    }

    pub fn streaming_state(&self) -> StreamState {
        self.streaming_channel().state()
    }

    /// Releases everything the peer left behind: closes every registered
    /// handle, then stops the controller stream.  Close failures are logged
    /// and otherwise ignored.  Safe to call more than once.
    pub fn teardown(&self) -> CloseAllReport {
        let closer = FileSystemCloser(self.services.fs.as_ref());
        let report = self.handles.close_all(&closer);
        if report.failed > 0 {
            warn!(
                session = %self.id,
                closed = report.closed,
                failed = report.failed,
                "some handles failed to close during teardown"
            );
        }
        self.stop_streaming();
        info!(session = %self.id, closed = report.closed, "session torn down");
        report
    }

    fn streaming_channel(&self) -> MutexGuard<'_, StreamingChannel> {
        self.streaming.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("handles", &self.handles.len())
            .field("streaming", &self.streaming_state())
            .finish()
    }
}
