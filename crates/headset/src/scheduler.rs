//! Frame pacing.
//!
//! The scheduler owns the request-next-frame side effect. Exactly one request
//! is outstanding while it runs, and the next one is issued before any work is
//! done for the current frame, so a slow or failing frame never stalls the
//! loop.

use headset_core::{FrameRequest, XrSession};

use crate::error::{Error, Result};

/// Issues and validates frame callbacks for one session.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    pending: Option<FrameRequest>,
    running: bool,
    frames: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the first frame.
    pub fn start<S: XrSession>(&mut self, session: &mut S) -> Result<()> {
        if self.running {
            return Err(Error::AlreadyRunning);
        }
        self.pending = Some(session.request_animation_frame());
        self.running = true;
        log::debug!("frame scheduler started, first request {:?}", self.pending);
        Ok(())
    }

    /// Admits the callback for `request`.
    ///
    /// Requests the next frame first, then hands `frame` back. Callbacks for
    /// any other request, or arriving after [`FrameScheduler::stop`], are stale:
    /// nothing is requested and `None` is returned.
    pub fn begin_frame<S: XrSession>(
        &mut self,
        session: &mut S,
        request: FrameRequest,
        frame: S::Frame,
    ) -> Option<S::Frame> {
        if !self.running || self.pending != Some(request) {
            log::debug!("ignoring stale frame callback {request:?}");
            return None;
        }
        self.pending = Some(session.request_animation_frame());
        self.frames += 1;
        Some(frame)
    }

    /// Cancels the outstanding request. No further requests are made.
    pub fn stop<S: XrSession>(&mut self, session: &mut S) {
        if let Some(request) = self.pending.take() {
            session.cancel_animation_frame(request);
        }
        if self.running {
            log::debug!("frame scheduler stopped after {} frames", self.frames);
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The outstanding request, if any.
    pub fn pending(&self) -> Option<FrameRequest> {
        self.pending
    }

    /// Frames admitted so far.
    pub fn frames_begun(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedSystem;
    use headset_core::{SessionEvent, SessionMode, XrSystem};

    #[test]
    fn test_next_frame_requested_before_work() {
        let mut system = SimulatedSystem::new(64, 32);
        let handle = system.handle();
        let mut session = system.request_session(SessionMode::ImmersiveVr).unwrap();
        let mut scheduler = FrameScheduler::new();
        scheduler.start(&mut session).unwrap();
        assert_eq!(handle.requested_frames().len(), 1);

        let fired = handle.fire_frame(0.0).unwrap();
        let Some(SessionEvent::Frame { request, frame, .. }) = session.poll_event() else {
            panic!("expected a frame event");
        };
        assert_eq!(request, fired);
        assert!(scheduler.begin_frame(&mut session, request, frame).is_some());
        assert_eq!(handle.requested_frames().len(), 2);
        assert_eq!(scheduler.frames_begun(), 1);
    }

    #[test]
    fn test_stale_callback_rejected() {
        let mut system = SimulatedSystem::new(64, 32);
        let handle = system.handle();
        let mut session = system.request_session(SessionMode::ImmersiveVr).unwrap();
        let mut scheduler = FrameScheduler::new();
        scheduler.start(&mut session).unwrap();

        handle.fire_request(FrameRequest(999), 0.0);
        let Some(SessionEvent::Frame { request, frame, .. }) = session.poll_event() else {
            panic!("expected a frame event");
        };
        assert!(scheduler.begin_frame(&mut session, request, frame).is_none());
        assert_eq!(handle.requested_frames().len(), 1);
    }

    #[test]
    fn test_stop_cancels_pending() {
        let mut system = SimulatedSystem::new(64, 32);
        let handle = system.handle();
        let mut session = system.request_session(SessionMode::ImmersiveVr).unwrap();
        let mut scheduler = FrameScheduler::new();
        scheduler.start(&mut session).unwrap();
        let pending = scheduler.pending().unwrap();

        scheduler.stop(&mut session);
        assert!(!scheduler.is_running());
        assert_eq!(handle.cancelled_requests(), vec![pending]);

        // The callback was already queued before the cancel reached the platform.
        handle.fire_request(pending, 1.0);
        let Some(SessionEvent::Frame { request, frame, .. }) = session.poll_event() else {
            panic!("expected a frame event");
        };
        assert!(scheduler.begin_frame(&mut session, request, frame).is_none());
        assert_eq!(handle.requested_frames().len(), 1);
    }

    #[test]
    fn test_double_start_rejected() {
        let mut system = SimulatedSystem::new(64, 32);
        let mut session = system.request_session(SessionMode::ImmersiveVr).unwrap();
        let mut scheduler = FrameScheduler::new();
        scheduler.start(&mut session).unwrap();
        assert!(matches!(
            scheduler.start(&mut session),
            Err(Error::AlreadyRunning)
        ));
    }
}
