//! Session lifecycle.

use headset_core::{CoreError, Options, SessionEvent, XrSession, XrSystem};
use headset_render::GpuDevice;

use crate::error::{Error, Result};
use crate::renderer::FrameStats;
use crate::scheduler::FrameScheduler;
use crate::session::RenderSession;

/// Lifecycle state of an [`XrApp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// The platform cannot run the configured session mode. Entry is disabled.
    Unsupported,
    /// Ready to start a session.
    Idle,
    /// A session is running and frames are being requested.
    Running,
}

struct ActiveSession<S> {
    session: S,
    scheduler: FrameScheduler,
    render: RenderSession,
}

/// Starts, runs and ends immersive sessions on an XR platform.
///
/// ```no_run
/// use headset::{AppState, Options, RecordingDevice, SimulatedSystem, XrApp};
///
/// let mut device = RecordingDevice::new();
/// let mut app = XrApp::new(SimulatedSystem::new(1280, 720), Options::default());
/// app.toggle(&mut device).unwrap();
/// assert_eq!(app.state(), AppState::Running);
/// ```
pub struct XrApp<X: XrSystem> {
    system: X,
    options: Options,
    state: AppState,
    active: Option<ActiveSession<X::Session>>,
    last_stats: Option<FrameStats>,
}

impl<X: XrSystem> XrApp<X> {
    /// Wraps `system`. Checks once whether the configured mode is supported.
    pub fn new(system: X, options: Options) -> Self {
        let state = if system.is_session_supported(options.session_mode) {
            AppState::Idle
        } else {
            log::info!(
                "{} sessions not supported, session entry disabled",
                options.session_mode
            );
            AppState::Unsupported
        };
        Self {
            system,
            options,
            state,
            active: None,
            last_stats: None,
        }
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn system(&self) -> &X {
        &self.system
    }

    /// The running render session, if any.
    pub fn render_session(&self) -> Option<&RenderSession> {
        self.active.as_ref().map(|active| &active.render)
    }

    /// The running platform session, if any.
    pub fn session(&self) -> Option<&X::Session> {
        self.active.as_ref().map(|active| &active.session)
    }

    /// Statistics of the last rendered frame.
    pub fn last_stats(&self) -> Option<FrameStats> {
        self.last_stats
    }

    /// Starts a session when idle, ends it when running.
    pub fn toggle(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        match self.state {
            AppState::Unsupported => {
                Err(CoreError::PlatformUnsupported(self.options.session_mode).into())
            }
            AppState::Idle => self.start_session(device),
            AppState::Running => self.end_session(device),
        }
    }

    /// Requests a session, its reference space and GPU resources, then the
    /// first frame.
    ///
    /// Any failure ends the platform session and leaves the app idle.
    pub fn start_session(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        match self.state {
            AppState::Unsupported => {
                return Err(CoreError::PlatformUnsupported(self.options.session_mode).into())
            }
            AppState::Running => return Err(Error::AlreadyRunning),
            AppState::Idle => {}
        }

        let mut session = match self.system.request_session(self.options.session_mode) {
            Ok(session) => session,
            Err(e) => {
                log::error!("session request failed: {e}");
                return Err(e.into());
            }
        };
        match Self::prepare(&mut session, device, &self.options) {
            Ok((scheduler, render)) => {
                log::info!(
                    "{} session started in {} space",
                    self.options.session_mode,
                    render.reference_space().kind()
                );
                self.active = Some(ActiveSession {
                    session,
                    scheduler,
                    render,
                });
                self.state = AppState::Running;
                Ok(())
            }
            Err(e) => {
                log::error!("session start aborted: {e}");
                session.end();
                self.state = AppState::Idle;
                Err(e)
            }
        }
    }

    fn prepare(
        session: &mut X::Session,
        device: &mut dyn GpuDevice,
        options: &Options,
    ) -> Result<(FrameScheduler, RenderSession)> {
        let space = session.request_reference_space(options.reference_space)?;
        let render = RenderSession::build(device, options, space)?;
        let mut scheduler = FrameScheduler::new();
        if let Err(e) = scheduler.start(session) {
            if let Err(release_err) = render.teardown(device) {
                log::warn!("failed to release render session: {release_err}");
            }
            return Err(e);
        }
        Ok((scheduler, render))
    }

    /// Stops frame requests, releases GPU resources and ends the platform
    /// session, in that order.
    pub fn end_session(&mut self, device: &mut dyn GpuDevice) -> Result<()> {
        let active = self.active.take().ok_or(Error::NotRunning)?;
        let (mut session, released) = self.shutdown(active, device);
        session.end();
        log::info!("session ended");
        released
    }

    /// Stops the scheduler, then releases resources. Hands back the platform
    /// session with the release result.
    fn shutdown(
        &mut self,
        active: ActiveSession<X::Session>,
        device: &mut dyn GpuDevice,
    ) -> (X::Session, Result<()>) {
        let ActiveSession {
            mut session,
            mut scheduler,
            render,
        } = active;
        scheduler.stop(&mut session);
        self.state = AppState::Idle;
        (session, render.teardown(device))
    }

    /// Handles every pending platform event. Returns the number of frames
    /// rendered.
    ///
    /// A frame that fails to render is returned as an error; the session
    /// keeps running and the next frame is already requested.
    pub fn pump(&mut self, device: &mut dyn GpuDevice) -> Result<usize> {
        let mut rendered = 0;
        loop {
            let Some(active) = self.active.as_mut() else {
                return Ok(rendered);
            };
            let Some(event) = active.session.poll_event() else {
                return Ok(rendered);
            };
            match event {
                SessionEvent::Frame {
                    request,
                    timestamp,
                    frame,
                } => {
                    let Some(frame) =
                        active
                            .scheduler
                            .begin_frame(&mut active.session, request, frame)
                    else {
                        continue;
                    };
                    log::trace!("frame {request:?} at {timestamp:.3}");
                    let stats = active
                        .render
                        .render_frame(device, &active.session, &frame)?;
                    if stats.rendered {
                        rendered += 1;
                    }
                    self.last_stats = Some(stats);
                }
                SessionEvent::Ended => {
                    log::info!("session ended by the platform");
                    if let Some(active) = self.active.take() {
                        let (_session, released) = self.shutdown(active, device);
                        released?;
                    }
                    return Ok(rendered);
                }
            }
        }
    }

    /// Blocks until background asset loads have published.
    pub fn wait_for_assets(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.render.wait_for_assets();
        }
    }
}

impl<X: XrSystem> std::fmt::Debug for XrApp<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XrApp")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("running", &self.active.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedSystem;
    use headset_render::RecordingDevice;

    #[test]
    fn test_unsupported_toggle_is_error() {
        let mut device = RecordingDevice::new();
        let mut app = XrApp::new(SimulatedSystem::unsupported(), Options::default());
        assert_eq!(app.state(), AppState::Unsupported);
        assert!(matches!(
            app.toggle(&mut device),
            Err(Error::Core(CoreError::PlatformUnsupported(_)))
        ));
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_toggle_starts_and_ends() {
        let mut device = RecordingDevice::new();
        let system = SimulatedSystem::new(64, 32);
        let handle = system.handle();
        let mut app = XrApp::new(system, Options::default());

        app.toggle(&mut device).unwrap();
        assert_eq!(app.state(), AppState::Running);
        assert_eq!(handle.requested_frames().len(), 1);

        app.toggle(&mut device).unwrap();
        assert_eq!(app.state(), AppState::Idle);
        assert!(!handle.session_active());
        assert!(handle.pending_requests().is_empty());
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_end_without_session() {
        let mut device = RecordingDevice::new();
        let mut app = XrApp::new(SimulatedSystem::new(64, 32), Options::default());
        assert!(matches!(app.end_session(&mut device), Err(Error::NotRunning)));
    }

    #[test]
    fn test_session_request_failure_stays_idle() {
        let mut device = RecordingDevice::new();
        let system = SimulatedSystem::new(64, 32).with_failing_session_requests();
        let mut app = XrApp::new(system, Options::default());
        assert!(app.toggle(&mut device).is_err());
        assert_eq!(app.state(), AppState::Idle);
    }

    #[test]
    fn test_missing_reference_space_ends_session() {
        let mut device = RecordingDevice::new();
        let system = SimulatedSystem::new(64, 32).with_unavailable_space();
        let handle = system.handle();
        let mut app = XrApp::new(system, Options::default());
        assert!(matches!(
            app.toggle(&mut device),
            Err(Error::Core(CoreError::ReferenceSpaceUnavailable(_)))
        ));
        assert_eq!(app.state(), AppState::Idle);
        assert!(!handle.session_active());
        assert!(handle.requested_frames().is_empty());
        assert_eq!(device.live_resources(), 0);
    }
}
