//! Everything a running session renders with.

use headset_core::{
    FrameState, Options, PoseTracker, ReferenceSpace, TrackedController, ViewDescriptor,
    XrSession,
};
use headset_render::{GpuDevice, Texture, TextureImage, VertexBuffer, MESH_ATTRIBUTES};

use crate::assets::{AssetSlot, PendingAssets};
use crate::error::Result;
use crate::renderer::{FramePhase, FrameRenderer, FrameStats};
use crate::scene::{default_drawables, Drawable, SceneResources};

/// GPU resources, drawables and per-frame state of one session.
///
/// Owns every device resource it draws with; [`RenderSession::teardown`]
/// returns them all.
#[derive(Debug)]
pub struct RenderSession {
    space: ReferenceSpace,
    scene: SceneResources,
    drawables: Vec<Drawable>,
    tracker: PoseTracker,
    renderer: FrameRenderer,
    assets: PendingAssets,
    frames_rendered: u64,
}

impl RenderSession {
    /// Acquires the scene resources and starts background asset loads.
    ///
    /// On failure nothing stays allocated on `device`.
    pub fn build(
        device: &mut dyn GpuDevice,
        options: &Options,
        space: ReferenceSpace,
    ) -> Result<Self> {
        let scene = SceneResources::build(device, options)?;
        log::debug!("scene resources ready for {} space", space.kind());
        Ok(Self {
            space,
            scene,
            drawables: default_drawables(options),
            tracker: PoseTracker::new(options.grip_button),
            renderer: FrameRenderer::new(
                options.clear_color,
                options.texture_unit,
                options.grip_threshold,
            ),
            assets: PendingAssets::start(&options.assets),
            frames_rendered: 0,
        })
    }

    /// Renders the frame delivered by `session`.
    pub fn render_frame<S: XrSession>(
        &mut self,
        device: &mut dyn GpuDevice,
        session: &S,
        frame: &S::Frame,
    ) -> Result<FrameStats> {
        self.apply_loaded_assets(device);

        self.tracker
            .update(frame, frame.input_sources(), &self.space);
        let views: Option<Vec<ViewDescriptor>> = frame.viewer_pose(&self.space).map(|pose| {
            pose.views
                .iter()
                .map(|view| ViewDescriptor::new(view, session.viewport(view)))
                .collect()
        });

        let stats = self.renderer.render(
            device,
            session.framebuffer(),
            views.as_deref(),
            &mut self.scene,
            &self.drawables,
            self.tracker.controllers(),
        )?;
        if stats.rendered {
            self.frames_rendered += 1;
        }
        Ok(stats)
    }

    /// Swaps in every asset whose load finished since the last frame.
    fn apply_loaded_assets(&mut self, device: &mut dyn GpuDevice) {
        if let Some(data) = take_loaded(&mut self.assets.hand_open_mesh, "open hand mesh") {
            replace_mesh(device, &mut self.scene.hand_open, &data, "open hand mesh");
        }
        if let Some(data) = take_loaded(&mut self.assets.hand_closed_mesh, "closed hand mesh") {
            replace_mesh(device, &mut self.scene.hand_closed, &data, "closed hand mesh");
        }
        if let Some(image) = take_loaded(&mut self.assets.controller_texture, "controller texture")
        {
            replace_texture(
                device,
                &mut self.scene.controller_texture,
                &image,
                "controller texture",
            );
        }
        if let Some(image) = take_loaded(&mut self.assets.ground_texture, "ground texture") {
            replace_texture(device, &mut self.scene.ground_texture, &image, "ground texture");
        }
    }

    /// Blocks until every background load has published. Results are applied
    /// on the next frame.
    pub fn wait_for_assets(&mut self) {
        self.assets.wait();
    }

    /// Whether every background load has been applied (or failed).
    pub fn assets_settled(&self) -> bool {
        self.assets.is_idle()
    }

    pub fn reference_space(&self) -> &ReferenceSpace {
        &self.space
    }

    pub fn scene(&self) -> &SceneResources {
        &self.scene
    }

    pub fn drawables(&self) -> &[Drawable] {
        &self.drawables
    }

    /// Controllers tracked in the last frame.
    pub fn controllers(&self) -> &[TrackedController] {
        self.tracker.controllers()
    }

    pub fn phase(&self) -> FramePhase {
        self.renderer.phase()
    }

    /// Frames that reached the display.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Releases every GPU resource.
    pub fn teardown(self, device: &mut dyn GpuDevice) -> Result<()> {
        log::debug!(
            "tearing down render session after {} frames",
            self.frames_rendered
        );
        self.scene.release(device)?;
        Ok(())
    }
}

/// Takes a finished load out of `slot`. The slot is emptied once a result
/// arrives, so each load is applied at most once.
fn take_loaded<T>(slot: &mut Option<AssetSlot<T>>, what: &str) -> Option<T> {
    let result = slot.as_ref()?.take()?;
    *slot = None;
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("failed to load {what}, keeping placeholder: {e}");
            None
        }
    }
}

fn replace_mesh(device: &mut dyn GpuDevice, current: &mut VertexBuffer, data: &[f32], what: &str) {
    match VertexBuffer::with_data(device, &MESH_ATTRIBUTES, data) {
        Ok(fresh) => {
            let old = std::mem::replace(current, fresh);
            if let Err(e) = old.release(device) {
                log::warn!("failed to release replaced {what}: {e}");
            }
            log::info!("{what} loaded ({} vertices)", current.vertex_count());
        }
        Err(e) => log::warn!("failed to upload {what}, keeping placeholder: {e}"),
    }
}

fn replace_texture(
    device: &mut dyn GpuDevice,
    current: &mut Texture,
    image: &TextureImage,
    what: &str,
) {
    match Texture::from_image(device, image) {
        Ok(fresh) => {
            let old = std::mem::replace(current, fresh);
            if let Err(e) = old.release(device) {
                log::warn!("failed to release replaced {what}: {e}");
            }
            log::info!("{what} loaded ({}x{})", image.width(), image.height());
        }
        Err(e) => log::warn!("failed to upload {what}, keeping placeholder: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimController, SimulatedSystem};
    use headset_core::{Handedness, ReferenceSpaceType, SessionMode, XrSystem};
    use headset_render::RecordingDevice;

    fn local() -> ReferenceSpace {
        ReferenceSpace::new(1, ReferenceSpaceType::Local)
    }

    #[test]
    fn test_take_loaded_consumes_slot() {
        let mut slot = Some(AssetSlot::new());
        assert!(take_loaded::<u32>(&mut slot, "x").is_none());
        assert!(slot.is_some());
        slot.as_ref().unwrap().publish(Ok(4));
        assert_eq!(take_loaded(&mut slot, "x"), Some(4));
        assert!(slot.is_none());
    }

    #[test]
    fn test_failed_load_keeps_placeholder() {
        let mut device = RecordingDevice::new();
        let mut options = Options::default();
        options.assets.controller_texture = Some("/nonexistent/hand.png".into());
        let mut render = RenderSession::build(&mut device, &options, local()).unwrap();
        let before = render.scene().controller_texture().id();
        render.wait_for_assets();

        let mut system = SimulatedSystem::new(64, 32);
        let handle = system.handle();
        let session = system.request_session(SessionMode::ImmersiveVr).unwrap();
        handle.set_viewer_pose(None);
        render
            .render_frame(&mut device, &session, &handle.snapshot())
            .unwrap();

        assert_eq!(render.scene().controller_texture().id(), before);
        assert!(render.assets_settled());
        render.teardown(&mut device).unwrap();
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_frame_without_pose_still_tracks() {
        let mut device = RecordingDevice::new();
        let mut render = RenderSession::build(&mut device, &Options::default(), local()).unwrap();
        let mut system = SimulatedSystem::new(64, 32);
        let handle = system.handle();
        let session = system.request_session(SessionMode::ImmersiveVr).unwrap();
        handle.set_viewer_pose(None);
        handle.set_controllers(&[SimController::tracked(Handedness::Left, 0.3)]);

        let stats = render
            .render_frame(&mut device, &session, &handle.snapshot())
            .unwrap();
        assert!(!stats.rendered);
        assert_eq!(render.controllers().len(), 1);
        assert_eq!(render.frames_rendered(), 0);
        assert_eq!(render.phase(), FramePhase::WaitingForPose);
        render.teardown(&mut device).unwrap();
    }
}
