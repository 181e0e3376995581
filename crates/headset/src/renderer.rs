//! Per-frame draw sequencing.
//!
//! One call to [`FrameRenderer::render`] turns a pose snapshot into the
//! device calls of one frame: a single clear, then for every view the
//! viewport, the program and its per-view uniforms, and one draw per
//! drawable whose anchor is tracked.

use headset_core::{
    compose_model, FramebufferId, HandState, TrackedController, ViewDescriptor,
};
use headset_render::{GpuDevice, RenderError, RenderResult, UniformValue};

use crate::scene::{Anchor, Drawable, MeshRef, SceneResources, TextureRef};

/// Projection matrix uniform.
pub const U_PROJECTION: &str = "u_projection";
/// View matrix uniform.
pub const U_VIEW: &str = "u_view";
/// Model matrix uniform.
pub const U_MODEL: &str = "u_model";
/// Sampled texture uniform, set to the texture unit.
pub const U_TEXTURE: &str = "u_texture";

/// Where the renderer is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    /// No frame rendered yet, or the last frame had no viewer pose.
    #[default]
    WaitingForPose,
    /// Views are being drawn.
    Rendering,
    /// The last view was drawn and the program unbound.
    FrameComplete,
}

/// What one frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub views: usize,
    pub draws: usize,
    pub texture_binds: usize,
    /// Drawable instances skipped because their controller was not tracked.
    pub skipped_drawables: usize,
    /// Whether anything was rendered; false when the viewer pose was missing.
    pub rendered: bool,
}

/// Issues the draw sequence of each frame.
#[derive(Debug, Clone)]
pub struct FrameRenderer {
    phase: FramePhase,
    clear_color: [f32; 4],
    texture_unit: u32,
    grip_threshold: f32,
}

impl FrameRenderer {
    pub fn new(clear_color: [f32; 4], texture_unit: u32, grip_threshold: f32) -> Self {
        Self {
            phase: FramePhase::WaitingForPose,
            clear_color,
            texture_unit,
            grip_threshold,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Renders one frame into `framebuffer`.
    ///
    /// `views` is `None` when the platform had no viewer pose this frame: the
    /// frame is skipped without clearing and the renderer waits for a pose.
    /// `controllers` is this frame's tracker output.
    ///
    /// A device error abandons the frame: the program is unbound and the
    /// renderer goes back to waiting for a pose before the error is returned.
    pub fn render(
        &mut self,
        device: &mut dyn GpuDevice,
        framebuffer: FramebufferId,
        views: Option<&[ViewDescriptor]>,
        scene: &mut SceneResources,
        drawables: &[Drawable],
        controllers: &[TrackedController],
    ) -> RenderResult<FrameStats> {
        let Some(views) = views else {
            log::debug!("no viewer pose, frame skipped");
            self.phase = FramePhase::WaitingForPose;
            return Ok(FrameStats::default());
        };
        let unit = i32::try_from(self.texture_unit).map_err(|_| {
            self.phase = FramePhase::WaitingForPose;
            RenderError::InvalidState(format!(
                "texture unit {} does not fit a sampler uniform",
                self.texture_unit
            ))
        })?;

        self.phase = FramePhase::Rendering;
        match self.render_views(device, framebuffer, views, scene, drawables, controllers, unit) {
            Ok(stats) => {
                self.phase = FramePhase::FrameComplete;
                log::trace!("frame complete: {stats:?}");
                Ok(stats)
            }
            Err(e) => {
                if let Err(unbind) = scene.program.unbind(device) {
                    log::warn!("failed to unbind program after frame error: {unbind}");
                }
                self.phase = FramePhase::WaitingForPose;
                log::debug!("frame abandoned: {e}");
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_views(
        &self,
        device: &mut dyn GpuDevice,
        framebuffer: FramebufferId,
        views: &[ViewDescriptor],
        scene: &mut SceneResources,
        drawables: &[Drawable],
        controllers: &[TrackedController],
        unit: i32,
    ) -> RenderResult<FrameStats> {
        device.bind_framebuffer(framebuffer)?;
        device.clear(self.clear_color)?;

        let mut stats = FrameStats {
            rendered: true,
            ..FrameStats::default()
        };
        for view in views {
            device.set_viewport(view.viewport)?;
            scene.program.bind(device)?;
            scene
                .program
                .set_uniform(device, U_TEXTURE, UniformValue::Int(unit))?;
            scene
                .program
                .set_uniform(device, U_PROJECTION, UniformValue::Mat4(view.projection))?;
            scene
                .program
                .set_uniform(device, U_VIEW, UniformValue::Mat4(view.view))?;

            // Texture binds do not survive a view change.
            let mut bound: Option<TextureRef> = None;
            for drawable in drawables {
                self.draw(device, scene, drawable, controllers, &mut bound, &mut stats)?;
            }
            stats.views += 1;
        }

        scene.program.unbind(device)?;
        device.end_frame()?;
        Ok(stats)
    }

    fn draw(
        &self,
        device: &mut dyn GpuDevice,
        scene: &mut SceneResources,
        drawable: &Drawable,
        controllers: &[TrackedController],
        bound: &mut Option<TextureRef>,
        stats: &mut FrameStats,
    ) -> RenderResult<()> {
        let (base, closed) = match drawable.anchor {
            Anchor::World => (glam::Mat4::IDENTITY, false),
            Anchor::Controller(index) => match controllers.get(index) {
                Some(controller) => (
                    controller.pose,
                    controller.hand_state(self.grip_threshold) == HandState::Closed,
                ),
                None => {
                    log::debug!("controller {index} not tracked, drawable skipped");
                    stats.skipped_drawables += 1;
                    return Ok(());
                }
            },
        };
        // Field borrows stay disjoint from the texture and program below.
        let mesh = match (drawable.mesh, closed) {
            (MeshRef::Hand, false) => &scene.hand_open,
            (MeshRef::Hand, true) => &scene.hand_closed,
            (MeshRef::Ground, _) => match scene.ground.as_ref() {
                Some(ground) => ground,
                None => {
                    log::debug!("ground drawable without ground mesh skipped");
                    stats.skipped_drawables += 1;
                    return Ok(());
                }
            },
        };

        if *bound != Some(drawable.texture) {
            let texture = match drawable.texture {
                TextureRef::Controller => &mut scene.controller_texture,
                TextureRef::Ground => &mut scene.ground_texture,
            };
            texture.bind(device, self.texture_unit)?;
            *bound = Some(drawable.texture);
            stats.texture_binds += 1;
        }

        let model = compose_model(base, &drawable.offset);
        scene
            .program
            .set_uniform(device, U_MODEL, UniformValue::Mat4(model))?;

        mesh.draw(device)?;
        if mesh.vertex_count() > 0 {
            stats.draws += 1;
        }
        Ok(())
    }
}

impl Default for FrameRenderer {
    fn default() -> Self {
        let options = headset_core::Options::default();
        Self::new(
            options.clear_color,
            options.texture_unit,
            options.grip_threshold,
        )
    }
}
