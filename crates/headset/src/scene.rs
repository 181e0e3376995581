//! Drawables and the GPU resources they reference.

use headset_core::{LocalOffset, Options};
use headset_render::{
    mesh, GpuDevice, RenderResult, ShaderBuilder, ShaderProgram, Texture, TextureImage,
    VertexBuffer, MESH_ATTRIBUTES, TEXTURED_FRAGMENT_SHADER, TEXTURED_VERTEX_SHADER,
};

/// What a drawable's model matrix is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The reference space origin.
    World,
    /// The grip pose of the controller at this positional index.
    Controller(usize),
}

/// Mesh drawn for a drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshRef {
    /// Open or closed hand, chosen from the anchoring controller's grip.
    Hand,
    /// The ground plane.
    Ground,
}

/// Texture sampled by a drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureRef {
    Controller,
    Ground,
}

/// One object drawn every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawable {
    pub anchor: Anchor,
    pub mesh: MeshRef,
    pub texture: TextureRef,
    pub offset: LocalOffset,
}

/// Left hand on controller 0, right hand on controller 1, then the ground.
pub fn default_drawables(options: &Options) -> Vec<Drawable> {
    let mut drawables = vec![
        Drawable {
            anchor: Anchor::Controller(0),
            mesh: MeshRef::Hand,
            texture: TextureRef::Controller,
            offset: options.hands.left,
        },
        Drawable {
            anchor: Anchor::Controller(1),
            mesh: MeshRef::Hand,
            texture: TextureRef::Controller,
            offset: options.hands.right,
        },
    ];
    if options.ground_plane.enabled {
        drawables.push(Drawable {
            anchor: Anchor::World,
            mesh: MeshRef::Ground,
            texture: TextureRef::Ground,
            offset: options.ground_plane.offset(),
        });
    }
    drawables
}

const CONTROLLER_LIGHT: [u8; 4] = [230, 200, 170, 255];
const CONTROLLER_DARK: [u8; 4] = [190, 150, 120, 255];
const GROUND_LIGHT: [u8; 4] = [120, 160, 110, 255];
const GROUND_DARK: [u8; 4] = [90, 125, 80, 255];

/// Placeholder texture for both hands.
pub fn placeholder_controller_texture() -> TextureImage {
    TextureImage::checkerboard(8, 2, CONTROLLER_LIGHT, CONTROLLER_DARK)
}

/// Placeholder texture for the ground plane.
pub fn placeholder_ground_texture() -> TextureImage {
    TextureImage::checkerboard(16, 4, GROUND_LIGHT, GROUND_DARK)
}

/// Every GPU resource a render session draws with.
#[derive(Debug)]
pub struct SceneResources {
    pub(crate) program: ShaderProgram,
    pub(crate) hand_open: VertexBuffer,
    pub(crate) hand_closed: VertexBuffer,
    pub(crate) ground: Option<VertexBuffer>,
    pub(crate) controller_texture: Texture,
    pub(crate) ground_texture: Texture,
}

/// Resources acquired so far while building a scene.
#[derive(Default)]
struct PartialScene {
    program: Option<ShaderProgram>,
    hand_open: Option<VertexBuffer>,
    hand_closed: Option<VertexBuffer>,
    ground: Option<VertexBuffer>,
    controller_texture: Option<Texture>,
    ground_texture: Option<Texture>,
}

impl PartialScene {
    fn acquire(&mut self, device: &mut dyn GpuDevice, options: &Options) -> RenderResult<()> {
        self.program = Some(
            ShaderBuilder::new()
                .with_label("textured mesh")
                .with_vertex(TEXTURED_VERTEX_SHADER)
                .with_fragment(TEXTURED_FRAGMENT_SHADER)
                .with_compile_retries(options.compile_retries)
                .build(device)?,
        );
        self.hand_open = Some(VertexBuffer::with_data(
            device,
            &MESH_ATTRIBUTES,
            &mesh::placeholder_open_hand(),
        )?);
        self.hand_closed = Some(VertexBuffer::with_data(
            device,
            &MESH_ATTRIBUTES,
            &mesh::placeholder_closed_hand(),
        )?);
        if options.ground_plane.enabled {
            self.ground = Some(VertexBuffer::with_data(
                device,
                &MESH_ATTRIBUTES,
                &options.ground_plane.vertices(),
            )?);
        }
        self.controller_texture = Some(Texture::from_image(
            device,
            &placeholder_controller_texture(),
        )?);
        self.ground_texture = Some(Texture::from_image(device, &placeholder_ground_texture())?);
        Ok(())
    }

    fn complete(self) -> Result<SceneResources, Self> {
        match self {
            PartialScene {
                program: Some(program),
                hand_open: Some(hand_open),
                hand_closed: Some(hand_closed),
                ground,
                controller_texture: Some(controller_texture),
                ground_texture: Some(ground_texture),
            } => Ok(SceneResources {
                program,
                hand_open,
                hand_closed,
                ground,
                controller_texture,
                ground_texture,
            }),
            partial => Err(partial),
        }
    }

    fn release(self, device: &mut dyn GpuDevice) {
        let results = [
            self.program.map(|p| p.release(device)),
            self.hand_open.map(|b| b.release(device)),
            self.hand_closed.map(|b| b.release(device)),
            self.ground.map(|b| b.release(device)),
            self.controller_texture.map(|t| t.release(device)),
            self.ground_texture.map(|t| t.release(device)),
        ];
        for err in results.into_iter().flatten().filter_map(Result::err) {
            log::warn!("failed to release partially built scene: {err}");
        }
    }
}

impl SceneResources {
    /// Builds the program, placeholder meshes and placeholder textures.
    ///
    /// If any acquisition fails, everything acquired before it is released
    /// and the error is returned.
    pub fn build(device: &mut dyn GpuDevice, options: &Options) -> RenderResult<Self> {
        let mut partial = PartialScene::default();
        if let Err(e) = partial.acquire(device, options) {
            partial.release(device);
            return Err(e);
        }
        match partial.complete() {
            Ok(scene) => Ok(scene),
            Err(partial) => {
                partial.release(device);
                Err(headset_render::RenderError::InvalidState(
                    "scene build left resources missing".into(),
                ))
            }
        }
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    /// Hand mesh for the open or closed state.
    pub fn hand_mesh(&self, closed: bool) -> &VertexBuffer {
        if closed {
            &self.hand_closed
        } else {
            &self.hand_open
        }
    }

    pub fn ground_mesh(&self) -> Option<&VertexBuffer> {
        self.ground.as_ref()
    }

    pub fn controller_texture(&self) -> &Texture {
        &self.controller_texture
    }

    pub fn ground_texture(&self) -> &Texture {
        &self.ground_texture
    }

    /// Releases every resource. All are attempted; the first error is returned.
    pub fn release(self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        let results = [
            self.program.release(device),
            self.hand_open.release(device),
            self.hand_closed.release(device),
            self.ground.map_or(Ok(()), |b| b.release(device)),
            self.controller_texture.release(device),
            self.ground_texture.release(device),
        ];
        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headset_render::RecordingDevice;

    #[test]
    fn test_default_drawables() {
        let options = Options::default();
        let drawables = default_drawables(&options);
        assert_eq!(drawables.len(), 3);
        assert_eq!(drawables[0].anchor, Anchor::Controller(0));
        assert_eq!(drawables[0].offset, options.hands.left);
        assert_eq!(drawables[1].anchor, Anchor::Controller(1));
        assert_eq!(drawables[2].mesh, MeshRef::Ground);
    }

    #[test]
    fn test_ground_disabled() {
        let mut options = Options::default();
        options.ground_plane.enabled = false;
        assert_eq!(default_drawables(&options).len(), 2);

        let mut device = RecordingDevice::new();
        let scene = SceneResources::build(&mut device, &options).unwrap();
        assert!(scene.ground_mesh().is_none());
        scene.release(&mut device).unwrap();
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_build_and_release() {
        let mut device = RecordingDevice::new();
        let scene = SceneResources::build(&mut device, &Options::default()).unwrap();
        // program + 3 meshes + 2 textures; sub-shaders are gone after link
        assert_eq!(device.live_resources(), 6);
        assert_eq!(scene.hand_mesh(false).vertex_count(), 36);
        assert_eq!(scene.ground_mesh().unwrap().vertex_count(), 6);
        assert_eq!(scene.controller_texture().dimensions(), Some((8, 8)));
        scene.release(&mut device).unwrap();
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_failed_build_releases_everything() {
        // 2 shaders + program + 3 buffers + 1 texture, then out of memory.
        for budget in 0..8 {
            let mut device = RecordingDevice::with_allocation_budget(budget);
            let result = SceneResources::build(&mut device, &Options::default());
            assert!(result.is_err(), "budget {budget} should fail");
            assert_eq!(device.live_resources(), 0, "budget {budget} leaked");
        }
    }
}
