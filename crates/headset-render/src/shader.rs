//! Shader stages and linked programs.

use std::collections::{HashMap, HashSet};

use crate::device::{
    GpuDevice, ProgramId, ProgramInterface, ShaderId, ShaderStage, UniformKind, UniformLocation,
    UniformValue,
};
use crate::error::{RenderError, RenderResult};

/// Outcome of [`ShaderProgram::set_uniform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformStatus {
    /// The value was written.
    Set,
    /// The program has no uniform of that name; nothing was written.
    Unknown,
}

/// One compiled shader stage, waiting to be linked.
#[derive(Debug)]
pub struct SubShader {
    id: ShaderId,
    stage: ShaderStage,
    released: bool,
}

impl SubShader {
    /// Compiles `source` as `stage`.
    pub fn compile(
        device: &mut dyn GpuDevice,
        stage: ShaderStage,
        source: &str,
    ) -> RenderResult<Self> {
        let id = device.compile_shader(stage, source)?;
        Ok(Self {
            id,
            stage,
            released: false,
        })
    }

    pub fn id(&self) -> ShaderId {
        self.id
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Deletes the stage. Linking does this automatically.
    pub fn release(mut self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        self.released = true;
        device.delete_shader(self.id)
    }
}

impl Drop for SubShader {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("{} shader {} dropped without release", self.stage, self.id.0);
        }
    }
}

/// A linked vertex + fragment program with its uniform table.
#[derive(Debug)]
pub struct ShaderProgram {
    id: ProgramId,
    interface: ProgramInterface,
    uniforms: HashMap<String, (UniformLocation, UniformKind)>,
    warned: HashSet<String>,
    released: bool,
}

impl ShaderProgram {
    /// Links `vertex` and `fragment` into a program.
    ///
    /// Both stages are consumed and released after the attempt, whether or
    /// not linking succeeds. Uniform locations are resolved once, here.
    pub fn link(
        device: &mut dyn GpuDevice,
        vertex: SubShader,
        fragment: SubShader,
    ) -> RenderResult<Self> {
        let linked = device.link_program(vertex.id(), fragment.id());
        for stage in [vertex, fragment] {
            let (kind, id) = (stage.stage(), stage.id().0);
            if let Err(e) = stage.release(device) {
                log::warn!("failed to release {kind} shader {id} after link: {e}");
            }
        }
        let (id, interface) = linked?;

        let uniforms = interface
            .uniforms
            .iter()
            .enumerate()
            .filter_map(|(i, u)| {
                let index = u32::try_from(i).ok()?;
                Some((
                    u.name.clone(),
                    (UniformLocation { program: id, index }, u.kind),
                ))
            })
            .collect();
        log::debug!(
            "linked program {} with uniforms {:?}",
            id.0,
            interface
                .uniforms
                .iter()
                .map(|u| u.name.as_str())
                .collect::<Vec<_>>()
        );
        Ok(Self {
            id,
            interface,
            uniforms,
            warned: HashSet::new(),
            released: false,
        })
    }

    /// Makes this program current.
    pub fn bind(&self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        device.use_program(Some(self.id))
    }

    /// Clears the current program.
    pub fn unbind(&self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        device.use_program(None)
    }

    /// Sets uniform `name` on this program, which must be bound.
    ///
    /// An unknown name is not an error: it is logged once per name and
    /// reported as [`UniformStatus::Unknown`]. A value of the wrong kind is
    /// rejected with `UniformTypeMismatch`.
    pub fn set_uniform(
        &mut self,
        device: &mut dyn GpuDevice,
        name: &str,
        value: UniformValue,
    ) -> RenderResult<UniformStatus> {
        let Some(&(location, kind)) = self.uniforms.get(name) else {
            if self.warned.insert(name.to_owned()) {
                log::warn!("program {} has no uniform '{name}'", self.id.0);
            }
            return Ok(UniformStatus::Unknown);
        };
        if !kind.accepts(&value) {
            return Err(RenderError::UniformTypeMismatch {
                name: name.to_owned(),
                expected: kind,
                actual: value.kind(),
            });
        }
        device.set_uniform(location, &value)?;
        Ok(UniformStatus::Set)
    }

    /// Location of uniform `name`, if the program declares it.
    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.uniforms.get(name).map(|(location, _)| *location)
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.contains_key(name)
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    /// Reflected interface of the program.
    pub fn interface(&self) -> &ProgramInterface {
        &self.interface
    }

    /// Deletes the program.
    pub fn release(mut self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        self.released = true;
        log::debug!("releasing program {}", self.id.0);
        device.delete_program(self.id)
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("program {} dropped without release", self.id.0);
        }
    }
}

/// Builder for creating shader programs.
pub struct ShaderBuilder {
    vertex_source: Option<String>,
    fragment_source: Option<String>,
    label: Option<String>,
    compile_retries: u32,
}

impl ShaderBuilder {
    /// Creates a new shader builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            vertex_source: None,
            fragment_source: None,
            label: None,
            compile_retries: 0,
        }
    }

    /// Sets the vertex shader source (WGSL).
    pub fn with_vertex(mut self, source: impl Into<String>) -> Self {
        self.vertex_source = Some(source.into());
        self
    }

    /// Sets the fragment shader source (WGSL).
    pub fn with_fragment(mut self, source: impl Into<String>) -> Self {
        self.fragment_source = Some(source.into());
        self
    }

    /// Sets the program label used in log messages.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Extra compile attempts per stage after a failure. Defaults to 0.
    pub fn with_compile_retries(mut self, retries: u32) -> Self {
        self.compile_retries = retries;
        self
    }

    /// Compiles both stages and links them.
    pub fn build(self, device: &mut dyn GpuDevice) -> RenderResult<ShaderProgram> {
        let label = self.label.as_deref().unwrap_or("unnamed");
        let vertex = self.compile_stage(device, ShaderStage::Vertex, label)?;
        let fragment = match self.compile_stage(device, ShaderStage::Fragment, label) {
            Ok(fragment) => fragment,
            Err(e) => {
                if let Err(release_err) = vertex.release(device) {
                    log::warn!("failed to release vertex shader of '{label}': {release_err}");
                }
                return Err(e);
            }
        };
        let program = ShaderProgram::link(device, vertex, fragment)?;
        log::debug!("built program '{label}' ({})", program.id().0);
        Ok(program)
    }

    fn compile_stage(
        &self,
        device: &mut dyn GpuDevice,
        stage: ShaderStage,
        label: &str,
    ) -> RenderResult<SubShader> {
        let source = match stage {
            ShaderStage::Vertex => self.vertex_source.as_deref(),
            ShaderStage::Fragment => self.fragment_source.as_deref(),
        }
        .ok_or_else(|| RenderError::Compile {
            stage,
            log: format!("program '{label}' has no {stage} source"),
        })?;

        let mut attempt = 0;
        loop {
            match SubShader::compile(device, stage, source) {
                Ok(shader) => return Ok(shader),
                Err(e) if attempt < self.compile_retries => {
                    attempt += 1;
                    log::warn!(
                        "{stage} shader of '{label}' failed to compile, retry {attempt}/{}: {e}",
                        self.compile_retries
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for ShaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{GpuCommand, RecordingDevice};
    use glam::Mat4;

    const VERTEX: &str = include_str!("shaders/textured.vert.wgsl");
    const FRAGMENT: &str = include_str!("shaders/textured.frag.wgsl");

    fn textured(device: &mut RecordingDevice) -> ShaderProgram {
        ShaderBuilder::new()
            .with_vertex(VERTEX)
            .with_fragment(FRAGMENT)
            .with_label("textured")
            .build(device)
            .unwrap()
    }

    #[test]
    fn test_link_releases_sub_shaders() {
        let mut device = RecordingDevice::new();
        let program = textured(&mut device);
        assert_eq!(
            device.count(|c| matches!(c, GpuCommand::DeleteShader(_))),
            2
        );
        assert_eq!(device.live_resources(), 1);
        program.release(&mut device).unwrap();
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_failed_link_still_releases_sub_shaders() {
        let mut device = RecordingDevice::new();
        let vs = SubShader::compile(
            &mut device,
            ShaderStage::Vertex,
            "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return vec4<f32>(0.0); }",
        )
        .unwrap();
        let fs = SubShader::compile(&mut device, ShaderStage::Fragment, FRAGMENT).unwrap();
        let err = ShaderProgram::link(&mut device, vs, fs).unwrap_err();
        assert!(matches!(err, RenderError::Link { .. }));
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_varying_type_mismatch_fails_link_without_leaks() {
        let mut device = RecordingDevice::new();
        let vs = SubShader::compile(
            &mut device,
            ShaderStage::Vertex,
            "struct Out {
                @builtin(position) pos: vec4<f32>,
                @location(0) uv: vec3<f32>,
            };
            @vertex fn vs_main(@location(0) p: vec3<f32>) -> Out {
                return Out(vec4<f32>(p, 1.0), p);
            }",
        )
        .unwrap();
        let fs = SubShader::compile(
            &mut device,
            ShaderStage::Fragment,
            "@fragment fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
                return vec4<f32>(uv, 0.0, 1.0);
            }",
        )
        .unwrap();
        let err = ShaderProgram::link(&mut device, vs, fs).unwrap_err();
        match err {
            RenderError::Link { log } => assert!(log.contains("type differs")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_unknown_uniform_is_not_fatal() {
        let mut device = RecordingDevice::new();
        let mut program = textured(&mut device);
        program.bind(&mut device).unwrap();
        let status = program
            .set_uniform(&mut device, "u_missing", UniformValue::Float(1.0))
            .unwrap();
        assert_eq!(status, UniformStatus::Unknown);
        let again = program
            .set_uniform(&mut device, "u_missing", UniformValue::Float(1.0))
            .unwrap();
        assert_eq!(again, UniformStatus::Unknown);
        assert_eq!(program.warned.len(), 1);
        program.release(&mut device).unwrap();
    }

    #[test]
    fn test_uniform_kind_mismatch() {
        let mut device = RecordingDevice::new();
        let mut program = textured(&mut device);
        program.bind(&mut device).unwrap();
        let err = program
            .set_uniform(&mut device, "u_projection", UniformValue::Int(1))
            .unwrap_err();
        assert!(matches!(err, RenderError::UniformTypeMismatch { .. }));

        let status = program
            .set_uniform(&mut device, "u_texture", UniformValue::Int(0))
            .unwrap();
        assert_eq!(status, UniformStatus::Set);
        program
            .set_uniform(&mut device, "u_view", UniformValue::Mat4(Mat4::IDENTITY))
            .unwrap();
        program.unbind(&mut device).unwrap();
        program.release(&mut device).unwrap();
    }

    #[test]
    fn test_set_uniform_requires_bound_program() {
        let mut device = RecordingDevice::new();
        let mut program = textured(&mut device);
        let err = program
            .set_uniform(&mut device, "u_model", UniformValue::Mat4(Mat4::IDENTITY))
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidState(_)));
        program.release(&mut device).unwrap();
    }

    #[test]
    fn test_builder_reports_compile_log() {
        let mut device = RecordingDevice::new();
        let err = ShaderBuilder::new()
            .with_vertex(VERTEX)
            .with_fragment("@fragment fn fs_main() -> @location(0) vec4<f32> { return oops; }")
            .with_compile_retries(2)
            .build(&mut device)
            .unwrap_err();
        match err {
            RenderError::Compile { stage, log } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(log.contains("oops"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_builder_missing_source() {
        let mut device = RecordingDevice::new();
        let err = ShaderBuilder::default()
            .with_fragment(FRAGMENT)
            .build(&mut device)
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::Compile {
                stage: ShaderStage::Vertex,
                ..
            }
        ));
    }
}
