//! WGSL compilation and program reflection.
//!
//! Both device backends compile and link through this module, so the error
//! logs and the uniform table are identical whether a program ends up on a
//! GPU or in a [`crate::RecordingDevice`].

use std::collections::BTreeMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Binding, ImageClass, ImageDimension, ScalarKind, TypeInner, VectorSize};

use crate::device::{ProgramInterface, ShaderStage, UniformInfo, UniformKind};
use crate::error::{RenderError, RenderResult};

/// A user-facing inter-stage variable.
#[derive(Debug, Clone, PartialEq)]
struct StageVar {
    location: u32,
    ty: TypeInner,
}

/// What a bound resource is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Uniform(UniformKind),
    Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Resource {
    name: String,
    group: u32,
    binding: u32,
    kind: ResourceKind,
}

/// A parsed and validated shader stage.
#[derive(Debug, Clone)]
pub struct CompiledStage {
    stage: ShaderStage,
    entry_point: String,
    source: String,
    inputs: Vec<StageVar>,
    outputs: Vec<StageVar>,
    resources: Vec<Resource>,
}

impl CompiledStage {
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Name of the stage's entry point function.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// WGSL source the stage was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    }
}

fn compile_error(stage: ShaderStage, log: impl Into<String>) -> RenderError {
    RenderError::Compile {
        stage,
        log: log.into(),
    }
}

/// Parses and validates one WGSL stage.
///
/// The source must contain exactly one entry point for `stage`. Parser and
/// validator diagnostics are returned verbatim in [`RenderError::Compile`].
pub fn compile(stage: ShaderStage, source: &str) -> RenderResult<CompiledStage> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| compile_error(stage, e.emit_to_string(source)))?;

    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| compile_error(stage, e.emit_to_string(source)))?;

    let mut entries = module
        .entry_points
        .iter()
        .filter(|ep| ep.stage == naga_stage(stage));
    let entry = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        (None, _) => {
            return Err(compile_error(
                stage,
                format!("no @{stage} entry point found"),
            ))
        }
        (Some(_), Some(_)) => {
            return Err(compile_error(
                stage,
                format!("more than one @{stage} entry point"),
            ))
        }
    };

    let mut inputs = Vec::new();
    for arg in &entry.function.arguments {
        collect_locations(&module, arg.ty, arg.binding.as_ref(), &mut inputs);
    }
    let mut outputs = Vec::new();
    if let Some(result) = &entry.function.result {
        collect_locations(&module, result.ty, result.binding.as_ref(), &mut outputs);
    }

    let mut resources = Vec::new();
    for (_, global) in module.global_variables.iter() {
        if !matches!(global.space, AddressSpace::Uniform | AddressSpace::Handle) {
            continue;
        }
        let Some(binding) = &global.binding else {
            continue;
        };
        let name = global.name.clone().unwrap_or_default();
        let kind = resource_kind(&module.types[global.ty].inner).ok_or_else(|| {
            compile_error(
                stage,
                format!("resource '{name}' has a type that cannot be bound as a uniform"),
            )
        })?;
        resources.push(Resource {
            name,
            group: binding.group,
            binding: binding.binding,
            kind,
        });
    }

    Ok(CompiledStage {
        stage,
        entry_point: entry.name.clone(),
        source: source.to_owned(),
        inputs,
        outputs,
        resources,
    })
}

fn collect_locations(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    out: &mut Vec<StageVar>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push(StageVar {
            location: *location,
            ty: module.types[ty].inner.clone(),
        }),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn resource_kind(inner: &TypeInner) -> Option<ResourceKind> {
    let kind = match inner {
        TypeInner::Scalar(s) if s.kind == ScalarKind::Sint && s.width == 4 => UniformKind::Int,
        TypeInner::Scalar(s) if s.kind == ScalarKind::Float && s.width == 4 => UniformKind::Float,
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => match size {
            VectorSize::Bi => UniformKind::Vec2,
            VectorSize::Tri => UniformKind::Vec3,
            VectorSize::Quad => UniformKind::Vec4,
        },
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar,
        } if scalar.kind == ScalarKind::Float => UniformKind::Mat4,
        TypeInner::Image {
            dim: ImageDimension::D2,
            arrayed: false,
            class: ImageClass::Sampled {
                kind: ScalarKind::Float,
                multi: false,
            },
        } => UniformKind::Texture,
        TypeInner::Sampler { comparison: false } => return Some(ResourceKind::Sampler),
        _ => return None,
    };
    Some(ResourceKind::Uniform(kind))
}

/// Links a vertex and a fragment stage into a program interface.
///
/// Every fragment input must be written by the vertex stage at the same
/// location with the same type, and a `(group, binding)` pair must name the
/// same resource in both stages.
pub fn link(vertex: &CompiledStage, fragment: &CompiledStage) -> RenderResult<ProgramInterface> {
    let mut log = Vec::new();
    if vertex.stage != ShaderStage::Vertex {
        log.push(format!(
            "expected a vertex stage in the vertex slot, got {}",
            vertex.stage
        ));
    }
    if fragment.stage != ShaderStage::Fragment {
        log.push(format!(
            "expected a fragment stage in the fragment slot, got {}",
            fragment.stage
        ));
    }

    for input in &fragment.inputs {
        match vertex.outputs.iter().find(|o| o.location == input.location) {
            None => log.push(format!(
                "fragment input @location({}) is not written by the vertex stage",
                input.location
            )),
            Some(output) if output.ty != input.ty => log.push(format!(
                "@location({}) type differs between stages: vertex writes {:?}, fragment reads {:?}",
                input.location, output.ty, input.ty
            )),
            Some(_) => {}
        }
    }

    let mut slots: BTreeMap<(u32, u32), Resource> = BTreeMap::new();
    for resource in vertex.resources.iter().chain(&fragment.resources) {
        let key = (resource.group, resource.binding);
        match slots.get(&key) {
            Some(existing) if existing != resource => log.push(format!(
                "@group({}) @binding({}) is declared as '{}' and '{}' with different types or names",
                key.0, key.1, existing.name, resource.name
            )),
            Some(_) => {}
            None => {
                if let Some(other) = slots.values().find(|r| r.name == resource.name) {
                    log.push(format!(
                        "'{}' is bound at @group({}) @binding({}) and @group({}) @binding({})",
                        resource.name, other.group, other.binding, key.0, key.1
                    ));
                }
                slots.insert(key, resource.clone());
            }
        }
    }

    if !log.is_empty() {
        return Err(RenderError::Link {
            log: log.join("\n"),
        });
    }

    let mut interface = ProgramInterface {
        vertex_inputs: vertex.inputs.iter().map(|v| v.location).collect(),
        ..ProgramInterface::default()
    };
    for ((group, binding), resource) in slots {
        match resource.kind {
            ResourceKind::Uniform(kind) => interface.uniforms.push(UniformInfo {
                name: resource.name,
                kind,
                group,
                binding,
            }),
            ResourceKind::Sampler => interface.samplers.push((group, binding)),
        }
    }
    Ok(interface)
}
