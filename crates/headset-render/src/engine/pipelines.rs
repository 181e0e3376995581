//! Program objects, pipeline cache and per-draw bind groups.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use super::{textures, GpuProgram, WgpuDevice};
use crate::device::{ProgramId, ProgramInterface, UniformKind, UniformValue, VertexLayout};
use crate::error::{RenderError, RenderResult};
use crate::reflection::CompiledStage;

/// A bind group entry before it is borrowed into a [`wgpu::BindGroupEntry`].
enum OwnedResource {
    Buffer(wgpu::Buffer),
    View(wgpu::TextureView),
    Sampler,
}

fn vertex_format(components: u32) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

impl WgpuDevice {
    /// Creates shader modules and the pipeline layout for a linked interface.
    pub(super) fn create_program(
        &self,
        vertex: &CompiledStage,
        fragment: &CompiledStage,
        interface: ProgramInterface,
    ) -> RenderResult<GpuProgram> {
        let (vertex_module, fragment_module) = self.with_oom_scope("shader modules", |device| {
            let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(vertex.entry_point()),
                source: wgpu::ShaderSource::Wgsl(vertex.source().into()),
            });
            let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(fragment.entry_point()),
                source: wgpu::ShaderSource::Wgsl(fragment.source().into()),
            });
            (vertex_module, fragment_module)
        })?;

        let group_layouts: Vec<wgpu::BindGroupLayout> = (0..interface.group_count())
            .map(|group| {
                let mut entries: Vec<wgpu::BindGroupLayoutEntry> = interface
                    .uniforms
                    .iter()
                    .filter(|u| u.group == group)
                    .map(|u| wgpu::BindGroupLayoutEntry {
                        binding: u.binding,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: match u.kind {
                            UniformKind::Texture => wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            _ => wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                        },
                        count: None,
                    })
                    .collect();
                entries.extend(interface.samplers.iter().filter(|(g, _)| *g == group).map(
                    |(_, binding)| wgpu::BindGroupLayoutEntry {
                        binding: *binding,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ));
                self.device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some("program bind group layout"),
                        entries: &entries,
                    })
            })
            .collect();

        let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("program pipeline layout"),
                bind_group_layouts: &layout_refs,
                push_constant_ranges: &[],
            });

        Ok(GpuProgram {
            interface,
            vertex_module,
            vertex_entry: vertex.entry_point().to_owned(),
            fragment_module,
            fragment_entry: fragment.entry_point().to_owned(),
            group_layouts,
            pipeline_layout,
            values: HashMap::new(),
        })
    }

    /// Returns the cached pipeline for `(program, layout)`, creating it on first use.
    pub(super) fn pipeline_for(
        &mut self,
        program_id: ProgramId,
        layout: &VertexLayout,
    ) -> RenderResult<wgpu::RenderPipeline> {
        let key = (program_id, layout.clone());
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }
        let program = self
            .programs
            .get(&program_id)
            .ok_or(RenderError::UseAfterFree {
                kind: "program",
                id: program_id.0,
            })?;
        program.interface.check_layout(layout)?;

        let attributes: Vec<wgpu::VertexAttribute> = layout
            .offsets()
            .map(|(attr, offset)| wgpu::VertexAttribute {
                format: vertex_format(attr.components),
                offset: offset as u64,
                shader_location: attr.slot,
            })
            .collect();

        let pipeline = self.with_oom_scope("render pipeline", |device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("headset mesh pipeline"),
                layout: Some(&program.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.vertex_module,
                    entry_point: Some(program.vertex_entry.as_str()),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: layout.stride_bytes() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.fragment_module,
                    entry_point: Some(program.fragment_entry.as_str()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: textures::COLOR_FORMAT,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None, // mirrored hand scale flips winding
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: textures::DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        })?;
        log::debug!(
            "created pipeline for program {} with stride {}",
            program_id.0,
            layout.stride()
        );
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Builds bind groups holding the program's current uniform values and
    /// the textures bound to the units its texture uniforms name.
    pub(super) fn snapshot_bind_groups(
        &self,
        program_id: ProgramId,
    ) -> RenderResult<Vec<wgpu::BindGroup>> {
        let program = self
            .programs
            .get(&program_id)
            .ok_or(RenderError::UseAfterFree {
                kind: "program",
                id: program_id.0,
            })?;
        let interface = &program.interface;

        let mut groups = Vec::with_capacity(program.group_layouts.len());
        for (group, layout) in (0u32..).zip(&program.group_layouts) {
            let mut owned: Vec<(u32, OwnedResource)> = Vec::new();
            for (index, uniform) in (0u32..).zip(&interface.uniforms) {
                if uniform.group != group {
                    continue;
                }
                let value = program.values.get(&index);
                let resource = if uniform.kind == UniformKind::Texture {
                    OwnedResource::View(self.view_for_unit(value))
                } else {
                    let bytes = value.map_or_else(
                        || vec![0u8; uniform.kind.padded_size()],
                        UniformValue::to_bytes,
                    );
                    OwnedResource::Buffer(self.device.create_buffer_init(
                        &wgpu::util::BufferInitDescriptor {
                            label: Some(uniform.name.as_str()),
                            contents: &bytes,
                            usage: wgpu::BufferUsages::UNIFORM,
                        },
                    ))
                };
                owned.push((uniform.binding, resource));
            }
            for (_, binding) in interface.samplers.iter().filter(|(g, _)| *g == group) {
                owned.push((*binding, OwnedResource::Sampler));
            }

            let entries: Vec<wgpu::BindGroupEntry> = owned
                .iter()
                .map(|(binding, resource)| wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: match resource {
                        OwnedResource::Buffer(buffer) => buffer.as_entire_binding(),
                        OwnedResource::View(view) => wgpu::BindingResource::TextureView(view),
                        OwnedResource::Sampler => wgpu::BindingResource::Sampler(&self.sampler),
                    },
                })
                .collect();
            groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("per-draw bind group"),
                layout,
                entries: &entries,
            }));
        }
        Ok(groups)
    }

    /// Texture view bound to the unit named by a texture uniform, or the
    /// 1x1 white fallback when the unit is empty or not yet uploaded.
    fn view_for_unit(&self, value: Option<&UniformValue>) -> wgpu::TextureView {
        let unit = match value {
            Some(UniformValue::Int(unit)) => u32::try_from(*unit).ok(),
            _ => Some(0),
        };
        unit.and_then(|u| self.texture_units.get(&u))
            .and_then(|id| self.textures.get(id))
            .and_then(Option::as_ref)
            .unwrap_or(&self.fallback_view)
            .clone()
    }
}
