use crate::shader::{MAX_BONE_REGISTERS, ShaderKey};
use glam::Affine3A;
use skelmodel::{BufferId, BufferKind, DrawCall, SkinningBackend, SkinningSettings, VertexFormat};
use std::collections::HashMap;
use std::ops::Range;
use wgpu::util::DeviceExt;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Globals {
    clip_from_world: [[f32; 4]; 4],
    light_dir: [f32; 4],
}

/// Per-draw uniform block: model transform, flags and the bone registers.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct DrawUniforms {
    pub world_from_model: [[f32; 4]; 4],
    pub flags: [f32; 4],
    pub bones: [[f32; 4]; MAX_BONE_REGISTERS],
}

impl DrawUniforms {
    pub fn from_call(call: &DrawCall<'_>) -> Self {
        let mut u = <Self as bytemuck::Zeroable>::zeroed();
        u.world_from_model = affine_to_cols(&call.transform);
        u.flags[0] = if call.fullbright { 1.0 } else { 0.0 };
        if let Some(bones) = call.bones {
            if bones.data.len() > MAX_BONE_REGISTERS {
                log::warn!(
                    "{}: {} bone registers, only {MAX_BONE_REGISTERS} fit",
                    call.mesh,
                    bones.data.len()
                );
            }
            let n = bones.data.len().min(MAX_BONE_REGISTERS);
            u.bones[..n].copy_from_slice(&bones.data[..n]);
        }
        u
    }
}

pub(crate) fn affine_to_cols(m: &Affine3A) -> [[f32; 4]; 4] {
    let c = m.to_cols_array();
    [
        [c[0], c[1], c[2], 0.0],
        [c[3], c[4], c[5], 0.0],
        [c[6], c[7], c[8], 0.0],
        [c[9], c[10], c[11], 1.0],
    ]
}

pub(crate) fn align_to(n: u64, alignment: u64) -> u64 {
    n.div_ceil(alignment) * alignment
}

const STATIC_ATTRS: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];
const NORMAL_ATTRS: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];
const BUMP_ATTRS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
    3 => Float32x4
];
const WEIGHTED_ATTRS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
    4 => Unorm8x4,
    5 => Uint8x4
];
const WEIGHTED_BUMP_ATTRS: [wgpu::VertexAttribute; 6] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
    3 => Float32x4,
    4 => Unorm8x4,
    5 => Uint8x4
];

pub(crate) fn vertex_attributes(format: VertexFormat) -> &'static [wgpu::VertexAttribute] {
    match format {
        VertexFormat::Static => &STATIC_ATTRS,
        VertexFormat::Normal => &NORMAL_ATTRS,
        VertexFormat::Bump => &BUMP_ATTRS,
        VertexFormat::Weighted => &WEIGHTED_ATTRS,
        VertexFormat::WeightedBump => &WEIGHTED_BUMP_ATTRS,
    }
}

pub(crate) fn vertex_entry_point(format: VertexFormat) -> &'static str {
    match format {
        VertexFormat::Static => "vs_static",
        VertexFormat::Normal => "vs_normal",
        VertexFormat::Bump => "vs_bump",
        VertexFormat::Weighted => "vs_weighted",
        VertexFormat::WeightedBump => "vs_weighted_bump",
    }
}

type PipelineKey = (VertexFormat, ShaderKey);

struct GpuBuffer {
    kind: BufferKind,
    buffer: wgpu::Buffer,
}

struct PendingDraw {
    pipeline: PipelineKey,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    indices: Range<u32>,
    slot: u32,
}

/// wgpu implementation of [`SkinningBackend`]. Models draw into it while they are rendered;
/// [`SkinRenderer::prepare`] uploads the recorded draws and [`SkinRenderer::render`] replays
/// them into a render pass.
pub struct SkinRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    color_format: wgpu::TextureFormat,
    depth_format: Option<wgpu::TextureFormat>,
    pipeline_layout: wgpu::PipelineLayout,
    shaders: HashMap<ShaderKey, wgpu::ShaderModule>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    globals_buffer: wgpu::Buffer,
    globals_bind_group: wgpu::BindGroup,
    draw_bind_group_layout: wgpu::BindGroupLayout,
    draw_buffer: wgpu::Buffer,
    draw_bind_group: wgpu::BindGroup,
    draw_capacity: usize,
    draw_stride: u64,
    staging: Vec<u8>,
    buffers: HashMap<BufferId, GpuBuffer>,
    // Released mid-frame; destroyed once the frame's draws are gone.
    retired: Vec<BufferId>,
    next_id: u64,
    draws: Vec<PendingDraw>,
}

impl SkinRenderer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        color_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        let globals_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("globals bind group layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let draw_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("draw bind group layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<DrawUniforms>() as u64,
                        ),
                    },
                    count: None,
                }],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("skelmodel-wgpu pipeline layout"),
            bind_group_layouts: &[&globals_bind_group_layout, &draw_bind_group_layout],
            push_constant_ranges: &[],
        });

        let globals = Globals {
            clip_from_world: affine_to_cols(&Affine3A::IDENTITY),
            light_dir: [0.0, 0.0, -1.0, 0.0],
        };
        let globals_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("globals buffer"),
            contents: bytemuck::bytes_of(&globals),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let globals_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("globals bind group"),
            layout: &globals_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: globals_buffer.as_entire_binding(),
            }],
        });

        let draw_stride = align_to(
            std::mem::size_of::<DrawUniforms>() as u64,
            u64::from(device.limits().min_uniform_buffer_offset_alignment),
        );
        let draw_capacity = 64;
        let (draw_buffer, draw_bind_group) =
            create_draw_buffer(device, &draw_bind_group_layout, draw_capacity, draw_stride);

        Self {
            device: device.clone(),
            queue: queue.clone(),
            color_format,
            depth_format,
            pipeline_layout,
            shaders: HashMap::new(),
            pipelines: HashMap::new(),
            globals_buffer,
            globals_bind_group,
            draw_bind_group_layout,
            draw_buffer,
            draw_bind_group,
            draw_capacity,
            draw_stride,
            staging: Vec::new(),
            buffers: HashMap::new(),
            retired: Vec::new(),
            next_id: 0,
            draws: Vec::new(),
        }
    }

    /// `base` with the vertex uniform budget this renderer offers for bones.
    pub fn skinning_settings(&self, base: SkinningSettings) -> SkinningSettings {
        SkinningSettings {
            max_vs_uniforms: MAX_BONE_REGISTERS as i32 + base.reserve_vp_params,
            ..base
        }
    }

    pub fn update_globals(&self, clip_from_world: [[f32; 4]; 4], light_dir: [f32; 3]) {
        let globals = Globals {
            clip_from_world,
            light_dir: [light_dir[0], light_dir[1], light_dir[2], 0.0],
        };
        self.queue
            .write_buffer(&self.globals_buffer, 0, bytemuck::bytes_of(&globals));
    }

    /// Forgets the draws recorded for the previous frame and destroys the buffers released
    /// while it was recorded.
    pub fn begin_frame(&mut self) {
        self.draws.clear();
        self.staging.clear();
        for id in self.retired.drain(..) {
            if let Some(buf) = self.buffers.remove(&id) {
                buf.buffer.destroy();
            }
        }
    }

    pub fn num_draws(&self) -> usize {
        self.draws.len()
    }

    /// Uploads the uniforms of every draw recorded since `begin_frame`.
    pub fn prepare(&mut self) {
        if self.draws.len() > self.draw_capacity {
            while self.draw_capacity < self.draws.len() {
                self.draw_capacity *= 2;
            }
            let (buffer, bind_group) = create_draw_buffer(
                &self.device,
                &self.draw_bind_group_layout,
                self.draw_capacity,
                self.draw_stride,
            );
            self.draw_buffer = buffer;
            self.draw_bind_group = bind_group;
        }
        if !self.staging.is_empty() {
            self.queue.write_buffer(&self.draw_buffer, 0, &self.staging);
        }
    }

    pub fn render<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        pass.set_bind_group(0, &self.globals_bind_group, &[]);
        for draw in &self.draws {
            let (Some(pipeline), Some(vb), Some(ib)) = (
                self.pipelines.get(&draw.pipeline),
                self.buffers.get(&draw.vertex_buffer),
                self.buffers.get(&draw.index_buffer),
            ) else {
                log::debug!("skipping draw with released buffers");
                continue;
            };
            pass.set_pipeline(pipeline);
            let offset = (u64::from(draw.slot) * self.draw_stride) as u32;
            pass.set_bind_group(1, &self.draw_bind_group, &[offset]);
            pass.set_vertex_buffer(0, vb.buffer.slice(..));
            pass.set_index_buffer(ib.buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(draw.indices.clone(), 0, 0..1);
        }
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        let (format, shader_key) = key;
        let device = &self.device;
        let shader = self.shaders.entry(shader_key).or_insert_with(|| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&shader_key.label()),
                source: wgpu::ShaderSource::Wgsl(shader_key.source().into()),
            })
        });
        log::debug!("creating pipeline {format:?} / {}", shader_key.label());
        let pipeline = create_pipeline(
            device,
            &self.pipeline_layout,
            shader,
            format,
            self.color_format,
            self.depth_format,
        );
        self.pipelines.insert(key, pipeline);
    }
}

impl SkinningBackend for SkinRenderer {
    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BufferId {
        self.next_id += 1;
        let id = BufferId(self.next_id);
        let buffer = create_gpu_buffer(&self.device, kind, data);
        self.buffers.insert(id, GpuBuffer { kind, buffer });
        id
    }

    fn update_buffer(&mut self, id: BufferId, data: &[u8]) {
        let Some(buf) = self.buffers.get_mut(&id) else {
            log::warn!("update of unknown buffer {id:?}");
            return;
        };
        if data.len() as u64 > buf.buffer.size() {
            buf.buffer = create_gpu_buffer(&self.device, buf.kind, data);
        } else if !data.is_empty() {
            self.queue.write_buffer(&buf.buffer, 0, data);
        }
    }

    fn release_buffer(&mut self, id: BufferId) {
        if self.buffers.contains_key(&id) {
            self.retired.push(id);
        }
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        if call.index_count == 0 {
            return;
        }
        let key = (
            call.format,
            ShaderKey {
                skin: call.bones.map(|b| (b.mode, b.weights)),
            },
        );
        self.ensure_pipeline(key);

        let slot = self.draws.len() as u32;
        let uniforms = DrawUniforms::from_call(call);
        self.staging.extend_from_slice(bytemuck::bytes_of(&uniforms));
        self.staging
            .resize(((u64::from(slot) + 1) * self.draw_stride) as usize, 0);
        self.draws.push(PendingDraw {
            pipeline: key,
            vertex_buffer: call.vertex_buffer,
            index_buffer: call.index_buffer,
            indices: call.first_index..call.first_index + call.index_count,
            slot,
        });
    }
}

fn create_gpu_buffer(device: &wgpu::Device, kind: BufferKind, data: &[u8]) -> wgpu::Buffer {
    let (label, usage) = match kind {
        BufferKind::Vertex => ("skelmodel vertices", wgpu::BufferUsages::VERTEX),
        BufferKind::Index => ("skelmodel indices", wgpu::BufferUsages::INDEX),
    };
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: data,
        usage: usage | wgpu::BufferUsages::COPY_DST,
    })
}

fn create_draw_buffer(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    capacity: usize,
    stride: u64,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("skelmodel draw uniforms"),
        size: capacity as u64 * stride,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("draw bind group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: wgpu::BufferSize::new(std::mem::size_of::<DrawUniforms>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    format: VertexFormat,
    color_format: wgpu::TextureFormat,
    depth_format: Option<wgpu::TextureFormat>,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("skelmodel-wgpu pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some(vertex_entry_point(format)),
            compilation_options: Default::default(),
            buffers: &[wgpu::VertexBufferLayout {
                array_stride: format.stride() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: vertex_attributes(format),
            }],
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}
