use crate::capture::{CAPTURE_FORMAT, CaptureTarget, face_forward, face_view_projection};
use crate::shaders;
use beachscape_common::NodeId;
use beachscape_render::{RenderView, SceneRenderer};
use beachscape_scene::{
    CaptureSlot, CubeImage, DirectionalLight, Material, MeshData, MeshId, Node, Scene,
    TextureImage, TextureSlot,
};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::collections::BTreeMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Half extent of the orthographic shadow frustum, covering the sand floor
/// and walls.
const SHADOW_EXTENT: f32 = 12.0;

const INITIAL_INSTANCE_CAPACITY: u32 = 64;

/// Sample count of the main pass. Capture passes render single-sampled.
const MSAA_SAMPLES: u32 = 4;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct FrameUniforms {
    view_proj: [[f32; 4]; 4],
    inv_view_proj: [[f32; 4]; 4],
    light_view_proj: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    camera_forward: [f32; 4],
    light_dir: [f32; 4],
    light_color: [f32; 4],
    ambient: [f32; 4],
    fog_color: [f32; 4],
    fog_params: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct ShadowUniforms {
    light_view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    normal: [f32; 3],
    uv: [f32; 2],
}

impl Vertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
    ];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct InstanceData {
    model_0: [f32; 4],
    model_1: [f32; 4],
    model_2: [f32; 4],
    model_3: [f32; 4],
    color: [f32; 4],
    /// x: receive shadow, y: reflectivity, z: double sided
    params: [f32; 4],
}

impl InstanceData {
    const ATTRIBUTES: [wgpu::VertexAttribute; 6] = wgpu::vertex_attr_array![
        3 => Float32x4,
        4 => Float32x4,
        5 => Float32x4,
        6 => Float32x4,
        7 => Float32x4,
        8 => Float32x4,
    ];
    const SHADOW_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        3 => Float32x4,
        4 => Float32x4,
        5 => Float32x4,
        6 => Float32x4,
    ];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceData>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRIBUTES,
        }
    }

    fn shadow_layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceData>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::SHADOW_ATTRIBUTES,
        }
    }

    fn for_node(node: &Node) -> Self {
        let cols = node.transform.matrix().to_cols_array_2d();
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let (color, reflectivity, double_sided) = match node.material {
            Material::Phong {
                color,
                double_sided,
                ..
            } => (color.to_array(), 0.0, double_sided),
            Material::Reflective { reflectivity, .. } => ([1.0; 3], reflectivity, false),
        };
        Self {
            model_0: cols[0],
            model_1: cols[1],
            model_2: cols[2],
            model_3: cols[3],
            color: [color[0], color[1], color[2], 1.0],
            params: [
                flag(node.receive_shadow),
                reflectivity,
                flag(double_sided),
                0.0,
            ],
        }
    }
}

/// Light, fog and shadow state shared by every view of one scene revision.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Lighting {
    light_view_proj: Mat4,
    light_dir: [f32; 4],
    light_color: [f32; 4],
    ambient: [f32; 4],
    fog_color: [f32; 4],
    fog_params: [f32; 4],
}

impl Lighting {
    fn from_scene(scene: &Scene) -> Self {
        let mut lighting = Self {
            light_view_proj: Mat4::IDENTITY,
            light_dir: [0.0, 1.0, 0.0, 0.0],
            light_color: [0.0; 4],
            ambient: [0.0; 4],
            fog_color: [1.0; 4],
            fog_params: [0.0; 4],
        };

        if let Some(light) = scene.directional() {
            let dir = light.direction_to_light();
            let shadows = if light.cast_shadow { 1.0 } else { 0.0 };
            let [r, g, b] = light.color.scaled(light.intensity);
            lighting.light_view_proj = light_view_projection(&light);
            lighting.light_dir = [dir.x, dir.y, dir.z, shadows];
            lighting.light_color = [r, g, b, 1.0];
        }
        if let Some(ambient) = scene.ambient() {
            let [r, g, b] = ambient.color.scaled(ambient.intensity);
            lighting.ambient = [r, g, b, 1.0];
        }
        if let Some(fog) = scene.fog() {
            let [r, g, b] = fog.color.to_array();
            lighting.fog_color = [r, g, b, 1.0];
            lighting.fog_params = [fog.near, fog.far, 1.0, 0.0];
        }
        lighting
    }

    fn frame_uniforms(&self, view_proj: Mat4, eye: Vec3, forward: Vec3) -> FrameUniforms {
        FrameUniforms {
            view_proj: view_proj.to_cols_array_2d(),
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            light_view_proj: self.light_view_proj.to_cols_array_2d(),
            camera_pos: [eye.x, eye.y, eye.z, 1.0],
            camera_forward: [forward.x, forward.y, forward.z, 0.0],
            light_dir: self.light_dir,
            light_color: self.light_color,
            ambient: self.ambient,
            fog_color: self.fog_color,
            fog_params: self.fog_params,
        }
    }
}

/// Orthographic projection looking from the light toward its target.
fn light_view_projection(light: &DirectionalLight) -> Mat4 {
    let distance = (light.position - light.target).length().max(1.0);
    let dir = light.direction_to_light();
    let up = if dir.abs_diff_eq(Vec3::Y, 1e-3) || dir.abs_diff_eq(Vec3::NEG_Y, 1e-3) {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let view = Mat4::look_at_rh(light.position, light.target, up);
    let projection = Mat4::orthographic_rh(
        -SHADOW_EXTENT,
        SHADOW_EXTENT,
        -SHADOW_EXTENT,
        SHADOW_EXTENT,
        1.0,
        distance + SHADOW_EXTENT * 2.0,
    );
    projection * view
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawMaterial {
    Phong(TextureSlot),
    Reflective(CaptureSlot),
}

/// One node's draw call, in scene node order.
#[derive(Debug, Clone, Copy)]
struct DrawItem {
    node: NodeId,
    mesh: MeshId,
    material: DrawMaterial,
    instance: u32,
    cast_shadow: bool,
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

struct GpuTexture {
    revision: u64,
    bind_group: wgpu::BindGroup,
}

/// Uniform buffer and group 0 bind group for one view.
struct ViewUniforms {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// Color pipelines for one target format.
struct PipelineSet {
    phong: wgpu::RenderPipeline,
    reflective: wgpu::RenderPipeline,
    sky: wgpu::RenderPipeline,
}

struct ShaderModules {
    phong: wgpu::ShaderModule,
    reflective: wgpu::ShaderModule,
    sky: wgpu::ShaderModule,
}

struct Layouts {
    frame: wgpu::BindGroupLayout,
    texture: wgpu::BindGroupLayout,
    cube: wgpu::BindGroupLayout,
}

impl PipelineSet {
    fn new(
        device: &wgpu::Device,
        layouts: &Layouts,
        modules: &ShaderModules,
        format: wgpu::TextureFormat,
        front_face: wgpu::FrontFace,
        sample_count: u32,
        label: &str,
    ) -> Self {
        let textured = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("textured_pipeline_layout"),
            bind_group_layouts: &[&layouts.frame, &layouts.texture],
            push_constant_ranges: &[],
        });
        let cubed = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("cube_pipeline_layout"),
            bind_group_layouts: &[&layouts.frame, &layouts.cube],
            push_constant_ranges: &[],
        });

        let mesh_buffers = [Vertex::layout(), InstanceData::layout()];
        let build = |name: &str,
                     layout: &wgpu::PipelineLayout,
                     module: &wgpu::ShaderModule,
                     entry: (&str, &str),
                     buffers: &[wgpu::VertexBufferLayout<'_>],
                     depth_write: bool,
                     depth_compare: wgpu::CompareFunction| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&format!("{label}_{name}_pipeline")),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some(entry.0),
                    compilation_options: Default::default(),
                    buffers,
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some(entry.1),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: depth_write,
                    depth_compare,
                    stencil: Default::default(),
                    bias: Default::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: sample_count,
                    ..Default::default()
                },
                multiview: None,
                cache: None,
            })
        };

        Self {
            phong: build(
                "phong",
                &textured,
                &modules.phong,
                ("vs_main", "fs_main"),
                &mesh_buffers,
                true,
                wgpu::CompareFunction::Less,
            ),
            reflective: build(
                "reflective",
                &cubed,
                &modules.reflective,
                ("vs_main", "fs_main"),
                &mesh_buffers,
                true,
                wgpu::CompareFunction::Less,
            ),
            sky: build(
                "sky",
                &cubed,
                &modules.sky,
                ("vs_sky", "fs_sky"),
                &[],
                false,
                wgpu::CompareFunction::Always,
            ),
        }
    }
}

/// wgpu-based diorama renderer.
///
/// Holds the two capture cube maps for the lifetime of the process. Scene
/// state is mirrored to the GPU lazily: meshes, textures and the background
/// upload once, instances and the shadow map refresh when the scene revision
/// changes, so with one rotation per tick the shadow pass runs once per tick.
pub struct WgpuRenderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    surface_format: wgpu::TextureFormat,
    layouts: Layouts,
    main_pipelines: PipelineSet,
    capture_pipelines: PipelineSet,
    shadow_pipeline: wgpu::RenderPipeline,
    shadow_uniforms: wgpu::Buffer,
    shadow_bind_group: wgpu::BindGroup,
    shadow_view: wgpu::TextureView,
    main_view: ViewUniforms,
    capture_views: [Vec<ViewUniforms>; 2],
    captures: [CaptureTarget; 2],
    capture_bind_groups: [wgpu::BindGroup; 2],
    texture_sampler: wgpu::Sampler,
    cube_sampler: wgpu::Sampler,
    fallback_texture: wgpu::BindGroup,
    textures: BTreeMap<TextureSlot, GpuTexture>,
    background: Option<GpuTexture>,
    meshes: Vec<GpuMesh>,
    instance_buffer: wgpu::Buffer,
    instance_capacity: u32,
    draws: Vec<DrawItem>,
    lighting: Lighting,
    synced_revision: Option<u64>,
    depth_texture: wgpu::TextureView,
    msaa_color: wgpu::TextureView,
    target: Option<wgpu::TextureView>,
}

impl WgpuRenderer {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        capture_resolution: u32,
        shadow_map_size: u32,
    ) -> Self {
        let layouts = Self::create_layouts(&device);

        let modules = ShaderModules {
            phong: device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("phong_shader"),
                source: wgpu::ShaderSource::Wgsl(
                    shaders::with_prelude(shaders::PHONG_FRAGMENT).into(),
                ),
            }),
            reflective: device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("reflective_shader"),
                source: wgpu::ShaderSource::Wgsl(
                    shaders::with_prelude(shaders::REFLECTIVE_FRAGMENT).into(),
                ),
            }),
            sky: device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("sky_shader"),
                source: wgpu::ShaderSource::Wgsl(
                    shaders::with_prelude(shaders::SKY_FRAGMENT).into(),
                ),
            }),
        };

        let main_pipelines = PipelineSet::new(
            &device,
            &layouts,
            &modules,
            surface_format,
            wgpu::FrontFace::Ccw,
            MSAA_SAMPLES,
            "main",
        );
        // The capture projection is mirrored, so winding flips.
        let capture_pipelines = PipelineSet::new(
            &device,
            &layouts,
            &modules,
            CAPTURE_FORMAT,
            wgpu::FrontFace::Cw,
            1,
            "capture",
        );

        // Shadow map
        let shadow_map_size = shadow_map_size.clamp(1, device.limits().max_texture_dimension_2d);
        let shadow_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shadow_map"),
            size: wgpu::Extent3d {
                width: shadow_map_size,
                height: shadow_map_size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let shadow_view = shadow_texture.create_view(&Default::default());
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let shadow_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow_bind_group_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let shadow_uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("shadow_uniforms"),
            contents: bytemuck::bytes_of(&ShadowUniforms {
                light_view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let shadow_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow_bind_group"),
            layout: &shadow_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: shadow_uniforms.as_entire_binding(),
            }],
        });
        let shadow_pipeline = Self::create_shadow_pipeline(&device, &shadow_layout);

        // Per-view uniforms: one for the main view, six per capture.
        let new_view = |label: &str| {
            Self::create_view_uniforms(&device, &layouts.frame, &shadow_view, &shadow_sampler, label)
        };
        let main_view = new_view("main_view");
        let capture_views: [Vec<ViewUniforms>; 2] = [
            (0..6).map(|_| new_view("capture_a_face")).collect(),
            (0..6).map(|_| new_view("capture_b_face")).collect(),
        ];

        let texture_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("texture_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let cube_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("cube_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let captures = [
            CaptureTarget::new(&device, capture_resolution, "capture_a"),
            CaptureTarget::new(&device, capture_resolution, "capture_b"),
        ];
        let capture_bind_groups = [
            Self::bind_texture(&device, &layouts.cube, &captures[0].cube_view, &cube_sampler),
            Self::bind_texture(&device, &layouts.cube, &captures[1].cube_view, &cube_sampler),
        ];

        let fallback_texture = {
            let white = TextureImage::solid(1, 1, [255; 4]);
            let view = Self::upload_image(&device, &queue, &white, "fallback_texture");
            Self::bind_texture(&device, &layouts.texture, &view, &texture_sampler)
        };

        let instance_buffer = Self::create_instance_buffer(&device, INITIAL_INSTANCE_CAPACITY);
        let depth_texture = Self::create_depth_texture(&device, width, height);
        let msaa_color = Self::create_msaa_color(&device, surface_format, width, height);

        tracing::info!(
            capture_resolution = captures[0].resolution,
            shadow_map_size,
            "wgpu renderer ready"
        );

        Self {
            device,
            queue,
            surface_format,
            layouts,
            main_pipelines,
            capture_pipelines,
            shadow_pipeline,
            shadow_uniforms,
            shadow_bind_group,
            shadow_view,
            main_view,
            capture_views,
            captures,
            capture_bind_groups,
            texture_sampler,
            cube_sampler,
            fallback_texture,
            textures: BTreeMap::new(),
            background: None,
            meshes: Vec::new(),
            instance_buffer,
            instance_capacity: INITIAL_INSTANCE_CAPACITY,
            draws: Vec::new(),
            lighting: Lighting::from_scene(&Scene::new()),
            synced_revision: None,
            depth_texture,
            msaa_color,
            target: None,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.depth_texture = Self::create_depth_texture(&self.device, width, height);
        self.msaa_color =
            Self::create_msaa_color(&self.device, self.surface_format, width, height);
    }

    /// Install the texture the next `render` call draws into. The target is
    /// consumed by that call.
    pub fn set_target(&mut self, view: wgpu::TextureView) {
        self.target = Some(view);
    }

    /// Bring GPU state up to date with the scene. No-op when the scene has
    /// not changed since the last sync.
    fn sync(&mut self, scene: &Scene) {
        if self.synced_revision == Some(scene.revision()) {
            return;
        }
        let _span = tracing::debug_span!("scene_sync", revision = scene.revision()).entered();

        self.upload_meshes(scene);
        self.upload_textures(scene);
        self.upload_background(scene);
        self.lighting = Lighting::from_scene(scene);
        self.rebuild_instances(scene);
        self.render_shadow_map();

        self.synced_revision = Some(scene.revision());
    }

    fn upload_meshes(&mut self, scene: &Scene) {
        for (index, mesh) in scene.meshes().iter().enumerate().skip(self.meshes.len()) {
            tracing::debug!(index, vertices = mesh.vertex_count(), "uploading mesh");
            self.meshes.push(Self::upload_mesh(&self.device, mesh));
        }
    }

    fn upload_textures(&mut self, scene: &Scene) {
        for (slot, entry) in scene.textures() {
            if self.textures.get(slot).map(|t| t.revision) == Some(entry.revision) {
                continue;
            }
            if !entry.image.is_consistent() {
                tracing::warn!("texture {slot:?} has inconsistent dimensions, skipping");
                continue;
            }
            let view = Self::upload_image(&self.device, &self.queue, &entry.image, "scene_texture");
            let bind_group =
                Self::bind_texture(&self.device, &self.layouts.texture, &view, &self.texture_sampler);
            tracing::debug!(
                "texture {slot:?} uploaded ({}x{})",
                entry.image.width,
                entry.image.height
            );
            self.textures.insert(
                *slot,
                GpuTexture {
                    revision: entry.revision,
                    bind_group,
                },
            );
        }
    }

    fn upload_background(&mut self, scene: &Scene) {
        let revision = scene.background_revision();
        if self.background.as_ref().map(|b| b.revision) == Some(revision) {
            return;
        }
        let Some(cube) = scene.background() else {
            return;
        };
        if !cube.is_consistent() {
            tracing::warn!("background cube has inconsistent faces, skipping");
            return;
        }
        let view = Self::upload_cube(&self.device, &self.queue, cube);
        let bind_group =
            Self::bind_texture(&self.device, &self.layouts.cube, &view, &self.cube_sampler);
        tracing::debug!(face_size = cube.size, "background uploaded");
        self.background = Some(GpuTexture {
            revision,
            bind_group,
        });
    }

    fn rebuild_instances(&mut self, scene: &Scene) {
        self.draws.clear();
        let mut instances = Vec::with_capacity(scene.node_count());

        for (id, node) in scene.nodes() {
            if node.mesh.0 as usize >= self.meshes.len() {
                tracing::warn!("node {} references unknown mesh {:?}", node.name, node.mesh);
                continue;
            }
            let material = match node.material {
                Material::Phong { texture, .. } => DrawMaterial::Phong(texture),
                Material::Reflective { capture, .. } => DrawMaterial::Reflective(capture),
            };
            self.draws.push(DrawItem {
                node: *id,
                mesh: node.mesh,
                material,
                instance: instances.len() as u32,
                cast_shadow: node.cast_shadow,
            });
            instances.push(InstanceData::for_node(node));
        }

        if instances.len() as u32 > self.instance_capacity {
            self.instance_capacity = (instances.len() as u32).next_power_of_two();
            self.instance_buffer = Self::create_instance_buffer(&self.device, self.instance_capacity);
        }
        if !instances.is_empty() {
            self.queue
                .write_buffer(&self.instance_buffer, 0, bytemuck::cast_slice(&instances));
        }
    }

    fn render_shadow_map(&self) {
        if self.lighting.light_dir[3] < 0.5 {
            return;
        }
        self.queue.write_buffer(
            &self.shadow_uniforms,
            0,
            bytemuck::bytes_of(&ShadowUniforms {
                light_view_proj: self.lighting.light_view_proj.to_cols_array_2d(),
            }),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("shadow_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("shadow_pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.shadow_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            pass.set_pipeline(&self.shadow_pipeline);
            pass.set_bind_group(0, &self.shadow_bind_group, &[]);
            pass.set_vertex_buffer(1, self.instance_buffer.slice(..));
            for draw in self.draws.iter().filter(|d| d.cast_shadow) {
                self.draw_mesh(&mut pass, draw);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Record the background and every node not rejected by `skip`.
    fn draw_scene(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        pipelines: &PipelineSet,
        view: &ViewUniforms,
        skip: impl Fn(&DrawItem) -> bool,
    ) {
        pass.set_bind_group(0, &view.bind_group, &[]);

        if let Some(background) = &self.background {
            pass.set_pipeline(&pipelines.sky);
            pass.set_bind_group(1, &background.bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        pass.set_vertex_buffer(1, self.instance_buffer.slice(..));
        for draw in self.draws.iter().filter(|d| !skip(d)) {
            match draw.material {
                DrawMaterial::Phong(slot) => {
                    let texture = self
                        .textures
                        .get(&slot)
                        .map(|t| &t.bind_group)
                        .unwrap_or(&self.fallback_texture);
                    pass.set_pipeline(&pipelines.phong);
                    pass.set_bind_group(1, texture, &[]);
                }
                DrawMaterial::Reflective(capture) => {
                    pass.set_pipeline(&pipelines.reflective);
                    pass.set_bind_group(1, &self.capture_bind_groups[capture.index()], &[]);
                }
            }
            self.draw_mesh(pass, draw);
        }
    }

    fn draw_mesh(&self, pass: &mut wgpu::RenderPass<'_>, draw: &DrawItem) {
        let Some(mesh) = self.meshes.get(draw.mesh.0 as usize) else {
            return;
        };
        if mesh.index_count == 0 {
            return;
        }
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..mesh.index_count, 0, draw.instance..draw.instance + 1);
    }

    fn clear_color(&self) -> wgpu::Color {
        // The background covers the whole target when present.
        if self.background.is_some() {
            wgpu::Color::BLACK
        } else {
            wgpu::Color::WHITE
        }
    }

    fn create_layouts(device: &wgpu::Device) -> Layouts {
        let frame = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
            ],
        });

        let material = |label: &str, view_dimension: wgpu::TextureViewDimension| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            })
        };

        Layouts {
            frame,
            texture: material("texture_bind_group_layout", wgpu::TextureViewDimension::D2),
            cube: material("cube_bind_group_layout", wgpu::TextureViewDimension::Cube),
        }
    }

    fn create_shadow_pipeline(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> wgpu::RenderPipeline {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shadow_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::SHADOW_SHADER.into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow_pipeline_layout"),
            bind_group_layouts: &[layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("vs_shadow"),
                compilation_options: Default::default(),
                buffers: &[Vertex::layout(), InstanceData::shadow_layout()],
            },
            fragment: None,
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: Default::default(),
                bias: wgpu::DepthBiasState {
                    constant: 2,
                    slope_scale: 2.0,
                    clamp: 0.0,
                },
            }),
            multisample: Default::default(),
            multiview: None,
            cache: None,
        })
    }

    fn create_view_uniforms(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        shadow_view: &wgpu::TextureView,
        shadow_sampler: &wgpu::Sampler,
        label: &str,
    ) -> ViewUniforms {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(shadow_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(shadow_sampler),
                },
            ],
        });
        ViewUniforms { buffer, bind_group }
    }

    fn bind_texture(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        view: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        })
    }

    fn upload_mesh(device: &wgpu::Device, mesh: &MeshData) -> GpuMesh {
        let vertices: Vec<Vertex> = mesh
            .positions
            .iter()
            .zip(&mesh.normals)
            .zip(&mesh.uvs)
            .map(|((position, normal), uv)| Vertex {
                position: *position,
                normal: *normal,
                uv: *uv,
            })
            .collect();

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh_vertex_buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh_index_buffer"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        }
    }

    fn upload_image(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &TextureImage,
        label: &str,
    ) -> wgpu::TextureView {
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: image.width,
                    height: image.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &image.pixels,
        );
        texture.create_view(&Default::default())
    }

    fn upload_cube(device: &wgpu::Device, queue: &wgpu::Queue, cube: &CubeImage) -> wgpu::TextureView {
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("background_cube"),
                size: wgpu::Extent3d {
                    width: cube.size,
                    height: cube.size,
                    depth_or_array_layers: 6,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &cube.faces.concat(),
        );
        texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        })
    }

    fn create_instance_buffer(device: &wgpu::Device, capacity: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("instance_buffer"),
            size: (capacity as u64) * std::mem::size_of::<InstanceData>() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn create_depth_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
        device
            .create_texture(&main_attachment("depth_texture", DEPTH_FORMAT, width, height))
            .create_view(&Default::default())
    }

    fn create_msaa_color(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> wgpu::TextureView {
        device
            .create_texture(&main_attachment("msaa_color", format, width, height))
            .create_view(&Default::default())
    }
}

/// Multisampled attachment of the main pass, resolved into the surface.
fn main_attachment(
    label: &str,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> wgpu::TextureDescriptor<'_> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: MSAA_SAMPLES,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    }
}

impl SceneRenderer for WgpuRenderer {
    fn refresh_capture(&mut self, slot: CaptureSlot, scene: &Scene) {
        self.sync(scene);
        let _span = tracing::trace_span!("capture", ?slot).entered();

        let probe = *scene.probe(slot);
        let target = &self.captures[slot.index()];
        let views = &self.capture_views[slot.index()];

        for (face, view) in views.iter().enumerate() {
            let view_proj = face_view_projection(face, probe.position, probe.near, probe.far);
            let uniforms = self
                .lighting
                .frame_uniforms(view_proj, probe.position, face_forward(face));
            self.queue
                .write_buffer(&view.buffer, 0, bytemuck::bytes_of(&uniforms));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("capture_encoder"),
            });
        for (face, view) in views.iter().enumerate() {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("capture_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.face_views[face],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color()),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            // Leave out the node this capture feeds and anything else that
            // samples this cube map while it is being written.
            self.draw_scene(&mut pass, &self.capture_pipelines, view, |draw| {
                Some(draw.node) == probe.feeds
                    || draw.material == DrawMaterial::Reflective(slot)
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn render(&mut self, scene: &Scene, view: &RenderView) {
        self.sync(scene);
        let Some(target) = self.target.take() else {
            tracing::debug!("no render target installed, frame skipped");
            return;
        };

        let view_proj = view.view_projection();
        self.queue.write_buffer(
            &self.main_view.buffer,
            0,
            bytemuck::bytes_of(&self.lighting.frame_uniforms(
                view_proj,
                view.eye,
                view.forward(),
            )),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("render_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("main_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.msaa_color,
                    resolve_target: Some(&target),
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color()),
                        store: wgpu::StoreOp::Discard,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_texture,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            self.draw_scene(&mut pass, &self.main_pipelines, &self.main_view, |_| false);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beachscape_scene::{DioramaConfig, build_diorama};

    #[test]
    fn gpu_struct_sizes_match_shader_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<InstanceData>(), 96);
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 3 * 64 + 7 * 16);
    }

    #[test]
    fn fog_depth_is_view_space_depth() {
        // Perspective clip w equals view-space depth, so the fog depth the
        // shader derives from camera_pos and camera_forward must match it.
        let lighting = Lighting::from_scene(&Scene::new());
        let point = Vec3::new(6.0, -2.0, -9.0);
        let fog_depth = |u: &FrameUniforms| {
            let eye = Vec3::from_slice(&u.camera_pos[..3]);
            let forward = Vec3::from_slice(&u.camera_forward[..3]);
            (point - eye).dot(forward)
        };

        let view = RenderView::default();
        let main = lighting.frame_uniforms(view.view_projection(), view.eye, view.forward());
        let clip = view.view_projection() * point.extend(1.0);
        assert!((fog_depth(&main) - clip.w).abs() < 1e-3);
        assert!(fog_depth(&main) < point.distance(view.eye));

        let eye = Vec3::new(0.0, -0.35, 0.0);
        for face in 0..6 {
            let vp = face_view_projection(face, eye, 1.0, 1000.0);
            let uniforms = lighting.frame_uniforms(vp, eye, face_forward(face));
            let clip = vp * point.extend(1.0);
            assert!((fog_depth(&uniforms) - clip.w).abs() < 1e-3, "face {face}");
        }
    }

    #[test]
    fn main_attachments_are_multisampled() {
        let desc = main_attachment("msaa_color", wgpu::TextureFormat::Bgra8UnormSrgb, 0, 720);
        assert_eq!(desc.sample_count, MSAA_SAMPLES);
        assert_eq!(desc.size.width, 1);
        assert_eq!(desc.size.height, 720);
        assert_eq!(desc.format, wgpu::TextureFormat::Bgra8UnormSrgb);
    }

    #[test]
    fn light_frustum_covers_diorama_floor() {
        let (scene, _) = build_diorama(&DioramaConfig::default()).unwrap();
        let light = scene.directional().unwrap();
        let vp = light_view_projection(&light);

        for corner in [
            Vec3::new(-7.5, -3.0, -7.5),
            Vec3::new(7.5, -3.0, -7.5),
            Vec3::new(-7.5, -3.0, 7.5),
            Vec3::new(7.5, -3.0, 7.5),
            Vec3::new(0.0, 1.5, 0.0),
        ] {
            let ndc = vp.project_point3(corner);
            assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "{corner:?} -> {ndc:?}");
            assert!((0.0..=1.0).contains(&ndc.z), "{corner:?} -> {ndc:?}");
        }
    }

    #[test]
    fn lighting_from_diorama() {
        let (scene, _) = build_diorama(&DioramaConfig::default()).unwrap();
        let lighting = Lighting::from_scene(&scene);

        assert_eq!(lighting.ambient, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(lighting.light_color, [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(lighting.light_dir[3], 1.0);
        assert_eq!(lighting.fog_params, [5.0, 30.0, 1.0, 0.0]);
        let dir = Vec3::new(lighting.light_dir[0], lighting.light_dir[1], lighting.light_dir[2]);
        assert!((dir - Vec3::new(70.0, 50.0, 50.0).normalize()).length() < 1e-5);
    }

    #[test]
    fn empty_scene_has_no_light_or_fog() {
        let lighting = Lighting::from_scene(&Scene::new());
        assert_eq!(lighting.ambient, [0.0; 4]);
        assert_eq!(lighting.light_color, [0.0; 4]);
        assert_eq!(lighting.light_dir[3], 0.0);
        assert_eq!(lighting.fog_params[2], 0.0);
    }

    #[test]
    fn instance_data_encodes_material_flags() {
        let (scene, handles) = build_diorama(&DioramaConfig::default()).unwrap();

        let wall = InstanceData::for_node(scene.get(handles.walls[0]).unwrap());
        assert_eq!(wall.params[0], 1.0);
        assert_eq!(wall.params[2], 1.0);

        let sphere = InstanceData::for_node(scene.get(handles.spheres[0]).unwrap());
        assert_eq!(sphere.color, [1.0; 4]);
        assert_eq!(sphere.params[1], 1.0);

        let knot = scene.get(handles.torus_knot).unwrap();
        let data = InstanceData::for_node(knot);
        let translation = Vec3::new(data.model_3[0], data.model_3[1], data.model_3[2]);
        assert_eq!(translation, knot.transform.position);
    }
}
