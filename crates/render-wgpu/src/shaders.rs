/// Shared frame bindings, vertex/instance layout, shadow lookup and fog.
///
/// Group 0 is bound once per view. Color pipelines append their own
/// fragment stage and group 1 material bindings.
pub const FRAME_PRELUDE: &str = r#"
struct Frame {
    view_proj: mat4x4<f32>,
    inv_view_proj: mat4x4<f32>,
    light_view_proj: mat4x4<f32>,
    camera_pos: vec4<f32>,
    // xyz: unit view direction, fog depth is measured along it
    camera_forward: vec4<f32>,
    // xyz: unit vector toward the light, w: 1 when shadows are enabled
    light_dir: vec4<f32>,
    light_color: vec4<f32>,
    ambient: vec4<f32>,
    fog_color: vec4<f32>,
    // x: near, y: far, z: 1 when fog is enabled
    fog_params: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> frame: Frame;
@group(0) @binding(1)
var shadow_map: texture_depth_2d;
@group(0) @binding(2)
var shadow_sampler: sampler_comparison;

const SHADOW_BIAS: f32 = 0.002;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

struct InstanceInput {
    @location(3) model_0: vec4<f32>,
    @location(4) model_1: vec4<f32>,
    @location(5) model_2: vec4<f32>,
    @location(6) model_3: vec4<f32>,
    @location(7) color: vec4<f32>,
    // x: receive shadow, y: reflectivity, z: double sided
    @location(8) params: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) color: vec4<f32>,
    @location(4) params: vec4<f32>,
};

@vertex
fn vs_main(vertex: VertexInput, instance: InstanceInput) -> VertexOutput {
    let model = mat4x4<f32>(
        instance.model_0,
        instance.model_1,
        instance.model_2,
        instance.model_3,
    );
    let world_pos = model * vec4<f32>(vertex.position, 1.0);
    let world_normal = (model * vec4<f32>(vertex.normal, 0.0)).xyz;

    var out: VertexOutput;
    out.clip_position = frame.view_proj * world_pos;
    out.world_pos = world_pos.xyz;
    out.world_normal = normalize(world_normal);
    out.uv = vertex.uv;
    out.color = instance.color;
    out.params = instance.params;
    return out;
}

fn shadow_factor(world_pos: vec3<f32>) -> f32 {
    if frame.light_dir.w < 0.5 {
        return 1.0;
    }
    let clip = frame.light_view_proj * vec4<f32>(world_pos, 1.0);
    let ndc = clip.xyz / clip.w;
    let uv = ndc.xy * vec2<f32>(0.5, -0.5) + vec2<f32>(0.5, 0.5);
    if uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || ndc.z > 1.0 {
        return 1.0;
    }

    // 3x3 PCF
    let texel = 1.0 / f32(textureDimensions(shadow_map).x);
    var lit = 0.0;
    for (var x = -1; x <= 1; x = x + 1) {
        for (var y = -1; y <= 1; y = y + 1) {
            let offset = vec2<f32>(f32(x), f32(y)) * texel;
            lit = lit + textureSampleCompareLevel(
                shadow_map,
                shadow_sampler,
                uv + offset,
                ndc.z - SHADOW_BIAS,
            );
        }
    }
    return lit / 9.0;
}

fn apply_fog(color: vec3<f32>, world_pos: vec3<f32>) -> vec3<f32> {
    if frame.fog_params.z < 0.5 {
        return color;
    }
    let depth = dot(world_pos - frame.camera_pos.xyz, frame.camera_forward.xyz);
    let amount = smoothstep(frame.fog_params.x, frame.fog_params.y, depth);
    return mix(color, frame.fog_color.rgb, amount);
}
"#;

/// Textured Blinn-Phong with shadows and fog.
pub const PHONG_FRAGMENT: &str = r#"
@group(1) @binding(0)
var base_texture: texture_2d<f32>;
@group(1) @binding(1)
var base_sampler: sampler;

const SHININESS: f32 = 30.0;
const SPECULAR_STRENGTH: f32 = 0.067;

@fragment
fn fs_main(in: VertexOutput, @builtin(front_facing) front: bool) -> @location(0) vec4<f32> {
    let base = textureSample(base_texture, base_sampler, in.uv) * in.color;

    var normal = normalize(in.world_normal);
    if !front && in.params.z > 0.5 {
        normal = -normal;
    }

    var shadow = 1.0;
    if in.params.x > 0.5 {
        shadow = shadow_factor(in.world_pos);
    }

    let to_light = frame.light_dir.xyz;
    let to_eye = normalize(frame.camera_pos.xyz - in.world_pos);
    let diffuse = max(dot(normal, to_light), 0.0);
    let half_dir = normalize(to_light + to_eye);
    let specular = pow(max(dot(normal, half_dir), 0.0), SHININESS) * SPECULAR_STRENGTH;

    let light = frame.ambient.rgb + frame.light_color.rgb * diffuse * shadow;
    let color = base.rgb * light + frame.light_color.rgb * specular * shadow;
    return vec4<f32>(apply_fog(color, in.world_pos), base.a);
}
"#;

/// Mirror surface: reflected view direction looked up in a cube map.
pub const REFLECTIVE_FRAGMENT: &str = r#"
@group(1) @binding(0)
var env_map: texture_cube<f32>;
@group(1) @binding(1)
var env_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let normal = normalize(in.world_normal);
    let incident = normalize(in.world_pos - frame.camera_pos.xyz);
    let env = textureSample(env_map, env_sampler, reflect(incident, normal)).rgb;
    let color = mix(in.color.rgb, in.color.rgb * env, in.params.y);
    return vec4<f32>(apply_fog(color, in.world_pos), 1.0);
}
"#;

/// Background cube drawn as a fullscreen triangle at the far plane.
pub const SKY_FRAGMENT: &str = r#"
@group(1) @binding(0)
var sky_map: texture_cube<f32>;
@group(1) @binding(1)
var sky_sampler: sampler;

struct SkyOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) ndc: vec2<f32>,
};

@vertex
fn vs_sky(@builtin(vertex_index) index: u32) -> SkyOutput {
    let corner = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    let ndc = corner * 2.0 - vec2<f32>(1.0, 1.0);

    var out: SkyOutput;
    out.clip_position = vec4<f32>(ndc, 1.0, 1.0);
    out.ndc = ndc;
    return out;
}

@fragment
fn fs_sky(in: SkyOutput) -> @location(0) vec4<f32> {
    let far = frame.inv_view_proj * vec4<f32>(in.ndc, 1.0, 1.0);
    let dir = far.xyz / far.w - frame.camera_pos.xyz;
    return vec4<f32>(textureSample(sky_map, sky_sampler, dir).rgb, 1.0);
}
"#;

/// Depth-only pass from the directional light.
pub const SHADOW_SHADER: &str = r#"
struct ShadowUniforms {
    light_view_proj: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> shadow: ShadowUniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

struct InstanceInput {
    @location(3) model_0: vec4<f32>,
    @location(4) model_1: vec4<f32>,
    @location(5) model_2: vec4<f32>,
    @location(6) model_3: vec4<f32>,
};

@vertex
fn vs_shadow(vertex: VertexInput, instance: InstanceInput) -> @builtin(position) vec4<f32> {
    let model = mat4x4<f32>(
        instance.model_0,
        instance.model_1,
        instance.model_2,
        instance.model_3,
    );
    return shadow.light_view_proj * model * vec4<f32>(vertex.position, 1.0);
}
"#;

/// Full WGSL source for a color stage: prelude plus one fragment body.
pub fn with_prelude(body: &str) -> String {
    format!("{FRAME_PRELUDE}\n{body}")
}
