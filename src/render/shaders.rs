//! WGSL sources for every pass.
//!
//! Screen passes share a G-buffer prelude whose declarations depend on the
//! sample count, and the SSAO blur bakes its workgroup size into the source,
//! so both are assembled at runtime and rebuilt when those values change.

/// Binding slots shared by all screen passes.
pub mod bindings {
    /// Group holding the G-buffer textures in every screen pass.
    pub const GBUFFER_GROUP: u32 = 0;
    pub const DIFFUSE: u32 = 0;
    pub const NORMAL: u32 = 1;
    pub const SPECULAR: u32 = 2;
    pub const DEPTH: u32 = 3;
    /// Texture slots of the lighting inputs in the compositing and debug passes.
    pub const SSAO: u32 = 4;
    pub const SHADOW: u32 = 5;
    /// Distance cube, viewed as a 2D array, in the debug pass.
    pub const SHADOW_CUBE: u32 = 6;
}

/// Declarations and `load_*` helpers for the G-buffer at a given sample count.
pub fn gbuffer_prelude(samples: u32) -> String {
    let (colour, depth, level) = if samples > 1 {
        (
            "texture_multisampled_2d<f32>",
            "texture_depth_multisampled_2d",
            "sample_index",
        )
    } else {
        ("texture_2d<f32>", "texture_depth_2d", "0")
    };
    format!(
        r#"
const MSAA_SAMPLES: i32 = {samples};

@group(0) @binding(0) var diffuse_texture: {colour};
@group(0) @binding(1) var normal_texture: {colour};
@group(0) @binding(2) var specular_texture: {colour};
@group(0) @binding(3) var depth_texture: {depth};

fn load_diffuse(pixel: vec2<i32>, sample_index: i32) -> vec4<f32> {{
    return textureLoad(diffuse_texture, pixel, {level});
}}

fn load_normal(pixel: vec2<i32>, sample_index: i32) -> vec4<f32> {{
    return textureLoad(normal_texture, pixel, {level});
}}

fn load_specular(pixel: vec2<i32>, sample_index: i32) -> vec4<f32> {{
    return textureLoad(specular_texture, pixel, {level});
}}

fn load_depth(pixel: vec2<i32>, sample_index: i32) -> f32 {{
    return textureLoad(depth_texture, pixel, {level});
}}

fn gbuffer_size() -> vec2<i32> {{
    return vec2<i32>(textureDimensions(depth_texture));
}}
"#,
        samples = samples.max(1),
    )
}

const FULLSCREEN: &str = r#"
struct FullscreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> FullscreenOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: FullscreenOutput;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}
"#;

const LIGHT_STRUCT: &str = r#"
struct PointLight {
    position: vec3<f32>,
    intensity: f32,
    colour: vec3<f32>,
    _pad0: f32,
    attenuation: vec3<f32>,
    _pad1: f32,
}
"#;

pub const GEOMETRY: &str = r#"
struct FrameUniform {
    view_projection: mat4x4<f32>,
    camera_position: vec4<f32>,
}

struct ObjectUniform {
    model: mat4x4<f32>,
    normal: mat3x4<f32>,
    diffuse: vec4<f32>,
    specular: vec4<f32>,
}

@group(0) @binding(0)
var<uniform> frame: FrameUniform;

@group(1) @binding(0)
var<uniform> object: ObjectUniform;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) normal: vec3<f32>,
}

struct GBufferOutput {
    @location(0) diffuse: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) specular: vec4<f32>,
}

@vertex
fn vs_geometry(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world_position = object.model * vec4<f32>(input.position, 1.0);
    out.position = frame.view_projection * world_position;
    out.normal = mat3x3<f32>(
        object.normal[0].xyz,
        object.normal[1].xyz,
        object.normal[2].xyz
    ) * input.normal;
    return out;
}

@fragment
fn fs_geometry(input: VertexOutput) -> GBufferOutput {
    var out: GBufferOutput;
    out.diffuse = object.diffuse;
    out.normal = vec4<f32>(normalize(input.normal), 1.0);
    out.specular = object.specular;
    return out;
}

@fragment
fn fs_wireframe(input: VertexOutput) -> GBufferOutput {
    var out: GBufferOutput;
    out.diffuse = vec4<f32>(0.1, 1.0, 0.4, 1.0);
    out.normal = vec4<f32>(normalize(input.normal), 1.0);
    out.specular = vec4<f32>(0.0, 0.0, 0.0, 1.0);
    return out;
}
"#;

pub const SHADOW_DEPTH: &str = r#"
struct FaceUniform {
    view_projection: mat4x4<f32>,
    // xyz: light position, w: far plane
    light: vec4<f32>,
}

struct ObjectUniform {
    model: mat4x4<f32>,
    normal: mat3x4<f32>,
    diffuse: vec4<f32>,
    specular: vec4<f32>,
}

@group(0) @binding(0)
var<uniform> face: FaceUniform;

@group(1) @binding(0)
var<uniform> object: ObjectUniform;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
}

@vertex
fn vs_shadow(@location(0) position: vec3<f32>, @location(1) normal: vec3<f32>) -> VertexOutput {
    var out: VertexOutput;
    let world = object.model * vec4<f32>(position, 1.0);
    out.position = face.view_projection * world;
    out.world_position = world.xyz;
    return out;
}

@fragment
fn fs_shadow(input: VertexOutput) -> @location(0) vec4<f32> {
    let distance_to_light = min(distance(input.world_position, face.light.xyz), face.light.w);
    return vec4<f32>(distance_to_light, 0.0, 0.0, 1.0);
}
"#;

const SSAO_BODY: &str = r#"
struct SsaoUniform {
    projection: mat4x4<f32>,
    inv_projection: mat4x4<f32>,
    view: mat4x4<f32>,
    screen_resolution: vec2<f32>,
    ssao_samples: u32,
    ssao_noise_size: u32,
    ssao_radius: f32,
    ssao_offset: f32,
    ssao_texture_scale: f32,
    _pad: f32,
}

@group(1) @binding(0) var<uniform> params: SsaoUniform;
@group(1) @binding(1) var<storage, read> kernel: array<vec4<f32>>;
@group(1) @binding(2) var noise_texture: texture_2d<f32>;

fn view_position(pixel: vec2<i32>, depth: f32) -> vec3<f32> {
    let uv = (vec2<f32>(pixel) + 0.5) / params.screen_resolution;
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let view = params.inv_projection * ndc;
    return view.xyz / view.w;
}

fn any_perpendicular(n: vec3<f32>) -> vec3<f32> {
    if (abs(n.x) > 0.9) {
        return cross(n, vec3<f32>(0.0, 1.0, 0.0));
    }
    return cross(n, vec3<f32>(1.0, 0.0, 0.0));
}

@fragment
fn fs_ssao(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let size = gbuffer_size();
    let pixel = clamp(
        vec2<i32>(input.position.xy / params.ssao_texture_scale),
        vec2<i32>(0),
        size - vec2<i32>(1)
    );
    let depth = load_depth(pixel, 0);
    if (depth >= 1.0 || params.ssao_samples == 0u) {
        return vec4<f32>(1.0);
    }

    let origin = view_position(pixel, depth);
    let world_normal = load_normal(pixel, 0).xyz;
    let normal = normalize((params.view * vec4<f32>(world_normal, 0.0)).xyz);
    let noise_size = i32(max(params.ssao_noise_size, 1u));
    let random = textureLoad(noise_texture, pixel % vec2<i32>(noise_size), 0).xyz;

    var tangent = random - normal * dot(random, normal);
    if (dot(tangent, tangent) < 1e-6) {
        tangent = any_perpendicular(normal);
    }
    tangent = normalize(tangent);
    let bitangent = cross(normal, tangent);
    let tbn = mat3x3<f32>(tangent, bitangent, normal);

    let count = min(params.ssao_samples, arrayLength(&kernel));
    var occlusion = 0.0;
    for (var i = 0u; i < count; i = i + 1u) {
        let sample_position = origin + (tbn * kernel[i].xyz) * params.ssao_radius;
        let clip = params.projection * vec4<f32>(sample_position, 1.0);
        if (clip.w <= 0.0) {
            continue;
        }
        let ndc = clip.xy / clip.w;
        let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        if (any(uv < vec2<f32>(0.0)) || any(uv >= vec2<f32>(1.0))) {
            continue;
        }
        let sample_pixel = vec2<i32>(uv * params.screen_resolution);
        let scene_depth = load_depth(sample_pixel, 0);
        if (scene_depth >= 1.0) {
            continue;
        }
        let scene_z = view_position(sample_pixel, scene_depth).z;
        let range = smoothstep(0.0, 1.0, params.ssao_radius / max(abs(origin.z - scene_z), 1e-4));
        if (scene_z >= sample_position.z + params.ssao_offset) {
            occlusion = occlusion + range;
        }
    }
    let ambient = 1.0 - occlusion / f32(max(count, 1u));
    return vec4<f32>(ambient, ambient, ambient, 1.0);
}
"#;

const SSAO_BLUR: &str = r#"
@group(0) @binding(0) var raw_texture: texture_2d<f32>;
@group(0) @binding(1) var blurred_texture: texture_storage_2d<r32float, write>;

@compute @workgroup_size({{WORKGROUP_X}}, {{WORKGROUP_Y}}, 1)
fn cs_blur(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = vec2<i32>(textureDimensions(raw_texture));
    let pixel = vec2<i32>(id.xy);
    if (pixel.x >= size.x || pixel.y >= size.y) {
        return;
    }
    var total = 0.0;
    for (var y = -2; y < 2; y = y + 1) {
        for (var x = -2; x < 2; x = x + 1) {
            let tap = clamp(pixel + vec2<i32>(x, y), vec2<i32>(0), size - vec2<i32>(1));
            total = total + textureLoad(raw_texture, tap, 0).r;
        }
    }
    textureStore(blurred_texture, pixel, vec4<f32>(total / 16.0, 0.0, 0.0, 1.0));
}
"#;

const SHADOW_SCREEN_BODY: &str = r#"
struct ShadowScreenUniform {
    inv_view_projection: mat4x4<f32>,
    light: PointLight,
    screen_resolution: vec2<f32>,
    near_plane: f32,
    far_plane: f32,
    bias: f32,
    weight: f32,
    _pad: vec2<f32>,
}

@group(1) @binding(0) var<uniform> shadow: ShadowScreenUniform;
@group(1) @binding(1) var shadow_cube: texture_cube<f32>;
@group(1) @binding(2) var shadow_sampler: sampler;

@fragment
fn fs_shadow_screen(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let depth = load_depth(pixel, 0);
    if (depth >= 1.0) {
        return vec4<f32>(0.0);
    }
    let uv = (vec2<f32>(pixel) + 0.5) / shadow.screen_resolution;
    let clip = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world = shadow.inv_view_projection * clip;
    let to_fragment = world.xyz / world.w - shadow.light.position;
    let actual = length(to_fragment);
    if (actual <= shadow.near_plane || actual >= shadow.far_plane) {
        return vec4<f32>(0.0);
    }
    let stored = textureSampleLevel(shadow_cube, shadow_sampler, to_fragment, 0.0).r;
    let occluded = select(0.0, 1.0, actual - shadow.bias > stored);
    return vec4<f32>(occluded * shadow.weight, occluded, 0.0, 1.0);
}
"#;

const COMPOSITE_BODY: &str = r#"
const MAX_LIGHTS: u32 = {{MAX_LIGHTS}}u;

struct CompositeUniform {
    inv_view_projection: mat4x4<f32>,
    camera_position: vec4<f32>,
    ambient: vec4<f32>,
    screen_resolution: vec2<f32>,
    ssao_texture_scale: f32,
    msaa_samples: u32,
    ambient_occlusion: u32,
    shadow_mapping: u32,
    _pad: vec2<u32>,
}

struct LightBlock {
    lights: array<PointLight, {{MAX_LIGHTS}}>,
    num_lights: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(1) @binding(0) var<uniform> frame: CompositeUniform;
@group(1) @binding(1) var<uniform> light_block: LightBlock;
@group(1) @binding(4) var ssao_texture: texture_2d<f32>;
@group(1) @binding(5) var shadow_texture: texture_2d<f32>;

fn shade_sample(
    pixel: vec2<i32>,
    sample_index: i32,
    ambient_factor: f32,
    shadow_factor: f32,
) -> vec3<f32> {
    let albedo = load_diffuse(pixel, sample_index);
    let depth = load_depth(pixel, sample_index);
    if (depth >= 1.0) {
        return albedo.rgb;
    }
    let normal = normalize(load_normal(pixel, sample_index).xyz);
    let specular = load_specular(pixel, sample_index);

    let uv = (vec2<f32>(pixel) + 0.5) / frame.screen_resolution;
    let clip = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world = frame.inv_view_projection * clip;
    let world_position = world.xyz / world.w;
    let view_direction = normalize(frame.camera_position.xyz - world_position);

    var direct = vec3<f32>(0.0);
    let count = min(light_block.num_lights, MAX_LIGHTS);
    for (var i = 0u; i < count; i = i + 1u) {
        let light = light_block.lights[i];
        if (light.intensity <= 0.0) {
            continue;
        }
        let to_light = light.position - world_position;
        let distance_to_light = length(to_light);
        let light_direction = to_light / max(distance_to_light, 1e-4);
        let attenuation = 1.0 / max(
            dot(
                light.attenuation,
                vec3<f32>(distance_to_light * distance_to_light, distance_to_light, 1.0),
            ),
            1e-4
        );
        let lambert = max(dot(normal, light_direction), 0.0);
        let halfway = normalize(light_direction + view_direction);
        let highlight = pow(max(dot(normal, halfway), 0.0), max(specular.a, 1.0)) * specular.rgb;
        let radiance = light.colour * light.intensity * attenuation;
        direct = direct + (albedo.rgb * lambert + highlight) * radiance;
    }
    return albedo.rgb * frame.ambient.rgb * ambient_factor + direct * (1.0 - shadow_factor);
}

@fragment
fn fs_composite(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    var ambient_factor = 1.0;
    if (frame.ambient_occlusion != 0u) {
        let ssao_size = vec2<i32>(textureDimensions(ssao_texture));
        let ssao_pixel = clamp(
            vec2<i32>(input.position.xy * frame.ssao_texture_scale),
            vec2<i32>(0),
            ssao_size - vec2<i32>(1)
        );
        ambient_factor = textureLoad(ssao_texture, ssao_pixel, 0).r;
    }
    var shadow_factor = 0.0;
    if (frame.shadow_mapping != 0u) {
        shadow_factor = clamp(textureLoad(shadow_texture, pixel, 0).r, 0.0, 1.0);
    }
    let samples = max(i32(frame.msaa_samples), 1);
    var colour = vec3<f32>(0.0);
    for (var s = 0; s < samples; s = s + 1) {
        colour = colour + shade_sample(pixel, s, ambient_factor, shadow_factor);
    }
    return vec4<f32>(colour / f32(samples), 1.0);
}
"#;

const DEBUG_BODY: &str = r#"
struct DebugUniform {
    buffer: u32,
    near_plane: f32,
    face: u32,
    shadow_far: f32,
    ambient_occlusion: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

@group(1) @binding(0) var<uniform> debug_view: DebugUniform;
@group(1) @binding(4) var ssao_texture: texture_2d<f32>;
@group(1) @binding(5) var shadow_texture: texture_2d<f32>;
@group(1) @binding(6) var shadow_cube_texture: texture_2d_array<f32>;

@fragment
fn fs_debug(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let size = gbuffer_size();
    let pixel = clamp(vec2<i32>(input.uv * vec2<f32>(size)), vec2<i32>(0), size - vec2<i32>(1));
    switch debug_view.buffer {
        case 0u: {
            return vec4<f32>(load_diffuse(pixel, 0).rgb, 1.0);
        }
        case 1u: {
            return vec4<f32>(load_normal(pixel, 0).xyz * 0.5 + 0.5, 1.0);
        }
        case 2u: {
            return vec4<f32>(load_specular(pixel, 0).rgb, 1.0);
        }
        case 3u: {
            let depth = load_depth(pixel, 0);
            let distance_to_camera = debug_view.near_plane / max(1.0 - depth, 1e-7);
            let shade = 1.0 - clamp(distance_to_camera / 50.0, 0.0, 1.0);
            return vec4<f32>(shade, shade, shade, 1.0);
        }
        case 4u: {
            if debug_view.ambient_occlusion == 0u {
                return vec4<f32>(1.0, 1.0, 1.0, 1.0);
            }
            let ssao_size = vec2<i32>(textureDimensions(ssao_texture));
            let ssao_pixel = clamp(
                vec2<i32>(input.uv * vec2<f32>(ssao_size)),
                vec2<i32>(0),
                ssao_size - vec2<i32>(1),
            );
            let ambient = textureLoad(ssao_texture, ssao_pixel, 0).r;
            return vec4<f32>(ambient, ambient, ambient, 1.0);
        }
        case 5u: {
            let shadow = textureLoad(shadow_texture, pixel, 0);
            return vec4<f32>(shadow.r, shadow.r, shadow.r, 1.0);
        }
        case 6u: {
            let face_size = vec2<i32>(textureDimensions(shadow_cube_texture));
            let texel = clamp(
                vec2<i32>(input.uv * vec2<f32>(face_size)),
                vec2<i32>(0),
                face_size - vec2<i32>(1),
            );
            let distance = textureLoad(shadow_cube_texture, texel, i32(debug_view.face), 0).r;
            let shade = 1.0 - clamp(distance / max(debug_view.shadow_far, 1e-6), 0.0, 1.0);
            return vec4<f32>(shade, shade, shade, 1.0);
        }
        default: {
            return vec4<f32>(1.0, 0.0, 1.0, 1.0);
        }
    }
}
"#;

const DOWNSAMPLE_BODY: &str = r#"
@group(0) @binding(0) var source_texture: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;

@fragment
fn fs_downsample(input: FullscreenOutput) -> @location(0) vec4<f32> {
    return textureSampleLevel(source_texture, source_sampler, input.uv, 0.0);
}
"#;

const PRESENT_BODY: &str = r#"
struct PresentUniform {
    exposure: f32,
    tone_adjust: u32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var screen_texture: texture_2d<f32>;
@group(0) @binding(1) var screen_sampler: sampler;
@group(0) @binding(2) var<uniform> present: PresentUniform;

@fragment
fn fs_present(input: FullscreenOutput) -> @location(0) vec4<f32> {
    var colour = textureSampleLevel(screen_texture, screen_sampler, input.uv, 0.0).rgb;
    if (present.tone_adjust != 0u) {
        colour = vec3<f32>(1.0) - exp(-colour * present.exposure);
    }
    return vec4<f32>(colour, 1.0);
}
"#;

pub fn ssao(samples: u32) -> String {
    [FULLSCREEN, &gbuffer_prelude(samples), SSAO_BODY].concat()
}

pub fn ssao_blur(workgroup_x: u32, workgroup_y: u32) -> String {
    SSAO_BLUR
        .replace("{{WORKGROUP_X}}", &workgroup_x.max(1).to_string())
        .replace("{{WORKGROUP_Y}}", &workgroup_y.max(1).to_string())
}

pub fn shadow_screen(samples: u32) -> String {
    [FULLSCREEN, LIGHT_STRUCT, &gbuffer_prelude(samples), SHADOW_SCREEN_BODY].concat()
}

pub fn composite(samples: u32, max_lights: usize) -> String {
    let body = COMPOSITE_BODY.replace("{{MAX_LIGHTS}}", &max_lights.to_string());
    [FULLSCREEN, LIGHT_STRUCT, &gbuffer_prelude(samples), &body].concat()
}

pub fn debug(samples: u32) -> String {
    [FULLSCREEN, &gbuffer_prelude(samples), DEBUG_BODY].concat()
}

pub fn downsample() -> String {
    [FULLSCREEN, DOWNSAMPLE_BODY].concat()
}

pub fn present() -> String {
    [FULLSCREEN, PRESENT_BODY].concat()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_sample_prelude_uses_plain_textures() {
        let prelude = gbuffer_prelude(1);
        assert!(prelude.contains("texture_2d<f32>"));
        assert!(prelude.contains("texture_depth_2d;"));
        assert!(!prelude.contains("multisampled"));
    }

    #[test]
    fn multisampled_prelude_loads_per_sample() {
        let prelude = gbuffer_prelude(4);
        assert!(prelude.contains("texture_multisampled_2d<f32>"));
        assert!(prelude.contains("texture_depth_multisampled_2d"));
        assert!(prelude.contains("textureLoad(depth_texture, pixel, sample_index)"));
        assert!(prelude.contains("const MSAA_SAMPLES: i32 = 4;"));
    }

    #[test]
    fn blur_permutation_bakes_workgroup_size() {
        let source = ssao_blur(18, 13);
        assert!(source.contains("@workgroup_size(18, 13, 1)"));
        assert!(!source.contains("{{"));
    }

    #[test]
    fn composite_uses_named_uniforms() {
        let source = composite(1, 16);
        for name in [
            "screen_resolution",
            "msaa_samples",
            "ambient_occlusion",
            "array<PointLight, 16>",
        ] {
            assert!(source.contains(name), "missing {name}");
        }
        let ssao = ssao(1);
        for name in [
            "ssao_samples",
            "ssao_radius",
            "ssao_offset",
            "ssao_noise_size",
            "ssao_texture_scale",
        ] {
            assert!(ssao.contains(name), "missing {name}");
        }
    }

    #[test]
    fn binding_slots_match_texture_units() {
        let prelude = gbuffer_prelude(1);
        assert!(prelude.contains(&format!("@binding({}) var depth_texture", bindings::DEPTH)));
        assert!(DEBUG_BODY.contains(&format!("@binding({}) var ssao_texture", bindings::SSAO)));
        assert!(DEBUG_BODY.contains(&format!(
            "@binding({}) var shadow_cube_texture",
            bindings::SHADOW_CUBE
        )));
        assert!(COMPOSITE_BODY.contains(&format!(
            "@binding({}) var shadow_texture",
            bindings::SHADOW
        )));
    }
}
