//! The ripple program pair and a CPU model of the same math.
//!
//! The GLSL is the source of truth for rendering; the functions below mirror
//! it line for line so the envelope, ring profile, channel split and texture
//! orientation can be checked without a GPU. Keep them in sync.
//!
//! Orientation: the vertex stage emits top-down texture coordinates (v = 0 at
//! the top edge of the screen) and snapshots are uploaded without
//! `UNPACK_FLIP_Y_WEBGL`, so texture row 0 is the top row of the page.

/// Full-screen triangle generated from `gl_VertexID`; no vertex buffer needed.
pub const VERTEX_SHADER: &str = r#"#version 300 es
out vec2 v_uv;

void main() {
    vec2 pos = vec2(float((gl_VertexID << 1) & 2), float(gl_VertexID & 2)) * 2.0 - 1.0;
    // top-down: NDC y = +1 maps to v = 0
    v_uv = vec2(pos.x + 1.0, 1.0 - pos.y) * 0.5;
    gl_Position = vec4(pos, 0.0, 1.0);
}
"#;

pub const FRAGMENT_SHADER: &str = r#"#version 300 es
precision highp float;

in vec2 v_uv;
out vec4 out_color;

uniform sampler2D u_tex;
uniform vec2  u_res;      // device px
uniform vec2  u_center;   // device px, top-down
uniform float u_time;     // seconds since trigger
uniform float u_duration; // seconds
uniform float u_strength; // device px
uniform float u_speed;    // device px / s
uniform float u_width;    // px

float ring(float d, float r, float w) {
    float x = (d - r) / max(w, 0.0001);
    return exp(-4.0 * x * x);
}

float envelope(float t, float duration) {
    float fade_in = smoothstep(0.0, 0.12 * duration, t);
    float fade_out = 1.0 - smoothstep(0.80 * duration, duration, t);
    return fade_in * fade_out;
}

void main() {
    vec2 px = v_uv * u_res;

    float t = clamp(u_time, 0.0, u_duration);
    float play = envelope(t, u_duration);

    float radius = u_speed * t;
    float d = distance(px, u_center);
    float k = ring(d, radius, u_width) * play;

    vec2 dir = normalize(px - u_center + 0.0001);
    float disp = u_strength * k;

    vec2 uv_r = (px + dir * (disp * 1.00)) / u_res;
    vec2 uv_g = (px + dir * (disp * 0.80)) / u_res;
    vec2 uv_b = (px + dir * (disp * 0.60)) / u_res;

    float micro = 0.2 * sin((d - radius) * 0.05) * k;
    uv_r += dir * micro / u_res;
    uv_g -= dir * micro / u_res;

    out_color = vec4(
        texture(u_tex, uv_r).r,
        texture(u_tex, uv_g).g,
        texture(u_tex, uv_b).b,
        play
    );
}
"#;

/// Uniform names in the order `FrameUniforms` is pushed.
pub const UNIFORM_NAMES: [&str; 8] = [
    "u_tex",
    "u_res",
    "u_center",
    "u_time",
    "u_duration",
    "u_strength",
    "u_speed",
    "u_width",
];

/// Displacement share per channel (red, green, blue).
pub const CHANNEL_SPLIT: [f64; 3] = [1.0, 0.8, 0.6];

const FADE_IN_SHARE: f64 = 0.12;
const FADE_OUT_SHARE: f64 = 0.20;

/// Per-draw inputs of the fragment stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    /// Surface size in device pixels.
    pub resolution: [f32; 2],
    /// Ripple origin in device pixels, top-down.
    pub center: [f32; 2],
    /// Seconds since the trigger.
    pub elapsed: f32,
    pub duration: f32,
    /// Already scaled by the device pixel ratio.
    pub strength: f32,
    pub speed: f32,
    pub ring_width: f32,
}

/// GLSL `smoothstep`.
pub fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// `play(t)`: eases in over the first 12% of the duration and out over the last 20%.
pub fn envelope(t: f64, duration: f64) -> f64 {
    let t = t.clamp(0.0, duration);
    let fade_in = smoothstep(0.0, FADE_IN_SHARE * duration, t);
    let fade_out = 1.0 - smoothstep((1.0 - FADE_OUT_SHARE) * duration, duration, t);
    fade_in * fade_out
}

/// Gaussian band of width `w` centered on radius `r`.
pub fn ring(d: f64, r: f64, w: f64) -> f64 {
    let x = (d - r) / w.max(0.0001);
    (-4.0 * x * x).exp()
}

/// Clip-space position of vertex `id` (0..3) of the full-screen triangle.
pub fn vertex_position(id: u32) -> [f64; 2] {
    let x = ((id << 1) & 2) as f64;
    let y = (id & 2) as f64;
    [x * 2.0 - 1.0, y * 2.0 - 1.0]
}

/// Texture coordinate the vertex stage emits for a clip-space position.
pub fn vertex_texcoord(pos: [f64; 2]) -> [f64; 2] {
    [(pos[0] + 1.0) * 0.5, (1.0 - pos[1]) * 0.5]
}

/// Where each channel of the output pixel at `px` (device px, top-down)
/// reads the snapshot, plus the output alpha.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSamples {
    pub red: [f64; 2],
    pub green: [f64; 2],
    pub blue: [f64; 2],
    pub alpha: f64,
    /// Displacement magnitude before the channel split, device px.
    pub displacement: f64,
}

pub fn channel_samples(px: [f64; 2], u: &FrameUniforms) -> ChannelSamples {
    let res = [u.resolution[0] as f64, u.resolution[1] as f64];
    let center = [u.center[0] as f64, u.center[1] as f64];
    let duration = u.duration as f64;

    let t = (u.elapsed as f64).clamp(0.0, duration);
    let play = envelope(t, duration);
    let radius = u.speed as f64 * t;
    let dx = px[0] - center[0];
    let dy = px[1] - center[1];
    let d = dx.hypot(dy);
    let k = ring(d, radius, u.ring_width as f64) * play;

    let (ox, oy) = (dx + 0.0001, dy + 0.0001);
    let len = ox.hypot(oy);
    let dir = [ox / len, oy / len];
    let disp = u.strength as f64 * k;

    let at = |share: f64| {
        [
            (px[0] + dir[0] * disp * share) / res[0],
            (px[1] + dir[1] * disp * share) / res[1],
        ]
    };
    let mut red = at(CHANNEL_SPLIT[0]);
    let mut green = at(CHANNEL_SPLIT[1]);
    let blue = at(CHANNEL_SPLIT[2]);

    let micro = 0.2 * ((d - radius) * 0.05).sin() * k;
    for i in 0..2 {
        red[i] += dir[i] * micro / res[i];
        green[i] -= dir[i] * micro / res[i];
    }

    ChannelSamples {
        red,
        green,
        blue,
        alpha: play,
        displacement: disp,
    }
}
