/// Two-pass separable Gaussian blur internals
///
/// The kernel is symmetric; only one side is stored. The center weight
/// is halved because the shader samples it on both sides of the loop.
/// Weights are quantized to u16 and packed two per 32-bit word, fitting
/// the 56-tap budget into seven four-word push-constant slots.
///
/// The same unpacking runs in two places: the GLSL fragment shaders
/// (compiled for GPU backends) and the host evaluators below (used by
/// the software device), which keeps the two renditions in lockstep.

use crate::device::{
    FragmentInput, FragmentOutput, PushConstantRange, ShaderStages,
};

/// Largest supported blur radius (tap budget of the packed kernel)
pub const MAX_BLUR_RADIUS: u32 = 56;

/// Depth slack for the distance-dependent gate
const DEPTH_GATE_BIAS: f32 = 0.001;

/// GLSL sources for the GPU rendition of the blur
pub const FULLSCREEN_VERT_GLSL: &str = include_str!("../../shaders/fullscreen.vert");
pub const BLUR_FRAG_GLSL: &str = include_str!("../../shaders/gaussian_blur.frag");
pub const BLUR_DEPTH_GATED_FRAG_GLSL: &str =
    include_str!("../../shaders/gaussian_blur_depth.frag");

/// Push constants of both blur pipelines (128 bytes, the minimum
/// guaranteed push-constant budget)
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurPushConstants {
    /// Half-kernel weights, two u16 per word
    pub packed_weights: [[u32; 4]; 7],
    /// Texel step between taps, in normalized coordinates
    pub delta: [f32; 2],
    /// Output scale factor
    pub multiplier: f32,
    /// Source layer in the high 16 bits, iteration count in the low 16
    pub layer_and_iterations: u32,
}

/// Push constant ranges the blur pipelines declare
pub fn blur_push_constant_ranges() -> Vec<PushConstantRange> {
    vec![PushConstantRange {
        stages: ShaderStages::FRAGMENT,
        offset: 0,
        size: std::mem::size_of::<BlurPushConstants>() as u32,
    }]
}

/// Pack a source layer and iteration count into one word
pub fn pack_layer_and_iterations(layer: u32, iterations: u32) -> u32 {
    (layer << 16) | (iterations & 0xffff)
}

/// Number of two-weight loop iterations a radius needs. An odd radius
/// leaves the last word's low half zero.
pub fn iterations_for_radius(radius: u32) -> u32 {
    radius.div_ceil(2)
}

/// Normalized half-kernel for `radius` taps per side.
///
/// `radius` must be in `1..=MAX_BLUR_RADIUS`. The center weight comes
/// back halved; the full kernel is every weight mirrored, so the
/// effective sum (2x each entry) is 1.
pub fn gaussian_weights(radius: u32) -> Vec<f32> {
    debug_assert!((1..=MAX_BLUR_RADIUS).contains(&radius));
    let sigma = radius as f32 / 3.0;
    let norm = 1.0 / (sigma * (2.0 * std::f32::consts::PI).sqrt());

    let mut weights = Vec::with_capacity(radius as usize);
    for i in 0..radius {
        let x = i as f32;
        let mut weight = (-(x * x) / (2.0 * sigma * sigma)).exp() * norm;
        if i == 0 {
            // Sampled once per loop side, so it would otherwise count twice
            weight *= 0.5;
        }
        weights.push(weight);
    }

    let sum: f32 = weights.iter().map(|w| w * 2.0).sum();
    let scale = 1.0 / sum;
    for weight in weights.iter_mut() {
        *weight *= scale;
    }
    weights
}

/// Quantize a half-kernel to u16 and pack it two weights per word
pub fn pack_kernel(radius: u32) -> [[u32; 4]; 7] {
    let weights = gaussian_weights(radius);
    let quantize = |index: usize| -> u32 {
        let weight = weights.get(index).copied().unwrap_or(0.0);
        (weight * 65535.0 + 0.5) as u32
    };

    let mut packed = [[0u32; 4]; 7];
    for word_index in 0..28 {
        let hi = quantize(word_index * 2);
        let lo = quantize(word_index * 2 + 1);
        packed[word_index / 4][word_index % 4] = (hi << 16) | lo;
    }
    packed
}

/// Effective sum of a packed kernel's taps (each weight mirrored)
pub fn packed_kernel_sum(packed: &[[u32; 4]; 7]) -> f32 {
    let mut sum = 0.0f32;
    for slot in packed {
        for &word in slot {
            sum += 2.0 * ((word >> 16) as f32 / 65535.0);
            sum += 2.0 * ((word & 0xffff) as f32 / 65535.0);
        }
    }
    sum
}

// ===== HOST EVALUATION =====
//
// Binding layout shared with the GLSL shaders:
//   0: linear sampler    1: source color (array)
//   2: nearest sampler   3: source depth (array)

fn read_push_constants(bytes: &[u8]) -> BlurPushConstants {
    let size = std::mem::size_of::<BlurPushConstants>();
    if bytes.len() < size {
        return BlurPushConstants {
            packed_weights: [[0; 4]; 7],
            delta: [0.0, 0.0],
            multiplier: 1.0,
            layer_and_iterations: 0,
        };
    }
    *bytemuck::from_bytes(&bytes[..size])
}

fn evaluate(input: &FragmentInput, depth_gated: bool) -> ([f32; 4], f32) {
    let pc = read_push_constants(input.push_constants);
    let layer = pc.layer_and_iterations >> 16;
    let iterations = pc.layer_and_iterations & 0xffff;

    let reference_depth = if depth_gated {
        input.resources.sample(3, layer, input.u, input.v)[0]
    } else {
        0.0
    };

    let mut sum = [0.0f32; 4];
    let mut weight_sum = 0.0f32;
    let mut forward = (input.u, input.v);
    let mut backward = (input.u, input.v);

    let mut tap = |weight: f32,
                   at: (f32, f32),
                   sum: &mut [f32; 4],
                   weight_sum: &mut f32| {
        if weight == 0.0 {
            return;
        }
        if depth_gated {
            let depth = input.resources.sample(3, layer, at.0, at.1)[0];
            // Samples behind the reference surface are excluded
            if depth > reference_depth + DEPTH_GATE_BIAS {
                return;
            }
        }
        let color = input.resources.sample(1, layer, at.0, at.1);
        for channel in 0..4 {
            sum[channel] += weight * color[channel];
        }
        *weight_sum += weight;
    };

    for i in 0..iterations {
        let word = pc.packed_weights[(i / 4) as usize][(i % 4) as usize];
        let first = (word >> 16) as f32 / 65535.0;
        let second = (word & 0xffff) as f32 / 65535.0;

        tap(first, forward, &mut sum, &mut weight_sum);
        tap(first, backward, &mut sum, &mut weight_sum);
        forward = (forward.0 + pc.delta[0], forward.1 + pc.delta[1]);
        backward = (backward.0 - pc.delta[0], backward.1 - pc.delta[1]);

        tap(second, forward, &mut sum, &mut weight_sum);
        tap(second, backward, &mut sum, &mut weight_sum);
        forward = (forward.0 + pc.delta[0], forward.1 + pc.delta[1]);
        backward = (backward.0 - pc.delta[0], backward.1 - pc.delta[1]);
    }

    let mut color = [0.0f32; 4];
    if depth_gated && weight_sum > 0.0 {
        // Renormalize over the taps that survived the gate
        for channel in 0..4 {
            color[channel] = sum[channel] / weight_sum * pc.multiplier;
        }
    } else {
        for channel in 0..4 {
            color[channel] = sum[channel] * pc.multiplier;
        }
    }
    (color, reference_depth)
}

/// Host rendition of the plain blur fragment stage
pub fn blur_fragment(input: &FragmentInput) -> FragmentOutput {
    let (color, _) = evaluate(input, false);
    FragmentOutput { color, depth: None }
}

/// Host rendition of the depth-gated blur fragment stage. Outputs the
/// reference depth so the helper-writing pipeline can forward it.
pub fn blur_depth_gated_fragment(input: &FragmentInput) -> FragmentOutput {
    let (color, reference_depth) = evaluate(input, true);
    FragmentOutput {
        color,
        depth: Some(reference_depth),
    }
}

#[cfg(test)]
#[path = "blur_tests.rs"]
mod tests;
