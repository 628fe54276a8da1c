/// Tests for the blur kernel and its host evaluators

use super::*;

// ============================================================================
// Tests: Kernel Weights
// ============================================================================

#[test]
fn test_weights_sum_to_one_for_every_radius() {
    for radius in 1..=MAX_BLUR_RADIUS {
        let weights = gaussian_weights(radius);
        assert_eq!(weights.len(), radius as usize);
        let sum: f32 = weights.iter().map(|w| w * 2.0).sum();
        assert!(
            (sum - 1.0).abs() < 1e-5,
            "radius {} kernel sums to {}",
            radius, sum
        );
    }
}

#[test]
fn test_weights_decrease_away_from_center() {
    for radius in [2u32, 7, 23, 56] {
        let weights = gaussian_weights(radius);
        // The halved center can dip below the first off-center weight,
        // but everything past it must fall off monotonically.
        for pair in weights[1..].windows(2) {
            assert!(pair[0] >= pair[1], "radius {} not monotone", radius);
        }
        assert!(weights[0] > 0.0);
    }
}

#[test]
fn test_center_weight_is_halved() {
    let radius = 9;
    let sigma = radius as f32 / 3.0;
    let weights = gaussian_weights(radius);
    // Before normalization F[1]/F[0] = 2 * exp(-1 / (2 sigma^2));
    // normalization preserves the ratio.
    let expected = 2.0 * (-1.0 / (2.0 * sigma * sigma)).exp();
    let ratio = weights[1] / weights[0];
    assert!((ratio - expected).abs() < 1e-5);
}

// ============================================================================
// Tests: Packing
// ============================================================================

#[test]
fn test_packed_kernel_sums_to_one_for_every_radius() {
    for radius in 1..=MAX_BLUR_RADIUS {
        let packed = pack_kernel(radius);
        let sum = packed_kernel_sum(&packed);
        // Each of the 56 slots quantizes with at most 0.5/65535 error
        assert!(
            (sum - 1.0).abs() < 0.002,
            "radius {} packed kernel sums to {}",
            radius, sum
        );
    }
}

#[test]
fn test_packing_layout_matches_unpacking() {
    let weights = gaussian_weights(5);
    let packed = pack_kernel(5);

    let word = packed[0][0];
    let w0 = (word >> 16) as f32 / 65535.0;
    let w1 = (word & 0xffff) as f32 / 65535.0;
    assert!((w0 - weights[0]).abs() < 1e-4);
    assert!((w1 - weights[1]).abs() < 1e-4);

    // Weights past the radius pack as zero
    let tail = packed[0][2];
    assert_eq!(tail & 0xffff, 0);
    for slot in &packed[1..] {
        assert_eq!(*slot, [0, 0, 0, 0]);
    }
}

#[test]
fn test_iteration_count_covers_the_radius() {
    assert_eq!(iterations_for_radius(1), 1);
    assert_eq!(iterations_for_radius(2), 1);
    assert_eq!(iterations_for_radius(5), 3);
    assert_eq!(iterations_for_radius(56), 28);
    for radius in 1..=MAX_BLUR_RADIUS {
        let iterations = iterations_for_radius(radius);
        assert!(iterations * 2 >= radius);
        assert!(iterations <= 28, "radius {} overruns the packed words", radius);
    }
}

#[test]
fn test_layer_and_iterations_pack_into_one_word() {
    let word = pack_layer_and_iterations(3, 28);
    assert_eq!(word >> 16, 3);
    assert_eq!(word & 0xffff, 28);
}

// ============================================================================
// Tests: Host Evaluation
// ============================================================================

struct UniformSource {
    color: [f32; 4],
    depth: f32,
}

impl crate::device::FragmentResources for UniformSource {
    fn sample(&self, binding: u32, _layer: u32, _u: f32, _v: f32) -> [f32; 4] {
        if binding == 3 {
            [self.depth, 0.0, 0.0, 0.0]
        } else {
            self.color
        }
    }

    fn source_size(&self, _binding: u32) -> (u32, u32) {
        (64, 64)
    }
}

fn push_bytes(radius: u32, layer: u32, multiplier: f32) -> Vec<u8> {
    let pc = BlurPushConstants {
        packed_weights: pack_kernel(radius),
        delta: [1.0 / 64.0, 0.0],
        multiplier,
        layer_and_iterations: pack_layer_and_iterations(layer, iterations_for_radius(radius)),
    };
    bytemuck::bytes_of(&pc).to_vec()
}

#[test]
fn test_uniform_image_blurs_to_itself() {
    let resources = UniformSource {
        color: [0.25, 0.5, 0.75, 1.0],
        depth: 0.5,
    };
    for radius in 1..=MAX_BLUR_RADIUS {
        let bytes = push_bytes(radius, 0, 1.0);
        let input = FragmentInput {
            u: 0.5,
            v: 0.5,
            push_constants: &bytes,
            resources: &resources,
        };
        let output = blur_fragment(&input);
        for channel in 0..4 {
            assert!(
                (output.color[channel] - resources.color[channel]).abs() < 0.002,
                "radius {} channel {} drifted to {}",
                radius, channel, output.color[channel]
            );
        }
        assert!(output.depth.is_none());
    }
}

#[test]
fn test_multiplier_scales_the_output() {
    let resources = UniformSource {
        color: [0.5, 0.5, 0.5, 1.0],
        depth: 0.5,
    };
    let bytes = push_bytes(8, 0, 2.0);
    let input = FragmentInput {
        u: 0.5,
        v: 0.5,
        push_constants: &bytes,
        resources: &resources,
    };
    let output = blur_fragment(&input);
    assert!((output.color[0] - 1.0).abs() < 0.005);
}

#[test]
fn test_depth_gated_blur_renormalizes_on_uniform_depth() {
    let resources = UniformSource {
        color: [0.1, 0.6, 0.9, 1.0],
        depth: 0.25,
    };
    let bytes = push_bytes(16, 0, 1.0);
    let input = FragmentInput {
        u: 0.5,
        v: 0.5,
        push_constants: &bytes,
        resources: &resources,
    };
    let output = blur_depth_gated_fragment(&input);
    for channel in 0..4 {
        assert!((output.color[channel] - resources.color[channel]).abs() < 0.002);
    }
    assert_eq!(output.depth, Some(0.25));
}

struct SplitDepthSource;

impl crate::device::FragmentResources for SplitDepthSource {
    fn sample(&self, binding: u32, _layer: u32, u: f32, _v: f32) -> [f32; 4] {
        // Left half: near white surface. Right half: far black surface.
        let near = u < 0.5;
        if binding == 3 {
            [if near { 0.2 } else { 0.8 }, 0.0, 0.0, 0.0]
        } else if near {
            [1.0, 1.0, 1.0, 1.0]
        } else {
            [0.0, 0.0, 0.0, 1.0]
        }
    }

    fn source_size(&self, _binding: u32) -> (u32, u32) {
        (64, 64)
    }
}

#[test]
fn test_depth_gate_excludes_taps_behind_the_reference() {
    // Evaluate just inside the near half, close enough to the seam that
    // a plain blur would pull in black from the far half.
    let bytes = push_bytes(24, 0, 1.0);
    let input = FragmentInput {
        u: 0.45,
        v: 0.5,
        push_constants: &bytes,
        resources: &SplitDepthSource,
    };

    let plain = blur_fragment(&input);
    assert!(plain.color[0] < 0.999, "plain blur should bleed across the seam");

    let gated = blur_depth_gated_fragment(&input);
    assert!(
        (gated.color[0] - 1.0).abs() < 0.002,
        "gated blur picked up background: {}",
        gated.color[0]
    );
}

#[test]
fn test_source_layer_comes_from_the_packed_word() {
    struct LayerProbe;
    impl crate::device::FragmentResources for LayerProbe {
        fn sample(&self, binding: u32, layer: u32, _u: f32, _v: f32) -> [f32; 4] {
            if binding == 3 {
                [0.0; 4]
            } else {
                [layer as f32 / 10.0, 0.0, 0.0, 1.0]
            }
        }
        fn source_size(&self, _binding: u32) -> (u32, u32) {
            (8, 8)
        }
    }

    let bytes = push_bytes(4, 3, 1.0);
    let input = FragmentInput {
        u: 0.5,
        v: 0.5,
        push_constants: &bytes,
        resources: &LayerProbe,
    };
    let output = blur_fragment(&input);
    assert!((output.color[0] - 0.3).abs() < 0.002);
}
