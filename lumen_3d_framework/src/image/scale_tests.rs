/// Tests for mip downsampling

use super::*;

// ============================================================================
// Tests: Mip Chain Arithmetic
// ============================================================================

#[test]
fn test_mip_count_square_pow2() {
    assert_eq!(mip_count(256, 256), 9);
    assert_eq!(mip_count(1, 1), 1);
    assert_eq!(mip_count(2, 2), 2);
}

#[test]
fn test_mip_count_non_square() {
    assert_eq!(mip_count(256, 64), 9);
    assert_eq!(mip_count(64, 256), 9);
    assert_eq!(mip_count(100, 30), 7); // 100 -> 50 -> 25 -> 12 -> 6 -> 3 -> 1
}

#[test]
fn test_next_mip_size_floors_at_one() {
    assert_eq!(next_mip_size(256, 64), (128, 32));
    assert_eq!(next_mip_size(1, 16), (1, 8));
    assert_eq!(next_mip_size(1, 1), (1, 1));
    assert_eq!(next_mip_size(3, 5), (1, 2));
}

// ============================================================================
// Tests: Box Downsample
// ============================================================================

#[test]
fn test_shrink_uniform_stays_uniform() {
    let pixels = vec![200u8; 8 * 8 * 4];
    let (w, h, out) = shrink_rgba8(8, 8, &pixels);
    assert_eq!((w, h), (4, 4));
    assert!(out.iter().all(|&p| p == 200));
}

#[test]
fn test_shrink_averages_blocks() {
    // 2x2 image: values 0, 100, 100, 200 in every channel -> average 100
    let mut pixels = Vec::new();
    for value in [0u8, 100, 100, 200] {
        pixels.extend_from_slice(&[value; 4]);
    }
    let (w, h, out) = shrink_rgba8(2, 2, &pixels);
    assert_eq!((w, h), (1, 1));
    assert_eq!(out, vec![100u8; 4]);
}

#[test]
fn test_shrink_odd_dimensions_clamp() {
    // 3x1: last destination texel reuses the clamped edge texel
    let pixels: Vec<u8> = [10u8, 20, 30]
        .iter()
        .flat_map(|&v| [v; 4])
        .collect();
    let (w, h, out) = shrink_rgba8(3, 1, &pixels);
    assert_eq!((w, h), (1, 1));
    // Footprint covers texels 0 and 1 (rows clamp): (10+20+10+20)/4 = 15
    assert_eq!(out[0], 15);
}

#[test]
fn test_shrink_to_one_by_one_chain() {
    let mut w = 16u32;
    let mut h = 4u32;
    let mut pixels = vec![128u8; (w * h * 4) as usize];
    while w > 1 || h > 1 {
        let (nw, nh, next) = shrink_rgba8(w, h, &pixels);
        w = nw;
        h = nh;
        pixels = next;
    }
    assert_eq!(pixels.len(), 4);
    assert_eq!(pixels[0], 128);
}
