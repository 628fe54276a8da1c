/// Host-side 2x box downsampling for mip pyramid construction

/// Dimensions of the next mip level (halved, floored at 1)
pub fn next_mip_size(width: u32, height: u32) -> (u32, u32) {
    ((width / 2).max(1), (height / 2).max(1))
}

/// Number of mip levels down to 1x1
pub fn mip_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Downsample an RGBA8 image by 2x with a box filter.
///
/// Each destination texel averages the source texels it covers; odd
/// source dimensions clamp the footprint at the edge.
pub fn shrink_rgba8(width: u32, height: u32, pixels: &[u8]) -> (u32, u32, Vec<u8>) {
    let (dst_w, dst_h) = next_mip_size(width, height);
    let mut out = Vec::with_capacity((dst_w * dst_h * 4) as usize);

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx0 = dx * 2;
            let sy0 = dy * 2;
            let sx1 = (sx0 + 1).min(width - 1);
            let sy1 = (sy0 + 1).min(height - 1);

            for channel in 0..4 {
                let mut sum: u32 = 0;
                let mut count: u32 = 0;
                for sy in [sy0, sy1] {
                    for sx in [sx0, sx1] {
                        let idx = ((sy * width + sx) * 4 + channel) as usize;
                        sum += pixels[idx] as u32;
                        count += 1;
                    }
                }
                // sx0==sx1 / sy0==sy1 at clamped edges double-counts the
                // same texel, which still averages correctly
                out.push(((sum + count / 2) / count) as u8);
            }
        }
    }

    (dst_w, dst_h, out)
}

#[cfg(test)]
#[path = "scale_tests.rs"]
mod tests;
