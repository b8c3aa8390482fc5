// src/color.rs

//! ARGB8888 pixels and the source-over blend used by the flush compositor.
//!
//! Both the toolkit's compose buffer and the host surface store a pixel as a
//! native-endian `u32` of the form `0xAARRGGBB`. On the little-endian targets
//! we run on that is the byte sequence `B, G, R, A`, which is what
//! [`Argb::from_bytes`] and [`Argb::to_bytes`] read and write.

use serde::{Deserialize, Serialize};

/// Bytes occupied by one ARGB8888 pixel.
pub const BYTES_PER_PIXEL: usize = 4;
/// Depth a surface must report, in bits.
pub const SUPPORTED_DEPTH_BITS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Argb {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Argb {
    pub const TRANSPARENT: Argb = Argb::new(0, 0, 0, 0);
    pub const WHITE: Argb = Argb::opaque(255, 255, 255);
    pub const BLACK: Argb = Argb::opaque(0, 0, 0);

    pub const fn new(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { a, r, g, b }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(255, r, g, b)
    }

    pub const fn from_u32(value: u32) -> Self {
        Self {
            a: (value >> 24) as u8,
            r: (value >> 16) as u8,
            g: (value >> 8) as u8,
            b: value as u8,
        }
    }

    pub const fn to_u32(self) -> u32 {
        (self.a as u32) << 24 | (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    /// Reads the in-memory byte layout (`B, G, R, A`).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            b: bytes[0],
            g: bytes[1],
            r: bytes[2],
            a: bytes[3],
        }
    }

    pub const fn to_bytes(self) -> [u8; BYTES_PER_PIXEL] {
        [self.b, self.g, self.r, self.a]
    }

    pub fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }
}

/// Straight-alpha source-over of `src` onto `dst`.
///
/// Each of R, G, B becomes `(dst * (255 - a) + src * a) / 255` (truncating)
/// and the result takes the source alpha. A source with zero coverage
/// contributes nothing, alpha included, so `dst` comes back untouched.
pub fn blend_over(dst: Argb, src: Argb) -> Argb {
    if src.a == 0 {
        return dst;
    }
    let sa = src.a as u32;
    let inv = 255 - sa;
    let mix = |d: u8, s: u8| ((d as u32 * inv + s as u32 * sa) / 255) as u8;
    Argb {
        a: src.a,
        r: mix(dst.r, src.r),
        g: mix(dst.g, src.g),
        b: mix(dst.b, src.b),
    }
}

/// Opaque colour as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    pub fn to_argb(self) -> Argb {
        Argb::opaque(self.r, self.g, self.b)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::WHITE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_layout_is_bgra_in_memory() {
        let red = Argb::opaque(255, 0, 0);
        assert_eq!(red.to_bytes(), [0, 0, 255, 255]);
        assert_eq!(Argb::from_bytes(&[0x11, 0x22, 0x33, 0x44]), Argb::new(0x44, 0x33, 0x22, 0x11));
        assert_eq!(red.to_u32(), 0xFFFF_0000);
        assert_eq!(Argb::from_u32(0x80_01_02_03), Argb::new(0x80, 1, 2, 3));
        assert_eq!(u32::from_le_bytes(red.to_bytes()), red.to_u32());
    }

    #[test]
    fn opaque_source_replaces_rgb() {
        let dst = Argb::new(200, 10, 20, 30);
        let src = Argb::opaque(250, 128, 3);
        assert_eq!(blend_over(dst, src), src);
    }

    #[test]
    fn transparent_source_leaves_destination_alone() {
        let dst = Argb::new(255, 10, 20, 30);
        let src = Argb::new(0, 250, 128, 3);
        assert_eq!(blend_over(dst, src), dst);
    }

    #[test]
    fn partial_coverage_mixes_per_channel_and_takes_source_alpha() {
        let dst = Argb::WHITE;
        let src = Argb::new(128, 0, 0, 0);
        // 255 * 127 / 255 = 127
        assert_eq!(blend_over(dst, src), Argb::new(128, 127, 127, 127));

        let dst = Argb::opaque(100, 0, 200);
        let src = Argb::new(51, 255, 255, 0);
        // r: (100*204 + 255*51)/255 = 131, g: (0 + 255*51)/255 = 51, b: (200*204)/255 = 160
        assert_eq!(blend_over(dst, src), Argb::new(51, 131, 51, 160));
    }

    #[test]
    fn blending_a_pixel_onto_itself_is_a_no_op() {
        for a in [1u8, 17, 128, 254, 255] {
            let px = Argb::new(a, 13, 200, 77);
            assert_eq!(blend_over(px, px), px, "alpha {a}");
        }
    }
}
