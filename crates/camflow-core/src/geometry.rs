//! Sizes, aspect-fit policies and the small amount of 4x4 matrix math the stages need.
//!
//! Matrices are column-major `[f32; 16]`, the layout GL expects for `uniform_matrix_4_f32_slice`
//! with `transpose = false`.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions are non-zero.
    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Width and height exchanged (portrait sensors report landscape sizes).
    pub fn swapped(&self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Tightly packed RGBA8 byte length.
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How a source image is mapped onto a view of a different aspect ratio.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleType {
    /// Stretch to fill, ignoring aspect.
    FitXy,
    #[default]
    CenterCrop,
    CenterInside,
    FitStart,
    FitEnd,
    FitCenter,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrthoBounds {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl OrthoBounds {
    pub const UNIT: OrthoBounds = OrthoBounds {
        left: -1.0,
        right: 1.0,
        bottom: -1.0,
        top: 1.0,
    };

    const fn new(left: f32, right: f32, bottom: f32, top: f32) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
        }
    }
}

const NEAR: f32 = 1.0;
const FAR: f32 = 3.0;

/// Orthographic bounds that place an `image` sized texture into a `view` under `scale`.
///
/// Returns `None` while either size is unknown.
pub fn projection_bounds(scale: ScaleType, image: Size, view: Size) -> Option<OrthoBounds> {
    if !image.is_known() || !view.is_known() {
        return None;
    }
    if scale == ScaleType::FitXy {
        return Some(OrthoBounds::UNIT);
    }

    let wh_view = view.aspect();
    let wh_img = image.aspect();

    let b = if wh_img > wh_view {
        // Image is wider than the view.
        let r = wh_view / wh_img;
        let inv = wh_img / wh_view;
        match scale {
            ScaleType::CenterCrop => OrthoBounds::new(-r, r, -1.0, 1.0),
            ScaleType::CenterInside | ScaleType::FitCenter => {
                OrthoBounds::new(-1.0, 1.0, -inv, inv)
            }
            ScaleType::FitStart => OrthoBounds::new(-1.0, 1.0, 1.0 - 2.0 * inv, 1.0),
            ScaleType::FitEnd => OrthoBounds::new(-1.0, 1.0, -1.0, 2.0 * inv - 1.0),
            ScaleType::FitXy => OrthoBounds::UNIT,
        }
    } else {
        let r = wh_img / wh_view;
        let inv = wh_view / wh_img;
        match scale {
            ScaleType::CenterCrop => OrthoBounds::new(-1.0, 1.0, -r, r),
            ScaleType::CenterInside | ScaleType::FitCenter => {
                OrthoBounds::new(-inv, inv, -1.0, 1.0)
            }
            ScaleType::FitStart => OrthoBounds::new(-1.0, 2.0 * inv - 1.0, -1.0, 1.0),
            ScaleType::FitEnd => OrthoBounds::new(1.0 - 2.0 * inv, 1.0, -1.0, 1.0),
            ScaleType::FitXy => OrthoBounds::UNIT,
        }
    };
    Some(b)
}

/// Full vertex transform for the screen stage: `ortho(bounds) * look_at(eye = +z)`.
pub fn projection_matrix(scale: ScaleType, image: Size, view: Size) -> Option<Mat4> {
    let b = projection_bounds(scale, image, view)?;
    let projection = Mat4::ortho(b.left, b.right, b.bottom, b.top, NEAR, FAR);
    let camera = Mat4::look_at([0.0, 0.0, 1.0], [0.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
    Some(projection.multiply(&camera))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat4(pub [f32; 16]);

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    #[rustfmt::skip]
    pub const IDENTITY: Mat4 = Mat4([
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn ortho(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        let rw = 1.0 / (right - left);
        let rh = 1.0 / (top - bottom);
        let rd = 1.0 / (far - near);
        let mut m = [0.0f32; 16];
        m[0] = 2.0 * rw;
        m[5] = 2.0 * rh;
        m[10] = -2.0 * rd;
        m[12] = -(right + left) * rw;
        m[13] = -(top + bottom) * rh;
        m[14] = -(far + near) * rd;
        m[15] = 1.0;
        Mat4(m)
    }

    pub fn look_at(eye: [f32; 3], center: [f32; 3], up: [f32; 3]) -> Self {
        let f = normalize([center[0] - eye[0], center[1] - eye[1], center[2] - eye[2]]);
        let s = normalize(cross(f, up));
        let u = cross(s, f);

        #[rustfmt::skip]
        let mut m = Mat4([
            s[0], u[0], -f[0], 0.0,
            s[1], u[1], -f[1], 0.0,
            s[2], u[2], -f[2], 0.0,
            0.0,  0.0,  0.0,   1.0,
        ]);
        m.translate(-eye[0], -eye[1], -eye[2]);
        m
    }

    /// `self * rhs`.
    pub fn multiply(&self, rhs: &Mat4) -> Mat4 {
        let mut out = [0.0f32; 16];
        for col in 0..4 {
            for row in 0..4 {
                let mut acc = 0.0;
                for k in 0..4 {
                    acc += self.0[k * 4 + row] * rhs.0[col * 4 + k];
                }
                out[col * 4 + row] = acc;
            }
        }
        Mat4(out)
    }

    /// Post-multiplies by a scale, in place.
    pub fn scale(&mut self, x: f32, y: f32, z: f32) {
        for i in 0..4 {
            self.0[i] *= x;
            self.0[4 + i] *= y;
            self.0[8 + i] *= z;
        }
    }

    /// Post-multiplies by a translation, in place.
    pub fn translate(&mut self, x: f32, y: f32, z: f32) {
        for i in 0..4 {
            self.0[12 + i] += self.0[i] * x + self.0[4 + i] * y + self.0[8 + i] * z;
        }
    }

    /// Applies the matrix to a point (w = 1) and returns x, y.
    pub fn transform_xy(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.0;
        (
            m[0] * x + m[4] * y + m[12],
            m[1] * x + m[5] * y + m[13],
        )
    }
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len == 0.0 {
        return v;
    }
    [v[0] / len, v[1] / len, v[2] / len]
}
