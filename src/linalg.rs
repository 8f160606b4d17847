//! Small column-major matrix helpers for the 3D view.
//!
//! Element `(row, col)` of a [`Mat4`] lives at `col * 4 + row`, the layout
//! GL expects for `uniform_matrix_4_f32_slice(.., false, ..)`.

pub type Vec3 = [f32; 3];
pub type Mat3 = [f32; 9];
pub type Mat4 = [f32; 16];

pub const IDENTITY3: Mat3 = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

pub fn identity() -> Mat4 {
    let mut out = [0.0; 16];
    out[0] = 1.0;
    out[5] = 1.0;
    out[10] = 1.0;
    out[15] = 1.0;
    out
}

/// Right-handed perspective projection with a `[-1, 1]` clip depth range.
pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov_y / 2.0).tan();
    let nf = 1.0 / (near - far);
    let mut out = [0.0; 16];
    out[0] = f / aspect;
    out[5] = f;
    out[10] = (far + near) * nf;
    out[11] = -1.0;
    out[14] = 2.0 * far * near * nf;
    out
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: Vec3, b: Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Unit vector along `v`; straight up when `v` has no length.
pub fn normalize(v: Vec3) -> Vec3 {
    let len = dot(v, v).sqrt();
    if len == 0.0 || !len.is_finite() {
        return [0.0, 1.0, 0.0];
    }
    [v[0] / len, v[1] / len, v[2] / len]
}

/// View matrix looking from `eye` at `target`.
pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    let forward = sub(eye, target);
    let z = if dot(forward, forward) == 0.0 { [0.0, 0.0, 1.0] } else { normalize(forward) };
    let side = cross(up, z);
    let x = if dot(side, side) == 0.0 { [0.0, 0.0, 0.0] } else { normalize(side) };
    let y = cross(z, x);

    [
        x[0], y[0], z[0], 0.0,
        x[1], y[1], z[1], 0.0,
        x[2], y[2], z[2], 0.0,
        -dot(x, eye), -dot(y, eye), -dot(z, eye), 1.0,
    ]
}

/// Matrix product `a * b`.
pub fn mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
        }
    }
    out
}

/// Inverse-transpose of the upper-left 3×3 of `m`, for transforming
/// normals. Falls back to the identity when that block is singular.
pub fn normal_matrix(m: &Mat4) -> Mat3 {
    // a{row}{col}
    let (a00, a01, a02) = (m[0], m[4], m[8]);
    let (a10, a11, a12) = (m[1], m[5], m[9]);
    let (a20, a21, a22) = (m[2], m[6], m[10]);

    let c00 = a11 * a22 - a12 * a21;
    let c01 = a12 * a20 - a10 * a22;
    let c02 = a10 * a21 - a11 * a20;
    let det = a00 * c00 + a01 * c01 + a02 * c02;
    if det == 0.0 || !det.is_finite() {
        return IDENTITY3;
    }
    let inv = 1.0 / det;

    let c10 = a02 * a21 - a01 * a22;
    let c11 = a00 * a22 - a02 * a20;
    let c12 = a01 * a20 - a00 * a21;
    let c20 = a01 * a12 - a02 * a11;
    let c21 = a02 * a10 - a00 * a12;
    let c22 = a00 * a11 - a01 * a10;

    // (A^-1)^T = cofactor(A) / det; stored column-major.
    [
        c00 * inv, c10 * inv, c20 * inv,
        c01 * inv, c11 * inv, c21 * inv,
        c02 * inv, c12 * inv, c22 * inv,
    ]
}

/// Point on a sphere around the origin, `y` up; azimuth 0 faces `+z`.
pub fn spherical_to_cartesian(distance: f32, azimuth: f32, elevation: f32) -> Vec3 {
    [
        distance * elevation.cos() * azimuth.sin(),
        distance * elevation.sin(),
        distance * elevation.cos() * azimuth.cos(),
    ]
}

/// Applies `m` to the point `p` with perspective divide.
pub fn transform_point(m: &Mat4, p: Vec3) -> Vec3 {
    let x = m[0] * p[0] + m[4] * p[1] + m[8] * p[2] + m[12];
    let y = m[1] * p[0] + m[5] * p[1] + m[9] * p[2] + m[13];
    let z = m[2] * p[0] + m[6] * p[1] + m[10] * p[2] + m[14];
    let w = m[3] * p[0] + m[7] * p[1] + m[11] * p[2] + m[15];
    if w == 0.0 { [x, y, z] } else { [x / w, y / w, z / w] }
}
