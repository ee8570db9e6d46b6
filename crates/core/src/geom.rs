use glam::Vec3;

pub fn normalize_vec(v: Vec3) -> Option<Vec3> {
    if v.length_squared() <= 1.0e-8 {
        None
    } else {
        Some(v.normalize())
    }
}

pub fn triangle_area(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    (b - a).cross(c - a).length() * 0.5
}

/// Factor of the projection of `point` onto the line through `a` and `b`,
/// unclamped. 0 at `a`, 1 at `b`.
pub fn line_point_factor(point: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= 1.0e-12 {
        return 0.0;
    }
    (point - a).dot(ab) / len_sq
}

pub fn closest_point_on_segment(point: Vec3, a: Vec3, b: Vec3) -> (Vec3, f32) {
    let t = line_point_factor(point, a, b).clamp(0.0, 1.0);
    (a + (b - a) * t, t)
}

/// Closest pair of points between two segments, returned as factors along
/// each segment together with the points themselves.
pub fn closest_seg_seg(
    a0: Vec3,
    a1: Vec3,
    b0: Vec3,
    b1: Vec3,
) -> (Vec3, Vec3, f32, f32) {
    let d1 = a1 - a0;
    let d2 = b1 - b0;
    let r = a0 - b0;
    let len1 = d1.length_squared();
    let len2 = d2.length_squared();
    let f = d2.dot(r);

    let (mut s, mut t);
    if len1 <= 1.0e-12 && len2 <= 1.0e-12 {
        s = 0.0;
        t = 0.0;
    } else if len1 <= 1.0e-12 {
        s = 0.0;
        t = (f / len2).clamp(0.0, 1.0);
    } else {
        let c = d1.dot(r);
        if len2 <= 1.0e-12 {
            t = 0.0;
            s = (-c / len1).clamp(0.0, 1.0);
        } else {
            let b = d1.dot(d2);
            let denom = len1 * len2 - b * b;
            s = if denom > 1.0e-12 {
                ((b * f - c * len2) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            t = (b * s + f) / len2;
            if t < 0.0 {
                t = 0.0;
                s = (-c / len1).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / len1).clamp(0.0, 1.0);
            }
        }
    }

    (a0 + d1 * s, b0 + d2 * t, s, t)
}

/// Squared distance from a ray to a segment. Returns the distance along the
/// ray to the closest approach and the closest point on the segment.
pub fn ray_segment_closest(
    origin: Vec3,
    dir: Vec3,
    a: Vec3,
    b: Vec3,
    max_dist: f32,
) -> Option<(f32, Vec3, f32)> {
    let far = origin + dir * max_dist;
    let (on_ray, on_seg, s, _) = closest_seg_seg(origin, far, a, b);
    let dist_sq = (on_ray - on_seg).length_squared();
    Some((s * max_dist, on_seg, dist_sq))
}

pub fn ray_triangle_intersect(
    origin: Vec3,
    dir: Vec3,
    a: Vec3,
    b: Vec3,
    c: Vec3,
) -> Option<(f32, [f32; 3])> {
    let eps = 1.0e-6;
    let edge1 = b - a;
    let edge2 = c - a;
    let h = dir.cross(edge2);
    let det = edge1.dot(h);
    if det.abs() < eps {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = s.dot(h) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = edge2.dot(q) * inv_det;
    Some((t, [1.0 - u - v, u, v]))
}

pub fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> (Vec3, [f32; 3]) {
    let ab = b - a;
    let ac = c - a;
    let area = ab.cross(ac).length_squared();
    if area <= 1.0e-12 {
        let mut best = a;
        let mut bary = [1.0, 0.0, 0.0];
        let mut best_dist = (p - a).length_squared();
        let dist_b = (p - b).length_squared();
        if dist_b < best_dist {
            best = b;
            bary = [0.0, 1.0, 0.0];
            best_dist = dist_b;
        }
        let dist_c = (p - c).length_squared();
        if dist_c < best_dist {
            best = c;
            bary = [0.0, 0.0, 1.0];
        }
        return (best, bary);
    }
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, [1.0, 0.0, 0.0]);
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, [0.0, 1.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, [1.0 - v, v, 0.0]);
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, [0.0, 0.0, 1.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, [1.0 - w, 0.0, w]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        let point = b + (c - b) * w;
        return (point, [0.0, 1.0 - w, w]);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    let u = 1.0 - v - w;
    let point = a + ab * v + ac * w;
    (point, [u, v, w])
}

/// Spherical interpolation between two unit vectors, falling back to a
/// normalized lerp when they are nearly parallel.
pub fn slerp_normals(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    let dot = a.dot(b).clamp(-1.0, 1.0);
    if dot > 0.9995 || dot < -0.9995 {
        let mixed = a * (1.0 - t) + b * t;
        return normalize_vec(mixed).unwrap_or(a);
    }
    let theta = dot.acos();
    let sin_theta = theta.sin();
    let wa = ((1.0 - t) * theta).sin() / sin_theta;
    let wb = (t * theta).sin() / sin_theta;
    normalize_vec(a * wa + b * wb).unwrap_or(a)
}

/// Orthonormal tangent frame for a normal, for projecting into the plane
/// perpendicular to it.
pub fn normal_basis(normal: Vec3) -> (Vec3, Vec3) {
    let reference = if normal.x.abs() < 0.9 { Vec3::X } else { Vec3::Y };
    let tangent = normal.cross(reference).normalize();
    let bitangent = normal.cross(tangent);
    (tangent, bitangent)
}

/// Generalized interior weights for a planar-ish polygon: exact barycentric
/// for triangles, mean-value coordinates otherwise. Weights are non-negative
/// for interior points and sum to 1.
pub fn poly_interp_weights(point: Vec3, verts: &[Vec3], weights: &mut Vec<f32>) {
    weights.clear();
    weights.resize(verts.len(), 0.0);
    let count = verts.len();
    if count == 0 {
        return;
    }
    if count == 1 {
        weights[0] = 1.0;
        return;
    }
    if count == 3 {
        let (_, bary) = closest_point_on_triangle(point, verts[0], verts[1], verts[2]);
        weights.copy_from_slice(&bary);
        return;
    }

    let eps = 1.0e-7;
    let mut dirs = Vec::with_capacity(count);
    let mut dists = Vec::with_capacity(count);
    for (i, &v) in verts.iter().enumerate() {
        let d = v - point;
        let len = d.length();
        if len <= eps {
            // On a vertex.
            weights[i] = 1.0;
            return;
        }
        dirs.push(d / len);
        dists.push(len);
    }

    // tan(half angle) per corner pair, detecting on-edge points on the way.
    let mut half_tans = Vec::with_capacity(count);
    for i in 0..count {
        let j = (i + 1) % count;
        let cos = dirs[i].dot(dirs[j]).clamp(-1.0, 1.0);
        let sin = dirs[i].cross(dirs[j]).length();
        if sin <= eps && cos < 0.0 {
            // On the edge between i and j.
            let t = line_point_factor(point, verts[i], verts[j]).clamp(0.0, 1.0);
            for w in weights.iter_mut() {
                *w = 0.0;
            }
            weights[i] = 1.0 - t;
            weights[j] = t;
            return;
        }
        half_tans.push((1.0 - cos) / sin.max(eps));
    }

    let mut total = 0.0;
    for i in 0..count {
        let prev = (i + count - 1) % count;
        let w = (half_tans[prev] + half_tans[i]) / dists[i];
        weights[i] = w;
        total += w;
    }
    if total > 0.0 {
        for w in weights.iter_mut() {
            *w /= total;
        }
    }
}

pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        let seed = if seed == 0 { 0x12345678 } else { seed };
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    pub fn next_f32(&mut self) -> f32 {
        let value = self.next_u32();
        value as f32 / u32::MAX as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_factor_midpoint() {
        let f = line_point_factor(Vec3::new(0.5, 1.0, 0.0), Vec3::ZERO, Vec3::X);
        assert!((f - 0.5).abs() < 1.0e-6);
    }

    #[test]
    fn segment_pair_closest_points() {
        let (on_a, on_b, s, t) = closest_seg_seg(
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, -1.0),
            Vec3::new(0.0, 1.0, 1.0),
        );
        assert!(on_a.length() < 1.0e-6);
        assert!((on_b - Vec3::new(0.0, 1.0, 0.0)).length() < 1.0e-6);
        assert!((s - 0.5).abs() < 1.0e-6);
        assert!((t - 0.5).abs() < 1.0e-6);
    }

    #[test]
    fn ray_hits_triangle_center() {
        let hit = ray_triangle_intersect(
            Vec3::new(0.25, 0.25, 1.0),
            Vec3::NEG_Z,
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
        );
        let (t, bary) = hit.expect("hit");
        assert!((t - 1.0).abs() < 1.0e-5);
        assert!((bary[0] - 0.5).abs() < 1.0e-5);
    }

    #[test]
    fn closest_point_clamps_to_vertex() {
        let (point, bary) =
            closest_point_on_triangle(Vec3::new(-1.0, -1.0, 0.0), Vec3::ZERO, Vec3::X, Vec3::Y);
        assert!(point.length() < 1.0e-6);
        assert_eq!(bary, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn quad_center_weights_are_quarter() {
        let verts = [
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ];
        let mut weights = Vec::new();
        poly_interp_weights(Vec3::ZERO, &verts, &mut weights);
        for w in &weights {
            assert!((w - 0.25).abs() < 1.0e-5);
        }
    }

    #[test]
    fn on_edge_weights_are_linear() {
        let verts = [
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ];
        let mut weights = Vec::new();
        poly_interp_weights(Vec3::new(0.0, -1.0, 0.0), &verts, &mut weights);
        assert!((weights[0] - 0.5).abs() < 1.0e-5);
        assert!((weights[1] - 0.5).abs() < 1.0e-5);
        assert!(weights[2].abs() < 1.0e-5);
        assert!(weights[3].abs() < 1.0e-5);
    }

    #[test]
    fn slerp_halfway_between_axes() {
        let mid = slerp_normals(Vec3::X, Vec3::Y, 0.5);
        assert!((mid.x - mid.y).abs() < 1.0e-5);
        assert!((mid.length() - 1.0).abs() < 1.0e-5);
    }

    #[test]
    fn rng_is_deterministic() {
        let mut a = XorShift32::new(7);
        let mut b = XorShift32::new(7);
        for _ in 0..16 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }
}
