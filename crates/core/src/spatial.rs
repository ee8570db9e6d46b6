use glam::{Mat4, Vec3};

use crate::geom::{
    closest_point_on_segment, closest_point_on_triangle, normalize_vec, ray_segment_closest,
    ray_triangle_intersect,
};
use crate::mesh::Mesh;

/// Maps one object's local space into another's, for querying a source mesh
/// with destination-space coordinates.
#[derive(Debug, Clone, Copy)]
pub struct SpaceTransform {
    matrix: Mat4,
}

impl SpaceTransform {
    /// Transform taking `local` object coordinates into `target` object
    /// coordinates, via world space.
    pub fn from_objects(local_to_world: Mat4, target_to_world: Mat4) -> Self {
        SpaceTransform {
            matrix: target_to_world.inverse() * local_to_world,
        }
    }

    pub fn apply(&self, point: Vec3) -> Vec3 {
        self.matrix.transform_point3(point)
    }

    pub fn apply_normal(&self, normal: Vec3) -> Vec3 {
        let v = self.matrix.transform_vector3(normal);
        normalize_vec(v).unwrap_or(normal)
    }
}

/// Caller-owned state for runs of nearest queries over spatially coherent
/// points. The previous hit location seeds the next query's search radius.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchHint {
    last_hit: Option<Vec3>,
}

impl SearchHint {
    pub fn new() -> Self {
        Self::default()
    }

    fn seed(&self, point: Vec3, max_dist_sq: f32) -> f32 {
        match self.last_hit {
            Some(prev) => (point - prev).length_squared().min(max_dist_sq),
            None => max_dist_sq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub index: u32,
    pub dist_sq: f32,
    pub point: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub index: u32,
    pub distance: f32,
    pub point: Vec3,
}

/// Nearest-vertex queries over source positions, optionally restricted to a
/// subset of vertex indices.
#[derive(Debug, Clone)]
pub struct PointIndex {
    points: Vec<(u32, Vec3)>,
}

impl PointIndex {
    pub fn new(positions: &[[f32; 3]]) -> Self {
        PointIndex {
            points: positions
                .iter()
                .enumerate()
                .map(|(i, p)| (i as u32, Vec3::from(*p)))
                .collect(),
        }
    }

    pub fn from_subset(positions: &[[f32; 3]], subset: &[u32]) -> Self {
        PointIndex {
            points: subset
                .iter()
                .map(|&i| (i, Vec3::from(positions[i as usize])))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn nearest(&self, hint: &mut SearchHint, point: Vec3, max_dist_sq: f32) -> Option<Nearest> {
        let mut best_dist_sq = hint.seed(point, max_dist_sq);
        let mut best = None;
        for &(index, p) in &self.points {
            let dist_sq = (point - p).length_squared();
            if dist_sq <= best_dist_sq {
                best_dist_sq = dist_sq;
                best = Some(Nearest {
                    index,
                    dist_sq,
                    point: p,
                });
            }
        }
        // The seed is only an upper bound; a hit past max_dist is not a hit.
        let best = best.filter(|n| n.dist_sq <= max_dist_sq);
        if let Some(n) = &best {
            hint.last_hit = Some(n.point);
        }
        best
    }
}

/// Nearest and raycast queries over source edges as segments.
#[derive(Debug, Clone)]
pub struct EdgeIndex {
    segments: Vec<(u32, Vec3, Vec3)>,
    epsilon: f32,
}

impl EdgeIndex {
    pub fn new(mesh: &Mesh, epsilon: f32) -> Self {
        EdgeIndex {
            segments: mesh
                .edges
                .iter()
                .enumerate()
                .map(|(i, e)| {
                    (
                        i as u32,
                        Vec3::from(mesh.positions[e.v1 as usize]),
                        Vec3::from(mesh.positions[e.v2 as usize]),
                    )
                })
                .collect(),
            epsilon,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn nearest(&self, hint: &mut SearchHint, point: Vec3, max_dist_sq: f32) -> Option<Nearest> {
        let mut best_dist_sq = hint.seed(point, max_dist_sq);
        let mut best = None;
        for &(index, a, b) in &self.segments {
            let (p, _) = closest_point_on_segment(point, a, b);
            let dist_sq = (point - p).length_squared();
            if dist_sq <= best_dist_sq {
                best_dist_sq = dist_sq;
                best = Some(Nearest {
                    index,
                    dist_sq,
                    point: p,
                });
            }
        }
        let best = best.filter(|n| n.dist_sq <= max_dist_sq);
        if let Some(n) = &best {
            hint.last_hit = Some(n.point);
        }
        best
    }

    /// Sphere-cast along a ray: an edge is hit where the ray passes within
    /// `radius` of the segment.
    pub fn raycast(&self, origin: Vec3, dir: Vec3, radius: f32, max_dist: f32) -> Option<RayHit> {
        let radius_sq = {
            let r = radius + self.epsilon;
            r * r
        };
        let mut best: Option<RayHit> = None;
        for &(index, a, b) in &self.segments {
            let Some((t, on_seg, dist_sq)) = ray_segment_closest(origin, dir, a, b, max_dist)
            else {
                continue;
            };
            if dist_sq > radius_sq || t < 0.0 || t > max_dist {
                continue;
            }
            if best.map_or(true, |h| t < h.distance) {
                best = Some(RayHit {
                    index,
                    distance: t,
                    point: on_seg,
                });
            }
        }
        best
    }
}

/// Nearest and raycast queries over the source mesh's triangulation. Hits
/// report a triangle index; the back-mapping to owning polygons is kept
/// alongside.
#[derive(Debug, Clone)]
pub struct TriIndex {
    tris: Vec<[Vec3; 3]>,
    tri_polys: Vec<u32>,
    epsilon: f32,
}

impl TriIndex {
    pub fn new(mesh: &Mesh, epsilon: f32) -> Self {
        Self::build(mesh, epsilon, None)
    }

    /// Index restricted to triangles whose owning polygon passes the mask,
    /// for per-island queries.
    pub fn from_polys(mesh: &Mesh, epsilon: f32, poly_mask: &[bool]) -> Self {
        Self::build(mesh, epsilon, Some(poly_mask))
    }

    fn build(mesh: &Mesh, epsilon: f32, poly_mask: Option<&[bool]>) -> Self {
        let tess = mesh.triangulate();
        let mut tris = Vec::new();
        let mut tri_polys = Vec::new();
        for (tri_index, tri) in tess.tris.iter().enumerate() {
            let poly = tess.tri_polys[tri_index];
            if let Some(mask) = poly_mask {
                if !mask[poly as usize] {
                    continue;
                }
            }
            tris.push([
                Vec3::from(mesh.positions[tri[0] as usize]),
                Vec3::from(mesh.positions[tri[1] as usize]),
                Vec3::from(mesh.positions[tri[2] as usize]),
            ]);
            tri_polys.push(poly);
        }
        TriIndex {
            tris,
            tri_polys,
            epsilon,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tris.is_empty()
    }

    /// Owning polygon of a triangle returned by a query.
    pub fn tri_poly(&self, tri_index: u32) -> u32 {
        self.tri_polys[tri_index as usize]
    }

    pub fn nearest(&self, hint: &mut SearchHint, point: Vec3, max_dist_sq: f32) -> Option<Nearest> {
        let mut best_dist_sq = hint.seed(point, max_dist_sq);
        let mut best = None;
        for (index, &[a, b, c]) in self.tris.iter().enumerate() {
            let (p, _) = closest_point_on_triangle(point, a, b, c);
            let dist_sq = (point - p).length_squared();
            if dist_sq <= best_dist_sq {
                best_dist_sq = dist_sq;
                best = Some(Nearest {
                    index: index as u32,
                    dist_sq,
                    point: p,
                });
            }
        }
        let best = best.filter(|n| n.dist_sq <= max_dist_sq);
        if let Some(n) = &best {
            hint.last_hit = Some(n.point);
        }
        best
    }

    /// Raycast with a tolerance radius: a triangle missed by the exact ray
    /// still registers when the ray passes within `radius` of it.
    pub fn raycast(&self, origin: Vec3, dir: Vec3, radius: f32, max_dist: f32) -> Option<RayHit> {
        let tol = radius + self.epsilon;
        let tol_sq = tol * tol;
        let mut best: Option<RayHit> = None;

        for (index, &[a, b, c]) in self.tris.iter().enumerate() {
            let index = index as u32;
            let hit = match ray_triangle_intersect(origin, dir, a, b, c) {
                Some((t, _)) if t >= 0.0 && t <= max_dist => Some(RayHit {
                    index,
                    distance: t,
                    point: origin + dir * t,
                }),
                _ if tol > 0.0 => Self::grazing_hit(origin, dir, max_dist, tol_sq, index, a, b, c),
                _ => None,
            };
            let Some(hit) = hit else { continue };
            if best.map_or(true, |h| hit.distance < h.distance) {
                best = Some(hit);
            }
        }
        best
    }

    // Closest approach of the ray to the triangle boundary, for rays that
    // graze past without an exact intersection.
    fn grazing_hit(
        origin: Vec3,
        dir: Vec3,
        max_dist: f32,
        tol_sq: f32,
        index: u32,
        a: Vec3,
        b: Vec3,
        c: Vec3,
    ) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        for (s0, s1) in [(a, b), (b, c), (c, a)] {
            let Some((t, on_seg, dist_sq)) = ray_segment_closest(origin, dir, s0, s1, max_dist)
            else {
                continue;
            };
            if dist_sq > tol_sq || t < 0.0 || t > max_dist {
                continue;
            }
            if best.map_or(true, |h| t < h.distance) {
                best = Some(RayHit {
                    index,
                    distance: t,
                    point: on_seg,
                });
            }
        }

        // A near-parallel ray skimming over the interior attains its closest
        // approach at an endpoint of the clamped ray, not over an edge.
        for (t, p) in [(0.0, origin), (max_dist, origin + dir * max_dist)] {
            let (on_tri, _) = closest_point_on_triangle(p, a, b, c);
            if (p - on_tri).length_squared() > tol_sq {
                continue;
            }
            if best.map_or(true, |h| t < h.distance) {
                best = Some(RayHit {
                    index,
                    distance: t,
                    point: on_tri,
                });
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::make_quad;

    #[test]
    fn space_transform_round_trip() {
        let local = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let target = Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0));
        let xf = SpaceTransform::from_objects(local, target);
        let p = xf.apply(Vec3::ZERO);
        assert!((p - Vec3::new(1.0, 2.0, 2.0)).length() < 1.0e-6);
    }

    #[test]
    fn point_index_respects_max_dist() {
        let index = PointIndex::new(&[[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]]);
        let mut hint = SearchHint::new();
        let near = index.nearest(&mut hint, Vec3::new(9.0, 0.0, 0.0), 4.0);
        assert_eq!(near.map(|n| n.index), Some(1));
        let miss = index.nearest(&mut hint, Vec3::new(5.0, 0.0, 0.0), 4.0);
        assert!(miss.is_none());
    }

    #[test]
    fn hint_does_not_change_results() {
        let index = PointIndex::new(&[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [4.0, 0.0, 0.0]]);
        let queries = [
            Vec3::new(0.1, 0.0, 0.0),
            Vec3::new(1.9, 0.0, 0.0),
            Vec3::new(4.2, 0.0, 0.0),
        ];
        let mut hinted = SearchHint::new();
        for q in queries {
            let with_hint = index.nearest(&mut hinted, q, f32::MAX);
            let without = index.nearest(&mut SearchHint::new(), q, f32::MAX);
            assert_eq!(with_hint, without);
        }
    }

    #[test]
    fn edge_index_nearest_clamps_to_segment() {
        let mesh = make_quad(2.0);
        let index = EdgeIndex::new(&mesh, 0.0);
        let mut hint = SearchHint::new();
        let near = index
            .nearest(&mut hint, Vec3::new(5.0, 0.0, 0.0), f32::MAX)
            .expect("hit");
        assert!(near.point.x <= 1.0 + 1.0e-6);
    }

    #[test]
    fn tri_index_raycast_hits_quad() {
        let mesh = make_quad(2.0);
        let index = TriIndex::new(&mesh, 0.0);
        let hit = index
            .raycast(Vec3::new(0.2, 0.2, 1.0), Vec3::NEG_Z, 0.0, 10.0)
            .expect("hit");
        assert!((hit.distance - 1.0).abs() < 1.0e-5);
        assert_eq!(index.tri_poly(hit.index), 0);
    }

    #[test]
    fn tri_index_radius_catches_grazing_ray() {
        let mesh = make_quad(2.0);
        let index = TriIndex::new(&mesh, 0.0);
        let origin = Vec3::new(1.05, 0.0, 1.0);
        assert!(index.raycast(origin, Vec3::NEG_Z, 0.0, 10.0).is_none());
        let hit = index.raycast(origin, Vec3::NEG_Z, 0.1, 10.0);
        assert!(hit.is_some());
    }

    #[test]
    fn tri_index_radius_catches_ray_skimming_interior() {
        let mesh = make_quad(2.0);
        let index = TriIndex::new(&mesh, 0.0);
        // Parallel to the quad, slightly above it, staying clear of the
        // boundary and the fan diagonal for its whole length.
        let origin = Vec3::new(-0.3, -0.5, 0.05);
        assert!(index.raycast(origin, Vec3::X, 0.0, 0.6).is_none());
        let hit = index.raycast(origin, Vec3::X, 0.1, 0.6).expect("hit");
        assert!(hit.point.z.abs() < 1.0e-6);
        assert_eq!(hit.distance, 0.0);
    }

    #[test]
    fn subset_index_ignores_masked_polys() {
        let mesh = crate::mesh::make_grid_quads([2.0, 1.0], [2, 1]);
        let mask = vec![false, true];
        let index = TriIndex::from_polys(&mesh, 0.0, &mask);
        let mut hint = SearchHint::new();
        let near = index
            .nearest(&mut hint, Vec3::new(-0.9, 0.0, 0.0), f32::MAX)
            .expect("hit");
        assert_eq!(index.tri_poly(near.index), 1);
    }
}
