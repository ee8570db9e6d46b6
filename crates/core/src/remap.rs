use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::connectivity::{vert_edge_map, vert_loop_map, vert_poly_map};
use crate::geom::{
    closest_seg_seg, line_point_factor, normal_basis, poly_interp_weights, slerp_normals,
    triangle_area, XorShift32,
};
use crate::islands::uv_islands;
use crate::mesh::Mesh;
use crate::spatial::{EdgeIndex, PointIndex, RayHit, SearchHint, SpaceTransform, TriIndex};

// At most this many casts per sampled ray; each retry gets a wider radius
// and a proportionally smaller weight.
const APPROX_CASTS: usize = 3;
const APPROX_FAC: f32 = 5.0;

const HUGE_FACTOR: f32 = 1.0e18;

/// Weighted source correspondences for one destination element. Empty
/// sources with an infinite hit distance mean "no source found", which is a
/// valid state. Non-empty weights are strictly positive and sum to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingItem {
    pub sources: Vec<(u32, f32)>,
    pub hit_distance: f32,
    pub island: i32,
}

impl MappingItem {
    pub fn invalid() -> Self {
        MappingItem {
            sources: Vec::new(),
            hit_distance: f32::INFINITY,
            island: 0,
        }
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }
}

/// One [`MappingItem`] per destination element of a single kind.
#[derive(Debug, Clone, Default)]
pub struct MeshMapping {
    pub items: Vec<MappingItem>,
}

impl MeshMapping {
    fn filled_invalid(len: usize) -> Self {
        MeshMapping {
            items: vec![MappingItem::invalid(); len],
        }
    }

    fn set(
        &mut self,
        index: usize,
        hit_distance: f32,
        island: i32,
        sources: impl IntoIterator<Item = (u32, f32)>,
    ) {
        self.items[index] = MappingItem {
            sources: sources.into_iter().filter(|&(_, w)| w > 0.0).collect(),
            hit_distance,
            island,
        };
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertMode {
    Topology,
    Nearest,
    EdgeNearest,
    EdgeInterp,
    PolyNearest,
    PolyInterp,
    PolyInterpNorProj,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeMode {
    Topology,
    VertNearest,
    Nearest,
    PolyNearest,
    InterpNorProj,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopMode {
    Topology,
    NearestLoopNormal,
    NearestPolyNormal,
    PolyNearest,
    PolyInterpNearest,
    PolyInterpNorProj,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolyMode {
    Topology,
    Nearest,
    Normal,
    InterpNorProj,
}

fn xf_point(space_transform: Option<&SpaceTransform>, p: Vec3) -> Vec3 {
    match space_transform {
        Some(xf) => xf.apply(p),
        None => p,
    }
}

fn xf_normal(space_transform: Option<&SpaceTransform>, n: Vec3) -> Vec3 {
    match space_transform {
        Some(xf) => xf.apply_normal(n),
        None => n,
    }
}

fn topology_identity(count_dst: usize, count_src: usize, what: &str) -> MeshMapping {
    if count_dst != count_src {
        warn!(
            count_dst,
            count_src, "topology mapping requires equal {what} counts"
        );
        return MeshMapping::filled_invalid(count_dst);
    }
    let mut map = MeshMapping::filled_invalid(count_dst);
    for i in 0..count_dst {
        map.set(i, f32::INFINITY, 0, [(i as u32, 1.0)]);
    }
    map
}

/// Interpolation weights over a source polygon's vertices (or corners, when
/// `use_loops` is set) at a point on the polygon.
fn interp_poly_sources(src: &Mesh, poly_index: usize, point: Vec3, use_loops: bool) -> Vec<(u32, f32)> {
    let poly = &src.polys[poly_index];
    let corners = src.poly_loops(poly_index);
    let verts: Vec<Vec3> = corners
        .iter()
        .map(|l| Vec3::from(src.positions[l.vert as usize]))
        .collect();
    let mut weights = Vec::new();
    poly_interp_weights(point, &verts, &mut weights);
    corners
        .iter()
        .enumerate()
        .map(|(i, l)| {
            let index = if use_loops {
                poly.loop_start + i as u32
            } else {
                l.vert
            };
            (index, weights[i])
        })
        .collect()
}

/// Closest vertex (or corner) of a source polygon to a point.
fn closest_in_poly(src: &Mesh, poly_index: usize, point: Vec3, use_loops: bool) -> u32 {
    let poly = &src.polys[poly_index];
    let corners = src.poly_loops(poly_index);
    let mut best = 0u32;
    let mut best_dist_sq = f32::MAX;
    for (i, l) in corners.iter().enumerate() {
        let dist_sq = (point - Vec3::from(src.positions[l.vert as usize])).length_squared();
        if dist_sq < best_dist_sq {
            best_dist_sq = dist_sq;
            best = if use_loops {
                poly.loop_start + i as u32
            } else {
                l.vert
            };
        }
    }
    best
}

fn raycast_approx(
    ray_radius: f32,
    cast: impl Fn(f32) -> Option<RayHit>,
) -> Option<(RayHit, f32)> {
    let casts = if ray_radius > 0.0 { APPROX_CASTS } else { 1 };
    let mut w = 1.0f32;
    for _ in 0..casts {
        if let Some(hit) = cast(ray_radius / w) {
            return Some((hit, w));
        }
        w /= APPROX_FAC;
    }
    None
}

fn point_normals_of(mesh: &Mesh) -> Vec<[f32; 3]> {
    match &mesh.normals {
        Some(normals) => normals.clone(),
        None => mesh.point_normals(),
    }
}

fn corner_normals_of(mesh: &Mesh, split_angle: f32) -> Vec<[f32; 3]> {
    match &mesh.corner_normals {
        Some(normals) => normals.clone(),
        None => mesh.corner_normals_split(split_angle),
    }
}

/// Maps every destination vertex to weighted source elements.
pub fn verts_compute(
    mode: VertMode,
    space_transform: Option<&SpaceTransform>,
    max_dist: f32,
    ray_radius: f32,
    dst: &Mesh,
    src: &Mesh,
) -> MeshMapping {
    let count_dst = dst.positions.len();
    let max_dist_sq = max_dist * max_dist;

    if mode == VertMode::Topology {
        return topology_identity(count_dst, src.positions.len(), "vertex");
    }

    let mut map = MeshMapping::filled_invalid(count_dst);

    match mode {
        VertMode::Nearest => {
            let index = PointIndex::new(&src.positions);
            let mut hint = SearchHint::new();
            for i in 0..count_dst {
                let co = xf_point(space_transform, Vec3::from(dst.positions[i]));
                if let Some(near) = index.nearest(&mut hint, co, max_dist_sq) {
                    map.set(i, near.dist_sq.sqrt(), 0, [(near.index, 1.0)]);
                }
            }
        }
        VertMode::EdgeNearest | VertMode::EdgeInterp => {
            let index = EdgeIndex::new(src, 0.0);
            let mut hint = SearchHint::new();
            for i in 0..count_dst {
                let co = xf_point(space_transform, Vec3::from(dst.positions[i]));
                let Some(near) = index.nearest(&mut hint, co, max_dist_sq) else {
                    continue;
                };
                let edge = &src.edges[near.index as usize];
                let v1 = Vec3::from(src.positions[edge.v1 as usize]);
                let v2 = Vec3::from(src.positions[edge.v2 as usize]);
                let hitdist = near.dist_sq.sqrt();

                if mode == VertMode::EdgeNearest {
                    let vert = if (co - v1).length_squared() > (co - v2).length_squared() {
                        edge.v2
                    } else {
                        edge.v1
                    };
                    map.set(i, hitdist, 0, [(vert, 1.0)]);
                } else {
                    let w1 = line_point_factor(co, v2, v1).clamp(0.0, 1.0);
                    map.set(i, hitdist, 0, [(edge.v1, w1), (edge.v2, 1.0 - w1)]);
                }
            }
        }
        VertMode::PolyNearest | VertMode::PolyInterp => {
            let index = TriIndex::new(src, 0.0);
            let mut hint = SearchHint::new();
            for i in 0..count_dst {
                let co = xf_point(space_transform, Vec3::from(dst.positions[i]));
                let Some(near) = index.nearest(&mut hint, co, max_dist_sq) else {
                    continue;
                };
                let poly = index.tri_poly(near.index) as usize;
                let hitdist = near.dist_sq.sqrt();
                if mode == VertMode::PolyNearest {
                    let vert = closest_in_poly(src, poly, near.point, false);
                    map.set(i, hitdist, 0, [(vert, 1.0)]);
                } else {
                    let sources = interp_poly_sources(src, poly, near.point, false);
                    map.set(i, hitdist, 0, sources);
                }
            }
        }
        VertMode::PolyInterpNorProj => {
            let index = TriIndex::new(src, 0.0);
            let normals_dst = point_normals_of(dst);
            for i in 0..count_dst {
                let co = xf_point(space_transform, Vec3::from(dst.positions[i]));
                let no = xf_normal(space_transform, Vec3::from(normals_dst[i]));
                let Some(hit) = index.raycast(co, no, ray_radius, max_dist) else {
                    continue;
                };
                let poly = index.tri_poly(hit.index) as usize;
                let sources = interp_poly_sources(src, poly, hit.point, false);
                map.set(i, hit.distance, 0, sources);
            }
        }
        VertMode::Topology => unreachable!(),
    }

    map
}

/// Maps every destination edge to weighted source elements.
pub fn edges_compute(
    mode: EdgeMode,
    space_transform: Option<&SpaceTransform>,
    max_dist: f32,
    ray_radius: f32,
    dst: &Mesh,
    src: &Mesh,
) -> MeshMapping {
    let count_dst = dst.edges.len();
    let max_dist_sq = max_dist * max_dist;

    if mode == EdgeMode::Topology {
        return topology_identity(count_dst, src.edges.len(), "edge");
    }

    let mut map = MeshMapping::filled_invalid(count_dst);

    match mode {
        EdgeMode::VertNearest => {
            let vert_index = PointIndex::new(&src.positions);
            let src_vert_edges = vert_edge_map(src);
            let mut hint = SearchHint::new();

            // Closest source vert per dst vert, computed at most once.
            let mut vert_cache: Vec<Option<Option<(f32, u32)>>> =
                vec![None; dst.positions.len()];

            for i in 0..count_dst {
                let e_dst = dst.edges[i];

                for vidx_dst in [e_dst.v1, e_dst.v2] {
                    let slot = &mut vert_cache[vidx_dst as usize];
                    if slot.is_none() {
                        let co = xf_point(space_transform, Vec3::from(dst.positions[vidx_dst as usize]));
                        *slot = Some(
                            vert_index
                                .nearest(&mut hint, co, max_dist_sq)
                                .map(|n| (n.dist_sq.sqrt(), n.index)),
                        );
                    }
                }

                // Among all source edges touching either closest vert, pick
                // the one minimizing the summed endpoint distances.
                let mut best_totdist = f32::MAX;
                let mut best_edge_src: Option<u32> = None;
                for (vidx_dst, other_dst) in [(e_dst.v1, e_dst.v2), (e_dst.v2, e_dst.v1)] {
                    let Some(Some((first_dist, vidx_src))) = vert_cache[vidx_dst as usize] else {
                        continue;
                    };
                    let other_co_dst =
                        xf_point(space_transform, Vec3::from(dst.positions[other_dst as usize]));
                    for &eidx_src in src_vert_edges.get(vidx_src as usize) {
                        let e_src = src.edges[eidx_src as usize];
                        let other_src = e_src.other_vert(vidx_src);
                        let other_co_src = Vec3::from(src.positions[other_src as usize]);
                        let totdist = first_dist + (other_co_src - other_co_dst).length();
                        if totdist < best_totdist {
                            best_totdist = totdist;
                            best_edge_src = Some(eidx_src);
                        }
                    }
                }

                if let Some(eidx_src) = best_edge_src {
                    let e_src = src.edges[eidx_src as usize];
                    let co1_src = Vec3::from(src.positions[e_src.v1 as usize]);
                    let co2_src = Vec3::from(src.positions[e_src.v2 as usize]);
                    let co1_dst = xf_point(space_transform, Vec3::from(dst.positions[e_dst.v1 as usize]));
                    let co2_dst = xf_point(space_transform, Vec3::from(dst.positions[e_dst.v2 as usize]));
                    let (on_src, on_dst, _, _) = closest_seg_seg(co1_src, co2_src, co1_dst, co2_dst);
                    map.set(i, (on_dst - on_src).length(), 0, [(eidx_src, 1.0)]);
                }
            }
        }
        EdgeMode::Nearest => {
            let index = EdgeIndex::new(src, 0.0);
            let mut hint = SearchHint::new();
            for i in 0..count_dst {
                let e = dst.edges[i];
                let mid = (Vec3::from(dst.positions[e.v1 as usize])
                    + Vec3::from(dst.positions[e.v2 as usize]))
                    * 0.5;
                let co = xf_point(space_transform, mid);
                if let Some(near) = index.nearest(&mut hint, co, max_dist_sq) {
                    map.set(i, near.dist_sq.sqrt(), 0, [(near.index, 1.0)]);
                }
            }
        }
        EdgeMode::PolyNearest => {
            let index = TriIndex::new(src, 0.0);
            let mut hint = SearchHint::new();
            for i in 0..count_dst {
                let e = dst.edges[i];
                let mid = (Vec3::from(dst.positions[e.v1 as usize])
                    + Vec3::from(dst.positions[e.v2 as usize]))
                    * 0.5;
                let co = xf_point(space_transform, mid);
                let Some(near) = index.nearest(&mut hint, co, max_dist_sq) else {
                    continue;
                };
                let poly = index.tri_poly(near.index) as usize;
                // Closest edge of the hit polygon, by edge midpoint.
                let mut best_dist_sq = f32::MAX;
                let mut best_edge_src: Option<u32> = None;
                for l in src.poly_loops(poly) {
                    let e_src = src.edges[l.edge as usize];
                    let mid_src = (Vec3::from(src.positions[e_src.v1 as usize])
                        + Vec3::from(src.positions[e_src.v2 as usize]))
                        * 0.5;
                    let dist_sq = (co - mid_src).length_squared();
                    if dist_sq < best_dist_sq {
                        best_dist_sq = dist_sq;
                        best_edge_src = Some(l.edge);
                    }
                }
                if let Some(eidx) = best_edge_src {
                    map.set(i, near.dist_sq.sqrt(), 0, [(eidx, 1.0)]);
                }
            }
        }
        EdgeMode::InterpNorProj => {
            let (num_rays_min, num_rays_max) = (5usize, 100usize);
            let index = EdgeIndex::new(src, 0.0);
            let normals_dst = point_normals_of(dst);
            let mut weights = vec![0.0f32; src.edges.len()];

            for i in 0..count_dst {
                // Sample a 1-D grid of rays along the edge, interpolating
                // endpoint positions and slerping endpoint normals.
                let e = dst.edges[i];
                let v1_co = xf_point(space_transform, Vec3::from(dst.positions[e.v1 as usize]));
                let v2_co = xf_point(space_transform, Vec3::from(dst.positions[e.v2 as usize]));
                let v1_no = xf_normal(space_transform, Vec3::from(normals_dst[e.v1 as usize]));
                let v2_no = xf_normal(space_transform, Vec3::from(normals_dst[e.v2 as usize]));

                weights.iter_mut().for_each(|w| *w = 0.0);

                let edge_len = (v2_co - v1_co).length();
                let grid_size = if ray_radius > 0.0 {
                    ((edge_len / ray_radius + 0.5) as usize).clamp(num_rays_min, num_rays_max)
                } else {
                    num_rays_max
                };
                let grid_step = 1.0 / grid_size as f32;

                let mut totweights = 0.0f32;
                let mut hitdist_accum = 0.0f32;
                for j in 0..grid_size {
                    let fac = grid_step * j as f32;
                    let co = v1_co.lerp(v2_co, fac);
                    let no = slerp_normals(v1_no, v2_no, fac);

                    if let Some((hit, w)) =
                        raycast_approx(ray_radius, |r| index.raycast(co, no, r, max_dist))
                    {
                        weights[hit.index as usize] += w;
                        totweights += w;
                        hitdist_accum += hit.distance;
                    }
                }

                // Valid only when at least half of the rays found a source.
                if totweights > grid_size as f32 / 2.0 {
                    let sources = weights
                        .iter()
                        .enumerate()
                        .filter(|(_, &w)| w > 0.0)
                        .map(|(j, &w)| (j as u32, w / totweights));
                    map.set(i, hitdist_accum / totweights, 0, sources);
                }
            }
        }
        EdgeMode::Topology => unreachable!(),
    }

    map
}

#[derive(Debug, Clone, Copy)]
struct IslandResult {
    factor: f32,
    hit_distance: f32,
    idx_src: i32,
    hit_point: Vec3,
}

impl IslandResult {
    fn miss() -> Self {
        IslandResult {
            factor: 0.0,
            hit_distance: f32::INFINITY,
            idx_src: -1,
            hit_point: Vec3::ZERO,
        }
    }
}

enum LoopIndexes {
    Points(Vec<PointIndex>),
    Tris(Vec<TriIndex>),
}

/// Maps every destination corner to weighted source elements. When
/// `use_islands` is set, the source is partitioned at UV seams, each island
/// gets its own spatial index, and all corners of one destination polygon
/// commit to the island with the best mean factor.
pub fn loops_compute(
    mode: LoopMode,
    space_transform: Option<&SpaceTransform>,
    max_dist: f32,
    ray_radius: f32,
    dst: &Mesh,
    split_angle_dst: f32,
    src: &Mesh,
    use_islands: bool,
) -> MeshMapping {
    let count_dst = dst.loops.len();
    let max_dist_sq = max_dist * max_dist;

    if mode == LoopMode::Topology {
        // Identical topology is assumed to imply identical islands.
        return topology_identity(count_dst, src.loops.len(), "corner");
    }

    let use_from_vert = matches!(mode, LoopMode::NearestLoopNormal | LoopMode::NearestPolyNormal);
    let use_norproj = mode == LoopMode::PolyInterpNorProj;

    let loop_nors_dst = (mode == LoopMode::NearestLoopNormal || use_norproj)
        .then(|| corner_normals_of(dst, split_angle_dst));
    let poly_nors_dst =
        (mode == LoopMode::NearestPolyNormal).then(|| dst.compute_poly_normals());
    let loop_nors_src =
        (mode == LoopMode::NearestLoopNormal).then(|| corner_normals_of(src, 180.0));
    let poly_nors_src =
        (mode == LoopMode::NearestPolyNormal).then(|| src.compute_poly_normals());

    let islands = if use_islands { uv_islands(src) } else { None };
    let num_trees = islands.as_ref().map_or(1, |isl| isl.count());

    let indexes = if use_from_vert {
        let mut list = Vec::with_capacity(num_trees);
        match &islands {
            Some(isl) => {
                for island in &isl.islands {
                    let mut active = vec![false; src.positions.len()];
                    for &poly in &island.polys {
                        for l in src.poly_loops(poly as usize) {
                            active[l.vert as usize] = true;
                        }
                    }
                    let subset: Vec<u32> = (0..src.positions.len() as u32)
                        .filter(|&v| active[v as usize])
                        .collect();
                    list.push(PointIndex::from_subset(&src.positions, &subset));
                }
            }
            None => list.push(PointIndex::new(&src.positions)),
        }
        LoopIndexes::Points(list)
    } else {
        let mut list = Vec::with_capacity(num_trees);
        match &islands {
            Some(isl) => {
                for island in &isl.islands {
                    let mut mask = vec![false; src.polys.len()];
                    for &poly in &island.polys {
                        mask[poly as usize] = true;
                    }
                    list.push(TriIndex::from_polys(src, 0.0, &mask));
                }
            }
            None => list.push(TriIndex::new(src, 0.0)),
        }
        LoopIndexes::Tris(list)
    };

    let vert_loops_src = use_from_vert.then(|| vert_loop_map(src));
    let vert_polys_src = (mode == LoopMode::NearestPolyNormal).then(|| vert_poly_map(src));

    let mut map = MeshMapping::filled_invalid(count_dst);
    let mut islands_res: Vec<Vec<IslandResult>> = vec![Vec::new(); num_trees];

    for pidx_dst in 0..dst.polys.len() {
        let poly_dst = dst.polys[pidx_dst];
        let loop_range = poly_dst.loop_range();
        let totloop = poly_dst.loop_total as usize;

        for (tidx, results) in islands_res.iter_mut().enumerate() {
            results.clear();

            for loop_index in loop_range.clone() {
                let corner = dst.loops[loop_index];
                let co = xf_point(space_transform, Vec3::from(dst.positions[corner.vert as usize]));

                let res = if use_from_vert {
                    let LoopIndexes::Points(points) = &indexes else {
                        unreachable!()
                    };
                    let mut hint = SearchHint::new();
                    match points[tidx].nearest(&mut hint, co, max_dist_sq) {
                        Some(near) => {
                            let hitdist = near.dist_sq.sqrt();
                            let (nor_dst, nors_src, candidates) =
                                if mode == LoopMode::NearestLoopNormal {
                                    (
                                        Vec3::from(loop_nors_dst.as_ref().unwrap()[loop_index]),
                                        loop_nors_src.as_deref().unwrap(),
                                        vert_loops_src.as_ref().unwrap().get(near.index as usize),
                                    )
                                } else {
                                    (
                                        poly_nors_dst.as_ref().unwrap()[pidx_dst],
                                        &[] as &[[f32; 3]],
                                        vert_polys_src.as_ref().unwrap().get(near.index as usize),
                                    )
                                };
                            let nor_dst = xf_normal(space_transform, nor_dst);

                            let mut best_dot = -2.0f32;
                            let mut best_idx_src = -1i32;
                            for &cand in candidates {
                                let nor_src = if mode == LoopMode::NearestLoopNormal {
                                    Vec3::from(nors_src[cand as usize])
                                } else {
                                    poly_nors_src.as_ref().unwrap()[cand as usize]
                                };
                                let dot = nor_src.dot(nor_dst);
                                if dot > best_dot {
                                    best_dot = dot;
                                    best_idx_src = cand as i32;
                                }
                            }
                            if mode == LoopMode::NearestPolyNormal && best_idx_src >= 0 {
                                // Resolve the poly to its corner at the hit vertex.
                                let poly_src = src.polys[best_idx_src as usize];
                                for (pl, l) in src.poly_loops(best_idx_src as usize).iter().enumerate()
                                {
                                    if l.vert == near.index {
                                        best_idx_src = (poly_src.loop_start + pl as u32) as i32;
                                        break;
                                    }
                                }
                            }
                            IslandResult {
                                factor: if hitdist > 0.0 {
                                    1.0 / hitdist * best_dot
                                } else {
                                    HUGE_FACTOR
                                },
                                hit_distance: hitdist,
                                idx_src: best_idx_src,
                                hit_point: near.point,
                            }
                        }
                        None => IslandResult::miss(),
                    }
                } else if use_norproj {
                    let LoopIndexes::Tris(tris) = &indexes else {
                        unreachable!()
                    };
                    let no = xf_normal(
                        space_transform,
                        Vec3::from(loop_nors_dst.as_ref().unwrap()[loop_index]),
                    );
                    match raycast_approx(ray_radius, |r| tris[tidx].raycast(co, no, r, max_dist)) {
                        Some((hit, w)) => IslandResult {
                            factor: if hit.distance > 0.0 {
                                1.0 / hit.distance * w
                            } else {
                                HUGE_FACTOR
                            },
                            hit_distance: hit.distance,
                            idx_src: tris[tidx].tri_poly(hit.index) as i32,
                            hit_point: hit.point,
                        },
                        None => IslandResult::miss(),
                    }
                } else {
                    let LoopIndexes::Tris(tris) = &indexes else {
                        unreachable!()
                    };
                    let mut hint = SearchHint::new();
                    match tris[tidx].nearest(&mut hint, co, max_dist_sq) {
                        Some(near) => {
                            let hitdist = near.dist_sq.sqrt();
                            IslandResult {
                                factor: if hitdist > 0.0 { 1.0 / hitdist } else { HUGE_FACTOR },
                                hit_distance: hitdist,
                                idx_src: tris[tidx].tri_poly(near.index) as i32,
                                hit_point: near.point,
                            }
                        }
                        None => IslandResult::miss(),
                    }
                };

                results.push(res);
            }
        }

        // Commit the whole destination polygon to the island with the best
        // mean factor over its corners.
        let mut best_island_fac = 0.0f32;
        let mut best_island_idx: i32 = -1;
        for (tidx, results) in islands_res.iter().enumerate() {
            let island_fac: f32 =
                results.iter().map(|r| r.factor).sum::<f32>() / totloop as f32;
            if island_fac > best_island_fac {
                best_island_fac = island_fac;
                best_island_idx = tidx as i32;
            }
        }

        for (plidx, loop_index) in loop_range.enumerate() {
            if best_island_idx < 0 {
                map.items[loop_index] = MappingItem::invalid();
                continue;
            }

            let res = islands_res[best_island_idx as usize][plidx];
            if res.idx_src < 0 {
                // Sourceless corner still tagged with the chosen island.
                map.items[loop_index] = MappingItem {
                    sources: Vec::new(),
                    hit_distance: f32::INFINITY,
                    island: best_island_idx,
                };
                continue;
            }

            if use_from_vert {
                map.set(
                    loop_index,
                    res.hit_distance,
                    best_island_idx,
                    [(res.idx_src as u32, 1.0)],
                );
            } else {
                let poly_src = res.idx_src as usize;
                match mode {
                    LoopMode::PolyNearest => {
                        let best_loop = closest_in_poly(src, poly_src, res.hit_point, true);
                        map.set(
                            loop_index,
                            res.hit_distance,
                            best_island_idx,
                            [(best_loop, 1.0)],
                        );
                    }
                    _ => {
                        let sources = interp_poly_sources(src, poly_src, res.hit_point, true);
                        map.set(loop_index, res.hit_distance, best_island_idx, sources);
                    }
                }
            }
        }
    }

    map
}

/// Maps every destination polygon to weighted source polygons.
pub fn polys_compute(
    mode: PolyMode,
    space_transform: Option<&SpaceTransform>,
    max_dist: f32,
    ray_radius: f32,
    dst: &Mesh,
    src: &Mesh,
) -> MeshMapping {
    let count_dst = dst.polys.len();
    let max_dist_sq = max_dist * max_dist;

    if mode == PolyMode::Topology {
        return topology_identity(count_dst, src.polys.len(), "polygon");
    }

    let mut map = MeshMapping::filled_invalid(count_dst);
    let index = TriIndex::new(src, 0.0);

    match mode {
        PolyMode::Nearest => {
            let mut hint = SearchHint::new();
            for i in 0..count_dst {
                let co = xf_point(space_transform, dst.poly_center(i));
                if let Some(near) = index.nearest(&mut hint, co, max_dist_sq) {
                    map.set(
                        i,
                        near.dist_sq.sqrt(),
                        0,
                        [(index.tri_poly(near.index), 1.0)],
                    );
                }
            }
        }
        PolyMode::Normal => {
            for i in 0..count_dst {
                let co = xf_point(space_transform, dst.poly_center(i));
                let no = xf_normal(space_transform, dst.poly_normal(i));
                if let Some(hit) = index.raycast(co, no, ray_radius, max_dist) {
                    map.set(i, hit.distance, 0, [(index.tri_poly(hit.index), 1.0)]);
                }
            }
        }
        PolyMode::InterpNorProj => {
            let mut weights = vec![0.0f32; src.polys.len()];
            let mut corners_2d: Vec<(f32, f32)> = Vec::new();

            for i in 0..count_dst {
                // Monte-Carlo sampling: random rays across the polygon's
                // surface, spread over its fan triangles in proportion to
                // their area, all cast along the polygon normal.
                let poly = dst.polys[i];
                if poly.loop_total < 3 {
                    continue;
                }

                let center = xf_point(space_transform, dst.poly_center(i));
                let no = xf_normal(space_transform, dst.poly_normal(i));
                let (tangent, bitangent) = normal_basis(no);
                let plane_z = center.dot(no);

                weights.iter_mut().for_each(|w| *w = 0.0);

                corners_2d.clear();
                let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
                let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
                for l in dst.poly_loops(i) {
                    let co = xf_point(space_transform, Vec3::from(dst.positions[l.vert as usize]));
                    let (x, y) = (co.dot(tangent), co.dot(bitangent));
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                    corners_2d.push((x, y));
                }

                let size = (max_x - min_x).max(max_y - min_y);
                let tot_rays = if ray_radius > 0.0 {
                    ((size / ray_radius + 0.5) as usize).clamp(4, 20)
                } else {
                    20
                };
                // min 16 rays per polygon, max 400.
                let tot_rays = tot_rays * tot_rays;

                let lift = |x: f32, y: f32| tangent * x + bitangent * y + no * plane_z;

                let nbr_tris = poly.loop_total as usize - 2;
                let mut poly_area = 0.0f32;
                for j in 0..nbr_tris {
                    let (x0, y0) = corners_2d[0];
                    let (x1, y1) = corners_2d[j + 1];
                    let (x2, y2) = corners_2d[j + 2];
                    poly_area += triangle_area(lift(x0, y0), lift(x1, y1), lift(x2, y2));
                }
                if poly_area <= 0.0 {
                    continue;
                }
                let poly_area_inv = 1.0 / poly_area;

                let mut rng = XorShift32::new(i as u32 + 1);
                let mut totweights = 0.0f32;
                let mut hitdist_accum = 0.0f32;
                let mut done_rays = 0usize;
                let mut done_area = 0.0f32;

                for j in 0..nbr_tris {
                    let (x0, y0) = corners_2d[0];
                    let (x1, y1) = corners_2d[j + 1];
                    let (x2, y2) = corners_2d[j + 2];
                    let p0 = lift(x0, y0);
                    let p1 = lift(x1, y1);
                    let p2 = lift(x2, y2);

                    // Absolute ray count per triangle from the running area
                    // sum, avoiding accumulated rounding drift.
                    done_area += triangle_area(p0, p1, p2);
                    let target = (tot_rays as f32 * done_area * poly_area_inv + 0.5) as usize;
                    let nbr_rays = target.saturating_sub(done_rays);
                    done_rays = target.max(done_rays);

                    for _ in 0..nbr_rays {
                        let r1 = rng.next_f32().clamp(0.0, 1.0);
                        let r2 = rng.next_f32().clamp(0.0, 1.0);
                        let sqrt_r1 = r1.sqrt();
                        let u = 1.0 - sqrt_r1;
                        let v = r2 * sqrt_r1;
                        let w0 = 1.0 - u - v;
                        let origin = p0 * u + p1 * v + p2 * w0;

                        if let Some((hit, w)) =
                            raycast_approx(ray_radius, |r| index.raycast(origin, no, r, max_dist))
                        {
                            weights[index.tri_poly(hit.index) as usize] += w;
                            totweights += w;
                            hitdist_accum += hit.distance;
                        }
                    }
                }

                if totweights > 0.0 {
                    let sources = weights
                        .iter()
                        .enumerate()
                        .filter(|(_, &w)| w > 0.0)
                        .map(|(j, &w)| (j as u32, w / totweights));
                    map.set(i, hitdist_accum / totweights, 0, sources);
                }
            }
        }
        PolyMode::Topology => unreachable!(),
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{make_grid_quads, make_quad, Mesh};
    use glam::Mat4;

    fn assert_weights_normalized(map: &MeshMapping) {
        for item in &map.items {
            if item.has_sources() {
                let total: f32 = item.sources.iter().map(|&(_, w)| w).sum();
                assert!((total - 1.0).abs() < 1.0e-4, "weights sum to {total}");
                assert!(item.sources.iter().all(|&(_, w)| w > 0.0));
            } else {
                assert!(item.hit_distance.is_infinite());
            }
        }
    }

    fn translated(mesh: &Mesh, offset: [f32; 3]) -> Mesh {
        let mut out = mesh.clone();
        out.transform(Mat4::from_translation(Vec3::from(offset)));
        out
    }

    #[test]
    fn topology_is_identity() {
        let dst = make_quad(1.0);
        let src = make_quad(2.0);
        let map = verts_compute(VertMode::Topology, None, f32::MAX, 0.0, &dst, &src);
        for (i, item) in map.items.iter().enumerate() {
            assert_eq!(item.sources, vec![(i as u32, 1.0)]);
        }
    }

    #[test]
    fn topology_count_mismatch_is_all_invalid() {
        let dst = make_quad(1.0);
        let src = make_grid_quads([2.0, 2.0], [2, 2]);
        let map = verts_compute(VertMode::Topology, None, f32::MAX, 0.0, &dst, &src);
        assert_eq!(map.len(), 4);
        assert!(map.items.iter().all(|item| !item.has_sources()));
    }

    #[test]
    fn vert_nearest_maps_to_matching_verts() {
        let src = make_quad(2.0);
        let dst = translated(&make_quad(2.0), [0.05, 0.0, 0.1]);
        let map = verts_compute(VertMode::Nearest, None, f32::MAX, 0.0, &dst, &src);
        for (i, item) in map.items.iter().enumerate() {
            assert_eq!(item.sources, vec![(i as u32, 1.0)]);
        }
        assert_weights_normalized(&map);
    }

    #[test]
    fn vert_edge_interp_midpoint_is_half_half() {
        let src = make_quad(2.0);
        // Midpoint of the bottom edge of the quad.
        let dst = Mesh::from_polygons(
            vec![[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            &[vec![0, 1, 2]],
        );
        let map = verts_compute(VertMode::EdgeInterp, None, f32::MAX, 0.0, &dst, &src);
        let item = &map.items[0];
        assert_eq!(item.sources.len(), 2);
        for &(_, w) in &item.sources {
            assert!((w - 0.5).abs() < 1.0e-5);
        }
    }

    #[test]
    fn vert_poly_interp_quad_center_is_quarters() {
        let src = make_quad(2.0);
        let dst = Mesh::from_polygons(
            vec![[0.0, 0.0, 0.0], [0.1, 0.0, 0.0], [0.0, 0.1, 0.0]],
            &[vec![0, 1, 2]],
        );
        let map = verts_compute(VertMode::PolyInterp, None, f32::MAX, 0.0, &dst, &src);
        let item = &map.items[0];
        assert_eq!(item.sources.len(), 4);
        for &(_, w) in &item.sources {
            assert!((w - 0.25).abs() < 1.0e-4);
        }
        assert_weights_normalized(&map);
    }

    #[test]
    fn max_dist_cutoff_gives_no_source() {
        let src = make_quad(1.0);
        let dst = translated(&make_quad(1.0), [100.0, 0.0, 0.0]);
        let map = verts_compute(VertMode::Nearest, None, 1.0, 0.0, &dst, &src);
        for item in &map.items {
            assert!(!item.has_sources());
            assert!(item.hit_distance.is_infinite());
        }
    }

    #[test]
    fn vert_norproj_projects_onto_source() {
        let src = translated(&make_quad(4.0), [0.0, 0.0, 1.0]);
        let dst = make_quad(1.0);
        let map = verts_compute(VertMode::PolyInterpNorProj, None, 10.0, 0.0, &dst, &src);
        for item in &map.items {
            assert!(item.has_sources());
            assert!((item.hit_distance - 1.0).abs() < 1.0e-4);
        }
        assert_weights_normalized(&map);
    }

    #[test]
    fn edge_nearest_finds_matching_edge() {
        let src = make_quad(2.0);
        let dst = translated(&make_quad(2.0), [0.0, 0.0, 0.05]);
        let map = edges_compute(EdgeMode::Nearest, None, f32::MAX, 0.0, &dst, &src);
        for (i, item) in map.items.iter().enumerate() {
            assert_eq!(item.sources, vec![(i as u32, 1.0)]);
        }
    }

    #[test]
    fn edge_vert_nearest_matches_identical_edges() {
        let src = make_grid_quads([2.0, 2.0], [2, 2]);
        let dst = translated(&src, [0.02, 0.0, 0.0]);
        let map = edges_compute(EdgeMode::VertNearest, None, f32::MAX, 0.0, &dst, &src);
        for (i, item) in map.items.iter().enumerate() {
            assert_eq!(item.sources, vec![(i as u32, 1.0)], "edge {i}");
            assert!(item.hit_distance < 0.1);
        }
    }

    #[test]
    fn edge_norproj_samples_hit_source_edges() {
        let src = translated(&make_quad(2.0), [0.0, 0.0, 1.0]);
        let dst = make_quad(2.0);
        let map = edges_compute(EdgeMode::InterpNorProj, None, 10.0, 0.05, &dst, &src);
        for item in &map.items {
            assert!(item.has_sources());
        }
        assert_weights_normalized(&map);
    }

    #[test]
    fn edge_norproj_misses_without_enough_hits() {
        let src = translated(&make_quad(0.1), [50.0, 0.0, 1.0]);
        let dst = make_quad(2.0);
        let map = edges_compute(EdgeMode::InterpNorProj, None, 10.0, 0.05, &dst, &src);
        for item in &map.items {
            assert!(!item.has_sources());
        }
    }

    #[test]
    fn loop_poly_interp_covers_corners() {
        let src = make_quad(2.0);
        let dst = translated(&make_quad(2.0), [0.0, 0.0, 0.1]);
        let map = loops_compute(
            LoopMode::PolyInterpNearest,
            None,
            f32::MAX,
            0.0,
            &dst,
            180.0,
            &src,
            false,
        );
        assert_eq!(map.len(), 4);
        for item in &map.items {
            assert!(item.has_sources());
            assert_eq!(item.island, 0);
            for &(idx, _) in &item.sources {
                assert!(idx < src.loops.len() as u32);
            }
        }
        assert_weights_normalized(&map);
    }

    #[test]
    fn loop_islands_reach_consensus_per_poly() {
        // Two far-apart source quads form two islands; a destination quad
        // sitting on the second one must commit all corners to island 1.
        let quad_a = make_quad(2.0);
        let quad_b = translated(&make_quad(2.0), [10.0, 0.0, 0.0]);
        let mut positions = quad_a.positions.clone();
        positions.extend_from_slice(&quad_b.positions);
        let src = Mesh::from_polygons(positions, &[vec![0, 1, 2, 3], vec![4, 5, 6, 7]]);

        let dst = translated(&make_quad(2.0), [10.1, 0.0, 0.0]);
        let map = loops_compute(
            LoopMode::PolyInterpNearest,
            None,
            f32::MAX,
            0.0,
            &dst,
            180.0,
            &src,
            true,
        );
        for item in &map.items {
            assert_eq!(item.island, 1);
            assert!(item.has_sources());
            for &(idx, _) in &item.sources {
                // Corners 4..8 belong to the second source poly.
                assert!((4..8).contains(&idx));
            }
        }
    }

    #[test]
    fn loop_consensus_overrides_disagreeing_corners() {
        // Two source islands split by a seam. The destination quad straddles
        // the seam, so its left corners individually favor island 0 and its
        // right corners island 1; the better mean factor has to win for the
        // whole polygon.
        let mut src = make_grid_quads([4.0, 2.0], [2, 1]);
        let shared = crate::connectivity::edge_poly_map(&src);
        for e in 0..src.edges.len() {
            if shared.get(e).len() == 2 {
                src.edges[e].seam = true;
            }
        }

        // Biased toward the right-hand island, and lifted off the surface so
        // no corner factor degenerates to the zero-distance sentinel.
        let dst = translated(&make_quad(2.0), [0.5, 0.0, 0.1]);
        let map = loops_compute(
            LoopMode::PolyInterpNearest,
            None,
            f32::MAX,
            0.0,
            &dst,
            180.0,
            &src,
            true,
        );
        for item in &map.items {
            assert_eq!(item.island, 1);
            assert!(item.has_sources());
            for &(idx, _) in &item.sources {
                // Corners 4..8 belong to the right-hand source poly.
                assert!((4..8).contains(&idx));
            }
        }
    }

    #[test]
    fn edge_max_dist_cutoff_gives_no_source() {
        let src = make_quad(1.0);
        let dst = translated(&make_quad(1.0), [100.0, 0.0, 0.0]);
        let map = edges_compute(EdgeMode::Nearest, None, 1.0, 0.0, &dst, &src);
        for item in &map.items {
            assert!(!item.has_sources());
            assert!(item.hit_distance.is_infinite());
        }
    }

    #[test]
    fn loop_nearest_loop_normal_picks_a_corner() {
        let src = make_quad(2.0);
        let dst = translated(&make_quad(2.0), [0.05, 0.0, 0.0]);
        let map = loops_compute(
            LoopMode::NearestLoopNormal,
            None,
            f32::MAX,
            0.0,
            &dst,
            180.0,
            &src,
            false,
        );
        for item in &map.items {
            assert_eq!(item.sources.len(), 1);
            assert_eq!(item.sources[0].1, 1.0);
        }
    }

    #[test]
    fn poly_nearest_matches_closest_poly() {
        let src = make_grid_quads([2.0, 2.0], [2, 1]);
        let dst = translated(&src, [0.0, 0.0, 0.2]);
        let map = polys_compute(PolyMode::Nearest, None, f32::MAX, 0.0, &dst, &src);
        for (i, item) in map.items.iter().enumerate() {
            assert_eq!(item.sources, vec![(i as u32, 1.0)]);
        }
    }

    #[test]
    fn poly_norproj_full_overlap_is_single_source() {
        let src = translated(&make_quad(2.0), [0.0, 0.0, 1.0]);
        let dst = make_quad(2.0);
        let map = polys_compute(PolyMode::InterpNorProj, None, 10.0, 0.0, &dst, &src);
        let item = &map.items[0];
        assert_eq!(item.sources, vec![(0, 1.0)]);
        assert!((item.hit_distance - 1.0).abs() < 1.0e-4);
    }

    #[test]
    fn poly_norproj_split_overlap_weights_by_area() {
        // Source is two side-by-side quads; the destination quad straddles
        // both, so both should receive close to half the weight.
        let src = translated(&make_grid_quads([4.0, 2.0], [2, 1]), [0.0, 0.0, 1.0]);
        let dst = make_quad(2.0);
        let map = polys_compute(PolyMode::InterpNorProj, None, 10.0, 0.0, &dst, &src);
        let item = &map.items[0];
        assert_eq!(item.sources.len(), 2);
        for &(_, w) in &item.sources {
            assert!(w > 0.3 && w < 0.7, "weight {w} not near half");
        }
        assert_weights_normalized(&map);
    }

    #[test]
    fn mapping_is_deterministic() {
        let src = translated(&make_grid_quads([4.0, 2.0], [2, 1]), [0.0, 0.0, 1.0]);
        let dst = make_quad(2.0);
        let a = polys_compute(PolyMode::InterpNorProj, None, 10.0, 0.1, &dst, &src);
        let b = polys_compute(PolyMode::InterpNorProj, None, 10.0, 0.1, &dst, &src);
        assert_eq!(a.items, b.items);
    }

    #[test]
    fn space_transform_aligns_objects() {
        // The destination object sits 5 units away in world space, right on
        // top of the source geometry, so after the transform verts coincide.
        let src = translated(&make_quad(2.0), [5.0, 0.0, 0.0]);
        let dst = make_quad(2.0);
        let dst_to_world = Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0));
        let xf = SpaceTransform::from_objects(dst_to_world, Mat4::IDENTITY);
        let map = verts_compute(VertMode::Nearest, Some(&xf), 0.1, 0.0, &dst, &src);
        for (i, item) in map.items.iter().enumerate() {
            assert_eq!(item.sources, vec![(i as u32, 1.0)]);
        }
    }
}
