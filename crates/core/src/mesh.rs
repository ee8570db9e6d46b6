use std::collections::HashMap;

use glam::{Mat4, Vec3};

use crate::attributes::{
    AttributeDomain, AttributeError, AttributeInfo, AttributeRef, AttributeStorage, AttributeType,
    MeshAttributes,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Edge {
    pub v1: u32,
    pub v2: u32,
    pub seam: bool,
    pub sharp: bool,
}

impl Edge {
    pub fn other_vert(&self, vert: u32) -> u32 {
        if vert == self.v1 {
            self.v2
        } else {
            self.v1
        }
    }
}

/// A face corner: the (vertex, edge-to-next-corner) pair local to one polygon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Loop {
    pub vert: u32,
    pub edge: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Poly {
    pub loop_start: u32,
    pub loop_total: u32,
    pub smooth: bool,
}

impl Poly {
    pub fn loop_range(&self) -> std::ops::Range<usize> {
        let start = self.loop_start as usize;
        start..start + self.loop_total as usize
    }
}

/// Fan triangulation of all polygons, with a back-mapping from each
/// triangle to the polygon it came from.
#[derive(Debug, Clone, Default)]
pub struct Triangulation {
    pub tris: Vec<[u32; 3]>,
    pub tri_polys: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    pub edges: Vec<Edge>,
    pub loops: Vec<Loop>,
    pub polys: Vec<Poly>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub corner_normals: Option<Vec<[f32; 3]>>,
    pub attributes: MeshAttributes,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mesh from positions and per-polygon vertex index lists.
    /// Edges are deduplicated across polygons; loop edge indices point at the
    /// edge from each corner's vertex to the next corner's vertex.
    pub fn from_polygons(positions: Vec<[f32; 3]>, polygons: &[Vec<u32>]) -> Self {
        let mut edges: Vec<Edge> = Vec::new();
        let mut edge_index: HashMap<(u32, u32), u32> = HashMap::new();
        let mut loops = Vec::new();
        let mut polys = Vec::with_capacity(polygons.len());

        for poly_verts in polygons {
            let loop_start = loops.len() as u32;
            let count = poly_verts.len();
            for (i, &vert) in poly_verts.iter().enumerate() {
                let next = poly_verts[(i + 1) % count];
                let key = if vert < next { (vert, next) } else { (next, vert) };
                let edge = *edge_index.entry(key).or_insert_with(|| {
                    edges.push(Edge {
                        v1: key.0,
                        v2: key.1,
                        seam: false,
                        sharp: false,
                    });
                    (edges.len() - 1) as u32
                });
                loops.push(Loop { vert, edge });
            }
            polys.push(Poly {
                loop_start,
                loop_total: count as u32,
                smooth: true,
            });
        }

        Mesh {
            positions,
            edges,
            loops,
            polys,
            normals: None,
            corner_normals: None,
            attributes: MeshAttributes::default(),
        }
    }

    pub fn attribute_domain_len(&self, domain: AttributeDomain) -> usize {
        match domain {
            AttributeDomain::Point => self.positions.len(),
            AttributeDomain::Edge => self.edges.len(),
            AttributeDomain::Corner => self.loops.len(),
            AttributeDomain::Primitive => self.polys.len(),
            AttributeDomain::Detail => 1,
        }
    }

    pub fn poly_loops(&self, poly_index: usize) -> &[Loop] {
        let poly = &self.polys[poly_index];
        &self.loops[poly.loop_range()]
    }

    pub fn list_attributes(&self) -> Vec<AttributeInfo> {
        let mut list = Vec::new();
        if !self.positions.is_empty() {
            list.push(AttributeInfo {
                name: "P".to_string(),
                domain: AttributeDomain::Point,
                data_type: AttributeType::Vec3,
                len: self.positions.len(),
            });
        }
        if let Some(normals) = &self.normals {
            list.push(AttributeInfo {
                name: "N".to_string(),
                domain: AttributeDomain::Point,
                data_type: AttributeType::Vec3,
                len: normals.len(),
            });
        }
        if let Some(normals) = &self.corner_normals {
            list.push(AttributeInfo {
                name: "N".to_string(),
                domain: AttributeDomain::Corner,
                data_type: AttributeType::Vec3,
                len: normals.len(),
            });
        }
        for domain in AttributeDomain::ALL {
            for (name, storage) in self.attributes.map(domain) {
                list.push(AttributeInfo {
                    name: name.clone(),
                    domain,
                    data_type: storage.data_type(),
                    len: storage.len(),
                });
            }
        }
        list
    }

    pub fn attribute(&self, domain: AttributeDomain, name: &str) -> Option<AttributeRef<'_>> {
        match (name, domain) {
            ("P", AttributeDomain::Point) => Some(AttributeRef::Vec3(self.positions.as_slice())),
            ("N", AttributeDomain::Point) => self
                .normals
                .as_ref()
                .map(|normals| AttributeRef::Vec3(normals.as_slice())),
            ("N", AttributeDomain::Corner) => self
                .corner_normals
                .as_ref()
                .map(|normals| AttributeRef::Vec3(normals.as_slice())),
            _ => self
                .attributes
                .get(domain, name)
                .map(AttributeStorage::as_ref),
        }
    }

    pub fn set_attribute(
        &mut self,
        domain: AttributeDomain,
        name: impl Into<String>,
        storage: AttributeStorage,
    ) -> Result<(), AttributeError> {
        let name = name.into();
        let expected_len = self.attribute_domain_len(domain);
        let actual_len = storage.len();
        if expected_len != 0 && actual_len != expected_len {
            return Err(AttributeError::InvalidLength {
                expected: expected_len,
                actual: actual_len,
            });
        }

        match (name.as_str(), domain) {
            ("P", AttributeDomain::Point) | ("N", AttributeDomain::Point)
            | ("N", AttributeDomain::Corner) => {
                if storage.data_type() != AttributeType::Vec3 {
                    return Err(AttributeError::InvalidType {
                        expected: AttributeType::Vec3,
                        actual: storage.data_type(),
                    });
                }
                if let AttributeStorage::Vec3(values) = storage {
                    match (name.as_str(), domain) {
                        ("P", _) => self.positions = values,
                        ("N", AttributeDomain::Point) => self.normals = Some(values),
                        _ => self.corner_normals = Some(values),
                    }
                    return Ok(());
                }
                return Err(AttributeError::InvalidDomain);
            }
            ("P", _) => return Err(AttributeError::InvalidDomain),
            _ => {}
        }

        self.attributes.map_mut(domain).insert(name, storage);
        Ok(())
    }

    pub fn remove_attribute(
        &mut self,
        domain: AttributeDomain,
        name: &str,
    ) -> Option<AttributeStorage> {
        match (name, domain) {
            ("P", AttributeDomain::Point) => None,
            ("N", AttributeDomain::Point) => {
                self.normals = None;
                None
            }
            ("N", AttributeDomain::Corner) => {
                self.corner_normals = None;
                None
            }
            _ => self.attributes.remove(domain, name),
        }
    }

    pub fn bounds(&self) -> Option<Aabb> {
        let mut iter = self.positions.iter();
        let first = iter.next()?;
        let mut min = *first;
        let mut max = *first;

        for p in iter {
            min[0] = min[0].min(p[0]);
            min[1] = min[1].min(p[1]);
            min[2] = min[2].min(p[2]);
            max[0] = max[0].max(p[0]);
            max[1] = max[1].max(p[1]);
            max[2] = max[2].max(p[2]);
        }

        Some(Aabb { min, max })
    }

    /// Vertex mean of the polygon's corners.
    pub fn poly_center(&self, poly_index: usize) -> Vec3 {
        let poly = &self.polys[poly_index];
        if poly.loop_total == 0 {
            return Vec3::ZERO;
        }
        let mut center = Vec3::ZERO;
        for l in self.poly_loops(poly_index) {
            center += Vec3::from(self.positions[l.vert as usize]);
        }
        center / poly.loop_total as f32
    }

    /// Newell normal, robust for non-planar n-gons.
    pub fn poly_normal(&self, poly_index: usize) -> Vec3 {
        let corners = self.poly_loops(poly_index);
        let mut n = Vec3::ZERO;
        for (i, l) in corners.iter().enumerate() {
            let next = &corners[(i + 1) % corners.len()];
            let a = Vec3::from(self.positions[l.vert as usize]);
            let b = Vec3::from(self.positions[next.vert as usize]);
            n.x += (a.y - b.y) * (a.z + b.z);
            n.y += (a.z - b.z) * (a.x + b.x);
            n.z += (a.x - b.x) * (a.y + b.y);
        }
        if n.length_squared() > 0.0 {
            n.normalize()
        } else {
            Vec3::Y
        }
    }

    pub fn compute_poly_normals(&self) -> Vec<Vec3> {
        (0..self.polys.len()).map(|i| self.poly_normal(i)).collect()
    }

    /// Area-weighted point normals, without storing them.
    pub fn point_normals(&self) -> Vec<[f32; 3]> {
        let mut accum = vec![Vec3::ZERO; self.positions.len()];
        for poly_index in 0..self.polys.len() {
            let normal = self.poly_normal(poly_index);
            for l in self.poly_loops(poly_index) {
                accum[l.vert as usize] += normal;
            }
        }

        accum
            .into_iter()
            .map(|n| {
                let len = n.length();
                if len > 0.0 {
                    (n / len).to_array()
                } else {
                    [0.0, 1.0, 0.0]
                }
            })
            .collect()
    }

    pub fn compute_normals(&mut self) -> bool {
        if self.positions.is_empty() {
            return false;
        }
        self.normals = Some(self.point_normals());
        true
    }

    /// Per-corner normals split at the given angle: a neighboring polygon's
    /// normal contributes to a corner only when it lies within the threshold
    /// of the owning polygon's normal.
    pub fn corner_normals_split(&self, split_angle_degrees: f32) -> Vec<[f32; 3]> {
        let threshold = split_angle_degrees.clamp(0.0, 180.0);
        let cos_threshold = threshold.to_radians().cos();
        let poly_normals = self.compute_poly_normals();

        let mut vert_polys: Vec<Vec<usize>> = vec![Vec::new(); self.positions.len()];
        for (poly_index, _) in self.polys.iter().enumerate() {
            for l in self.poly_loops(poly_index) {
                vert_polys[l.vert as usize].push(poly_index);
            }
        }

        let mut corner_normals = vec![[0.0f32, 1.0, 0.0]; self.loops.len()];
        for (poly_index, poly) in self.polys.iter().enumerate() {
            let own = poly_normals[poly_index];
            for loop_index in poly.loop_range() {
                let vert = self.loops[loop_index].vert as usize;
                let mut sum = Vec3::ZERO;
                for &adj in &vert_polys[vert] {
                    let candidate = poly_normals[adj];
                    if candidate.dot(own) >= cos_threshold {
                        sum += candidate;
                    }
                }
                let n = if sum.length_squared() > 0.0 {
                    sum.normalize()
                } else {
                    own
                };
                corner_normals[loop_index] = n.to_array();
            }
        }

        corner_normals
    }

    pub fn compute_corner_normals(&mut self, split_angle_degrees: f32) -> bool {
        if self.positions.is_empty() || self.loops.is_empty() {
            return false;
        }
        self.corner_normals = Some(self.corner_normals_split(split_angle_degrees));
        true
    }

    pub fn triangulate(&self) -> Triangulation {
        let mut out = Triangulation::default();
        for (poly_index, poly) in self.polys.iter().enumerate() {
            if poly.loop_total < 3 {
                continue;
            }
            let start = poly.loop_start as usize;
            let v0 = self.loops[start].vert;
            for i in 1..(poly.loop_total as usize - 1) {
                out.tris.push([
                    v0,
                    self.loops[start + i].vert,
                    self.loops[start + i + 1].vert,
                ]);
                out.tri_polys.push(poly_index as u32);
            }
        }
        out
    }

    pub fn transform(&mut self, matrix: Mat4) {
        for p in &mut self.positions {
            let v = matrix.transform_point3(Vec3::from(*p));
            *p = v.to_array();
        }

        let normal_matrix = matrix.inverse().transpose();
        for normals in [&mut self.normals, &mut self.corner_normals]
            .into_iter()
            .flatten()
        {
            for n in normals {
                let v = normal_matrix.transform_vector3(Vec3::from(*n));
                let len = v.length();
                *n = if len > 0.0 {
                    (v / len).to_array()
                } else {
                    [0.0, 1.0, 0.0]
                };
            }
        }
    }
}

pub fn make_quad(size: f32) -> Mesh {
    let h = size * 0.5;
    Mesh::from_polygons(
        vec![[-h, -h, 0.0], [h, -h, 0.0], [h, h, 0.0], [-h, h, 0.0]],
        &[vec![0, 1, 2, 3]],
    )
}

pub fn make_grid_quads(size: [f32; 2], divisions: [u32; 2]) -> Mesh {
    let width = size[0].max(0.0);
    let depth = size[1].max(0.0);
    let div_x = divisions[0].max(1);
    let div_y = divisions[1].max(1);

    let step_x = width / div_x as f32;
    let step_y = depth / div_y as f32;
    let origin_x = -width * 0.5;
    let origin_y = -depth * 0.5;

    let mut positions = Vec::new();
    for y in 0..=div_y {
        for x in 0..=div_x {
            positions.push([
                origin_x + x as f32 * step_x,
                origin_y + y as f32 * step_y,
                0.0,
            ]);
        }
    }

    let stride = div_x + 1;
    let mut polygons = Vec::new();
    for y in 0..div_y {
        for x in 0..div_x {
            let i0 = y * stride + x;
            let i1 = i0 + 1;
            let i2 = i1 + stride;
            let i3 = i0 + stride;
            polygons.push(vec![i0, i1, i2, i3]);
        }
    }

    Mesh::from_polygons(positions, &polygons)
}

pub fn make_box_quads(size: [f32; 3]) -> Mesh {
    let hx = size[0] * 0.5;
    let hy = size[1] * 0.5;
    let hz = size[2] * 0.5;

    let positions = vec![
        [-hx, -hy, -hz],
        [hx, -hy, -hz],
        [hx, hy, -hz],
        [-hx, hy, -hz],
        [-hx, -hy, hz],
        [hx, -hy, hz],
        [hx, hy, hz],
        [-hx, hy, hz],
    ];

    let polygons = vec![
        vec![0, 3, 2, 1],
        vec![4, 5, 6, 7],
        vec![0, 1, 5, 4],
        vec![2, 3, 7, 6],
        vec![1, 2, 6, 5],
        vec![3, 0, 4, 7],
    ];

    Mesh::from_polygons(positions, &polygons)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_has_shared_edges() {
        let mesh = make_quad(2.0);
        assert_eq!(mesh.positions.len(), 4);
        assert_eq!(mesh.edges.len(), 4);
        assert_eq!(mesh.loops.len(), 4);
        assert_eq!(mesh.polys.len(), 1);
    }

    #[test]
    fn grid_edges_are_deduplicated() {
        let mesh = make_grid_quads([2.0, 2.0], [2, 2]);
        assert_eq!(mesh.positions.len(), 9);
        assert_eq!(mesh.polys.len(), 4);
        assert_eq!(mesh.loops.len(), 16);
        // 2x2 quad grid has 12 unique edges.
        assert_eq!(mesh.edges.len(), 12);
    }

    #[test]
    fn box_edges_shared_between_faces() {
        let mesh = make_box_quads([2.0, 2.0, 2.0]);
        assert_eq!(mesh.edges.len(), 12);
        assert_eq!(mesh.loops.len(), 24);
    }

    #[test]
    fn quad_normal_points_up_z() {
        let mesh = make_quad(1.0);
        let n = mesh.poly_normal(0);
        assert!((n.z - 1.0).abs() < 1.0e-6);
    }

    #[test]
    fn poly_center_is_vertex_mean() {
        let mesh = make_quad(2.0);
        let center = mesh.poly_center(0);
        assert!(center.length() < 1.0e-6);
    }

    #[test]
    fn triangulate_fan_maps_back_to_polys() {
        let mesh = make_grid_quads([2.0, 2.0], [2, 1]);
        let tess = mesh.triangulate();
        assert_eq!(tess.tris.len(), 4);
        assert_eq!(tess.tri_polys, vec![0, 0, 1, 1]);
    }

    #[test]
    fn bounds_for_simple_points() {
        let mesh = Mesh::from_polygons(
            vec![[1.0, -2.0, 0.5], [-3.0, 4.0, 2.0], [0.0, 0.0, 0.0]],
            &[vec![0, 1, 2]],
        );
        let bounds = mesh.bounds().expect("bounds");
        assert_eq!(bounds.min, [-3.0, -2.0, 0.0]);
        assert_eq!(bounds.max, [1.0, 4.0, 2.0]);
    }

    #[test]
    fn set_attribute_validates_length() {
        let mut mesh = make_quad(1.0);
        let err = mesh.set_attribute(
            AttributeDomain::Point,
            "mass",
            AttributeStorage::Float(vec![1.0; 3]),
        );
        assert_eq!(
            err,
            Err(AttributeError::InvalidLength {
                expected: 4,
                actual: 3
            })
        );
        assert!(mesh
            .set_attribute(
                AttributeDomain::Point,
                "mass",
                AttributeStorage::Float(vec![1.0; 4])
            )
            .is_ok());
        assert!(mesh.attribute(AttributeDomain::Point, "mass").is_some());
    }
}
