use crate::mesh::Mesh;

/// One-to-many index map stored as a single flat buffer with per-key
/// (offset, count) spans. The per-key slices tile the buffer exactly.
#[derive(Debug, Clone, Default)]
pub struct ElemMap {
    spans: Vec<(u32, u32)>,
    indices: Vec<u32>,
}

impl ElemMap {
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, key: usize) -> &[u32] {
        let (offset, count) = self.spans[key];
        &self.indices[offset as usize..(offset + count) as usize]
    }

    pub fn total_indices(&self) -> usize {
        self.indices.len()
    }

    /// Two passes over (key, value) pairs: count per key, then fill.
    fn build<F>(key_count: usize, mut visit: F) -> ElemMap
    where
        F: FnMut(&mut dyn FnMut(u32, u32)),
    {
        let mut counts = vec![0u32; key_count];
        visit(&mut |key, _value| {
            counts[key as usize] += 1;
        });

        let mut spans = Vec::with_capacity(key_count);
        let mut offset = 0u32;
        for &count in &counts {
            spans.push((offset, count));
            offset += count;
        }

        let mut cursors: Vec<u32> = spans.iter().map(|&(o, _)| o).collect();
        let mut indices = vec![0u32; offset as usize];
        visit(&mut |key, value| {
            let cursor = &mut cursors[key as usize];
            indices[*cursor as usize] = value;
            *cursor += 1;
        });

        ElemMap { spans, indices }
    }
}

pub fn vert_poly_map(mesh: &Mesh) -> ElemMap {
    ElemMap::build(mesh.positions.len(), |emit| {
        for (poly_index, poly) in mesh.polys.iter().enumerate() {
            for loop_index in poly.loop_range() {
                emit(mesh.loops[loop_index].vert, poly_index as u32);
            }
        }
    })
}

pub fn vert_loop_map(mesh: &Mesh) -> ElemMap {
    ElemMap::build(mesh.positions.len(), |emit| {
        for (loop_index, l) in mesh.loops.iter().enumerate() {
            emit(l.vert, loop_index as u32);
        }
    })
}

pub fn vert_edge_map(mesh: &Mesh) -> ElemMap {
    ElemMap::build(mesh.positions.len(), |emit| {
        for (edge_index, edge) in mesh.edges.iter().enumerate() {
            emit(edge.v1, edge_index as u32);
            emit(edge.v2, edge_index as u32);
        }
    })
}

pub fn edge_poly_map(mesh: &Mesh) -> ElemMap {
    ElemMap::build(mesh.edges.len(), |emit| {
        for (poly_index, poly) in mesh.polys.iter().enumerate() {
            for loop_index in poly.loop_range() {
                emit(mesh.loops[loop_index].edge, poly_index as u32);
            }
        }
    })
}

/// Groups final element indices by the origin element they came from,
/// e.g. triangles by owning polygon after triangulation.
pub fn origin_map(origin_count: usize, final_to_origin: &[u32]) -> ElemMap {
    ElemMap::build(origin_count, |emit| {
        for (final_index, &origin) in final_to_origin.iter().enumerate() {
            emit(origin, final_index as u32);
        }
    })
}
