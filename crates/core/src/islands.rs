use tracing::warn;

use crate::connectivity::edge_poly_map;
use crate::mesh::{Edge, Loop, Mesh, Poly};

/// Decides whether an edge separates two islands. Receives the polygon being
/// flooded, the corner crossing the edge, the edge itself, and how many
/// polygons use the edge.
pub trait BoundaryCheck {
    fn is_boundary(&self, poly: &Poly, corner: &Loop, edge: &Edge, edge_users: usize) -> bool;
}

impl<F> BoundaryCheck for F
where
    F: Fn(&Poly, &Loop, &Edge, usize) -> bool,
{
    fn is_boundary(&self, poly: &Poly, corner: &Loop, edge: &Edge, edge_users: usize) -> bool {
        self(poly, corner, edge, edge_users)
    }
}

// Placeholder id while a bitflag group is being flooded, and the sentinel for
// groups that exhausted all 32 bits. Neither collides with a real id.
const TEMP_GROUP_ID: i32 = 3;
const GROUP_ID_OVERFLOWED: i32 = 5;

/// Partitions polygons into islands by flood fill over edge-shared adjacency,
/// stopping at boundary edges. Ids are sequential from 1, or power-of-two
/// bitflags chosen to differ from any group met across a boundary edge.
/// Returns one id per polygon and the group count; `(None, 0)` for an empty
/// mesh.
pub fn poly_islands(
    mesh: &Mesh,
    use_bitflags: bool,
    boundary: &dyn BoundaryCheck,
) -> (Option<Vec<i32>>, i32) {
    if mesh.polys.is_empty() {
        return (None, 0);
    }

    let edge_polys = edge_poly_map(mesh);
    let total = mesh.polys.len();
    let mut poly_groups = vec![0i32; total];
    let mut stack: Vec<usize> = Vec::with_capacity(total);

    let mut poly_prev = 0usize;
    let mut tot_group: i32 = 0;
    let mut group_id_overflow = false;

    loop {
        let Some(seed) = (poly_prev..total).find(|&p| poly_groups[p] == 0) else {
            break;
        };
        poly_prev = seed + 1;

        let mut group_id = if use_bitflags {
            TEMP_GROUP_ID
        } else {
            tot_group += 1;
            tot_group
        };
        let mut bit_group_mask: i32 = 0;

        stack.clear();
        poly_groups[seed] = group_id;
        stack.push(seed);

        let mut cursor = 0;
        while cursor < stack.len() {
            let poly_index = stack[cursor];
            cursor += 1;

            let poly = mesh.polys[poly_index];
            for loop_index in poly.loop_range() {
                let corner = &mesh.loops[loop_index];
                let edge = &mesh.edges[corner.edge as usize];
                let users = edge_polys.get(corner.edge as usize);
                if !boundary.is_boundary(&poly, corner, edge, users.len()) {
                    for &p in users {
                        let p = p as usize;
                        if poly_groups[p] == 0 {
                            poly_groups[p] = group_id;
                            stack.push(p);
                        }
                    }
                } else if use_bitflags {
                    // Groups met across a boundary edge claim their bits.
                    for &p in users {
                        let bit = poly_groups[p as usize];
                        if bit != 0
                            && bit != group_id
                            && bit != GROUP_ID_OVERFLOWED
                            && (bit_group_mask & bit) == 0
                        {
                            bit_group_mask |= bit;
                        }
                    }
                }
            }
        }

        if use_bitflags {
            let mut gid_bit = 0;
            group_id = 1;
            while (group_id & bit_group_mask) != 0 && gid_bit < 32 {
                group_id = group_id.wrapping_shl(1);
                gid_bit += 1;
            }
            if gid_bit > 31 {
                warn!("no free bit for polygon group, polygons marked as ungrouped");
                group_id = GROUP_ID_OVERFLOWED;
                group_id_overflow = true;
            }
            if gid_bit > tot_group {
                tot_group = gid_bit;
            }
            for &p in &stack {
                poly_groups[p] = group_id;
            }
        }
    }

    if use_bitflags {
        tot_group += 1;
    }

    if group_id_overflow {
        for gid in poly_groups.iter_mut() {
            if *gid == GROUP_ID_OVERFLOWED {
                *gid = 0;
            }
        }
        tot_group += 1;
    }

    (Some(poly_groups), tot_group)
}

/// Smooth groups from sharp edges. An edge is a boundary when its polygon is
/// flat-shaded, the edge is sharp, or the edge is not shared by exactly two
/// polygons.
pub fn smooth_groups(mesh: &Mesh, use_bitflags: bool) -> (Option<Vec<i32>>, i32) {
    poly_islands(
        mesh,
        use_bitflags,
        &|poly: &Poly, _corner: &Loop, edge: &Edge, edge_users: usize| {
            !poly.smooth || edge.sharp || edge_users != 2
        },
    )
}

#[derive(Debug, Clone, Default)]
pub struct Island {
    pub polys: Vec<u32>,
    pub loops: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct MeshIslands {
    pub loop_to_island: Vec<u32>,
    pub islands: Vec<Island>,
}

impl MeshIslands {
    pub fn count(&self) -> usize {
        self.islands.len()
    }
}

/// Islands split at UV seams, bucketing polygons and their corners per
/// island. Returns `None` for an empty mesh.
pub fn uv_islands(mesh: &Mesh) -> Option<MeshIslands> {
    let (poly_groups, num_groups) = poly_islands(
        mesh,
        false,
        &|_poly: &Poly, _corner: &Loop, edge: &Edge, _edge_users: usize| edge.seam,
    );
    let poly_groups = poly_groups?;

    let mut result = MeshIslands {
        loop_to_island: vec![0; mesh.loops.len()],
        islands: Vec::with_capacity(num_groups as usize),
    };

    for group in 1..=num_groups {
        let mut island = Island::default();
        for (poly_index, poly) in mesh.polys.iter().enumerate() {
            if poly_groups[poly_index] != group {
                continue;
            }
            island.polys.push(poly_index as u32);
            for loop_index in poly.loop_range() {
                result.loop_to_island[loop_index] = result.islands.len() as u32;
                island.loops.push(loop_index as u32);
            }
        }
        result.islands.push(island);
    }

    Some(result)
}
