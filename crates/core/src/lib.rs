mod attributes;
mod connectivity;
mod geom;
mod islands;
mod mesh;
mod parallel;
mod remap;
mod spatial;
mod transfer;

pub use attributes::{
    AttributeDomain, AttributeError, AttributeInfo, AttributeRef, AttributeStorage, AttributeType,
    MeshAttributes,
};
pub use connectivity::{
    edge_poly_map, origin_map, vert_edge_map, vert_loop_map, vert_poly_map, ElemMap,
};
pub use islands::{poly_islands, smooth_groups, uv_islands, BoundaryCheck, Island, MeshIslands};
pub use mesh::{
    make_box_quads, make_grid_quads, make_quad, Aabb, Edge, Loop, Mesh, Poly, Triangulation,
};
pub use remap::{
    edges_compute, loops_compute, polys_compute, verts_compute, EdgeMode, LoopMode, MappingItem,
    MeshMapping, PolyMode, VertMode,
};
pub use spatial::{
    EdgeIndex, Nearest, PointIndex, RayHit, SearchHint, SpaceTransform, TriIndex,
};
pub use transfer::{
    transfer_attribute, transfer_mesh_attribute, MixMode, TransferSettings,
};
