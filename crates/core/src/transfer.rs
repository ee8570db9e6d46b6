use std::sync::atomic::{AtomicBool, Ordering};

use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeDomain, AttributeError, AttributeRef, AttributeStorage};
use crate::mesh::Mesh;
use crate::parallel;
use crate::remap::{
    edges_compute, loops_compute, polys_compute, verts_compute, EdgeMode, LoopMode, MappingItem,
    MeshMapping, PolyMode, VertMode,
};
use crate::spatial::SpaceTransform;

/// How an incoming value is blended with the value already stored on the
/// destination. The threshold modes replace only where the existing value is
/// above (or below) the mix factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MixMode {
    Transfer,
    Add,
    Sub,
    Mul,
    AboveThreshold,
    BelowThreshold,
}

fn mix_value(mode: MixMode, factor: f32, old: f32, new: f32) -> f32 {
    match mode {
        MixMode::Transfer => old + (new - old) * factor,
        MixMode::Add => old + new * factor,
        MixMode::Sub => old - new * factor,
        MixMode::Mul => old + (old * new - old) * factor,
        MixMode::AboveThreshold => {
            if old >= factor {
                new
            } else {
                old
            }
        }
        MixMode::BelowThreshold => {
            if old <= factor {
                new
            } else {
                old
            }
        }
    }
}

fn weighted_scalar(item: &MappingItem, src: &[f32]) -> f32 {
    item.sources
        .iter()
        .map(|&(idx, w)| src[idx as usize] * w)
        .sum()
}

fn weighted_array<const N: usize>(item: &MappingItem, src: &[[f32; N]]) -> [f32; N] {
    let mut out = [0.0f32; N];
    for &(idx, w) in &item.sources {
        let v = src[idx as usize];
        for (o, c) in out.iter_mut().zip(v) {
            *o += c * w;
        }
    }
    out
}

/// Discrete values cannot be blended, so copy from the strongest source.
fn highest_weight_index(item: &MappingItem) -> usize {
    let mut best = item.sources[0];
    for &source in &item.sources[1..] {
        if source.1 > best.1 {
            best = source;
        }
    }
    best.0 as usize
}

/// Applies a computed mapping to one attribute layer. Destination elements
/// whose mapping item has no sources keep their value. Returns whether any
/// element changed.
pub fn transfer_attribute(
    mapping: &MeshMapping,
    src: AttributeRef<'_>,
    dst: &mut AttributeStorage,
    mix_mode: MixMode,
    mix_factor: f32,
) -> Result<bool, AttributeError> {
    if dst.len() != mapping.len() {
        return Err(AttributeError::InvalidLength {
            expected: mapping.len(),
            actual: dst.len(),
        });
    }
    if dst.data_type() != src.data_type() {
        return Err(AttributeError::InvalidType {
            expected: dst.data_type(),
            actual: src.data_type(),
        });
    }

    let changed = AtomicBool::new(false);
    let mark = |did: bool| {
        if did {
            changed.store(true, Ordering::Relaxed);
        }
    };

    match (dst, src) {
        (AttributeStorage::Float(values), AttributeRef::Float(src)) => {
            parallel::for_each_indexed_mut(values, |i, value| {
                let item = &mapping.items[i];
                if !item.has_sources() {
                    return;
                }
                let mixed = mix_value(mix_mode, mix_factor, *value, weighted_scalar(item, src));
                mark(mixed != *value);
                *value = mixed;
            });
        }
        (AttributeStorage::Int(values), AttributeRef::Int(src)) => {
            parallel::for_each_indexed_mut(values, |i, value| {
                let item = &mapping.items[i];
                if !item.has_sources() {
                    return;
                }
                let new = src[highest_weight_index(item)];
                let mixed = mix_value(mix_mode, mix_factor, *value as f32, new as f32).round() as i32;
                mark(mixed != *value);
                *value = mixed;
            });
        }
        (AttributeStorage::Vec2(values), AttributeRef::Vec2(src)) => {
            parallel::for_each_indexed_mut(values, |i, value| {
                let item = &mapping.items[i];
                if !item.has_sources() {
                    return;
                }
                let new = weighted_array(item, src);
                let mut mixed = *value;
                for (m, n) in mixed.iter_mut().zip(new) {
                    *m = mix_value(mix_mode, mix_factor, *m, n);
                }
                mark(mixed != *value);
                *value = mixed;
            });
        }
        (AttributeStorage::Vec3(values), AttributeRef::Vec3(src)) => {
            parallel::for_each_indexed_mut(values, |i, value| {
                let item = &mapping.items[i];
                if !item.has_sources() {
                    return;
                }
                let new = weighted_array(item, src);
                let mut mixed = *value;
                for (m, n) in mixed.iter_mut().zip(new) {
                    *m = mix_value(mix_mode, mix_factor, *m, n);
                }
                mark(mixed != *value);
                *value = mixed;
            });
        }
        (AttributeStorage::Vec4(values), AttributeRef::Vec4(src)) => {
            parallel::for_each_indexed_mut(values, |i, value| {
                let item = &mapping.items[i];
                if !item.has_sources() {
                    return;
                }
                let new = weighted_array(item, src);
                let mut mixed = *value;
                for (m, n) in mixed.iter_mut().zip(new) {
                    *m = mix_value(mix_mode, mix_factor, *m, n);
                }
                mark(mixed != *value);
                *value = mixed;
            });
        }
        _ => unreachable!("data types checked above"),
    }

    Ok(changed.into_inner())
}

/// Everything needed to drive a mapping + transfer run, bundled so callers
/// can persist their setups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    pub domain: AttributeDomain,
    pub vert_mode: VertMode,
    pub edge_mode: EdgeMode,
    pub loop_mode: LoopMode,
    pub poly_mode: PolyMode,
    pub max_dist: f32,
    pub ray_radius: f32,
    pub split_angle: f32,
    pub use_islands: bool,
    pub use_object_transform: bool,
    pub mix_mode: MixMode,
    pub mix_factor: f32,
}

impl Default for TransferSettings {
    fn default() -> Self {
        TransferSettings {
            domain: AttributeDomain::Point,
            vert_mode: VertMode::Nearest,
            edge_mode: EdgeMode::Nearest,
            loop_mode: LoopMode::PolyInterpNearest,
            poly_mode: PolyMode::Nearest,
            max_dist: f32::MAX,
            ray_radius: 0.0,
            split_angle: 40.0,
            use_islands: false,
            use_object_transform: true,
            mix_mode: MixMode::Transfer,
            mix_factor: 1.0,
        }
    }
}

/// Computes the mapping for the settings' domain and transfers the named
/// attribute layer from `src` onto `dst`, creating the destination layer
/// when missing. Returns whether any element changed; "nothing changed" is a
/// valid outcome.
pub fn transfer_mesh_attribute(
    settings: &TransferSettings,
    src: &Mesh,
    src_to_world: Mat4,
    dst: &mut Mesh,
    dst_to_world: Mat4,
    name: &str,
) -> Result<bool, String> {
    let src_attr = src
        .attribute(settings.domain, name)
        .ok_or_else(|| format!("source mesh has no attribute '{name}' in that domain"))?;

    let space_transform = settings
        .use_object_transform
        .then(|| SpaceTransform::from_objects(dst_to_world, src_to_world));
    let xf = space_transform.as_ref();

    let mapping = match settings.domain {
        AttributeDomain::Point => verts_compute(
            settings.vert_mode,
            xf,
            settings.max_dist,
            settings.ray_radius,
            dst,
            src,
        ),
        AttributeDomain::Edge => edges_compute(
            settings.edge_mode,
            xf,
            settings.max_dist,
            settings.ray_radius,
            dst,
            src,
        ),
        AttributeDomain::Corner => loops_compute(
            settings.loop_mode,
            xf,
            settings.max_dist,
            settings.ray_radius,
            dst,
            settings.split_angle,
            src,
            settings.use_islands,
        ),
        AttributeDomain::Primitive => polys_compute(
            settings.poly_mode,
            xf,
            settings.max_dist,
            settings.ray_radius,
            dst,
            src,
        ),
        AttributeDomain::Detail => {
            return Err("detail attributes cannot be transferred by mapping".to_string());
        }
    };

    let mut storage = match dst.attribute(settings.domain, name) {
        Some(existing) => existing.to_storage(),
        None => AttributeStorage::filled(src_attr.data_type(), mapping.len()),
    };

    let changed = transfer_attribute(
        &mapping,
        src_attr,
        &mut storage,
        settings.mix_mode,
        settings.mix_factor,
    )
    .map_err(|err| format!("attribute transfer failed: {err:?}"))?;

    // Store through the mesh so implicit layers like "N" land in their
    // dedicated storage instead of shadowed generic-map entries.
    dst.set_attribute(settings.domain, name, storage)
        .map_err(|err| format!("storing attribute '{name}' failed: {err:?}"))?;

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::make_quad;
    use glam::Vec3;

    fn mapping_from(items: Vec<MappingItem>) -> MeshMapping {
        MeshMapping { items }
    }

    #[test]
    fn weighted_average_of_sources() {
        let mapping = mapping_from(vec![MappingItem {
            sources: vec![(0, 0.5), (1, 0.5)],
            hit_distance: 0.0,
            island: 0,
        }]);
        let src = [1.0f32, 3.0];
        let mut dst = AttributeStorage::Float(vec![0.0]);
        let changed = transfer_attribute(
            &mapping,
            AttributeRef::Float(&src),
            &mut dst,
            MixMode::Transfer,
            1.0,
        )
        .expect("transfer");
        assert!(changed);
        assert_eq!(dst, AttributeStorage::Float(vec![2.0]));
    }

    #[test]
    fn sourceless_items_leave_destination_untouched() {
        let mapping = mapping_from(vec![MappingItem::invalid(), MappingItem::invalid()]);
        let src = [9.0f32];
        let mut dst = AttributeStorage::Float(vec![5.0, 6.0]);
        let changed = transfer_attribute(
            &mapping,
            AttributeRef::Float(&src),
            &mut dst,
            MixMode::Transfer,
            1.0,
        )
        .expect("transfer");
        assert!(!changed);
        assert_eq!(dst, AttributeStorage::Float(vec![5.0, 6.0]));
    }

    #[test]
    fn int_copies_highest_weight_source() {
        let mapping = mapping_from(vec![MappingItem {
            sources: vec![(0, 0.3), (1, 0.7)],
            hit_distance: 0.0,
            island: 0,
        }]);
        let src = [10i32, 20];
        let mut dst = AttributeStorage::Int(vec![0]);
        transfer_attribute(
            &mapping,
            AttributeRef::Int(&src),
            &mut dst,
            MixMode::Transfer,
            1.0,
        )
        .expect("transfer");
        assert_eq!(dst, AttributeStorage::Int(vec![20]));
    }

    #[test]
    fn mix_factor_blends_with_existing_value() {
        let mapping = mapping_from(vec![MappingItem {
            sources: vec![(0, 1.0)],
            hit_distance: 0.0,
            island: 0,
        }]);
        let src = [10.0f32];
        let mut dst = AttributeStorage::Float(vec![0.0]);
        transfer_attribute(
            &mapping,
            AttributeRef::Float(&src),
            &mut dst,
            MixMode::Transfer,
            0.25,
        )
        .expect("transfer");
        assert_eq!(dst, AttributeStorage::Float(vec![2.5]));
    }

    #[test]
    fn add_and_threshold_modes() {
        let item = MappingItem {
            sources: vec![(0, 1.0)],
            hit_distance: 0.0,
            island: 0,
        };
        let mapping = mapping_from(vec![item.clone(), item]);
        let src = [2.0f32];

        let mut dst = AttributeStorage::Float(vec![1.0, 1.0]);
        transfer_attribute(
            &mapping,
            AttributeRef::Float(&src),
            &mut dst,
            MixMode::Add,
            1.0,
        )
        .expect("transfer");
        assert_eq!(dst, AttributeStorage::Float(vec![3.0, 3.0]));

        // Threshold 0.5: the first element is above and gets replaced, the
        // second is below and survives.
        let mut dst = AttributeStorage::Float(vec![0.9, 0.1]);
        transfer_attribute(
            &mapping,
            AttributeRef::Float(&src),
            &mut dst,
            MixMode::AboveThreshold,
            0.5,
        )
        .expect("transfer");
        assert_eq!(dst, AttributeStorage::Float(vec![2.0, 0.1]));
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let mapping = mapping_from(vec![MappingItem::invalid()]);
        let src = [0.0f32];
        let mut dst = AttributeStorage::Float(vec![0.0, 0.0]);
        let err = transfer_attribute(
            &mapping,
            AttributeRef::Float(&src),
            &mut dst,
            MixMode::Transfer,
            1.0,
        );
        assert_eq!(
            err,
            Err(AttributeError::InvalidLength {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn mesh_transfer_end_to_end() {
        let mut src = make_quad(2.0);
        src.set_attribute(
            AttributeDomain::Point,
            "mass",
            AttributeStorage::Float(vec![1.0, 2.0, 3.0, 4.0]),
        )
        .expect("set");

        let mut dst = make_quad(2.0);
        dst.transform(Mat4::from_translation(Vec3::new(0.01, 0.0, 0.0)));

        let settings = TransferSettings::default();
        let changed = transfer_mesh_attribute(
            &settings,
            &src,
            Mat4::IDENTITY,
            &mut dst,
            Mat4::IDENTITY,
            "mass",
        )
        .expect("transfer");
        assert!(changed);

        let got = dst
            .attribute(AttributeDomain::Point, "mass")
            .expect("attribute");
        assert_eq!(
            got,
            AttributeRef::Float(&[1.0, 2.0, 3.0, 4.0])
        );
    }

    #[test]
    fn mesh_transfer_normals_use_dedicated_storage() {
        let mut src = make_quad(2.0);
        src.compute_normals();

        let mut dst = make_quad(2.0);
        dst.transform(Mat4::from_translation(Vec3::new(0.01, 0.0, 0.0)));

        let settings = TransferSettings::default();
        let changed = transfer_mesh_attribute(
            &settings,
            &src,
            Mat4::IDENTITY,
            &mut dst,
            Mat4::IDENTITY,
            "N",
        )
        .expect("transfer");
        assert!(changed);

        // The implicit layer must be visible through the mesh, not shadowed
        // in the generic map.
        assert!(dst.normals.is_some());
        assert!(dst.attributes.get(AttributeDomain::Point, "N").is_none());
        let got = dst.attribute(AttributeDomain::Point, "N").expect("attribute");
        assert!(matches!(got, AttributeRef::Vec3(_)));
    }

    #[test]
    fn mesh_transfer_missing_source_layer_fails() {
        let src = make_quad(1.0);
        let mut dst = make_quad(1.0);
        let settings = TransferSettings::default();
        let result = transfer_mesh_attribute(
            &settings,
            &src,
            Mat4::IDENTITY,
            &mut dst,
            Mat4::IDENTITY,
            "missing",
        );
        assert!(result.is_err());
    }

    #[test]
    fn mesh_transfer_out_of_range_reports_unchanged() {
        let mut src = make_quad(1.0);
        src.set_attribute(
            AttributeDomain::Point,
            "mass",
            AttributeStorage::Float(vec![1.0; 4]),
        )
        .expect("set");

        let mut dst = make_quad(1.0);
        dst.transform(Mat4::from_translation(Vec3::new(100.0, 0.0, 0.0)));

        let settings = TransferSettings {
            max_dist: 1.0,
            use_object_transform: false,
            ..Default::default()
        };
        let changed = transfer_mesh_attribute(
            &settings,
            &src,
            Mat4::IDENTITY,
            &mut dst,
            Mat4::IDENTITY,
            "mass",
        )
        .expect("transfer");
        assert!(!changed);
    }
}
