use std::collections::HashSet;
use std::sync::Arc;

use meshi_landscape::render::geometry::cache::SharedBuffersCache;
use meshi_landscape::render::geometry::{IndexData, SharedBuffers, SharedBuffersInfo, VertexFactoryKind};
use meshi_landscape::{FeatureTier, HeadlessBackend, LandscapeError};

fn build(info: SharedBuffersInfo) -> (HeadlessBackend, SharedBuffers) {
    let mut backend = HeadlessBackend::new();
    let buffers = SharedBuffers::new(info, &mut backend).unwrap();
    (backend, buffers)
}

#[test]
fn refcount_frees_exactly_at_zero() {
    let mut backend = HeadlessBackend::new();
    let mut cache = SharedBuffersCache::new();
    let small = SharedBuffersInfo {
        subsection_size_quads: 15,
        ..Default::default()
    };
    let split = SharedBuffersInfo {
        subsection_size_quads: 15,
        num_subsections: 2,
        ..Default::default()
    };

    let a = cache.acquire(&small, &mut backend).unwrap();
    let b = cache.acquire(&small, &mut backend).unwrap();
    let c = cache.acquire(&split, &mut backend).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.ref_count(small.key()), 2);

    assert!(!cache.release(small.key(), &mut backend));
    assert!(cache.contains(small.key()));
    assert!(cache.release(small.key(), &mut backend));
    assert!(!cache.contains(small.key()));
    assert!(cache.contains(split.key()));

    assert!(cache.release(split.key(), &mut backend));
    assert_eq!(backend.live_buffers(), 0);
}

#[test]
fn invalid_shape_is_not_cached() {
    let mut backend = HeadlessBackend::new();
    let mut cache = SharedBuffersCache::new();
    let err = cache
        .acquire(
            &SharedBuffersInfo {
                subsection_size_quads: 300,
                ..Default::default()
            },
            &mut backend,
        )
        .unwrap_err();
    match err {
        LandscapeError::InvalidSubsectionSize { quads: 300 } => {}
        other => panic!("expected subsection size error, got {:?}", other),
    }
    assert!(cache.is_empty());
}

#[test]
fn grid_lods_halve_resolution() {
    let (_backend, buffers) = build(SharedBuffersInfo::default());
    assert_eq!(buffers.num_vertices(), 64 * 64);
    assert_eq!(buffers.num_index_buffers(), 6);
    assert!(!buffers.uses_32bit_indices());

    for lod in 0..6u32 {
        let quads = (64 >> lod) - 1;
        let indices = buffers.lod_indices(lod as usize).unwrap();
        assert_eq!(indices.len() as u32, quads * quads * 6);
        assert!(matches!(indices, IndexData::U16(_)));
    }

    let lod0 = buffers.index_range(0).unwrap();
    assert_eq!(lod0.min_index_full, 0);
    assert_eq!(lod0.max_index_full, 64 * 64 - 1);
    let lod1 = buffers.index_range(1).unwrap();
    assert_eq!(lod1.max_index_full, 31 + 31 * 64);
}

#[test]
fn subsection_ranges_are_disjoint() {
    let (_backend, buffers) = build(SharedBuffersInfo {
        subsection_size_quads: 7,
        num_subsections: 2,
        ..Default::default()
    });
    let range = buffers.index_range(0).unwrap();
    assert_eq!(range.min_index[0][0], 0);
    assert_eq!(range.max_index[0][0], 63);
    assert_eq!(range.min_index[1][0], 64);
    assert_eq!(range.min_index[0][1], 128);
    assert_eq!(range.max_index[1][1], 255);
    assert_eq!(range.max_index_full, 255);
}

#[test]
fn large_components_switch_to_32bit_indices() {
    let (backend, buffers) = build(SharedBuffersInfo {
        subsection_size_quads: 255,
        num_subsections: 2,
        ..Default::default()
    });
    assert_eq!(buffers.num_vertices(), 262_144);
    assert!(buffers.uses_32bit_indices());
    let lod0 = buffers.lod_indices(0).unwrap();
    assert!(lod0.is_32bit());
    assert_eq!(backend.stride(buffers.index_buffer(0).unwrap()), Some(4));

    let (_, just_over_16bit) = build(SharedBuffersInfo {
        subsection_size_quads: 127,
        num_subsections: 2,
        ..Default::default()
    });
    assert_eq!(just_over_16bit.num_vertices(), 65_536);
    assert!(just_over_16bit.uses_32bit_indices());

    let (_, small) = build(SharedBuffersInfo {
        subsection_size_quads: 127,
        num_subsections: 1,
        ..Default::default()
    });
    assert!(!small.uses_32bit_indices());
}

#[test]
fn grass_indices_cover_every_mip() {
    let (_backend, buffers) = build(SharedBuffersInfo {
        subsection_size_quads: 63,
        num_subsections: 2,
        ..Default::default()
    });
    let grass = buffers.grass_indices().unwrap();
    assert_eq!(grass.len(), 4 * (64 * 64 * 4 / 3 - 1));

    let offsets = buffers.grass_mip_offsets();
    assert_eq!(offsets.len(), 6);
    assert_eq!(offsets[0], 0);
    assert_eq!(offsets[1], 4 * 64 * 64);
    assert_eq!(offsets[2], 4 * (64 * 64 + 32 * 32));
}

#[test]
fn occluder_covers_every_lod0_quad() {
    let (_backend, buffers) = build(SharedBuffersInfo {
        num_occluder_vertices: 64 * 64,
        ..Default::default()
    });
    let occluder = buffers.occluder_indices().unwrap();
    assert_eq!(occluder.len(), 63 * 63 * 6);

    let covered: HashSet<u16> = occluder.chunks(6).map(|quad| quad[0]).collect();
    for y in 0..63u16 {
        for x in 0..63u16 {
            assert!(covered.contains(&(x + y * 64)));
        }
    }
    assert_eq!(&occluder[..6], &[0, 64, 65, 0, 65, 1]);
}

#[test]
fn occluder_size_separates_cache_entries() {
    let mut backend = HeadlessBackend::new();
    let mut cache = SharedBuffersCache::new();
    let plain = SharedBuffersInfo::default();
    let occluded = SharedBuffersInfo {
        num_occluder_vertices: 64 * 64,
        ..Default::default()
    };
    assert_ne!(plain.key(), occluded.key());

    let a = cache.acquire(&plain, &mut backend).unwrap();
    let b = cache.acquire(&occluded, &mut backend).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len(), 2);
    assert!(a.occluder_indices().is_none());
    assert_eq!(b.occluder_indices().unwrap().len(), 63 * 63 * 6);
}

#[test]
fn adjacency_is_built_on_demand() {
    let mut backend = HeadlessBackend::new();
    let buffers = SharedBuffers::new(SharedBuffersInfo::default(), &mut backend).unwrap();
    assert!(buffers.adjacency().is_none());

    let created = backend.created();
    let adjacency = buffers.ensure_adjacency(&mut backend);
    assert_eq!(adjacency.buffers.len(), 6);
    assert_eq!(
        adjacency.indices[0].len(),
        buffers.lod_indices(0).unwrap().len() * 4
    );
    assert_eq!(backend.created(), created + 6);

    buffers.ensure_adjacency(&mut backend);
    assert_eq!(backend.created(), created + 6);
}

#[test]
fn mobile_lods_share_one_vertex_set() {
    let (_backend, buffers) = build(SharedBuffersInfo {
        subsection_size_quads: 31,
        feature_tier: FeatureTier::Mobile,
        ..Default::default()
    });
    assert_eq!(buffers.vertices().len(), 32 * 32);
    assert!(buffers.grass_indices().is_none());

    for lod in 0..buffers.num_index_buffers() as usize {
        let indices = buffers.lod_indices(lod).unwrap().to_u32_vec();
        assert!(indices.iter().all(|&index| index < buffers.num_vertices()));
    }

    // The coarsest LOD is built first and owns the vertex buffer's prefix.
    let coarsest = buffers.num_index_buffers() as usize - 1;
    let indices = buffers.lod_indices(coarsest).unwrap().to_u32_vec();
    assert!(indices.iter().all(|&index| index < 4));
    let corners: Vec<(u8, u8)> = buffers.vertices()[..4]
        .iter()
        .map(|vertex| (vertex.x, vertex.y))
        .collect();
    assert!(corners.contains(&(0, 0)));
    assert!(corners.contains(&(31, 31)));
}

#[test]
fn xy_offset_picks_vertex_factory() {
    let (_, plain) = build(SharedBuffersInfo::default());
    let (_, offset) = build(SharedBuffersInfo {
        has_xy_offset: true,
        ..Default::default()
    });
    assert_eq!(plain.vertex_factory(), VertexFactoryKind::Standard);
    assert_eq!(offset.vertex_factory(), VertexFactoryKind::XyOffset);
    assert_ne!(plain.key(), offset.key());
}
