use std::sync::Arc;

use glam::{IVec2, Mat4, Vec3, Vec4};
use meshi_landscape::render::arena::TilePool;
use meshi_landscape::render::geometry::SharedBuffers;
use meshi_landscape::render::lod::TileLodInfo;
use meshi_landscape::render::proxy::{PrimitiveType, TileBounds, TileDesc, TileMaterial, TileProxy};
use meshi_landscape::render::streaming::HeightmapTexture;
use meshi_landscape::{FeatureTier, HeadlessBackend, LandscapeConfig, ViewInfo};

fn make_proxy(desc: &TileDesc, config: &LandscapeConfig) -> (HeadlessBackend, TileProxy) {
    let mut backend = HeadlessBackend::new();
    let shared = Arc::new(SharedBuffers::new(desc.shared_buffers_info(config), &mut backend).unwrap());
    let mut pool = TilePool::new();
    let id = pool.insert(());
    let proxy = TileProxy::new(id, desc, shared.clone(), config);
    if proxy.requires_adjacency() {
        shared.ensure_adjacency(&mut backend);
    }
    (backend, proxy)
}

fn centered_desc() -> TileDesc {
    TileDesc {
        bounds: TileBounds {
            origin: Vec3::new(31.5, 31.5, 0.0),
            box_extent: Vec3::new(31.5, 31.5, 1.0),
            sphere_radius: 44.6,
        },
        ..Default::default()
    }
}

fn tessellated_desc() -> TileDesc {
    TileDesc {
        materials: vec![
            TileMaterial {
                name: "Displaced".to_string(),
                tessellation_enabled: true,
                disabled_tessellation_index: Some(1),
            },
            TileMaterial {
                name: "Flat".to_string(),
                ..Default::default()
            },
        ],
        ..centered_desc()
    }
}

#[test]
fn tessellation_is_dropped_for_small_lods() {
    let config = LandscapeConfig::default();
    let (_backend, proxy) = make_proxy(&tessellated_desc(), &config);
    let tessellation_size = proxy.tessellation().component_squared_screen_size;

    let lod0 = proxy.material_for_lod(0, false);
    assert_eq!(lod0.material_index, 0);
    assert!(lod0.uses_adjacency);

    for lod in 1..=proxy.lod().last_lod {
        assert!(proxy.lod().screen_ratio_squared[lod as usize] < tessellation_size);
        let choice = proxy.material_for_lod(lod, false);
        assert_eq!(choice.material_index, 1);
        assert!(!choice.uses_adjacency);
    }

    let tool = proxy.material_for_lod(0, true);
    assert_eq!(tool.material_index, 1);
}

#[test]
fn mobile_never_tessellates() {
    let config = LandscapeConfig {
        feature_tier: FeatureTier::Mobile,
        ..Default::default()
    };
    let (_backend, proxy) = make_proxy(&tessellated_desc(), &config);
    assert!(!proxy.requires_adjacency());
    let choice = proxy.material_for_lod(0, false);
    assert_eq!(choice.material_index, 0);
    assert!(!choice.uses_adjacency);
}

#[test]
fn static_batches_span_every_lod() {
    let config = LandscapeConfig::default();
    let (_backend, proxy) = make_proxy(&tessellated_desc(), &config);
    let batches = proxy.static_batches();
    assert_eq!(batches.len(), 6);

    let first = &batches[0];
    assert_eq!(first.lod_index, 0);
    assert_eq!(first.primitive, PrimitiveType::PatchList12);
    assert_eq!(first.num_primitives, 63 * 63 * 2);
    assert_eq!(first.screen_size, f32::MAX);
    assert_eq!(first.min_vertex_index, 0);
    assert_eq!(first.max_vertex_index, 64 * 64 - 1);

    let second = &batches[1];
    assert_eq!(second.primitive, PrimitiveType::TriangleList);
    assert_eq!(second.num_primitives, 31 * 31 * 2);
    assert!((second.screen_size - proxy.lod().screen_ratio_squared[1].sqrt() * 2.0).abs() < 1e-6);
    assert_eq!(
        Some(second.index_buffer),
        proxy.shared_buffers().index_buffer(1)
    );
    assert!(batches.iter().all(|batch| batch.first_index == 0));
}

#[test]
fn forced_lod_tile_has_one_batch() {
    let desc = TileDesc {
        lod: TileLodInfo {
            forced_lod: 2,
            ..Default::default()
        },
        ..centered_desc()
    };
    let (_backend, proxy) = make_proxy(&desc, &LandscapeConfig::default());
    let batches = proxy.static_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].lod_index, 2);
    assert_eq!(batches[0].screen_size, f32::MAX);
}

#[test]
fn grass_batches_point_at_mip_offsets() {
    let (_backend, proxy) = make_proxy(&centered_desc(), &LandscapeConfig::default());
    let batches = proxy.grass_batches();
    let offsets = proxy.shared_buffers().grass_mip_offsets();
    assert_eq!(batches.len(), offsets.len());
    for (mip, batch) in batches.iter().enumerate() {
        let verts = 64u32 >> mip;
        assert_eq!(batch.primitive, PrimitiveType::PointList);
        assert_eq!(batch.first_index, offsets[mip]);
        assert_eq!(batch.num_primitives, verts * verts);
        assert_eq!(batch.max_vertex_index, 64 * 64 - 1);
    }
}

#[test]
fn fixed_grid_params_per_mip() {
    let (_backend, proxy) = make_proxy(&centered_desc(), &LandscapeConfig::default());
    let params = proxy.fixed_grid_params();
    assert_eq!(params.len(), 6);
    assert_eq!(params[0], Vec4::new(0.0, 0.0, 63.0, 1.0 / 63.0));
    assert_eq!(params[5], Vec4::new(5.0, 0.0, 1.0, 1.0));
}

#[test]
fn uniform_params_describe_the_tile() {
    let desc = TileDesc {
        section_base: IVec2::new(63, 126),
        heightmap: Some(Arc::new(HeightmapTexture::new(128, 256, 8))),
        weightmap_subsection_offset: 0.25,
        ..centered_desc()
    };
    let (_backend, proxy) = make_proxy(&desc, &LandscapeConfig::default());
    let params = proxy.uniform_params();
    assert_eq!(params.component_base, IVec2::new(1, 2));
    assert_eq!(params.subsection_size_verts, 64);
    assert_eq!(params.num_subsections, 1);
    assert_eq!(params.last_lod, 5);
    assert_eq!(
        params.subsection_size_verts_layer_uv_pan,
        Vec4::new(64.0, 1.0 / 63.0, 63.0, 126.0)
    );
    assert_eq!(
        params.subsection_offset_params,
        Vec4::new(0.5, 0.25, 0.25, 63.0)
    );

    let mobile = LandscapeConfig {
        feature_tier: FeatureTier::Mobile,
        ..Default::default()
    };
    let (_backend, proxy) = make_proxy(&desc, &mobile);
    assert_eq!(proxy.uniform_params().subsection_offset_params.x, 0.0);
    assert_eq!(proxy.uniform_params().subsection_offset_params.y, 0.0);
}

#[test]
fn subsection_positions_follow_rotation() {
    let desc = TileDesc {
        subsection_size_quads: 31,
        num_subsections: 2,
        ..centered_desc()
    };
    let (_backend, proxy) = make_proxy(&desc, &LandscapeConfig::default());
    let positions = proxy.subsection_testing_positions();
    assert_eq!(
        positions,
        &[
            Vec3::new(16.0, 16.0, 0.0),
            Vec3::new(47.0, 16.0, 0.0),
            Vec3::new(16.0, 47.0, 0.0),
            Vec3::new(47.0, 47.0, 0.0),
        ]
    );

    let rotated = TileDesc {
        local_to_world: Mat4::from_rotation_z(std::f32::consts::FRAC_PI_2),
        ..desc
    };
    let (_backend, proxy) = make_proxy(&rotated, &LandscapeConfig::default());
    let second = proxy.subsection_testing_positions()[1];
    let first = proxy.subsection_testing_positions()[0];
    // A quarter turn maps the +X step onto +Y.
    assert!((second - first - Vec3::new(0.0, 31.0, 0.0)).length() < 1e-3);
}

#[test]
fn view_forced_lod_is_clamped_to_valid_range() {
    let config = LandscapeConfig::default();
    let close = ViewInfo {
        origin: Vec3::new(31.5, 31.5, 0.0),
        ..Default::default()
    };
    let forced = ViewInfo {
        editor_forced_lod: 2,
        ..close
    };

    let (_backend, free) = make_proxy(&centered_desc(), &config);
    assert_eq!(free.lod_to_render(&close, &config), 0);
    assert_eq!(free.lod_to_render(&forced, &config), 2);

    let biased_up = TileDesc {
        lod: TileLodInfo {
            lod_bias: 3,
            ..Default::default()
        },
        ..centered_desc()
    };
    let (_backend, proxy) = make_proxy(&biased_up, &config);
    assert_eq!(proxy.lod().min_valid_lod, 3);
    assert_eq!(proxy.lod_to_render(&forced, &config), 3);

    let biased_down = TileDesc {
        lod: TileLodInfo {
            lod_bias: -2,
            ..Default::default()
        },
        ..centered_desc()
    };
    let (_backend, proxy) = make_proxy(&biased_down, &config);
    assert_eq!(proxy.lod().max_valid_lod, 3);
    let coarse = ViewInfo {
        editor_forced_lod: 5,
        ..close
    };
    assert_eq!(proxy.lod_to_render(&coarse, &config), 3);
    assert_eq!(proxy.lod_to_render(&forced, &config), 2);
}

#[test]
fn streaming_residency_limits_lod() {
    let config = LandscapeConfig::default();
    let desc = TileDesc {
        heightmap: Some(Arc::new(HeightmapTexture::new(64, 64, 7))),
        ..centered_desc()
    };
    let (_backend, proxy) = make_proxy(&desc, &config);
    proxy.streaming().set_current_first_lod(4);
    let close = ViewInfo {
        origin: Vec3::new(31.5, 31.5, 0.0),
        ..Default::default()
    };
    assert_eq!(proxy.lod_to_render(&close, &config), 4);
}

#[test]
fn streaming_floor_wins_over_valid_range() {
    let config = LandscapeConfig::default();
    let desc = TileDesc {
        lod: TileLodInfo {
            lod_bias: -2,
            ..Default::default()
        },
        heightmap: Some(Arc::new(HeightmapTexture::new(64, 64, 7))),
        ..centered_desc()
    };
    let (_backend, proxy) = make_proxy(&desc, &config);
    assert_eq!(proxy.lod().max_valid_lod, 3);

    proxy.streaming().set_current_first_lod(4);
    let close = ViewInfo {
        origin: Vec3::new(31.5, 31.5, 0.0),
        ..Default::default()
    };
    assert_eq!(proxy.lod_to_render(&close, &config), 4);
}

#[test]
fn world_offset_moves_tile() {
    let desc = TileDesc {
        subsection_size_quads: 31,
        num_subsections: 2,
        ..centered_desc()
    };
    let (_backend, mut proxy) = make_proxy(&desc, &LandscapeConfig::default());
    let before = proxy.subsection_testing_positions().to_vec();
    let offset = Vec3::new(1000.0, -500.0, 10.0);
    proxy.apply_world_offset(offset);

    assert_eq!(proxy.bounds().origin, Vec3::new(1031.5, -468.5, 10.0));
    assert_eq!(proxy.uniform_params().local_to_world.w_axis.truncate(), offset);
    for (moved, original) in proxy.subsection_testing_positions().iter().zip(&before) {
        assert_eq!(*moved, *original + offset);
    }
    assert_eq!(
        proxy.section_entity().origin_and_radius,
        Vec4::new(1031.5, -468.5, 10.0, 44.6)
    );
}
