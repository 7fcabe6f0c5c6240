use glam::{IVec2, Vec3};
use meshi_landscape::render::debug::{color_for_lod, DebugMaterial};
use meshi_landscape::render::proxy::{TileBounds, TileDesc};
use meshi_landscape::{
    HeadlessBackend, LandscapeConfig, LandscapeError, LandscapeKey, RenderSystemRegistry,
    ShowFlags, TileId, ViewId, ViewInfo, ViewMode,
};

const KEY: LandscapeKey = LandscapeKey { world: 0, guid: 0xfeed };
const QUADS: i32 = 63;

fn tile_desc(x: i32, y: i32) -> TileDesc {
    let center = Vec3::new(
        (x * QUADS) as f32 + QUADS as f32 / 2.0,
        (y * QUADS) as f32 + QUADS as f32 / 2.0,
        0.0,
    );
    TileDesc {
        landscape: KEY,
        section_base: IVec2::new(x * QUADS, y * QUADS),
        subsection_size_quads: QUADS as u32,
        num_subsections: 1,
        bounds: TileBounds {
            origin: center,
            box_extent: Vec3::new(31.5, 31.5, 1.0),
            sphere_radius: 44.55,
        },
        ..Default::default()
    }
}

fn scene(config: LandscapeConfig) -> (RenderSystemRegistry<HeadlessBackend>, Vec<TileId>) {
    let mut registry = RenderSystemRegistry::new(config, HeadlessBackend::new());
    let mut ids = Vec::new();
    for y in 0..2 {
        for x in 0..2 {
            ids.push(registry.create_tile(&tile_desc(x, y)).unwrap());
        }
    }
    (registry, ids)
}

fn render_frame(registry: &mut RenderSystemRegistry<HeadlessBackend>, view: &ViewInfo) {
    registry.begin_frame();
    registry.prepare_view(view);
    registry.begin_render_view(view);
    registry.end_frame();
}

fn lod_at(registry: &RenderSystemRegistry<HeadlessBackend>, x: i32, y: i32) -> f32 {
    registry
        .render_system(&KEY)
        .unwrap()
        .section_lod_value(IVec2::new(x, y))
        .unwrap()
}

#[test]
fn far_camera_puts_every_tile_at_last_lod() {
    let (mut registry, ids) = scene(LandscapeConfig::default());
    assert_eq!(registry.num_render_systems(), 1);
    assert_eq!(registry.shared_buffers().len(), 1);
    assert_eq!(registry.shared_buffers().ref_count(registry.tile(ids[0]).unwrap().shared_buffers().key()), 4);

    let far = ViewInfo {
        id: ViewId(1),
        origin: Vec3::new(0.0, 0.0, 1.0e6),
        ..Default::default()
    };
    render_frame(&mut registry, &far);

    let system = registry.render_system(&KEY).unwrap();
    assert_eq!(system.size(), IVec2::new(2, 2));
    assert_eq!(system.section_lod_values(), &[5.0, 5.0, 5.0, 5.0]);
    for &id in &ids {
        assert_eq!(registry.lod_to_render(id, &far).unwrap(), 5);
    }
}

#[test]
fn point_blank_camera_refines_one_tile() {
    let (mut registry, ids) = scene(LandscapeConfig::default());
    let close = ViewInfo {
        id: ViewId(2),
        origin: Vec3::new(31.5, 31.5, 0.0),
        ..Default::default()
    };
    render_frame(&mut registry, &close);

    assert_eq!(lod_at(&registry, 0, 0), 0.0);
    let adjacent = lod_at(&registry, 1, 0);
    let diagonal = lod_at(&registry, 1, 1);
    assert!(adjacent > 0.0);
    assert_eq!(adjacent, lod_at(&registry, 0, 1));
    assert!(diagonal > adjacent);

    assert_eq!(registry.lod_to_render(ids[0], &close).unwrap(), 0);
    assert!(registry.lod_to_render(ids[3], &close).unwrap() >= 1);
}

#[test]
fn threaded_scene_matches_inline_scene() {
    let view = ViewInfo {
        id: ViewId(3),
        origin: Vec3::new(20.0, 90.0, 60.0),
        ..Default::default()
    };
    let (mut threaded, _) = scene(LandscapeConfig::default());
    let (mut inline, _) = scene(LandscapeConfig {
        threaded_lod: false,
        ..Default::default()
    });
    render_frame(&mut threaded, &view);
    render_frame(&mut inline, &view);
    assert_eq!(
        threaded.render_system(&KEY).unwrap().section_lod_values(),
        inline.render_system(&KEY).unwrap().section_lod_values()
    );
}

#[test]
fn uniforms_point_at_uploaded_lods() {
    let (mut registry, ids) = scene(LandscapeConfig::default());
    let view = ViewInfo {
        id: ViewId(4),
        origin: Vec3::new(63.0, 63.0, 300.0),
        ..Default::default()
    };
    render_frame(&mut registry, &view);

    let uniforms = registry.section_lod_uniforms(ids[2]).unwrap();
    assert_eq!(uniforms.size, IVec2::new(2, 2));
    let uploaded = registry.backend().read::<f32>(uniforms.section_lod()).unwrap();
    assert_eq!(
        uploaded,
        registry.render_system(&KEY).unwrap().section_lod_values().to_vec()
    );
}

#[test]
fn hidden_tiles_bind_null_resources() {
    let mut registry = RenderSystemRegistry::new(LandscapeConfig::default(), HeadlessBackend::new());
    let hidden = registry
        .create_tile(&TileDesc {
            level_visible: false,
            ..tile_desc(0, 0)
        })
        .unwrap();
    assert_eq!(registry.num_render_systems(), 0);

    let uniforms = registry.section_lod_uniforms(hidden).unwrap();
    assert_eq!(uniforms.size, IVec2::ZERO);
    assert!(uniforms.section_lod().valid());
    assert_eq!(registry.backend().read::<f32>(uniforms.section_lod()).unwrap(), vec![0.0]);
    assert_eq!(registry.section_lod_uniforms(hidden).unwrap(), uniforms);

    registry.on_level_added_to_world(&[hidden]).unwrap();
    assert_eq!(registry.num_render_systems(), 1);
    assert!(registry.tile(hidden).unwrap().level_visible());
    assert_ne!(registry.section_lod_uniforms(hidden).unwrap(), uniforms);

    registry.on_level_removed_from_world(&[hidden]).unwrap();
    assert_eq!(registry.num_render_systems(), 0);
}

#[test]
fn destroying_tiles_tears_down_system_and_buffers() {
    let (mut registry, ids) = scene(LandscapeConfig::default());
    render_frame(
        &mut registry,
        &ViewInfo {
            id: ViewId(5),
            ..Default::default()
        },
    );

    for &id in &ids[..3] {
        registry.destroy_tile(id).unwrap();
    }
    assert_eq!(registry.num_render_systems(), 1);
    let system = registry.render_system(&KEY).unwrap();
    assert_eq!(system.num_registered_entities(), 1);
    // The grid never shrinks.
    assert_eq!(system.size(), IVec2::new(2, 2));

    registry.destroy_tile(ids[3]).unwrap();
    assert_eq!(registry.num_render_systems(), 0);
    assert!(registry.shared_buffers().is_empty());
    assert_eq!(registry.backend().live_buffers(), 0);

    match registry.destroy_tile(ids[3]) {
        Err(LandscapeError::UnknownTile(id)) => assert_eq!(id, ids[3]),
        other => panic!("expected unknown tile, got {:?}", other),
    }
}

#[test]
fn shutdown_releases_everything() {
    let (mut registry, ids) = scene(LandscapeConfig::default());
    registry.section_lod_uniforms(ids[0]).unwrap();
    let backend = registry.shutdown();
    assert_eq!(backend.live_buffers(), 0);
}

#[test]
fn lod_view_mode_tints_by_lod() {
    let (mut registry, ids) = scene(LandscapeConfig {
        view_mode: ViewMode::Lod,
        ..Default::default()
    });
    let far = ViewInfo {
        id: ViewId(6),
        origin: Vec3::new(0.0, 0.0, 1.0e6),
        ..Default::default()
    };
    render_frame(&mut registry, &far);

    let (batches, debug) = registry.mesh_batches_for_view(ids[1], &far).unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].lod_index, 5);
    let debug = debug.unwrap();
    assert_eq!(debug.lod_index, 5);
    assert_eq!(debug.material, DebugMaterial::Colored(color_for_lod(5, -1, true)));
}

#[test]
fn normal_view_mode_only_decorates_collision_views() {
    let mut registry = RenderSystemRegistry::new(LandscapeConfig::default(), HeadlessBackend::new());
    let mut desc = tile_desc(0, 0);
    desc.collision.collision_mip_level = 2;
    let id = registry.create_tile(&desc).unwrap();

    let plain = ViewInfo::default();
    let (_, debug) = registry.mesh_batches_for_view(id, &plain).unwrap();
    assert!(debug.is_none());

    let collision = ViewInfo {
        show_flags: ShowFlags::LOD | ShowFlags::COLLISION_VISIBILITY,
        ..Default::default()
    };
    let (batches, debug) = registry.mesh_batches_for_view(id, &collision).unwrap();
    assert_eq!(batches[0].lod_index, 2);
    assert!(debug.is_some());
}

#[test]
fn tool_material_adds_overlay_batch() {
    let mut registry = RenderSystemRegistry::new(LandscapeConfig::default(), HeadlessBackend::new());
    let id = registry
        .create_tile(&TileDesc {
            tool_material: Some(7),
            ..tile_desc(0, 0)
        })
        .unwrap();
    let (batches, _) = registry.mesh_batches_for_view(id, &ViewInfo::default()).unwrap();
    assert_eq!(batches.len(), 2);
    assert!(batches[1].is_tool);
    assert_eq!(batches[1].material_index, 7);
    assert!(!batches[1].cast_shadow);
}

#[test]
fn dump_lists_the_grid() {
    let (mut registry, ids) = scene(LandscapeConfig::default());
    registry.destroy_tile(ids[3]).unwrap();
    render_frame(
        &mut registry,
        &ViewInfo {
            id: ViewId(8),
            origin: Vec3::new(0.0, 0.0, 1.0e6),
            ..Default::default()
        },
    );

    let dump = registry.dump_lods(&KEY).unwrap();
    let lines: Vec<&str> = dump.lines().collect();
    assert_eq!(lines[0], "Landscape LODs: min (0, 0) size 2x2");
    assert_eq!(lines[1], " 5.00  5.00");
    assert_eq!(lines[2], " 5.00     -");
    assert!(registry.dump_lods(&LandscapeKey::default()).is_none());
}

#[test]
fn world_offset_moves_render_cells() {
    let (mut registry, ids) = scene(LandscapeConfig::default());
    registry.apply_world_offset(Vec3::new(100.0, 0.0, 0.0));
    let tile = registry.tile(ids[0]).unwrap();
    assert_eq!(tile.bounds().origin, Vec3::new(131.5, 31.5, 0.0));
    let cell = registry
        .render_system(&KEY)
        .unwrap()
        .section_origin_and_radius(IVec2::ZERO)
        .unwrap();
    assert_eq!(cell.truncate(), Vec3::new(131.5, 31.5, 0.0));
}
