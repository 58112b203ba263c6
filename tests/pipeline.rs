use deferred_pipeline::app::demo_scene;
use deferred_pipeline::render::geometry::ObjectDraw;
use deferred_pipeline::render::shadow::{
    face_direction, face_view_projection, orient_face, plan_shadows, shadow_camera, FACE_COUNT,
};
use deferred_pipeline::scene::{DrawCommand, DrawList, Material, ShaderTarget, Transform};
use deferred_pipeline::{
    Aabb, Intersection, MeshData, PipelineSettings, RenderContext, RenderToggles, Renderable,
    Renderer, SceneGraph, SceneView, TargetKind,
};
use glam::{Vec2, Vec3, Vec4};

const FACE_RESOLUTION: usize = 128;

/// Distance along `dir` at which the ray enters `aabb`, if it does.
fn ray_hit(origin: Vec3, dir: Vec3, aabb: &Aabb) -> Option<f32> {
    let inv = dir.recip();
    let t0 = (aabb.min() - origin) * inv;
    let t1 = (aabb.max() - origin) * inv;
    let near = t0.min(t1).max_element();
    let far = t0.max(t1).min_element();
    (near <= far && far >= 0.0).then_some(near.max(0.0))
}

#[test]
fn demo_cube_is_visible_and_depth_ordered() {
    let description = demo_scene();
    let settings = PipelineSettings::default();
    let graph = description.build_graph().unwrap();
    let mut camera = description.build_camera(&settings.camera).unwrap();
    camera.update(16.0 / 9.0, true);

    let cube = graph.find("Cube").unwrap();
    let bounds = graph.world_bounds(cube).unwrap();
    assert_ne!(camera.classify(&bounds), Intersection::Outside);

    let near_face = camera.gpu_depth(Vec3::new(0.0, 0.0, 0.5));
    let far_face = camera.gpu_depth(Vec3::new(0.0, 0.0, -0.5));
    assert!(near_face < far_face);
    assert!((0.0..1.0).contains(&near_face));

    let mut list = DrawList::new(ShaderTarget::Geometry, camera.frustum().copied());
    graph.render(0.0, &mut list);
    assert_eq!((list.len(), list.culled()), (2, 0));
}

/// Face and texture coordinates a cube sampler reads for `dir`, with `v = 0`
/// on the top row.
fn cube_face_uv(dir: Vec3) -> (usize, Vec2) {
    let abs = dir.abs();
    let (face, major, s, t) = if abs.x >= abs.y && abs.x >= abs.z {
        if dir.x > 0.0 {
            (0, abs.x, -dir.z, -dir.y)
        } else {
            (1, abs.x, dir.z, -dir.y)
        }
    } else if abs.y >= abs.z {
        if dir.y > 0.0 {
            (2, abs.y, dir.x, dir.z)
        } else {
            (3, abs.y, dir.x, -dir.z)
        }
    } else if dir.z > 0.0 {
        (4, abs.z, dir.x, -dir.y)
    } else {
        (5, abs.z, -dir.x, -dir.y)
    };
    (face, Vec2::new(s / major + 1.0, t / major + 1.0) * 0.5)
}

/// Renders the linear light distance of `occluders` into one cube face the
/// way the shadow pass does: through the face's view-projection, with row 0
/// at the top of the framebuffer.
fn render_distance_face(light: Vec3, face: usize, occluders: &[Aabb]) -> Vec<f32> {
    let settings = PipelineSettings::default().shadow;
    let mut camera = shadow_camera(light, &settings).unwrap();
    orient_face(&mut camera, face);
    let inverse = face_view_projection(&camera).inverse();

    let mut distances = vec![settings.far; FACE_RESOLUTION * FACE_RESOLUTION];
    for row in 0..FACE_RESOLUTION {
        for column in 0..FACE_RESOLUTION {
            let u = (column as f32 + 0.5) / FACE_RESOLUTION as f32;
            let v = (row as f32 + 0.5) / FACE_RESOLUTION as f32;
            let clip = inverse * Vec4::new(u * 2.0 - 1.0, 1.0 - v * 2.0, 0.999, 1.0);
            let dir = (clip.truncate() / clip.w - light).normalize();
            let nearest = occluders
                .iter()
                .filter_map(|aabb| ray_hit(light, dir, aabb))
                .fold(settings.far, f32::min);
            distances[row * FACE_RESOLUTION + column] = nearest;
        }
    }
    distances
}

/// Shadow comparison of the screen pass: stored distance against the real
/// distance minus the bias.
fn occluded(light: Vec3, receiver: Vec3, faces: &[Vec<f32>]) -> bool {
    let bias = PipelineSettings::default().shadow.bias;
    let (face, uv) = cube_face_uv(receiver - light);
    let texel = (uv * FACE_RESOLUTION as f32)
        .floor()
        .clamp(Vec2::ZERO, Vec2::splat(FACE_RESOLUTION as f32 - 1.0));
    let stored = faces[face][texel.y as usize * FACE_RESOLUTION + texel.x as usize];
    stored < light.distance(receiver) - bias
}

#[test]
fn distance_cube_shadows_the_floor_under_an_offset_cube() {
    let mut graph = SceneGraph::new();
    let mesh = graph.add_mesh(MeshData::cube());
    let cube = graph.add_node("Cube", None);
    graph.node_mut(cube).unwrap().transform = Transform {
        translation: Vec3::new(1.0, 1.0, 0.8),
        ..Transform::default()
    };
    graph.set_mesh(cube, mesh, Material::default());
    let bounds = graph.world_bounds(cube).unwrap();

    let light = Vec3::new(0.0, 5.0, 0.0);
    let faces: Vec<Vec<f32>> = (0..FACE_COUNT)
        .map(|face| render_distance_face(light, face, &[bounds]))
        .collect();

    let below = Vec3::new(1.375, -0.5, 1.1);
    let (face, _) = cube_face_uv(below - light);
    assert_eq!(face_direction(face), Vec3::NEG_Y);
    assert!(occluded(light, below, &faces));

    for lit in [
        Vec3::new(-1.375, -0.5, -1.1),
        Vec3::new(1.375, -0.5, -1.1),
        Vec3::new(-1.375, -0.5, 1.1),
        Vec3::new(4.0, 0.0, 0.0),
    ] {
        assert!(!occluded(light, lit, &faces), "{lit:?} should be lit");
    }
}

#[test]
fn light_ray_enters_the_cube_through_its_top_face() {
    let description = demo_scene();
    let graph = description.build_graph().unwrap();
    let light = graph.lights()[0];
    let bounds = graph.world_bounds(graph.find("Cube").unwrap()).unwrap();

    let receiver = Vec3::new(0.0, 0.0, 0.5);
    let to_receiver = receiver - light.position;
    let hit = ray_hit(light.position, to_receiver, &bounds).unwrap();
    assert!((hit - 0.9).abs() < 1e-4);

    let beside = Vec3::new(2.0, -0.5, 0.0);
    assert!(ray_hit(light.position, beside - light.position, &bounds).map_or(true, |t| t > 1.0));
}

#[test]
fn overhead_light_sees_the_cube_through_its_down_face() {
    let description = demo_scene();
    let settings = PipelineSettings::default();
    let mut graph = description.build_graph().unwrap();
    let floor = graph.find("Floor").unwrap();
    graph.node_mut(floor).unwrap().casts_shadows = false;

    let mut slot = 0;
    let submit = |command: &DrawCommand| {
        slot += 1;
        Some(ObjectDraw {
            mesh: command.mesh,
            slot: slot - 1,
        })
    };
    let casters =
        plan_shadows(&graph, &settings.shadow, settings.max_lights, 0.0, true, submit).unwrap();

    assert_eq!(casters.len(), 1);
    let caster = &casters[0];
    assert_eq!(caster.draw_count(), 1);
    let face = caster.faces.iter().position(|face| !face.draws.is_empty()).unwrap();
    assert_eq!(face_direction(face), Vec3::NEG_Y);
}

#[test]
fn headless_frame_writes_depth_and_shadow() {
    let mut settings = PipelineSettings::default();
    settings.msaa_samples = 1;
    settings.shadow.resolution = 128;
    let mut renderer = match pollster::block_on(Renderer::new_headless(64, 64, settings)) {
        Ok(renderer) => renderer,
        Err(err) if std::env::var_os("WGPU_REQUIRE_ADAPTER").is_some() => {
            panic!("no usable GPU adapter: {err:?}");
        }
        Err(err) => {
            eprintln!("skipping GPU test: {err:?}");
            return;
        }
    };

    let description = demo_scene();
    let mut graph = description.build_graph().unwrap();
    let mut camera = description.build_camera(&renderer.settings().camera).unwrap();
    let report = renderer
        .render(RenderContext {
            delta: 0.0,
            camera: &mut camera,
            scene: &graph,
            toggles: RenderToggles::default(),
        })
        .unwrap();
    assert_eq!(report.draws, 2);
    assert_eq!(report.shadow_lights, 1);
    assert!(report.presented);

    let depth = renderer.capture(TargetKind::Depth).unwrap();
    assert_eq!((depth.width, depth.height), (64, 64));
    assert!(depth.data.iter().any(|&value| value < 1.0));

    let shadow = renderer.capture(TargetKind::Shadow).unwrap();
    assert!(shadow.max(0) > 0.5);

    renderer.set_ssao_samples(8).unwrap();
    assert_eq!(renderer.kernel().len(), 8);
    assert!(renderer.set_ssao_samples(300).is_err());
    assert_eq!(renderer.settings().ssao.samples, 8);

    renderer.dispose();
    graph.dispose();
}
