//! Integration tests for named resource creation, lookup and disposal.

mod common;

use common::*;
use shaderart::gpu::SimulationConfig;
use shaderart::{
    CompositeDesc, GfxError, MemorySource, PrimitiveKind, ResourceKind, ResourceState,
};

fn is_duplicate<T>(result: Result<T, GfxError>, expected: ResourceKind) -> bool {
    matches!(result, Err(GfxError::DuplicateResource { kind, .. }) if kind == expected)
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]))
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

// ==================== Duplicate Names ====================

#[test]
fn test_duplicate_shader_keeps_original_usable() {
    let mut registry = registry();
    registry
        .create_shader_from_source("p", POINT_VS, FLAT_FS)
        .unwrap();
    let original = registry.shader("p").unwrap().id();

    assert!(is_duplicate(
        registry.create_shader_from_source("p", POINT_VS, FLAT_FS),
        ResourceKind::Shader
    ));
    assert_eq!(registry.shader("p").unwrap().id(), original);

    registry
        .with_shader("p", |program, gpu| {
            program.create_attribute(gpu, "pos", 2, Some(&[0.0, 0.0]))
        })
        .unwrap();
    registry
        .draw("p", PrimitiveKind::Points, |ctx| {
            ctx.draw_all();
            Ok(())
        })
        .unwrap();
    assert_eq!(headless(&registry).stats().draw_calls, 1);
    assert_no_gpu_errors(&registry);
}

#[test]
fn test_duplicate_feedback_keeps_original() {
    let mut registry = registry();
    registry
        .create_feedback_from_source("step", STEP_VS, FLAT_FS, &step_outputs())
        .unwrap();
    registry
        .with_feedback("step", |feedback, gpu| {
            feedback.create_attribute(gpu, "v", 1, Some(&[0.0, 10.0]))
        })
        .unwrap();
    let buffers = registry.feedback("step").unwrap().buffer_set("v").unwrap().buffers();

    assert!(is_duplicate(
        registry.create_feedback_from_source("step", STEP_VS, FLAT_FS, &step_outputs()),
        ResourceKind::Feedback
    ));
    let feedback = registry.feedback("step").unwrap();
    assert_eq!(feedback.buffer_set("v").unwrap().buffers(), buffers);
    assert_eq!(
        registry.state(ResourceKind::Feedback, "step"),
        ResourceState::Ready
    );
}

#[test]
fn test_duplicate_simulation_keeps_units() {
    let mut registry = registry();
    registry
        .create_simulation_from_source(
            "sim",
            SimulationConfig::new(4, 4, 0, 1),
            &simulation_sources(),
        )
        .unwrap();

    assert!(is_duplicate(
        registry.create_simulation_from_source(
            "sim",
            SimulationConfig::new(4, 4, 2, 3),
            &simulation_sources(),
        ),
        ResourceKind::Simulation
    ));
    // the rejected request never reached the GPU
    assert_eq!(registry.gpu().texture_units().owner(2), None);
    assert_eq!(registry.gpu().texture_units().reserved(), 2);
    registry
        .with_simulation("sim", |sim, gpu| {
            sim.begin_process(gpu)?;
            sim.end_process(gpu)
        })
        .unwrap();
    assert_no_gpu_errors(&registry);
}

#[test]
fn test_duplicate_texture_and_render_target() {
    let mut registry = registry();
    registry
        .create_texture_from_image("image", 0, &image(2, 2))
        .unwrap();
    registry.create_render_target("target", 1, 8, 8).unwrap();

    assert!(is_duplicate(
        registry.create_texture_from_image("image", 5, &image(2, 2)),
        ResourceKind::Texture
    ));
    assert!(is_duplicate(
        registry.create_render_target("target", 6, 8, 8),
        ResourceKind::RenderTarget
    ));
    assert_eq!(registry.texture("image").unwrap().unit(), 0);
    assert_eq!(registry.render_target("target").unwrap().size(), (8, 8));
    assert_eq!(registry.gpu().texture_units().reserved(), 2);
}

#[test]
fn test_duplicate_composite_keeps_original() {
    let mut registry = registry();
    registry
        .create_shader_from_source("p", POINT_VS, FLAT_FS)
        .unwrap();
    registry
        .create_composite("scene", CompositeDesc::new().render_pass(0, "p"))
        .unwrap();

    assert!(is_duplicate(
        registry.create_composite("scene", CompositeDesc::new()),
        ResourceKind::Composite
    ));
    assert_eq!(registry.composite("scene").unwrap().render_passes().len(), 1);
}

// ==================== Drawing ====================

#[test]
fn test_indexed_draw_without_index_buffer() {
    let mut registry = registry();
    registry
        .create_shader_from_source("p", POINT_VS, FLAT_FS)
        .unwrap();
    registry
        .with_shader("p", |program, gpu| {
            program.create_attribute(gpu, "pos", 2, Some(&[0.0, 0.0]))
        })
        .unwrap();
    let err = registry
        .draw("p", PrimitiveKind::Points, |ctx| ctx.draw_indexed())
        .unwrap_err();
    assert!(matches!(err, GfxError::MissingIndexBuffer(ref name) if name == "p"));
    assert_eq!(err.to_string(), "program `p` has no index buffer");
    assert_eq!(headless(&registry).stats().draw_calls, 0);
}

// ==================== Texture Units ====================

#[test]
fn test_two_textures_on_same_unit_collide() {
    let mut registry = registry();
    registry
        .create_texture_from_image("first", 3, &image(2, 2))
        .unwrap();
    let result = registry.create_texture_from_image("second", 3, &image(2, 2));
    assert!(matches!(
        result,
        Err(GfxError::SlotCollision { unit: 3, ref owner }) if owner == "first"
    ));
    assert_eq!(
        registry.state(ResourceKind::Texture, "second"),
        ResourceState::Failed
    );
    assert_eq!(registry.gpu().texture_units().owner(3), Some("first"));
}

#[test]
fn test_render_target_collides_with_texture() {
    let mut registry = registry();
    registry
        .create_texture_from_image("image", 1, &image(2, 2))
        .unwrap();
    assert!(matches!(
        registry.create_render_target("target", 1, 8, 8),
        Err(GfxError::SlotCollision { unit: 1, .. })
    ));
    assert_eq!(headless(&registry).live_framebuffers(), 0);
}

#[test]
fn test_unit_beyond_device_limit() {
    let mut registry = registry();
    let capacity = registry.gpu().capabilities().max_combined_texture_units;
    assert!(matches!(
        registry.create_texture_from_image("image", capacity, &image(2, 2)),
        Err(GfxError::Capacity { .. })
    ));
}

// ==================== Async Loading ====================

#[tokio::test]
async fn test_load_shader_from_assets() {
    let assets = MemorySource::new()
        .with("shaders/point.vert", POINT_VS)
        .with("shaders/flat.frag", FLAT_FS);
    let mut registry = registry_with_assets(assets);
    registry
        .create_shader("p", "shaders/point.vert", "shaders/flat.frag")
        .await
        .unwrap();
    assert_eq!(registry.names(ResourceKind::Shader), vec!["p"]);
    assert!(is_duplicate(
        registry
            .create_shader("p", "shaders/point.vert", "shaders/flat.frag")
            .await,
        ResourceKind::Shader
    ));
}

#[tokio::test]
async fn test_missing_asset_fails_the_load() {
    let mut registry = registry_with_assets(MemorySource::new().with("a.vert", POINT_VS));
    let result = registry.create_shader("p", "a.vert", "missing.frag").await;
    assert!(matches!(result, Err(GfxError::Load(_))));
    assert_eq!(
        registry.state(ResourceKind::Shader, "p"),
        ResourceState::Failed
    );
    let failure = registry.failure(ResourceKind::Shader, "p").unwrap();
    assert!(failure.contains("missing.frag"), "{failure}");
    assert_eq!(headless(&registry).live_shaders(), 0);
}

#[tokio::test]
async fn test_load_texture_decodes_png() {
    let assets = MemorySource::new()
        .with("images/tile.png", png(3, 2))
        .with("images/broken.png", b"not a png".to_vec());
    let mut registry = registry_with_assets(assets);
    let texture = registry
        .create_texture("tile", 4, "images/tile.png")
        .await
        .unwrap();
    assert_eq!(texture.size(), (3, 2));
    assert_eq!(texture.source(), Some("images/tile.png"));

    let broken = registry.create_texture("broken", 5, "images/broken.png").await;
    assert!(matches!(broken, Err(GfxError::Load(_))));
    // a failed load gives its unit back
    assert_eq!(registry.gpu().texture_units().owner(5), None);
    assert_eq!(registry.gpu().texture_units().owner(4), Some("tile"));
}

#[tokio::test]
async fn test_load_feedback_and_simulation_from_assets() {
    let assets = MemorySource::new()
        .with("step.vert", STEP_VS)
        .with("flat.frag", FLAT_FS)
        .with("quad.vert", QUAD_VS)
        .with("seed.frag", SEED_FS)
        .with("step.frag", STEP_FS);
    let mut registry = registry_with_assets(assets);
    registry
        .create_feedback("step", "step.vert", "flat.frag", &step_outputs())
        .await
        .unwrap();
    let paths = shaderart::SimulationSources::shared_vertex("quad.vert", "seed.frag", "step.frag");
    registry
        .create_simulation("sim", SimulationConfig::new(4, 4, 0, 1), &paths)
        .await
        .unwrap();
    assert_eq!(registry.names(ResourceKind::Feedback), vec!["step"]);
    assert_eq!(registry.names(ResourceKind::Simulation), vec!["sim"]);
    assert_no_gpu_errors(&registry);
}

// ==================== Disposal ====================

#[test]
fn test_lookup_of_unknown_name() {
    let registry = registry();
    assert!(matches!(
        registry.shader("nope"),
        Err(GfxError::UnknownResource {
            kind: ResourceKind::Shader,
            ..
        })
    ));
    assert_eq!(
        registry.state(ResourceKind::Shader, "nope"),
        ResourceState::Unloaded
    );
}

#[test]
fn test_dispose_twice_never_double_frees() {
    let mut registry = registry();
    registry
        .create_shader_from_source("p", POINT_VS, FLAT_FS)
        .unwrap();
    registry
        .create_feedback_from_source("step", STEP_VS, FLAT_FS, &step_outputs())
        .unwrap();
    registry
        .with_feedback("step", |feedback, gpu| {
            feedback.create_attribute(gpu, "v", 1, Some(&[0.0, 1.0]))
        })
        .unwrap();
    registry
        .create_simulation_from_source(
            "sim",
            SimulationConfig::new(4, 4, 0, 1),
            &simulation_sources(),
        )
        .unwrap();
    registry
        .create_texture_from_image("image", 2, &image(2, 2))
        .unwrap();
    registry.create_render_target("target", 3, 8, 8).unwrap();
    registry
        .create_composite(
            "all",
            CompositeDesc::new()
                .feedback_pass(0, "step")
                .simulation_pass(0, "sim"),
        )
        .unwrap();
    assert!(headless(&registry).live_objects() > 0);

    registry
        .dispose_resource(ResourceKind::Feedback, "step")
        .unwrap();
    registry
        .dispose_resource(ResourceKind::Feedback, "step")
        .unwrap();
    registry.dispose();
    registry.dispose();

    let gpu = headless(&registry);
    assert_eq!(gpu.live_objects(), 0);
    assert!(gpu.errors().is_empty(), "{:?}", gpu.errors());
    assert_eq!(registry.gpu().texture_units().reserved(), 0);
    for kind in [
        ResourceKind::Shader,
        ResourceKind::Feedback,
        ResourceKind::Simulation,
        ResourceKind::Texture,
        ResourceKind::RenderTarget,
        ResourceKind::Composite,
    ] {
        assert!(registry.names(kind).is_empty(), "{kind} left behind");
    }
}

#[test]
fn test_disposing_feedback_unwires_render_attributes() {
    let mut registry = registry();
    registry
        .create_feedback_from_source("step", STEP_VS, FLAT_FS, &step_outputs())
        .unwrap();
    registry
        .with_feedback("step", |feedback, gpu| {
            feedback.create_attribute(gpu, "v", 1, Some(&[0.0, 10.0]))
        })
        .unwrap();
    registry
        .create_shader_from_source("draw", DRAW_V_VS, FLAT_FS)
        .unwrap();
    registry
        .with_shader("draw", |program, gpu| program.create_attribute(gpu, "v", 1, None))
        .unwrap();
    registry
        .create_composite(
            "particles",
            CompositeDesc::new()
                .feedback_pass(0, "step")
                .render_pass(0, "draw"),
        )
        .unwrap();
    registry
        .execute_composite(
            "particles",
            PrimitiveKind::Points,
            |ctx| {
                ctx.draw_all();
                Ok(())
            },
            |ctx| {
                ctx.draw_all();
                Ok(())
            },
        )
        .unwrap();
    assert!(registry.shader("draw").unwrap().attribute("v").unwrap().buffer().is_some());

    registry
        .dispose_resource(ResourceKind::Feedback, "step")
        .unwrap();
    let slot = registry.shader("draw").unwrap().attribute("v").unwrap();
    assert_eq!(slot.buffer(), None);
    assert_eq!(slot.vertex_count(), 0);

    registry
        .draw("draw", PrimitiveKind::Points, |ctx| {
            ctx.draw_all();
            Ok(())
        })
        .unwrap();
    assert_no_gpu_errors(&registry);
}

#[test]
fn test_names_are_free_after_dispose() {
    let mut registry = registry();
    registry
        .create_texture_from_image("image", 0, &image(2, 2))
        .unwrap();
    registry.dispose();
    registry
        .create_texture_from_image("image", 0, &image(2, 2))
        .unwrap();
    assert_eq!(
        registry.state(ResourceKind::Texture, "image"),
        ResourceState::Ready
    );
}
