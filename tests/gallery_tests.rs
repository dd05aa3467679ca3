//! End-to-end tests: every built-in visualization loaded and ticked through
//! the gallery on the headless GPU.

use std::time::Duration;

use shaderart::gpu::{HeadlessGpu, UniformValue};
use shaderart::{
    ConfigError, Gallery, GalleryConfig, GalleryError, GpuContext, ManualClock, ResourceKind,
    VisualizationKind,
};

fn gallery(config: &GalleryConfig) -> (Gallery, ManualClock) {
    let clock = ManualClock::new();
    let gallery = Gallery::with_clock(config, GpuContext::headless(), clock.clone()).unwrap();
    (gallery, clock)
}

fn gpu(gallery: &Gallery) -> &HeadlessGpu {
    gallery.registry().gpu().backend::<HeadlessGpu>().unwrap()
}

fn assert_no_gpu_errors(gallery: &Gallery) {
    let errors = gpu(gallery).errors();
    assert!(errors.is_empty(), "GPU errors: {errors:?}");
}

fn tick(gallery: &mut Gallery, clock: &ManualClock, frames: usize) {
    for _ in 0..frames {
        clock.advance(Duration::from_millis(16));
        assert!(gallery.tick().unwrap().is_some());
    }
}

// ==================== Visualizations ====================

#[tokio::test]
async fn test_every_visualization_renders_cleanly() {
    let (mut gallery, clock) = gallery(&GalleryConfig::default());
    for kind in VisualizationKind::all() {
        gallery.show(kind.name()).await.unwrap();
        assert_eq!(gallery.active_name(), Some(kind.name()));
        let before = gpu(&gallery).stats().draw_calls;
        tick(&mut gallery, &clock, 4);
        assert!(
            gpu(&gallery).stats().draw_calls > before,
            "{} drew nothing",
            kind.name()
        );
        assert_no_gpu_errors(&gallery);
    }
    gallery.shutdown();
    assert_eq!(gpu(&gallery).live_objects(), 0);
    assert_no_gpu_errors(&gallery);
}

#[tokio::test]
async fn test_switching_disposes_previous_resources() {
    let (mut gallery, clock) = gallery(&GalleryConfig::default());
    gallery.show("feedback-particles").await.unwrap();
    tick(&mut gallery, &clock, 2);
    assert_eq!(
        gallery.registry().names(ResourceKind::Feedback),
        vec!["particles-update"]
    );

    gallery.show("points").await.unwrap();
    assert!(gallery.registry().names(ResourceKind::Feedback).is_empty());
    assert_eq!(gallery.registry().names(ResourceKind::Shader), vec!["points"]);
    assert_eq!(gallery.registry().gpu().texture_units().reserved(), 0);
}

#[tokio::test]
async fn test_particles_follow_pointer() {
    let (mut gallery, clock) = gallery(&GalleryConfig::default());
    gallery.show("feedback-particles").await.unwrap();
    // top-right corner of an 800x600 canvas
    gallery.mouse_move(800.0, 0.0);
    tick(&mut gallery, &clock, 1);

    let attractor = gpu(&gallery)
        .draws()
        .iter()
        .rev()
        .find_map(|draw| draw.uniform("attractor").cloned());
    assert_eq!(attractor, Some(UniformValue::Vec2([1.0, 1.0])));
}

#[tokio::test]
async fn test_curl_noise_alternates_state_units() {
    let (mut gallery, clock) = gallery(&GalleryConfig::default());
    gallery.show("curl-noise").await.unwrap();
    let mut units = Vec::new();
    for _ in 0..4 {
        tick(&mut gallery, &clock, 1);
        let sim = gallery.registry().simulation("curl-state").unwrap();
        units.push(sim.active_unit());
    }
    assert_eq!(units, vec![1, 0, 1, 0]);
    assert_no_gpu_errors(&gallery);
}

// ==================== Scheduling ====================

#[tokio::test]
async fn test_resize_is_reported_for_one_frame() {
    let (mut gallery, clock) = gallery(&GalleryConfig::default());
    gallery.show("post-effect").await.unwrap();
    clock.advance(Duration::from_millis(16));
    let first = gallery.tick().unwrap().unwrap();
    assert!(!first.resize_occurred);
    assert_eq!((first.viewport_width, first.viewport_height), (800, 600));

    gallery.resize(640, 360);
    let resized = gallery.tick().unwrap().unwrap();
    assert!(resized.resize_occurred);
    assert_eq!((resized.viewport_width, resized.viewport_height), (640, 360));
    let after = gallery.tick().unwrap().unwrap();
    assert!(!after.resize_occurred);

    let target = gallery.registry().render_target("scene-target").unwrap();
    assert_eq!(target.size(), (640, 360));
    assert_no_gpu_errors(&gallery);
}

#[tokio::test]
async fn test_zero_sized_canvas_keeps_rendering() {
    let (mut gallery, clock) = gallery(&GalleryConfig::default());
    gallery.show("post-effect").await.unwrap();
    tick(&mut gallery, &clock, 1);

    gallery.resize(0, 0);
    tick(&mut gallery, &clock, 3);
    let target = gallery.registry().render_target("scene-target").unwrap();
    assert_eq!(target.size(), (800, 600));

    gallery.resize(320, 240);
    tick(&mut gallery, &clock, 1);
    let target = gallery.registry().render_target("scene-target").unwrap();
    assert_eq!(target.size(), (320, 240));
    assert_no_gpu_errors(&gallery);
}

#[tokio::test]
async fn test_elapsed_time_follows_clock() {
    let (mut gallery, clock) = gallery(&GalleryConfig::default());
    clock.advance(Duration::from_secs(10));
    gallery.show("points").await.unwrap();
    clock.advance(Duration::from_millis(500));
    let frame = gallery.tick().unwrap().unwrap();
    // the clock restarts when a visualization is shown
    assert!((frame.elapsed_time - 0.5).abs() < 1e-6);
    assert_eq!(frame.frame_index, 0);
}

#[tokio::test]
async fn test_redraw_requests_follow_animation_flag() {
    let (mut gallery, clock) = gallery(&GalleryConfig::default());
    gallery.show("points").await.unwrap();
    assert!(gallery.take_redraw_request());
    tick(&mut gallery, &clock, 1);
    assert!(!gallery.take_redraw_request());

    gallery.show("curl-noise").await.unwrap();
    assert!(gallery.take_redraw_request());
    tick(&mut gallery, &clock, 1);
    assert!(gallery.take_redraw_request());
}

#[tokio::test]
async fn test_animate_override() {
    let config = GalleryConfig {
        animate: Some(false),
        ..GalleryConfig::default()
    };
    let (mut gallery, _clock) = gallery(&config);
    gallery.show("curl-noise").await.unwrap();
    assert!(!gallery.scheduler().is_animating());
    assert!(gallery.scheduler().is_enabled());
}

#[test]
fn test_tick_without_visualization() {
    let (mut gallery, _clock) = gallery(&GalleryConfig::default());
    assert!(gallery.tick().unwrap().is_none());
}

// ==================== Navigation ====================

#[tokio::test]
async fn test_next_cycles_in_config_order() {
    let config = GalleryConfig {
        visualizations: vec!["post-effect".into(), "points".into()],
        ..GalleryConfig::default()
    };
    let (mut gallery, _clock) = gallery(&config);
    gallery.next().await.unwrap();
    assert_eq!(gallery.active_name(), Some("post-effect"));
    gallery.next().await.unwrap();
    assert_eq!(gallery.active_name(), Some("points"));
    gallery.next().await.unwrap();
    assert_eq!(gallery.active_name(), Some("post-effect"));
}

#[tokio::test]
async fn test_next_skips_visualization_that_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let shaders = dir.path().join("shaders");
    std::fs::create_dir_all(&shaders).unwrap();
    std::fs::write(
        shaders.join("points.vert"),
        "#version 300 es\n#error broken on purpose\nvoid main() {}\n",
    )
    .unwrap();
    let config = GalleryConfig {
        asset_root: Some(dir.path().to_path_buf()),
        visualizations: vec!["points".into(), "curl-noise".into()],
        ..GalleryConfig::default()
    };
    let (mut gallery, clock) = gallery(&config);

    let err = gallery.show("points").await.unwrap_err();
    assert!(matches!(err, GalleryError::Load { ref name, .. } if name == "points"));
    assert_eq!(gpu(&gallery).live_objects(), 0);
    assert!(gallery.active_name().is_none());

    gallery.next().await.unwrap();
    assert_eq!(gallery.active_name(), Some("curl-noise"));
    tick(&mut gallery, &clock, 2);
    assert_no_gpu_errors(&gallery);
}

#[tokio::test]
async fn test_unknown_visualization_is_a_config_error() {
    let (mut gallery, _clock) = gallery(&GalleryConfig::default());
    let err = gallery.show("lava-lamp").await.unwrap_err();
    assert!(matches!(
        err,
        GalleryError::Config(ConfigError::UnknownVisualization { .. })
    ));
}

#[tokio::test]
async fn test_empty_gallery() {
    let config = GalleryConfig {
        visualizations: Vec::new(),
        ..GalleryConfig::default()
    };
    let (mut gallery, _clock) = gallery(&config);
    assert!(matches!(gallery.next().await, Err(GalleryError::Empty)));
}
