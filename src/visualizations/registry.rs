//! Visualization factory.

use super::{CurlNoise, FeedbackParticles, Points, PostEffect, Visualization, VisualizationKind};

/// Create a visualization instance from its kind.
///
/// # Example
/// ```
/// use shaderart::visualizations::{create_visualization, VisualizationKind};
///
/// let vis = create_visualization(VisualizationKind::CurlNoise);
/// assert_eq!(vis.name(), "curl-noise");
/// ```
pub fn create_visualization(kind: VisualizationKind) -> Box<dyn Visualization> {
    match kind {
        VisualizationKind::Points => Box::new(Points::new()),
        VisualizationKind::FeedbackParticles => Box::new(FeedbackParticles::new()),
        VisualizationKind::CurlNoise => Box::new(CurlNoise::new()),
        VisualizationKind::PostEffect => Box::new(PostEffect::new()),
    }
}
