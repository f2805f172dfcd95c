//! Image-source early reflections.
//!
//! The source is mirrored recursively over every planar face. Each image is
//! validated by walking back from the listener: every reflection point must
//! lie inside its face and every leg must be unobstructed.

use log::debug;

use crate::Point;
use crate::sim::diagnostics::QueryCounters;
use crate::sim::rays::RayKind;

use super::absorption::surface_response;
use super::{ListenerCapture, TraceContext, clear_between};

/// Result of an image-source pass.
#[derive(Debug, Clone, Default)]
pub struct ImageSourceResult {
    pub captures: Vec<ListenerCapture>,
    /// Images generated, valid or not.
    pub evaluated: u64,
    /// Enumeration stopped at `max_image_sources`.
    pub limit_reached: bool,
}

#[derive(Debug, Clone)]
struct ImageSource {
    position: Point,
    /// Face indices in reflection order, source side first.
    faces: Vec<usize>,
    /// Mirror images after each reflection of `faces`.
    chain: Vec<Point>,
}

/// Enumerates specular paths up to `max_order` reflections.
pub fn calculate_early_reflections(
    ctx: &TraceContext,
    source: Point,
    listener: Point,
    max_order: usize,
    counters: &mut QueryCounters,
) -> ImageSourceResult {
    let mut result = ImageSourceResult::default();
    let faces = &ctx.scene.faces;
    if faces.is_empty() || max_order == 0 {
        return result;
    }
    let limit = ctx.params.max_image_sources;

    let mut generation = vec![ImageSource {
        position: source,
        faces: Vec::new(),
        chain: Vec::new(),
    }];
    'orders: for _order in 1..=max_order {
        let mut next = Vec::new();
        for parent in &generation {
            for (fi, face) in faces.iter().enumerate() {
                if parent.faces.last() == Some(&fi) {
                    continue;
                }
                // Images on the mirror plane produce no reflection
                if face.signed_distance(parent.position).abs() < 1e-9 {
                    continue;
                }
                if result.evaluated as usize >= limit {
                    result.limit_reached = true;
                    break 'orders;
                }
                result.evaluated += 1;
                let position = face.mirror(parent.position);
                let mut image = ImageSource {
                    position,
                    faces: parent.faces.clone(),
                    chain: parent.chain.clone(),
                };
                image.faces.push(fi);
                image.chain.push(position);
                if let Some(capture) = validate(ctx, &image, source, listener, counters) {
                    result.captures.push(capture);
                }
                next.push(image);
            }
        }
        generation = next;
    }
    if result.limit_reached {
        debug!("Image-source enumeration capped at {limit}");
    }
    result
}

/// Walks back from the listener and builds the arrival if the path is valid.
fn validate(
    ctx: &TraceContext,
    image: &ImageSource,
    source: Point,
    listener: Point,
    counters: &mut QueryCounters,
) -> Option<ListenerCapture> {
    let faces = &ctx.scene.faces;
    let length = listener.distance(&image.position);
    if length > ctx.params.max_trace_distance {
        return None;
    }

    // Reflection points, listener side first
    let mut points = Vec::with_capacity(image.faces.len());
    let mut target = listener;
    for (k, &fi) in image.faces.iter().enumerate().rev() {
        let face = &faces[fi];
        let pt = face.segment_plane_point(target, image.chain[k])?;
        if !face.contains(pt) {
            return None;
        }
        points.push(pt);
        target = pt;
    }
    points.reverse();

    // Every leg must be clear of other geometry
    let mut prev = source;
    for &pt in points.iter().chain(std::iter::once(&listener)) {
        if !clear_between(ctx.scene, prev, pt, counters) {
            return None;
        }
        prev = pt;
    }

    // Surface losses along the path
    let band_count = ctx.band_count();
    let mut factors = vec![1.0; band_count];
    let mut prev = source;
    for (&fi, &pt) in image.faces.iter().zip(&points) {
        let face = &faces[fi];
        let material = &ctx.scene.geometry[face.geometry].material;
        let cos_incidence = (pt - prev)
            .normalize()
            .map_or(1.0, |d| d.dot(face.normal).abs());
        let response = surface_response(
            &ctx.absorption,
            material,
            band_count,
            cos_incidence,
            ctx.params.enable_transmission,
        );
        // Only the specular share follows the mirror path
        let specular = if ctx.params.enable_scattering {
            1.0 - material.mean_scattering()
        } else {
            1.0
        };
        for (f, kept) in factors.iter_mut().zip(&response.reflected) {
            *f *= kept * specular;
        }
        prev = pt;
    }

    let last = *points.last()?;
    let mut capture = ListenerCapture::deterministic(
        RayKind::EarlyReflection,
        length,
        ctx.params.speed_of_sound,
        ctx.path_energy(length, Some(&factors)),
        last,
        listener,
    );
    capture.first_point = points[0];
    Some(capture)
}
