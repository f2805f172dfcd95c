mod common;

use std::sync::Arc;

use sonotrace::sim::TraceWarning;
use sonotrace::{
    AcousticError, AcousticGeometry, AcousticMaterial, AcousticRayTracer, CancellationToken,
    ChannelLayout, ListenerOrientation, Point, TracingParameters,
};

use common::{concrete_room, shoebox};

fn quick_params() -> TracingParameters {
    let mut params = TracingParameters::new();
    params.num_rays = 1500;
    params.max_bounces = 8;
    params.ir_duration = 1.0;
    params.sample_rate = 16_000.0;
    params
}

#[test]
fn test_direct_only_without_bounces() {
    let mut params = TracingParameters::new();
    params.max_bounces = 0;
    let fs = params.sample_rate;
    let mut tracer = concrete_room(params);

    let source = Point::new(2.0, 1.5, 2.0);
    let listener = Point::new(6.0, 1.5, 2.0);
    let outcome = tracer
        .trace_impulse_response(source, listener, ListenerOrientation::default())
        .unwrap();
    let ir = &outcome.impulse_response;

    let expected = 4.0 / 343.0 * fs;
    let peak = ir.peak_sample(0).unwrap() as f64;
    assert!((peak - expected).abs() <= 1.0, "peak at {peak}, expected {expected}");

    // Every other sample is silent
    let peak_value = ir.peak();
    let others = ir.channels[0]
        .iter()
        .enumerate()
        .filter(|(i, _)| (*i as f64 - expected).abs() > 1.0)
        .fold(0.0_f64, |acc, (_, s)| acc.max(s.abs()));
    assert!(others <= 1e-9 * peak_value);
    assert_eq!(outcome.summary.rays_traced, 0);
}

#[test]
fn test_empty_scene_is_free_field() {
    let mut tracer = AcousticRayTracer::new(quick_params()).unwrap();
    let source = Point::new(0.0, 0.0, 0.0);
    let listener = Point::new(3.43, 0.0, 0.0);
    let outcome = tracer
        .trace_impulse_response(source, listener, ListenerOrientation::default())
        .unwrap();

    assert!(outcome.summary.has_warning(|w| *w == TraceWarning::StaleStructure));
    let ir = &outcome.impulse_response;
    assert_eq!(ir.peak_sample(0), Some(160));
    assert!((ir.direct_path_delay.unwrap() - 0.01).abs() < 1e-12);

    // Out of range: silence
    let mut params = quick_params();
    params.max_trace_distance = 2.0;
    tracer.set_tracing_parameters(params).unwrap();
    let outcome = tracer
        .trace_impulse_response(source, listener, ListenerOrientation::default())
        .unwrap();
    assert!(outcome.impulse_response.is_silent());
    assert!(outcome.impulse_response.direct_path_delay.is_none());
}

#[test]
fn test_same_seed_same_response() {
    let source = Point::new(5.0, 1.5, 5.0);
    let listener = Point::new(5.0, 1.5, 2.5);
    let mut params = quick_params();
    params.channel_layout = ChannelLayout::Stereo;
    params.thread_count = 3;

    let mut a = concrete_room(params.clone());
    params.thread_count = 1;
    let mut b = concrete_room(params.clone());
    let ir_a = a
        .trace_impulse_response(source, listener, ListenerOrientation::default())
        .unwrap()
        .impulse_response;
    let ir_b = b
        .trace_impulse_response(source, listener, ListenerOrientation::default())
        .unwrap()
        .impulse_response;
    assert_eq!(ir_a.channels, ir_b.channels);
    assert_eq!(ir_a.band_energy, ir_b.band_energy);

    // Another seed gives another stochastic tail
    params.seed += 1;
    let mut c = concrete_room(params);
    let ir_c = c
        .trace_impulse_response(source, listener, ListenerOrientation::default())
        .unwrap()
        .impulse_response;
    assert_ne!(ir_a.channels, ir_c.channels);
}

#[test]
fn test_concrete_room_rt60_is_plausible() {
    let mut params = TracingParameters::new();
    params.num_rays = 5000;
    params.max_bounces = 10;
    let mut tracer = concrete_room(params);

    let outcome = tracer
        .trace_impulse_response(
            Point::new(5.0, 1.5, 5.0),
            Point::new(5.0, 1.5, 2.5),
            ListenerOrientation::default(),
        )
        .unwrap();
    let rt60 = outcome.impulse_response.estimated_rt60.unwrap();
    assert!((0.3..=1.2).contains(&rt60), "RT60 {rt60}");
    assert!(outcome.summary.stats.listener_captures > 0);
    assert!(tracer.stats().average_bounces() > 1.0);

    let report = outcome.impulse_response.compute_diagnostics();
    assert_eq!(report.frequencies.len(), 7);
    assert!(report.to_json().unwrap().contains("estimated_rt60"));
}

#[test]
fn test_decay_curve_never_rises() {
    let mut tracer = concrete_room(quick_params());
    let outcome = tracer
        .trace_impulse_response(
            Point::new(3.0, 1.2, 7.0),
            Point::new(7.5, 1.6, 2.0),
            ListenerOrientation::default(),
        )
        .unwrap();
    let edc = &outcome.impulse_response.energy_decay_curve;
    assert!(edc.len() > 100);
    assert!(edc[0].abs() < 1e-9);
    for w in edc.windows(2) {
        assert!(w[1] <= w[0] + 1e-9);
    }
}

#[test]
fn test_lossless_box_keeps_energy_until_bounce_limit() {
    let mut params = quick_params();
    params.enable_air_absorption = false;
    params.enable_transmission = false;
    params.num_rays = 200;
    params.max_bounces = 5;
    let bands = params.band_count();
    let mirror = Arc::new(AcousticMaterial::uniform("mirror", bands, 0.0, 0.0));
    let mut tracer = AcousticRayTracer::new(params).unwrap();
    tracer.set_scene_geometry(shoebox(4.0, 3.0, 5.0, mirror)).unwrap();
    tracer.build_acceleration_structure();

    let batch = tracer
        .trace_rays_from_source(Point::new(1.0, 1.0, 1.0), 200)
        .unwrap();
    assert_eq!(batch.stats.rays_traced, 200);
    assert_eq!(batch.stats.rays_escaped, 0);
    assert_eq!(batch.stats.total_bounces, 200 * 5);
}

#[test]
fn test_band_mismatch_is_rejected() {
    let params = quick_params();
    let wrong = Arc::new(AcousticMaterial::uniform("wrong", 3, 0.1, 0.1));
    let mut tracer = AcousticRayTracer::new(params).unwrap();
    let geometry = vec![AcousticGeometry::sphere(Point::new(0.0, 0.0, 0.0), 1.0, wrong)];
    assert!(matches!(
        tracer.set_scene_geometry(geometry),
        Err(AcousticError::Configuration(_))
    ));

    let mut params = quick_params();
    params.num_rays = 0;
    assert!(AcousticRayTracer::new(params).is_err());
}

#[test]
fn test_cancelled_trace_reports_progress() {
    let mut tracer = concrete_room(quick_params());
    let token = CancellationToken::new();
    token.cancel();
    let result = tracer.trace_impulse_response_with_cancel(
        Point::new(5.0, 1.5, 5.0),
        Point::new(5.0, 1.5, 2.5),
        ListenerOrientation::default(),
        &token,
    );
    match result {
        Err(AcousticError::Cancelled { rays_completed }) => assert!(rays_completed < 1500),
        other => panic!("expected cancellation, got {other:?}"),
    }

    token.reset();
    assert!(
        tracer
            .trace_impulse_response_with_cancel(
                Point::new(5.0, 1.5, 5.0),
                Point::new(5.0, 1.5, 2.5),
                ListenerOrientation::default(),
                &token,
            )
            .is_ok()
    );
}
