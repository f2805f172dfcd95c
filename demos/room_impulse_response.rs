use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use sonotrace::{
    AcousticGeometry, AcousticMaterial, AcousticRayTracer, ChannelLayout, ListenerOrientation,
    Point, TracingParameters,
};

/// Six quads spanning `[0, lx] x [0, ly] x [0, lz]`.
fn shoebox(lx: f64, ly: f64, lz: f64, material: Arc<AcousticMaterial>) -> Vec<AcousticGeometry> {
    let p = Point::new;
    [
        [p(0.0, 0.0, 0.0), p(lx, 0.0, 0.0), p(lx, ly, 0.0), p(0.0, ly, 0.0)],
        [p(0.0, 0.0, lz), p(0.0, ly, lz), p(lx, ly, lz), p(lx, 0.0, lz)],
        [p(0.0, 0.0, 0.0), p(0.0, 0.0, lz), p(lx, 0.0, lz), p(lx, 0.0, 0.0)],
        [p(0.0, ly, 0.0), p(lx, ly, 0.0), p(lx, ly, lz), p(0.0, ly, lz)],
        [p(0.0, 0.0, 0.0), p(0.0, ly, 0.0), p(0.0, ly, lz), p(0.0, 0.0, lz)],
        [p(lx, 0.0, 0.0), p(lx, 0.0, lz), p(lx, ly, lz), p(lx, ly, 0.0)],
    ]
    .into_iter()
    .map(|q| AcousticGeometry::quad(q, Arc::clone(&material)))
    .collect()
}

fn fmt_opt(v: Option<f64>, unit: &str) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}{unit}"))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("Impulse response of a 10 x 3 x 10 m concrete room.");

    let mut params = TracingParameters::new();
    params.num_rays = 5000;
    params.max_bounces = 10;
    params.channel_layout = ChannelLayout::Stereo;

    let concrete = Arc::new(AcousticMaterial::concrete(&params.bands));
    let mut tracer = AcousticRayTracer::new(params)?;

    let t_setup = Instant::now();
    let warnings = tracer.set_scene_geometry(shoebox(10.0, 3.0, 10.0, concrete))?;
    for w in &warnings {
        println!("Scene warning: {w}");
    }
    let build = tracer.build_acceleration_structure();
    println!(
        "Setup time: {:.3}s (structure {:.3}s)",
        t_setup.elapsed().as_secs_f64(),
        build.as_secs_f64()
    );

    let source = Point::new(5.0, 1.5, 5.0);
    let listener = Point::new(5.0, 1.5, 2.5);
    let t_trace = Instant::now();
    let outcome = tracer.trace_impulse_response(source, listener, ListenerOrientation::default())?;
    println!("Trace time: {:.3}s", t_trace.elapsed().as_secs_f64());

    let ir = &outcome.impulse_response;
    let stats = tracer.stats();
    println!(
        "{} rays, {} listener captures, {:.1} bounces per ray, {:.0} rays/s",
        outcome.summary.rays_traced,
        stats.listener_captures,
        stats.average_bounces(),
        stats.rays_per_second()
    );
    println!(
        "IR: {} channels x {} samples at {} Hz",
        ir.channel_count(),
        ir.len(),
        ir.sample_rate
    );
    if let Some(delay) = ir.direct_path_delay {
        println!("Direct path: {:.2} ms", delay * 1e3);
    }
    println!("Estimated RT60: {}", fmt_opt(ir.estimated_rt60, " s"));

    let report = ir.compute_diagnostics();
    println!("\n{:>8} {:>9} {:>9} {:>9} {:>9} {:>9}", "Hz", "RT60", "stat.", "EDT", "C80", "D50");
    for (b, f) in report.frequencies.iter().enumerate() {
        println!(
            "{:>8.0} {:>9} {:>9} {:>9} {:>9} {:>9}",
            f,
            fmt_opt(report.rt60[b], "s"),
            fmt_opt(report.statistical_rt60[b], "s"),
            fmt_opt(report.edt[b], "s"),
            fmt_opt(report.c80[b], "dB"),
            fmt_opt(report.d50[b], ""),
        );
    }

    for w in &outcome.summary.warnings {
        println!("Warning: {w}");
    }
    Ok(())
}
