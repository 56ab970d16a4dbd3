use ndarray::Array2;
use snaphu::core::wrap_phase;
use snaphu::{unwrap, CostMode, IgramSample, InitMethod, Interferogram, RealRaster, UnwrapConfig, Unwrapper};
use std::f64::consts::PI;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Diagonal ramp `π·x·y` over x, y in [-3, 3] with about 8 fringes
fn diagonal_ramp(size: usize) -> Array2<f64> {
    let step = 6.0 / (size - 1) as f64;
    Array2::from_shape_fn((size, size), |(r, c)| {
        let y = -3.0 + step * r as f64;
        let x = -3.0 + step * c as f64;
        PI * x * y
    })
}

fn interferogram(phase: &Array2<f64>) -> Interferogram {
    phase.mapv(|p| IgramSample::from_polar(1.0, p as f32))
}

/// Largest deviation from the truth after removing the nearest global
/// multiple of 2π, over pixels selected by `keep`
fn max_error(unwrapped: &RealRaster, truth: &Array2<f64>, keep: impl Fn(usize, usize) -> bool) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for ((r, c), &value) in unwrapped.indexed_iter() {
        if keep(r, c) {
            sum += value as f64 - truth[[r, c]];
            count += 1;
        }
    }
    let offset = 2.0 * PI * (sum / count as f64 / (2.0 * PI)).round();

    unwrapped
        .indexed_iter()
        .filter(|((r, c), _)| keep(*r, *c))
        .map(|((r, c), &value)| (value as f64 - truth[[r, c]] - offset).abs())
        .fold(0.0, f64::max)
}

#[test]
fn test_unwrapped_phase_all_modes() {
    init_logging();
    let phase = diagonal_ramp(512);
    let igram = interferogram(&phase);
    let corr = Array2::from_elem(igram.dim(), 1.0f32);

    for cost in CostMode::ALL {
        for init in InitMethod::ALL {
            let (unw, labels) = unwrap(&igram, &corr, 1.0, None, cost, init).expect("unwrap failed");
            assert_eq!(unw.dim(), (512, 512));
            let error = max_error(&unw, &phase, |_, _| true);
            assert!(error < 1e-3, "cost={} init={} error={}", cost, init, error);
            assert!(labels.iter().all(|&l| l == 1));
        }
    }
}

#[test]
fn test_mask() {
    init_logging();
    let phase = diagonal_ramp(512);
    let igram = interferogram(&phase);
    let corr = Array2::from_elem(igram.dim(), 1.0f32);
    let mask = Array2::from_shape_fn(igram.dim(), |(r, _)| (128..384).contains(&r));

    let (unw, labels) = unwrap(&igram, &corr, 1.0, Some(&mask), CostMode::Smooth, InitMethod::Mcf)
        .expect("unwrap failed");

    let error = max_error(&unw, &phase, |r, c| mask[[r, c]]);
    assert!(error < 1e-3, "error={}", error);
    assert_eq!(labels, mask.mapv(u32::from));

    // invalid pixels keep their wrapped phase
    let wrapped = wrap_phase(igram[[0, 0]].arg());
    assert_eq!(unw[[0, 0]], wrapped);
}

#[test]
fn test_unwrapper_reports_stats() {
    init_logging();
    let phase = diagonal_ramp(64);
    let igram = interferogram(&phase);
    let corr = Array2::from_elem(igram.dim(), 0.7f32);

    let config = UnwrapConfig::new(CostMode::Defo, InitMethod::Mst);
    let output = Unwrapper::new(config).run(&igram, &corr, 5.0, None).expect("unwrap failed");

    assert!(output.converged);
    assert_eq!(output.stats.residues, 0);
    assert_eq!(output.stats.cycles_canceled, 0);
    assert_eq!(output.stats.tiles, 1);
    assert_eq!(output.components.len(), 1);
    assert!(max_error(&output.unwrapped, &phase, |_, _| true) < 1e-3);
}

#[test]
fn test_empty_raster() {
    let igram: Interferogram = Array2::zeros((0, 0));
    let corr: RealRaster = Array2::zeros((0, 0));
    let (unw, labels) = unwrap(&igram, &corr, 1.0, None, CostMode::Smooth, InitMethod::Mcf).expect("unwrap failed");
    assert_eq!(unw.dim(), (0, 0));
    assert_eq!(labels.dim(), (0, 0));
}
