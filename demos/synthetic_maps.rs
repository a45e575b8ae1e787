use chrono::{Local, NaiveDate};
use env_logger::Builder;
use log::info;
use mosgim::{
    base::{InversionSettingsBuilder, TecObs, TecObsSeries},
    maps::{calculate_maps, calculate_maps_with},
    methods::{GaussianNoise, simulate_rhs, solve_weights},
};
use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::{f64::consts::TAU, fs::create_dir_all, io::prelude::*, path::Path};

fn main() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S.%f"),
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .init();

    let settings = InversionSettingsBuilder::<f64>::default()
        .y_order(6)
        .y_degree(6)
        .number_time_steps(12)
        .nworkers(4)
        .memory_per_worker(1)
        .chunk_rows_per_gb(5000)
        .build()
        .unwrap();

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);

    // Slowly drifting ground truth, one coefficient block per time slice.
    let n_coefs = settings.n_coefs();
    let base = DVector::<f64>::from_iterator(
        n_coefs,
        (0..n_coefs).map(|idx| {
            if idx == 0 {
                40.0
            } else {
                rng.random_range(-4.0..4.0) / (1.0 + idx as f64).sqrt()
            }
        }),
    );

    let truth = DVector::from_iterator(
        settings.n_unknowns(),
        (0..settings.slices()).flat_map(|slice| {
            let scale = 1.0 + 0.02 * slice as f64;

            base.iter().map(move |value| value * scale).collect::<Vec<_>>()
        }),
    );

    let window = settings.window();
    let lag = settings.bin_width() / 4.0;

    let geometry: TecObsSeries<f64> = (0..20000)
        .map(|_| {
            let time = rng.random_range(lag..window);

            TecObs {
                time,
                mlt: rng.random_range(0.0..TAU),
                mcolat: rng.random_range(0.1..3.0),
                el: rng.random_range(0.25..1.5),
                time_ref: time - rng.random_range(0.0..lag),
                mlt_ref: rng.random_range(0.0..TAU),
                mcolat_ref: rng.random_range(0.1..3.0),
                el_ref: rng.random_range(0.25..1.5),
                rhs: 0.0,
            }
        })
        .collect();

    let noise = GaussianNoise::new(settings.sigma0, 7);

    let rhs = simulate_rhs(&truth, &geometry, &settings).unwrap();
    let rhs = noise.apply(&rhs, &geometry);

    let series = geometry.with_rhs(rhs.as_slice().to_vec()).unwrap();

    info!("synthesized {} observations", series.len());

    let result = solve_weights(&series, &settings).unwrap();

    info!(
        "coefficient rms error: {:.4} TECU",
        ((&result.res - &truth).norm_squared() / truth.len() as f64).sqrt()
    );

    let date = NaiveDate::from_ymd_opt(2017, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();

    let maps = calculate_maps(&result, "mdip", &date, &settings).unwrap();
    let reference = calculate_maps_with(
        &truth,
        &mosgim::coords::MagneticCoordType::Mdip,
        &date,
        &settings,
    )
    .unwrap();

    for (key, map) in maps.iter() {
        info!(
            "{}: max abs deviation {:.3} TECU",
            key,
            (map - &reference[key]).amax()
        );
    }

    let path = Path::new("output");

    create_dir_all(path).unwrap();

    settings.save(path.join("settings.json5")).unwrap();
    result.save(path.join("result.json5")).unwrap();

    let mut file = std::fs::File::create(path.join("maps.json5")).unwrap();

    file.write_all(serde_json5::to_string(&maps).unwrap().as_bytes())
        .unwrap();
}
