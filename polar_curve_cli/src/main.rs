use std::fs::{self, File};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use polar_curve::table::{group_by_tws, read_table, write_table};
use polar_curve::voyage::{extract_observations, parse_voyages, DEFAULT_EXCLUSION_MINUTES};
use polar_curve::{
    compute_polars, logbook, spline, BandSet, CurvePoint, MirrorMode, Observation, Params,
    PolarCurves, SplineParams,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sailing polar diagram CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build polar curves per wind band from logbook voyages
    Polar(PolarArgs),
    /// Fit smooth spline curves to an existing polar table
    Smooth(SmoothArgs),
    /// Merge successive course change entries in YAML logbooks
    MergeCourses(MergeArgs),
}

#[derive(Parser, Debug)]
struct PolarArgs {
    /// voyages.json files exported from the logbook
    #[arg(long = "voyages-file", default_value = "public/voyages.json", value_hint = ValueHint::FilePath)]
    voyages_files: Vec<PathBuf>,

    /// Output PNG polar diagram
    #[arg(short, long, default_value = "polar_diagram.png", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional SVG polar diagram
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Tab-separated polar table output
    #[arg(long, default_value = "polar.txt", value_hint = ValueHint::FilePath)]
    text_output: PathBuf,

    /// Disable diagram rendering
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Angle bin size in degrees
    #[arg(long, default_value_t = 10)]
    bin_size: u32,

    /// Percentile of speed samples per bin (0-100)
    #[arg(long, default_value_t = 80.0)]
    percentile: f64,

    /// Minimum samples per bin to include it in the curve
    #[arg(long, default_value_t = 3)]
    min_samples: usize,

    /// Moving-average half width in points (0 disables smoothing)
    #[arg(long, default_value_t = 2)]
    window: usize,

    /// Skip entries this many minutes from voyage start/end
    #[arg(long, default_value_t = DEFAULT_EXCLUSION_MINUTES)]
    exclusion_minutes: i64,

    /// Treat input angles as already covering both tacks
    #[arg(long, action = ArgAction::SetTrue)]
    no_mirror: bool,

    /// Fit a B-spline to each band curve for the diagram
    #[arg(long, action = ArgAction::SetTrue)]
    spline: bool,

    /// Spline degree
    #[arg(long, default_value_t = 3)]
    degree: usize,

    /// Spline control point count
    #[arg(long, default_value_t = 5)]
    control_points: usize,

    /// JSON file overriding the wind bands
    #[arg(long, value_hint = ValueHint::FilePath)]
    bands: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct SmoothArgs {
    /// Polar table produced by `polar`
    #[arg(default_value = "polar.txt", value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Dense curve CSV (`-` for stdout)
    #[arg(short, long, default_value = "polar_smooth.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional PNG diagram of the smoothed curves
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Spline degree
    #[arg(long, default_value_t = 3)]
    degree: usize,

    /// Spline control point count
    #[arg(long, default_value_t = 5)]
    control_points: usize,

    /// Resampled points per curve
    #[arg(long, default_value_t = 200)]
    resolution: usize,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct MergeArgs {
    /// YAML logbook file, or a directory of *.yml files
    #[arg(value_hint = ValueHint::AnyPath)]
    input: PathBuf,

    /// Output file (single-file mode)
    #[arg(value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Overwrite the source files atomically
    #[arg(long, action = ArgAction::SetTrue)]
    inplace: bool,

    /// Output directory (directory mode, default `<dir>/merged`)
    #[arg(long, value_hint = ValueHint::DirPath)]
    out_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Polar(args) => args.verbose,
        Command::Smooth(args) => args.verbose,
        Command::MergeCourses(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Polar(args) => handle_polar(args),
        Command::Smooth(args) => handle_smooth(args),
        Command::MergeCourses(args) => handle_merge(args),
    }
}

fn build_params(args: &PolarArgs) -> Result<Params> {
    let mut params = Params::default();
    params.bin_size = args.bin_size;
    params.percentile = args.percentile;
    params.min_samples = args.min_samples;
    params.smoothing_window = args.window;
    if args.no_mirror {
        params.mirror = MirrorMode::PreMirrored;
    }
    if args.spline {
        params.spline = Some(SplineParams {
            degree: args.degree,
            control_count: args.control_points,
            ..SplineParams::default()
        });
    }
    if let Some(path) = args.bands.as_ref() {
        params.bands = load_band_file(path)?;
    }
    params.validate()?;
    Ok(params)
}

fn load_band_file(path: &Path) -> Result<BandSet> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read band file {}", path.display()))?;
    let bands: BandSet = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid band list", path.display()))?;
    if bands.is_empty() {
        warn!("Band file {} defines no bands", path.display());
    }
    Ok(bands)
}

fn handle_polar(args: PolarArgs) -> Result<()> {
    if args.voyages_files.is_empty() {
        return Err(anyhow!("no voyages files supplied"));
    }
    let params = build_params(&args)?;
    let exclusion = chrono::Duration::minutes(args.exclusion_minutes.max(0));

    let t_parse = Instant::now();
    let observations: Vec<Observation> = args
        .voyages_files
        .par_iter()
        .map(|path| -> Result<Vec<Observation>> {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let log = parse_voyages(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(extract_observations(&log, exclusion))
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();
    if args.profile || args.verbose {
        info!(
            "Parse stage: {:.1} ms ({} observations)",
            t_parse.elapsed().as_secs_f64() * 1000.0,
            observations.len()
        );
    }

    let t_compute = Instant::now();
    let curves = compute_polars(&observations, &params)?;
    if args.profile || args.verbose {
        info!(
            "Compute stage: {:.1} ms",
            t_compute.elapsed().as_secs_f64() * 1000.0
        );
    }
    for band in &curves.bands {
        debug!(
            "{}: {} samples, {} curve points, spline {}",
            band.band.label,
            band.samples.len(),
            band.points.len(),
            if band.spline.is_some() { "fitted" } else { "none" }
        );
    }
    if curves.sample_count() == 0 {
        return Err(anyhow!(
            "No sailing samples found with the provided filters."
        ));
    }

    write_polar_table(&curves, &params, &args.text_output)?;
    info!("Polar table saved to {}", args.text_output.display());

    if !args.no_plot {
        let series = band_series(&curves, params.percentile);
        let title = "Sailing Polar Diagram by True Wind Speed";
        let t_plot = Instant::now();
        match render_chart_guard(&series, title, &args.output, ChartKind::Png) {
            Ok(()) => info!("Polar diagram saved to {}", args.output.display()),
            Err(err) => warn!("Skipping PNG render ({}): {}", args.output.display(), err),
        }
        if let Some(path) = args.svg.as_ref() {
            match render_chart_guard(&series, title, path, ChartKind::Svg) {
                Ok(()) => info!("Polar diagram saved to {}", path.display()),
                Err(err) => warn!("Skipping SVG render ({}): {}", path.display(), err),
            }
        }
        if args.profile || args.verbose {
            info!(
                "Plot stage: {:.1} ms",
                t_plot.elapsed().as_secs_f64() * 1000.0
            );
        }
    }
    Ok(())
}

fn write_polar_table(curves: &PolarCurves, params: &Params, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let rows = curves.table(params);
    write_table(&rows, &params.report_angles, file)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn handle_smooth(args: SmoothArgs) -> Result<()> {
    let spline_params = SplineParams {
        degree: args.degree,
        control_count: args.control_points,
        resolution: args.resolution,
    };
    spline_params.validate()?;

    let file = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let samples =
        read_table(file).with_context(|| format!("failed to parse {}", args.input.display()))?;
    let rows = group_by_tws(&samples);
    if rows.is_empty() {
        return Err(anyhow!("{} contains no speed values", args.input.display()));
    }

    let curves: Vec<SmoothedRow> = rows
        .into_iter()
        .map(|(tws, points)| match spline::resample_curve(&points, &spline_params) {
            Some(dense) => SmoothedRow {
                tws,
                points: dense,
                fitted: true,
            },
            None => {
                warn!("TWS {:.1}: no spline fit, keeping table points", tws);
                SmoothedRow {
                    tws,
                    points,
                    fitted: false,
                }
            }
        })
        .collect();

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        write_smoothed_rows(&curves, stdout.lock())?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        write_smoothed_rows(&curves, file)?;
        info!("Wrote smoothed curves: {}", args.output.display());
    }

    if let Some(path) = args.png.as_ref() {
        let series: Vec<PolarSeries> = curves
            .iter()
            .map(|row| PolarSeries {
                label: format!("TWS {:.1} kn", row.tws),
                samples: Vec::new(),
                curve: row.points.iter().map(|p| (p.angle, p.speed)).collect(),
            })
            .collect();
        match render_chart_guard(&series, "Smoothed Polar Curves", path, ChartKind::Png) {
            Ok(()) => info!("Wrote plot: {}", path.display()),
            Err(err) => warn!("Skipping PNG render ({}): {}", path.display(), err),
        }
    }
    Ok(())
}

#[derive(Clone, Debug)]
struct SmoothedRow {
    tws: f64,
    points: Vec<CurvePoint>,
    fitted: bool,
}

fn write_smoothed_rows<W: Write>(rows: &[SmoothedRow], out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["tws", "twa", "stw", "fitted"])?;
    for row in rows {
        for point in &row.points {
            writer.write_record([
                format!("{:.1}", row.tws),
                format!("{:.2}", point.angle),
                format!("{:.3}", point.speed),
                row.fitted.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn handle_merge(args: MergeArgs) -> Result<()> {
    if args.input.is_dir() {
        return merge_directory(&args.input, args.out_dir.as_deref(), args.inplace);
    }
    if args.inplace {
        merge_inplace(&args.input)?;
        info!("Merged {} in place", args.input.display());
        return Ok(());
    }
    let output = args
        .output
        .as_ref()
        .ok_or_else(|| anyhow!("an output path is required unless --inplace is given"))?;
    merge_file(&args.input, output)?;
    info!("Wrote merged logbook: {}", output.display());
    Ok(())
}

fn merge_text(src: &Path) -> Result<String> {
    let text =
        fs::read_to_string(src).with_context(|| format!("failed to read {}", src.display()))?;
    logbook::merge_logbook(&text).with_context(|| format!("failed to merge {}", src.display()))
}

fn merge_file(src: &Path, dst: &Path) -> Result<()> {
    let merged = merge_text(src)?;
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(dst, merged).with_context(|| format!("failed to write {}", dst.display()))?;
    Ok(())
}

fn merge_inplace(src: &Path) -> Result<()> {
    let merged = merge_text(src)?;
    let dir = src
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(merged.as_bytes())?;
    tmp.persist(src)
        .with_context(|| format!("failed to replace {}", src.display()))?;
    Ok(())
}

fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("yml"))
        .collect();
    files.sort();
    Ok(files)
}

fn merge_directory(dir: &Path, out_dir: Option<&Path>, inplace: bool) -> Result<()> {
    let files = yaml_files(dir)?;
    if files.is_empty() {
        info!("No .yml files found in {}", dir.display());
        return Ok(());
    }
    let out_dir = if inplace {
        None
    } else {
        let out = out_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.join("merged"));
        fs::create_dir_all(&out).with_context(|| format!("failed to create {}", out.display()))?;
        Some(out)
    };

    let mut processed = 0usize;
    let mut failed = 0usize;
    for src in &files {
        let result = match out_dir.as_ref() {
            Some(out) => match src.file_name() {
                Some(name) => merge_file(src, &out.join(name)),
                None => Err(anyhow!("{} has no file name", src.display())),
            },
            None => merge_inplace(src),
        };
        match result {
            Ok(()) => processed += 1,
            Err(err) => {
                failed += 1;
                warn!("Failed: {}: {:#}", src.display(), err);
            }
        }
    }
    info!("Processed: {}; Failed: {}", processed, failed);
    if failed > 0 {
        return Err(anyhow!("{} of {} logbooks failed to merge", failed, files.len()));
    }
    Ok(())
}

#[derive(Clone, Debug)]
struct PolarSeries {
    label: String,
    samples: Vec<(f64, f64)>,
    curve: Vec<(f64, f64)>,
}

fn band_series(curves: &PolarCurves, percentile: f64) -> Vec<PolarSeries> {
    curves
        .bands
        .iter()
        .filter(|band| !band.samples.is_empty())
        .map(|band| PolarSeries {
            label: series_label(&band.band.label, percentile),
            samples: band.samples.iter().map(|s| (s.angle, s.speed)).collect(),
            curve: if band.has_speed() {
                band.display_points()
                    .iter()
                    .map(|p| (p.angle, p.speed))
                    .collect()
            } else {
                Vec::new()
            },
        })
        .collect()
}

/// Legend text for a band curve; the percentile is truncated, not rounded.
fn series_label(band: &str, percentile: f64) -> String {
    format!("{} ({}th %ile)", band, percentile.trunc())
}

enum ChartKind {
    Png,
    Svg,
}

const BAND_COLORS: [RGBColor; 6] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

fn render_chart_guard(
    series: &[PolarSeries],
    title: &str,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        let drawn = match kind {
            ChartKind::Png => {
                let root = BitMapBackend::new(path, (1350, 1350)).into_drawing_area();
                draw_polar_chart(root, series, title)
            }
            ChartKind::Svg => {
                let root = SVGBackend::new(path, (1350, 1350)).into_drawing_area();
                draw_polar_chart(root, series, title)
            }
        };
        drawn.map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

/// Compass-style projection: 0 deg at the top, angles increasing clockwise.
fn to_xy(angle_deg: f64, radius: f64) -> (f64, f64) {
    let theta = angle_deg.to_radians();
    (radius * theta.sin(), radius * theta.cos())
}

fn ring_step(r_max: f64) -> f64 {
    match r_max {
        r if r <= 4.0 => 1.0,
        r if r <= 12.0 => 2.0,
        _ => 5.0,
    }
}

fn draw_polar_chart<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    series: &[PolarSeries],
    title: &str,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let r_max = series
        .iter()
        .flat_map(|s| s.samples.iter().chain(s.curve.iter()))
        .map(|&(_, speed)| speed)
        .filter(|v| v.is_finite())
        .fold(1.0_f64, f64::max);
    let extent = r_max * 1.12;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 28))
        .margin(25)
        .build_cartesian_2d(-extent..extent, -extent..extent)?;

    let grid = BLACK.mix(0.2);
    let label_font = FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal);
    let step = ring_step(r_max);
    let mut ring = step;
    while ring <= r_max + 1e-9 {
        chart.draw_series(LineSeries::new(
            (0..=360).map(|d| to_xy(d as f64, ring)),
            grid,
        ))?;
        chart.draw_series(std::iter::once(Text::new(
            format!("{:.0} kn", ring),
            to_xy(90.0, ring),
            label_font.clone().color(&BLACK.mix(0.7)),
        )))?;
        ring += step;
    }
    for spoke in (0..360).step_by(30) {
        let angle = spoke as f64;
        chart.draw_series(LineSeries::new(
            vec![(0.0, 0.0), to_xy(angle, r_max)],
            grid,
        ))?;
        chart.draw_series(std::iter::once(Text::new(
            format!("{}°", spoke),
            to_xy(angle, r_max * 1.05),
            label_font.clone().color(&BLACK),
        )))?;
    }

    for (idx, s) in series.iter().enumerate() {
        let color = BAND_COLORS[idx % BAND_COLORS.len()];
        if !s.samples.is_empty() {
            chart.draw_series(
                s.samples
                    .iter()
                    .map(|&(a, v)| Circle::new(to_xy(a, v), 3, color.mix(0.15).filled())),
            )?;
        }
        if s.curve.is_empty() {
            continue;
        }
        let style = ShapeStyle {
            color: color.to_rgba(),
            filled: false,
            stroke_width: 2,
        };
        chart
            .draw_series(LineSeries::new(
                s.curve.iter().map(|&(a, v)| to_xy(a, v)),
                style,
            ))?
            .label(s.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(label_font.color(&BLACK))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    root.present()?;
    Ok(())
}
