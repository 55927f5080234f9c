//! CLI binary for charleston-decoder.
//!
//! A thin shim over the library crate: maps CLI flags to `DecoderConfig`,
//! drives one `Session` through select → crop → process, and prints the
//! terminal state.

use anyhow::{Context, Result};
use clap::Parser;
use charleston_decoder::{
    price::display_price, resolve_image, write_crop, Controller, CropRectangle, DecoderConfig,
    DisplayGeometry, MapperKind, PipelineProgressCallback, PipelineState, ProgressCallback, RunId,
    Services, Session, Stage, StateKind, TempDirPreviews,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner whose message follows the current processing stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading image…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_transition(&self, _from: StateKind, to: StateKind) {
        match to {
            StateKind::Cropping => self.bar.set_message("Cropping…"),
            StateKind::Processing => self.bar.set_prefix("Decoding"),
            kind if kind.is_terminal() => self.bar.finish_and_clear(),
            _ => {}
        }
    }

    fn on_stage(&self, _run: RunId, stage: Stage) {
        self.bar.set_message(stage.label());
    }

    fn on_event_rejected(&self, event: &str, reason: &str) {
        self.bar
            .println(format!("  {} {}: {}", red("✗"), event, dim(reason)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Crop given in percent of the image (default unit)
  charleston tag.jpg --crop 35,40,30,20

  # Crop drawn in pixels on a 800x600 preview of the photo
  charleston tag.jpg --crop 280,240,240,120 --crop-unit px --display-size 800x600

  # Same, on a 2x (retina) screen
  charleston tag.jpg --crop 280,240,240,120 --crop-unit px --display-size 800x600 --pixel-ratio 2

  # Map letters locally instead of asking the model
  charleston tag.jpg --crop 35,40,30,20 --mapper cipher

  # Keep the crop that was sent for recognition
  charleston tag.jpg --crop 35,40,30,20 --save-crop crop.jpg

  # JSON report
  charleston https://example.com/tag.png --crop 0,0,100,100 --json

THE CHARLESTON CODE:
  C=1 H=2 A=3 R=4 L=5 E=6 S=7 T=8 O=9 N=0
  The last two digits are cents: CHAR → 1234 → 12.34. The final price adds
  a 10% markup.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID

EXIT STATUS:
  0  a price was decoded, or the text could not be mapped
  1  the run failed or could not start
  130  interrupted (Ctrl-C)
"#;

/// Decode Charleston-coded prices from photos of price tags.
#[derive(Parser, Debug)]
#[command(
    name = "charleston",
    version,
    about = "Decode Charleston-coded prices from photos of price tags",
    long_about = "Crop the price out of a photo, read it with a vision LLM, map the letters \
through the CHARLESTON key and print the price with a 10% markup.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image path (PNG, JPEG, GIF) or HTTP/HTTPS URL.
    input: String,

    /// Crop rectangle as X,Y,W,H.
    #[arg(long, value_parser = parse_crop)]
    crop: [f64; 4],

    /// Unit of --crop: percent of the displayed image, or displayed pixels.
    #[arg(long, value_enum, default_value = "percent")]
    crop_unit: CropUnitArg,

    /// Size the image was displayed at when the crop was drawn, as WxH.
    /// Defaults to the image's natural size.
    #[arg(long, value_parser = parse_size)]
    display_size: Option<(f64, f64)>,

    /// Device pixel ratio of the display the crop was drawn on.
    #[arg(long, default_value_t = 1.0)]
    pixel_ratio: f64,

    /// How letters become digits: ask the model, or apply the key locally.
    #[arg(long, env = "CHARLESTON_MAPPER", value_enum, default_value = "llm")]
    mapper: MapperArg,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Write the rasterised crop to this file.
    #[arg(long)]
    save_crop: Option<PathBuf>,

    /// Write previews of the image and crop to a temp directory while running.
    #[arg(long)]
    previews: bool,

    /// Smallest accepted crop side, in displayed pixels.
    #[arg(long, env = "CHARLESTON_MIN_CROP", default_value_t = 20.0)]
    min_crop: f64,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "CHARLESTON_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max LLM output tokens per call.
    #[arg(long, env = "CHARLESTON_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// Transport retries per LLM call.
    #[arg(long, env = "CHARLESTON_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "CHARLESTON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "CHARLESTON_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Output the final state as JSON.
    #[arg(long, env = "CHARLESTON_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "CHARLESTON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CHARLESTON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except the result and errors.
    #[arg(short, long, env = "CHARLESTON_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum CropUnitArg {
    Percent,
    Px,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MapperArg {
    Llm,
    Cipher,
}

impl From<MapperArg> for MapperKind {
    fn from(v: MapperArg) -> Self {
        match v {
            MapperArg::Llm => MapperKind::Llm,
            MapperArg::Cipher => MapperKind::Cipher,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides all the feedback that matters; keep library logs
    // quiet while it is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;
    let services = Services::from_config(&config).context("Failed to set up the LLM provider")?;

    let source = resolve_image(&cli.input, config.download_timeout_secs)
        .await
        .context("Failed to load image")?;

    let display = match cli.display_size {
        Some((w, h)) => DisplayGeometry::new(w, h),
        None => DisplayGeometry::natural(&source),
    }
    .with_pixel_ratio(cli.pixel_ratio);
    let [x, y, w, h] = cli.crop;
    let crop = match cli.crop_unit {
        CropUnitArg::Percent => CropRectangle::percent(x, y, w, h),
        CropUnitArg::Px => CropRectangle::pixels(x, y, w, h),
    };

    let mut controller = Controller::new(&config);
    let previews = if cli.previews {
        let host = Arc::new(TempDirPreviews::new().context("Failed to create preview directory")?);
        controller = controller.with_preview_host(host.clone());
        Some(host)
    } else {
        None
    };

    // ── Drive the session ────────────────────────────────────────────────
    let (task, handle) = Session::spawn(controller, services);
    handle.select_image(source).await.context("Failed to select image")?;
    handle.change_crop(crop).await.context("Invalid crop")?;
    handle.confirm_crop(display).await.context("Crop rejected")?;

    if let Some(ref host) = previews {
        for path in host.paths() {
            eprintln!("{} {}", dim("preview:"), path.display());
        }
    }

    let state = if handle.state().is_terminal() {
        handle.state()
    } else {
        handle.process().await.context("Failed to start processing")?;
        let settled = tokio::select! {
            state = handle.settled() => Some(state.context("Session ended unexpectedly")?),
            _ = tokio::signal::ctrl_c() => None,
        };
        match settled {
            Some(state) => state,
            None => {
                // A late reply from the abandoned run is ignored by the controller.
                let _ = handle.reset().await;
                drop(handle);
                let _ = task.await;
                eprintln!("{} interrupted", yellow("⚠"));
                std::process::exit(130);
            }
        }
    };

    if let Some(ref path) = cli.save_crop {
        match crop_of(&state) {
            Some(raster) => write_crop(raster, path)
                .await
                .context("Failed to save crop")?,
            None => eprintln!("{} no crop to save", yellow("⚠")),
        }
    }

    // Release previews before reporting.
    drop(handle);
    let _ = task.await;

    report(&cli, &state)?;

    if let PipelineState::Error { failure, .. } = &state {
        anyhow::bail!("{}", failure);
    }
    Ok(())
}

/// Map CLI args to `DecoderConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DecoderConfig> {
    let mut builder = DecoderConfig::builder()
        .mapper(cli.mapper.into())
        .min_crop_dimension(cli.min_crop)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn crop_of(state: &PipelineState) -> Option<&charleston_decoder::RasterizedCrop> {
    match state {
        PipelineState::ReadyToProcess { crop, .. } => Some(crop),
        PipelineState::Results(r) => Some(&r.crop),
        PipelineState::Processing { artifacts, .. }
        | PipelineState::NoMappingPossible { artifacts, .. }
        | PipelineState::Error { artifacts, .. } => artifacts.crop.as_ref(),
        _ => None,
    }
}

/// Print the terminal state to stdout.
fn report(cli: &Cli, state: &PipelineState) -> Result<()> {
    let report = state.report();
    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
        return Ok(());
    }

    let message = report.message.clone().unwrap_or_default();
    match state {
        PipelineState::Results(_) => println!("{} {}", green("✔"), bold(&message)),
        PipelineState::NoMappingPossible { .. } => println!("{} {}", yellow("⚠"), message),
        _ => println!("{} {}", red("✘"), message),
    }
    if let Some(ref text) = report.extracted_text {
        println!("   Text:         {}", text);
    }
    if let Some(ref code) = report.numerical_code {
        println!("   Code:         {}", code);
    }
    if let Some(price) = report.original_price {
        println!("   Price:        {}", display_price(price));
    }
    if let Some(price) = report.final_price {
        println!("   With markup:  {}", bold(&display_price(price)));
    }
    if let Some(ref crop) = report.crop {
        if !cli.quiet {
            println!(
                "   {}",
                dim(&format!(
                    "crop {}x{} {}",
                    crop.size.width, crop.size.height, crop.mime_type
                ))
            );
        }
    }
    Ok(())
}

/// Parse `--crop X,Y,W,H`.
fn parse_crop(s: &str) -> Result<[f64; 4], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!("expected X,Y,W,H, got '{s}'"));
    }
    let mut out = [0.0; 4];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = part
            .parse::<f64>()
            .map_err(|_| format!("'{part}' is not a number"))?;
        if !slot.is_finite() {
            return Err(format!("'{part}' is not a finite number"));
        }
    }
    Ok(out)
}

/// Parse `--display-size WxH`.
fn parse_size(s: &str) -> Result<(f64, f64), String> {
    let (w, h) = s
        .to_ascii_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
        .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
    let w: f64 = w.parse().map_err(|_| format!("'{w}' is not a width"))?;
    let h: f64 = h.parse().map_err(|_| format!("'{h}' is not a height"))?;
    if w <= 0.0 || h <= 0.0 {
        return Err(format!("display size must be positive, got '{s}'"));
    }
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_flag_parses() {
        assert_eq!(parse_crop("10, 20,30.5,40").unwrap(), [10.0, 20.0, 30.5, 40.0]);
        assert!(parse_crop("1,2,3").is_err());
        assert!(parse_crop("1,2,3,x").is_err());
        assert!(parse_crop("1,2,3,inf").is_err());
    }

    #[test]
    fn size_flag_parses() {
        assert_eq!(parse_size("800x600").unwrap(), (800.0, 600.0));
        assert_eq!(parse_size("800X600").unwrap(), (800.0, 600.0));
        assert!(parse_size("800").is_err());
        assert!(parse_size("0x600").is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
