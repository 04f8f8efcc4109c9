use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "timelapse", version, about = "Encode an image sequence into an H.264 MP4")]
struct Cli {
    /// Pipeline options JSON (missing fields use defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the ffmpeg executable.
    #[arg(long, global = true)]
    ffmpeg: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode images given on the command line.
    Encode(EncodeArgs),
    /// Run a JSON request document and print the JSON response.
    Request(RequestArgs),
}

#[derive(Parser, Debug)]
struct EncodeArgs {
    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Frames per second.
    #[arg(long, default_value_t = 1.0)]
    fps: f64,

    /// Output width (defaults to the first image's width).
    #[arg(long)]
    width: Option<u32>,

    /// Output height (defaults to the first image's height).
    #[arg(long)]
    height: Option<u32>,

    /// Requested bitrate in bits per second.
    #[arg(long, default_value_t = 6_000_000)]
    bitrate: u32,

    /// Source images, in presentation order.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[derive(Parser, Debug)]
struct RequestArgs {
    /// Request JSON file.
    #[arg(long = "in")]
    in_path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let pipeline = build_pipeline(cli.config.as_deref(), cli.ffmpeg)?;
    match cli.cmd {
        Command::Encode(args) => cmd_encode(&pipeline, args),
        Command::Request(args) => cmd_request(pipeline, args),
    }
}

fn build_pipeline(
    config: Option<&std::path::Path>,
    ffmpeg: Option<String>,
) -> anyhow::Result<timelapse::Pipeline> {
    let opts = match config {
        Some(path) => timelapse::PipelineOpts::from_json_file(path)?,
        None => timelapse::PipelineOpts::default(),
    };
    let mut ffmpeg_opts = timelapse::FfmpegEngineOpts::default();
    if let Some(bin) = ffmpeg {
        ffmpeg_opts.ffmpeg_bin = bin;
    }
    Ok(timelapse::Pipeline::with_backends(
        opts,
        Arc::new(timelapse::FsImageDecoder),
        Arc::new(timelapse::FfmpegMp4Factory::new(ffmpeg_opts)),
    ))
}

fn cmd_encode(pipeline: &timelapse::Pipeline, args: EncodeArgs) -> anyhow::Result<()> {
    let mut req = timelapse::EncodeRequest::new(args.images, args.out, args.fps)
        .with_bitrate(args.bitrate);
    req.width = args.width;
    req.height = args.height;

    let outcome = pipeline.run(&req)?;
    eprintln!(
        "wrote {} ({} frames, {} skipped)",
        outcome.path.display(),
        outcome.frames_encoded,
        outcome.images_skipped
    );
    println!("{}", outcome.path.display());
    Ok(())
}

fn cmd_request(pipeline: timelapse::Pipeline, args: RequestArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.in_path)
        .with_context(|| format!("read request '{}'", args.in_path.display()))?;
    let response: timelapse::EncodeResponse = match timelapse::EncodeRequest::from_json_str(&text)
    {
        Ok(req) => Arc::new(pipeline).spawn(req)?.wait().into(),
        Err(e) => timelapse::EncodeResponse::Failure {
            code: e.code().to_string(),
            message: e.to_string(),
        },
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
