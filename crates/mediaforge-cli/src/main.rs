use std::env;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use mediaforge_contracts::events::EventLog;
use mediaforge_contracts::receipts::{
    write_receipt, JobReceipt, ReceiptArtifact, RECEIPT_SCHEMA_VERSION,
};
use mediaforge_contracts::request::{ApiKey, AspectRatio, GenerationOptions, Modality, Resolution};
use mediaforge_contracts::settings::SettingsStore;
use mediaforge_engine::{
    ArtifactResolver, BlobStore, GeminiApi, GenerationRequest, JobClient, PollPolicy,
    ProgressEvent, SourceFile, Studio, Submission,
};
use serde_json::json;

const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];

#[derive(Debug, Parser)]
#[command(name = "mediaforge", version, about = "Generate images and videos with Gemini and Veo")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// Save the --api-key value to the settings file.
    #[arg(long, global = true)]
    remember: bool,
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true)]
    image_model: Option<String>,
    #[arg(long, global = true)]
    video_model: Option<String>,
    #[arg(long, global = true, default_value = "mediaforge-runs")]
    run_dir: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Command {
    Image(ImageArgs),
    Video(VideoArgs),
    #[command(subcommand)]
    Key(KeyCommand),
}

#[derive(Debug, Parser)]
struct ImageArgs {
    #[arg(long)]
    prompt: String,
    /// Source image to edit.
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    aspect_ratio: Option<AspectRatio>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct VideoArgs {
    #[arg(long)]
    prompt: String,
    /// Starting frame for the video.
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    aspect_ratio: Option<AspectRatio>,
    #[arg(long)]
    resolution: Option<Resolution>,
    #[arg(long)]
    audio: bool,
    #[arg(long)]
    negative_prompt: Option<String>,
    /// Generate a still with the image model first and animate it.
    #[arg(long)]
    image_first: bool,
    #[arg(long, default_value_t = 10)]
    poll_interval: u64,
    #[arg(long)]
    max_polls: Option<u32>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    Set { key: String },
    Show,
    Clear,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("mediaforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = cli
        .global
        .settings
        .clone()
        .map(SettingsStore::new)
        .unwrap_or_else(|| SettingsStore::new(SettingsStore::default_path()));
    match cli.command {
        Command::Key(command) => run_key(&settings, command),
        Command::Image(args) => {
            let request = image_request(&cli.global, &args)?;
            let poll = PollPolicy::default();
            run_generation(&cli.global, &settings, request, poll, args.out)
        }
        Command::Video(args) => {
            let request = video_request(&cli.global, &args)?;
            let poll = PollPolicy {
                interval: Duration::from_secs(args.poll_interval),
                max_polls: args.max_polls,
            };
            run_generation(&cli.global, &settings, request, poll, args.out)
        }
    }
}

fn run_key(settings: &SettingsStore, command: KeyCommand) -> Result<i32> {
    match command {
        KeyCommand::Set { key } => {
            let Some(key) = ApiKey::new(&key) else {
                bail!("API key must not be empty");
            };
            settings.save_api_key(&key)?;
            println!("Saved API key {} to {}", key.masked(), settings.path().display());
        }
        KeyCommand::Show => match settings.load_api_key() {
            Some(key) => println!("{}", key.masked()),
            None => {
                println!("No API key stored in {}", settings.path().display());
                return Ok(2);
            }
        },
        KeyCommand::Clear => {
            if settings.clear_api_key()? {
                println!("Cleared API key from {}", settings.path().display());
            } else {
                println!("No API key stored in {}", settings.path().display());
            }
        }
    }
    Ok(0)
}

fn image_request(global: &GlobalArgs, args: &ImageArgs) -> Result<GenerationRequest> {
    let options = GenerationOptions {
        aspect_ratio: args.aspect_ratio,
        image_model: global.image_model.clone(),
        ..GenerationOptions::default()
    };
    let mut request =
        GenerationRequest::new(args.prompt.clone(), Modality::Image).with_options(options);
    if let Some(path) = &args.image {
        request = request.with_input_image(open_source(path)?);
    }
    Ok(request)
}

fn video_request(global: &GlobalArgs, args: &VideoArgs) -> Result<GenerationRequest> {
    let options = GenerationOptions {
        aspect_ratio: args.aspect_ratio,
        resolution: args.resolution,
        generate_audio: args.audio,
        negative_prompt: args.negative_prompt.clone(),
        generate_image_first: args.image_first,
        image_model: global.image_model.clone(),
        video_model: global.video_model.clone(),
    };
    let mut request =
        GenerationRequest::new(args.prompt.clone(), Modality::Video).with_options(options);
    if let Some(path) = &args.image {
        request = request.with_input_image(open_source(path)?);
    }
    Ok(request)
}

fn open_source(path: &Path) -> Result<SourceFile> {
    SourceFile::open(path).with_context(|| format!("failed to read image {}", path.display()))
}

/// `--api-key`, then the environment, then the settings file.
fn resolve_api_key(
    flag: Option<&str>,
    env_lookup: impl Fn(&str) -> Option<String>,
    settings: &SettingsStore,
) -> Option<ApiKey> {
    flag.and_then(ApiKey::new)
        .or_else(|| {
            API_KEY_ENV_VARS
                .iter()
                .find_map(|name| env_lookup(name).as_deref().and_then(ApiKey::new))
        })
        .or_else(|| settings.load_api_key())
}

fn run_generation(
    global: &GlobalArgs,
    settings: &SettingsStore,
    request: GenerationRequest,
    poll: PollPolicy,
    out: Option<PathBuf>,
) -> Result<i32> {
    let api_key =
        resolve_api_key(global.api_key.as_deref(), |name| env::var(name).ok(), settings);
    if global.remember {
        match global.api_key.as_deref().and_then(ApiKey::new) {
            Some(key) => settings.save_api_key(&key)?,
            None => log::warn!("--remember given without --api-key; nothing saved"),
        }
    }

    std::fs::create_dir_all(&global.run_dir)
        .with_context(|| format!("failed to create run dir {}", global.run_dir.display()))?;
    let stamp = compact_timestamp();
    let events_path = global
        .events
        .clone()
        .unwrap_or_else(|| global.run_dir.join("events.jsonl"));
    let events = EventLog::new(events_path, format!("cli-{stamp}"));

    let (progress_tx, progress_rx) = mpsc::channel::<ProgressEvent>();
    let printer = thread::spawn(move || {
        for event in progress_rx {
            match event {
                ProgressEvent::Message(message) => eprintln!("{message}"),
                ProgressEvent::PollRetry { attempt, error } => {
                    eprintln!("status check {attempt} failed, retrying: {error}")
                }
            }
        }
    });

    let client = JobClient::new(GeminiApi::new()).with_poll_policy(poll);
    let resolver = ArtifactResolver::new(BlobStore::new(global.run_dir.join("blobs")));
    let studio = Studio::new(client, resolver)
        .with_event_log(events.clone())
        .with_observer(progress_tx)
        .with_api_key(api_key);

    let outcome = studio
        .submit(&request)
        .map_err(anyhow::Error::from)
        .and_then(|submission| {
            let extension = submission.artifact.file_extension();
            let dest = out
                .clone()
                .unwrap_or_else(|| default_output_path(&global.run_dir, &stamp, extension));
            save_submission(&submission, &request, &dest, events.session_id())?;
            Ok((submission, dest))
        });
    studio.teardown();
    drop(studio);
    if printer.join().is_err() {
        log::warn!("progress printer thread panicked");
    }

    let (submission, dest) = outcome?;
    for warning in &submission.warnings {
        eprintln!("warning: {warning}");
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "job_id": submission.job_id,
            "artifact": dest.to_string_lossy(),
            "mime_type": submission.artifact.mime_type(),
            "models": submission.models,
            "latency_s": submission.latency_s,
        }))?
    );
    Ok(0)
}

fn save_submission(
    submission: &Submission,
    request: &GenerationRequest,
    dest: &Path,
    session_id: &str,
) -> Result<()> {
    submission
        .artifact
        .save_to(dest)
        .with_context(|| format!("failed to save artifact to {}", dest.display()))?;
    let bytes = submission.artifact.bytes()?;
    let receipt = JobReceipt {
        schema_version: RECEIPT_SCHEMA_VERSION,
        job_id: submission.job_id.clone(),
        session_id: session_id.to_string(),
        modality: submission.modality,
        prompt: submission.prompt_sent.clone(),
        options: request.options.clone(),
        models: submission.models.clone(),
        input_image: request.input_image.as_ref().map(|file| file.name.clone()),
        artifact: ReceiptArtifact::describe(dest, submission.artifact.mime_type(), &bytes),
        warnings: submission.warnings.clone(),
        started_at: submission.started_at.clone(),
        finished_at: submission.finished_at.clone(),
        latency_s: submission.latency_s,
    };
    write_receipt(&receipt_path(dest), &receipt)
}

fn default_output_path(run_dir: &Path, stamp: &str, extension: &str) -> PathBuf {
    run_dir.join(format!("artifact-{stamp}.{extension}"))
}

fn receipt_path(artifact: &Path) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".receipt.json");
    artifact.with_file_name(name)
}

fn compact_timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3f").to_string()
}
