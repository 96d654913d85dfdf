use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use idcheck_core::{Settings, Verifier, VerifyError};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "idcheck", about = "idcheck identity verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces in an image
    Detect {
        /// JPEG or PNG file
        image: PathBuf,
        /// Write the image with detection boxes drawn to this JPEG file
        #[arg(long, value_name = "OUT")]
        annotated: Option<PathBuf>,
    },
    /// Match a live image against the reference store
    VerifyStore {
        live: PathBuf,
    },
    /// Match a live image against an identity document
    VerifyDoc {
        live: PathBuf,
        /// ID document image or PDF (first page is used)
        document: PathBuf,
    },
    /// Show configuration and model availability
    Status,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command, &Settings::from_env()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<VerifyError>() {
            Some(verify) => {
                let body = json!({
                    "error": verify.public_message(),
                    "kind": verify.kind(),
                    "status": verify.status_code(),
                });
                println!("{body:#}");
                ExitCode::from(2)
            }
            None => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

fn run(command: Commands, settings: &Settings) -> Result<()> {
    match command {
        Commands::Status => print_json(&status_report(settings)),
        Commands::Detect { image, annotated } => {
            let verifier = load_verifier(settings, annotated.is_some())?;
            let mut report = verifier.detect_faces(&read_input(&image)?)?;
            if let (Some(out), Some(encoded)) = (annotated, report.image_with_box.take()) {
                let jpeg = BASE64
                    .decode(encoded)
                    .context("annotated image is not valid base64")?;
                std::fs::write(&out, jpeg)
                    .with_context(|| format!("failed to write {}", out.display()))?;
                tracing::info!(path = %out.display(), "annotated image written");
            }
            print_json(&report)
        }
        Commands::VerifyStore { live } => {
            let verifier = load_verifier(settings, false)?;
            print_json(&verifier.match_with_store(&read_input(&live)?)?)
        }
        Commands::VerifyDoc { live, document } => {
            let verifier = load_verifier(settings, false)?;
            let hint = document.file_name().and_then(|n| n.to_str());
            let report =
                verifier.match_with_document(&read_input(&live)?, &read_input(&document)?, hint)?;
            print_json(&report)
        }
    }
}

fn load_verifier(settings: &Settings, annotate: bool) -> Result<Verifier> {
    let providers = settings
        .load_providers()
        .context("failed to load verification providers")?;
    let mut config = settings.verifier_config();
    config.annotate = annotate;
    Ok(Verifier::new(providers, config))
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    model_dir: String,
    detector_model: ModelStatus,
    recognizer_model: ModelStatus,
    store_path: String,
    store_present: bool,
    similarity_threshold: f32,
    live_face_policy: String,
    store_policy: String,
    ocr_language: String,
    pdf_dpi: u32,
}

#[derive(Debug, Serialize)]
struct ModelStatus {
    path: String,
    present: bool,
}

impl ModelStatus {
    fn check(path: String) -> Self {
        let present = Path::new(&path).is_file();
        Self { path, present }
    }
}

fn status_report(settings: &Settings) -> StatusReport {
    StatusReport {
        model_dir: settings.model_dir.display().to_string(),
        detector_model: ModelStatus::check(settings.scrfd_model_path()),
        recognizer_model: ModelStatus::check(settings.arcface_model_path()),
        store_path: settings.store_path.display().to_string(),
        store_present: settings.store_path.is_file(),
        similarity_threshold: settings.similarity_threshold,
        live_face_policy: settings.live_face.as_str().to_string(),
        store_policy: settings.store_policy.as_str().to_string(),
        ocr_language: settings.ocr_lang.clone(),
        pdf_dpi: settings.pdf_dpi,
    }
}
