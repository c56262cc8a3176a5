use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kycface_hw::{
    Camera, CaptureEvent, CaptureHandle, FaceBox, Resolution, SchedulerConfig, VerificationClient,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

// `#[zbus::proxy]` generates `FaceVerifyProxy` for the daemon interface.
#[zbus::proxy(
    interface = "org.kycface.FaceVerify1",
    default_service = "org.kycface.FaceVerify1",
    default_path = "/org/kycface/FaceVerify1"
)]
trait FaceVerify {
    async fn verify(&self, live: &[u8], reference: &[u8]) -> zbus::Result<String>;
    async fn detect_face(&self, frame: &[u8]) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "kycface", about = "kycface face verification CLI")]
struct Cli {
    /// Bus the daemon is registered on
    #[arg(long, env = "KYCFACE_BUS", value_enum, default_value_t = Bus::Session, global = true)]
    bus: Bus,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Bus {
    Session,
    System,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a live image against a reference photo
    Verify {
        /// Live capture (JPEG/PNG)
        #[arg(long)]
        live: PathBuf,
        /// Reference photo, e.g. from an identity document
        #[arg(long)]
        reference: PathBuf,
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },
    /// Locate the face in a single image
    Detect {
        image: PathBuf,
    },
    /// Run a timed camera capture and verify it against a reference photo
    Capture {
        /// Reference photo to verify against
        #[arg(long)]
        reference: PathBuf,
        /// V4L2 device path
        #[arg(long, env = "KYCFACE_CAMERA_DEVICE", default_value = "/dev/video0")]
        device: String,
        /// Seconds until the photo is taken
        #[arg(long, default_value_t = 10)]
        countdown: u64,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },
    /// Show daemon status
    Status,
    /// List video capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Verify { live, reference, json } => {
            let proxy = connect(cli.bus).await?;
            let live = read_image(&live)?;
            let reference = read_image(&reference)?;
            let report = proxy.verify(&live, &reference).await.context("Verify call failed")?;
            print_report(&serde_json::from_str(&report)?, json)?;
        }
        Commands::Detect { image } => {
            let proxy = connect(cli.bus).await?;
            let frame = read_image(&image)?;
            let guidance: Guidance = serde_json::from_str(&proxy.detect_face(&frame).await?)?;
            match (guidance.face, guidance.error) {
                (Some(face), _) => println!(
                    "Face at x={:.0} y={:.0} {:.0}x{:.0} (confidence {:.2})",
                    face.x,
                    face.y,
                    face.width,
                    face.height,
                    guidance.confidence.unwrap_or_default()
                ),
                (None, Some(error)) => println!("{error}"),
                (None, None) => println!("No face detected"),
            }
        }
        Commands::Capture {
            reference,
            device,
            countdown,
            width,
            height,
            json,
        } => {
            let client = DaemonClient {
                proxy: connect(cli.bus).await?,
                reference: read_image(&reference)?,
            };
            let camera = match Camera::open(&device, Resolution { width, height }) {
                Ok(camera) => camera,
                Err(e) => {
                    eprintln!("{}", e.user_message());
                    return Err(e).context("camera unavailable");
                }
            };
            let config = SchedulerConfig {
                deadline: Duration::from_secs(countdown),
                ..SchedulerConfig::default()
            };
            run_capture(camera, client, config, json).await?;
        }
        Commands::Status => {
            let proxy = connect(cli.bus).await?;
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

async fn connect(bus: Bus) -> Result<FaceVerifyProxy<'static>> {
    let connection = match bus {
        Bus::Session => zbus::Connection::session().await,
        Bus::System => zbus::Connection::system().await,
    }
    .context("failed to connect to D-Bus")?;
    FaceVerifyProxy::new(&connection)
        .await
        .context("kycfaced is not reachable")
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Subset of the daemon's guidance report used by the CLI.
#[derive(Debug, Deserialize)]
struct Guidance {
    face: Option<FaceBox>,
    confidence: Option<f32>,
    error: Option<String>,
}

struct DaemonClient {
    proxy: FaceVerifyProxy<'static>,
    reference: Vec<u8>,
}

impl VerificationClient for DaemonClient {
    type Outcome = serde_json::Value;
    type Error = anyhow::Error;

    async fn locate(&self, frame: Vec<u8>) -> Result<Option<FaceBox>> {
        let guidance: Guidance = serde_json::from_str(&self.proxy.detect_face(&frame).await?)?;
        Ok(guidance.face)
    }

    async fn submit(&self, frame: Vec<u8>) -> Result<serde_json::Value> {
        let report = self.proxy.verify(&frame, &self.reference).await?;
        Ok(serde_json::from_str(&report)?)
    }
}

async fn run_capture(
    camera: Camera,
    client: DaemonClient,
    config: SchedulerConfig,
    json: bool,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = CaptureHandle::start(camera, client, config, tx);
    println!("Look at the camera. The photo is taken in {}s.", config.deadline.as_secs());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut face_in_view = None;
    let mut report = None;
    let mut failure = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                handle.stop();
                println!("Capture cancelled");
                break;
            }
            event = rx.recv() => match event {
                None => break,
                Some(CaptureEvent::Countdown { remaining_secs }) if remaining_secs > 0 => {
                    println!("{remaining_secs}...");
                }
                Some(CaptureEvent::Countdown { .. }) => {}
                Some(CaptureEvent::Guidance(face)) => {
                    let found = face.is_some();
                    if face_in_view != Some(found) {
                        println!("{}", guidance_hint(face.as_ref()));
                        face_in_view = Some(found);
                    }
                }
                Some(CaptureEvent::Captured) => println!("Photo captured, verifying..."),
                Some(CaptureEvent::CaptureFailed(message)) => failure = Some(message),
                Some(CaptureEvent::Submitted(Ok(value))) => report = Some(value),
                Some(CaptureEvent::Submitted(Err(e))) => {
                    failure = Some(format!("verification failed: {e:#}"));
                }
            }
        }
    }

    let session = handle.finished().await;
    tracing::debug!(state = ?session.state, "capture session finished");

    if let Some(message) = failure {
        bail!(message);
    }
    if let Some(report) = report {
        print_report(&report, json)?;
    }
    Ok(())
}

fn guidance_hint(face: Option<&FaceBox>) -> &'static str {
    match face {
        Some(_) => "Face detected, hold still",
        None => "No face detected, please face the camera",
    }
}

fn print_report(report: &serde_json::Value, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    if let Some(message) = report["message"].as_str() {
        println!("{message}");
    }
    if let Some(percentage) = report["similarityPercentage"].as_str() {
        let level = report["confidenceLevel"].as_str().unwrap_or("none");
        println!("Similarity: {percentage} (confidence: {level})");
    }
    for side in ["live", "reference"] {
        if let Some(error) = report["extractionDetails"][side]["error"].as_str() {
            println!("{side}: {error}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_defaults() {
        let cli = Cli::try_parse_from(["kycface", "capture", "--reference", "id.jpg"]).unwrap();
        assert_eq!(cli.bus, Bus::Session);
        match cli.command {
            Commands::Capture { device, countdown, width, height, .. } => {
                assert_eq!(device, "/dev/video0");
                assert_eq!(countdown, 10);
                assert_eq!((width, height), (1280, 720));
            }
            _ => panic!("expected capture"),
        }
    }

    #[test]
    fn test_verify_requires_both_images() {
        assert!(Cli::try_parse_from(["kycface", "verify", "--live", "a.jpg"]).is_err());
        let args = [
            "kycface",
            "--bus",
            "system",
            "verify",
            "--live",
            "a.jpg",
            "--reference",
            "b.jpg",
        ];
        assert!(Cli::try_parse_from(args).is_ok());
    }

    #[test]
    fn test_guidance_parses_daemon_report() {
        let found: Guidance = serde_json::from_str(
            r#"{"success":true,"face":{"x":1.0,"y":2.0,"width":30.0,"height":40.0},
                "confidence":0.9}"#,
        )
        .unwrap();
        assert_eq!(found.face.map(|f| f.width), Some(30.0));

        let missing: Guidance = serde_json::from_str(
            r#"{"success":false,
                "error":"No face detected in image after multiple attempts"}"#,
        )
        .unwrap();
        assert!(missing.face.is_none());
        assert_eq!(
            guidance_hint(missing.face.as_ref()),
            "No face detected, please face the camera"
        );
    }
}
