use crate::engine::EngineHandle;
use kycface_core::{GuidanceReport, PipelineConfig, VerificationReport};
use std::time::Instant;
use tracing::Instrument;
use zbus::interface;

pub const BUS_NAME: &str = "org.kycface.FaceVerify1";
pub const OBJECT_PATH: &str = "/org/kycface/FaceVerify1";

/// D-Bus interface for the kycface verification daemon.
///
/// Bus name: org.kycface.FaceVerify1
/// Object path: /org/kycface/FaceVerify1
pub struct KycFaceService {
    engine: EngineHandle,
    pipeline: PipelineConfig,
    max_image_bytes: usize,
    started: Instant,
}

impl KycFaceService {
    pub fn new(engine: EngineHandle, pipeline: PipelineConfig, max_image_bytes: usize) -> Self {
        Self {
            engine,
            pipeline,
            max_image_bytes,
            started: Instant::now(),
        }
    }
}

#[interface(name = "org.kycface.FaceVerify1")]
impl KycFaceService {
    /// Verify a live capture against a reference photo. Returns the JSON report.
    async fn verify(&self, live: Vec<u8>, reference: Vec<u8>) -> zbus::fdo::Result<String> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("verify", %request_id);
        async {
            check_payload("live", live.len(), self.max_image_bytes)?;
            check_payload("reference", reference.len(), self.max_image_bytes)?;
            tracing::info!(
                live_bytes = live.len(),
                reference_bytes = reference.len(),
                "verify requested"
            );

            let outcome = self.engine.verify(live, reference).await.map_err(|e| {
                tracing::error!(error = %e, "verify failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

            let report = VerificationReport::from(&outcome);
            tracing::info!(
                success = report.success,
                matched = report.is_match,
                confidence = ?report.confidence_level,
                "verify complete"
            );
            to_json(&report)
        }
        .instrument(span)
        .await
    }

    /// Advisory face lookup on one frame, for capture guidance.
    async fn detect_face(&self, frame: Vec<u8>) -> zbus::fdo::Result<String> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::debug_span!("detect_face", %request_id);
        async {
            check_payload("frame", frame.len(), self.max_image_bytes)?;
            let result = self
                .engine
                .detect_face(frame)
                .await
                .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
            let report = GuidanceReport::from(&result);
            tracing::debug!(found = report.success, "detect_face complete");
            to_json(&report)
        }
        .instrument(span)
        .await
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workers": self.engine.worker_count(),
            "thresholds": self.pipeline.tiers,
            "sweep": self.pipeline.sweep,
            "geometry": self.pipeline.geometry,
            "max_image_bytes": self.max_image_bytes,
            "uptime_secs": self.started.elapsed().as_secs(),
        })
        .to_string())
    }
}

fn check_payload(name: &str, len: usize, max: usize) -> zbus::fdo::Result<()> {
    if len > max {
        tracing::warn!(payload = name, len, max, "payload rejected");
        return Err(zbus::fdo::Error::InvalidArgs(format!(
            "{name} image is {len} bytes, limit is {max}"
        )));
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value)
        .map_err(|e| zbus::fdo::Error::Failed(format!("serialization failed: {e}")))
}
