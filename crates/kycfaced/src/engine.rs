use kycface_core::{
    AnalyzerError, ComparisonUnavailable, ExtractionResult, FaceAnalyzer, Pipeline,
    VerificationOutcome,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Load(#[from] AnalyzerError),
    #[error("comparison unavailable: {0}")]
    Comparison(#[from] ComparisonUnavailable),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to an engine thread.
enum EngineRequest {
    Verify {
        live: Vec<u8>,
        reference: Vec<u8>,
        reply: oneshot::Sender<Result<VerificationOutcome, EngineError>>,
    },
    DetectFace {
        frame: Vec<u8>,
        reply: oneshot::Sender<ExtractionResult>,
    },
}

/// Clone-safe handle to the engine worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    workers: Arc<[mpsc::Sender<EngineRequest>]>,
    next: Arc<AtomicUsize>,
}

impl EngineHandle {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Verify a live capture against a reference photo.
    pub async fn verify(
        &self,
        live: Vec<u8>,
        reference: Vec<u8>,
    ) -> Result<VerificationOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(EngineRequest::Verify { live, reference, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run extraction on a single frame for capture guidance.
    pub async fn detect_face(&self, frame: Vec<u8>) -> Result<ExtractionResult, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(EngineRequest::DetectFace { frame, reply }).await?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn dispatch(&self, request: EngineRequest) -> Result<(), EngineError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[index]
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn `workers` engine threads, each owning an analyzer built by `load`.
///
/// Every analyzer is loaded before any thread starts, so a missing or
/// broken model fails the whole startup.
pub fn spawn_engine<A, F>(
    workers: usize,
    pipeline: Pipeline,
    load: F,
) -> Result<EngineHandle, EngineError>
where
    A: FaceAnalyzer + Send + 'static,
    F: Fn(usize) -> Result<A, AnalyzerError>,
{
    let analyzers = (0..workers.max(1))
        .map(|index| {
            let analyzer = load(index)?;
            tracing::info!(worker = index, "face models loaded");
            Ok(analyzer)
        })
        .collect::<Result<Vec<A>, EngineError>>()?;

    let pipeline = Arc::new(pipeline);
    let mut senders = Vec::with_capacity(analyzers.len());

    for (index, mut analyzer) in analyzers.into_iter().enumerate() {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
        let pipeline = Arc::clone(&pipeline);

        std::thread::Builder::new()
            .name(format!("kycface-engine-{index}"))
            .spawn(move || {
                tracing::info!(worker = index, "engine thread started");
                while let Some(request) = rx.blocking_recv() {
                    match request {
                        EngineRequest::Verify { live, reference, reply } => {
                            let result = pipeline
                                .verify(&mut analyzer, &live, &reference)
                                .map_err(EngineError::from);
                            let _ = reply.send(result);
                        }
                        EngineRequest::DetectFace { frame, reply } => {
                            let _ = reply.send(pipeline.extract(&mut analyzer, &frame));
                        }
                    }
                }
                tracing::info!(worker = index, "engine thread exiting");
            })
            .map_err(EngineError::Spawn)?;

        senders.push(tx);
    }

    Ok(EngineHandle {
        workers: senders.into(),
        next: Arc::new(AtomicUsize::new(0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kycface_core::{BoundingBox, Embedding, ExtractionFailure, PipelineConfig, RasterImage};
    use std::sync::Mutex;

    /// Analyzer that never finds a face and notes which thread looked.
    #[derive(Default)]
    struct EmptySceneAnalyzer {
        threads: Arc<Mutex<Vec<String>>>,
    }

    impl FaceAnalyzer for EmptySceneAnalyzer {
        fn detect(
            &mut self,
            _image: &RasterImage,
            _min: f32,
        ) -> Result<Option<BoundingBox>, AnalyzerError> {
            let name = std::thread::current().name().unwrap_or_default().to_string();
            self.threads.lock().unwrap().push(name);
            Ok(None)
        }

        fn embed(
            &mut self,
            _image: &RasterImage,
            _face: &BoundingBox,
        ) -> Result<Embedding, AnalyzerError> {
            Err(AnalyzerError::Backend("unused".into()))
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::default()).unwrap()
    }

    fn engine(workers: usize) -> EngineHandle {
        spawn_engine(workers, pipeline(), |_| Ok(EmptySceneAnalyzer::default())).unwrap()
    }

    fn blank_png() -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(16, 16)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_undecodable_live_image_is_rejected() {
        let engine = engine(1);
        let outcome = engine
            .verify(b"not an image".to_vec(), b"also not".to_vec())
            .await
            .unwrap();
        match outcome {
            VerificationOutcome::LiveRejected { live } => {
                assert!(matches!(live, ExtractionFailure::DecodeFailure(_)))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_detect_face_reports_failure() {
        let engine = engine(2);
        let result = engine.detect_face(Vec::new()).await.unwrap();
        assert!(!result.is_success());
    }

    #[test]
    fn test_load_failure_aborts_startup() {
        let result = spawn_engine(3, pipeline(), |worker| {
            if worker == 1 {
                Err(AnalyzerError::Backend("missing det_10g.onnx".into()))
            } else {
                Ok(EmptySceneAnalyzer::default())
            }
        });
        assert!(matches!(result, Err(EngineError::Load(_))));
    }

    #[tokio::test]
    async fn test_requests_spread_across_workers() {
        let threads = Arc::new(Mutex::new(Vec::new()));
        let engine = spawn_engine(3, pipeline(), |_| {
            Ok(EmptySceneAnalyzer { threads: Arc::clone(&threads) })
        })
        .unwrap();
        assert_eq!(engine.worker_count(), 3);

        let frame = blank_png();
        let mut served_by = Vec::new();
        for _ in 0..6 {
            threads.lock().unwrap().clear();
            let result = engine.detect_face(frame.clone()).await.unwrap();
            assert!(!result.is_success());

            let seen = threads.lock().unwrap().clone();
            assert!(!seen.is_empty(), "request never reached an analyzer");
            assert!(seen.iter().all(|name| *name == seen[0]), "request split: {seen:?}");
            served_by.push(seen[0].clone());
        }

        let expected: Vec<String> = [0, 1, 2, 0, 1, 2]
            .iter()
            .map(|index| format!("kycface-engine-{index}"))
            .collect();
        assert_eq!(served_by, expected);
    }
}
