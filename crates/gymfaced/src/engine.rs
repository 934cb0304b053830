use gymface_core::{CheckinError, FacePipeline, Probe};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Probe {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Probe, CheckinError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    dimension: usize,
    backends: (&'static str, &'static str),
}

impl EngineHandle {
    /// Decode `image`, detect the first face and embed it.
    pub async fn probe(&self, image: Vec<u8>) -> Result<Probe, CheckinError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Probe {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CheckinError::EngineUnavailable)?;
        reply_rx.await.map_err(|_| CheckinError::EngineUnavailable)?
    }

    /// Embedding dimension of the loaded extractor.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Detector and extractor backend names.
    pub fn backends(&self) -> (&'static str, &'static str) {
        self.backends
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Move `pipeline` onto a dedicated OS thread and return a handle to it.
///
/// Inference is CPU-bound and the ONNX sessions need `&mut`, so one thread
/// owns them for the life of the process and serves requests in order.
pub fn spawn_engine(mut pipeline: FacePipeline) -> Result<EngineHandle, EngineError> {
    let dimension = pipeline.dimension();
    let backends = pipeline.backends();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("gymface-engine".into())
        .spawn(move || {
            tracing::info!(detector = backends.0, extractor = backends.1, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Probe { image, reply } => {
                        let started = std::time::Instant::now();
                        let result = pipeline.probe(&image);
                        tracing::debug!(
                            bytes = image.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            face = matches!(result, Ok(Probe::Face { .. })),
                            "probe finished"
                        );
                        // Receiver gone means the request timed out; drop the result.
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        dimension,
        backends,
    })
}
