//! Frontal face detection with the SeetaFace cascade via `rustface`.
//!
//! The detector is stateful and not safe to share, so it is created on and
//! owned by a dedicated worker thread. Callers send grayscale frames over a
//! channel and wait for the boxes; requests are served one at a time.

use std::path::Path;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use image::GrayImage;
use lookalike_core::{DetectError, FaceBox, FaceDetector};
use rustface::ImageData;

pub const MIN_FACE_SIZE: u32 = 20;
pub const SCORE_THRESHOLD: f64 = 2.0;
pub const PYRAMID_SCALE_FACTOR: f32 = 0.8;
pub const SLIDE_WINDOW_STEP: u32 = 4;

struct DetectJob {
    gray: GrayImage,
    reply: mpsc::Sender<Vec<FaceBox>>,
}

#[derive(Debug)]
pub struct SeetaFaceDetector {
    jobs: Mutex<mpsc::Sender<DetectJob>>,
}

impl SeetaFaceDetector {
    /// Loads the cascade model and starts the worker thread.
    pub fn spawn(model_path: &Path) -> Result<Self, DetectError> {
        let model = model_path
            .to_str()
            .ok_or_else(|| {
                DetectError::Unavailable(format!(
                    "model path {} is not valid UTF-8",
                    model_path.display()
                ))
            })?
            .to_string();

        let (job_tx, job_rx) = mpsc::channel::<DetectJob>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), DetectError>>(1);

        thread::Builder::new()
            .name("face-detector".to_string())
            .spawn(move || {
                let mut detector = match rustface::create_detector(&model) {
                    Ok(detector) => detector,
                    Err(error) => {
                        let _ = ready_tx.send(Err(DetectError::Unavailable(format!(
                            "failed to load face model {model}: {error}"
                        ))));
                        return;
                    }
                };
                detector.set_min_face_size(MIN_FACE_SIZE);
                detector.set_score_thresh(SCORE_THRESHOLD);
                detector.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
                detector.set_slide_window_step(SLIDE_WINDOW_STEP, SLIDE_WINDOW_STEP);
                let _ = ready_tx.send(Ok(()));

                for job in job_rx {
                    let (width, height) = job.gray.dimensions();
                    let image = ImageData::new(job.gray.as_raw(), width, height);
                    let faces = detector
                        .detect(&image)
                        .into_iter()
                        .map(|face| {
                            let bbox = face.bbox();
                            FaceBox::new(bbox.x(), bbox.y(), bbox.width(), bbox.height())
                        })
                        .collect();
                    let _ = job.reply.send(faces);
                }
                tracing::debug!("face detector worker stopped");
            })
            .map_err(|error| {
                DetectError::Unavailable(format!("failed to start detector thread: {error}"))
            })?;

        ready_rx.recv().map_err(|_| {
            DetectError::Unavailable("detector thread exited during startup".to_string())
        })??;

        tracing::info!(model = %model_path.display(), "face detector loaded");
        Ok(Self {
            jobs: Mutex::new(job_tx),
        })
    }
}

impl FaceDetector for SeetaFaceDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>, DetectError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let job = DetectJob {
            gray: gray.clone(),
            reply: reply_tx,
        };
        {
            let jobs = self
                .jobs
                .lock()
                .map_err(|_| DetectError::Backend("detector queue poisoned".to_string()))?;
            jobs.send(job)
                .map_err(|_| DetectError::Unavailable("detector thread is gone".to_string()))?;
        }
        reply_rx
            .recv()
            .map_err(|_| DetectError::Backend("detector dropped the request".to_string()))
    }
}
