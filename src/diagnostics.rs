//! Setup verification run by `crabgate --self-test`

use crate::camera::CameraSourceFactory;
use crate::session::{MediaTransport, SessionId, TransportEvents};
use crate::types::CameraConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Frames captured by the capture check
pub const SELF_TEST_FRAMES: usize = 5;

/// Outcome of one diagnostic step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepResult {
    Passed(String),
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfTestStep {
    pub name: String,
    pub result: StepResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfTestReport {
    pub steps: Vec<SelfTestStep>,
}

impl SelfTestReport {
    fn record(&mut self, name: &str, result: StepResult) {
        match &result {
            StepResult::Passed(detail) => log::info!("Self-test {}: ok ({})", name, detail),
            StepResult::Failed(detail) => log::error!("Self-test {}: FAILED ({})", name, detail),
            StepResult::Skipped(detail) => log::warn!("Self-test {}: skipped ({})", name, detail),
        }
        self.steps.push(SelfTestStep {
            name: name.to_string(),
            result,
        });
    }

    /// True when no step failed
    pub fn passed(&self) -> bool {
        !self
            .steps
            .iter()
            .any(|step| matches!(step.result, StepResult::Failed(_)))
    }
}

impl fmt::Display for SelfTestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            let (mark, detail) = match &step.result {
                StepResult::Passed(d) => ("PASS", d),
                StepResult::Failed(d) => ("FAIL", d),
                StepResult::Skipped(d) => ("SKIP", d),
            };
            writeln!(f, "[{}] {:<10} {}", mark, step.name, detail)?;
        }
        write!(
            f,
            "Self-test {}",
            if self.passed() { "passed" } else { "failed" }
        )
    }
}

/// Open a camera, capture a few frames, release it, then open and close one
/// transport peer.
pub async fn run_self_test(
    factory: &CameraSourceFactory,
    config: &CameraConfig,
    transport: &dyn MediaTransport,
) -> SelfTestReport {
    let mut report = SelfTestReport::default();

    let detector = factory.detector().clone();
    let platform = detector.detect_platform();
    report.record(
        "platform",
        StepResult::Passed(format!(
            "{} (board library {}, recommended backend {})",
            platform,
            if detector.board_library_available() {
                "installed"
            } else {
                "missing"
            },
            detector.recommended_backend()
        )),
    );

    let build_factory = factory.clone();
    let build_config = config.clone();
    let built = tokio::task::spawn_blocking(move || build_factory.build(&build_config)).await;

    match built {
        Ok(Ok(mut source)) => {
            report.record("camera", StepResult::Passed(source.describe()));

            let expected = source.config().clone();
            let captured = tokio::task::spawn_blocking(move || {
                let mut outcome = Ok(0usize);
                for _ in 0..SELF_TEST_FRAMES {
                    match source.next_frame() {
                        Ok(frame) if !frame.matches(&expected) => {
                            outcome = Err(format!(
                                "frame {} is {}x{} ({} bytes)",
                                frame.sequence,
                                frame.width,
                                frame.height,
                                frame.data.len()
                            ));
                            break;
                        }
                        Ok(frame) => {
                            if let Ok(errors) = outcome.as_mut() {
                                *errors += frame.error_frame as usize;
                            }
                        }
                        Err(e) => {
                            outcome = Err(e.to_string());
                            break;
                        }
                    }
                }
                source.close();
                (outcome, source.is_open())
            })
            .await;

            match captured {
                Ok((Ok(error_frames), still_open)) => {
                    report.record(
                        "capture",
                        StepResult::Passed(format!(
                            "{} frames, {} substituted",
                            SELF_TEST_FRAMES, error_frames
                        )),
                    );
                    report.record(
                        "release",
                        if still_open {
                            StepResult::Failed("camera still open after close".to_string())
                        } else {
                            StepResult::Passed("camera released".to_string())
                        },
                    );
                }
                Ok((Err(reason), _)) => report.record("capture", StepResult::Failed(reason)),
                Err(e) => report.record("capture", StepResult::Failed(e.to_string())),
            }
        }
        Ok(Err(e)) => {
            report.record("camera", StepResult::Failed(e.to_string()));
            report.record("capture", StepResult::Skipped("no camera".to_string()));
        }
        Err(e) => report.record("camera", StepResult::Failed(e.to_string())),
    }

    let (tx, _rx) = mpsc::unbounded_channel();
    let id = SessionId::new();
    match transport.open_peer(id, TransportEvents::new(id, tx)).await {
        Ok(peer) => {
            let track = peer.add_video_track(config).await;
            peer.close().await;
            report.record(
                "transport",
                match track {
                    Ok(_) => StepResult::Passed("peer created with video track".to_string()),
                    Err(e) => StepResult::Failed(e.to_string()),
                },
            );
        }
        Err(e) => report.record("transport", StepResult::Failed(e.to_string())),
    }

    report
}
