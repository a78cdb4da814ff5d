//! Job admission and status pipeline.
//!
//! Jobs move process → convert → download. The process and convert stages
//! share one concurrency ceiling enforced by [`AdmissionController`]; work
//! that finds no free slot waits until the [`Sweeper`] admits it.

pub mod admission;
pub mod audio;
pub mod convert;
pub mod download;
pub mod jobs;
pub mod reconciler;
pub mod retry;
pub mod sweeper;

pub use admission::{Admission, AdmissionController, DispatchReport};
pub use audio::{AudioMatcher, BestAudioMatcher};
pub use convert::{ConvertService, FormatDownload};
pub use download::DownloadService;
pub use jobs::{JobDetails, JobService, Submission};
pub use reconciler::StatusReconciler;
pub use retry::RetryHandler;
pub use sweeper::{SweepReport, Sweeper, SweeperHandle};
