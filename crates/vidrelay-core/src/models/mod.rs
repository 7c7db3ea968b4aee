pub mod api;
pub mod job;
pub mod transfer;

pub use api::{
    ClientUploadCompleteRequest, CreateJobRequest, JobListResponse, JobStatusResponse,
    LegacyUploadRequest, LegacyUploadResponse, PresignedGrantRequest,
};
pub use job::{
    ErrorKind, Job, JobErrorDetail, JobFilter, JobMutation, JobState, NewJob, TransferStrategy,
};
pub use transfer::{MultipartSession, PartRecord, PresignedGrant};
