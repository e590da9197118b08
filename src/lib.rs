//! Client-side orchestration of multipart uploads.
//!
//! A file is split into fixed-size parts ([`plan`]), each part is sent to the
//! server on its own ([`TransferEngine`]), and the server is finally asked to
//! assemble them into one object ([`UploadSession`]).
//!
//! ```no_run
//! use chunkup::{LocalFile, UploadClient, UploadOptions, Uploader};
//! use url::Url;
//!
//! # async fn example() -> chunkup::Result<()> {
//! let client = UploadClient::new(Url::parse("http://localhost:3000").unwrap());
//! let uploader = Uploader::new(client, UploadOptions::default());
//!
//! let file = LocalFile::open("video.mp4").await?;
//! let result = uploader.upload(file, "video.mp4", "video/mp4").await?;
//! println!("stored at {}", result.location);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod file;
pub mod plan;
pub mod rest_types;
pub mod retry;
pub mod session;
pub mod transfer;
pub mod uploader;

pub use client::UploadClient;
pub use error::{Result, UploadError};
pub use file::{FileHandle, LocalFile};
pub use plan::{PartPlan, PartRange, Parts, auto_chunk_size, plan};
pub use rest_types::{CompletedPart, UploadResult};
pub use retry::{RetryConfig, RetryPolicy};
pub use session::{
    SessionSnapshot, SessionStatus, UploadEvent, UploadOptions, UploadProgress, UploadSession,
    UploadSessionState,
};
pub use transfer::TransferEngine;
pub use uploader::{UploadCallbacks, UploadHandle, Uploader};
