//! Images: build specification, builder, content digests and the store

mod builder;
mod digest;
pub mod dockerfile;
mod spec;
mod store;

pub use builder::{BuildReport, ImageBuilder};
pub use digest::{copy_tree, image_digest, sha256_hex, IgnoreRules, DEFAULT_IGNORES};
pub use spec::{plan, BuildStep, FileEntry, HealthcheckSpec, ImageSpec, APP_DIR};
pub use store::{
    short_digest, validate_tag, ImageRecord, ImageStore, ImageSummary, RECORD_FILE, ROOTFS_DIR,
};

pub(crate) use store::write_atomic;
