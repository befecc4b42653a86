use std::path::{Component, Path};

use chrono::NaiveDateTime;

use super::cursor::CaptureKey;

/// A file listed by the camera's file share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Remote directory, e.g. `/DCIM/100OLYMP`
    pub dir: String,
    pub name: String,
    pub size: u64,
    /// Capture time decoded from the listing, if the camera reported one
    pub captured_at: Option<NaiveDateTime>,
}

impl RemoteEntry {
    pub fn new(dir: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            size,
            captured_at: None,
        }
    }

    pub fn with_capture_time(mut self, captured_at: NaiveDateTime) -> Self {
        self.captured_at = Some(captured_at);
        self
    }

    /// Absolute path of the entry on the file share.
    pub fn remote_path(&self) -> String {
        format!("{}/{}", self.dir.trim_end_matches('/'), self.name)
    }

    /// True if the name is a single plain path component, so joining it onto
    /// the destination cannot land anywhere else.
    pub fn has_plain_name(&self) -> bool {
        is_plain_file_name(&self.name)
    }

    /// Ordering key derived from the camera's file naming scheme.
    pub fn capture_key(&self) -> Option<CaptureKey> {
        CaptureKey::from_filename(&self.name)
    }
}

/// Exactly one `Component::Normal`: no separators, no `..`, not absolute.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('/')
}

/// Where the sync loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Waiting,
    Provisioning,
    Syncing,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Provisioning => "provisioning",
            Self::Syncing => "syncing",
        }
    }
}
