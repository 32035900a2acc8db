use std::fmt;

/// User-visible capture state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CaptureStatus {
    #[default]
    Idle,
    Capturing(String),
    Saved(String),
    /// Holds the user-facing reason, e.g. "Storage not available".
    Failed(String),
}

impl CaptureStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, CaptureStatus::Idle)
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureStatus::Idle => Ok(()),
            CaptureStatus::Capturing(label) => write!(f, "Capturing {label}..."),
            CaptureStatus::Saved(label) => write!(f, "{label} image saved!"),
            CaptureStatus::Failed(reason) => f.write_str(reason),
        }
    }
}
