use crate::config::Config;

/// One gibibyte in bytes.
pub const GIB: u64 = 1 << 30;

/// Outcome of checking a candidate file against the size window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Eligible,
    Rejected(String),
}

impl Admission {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Admission::Eligible)
    }
}

/// Size gate applied before a submission session may begin.
///
/// Only the byte size is checked; type and name are not looked at.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionPolicy {
    min: u64,
    max: u64,
}

impl AdmissionPolicy {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.min_file_size, config.max_file_size)
    }

    /// Inclusive on both ends.
    pub fn check(&self, size: u64) -> Admission {
        if size < self.min || size > self.max {
            Admission::Rejected(self.rejection_message())
        } else {
            Admission::Eligible
        }
    }

    /// Human-readable bounds, e.g. `1GB–4GB`.
    pub fn range_label(&self) -> String {
        format!("{}–{}", human_size(self.min), human_size(self.max))
    }

    fn rejection_message(&self) -> String {
        format!("File must be {}", self.range_label())
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::new(GIB, 4 * GIB)
    }
}

fn human_size(bytes: u64) -> String {
    if bytes >= GIB && bytes % GIB == 0 {
        format!("{}GB", bytes / GIB)
    } else if bytes >= 1 << 20 && bytes % (1 << 20) == 0 {
        format!("{}MB", bytes >> 20)
    } else {
        format!("{bytes}B")
    }
}
