//! Error-log reference lookup.
//!
//! Guard records carry a numeric error-log id; published entries
//! reference the corresponding error-log object path. The mapping is
//! owned by the logging service, consumed here through a path scheme.

/// Maps between error-log ids and published error-log paths.
pub trait ErrorLogIndex {
    /// Object path for an error-log id. Id 0 means "no associated
    /// error log" and maps to `None`.
    fn path_for(&self, error_log_id: u32) -> Option<String>;

    /// Id for a published error-log path, if it belongs to the
    /// logging service's namespace.
    fn id_for(&self, error_log_path: &str) -> Option<u32>;
}

/// Path-scheme index rooted at the logging service's entry root.
pub struct PathErrorLogIndex {
    root: String,
}

impl PathErrorLogIndex {
    pub fn new(root: impl Into<String>) -> Self {
        let mut root = root.into();
        while root.ends_with('/') {
            root.pop();
        }
        Self { root }
    }
}

impl ErrorLogIndex for PathErrorLogIndex {
    fn path_for(&self, error_log_id: u32) -> Option<String> {
        if error_log_id == 0 {
            return None;
        }
        Some(format!("{}/{}", self.root, error_log_id))
    }

    fn id_for(&self, error_log_path: &str) -> Option<u32> {
        let rest = error_log_path.strip_prefix(&self.root)?;
        let rest = rest.strip_prefix('/')?;
        rest.parse().ok()
    }
}
