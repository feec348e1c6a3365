//! Navigation primitive used for sign-in redirects.

/// Options for a navigation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigateOptions {
    /// Replace the current history entry instead of pushing a new one.
    pub replace: bool,
}

impl NavigateOptions {
    /// Options that replace the current entry.
    pub fn replace() -> Self {
        Self { replace: true }
    }
}

/// Router capability supplied by the host application.
pub trait Navigator: Send + Sync {
    /// Navigates to `path`.
    fn navigate(&self, path: &str, options: NavigateOptions);
}

/// Path used for sign-in redirects.
pub const LOGIN_PATH: &str = "/login";
