use std::env;

use crate::crypto::KdfParams;

/// Who is writing, and with what settings.
///
/// Passed explicitly to every save so nothing reads process-wide state
/// while a file is being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterContext {
    pub application: String,
    pub user: String,
    pub host: String,
    pub kdf: KdfParams,
}

impl WriterContext {
    pub fn new(
        application: impl Into<String>,
        user: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            user: user.into(),
            host: host.into(),
            kdf: KdfParams::default(),
        }
    }

    /// Application name from this crate; user and host from the environment.
    pub fn from_env() -> Self {
        let user = first_var(&["USER", "USERNAME", "LOGNAME"]).unwrap_or_default();
        let host = first_var(&["HOSTNAME", "COMPUTERNAME"]).unwrap_or_default();
        Self::new(default_application(), user, host)
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }
}

impl Default for WriterContext {
    fn default() -> Self {
        Self::from_env()
    }
}

fn default_application() -> String {
    format!("{} V{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn first_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MIN_HASH_ITERATIONS;

    #[test]
    fn application_names_this_crate() {
        let ctx = WriterContext::from_env();
        assert!(ctx.application.starts_with("strongbox V"));
        assert_eq!(ctx.kdf, KdfParams::default());
    }

    #[test]
    fn kdf_can_be_overridden() {
        let kdf = KdfParams::new(MIN_HASH_ITERATIONS).unwrap();
        let ctx = WriterContext::new("app", "u", "h").with_kdf(kdf);
        assert_eq!(ctx.kdf.iterations(), MIN_HASH_ITERATIONS);
    }
}
