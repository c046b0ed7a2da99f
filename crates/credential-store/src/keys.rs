//! Storage key constants.

/// Storage keys used by the client.
pub struct StorageKeys;

impl StorageKeys {
    /// Bearer credential for the identity service.
    ///
    /// This is the only key the session engine persists; identity and
    /// onboarding data are always re-fetched from the server.
    pub const ACCESS_TOKEN: &'static str = "hearth_access_token";
}
