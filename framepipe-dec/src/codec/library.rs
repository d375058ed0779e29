//! Codec library availability
//!
//! Process-wide, init-once state for a codec backend. A loader is installed
//! once; the first `is_available()` runs it and caches the outcome for the
//! lifetime of the process, the same way a native library is loaded at most
//! once.
//!
//! ```rust
//! use framepipe_dec::codec::CodecLibrary;
//!
//! static LIBRARY: CodecLibrary = CodecLibrary::new("example");
//!
//! LIBRARY.install(|| Ok("1.0.0".to_string()));
//! assert!(LIBRARY.is_available());
//! assert_eq!(LIBRARY.version(), Some("1.0.0"));
//! ```

use once_cell::sync::OnceCell;
use tracing::{info, warn};

/// Backend probe: returns the library version, or why it could not be loaded
pub type LibraryLoader = fn() -> Result<String, String>;

/// Init-once availability state of one codec backend
pub struct CodecLibrary {
    name: &'static str,
    loader: OnceCell<LibraryLoader>,
    outcome: OnceCell<Result<String, String>>,
}

impl CodecLibrary {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            loader: OnceCell::new(),
            outcome: OnceCell::new(),
        }
    }

    /// Register the backend loader
    ///
    /// Returns false if a loader was already installed (the first one wins).
    pub fn install(&self, loader: LibraryLoader) -> bool {
        self.loader.set(loader).is_ok()
    }

    /// Probe the backend on first call, then return the cached outcome
    pub fn is_available(&self) -> bool {
        self.outcome().is_ok()
    }

    /// Backend version string, if the library is available
    pub fn version(&self) -> Option<&str> {
        self.outcome().as_ref().ok().map(String::as_str)
    }

    /// Load failure reason, if the library is unavailable
    pub fn load_error(&self) -> Option<&str> {
        self.outcome().as_ref().err().map(String::as_str)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn outcome(&self) -> &Result<String, String> {
        self.outcome.get_or_init(|| {
            let result = match self.loader.get() {
                Some(load) => load(),
                None => Err("no backend loader installed".to_string()),
            };
            match &result {
                Ok(version) => info!("Codec library {} loaded: version {}", self.name, version),
                Err(reason) => warn!("Codec library {} unavailable: {}", self.name, reason),
            }
            result
        })
    }
}
