use std::fmt;

/// Platform primitives the storage layer can use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub session_storage: bool,
    pub structured_storage: bool,
    pub crypto: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            session_storage: true,
            structured_storage: true,
            crypto: true,
        }
    }

    /// True only when every primitive is present.
    pub fn is_secure(&self) -> bool {
        self.session_storage && self.structured_storage && self.crypto
    }
}

/// How the session tier behaves in a given environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// No session medium: writes are dropped, reads miss.
    Unavailable,
    /// Session medium without crypto: records are written in plaintext.
    PlaintextFallback,
    /// Records opting in are sealed with AES-GCM.
    Encrypted,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StorageMode::Unavailable => "unavailable",
            StorageMode::PlaintextFallback => "plaintext-fallback",
            StorageMode::Encrypted => "encrypted",
        };
        f.write_str(label)
    }
}

pub fn classify_environment(caps: &Capabilities) -> StorageMode {
    match (caps.session_storage, caps.crypto) {
        (false, _) => StorageMode::Unavailable,
        (true, false) => StorageMode::PlaintextFallback,
        (true, true) => StorageMode::Encrypted,
    }
}
