//! Kernel identification.

use serde::{Deserialize, Serialize};

/// Language metadata reported to the front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub version: String,
    pub mimetype: String,
    pub file_extension: String,
}

/// Answer to a kernel info request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfo {
    pub implementation: String,
    pub implementation_version: String,
    pub banner: String,
    pub language_info: LanguageInfo,
}

impl Default for KernelInfo {
    fn default() -> Self {
        Self {
            implementation: "bscript".to_string(),
            implementation_version: env!("CARGO_PKG_VERSION").to_string(),
            banner: "BraneScript".to_string(),
            language_info: LanguageInfo {
                name: "BraneScript".to_string(),
                version: "2.0.0".to_string(),
                mimetype: "application/brane-script".to_string(),
                file_extension: ".bs".to_string(),
            },
        }
    }
}
