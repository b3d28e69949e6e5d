//! Backend selection.

use std::fmt;
use std::str::FromStr;

use crate::device::BackendKind;

/// Environment variable consulted by [`BackendPreference::from_env`].
pub const BACKEND_ENV: &str = "LUMEN_BACKEND";

/// Which backend [`NativeContext`](crate::backend::NativeContext) should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Best available: Metal, then wgpu, then the software device.
    #[default]
    Auto,
    Metal,
    Wgpu,
    Software,
}

impl BackendPreference {
    /// Read `LUMEN_BACKEND`. Unset means `Auto`.
    pub fn from_env() -> Result<Self, String> {
        match std::env::var(BACKEND_ENV) {
            Ok(value) => value.parse(),
            Err(std::env::VarError::NotPresent) => Ok(BackendPreference::Auto),
            Err(e) => Err(format!("{}: {}", BACKEND_ENV, e)),
        }
    }

    /// The single backend this preference names, if any.
    pub fn backend(self) -> Option<BackendKind> {
        match self {
            BackendPreference::Auto => None,
            BackendPreference::Metal => Some(BackendKind::Metal),
            BackendPreference::Wgpu => Some(BackendKind::Wgpu),
            BackendPreference::Software => Some(BackendKind::Software),
        }
    }
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(BackendPreference::Auto),
            "metal" => Ok(BackendPreference::Metal),
            "wgpu" | "webgpu" => Ok(BackendPreference::Wgpu),
            "software" | "cpu" => Ok(BackendPreference::Software),
            other => Err(format!(
                "unknown backend '{}' (expected auto, metal, wgpu or software)",
                other
            )),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backend() {
            Some(kind) => write!(f, "{}", kind),
            None => f.write_str("auto"),
        }
    }
}
