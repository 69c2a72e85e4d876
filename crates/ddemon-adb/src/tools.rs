//! Tool availability checking for the Android SDK
//!
//! Locates the `adb` and `emulator` binaries through PATH and the standard
//! SDK environment variables. Checked once, eagerly, before any process is
//! spawned so a missing tool is reported up front.

use std::path::{Path, PathBuf};

use ddemon_core::prelude::*;

/// Cached locations of the external tools needed for deployment
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Path to adb if found
    pub adb_path: Option<PathBuf>,

    /// Path to the emulator launcher if found
    pub emulator_path: Option<PathBuf>,
}

impl ToolAvailability {
    /// Check tool availability (run once at startup)
    pub fn check() -> Self {
        Self {
            adb_path: find_tool("adb", "platform-tools"),
            emulator_path: find_tool("emulator", "emulator"),
        }
    }

    /// adb path, or a fatal error if it was not found
    pub fn require_adb(&self) -> Result<&Path> {
        self.adb_path.as_deref().ok_or(Error::AdbNotFound)
    }

    /// emulator path, or a fatal error if it was not found
    pub fn require_emulator(&self) -> Result<&Path> {
        self.emulator_path.as_deref().ok_or(Error::EmulatorNotFound)
    }

    /// Get a user-friendly message when the SDK tooling is incomplete
    pub fn unavailable_message(&self) -> Option<&'static str> {
        if self.adb_path.is_none() {
            Some("adb not found. Set ANDROID_HOME or install Android platform-tools.")
        } else if self.emulator_path.is_none() {
            Some("Android emulator not found. Set ANDROID_HOME or install the emulator package.")
        } else {
            None
        }
    }
}

/// Locate a tool through PATH, then under `$ANDROID_HOME/<sdk_dir>` and
/// `$ANDROID_SDK_ROOT/<sdk_dir>`.
fn find_tool(name: &str, sdk_dir: &str) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        return Some(normalize(path));
    }

    for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
        if let Ok(sdk_root) = std::env::var(var) {
            let candidate = Path::new(&sdk_root).join(sdk_dir).join(name);
            if candidate.exists() {
                return Some(normalize(candidate));
            }
            // Windows tool names carry an .exe suffix
            let candidate_exe = candidate.with_extension("exe");
            if candidate_exe.exists() {
                return Some(normalize(candidate_exe));
            }
        }
    }

    None
}

/// Canonicalize without UNC paths on Windows
fn normalize(path: PathBuf) -> PathBuf {
    dunce::canonicalize(&path).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_tool_availability_default() {
        let availability = ToolAvailability::default();
        assert!(availability.adb_path.is_none());
        assert!(availability.emulator_path.is_none());
        assert!(availability.unavailable_message().is_some());
    }

    #[test]
    fn test_require_adb_missing() {
        let availability = ToolAvailability::default();
        assert!(matches!(availability.require_adb(), Err(Error::AdbNotFound)));
    }

    #[test]
    fn test_require_emulator_missing() {
        let availability = ToolAvailability::default();
        assert!(matches!(
            availability.require_emulator(),
            Err(Error::EmulatorNotFound)
        ));
    }

    #[test]
    fn test_all_tools_present_no_message() {
        let availability = ToolAvailability {
            adb_path: Some(PathBuf::from("/sdk/platform-tools/adb")),
            emulator_path: Some(PathBuf::from("/sdk/emulator/emulator")),
        };
        assert!(availability.unavailable_message().is_none());
        assert!(availability.require_adb().is_ok());
        assert!(availability.require_emulator().is_ok());
    }

    #[test]
    #[serial]
    fn test_find_tool_via_android_home() {
        let sdk = tempfile::tempdir().unwrap();
        let tools = sdk.path().join("platform-tools");
        std::fs::create_dir_all(&tools).unwrap();
        std::fs::write(tools.join("adb"), "").unwrap();

        std::env::set_var("ANDROID_HOME", sdk.path());
        let found = find_tool("adb", "platform-tools");
        std::env::remove_var("ANDROID_HOME");

        let found = found.expect("adb should be found under ANDROID_HOME");
        assert!(found.ends_with("adb") || found.extension().is_some());
    }

    #[test]
    #[serial]
    fn test_find_tool_via_sdk_root() {
        let sdk = tempfile::tempdir().unwrap();
        let emu = sdk.path().join("emulator");
        std::fs::create_dir_all(&emu).unwrap();
        std::fs::write(emu.join("emulator"), "").unwrap();

        std::env::set_var("ANDROID_SDK_ROOT", sdk.path());
        let found = find_tool("emulator", "emulator");
        std::env::remove_var("ANDROID_SDK_ROOT");

        assert!(found.is_some());
    }
}
