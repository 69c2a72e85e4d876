//! Deployable artifact description
//!
//! A deployment needs two facts about the built package: where the APK file
//! is and what application package it declares. The package name normally
//! comes from the project manifest, but callers that already know it can
//! supply it directly.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use ddemon_core::prelude::*;

/// Extracts `package="com.example.app"` from a manifest. Attribute order and
/// surrounding whitespace vary between build systems, the quoting does not.
static PACKAGE_ATTR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"package\s*=\s*"([^"]+)""#).expect("Invalid package attribute regex")
});

/// Source of the artifact to deploy.
///
/// The session only ever asks for these two facts, so tests can substitute a
/// fixed pair without touching the filesystem.
pub trait ArtifactSource: Send + Sync {
    /// Local path of the package file to upload
    fn artifact_path(&self) -> &Path;

    /// Declared application package name, e.g. `com.example.app`
    fn package_name(&self) -> &str;
}

/// A built APK plus its declared package name
#[derive(Debug, Clone)]
pub struct ApkArtifact {
    path: PathBuf,
    package: String,
}

impl ApkArtifact {
    /// Build from an already-known package name
    pub fn from_parts(path: impl Into<PathBuf>, package: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            package: package.into(),
        }
    }

    /// Build by reading the package name out of an `AndroidManifest.xml`
    pub fn from_manifest(path: impl Into<PathBuf>, manifest: &Path) -> Result<Self> {
        if !manifest.exists() {
            return Err(Error::no_manifest(manifest));
        }
        let contents = std::fs::read_to_string(manifest)?;
        let package = PACKAGE_ATTR_PATTERN
            .captures(&contents)
            .map(|caps| caps[1].to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::no_package_name(manifest))?;

        Ok(Self {
            path: path.into(),
            package,
        })
    }
}

impl ArtifactSource for ApkArtifact {
    fn artifact_path(&self) -> &Path {
        &self.path
    }

    fn package_name(&self) -> &str {
        &self.package
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="com.example.demo"
    android:versionCode="1">
    <application android:label="Demo" />
</manifest>
"#;

    fn write_manifest(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("AndroidManifest.xml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_from_parts() {
        let artifact = ApkArtifact::from_parts("/out/app.apk", "com.example.demo");
        assert_eq!(artifact.artifact_path(), Path::new("/out/app.apk"));
        assert_eq!(artifact.package_name(), "com.example.demo");
    }

    #[test]
    fn test_from_manifest_extracts_package() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(&dir, MANIFEST);

        let artifact = ApkArtifact::from_manifest("/out/app.apk", &manifest).unwrap();
        assert_eq!(artifact.package_name(), "com.example.demo");
    }

    #[test]
    fn test_from_manifest_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("AndroidManifest.xml");

        let result = ApkArtifact::from_manifest("/out/app.apk", &manifest);
        assert!(matches!(result, Err(Error::NoManifest { .. })));
    }

    #[test]
    fn test_from_manifest_without_package_attr() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(&dir, "<manifest></manifest>");

        let result = ApkArtifact::from_manifest("/out/app.apk", &manifest);
        assert!(matches!(result, Err(Error::NoPackageName { .. })));
    }

    #[test]
    fn test_from_manifest_empty_package_attr() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(&dir, r#"<manifest package="" />"#);

        let result = ApkArtifact::from_manifest("/out/app.apk", &manifest);
        assert!(matches!(result, Err(Error::NoPackageName { .. })));
    }

    #[test]
    fn test_from_manifest_tolerates_spacing() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_manifest(&dir, "<manifest package = \"a.b.c\" />");

        let artifact = ApkArtifact::from_manifest("/out/app.apk", &manifest).unwrap();
        assert_eq!(artifact.package_name(), "a.b.c");
    }
}
