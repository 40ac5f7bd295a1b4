//! Test helpers: scratch install trees and launch files

#![allow(dead_code)]

use mission_launch::{load_plan, LaunchError, PackageLocator, ResolvedPlan};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A throwaway install prefix laid out as `<root>/share/<pkg>`
pub struct InstallTree {
    dir: TempDir,
}

impl InstallTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn share(&self, package: &str) -> PathBuf {
        self.root().join("share").join(package)
    }

    /// Create an empty package share directory
    pub fn package(&self, package: &str) -> PathBuf {
        let share = self.share(package);
        std::fs::create_dir_all(&share).expect("create share dir");
        share
    }

    /// Write a file relative to a package share directory
    pub fn write(&self, package: &str, relative: &str, content: &str) -> PathBuf {
        let path = self.package(package).join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(&path, content).expect("write file");
        path
    }

    /// Write a launch file at the root of the tree
    pub fn launch_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.root().join(name);
        std::fs::write(&path, content).expect("write launch file");
        path
    }

    /// Path for scratch output files
    pub fn out(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    pub fn locator(&self) -> Arc<PackageLocator> {
        Arc::new(PackageLocator::new(vec![self.root().to_path_buf()]))
    }

    pub fn plan(&self, launch_file: &Path, overrides: &[(&str, &str)]) -> Result<ResolvedPlan, LaunchError> {
        let overrides: HashMap<String, String> = overrides
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_plan(launch_file, &overrides, self.locator(), false)
    }
}

/// Read a scratch output file, empty if it was never written
pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
