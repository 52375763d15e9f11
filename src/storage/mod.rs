use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::pipeline::OutputKind;

/// Owns the on-disk split between the published outputs directory and the
/// per-run scratch area. Nothing outside this module builds artifact paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    outputs_dir: PathBuf,
    work_root: PathBuf,
}

impl ArtifactStore {
    pub fn new(outputs_dir: impl Into<PathBuf>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            outputs_dir: outputs_dir.into(),
            work_root: work_root.into(),
        }
    }

    pub fn ensure_layout(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.outputs_dir.as_path())?;
        fs::create_dir_all(self.work_root.as_path())?;
        Ok(())
    }

    pub fn outputs_dir(&self) -> &Path {
        self.outputs_dir.as_path()
    }

    pub fn create_run_workspace(&self, run_id: Uuid) -> Result<RunWorkspace, std::io::Error> {
        let dir = self.work_root.join(run_id.to_string());
        fs::create_dir_all(dir.as_path())?;
        Ok(RunWorkspace { dir })
    }

    /// Moves a finished artifact out of the scratch area under its public
    /// name and returns `(filename, absolute path)`.
    pub fn persist_artifact(
        &self,
        run_id: Uuid,
        kind: OutputKind,
        source: &Path,
    ) -> Result<(String, PathBuf), std::io::Error> {
        fs::create_dir_all(self.outputs_dir.as_path())?;
        let filename = format!("{run_id}_{}.{}", kind.as_str(), kind.file_extension());
        let target = self.outputs_dir.join(filename.as_str());
        fs::rename(source, target.as_path())?;
        Ok((filename, target))
    }

    /// Resolves a published filename to its path, refusing anything that
    /// could escape the outputs directory.
    pub fn resolve_output(&self, filename: &str) -> Option<PathBuf> {
        if !is_safe_filename(filename) {
            return None;
        }
        let path = self.outputs_dir.join(filename);
        if path.is_file() {
            Some(path)
        } else {
            None
        }
    }
}

/// Scoped scratch directory for one run; every stage writes here until
/// aggregation publishes the survivors.
#[derive(Debug)]
pub struct RunWorkspace {
    dir: PathBuf,
}

impl RunWorkspace {
    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    pub fn stage_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn cleanup(&self) {
        let _ = fs::remove_dir_all(self.dir.as_path());
    }
}

pub fn is_safe_filename(value: &str) -> bool {
    if value.is_empty() || value == "." || value == ".." {
        return false;
    }
    !value
        .chars()
        .any(|ch| ch == '/' || ch == '\\' || ch.is_control())
}

pub fn mime_for_path(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|v| v.to_str())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => String::from("image/png"),
        "jpg" | "jpeg" => String::from("image/jpeg"),
        "webp" => String::from("image/webp"),
        "svg" => String::from("image/svg+xml"),
        _ => String::from("application/octet-stream"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temp_store() -> ArtifactStore {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let root = std::env::temp_dir().join(format!("kontur_storage_{stamp}"));
        let store = ArtifactStore::new(root.join("outputs"), root.join("work"));
        store.ensure_layout().expect("layout should build");
        store
    }

    #[test]
    fn workspace_paths_are_scoped_per_run() {
        let store = temp_store();
        let run_id = Uuid::new_v4();
        let workspace = store
            .create_run_workspace(run_id)
            .expect("workspace should build");

        assert!(workspace.dir().ends_with(run_id.to_string()));
        assert_eq!(
            workspace.stage_path("source.png"),
            workspace.dir().join("source.png")
        );

        fs::write(workspace.stage_path("source.png"), b"png").expect("stage write");
        workspace.cleanup();
        assert!(!workspace.dir().exists());
    }

    #[test]
    fn persist_moves_the_artifact_under_its_public_name() {
        let store = temp_store();
        let run_id = Uuid::new_v4();
        let workspace = store
            .create_run_workspace(run_id)
            .expect("workspace should build");
        let staged = workspace.stage_path("vector.svg");
        fs::write(&staged, b"<svg/>").expect("stage write");

        let (filename, path) = store
            .persist_artifact(run_id, OutputKind::Vector, staged.as_path())
            .expect("persist should succeed");

        assert_eq!(filename, format!("{run_id}_vector.svg"));
        assert!(path.is_file());
        assert!(!staged.exists());
        assert_eq!(store.resolve_output(filename.as_str()), Some(path));
    }

    #[test]
    fn resolve_refuses_traversal_and_misses() {
        let store = temp_store();
        assert_eq!(store.resolve_output("../secrets.txt"), None);
        assert_eq!(store.resolve_output("a/b.png"), None);
        assert_eq!(store.resolve_output(".."), None);
        assert_eq!(store.resolve_output(""), None);
        assert_eq!(store.resolve_output("not_there.png"), None);
    }

    #[test]
    fn mime_covers_the_published_kinds() {
        assert_eq!(mime_for_path(Path::new("x.png")), "image/png");
        assert_eq!(mime_for_path(Path::new("x.svg")), "image/svg+xml");
        assert_eq!(
            mime_for_path(Path::new("x.bin")),
            "application/octet-stream"
        );
    }
}
