//! Project context resolution
//!
//! Decides which project store an invocation operates against. Nothing is
//! cached between calls: every resolution re-reads the environment and the
//! pointer file.
//!
//! Resolution order:
//! 1. Explicit override passed by the caller
//! 2. `SCRIVENER_PROJECT_ROOT` environment variable
//! 3. The context pointer file
//! 4. The default project root
//!
//! A candidate only resolves when it is a recognized project root (carries
//! the `.scrivener/` marker). Invalid candidates are logged and skipped.

pub mod pointer;

pub use pointer::{ContextPointer, PointerStore};

use crate::config::{ContextConfig, PROJECT_ROOT_ENV};
use crate::db::{is_project_root, project_id_for, ProjectStore};
use crate::error::{Error, Result};
use crate::types::Project;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where a resolved project came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Explicit,
    Environment,
    Pointer,
    Default,
}

impl ContextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextSource::Explicit => "explicit",
            ContextSource::Environment => "environment",
            ContextSource::Pointer => "pointer",
            ContextSource::Default => "default",
        }
    }
}

/// A resolved project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRef {
    pub id: String,
    pub root: PathBuf,
    pub name: String,
    pub source: ContextSource,
}

impl ProjectRef {
    fn new(root: PathBuf, source: ContextSource) -> Self {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.to_string_lossy().to_string());
        Self {
            id: project_id_for(&root),
            root,
            name,
            source,
        }
    }

    /// Open this project's store
    pub fn open_store(&self) -> Result<ProjectStore> {
        ProjectStore::open(&self.root)
    }
}

/// Create (or reopen) the project at `root` and return its row.
///
/// Idempotent: an existing project is returned unchanged, whatever `name`
/// and `domain` say.
pub fn init_project(root: &Path, name: Option<&str>, domain: Option<&str>) -> Result<Project> {
    let root = canonical_root(root)?;
    let store = ProjectStore::open(&root)?;
    store.ensure_project(&root, name, domain)
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    if !root.is_dir() {
        return Err(Error::InvalidProjectRoot(root.to_path_buf()));
    }
    root.canonicalize()
        .map_err(|_| Error::InvalidProjectRoot(root.to_path_buf()))
}

/// Resolves and switches the active project
#[derive(Debug, Clone)]
pub struct ContextResolver {
    pointer: PointerStore,
    env_override: Option<PathBuf>,
    default_root: PathBuf,
}

impl ContextResolver {
    /// Resolver for this process, reading the environment override once.
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            pointer: PointerStore::new(config.pointer_path()),
            env_override: std::env::var_os(PROJECT_ROOT_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            default_root: config.default_project_root(),
        }
    }

    /// Resolver with every input given explicitly (for tests and embedding)
    pub fn with_parts(
        pointer_path: impl Into<PathBuf>,
        env_override: Option<PathBuf>,
        default_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pointer: PointerStore::new(pointer_path),
            env_override,
            default_root: default_root.into(),
        }
    }

    pub fn pointer(&self) -> &PointerStore {
        &self.pointer
    }

    pub fn default_root(&self) -> &Path {
        &self.default_root
    }

    /// Resolve the active project, or `None` when no candidate is valid.
    pub fn resolve(&self, explicit: Option<&Path>) -> Option<ProjectRef> {
        if let Some(root) = explicit {
            if let Some(project) = Self::candidate(root, ContextSource::Explicit) {
                return Some(project);
            }
        }

        if let Some(root) = &self.env_override {
            if let Some(project) = Self::candidate(root, ContextSource::Environment) {
                return Some(project);
            }
        }

        if let Some(pointer) = self.pointer.read() {
            if let Some(project) =
                Self::candidate(&pointer.active_project_root, ContextSource::Pointer)
            {
                return Some(project);
            }
        }

        Self::candidate(&self.default_root, ContextSource::Default)
    }

    /// Resolve the active project or fail with guidance.
    pub fn require(&self, explicit: Option<&Path>) -> Result<ProjectRef> {
        self.resolve(explicit).ok_or_else(|| Error::NoActiveProject {
            guidance: format!(
                "run `scrivener init <path>` and `scrivener switch <path>`, set {}, \
                 or run `scrivener reset` to use the default project at {}",
                PROJECT_ROOT_ENV,
                self.default_root.display()
            ),
        })
    }

    /// The active project, if any resolves
    pub fn get_active_project(&self) -> Option<ProjectRef> {
        self.resolve(None)
    }

    /// Make `root` the active project, initializing it if needed.
    pub fn switch_context(&self, root: &Path) -> Result<ProjectRef> {
        let project = init_project(root, None, None)?;
        self.pointer.write(&project.root_path)?;
        tracing::info!(project = %project.id, root = %project.root_path.display(), "Switched project");
        Ok(ProjectRef {
            id: project.id,
            root: project.root_path,
            name: project.name,
            source: ContextSource::Pointer,
        })
    }

    /// Point back at the default project, creating it if missing.
    pub fn reset_context(&self) -> Result<ProjectRef> {
        std::fs::create_dir_all(&self.default_root)?;
        self.switch_context(&self.default_root)
    }

    fn candidate(root: &Path, source: ContextSource) -> Option<ProjectRef> {
        if !is_project_root(root) {
            if source != ContextSource::Default {
                tracing::warn!(
                    root = %root.display(),
                    source = source.as_str(),
                    "Ignoring project root without marker"
                );
            }
            return None;
        }
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Some(ProjectRef::new(root, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
            }
        }

        fn project(&self, name: &str) -> PathBuf {
            let root = self.dir.path().join(name);
            std::fs::create_dir_all(&root).unwrap();
            init_project(&root, None, None).unwrap();
            root.canonicalize().unwrap()
        }

        fn resolver(&self, env_override: Option<PathBuf>) -> ContextResolver {
            ContextResolver::with_parts(
                self.dir.path().join("data/active_project.json"),
                env_override,
                self.dir.path().join("data/default-project"),
            )
        }
    }

    #[test]
    fn test_nothing_resolves_without_projects() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(None);
        assert!(resolver.resolve(None).is_none());
        let err = resolver.require(None).unwrap_err();
        assert!(matches!(err, Error::NoActiveProject { .. }));
        assert!(err.is_user_visible());
    }

    #[test]
    fn test_resolution_order() {
        let fixture = Fixture::new();
        let explicit = fixture.project("explicit");
        let env = fixture.project("env");
        let pointed = fixture.project("pointed");

        let resolver = fixture.resolver(Some(env.clone()));
        resolver.pointer().write(&pointed).unwrap();

        let project = resolver.resolve(Some(explicit.as_path())).unwrap();
        assert_eq!(project.root, explicit);
        assert_eq!(project.source, ContextSource::Explicit);

        let project = resolver.resolve(None).unwrap();
        assert_eq!(project.root, env);
        assert_eq!(project.source, ContextSource::Environment);

        let without_env = fixture.resolver(None);
        let project = without_env.resolve(None).unwrap();
        assert_eq!(project.root, pointed);
        assert_eq!(project.source, ContextSource::Pointer);
    }

    #[test]
    fn test_invalid_candidates_fall_through() {
        let fixture = Fixture::new();
        let pointed = fixture.project("pointed");
        let bare = fixture.dir.path().join("bare");
        std::fs::create_dir_all(&bare).unwrap();

        let resolver = fixture.resolver(Some(bare.clone()));
        resolver.pointer().write(&pointed).unwrap();

        let project = resolver.resolve(Some(bare.as_path())).unwrap();
        assert_eq!(project.root, pointed);
    }

    #[test]
    fn test_switch_initializes_and_persists() {
        let fixture = Fixture::new();
        let root = fixture.dir.path().join("fresh");
        std::fs::create_dir_all(&root).unwrap();
        let resolver = fixture.resolver(None);

        let project = resolver.switch_context(&root).unwrap();
        assert!(is_project_root(&root));
        assert_eq!(project.id, project_id_for(&root.canonicalize().unwrap()));

        let active = resolver.get_active_project().unwrap();
        assert_eq!(active.id, project.id);
        assert_eq!(
            resolver.pointer().read().unwrap().active_project_root,
            project.root
        );
    }

    #[test]
    fn test_switch_rejects_missing_directory() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver(None);
        let err = resolver
            .switch_context(&fixture.dir.path().join("missing"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidProjectRoot(_)));
        assert!(resolver.pointer().read().is_none());
    }

    #[test]
    fn test_reset_creates_default_project() {
        let fixture = Fixture::new();
        let other = fixture.project("other");
        let resolver = fixture.resolver(None);
        resolver.switch_context(&other).unwrap();

        let project = resolver.reset_context().unwrap();
        assert_eq!(
            project.root,
            fixture
                .dir
                .path()
                .join("data/default-project")
                .canonicalize()
                .unwrap()
        );
        assert_eq!(resolver.get_active_project().unwrap().id, project.id);
    }
}
