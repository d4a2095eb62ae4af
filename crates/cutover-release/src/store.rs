//! ReleaseStore — filesystem-backed release lifecycle management.
//!
//! Releases are materialized once and never modified; only the
//! `current`/`previous` pointers change afterwards. Pointer rebinds are
//! a single `rename(2)` of a freshly created symlink, which is atomic
//! on POSIX filesystems.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use cutover_core::{DeployError, DeployResult, EnvName, Release, ReleaseId, ReleaseStatus};

/// Marker file written inside every release directory.
const MARKER: &str = "release.json";

/// Filesystem-backed store of releases for one environment.
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    env: EnvName,
    root: PathBuf,
}

impl ReleaseStore {
    /// Open (or initialize) the store rooted at the environment directory.
    pub fn open(env: impl Into<EnvName>, root: impl Into<PathBuf>) -> DeployResult<Self> {
        let store = Self {
            env: env.into(),
            root: root.into(),
        };
        fs::create_dir_all(store.releases_dir())?;
        Ok(store)
    }

    /// Environment name this store manages.
    pub fn env(&self) -> &str {
        &self.env
    }

    /// Environment root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn releases_dir(&self) -> PathBuf {
        self.root.join("releases")
    }

    fn release_dir(&self, id: &str) -> PathBuf {
        self.releases_dir().join(id)
    }

    fn current_link(&self) -> PathBuf {
        self.root.join("current")
    }

    fn previous_link(&self) -> PathBuf {
        self.root.join("previous")
    }

    /// Materialize a new immutable release from an artifact directory.
    ///
    /// The artifact tree is copied into `releases/<id>/` and a
    /// `release.json` marker is written. The id is minted from the
    /// clock; same-second collisions get a numeric suffix so ids stay
    /// unique and ordered.
    pub fn create(&self, artifact: &Path) -> DeployResult<Release> {
        if !artifact.is_dir() {
            return Err(DeployError::Storage(format!(
                "artifact is not a directory: {}",
                artifact.display()
            )));
        }

        let id = self.mint_id();
        let dest = self.release_dir(&id);
        fs::create_dir_all(&dest)?;

        copy_tree(artifact, &dest)?;

        let release = Release {
            id: id.clone(),
            path: dest,
            created_at: Utc::now(),
            status: ReleaseStatus::Pending,
        };
        self.write_marker(&release)?;

        info!(env = %self.env, release = %id, "release created");
        Ok(release)
    }

    /// Atomically rebind `current` to the given release.
    ///
    /// The previously current release is saved to `previous` and marked
    /// `Retired`; the target is marked `Live`. Switching to the release
    /// that is already current is a no-op success and does not clobber
    /// `previous`.
    pub fn switch(&self, id: &ReleaseId) -> DeployResult<()> {
        let dest = self.release_dir(id);
        if !dest.is_dir() {
            return Err(DeployError::Storage(format!("no such release: {id}")));
        }

        if self.current_id()?.as_ref() == Some(id) {
            debug!(env = %self.env, release = %id, "already current, switch is a no-op");
            return Ok(());
        }

        if let Some(old) = self.current_id()? {
            self.rebind(&self.previous_link(), &old)?;
            self.set_status(&old, ReleaseStatus::Retired)?;
        }

        self.rebind(&self.current_link(), id)?;
        self.set_status(id, ReleaseStatus::Live)?;

        info!(env = %self.env, release = %id, "current pointer switched");
        Ok(())
    }

    /// Rebind `current` to the release that was live before it.
    ///
    /// Idempotent: once `current` already points at the previous
    /// release, further calls return the same binding. Fails with
    /// `NoPriorRelease` on a first-ever deployment.
    pub fn rollback_to_previous(&self) -> DeployResult<Release> {
        let prev = self.previous_id()?.ok_or(DeployError::NoPriorRelease)?;

        if self.current_id()?.as_ref() == Some(&prev) {
            debug!(env = %self.env, release = %prev, "already rolled back");
            return self.get(&prev);
        }

        // Retire the release being rolled away from, unless a failed
        // gate already stamped it.
        if let Some(old) = self.current_id()? {
            if self.get(&old)?.status == ReleaseStatus::Live {
                self.set_status(&old, ReleaseStatus::Retired)?;
            }
        }

        self.rebind(&self.current_link(), &prev)?;
        self.set_status(&prev, ReleaseStatus::Live)?;

        info!(env = %self.env, release = %prev, "rolled back to previous release");
        self.get(&prev)
    }

    /// The release currently bound to `current`, if any.
    pub fn current(&self) -> DeployResult<Option<Release>> {
        match self.current_id()? {
            Some(id) => Ok(Some(self.get(&id)?)),
            None => Ok(None),
        }
    }

    /// The release bound to `previous`, if any.
    pub fn previous(&self) -> DeployResult<Option<Release>> {
        match self.previous_id()? {
            Some(id) => Ok(Some(self.get(&id)?)),
            None => Ok(None),
        }
    }

    /// Load a release by id from its marker file.
    pub fn get(&self, id: &str) -> DeployResult<Release> {
        let marker = self.release_dir(id).join(MARKER);
        let bytes = fs::read(&marker)
            .map_err(|e| DeployError::Storage(format!("read {}: {e}", marker.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DeployError::Storage(format!("parse {}: {e}", marker.display())))
    }

    /// All releases, oldest first.
    pub fn list(&self) -> DeployResult<Vec<Release>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.releases_dir())? {
            let entry = entry?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        ids.iter().map(|id| self.get(id)).collect()
    }

    /// Update a release's lifecycle status in its marker file.
    pub fn set_status(&self, id: &str, status: ReleaseStatus) -> DeployResult<()> {
        let mut release = self.get(id)?;
        release.status = status;
        self.write_marker(&release)?;
        debug!(env = %self.env, release = %id, %status, "release status updated");
        Ok(())
    }

    /// Delete releases beyond the `retain` most recent.
    ///
    /// The releases bound to `current` and `previous` are always kept,
    /// even when older than the retention horizon. Returns the ids that
    /// were deleted.
    pub fn prune(&self, retain: usize) -> DeployResult<Vec<ReleaseId>> {
        let mut releases = self.list()?;
        releases.reverse(); // newest first

        let current = self.current_id()?;
        let previous = self.previous_id()?;

        let mut deleted = Vec::new();
        for release in releases.iter().skip(retain) {
            if Some(&release.id) == current.as_ref() || Some(&release.id) == previous.as_ref() {
                continue;
            }
            fs::remove_dir_all(self.release_dir(&release.id))?;
            deleted.push(release.id.clone());
        }

        if !deleted.is_empty() {
            info!(env = %self.env, count = deleted.len(), "pruned old releases");
        }
        Ok(deleted)
    }

    /// Id of the release `current` points at.
    pub fn current_id(&self) -> DeployResult<Option<ReleaseId>> {
        read_link_id(&self.current_link())
    }

    /// Id of the release `previous` points at.
    pub fn previous_id(&self) -> DeployResult<Option<ReleaseId>> {
        read_link_id(&self.previous_link())
    }

    /// Mint a fresh release id: UTC timestamp, suffixed on collision.
    fn mint_id(&self) -> ReleaseId {
        let base = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let mut id = base.clone();
        let mut n = 2;
        while self.release_dir(&id).exists() {
            id = format!("{base}-{n}");
            n += 1;
        }
        id
    }

    /// Atomically point `link` at `releases/<id>` via tmp-symlink + rename.
    fn rebind(&self, link: &Path, id: &str) -> DeployResult<()> {
        let target = PathBuf::from("releases").join(id);
        let tmp = link.with_extension("tmp");
        let _ = fs::remove_file(&tmp);
        symlink(&target, &tmp)
            .map_err(|e| DeployError::Storage(format!("symlink {}: {e}", tmp.display())))?;
        fs::rename(&tmp, link)
            .map_err(|e| DeployError::Storage(format!("rename {}: {e}", link.display())))?;
        Ok(())
    }

    fn write_marker(&self, release: &Release) -> DeployResult<()> {
        let marker = self.release_dir(&release.id).join(MARKER);
        let tmp = marker.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(release)
            .map_err(|e| DeployError::Storage(format!("serialize marker: {e}")))?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &marker)?;
        Ok(())
    }
}

/// Resolve a pointer symlink to the release id it targets.
fn read_link_id(link: &Path) -> DeployResult<Option<ReleaseId>> {
    match fs::read_link(link) {
        Ok(target) => Ok(target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DeployError::Storage(format!(
            "read link {}: {e}",
            link.display()
        ))),
    }
}

/// Copy a directory tree, preserving layout.
fn copy_tree(src: &Path, dest: &Path) -> DeployResult<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| DeployError::Storage(format!("walk artifact: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| DeployError::Storage(format!("artifact path: {e}")))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        } else {
            warn!(path = %entry.path().display(), "skipping non-regular file in artifact");
        }
    }
    Ok(())
}
