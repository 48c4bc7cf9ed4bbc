use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use remora_common::frame::Frame;
use remora_common::wire::format_float;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{SessionHandle, SessionStore};

const FRAME_EXTENSION: &str = "pnm";
const TAGS_FILE: &str = "tags.json";

type TagIndex = BTreeMap<String, BTreeSet<String>>;

/// Sessions as directories of PNM frames, labels encoded in the file names.
///
/// Session tags live next to the sessions in a single `tags.json` index.
#[derive(Debug, Clone)]
pub struct FsSessionStore {
    root: PathBuf,
    tags_lock: Arc<Mutex<()>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub frames: usize,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub name: String,
    pub counter: u64,
    pub angle: f32,
    pub throttle: f32,
    pub milliseconds: f32,
}

impl FsSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create sessions directory {:?}", root))?;
        Ok(Self {
            root,
            tags_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut tags = self.read_tags()?;
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.root).context("Failed to read sessions directory")? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let frames = count_frames(&entry.path())?;
            let tags = tags.remove(&name).unwrap_or_default().into_iter().collect();
            sessions.push(SessionSummary { name, frames, tags });
        }
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sessions)
    }

    pub fn session_frames(&self, name: &str) -> Result<Vec<FrameRecord>> {
        let dir = self.existing_session_dir(name)?;
        let mut frames = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let file_name = entry?.file_name().to_string_lossy().to_string();
            if let Some(record) = parse_frame_name(&file_name) {
                frames.push(record);
            }
        }
        frames.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(frames)
    }

    /// Raw PNM bytes of one recorded frame.
    pub fn frame_bytes(&self, name: &str, frame: &str) -> Result<Vec<u8>> {
        let dir = self.existing_session_dir(name)?;
        if parse_frame_name(frame).is_none() || !is_plain_name(frame) {
            bail!("Invalid frame name {:?}", frame);
        }
        fs::read(dir.join(frame)).with_context(|| format!("Frame {} not found in {}", frame, name))
    }

    pub fn delete_session(&self, name: &str) -> Result<()> {
        let dir = self.existing_session_dir(name)?;
        fs::remove_dir_all(&dir).with_context(|| format!("Failed to delete session {}", name))?;
        info!("Deleted session {}", name);
        self.update_tags(|tags| tags.remove(name).is_some())?;
        Ok(())
    }

    /// The most recently written session, if any.
    ///
    /// Session names use a 12 hour clock, so recency comes from the directory
    /// modification time rather than the name.
    pub fn last_session(&self) -> Result<Option<String>> {
        let mut last: Option<(SystemTime, String)> = None;
        for entry in fs::read_dir(&self.root).context("Failed to read sessions directory")? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            let name = entry.file_name().to_string_lossy().to_string();
            let newer = match &last {
                Some(current) => (modified, &name) > (current.0, &current.1),
                None => true,
            };
            if newer {
                last = Some((modified, name));
            }
        }
        Ok(last.map(|(_, name)| name))
    }

    /// Removes the frames written within `window` of the session's newest
    /// frame, returning how many were removed.
    pub fn delete_recent_frames(&self, name: &str, window: Duration) -> Result<usize> {
        let dir = self.existing_session_dir(name)?;
        let mut frames = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if parse_frame_name(&entry.file_name().to_string_lossy()).is_some() {
                frames.push((entry.metadata()?.modified()?, entry.path()));
            }
        }
        let Some(newest) = frames.iter().map(|(modified, _)| *modified).max() else {
            return Ok(0);
        };
        let cutoff = newest.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        for (modified, path) in frames {
            if modified >= cutoff {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to delete frame {:?}", path))?;
                removed += 1;
            }
        }
        info!("Deleted the last {} frames of session {}", removed, name);
        Ok(removed)
    }

    pub fn session_tags(&self, name: &str) -> Result<Vec<String>> {
        self.existing_session_dir(name)?;
        let tags = self.read_tags()?;
        Ok(tags
            .get(name)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Every tag in use, across all sessions.
    pub fn all_tags(&self) -> Result<Vec<String>> {
        let tags = self.read_tags()?;
        let all: BTreeSet<String> = tags.into_values().flatten().collect();
        Ok(all.into_iter().collect())
    }

    pub fn add_tag(&self, name: &str, tag: &str) -> Result<()> {
        self.existing_session_dir(name)?;
        let tag = valid_tag(tag)?;
        self.update_tags(|tags| {
            tags.entry(name.to_string())
                .or_default()
                .insert(tag.to_string())
        })?;
        debug!("Tagged session {} with {:?}", name, tag);
        Ok(())
    }

    /// Returns whether the session carried the tag.
    pub fn remove_tag(&self, name: &str, tag: &str) -> Result<bool> {
        self.existing_session_dir(name)?;
        let tag = valid_tag(tag)?;
        self.update_tags(|tags| {
            let Some(session) = tags.get_mut(name) else {
                return false;
            };
            let removed = session.remove(tag);
            if session.is_empty() {
                tags.remove(name);
            }
            removed
        })
    }

    fn read_tags(&self) -> Result<TagIndex> {
        let path = self.root.join(TAGS_FILE);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse tags file {:?}", path)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(TagIndex::new()),
            Err(e) => Err(e).context(format!("Failed to read tags file {:?}", path)),
        }
    }

    /// Read-modify-write of the tag index; written back only when `change`
    /// reports a modification.
    fn update_tags(&self, change: impl FnOnce(&mut TagIndex) -> bool) -> Result<bool> {
        let _guard = self
            .tags_lock
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        let mut tags = self.read_tags()?;
        if !change(&mut tags) {
            return Ok(false);
        }
        let path = self.root.join(TAGS_FILE);
        let staging = self.root.join(format!(".{}.tmp", TAGS_FILE));
        fs::write(&staging, serde_json::to_vec_pretty(&tags)?)
            .with_context(|| format!("Failed to write tags file {:?}", staging))?;
        fs::rename(&staging, &path)
            .with_context(|| format!("Failed to replace tags file {:?}", path))?;
        Ok(true)
    }

    /// Removes the named frames, returning how many existed.
    pub fn delete_frames(&self, name: &str, frames: &[String]) -> Result<usize> {
        let dir = self.existing_session_dir(name)?;
        let mut removed = 0;
        for frame in frames {
            if parse_frame_name(frame).is_none() || !is_plain_name(frame) {
                bail!("Invalid frame name {:?}", frame);
            }
            match fs::remove_file(dir.join(frame)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Frame {} already gone from {}", frame, name)
                }
                Err(e) => return Err(e).context(format!("Failed to delete frame {}", frame)),
            }
        }
        Ok(removed)
    }

    pub fn session_dir(&self, name: &str) -> Result<PathBuf> {
        if !is_plain_name(name) {
            bail!("Invalid session name {:?}", name);
        }
        Ok(self.root.join(name))
    }

    fn existing_session_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.session_dir(name)?;
        if !dir.is_dir() {
            bail!("Session {} not found", name);
        }
        Ok(dir)
    }

    fn create_session_dir(&self) -> Result<(String, PathBuf)> {
        let stamp = chrono::Local::now().format("%Y_%m_%d__%I_%M_%S_%p").to_string();
        for attempt in 1..=100 {
            let name = if attempt == 1 {
                stamp.clone()
            } else {
                format!("{}_{}", stamp, attempt)
            };
            let dir = self.root.join(&name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((name, dir)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).context(format!("Failed to create session directory {:?}", dir))
                }
            }
        }
        Err(anyhow!("Too many sessions started at {}", stamp))
    }
}

impl SessionStore for FsSessionStore {
    fn open(&self) -> Result<Arc<dyn SessionHandle>> {
        let (name, dir) = self.create_session_dir()?;
        info!("Recording session {} opened at {:?}", name, dir);
        Ok(Arc::new(FsSession {
            name,
            dir,
            inner: Mutex::new(SessionInner::default()),
        }))
    }
}

#[derive(Debug, Default)]
struct SessionInner {
    counter: u64,
    closed: bool,
}

#[derive(Debug)]
pub struct FsSession {
    name: String,
    dir: PathBuf,
    inner: Mutex<SessionInner>,
}

impl SessionHandle for FsSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, frame: &Frame, angle: f32, throttle: f32, milliseconds: f32) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        if inner.closed {
            bail!("Session {} is closed", self.name);
        }
        inner.counter += 1;
        let file_name = frame_name(inner.counter, angle, throttle, milliseconds);
        fs::write(self.dir.join(&file_name), frame.to_pnm())
            .with_context(|| format!("Failed to write {} in session {}", file_name, self.name))?;
        Ok(())
    }

    fn close(&self) {
        match self.inner.lock() {
            Ok(mut inner) if !inner.closed => {
                inner.closed = true;
                info!("Recording session {} closed after {} frames", self.name, inner.counter);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to close session {}: {}", self.name, e),
        }
    }
}

impl Drop for FsSession {
    fn drop(&mut self) {
        self.close();
    }
}

pub fn frame_name(counter: u64, angle: f32, throttle: f32, milliseconds: f32) -> String {
    format!(
        "frame_{:05}_ttl_{}_agl_{}_mil_{}.{}",
        counter,
        format_float(throttle),
        format_float(angle),
        format_float(milliseconds),
        FRAME_EXTENSION
    )
}

pub fn parse_frame_name(name: &str) -> Option<FrameRecord> {
    let stem = name.strip_suffix(&format!(".{}", FRAME_EXTENSION))?;
    let parts: Vec<&str> = stem.split('_').collect();
    match parts.as_slice() {
        ["frame", counter, "ttl", throttle, "agl", angle, "mil", milliseconds] => {
            Some(FrameRecord {
                name: name.to_string(),
                counter: counter.parse().ok()?,
                angle: angle.parse().ok()?,
                throttle: throttle.parse().ok()?,
                milliseconds: milliseconds.parse().ok()?,
            })
        }
        _ => None,
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != ".."
}

fn valid_tag(tag: &str) -> Result<&str> {
    let tag = tag.trim();
    if tag.is_empty() || tag.len() > 64 || tag.chars().any(char::is_control) {
        bail!("Invalid tag {:?}", tag);
    }
    Ok(tag)
}

fn count_frames(dir: &Path) -> Result<usize> {
    let mut frames = 0;
    for entry in fs::read_dir(dir)? {
        if parse_frame_name(&entry?.file_name().to_string_lossy()).is_some() {
            frames += 1;
        }
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSessionStore::new(dir.path().join("sessions")).unwrap();
        (dir, store)
    }

    #[test]
    fn frame_names_round_trip() {
        let name = frame_name(7, -0.2, 0.4, 0.0);
        assert_eq!(name, "frame_00007_ttl_0.4_agl_-0.2_mil_0.0.pnm");
        let record = parse_frame_name(&name).unwrap();
        assert_eq!(record.counter, 7);
        assert_eq!(record.angle, -0.2);
        assert_eq!(record.throttle, 0.4);
        assert_eq!(record.milliseconds, 0.0);
    }

    #[test]
    fn foreign_files_are_not_frames() {
        assert!(parse_frame_name("notes.txt").is_none());
        assert!(parse_frame_name("frame_x_ttl_0_agl_0_mil_0.pnm").is_none());
        assert!(parse_frame_name("frame_00001_ttl_0.0_agl_0.0.pnm").is_none());
    }

    #[test]
    fn put_writes_labelled_frames_until_closed() {
        let (_tmp, store) = store();
        let session = store.open().unwrap();
        let frame = Frame::new(2, 2, 1, vec![0, 64, 128, 255]).unwrap();

        session.put(&frame, 0.5, 0.25, 0.0).unwrap();
        session.put(&frame, -1.0, 0.0, 0.0).unwrap();

        let frames = store.session_frames(session.name()).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!((frames[0].angle, frames[0].throttle), (0.5, 0.25));
        assert_eq!((frames[1].angle, frames[1].throttle), (-1.0, 0.0));

        let written = fs::read(store.root().join(session.name()).join(&frames[0].name)).unwrap();
        assert_eq!(Frame::from_pnm(&written).unwrap(), frame);

        session.close();
        assert!(session.put(&frame, 0.0, 0.0, 0.0).is_err());
        assert_eq!(store.session_frames(session.name()).unwrap().len(), 2);
    }

    #[test]
    fn sessions_opened_together_get_distinct_names() {
        let (_tmp, store) = store();
        let a = store.open().unwrap();
        let b = store.open().unwrap();
        assert_ne!(a.name(), b.name());

        let listed = store.list_sessions().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.frames == 0));
    }

    #[test]
    fn delete_frames_and_sessions() {
        let (_tmp, store) = store();
        let session = store.open().unwrap();
        let frame = Frame::blank(1, 1);
        for _ in 0..3 {
            session.put(&frame, 0.0, 0.1, 0.0).unwrap();
        }
        let name = session.name().to_string();
        let frames = store.session_frames(&name).unwrap();

        let removed = store
            .delete_frames(&name, &[frames[0].name.clone(), frames[0].name.clone()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list_sessions().unwrap()[0].frames, 2);

        store.delete_session(&name).unwrap();
        assert!(store.list_sessions().unwrap().is_empty());
        assert!(store.session_frames(&name).is_err());
    }

    #[test]
    fn names_cannot_escape_the_root() {
        let (_tmp, store) = store();
        for name in ["..", "../etc", "a/b", ".hidden", ""] {
            assert!(store.session_dir(name).is_err(), "{name:?}");
        }
        let session = store.open().unwrap();
        assert!(store
            .delete_frames(session.name(), &["../../x".to_string()])
            .is_err());
    }

    fn age(path: &Path, by: Duration) {
        let file = fs::File::open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn recorded_frames_can_be_read_back() {
        let (_tmp, store) = store();
        let session = store.open().unwrap();
        let frame = Frame::new(1, 2, 3, vec![1, 2, 3, 4, 5, 6]).unwrap();
        session.put(&frame, 0.1, 0.2, 0.0).unwrap();
        let name = store.session_frames(session.name()).unwrap()[0].name.clone();

        let bytes = store.frame_bytes(session.name(), &name).unwrap();
        assert_eq!(Frame::from_pnm(&bytes).unwrap(), frame);

        let missing = frame_name(99, 0.0, 0.0, 0.0);
        assert!(store.frame_bytes(session.name(), &missing).is_err());
        assert!(store.frame_bytes(session.name(), "../tags.json").is_err());
    }

    #[test]
    fn last_session_is_the_most_recently_written() {
        let (_tmp, store) = store();
        assert_eq!(store.last_session().unwrap(), None);

        let older = store.open().unwrap();
        let newer = store.open().unwrap();
        newer.put(&Frame::blank(1, 1), 0.0, 0.0, 0.0).unwrap();
        age(&store.root().join(older.name()), Duration::from_secs(60));

        assert_eq!(store.last_session().unwrap().as_deref(), Some(newer.name()));
    }

    #[test]
    fn recent_frames_are_trimmed_from_the_end() {
        let (_tmp, store) = store();
        let session = store.open().unwrap();
        for _ in 0..4 {
            session.put(&Frame::blank(1, 1), 0.0, 0.3, 0.0).unwrap();
        }
        let dir = store.root().join(session.name());
        let frames = store.session_frames(session.name()).unwrap();
        age(&dir.join(&frames[0].name), Duration::from_secs(20));
        age(&dir.join(&frames[1].name), Duration::from_secs(10));

        let removed = store
            .delete_recent_frames(session.name(), Duration::from_secs(3))
            .unwrap();
        assert_eq!(removed, 2);
        let left: Vec<u64> = store
            .session_frames(session.name())
            .unwrap()
            .iter()
            .map(|f| f.counter)
            .collect();
        assert_eq!(left, vec![1, 2]);

        let empty = store.open().unwrap();
        assert_eq!(
            store.delete_recent_frames(empty.name(), Duration::from_secs(3)).unwrap(),
            0
        );
    }

    #[test]
    fn tags_follow_their_session() {
        let (_tmp, store) = store();
        let a = store.open().unwrap();
        let b = store.open().unwrap();

        store.add_tag(a.name(), "indoor").unwrap();
        store.add_tag(a.name(), " night ").unwrap();
        store.add_tag(a.name(), "indoor").unwrap();
        store.add_tag(b.name(), "outdoor").unwrap();
        assert_eq!(store.session_tags(a.name()).unwrap(), vec!["indoor", "night"]);
        assert_eq!(store.all_tags().unwrap(), vec!["indoor", "night", "outdoor"]);

        let listed = store.list_sessions().unwrap();
        let tagged = listed.iter().find(|s| s.name == b.name()).unwrap();
        assert_eq!(tagged.tags, vec!["outdoor"]);

        assert!(store.remove_tag(a.name(), "night").unwrap());
        assert!(!store.remove_tag(a.name(), "night").unwrap());
        assert!(store.add_tag(a.name(), "  ").is_err());
        assert!(store.add_tag("no_such_session", "x").is_err());

        store.delete_session(b.name()).unwrap();
        assert_eq!(store.all_tags().unwrap(), vec!["indoor"]);
        assert_eq!(store.list_sessions().unwrap().len(), 1);
    }
}
