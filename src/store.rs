use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::model::{ClientConfig, ClientState, OpKind, PendingOp, Session};

const STORE_DIR: &str = ".chalkline";
const PENDING_DIR: &str = "pending";

/// Durable local state: remote configuration, the session credential, and one
/// append-only pending-operation log per resource collection.
#[derive(Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn chalkline_dir(root: &Path) -> PathBuf {
        root.join(STORE_DIR)
    }

    pub fn open(client_root: &Path) -> Result<Self> {
        let root = Self::chalkline_dir(client_root);
        if !root.is_dir() {
            return Err(anyhow!(
                "No {} directory found at {} (run `chalkline init`)",
                STORE_DIR,
                root.display()
            ));
        }
        Ok(Self { root })
    }

    pub fn init(client_root: &Path, force: bool) -> Result<Self> {
        let root = Self::chalkline_dir(client_root);
        if root.exists() && !force {
            return Err(anyhow!(
                "{} already exists at {} (use --force to re-init)",
                STORE_DIR,
                root.display()
            ));
        }

        fs::create_dir_all(root.join(PENDING_DIR)).context("create pending dir")?;

        let cfg = ClientConfig {
            version: 1,
            remote: None,
        };
        let cfg_bytes = serde_json::to_vec_pretty(&cfg).context("serialize client config")?;
        write_atomic(&root.join("config.json"), &cfg_bytes).context("write config.json")?;

        let state = ClientState {
            version: 1,
            session: None,
        };
        let state_bytes = serde_json::to_vec_pretty(&state).context("serialize client state")?;
        write_atomic(&root.join("state.json"), &state_bytes).context("write state.json")?;

        Ok(Self { root })
    }

    pub fn read_config(&self) -> Result<ClientConfig> {
        let bytes = fs::read(self.root.join("config.json")).context("read config.json")?;
        let cfg: ClientConfig = serde_json::from_slice(&bytes).context("parse config.json")?;
        if cfg.version != 1 {
            anyhow::bail!("unsupported client config version {}", cfg.version);
        }
        Ok(cfg)
    }

    pub fn write_config(&self, cfg: &ClientConfig) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(cfg).context("serialize config")?;
        write_atomic(&self.root.join("config.json"), &bytes).context("write config.json")?;
        Ok(())
    }

    pub fn read_state(&self) -> Result<ClientState> {
        let path = self.root.join("state.json");
        if !path.exists() {
            return Ok(ClientState {
                version: 1,
                session: None,
            });
        }
        let bytes = fs::read(&path).context("read state.json")?;
        let st: ClientState = serde_json::from_slice(&bytes).context("parse state.json")?;
        if st.version != 1 {
            anyhow::bail!("unsupported client state version {}", st.version);
        }
        Ok(st)
    }

    pub fn write_state(&self, st: &ClientState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(st).context("serialize state")?;
        write_atomic(&self.root.join("state.json"), &bytes).context("write state.json")?;
        Ok(())
    }

    pub fn session(&self) -> Result<Option<Session>> {
        Ok(self.read_state()?.session)
    }

    pub fn set_session(&self, session: &Session) -> Result<()> {
        let mut st = self.read_state()?;
        st.session = Some(session.clone());
        self.write_state(&st)
    }

    pub fn clear_session(&self) -> Result<()> {
        let mut st = self.read_state()?;
        st.session = None;
        self.write_state(&st)
    }

    fn pending_path(&self, resource: &str) -> Result<PathBuf> {
        validate_resource_name(resource)?;
        Ok(self
            .root
            .join(PENDING_DIR)
            .join(format!("{resource}.jsonl")))
    }

    /// Records one operation at the end of the resource's log.
    ///
    /// The log is a JSONL file opened with O_APPEND and each entry is a single
    /// write, so independent writers (other processes on the same store)
    /// interleave whole lines instead of losing entries to a
    /// read-modify-write race. Entries are never rewritten.
    pub fn append_pending(&self, resource: &str, kind: OpKind, item: Value) -> Result<PendingOp> {
        let path = self.pending_path(resource)?;

        // Strictly increasing within one log; synthetic ids derive from it.
        let last = self
            .pending(resource)?
            .last()
            .map(|op| op.recorded_at)
            .unwrap_or(i64::MIN);
        let now = now_millis();
        let recorded_at = if now > last { now } else { last + 1 };

        let op = PendingOp {
            kind,
            item,
            recorded_at,
        };
        let mut line = serde_json::to_vec(&op).context("serialize pending operation")?;
        line.push(b'\n');

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create pending dir")?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open pending log {}", path.display()))?;
        file.write_all(&line)
            .with_context(|| format!("append to pending log {}", path.display()))?;

        Ok(op)
    }

    /// Entries in original append order. A torn trailing line (interrupted
    /// writer) is skipped rather than failing the read.
    pub fn pending(&self, resource: &str) -> Result<Vec<PendingOp>> {
        let path = self.pending_path(resource)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("read pending log {}", path.display()))?;

        let mut out = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PendingOp>(line) {
                Ok(op) => out.push(op),
                Err(err) => {
                    tracing::warn!(
                        resource,
                        line = lineno + 1,
                        error = %err,
                        "skipping unparsable pending log line"
                    );
                }
            }
        }
        Ok(out)
    }

    /// Explicit manual reset. The only way entries ever leave a log.
    pub fn clear_pending(&self, resource: &str) -> Result<()> {
        let path = self.pending_path(resource)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("remove pending log {}", path.display()))?;
        }
        Ok(())
    }

    /// Resource collections with a pending log on disk, sorted by name.
    pub fn pending_resources(&self) -> Result<Vec<String>> {
        let dir = self.root.join(PENDING_DIR);
        let mut out = Vec::new();
        if !dir.is_dir() {
            return Ok(out);
        }
        for entry in fs::read_dir(&dir).context("read pending dir")? {
            let entry = entry.context("read pending dir entry")?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            out.push(stem.to_string());
        }
        out.sort();
        Ok(out)
    }
}

pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Resource names become file names, so anything outside [a-z0-9_-]+ is
/// rejected before it reaches the filesystem.
fn validate_resource_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
    if !ok {
        return Err(anyhow!(
            "invalid resource name {:?} (expected [a-z0-9_-]+)",
            name
        ));
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create parent directories")?;
    }
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    fs::write(&tmp, bytes).with_context(|| format!("write temp file {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}
